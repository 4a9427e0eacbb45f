use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Property values of one vertex or edge, keyed by property name.
pub type Properties = Map<String, Value>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VertexRecord {
    #[serde(default)]
    pub properties: Properties,
}

impl VertexRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<K: Into<String>, V: Into<Value>>(mut self, name: K, value: V) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

/// Endpoint of an edge record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VertexRef {
    /// The `index`-th record (0-based, across every batch of `label`) of the current load.
    Staged { label: String, index: usize },
    /// A vertex already committed with `_id = id`.
    Existing { label: String, id: i64 },
}

impl VertexRef {
    pub fn staged<T: Into<String>>(label: T, index: usize) -> Self {
        VertexRef::Staged {
            label: label.into(),
            index,
        }
    }

    pub fn existing<T: Into<String>>(label: T, id: i64) -> Self {
        VertexRef::Existing {
            label: label.into(),
            id,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            VertexRef::Staged { label, .. } | VertexRef::Existing { label, .. } => label,
        }
    }
}

impl fmt::Display for VertexRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VertexRef::Staged { label, index } => write!(f, "staged {label}[{index}]"),
            VertexRef::Existing { label, id } => write!(f, "{label} #{id}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub from: VertexRef,
    pub to: VertexRef,
    #[serde(default)]
    pub properties: Properties,
}

impl EdgeRecord {
    pub fn new(from: VertexRef, to: VertexRef) -> Self {
        Self {
            from,
            to,
            properties: Properties::new(),
        }
    }

    pub fn with<K: Into<String>, V: Into<Value>>(mut self, name: K, value: V) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

type Source<'a, T> = Box<dyn Fn() -> Box<dyn Iterator<Item = T> + 'a> + 'a>;

/// Records of one label. The source is re-openable: the loader streams it once to
/// validate and once to stage, so records never have to be held in memory at once.
pub struct RecordBatch<'a, T> {
    pub label: String,
    source: Source<'a, T>,
}

pub type VertexBatch<'a> = RecordBatch<'a, VertexRecord>;
pub type EdgeBatch<'a> = RecordBatch<'a, EdgeRecord>;

impl<'a, T: 'a> RecordBatch<'a, T> {
    /// Batch over a source that can be iterated repeatedly, e.g. a file reader
    /// factory.
    pub fn streaming<L, F, I>(label: L, source: F) -> Self
    where
        L: Into<String>,
        F: Fn() -> I + 'a,
        I: IntoIterator<Item = T>,
        I::IntoIter: 'a,
    {
        Self {
            label: label.into(),
            source: Box::new(move || -> Box<dyn Iterator<Item = T> + 'a> { Box::new(source().into_iter()) }),
        }
    }

    pub(crate) fn open(&self) -> Box<dyn Iterator<Item = T> + 'a> {
        (self.source)()
    }
}

impl<'a, T: Clone + 'a> RecordBatch<'a, T> {
    /// Batch over records already in memory.
    pub fn from_records<L: Into<String>>(label: L, records: Vec<T>) -> Self {
        let records = Arc::new(records);
        Self::streaming(label, move || {
            let records = Arc::clone(&records);
            (0..records.len()).map(move |index| records[index].clone())
        })
    }
}

impl<T> fmt::Debug for RecordBatch<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordBatch").field("label", &self.label).finish_non_exhaustive()
    }
}
