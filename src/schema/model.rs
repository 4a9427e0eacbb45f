use std::{
    collections::{BTreeMap, BTreeSet},
    fmt, fs,
    path::Path,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    errors::LabelGraphError,
    sql::quote_identifier,
    types::{PropertyType, encode_literal},
};

use super::version::SchemaVersion;

/// Column names the storage layout uses for itself, staging tables included.
pub const RESERVED_PROPERTY_NAMES: [&str; 4] = ["_id", "_from", "_to", "_seq"];

/// Optional value constraints of a property.
///
/// `min`/`max` bound numeric values, and the length of strings and arrays.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none() && self.pattern.is_none()
    }

    pub fn compile_pattern(&self) -> Result<Option<Regex>, LabelGraphError> {
        self.pattern
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    LabelGraphError::invalid_schema(format!("invalid pattern {pattern:?}: {e}"))
                })
            })
            .transpose()
    }

    /// Describes the first constraint `value` violates, if any. `pattern` is the
    /// compiled form of `self.pattern`.
    pub(crate) fn violation(&self, value: &Value, pattern: Option<&Regex>) -> Option<String> {
        let measured = match value {
            Value::Number(n) => n.as_f64().map(|f| (f, "value")),
            Value::String(s) => Some((s.chars().count() as f64, "length")),
            Value::Array(items) => Some((items.len() as f64, "length")),
            _ => None,
        };
        if let Some((measure, what)) = measured {
            if let Some(min) = self.min
                && measure < min
            {
                return Some(format!("{what} {measure} is below minimum {min}"));
            }
            if let Some(max) = self.max
                && measure > max
            {
                return Some(format!("{what} {measure} is above maximum {max}"));
            }
        }
        if let (Some(regex), Value::String(s)) = (pattern, value)
            && !regex.is_match(s)
        {
            return Some(format!("{s:?} does not match pattern {:?}", regex.as_str()));
        }
        None
    }
}

/// Declared type and constraints of one named property.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Constraints::is_empty")]
    pub constraints: Constraints,
}

impl PropertyDefinition {
    pub fn new(property_type: PropertyType) -> Self {
        Self {
            property_type,
            required: false,
            default: None,
            constraints: Constraints::default(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.constraints.min = Some(min);
        self
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.constraints.max = Some(max);
        self
    }

    pub fn with_pattern<T: Into<String>>(mut self, pattern: T) -> Self {
        self.constraints.pattern = Some(pattern.into());
        self
    }

    /// A default that is present and not JSON null.
    pub fn effective_default(&self) -> Option<&Value> {
        self.default.as_ref().filter(|value| !value.is_null())
    }

    fn validate(&self, path: &str) -> Result<(), LabelGraphError> {
        if let (Some(min), Some(max)) = (self.constraints.min, self.constraints.max)
            && min > max
        {
            return Err(LabelGraphError::invalid_schema(format!(
                "{path}: min {min} is greater than max {max}"
            )));
        }
        let pattern = self.constraints.compile_pattern()?;
        if let Some(default) = self.effective_default() {
            encode_literal(default, self.property_type).map_err(|e| {
                LabelGraphError::invalid_schema(format!("{path}: default does not fit type: {e}"))
            })?;
            if let Some(problem) = self.constraints.violation(default, pattern.as_ref()) {
                return Err(LabelGraphError::invalid_schema(format!(
                    "{path}: default violates constraints: {problem}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelKind {
    Vertex,
    Edge,
}

impl fmt::Display for LabelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelKind::Vertex => f.write_str("vertex"),
            LabelKind::Edge => f.write_str("edge"),
        }
    }
}

/// A vertex or edge label by kind and name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelRef {
    pub kind: LabelKind,
    pub label: String,
}

impl LabelRef {
    pub fn vertex<T: Into<String>>(label: T) -> Self {
        Self {
            kind: LabelKind::Vertex,
            label: label.into(),
        }
    }

    pub fn edge<T: Into<String>>(label: T) -> Self {
        Self {
            kind: LabelKind::Edge,
            label: label.into(),
        }
    }
}

impl fmt::Display for LabelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.label)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VertexLabel {
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDefinition>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub indexes: BTreeSet<String>,
}

impl VertexLabel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property<T: Into<String>>(mut self, name: T, definition: PropertyDefinition) -> Self {
        self.properties.insert(name.into(), definition);
        self
    }

    pub fn index<T: Into<String>>(mut self, property: T) -> Self {
        self.indexes.insert(property.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeLabel {
    #[serde(alias = "fromVertex")]
    pub from_vertex: String,
    #[serde(alias = "toVertex")]
    pub to_vertex: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDefinition>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub indexes: BTreeSet<String>,
}

impl EdgeLabel {
    pub fn new<F: Into<String>, T: Into<String>>(from_vertex: F, to_vertex: T) -> Self {
        Self {
            from_vertex: from_vertex.into(),
            to_vertex: to_vertex.into(),
            properties: BTreeMap::new(),
            indexes: BTreeSet::new(),
        }
    }

    pub fn property<T: Into<String>>(mut self, name: T, definition: PropertyDefinition) -> Self {
        self.properties.insert(name.into(), definition);
        self
    }

    pub fn index<T: Into<String>>(mut self, property: T) -> Self {
        self.indexes.insert(property.into());
        self
    }
}

/// Versioned description of every vertex and edge label of one graph.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub version: SchemaVersion,
    #[serde(default)]
    pub vertices: BTreeMap<String, VertexLabel>,
    #[serde(default)]
    pub edges: BTreeMap<String, EdgeLabel>,
}

impl SchemaDefinition {
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            vertices: BTreeMap::new(),
            edges: BTreeMap::new(),
        }
    }

    /// The schema of a graph with no labels, at version `0.0.0`.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.edges.is_empty()
    }

    pub fn with_vertex<T: Into<String>>(mut self, label: T, vertex: VertexLabel) -> Self {
        self.vertices.insert(label.into(), vertex);
        self
    }

    pub fn with_edge<T: Into<String>>(mut self, label: T, edge: EdgeLabel) -> Self {
        self.edges.insert(label.into(), edge);
        self
    }

    pub fn properties(&self, label: &LabelRef) -> Option<&BTreeMap<String, PropertyDefinition>> {
        match label.kind {
            LabelKind::Vertex => self.vertices.get(&label.label).map(|v| &v.properties),
            LabelKind::Edge => self.edges.get(&label.label).map(|e| &e.properties),
        }
    }

    pub(crate) fn properties_mut(
        &mut self,
        label: &LabelRef,
    ) -> Option<&mut BTreeMap<String, PropertyDefinition>> {
        match label.kind {
            LabelKind::Vertex => self.vertices.get_mut(&label.label).map(|v| &mut v.properties),
            LabelKind::Edge => self.edges.get_mut(&label.label).map(|e| &mut e.properties),
        }
    }

    pub fn indexes(&self, label: &LabelRef) -> Option<&BTreeSet<String>> {
        match label.kind {
            LabelKind::Vertex => self.vertices.get(&label.label).map(|v| &v.indexes),
            LabelKind::Edge => self.edges.get(&label.label).map(|e| &e.indexes),
        }
    }

    /// Edge labels whose `from_vertex` or `to_vertex` is `vertex`.
    pub fn edges_touching<'a>(&'a self, vertex: &'a str) -> impl Iterator<Item = (&'a String, &'a EdgeLabel)> + 'a {
        self.edges
            .iter()
            .filter(move |(_, edge)| edge.from_vertex == vertex || edge.to_vertex == vertex)
    }

    /// Checks the schema invariants: endpoint labels exist, identifiers are usable by
    /// the backend, indexes name declared properties and defaults satisfy their
    /// property's type and constraints.
    pub fn validate(&self) -> Result<(), LabelGraphError> {
        check_label_names(self.vertices.keys(), LabelKind::Vertex)?;
        check_label_names(self.edges.keys(), LabelKind::Edge)?;
        for (name, vertex) in &self.vertices {
            check_properties(name, &vertex.properties, &vertex.indexes)?;
        }
        for (name, edge) in &self.edges {
            for (role, endpoint) in [("from_vertex", &edge.from_vertex), ("to_vertex", &edge.to_vertex)] {
                if !self.vertices.contains_key(endpoint) {
                    return Err(LabelGraphError::invalid_schema(format!(
                        "edge {name}: {role} references unknown vertex label {endpoint:?}"
                    )));
                }
            }
            check_properties(name, &edge.properties, &edge.indexes)?;
        }
        Ok(())
    }

    pub fn from_json_str(text: &str) -> Result<Self, LabelGraphError> {
        let schema: SchemaDefinition = serde_json::from_str(text)
            .map_err(|e| LabelGraphError::invalid_schema(e.to_string()))?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, LabelGraphError> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| LabelGraphError::io(e.to_string()))?;
        Self::from_json_str(&text)
    }

    /// Serialized form with sorted keys; equal schemas produce equal text.
    pub fn to_canonical_json(&self) -> Result<String, LabelGraphError> {
        serde_json::to_string(self).map_err(|e| LabelGraphError::invalid_schema(e.to_string()))
    }
}

fn check_label_names<'a>(
    names: impl Iterator<Item = &'a String>,
    kind: LabelKind,
) -> Result<(), LabelGraphError> {
    let mut folded = BTreeSet::new();
    for name in names {
        quote_identifier(name)?;
        if !folded.insert(name.to_lowercase()) {
            return Err(LabelGraphError::invalid_schema(format!(
                "{kind} label {name:?} differs from another label only by case"
            )));
        }
    }
    Ok(())
}

fn check_properties(
    label: &str,
    properties: &BTreeMap<String, PropertyDefinition>,
    indexes: &BTreeSet<String>,
) -> Result<(), LabelGraphError> {
    let mut folded = BTreeSet::new();
    for (name, definition) in properties {
        quote_identifier(name)?;
        let lowered = name.to_lowercase();
        if RESERVED_PROPERTY_NAMES.contains(&lowered.as_str()) {
            return Err(LabelGraphError::invalid_schema(format!(
                "{label}.{name}: property name is reserved"
            )));
        }
        if !folded.insert(lowered) {
            return Err(LabelGraphError::invalid_schema(format!(
                "{label}.{name}: differs from another property only by case"
            )));
        }
        definition.validate(&format!("{label}.{name}"))?;
    }
    for index in indexes {
        if !properties.contains_key(index) {
            return Err(LabelGraphError::invalid_schema(format!(
                "{label}: index on undeclared property {index:?}"
            )));
        }
    }
    Ok(())
}
