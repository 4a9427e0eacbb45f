use std::{
    collections::BTreeMap,
    ops::{Deref, DerefMut},
};

use ahash::AHashMap;
use regex::Regex;

use crate::{
    errors::{LabelGraphError, ValidationIssue},
    schema::{LabelRef, PropertyDefinition, SchemaDefinition},
    types::{SqlValue, encode_literal},
};

use super::records::Properties;

/// Accumulates validation issues under a scoped path.
///
/// ```rust
/// use labelgraph::loader::ErrorCollector;
///
/// let mut errors = ErrorCollector::new();
/// {
///     let mut record = errors.enter("Person[2]");
///     let mut field = record.enter("age");
///     field.report("expected integer");
/// }
/// assert_eq!(errors.issues()[0].path, "Person[2].age");
/// ```
#[derive(Debug, Default)]
pub struct ErrorCollector {
    segments: Vec<String>,
    issues: Vec<ValidationIssue>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a path segment; it is popped when the returned guard drops.
    pub fn enter<S: Into<String>>(&mut self, segment: S) -> PathGuard<'_> {
        self.segments.push(segment.into());
        PathGuard { collector: self }
    }

    pub fn report<M: Into<String>>(&mut self, message: M) {
        let issue = ValidationIssue {
            path: self.path(),
            message: message.into(),
        };
        self.issues.push(issue);
    }

    pub fn path(&self) -> String {
        let mut path = String::new();
        for segment in &self.segments {
            if !path.is_empty() && !segment.starts_with('[') {
                path.push('.');
            }
            path.push_str(segment);
        }
        path
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn take_issues(&mut self) -> Vec<ValidationIssue> {
        std::mem::take(&mut self.issues)
    }
}

pub struct PathGuard<'c> {
    collector: &'c mut ErrorCollector,
}

impl Deref for PathGuard<'_> {
    type Target = ErrorCollector;

    fn deref(&self) -> &ErrorCollector {
        self.collector
    }
}

impl DerefMut for PathGuard<'_> {
    fn deref_mut(&mut self) -> &mut ErrorCollector {
        self.collector
    }
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        self.collector.segments.pop();
    }
}

/// Checks and encodes records of one label.
pub(crate) struct LabelValidator<'s> {
    properties: &'s BTreeMap<String, PropertyDefinition>,
    patterns: AHashMap<&'s str, Regex>,
}

impl<'s> LabelValidator<'s> {
    fn new(properties: &'s BTreeMap<String, PropertyDefinition>) -> Result<Self, LabelGraphError> {
        let mut patterns = AHashMap::new();
        for (name, definition) in properties {
            if let Some(regex) = definition.constraints.compile_pattern()? {
                patterns.insert(name.as_str(), regex);
            }
        }
        Ok(Self { properties, patterns })
    }

    /// Property columns in storage order.
    pub(crate) fn columns(&self) -> impl Iterator<Item = &'s String> + 's {
        self.properties.keys()
    }

    pub(crate) fn definition(&self, column: &str) -> Option<&'s PropertyDefinition> {
        self.properties.get(column)
    }

    /// Encodes `record` in column order with defaults applied. Returns `None` after
    /// reporting at least one issue.
    pub(crate) fn encode(&self, record: &Properties, collector: &mut ErrorCollector) -> Option<Vec<SqlValue>> {
        let before = collector.len();
        for name in record.keys() {
            if !self.properties.contains_key(name) {
                collector.enter(name.as_str()).report("undeclared property");
            }
        }
        let mut row = Vec::with_capacity(self.properties.len());
        for (name, definition) in self.properties {
            let mut field = collector.enter(name.as_str());
            let value = record
                .get(name)
                .filter(|value| !value.is_null())
                .or(definition.effective_default());
            let Some(value) = value else {
                if definition.required {
                    field.report("missing required property");
                }
                row.push(SqlValue::Null);
                continue;
            };
            match encode_literal(value, definition.property_type) {
                Ok(encoded) => {
                    let pattern = self.patterns.get(name.as_str());
                    if let Some(problem) = definition.constraints.violation(value, pattern) {
                        field.report(problem);
                    }
                    row.push(encoded);
                }
                Err(err) => field.report(err.to_string()),
            }
        }
        (collector.len() == before).then_some(row)
    }
}

/// Validators built on first use, one per label.
pub(crate) struct ValidatorCache<'s> {
    schema: &'s SchemaDefinition,
    entries: AHashMap<LabelRef, LabelValidator<'s>>,
}

impl<'s> ValidatorCache<'s> {
    pub(crate) fn new(schema: &'s SchemaDefinition) -> Self {
        Self {
            schema,
            entries: AHashMap::new(),
        }
    }

    /// `None` when the schema does not declare `label`.
    pub(crate) fn get(&mut self, label: &LabelRef) -> Result<Option<&LabelValidator<'s>>, LabelGraphError> {
        if !self.entries.contains_key(label) {
            let Some(properties) = self.schema.properties(label) else {
                return Ok(None);
            };
            self.entries.insert(label.clone(), LabelValidator::new(properties)?);
        }
        Ok(self.entries.get(label))
    }
}
