//! Structural comparison of two schema definitions.
//!
//! [`compare_schemas`] yields changes in a fixed order: vertex removals, vertex
//! additions, then per shared vertex label (alphabetically) its property removals,
//! additions and modifications followed by the label-level index change; the same
//! sequence follows for edges. The migration planner relies on this order.
//!
//! Every change carries both sides of what it touched, so [`SchemaChange::inverse`]
//! is exact and [`SchemaDefinition::apply_change`] can replay it.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::{Deserialize, Serialize};

use crate::{
    errors::LabelGraphError,
    schema::{EdgeLabel, LabelKind, LabelRef, PropertyDefinition, SchemaDefinition, VertexLabel},
};

/// Declared endpoint labels of an edge label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub from_vertex: String,
    pub to_vertex: String,
}

impl Endpoints {
    fn of(edge: &EdgeLabel) -> Self {
        Self {
            from_vertex: edge.from_vertex.clone(),
            to_vertex: edge.to_vertex.clone(),
        }
    }
}

impl fmt::Display for Endpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from_vertex, self.to_vertex)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum SchemaChange {
    AddVertex {
        label: String,
        definition: VertexLabel,
    },
    RemoveVertex {
        label: String,
        definition: VertexLabel,
    },
    /// The label's index set changed.
    ModifyVertex {
        label: String,
        indexes_before: BTreeSet<String>,
        indexes_after: BTreeSet<String>,
    },
    AddEdge {
        label: String,
        definition: EdgeLabel,
    },
    RemoveEdge {
        label: String,
        definition: EdgeLabel,
    },
    /// Endpoint labels and/or the index set changed.
    ModifyEdge {
        label: String,
        endpoints_before: Endpoints,
        endpoints_after: Endpoints,
        indexes_before: BTreeSet<String>,
        indexes_after: BTreeSet<String>,
    },
    AddProperty {
        owner: LabelRef,
        property: String,
        definition: PropertyDefinition,
    },
    RemoveProperty {
        owner: LabelRef,
        property: String,
        definition: PropertyDefinition,
    },
    ModifyProperty {
        owner: LabelRef,
        property: String,
        before: PropertyDefinition,
        after: PropertyDefinition,
    },
}

impl SchemaChange {
    /// The label this change touches.
    pub fn owner(&self) -> LabelRef {
        match self {
            SchemaChange::AddVertex { label, .. }
            | SchemaChange::RemoveVertex { label, .. }
            | SchemaChange::ModifyVertex { label, .. } => LabelRef::vertex(label.as_str()),
            SchemaChange::AddEdge { label, .. }
            | SchemaChange::RemoveEdge { label, .. }
            | SchemaChange::ModifyEdge { label, .. } => LabelRef::edge(label.as_str()),
            SchemaChange::AddProperty { owner, .. }
            | SchemaChange::RemoveProperty { owner, .. }
            | SchemaChange::ModifyProperty { owner, .. } => owner.clone(),
        }
    }

    pub fn property(&self) -> Option<&str> {
        match self {
            SchemaChange::AddProperty { property, .. }
            | SchemaChange::RemoveProperty { property, .. }
            | SchemaChange::ModifyProperty { property, .. } => Some(property),
            _ => None,
        }
    }

    /// The change that undoes this one.
    pub fn inverse(&self) -> SchemaChange {
        match self.clone() {
            SchemaChange::AddVertex { label, definition } => SchemaChange::RemoveVertex { label, definition },
            SchemaChange::RemoveVertex { label, definition } => SchemaChange::AddVertex { label, definition },
            SchemaChange::ModifyVertex {
                label,
                indexes_before,
                indexes_after,
            } => SchemaChange::ModifyVertex {
                label,
                indexes_before: indexes_after,
                indexes_after: indexes_before,
            },
            SchemaChange::AddEdge { label, definition } => SchemaChange::RemoveEdge { label, definition },
            SchemaChange::RemoveEdge { label, definition } => SchemaChange::AddEdge { label, definition },
            SchemaChange::ModifyEdge {
                label,
                endpoints_before,
                endpoints_after,
                indexes_before,
                indexes_after,
            } => SchemaChange::ModifyEdge {
                label,
                endpoints_before: endpoints_after,
                endpoints_after: endpoints_before,
                indexes_before: indexes_after,
                indexes_after: indexes_before,
            },
            SchemaChange::AddProperty {
                owner,
                property,
                definition,
            } => SchemaChange::RemoveProperty {
                owner,
                property,
                definition,
            },
            SchemaChange::RemoveProperty {
                owner,
                property,
                definition,
            } => SchemaChange::AddProperty {
                owner,
                property,
                definition,
            },
            SchemaChange::ModifyProperty {
                owner,
                property,
                before,
                after,
            } => SchemaChange::ModifyProperty {
                owner,
                property,
                before: after,
                after: before,
            },
        }
    }
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaChange::AddVertex { label, .. } => write!(f, "add vertex {label}"),
            SchemaChange::RemoveVertex { label, .. } => write!(f, "remove vertex {label}"),
            SchemaChange::ModifyVertex { label, .. } => write!(f, "modify indexes of vertex {label}"),
            SchemaChange::AddEdge { label, .. } => write!(f, "add edge {label}"),
            SchemaChange::RemoveEdge { label, .. } => write!(f, "remove edge {label}"),
            SchemaChange::ModifyEdge {
                label,
                endpoints_before,
                endpoints_after,
                ..
            } if endpoints_before != endpoints_after => {
                write!(f, "modify edge {label} ({endpoints_before} to {endpoints_after})")
            }
            SchemaChange::ModifyEdge { label, .. } => write!(f, "modify indexes of edge {label}"),
            SchemaChange::AddProperty { owner, property, .. } => {
                write!(f, "add property {}.{property}", owner.label)
            }
            SchemaChange::RemoveProperty { owner, property, .. } => {
                write!(f, "remove property {}.{property}", owner.label)
            }
            SchemaChange::ModifyProperty { owner, property, .. } => {
                write!(f, "modify property {}.{property}", owner.label)
            }
        }
    }
}

/// Ordered list of changes turning `old` into `new`. Versions are not compared.
pub fn compare_schemas(old: &SchemaDefinition, new: &SchemaDefinition) -> Vec<SchemaChange> {
    let mut changes = Vec::new();

    for (label, definition) in &old.vertices {
        if !new.vertices.contains_key(label) {
            changes.push(SchemaChange::RemoveVertex {
                label: label.clone(),
                definition: definition.clone(),
            });
        }
    }
    for (label, definition) in &new.vertices {
        if !old.vertices.contains_key(label) {
            changes.push(SchemaChange::AddVertex {
                label: label.clone(),
                definition: definition.clone(),
            });
        }
    }
    for (label, before) in &old.vertices {
        let Some(after) = new.vertices.get(label) else {
            continue;
        };
        diff_properties(&LabelRef::vertex(label.as_str()), &before.properties, &after.properties, &mut changes);
        if before.indexes != after.indexes {
            changes.push(SchemaChange::ModifyVertex {
                label: label.clone(),
                indexes_before: before.indexes.clone(),
                indexes_after: after.indexes.clone(),
            });
        }
    }

    for (label, definition) in &old.edges {
        if !new.edges.contains_key(label) {
            changes.push(SchemaChange::RemoveEdge {
                label: label.clone(),
                definition: definition.clone(),
            });
        }
    }
    for (label, definition) in &new.edges {
        if !old.edges.contains_key(label) {
            changes.push(SchemaChange::AddEdge {
                label: label.clone(),
                definition: definition.clone(),
            });
        }
    }
    for (label, before) in &old.edges {
        let Some(after) = new.edges.get(label) else {
            continue;
        };
        diff_properties(&LabelRef::edge(label.as_str()), &before.properties, &after.properties, &mut changes);
        let endpoints_before = Endpoints::of(before);
        let endpoints_after = Endpoints::of(after);
        if endpoints_before != endpoints_after || before.indexes != after.indexes {
            changes.push(SchemaChange::ModifyEdge {
                label: label.clone(),
                endpoints_before,
                endpoints_after,
                indexes_before: before.indexes.clone(),
                indexes_after: after.indexes.clone(),
            });
        }
    }

    changes
}

fn diff_properties(
    owner: &LabelRef,
    before: &BTreeMap<String, PropertyDefinition>,
    after: &BTreeMap<String, PropertyDefinition>,
    changes: &mut Vec<SchemaChange>,
) {
    for (property, definition) in before {
        if !after.contains_key(property) {
            changes.push(SchemaChange::RemoveProperty {
                owner: owner.clone(),
                property: property.clone(),
                definition: definition.clone(),
            });
        }
    }
    for (property, definition) in after {
        if !before.contains_key(property) {
            changes.push(SchemaChange::AddProperty {
                owner: owner.clone(),
                property: property.clone(),
                definition: definition.clone(),
            });
        }
    }
    for (property, old_def) in before {
        if let Some(new_def) = after.get(property)
            && old_def != new_def
        {
            changes.push(SchemaChange::ModifyProperty {
                owner: owner.clone(),
                property: property.clone(),
                before: old_def.clone(),
                after: new_def.clone(),
            });
        }
    }
}

impl SchemaDefinition {
    /// Applies one change in place. Fails when the schema is not in the state the
    /// change was computed against.
    pub fn apply_change(&mut self, change: &SchemaChange) -> Result<(), LabelGraphError> {
        match change {
            SchemaChange::AddVertex { label, definition } => {
                if self.vertices.contains_key(label) {
                    return Err(mismatch(change, "label already exists"));
                }
                self.vertices.insert(label.clone(), definition.clone());
            }
            SchemaChange::RemoveVertex { label, .. } => {
                self.vertices
                    .remove(label)
                    .ok_or_else(|| mismatch(change, "label does not exist"))?;
            }
            SchemaChange::ModifyVertex {
                label,
                indexes_before,
                indexes_after,
            } => {
                let vertex = self
                    .vertices
                    .get_mut(label)
                    .ok_or_else(|| mismatch(change, "label does not exist"))?;
                if &vertex.indexes != indexes_before {
                    return Err(mismatch(change, "index set differs"));
                }
                vertex.indexes = indexes_after.clone();
            }
            SchemaChange::AddEdge { label, definition } => {
                if self.edges.contains_key(label) {
                    return Err(mismatch(change, "label already exists"));
                }
                self.edges.insert(label.clone(), definition.clone());
            }
            SchemaChange::RemoveEdge { label, .. } => {
                self.edges
                    .remove(label)
                    .ok_or_else(|| mismatch(change, "label does not exist"))?;
            }
            SchemaChange::ModifyEdge {
                label,
                endpoints_before,
                endpoints_after,
                indexes_before,
                indexes_after,
            } => {
                let edge = self
                    .edges
                    .get_mut(label)
                    .ok_or_else(|| mismatch(change, "label does not exist"))?;
                if &Endpoints::of(edge) != endpoints_before || &edge.indexes != indexes_before {
                    return Err(mismatch(change, "endpoints or index set differ"));
                }
                edge.from_vertex = endpoints_after.from_vertex.clone();
                edge.to_vertex = endpoints_after.to_vertex.clone();
                edge.indexes = indexes_after.clone();
            }
            SchemaChange::AddProperty {
                owner,
                property,
                definition,
            } => {
                let properties = self.owner_properties(owner, change)?;
                if properties.contains_key(property) {
                    return Err(mismatch(change, "property already exists"));
                }
                properties.insert(property.clone(), definition.clone());
            }
            SchemaChange::RemoveProperty { owner, property, .. } => {
                self.owner_properties(owner, change)?
                    .remove(property)
                    .ok_or_else(|| mismatch(change, "property does not exist"))?;
            }
            SchemaChange::ModifyProperty {
                owner,
                property,
                before,
                after,
            } => {
                let slot = self
                    .owner_properties(owner, change)?
                    .get_mut(property)
                    .ok_or_else(|| mismatch(change, "property does not exist"))?;
                if slot != before {
                    return Err(mismatch(change, "property definition differs"));
                }
                *slot = after.clone();
            }
        }
        Ok(())
    }

    pub fn apply_changes<'c, I>(&mut self, changes: I) -> Result<(), LabelGraphError>
    where
        I: IntoIterator<Item = &'c SchemaChange>,
    {
        for change in changes {
            self.apply_change(change)?;
        }
        Ok(())
    }

    fn owner_properties(
        &mut self,
        owner: &LabelRef,
        change: &SchemaChange,
    ) -> Result<&mut BTreeMap<String, PropertyDefinition>, LabelGraphError> {
        let kind = owner.kind;
        self.properties_mut(owner).ok_or_else(|| {
            mismatch(
                change,
                match kind {
                    LabelKind::Vertex => "owning vertex label does not exist",
                    LabelKind::Edge => "owning edge label does not exist",
                },
            )
        })
    }
}

fn mismatch(change: &SchemaChange, reason: &str) -> LabelGraphError {
    LabelGraphError::invalid_schema(format!("cannot {change}: {reason}"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{schema::SchemaVersion, types::PropertyType};

    fn person_v1() -> SchemaDefinition {
        SchemaDefinition::new(SchemaVersion::new(1, 0, 0)).with_vertex(
            "Person",
            VertexLabel::new().property("name", PropertyDefinition::new(PropertyType::String).required()),
        )
    }

    #[test]
    fn adding_an_optional_property_is_one_change() {
        let mut v2 = person_v1();
        v2.version = SchemaVersion::new(1, 1, 0);
        v2.vertices
            .get_mut("Person")
            .unwrap()
            .properties
            .insert("age".into(), PropertyDefinition::new(PropertyType::Integer));
        let changes = compare_schemas(&person_v1(), &v2);
        assert_eq!(changes.len(), 1);
        assert!(matches!(
            &changes[0],
            SchemaChange::AddProperty { owner, property, .. }
                if owner == &LabelRef::vertex("Person") && property == "age"
        ));
        assert_eq!(changes[0].to_string(), "add property Person.age");
    }

    #[test]
    fn changes_follow_bucket_order() {
        let old = SchemaDefinition::new(SchemaVersion::new(1, 0, 0))
            .with_vertex("A", VertexLabel::new())
            .with_vertex(
                "B",
                VertexLabel::new()
                    .property("x", PropertyDefinition::new(PropertyType::String))
                    .property("y", PropertyDefinition::new(PropertyType::Integer)),
            )
            .with_edge("E", EdgeLabel::new("B", "B"));
        let new = SchemaDefinition::new(SchemaVersion::new(2, 0, 0))
            .with_vertex(
                "B",
                VertexLabel::new()
                    .property("y", PropertyDefinition::new(PropertyType::Number))
                    .property("z", PropertyDefinition::new(PropertyType::Boolean))
                    .index("z"),
            )
            .with_vertex("C", VertexLabel::new())
            .with_edge("E", EdgeLabel::new("B", "C"));

        let described: Vec<String> = compare_schemas(&old, &new).iter().map(ToString::to_string).collect();
        assert_eq!(
            described,
            vec![
                "remove vertex A",
                "add vertex C",
                "remove property B.x",
                "add property B.z",
                "modify property B.y",
                "modify indexes of vertex B",
                "modify edge E (B -> B to B -> C)",
            ]
        );
    }

    #[test]
    fn identical_schemas_have_no_changes() {
        let mut other = person_v1();
        other.version = SchemaVersion::new(9, 9, 9);
        assert!(compare_schemas(&person_v1(), &other).is_empty());
    }

    #[test]
    fn default_only_difference_is_a_modification() {
        let mut new = person_v1();
        new.vertices.get_mut("Person").unwrap().properties.insert(
            "name".into(),
            PropertyDefinition::new(PropertyType::String).required().with_default(json!("anon")),
        );
        let changes = compare_schemas(&person_v1(), &new);
        assert!(matches!(changes.as_slice(), [SchemaChange::ModifyProperty { .. }]));
    }

    #[test]
    fn replaying_inverses_restores_the_original() {
        let old = person_v1().with_edge("KNOWS", EdgeLabel::new("Person", "Person"));
        let new = SchemaDefinition::new(SchemaVersion::new(2, 0, 0))
            .with_vertex(
                "Person",
                VertexLabel::new()
                    .property("name", PropertyDefinition::new(PropertyType::String))
                    .property("email", PropertyDefinition::new(PropertyType::String))
                    .index("email"),
            )
            .with_vertex("Company", VertexLabel::new())
            .with_edge("WORKS_AT", EdgeLabel::new("Person", "Company"));

        let changes = compare_schemas(&old, &new);

        let mut forward = old.clone();
        forward.apply_changes(&changes).unwrap();
        forward.version = new.version.clone();
        assert_eq!(forward, new);

        let mut backward = new.clone();
        for change in changes.iter().rev() {
            backward.apply_change(&change.inverse()).unwrap();
        }
        assert!(compare_schemas(&old, &backward).is_empty());
    }

    #[test]
    fn stale_changes_do_not_apply() {
        let change = SchemaChange::RemoveProperty {
            owner: LabelRef::vertex("Person"),
            property: "age".into(),
            definition: PropertyDefinition::new(PropertyType::Integer),
        };
        let err = person_v1().apply_change(&change).unwrap_err();
        assert!(err.to_string().contains("property does not exist"), "{err}");
    }
}
