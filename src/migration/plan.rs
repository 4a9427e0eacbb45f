use std::collections::BTreeSet;

use serde::Serialize;

use crate::{
    diff::{SchemaChange, compare_schemas},
    errors::LabelGraphError,
    schema::{LabelKind, LabelRef, PropertyDefinition, SchemaDefinition, SchemaVersion},
    sql::ddl,
    types::{SqlValue, encode_literal, map_type},
};

/// One statement of a migration step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlannedStatement {
    Execute(String),
    /// `query` returns a single count; the step fails with `message` unless it is zero.
    AssertZero { query: String, message: String },
}

impl PlannedStatement {
    pub fn sql(&self) -> &str {
        match self {
            PlannedStatement::Execute(sql) => sql,
            PlannedStatement::AssertZero { query, .. } => query,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MigrationStep {
    pub index: usize,
    pub change: SchemaChange,
    pub destructive: bool,
    pub statements: Vec<PlannedStatement>,
    /// Existing tables whose rows this step can discard.
    pub affected_tables: Vec<String>,
}

impl MigrationStep {
    pub fn describe(&self) -> String {
        format!("step {}: {}", self.index, self.change)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MigrationPlan {
    pub from_version: SchemaVersion,
    pub to_version: SchemaVersion,
    /// Every change of the diff, including the ones that needed no step.
    pub changes: Vec<SchemaChange>,
    pub steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn has_destructive(&self) -> bool {
        self.steps.iter().any(|step| step.destructive)
    }

    pub fn destructive_steps(&self) -> impl Iterator<Item = &MigrationStep> {
        self.steps.iter().filter(|step| step.destructive)
    }

    /// Tables a backup must copy before the plan runs.
    pub fn backup_tables(&self) -> BTreeSet<String> {
        self.destructive_steps()
            .flat_map(|step| step.affected_tables.iter().cloned())
            .collect()
    }

    /// The schema that results from applying every change to `old`.
    pub fn resulting_schema(&self, old: &SchemaDefinition) -> Result<SchemaDefinition, LabelGraphError> {
        let mut schema = old.clone();
        schema.apply_changes(&self.changes)?;
        schema.version = self.to_version.clone();
        Ok(schema)
    }
}

/// Derives the executable plan turning `old` into `new`. Pure: nothing is executed.
pub fn plan_migration(old: &SchemaDefinition, new: &SchemaDefinition) -> Result<MigrationPlan, LabelGraphError> {
    old.validate()?;
    new.validate()?;
    let changes = compare_schemas(old, new);
    let mut steps = Vec::new();
    for change in &changes {
        let draft = plan_change(change, old, new)?;
        if draft.statements.is_empty() {
            log::debug!("{change}: catalog-only change");
            continue;
        }
        steps.push(MigrationStep {
            index: steps.len(),
            change: change.clone(),
            destructive: draft.destructive,
            statements: draft.statements,
            affected_tables: if draft.destructive {
                draft.affected.into_iter().collect()
            } else {
                Vec::new()
            },
        });
    }
    Ok(MigrationPlan {
        from_version: old.version.clone(),
        to_version: new.version.clone(),
        changes,
        steps,
    })
}

#[derive(Default)]
struct StepDraft {
    statements: Vec<PlannedStatement>,
    destructive: bool,
    affected: BTreeSet<String>,
}

impl StepDraft {
    fn execute(&mut self, sql: String) {
        self.statements.push(PlannedStatement::Execute(sql));
    }

    fn discards(&mut self, label: &LabelRef) {
        self.destructive = true;
        self.affected.insert(ddl::table_name(label));
    }
}

fn plan_change(
    change: &SchemaChange,
    old: &SchemaDefinition,
    new: &SchemaDefinition,
) -> Result<StepDraft, LabelGraphError> {
    let mut draft = StepDraft::default();
    let owner = change.owner();
    match change {
        SchemaChange::AddVertex { definition, .. } => {
            draft.execute(ddl::create_label_table(&owner, &definition.properties)?);
            for property in &definition.indexes {
                draft.execute(ddl::create_index(&owner, property)?);
            }
        }
        SchemaChange::AddEdge { definition, .. } => {
            draft.execute(ddl::create_label_table(&owner, &definition.properties)?);
            for property in &definition.indexes {
                draft.execute(ddl::create_index(&owner, property)?);
            }
        }
        SchemaChange::RemoveVertex { .. } | SchemaChange::RemoveEdge { .. } => {
            draft.execute(ddl::drop_table(&owner)?);
            draft.discards(&owner);
        }
        SchemaChange::ModifyVertex {
            indexes_before,
            indexes_after,
            ..
        } => plan_indexes(&mut draft, &owner, indexes_before, indexes_after)?,
        SchemaChange::ModifyEdge {
            endpoints_before,
            endpoints_after,
            indexes_before,
            indexes_after,
            ..
        } => {
            if endpoints_before != endpoints_after {
                draft.execute(ddl::delete_all(&owner)?);
                draft.discards(&owner);
            }
            plan_indexes(&mut draft, &owner, indexes_before, indexes_after)?;
        }
        SchemaChange::AddProperty {
            property, definition, ..
        } => {
            let default = encoded_default(definition)?;
            if definition.required && default.is_none() {
                draft.statements.push(PlannedStatement::AssertZero {
                    query: ddl::count_rows(&owner)?,
                    message: format!(
                        "{owner} already holds rows; required property {property} needs a default"
                    ),
                });
            }
            draft.execute(ddl::add_column(&owner, property, definition, default.as_ref())?);
        }
        SchemaChange::RemoveProperty { property, .. } => {
            if is_indexed(old, &owner, property) {
                draft.execute(ddl::drop_index(&owner, property)?);
            }
            draft.execute(ddl::drop_column(&owner, property)?);
            draft.discards(&owner);
        }
        SchemaChange::ModifyProperty {
            property,
            before,
            after,
            ..
        } => plan_property_change(&mut draft, &owner, property, before, after, old, new)?,
    }
    Ok(draft)
}

fn plan_indexes(
    draft: &mut StepDraft,
    owner: &LabelRef,
    before: &BTreeSet<String>,
    after: &BTreeSet<String>,
) -> Result<(), LabelGraphError> {
    for property in before.difference(after) {
        draft.execute(ddl::drop_index(owner, property)?);
    }
    for property in after.difference(before) {
        draft.execute(ddl::create_index(owner, property)?);
    }
    Ok(())
}

fn plan_property_change(
    draft: &mut StepDraft,
    owner: &LabelRef,
    property: &str,
    before: &PropertyDefinition,
    after: &PropertyDefinition,
    old: &SchemaDefinition,
    new: &SchemaDefinition,
) -> Result<(), LabelGraphError> {
    let from = before.property_type;
    let to = after.property_type;
    let narrowing = !from.widens_to(to);
    let mut rewritten = false;

    if from != to && (map_type(from) != map_type(to) || ddl::conversion_expr(property, from, to) != property) {
        let indexed_before = is_indexed(old, owner, property);
        if indexed_before {
            draft.execute(ddl::drop_index(owner, property)?);
        }
        let shadow = shadow_column(owner, property, old, new);
        draft.execute(ddl::add_column(owner, &shadow, after, None)?);
        draft.execute(ddl::copy_converted(owner, property, &shadow, from, to)?);
        draft.execute(ddl::drop_column(owner, property)?);
        draft.execute(ddl::rename_column(owner, &shadow, property)?);
        // ModifyVertex/ModifyEdge only handle indexes whose membership changed.
        if indexed_before && is_indexed(new, owner, property) {
            draft.execute(ddl::create_index(owner, property)?);
        }
        if narrowing {
            draft.discards(owner);
        }
        rewritten = true;
    }

    let enforce_required = after.required && (!before.required || (rewritten && narrowing));
    if enforce_required {
        match encoded_default(after)? {
            Some(default) => draft.execute(ddl::backfill_nulls(owner, property, &default)?),
            None => {
                if owner.kind == LabelKind::Vertex {
                    for (edge_label, edge) in old.edges_touching(&owner.label) {
                        let edge_ref = LabelRef::edge(edge_label.as_str());
                        for (column, endpoint) in [
                            (ddl::FROM_COLUMN, &edge.from_vertex),
                            (ddl::TO_COLUMN, &edge.to_vertex),
                        ] {
                            if endpoint == &owner.label {
                                draft.execute(ddl::delete_edges_of_null_vertices(
                                    &edge_ref, column, owner, property,
                                )?);
                                draft.discards(&edge_ref);
                            }
                        }
                    }
                }
                draft.execute(ddl::delete_rows_where_null(owner, property)?);
                draft.discards(owner);
            }
        }
    }
    Ok(())
}

fn encoded_default(definition: &PropertyDefinition) -> Result<Option<SqlValue>, LabelGraphError> {
    definition
        .effective_default()
        .map(|value| encode_literal(value, definition.property_type))
        .transpose()
}

fn is_indexed(schema: &SchemaDefinition, owner: &LabelRef, property: &str) -> bool {
    schema
        .indexes(owner)
        .is_some_and(|indexes| indexes.contains(property))
}

/// Temporary column name that collides with no property of `owner` on either side.
fn shadow_column(owner: &LabelRef, property: &str, old: &SchemaDefinition, new: &SchemaDefinition) -> String {
    let taken: BTreeSet<String> = [old.properties(owner), new.properties(owner)]
        .into_iter()
        .flatten()
        .flat_map(|properties| properties.keys().map(|name| name.to_lowercase()))
        .collect();
    let mut candidate = format!("_shadow_{property}");
    let mut suffix = 1;
    while taken.contains(&candidate.to_lowercase()) {
        candidate = format!("_shadow_{property}_{suffix}");
        suffix += 1;
    }
    candidate
}
