//! Integrity checks of stored data against the schema it was written under.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    errors::{LabelGraphError, ValidationIssue},
    executor::{GraphExecutor, GraphTransaction, with_transaction},
    schema::{LabelRef, SchemaDefinition},
    sql::ddl,
    types::SqlValue,
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SafetyReport {
    pub total_vertices: i64,
    pub total_edges: i64,
    /// Edges whose `_from` or `_to` has no vertex, per edge label.
    pub orphan_edges: BTreeMap<String, i64>,
    /// NULLs in required properties, keyed `Label.property`.
    pub null_required: BTreeMap<String, i64>,
    /// Tables the schema declares but the backend lacks.
    pub missing_tables: Vec<String>,
}

impl SafetyReport {
    pub fn has_issues(&self) -> bool {
        !self.missing_tables.is_empty()
            || self.orphan_edges.values().any(|n| *n > 0)
            || self.null_required.values().any(|n| *n > 0)
    }

    /// One issue per finding, in report order.
    pub fn issues(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for table in &self.missing_tables {
            issues.push(ValidationIssue {
                path: table.clone(),
                message: "table is missing".to_string(),
            });
        }
        for (label, count) in self.orphan_edges.iter().filter(|(_, n)| **n > 0) {
            issues.push(ValidationIssue {
                path: label.clone(),
                message: format!("{count} edge(s) reference missing vertices"),
            });
        }
        for (path, count) in self.null_required.iter().filter(|(_, n)| **n > 0) {
            issues.push(ValidationIssue {
                path: path.clone(),
                message: format!("{count} NULL value(s) in required property"),
            });
        }
        issues
    }
}

pub fn check_integrity<E: GraphExecutor + ?Sized>(
    executor: &mut E,
    schema: &SchemaDefinition,
) -> Result<SafetyReport, LabelGraphError> {
    with_transaction(executor, |tx| {
        let mut report = SafetyReport::default();
        for (name, vertex) in &schema.vertices {
            let label = LabelRef::vertex(name.as_str());
            if !table_exists(tx, &label)? {
                report.missing_tables.push(ddl::table_name(&label));
                continue;
            }
            report.total_vertices += query_single(tx, &ddl::count_rows(&label)?)?;
            for (property, _) in vertex.properties.iter().filter(|(_, d)| d.required) {
                let nulls = query_single(tx, &ddl::count_nulls(&label, property)?)?;
                report.null_required.insert(format!("{name}.{property}"), nulls);
            }
        }
        for (name, edge) in &schema.edges {
            let label = LabelRef::edge(name.as_str());
            if !table_exists(tx, &label)? {
                report.missing_tables.push(ddl::table_name(&label));
                continue;
            }
            report.total_edges += query_single(tx, &ddl::count_rows(&label)?)?;
            for (property, _) in edge.properties.iter().filter(|(_, d)| d.required) {
                let nulls = query_single(tx, &ddl::count_nulls(&label, property)?)?;
                report.null_required.insert(format!("{name}.{property}"), nulls);
            }
            let from = LabelRef::vertex(edge.from_vertex.as_str());
            let to = LabelRef::vertex(edge.to_vertex.as_str());
            if table_exists(tx, &from)? && table_exists(tx, &to)? {
                let orphans = query_single(tx, &ddl::count_orphan_edges(&label, &from, &to)?)?;
                report.orphan_edges.insert(name.clone(), orphans);
            }
        }
        log::debug!(
            "integrity check: {} vertices, {} edges, issues: {}",
            report.total_vertices,
            report.total_edges,
            report.has_issues()
        );
        Ok(report)
    })
}

/// Like [`check_integrity`], failing with a validation error listing every finding.
pub fn ensure_integrity<E: GraphExecutor + ?Sized>(
    executor: &mut E,
    schema: &SchemaDefinition,
) -> Result<SafetyReport, LabelGraphError> {
    let report = check_integrity(executor, schema)?;
    if report.has_issues() {
        return Err(LabelGraphError::Validation {
            issues: report.issues(),
        });
    }
    Ok(report)
}

fn table_exists(tx: &mut dyn GraphTransaction, label: &LabelRef) -> Result<bool, LabelGraphError> {
    let rows = tx.execute(ddl::TABLE_EXISTS, &[SqlValue::Text(ddl::table_name(label))])?;
    Ok(!rows.is_empty())
}

fn query_single(tx: &mut dyn GraphTransaction, sql: &str) -> Result<i64, LabelGraphError> {
    Ok(tx.execute(sql, &[])?.scalar_i64().unwrap_or(0))
}
