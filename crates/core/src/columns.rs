//! Field display specs for registry tables.
//!
//! This module provides:
//! - `FieldSpec`: per-field configuration supplied by the hosting CMS
//! - summary/detail column selection in display order
//! - cell rendering for raw Data Store record values

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-field configuration. `order` breaks ties by declaration order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FieldSpec {
    #[serde(alias = "name")]
    pub name: String,
    #[serde(default, alias = "label")]
    pub label: Option<String>,
    #[serde(default = "default_true", alias = "show_in_summary_view")]
    pub show_in_summary_view: bool,
    #[serde(default = "default_true", alias = "show_in_detail_view")]
    pub show_in_detail_view: bool,
    #[serde(default, alias = "order")]
    pub order: i32,
}

fn default_true() -> bool { true }

impl FieldSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), label: None, show_in_summary_view: true, show_in_detail_view: true, order: 0 }
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().filter(|l| !l.is_empty()).unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    pub label: String,
}

fn col(f: &FieldSpec) -> ColumnSpec {
    ColumnSpec { name: f.name.clone(), label: f.label().to_string() }
}

fn ordered<'a>(fields: &'a [FieldSpec], keep: impl Fn(&FieldSpec) -> bool) -> Vec<&'a FieldSpec> {
    let mut out: Vec<&FieldSpec> = fields.iter().filter(|f| keep(f)).collect();
    // stable: equal orders keep declaration order
    out.sort_by_key(|f| f.order);
    out
}

/// Columns shown in the paginated table.
pub fn summary_columns(fields: &[FieldSpec]) -> Vec<ColumnSpec> {
    ordered(fields, |f| f.show_in_summary_view).into_iter().map(col).collect()
}

/// Columns shown when a single record is expanded.
pub fn detail_columns(fields: &[FieldSpec]) -> Vec<ColumnSpec> {
    ordered(fields, |f| f.show_in_detail_view).into_iter().map(col).collect()
}

/// Render a raw record value for display.
pub fn render_cell(raw: &Value) -> String {
    match raw {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(render_cell).collect::<Vec<_>>().join(", "),
        Value::Object(_) => raw.to_string(),
    }
}

/// Project a record onto columns; missing fields render empty.
pub fn project_row(record: &Value, columns: &[ColumnSpec]) -> Vec<String> {
    columns
        .iter()
        .map(|c| record.get(&c.name).map(render_cell).unwrap_or_default())
        .collect()
}
