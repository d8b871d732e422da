//! CKAN registry core types: catalog actions, request params and normalized results.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod columns;

pub use columns::{ColumnSpec, FieldSpec};

/// Parameter set sent with a catalog action. Key order is insertion order of the builder.
pub type Params = Map<String, Value>;

/// Data Store actions the registry issues against the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogAction {
    DatastoreSearch,
    DatastoreSearchSql,
}

impl CatalogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogAction::DatastoreSearch => "datastore_search",
            CatalogAction::DatastoreSearchSql => "datastore_search_sql",
        }
    }
}

impl std::fmt::Display for CatalogAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Search term accepted by `datastore_search`: free text (`q`) or per-field filters.
#[derive(Debug, Clone, PartialEq)]
pub enum Term<'a> {
    Text(&'a str),
    Filters(&'a Map<String, Value>),
}

impl<'a> Term<'a> {
    /// Classify a raw term. `None` means the value has a type the catalog cannot take
    /// (numbers, arrays, booleans); an absent term is represented by `Value::Null`.
    pub fn classify(raw: &'a Value) -> Option<Option<Term<'a>>> {
        match raw {
            Value::Null => Some(None),
            Value::String(s) => Some(Some(Term::Text(s))),
            Value::Object(m) => Some(Some(Term::Filters(m))),
            _ => None,
        }
    }
}

/// Sort selection coming from the table UI. Both parts must be present for a sort to be sent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SortOptions {
    pub sort_field: Option<String>,
    pub sort_ascending: Option<bool>,
}

impl SortOptions {
    pub fn new(field: impl Into<String>, ascending: bool) -> Self {
        Self { sort_field: Some(field.into()), sort_ascending: Some(ascending) }
    }

    /// Render as `"<field> ASC|DESC"`; malformed selections yield nothing.
    pub fn render(&self) -> Option<String> {
        let field = self.sort_field.as_deref().map(str::trim).filter(|f| !f.is_empty())?;
        let dir = if self.sort_ascending? { "ASC" } else { "DESC" };
        Some(format!("{} {}", field, dir))
    }
}

/// Normalized result of a successful search. `total` is absent for SQL searches,
/// which the catalog answers without a row count.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub records: Vec<Value>,
    pub total: Option<u64>,
}

/// Source of raw SQL for `datastore_search_sql`.
pub trait SqlQuery: Send + Sync {
    /// Full select statement.
    fn parse(&self) -> String;
    /// `SELECT count(*) ...` variant of the same selection.
    fn parse_count(&self) -> String;
}

/// JavaScript-style truthiness for decoded response bodies.
pub fn is_falsy(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().map(|f| f == 0.0).unwrap_or(false),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}
