//! Registry page configuration as supplied by the hosting CMS.

use std::collections::HashSet;
use std::path::Path;

use ckan_core::FieldSpec;
use serde::{Deserialize, Serialize};

pub const DEFAULT_ITEMS_PER_PAGE: i64 = 20;

/// Cap on values fetched for a dropdown without configured options. The catalog's own
/// default row limit is much lower.
pub const DROPDOWN_VALUE_LIMIT: u64 = 1000;

fn default_items_per_page() -> i64 { DEFAULT_ITEMS_PER_PAGE }

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid: {0}")]
    Invalid(String),
}

/// A page bound to one catalog resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub endpoint: String,
    pub resource_id: String,
    #[serde(default)]
    pub resource_name: Option<String>,
    /// Signed as the CMS stores it; see `page_size`.
    #[serde(default = "default_items_per_page")]
    pub items_per_page: i64,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub extra_class: Option<String>,
    #[serde(flatten)]
    pub kind: FilterKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterKind {
    /// Free text matched against `columns`, or every configured field when `all_columns`.
    Text {
        #[serde(default)]
        columns: Vec<String>,
        #[serde(default)]
        all_columns: bool,
    },
    /// Exact match on one column. Empty `options` are looked up from the catalog.
    Dropdown {
        column: String,
        #[serde(default)]
        options: Vec<String>,
    },
}

impl RegistryConfig {
    pub fn new(endpoint: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            resource_id: resource_id.into(),
            resource_name: None,
            items_per_page: DEFAULT_ITEMS_PER_PAGE,
            fields: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        Self::from_json(&s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() { return Err(ConfigError::Invalid("endpoint is empty".into())); }
        if self.resource_id.trim().is_empty() { return Err(ConfigError::Invalid("resource_id is empty".into())); }
        let mut seen = HashSet::new();
        for f in self.filters.iter() {
            if !seen.insert(f.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate filter id: {}", f.id)));
            }
            match &f.kind {
                FilterKind::Dropdown { column, .. } if column.is_empty() => {
                    return Err(ConfigError::Invalid(format!("dropdown filter {} has no column", f.id)));
                }
                FilterKind::Text { columns, all_columns } if columns.is_empty() && !all_columns => {
                    return Err(ConfigError::Invalid(format!("text filter {} has no columns", f.id)));
                }
                FilterKind::Text { all_columns: true, .. } if self.fields.is_empty() => {
                    return Err(ConfigError::Invalid(format!("text filter {} searches all columns but no fields are configured", f.id)));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Page size; zero and negative values are treated as one.
    pub fn page_size(&self) -> u64 { u64::try_from(self.items_per_page).unwrap_or(0).max(1) }

    /// Filters in display order.
    pub fn ordered_filters(&self) -> Vec<&FilterConfig> {
        let mut out: Vec<&FilterConfig> = self.filters.iter().collect();
        out.sort_by_key(|f| f.order);
        out
    }

    pub fn filter(&self, id: &str) -> Option<&FilterConfig> {
        self.filters.iter().find(|f| f.id == id)
    }
}
