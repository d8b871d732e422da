//! Registry page: table UI state in, catalog queries out.

use std::collections::BTreeMap;

use ckan_api::{DataStore, Outcome};
use ckan_core::columns::{detail_columns, project_row, summary_columns, ColumnSpec};
use ckan_core::SortOptions;
use ckan_query::{Filter, SelectQuery};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{ConfigError, FilterConfig, FilterKind, RegistryConfig, DROPDOWN_VALUE_LIMIT};
use crate::render::DropdownFilter;

/// Current state of the public table: filter values by filter id, sort and zero-based page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableState {
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    #[serde(default)]
    pub sort: Option<SortOptions>,
    #[serde(default)]
    pub page: u64,
}

impl TableState {
    pub fn with_filter(mut self, id: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(id.into(), value.into());
        self
    }

    pub fn sorted(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.sort = Some(SortOptions::new(field, ascending));
        self
    }

    pub fn on_page(mut self, page: u64) -> Self { self.page = page; self }
}

/// One rendered page of the summary table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageView {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Vec<String>>,
    pub records: Vec<Value>,
    pub total: u64,
    pub page: u64,
    pub page_count: u64,
}

/// Label/value pairs for one record's detail view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailView {
    pub id: u64,
    pub entries: Vec<(String, String)>,
}

pub struct RegistryPage {
    config: RegistryConfig,
    summary: Vec<ColumnSpec>,
    detail: Vec<ColumnSpec>,
}

impl RegistryPage {
    pub fn new(config: RegistryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let summary = summary_columns(&config.fields);
        let detail = detail_columns(&config.fields);
        Ok(Self { config, summary, detail })
    }

    pub fn config(&self) -> &RegistryConfig { &self.config }

    pub fn summary_columns(&self) -> &[ColumnSpec] { &self.summary }

    pub fn detail_columns(&self) -> &[ColumnSpec] { &self.detail }

    fn filter_clause(&self, f: &FilterConfig, value: &str) -> Filter {
        match &f.kind {
            FilterKind::Text { columns, all_columns } => {
                let cols: Vec<String> = if *all_columns {
                    self.config.fields.iter().map(|c| c.name.clone()).collect()
                } else {
                    columns.clone()
                };
                Filter::any_contains(cols, value)
            }
            FilterKind::Dropdown { column, .. } => Filter::equals(column.clone(), value),
        }
    }

    /// Build the select for a table state. Unknown filter ids are ignored and a sort on a
    /// column outside the summary view is dropped.
    pub fn query(&self, state: &TableState) -> SelectQuery {
        let size = self.config.page_size();
        let mut q = SelectQuery::new(self.config.resource_id.clone())
            .columns(self.summary.iter().map(|c| c.name.clone()))
            .limit(size)
            .offset(state.page.saturating_mul(size));
        for f in self.config.ordered_filters() {
            if let Some(value) = state.filters.get(&f.id) {
                q = q.filter(self.filter_clause(f, value));
            }
        }
        if let Some(sort) = state.sort.as_ref() {
            match (sort.sort_field.as_deref(), sort.sort_ascending) {
                (Some(field), Some(asc)) if self.summary.iter().any(|c| c.name == field) => {
                    q = q.order_by(field, asc);
                }
                _ => debug!(sort = ?sort, "sort ignored"),
            }
        }
        q
    }

    /// Fetch rows and total for `state`. The row and count queries run concurrently.
    pub async fn fetch(&self, ds: &DataStore, state: &TableState) -> Outcome<PageView> {
        let q = self.query(state);
        let (rows, total) = futures::try_join!(ds.search_sql(&q), ds.count_sql(&q))?;
        let (Some(rows), Some(total)) = (rows, total) else { return Ok(None) };
        let size = self.config.page_size();
        let view = PageView {
            rows: rows.records.iter().map(|r| project_row(r, &self.summary)).collect(),
            records: rows.records,
            columns: self.summary.clone(),
            total,
            page: state.page,
            page_count: total.div_ceil(size),
        };
        info!(resource = %self.config.resource_id, page = view.page, rows = view.rows.len(), total, "page fetched");
        Ok(Some(view))
    }

    /// Detail-view columns for the record with Data Store row id `id`.
    /// A missing record resolves to `None` like any other semantic failure.
    pub async fn detail(&self, ds: &DataStore, id: u64) -> Outcome<DetailView> {
        let q = SelectQuery::new(self.config.resource_id.clone())
            .columns(self.detail.iter().map(|c| c.name.clone()))
            .filter(Filter::equals("_id", id.to_string()))
            .limit(1);
        let Some(result) = ds.search_sql(&q).await? else { return Ok(None) };
        let Some(record) = result.records.first() else { return Ok(None) };
        let values = project_row(record, &self.detail);
        let entries = self.detail.iter().map(|c| c.label.clone()).zip(values).collect();
        Ok(Some(DetailView { id, entries }))
    }

    /// Dropdown props for filter `id`. Configured options win; otherwise up to
    /// `DROPDOWN_VALUE_LIMIT` distinct values are looked up. Non-dropdown or unknown ids resolve to `None`.
    pub async fn dropdown(&self, ds: &DataStore, id: &str, state: &TableState) -> Outcome<DropdownFilter> {
        let Some(f) = self.config.filter(id) else { return Ok(None) };
        let FilterKind::Dropdown { column, options } = &f.kind else { return Ok(None) };
        let selections = if options.is_empty() {
            match ds.distinct_values(column, Some(DROPDOWN_VALUE_LIMIT)).await? {
                Some(v) => v,
                None => return Ok(None),
            }
        } else {
            options.clone()
        };
        Ok(Some(DropdownFilter {
            id: f.id.clone(),
            label: f.label.clone(),
            selections,
            extra_class: f.extra_class.clone(),
            selected: state.filters.get(&f.id).cloned().filter(|v| !v.is_empty()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ckan_core::{FieldSpec, SqlQuery};

    fn page() -> RegistryPage {
        let mut cfg = RegistryConfig::new("http://ckan.example.com", "res");
        cfg.items_per_page = 10;
        let mut hidden = FieldSpec::new("Notes");
        hidden.show_in_summary_view = false;
        hidden.order = 3;
        let mut region = FieldSpec::new("Region");
        region.order = 2;
        let mut name = FieldSpec::new("Name");
        name.order = 1;
        cfg.fields = vec![hidden, region, name];
        cfg.filters = vec![
            FilterConfig { id: "q".into(), label: None, order: 1, extra_class: None, kind: FilterKind::Text { columns: vec![], all_columns: true } },
            FilterConfig { id: "region".into(), label: None, order: 2, extra_class: None, kind: FilterKind::Dropdown { column: "Region".into(), options: vec![] } },
        ];
        RegistryPage::new(cfg).unwrap()
    }

    #[test]
    fn default_state_selects_summary_columns_first_page() {
        let sql = page().query(&TableState::default()).parse();
        assert_eq!(sql, r#"SELECT "Name", "Region" FROM "res" LIMIT 10 OFFSET 0"#);
    }

    #[test]
    fn filters_sort_and_paging_translate() {
        let state = TableState::default().with_filter("region", "Otago").with_filter("q", "lake").sorted("Region", false).on_page(2);
        let q = page().query(&state);
        assert_eq!(
            q.parse(),
            r#"SELECT "Name", "Region" FROM "res" WHERE ("Notes"::text ILIKE '%lake%' OR "Region"::text ILIKE '%lake%' OR "Name"::text ILIKE '%lake%') AND "Region" = 'Otago' ORDER BY "Region" DESC LIMIT 10 OFFSET 20"#
        );
    }

    #[test]
    fn sort_on_hidden_or_partial_field_is_dropped() {
        let p = page();
        assert!(p.query(&TableState::default().sorted("Notes", true)).order.is_none());
        let partial = TableState { sort: Some(SortOptions { sort_field: Some("Name".into()), sort_ascending: None }), ..Default::default() };
        assert!(p.query(&partial).order.is_none());
    }

    #[test]
    fn all_columns_search_without_fields_is_rejected() {
        let mut cfg = RegistryConfig::new("http://ckan.example.com", "res");
        cfg.filters = vec![FilterConfig { id: "q".into(), label: None, order: 1, extra_class: None, kind: FilterKind::Text { columns: vec![], all_columns: true } }];
        assert!(matches!(RegistryPage::new(cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn blank_and_unknown_filters_are_ignored() {
        let state = TableState::default().with_filter("region", "").with_filter("nope", "x");
        assert_eq!(page().query(&state).parse(), r#"SELECT "Name", "Region" FROM "res" LIMIT 10 OFFSET 0"#);
    }
}
