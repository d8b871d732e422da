//! CKAN query: SQL statements for `datastore_search_sql`.
//! Identifiers are double-quoted and literals single-quoted; nothing is interpolated raw.

#![forbid(unsafe_code)]

use ckan_core::SqlQuery;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// One WHERE clause. Blank values are treated as "no filter" and render nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Filter {
    /// `"col" = 'value'`
    Equals { column: String, value: String },
    /// `"col"::text ILIKE '%value%'`
    Contains { column: String, value: String },
    /// OR of `Contains` across several columns.
    AnyContains { columns: Vec<String>, value: String },
}

impl Filter {
    pub fn equals(column: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals { column: column.into(), value: value.into() }
    }

    pub fn contains(column: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Contains { column: column.into(), value: value.into() }
    }

    pub fn any_contains<I, S>(columns: I, value: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::AnyContains { columns: columns.into_iter().map(Into::into).collect(), value: value.into() }
    }

    fn render(&self) -> Option<String> {
        match self {
            Filter::Equals { column, value } => {
                if value.is_empty() { return None; }
                Some(format!("{} = {}", quote_ident(column), quote_literal(value)))
            }
            Filter::Contains { column, value } => {
                if value.trim().is_empty() { return None; }
                Some(contains(column, value))
            }
            Filter::AnyContains { columns, value } => {
                if value.trim().is_empty() || columns.is_empty() { return None; }
                let parts: Vec<String> = columns.iter().map(|c| contains(c, value)).collect();
                if parts.len() == 1 { Some(parts.concat()) } else { Some(format!("({})", parts.join(" OR "))) }
            }
        }
    }
}

fn contains(column: &str, value: &str) -> String {
    let pattern = format!("%{}%", escape_like(value.trim()));
    format!("{}::text ILIKE {}", quote_ident(column), quote_literal(&pattern))
}

/// `"ident"` with embedded quotes doubled.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `'literal'` with embedded quotes doubled.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Escape LIKE metacharacters with the default backslash escape.
pub fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '%' | '_') { out.push('\\'); }
        out.push(ch);
    }
    out
}

/// Select over one Data Store resource table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectQuery {
    pub resource_id: String,
    pub columns: Vec<String>,
    pub distinct: bool,
    pub filters: Vec<Filter>,
    /// (column, ascending)
    pub order: Option<(String, bool)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectQuery {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self { resource_id: resource_id.into(), ..Default::default() }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn distinct(mut self, on: bool) -> Self { self.distinct = on; self }

    pub fn filter(mut self, f: Filter) -> Self { self.filters.push(f); self }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some((column.into(), ascending));
        self
    }

    pub fn limit(mut self, n: u64) -> Self { self.limit = Some(n); self }

    pub fn offset(mut self, n: u64) -> Self { self.offset = Some(n); self }

    fn select_list(&self) -> String {
        if self.columns.is_empty() { return "*".to_string(); }
        self.columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
    }

    fn where_clause(&self) -> String {
        let clauses: Vec<String> = self.filters.iter().filter_map(Filter::render).collect();
        if clauses.is_empty() { String::new() } else { format!(" WHERE {}", clauses.join(" AND ")) }
    }

    fn base(&self) -> String {
        let distinct = if self.distinct { "DISTINCT " } else { "" };
        format!("SELECT {}{} FROM {}{}", distinct, self.select_list(), quote_ident(&self.resource_id), self.where_clause())
    }
}

impl SqlQuery for SelectQuery {
    fn parse(&self) -> String {
        let mut sql = self.base();
        if let Some((col, asc)) = &self.order {
            if !col.is_empty() {
                sql.push_str(&format!(" ORDER BY {} {}", quote_ident(col), if *asc { "ASC" } else { "DESC" }));
            }
        }
        if let Some(n) = self.limit { sql.push_str(&format!(" LIMIT {}", n)); }
        if let Some(n) = self.offset { sql.push_str(&format!(" OFFSET {}", n)); }
        trace!(sql = %sql, "select");
        sql
    }

    fn parse_count(&self) -> String {
        let sql = if self.distinct {
            format!("SELECT count(*) AS count FROM ({}) AS q", self.base())
        } else {
            format!("SELECT count(*) AS count FROM {}{}", quote_ident(&self.resource_id), self.where_clause())
        };
        trace!(sql = %sql, "count");
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RES: &str = "0ea81453-3d20-4eed-8be1-ec5522a28b6e";

    #[test]
    fn bare_select_uses_star() {
        let q = SelectQuery::new(RES);
        assert_eq!(q.parse(), format!("SELECT * FROM \"{}\"", RES));
        assert_eq!(q.parse_count(), format!("SELECT count(*) AS count FROM \"{}\"", RES));
    }

    #[test]
    fn full_select_renders_every_clause() {
        let q = SelectQuery::new("res")
            .columns(["Name", "Region"])
            .filter(Filter::equals("Region", "Otago"))
            .filter(Filter::contains("Name", "lake"))
            .order_by("Name", false)
            .limit(20)
            .offset(40);
        assert_eq!(
            q.parse(),
            r#"SELECT "Name", "Region" FROM "res" WHERE "Region" = 'Otago' AND "Name"::text ILIKE '%lake%' ORDER BY "Name" DESC LIMIT 20 OFFSET 40"#
        );
        assert_eq!(
            q.parse_count(),
            r#"SELECT count(*) AS count FROM "res" WHERE "Region" = 'Otago' AND "Name"::text ILIKE '%lake%'"#
        );
    }

    #[test]
    fn quoting_neutralizes_injection() {
        let q = SelectQuery::new("res")
            .columns([r#"a"; DROP TABLE x; --"#])
            .filter(Filter::equals("b", "x'; DELETE FROM y; --"));
        assert_eq!(
            q.parse(),
            r#"SELECT "a""; DROP TABLE x; --" FROM "res" WHERE "b" = 'x''; DELETE FROM y; --'"#
        );
    }

    #[test]
    fn like_metacharacters_are_escaped() {
        let q = SelectQuery::new("res").filter(Filter::contains("c", "50%_off\\"));
        assert_eq!(q.parse(), r#"SELECT * FROM "res" WHERE "c"::text ILIKE '%50\%\_off\\%'"#);
    }

    #[test]
    fn blank_filters_render_nothing() {
        let q = SelectQuery::new("res")
            .filter(Filter::equals("a", ""))
            .filter(Filter::contains("b", "   "))
            .filter(Filter::any_contains(Vec::<String>::new(), "x"));
        assert_eq!(q.parse(), r#"SELECT * FROM "res""#);
    }

    #[test]
    fn any_contains_groups_with_or() {
        let q = SelectQuery::new("res").filter(Filter::any_contains(["a", "b"], "x")).filter(Filter::equals("c", "1"));
        assert_eq!(
            q.parse(),
            r#"SELECT * FROM "res" WHERE ("a"::text ILIKE '%x%' OR "b"::text ILIKE '%x%') AND "c" = '1'"#
        );
        let single = SelectQuery::new("res").filter(Filter::any_contains(["a"], "x"));
        assert_eq!(single.parse(), r#"SELECT * FROM "res" WHERE "a"::text ILIKE '%x%'"#);
    }

    #[test]
    fn distinct_count_wraps_subquery_and_ignores_paging() {
        let q = SelectQuery::new("res").columns(["Region"]).distinct(true).order_by("Region", true).limit(5);
        assert_eq!(q.parse(), r#"SELECT DISTINCT "Region" FROM "res" ORDER BY "Region" ASC LIMIT 5"#);
        assert_eq!(q.parse_count(), r#"SELECT count(*) AS count FROM (SELECT DISTINCT "Region" FROM "res") AS q"#);
    }

    #[test]
    fn filters_deserialize_from_tagged_json() {
        let f: Filter = serde_json::from_str(r#"{"kind":"equals","column":"a","value":"b"}"#).unwrap();
        assert_eq!(f, Filter::equals("a", "b"));
    }
}
