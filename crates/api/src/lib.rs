//! CKAN Data Store client façade.
//!
//! `DataStore` turns table UI state into `datastore_search` / `datastore_search_sql` calls and
//! normalizes the catalog's JSON envelope. Two failure tiers are kept apart:
//! - semantic failures (bad input, `success: false`, empty body) resolve to `Ok(None)`
//! - transport failures propagate as `Err(TransportError)`

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use ckan_core::columns::render_cell;
use ckan_core::{is_falsy, CatalogAction, Params, SearchResult, SortOptions, SqlQuery, Term};
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub mod transport;

pub use transport::{
    HttpTransport, HttpTransportConfig, MockTransport, RecordedCall, RequestMethod, ResponseHandle, Transport,
    TransportError,
};

/// `Ok(None)` is the semantic failure sentinel; `Err` is a transport failure.
pub type Outcome<T> = Result<Option<T>, TransportError>;

/// Why a call resolved to the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NoFields,
    InvalidTerm,
    EmptyBody,
    Unsuccessful,
    MalformedResult,
    MissingCount,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::NoFields => "no_fields",
            Rejection::InvalidTerm => "invalid_term",
            Rejection::EmptyBody => "empty_body",
            Rejection::Unsuccessful => "unsuccessful",
            Rejection::MalformedResult => "malformed_result",
            Rejection::MissingCount => "missing_count",
        }
    }
}

/// Arguments for one `datastore_search` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRequest {
    pub fields: Vec<String>,
    /// String, object or null. Other JSON types are rejected at call time.
    pub term: Value,
    pub distinct: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub sort: Option<SortOptions>,
}

impl SearchRequest {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { fields: fields.into_iter().map(Into::into).collect(), ..Default::default() }
    }

    pub fn term(mut self, term: impl Into<Value>) -> Self { self.term = term.into(); self }

    pub fn text(self, q: impl Into<String>) -> Self { self.term(Value::String(q.into())) }

    pub fn filters(self, filters: Map<String, Value>) -> Self { self.term(Value::Object(filters)) }

    pub fn distinct(mut self, on: bool) -> Self { self.distinct = on; self }

    pub fn limit(mut self, limit: u64) -> Self { self.limit = Some(limit); self }

    pub fn offset(mut self, offset: u64) -> Self { self.offset = Some(offset); self }

    pub fn sort(mut self, sort: SortOptions) -> Self { self.sort = Some(sort); self }
}

/// Serialize a search request into `datastore_search` params.
pub fn search_params(resource_id: &str, req: &SearchRequest) -> Result<Params, Rejection> {
    if req.fields.is_empty() { return Err(Rejection::NoFields); }
    let term = Term::classify(&req.term).ok_or(Rejection::InvalidTerm)?;

    let mut p = Params::new();
    p.insert("id".into(), Value::String(resource_id.to_string()));
    p.insert("fields".into(), Value::String(req.fields.join(",")));
    match term {
        Some(Term::Text(q)) if !q.is_empty() => { p.insert("q".into(), Value::String(q.to_string())); }
        Some(Term::Filters(m)) if !m.is_empty() => {
            p.insert("filters".into(), Value::String(Value::Object(m.clone()).to_string()));
        }
        _ => {}
    }
    if req.distinct { p.insert("distinct".into(), Value::Bool(true)); }
    if let Some(sort) = req.sort.as_ref().and_then(SortOptions::render) {
        p.insert("sort".into(), Value::String(sort));
    }
    if let Some(limit) = req.limit { p.insert("limit".into(), Value::from(limit)); }
    if let Some(offset) = req.offset { p.insert("offset".into(), Value::from(offset)); }
    Ok(p)
}

/// Check the `{success, result}` envelope and hand back `result`.
fn unwrap_envelope(body: Value) -> Result<Map<String, Value>, Rejection> {
    if is_falsy(&body) { return Err(Rejection::EmptyBody); }
    if body.get("success") != Some(&Value::Bool(true)) {
        let msg = body.pointer("/error/message").and_then(|v| v.as_str()).unwrap_or("");
        warn!(error = %msg, "catalog reported failure");
        return Err(Rejection::Unsuccessful);
    }
    match body {
        Value::Object(mut m) => match m.remove("result") {
            Some(Value::Object(result)) => Ok(result),
            _ => Err(Rejection::MalformedResult),
        },
        _ => Err(Rejection::MalformedResult),
    }
}

fn search_result(body: Value) -> Result<SearchResult, Rejection> {
    let mut result = unwrap_envelope(body)?;
    let records = match result.remove("records") {
        Some(Value::Array(r)) => r,
        _ => return Err(Rejection::MalformedResult),
    };
    let total = result.get("total").and_then(Value::as_u64);
    Ok(SearchResult { records, total })
}

fn count_result(body: Value) -> Result<u64, Rejection> {
    let result = unwrap_envelope(body)?;
    let count = result
        .get("records")
        .and_then(Value::as_array)
        .and_then(|r| r.first())
        .and_then(|r| r.get("count"))
        .ok_or(Rejection::MissingCount)?;
    // bigint aggregates come back as text
    match count {
        Value::Number(n) => n.as_u64().ok_or(Rejection::MissingCount),
        Value::String(s) => s.trim().parse::<u64>().map_err(|_| Rejection::MissingCount),
        _ => Err(Rejection::MissingCount),
    }
}

fn rejected<T>(r: Rejection) -> Option<T> {
    metrics::counter!("datastore_rejections_total", 1u64, "reason" => r.as_str());
    debug!(reason = r.as_str(), "datastore call rejected");
    None
}

/// One catalog connection. Stateless; clone freely.
#[derive(Clone)]
pub struct DataStore {
    endpoint: String,
    resource_id: String,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore").field("endpoint", &self.endpoint).field("resource_id", &self.resource_id).finish()
    }
}

impl DataStore {
    pub fn new(endpoint: impl Into<String>, resource_id: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self { endpoint: endpoint.into(), resource_id: resource_id.into(), transport }
    }

    pub fn endpoint(&self) -> &str { &self.endpoint }

    pub fn resource_id(&self) -> &str { &self.resource_id }

    async fn dispatch(&self, action: CatalogAction, params: &Params) -> Result<Value, TransportError> {
        let started = Instant::now();
        debug!(endpoint = %self.endpoint, action = %action, params = params.len(), "datastore dispatch");
        metrics::counter!("datastore_requests_total", 1u64, "action" => action.as_str());
        let handle = self.transport.make_request(&self.endpoint, action, params).await?;
        let body = handle.json().await?;
        metrics::histogram!("datastore_request_ms", started.elapsed().as_secs_f64() * 1000.0, "action" => action.as_str());
        Ok(body)
    }

    /// `datastore_search` with field selection, term, distinct, sort and paging.
    pub async fn search(&self, req: &SearchRequest) -> Outcome<SearchResult> {
        let params = match search_params(&self.resource_id, req) {
            Ok(p) => p,
            Err(r) => return Ok(rejected(r)),
        };
        let body = self.dispatch(CatalogAction::DatastoreSearch, &params).await?;
        Ok(search_result(body).map_or_else(rejected, Some))
    }

    /// `datastore_search_sql` with the statement from `query.parse()`.
    pub async fn search_sql(&self, query: &dyn SqlQuery) -> Outcome<SearchResult> {
        let mut params = Params::new();
        params.insert("sql".into(), Value::String(query.parse()));
        let body = self.dispatch(CatalogAction::DatastoreSearchSql, &params).await?;
        Ok(search_result(body).map_or_else(rejected, Some))
    }

    /// Row count from `query.parse_count()`; reads `records[0].count`.
    pub async fn count_sql(&self, query: &dyn SqlQuery) -> Outcome<u64> {
        let mut params = Params::new();
        params.insert("sql".into(), Value::String(query.parse_count()));
        let body = self.dispatch(CatalogAction::DatastoreSearchSql, &params).await?;
        Ok(count_result(body).map_or_else(rejected, Some))
    }

    /// Distinct non-empty values of one field, ascending. Feeds dropdown filters.
    pub async fn distinct_values(&self, field: &str, limit: Option<u64>) -> Outcome<Vec<String>> {
        let mut req = SearchRequest::new([field]).distinct(true).sort(SortOptions::new(field, true));
        req.limit = limit;
        let Some(result) = self.search(&req).await? else { return Ok(None) };
        let values = result
            .records
            .iter()
            .filter_map(|r| r.get(field).map(render_cell))
            .filter(|v| !v.is_empty())
            .collect();
        Ok(Some(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_are_built_in_a_stable_shape() {
        let req = SearchRequest::new(["a", "b"]).text("x").distinct(true).limit(10).offset(20).sort(SortOptions::new("a", true));
        let p = search_params("res", &req).unwrap();
        assert_eq!(Value::Object(p), json!({
            "id": "res", "fields": "a,b", "q": "x", "distinct": true, "sort": "a ASC", "limit": 10, "offset": 20
        }));
    }

    #[test]
    fn empty_string_term_sends_no_q() {
        let p = search_params("res", &SearchRequest::new(["a"]).text("")).unwrap();
        assert!(!p.contains_key("q"));
        assert!(!p.contains_key("filters"));
    }

    #[test]
    fn rejections_are_classified() {
        assert_eq!(search_params("r", &SearchRequest::new(Vec::<String>::new())), Err(Rejection::NoFields));
        assert_eq!(search_params("r", &SearchRequest::new(["a"]).term(7)), Err(Rejection::InvalidTerm));
        assert_eq!(search_result(json!(false)), Err(Rejection::EmptyBody));
        assert_eq!(search_result(json!({"success": false})), Err(Rejection::Unsuccessful));
        assert_eq!(search_result(json!({"success": true})), Err(Rejection::MalformedResult));
        assert_eq!(search_result(json!({"success": true, "result": {"records": "x"}})), Err(Rejection::MalformedResult));
    }

    #[test]
    fn sql_results_have_no_total() {
        let r = search_result(json!({"success": true, "result": {"records": [{"a": 1}], "fields": []}})).unwrap();
        assert_eq!(r.records.len(), 1);
        assert_eq!(r.total, None);
    }

    #[test]
    fn count_accepts_numbers_and_numeric_text() {
        assert_eq!(count_result(json!({"success": true, "result": {"records": [{"count": 123}]}})), Ok(123));
        assert_eq!(count_result(json!({"success": true, "result": {"records": [{"count": "42"}]}})), Ok(42));
        assert_eq!(count_result(json!({"success": true, "result": {"records": []}})), Err(Rejection::MissingCount));
        assert_eq!(count_result(json!({"success": true, "result": {"records": [{"n": 1}]}})), Err(Rejection::MissingCount));
        assert_eq!(count_result(json!({"success": true, "result": {"records": [{"count": "many"}]}})), Err(Rejection::MissingCount));
    }
}
