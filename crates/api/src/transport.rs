//! Transport seam between the DataStore and a CKAN catalog.
//!
//! The DataStore only ever sees `Transport::make_request` and the returned handle's `json()`;
//! status codes, timeouts and headers stay here.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use ckan_core::{CatalogAction, Params};
use serde_json::Value;
use tracing::debug;

pub use reqwest::Url;

/// Transport-level failures. These propagate to callers; they are never folded into the
/// DataStore's `None` sentinel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Raw response from the catalog. Decoding is a separate step so callers can tell a failed
/// request from a body that is not JSON.
#[async_trait]
pub trait ResponseHandle: Send {
    async fn json(self: Box<Self>) -> Result<Value, TransportError>;
}

/// Issues one catalog action per call.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn make_request(
        &self,
        endpoint: &str,
        action: CatalogAction,
        params: &Params,
    ) -> Result<Box<dyn ResponseHandle>, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMethod {
    /// Params as query string.
    #[default]
    Get,
    /// Params as JSON body.
    Post,
}

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Path between the endpoint and the action name.
    pub action_path: String,
    pub timeout: Duration,
    pub user_agent: String,
    pub method: RequestMethod,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            action_path: "api/3/action".to_string(),
            timeout: Duration::from_secs(30),
            user_agent: concat!("ckan-registry/", env!("CARGO_PKG_VERSION")).to_string(),
            method: RequestMethod::Get,
        }
    }
}

/// reqwest-backed transport for `<endpoint>/api/3/action/<action>`.
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_config(HttpTransportConfig::default())
    }

    pub fn with_config(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, config })
    }

    /// Build the action URL. Trailing slashes on the endpoint are tolerated.
    pub fn action_url(&self, endpoint: &str, action: CatalogAction) -> Result<Url, TransportError> {
        let mut url = endpoint.trim_end_matches('/').to_string();
        let path = self.config.action_path.trim_matches('/');
        if !path.is_empty() { url.push('/'); url.push_str(path); }
        url.push('/');
        url.push_str(action.as_str());
        Url::parse(&url).map_err(|e| TransportError::InvalidEndpoint(format!("{}: {}", endpoint, e)))
    }
}

/// Query-string rendering of a param value: strings verbatim, everything else as JSON.
pub fn query_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn make_request(
        &self,
        endpoint: &str,
        action: CatalogAction,
        params: &Params,
    ) -> Result<Box<dyn ResponseHandle>, TransportError> {
        let mut url = self.action_url(endpoint, action)?;
        let req = match self.config.method {
            RequestMethod::Get => {
                {
                    let mut pairs = url.query_pairs_mut();
                    for (k, v) in params.iter() { pairs.append_pair(k, &query_value(v)); }
                }
                self.client.get(url.clone())
            }
            RequestMethod::Post => self.client.post(url.clone()).json(params),
        };
        let resp = req.send().await?;
        // CKAN reports action failures with 4xx plus a JSON envelope; leave those to the caller
        debug!(url = %url.path(), status = resp.status().as_u16(), "catalog response");
        Ok(Box::new(HttpResponse(resp)))
    }
}

struct HttpResponse(reqwest::Response);

#[async_trait]
impl ResponseHandle for HttpResponse {
    async fn json(self: Box<Self>) -> Result<Value, TransportError> {
        let bytes = self.0.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

// ----------------- Mock implementation -----------------

/// A single recorded `make_request` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub endpoint: String,
    pub action: CatalogAction,
    pub params: Params,
}

#[derive(Debug, Clone)]
enum Reply {
    Body(Value),
    Fail(String),
}

/// In-memory transport for tests: records calls and answers with canned bodies.
/// Queued replies are served first, in order; after that every call gets the default reply.
pub struct MockTransport {
    reply: Mutex<Reply>,
    queued: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl Default for MockTransport {
    fn default() -> Self { Self::with_body(Value::Bool(false)) }
}

impl MockTransport {
    pub fn new() -> Self { Self::default() }

    pub fn with_body(body: Value) -> Self {
        Self { reply: Mutex::new(Reply::Body(body)), queued: Mutex::new(VecDeque::new()), calls: Mutex::new(Vec::new()) }
    }

    /// Every request fails at the transport level.
    pub fn failing(msg: impl Into<String>) -> Self {
        Self { reply: Mutex::new(Reply::Fail(msg.into())), queued: Mutex::new(VecDeque::new()), calls: Mutex::new(Vec::new()) }
    }

    pub fn set_body(&self, body: Value) {
        *self.reply.lock().unwrap_or_else(PoisonError::into_inner) = Reply::Body(body);
    }

    /// Answer the next unanswered call with `body`.
    pub fn push_body(&self, body: Value) {
        self.queued.lock().unwrap_or_else(PoisonError::into_inner).push_back(Reply::Body(body));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Remove and return the oldest recorded call.
    pub fn take_call(&self) -> Option<RecordedCall> {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        if calls.is_empty() { None } else { Some(calls.remove(0)) }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn make_request(
        &self,
        endpoint: &str,
        action: CatalogAction,
        params: &Params,
    ) -> Result<Box<dyn ResponseHandle>, TransportError> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(RecordedCall {
            endpoint: endpoint.to_string(),
            action,
            params: params.clone(),
        });
        let queued = self.queued.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        let reply = match queued {
            Some(r) => r,
            None => self.reply.lock().unwrap_or_else(PoisonError::into_inner).clone(),
        };
        match reply {
            Reply::Body(v) => Ok(Box::new(CannedResponse(v))),
            Reply::Fail(msg) => Err(TransportError::Unavailable(msg)),
        }
    }
}

struct CannedResponse(Value);

#[async_trait]
impl ResponseHandle for CannedResponse {
    async fn json(self: Box<Self>) -> Result<Value, TransportError> { Ok(self.0) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_url_joins_endpoint_path_and_action() {
        let t = HttpTransport::new().expect("client");
        let u = t.action_url("http://ckan.example.com/", CatalogAction::DatastoreSearch).unwrap();
        assert_eq!(u.as_str(), "http://ckan.example.com/api/3/action/datastore_search");
        let u = t.action_url("https://data.example.org/catalog", CatalogAction::DatastoreSearchSql).unwrap();
        assert_eq!(u.as_str(), "https://data.example.org/catalog/api/3/action/datastore_search_sql");
    }

    #[test]
    fn action_url_rejects_garbage_endpoint() {
        let t = HttpTransport::new().expect("client");
        assert!(matches!(t.action_url("not a url", CatalogAction::DatastoreSearch), Err(TransportError::InvalidEndpoint(_))));
    }

    #[test]
    fn empty_action_path_goes_straight_to_action() {
        let cfg = HttpTransportConfig { action_path: String::new(), ..Default::default() };
        let t = HttpTransport::with_config(cfg).expect("client");
        let u = t.action_url("http://h", CatalogAction::DatastoreSearch).unwrap();
        assert_eq!(u.as_str(), "http://h/datastore_search");
    }

    #[test]
    fn query_values_render_strings_verbatim() {
        assert_eq!(query_value(&json!("a,b")), "a,b");
        assert_eq!(query_value(&json!(true)), "true");
        assert_eq!(query_value(&json!(20)), "20");
    }

    #[tokio::test]
    async fn mock_records_calls_in_order() {
        let m = MockTransport::new();
        let mut p = Params::new();
        p.insert("id".into(), json!("r1"));
        let h = m.make_request("http://e", CatalogAction::DatastoreSearch, &p).await.unwrap();
        assert_eq!(h.json().await.unwrap(), json!(false));
        m.make_request("http://e", CatalogAction::DatastoreSearchSql, &Params::new()).await.unwrap();
        assert_eq!(m.call_count(), 2);
        let first = m.take_call().unwrap();
        assert_eq!(first.action, CatalogAction::DatastoreSearch);
        assert_eq!(first.params.get("id"), Some(&json!("r1")));
        assert_eq!(m.take_call().unwrap().action, CatalogAction::DatastoreSearchSql);
        assert!(m.take_call().is_none());
    }

    #[tokio::test]
    async fn queued_bodies_are_served_before_the_default() {
        let m = MockTransport::with_body(json!("default"));
        m.push_body(json!(1));
        m.push_body(json!(2));
        let mut seen = Vec::new();
        for _ in 0..3 {
            let h = m.make_request("http://e", CatalogAction::DatastoreSearchSql, &Params::new()).await.unwrap();
            seen.push(h.json().await.unwrap());
        }
        assert_eq!(seen, vec![json!(1), json!(2), json!("default")]);
    }

    #[tokio::test]
    async fn failing_mock_returns_transport_error() {
        let m = MockTransport::failing("down");
        let r = m.make_request("http://e", CatalogAction::DatastoreSearch, &Params::new()).await;
        assert!(matches!(r, Err(TransportError::Unavailable(ref s)) if s == "down"));
        assert_eq!(m.call_count(), 1);
    }
}
