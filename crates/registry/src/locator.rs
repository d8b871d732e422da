//! Resource locator field: chooses the catalog resource a page is bound to.

use ckan_api::transport::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum LocatorError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("not a dataset url: {0}")]
    NotADataset(String),
    #[error("invalid resource id: {0}")]
    InvalidResourceId(String),
    #[error("invalid value: {0}")]
    InvalidValue(#[from] serde_json::Error),
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
}

/// A located resource. Field names follow the CMS record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceLocator {
    #[serde(alias = "endpoint")]
    pub endpoint: String,
    #[serde(default, rename = "DataSet", alias = "dataset")]
    pub dataset: Option<String>,
    #[serde(default, rename = "Identifier", alias = "resource")]
    pub resource: Option<String>,
}

impl ResourceLocator {
    /// Parse `<endpoint>/dataset/<name>[/resource/<uuid>]`.
    pub fn from_url(raw: &str) -> Result<Self, LocatorError> {
        let url = Url::parse(raw.trim()).map_err(|e| LocatorError::InvalidUrl(format!("{}: {}", raw, e)))?;
        let segments: Vec<&str> = url.path_segments().map(|s| s.filter(|p| !p.is_empty()).collect()).unwrap_or_default();
        let pos = segments.iter().position(|s| *s == "dataset").ok_or_else(|| LocatorError::NotADataset(raw.to_string()))?;
        let dataset = segments.get(pos + 1).ok_or_else(|| LocatorError::NotADataset(raw.to_string()))?;

        let resource = match (segments.get(pos + 2), segments.get(pos + 3)) {
            (Some(&"resource"), Some(id)) => {
                let id = Uuid::parse_str(id).map_err(|_| LocatorError::InvalidResourceId((*id).to_string()))?;
                Some(id.hyphenated().to_string())
            }
            _ => None,
        };

        let mut endpoint = url.origin().ascii_serialization();
        endpoint.push('/');
        for s in segments[..pos].iter() { endpoint.push_str(s); endpoint.push('/'); }
        debug!(endpoint = %endpoint, dataset = %dataset, resource = ?resource, "located resource");
        Ok(Self { endpoint, dataset: Some((*dataset).to_string()), resource })
    }
}

/// Props handed to the locator UI on mount.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocatorProps {
    pub name: String,
    pub default_endpoint: Option<String>,
    pub description: String,
    pub value: Option<ResourceLocator>,
    /// Remaining schema attributes, passed through untouched.
    pub schema: Value,
}

/// Mount/unmount lifecycle around `LocatorProps`.
#[derive(Debug, Default)]
pub struct ResourceLocatorField {
    props: Option<LocatorProps>,
}

impl ResourceLocatorField {
    pub fn new() -> Self { Self::default() }

    /// Read schema data and the optional JSON-encoded current value.
    pub fn mount(&mut self, name: &str, schema: &Value, raw_value: Option<&str>) -> Result<&LocatorProps, LocatorError> {
        if !schema.is_object() {
            return Err(LocatorError::InvalidSchema("schema data must be an object".into()));
        }
        let default_endpoint = schema
            .get("defaultEndpoint")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let description = schema
            .pointer("/description/html")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let value = match raw_value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => Some(serde_json::from_str::<ResourceLocator>(v)?),
            None => None,
        };
        Ok(self.props.insert(LocatorProps { name: name.to_string(), default_endpoint, description, value, schema: schema.clone() }))
    }

    pub fn unmount(&mut self) { self.props = None; }

    pub fn is_mounted(&self) -> bool { self.props.is_some() }

    pub fn props(&self) -> Option<&LocatorProps> { self.props.as_ref() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_resource_url() {
        let loc = ResourceLocator::from_url(
            "https://catalogue.data.govt.nz/dataset/nz-schools/resource/0EA81453-3D20-4EED-8BE1-EC5522A28B6E",
        )
        .unwrap();
        assert_eq!(loc.endpoint, "https://catalogue.data.govt.nz/");
        assert_eq!(loc.dataset.as_deref(), Some("nz-schools"));
        assert_eq!(loc.resource.as_deref(), Some("0ea81453-3d20-4eed-8be1-ec5522a28b6e"));
    }

    #[test]
    fn keeps_path_prefix_and_allows_dataset_only() {
        let loc = ResourceLocator::from_url("http://localhost:5000/ckan/dataset/abc").unwrap();
        assert_eq!(loc.endpoint, "http://localhost:5000/ckan/");
        assert_eq!(loc.dataset.as_deref(), Some("abc"));
        assert_eq!(loc.resource, None);
    }

    #[test]
    fn rejects_non_dataset_and_bad_ids() {
        assert!(matches!(ResourceLocator::from_url("nope"), Err(LocatorError::InvalidUrl(_))));
        assert!(matches!(ResourceLocator::from_url("https://h/organization/x"), Err(LocatorError::NotADataset(_))));
        assert!(matches!(ResourceLocator::from_url("https://h/dataset/"), Err(LocatorError::NotADataset(_))));
        assert!(matches!(ResourceLocator::from_url("https://h/dataset/x/resource/123"), Err(LocatorError::InvalidResourceId(_))));
    }

    #[test]
    fn mount_reads_schema_and_value() {
        let mut field = ResourceLocatorField::new();
        let schema = json!({"defaultEndpoint": "", "description": {"html": "<p>Pick one</p>"}, "title": "Data"});
        let props = field
            .mount("DataResource", &schema, Some(r#"{"Endpoint":"https://h/","DataSet":"x","Identifier":"id"}"#))
            .unwrap()
            .clone();
        assert_eq!(props.name, "DataResource");
        assert_eq!(props.default_endpoint, None);
        assert_eq!(props.description, "<p>Pick one</p>");
        assert_eq!(props.value.as_ref().and_then(|v| v.resource.as_deref()), Some("id"));
        assert_eq!(props.schema["title"], json!("Data"));
        assert!(field.is_mounted());
        field.unmount();
        assert!(!field.is_mounted());
        assert!(field.props().is_none());
    }

    #[test]
    fn mount_without_value_or_description() {
        let mut field = ResourceLocatorField::new();
        let props = field.mount("r", &json!({"defaultEndpoint": "https://h/"}), Some("")).unwrap();
        assert_eq!(props.default_endpoint.as_deref(), Some("https://h/"));
        assert_eq!(props.description, "");
        assert!(props.value.is_none());
    }

    #[test]
    fn mount_rejects_bad_json_value() {
        let mut field = ResourceLocatorField::new();
        assert!(matches!(field.mount("r", &json!({}), Some("{not json")), Err(LocatorError::InvalidValue(_))));
        assert!(matches!(field.mount("r", &json!("x"), None), Err(LocatorError::InvalidSchema(_))));
        assert!(!field.is_mounted());
    }
}
