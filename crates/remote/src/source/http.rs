//! JSON:API remote source over HTTP.

use super::RemoteSource;
use crate::error::{ErrorKind, Result};
use crate::page::{PagedRequest, RawPage, RawRecord};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use serde_json::Value;
use std::time::Duration;
use tracing::instrument;

/// Remote source for JSON:API listing endpoints (e.g. Kitsu's
/// `/library-entries`).
///
/// Requests are encoded as `filter[<key>]=<value>`, `page[offset]`,
/// `page[limit]` and a comma-separated `include` query parameter. The
/// response document's `data` array becomes the page's records and its
/// `included` array the side-loaded records; each element is re-serialized
/// on its own so it can be handed to a record parser.
///
/// # Examples
///
/// ```no_run
/// use kura_remote::HttpSource;
/// use std::time::Duration;
///
/// let source = HttpSource::new("https://kitsu.io/api/edge", Duration::from_secs(30)).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();
        if base_url.is_empty() {
            exn::bail!(ErrorKind::InvalidRequest("base URL must not be empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("kura/", env!("CARGO_PKG_VERSION")))
            .build()
            .or_raise(|| ErrorKind::InvalidRequest("could not build HTTP client".to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, request: &PagedRequest) -> String {
        format!("{}/{}", self.base_url, request.path().trim_start_matches('/'))
    }
}

/// Encodes a request as JSON:API query parameters.
fn query_pairs(request: &PagedRequest) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = request
        .filters()
        .iter()
        .map(|(key, value)| (format!("filter[{key}]"), value.clone()))
        .collect();
    if !request.includes().is_empty() {
        pairs.push(("include".to_string(), request.includes().join(",")));
    }
    let page = request.page();
    pairs.push(("page[offset]".to_string(), page.offset().to_string()));
    pairs.push(("page[limit]".to_string(), page.limit().to_string()));
    pairs
}

/// Splits a JSON:API document into individual raw records.
fn parse_document(body: &[u8]) -> Result<RawPage> {
    let document: Value = serde_json::from_slice(body).or_raise(|| ErrorKind::InvalidResponse)?;
    let data = document.get("data").and_then(Value::as_array).ok_or_raise(|| ErrorKind::InvalidResponse)?;
    let included = match document.get("included") {
        None | Some(Value::Null) => &[][..],
        Some(value) => value.as_array().ok_or_raise(|| ErrorKind::InvalidResponse)?.as_slice(),
    };
    let encode = |values: &[Value]| -> Result<Vec<RawRecord>> {
        values
            .iter()
            .map(|value| serde_json::to_vec(value).or_raise(|| ErrorKind::InvalidResponse))
            .collect()
    };
    Ok(RawPage::new(encode(data)?).with_included(encode(included)?))
}

#[async_trait]
impl RemoteSource for HttpSource {
    fn name(&self) -> &str {
        &self.base_url
    }

    #[instrument(level = "debug", skip_all, fields(path = request.path(), offset = request.page().offset()))]
    async fn fetch_page(&self, request: &PagedRequest) -> Result<RawPage> {
        let response = self
            .client
            .get(self.url(request))
            .header("Accept", "application/vnd.api+json")
            .query(&query_pairs(request))
            .send()
            .await
            .map_err(|err| ErrorKind::Network(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "remote returned an error status");
            exn::bail!(ErrorKind::Http(status.as_u16()));
        }
        let body = response.bytes().await.map_err(|err| ErrorKind::Network(err.to_string()))?;
        let page = parse_document(&body)?;
        tracing::debug!(records = page.len(), included = page.included.len(), "fetched page");
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageDescriptor;

    #[test]
    fn test_query_pairs() {
        let request = PagedRequest::new("/library-entries", PageDescriptor::new(40, 20).unwrap())
            .filter("user_id", 42)
            .filter("status", "on_hold")
            .include("media")
            .include("user");
        let pairs = query_pairs(&request);
        let get = |key: &str| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());
        assert_eq!(get("filter[user_id]"), Some("42"));
        assert_eq!(get("filter[status]"), Some("on_hold"));
        assert_eq!(get("include"), Some("media,user"));
        assert_eq!(get("page[offset]"), Some("40"));
        assert_eq!(get("page[limit]"), Some("20"));
    }

    #[test]
    fn test_query_pairs_without_includes() {
        let request = PagedRequest::new("/users", PageDescriptor::first(1).unwrap());
        assert!(query_pairs(&request).iter().all(|(k, _)| k != "include"));
    }

    #[test]
    fn test_url_joins_paths() {
        let source = HttpSource::new("https://example.org/api/edge/", Duration::from_secs(1)).unwrap();
        let request = PagedRequest::new("/library-entries", PageDescriptor::first(1).unwrap());
        assert_eq!(source.url(&request), "https://example.org/api/edge/library-entries");
    }

    #[test]
    fn test_parse_document() {
        let body = br#"{
            "data": [{"id": "1", "type": "libraryEntries"}, {"id": "2", "type": "libraryEntries"}],
            "included": [{"id": "7", "type": "anime"}],
            "meta": {"count": 2}
        }"#;
        let page = parse_document(body).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page.included.len(), 1);
        let first: Value = serde_json::from_slice(&page.records[0]).unwrap();
        assert_eq!(first["id"], "1");
    }

    #[test]
    fn test_parse_document_without_data() {
        let err = parse_document(br#"{"errors": [{"status": "404"}]}"#).unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidResponse);
        assert!(parse_document(br#"{"data": [], "included": null}"#).unwrap().is_empty());
    }
}
