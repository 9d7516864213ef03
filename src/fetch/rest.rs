//! Generic JSON REST import with optional page-number pagination.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{FetchError, ImportedTable};
use crate::data_registry::{SourceInfo, SourceKind};
use crate::table::Table;
use crate::utils::with_retry;

const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiAuth {
    #[default]
    None,
    Bearer { token: String },
    Basic { username: String, password: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Pagination {
    pub page_param: String,
    pub page_start: u64,
    pub page_size_param: String,
    pub page_size: u64,
    pub max_pages: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page_param: "page".to_string(),
            page_start: 1,
            page_size_param: "page_size".to_string(),
            page_size: 100,
            max_pages: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiRequest {
    #[serde(default)]
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub auth: ApiAuth,
    /// Dotted path to the record list, e.g. `data.items` or `results.0.rows`.
    #[serde(default)]
    pub records_path: String,
    #[serde(default)]
    pub pagination: Option<Pagination>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Follows a dotted path through objects and (by numeric segment) arrays.
/// An empty path returns the value itself.
pub fn get_nested_value<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.trim().is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn flatten_into(prefix: &str, value: &Value, out: &mut Map<String, Value>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(&name, child, out);
            }
        }
        Value::Array(_) | Value::Object(_) => {
            out.insert(prefix.to_string(), Value::String(value.to_string()));
        }
        scalar => {
            out.insert(prefix.to_string(), scalar.clone());
        }
    }
}

/// Nested objects become dotted columns; arrays are kept as JSON text.
pub fn flatten_record(record: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    match record {
        Value::Object(_) => flatten_into("", record, &mut out),
        other => {
            out.insert("value".to_string(), other.clone());
        }
    }
    out
}

/// Pulls the record list out of a response body. A bare object counts as a
/// single record.
fn extract_records(body: &Value, path: &str) -> Result<Vec<Value>, FetchError> {
    let found = get_nested_value(body, path).ok_or_else(|| {
        FetchError::InvalidInput(format!("records path '{}' not found in response", path))
    })?;
    Ok(match found {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    })
}

fn is_transient(err: &FetchError) -> bool {
    match err {
        FetchError::Http(e) => e.is_timeout() || e.is_connect(),
        FetchError::Api { status, .. } => *status >= 500 || *status == 429,
        _ => false,
    }
}

pub struct RestClient {
    http: reqwest::Client,
    retry_delay: Duration,
}

impl RestClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            retry_delay: Duration::from_millis(500),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn send(&self, request: &ApiRequest, page: Option<(&Pagination, u64)>) -> Result<Value, FetchError> {
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };
        let mut query: Vec<(String, String)> = request
            .params
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect();
        if let Some((p, number)) = page {
            query.retain(|(k, _)| k != &p.page_param && k != &p.page_size_param);
            query.push((p.page_param.clone(), number.to_string()));
            query.push((p.page_size_param.clone(), p.page_size.to_string()));
        }

        let mut builder = self.http.request(method, &request.url).query(&query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.auth {
            ApiAuth::None => builder,
            ApiAuth::Bearer { token } => builder.bearer_auth(token),
            ApiAuth::Basic { username, password } => builder.basic_auth(username, Some(password)),
        };
        if request.method == HttpMethod::Post {
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }
        }
        if let Some(secs) = request.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FetchError::Api {
                status: status.as_u16(),
                message: if message.is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                } else {
                    message
                },
            });
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| FetchError::InvalidInput(format!("response is not valid JSON: {}", e)))
    }

    async fn send_with_retry(&self, request: &ApiRequest, page: Option<(&Pagination, u64)>) -> Result<Value, FetchError> {
        with_retry(|| self.send(request, page), MAX_ATTEMPTS, self.retry_delay, is_transient).await
    }

    pub async fn fetch(&self, request: &ApiRequest) -> Result<ImportedTable, FetchError> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| FetchError::InvalidInput(format!("invalid url: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::InvalidInput("url must use http or https".to_string()));
        }

        let mut records: Vec<Value> = Vec::new();
        let mut pages = 0usize;
        match &request.pagination {
            None => {
                let body = self.send_with_retry(request, None).await?;
                records = extract_records(&body, &request.records_path)?;
                pages = 1;
            }
            Some(p) => {
                for i in 0..u64::from(p.max_pages.max(1)) {
                    // no page numbers left past u64::MAX
                    let Some(page) = p.page_start.checked_add(i) else {
                        break;
                    };
                    let body = self.send_with_retry(request, Some((p, page))).await?;
                    let batch = extract_records(&body, &request.records_path)?;
                    pages += 1;
                    debug!(page, records = batch.len(), "api page");
                    let short = (batch.len() as u64) < p.page_size;
                    let empty = batch.is_empty();
                    records.extend(batch);
                    if empty || short {
                        break;
                    }
                }
            }
        }

        if records.is_empty() {
            return Err(FetchError::Empty("API returned no records".to_string()));
        }
        let rows: Vec<Map<String, Value>> = records.iter().map(flatten_record).collect();
        let table = Table::from_json_records(&rows);
        info!(url = %request.url, rows = table.num_rows(), pages, "api import");

        let mut source = SourceInfo::new(SourceKind::Api, Some(request.url.clone()));
        source.pages = Some(pages);
        Ok(ImportedTable { table, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn client() -> RestClient {
        RestClient::new(reqwest::Client::new()).with_retry_delay(Duration::from_millis(1))
    }

    fn get(url: String) -> ApiRequest {
        ApiRequest {
            method: HttpMethod::Get,
            url,
            headers: HashMap::new(),
            params: Map::new(),
            body: None,
            auth: ApiAuth::None,
            records_path: String::new(),
            pagination: None,
            timeout_secs: None,
        }
    }

    #[test]
    fn test_nested_path() {
        let body = json!({"data": {"items": [{"a": 1}, {"a": 2}]}});
        assert_eq!(get_nested_value(&body, "data.items.1.a"), Some(&json!(2)));
        assert_eq!(get_nested_value(&body, ""), Some(&body));
        assert_eq!(get_nested_value(&body, "data.items.9"), None);
        assert_eq!(get_nested_value(&body, "data.missing"), None);
    }

    #[test]
    fn test_flatten_record() {
        let row = flatten_record(&json!({"id": 1, "user": {"name": "a", "geo": {"lat": 1.5}}, "tags": ["x"]}));
        assert_eq!(row.get("user.name"), Some(&json!("a")));
        assert_eq!(row.get("user.geo.lat"), Some(&json!(1.5)));
        assert_eq!(row.get("tags"), Some(&json!("[\"x\"]")));
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let req: ApiRequest = serde_json::from_value(json!({
            "url": "https://api.example.com/items",
            "auth": {"type": "bearer", "token": "t"},
            "pagination": {"max_pages": 3}
        }))
        .unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.auth, ApiAuth::Bearer { token: "t".to_string() });
        let p = req.pagination.unwrap();
        assert_eq!((p.page_param.as_str(), p.page_start, p.page_size, p.max_pages), ("page", 1, 100, 3));
    }

    #[tokio::test]
    async fn test_get_with_records_path_and_auth() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/items")
            .match_query(Matcher::UrlEncoded("q".into(), "all".into()))
            .match_header("authorization", "Bearer tok")
            .match_header("x-team", "ops")
            .with_status(200)
            .with_body(json!({"data": {"items": [{"id": 1, "name": "a"}, {"id": 2, "name": "b"}]}}).to_string())
            .create_async()
            .await;

        let mut req = get(format!("{}/items", server.url()));
        req.params.insert("q".into(), json!("all"));
        req.headers.insert("X-Team".into(), "ops".into());
        req.auth = ApiAuth::Bearer { token: "tok".into() };
        req.records_path = "data.items".into();

        let imported = client().fetch(&req).await.unwrap();
        mock.assert_async().await;
        assert_eq!(imported.table.column("id").unwrap().values, vec![Cell::Int(1), Cell::Int(2)]);
        assert_eq!(imported.source.pages, Some(1));
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/search")
            .match_body(Matcher::Json(json!({"term": "x"})))
            .with_status(200)
            .with_body(json!([{"hit": true}]).to_string())
            .create_async()
            .await;
        let mut req = get(format!("{}/search", server.url()));
        req.method = HttpMethod::Post;
        req.body = Some(json!({"term": "x"}));
        let imported = client().fetch(&req).await.unwrap();
        mock.assert_async().await;
        assert_eq!(imported.table.num_rows(), 1);
    }

    #[tokio::test]
    async fn test_pagination_stops_on_short_page() {
        let mut server = Server::new_async().await;
        let page1 = server
            .mock("GET", "/rows")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), "1".into()),
                Matcher::UrlEncoded("size".into(), "2".into()),
            ]))
            .with_body(json!([{"n": 1}, {"n": 2}]).to_string())
            .create_async()
            .await;
        let page2 = server
            .mock("GET", "/rows")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_body(json!([{"n": 3}]).to_string())
            .create_async()
            .await;
        let page3 = server
            .mock("GET", "/rows")
            .match_query(Matcher::UrlEncoded("page".into(), "3".into()))
            .expect(0)
            .create_async()
            .await;

        let mut req = get(format!("{}/rows", server.url()));
        req.pagination = Some(Pagination {
            page_size_param: "size".into(),
            page_size: 2,
            ..Pagination::default()
        });
        let imported = client().fetch(&req).await.unwrap();
        page1.assert_async().await;
        page2.assert_async().await;
        page3.assert_async().await;
        assert_eq!(imported.table.num_rows(), 3);
        assert_eq!(imported.source.pages, Some(2));
    }

    #[tokio::test]
    async fn test_pagination_stops_at_the_last_page_number() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/rows")
            .match_query(Matcher::Any)
            .with_body(json!([{"n": 1}]).to_string())
            .expect(2)
            .create_async()
            .await;

        let mut req = get(format!("{}/rows", server.url()));
        req.pagination = Some(Pagination {
            page_start: u64::MAX - 1,
            page_size: 1,
            max_pages: 5,
            ..Pagination::default()
        });
        let imported = client().fetch(&req).await.unwrap();
        mock.assert_async().await;
        assert_eq!(imported.table.num_rows(), 2);
        assert_eq!(imported.source.pages, Some(2));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/flaky")
            .with_status(503)
            .expect(MAX_ATTEMPTS as usize)
            .create_async()
            .await;
        let err = client().fetch(&get(format!("{}/flaky", server.url()))).await.unwrap_err();
        mock.assert_async().await;
        assert!(matches!(err, FetchError::Api { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_client_errors_fail_fast() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/secret")
            .with_status(403)
            .with_body("forbidden")
            .expect(1)
            .create_async()
            .await;
        let err = client().fetch(&get(format!("{}/secret", server.url()))).await.unwrap_err();
        mock.assert_async().await;
        match err {
            FetchError::Api { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "forbidden");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_path_and_bad_url() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/x")
            .with_body(json!({"data": []}).to_string())
            .create_async()
            .await;
        let mut req = get(format!("{}/x", server.url()));
        req.records_path = "items".into();
        assert!(matches!(client().fetch(&req).await, Err(FetchError::InvalidInput(_))));
        req.records_path = "data".into();
        assert!(matches!(client().fetch(&req).await, Err(FetchError::Empty(_))));
        assert!(matches!(
            client().fetch(&get("ftp://example.com".into())).await,
            Err(FetchError::InvalidInput(_))
        ));
    }
}
