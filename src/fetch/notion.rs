//! Notion database import: walks `POST /v1/databases/{id}/query` pages and
//! flattens each page's properties into one row.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{FetchError, ImportedTable};
use crate::data_registry::{SourceInfo, SourceKind};
use crate::table::Table;

const PAGE_SIZE_MAX: usize = 100;
pub const MAX_RESULTS_LIMIT: usize = 1000;

static ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)notion\.so/([a-f0-9]{32})",
        r"(?i)notion\.so/.+/([a-f0-9]{32})",
        r"(?i)([a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12})",
        r"(?i)([a-f0-9]{32})",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

fn default_max_results() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotionRequest {
    pub token: String,
    /// Bare id, dashed UUID, or a page URL containing one.
    pub database: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub filter: Option<Value>,
    #[serde(default)]
    pub sorts: Option<Value>,
}

/// Pulls a database id out of an id or URL, normalised to 32 lowercase hex
/// characters.
pub fn extract_database_id(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    ID_PATTERNS.iter().find_map(|re| {
        let id = re.captures(input)?.get(1)?.as_str().replace('-', "").to_lowercase();
        (id.len() == 32).then_some(id)
    })
}

fn plain_text(items: Option<&Value>) -> String {
    items
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("plain_text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

fn str_or_empty(v: Option<&Value>) -> Value {
    match v {
        Some(Value::Null) | None => Value::String(String::new()),
        Some(other) => other.clone(),
    }
}

/// Flattens one property object to a scalar JSON value.
pub fn flatten_property(prop: &Value) -> Value {
    let kind = prop.get("type").and_then(Value::as_str).unwrap_or("");
    let body = prop.get(kind);
    match kind {
        "title" | "rich_text" => Value::String(plain_text(body)),
        "number" => body.cloned().unwrap_or(Value::Null),
        "select" => Value::String(
            body.and_then(|s| s.get("name"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
        ),
        "multi_select" => Value::String(
            body.and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .map(|i| i.get("name").and_then(Value::as_str).unwrap_or(""))
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default(),
        ),
        "date" => str_or_empty(body.and_then(|d| d.get("start"))),
        "checkbox" => body.cloned().unwrap_or(Value::Bool(false)),
        "url" | "email" | "phone_number" | "created_time" | "last_edited_time" => str_or_empty(body),
        _ => match body {
            Some(Value::String(s)) => Value::String(s.clone()),
            Some(other) => Value::String(other.to_string()),
            None => Value::String(String::new()),
        },
    }
}

fn page_to_row(page: &Value) -> Map<String, Value> {
    let mut row = Map::new();
    row.insert("id".to_string(), str_or_empty(page.get("id")));
    if let Some(props) = page.get("properties").and_then(Value::as_object) {
        for (name, prop) in props {
            row.insert(name.clone(), flatten_property(prop));
        }
    }
    row
}

pub struct NotionClient {
    http: reqwest::Client,
    base_url: String,
    version: String,
}

impl NotionClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            version: version.into(),
        }
    }

    async fn query_page(
        &self,
        token: &str,
        database_id: &str,
        body: &Value,
    ) -> Result<Value, FetchError> {
        let response = self
            .http
            .post(format!("{}/v1/databases/{}/query", self.base_url, database_id))
            .bearer_auth(token)
            .header("Notion-Version", &self.version)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        match status.as_u16() {
            401 => return Err(FetchError::InvalidToken),
            404 => return Err(FetchError::DatabaseNotFound),
            _ => {}
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FetchError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    pub async fn fetch_database(&self, request: &NotionRequest) -> Result<ImportedTable, FetchError> {
        if request.token.trim().is_empty() {
            return Err(FetchError::InvalidInput("Notion token is required".to_string()));
        }
        let database_id = extract_database_id(&request.database).ok_or_else(|| {
            FetchError::InvalidInput("cannot find a valid database id in the input".to_string())
        })?;
        if !(1..=MAX_RESULTS_LIMIT).contains(&request.max_results) {
            return Err(FetchError::InvalidInput(format!(
                "max_results must be between 1 and {}",
                MAX_RESULTS_LIMIT
            )));
        }

        let mut pages: Vec<Value> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut requests = 0;
        loop {
            let mut body = json!({
                "page_size": (request.max_results - pages.len()).min(PAGE_SIZE_MAX),
            });
            if let Some(c) = &cursor {
                body["start_cursor"] = json!(c);
            }
            if let Some(filter) = request.filter.as_ref().filter(|f| !is_empty_json(f)) {
                body["filter"] = filter.clone();
            }
            if let Some(sorts) = request.sorts.as_ref().filter(|s| !is_empty_json(s)) {
                body["sorts"] = sorts.clone();
            }

            let response = self.query_page(&request.token, &database_id, &body).await?;
            requests += 1;
            if let Some(results) = response.get("results").and_then(Value::as_array) {
                pages.extend(results.iter().cloned());
            }
            let has_more = response.get("has_more").and_then(Value::as_bool).unwrap_or(false);
            cursor = response
                .get("next_cursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            debug!(database = %database_id, fetched = pages.len(), has_more, "notion page");
            if !has_more || cursor.is_none() || pages.len() >= request.max_results {
                break;
            }
        }
        pages.truncate(request.max_results);

        if pages.is_empty() {
            return Err(FetchError::Empty(
                "Notion database is empty or not shared with this integration".to_string(),
            ));
        }
        let rows: Vec<Map<String, Value>> = pages.iter().map(page_to_row).collect();
        let table = Table::from_json_records(&rows);
        info!(database = %database_id, rows = table.num_rows(), "notion import");

        let mut source = SourceInfo::new(SourceKind::Notion, Some(database_id));
        source.pages = Some(requests);
        Ok(ImportedTable { table, source })
    }
}

fn is_empty_json(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;
    use mockito::{Matcher, Server};

    const ID: &str = "0123456789abcdef0123456789abcdef";

    fn client(base: &str) -> NotionClient {
        NotionClient::new(reqwest::Client::new(), base, "2022-06-28")
    }

    fn request(max_results: usize) -> NotionRequest {
        NotionRequest {
            token: "secret".to_string(),
            database: ID.to_string(),
            max_results,
            filter: None,
            sorts: None,
        }
    }

    fn page(id: &str, name: &str, qty: i64) -> Value {
        json!({
            "id": id,
            "properties": {
                "Name": {"type": "title", "title": [{"plain_text": name}]},
                "Qty": {"type": "number", "number": qty},
                "Tags": {"type": "multi_select", "multi_select": [{"name": "a"}, {"name": "b"}]},
                "Due": {"type": "date", "date": null}
            }
        })
    }

    #[test]
    fn test_extract_database_id() {
        assert_eq!(extract_database_id(ID).as_deref(), Some(ID));
        assert_eq!(
            extract_database_id("https://www.notion.so/team/Sales-0123456789ABCDEF0123456789ABCDEF?v=1").as_deref(),
            Some(ID)
        );
        assert_eq!(
            extract_database_id("01234567-89ab-cdef-0123-456789abcdef").as_deref(),
            Some(ID)
        );
        assert_eq!(extract_database_id("https://example.com/nothing"), None);
        assert_eq!(extract_database_id(""), None);
    }

    #[test]
    fn test_flatten_properties() {
        let select = json!({"type": "select", "select": {"name": "Open"}});
        assert_eq!(flatten_property(&select), json!("Open"));
        let empty_select = json!({"type": "select", "select": null});
        assert_eq!(flatten_property(&empty_select), json!(""));
        let checkbox = json!({"type": "checkbox", "checkbox": true});
        assert_eq!(flatten_property(&checkbox), json!(true));
        let date = json!({"type": "date", "date": {"start": "2024-01-02"}});
        assert_eq!(flatten_property(&date), json!("2024-01-02"));
        let people = json!({"type": "people", "people": [{"id": "u1"}]});
        assert_eq!(flatten_property(&people), json!("[{\"id\":\"u1\"}]"));
    }

    #[tokio::test]
    async fn test_paginates_until_has_more_is_false() {
        let mut server = Server::new_async().await;
        let path = format!("/v1/databases/{}/query", ID);
        let first = server
            .mock("POST", path.as_str())
            .match_header("authorization", "Bearer secret")
            .match_header("notion-version", "2022-06-28")
            .match_body(Matcher::PartialJson(json!({"page_size": 100})))
            .with_status(200)
            .with_body(
                json!({"results": [page("p1", "Widget", 3)], "has_more": true, "next_cursor": "c2"}).to_string(),
            )
            .create_async()
            .await;
        let second = server
            .mock("POST", path.as_str())
            .match_body(Matcher::PartialJson(json!({"start_cursor": "c2"})))
            .with_status(200)
            .with_body(json!({"results": [page("p2", "Gadget", 5)], "has_more": false}).to_string())
            .create_async()
            .await;

        let imported = client(&server.url()).fetch_database(&request(100)).await.unwrap();
        first.assert_async().await;
        second.assert_async().await;

        let table = imported.table;
        assert_eq!(table.column_names(), vec!["id", "Name", "Qty", "Tags", "Due"]);
        assert_eq!(table.column("Qty").unwrap().values, vec![Cell::Int(3), Cell::Int(5)]);
        assert_eq!(table.column("Tags").unwrap().values[0], Cell::Text("a, b".to_string()));
        assert_eq!(imported.source.pages, Some(2));
        assert_eq!(imported.source.location.as_deref(), Some(ID));
    }

    #[tokio::test]
    async fn test_stops_at_max_results() {
        let mut server = Server::new_async().await;
        let path = format!("/v1/databases/{}/query", ID);
        let mock = server
            .mock("POST", path.as_str())
            .match_body(Matcher::PartialJson(json!({"page_size": 1})))
            .with_status(200)
            .with_body(json!({"results": [page("p1", "A", 1)], "has_more": true, "next_cursor": "c2"}).to_string())
            .expect(1)
            .create_async()
            .await;
        let imported = client(&server.url()).fetch_database(&request(1)).await.unwrap();
        mock.assert_async().await;
        assert_eq!(imported.table.num_rows(), 1);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let mut server = Server::new_async().await;
        let path = format!("/v1/databases/{}/query", ID);
        server.mock("POST", path.as_str()).with_status(401).create_async().await;
        let err = client(&server.url()).fetch_database(&request(10)).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidToken));

        let mut server = Server::new_async().await;
        server.mock("POST", path.as_str()).with_status(404).create_async().await;
        let err = client(&server.url()).fetch_database(&request(10)).await.unwrap_err();
        assert!(matches!(err, FetchError::DatabaseNotFound));
    }

    #[tokio::test]
    async fn test_empty_database_is_an_error() {
        let mut server = Server::new_async().await;
        let path = format!("/v1/databases/{}/query", ID);
        server
            .mock("POST", path.as_str())
            .with_status(200)
            .with_body(json!({"results": [], "has_more": false}).to_string())
            .create_async()
            .await;
        let err = client(&server.url()).fetch_database(&request(10)).await.unwrap_err();
        assert!(matches!(err, FetchError::Empty(_)));
    }

    #[tokio::test]
    async fn test_rejects_bad_input_without_calling_out() {
        let c = client("http://127.0.0.1:9");
        let mut req = request(10);
        req.database = "nope".to_string();
        assert!(matches!(c.fetch_database(&req).await, Err(FetchError::InvalidInput(_))));
        let req = request(5000);
        assert!(matches!(c.fetch_database(&req).await, Err(FetchError::InvalidInput(_))));
    }
}
