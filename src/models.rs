use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::config::Config;
use crate::data_registry::{Dataset, SourceInfo};
use crate::fetch::{self, notion::NotionRequest, rest::ApiRequest};
use crate::cleaning::Operator;
use crate::middleware::SessionRateLimiter;
use crate::session::SessionStore;
use crate::table::Table;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sessions: SessionStore,
    pub http: reqwest::Client,
    pub limiter: SessionRateLimiter,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let http = fetch::http_client(Duration::from_secs(config.fetch.http_timeout_secs))?;
        let sessions = SessionStore::new(
            config.sessions.max_sessions,
            config.sessions.idle_timeout().as_secs() as i64,
        );
        let limiter = SessionRateLimiter::per_minute(config.server.rate_limit_per_minute);
        Ok(Self {
            config,
            sessions,
            http,
            limiter,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub sessions: usize,
}

#[derive(Debug, Serialize)]
pub struct SessionCreated {
    pub session_id: uuid::Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct DatasetList {
    pub datasets: Vec<String>,
    pub active: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InlineDatasetRequest {
    pub name: String,
    pub records: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct NotionImportRequest {
    /// Dataset name; defaults to `notion_<database id>`.
    pub name: Option<String>,
    #[serde(flatten)]
    pub request: NotionRequest,
}

#[derive(Debug, Deserialize)]
pub struct ApiImportRequest {
    pub name: Option<String>,
    #[serde(flatten)]
    pub request: ApiRequest,
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub dataset: String,
    pub rows: usize,
    pub columns: usize,
    pub source: SourceInfo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    Raw,
    #[default]
    Clean,
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    #[serde(default)]
    pub view: View,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub dtype: &'static str,
    pub nulls: usize,
}

#[derive(Debug, Serialize)]
pub struct DatasetPreview {
    pub name: String,
    pub view: View,
    pub rows: usize,
    pub columns: Vec<ColumnInfo>,
    pub records: Vec<Map<String, Value>>,
    pub source: SourceInfo,
}

impl DatasetPreview {
    pub fn build(name: &str, dataset: &Dataset, view: View, limit: usize) -> Self {
        let table: &Table = match view {
            View::Raw => &dataset.raw,
            View::Clean => &dataset.clean,
        };
        Self {
            name: name.to_string(),
            view,
            rows: table.num_rows(),
            columns: table
                .columns()
                .iter()
                .map(|c| ColumnInfo {
                    name: c.name.clone(),
                    dtype: c.dtype(),
                    nulls: c.null_count(),
                })
                .collect(),
            records: table.to_json_records(Some(limit)),
            source: dataset.source.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub allow_empty: bool,
}

#[derive(Debug, Deserialize)]
pub struct CodeRequest {
    pub code: String,
    /// Target dataset; the active one when omitted.
    pub dataset: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OperatorRequest {
    pub dataset: Option<String>,
    #[serde(flatten)]
    pub operator: Operator,
}
