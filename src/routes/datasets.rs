//! Dataset endpoints: import, list, activate, preview, export, delete.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use bytes::Bytes;
use tracing::info;

use crate::data_registry::{Registry, SourceInfo, SourceKind};
use crate::fetch::{csv_file, excel, notion::NotionClient, rest::RestClient, ImportedTable};
use crate::middleware::CurrentSession;
use crate::models::{
    ApiImportRequest, AppState, DatasetList, DatasetPreview, DeleteQuery, ImportResponse,
    InlineDatasetRequest, NotionImportRequest, PreviewQuery, SetActiveRequest,
};
use crate::table::Table;
use crate::types::{AppError, AppResult};

const DEFAULT_PREVIEW_ROWS: usize = 20;
const MAX_PREVIEW_ROWS: usize = 1000;

pub fn router(state: AppState) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.config.server.max_upload_bytes);
    Router::new()
        .route("/api/datasets", get(list_datasets).post(create_inline))
        .route("/api/datasets/import/file", post(import_file).layer(upload_limit.clone()))
        .route("/api/datasets/import/sheets", post(list_sheets).layer(upload_limit))
        .route("/api/datasets/import/notion", post(import_notion))
        .route("/api/datasets/import/api", post(import_api))
        .route("/api/datasets/active", put(set_active))
        .route("/api/datasets/{name}", get(preview).delete(delete_dataset))
        .route("/api/datasets/{name}/export", get(export_csv))
        .with_state(state)
}

fn listing(registry: &Registry) -> DatasetList {
    DatasetList {
        datasets: registry.list_names().to_vec(),
        active: registry.active_name().map(str::to_string),
    }
}

fn register(registry: &mut Registry, name: String, imported: ImportedTable) -> ImportResponse {
    let response = ImportResponse {
        dataset: name.clone(),
        rows: imported.table.num_rows(),
        columns: imported.table.num_columns(),
        source: imported.source.clone(),
    };
    info!(
        dataset = %name,
        kind = ?imported.source.kind,
        rows = response.rows,
        columns = response.columns,
        "dataset imported"
    );
    registry.add_dataset(&name, imported.table, imported.source);
    response
}

fn dataset_name(requested: Option<String>, fallback: impl FnOnce() -> String) -> AppResult<String> {
    let name = requested
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(fallback);
    if name.is_empty() {
        return Err(AppError::BadRequest("dataset name must not be empty".to_string()));
    }
    Ok(name)
}

/// GET /api/datasets
async fn list_datasets(CurrentSession(session): CurrentSession) -> Json<DatasetList> {
    let registry = session.registry.lock().await;
    Json(listing(&registry))
}

/// POST /api/datasets
async fn create_inline(
    CurrentSession(session): CurrentSession,
    Json(request): Json<InlineDatasetRequest>,
) -> AppResult<impl IntoResponse> {
    let name = dataset_name(Some(request.name), String::new)?;
    if request.records.is_empty() {
        return Err(AppError::BadRequest("records must not be empty".to_string()));
    }
    let imported = ImportedTable {
        table: Table::from_json_records(&request.records),
        source: SourceInfo::new(SourceKind::Inline, None),
    };
    let mut registry = session.registry.lock().await;
    let response = register(&mut registry, name, imported);
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Default)]
struct Upload {
    filename: Option<String>,
    data: Option<Bytes>,
    name: Option<String>,
    separator: Option<String>,
    sheet: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> AppResult<Upload> {
    let bad = |e: axum::extract::multipart::MultipartError| AppError::BadRequest(e.to_string());
    let mut upload = Upload::default();
    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        match field.name().unwrap_or("") {
            "file" => {
                upload.filename = field.file_name().map(str::to_string);
                upload.data = Some(field.bytes().await.map_err(bad)?);
            }
            "name" => upload.name = Some(field.text().await.map_err(bad)?),
            "separator" => upload.separator = Some(field.text().await.map_err(bad)?),
            "sheet" => upload.sheet = Some(field.text().await.map_err(bad)?).filter(|s| !s.is_empty()),
            _ => {}
        }
    }
    Ok(upload)
}

enum FileKind {
    Csv,
    Excel,
}

fn file_kind(filename: &str) -> AppResult<FileKind> {
    let ext = filename.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("csv") | Some("txt") | Some("tsv") => Ok(FileKind::Csv),
        Some("xlsx") | Some("xlsm") | Some("xls") | Some("xlsb") | Some("ods") => Ok(FileKind::Excel),
        _ => Err(AppError::BadRequest(format!("unsupported file type: {}", filename))),
    }
}

fn file_stem(filename: &str) -> &str {
    filename.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(filename)
}

/// `sales.csv` becomes `sales`; sheet `Q1` of `report.xlsx` becomes `report_Q1`.
fn default_upload_name(filename: &str, sheet: Option<&str>) -> String {
    match sheet {
        Some(sheet) => format!("{}_{}", file_stem(filename), sheet),
        None => file_stem(filename).to_string(),
    }
}

async fn blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T, crate::fetch::FetchError> + Send + 'static,
) -> AppResult<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(AppError::from)
}

/// POST /api/datasets/import/file (multipart: file, name?, separator?, sheet?)
async fn import_file(
    CurrentSession(session): CurrentSession,
    multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let upload = read_upload(multipart).await?;
    let (Some(filename), Some(data)) = (upload.filename, upload.data) else {
        return Err(AppError::BadRequest("multipart field 'file' is required".to_string()));
    };
    let kind = file_kind(&filename)?;
    let separator = upload.separator.unwrap_or_default();
    let sheet = upload.sheet;

    let source_name = filename.clone();
    let imported = blocking(move || match kind {
        FileKind::Csv => csv_file::import(&data, &source_name, &separator),
        FileKind::Excel => excel::import(&data, &source_name, sheet.as_deref()),
    })
    .await?;
    let name = dataset_name(upload.name, || {
        default_upload_name(&filename, imported.source.sheet.as_deref())
    })?;

    let mut registry = session.registry.lock().await;
    let response = register(&mut registry, name, imported);
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/datasets/import/sheets (multipart: file)
async fn list_sheets(
    CurrentSession(_session): CurrentSession,
    multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let upload = read_upload(multipart).await?;
    let Some(data) = upload.data else {
        return Err(AppError::BadRequest("multipart field 'file' is required".to_string()));
    };
    let sheets = blocking(move || excel::sheet_names(&data)).await?;
    Ok(Json(serde_json::json!({ "sheets": sheets })))
}

/// POST /api/datasets/import/notion
async fn import_notion(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(request): Json<NotionImportRequest>,
) -> AppResult<impl IntoResponse> {
    let client = NotionClient::new(
        state.http.clone(),
        state.config.fetch.notion_api_base.clone(),
        state.config.fetch.notion_version.clone(),
    );
    let imported = client.fetch_database(&request.request).await?;
    let fallback = format!("notion_{}", imported.source.location.as_deref().unwrap_or("data"));
    let name = dataset_name(request.name, || fallback)?;

    let mut registry = session.registry.lock().await;
    let response = register(&mut registry, name, imported);
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/datasets/import/api
async fn import_api(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(request): Json<ApiImportRequest>,
) -> AppResult<impl IntoResponse> {
    let imported = RestClient::new(state.http.clone()).fetch(&request.request).await?;
    let name = dataset_name(request.name, || "api_data".to_string())?;

    let mut registry = session.registry.lock().await;
    let response = register(&mut registry, name, imported);
    Ok((StatusCode::CREATED, Json(response)))
}

/// PUT /api/datasets/active
async fn set_active(
    CurrentSession(session): CurrentSession,
    Json(request): Json<SetActiveRequest>,
) -> AppResult<Json<DatasetList>> {
    let mut registry = session.registry.lock().await;
    if !registry.set_active(&request.name) {
        return Err(AppError::NotFound(format!("dataset '{}'", request.name)));
    }
    Ok(Json(listing(&registry)))
}

/// GET /api/datasets/{name}?view=raw|clean&limit=N
async fn preview(
    CurrentSession(session): CurrentSession,
    Path(name): Path<String>,
    Query(query): Query<PreviewQuery>,
) -> AppResult<Json<DatasetPreview>> {
    let registry = session.registry.lock().await;
    let dataset = registry
        .get(&name)
        .ok_or_else(|| AppError::NotFound(format!("dataset '{}'", name)))?;
    let limit = query.limit.unwrap_or(DEFAULT_PREVIEW_ROWS).min(MAX_PREVIEW_ROWS);
    Ok(Json(DatasetPreview::build(&name, dataset, query.view, limit)))
}

/// GET /api/datasets/{name}/export
async fn export_csv(
    CurrentSession(session): CurrentSession,
    Path(name): Path<String>,
) -> AppResult<impl IntoResponse> {
    let registry = session.registry.lock().await;
    let dataset = registry
        .get(&name)
        .ok_or_else(|| AppError::NotFound(format!("dataset '{}'", name)))?;
    let body = dataset
        .clean
        .to_csv()
        .map_err(|e| AppError::Internal(format!("CSV export failed: {}", e)))?;
    let disposition = format!("attachment; filename=\"{}.csv\"", name.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

/// DELETE /api/datasets/{name}?allow_empty=true
async fn delete_dataset(
    CurrentSession(session): CurrentSession,
    Path(name): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> AppResult<Json<DatasetList>> {
    let mut registry = session.registry.lock().await;
    if query.allow_empty {
        registry
            .remove(&name)
            .ok_or_else(|| AppError::NotFound(format!("dataset '{}'", name)))?;
    } else {
        registry.remove_keeping_one(&name)?;
    }
    info!(dataset = %name, "dataset removed");
    Ok(Json(listing(&registry)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_upload_name() {
        assert_eq!(default_upload_name("sales.csv", None), "sales");
        assert_eq!(default_upload_name("report.v2.xlsx", Some("Q1")), "report.v2_Q1");
        assert_eq!(default_upload_name("notes", None), "notes");
    }

    #[test]
    fn test_requested_name_wins_and_is_trimmed() {
        let name = dataset_name(Some("  mine ".to_string()), || "fallback".to_string()).unwrap();
        assert_eq!(name, "mine");
        let name = dataset_name(Some("   ".to_string()), || default_upload_name("book.xlsx", Some("Sheet1")));
        assert_eq!(name.unwrap(), "book_Sheet1");
        assert!(matches!(dataset_name(None, String::new), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_file_kind_by_extension() {
        assert!(matches!(file_kind("a.CSV"), Ok(FileKind::Csv)));
        assert!(matches!(file_kind("a.xlsx"), Ok(FileKind::Excel)));
        assert!(matches!(file_kind("a.pdf"), Err(AppError::BadRequest(_))));
    }
}
