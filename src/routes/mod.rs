//! API Routes
//!
//! - `/api/health` - liveness
//! - `/api/sessions` - session lifecycle
//! - `/api/datasets` - import, preview, export, delete
//! - `/api/clean` - transformation code and declarative operators
//!
//! Everything except health and session creation needs an `x-session-id`
//! header naming a live session.

pub mod clean;
pub mod datasets;
pub mod health;
pub mod sessions;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::cors_layer;
use crate::models::AppState;

pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");
    let cors = cors_layer(&state.config.server.cors_allowed_origins);

    Router::new()
        .merge(health::router(state.clone()))
        .merge(sessions::router(state.clone()))
        .merge(datasets::router(state.clone()))
        .merge(clean::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        create_router(AppState::new(Config::for_tests()).unwrap())
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(app, req).await;
        let value = if body.is_empty() { Value::Null } else { serde_json::from_slice(&body).unwrap() };
        (status, value)
    }

    fn json_request(method: &str, uri: &str, session: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(id) = session {
            builder = builder.header("x-session-id", id);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str, session: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-session-id", session)
            .body(Body::empty())
            .unwrap()
    }

    async fn new_session(app: &Router) -> String {
        let (status, body) = send_json(app, json_request("POST", "/api/sessions", None, json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        body["session_id"].as_str().unwrap().to_string()
    }

    async fn seed(app: &Router, session: &str) {
        let (status, body) = send_json(
            app,
            json_request(
                "POST",
                "/api/datasets",
                Some(session),
                json!({
                    "name": "orders",
                    "records": [
                        {"region": " north ", "amount": 5},
                        {"region": "south", "amount": null},
                        {"region": " north ", "amount": 5}
                    ]
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["rows"], 3);
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send_json(&app(), Request::get("/api/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_session_header_is_required() {
        let app = app();
        let req = Request::get("/api/datasets").body(Body::empty()).unwrap();
        let (status, body) = send_json(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "bad_request");

        let unknown = uuid::Uuid::new_v4().to_string();
        let (status, _) = send_json(&app, get("/api/datasets", &unknown)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let app = app();
        let a = new_session(&app).await;
        let b = new_session(&app).await;
        seed(&app, &a).await;

        let (_, body) = send_json(&app, get("/api/datasets", &a)).await;
        assert_eq!(body["datasets"], json!(["orders"]));
        assert_eq!(body["active"], "orders");
        let (_, body) = send_json(&app, get("/api/datasets", &b)).await;
        assert_eq!(body["datasets"], json!([]));
    }

    #[tokio::test]
    async fn test_code_then_preview_and_export() {
        let app = app();
        let s = new_session(&app).await;
        seed(&app, &s).await;

        let code = "df['region'] = df['region'].str.strip()\nprint(len(df))\nresult = df.dropna().drop_duplicates()";
        let (status, body) = send_json(&app, json_request("POST", "/api/clean/code", Some(&s), json!({ "code": code }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rows"], 1);
        assert_eq!(body["log"], "3\n");

        let (status, body) = send_json(&app, get("/api/datasets/orders?view=clean&limit=5", &s)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rows"], 1);
        assert_eq!(body["records"][0]["region"], "north");
        let (_, body) = send_json(&app, get("/api/datasets/orders?view=raw", &s)).await;
        assert_eq!(body["rows"], 3);

        let (status, csv) = send(&app, get("/api/datasets/orders/export", &s)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(String::from_utf8(csv).unwrap(), "region,amount\nnorth,5\n");
    }

    #[tokio::test]
    async fn test_rejected_code_maps_to_422() {
        let app = app();
        let s = new_session(&app).await;
        seed(&app, &s).await;
        let (status, body) = send_json(
            &app,
            json_request("POST", "/api/clean/code", Some(&s), json!({ "code": "__import__('os')" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "validation_rejected");

        let (status, body) = send_json(
            &app,
            json_request(
                "POST",
                "/api/clean/code",
                Some(&s),
                json!({ "code": "print('before')\ndf = df['nonexistent_col']" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "execution_fault");
        assert_eq!(body["log"], "before\n");
    }

    #[tokio::test]
    async fn test_operator_route() {
        let app = app();
        let s = new_session(&app).await;
        seed(&app, &s).await;
        let (status, body) = send_json(
            &app,
            json_request(
                "POST",
                "/api/clean/operator",
                Some(&s),
                json!({"operator": "drop_null", "subset": ["amount"], "how": "any"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rows_affected"], 1);
        assert_eq!(body["rows"], 2);
    }

    #[tokio::test]
    async fn test_operator_without_dataset_is_400() {
        let app = app();
        let s = new_session(&app).await;
        let (status, body) = send_json(
            &app,
            json_request("POST", "/api/clean/operator", Some(&s), json!({"operator": "deduplicate"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "empty_input");
    }

    #[tokio::test]
    async fn test_csv_upload_and_delete() {
        let app = app();
        let s = new_session(&app).await;
        let boundary = "XBOUNDARY";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"separator\"\r\n\r\n;\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"sales.csv\"\r\n\
             Content-Type: text/csv\r\n\r\ncity;qty\nParis;3\nLyon;4\n\r\n--{b}--\r\n",
            b = boundary
        );
        let req = Request::post("/api/datasets/import/file")
            .header("x-session-id", &s)
            .header("content-type", format!("multipart/form-data; boundary={}", boundary))
            .body(Body::from(body))
            .unwrap();
        let (status, body) = send_json(&app, req).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["dataset"], "sales");
        assert_eq!(body["columns"], 2);
        assert_eq!(body["source"]["encoding"], "utf-8");
        assert_eq!(body["source"]["separator"], ";");

        let delete = Request::delete("/api/datasets/sales")
            .header("x-session-id", &s)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send_json(&app, delete).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "registry");

        let delete = Request::delete("/api/datasets/sales?allow_empty=true")
            .header("x-session-id", &s)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send_json(&app, delete).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["datasets"], json!([]));
        assert_eq!(body["active"], Value::Null);
    }

    #[tokio::test]
    async fn test_switch_active_and_end_session() {
        let app = app();
        let s = new_session(&app).await;
        seed(&app, &s).await;
        let (status, _) = send_json(&app, json_request("PUT", "/api/datasets/active", Some(&s), json!({"name": "nope"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = send_json(&app, json_request("PUT", "/api/datasets/active", Some(&s), json!({"name": "orders"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"], "orders");

        let end = Request::delete("/api/sessions/current")
            .header("x-session-id", &s)
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, end).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send_json(&app, get("/api/datasets", &s)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
