use super::handlers::{health, test, uart};
use super::middleware::cors::add_cors;
use crate::services::{ExecutorService, UartService};
use axum::{
    Router,
    routing::{get, post},
};

#[derive(Clone)]
pub struct AppState {
    pub executor_service: ExecutorService,
    pub uart_service: UartService,
}

pub fn create_router(executor_service: ExecutorService, uart_service: UartService) -> Router {
    let state = AppState {
        executor_service,
        uart_service,
    };

    let api_routes = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Test execution
        .route("/api/v1/test", post(test::run_test))
        .route("/api/v1/test/status/{id}", get(test::test_status))
        // UART discovery
        .route("/api/v1/uart/ports", get(uart::list_ports))
        .with_state(state);

    add_cors(api_routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowRegistry;
    use crate::plugins::PluginEngine;
    use crate::repository::StatusStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn router(dir: &Path) -> Router {
        let executor_service = ExecutorService::new(
            Arc::new(StatusStore::open(dir.join("db.json")).unwrap()),
            Arc::new(FlowRegistry::with_defaults()),
            Arc::new(PluginEngine::new()),
            dir.join("logs"),
            dir.join("devices"),
        );
        create_router(executor_service, UartService::new())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_responds() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(dir.path()).oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn submitted_example_flow_is_pollable_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path());

        let response = app
            .clone()
            .oneshot(post_json("/api/v1/test", json!({ "test_flow": "example" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = body_json(response).await;
        assert_eq!(body["test_status"], "initialized");
        assert_eq!(body["status"], true);
        let polling_url = body["polling_url"].as_str().unwrap().to_string();

        for _ in 0..100 {
            let response = app.clone().oneshot(get(&polling_url)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let status = body_json(response).await["test_status"]
                .as_str()
                .unwrap()
                .to_string();
            if status == "completed" {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("example flow never completed");
    }

    #[tokio::test]
    async fn unknown_flow_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(dir.path())
            .oneshot(post_json("/api/v1/test", json!({ "test_flow": "teleport" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(
            body_json(response).await["error"]
                .as_str()
                .unwrap()
                .contains("not recognized")
        );
    }

    #[tokio::test]
    async fn status_of_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(dir.path())
            .oneshot(get("/api/v1/test/status/nope"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
