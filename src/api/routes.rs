use super::handlers::{compose, health};
use super::middleware::cors::add_cors;
use crate::services::ComposeService;
use axum::{
    Router,
    routing::{delete, get, post},
};

#[derive(Clone)]
pub struct AppState {
    pub compose_service: ComposeService,
}

pub fn create_router(compose_service: ComposeService) -> Router {
    let state = AppState { compose_service };

    let api_routes = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Build lifecycle
        .route("/api/v1/compose", post(compose::start_compose))
        .route("/api/v1/compose/cancel/{uuid}", delete(compose::cancel))
        .route("/api/v1/compose/delete/{uuids}", delete(compose::delete))
        // Queries
        .route("/api/v1/compose/types", get(compose::compose_types))
        .route("/api/v1/compose/queue", get(compose::queue_status))
        .route("/api/v1/compose/finished", get(compose::finished))
        .route("/api/v1/compose/failed", get(compose::failed))
        .route("/api/v1/compose/status/{uuids}", get(compose::status))
        .route("/api/v1/compose/info/{uuid}", get(compose::info))
        .route("/api/v1/compose/log/{uuid}", get(compose::log))
        // Archives
        .route("/api/v1/compose/metadata/{uuid}", get(compose::metadata))
        .route("/api/v1/compose/results/{uuid}", get(compose::results))
        .route("/api/v1/compose/logs/{uuid}", get(compose::logs))
        .route("/api/v1/compose/image/{uuid}", get(compose::image))
        // Uploads
        .route(
            "/api/v1/compose/uploads/schedule/{uuid}",
            post(compose::schedule_upload),
        )
        .route(
            "/api/v1/compose/uploads/delete/{uuid}/{upload_uuid}",
            delete(compose::remove_upload),
        )
        .with_state(state);

    add_cors(api_routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ImageExecutor, TestEnv};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(router, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn delete_req(uri: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn compose_body(compose_type: &str) -> Value {
        json!({
            "blueprint_name": "demo-recipe",
            "compose_type": compose_type,
        })
    }

    #[tokio::test]
    async fn health_is_ok() {
        let env = TestEnv::new();
        let router = create_router(env.service());
        let (status, body) = send_json(&router, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn compose_then_query_status() {
        let env = TestEnv::new();
        let router = create_router(env.service());

        let (status, body) =
            send_json(&router, post_json("/api/v1/compose?test=2", compose_body("tar"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], true);
        let id = body["build_id"].as_str().unwrap().to_string();

        let (_, body) = send_json(&router, get_req(&format!("/api/v1/compose/status/{}", id))).await;
        assert_eq!(body["uuids"][0]["queue_status"], "WAITING");
        assert_eq!(body["uuids"][0]["blueprint"], "demo-recipe");

        let (_, body) = send_json(&router, get_req("/api/v1/compose/queue")).await;
        assert_eq!(body["new"].as_array().unwrap().len(), 1);
        assert!(body["run"].as_array().unwrap().is_empty());

        let (_, body) = send_json(&router, get_req("/api/v1/compose/status/*")).await;
        assert_eq!(body["uuids"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_compose_type_is_rejected() {
        let env = TestEnv::new();
        let router = create_router(env.service());

        let (status, body) =
            send_json(&router, post_json("/api/v1/compose", compose_body("floppy"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("floppy"));

        let (_, body) = send_json(&router, get_req("/api/v1/compose/types")).await;
        assert_eq!(body["types"], json!([
            {"name": "qcow2", "enabled": true},
            {"name": "tar", "enabled": true},
        ]));
    }

    #[tokio::test]
    async fn unknown_uuids_are_reported() {
        let env = TestEnv::new();
        let router = create_router(env.service());

        let (status, body) =
            send_json(&router, get_req("/api/v1/compose/status/not-a-uuid")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["errors"][0]["id"], "UnknownUUID");

        let (status, _) = send(&router, get_req("/api/v1/compose/info/not-a-uuid")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let missing = uuid::Uuid::new_v4();
        let (status, _) =
            send(&router, delete_req(&format!("/api/v1/compose/cancel/{}", missing))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_only_removes_finished_builds() {
        let env = TestEnv::new();
        let service = env.service();
        let router = create_router(service.clone());

        let (_, body) =
            send_json(&router, post_json("/api/v1/compose?test=2", compose_body("tar"))).await;
        let finished = body["build_id"].as_str().unwrap().to_string();
        env.monitor(ImageExecutor).run_next().await.unwrap();
        let (_, body) =
            send_json(&router, post_json("/api/v1/compose?test=2", compose_body("tar"))).await;
        let queued = body["build_id"].as_str().unwrap().to_string();

        let (_, body) = send_json(
            &router,
            delete_req(&format!("/api/v1/compose/delete/{},{}", finished, queued)),
        )
        .await;
        assert_eq!(body["uuids"][0]["uuid"], finished.as_str());
        assert_eq!(body["errors"].as_array().unwrap().len(), 1);
        assert!(body["errors"][0]["msg"].as_str().unwrap().starts_with(&queued));

        let (_, body) = send_json(&router, get_req("/api/v1/compose/finished")).await;
        assert!(body["finished"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn finished_build_serves_log_and_archive() {
        let env = TestEnv::new();
        let router = create_router(env.service());

        let (_, body) =
            send_json(&router, post_json("/api/v1/compose?test=2", compose_body("tar"))).await;
        let id = body["build_id"].as_str().unwrap().to_string();
        env.monitor(ImageExecutor).run_next().await.unwrap();

        let (status, _) = send(&router, get_req(&format!("/api/v1/compose/log/{}?size=4", id))).await;
        assert_eq!(status, StatusCode::OK);

        let response = router
            .clone()
            .oneshot(get_req(&format!("/api/v1/compose/image/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/x-tar");
        let archive = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8_lossy(&archive);
        assert!(text.contains("root.tar.xz"));
        assert!(text.contains("TEST IMAGE"));

        let (_, body) = send_json(&router, get_req("/api/v1/compose/failed")).await;
        assert!(body["failed"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn uploads_can_be_scheduled_and_removed() {
        let env = TestEnv::new();
        let router = create_router(env.service());

        let (_, body) =
            send_json(&router, post_json("/api/v1/compose?test=2", compose_body("tar"))).await;
        let id = body["build_id"].as_str().unwrap().to_string();

        let (status, body) = send_json(
            &router,
            post_json(
                &format!("/api/v1/compose/uploads/schedule/{}", id),
                json!({"provider": "aws", "image_name": "demo", "settings": {"region": "us-east-1"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let upload_id = body["upload_id"].as_str().unwrap().to_string();

        let (_, body) = send_json(&router, get_req(&format!("/api/v1/compose/info/{}", id))).await;
        assert_eq!(body["uploads"][0]["status"], "WAITING");
        assert!(body["uploads"][0].get("settings").is_none());

        let (status, _) = send(
            &router,
            delete_req(&format!("/api/v1/compose/uploads/delete/{}/{}", id, upload_id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}
