//! End-to-end HTTP scenarios against a gateway on a real listener.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use blobgate_core::{
    BackendSocket, DbBackend, DbBackendConfig, FsBackend, FsBackendConfig, IndexConfig, S3Backend,
    S3BackendConfig, StatefulFrontend, StatefulFrontendConfig,
};
use blobgate_server::server::build_router;

fn local_sockets(dir: &Path) -> (Vec<Arc<dyn BackendSocket>>, Vec<String>) {
    let sockets: Vec<Arc<dyn BackendSocket>> = vec![
        Arc::new(DbBackend::new(DbBackendConfig::new(dir.join("blobs.db")))),
        Arc::new(FsBackend::new(FsBackendConfig::new(
            dir.join("blobs"),
            dir.join("meta.json"),
        ))),
    ];
    (sockets, vec!["db_1".to_string(), "fs_1".to_string()])
}

async fn start_gateway(
    sockets: Vec<Arc<dyn BackendSocket>>,
    aliases: Vec<String>,
    index_path: &Path,
) -> (String, Arc<StatefulFrontend>) {
    let frontend = Arc::new(
        StatefulFrontend::new(
            sockets,
            StatefulFrontendConfig {
                index: IndexConfig::new(index_path),
                aliases,
            },
        )
        .unwrap(),
    );
    frontend.init().wait().await.unwrap();

    let app = build_router(Arc::clone(&frontend));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://127.0.0.1:{}", addr.port()), frontend)
}

async fn start_local_gateway(dir: &Path) -> (String, Arc<StatefulFrontend>) {
    let (sockets, aliases) = local_sockets(dir);
    start_gateway(sockets, aliases, &dir.join("index.db")).await
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

#[tokio::test]
async fn happy_write_then_read() {
    let dir = tempfile::tempdir().unwrap();
    let (base, _frontend) = start_local_gateway(dir.path()).await;

    let response = client()
        .post(format!("{base}/v1/blobs"))
        .json(&serde_json::json!({ "id": "hello.txt", "data": "SGVsbG8gV29ybGQh" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    let response = client()
        .get(format!("{base}/v1/blobs/hello.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["id"], "hello.txt");
    assert_eq!(body["size"], 12);
    assert_eq!(body["data"], "SGVsbG8gV29ybGQh");
    assert!(body["created_at"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn duplicate_id_is_unprocessable() {
    let dir = tempfile::tempdir().unwrap();
    let (base, _frontend) = start_local_gateway(dir.path()).await;

    let payload = serde_json::json!({ "id": "hello.txt", "data": "SGVsbG8gV29ybGQh" });
    let first = client()
        .post(format!("{base}/v1/blobs"))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 201);

    let second = client()
        .post(format!("{base}/v1/blobs"))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 422);
}

#[tokio::test]
async fn bearer_protected_objects_enforce_ownership() {
    let dir = tempfile::tempdir().unwrap();
    let (base, _frontend) = start_local_gateway(dir.path()).await;

    let response = client()
        .post(format!("{base}/v1/blobs"))
        .header("Authorization", "Bearer tok-A")
        .json(&serde_json::json!({ "id": "secret", "data": "QUJD" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    let wrong = client()
        .get(format!("{base}/v1/blobs/secret"))
        .header("Authorization", "Bearer tok-B")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);

    let right = client()
        .get(format!("{base}/v1/blobs/secret"))
        .header("Authorization", "Bearer tok-A")
        .send()
        .await
        .unwrap();
    assert_eq!(right.status(), 200);
    let body: serde_json::Value = right.json().await.unwrap();
    assert_eq!(body["data"], "QUJD");
}

#[tokio::test]
async fn public_objects_ignore_the_callers_bearer() {
    let dir = tempfile::tempdir().unwrap();
    let (base, _frontend) = start_local_gateway(dir.path()).await;

    let response = client()
        .post(format!("{base}/v1/blobs"))
        .json(&serde_json::json!({ "id": "pub", "data": "QUJD" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    let read = client()
        .get(format!("{base}/v1/blobs/pub"))
        .header("Authorization", "Bearer tok-X")
        .send()
        .await
        .unwrap();
    assert_eq!(read.status(), 200);
}

#[tokio::test]
async fn all_backends_offline_is_service_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    // One S3 socket pointed at a port nothing listens on.
    let sockets: Vec<Arc<dyn BackendSocket>> = vec![Arc::new(
        S3Backend::new(S3BackendConfig {
            timeout: Duration::from_millis(300),
            ..S3BackendConfig::new("127.0.0.1:1", "blobs", "k", "s")
        })
        .unwrap(),
    )];
    let (base, _frontend) =
        start_gateway(sockets, vec!["s3_1".to_string()], &dir.path().join("index.db")).await;

    let response = client()
        .post(format!("{base}/v1/blobs"))
        .json(&serde_json::json!({ "id": "a", "data": "QUJD" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
}

#[tokio::test]
async fn missing_objects_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (base, _frontend) = start_local_gateway(dir.path()).await;

    let response = client()
        .get(format!("{base}/v1/blobs/nothing"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn wrong_content_type_is_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let (base, _frontend) = start_local_gateway(dir.path()).await;

    let response = client()
        .post(format!("{base}/v1/blobs"))
        .header("Content-Type", "text/plain")
        .body("{\"id\":\"a\",\"data\":\"QUJD\"}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 415);
}

#[tokio::test]
async fn malformed_body_and_bad_base64_are_unprocessable() {
    let dir = tempfile::tempdir().unwrap();
    let (base, _frontend) = start_local_gateway(dir.path()).await;

    let malformed = client()
        .post(format!("{base}/v1/blobs"))
        .header("Content-Type", "application/json")
        .body("{ not json")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), 422);

    let bad_payload = client()
        .post(format!("{base}/v1/blobs"))
        .json(&serde_json::json!({ "id": "a", "data": "!!!" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_payload.status(), 422);
}

#[tokio::test]
async fn objects_survive_a_gateway_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (base, frontend) = start_local_gateway(dir.path()).await;
        let response = client()
            .post(format!("{base}/v1/blobs"))
            .json(&serde_json::json!({ "id": "hello.txt", "data": "SGVsbG8gV29ybGQh" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        frontend.close().wait().await.unwrap();
    }

    let (base, _frontend) = start_local_gateway(dir.path()).await;
    let response = client()
        .get(format!("{base}/v1/blobs/hello.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["data"], "SGVsbG8gV29ybGQh");
}

#[tokio::test]
async fn health_reports_ok_once_ready() {
    let dir = tempfile::tempdir().unwrap();
    let (base, _frontend) = start_local_gateway(dir.path()).await;

    let response = client()
        .get(format!("{base}/v1/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}
