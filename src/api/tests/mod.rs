use super::*;
use crate::Config;
use crate::db::Database;
use crate::fetcher::tests::FakeClient;
use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use std::time::Duration;
use tower::ServiceExt;


/// Fetcher over a throwaway database and a fake client
async fn create_test_fetcher(
    client: Arc<FakeClient>,
) -> (Arc<MetadataFetcher>, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.persistence.database_path = temp_dir.path().join("test.db");
    let db = Database::new(&config.persistence.database_path)
        .await
        .unwrap();
    let fetcher = MetadataFetcher::with_client(config, Arc::new(db), client).unwrap();
    (Arc::new(fetcher), temp_dir)
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_status_server_stops_on_cancel() {
    let (fetcher, _temp_dir) = create_test_fetcher(Arc::new(FakeClient::default())).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();

    let server = tokio::spawn(serve_status(fetcher, listener, shutdown.clone()));

    // Reachable over a real socket
    let body = reqwest::get(format!("http://{address}/health"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("\"ok\""));

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server should stop after cancellation")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (fetcher, _temp_dir) = create_test_fetcher(Arc::new(FakeClient::default())).await;
    let app = create_router(fetcher);

    let request = Request::builder()
        .uri("/downloads")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
