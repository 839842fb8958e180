use crate::db::*;
use tempfile::NamedTempFile;

/// Verify that resolving the backlog after closing the pool returns an error
/// rather than hanging or panicking.
#[tokio::test]
async fn test_resolve_backlog_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.insert_candidates(&[super::hash(1)]).await.unwrap();
    db.pool().close().await;

    let result = db.resolve_backlog().await;
    assert!(
        result.is_err(),
        "resolve_backlog after pool close should return an error, got: {:?}",
        result
    );
}

/// Verify that persisting metadata after closing the pool returns an error
#[tokio::test]
async fn test_insert_completed_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.pool().close().await;

    let result = db.insert_completed(&super::hash(1), b"d4:name3:fooe").await;
    assert!(
        result.is_err(),
        "insert_completed after pool close should return an error, got: {:?}",
        result
    );
}

/// Verify that inserting candidates after closing the pool returns an error
#[tokio::test]
async fn test_insert_candidates_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.pool().close().await;

    let result = db.insert_candidates(&[super::hash(2)]).await;
    assert!(result.is_err());
}
