use crate::db::*;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_database_creation() {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path();

    let db = Database::new(db_path).await.unwrap();

    // Verify tables exist
    let mut conn = db.pool.acquire().await.unwrap();

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(&mut *conn)
            .await
            .unwrap();

    assert!(tables.contains(&"candidates".to_string()));
    assert!(tables.contains(&"completed".to_string()));
    assert!(tables.contains(&"schema_version".to_string()));

    drop(conn);
    db.close().await;
}

#[tokio::test]
async fn test_reopen_does_not_reapply_migrations() {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path();

    let db = Database::new(db_path).await.unwrap();
    db.insert_candidates(&[super::hash(1)]).await.unwrap();
    db.close().await;

    // Reopening must keep existing rows and not fail on already-created tables
    let db = Database::new(db_path).await.unwrap();
    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_version")
        .fetch_all(db.pool())
        .await
        .unwrap();
    assert_eq!(versions, vec![1]);
    assert_eq!(db.resolve_backlog().await.unwrap(), vec![super::hash(1)]);

    db.close().await;
}

#[tokio::test]
async fn test_existing_candidates_table_is_adopted() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("upstream.db");

    // An upstream crawler created the candidates table before we ever ran
    {
        use sqlx::sqlite::SqliteConnectOptions;
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = sqlx::SqlitePool::connect_with(options).await.unwrap();
        sqlx::query("CREATE TABLE candidates (infohash BLOB NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO candidates (infohash) VALUES (?)")
            .bind(vec![7u8; 20])
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;
    }

    let db = Database::new(&db_path).await.unwrap();
    assert_eq!(db.resolve_backlog().await.unwrap(), vec![super::hash(7)]);
    db.close().await;
}
