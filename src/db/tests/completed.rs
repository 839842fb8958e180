use super::hash;
use crate::db::*;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_insert_completed_is_idempotent() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let first = db.insert_completed(&hash(1), b"d4:name5:firste").await.unwrap();
    let second = db
        .insert_completed(&hash(1), b"d4:name6:seconde")
        .await
        .unwrap();

    assert!(first, "first insert should write a row");
    assert!(!second, "repeat insert should be a no-op");
    assert_eq!(db.count_completed().await.unwrap(), 1);

    // The first metadata survives
    let record = db.get_completed(&hash(1)).await.unwrap().unwrap();
    assert_eq!(record.infohash, hash(1));
    assert_eq!(record.metadata, b"d4:name5:firste");

    db.close().await;
}

#[tokio::test]
async fn test_insert_completed_conflicts_with_upper_case_row() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let upper = hash(0xAB).to_hex().to_uppercase();
    sqlx::query("INSERT INTO completed (infohash, metadata, fetched_at) VALUES (?, ?, 0)")
        .bind(&upper)
        .bind(b"d4:name3:olde".to_vec())
        .execute(db.pool())
        .await
        .unwrap();

    let inserted = db.insert_completed(&hash(0xAB), b"d4:name3:newe").await.unwrap();
    assert!(!inserted);
    assert_eq!(db.count_completed().await.unwrap(), 1);

    // Lookups are case-insensitive and return the canonical form
    let record = db.get_completed(&hash(0xAB)).await.unwrap().unwrap();
    assert_eq!(record.infohash, hash(0xAB));
    assert_eq!(record.metadata, b"d4:name3:olde");

    db.close().await;
}

#[tokio::test]
async fn test_stored_hex_is_lowercase() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.insert_completed(&hash(0xCD), b"de").await.unwrap();

    let raw: String = sqlx::query_scalar("SELECT infohash FROM completed")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(raw, "cd".repeat(20));

    db.close().await;
}

#[tokio::test]
async fn test_list_completed_in_insertion_order() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    assert!(db.get_completed(&hash(3)).await.unwrap().is_none());

    db.insert_completed(&hash(3), b"de").await.unwrap();
    db.insert_completed(&hash(1), b"de").await.unwrap();

    assert_eq!(db.list_completed().await.unwrap(), vec![hash(3), hash(1)]);

    db.close().await;
}

#[tokio::test]
async fn test_concurrent_inserts_leave_one_row() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = std::sync::Arc::new(Database::new(temp_file.path()).await.unwrap());

    let mut handles = Vec::new();
    for i in 0..16u8 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            db.insert_completed(&hash(7), &[b'd', i, b'e']).await.unwrap()
        }));
    }

    let mut inserted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            inserted += 1;
        }
    }

    assert_eq!(inserted, 1, "exactly one concurrent insert should win");
    assert_eq!(db.count_completed().await.unwrap(), 1);
}
