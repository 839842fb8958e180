//! End-to-end runs through the public API with an in-process client

#![allow(clippy::unwrap_used, clippy::expect_used)]

use info_fetcher::client::{ClientStatus, Metadata};
use info_fetcher::{
    Config, Database, InfoHash, MetadataFetcher, RunOutcome, TorrentClient, TorrentHandle,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Answers instantly for known hashes and never for the rest
#[derive(Default)]
struct CannedClient {
    known: HashMap<InfoHash, Vec<u8>>,
    live: Mutex<HashMap<InfoHash, watch::Sender<Option<Metadata>>>>,
}

impl TorrentClient for CannedClient {
    fn add_info_hash(&self, info_hash: InfoHash) -> TorrentHandle {
        let ready = self
            .known
            .get(&info_hash)
            .map(|bytes| Metadata::from(bytes.as_slice()));
        let (tx, rx) = watch::channel(ready);
        self.live.lock().unwrap().insert(info_hash, tx);
        TorrentHandle::new(info_hash, rx)
    }

    fn add_trackers(&self, _info_hash: &InfoHash, _trackers: &[String]) {}

    fn drop_info_hash(&self, info_hash: &InfoHash) {
        self.live.lock().unwrap().remove(info_hash);
    }

    fn status(&self) -> ClientStatus {
        ClientStatus {
            peer_id: "canned".to_string(),
            torrents: Vec::new(),
        }
    }
}

fn config_in(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.path().join("fetch.db");
    config.fetch.metadata_timeout = Duration::from_millis(200);
    config
}

#[tokio::test]
async fn enqueued_hashes_are_fetched_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);

    let found: InfoHash = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".parse().unwrap();
    let silent: InfoHash = "BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB".parse().unwrap();

    let db = Arc::new(Database::new(&config.persistence.database_path).await.unwrap());
    db.insert_candidates(&[found, silent, found]).await.unwrap();

    let client = Arc::new(CannedClient {
        known: HashMap::from([(found, b"d4:name3:fooe".to_vec())]),
        ..Default::default()
    });
    let fetcher = MetadataFetcher::with_client(config, db.clone(), client.clone()).unwrap();

    let outcome = fetcher.run(CancellationToken::new()).await.unwrap();
    let summary = outcome.summary();
    assert!(!outcome.is_interrupted());
    assert_eq!(summary.finished, 2);
    assert_eq!(summary.persisted, 1);
    assert_eq!(summary.timed_out, 1);

    let record = db.get_completed(&found).await.unwrap().unwrap();
    assert_eq!(record.metadata, b"d4:name3:fooe");
    assert_eq!(db.resolve_backlog().await.unwrap(), vec![silent]);

    // Only the silent swarm is retried, and every registration was released
    let again = fetcher.run(CancellationToken::new()).await.unwrap();
    assert_eq!(again.summary().finished, 1);
    assert_eq!(again.summary().timed_out, 1);
    assert_eq!(db.count_completed().await.unwrap(), 1);
    assert!(client.live.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_run_reports_interruption() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(&dir);
    config.fetch.metadata_timeout = Duration::from_secs(60);

    let db = Arc::new(Database::new(&config.persistence.database_path).await.unwrap());
    db.insert_candidates(&[InfoHash::new([7; 20])]).await.unwrap();

    let client = Arc::new(CannedClient::default());
    let fetcher = MetadataFetcher::with_client(config, db, client).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(Duration::from_secs(5), fetcher.run(cancel))
        .await
        .expect("interrupted run should return promptly")
        .unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Interrupted {
            abandoned: 1,
            summary: Default::default(),
        }
    );
}
