//! Integration tests for stowage-core, exercising CollectionRepo, Store,
//! CloneManager, and BackupManager together against on-disk fixtures.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use stowage_core::backup::{BackupManager, BackupRequest, ListBackupsRequest, RestoreRequest};
use stowage_core::clone_manager::{CancelToken, CloneManager, StreamFrame, TransferStatus};
use stowage_core::query::{Filter, Operator, SearchQuery};
use stowage_core::repo::CollectionRepo;
use stowage_core::store::Options;
use stowage_core::{FileData, StowageConfig};

fn test_config(dir: &TempDir) -> StowageConfig {
    StowageConfig {
        data_dir: dir.path().join("data"),
        backup_dir: dir.path().join("backups"),
        ..Default::default()
    }
}

/// Bulk-inserting 100 records yields Count == 100, and List(0,10)
/// returns the 10 most recently created ids in descending order.
#[tokio::test]
async fn s1_crud_bulk_insert_and_paged_list() {
    let dir = TempDir::new().unwrap();
    let repo = CollectionRepo::new(test_config(&dir));
    let users = repo
        .create_collection("test", "users", "User", vec![], None, Options::default())
        .await
        .unwrap();

    for i in 1..=100 {
        users
            .create(
                format!("record-{}", i),
                format!("data-{}", i).into_bytes(),
                None,
                BTreeMap::new(),
            )
            .unwrap();
    }

    assert_eq!(users.count().unwrap(), 100);

    let page = users.list(0, 10).unwrap();
    assert_eq!(page.len(), 10);
    let ids: Vec<&str> = page.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "record-100",
            "record-99",
            "record-98",
            "record-97",
            "record-96",
            "record-95",
            "record-94",
            "record-93",
            "record-92",
            "record-91",
        ]
    );
}

/// Full-text search returns exactly the records whose bio contains
/// the queried phrase.
#[tokio::test]
async fn s2_full_text_search() {
    let dir = TempDir::new().unwrap();
    let repo = CollectionRepo::new(test_config(&dir));
    let people = repo
        .create_collection("test", "people", "Person", vec![], None, Options::default())
        .await
        .unwrap();

    people
        .create(
            "1",
            json!({"bio": "Software engineer passionate about distributed systems"})
                .to_string()
                .into_bytes(),
            None,
            BTreeMap::new(),
        )
        .unwrap();
    people
        .create(
            "2",
            json!({"bio": "Product manager with expertise in cloud infrastructure"})
                .to_string()
                .into_bytes(),
            None,
            BTreeMap::new(),
        )
        .unwrap();
    people
        .create(
            "3",
            json!({"bio": "DevOps engineer specializing in distributed systems"})
                .to_string()
                .into_bytes(),
            None,
            BTreeMap::new(),
        )
        .unwrap();

    let hits = people
        .search(&SearchQuery {
            full_text: Some("distributed systems".to_string()),
            ..Default::default()
        })
        .unwrap();
    let mut ids: Vec<&str> = hits.iter().map(|(r, _)| r.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["1", "3"]);

    let manager_hits = people
        .search(&SearchQuery {
            full_text: Some("manager".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(manager_hits.len(), 1);
    assert_eq!(manager_hits[0].0.id, "2");

    let none_hits = people
        .search(&SearchQuery {
            full_text: Some("kubernetes".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert!(none_hits.is_empty());
}

/// Numeric filters correctly select records above/at-or-below a
/// threshold.
#[tokio::test]
async fn s3_numeric_filter() {
    let dir = TempDir::new().unwrap();
    let repo = CollectionRepo::new(test_config(&dir));
    let scores = repo
        .create_collection("test", "scores", "Score", vec![], None, Options::default())
        .await
        .unwrap();

    for (id, score) in [("1", 85), ("2", 92), ("3", 78), ("4", 95)] {
        scores
            .create(id, json!({"score": score}).to_string().into_bytes(), None, BTreeMap::new())
            .unwrap();
    }

    let gt90 = scores
        .search(&SearchQuery {
            filters: vec![Filter {
                path: "score".to_string(),
                op: Operator::Gt,
                value: json!(90),
            }],
            ..Default::default()
        })
        .unwrap();
    let mut gt_ids: Vec<&str> = gt90.iter().map(|(r, _)| r.id.as_str()).collect();
    gt_ids.sort();
    assert_eq!(gt_ids, vec!["2", "4"]);

    let le85 = scores
        .search(&SearchQuery {
            filters: vec![Filter {
                path: "score".to_string(),
                op: Operator::Le,
                value: json!(85),
            }],
            ..Default::default()
        })
        .unwrap();
    let mut le_ids: Vec<&str> = le85.iter().map(|(r, _)| r.id.as_str()).collect();
    le_ids.sort();
    assert_eq!(le_ids, vec!["1", "3"]);
}

/// A filter over a dotted nested path matches only the record whose
/// nested value equals it.
#[tokio::test]
async fn s4_nested_field_filter() {
    let dir = TempDir::new().unwrap();
    let repo = CollectionRepo::new(test_config(&dir));
    let users = repo
        .create_collection("test", "profiles", "Profile", vec![], None, Options::default())
        .await
        .unwrap();

    users
        .create(
            "1",
            json!({"user": {"profile": {"city": "SF"}}}).to_string().into_bytes(),
            None,
            BTreeMap::new(),
        )
        .unwrap();
    users
        .create(
            "2",
            json!({"user": {"profile": {"city": "NYC"}}}).to_string().into_bytes(),
            None,
            BTreeMap::new(),
        )
        .unwrap();

    let hits = users
        .search(&SearchQuery {
            filters: vec![Filter {
                path: "user.profile.city".to_string(),
                op: Operator::Eq,
                value: json!("SF"),
            }],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0.id, "1");
}

/// Backing up 50 records then restoring succeeds once, and a second
/// restore without overwrite fails with AlreadyExists.
#[tokio::test]
async fn s5_backup_restore_round_trip() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let repo = Arc::new(CollectionRepo::new(config.clone()));
    let backups = BackupManager::new(repo.clone(), &config).unwrap();

    let original = repo
        .create_collection("test", "original", "Thing", vec![], None, Options::default())
        .await
        .unwrap();
    for i in 0..50 {
        original
            .create(format!("rec-{}", i), json!({"i": i}).to_string().into_bytes(), None, BTreeMap::new())
            .unwrap();
    }

    let backup = backups
        .backup_collection(
            BackupRequest {
                namespace: "test".to_string(),
                name: "original".to_string(),
                include_files: false,
                metadata: BTreeMap::new(),
            },
            1_700_000_000,
        )
        .await
        .unwrap();

    let verify = backups.verify_backup(&backup.backup_id).unwrap();
    assert!(verify.is_valid);

    let restore = backups
        .restore_backup(RestoreRequest {
            backup_id: backup.backup_id.clone(),
            dest_namespace: "restored".to_string(),
            dest_name: "c1".to_string(),
            overwrite: false,
        })
        .await
        .unwrap();
    assert_eq!(restore.records_restored, 50);

    let restored = repo.get_collection("restored", "c1").unwrap();
    assert_eq!(restored.count().unwrap(), original.count().unwrap());
    for i in 0..50 {
        let id = format!("rec-{}", i);
        assert_eq!(original.get(&id).unwrap().json_projection, restored.get(&id).unwrap().json_projection);
    }

    let err = backups
        .restore_backup(RestoreRequest {
            backup_id: backup.backup_id,
            dest_namespace: "restored".to_string(),
            dest_name: "c1".to_string(),
            overwrite: false,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "already_exists");
}

/// Five collections backed up in parallel all verify, and the
/// namespace-filtered total count matches.
#[tokio::test]
async fn s6_concurrent_backups_of_distinct_collections() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let repo = Arc::new(CollectionRepo::new(config.clone()));
    let backups = Arc::new(BackupManager::new(repo.clone(), &config).unwrap());

    for i in 0..5 {
        let name = format!("coll-{}", i);
        let collection = repo
            .create_collection("test", &name, "Thing", vec![], None, Options::default())
            .await
            .unwrap();
        for j in 0..100 {
            collection
                .create(format!("rec-{}", j), json!({"j": j}).to_string().into_bytes(), None, BTreeMap::new())
                .unwrap();
        }
    }

    let mut tasks = Vec::new();
    for i in 0..5 {
        let backups = backups.clone();
        let name = format!("coll-{}", i);
        tasks.push(tokio::spawn(async move {
            backups
                .backup_collection(
                    BackupRequest {
                        namespace: "test".to_string(),
                        name,
                        include_files: false,
                        metadata: BTreeMap::new(),
                    },
                    1_700_000_000 + i,
                )
                .await
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        let meta = task.await.unwrap().unwrap();
        ids.push(meta.backup_id);
    }

    for id in &ids {
        assert!(backups.verify_backup(id).unwrap().is_valid);
    }

    let listed = backups
        .list_backups(&ListBackupsRequest {
            namespace: Some("test".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(listed.total_count, 5);
}

/// File attachment path safety: attempted traversal outside the
/// FileSystem root is rejected and creates no files.
#[tokio::test]
async fn property_file_path_safety() {
    let dir = TempDir::new().unwrap();
    let repo = CollectionRepo::new(test_config(&dir));
    let collection = repo
        .create_collection("test", "docs", "Doc", vec![], None, Options::default())
        .await
        .unwrap();

    let err = collection
        .save_file("../../etc/passwd", FileData::Inline(vec![1, 2, 3]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_argument");

    let err2 = collection
        .save_file("/etc/passwd", FileData::Inline(vec![1]))
        .await
        .unwrap_err();
    assert_eq!(err2.kind(), "invalid_argument");

    assert!(collection.list_files().await.unwrap().is_empty());
}

/// A local clone isolates: a write to the source after cloning is
/// invisible to the clone and vice versa.
#[tokio::test]
async fn property_clone_isolates() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let repo = Arc::new(CollectionRepo::new(config));
    let manager = CloneManager::new(repo.clone());

    let source = repo
        .create_collection("test", "source", "Thing", vec![], None, Options::default())
        .await
        .unwrap();
    source
        .create("rec-1", json!({"v": 1}).to_string().into_bytes(), None, BTreeMap::new())
        .unwrap();

    let clone = manager
        .local_clone("test", "source", "test", "clone", false)
        .await
        .unwrap();

    source
        .create("rec-2", json!({"v": 2}).to_string().into_bytes(), None, BTreeMap::new())
        .unwrap();
    clone
        .create("rec-3", json!({"v": 3}).to_string().into_bytes(), None, BTreeMap::new())
        .unwrap();

    assert_eq!(source.count().unwrap(), 2);
    assert_eq!(clone.count().unwrap(), 2);
    assert!(source.get("rec-3").is_err());
    assert!(clone.get("rec-2").is_err());
}

/// A canceled push stream leaves no rows registered on the
/// destination; its temp assembly buffer is simply dropped.
#[tokio::test]
async fn property_canceled_stream_leaves_no_destination() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let repo = Arc::new(CollectionRepo::new(config));
    let manager = CloneManager::new(repo.clone());

    repo.create_collection("test", "src", "Thing", vec![], None, Options::default())
        .await
        .unwrap();

    let (tx, rx) = tokio::sync::mpsc::channel::<StreamFrame<stowage_core::clone_manager::PushMetadata>>(4);
    let cancel = CancelToken::new();
    cancel.cancel();
    drop(tx);

    let summary = manager.receive_push(rx, cancel).await.unwrap();
    assert_eq!(summary.status, TransferStatus::Canceled);
    assert!(repo.get_collection("test", "dest").is_err());
}

/// Running the same query twice returns identical order, and
/// paging with (limit, offset) tiles the full ordered result exactly.
#[tokio::test]
async fn property_search_ordering_is_deterministic_and_tiles() {
    let dir = TempDir::new().unwrap();
    let repo = CollectionRepo::new(test_config(&dir));
    let items = repo
        .create_collection("test", "items", "Item", vec![], None, Options::default())
        .await
        .unwrap();
    for i in 0..23 {
        items
            .create(format!("item-{:02}", i), json!({"i": i}).to_string().into_bytes(), None, BTreeMap::new())
            .unwrap();
    }

    let run_a = items.list(0, 100).unwrap();
    let run_b = items.list(0, 100).unwrap();
    let ids_a: Vec<&str> = run_a.iter().map(|r| r.id.as_str()).collect();
    let ids_b: Vec<&str> = run_b.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids_a, ids_b);

    let mut tiled = Vec::new();
    for page_start in (0..23).step_by(7) {
        let page = items.list(page_start, 7).unwrap();
        tiled.extend(page.into_iter().map(|r| r.id));
    }
    assert_eq!(tiled, ids_a);
}
