//! In-process Push/Pull simulation: wires a producer and consumer from
//! `stowage_core::clone_manager` together over a channel, the way an
//! external transport would once it frames `StreamFrame` over the wire
//! (framing that over an actual wire format is left to the embedder).

use std::sync::Arc;

use tokio::sync::mpsc;

use stowage_core::clone_manager::{CancelToken, CloneManager, PullMetadata, StreamFrame, TransferSummary};
use stowage_core::collection::Collection;
use stowage_core::fs::FileSystem;
use stowage_core::repo::CollectionRepo;
use stowage_core::store::{Options, Store};
use stowage_core::transport::Transport;
use stowage_core::StowageError;

use crate::status::{Status, StatusCode};

const CHANNEL_CAPACITY: usize = 8;

/// Push `source` to `dest` entirely within this process: spawns the
/// producer task, runs the consumer inline, and returns the transfer
/// summary once both sides finish.
pub async fn simulate_push(
    clones: Arc<CloneManager>,
    source_namespace: String,
    source_name: String,
    dest_namespace: String,
    dest_name: String,
    include_files: bool,
    cancel: CancelToken,
) -> Result<TransferSummary, Status> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let producer_clones = clones.clone();
    let producer_cancel = cancel.clone();
    let producer = tokio::spawn(async move {
        producer_clones
            .push_collection(
                &source_namespace,
                &source_name,
                &dest_namespace,
                &dest_name,
                include_files,
                tx,
                producer_cancel,
            )
            .await
    });

    let consumer_result = clones.receive_push(rx, cancel).await;

    match producer.await {
        Ok(Ok(())) => consumer_result.map_err(Into::into),
        Ok(Err(e)) => {
            // A canceled or receiver-dropped producer is not itself the
            // error we report — `receive_push`'s own outcome is.
            if matches!(e, StowageError::Canceled(_)) {
                consumer_result.map_err(Into::into)
            } else {
                Err((&e).into())
            }
        }
        Err(join_err) => Err(Status {
            code: StatusCode::Internal,
            message: format!("push producer task panicked: {}", join_err),
        }),
    }
}

/// Pull `namespace/name` from `repo` into `dest_namespace/dest_name`,
/// entirely within this process. `stowage_core::clone_manager` only
/// implements the producer half of Pull (the consumer lives wherever
/// the fetching node is), so the consumer side is assembled here the
/// same way `CloneManager::receive_push` assembles a push.
pub async fn simulate_pull(
    clones: Arc<CloneManager>,
    repo: Arc<CollectionRepo>,
    namespace: String,
    name: String,
    dest_namespace: String,
    dest_name: String,
    include_files: bool,
    cancel: CancelToken,
) -> Result<TransferSummary, Status> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let producer_cancel = cancel.clone();
    let producer = tokio::spawn(async move {
        clones
            .pull_collection(&namespace, &name, include_files, tx, producer_cancel)
            .await
    });

    let consumer_result = receive_pull(repo, rx, cancel, dest_namespace, dest_name).await;

    match producer.await {
        Ok(Ok(())) => consumer_result.map_err(Into::into),
        Ok(Err(e)) => {
            if matches!(e, StowageError::Canceled(_)) {
                consumer_result.map_err(Into::into)
            } else {
                Err((&e).into())
            }
        }
        Err(join_err) => Err(Status {
            code: StatusCode::Internal,
            message: format!("pull producer task panicked: {}", join_err),
        }),
    }
}

async fn receive_pull(
    repo: Arc<CollectionRepo>,
    mut rx: mpsc::Receiver<StreamFrame<PullMetadata>>,
    cancel: CancelToken,
    dest_namespace: String,
    dest_name: String,
) -> stowage_core::Result<TransferSummary> {
    let metadata = match rx.recv().await {
        Some(StreamFrame::Metadata(m)) => m,
        _ => {
            return Err(StowageError::InvalidArgument(
                "pull stream did not begin with a metadata frame".to_string(),
            ))
        }
    };

    let mut buffer = Vec::with_capacity(metadata.total_size as usize);
    let mut canceled = false;

    while let Some(frame) = rx.recv().await {
        if cancel.is_canceled() {
            canceled = true;
            break;
        }
        match frame {
            StreamFrame::Chunk(bytes) => buffer.extend_from_slice(&bytes),
            StreamFrame::Metadata(_) => {
                return Err(StowageError::InvalidArgument(
                    "unexpected second metadata frame".to_string(),
                ))
            }
        }
    }

    if canceled {
        return Ok(TransferSummary {
            status: stowage_core::clone_manager::TransferStatus::Canceled,
            ..Default::default()
        });
    }

    let config = repo.config();
    let dest_db_path = config.collection_db_path(&dest_namespace, &dest_name);
    let dest_files_root = config.collection_files_root(&dest_namespace, &dest_name);
    tokio::fs::create_dir_all(&dest_files_root).await?;
    let files = FileSystem::open(&dest_files_root).await?;

    let files_cloned = if metadata.include_files {
        let attachments = Transport::unpack_bundle(&buffer, &dest_db_path)?;
        for (key, data) in &attachments {
            files.save(key, data.clone()).await?;
        }
        attachments.len() as u64
    } else {
        Transport::unpack(&buffer, &dest_db_path)?;
        0
    };

    let store = Store::open(&dest_db_path, Options::default())?;
    let record_count = store.count()?;
    let collection = Arc::new(Collection::new(
        &dest_namespace,
        &dest_name,
        "",
        vec![],
        None,
        Options::default(),
        store,
        files,
    )?);
    repo.register(&dest_namespace, &dest_name, collection)?;

    Ok(TransferSummary {
        records_cloned: record_count,
        files_cloned,
        bytes_received: buffer.len() as u64,
        status: stowage_core::clone_manager::TransferStatus::Ok,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_core::StowageConfig;
    use tempfile::TempDir;

    fn test_repo(dir: &TempDir) -> Arc<CollectionRepo> {
        let mut config = StowageConfig::default();
        config.data_dir = dir.path().join("data");
        config.backup_dir = dir.path().join("backups");
        Arc::new(CollectionRepo::new(config))
    }

    #[tokio::test]
    async fn push_transfers_records_between_collections() {
        let dir = TempDir::new().unwrap();
        let repo = test_repo(&dir);
        let clones = Arc::new(CloneManager::new(repo.clone()));

        let source = repo
            .create_collection("ns", "src", "Thing", vec![], None, Options::default())
            .await
            .unwrap();
        source.create("rec-1", b"{}".to_vec(), None, Default::default()).unwrap();

        let summary = simulate_push(
            clones,
            "ns".to_string(),
            "src".to_string(),
            "ns".to_string(),
            "dst".to_string(),
            false,
            CancelToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.records_cloned, 1);
        assert!(repo.get_collection("ns", "dst").is_ok());
    }

    #[tokio::test]
    async fn pull_transfers_records_into_a_fresh_destination() {
        let dir = TempDir::new().unwrap();
        let repo = test_repo(&dir);
        let clones = Arc::new(CloneManager::new(repo.clone()));

        let source = repo
            .create_collection("ns", "src", "Thing", vec![], None, Options::default())
            .await
            .unwrap();
        source.create("rec-1", b"{}".to_vec(), None, Default::default()).unwrap();
        source.create("rec-2", b"{}".to_vec(), None, Default::default()).unwrap();

        let summary = simulate_pull(
            clones,
            repo.clone(),
            "ns".to_string(),
            "src".to_string(),
            "ns".to_string(),
            "mirror".to_string(),
            false,
            CancelToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.records_cloned, 2);
        assert!(repo.get_collection("ns", "mirror").is_ok());
    }

    #[tokio::test]
    async fn pull_with_include_files_materializes_attachments() {
        let dir = TempDir::new().unwrap();
        let repo = test_repo(&dir);
        let clones = Arc::new(CloneManager::new(repo.clone()));

        let source = repo
            .create_collection("ns", "src", "Thing", vec![], None, Options::default())
            .await
            .unwrap();
        source.create("rec-1", b"{}".to_vec(), None, Default::default()).unwrap();
        source
            .save_file("note.txt", stowage_core::fs::FileData::Inline(b"hello attachment".to_vec()))
            .await
            .unwrap();

        let summary = simulate_pull(
            clones,
            repo.clone(),
            "ns".to_string(),
            "src".to_string(),
            "ns".to_string(),
            "mirror-files".to_string(),
            true,
            CancelToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.files_cloned, 1);
        let dest = repo.get_collection("ns", "mirror-files").unwrap();
        let stats = dest.list_files().await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].key, "note.txt");
    }

    #[tokio::test]
    async fn canceled_push_leaves_no_destination_registered() {
        let dir = TempDir::new().unwrap();
        let repo = test_repo(&dir);
        let clones = Arc::new(CloneManager::new(repo.clone()));

        let source = repo
            .create_collection("ns", "src", "Thing", vec![], None, Options::default())
            .await
            .unwrap();
        source.create("rec-1", b"{}".to_vec(), None, Default::default()).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();

        let summary = simulate_push(
            clones,
            "ns".to_string(),
            "src".to_string(),
            "ns".to_string(),
            "dst".to_string(),
            false,
            cancel,
        )
        .await
        .unwrap();

        assert_eq!(summary.status, stowage_core::clone_manager::TransferStatus::Canceled);
        assert!(repo.get_collection("ns", "dst").is_err());
    }
}
