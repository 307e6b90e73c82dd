//! `CloneManager`: local clone and the streaming remote push/pull
//! protocol built on `Transport` + `FileSystem`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::collection::Collection;
use crate::error::{Result, StowageError};
use crate::fs::{FileData, FileSystem};
use crate::repo::CollectionRepo;
use crate::store::{Options, Store};
use crate::transport::Transport;

/// A cooperative cancellation flag shared between a stream's producer
/// and consumer. Checked at frame boundaries, never mid-chunk.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// First frame of the push protocol.
#[derive(Debug, Clone)]
pub struct PushMetadata {
    pub source_namespace: String,
    pub source_name: String,
    pub dest_namespace: String,
    pub dest_name: String,
    pub include_files: bool,
    pub total_size: u64,
    pub message_type: String,
}

/// First frame of the pull protocol.
#[derive(Debug, Clone)]
pub struct PullMetadata {
    pub namespace: String,
    pub name: String,
    pub include_files: bool,
    pub total_size: u64,
    pub record_count: u64,
    pub file_count: u64,
}

/// One frame of a Push or Pull stream. Chunks are raw bytes of size
/// `<= CHUNK_SIZE`, sent in order; the sender closes the channel to
/// signal completion.
pub enum StreamFrame<M> {
    Metadata(M),
    Chunk(Vec<u8>),
}

/// Final summary returned to both ends of a completed (or canceled)
/// stream.
#[derive(Debug, Clone, Default)]
pub struct TransferSummary {
    pub records_cloned: u64,
    pub files_cloned: u64,
    pub bytes_received: u64,
    pub status: TransferStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TransferStatus {
    #[default]
    Ok,
    Canceled,
}

/// Orchestrates local clone and the streaming remote push/pull flows.
pub struct CloneManager {
    repo: Arc<CollectionRepo>,
}

impl CloneManager {
    pub fn new(repo: Arc<CollectionRepo>) -> Self {
        Self { repo }
    }

    /// Duplicate a Collection within the same process. On any failure
    /// after the database snapshot is taken, the partially created
    /// destination database and files directory are removed
    /// best-effort before the error propagates.
    pub async fn local_clone(
        &self,
        src_namespace: &str,
        src_name: &str,
        dest_namespace: &str,
        dest_name: &str,
        include_files: bool,
    ) -> Result<Arc<Collection>> {
        let source = self.repo.get_collection(src_namespace, src_name)?;
        let config = self.repo.config();
        let dest_db_path = config.collection_db_path(dest_namespace, dest_name);
        let dest_files_root = config.collection_files_root(dest_namespace, dest_name);

        let cleanup = |db: &std::path::Path, files: &std::path::Path| {
            let _ = std::fs::remove_file(db);
            let _ = std::fs::remove_dir_all(files);
        };

        if let Err(e) = Transport::clone_store(&source, &dest_db_path) {
            cleanup(&dest_db_path, &dest_files_root);
            return Err(e);
        }

        if include_files {
            if let Err(e) = copy_files(source.files_root(), &dest_files_root).await {
                cleanup(&dest_db_path, &dest_files_root);
                return Err(e);
            }
        } else if let Err(e) = tokio::fs::create_dir_all(&dest_files_root).await {
            cleanup(&dest_db_path, &dest_files_root);
            return Err(e.into());
        }

        let store = match Store::open(&dest_db_path, source.options) {
            Ok(s) => s,
            Err(e) => {
                cleanup(&dest_db_path, &dest_files_root);
                return Err(e);
            }
        };
        let files = match FileSystem::open(&dest_files_root).await {
            Ok(f) => f,
            Err(e) => {
                cleanup(&dest_db_path, &dest_files_root);
                return Err(e);
            }
        };

        let mut labels = std::collections::BTreeMap::new();
        labels.insert(
            "cloned_from".to_string(),
            format!("{}/{}", src_namespace, src_name),
        );

        let dest_collection = match Collection::new(
            dest_namespace,
            dest_name,
            &source.message_type,
            source.indexed_fields(),
            source.server_endpoint.clone(),
            source.options,
            store,
            files,
        ) {
            Ok(c) => c,
            Err(e) => {
                cleanup(&dest_db_path, &dest_files_root);
                return Err(e);
            }
        };
        dest_collection.modify(None, Some(labels))?;
        let dest_collection = Arc::new(dest_collection);

        if let Err(e) = self
            .repo
            .register(dest_namespace, dest_name, dest_collection.clone())
        {
            cleanup(&dest_db_path, &dest_files_root);
            return Err(e);
        }

        Ok(dest_collection)
    }

    /// Producer side of a push stream: snapshots `source`, then emits a
    /// metadata frame followed by chunk frames over `tx`. Frames are
    /// sent in order; the channel closes on completion or cancellation.
    pub async fn push_collection(
        &self,
        source_namespace: &str,
        source_name: &str,
        dest_namespace: &str,
        dest_name: &str,
        include_files: bool,
        tx: mpsc::Sender<StreamFrame<PushMetadata>>,
        cancel: CancelToken,
    ) -> Result<()> {
        let source = self.repo.get_collection(source_namespace, source_name)?;
        let tmp_snapshot = std::env::temp_dir().join(format!("stowage-push-{}.db", fastrand::u64(..)));
        Transport::clone_store(&source, &tmp_snapshot)?;
        let bytes = if include_files {
            let attachments = gather_attachments(&source).await?;
            Transport::pack_bundle(&tmp_snapshot, &attachments)?
        } else {
            Transport::pack(&tmp_snapshot)?
        };
        let _ = std::fs::remove_file(&tmp_snapshot);

        let metadata = PushMetadata {
            source_namespace: source_namespace.to_string(),
            source_name: source_name.to_string(),
            dest_namespace: dest_namespace.to_string(),
            dest_name: dest_name.to_string(),
            include_files,
            total_size: bytes.len() as u64,
            message_type: source.message_type.clone(),
        };
        if tx.send(StreamFrame::Metadata(metadata)).await.is_err() {
            return Err(StowageError::Canceled("push receiver dropped".to_string()));
        }

        for chunk in Transport::chunks(&bytes) {
            if cancel.is_canceled() {
                return Err(StowageError::Canceled("push canceled by sender".to_string()));
            }
            if tx.send(StreamFrame::Chunk(chunk.to_vec())).await.is_err() {
                return Err(StowageError::Canceled("push receiver dropped".to_string()));
            }
        }
        Ok(())
    }

    /// Consumer side of a push stream: assembles chunks in order into a
    /// temp file, renames atomically, registers the destination
    /// Collection, and returns a summary. Cancellation (or a dropped
    /// sender) removes the temp file and leaves no rows registered.
    pub async fn receive_push(
        &self,
        mut rx: mpsc::Receiver<StreamFrame<PushMetadata>>,
        cancel: CancelToken,
    ) -> Result<TransferSummary> {
        let metadata = match rx.recv().await {
            Some(StreamFrame::Metadata(m)) => m,
            _ => {
                return Err(StowageError::InvalidArgument(
                    "push stream did not begin with a metadata frame".to_string(),
                ))
            }
        };

        let tmp_path = std::env::temp_dir().join(format!("stowage-recv-{}.db", fastrand::u64(..)));
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
            let _ = std::fs::remove_file(&tmp_path);
            return Ok(TransferSummary {
                status: TransferStatus::Canceled,
                ..Default::default()
            });
        }

        let config = self.repo.config();
        let dest_db_path = config.collection_db_path(&metadata.dest_namespace, &metadata.dest_name);
        let dest_files_root = config.collection_files_root(&metadata.dest_namespace, &metadata.dest_name);

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
            &metadata.dest_namespace,
            &metadata.dest_name,
            &metadata.message_type,
            vec![],
            None,
            Options::default(),
            store,
            files,
        )?);
        self.repo
            .register(&metadata.dest_namespace, &metadata.dest_name, collection)?;

        Ok(TransferSummary {
            records_cloned: record_count,
            files_cloned,
            bytes_received: buffer.len() as u64,
            status: TransferStatus::Ok,
        })
    }

    /// Producer side of a pull stream: symmetric to `push_collection`
    /// but framed with `PullMetadata` and addressed by the collection
    /// being fetched rather than a push destination.
    pub async fn pull_collection(
        &self,
        namespace: &str,
        name: &str,
        include_files: bool,
        tx: mpsc::Sender<StreamFrame<PullMetadata>>,
        cancel: CancelToken,
    ) -> Result<()> {
        let source = self.repo.get_collection(namespace, name)?;
        let tmp_snapshot = std::env::temp_dir().join(format!("stowage-pull-{}.db", fastrand::u64(..)));
        Transport::clone_store(&source, &tmp_snapshot)?;
        let record_count = source.count()?;
        let file_count = source.list_files().await?.len() as u64;
        let bytes = if include_files {
            let attachments = gather_attachments(&source).await?;
            Transport::pack_bundle(&tmp_snapshot, &attachments)?
        } else {
            Transport::pack(&tmp_snapshot)?
        };
        let _ = std::fs::remove_file(&tmp_snapshot);

        let metadata = PullMetadata {
            namespace: namespace.to_string(),
            name: name.to_string(),
            include_files,
            total_size: bytes.len() as u64,
            record_count,
            file_count,
        };
        if tx.send(StreamFrame::Metadata(metadata)).await.is_err() {
            return Err(StowageError::Canceled("pull receiver dropped".to_string()));
        }
        for chunk in Transport::chunks(&bytes) {
            if cancel.is_canceled() {
                return Err(StowageError::Canceled("pull canceled by sender".to_string()));
            }
            if tx.send(StreamFrame::Chunk(chunk.to_vec())).await.is_err() {
                return Err(StowageError::Canceled("pull receiver dropped".to_string()));
            }
        }
        Ok(())
    }
}

async fn copy_files(src_root: &std::path::Path, dest_root: &std::path::Path) -> Result<()> {
    let src = FileSystem::open(src_root).await?;
    let dest = FileSystem::open(dest_root).await?;
    for stat in src.list("").await? {
        let data = src.load(&stat.key).await?;
        dest.save(&stat.key, data).await?;
    }
    Ok(())
}

/// Load every attachment under `collection`'s file tree for bundling into
/// a Push/Pull stream.
async fn gather_attachments(collection: &Collection) -> Result<Vec<(String, FileData)>> {
    let files = FileSystem::open(collection.files_root()).await?;
    let mut attachments = Vec::new();
    for stat in files.list("").await? {
        let data = files.load(&stat.key).await?;
        attachments.push((stat.key, data));
    }
    Ok(attachments)
}
