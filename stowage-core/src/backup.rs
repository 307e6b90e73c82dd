//! `BackupManager`: versioned snapshot catalogue with its own dedicated
//! metadata store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::config::StowageConfig;
use crate::error::{Result, StowageError};
use crate::fs::FileSystem;
use crate::repo::CollectionRepo;
use crate::store::{open_readonly_for_check, Options, Store};
use crate::transport::Transport;

/// A named point-in-time snapshot of a Collection.
#[derive(Debug, Clone)]
pub struct BackupMetadata {
    pub backup_id: String,
    pub namespace: String,
    pub name: String,
    pub timestamp: i64,
    pub size_bytes: u64,
    pub record_count: u64,
    pub file_count: u64,
    pub includes_files: bool,
    pub storage_path: String,
    pub storage_type: String,
    pub metadata: BTreeMap<String, String>,
}

/// `BackupManager::backup_collection` request.
///
/// `dest_path` lets the caller choose where the snapshot artifact lands;
/// when absent, `BackupManager` computes `<backup_dir>/<backup_id>.db`.
/// Attachments (when `include_files`) always land at `<dest_path>.files/`.
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub namespace: String,
    pub name: String,
    pub include_files: bool,
    pub metadata: BTreeMap<String, String>,
    pub dest_path: Option<PathBuf>,
}

/// `BackupManager::list_backups` request.
#[derive(Debug, Clone, Default)]
pub struct ListBackupsRequest {
    pub collection: Option<(String, String)>,
    pub namespace: Option<String>,
    pub since_timestamp: Option<i64>,
    pub limit: u32,
}

/// `BackupManager::list_backups` response: a page plus an unfiltered
/// total.
#[derive(Debug, Clone)]
pub struct ListBackupsResult {
    pub backups: Vec<BackupMetadata>,
    pub total_count: u64,
}

/// `BackupManager::restore_backup` request.
#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub backup_id: String,
    pub dest_namespace: String,
    pub dest_name: String,
    pub overwrite: bool,
}

/// `BackupManager::restore_backup` response.
#[derive(Debug, Clone)]
pub struct RestoreSummary {
    pub records_restored: u64,
}

/// `BackupManager::verify_backup` response.
#[derive(Debug, Clone)]
pub struct VerifyResult {
    pub is_valid: bool,
    pub error_message: Option<String>,
}

/// Dedicated rusqlite-backed catalogue for `BackupMetadata` rows. Kept
/// separate from `store::Store` because its schema (one flat `backups`
/// table) is nothing like the records/FTS schema — the same separation
/// of concerns `euank-ai-anki-backup-tool`'s `BackupRepository` draws
/// between backup bookkeeping and the payload it points at.
struct BackupMetadataStore {
    conn: Mutex<Connection>,
}

impl BackupMetadataStore {
    fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS backups (
                backup_id TEXT PRIMARY KEY,
                namespace TEXT NOT NULL,
                name TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL,
                record_count INTEGER NOT NULL,
                file_count INTEGER NOT NULL,
                includes_files INTEGER NOT NULL,
                storage_path TEXT NOT NULL,
                storage_type TEXT NOT NULL,
                metadata TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_backups_ns_name ON backups(namespace, name);
            CREATE INDEX IF NOT EXISTS idx_backups_timestamp ON backups(timestamp);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, meta: &BackupMetadata) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let metadata_json = serde_json::to_string(&meta.metadata)
            .map_err(|e| StowageError::Internal(format!("failed to serialize metadata: {}", e)))?;
        conn.execute(
            "INSERT INTO backups (backup_id, namespace, name, timestamp, size_bytes, record_count,
             file_count, includes_files, storage_path, storage_type, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                meta.backup_id,
                meta.namespace,
                meta.name,
                meta.timestamp,
                meta.size_bytes as i64,
                meta.record_count as i64,
                meta.file_count as i64,
                meta.includes_files as i64,
                meta.storage_path,
                meta.storage_type,
                metadata_json,
            ],
        )?;
        Ok(())
    }

    fn get(&self, backup_id: &str) -> Result<BackupMetadata> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT backup_id, namespace, name, timestamp, size_bytes, record_count, file_count,
             includes_files, storage_path, storage_type, metadata FROM backups WHERE backup_id = ?1",
            params![backup_id],
            row_to_metadata,
        )
        .optional()?
        .ok_or_else(|| StowageError::NotFound(format!("backup not found: {}", backup_id)))
    }

    fn list(&self, req: &ListBackupsRequest) -> Result<ListBackupsResult> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT backup_id, namespace, name, timestamp, size_bytes, record_count, file_count,
             includes_files, storage_path, storage_type, metadata
             FROM backups ORDER BY timestamp DESC",
        )?;
        let rows = stmt.query_map([], row_to_metadata)?;
        let all: Vec<BackupMetadata> = rows.collect::<std::result::Result<Vec<_>, _>>()?;

        let filtered: Vec<BackupMetadata> = all
            .into_iter()
            .filter(|b| {
                req.collection
                    .as_ref()
                    .map(|(ns, name)| &b.namespace == ns && &b.name == name)
                    .unwrap_or(true)
            })
            .filter(|b| req.namespace.as_deref().map(|ns| ns == b.namespace).unwrap_or(true))
            .filter(|b| req.since_timestamp.map(|ts| b.timestamp >= ts).unwrap_or(true))
            .collect();

        let total_count = filtered.len() as u64;
        let limit = if req.limit == 0 { filtered.len() } else { req.limit as usize };
        let backups = filtered.into_iter().take(limit).collect();

        Ok(ListBackupsResult { backups, total_count })
    }

    fn delete(&self, backup_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute("DELETE FROM backups WHERE backup_id = ?1", params![backup_id])?;
        if changed == 0 {
            return Err(StowageError::NotFound(format!("backup not found: {}", backup_id)));
        }
        Ok(())
    }
}

fn row_to_metadata(row: &rusqlite::Row) -> rusqlite::Result<BackupMetadata> {
    let metadata_text: String = row.get(10)?;
    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_text).unwrap_or_default();
    let includes_files: i64 = row.get(7)?;
    Ok(BackupMetadata {
        backup_id: row.get(0)?,
        namespace: row.get(1)?,
        name: row.get(2)?,
        timestamp: row.get(3)?,
        size_bytes: row.get::<_, i64>(4)? as u64,
        record_count: row.get::<_, i64>(5)? as u64,
        file_count: row.get::<_, i64>(6)? as u64,
        includes_files: includes_files != 0,
        storage_path: row.get(8)?,
        storage_type: row.get(9)?,
        metadata,
    })
}

/// Reject an empty or obviously malformed caller-supplied destination
/// before it is used to build a filesystem path.
fn validate_dest_path(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(StowageError::InvalidArgument("dest_path must not be empty".to_string()));
    }
    Ok(path.to_path_buf())
}

/// Derive the deterministic `backup-<16 hex>` id from namespace, name,
/// and a unix timestamp.
pub fn compute_backup_id(namespace: &str, name: &str, timestamp: i64) -> String {
    let input = format!("{}/{}@{}", namespace, name, timestamp);
    let digest = Sha256::digest(input.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("backup-{}", &hex[..16])
}

/// Versioned snapshot catalogue. All mutating methods serialize through
/// a single write-lock; list and verify take a read-lock.
pub struct BackupManager {
    repo: std::sync::Arc<CollectionRepo>,
    backup_dir: PathBuf,
    metadata_store: BackupMetadataStore,
    lock: RwLock<()>,
}

impl BackupManager {
    pub fn new(repo: std::sync::Arc<CollectionRepo>, config: &StowageConfig) -> Result<Self> {
        let metadata_store = BackupMetadataStore::open(&config.backup_dir.join("metadata.db"))?;
        Ok(Self {
            repo,
            backup_dir: config.backup_dir.clone(),
            metadata_store,
            lock: RwLock::new(()),
        })
    }

    pub async fn backup_collection(&self, req: BackupRequest, now: i64) -> Result<BackupMetadata> {
        let _guard = self.lock.write().unwrap();

        let collection = self.repo.get_collection(&req.namespace, &req.name)?;
        let backup_id = compute_backup_id(&req.namespace, &req.name, now);
        let dest_path = match &req.dest_path {
            Some(p) => validate_dest_path(p)?,
            None => self.backup_dir.join(format!("{}.db", backup_id)),
        };
        if dest_path.exists() {
            return Err(StowageError::AlreadyExists(format!(
                "backup destination already exists: {}",
                dest_path.display()
            )));
        }
        let files_sibling = PathBuf::from(format!("{}.files", dest_path.display()));

        let cleanup = |db: &Path, files: &Path| {
            let _ = std::fs::remove_file(db);
            let _ = std::fs::remove_dir_all(files);
        };

        if let Err(e) = Transport::clone_store(&collection, &dest_path) {
            cleanup(&dest_path, &files_sibling);
            return Err(e);
        }

        let mut file_count = 0u64;
        if req.include_files {
            if let Err(e) = copy_files_into(collection.files_root(), &files_sibling).await {
                cleanup(&dest_path, &files_sibling);
                return Err(e);
            }
            file_count = walkdir::WalkDir::new(&files_sibling)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .count() as u64;
        }

        let record_count = match Store::open(&dest_path, Options::default()).and_then(|s| s.count()) {
            Ok(n) => n,
            Err(e) => {
                cleanup(&dest_path, &files_sibling);
                return Err(e);
            }
        };

        let mut size_bytes = std::fs::metadata(&dest_path).map(|m| m.len()).unwrap_or(0);
        if req.include_files {
            size_bytes += dir_size(&files_sibling);
        }

        let meta = BackupMetadata {
            backup_id,
            namespace: req.namespace,
            name: req.name,
            timestamp: now,
            size_bytes,
            record_count,
            file_count,
            includes_files: req.include_files,
            storage_path: dest_path.to_string_lossy().to_string(),
            storage_type: "local".to_string(),
            metadata: req.metadata,
        };

        if let Err(e) = self.metadata_store.insert(&meta) {
            cleanup(&dest_path, &files_sibling);
            return Err(e);
        }

        Ok(meta)
    }

    pub fn list_backups(&self, req: &ListBackupsRequest) -> Result<ListBackupsResult> {
        let _guard = self.lock.read().unwrap();
        self.metadata_store.list(req)
    }

    pub async fn restore_backup(&self, req: RestoreRequest) -> Result<RestoreSummary> {
        let _guard = self.lock.write().unwrap();

        let meta = self.metadata_store.get(&req.backup_id)?;
        let storage_path = PathBuf::from(&meta.storage_path);
        if !open_readonly_for_check(&storage_path)? {
            return Err(StowageError::IntegrityError(format!(
                "backup {} failed integrity check",
                req.backup_id
            )));
        }

        let already_exists = self
            .repo
            .get_collection(&req.dest_namespace, &req.dest_name)
            .is_ok();
        if already_exists {
            if !req.overwrite {
                return Err(StowageError::AlreadyExists(format!(
                    "collection already exists: {}/{}",
                    req.dest_namespace, req.dest_name
                )));
            }
            self.repo.drop_collection(&req.dest_namespace, &req.dest_name)?;
        }

        let config = self.repo.config();
        let dest_db_path = config.collection_db_path(&req.dest_namespace, &req.dest_name);
        let dest_files_root = config.collection_files_root(&req.dest_namespace, &req.dest_name);

        let cleanup = |db: &Path, files: &Path| {
            let _ = std::fs::remove_file(db);
            let _ = std::fs::remove_dir_all(files);
        };

        if let Some(parent) = dest_db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Err(e) = std::fs::copy(&storage_path, &dest_db_path) {
            cleanup(&dest_db_path, &dest_files_root);
            return Err(e.into());
        }

        if meta.includes_files {
            let files_sibling = PathBuf::from(format!("{}.files", meta.storage_path));
            if let Err(e) = copy_files_into(&files_sibling, &dest_files_root).await {
                cleanup(&dest_db_path, &dest_files_root);
                return Err(e);
            }
        } else if let Err(e) = tokio::fs::create_dir_all(&dest_files_root).await {
            cleanup(&dest_db_path, &dest_files_root);
            return Err(e.into());
        }

        let store = match Store::open(&dest_db_path, Options::default()) {
            Ok(s) => s,
            Err(e) => {
                cleanup(&dest_db_path, &dest_files_root);
                return Err(e);
            }
        };
        let record_count = match store.count() {
            Ok(n) => n,
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

        let mut labels = BTreeMap::new();
        labels.insert("restored_from_backup".to_string(), meta.backup_id.clone());
        labels.insert(
            "original_collection".to_string(),
            format!("{}/{}", meta.namespace, meta.name),
        );
        labels.insert("backup_timestamp".to_string(), meta.timestamp.to_string());

        let collection = match crate::collection::Collection::new(
            &req.dest_namespace,
            &req.dest_name,
            "",
            vec![],
            None,
            Options::default(),
            store,
            files,
        ) {
            Ok(c) => c,
            Err(e) => {
                cleanup(&dest_db_path, &dest_files_root);
                return Err(e);
            }
        };
        collection.modify(None, Some(labels))?;

        self.repo
            .register(&req.dest_namespace, &req.dest_name, std::sync::Arc::new(collection))?;

        Ok(RestoreSummary {
            records_restored: record_count,
        })
    }

    pub fn delete_backup(&self, backup_id: &str) -> Result<u64> {
        let _guard = self.lock.write().unwrap();
        let meta = self.metadata_store.get(backup_id)?;
        let storage_path = PathBuf::from(&meta.storage_path);
        let files_sibling = PathBuf::from(format!("{}.files", meta.storage_path));

        let bytes_freed = meta.size_bytes;
        let _ = std::fs::remove_file(&storage_path);
        let _ = std::fs::remove_dir_all(&files_sibling);
        self.metadata_store.delete(backup_id)?;
        Ok(bytes_freed)
    }

    pub fn verify_backup(&self, backup_id: &str) -> Result<VerifyResult> {
        let _guard = self.lock.read().unwrap();
        let meta = self.metadata_store.get(backup_id)?;
        let storage_path = PathBuf::from(&meta.storage_path);

        if !storage_path.exists() {
            return Ok(VerifyResult {
                is_valid: false,
                error_message: Some(format!("backup artifact missing: {}", storage_path.display())),
            });
        }
        match open_readonly_for_check(&storage_path) {
            Ok(true) => {}
            Ok(false) => {
                return Ok(VerifyResult {
                    is_valid: false,
                    error_message: Some("integrity check failed".to_string()),
                })
            }
            Err(e) => {
                return Ok(VerifyResult {
                    is_valid: false,
                    error_message: Some(e.to_string()),
                })
            }
        }
        if meta.includes_files {
            let files_sibling = PathBuf::from(format!("{}.files", meta.storage_path));
            if !files_sibling.exists() {
                return Ok(VerifyResult {
                    is_valid: false,
                    error_message: Some(format!(
                        "attachments sibling missing: {}",
                        files_sibling.display()
                    )),
                });
            }
        }
        Ok(VerifyResult {
            is_valid: true,
            error_message: None,
        })
    }
}

async fn copy_files_into(src_root: &Path, dest_root: &Path) -> Result<()> {
    let src = FileSystem::open(src_root).await?;
    let dest = FileSystem::open(dest_root).await?;
    for stat in src.list("").await? {
        let data = src.load(&stat.key).await?;
        dest.save(&stat.key, data).await?;
    }
    Ok(())
}

fn dir_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
