//! `Collection`: binds one Store and one FileSystem together with
//! metadata, and enforces record-level invariants before delegating.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::Utc;

use crate::error::{Result, StowageError};
use crate::fs::{FileData, FileStat, FileSystem};
use crate::query::{SearchHit, SearchQuery};
use crate::record::Record;
use crate::store::{Options, Store};

/// Mutable, caller-visible metadata for a Collection.
#[derive(Debug, Clone)]
pub struct CollectionMetadata {
    pub labels: BTreeMap<String, String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A named container for records plus their file attachments.
pub struct Collection {
    pub namespace: String,
    pub name: String,
    pub message_type: String,
    pub server_endpoint: Option<String>,
    pub options: Options,
    indexed_fields: RwLock<Vec<String>>,
    metadata: RwLock<CollectionMetadata>,
    store: Store,
    files: FileSystem,
}

impl Collection {
    /// Bind a freshly opened Store and FileSystem under metadata.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        message_type: impl Into<String>,
        indexed_fields: Vec<String>,
        server_endpoint: Option<String>,
        options: Options,
        store: Store,
        files: FileSystem,
    ) -> Result<Self> {
        let namespace = namespace.into();
        let name = name.into();
        if namespace.is_empty() || name.is_empty() {
            return Err(StowageError::InvalidArgument(
                "collection namespace and name must be non-empty".to_string(),
            ));
        }
        let now = Utc::now().timestamp();
        if !indexed_fields.is_empty() {
            store.reindex(&indexed_fields)?;
        }
        Ok(Self {
            namespace,
            name,
            message_type: message_type.into(),
            server_endpoint,
            options,
            indexed_fields: RwLock::new(indexed_fields),
            metadata: RwLock::new(CollectionMetadata {
                labels: BTreeMap::new(),
                created_at: now,
                updated_at: now,
            }),
            store,
            files,
        })
    }

    pub fn metadata(&self) -> CollectionMetadata {
        self.metadata.read().unwrap().clone()
    }

    pub fn indexed_fields(&self) -> Vec<String> {
        self.indexed_fields.read().unwrap().clone()
    }

    /// Replace mutable metadata; reindexes the Store when `indexed_fields`
    /// actually changed.
    pub fn modify(
        &self,
        new_indexed_fields: Option<Vec<String>>,
        new_labels: Option<BTreeMap<String, String>>,
    ) -> Result<()> {
        if let Some(fields) = new_indexed_fields {
            let changed = *self.indexed_fields.read().unwrap() != fields;
            if changed {
                self.store.reindex(&fields)?;
                *self.indexed_fields.write().unwrap() = fields;
            }
        }
        let mut meta = self.metadata.write().unwrap();
        if let Some(labels) = new_labels {
            meta.labels = labels;
        }
        meta.updated_at = Utc::now().timestamp();
        Ok(())
    }

    /// Insert a new record: stamps timestamps, derives the JSON
    /// projection (done inside `Record::new`), and delegates to the
    /// Store. `id` must be non-empty.
    pub fn create(
        &self,
        id: impl Into<String>,
        payload: Vec<u8>,
        data_uri: Option<String>,
        labels: BTreeMap<String, String>,
    ) -> Result<Record> {
        let id = id.into();
        if id.is_empty() {
            return Err(StowageError::InvalidArgument(
                "record id must not be empty".to_string(),
            ));
        }
        let now = Utc::now().timestamp();
        let mut record = Record::new(id, payload, data_uri, labels);
        record.created_at = now;
        record.updated_at = now;
        self.store.create(&record)?;
        Ok(record)
    }

    pub fn get(&self, id: &str) -> Result<Record> {
        self.store.get(id)
    }

    /// Replace payload/projection/data_uri/labels; `created_at` preserved,
    /// `updated_at` bumped to now.
    pub fn update(
        &self,
        id: &str,
        payload: Vec<u8>,
        data_uri: Option<String>,
        labels: BTreeMap<String, String>,
    ) -> Result<Record> {
        let now = Utc::now().timestamp();
        self.store.update(id, payload, data_uri, labels, now)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(id)
    }

    pub fn list(&self, offset: u32, limit: u32) -> Result<Vec<Record>> {
        self.store.list(offset, limit)
    }

    pub fn count(&self) -> Result<u64> {
        self.store.count()
    }

    pub fn search(&self, query: &SearchQuery) -> Result<Vec<(Record, f64)>> {
        self.store.search(query)
    }

    /// Convenience projection of `search` into score-only hits, used by
    /// `CollectionRepo::search_collections` when merging across many
    /// Collections.
    pub fn search_hits(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        Ok(self
            .search(query)?
            .into_iter()
            .map(|(r, score)| SearchHit { id: r.id, score })
            .collect())
    }

    pub fn checkpoint(&self) -> Result<()> {
        self.store.checkpoint()
    }

    pub fn snapshot(&self, dest_path: &std::path::Path) -> Result<()> {
        self.store.snapshot(dest_path)
    }

    pub fn store_path(&self) -> &std::path::Path {
        self.store.path()
    }

    pub fn files_root(&self) -> &std::path::Path {
        self.files.root()
    }

    /// Save a file attachment. When `data` carries a `Uri`, the URI is
    /// treated as a path within this same FileSystem's root and copied
    /// from there rather than fetched externally.
    pub async fn save_file(&self, path: &str, data: FileData) -> Result<()> {
        match data {
            FileData::Uri(ref uri) if PathBuf::from(uri).is_relative() => {
                let source = self.files.load(uri).await?;
                self.files.save(path, source).await
            }
            other => self.files.save(path, other).await,
        }
    }

    pub async fn get_file(&self, path: &str) -> Result<FileData> {
        self.files.load(path).await
    }

    pub async fn delete_file(&self, path: &str) -> Result<()> {
        self.files.delete(path).await
    }

    pub async fn list_files(&self) -> Result<Vec<FileStat>> {
        self.files.list("").await
    }

    /// Idempotent close. The Store's connection closes when the last
    /// `Arc<Collection>` referencing it is dropped; this just forces a
    /// WAL checkpoint first so the on-disk file is immediately coherent.
    pub fn close(&self) -> Result<()> {
        match self.store.checkpoint() {
            Ok(()) => Ok(()),
            Err(_) => Ok(()),
        }
    }
}
