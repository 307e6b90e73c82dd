//! `CollectionRepo`: the in-process registry of Collections.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use base64::Engine;
use chrono::Utc;

use crate::collection::{Collection, CollectionMetadata};
use crate::config::StowageConfig;
use crate::error::{Result, StowageError};
use crate::fs::FileSystem;
use crate::query::{SearchHit, SearchQuery};
use crate::store::{Options, Store};

/// Request shape for `CollectionRepo::discover`.
#[derive(Debug, Clone, Default)]
pub struct DiscoverRequest {
    pub namespace: Option<String>,
    pub message_type: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub page_size: u32,
    pub page_token: Option<String>,
}

/// A single entry returned by `discover`.
#[derive(Debug, Clone)]
pub struct CollectionSummary {
    pub namespace: String,
    pub name: String,
    pub message_type: String,
    pub metadata: CollectionMetadata,
}

/// Result of `discover`: a page of summaries plus the opaque token for
/// the next page (empty when exhausted).
#[derive(Debug, Clone)]
pub struct DiscoverResult {
    pub collections: Vec<CollectionSummary>,
    pub next_page_token: String,
}

/// Selector for `search_collections`: explicit names, everything in one
/// namespace, or every registered Collection.
#[derive(Debug, Clone)]
pub enum CollectionSelector {
    Named(Vec<(String, String)>),
    Namespace(String),
    All,
}

/// A merged search hit tagged with its originating Collection.
#[derive(Debug, Clone)]
pub struct CrossCollectionHit {
    pub namespace: String,
    pub name: String,
    pub hit: SearchHit,
}

/// In-process registry of Collections keyed by `(namespace, name)`. One
/// read-write lock guards the map; per-Collection operations never hold
/// it.
pub struct CollectionRepo {
    config: StowageConfig,
    collections: RwLock<HashMap<(String, String), Arc<Collection>>>,
}

impl CollectionRepo {
    pub fn new(config: StowageConfig) -> Self {
        Self {
            config,
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new Collection, opening its Store and FileSystem at
    /// the paths `config` prescribes. `AlreadyExists` on duplicate
    /// `(namespace, name)`.
    pub async fn create_collection(
        &self,
        namespace: &str,
        name: &str,
        message_type: &str,
        indexed_fields: Vec<String>,
        server_endpoint: Option<String>,
        options: Options,
    ) -> Result<Arc<Collection>> {
        {
            let map = self.collections.read().unwrap();
            if map.contains_key(&(namespace.to_string(), name.to_string())) {
                return Err(StowageError::AlreadyExists(format!(
                    "collection already exists: {}/{}",
                    namespace, name
                )));
            }
        }

        let db_path = self.config.collection_db_path(namespace, name);
        let files_root = self.config.collection_files_root(namespace, name);
        let store = Store::open(db_path, options)?;
        let files = FileSystem::open(files_root).await?;
        let collection = Arc::new(Collection::new(
            namespace,
            name,
            message_type,
            indexed_fields,
            server_endpoint,
            options,
            store,
            files,
        )?);

        let mut map = self.collections.write().unwrap();
        if map.contains_key(&(namespace.to_string(), name.to_string())) {
            return Err(StowageError::AlreadyExists(format!(
                "collection already exists: {}/{}",
                namespace, name
            )));
        }
        map.insert((namespace.to_string(), name.to_string()), collection.clone());
        Ok(collection)
    }

    /// Register an already-constructed Collection (used by CloneManager
    /// and BackupManager after copying artifacts into place).
    pub fn register(&self, namespace: &str, name: &str, collection: Arc<Collection>) -> Result<()> {
        let mut map = self.collections.write().unwrap();
        let key = (namespace.to_string(), name.to_string());
        if map.contains_key(&key) {
            return Err(StowageError::AlreadyExists(format!(
                "collection already exists: {}/{}",
                namespace, name
            )));
        }
        map.insert(key, collection);
        Ok(())
    }

    pub fn get_collection(&self, namespace: &str, name: &str) -> Result<Arc<Collection>> {
        let map = self.collections.read().unwrap();
        map.get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                StowageError::NotFound(format!("collection not found: {}/{}", namespace, name))
            })
    }

    /// Remove a Collection from the registry and close it. Does not
    /// delete on-disk artifacts — callers that want that use
    /// `BackupManager`/`CloneManager` cleanup paths explicitly.
    pub fn drop_collection(&self, namespace: &str, name: &str) -> Result<()> {
        let removed = {
            let mut map = self.collections.write().unwrap();
            map.remove(&(namespace.to_string(), name.to_string()))
        };
        match removed {
            Some(c) => c.close(),
            None => Err(StowageError::NotFound(format!(
                "collection not found: {}/{}",
                namespace, name
            ))),
        }
    }

    /// Filter by namespace, message_type, and label equality (all labels
    /// must match); deterministic order by `(namespace, name)`, paginated
    /// via an opaque offset-encoding page token.
    pub fn discover(&self, req: &DiscoverRequest) -> Result<DiscoverResult> {
        let offset = decode_page_token(req.page_token.as_deref())?;
        let map = self.collections.read().unwrap();

        let mut matches: Vec<CollectionSummary> = map
            .values()
            .filter(|c| {
                req.namespace.as_deref().map(|ns| ns == c.namespace).unwrap_or(true)
            })
            .filter(|c| {
                req.message_type
                    .as_deref()
                    .map(|mt| mt == c.message_type)
                    .unwrap_or(true)
            })
            .filter(|c| {
                let meta = c.metadata();
                req.labels.iter().all(|(k, v)| meta.labels.get(k) == Some(v))
            })
            .map(|c| CollectionSummary {
                namespace: c.namespace.clone(),
                name: c.name.clone(),
                message_type: c.message_type.clone(),
                metadata: c.metadata(),
            })
            .collect();

        matches.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));

        let page_size = if req.page_size == 0 { 100 } else { req.page_size } as usize;
        let offset = offset as usize;
        let page: Vec<CollectionSummary> = matches
            .iter()
            .skip(offset)
            .take(page_size)
            .cloned()
            .collect();
        let next_offset = offset + page.len();
        let next_page_token = if next_offset < matches.len() {
            encode_page_token(next_offset as u64)
        } else {
            String::new()
        };

        Ok(DiscoverResult {
            collections: page,
            next_page_token,
        })
    }

    /// Returns a Collection's advertised endpoint, falling back to the
    /// repo's own default from `StowageConfig`.
    pub fn route(&self, namespace: &str, name: &str) -> Result<String> {
        let collection = self.get_collection(namespace, name)?;
        Ok(collection
            .server_endpoint
            .clone()
            .or_else(|| self.config.default_server_endpoint.clone())
            .unwrap_or_default())
    }

    /// Execute the same search plan against a selected subset of
    /// Collections in parallel, merging results by score then id.
    pub async fn search_collections(
        &self,
        selector: &CollectionSelector,
        query: &SearchQuery,
    ) -> Result<Vec<CrossCollectionHit>> {
        let targets: Vec<Arc<Collection>> = {
            let map = self.collections.read().unwrap();
            match selector {
                CollectionSelector::Named(pairs) => pairs
                    .iter()
                    .filter_map(|(ns, name)| map.get(&(ns.clone(), name.clone())).cloned())
                    .collect(),
                CollectionSelector::Namespace(ns) => map
                    .values()
                    .filter(|c| &c.namespace == ns)
                    .cloned()
                    .collect(),
                CollectionSelector::All => map.values().cloned().collect(),
            }
        };

        let query = query.clone();
        let mut tasks = Vec::with_capacity(targets.len());
        for collection in targets {
            let query = query.clone();
            tasks.push(tokio::task::spawn_blocking(move || {
                let hits = collection.search_hits(&query);
                (collection.namespace.clone(), collection.name.clone(), hits)
            }));
        }

        let mut merged = Vec::new();
        for task in tasks {
            let (namespace, name, hits) = task
                .await
                .map_err(|e| StowageError::Internal(format!("search task join error: {}", e)))?;
            for hit in hits? {
                merged.push(CrossCollectionHit {
                    namespace: namespace.clone(),
                    name: name.clone(),
                    hit,
                });
            }
        }

        merged.sort_by(|a, b| {
            b.hit
                .score
                .partial_cmp(&a.hit.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.hit.id.cmp(&b.hit.id))
        });

        let limit = if query.limit == 0 { 100 } else { query.limit } as usize;
        merged.truncate(limit);
        Ok(merged)
    }

    /// Replace mutable metadata for a Collection; triggers reindex
    /// through `Collection::modify` if `indexed_fields` changed.
    pub fn update_collection_metadata(
        &self,
        namespace: &str,
        name: &str,
        indexed_fields: Option<Vec<String>>,
        labels: Option<BTreeMap<String, String>>,
    ) -> Result<()> {
        let collection = self.get_collection(namespace, name)?;
        collection.modify(indexed_fields, labels)
    }

    pub fn config(&self) -> &StowageConfig {
        &self.config
    }
}

/// Encode an offset as the opaque page token format:
/// base64 of the offset's decimal ASCII. Shared with `stowage-service`'s
/// record `List` pagination so both layers speak the same token.
pub fn encode_page_token(offset: u64) -> String {
    base64::engine::general_purpose::STANDARD.encode(offset.to_string())
}

/// Decode a page token back to an offset; `""` or `None` means offset 0.
pub fn decode_page_token(token: Option<&str>) -> Result<u64> {
    match token {
        None | Some("") => Ok(0),
        Some(t) => {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(t)
                .map_err(|e| StowageError::InvalidArgument(format!("invalid page token: {}", e)))?;
            let s = String::from_utf8(decoded)
                .map_err(|e| StowageError::InvalidArgument(format!("invalid page token: {}", e)))?;
            s.parse::<u64>()
                .map_err(|e| StowageError::InvalidArgument(format!("invalid page token: {}", e)))
        }
    }
}

/// Timestamp helper shared by callers that need "now" without importing
/// `chrono` directly.
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> StowageConfig {
        StowageConfig {
            data_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_get_collection() {
        let dir = tempfile::tempdir().unwrap();
        let repo = CollectionRepo::new(test_config(dir.path()));
        repo.create_collection("acme", "users", "User", vec![], None, Options::default())
            .await
            .unwrap();
        let c = repo.get_collection("acme", "users").unwrap();
        assert_eq!(c.namespace, "acme");
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let dir = tempfile::tempdir().unwrap();
        let repo = CollectionRepo::new(test_config(dir.path()));
        repo.create_collection("acme", "users", "User", vec![], None, Options::default())
            .await
            .unwrap();
        let err = repo
            .create_collection("acme", "users", "User", vec![], None, Options::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "already_exists");
    }

    #[tokio::test]
    async fn test_discover_filters_and_paginates() {
        let dir = tempfile::tempdir().unwrap();
        let repo = CollectionRepo::new(test_config(dir.path()));
        for i in 0..5 {
            repo.create_collection(
                "acme",
                &format!("coll-{}", i),
                "Thing",
                vec![],
                None,
                Options::default(),
            )
            .await
            .unwrap();
        }
        let req = DiscoverRequest {
            namespace: Some("acme".to_string()),
            page_size: 2,
            ..Default::default()
        };
        let page1 = repo.discover(&req).unwrap();
        assert_eq!(page1.collections.len(), 2);
        assert!(!page1.next_page_token.is_empty());

        let req2 = DiscoverRequest {
            namespace: Some("acme".to_string()),
            page_size: 2,
            page_token: Some(page1.next_page_token),
            ..Default::default()
        };
        let page2 = repo.discover(&req2).unwrap();
        assert_eq!(page2.collections.len(), 2);
        assert_ne!(page1.collections[0].name, page2.collections[0].name);
    }

    #[tokio::test]
    async fn test_route_falls_back_to_default_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.default_server_endpoint = Some("grpc://fallback:9000".to_string());
        let repo = CollectionRepo::new(config);
        repo.create_collection("acme", "users", "User", vec![], None, Options::default())
            .await
            .unwrap();
        assert_eq!(repo.route("acme", "users").unwrap(), "grpc://fallback:9000");
    }

    #[tokio::test]
    async fn test_route_unknown_collection_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let repo = CollectionRepo::new(test_config(dir.path()));
        let err = repo.route("acme", "missing").unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
