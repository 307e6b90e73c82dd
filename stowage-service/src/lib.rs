//! Thin RPC-shaped surface over `stowage-core`. This crate never speaks
//! a concrete wire protocol — it exposes plain
//! async methods that an external transport can frame however it likes,
//! and is the single place a `StowageError` becomes a `Status`.

pub mod dto;
pub mod page_token;
pub mod status;
pub mod streaming;

use std::sync::Arc;

use stowage_core::backup::{BackupRequest, ListBackupsRequest, RestoreRequest};
use stowage_core::repo::now_unix;
use stowage_core::store::Options;
use stowage_core::{BackupManager, CloneManager, CollectionRepo, StowageConfig};

use dto::*;
use status::{Status, StatusCode};

/// Binds a `CollectionRepo`, `BackupManager`, and `CloneManager` behind
/// the DTO surface names.
pub struct ServiceSurface {
    pub repo: Arc<CollectionRepo>,
    pub backups: BackupManager,
    pub clones: Arc<CloneManager>,
}

impl ServiceSurface {
    pub fn new(config: StowageConfig) -> stowage_core::Result<Self> {
        let repo = Arc::new(CollectionRepo::new(config.clone()));
        let backups = BackupManager::new(repo.clone(), &config)?;
        let clones = Arc::new(CloneManager::new(repo.clone()));
        Ok(Self { repo, backups, clones })
    }

    /// Shared handle for spawning the producer half of a Push/Pull
    /// simulation on its own task (see `streaming::simulate_push`).
    pub fn clones_handle(&self) -> Arc<CloneManager> {
        self.clones.clone()
    }

    /// Shared handle for registering a Pull's destination Collection
    /// once its consumer assembles the transferred bytes.
    pub fn repo_handle(&self) -> Arc<CollectionRepo> {
        self.repo.clone()
    }

    // ---- Record RPCs -----------------------------------------------

    pub async fn create_record(&self, req: CreateRequest) -> RecordResponse {
        match self.repo.get_collection(&req.namespace, &req.name) {
            Ok(collection) => {
                match collection.create(req.id, req.payload, req.data_uri, req.labels) {
                    Ok(record) => RecordResponse {
                        status: Status::ok(),
                        record: Some(record.into()),
                    },
                    Err(e) => RecordResponse {
                        status: (&e).into(),
                        record: None,
                    },
                }
            }
            Err(e) => RecordResponse {
                status: (&e).into(),
                record: None,
            },
        }
    }

    pub async fn get_record(&self, req: GetRequest) -> RecordResponse {
        let result = self
            .repo
            .get_collection(&req.namespace, &req.name)
            .and_then(|c| c.get(&req.id));
        match result {
            Ok(record) => RecordResponse {
                status: Status::ok(),
                record: Some(record.into()),
            },
            Err(e) => RecordResponse {
                status: (&e).into(),
                record: None,
            },
        }
    }

    pub async fn update_record(&self, req: UpdateRequest) -> RecordResponse {
        let result = self
            .repo
            .get_collection(&req.namespace, &req.name)
            .and_then(|c| c.update(&req.id, req.payload, req.data_uri, req.labels));
        match result {
            Ok(record) => RecordResponse {
                status: Status::ok(),
                record: Some(record.into()),
            },
            Err(e) => RecordResponse {
                status: (&e).into(),
                record: None,
            },
        }
    }

    pub async fn delete_record(&self, req: DeleteRequest) -> StatusResponse {
        let result = self
            .repo
            .get_collection(&req.namespace, &req.name)
            .and_then(|c| c.delete(&req.id));
        StatusResponse {
            status: match result {
                Ok(()) => Status::ok(),
                Err(e) => (&e).into(),
            },
        }
    }

    pub async fn list_records(&self, req: ListRequest) -> ListResponse {
        let collection = match self.repo.get_collection(&req.namespace, &req.name) {
            Ok(c) => c,
            Err(e) => {
                return ListResponse {
                    status: (&e).into(),
                    records: Vec::new(),
                    next_page_token: String::new(),
                }
            }
        };
        let offset = match page_token::decode(&req.page_token) {
            Ok(o) => o,
            Err(status) => {
                return ListResponse {
                    status,
                    records: Vec::new(),
                    next_page_token: String::new(),
                }
            }
        };
        let limit = if req.page_size == 0 { 100 } else { req.page_size };
        match collection.list(offset as u32, limit) {
            Ok(records) => {
                let next_page_token = if records.len() as u32 == limit {
                    page_token::encode(offset + records.len() as u64)
                } else {
                    String::new()
                };
                ListResponse {
                    status: Status::ok(),
                    records: records.into_iter().map(Into::into).collect(),
                    next_page_token,
                }
            }
            Err(e) => ListResponse {
                status: (&e).into(),
                records: Vec::new(),
                next_page_token: String::new(),
            },
        }
    }

    pub async fn search_records(&self, req: SearchRequest) -> SearchResponse {
        let collection = match self.repo.get_collection(&req.namespace, &req.name) {
            Ok(c) => c,
            Err(e) => {
                return SearchResponse {
                    status: (&e).into(),
                    hits: Vec::new(),
                    records: Vec::new(),
                }
            }
        };
        let query = req.query.into();
        match collection.search(&query) {
            Ok(results) => SearchResponse {
                status: Status::ok(),
                hits: results
                    .iter()
                    .map(|(r, score)| SearchHitDto {
                        id: r.id.clone(),
                        score: *score,
                    })
                    .collect(),
                records: results.into_iter().map(|(r, _)| r.into()).collect(),
            },
            Err(e) => SearchResponse {
                status: (&e).into(),
                hits: Vec::new(),
                records: Vec::new(),
            },
        }
    }

    /// Runs each op in sequence; one op's failure never aborts the
    /// batch.
    pub async fn batch(&self, req: BatchRequest) -> BatchResponse {
        let mut results = Vec::with_capacity(req.ops.len());
        for op in req.ops {
            let result = match op {
                BatchOp::Create(r) => self.create_record(r).await,
                BatchOp::Get(r) => self.get_record(r).await,
                BatchOp::Update(r) => self.update_record(r).await,
                BatchOp::Delete(r) => {
                    let resp = self.delete_record(r).await;
                    RecordResponse {
                        status: resp.status,
                        record: None,
                    }
                }
            };
            results.push(BatchOpResult {
                status: result.status,
                record: result.record,
            });
        }
        BatchResponse { results }
    }

    pub async fn describe_collection(&self, req: DescribeRequest) -> DescribeResponse {
        match self.repo.get_collection(&req.namespace, &req.name) {
            Ok(c) => {
                let meta = c.metadata();
                DescribeResponse {
                    status: Status::ok(),
                    message_type: c.message_type.clone(),
                    indexed_fields: c.indexed_fields(),
                    server_endpoint: c.server_endpoint.clone(),
                    labels: meta.labels,
                    created_at: meta.created_at,
                    updated_at: meta.updated_at,
                }
            }
            Err(e) => DescribeResponse {
                status: (&e).into(),
                message_type: String::new(),
                indexed_fields: Vec::new(),
                server_endpoint: None,
                labels: Default::default(),
                created_at: 0,
                updated_at: 0,
            },
        }
    }

    pub async fn modify_collection(&self, req: ModifyRequest) -> StatusResponse {
        let result =
            self.repo
                .update_collection_metadata(&req.namespace, &req.name, req.indexed_fields, req.labels);
        StatusResponse {
            status: match result {
                Ok(()) => Status::ok(),
                Err(e) => (&e).into(),
            },
        }
    }

    pub async fn meta(&self, req: MetaRequest) -> MetaResponse {
        match self.repo.get_collection(&req.namespace, &req.name) {
            Ok(c) => match c.count() {
                Ok(count) => MetaResponse::from_options(Status::ok(), count, c.options),
                Err(e) => MetaResponse::from_options((&e).into(), 0, c.options),
            },
            Err(e) => MetaResponse::from_options((&e).into(), 0, Options::default()),
        }
    }

    /// Reserved extension point; always `Unimplemented`.
    pub async fn invoke(&self, _req: InvokeRequest) -> InvokeResponse {
        InvokeResponse {
            status: Status {
                code: StatusCode::Unimplemented,
                message: "invoke is reserved for future use".to_string(),
            },
        }
    }

    // ---- Repo RPCs ---------------------------------------------------

    pub async fn create_collection(&self, req: CreateCollectionRequest) -> StatusResponse {
        let options = Options {
            enable_fts: req.enable_fts,
            enable_json: req.enable_json,
            enable_vector: false,
            vector_dimensions: 0,
        };
        let result = self
            .repo
            .create_collection(
                &req.namespace,
                &req.name,
                &req.message_type,
                req.indexed_fields,
                req.server_endpoint,
                options,
            )
            .await;
        StatusResponse {
            status: match result {
                Ok(_) => Status::ok(),
                Err(e) => (&e).into(),
            },
        }
    }

    pub async fn discover(&self, req: DiscoverRequestDto) -> DiscoverResponse {
        match self.repo.discover(&req.into()) {
            Ok(result) => DiscoverResponse {
                status: Status::ok(),
                collections: result.collections.into_iter().map(Into::into).collect(),
                next_page_token: result.next_page_token,
            },
            Err(e) => DiscoverResponse {
                status: (&e).into(),
                collections: Vec::new(),
                next_page_token: String::new(),
            },
        }
    }

    pub async fn route(&self, req: RouteRequest) -> RouteResponse {
        match self.repo.route(&req.namespace, &req.name) {
            Ok(endpoint) => RouteResponse {
                status: Status::ok(),
                endpoint,
            },
            Err(e) => RouteResponse {
                status: (&e).into(),
                endpoint: String::new(),
            },
        }
    }

    pub async fn search_collections(&self, req: SearchCollectionsRequest) -> SearchCollectionsResponse {
        let selector = req.selector.into();
        let query = req.query.into();
        match self.repo.search_collections(&selector, &query).await {
            Ok(hits) => SearchCollectionsResponse {
                status: Status::ok(),
                hits: hits.into_iter().map(Into::into).collect(),
            },
            Err(e) => SearchCollectionsResponse {
                status: (&e).into(),
                hits: Vec::new(),
            },
        }
    }

    pub async fn clone_collection(&self, req: CloneRequest) -> StatusResponse {
        let result = self
            .clones
            .local_clone(
                &req.source_namespace,
                &req.source_name,
                &req.dest_namespace,
                &req.dest_name,
                req.include_files,
            )
            .await;
        StatusResponse {
            status: match result {
                Ok(_) => Status::ok(),
                Err(e) => (&e).into(),
            },
        }
    }

    // ---- Backup RPCs --------------------------------------------------

    pub async fn backup_collection(&self, req: BackupCollectionRequest) -> BackupCollectionResponse {
        let backup_req = BackupRequest {
            namespace: req.namespace,
            name: req.name,
            include_files: req.include_files,
            metadata: req.metadata,
            dest_path: req.dest_path.map(std::path::PathBuf::from),
        };
        match self.backups.backup_collection(backup_req, now_unix()).await {
            Ok(meta) => BackupCollectionResponse {
                status: Status::ok(),
                backup: Some(meta.into()),
            },
            Err(e) => BackupCollectionResponse {
                status: (&e).into(),
                backup: None,
            },
        }
    }

    pub async fn list_backups(&self, req: ListBackupsRequestDto) -> ListBackupsResponse {
        let collection = match (req.namespace.clone(), req.collection_name) {
            (Some(ns), Some(name)) => Some((ns, name)),
            _ => None,
        };
        let namespace = if collection.is_some() { None } else { req.namespace };
        let core_req = ListBackupsRequest {
            collection,
            namespace,
            since_timestamp: req.since_timestamp,
            limit: req.limit,
        };
        match self.backups.list_backups(&core_req) {
            Ok(result) => ListBackupsResponse {
                status: Status::ok(),
                backups: result.backups.into_iter().map(Into::into).collect(),
                total_count: result.total_count,
            },
            Err(e) => ListBackupsResponse {
                status: (&e).into(),
                backups: Vec::new(),
                total_count: 0,
            },
        }
    }

    pub async fn restore_backup(&self, req: RestoreBackupRequest) -> RestoreBackupResponse {
        let core_req = RestoreRequest {
            backup_id: req.backup_id,
            dest_namespace: req.dest_namespace,
            dest_name: req.dest_name,
            overwrite: req.overwrite,
        };
        match self.backups.restore_backup(core_req).await {
            Ok(summary) => RestoreBackupResponse {
                status: Status::ok(),
                records_restored: summary.records_restored,
            },
            Err(e) => RestoreBackupResponse {
                status: (&e).into(),
                records_restored: 0,
            },
        }
    }

    pub async fn delete_backup(&self, req: DeleteBackupRequest) -> DeleteBackupResponse {
        match self.backups.delete_backup(&req.backup_id) {
            Ok(bytes_freed) => DeleteBackupResponse {
                status: Status::ok(),
                bytes_freed,
            },
            Err(e) => DeleteBackupResponse {
                status: (&e).into(),
                bytes_freed: 0,
            },
        }
    }

    pub async fn verify_backup(&self, req: VerifyBackupRequest) -> VerifyBackupResponse {
        match self.backups.verify_backup(&req.backup_id) {
            Ok(result) => VerifyBackupResponse {
                status: Status::ok(),
                is_valid: result.is_valid,
                error_message: result.error_message,
            },
            Err(e) => VerifyBackupResponse {
                status: (&e).into(),
                is_valid: false,
                error_message: Some(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> StowageConfig {
        let mut config = StowageConfig::default();
        config.data_dir = dir.path().join("data");
        config.backup_dir = dir.path().join("backups");
        config
    }

    #[tokio::test]
    async fn create_get_roundtrip_through_surface() {
        let dir = TempDir::new().unwrap();
        let surface = ServiceSurface::new(test_config(&dir)).unwrap();
        let created = surface
            .create_collection(CreateCollectionRequest {
                namespace: "ns".to_string(),
                name: "col".to_string(),
                message_type: "Thing".to_string(),
                indexed_fields: Vec::new(),
                server_endpoint: None,
                enable_fts: true,
                enable_json: true,
            })
            .await;
        assert!(created.status.is_ok());

        let created_record = surface
            .create_record(CreateRequest {
                namespace: "ns".to_string(),
                name: "col".to_string(),
                id: "rec-1".to_string(),
                payload: br#"{"title":"hello"}"#.to_vec(),
                data_uri: None,
                labels: BTreeMap::new(),
            })
            .await;
        assert!(created_record.status.is_ok());

        let got = surface
            .get_record(GetRequest {
                namespace: "ns".to_string(),
                name: "col".to_string(),
                id: "rec-1".to_string(),
            })
            .await;
        assert!(got.status.is_ok());
        assert_eq!(got.record.unwrap().id, "rec-1");
    }

    #[tokio::test]
    async fn get_missing_collection_is_not_found() {
        let dir = TempDir::new().unwrap();
        let surface = ServiceSurface::new(test_config(&dir)).unwrap();
        let got = surface
            .get_record(GetRequest {
                namespace: "ns".to_string(),
                name: "missing".to_string(),
                id: "rec-1".to_string(),
            })
            .await;
        assert_eq!(got.status.code, StatusCode::NotFound);
    }

    #[tokio::test]
    async fn batch_reports_each_op_independently() {
        let dir = TempDir::new().unwrap();
        let surface = ServiceSurface::new(test_config(&dir)).unwrap();
        surface
            .create_collection(CreateCollectionRequest {
                namespace: "ns".to_string(),
                name: "col".to_string(),
                message_type: "Thing".to_string(),
                indexed_fields: Vec::new(),
                server_endpoint: None,
                enable_fts: false,
                enable_json: true,
            })
            .await;

        let resp = surface
            .batch(BatchRequest {
                ops: vec![
                    BatchOp::Create(CreateRequest {
                        namespace: "ns".to_string(),
                        name: "col".to_string(),
                        id: "rec-1".to_string(),
                        payload: b"{}".to_vec(),
                        data_uri: None,
                        labels: BTreeMap::new(),
                    }),
                    BatchOp::Get(GetRequest {
                        namespace: "ns".to_string(),
                        name: "col".to_string(),
                        id: "does-not-exist".to_string(),
                    }),
                ],
            })
            .await;
        assert_eq!(resp.results.len(), 2);
        assert!(resp.results[0].status.is_ok());
        assert_eq!(resp.results[1].status.code, StatusCode::NotFound);
    }

    #[tokio::test]
    async fn invoke_is_unimplemented() {
        let dir = TempDir::new().unwrap();
        let surface = ServiceSurface::new(test_config(&dir)).unwrap();
        let resp = surface
            .invoke(InvokeRequest {
                namespace: "ns".to_string(),
                name: "col".to_string(),
                method: "whatever".to_string(),
                payload: Vec::new(),
            })
            .await;
        assert_eq!(resp.status.code, StatusCode::Unimplemented);
    }
}
