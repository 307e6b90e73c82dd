//! Request/response DTOs for the Record, Repo, and Backup RPC surfaces.
//! These are plain serializable structs, not a generated-from-IDL
//! service — wire framing is an external collaborator's job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stowage_core::query::{Filter, Operator, SearchHit, SearchQuery};
use stowage_core::repo::{CollectionSelector, CollectionSummary, CrossCollectionHit, DiscoverRequest};
use stowage_core::store::Options;
use stowage_core::Record;

use crate::status::Status;

/// Wire projection of [`stowage_core::Record`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordDto {
    pub id: String,
    pub payload: Vec<u8>,
    pub json_projection: Value,
    pub data_uri: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<Record> for RecordDto {
    fn from(r: Record) -> Self {
        Self {
            id: r.id,
            payload: r.payload,
            json_projection: r.json_projection,
            data_uri: r.data_uri,
            labels: r.labels,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Wire tag for a [`Filter`]'s operator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum OperatorDto {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
    In,
    Exists,
    NotExists,
}

impl From<OperatorDto> for Operator {
    fn from(op: OperatorDto) -> Self {
        match op {
            OperatorDto::Eq => Operator::Eq,
            OperatorDto::Ne => Operator::Ne,
            OperatorDto::Gt => Operator::Gt,
            OperatorDto::Lt => Operator::Lt,
            OperatorDto::Ge => Operator::Ge,
            OperatorDto::Le => Operator::Le,
            OperatorDto::Contains => Operator::Contains,
            OperatorDto::In => Operator::In,
            OperatorDto::Exists => Operator::Exists,
            OperatorDto::NotExists => Operator::NotExists,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterDto {
    pub path: String,
    pub op: OperatorDto,
    pub value: Value,
}

impl From<FilterDto> for Filter {
    fn from(f: FilterDto) -> Self {
        Filter {
            path: f.path,
            op: f.op.into(),
            value: f.value,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchQueryDto {
    pub full_text: Option<String>,
    #[serde(default)]
    pub filters: Vec<FilterDto>,
    #[serde(default)]
    pub label_filters: BTreeMap<String, String>,
    pub order_by: Option<String>,
    #[serde(default)]
    pub ascending: bool,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

impl From<SearchQueryDto> for SearchQuery {
    fn from(q: SearchQueryDto) -> Self {
        SearchQuery {
            full_text: q.full_text,
            filters: q.filters.into_iter().map(Into::into).collect(),
            label_filters: q.label_filters,
            order_by: q.order_by,
            ascending: q.ascending,
            limit: q.limit,
            offset: q.offset,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHitDto {
    pub id: String,
    pub score: f64,
}

impl From<SearchHit> for SearchHitDto {
    fn from(h: SearchHit) -> Self {
        Self { id: h.id, score: h.score }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequest {
    pub namespace: String,
    pub name: String,
    pub id: String,
    pub payload: Vec<u8>,
    pub data_uri: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub namespace: String,
    pub name: String,
    pub id: String,
    pub payload: Vec<u8>,
    pub data_uri: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequest {
    pub namespace: String,
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub namespace: String,
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRequest {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default)]
    pub page_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub status: Status,
    pub records: Vec<RecordDto>,
    pub next_page_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub namespace: String,
    pub name: String,
    pub query: SearchQueryDto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub status: Status,
    pub hits: Vec<SearchHitDto>,
    pub records: Vec<RecordDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordResponse {
    pub status: Status,
    pub record: Option<RecordDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: Status,
}

/// One operation inside a `Batch` request. Each variant mirrors one of
/// the single-record RPCs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BatchOp {
    Create(CreateRequest),
    Get(GetRequest),
    Update(UpdateRequest),
    Delete(DeleteRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub ops: Vec<BatchOp>,
}

/// Per-operation result. `Batch` reports each independently — one
/// operation's failure never aborts the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOpResult {
    pub status: Status,
    pub record: Option<RecordDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: Vec<BatchOpResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeRequest {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeResponse {
    pub status: Status,
    pub message_type: String,
    pub indexed_fields: Vec<String>,
    pub server_endpoint: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifyRequest {
    pub namespace: String,
    pub name: String,
    pub indexed_fields: Option<Vec<String>>,
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaRequest {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaResponse {
    pub status: Status,
    pub record_count: u64,
    pub enable_fts: bool,
    pub enable_json: bool,
    pub enable_vector: bool,
    pub vector_dimensions: u32,
}

impl MetaResponse {
    pub fn from_options(status: Status, record_count: u64, options: Options) -> Self {
        Self {
            status,
            record_count,
            enable_fts: options.enable_fts,
            enable_json: options.enable_json,
            enable_vector: options.enable_vector,
            vector_dimensions: options.vector_dimensions,
        }
    }
}

/// `Invoke` is reserved and always returns `Unimplemented`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub namespace: String,
    pub name: String,
    pub method: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCollectionRequest {
    pub namespace: String,
    pub name: String,
    pub message_type: String,
    #[serde(default)]
    pub indexed_fields: Vec<String>,
    pub server_endpoint: Option<String>,
    #[serde(default)]
    pub enable_fts: bool,
    #[serde(default)]
    pub enable_json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSummaryDto {
    pub namespace: String,
    pub name: String,
    pub message_type: String,
    pub labels: BTreeMap<String, String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<CollectionSummary> for CollectionSummaryDto {
    fn from(s: CollectionSummary) -> Self {
        Self {
            namespace: s.namespace,
            name: s.name,
            message_type: s.message_type,
            labels: s.metadata.labels,
            created_at: s.metadata.created_at,
            updated_at: s.metadata.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiscoverRequestDto {
    pub namespace: Option<String>,
    pub message_type: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default)]
    pub page_token: String,
}

impl From<DiscoverRequestDto> for DiscoverRequest {
    fn from(d: DiscoverRequestDto) -> Self {
        DiscoverRequest {
            namespace: d.namespace,
            message_type: d.message_type,
            labels: d.labels,
            page_size: d.page_size,
            page_token: if d.page_token.is_empty() { None } else { Some(d.page_token) },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverResponse {
    pub status: Status,
    pub collections: Vec<CollectionSummaryDto>,
    pub next_page_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRequest {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResponse {
    pub status: Status,
    pub endpoint: String,
}

/// Wire shape of [`CollectionSelector`]: either explicit `(namespace,
/// name)` pairs, everything in one namespace, or everything registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CollectionSelectorDto {
    Named(Vec<(String, String)>),
    Namespace(String),
    All,
}

impl From<CollectionSelectorDto> for CollectionSelector {
    fn from(s: CollectionSelectorDto) -> Self {
        match s {
            CollectionSelectorDto::Named(pairs) => CollectionSelector::Named(pairs),
            CollectionSelectorDto::Namespace(ns) => CollectionSelector::Namespace(ns),
            CollectionSelectorDto::All => CollectionSelector::All,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCollectionsRequest {
    pub selector: CollectionSelectorDto,
    pub query: SearchQueryDto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossCollectionHitDto {
    pub namespace: String,
    pub name: String,
    pub id: String,
    pub score: f64,
}

impl From<CrossCollectionHit> for CrossCollectionHitDto {
    fn from(h: CrossCollectionHit) -> Self {
        Self {
            namespace: h.namespace,
            name: h.name,
            id: h.hit.id,
            score: h.hit.score,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCollectionsResponse {
    pub status: Status,
    pub hits: Vec<CrossCollectionHitDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneRequest {
    pub source_namespace: String,
    pub source_name: String,
    pub dest_namespace: String,
    pub dest_name: String,
    #[serde(default)]
    pub include_files: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackupCollectionRequest {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub include_files: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Where the snapshot artifact should land; defaults to the
    /// configured backup directory when absent.
    #[serde(default)]
    pub dest_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadataDto {
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

impl From<stowage_core::BackupMetadata> for BackupMetadataDto {
    fn from(b: stowage_core::BackupMetadata) -> Self {
        Self {
            backup_id: b.backup_id,
            namespace: b.namespace,
            name: b.name,
            timestamp: b.timestamp,
            size_bytes: b.size_bytes,
            record_count: b.record_count,
            file_count: b.file_count,
            includes_files: b.includes_files,
            storage_path: b.storage_path,
            storage_type: b.storage_type,
            metadata: b.metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupCollectionResponse {
    pub status: Status,
    pub backup: Option<BackupMetadataDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ListBackupsRequestDto {
    pub namespace: Option<String>,
    pub collection_name: Option<String>,
    pub since_timestamp: Option<i64>,
    #[serde(default)]
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListBackupsResponse {
    pub status: Status,
    pub backups: Vec<BackupMetadataDto>,
    pub total_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreBackupRequest {
    pub backup_id: String,
    pub dest_namespace: String,
    pub dest_name: String,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreBackupResponse {
    pub status: Status,
    pub records_restored: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteBackupRequest {
    pub backup_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteBackupResponse {
    pub status: Status,
    pub bytes_freed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyBackupRequest {
    pub backup_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyBackupResponse {
    pub status: Status,
    pub is_valid: bool,
    pub error_message: Option<String>,
}
