//! The persistent record engine: CRUD, list, count, search, snapshot,
//! reindex, and raw exec, backed by a single `rusqlite::Connection`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use regex_lite::Regex;
use rusqlite::{backup::Backup, params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::{Result, StowageError};
use crate::query::{build_plan, SearchQuery};
use crate::record::{derive_json_projection, flatten_for_fts, Record};

/// Per-Collection feature gates: which optional indexes and search
/// modes a Collection's Store maintains.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub enable_fts: bool,
    pub enable_json: bool,
    pub enable_vector: bool,
    pub vector_dimensions: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            enable_fts: true,
            enable_json: true,
            enable_vector: false,
            vector_dimensions: 0,
        }
    }
}

fn path_pattern() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.]+$").unwrap())
}

/// The record engine for one Collection (or the BackupManager's own
/// metadata catalogue — `store.rs` is reused verbatim for that purpose).
/// Wraps one `Mutex<Connection>` in WAL mode: "the Store is itself
/// concurrency-safe" is realized here, not by callers.
pub struct Store {
    conn: Mutex<Connection>,
    path: PathBuf,
    options: Options,
}

impl Store {
    /// Open (creating if absent) a Store at `path` with the given
    /// feature gates, and ensure its schema exists.
    pub fn open(path: impl Into<PathBuf>, options: Options) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn: Mutex::new(conn),
            path,
            options,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory Store, used for ephemeral test fixtures and the
    /// BackupManager's scratch verification path.
    pub fn open_in_memory(options: Options) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
            options,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                payload BLOB NOT NULL,
                json_projection TEXT NOT NULL,
                data_uri TEXT,
                labels TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_records_created_at ON records(created_at);
            CREATE INDEX IF NOT EXISTS idx_records_updated_at ON records(updated_at);",
        )?;
        if self.options.enable_fts {
            conn.execute_batch(
                "CREATE VIRTUAL TABLE IF NOT EXISTS records_fts USING fts5(id UNINDEXED, content);",
            )?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> Options {
        self.options
    }

    /// Insert a new record. Fails with `AlreadyExists` on id collision.
    /// Row insert and FTS posting insert happen in one transaction.
    pub fn create(&self, record: &Record) -> Result<()> {
        if record.id.is_empty() {
            return Err(StowageError::InvalidArgument(
                "record id must not be empty".to_string(),
            ));
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let exists: Option<String> = tx
            .query_row("SELECT id FROM records WHERE id = ?1", params![record.id], |r| {
                r.get(0)
            })
            .optional()?;
        if exists.is_some() {
            return Err(StowageError::AlreadyExists(format!(
                "record already exists: {}",
                record.id
            )));
        }

        let labels_json = serde_json::to_string(&record.labels)
            .map_err(|e| StowageError::Internal(format!("failed to serialize labels: {}", e)))?;
        let projection_text = record.json_projection.to_string();

        tx.execute(
            "INSERT INTO records (id, payload, json_projection, data_uri, labels, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.payload,
                projection_text,
                record.data_uri,
                labels_json,
                record.created_at,
                record.updated_at
            ],
        )?;

        if self.options.enable_fts {
            let rowid = tx.last_insert_rowid();
            let content = flatten_for_fts(&record.json_projection);
            tx.execute(
                "INSERT INTO records_fts (rowid, id, content) VALUES (?1, ?2, ?3)",
                params![rowid, record.id, content],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Fetch one record by id.
    pub fn get(&self, id: &str) -> Result<Record> {
        let conn = self.conn.lock().unwrap();
        Self::get_locked(&conn, id)
    }

    fn get_locked(conn: &Connection, id: &str) -> Result<Record> {
        conn.query_row(
            "SELECT id, payload, json_projection, data_uri, labels, created_at, updated_at
             FROM records WHERE id = ?1",
            params![id],
            row_to_record,
        )
        .optional()?
        .ok_or_else(|| StowageError::NotFound(format!("record not found: {}", id)))
    }

    /// Replace payload, projection, data_uri, and labels for an existing
    /// record; `created_at` is preserved, `updated_at` is bumped to
    /// `now`. `NotFound` if the id is unknown.
    pub fn update(
        &self,
        id: &str,
        payload: Vec<u8>,
        data_uri: Option<String>,
        labels: BTreeMap<String, String>,
        now: i64,
    ) -> Result<Record> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let (rowid, created_at): (i64, i64) = tx
            .query_row(
                "SELECT rowid, created_at FROM records WHERE id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| StowageError::NotFound(format!("record not found: {}", id)))?;

        let projection = derive_json_projection(&payload);
        let projection_text = projection.to_string();
        let labels_json = serde_json::to_string(&labels)
            .map_err(|e| StowageError::Internal(format!("failed to serialize labels: {}", e)))?;

        tx.execute(
            "UPDATE records SET payload = ?1, json_projection = ?2, data_uri = ?3, labels = ?4, updated_at = ?5
             WHERE id = ?6",
            params![payload, projection_text, data_uri, labels_json, now, id],
        )?;

        if self.options.enable_fts {
            let content = flatten_for_fts(&projection);
            tx.execute(
                "UPDATE records_fts SET content = ?1 WHERE rowid = ?2",
                params![content, rowid],
            )?;
        }

        tx.commit()?;
        Ok(Record {
            id: id.to_string(),
            payload,
            json_projection: projection,
            data_uri,
            labels,
            created_at,
            updated_at: now,
        })
    }

    /// Remove a record and its FTS posting. `NotFound` if unknown.
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let changed = tx.execute("DELETE FROM records WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StowageError::NotFound(format!("record not found: {}", id)));
        }
        if self.options.enable_fts {
            tx.execute("DELETE FROM records_fts WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Page through records ordered by `created_at DESC, id ASC`.
    pub fn list(&self, offset: u32, limit: u32) -> Result<Vec<Record>> {
        let limit = if limit == 0 { 100 } else { limit };
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, payload, json_projection, data_uri, labels, created_at, updated_at
             FROM records ORDER BY created_at DESC, id ASC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit, offset], row_to_record)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StowageError::from)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    /// Execute a hybrid search and return matching records in plan order.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<(Record, f64)>> {
        if query.full_text.as_ref().map(|t| !t.is_empty()).unwrap_or(false) && !self.options.enable_fts {
            return Err(StowageError::InvalidArgument(
                "full-text search is disabled for this collection".to_string(),
            ));
        }
        let plan = build_plan(query)?;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&plan.sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            plan.params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(params_refs.as_slice(), |row| {
            let record = row_to_record(row)?;
            let score: f64 = row.get(7)?;
            Ok((record, score))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StowageError::from)
    }

    /// Force the WAL to merge into the main database file.
    pub fn checkpoint(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    /// Rebuild FTS postings and the expression indexes backing
    /// `indexed_fields` after a Collection's `Modify`.
    pub fn reindex(&self, indexed_fields: &[String]) -> Result<()> {
        for field in indexed_fields {
            if !path_pattern().is_match(field) {
                return Err(StowageError::InvalidArgument(format!(
                    "indexed field contains disallowed characters: {}",
                    field
                )));
            }
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let stale: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_records_field_%'",
            )?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        for name in stale {
            tx.execute(&format!("DROP INDEX IF EXISTS {}", name), [])?;
        }

        for (i, field) in indexed_fields.iter().enumerate() {
            tx.execute(
                &format!(
                    "CREATE INDEX idx_records_field_{} ON records(json_extract(json_projection, '$.{}'))",
                    i, field
                ),
                [],
            )?;
        }

        if self.options.enable_fts {
            tx.execute("DELETE FROM records_fts", [])?;
            let mut stmt = tx.prepare("SELECT rowid, id, payload, json_projection FROM records")?;
            let rows: Vec<(i64, String, Vec<u8>, String)> = stmt
                .query_map([], |r| {
                    Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            drop(stmt);
            for (rowid, id, payload, projection_text) in rows {
                let projection: Value = serde_json::from_str(&projection_text)
                    .unwrap_or_else(|_| derive_json_projection(&payload));
                let content = flatten_for_fts(&projection);
                tx.execute(
                    "INSERT INTO records_fts (rowid, id, content) VALUES (?1, ?2, ?3)",
                    params![rowid, id, content],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Produce an internally consistent copy of this Store's bytes at
    /// `dest_path` using SQLite's online backup API — no exclusive lock
    /// on the source, safe alongside concurrent readers/writers.
    pub fn snapshot(&self, dest_path: &Path) -> Result<()> {
        if let Some(parent) = dest_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = self.conn.lock().unwrap();
        let mut dest = Connection::open(dest_path)?;
        {
            let backup = Backup::new(&conn, &mut dest)?;
            backup.run_to_completion(5, std::time::Duration::from_millis(250), None)?;
        }
        Ok(())
    }

    /// Escape hatch for engine-specific maintenance (vacuum, attach).
    /// Never used internally except by `reindex`/`checkpoint`.
    pub fn execute_raw(&self, stmt: &str, args: &[&dyn rusqlite::ToSql]) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute(stmt, args)?)
    }

    /// Run SQLite's built-in integrity check; `true` iff it reports "ok".
    pub fn integrity_check(&self) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let result: String = conn.query_row("PRAGMA integrity_check", [], |r| r.get(0))?;
        Ok(result == "ok")
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<Record> {
    let projection_text: String = row.get(2)?;
    let labels_text: String = row.get(4)?;
    let json_projection: Value = serde_json::from_str(&projection_text).unwrap_or(Value::Null);
    let labels: BTreeMap<String, String> = serde_json::from_str(&labels_text).unwrap_or_default();
    Ok(Record {
        id: row.get(0)?,
        payload: row.get(1)?,
        json_projection,
        data_uri: row.get(3)?,
        labels,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Open a Store that already exists on disk purely to verify it (used by
/// `BackupManager::VerifyBackup` and `Transport` snapshot checks) without
/// creating schema as a side effect if it is already present.
pub fn open_readonly_for_check(path: &Path) -> Result<bool> {
    let conn = Connection::open_with_flags(path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let result: String = conn.query_row("PRAGMA integrity_check", [], |r| r.get(0))?;
    Ok(result == "ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_record(id: &str, payload: Value, now: i64) -> Record {
        let mut r = Record::new(id, payload.to_string().into_bytes(), None, BTreeMap::new());
        r.created_at = now;
        r.updated_at = now;
        r
    }

    #[test]
    fn test_create_get_roundtrip() {
        let store = Store::open_in_memory(Options::default()).unwrap();
        let r = new_record("rec-1", json!({"name": "alice"}), 1000);
        store.create(&r).unwrap();
        let fetched = store.get("rec-1").unwrap();
        assert_eq!(fetched.json_projection, json!({"name": "alice"}));
        assert_eq!(fetched.created_at, 1000);
    }

    #[test]
    fn test_create_duplicate_id_fails() {
        let store = Store::open_in_memory(Options::default()).unwrap();
        let r = new_record("rec-1", json!({}), 1);
        store.create(&r).unwrap();
        let err = store.create(&r).unwrap_err();
        assert_eq!(err.kind(), "already_exists");
    }

    #[test]
    fn test_create_empty_id_rejected() {
        let store = Store::open_in_memory(Options::default()).unwrap();
        let r = new_record("", json!({}), 1);
        let err = store.create(&r).unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[test]
    fn test_update_preserves_created_at() {
        let store = Store::open_in_memory(Options::default()).unwrap();
        let r = new_record("rec-1", json!({"v": 1}), 1000);
        store.create(&r).unwrap();
        let updated = store
            .update(
                "rec-1",
                json!({"v": 2}).to_string().into_bytes(),
                None,
                BTreeMap::new(),
                2000,
            )
            .unwrap();
        assert_eq!(updated.created_at, 1000);
        assert_eq!(updated.updated_at, 2000);
        assert_eq!(updated.json_projection, json!({"v": 2}));
    }

    #[test]
    fn test_update_unknown_id_not_found() {
        let store = Store::open_in_memory(Options::default()).unwrap();
        let err = store
            .update("missing", vec![], None, BTreeMap::new(), 1)
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_delete_unknown_id_not_found_idempotent() {
        let store = Store::open_in_memory(Options::default()).unwrap();
        let err = store.delete("missing").unwrap_err();
        assert_eq!(err.kind(), "not_found");
        // a second attempt still reports not_found, never panics
        let err2 = store.delete("missing").unwrap_err();
        assert_eq!(err2.kind(), "not_found");
    }

    #[test]
    fn test_list_orders_by_created_at_desc_then_id() {
        let store = Store::open_in_memory(Options::default()).unwrap();
        for i in 1..=5 {
            store
                .create(&new_record(&format!("rec-{}", i), json!({"i": i}), i as i64))
                .unwrap();
        }
        let page = store.list(0, 3).unwrap();
        let ids: Vec<&str> = page.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["rec-5", "rec-4", "rec-3"]);
    }

    #[test]
    fn test_count() {
        let store = Store::open_in_memory(Options::default()).unwrap();
        assert_eq!(store.count().unwrap(), 0);
        store.create(&new_record("rec-1", json!({}), 1)).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_fts_search_matches_projection_terms() {
        let store = Store::open_in_memory(Options::default()).unwrap();
        store
            .create(&new_record(
                "1",
                json!({"bio": "Software engineer passionate about distributed systems"}),
                1,
            ))
            .unwrap();
        store
            .create(&new_record(
                "2",
                json!({"bio": "Product manager with expertise in cloud infrastructure"}),
                2,
            ))
            .unwrap();
        store
            .create(&new_record(
                "3",
                json!({"bio": "DevOps engineer specializing in distributed systems"}),
                3,
            ))
            .unwrap();

        let q = SearchQuery {
            full_text: Some("distributed systems".to_string()),
            ..Default::default()
        };
        let hits = store.search(&q).unwrap();
        let mut ids: Vec<&str> = hits.iter().map(|(r, _)| r.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["1", "3"]);

        let q2 = SearchQuery {
            full_text: Some("manager".to_string()),
            ..Default::default()
        };
        let hits2 = store.search(&q2).unwrap();
        assert_eq!(hits2.len(), 1);
        assert_eq!(hits2[0].0.id, "2");

        let q3 = SearchQuery {
            full_text: Some("kubernetes".to_string()),
            ..Default::default()
        };
        assert!(store.search(&q3).unwrap().is_empty());
    }

    #[test]
    fn test_numeric_filter_search() {
        use crate::query::{Filter, Operator};
        let store = Store::open_in_memory(Options::default()).unwrap();
        for (i, score) in [85, 92, 78, 95].iter().enumerate() {
            store
                .create(&new_record(&format!("{}", i + 1), json!({"score": score}), i as i64))
                .unwrap();
        }
        let q = SearchQuery {
            filters: vec![Filter {
                path: "score".to_string(),
                op: Operator::Gt,
                value: json!(90),
            }],
            ..Default::default()
        };
        let mut ids: Vec<String> = store.search(&q).unwrap().into_iter().map(|(r, _)| r.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["2", "4"]);
    }

    #[test]
    fn test_nested_field_filter() {
        use crate::query::{Filter, Operator};
        let store = Store::open_in_memory(Options::default()).unwrap();
        store
            .create(&new_record("1", json!({"user": {"profile": {"city": "SF"}}}), 1))
            .unwrap();
        store
            .create(&new_record("2", json!({"user": {"profile": {"city": "NYC"}}}), 2))
            .unwrap();
        let q = SearchQuery {
            filters: vec![Filter {
                path: "user.profile.city".to_string(),
                op: Operator::Eq,
                value: json!("SF"),
            }],
            ..Default::default()
        };
        let hits = store.search(&q).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "1");
    }

    #[test]
    fn test_snapshot_is_independently_openable_and_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("src.db");
        let store = Store::open(&src_path, Options::default()).unwrap();
        for i in 1..=10 {
            store
                .create(&new_record(&format!("rec-{}", i), json!({"i": i}), i))
                .unwrap();
        }
        let dest_path = dir.path().join("dest.db");
        store.snapshot(&dest_path).unwrap();

        let copy = Store::open(&dest_path, Options::default()).unwrap();
        assert_eq!(copy.count().unwrap(), 10);
        assert!(copy.integrity_check().unwrap());
    }

    #[test]
    fn test_reindex_rebuilds_fts_after_bulk_changes() {
        let store = Store::open_in_memory(Options::default()).unwrap();
        store
            .create(&new_record("1", json!({"bio": "kubernetes expert"}), 1))
            .unwrap();
        store.reindex(&["bio".to_string()]).unwrap();
        let q = SearchQuery {
            full_text: Some("kubernetes".to_string()),
            ..Default::default()
        };
        assert_eq!(store.search(&q).unwrap().len(), 1);
    }
}
