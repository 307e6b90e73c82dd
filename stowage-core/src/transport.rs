//! `Transport`: moves one Collection's Store between on-disk locations
//! or across a byte stream.

use std::path::Path;

use crate::collection::Collection;
use crate::error::{Result, StowageError};
use crate::fs::FileData;
use crate::store::open_readonly_for_check;

/// Default streaming chunk size for Pack/Unpack and the CloneManager's
/// remote push/pull protocol: 1 MiB.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Stateless helper namespace for Clone/Pack/Unpack. Kept as a unit
/// struct (rather than free functions) so it mirrors the Store/FileSystem
/// capability-set shape.
pub struct Transport;

impl Transport {
    /// Take a consistent snapshot of `collection`'s Store at `dest_path`.
    /// Delegates to `Store::snapshot`, which already uses SQLite's
    /// online-backup API rather than requiring an exclusive lock.
    pub fn clone_store(collection: &Collection, dest_path: &Path) -> Result<()> {
        collection.snapshot(dest_path)
    }

    /// Read a snapshot file fully into memory for streaming out. Real
    /// network framing is an external collaborator's job;
    /// this returns the bytes a caller chunks via [`chunks`].
    pub fn pack(snapshot_path: &Path) -> Result<Vec<u8>> {
        Ok(std::fs::read(snapshot_path)?)
    }

    /// Split a packed snapshot into `CHUNK_SIZE` frames in send order.
    pub fn chunks(bytes: &[u8]) -> Vec<&[u8]> {
        bytes.chunks(CHUNK_SIZE).collect()
    }

    /// Write `bytes` to `dest_path.tmp` then rename atomically into
    /// place, never leaving a half-written artifact visible at
    /// `dest_path`.
    pub fn unpack(bytes: &[u8], dest_path: &Path) -> Result<()> {
        if let Some(parent) = dest_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = dest_path.with_extension(format!(
            "tmp-{}",
            fastrand::u64(..)
        ));
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, dest_path)?;
        Ok(())
    }

    /// Verify a produced snapshot is independently openable and passes
    /// the engine's integrity check.
    pub fn verify_snapshot(path: &Path) -> Result<bool> {
        open_readonly_for_check(path)
    }

    /// Read a snapshot plus a set of file attachments into one framed
    /// buffer for the include-files streaming path: an 8-byte
    /// little-endian database length, the database bytes, a 4-byte
    /// attachment count, then `key_len:u32, key, kind:u8 (0=inline,
    /// 1=uri), payload_len:u64, payload` entries in listing order.
    pub fn pack_bundle(snapshot_path: &Path, attachments: &[(String, FileData)]) -> Result<Vec<u8>> {
        let db_bytes = std::fs::read(snapshot_path)?;
        let mut buf = Vec::with_capacity(db_bytes.len() + 12);
        buf.extend_from_slice(&(db_bytes.len() as u64).to_le_bytes());
        buf.extend_from_slice(&db_bytes);
        buf.extend_from_slice(&(attachments.len() as u32).to_le_bytes());
        for (key, data) in attachments {
            let key_bytes = key.as_bytes();
            buf.extend_from_slice(&(key_bytes.len() as u32).to_le_bytes());
            buf.extend_from_slice(key_bytes);
            let (kind, payload): (u8, &[u8]) = match data {
                FileData::Inline(bytes) => (0, bytes),
                FileData::Uri(uri) => (1, uri.as_bytes()),
            };
            buf.push(kind);
            buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
            buf.extend_from_slice(payload);
        }
        Ok(buf)
    }

    /// Split a bundle produced by [`pack_bundle`] back into its database
    /// bytes (written atomically to `dest_path` via [`unpack`]) and its
    /// attachment entries, returned for the caller to save via
    /// `FileSystem`.
    pub fn unpack_bundle(bytes: &[u8], dest_path: &Path) -> Result<Vec<(String, FileData)>> {
        if bytes.len() < 8 {
            return Err(StowageError::InvalidArgument(
                "truncated bundle: missing database length".to_string(),
            ));
        }
        let db_len = u64::from_le_bytes(bytes[0..8].try_into().unwrap()) as usize;
        let db_end = 8 + db_len;
        if bytes.len() < db_end + 4 {
            return Err(StowageError::InvalidArgument(
                "truncated bundle: missing attachment count".to_string(),
            ));
        }
        Transport::unpack(&bytes[8..db_end], dest_path)?;

        let count = u32::from_le_bytes(bytes[db_end..db_end + 4].try_into().unwrap()) as usize;
        let mut cursor = db_end + 4;
        let mut attachments = Vec::with_capacity(count);
        for _ in 0..count {
            if bytes.len() < cursor + 4 {
                return Err(StowageError::InvalidArgument(
                    "truncated bundle: missing attachment key length".to_string(),
                ));
            }
            let key_len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
            cursor += 4;
            if bytes.len() < cursor + key_len + 1 + 8 {
                return Err(StowageError::InvalidArgument(
                    "truncated bundle: missing attachment key, kind, or data length".to_string(),
                ));
            }
            let key = String::from_utf8(bytes[cursor..cursor + key_len].to_vec()).map_err(|e| {
                StowageError::InvalidArgument(format!("attachment key is not valid utf8: {}", e))
            })?;
            cursor += key_len;
            let kind = bytes[cursor];
            cursor += 1;
            let data_len = u64::from_le_bytes(bytes[cursor..cursor + 8].try_into().unwrap()) as usize;
            cursor += 8;
            if bytes.len() < cursor + data_len {
                return Err(StowageError::InvalidArgument(
                    "truncated bundle: missing attachment data".to_string(),
                ));
            }
            let payload = bytes[cursor..cursor + data_len].to_vec();
            cursor += data_len;
            let data = match kind {
                0 => FileData::Inline(payload),
                1 => FileData::Uri(String::from_utf8(payload).map_err(|e| {
                    StowageError::InvalidArgument(format!("attachment uri is not valid utf8: {}", e))
                })?),
                other => {
                    return Err(StowageError::InvalidArgument(format!(
                        "unknown attachment kind byte: {}",
                        other
                    )))
                }
            };
            attachments.push((key, data));
        }
        Ok(attachments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FileSystem;
    use crate::store::{Options, Store};
    use serde_json::json;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_pack_unpack_round_trip_preserves_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("src.db"), Options::default()).unwrap();
        let files = FileSystem::open(dir.path().join("files")).await.unwrap();
        let collection = Collection::new(
            "test",
            "original",
            "Thing",
            vec![],
            None,
            Options::default(),
            store,
            files,
        )
        .unwrap();
        collection
            .create("rec-1", json!({"n": 1}).to_string().into_bytes(), None, BTreeMap::new())
            .unwrap();

        let snapshot_path = dir.path().join("snap.db");
        Transport::clone_store(&collection, &snapshot_path).unwrap();
        assert!(Transport::verify_snapshot(&snapshot_path).unwrap());

        let packed = Transport::pack(&snapshot_path).unwrap();
        let chunks = Transport::chunks(&packed);
        assert!(!chunks.is_empty());

        let reassembled: Vec<u8> = chunks.concat();
        let dest_path = dir.path().join("dest.db");
        Transport::unpack(&reassembled, &dest_path).unwrap();

        let restored = Store::open(&dest_path, Options::default()).unwrap();
        assert_eq!(restored.count().unwrap(), 1);
    }

    #[test]
    fn test_chunks_respects_chunk_size() {
        let bytes = vec![0u8; CHUNK_SIZE * 2 + 10];
        let chunks = Transport::chunks(&bytes);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), CHUNK_SIZE);
        assert_eq!(chunks[2].len(), 10);
    }

    #[tokio::test]
    async fn test_pack_unpack_bundle_round_trips_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("src.db"), Options::default()).unwrap();
        let files = FileSystem::open(dir.path().join("files")).await.unwrap();
        let collection = Collection::new(
            "test",
            "original",
            "Thing",
            vec![],
            None,
            Options::default(),
            store,
            files,
        )
        .unwrap();
        collection
            .create("rec-1", json!({"n": 1}).to_string().into_bytes(), None, BTreeMap::new())
            .unwrap();

        let snapshot_path = dir.path().join("snap.db");
        Transport::clone_store(&collection, &snapshot_path).unwrap();

        let attachments = vec![
            ("a/one.bin".to_string(), FileData::Inline(vec![1u8, 2, 3])),
            ("b.txt".to_string(), FileData::Inline(b"hello world".to_vec())),
            ("c.uri".to_string(), FileData::Uri("s3://bucket/key".to_string())),
        ];
        let bundle = Transport::pack_bundle(&snapshot_path, &attachments).unwrap();
        let chunks = Transport::chunks(&bundle);
        let reassembled: Vec<u8> = chunks.concat();

        let dest_path = dir.path().join("dest.db");
        let restored_attachments = Transport::unpack_bundle(&reassembled, &dest_path).unwrap();

        let restored = Store::open(&dest_path, Options::default()).unwrap();
        assert_eq!(restored.count().unwrap(), 1);
        assert_eq!(restored_attachments, attachments);
    }

    #[test]
    fn test_unpack_bundle_rejects_truncated_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let dest_path = dir.path().join("dest.db");
        assert!(Transport::unpack_bundle(&[1, 2, 3], &dest_path).is_err());
    }
}
