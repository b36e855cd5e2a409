// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The manifest describing one completed backup.

use serde::{Deserialize, Serialize};

use crate::ClusterId;

/// Name under which the manifest is stored at the backup destination.
pub const META_FILE: &str = "backupmeta";

/// One sorted-string table produced by a storage node.
///
/// Files are content-addressed: `name` is globally unique within a backup,
/// and two entries sharing a name indicate a corrupted backup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub name: String,
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
    pub crc64_xor: u64,
    pub total_kvs: u64,
    pub total_bytes: u64,
    pub start_version: u64,
    pub end_version: u64,
    /// Column family the file belongs to.
    pub cf: String,
}

/// One catalog entry pinned into the manifest.
///
/// `db` and `table` hold the JSON-encoded catalog payloads captured at plan
/// time; the numeric fields stay zero until the admin-checksum pipeline
/// fills them in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub db: Vec<u8>,
    pub table: Vec<u8>,
    pub crc64_xor: u64,
    pub total_kvs: u64,
    pub total_bytes: u64,
}

/// The manifest written once at the end of a backup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupMeta {
    pub cluster_id: ClusterId,
    /// The destination the files were written to.
    pub path: String,
    pub start_version: u64,
    pub end_version: u64,
    pub schemas: Vec<Schema>,
    /// All backed-up files, ascending by `start_key`.
    pub files: Vec<File>,
}

impl BackupMeta {
    /// Serializes the manifest for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bcs::Error> {
        bcs::to_bytes(self)
    }

    /// Decodes a stored manifest.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bcs::Error> {
        bcs::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;

    #[test]
    fn manifest_round_trip() {
        let (start_key, end_key) = keys::table_range(100);
        let meta = BackupMeta {
            cluster_id: 7,
            path: "local:///backups/nightly".to_owned(),
            start_version: 400 << 18,
            end_version: 400 << 18,
            schemas: vec![Schema {
                db: br#"{"id":1,"name":"shop"}"#.to_vec(),
                table: br#"{"id":100,"name":"orders","auto_inc_id":5}"#.to_vec(),
                crc64_xor: 0x11,
                total_kvs: 10,
                total_bytes: 100,
            }],
            files: vec![File {
                name: "1_2_100_default.sst".to_owned(),
                start_key,
                end_key,
                crc64_xor: 0x11,
                total_kvs: 10,
                total_bytes: 100,
                start_version: 400 << 18,
                end_version: 400 << 18,
                cf: "default".to_owned(),
            }],
        };
        let bytes = meta.to_bytes().expect("manifest serializes");
        assert_eq!(BackupMeta::from_bytes(&bytes).expect("manifest decodes"), meta);
    }

    #[test]
    fn from_bytes_rejects_garbage() {
        assert!(BackupMeta::from_bytes(b"not a manifest").is_err());
    }
}
