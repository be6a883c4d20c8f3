// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared data model for ManifestHub.
//!
//! This crate has no network or filesystem dependencies of its own; it
//! defines the [`AccountRecord`] and [`ManifestDescriptor`] types that flow
//! between the vault, the archive, the Steam session, and the downloader.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Errors raised constructing or converting core data types.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A depot decryption key was not valid hex, or was the wrong length.
    #[error("invalid depot key: {reason}")]
    InvalidDepotKey {
        /// Human-readable detail.
        reason: String,
    },
}

/// A stored Steam account credential, as persisted at `AccountInfo.json` on
/// its vault branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    /// The Steam account name (login).
    pub account_name: String,
    /// Account password, present for credential-based logon. Encrypted at
    /// rest when `aes_encrypted` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_password: Option<String>,
    /// Steam's refresh token, present once the account has logged on at
    /// least once. Encrypted at rest when `aes_encrypted` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// When the refresh token was last rotated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refresh: Option<DateTime<Utc>>,
    /// Opaque per-account branch index (see `manifesthub_crypto::branch_index`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    /// Tri-state on the wire: `null` means "not encrypted", matching records
    /// written before encryption-at-rest existed.
    #[serde(default)]
    pub aes_encrypted: Option<bool>,
    /// Base64-encoded per-record IV, present iff `aes_encrypted` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aes_iv: Option<String>,

    /// App ids touched by this account during the current process run.
    /// Never persisted; rebuilt from scratch on every run.
    #[serde(skip)]
    pub touched_app_ids: BTreeSet<u32>,
}

impl AccountRecord {
    /// Returns `true` if `account_password`/`refresh_token` are stored
    /// encrypted, treating an absent or `null` wire value as "not encrypted".
    pub fn is_encrypted(&self) -> bool {
        self.aes_encrypted.unwrap_or(false)
    }
}

/// A single `(app, depot, manifest)` triple plus its decryption key and
/// opaque serialized payload.
#[derive(Debug, Clone)]
pub struct ManifestDescriptor {
    /// Steam application id.
    pub app_id: u32,
    /// Depot id within the application.
    pub depot_id: u32,
    /// Manifest id (Steam's `gid`), unique per depot.
    pub manifest_id: u64,
    /// 32-byte AES decryption key for this depot.
    pub depot_key: [u8; 32],
    /// Opaque manifest payload as returned by the CDN.
    pub manifest: Vec<u8>,
}

impl ManifestDescriptor {
    /// The key identifying this descriptor in the archive: `{app}_{depot}_{manifest}`.
    pub fn tag_name(&self) -> String {
        tag_name(self.app_id, self.depot_id, self.manifest_id)
    }

    /// The blob filename this descriptor is stored under on its app branch.
    pub fn blob_name(&self) -> String {
        blob_name(self.depot_id, self.manifest_id)
    }

    /// Parses a hex-encoded depot key into its fixed-size byte form.
    pub fn parse_depot_key(hex_str: &str) -> Result<[u8; 32], CoreError> {
        let bytes = hex::decode(hex_str).map_err(|e| CoreError::InvalidDepotKey {
            reason: e.to_string(),
        })?;
        bytes
            .try_into()
            .map_err(|b: Vec<u8>| CoreError::InvalidDepotKey {
                reason: format!("expected 32 bytes, got {}", b.len()),
            })
    }
}

/// Git tag name for a `(app, depot, manifest)` triple.
pub fn tag_name(app_id: u32, depot_id: u32, manifest_id: u64) -> String {
    format!("{app_id}_{depot_id}_{manifest_id}")
}

/// Blob filename for a `(depot, manifest)` pair on an app branch.
pub fn blob_name(depot_id: u32, manifest_id: u64) -> String {
    format!("{depot_id}_{manifest_id}.manifest")
}

/// Name of the app branch carrying manifests for `app_id`.
pub fn app_branch_name(app_id: u32) -> String {
    app_id.to_string()
}

/// Depot id parsed back out of a blob name written by [`blob_name`], if any.
///
/// Malformed entries in an app branch tree are skipped rather than treated
/// as errors; callers use this to filter a tree listing.
pub fn depot_id_from_blob_name(name: &str) -> Option<u32> {
    let (prefix, suffix) = name.split_once('_')?;
    if suffix.ends_with(".manifest") {
        prefix.parse().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_name_formats_as_expected() {
        assert_eq!(tag_name(10, 20, 30), "10_20_30");
    }

    #[test]
    fn blob_name_formats_as_expected() {
        assert_eq!(blob_name(20, 30), "20_30.manifest");
    }

    #[test]
    fn depot_id_from_blob_name_parses_valid_entries() {
        assert_eq!(depot_id_from_blob_name("20_30.manifest"), Some(20));
    }

    #[test]
    fn depot_id_from_blob_name_skips_malformed_entries() {
        assert_eq!(depot_id_from_blob_name("Key.vdf"), None);
        assert_eq!(depot_id_from_blob_name("notanumber_30.manifest"), None);
    }

    #[test]
    fn is_encrypted_treats_null_as_false() {
        let record = AccountRecord {
            account_name: "x".into(),
            account_password: None,
            refresh_token: None,
            last_refresh: None,
            index: None,
            aes_encrypted: None,
            aes_iv: None,
            touched_app_ids: BTreeSet::new(),
        };
        assert!(!record.is_encrypted());
    }

    #[test]
    fn parse_depot_key_rejects_wrong_length() {
        let err = ManifestDescriptor::parse_depot_key("abcd").unwrap_err();
        assert!(matches!(err, CoreError::InvalidDepotKey { .. }));
    }

    #[test]
    fn parse_depot_key_roundtrips_via_hex() {
        let key = [7u8; 32];
        let hex_str = hex::encode(key);
        let parsed = ManifestDescriptor::parse_depot_key(&hex_str).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn account_record_roundtrips_json_without_touched_apps() {
        let record = AccountRecord {
            account_name: "acct".into(),
            account_password: Some("secret".into()),
            refresh_token: None,
            last_refresh: None,
            index: Some("ABCDE-FGHJ".into()),
            aes_encrypted: Some(true),
            aes_iv: Some("aXY=".into()),
            touched_app_ids: BTreeSet::from([10, 20]),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("touched_app_ids"));
        let back: AccountRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.account_name, "acct");
        assert!(back.touched_app_ids.is_empty());
    }

    #[test]
    fn account_record_null_aes_encrypted_deserializes_as_not_encrypted() {
        let json = r#"{"account_name":"x","aes_encrypted":null}"#;
        let record: AccountRecord = serde_json::from_str(json).unwrap();
        assert!(!record.is_encrypted());
    }
}
