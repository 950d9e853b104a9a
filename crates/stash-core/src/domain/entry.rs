//! Entry - blob とそのメタデータ
//!
//! メタデータは `mimeType` / `bytes` / `expiresAt` を固定フィールドとして持ち、
//! それ以外のアプリケーション定義フィールドは `extra` にそのまま保持する。

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::errors::StoreError;

/// Per-entry metadata as written by upstream writers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Stored payload size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,

    /// Absolute expiry, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BlobMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = Some(bytes);
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at.timestamp_millis());
        self
    }

    pub fn with_expires_at_millis(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// `expiresAt` as a timestamp. `None` when absent or out of range.
    pub fn expires_at_datetime(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    /// Size used for freed-bytes accounting (absent counts as zero).
    pub fn byte_size(&self) -> u64 {
        self.bytes.unwrap_or(0)
    }
}

/// One row of a listing: key + metadata, no payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ListedEntry {
    pub key: String,
    pub metadata: BlobMetadata,
}

/// A key that showed up in a listing but whose metadata could not be read.
#[derive(Debug, Clone, PartialEq)]
pub struct UnreadableEntry {
    pub key: String,
    pub error: StoreError,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub entries: Vec<ListedEntry>,
    /// 1 件の読み取り失敗でページ全体を落とさない
    pub unreadable: Vec<UnreadableEntry>,
    /// `None` on the last page.
    pub next_cursor: Option<String>,
}

/// Every page of a collection merged together.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub entries: Vec<ListedEntry>,
    pub unreadable: Vec<UnreadableEntry>,
}

impl Listing {
    /// Keys seen, readable or not.
    pub fn len(&self) -> usize {
        self.entries.len() + self.unreadable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Metadata + validator, without the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectHead {
    pub metadata: BlobMetadata,
    pub etag: Option<String>,
}

/// A full object read.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub data: Bytes,
    pub metadata: BlobMetadata,
    pub etag: Option<String>,
}

impl StoredObject {
    pub fn head(&self) -> ObjectHead {
        ObjectHead {
            metadata: self.metadata.clone(),
            etag: self.etag.clone(),
        }
    }
}

/// Result of a (possibly conditional) read.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Object(StoredObject),
    /// The caller's validator still matches; no bytes were shipped.
    NotModified(ObjectHead),
}
