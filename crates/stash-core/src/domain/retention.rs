//! Retention - 削除対象かどうかの判定（純粋関数）
//!
//! shares と assets で期限なしエントリの扱いが非対称:
//! - shares: 期限なし（レガシー）は削除対象
//! - assets: 期限なしは削除しない（参照中の可能性がある）

use chrono::{DateTime, Utc};

use super::collection::Collection;
use super::entry::BlobMetadata;

/// Why an entry is, or is not, eligible for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// `expiresAt < now`.
    Expired,
    /// No `expiresAt` on a share (legacy entry).
    Undated,
    /// Not yet expired, or an undated asset.
    Retained,
}

impl Verdict {
    pub fn is_eligible(&self) -> bool {
        !matches!(self, Verdict::Retained)
    }
}

/// Evaluate one entry against `now`. `expiresAt == now` is retained.
pub fn evaluate(collection: Collection, metadata: &BlobMetadata, now: DateTime<Utc>) -> Verdict {
    match (collection, metadata.expires_at) {
        (_, Some(expires_at)) if expires_at < now.timestamp_millis() => Verdict::Expired,
        (_, Some(_)) => Verdict::Retained,
        (Collection::Shares, None) => Verdict::Undated,
        (Collection::Assets, None) => Verdict::Retained,
    }
}

pub fn is_eligible_for_deletion(
    collection: Collection,
    metadata: &BlobMetadata,
    now: DateTime<Utc>,
) -> bool {
    evaluate(collection, metadata, now).is_eligible()
}
