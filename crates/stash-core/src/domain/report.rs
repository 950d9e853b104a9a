//! Report - sweep の集計結果
//!
//! CollectionSweep は 1 collection 分の結果（成功分 + 失敗リスト）。
//! SweepReport は sweep 完了時に一度だけ組み立てられ、以後変更されない。

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use super::collection::Collection;

const BYTES_PER_MIB: f64 = 1_048_576.0;

/// One failure recorded during a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepError {
    pub collection: Collection,
    /// `None` when the listing itself failed.
    pub key: Option<String>,
    pub message: String,
}

impl fmt::Display for SweepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "[{}] {}: {}", self.collection, key, self.message),
            None => write!(f, "[{}] listing failed: {}", self.collection, self.message),
        }
    }
}

/// Per-collection accumulator. Owned by exactly one sweep pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSweep {
    pub collection: Collection,
    pub scanned: u64,
    pub deleted: u64,
    pub bytes_freed: u64,
    pub errors: Vec<SweepError>,
    /// The deadline passed before every eligible entry was handled.
    pub interrupted: bool,
}

impl CollectionSweep {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            scanned: 0,
            deleted: 0,
            bytes_freed: 0,
            errors: Vec::new(),
            interrupted: false,
        }
    }

    pub fn record_deleted(&mut self, bytes: u64) {
        self.deleted += 1;
        self.bytes_freed += bytes;
    }

    pub fn record_error(&mut self, key: Option<String>, message: impl Into<String>) {
        self.errors.push(SweepError {
            collection: self.collection,
            key,
            message: message.into(),
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Whether the sweep got as far as listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepStatus {
    #[default]
    Completed,
    /// The store could not be reached at all; nothing was attempted.
    NotStarted,
}

impl SweepStatus {
    pub fn http_status(&self) -> u16 {
        match self {
            SweepStatus::Completed => 200,
            SweepStatus::NotStarted => 500,
        }
    }
}

/// Summary returned by the sweep endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub shares_scanned: u64,
    pub shares_deleted: u64,
    pub assets_scanned: u64,
    pub assets_deleted: u64,
    pub bytes_freed: u64,
    #[serde(rename = "bytesFreedMB")]
    pub bytes_freed_mb: String,
    pub errors: Vec<String>,
    pub dry_run: bool,
    pub timestamp: String,

    #[serde(skip)]
    pub status: SweepStatus,
    #[serde(skip)]
    pub collections: Vec<CollectionSweep>,
}

impl SweepReport {
    /// Merge per-collection results into top-level totals.
    pub fn from_collections(
        collections: Vec<CollectionSweep>,
        dry_run: bool,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let pick = |c: Collection| collections.iter().find(|s| s.collection == c);
        let (shares_scanned, shares_deleted) = pick(Collection::Shares)
            .map(|s| (s.scanned, s.deleted))
            .unwrap_or_default();
        let (assets_scanned, assets_deleted) = pick(Collection::Assets)
            .map(|s| (s.scanned, s.deleted))
            .unwrap_or_default();
        let bytes_freed = collections.iter().map(|s| s.bytes_freed).sum();
        let errors = collections
            .iter()
            .flat_map(|s| s.errors.iter().map(ToString::to_string))
            .collect();

        Self {
            shares_scanned,
            shares_deleted,
            assets_scanned,
            assets_deleted,
            bytes_freed,
            bytes_freed_mb: format_mib(bytes_freed),
            errors,
            dry_run,
            timestamp: format_timestamp(completed_at),
            status: SweepStatus::Completed,
            collections,
        }
    }

    /// Report for a sweep that could not begin.
    pub fn not_started(message: impl Into<String>, dry_run: bool, at: DateTime<Utc>) -> Self {
        let mut report = Self::from_collections(Vec::new(), dry_run, at);
        report.errors.push(message.into());
        report.status = SweepStatus::NotStarted;
        report
    }

    pub fn total_deleted(&self) -> u64 {
        self.shares_deleted + self.assets_deleted
    }

    pub fn collection(&self, collection: Collection) -> Option<&CollectionSweep> {
        self.collections.iter().find(|s| s.collection == collection)
    }

    pub fn is_interrupted(&self) -> bool {
        self.collections.iter().any(|s| s.interrupted)
    }
}

fn format_mib(bytes: u64) -> String {
    format!("{:.2}", bytes as f64 / BYTES_PER_MIB)
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
