//! SweepCoordinator - 期限切れ blob の削除パス
//!
//! # フロー
//! 1. clock から `now` を一度だけ取得（sweep 全体で同じ値を使う）
//! 2. 両ストアへ health_check。どちらにも届かなければ開始しない（NotStarted）
//! 3. shares / assets を並行に処理
//!    - list（失敗したらその collection だけ中断）
//!    - retention で判定
//!    - delete を buffer_unordered で並行実行（simulate 時は no-op）
//!    - 結果は単一の consumer が CollectionSweep に畳み込む
//! 4. SweepReport を組み立てて返す（エラーはレポートに載せ、外へは投げない）

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::time::Instant;

use crate::app::client::CollectionClient;
use crate::config::SweepConfig;
use crate::domain::{CollectionSweep, ListedEntry, StoreError, SweepReport, evaluate};
use crate::ports::Clock;

pub struct SweepCoordinator {
    shares: CollectionClient,
    assets: CollectionClient,
    clock: Arc<dyn Clock>,
    config: SweepConfig,
}

impl SweepCoordinator {
    pub fn new(
        shares: CollectionClient,
        assets: CollectionClient,
        clock: Arc<dyn Clock>,
        config: SweepConfig,
    ) -> Self {
        Self {
            shares,
            assets,
            clock,
            config,
        }
    }

    /// One full pass over both collections. Never fails; problems are in the report.
    pub async fn run_sweep(&self, simulate: bool) -> SweepReport {
        let started = Instant::now();
        let deadline = self.config.deadline.map(|budget| started + budget);
        let now = self.clock.now();

        tracing::info!(
            dry_run = simulate,
            now = %now,
            delete_concurrency = self.config.delete_concurrency,
            deadline = ?self.config.deadline,
            "starting sweep"
        );

        let (shares_probe, assets_probe) =
            tokio::join!(self.shares.health_check(), self.assets.health_check());
        if let (Err(shares_err), Err(assets_err)) = (&shares_probe, &assets_probe) {
            tracing::error!(
                shares_error = %shares_err,
                assets_error = %assets_err,
                "store unreachable, sweep not started"
            );
            return SweepReport::not_started(
                format!("sweep not started: shares: {shares_err}; assets: {assets_err}"),
                simulate,
                self.clock.now(),
            );
        }

        let (shares, assets) = tokio::join!(
            self.sweep_collection(&self.shares, now, simulate, deadline),
            self.sweep_collection(&self.assets, now, simulate, deadline),
        );

        let report = SweepReport::from_collections(vec![shares, assets], simulate, self.clock.now());

        tracing::info!(
            dry_run = simulate,
            shares_scanned = report.shares_scanned,
            shares_deleted = report.shares_deleted,
            assets_scanned = report.assets_scanned,
            assets_deleted = report.assets_deleted,
            bytes_freed = report.bytes_freed,
            errors_count = report.errors.len(),
            interrupted = report.is_interrupted(),
            duration_ms = started.elapsed().as_millis() as u64,
            "sweep completed"
        );
        report
    }

    async fn sweep_collection(
        &self,
        client: &CollectionClient,
        now: DateTime<Utc>,
        simulate: bool,
        deadline: Option<Instant>,
    ) -> CollectionSweep {
        let collection = client.collection();
        let mut result = CollectionSweep::new(collection);

        let listing = match client.list().await {
            Ok(listing) => listing,
            Err(e) => {
                tracing::warn!(collection = %collection, error = %e, "listing failed, skipping collection");
                result.record_error(None, e.to_string());
                return result;
            }
        };
        result.scanned = listing.len() as u64;

        for unreadable in listing.unreadable {
            tracing::warn!(
                collection = %collection,
                key = %unreadable.key,
                error = %unreadable.error,
                "metadata unreadable, entry skipped"
            );
            result.record_error(Some(unreadable.key), unreadable.error.to_string());
        }

        let eligible: Vec<ListedEntry> = listing
            .entries
            .into_iter()
            .filter(|entry| {
                let verdict = evaluate(collection, &entry.metadata, now);
                tracing::trace!(collection = %collection, key = %entry.key, ?verdict, "evaluated");
                verdict.is_eligible()
            })
            .collect();
        let eligible_count = eligible.len();

        let outcomes = stream::iter(
            eligible
                .into_iter()
                .take_while(|_| deadline.is_none_or(|d| Instant::now() < d)),
        )
        .map(|entry| async move {
            let outcome: Result<(), StoreError> = if simulate {
                Ok(())
            } else {
                client.delete(&entry.key).await
            };
            (entry, outcome)
        })
        .buffer_unordered(self.config.delete_concurrency.max(1));
        let mut outcomes = std::pin::pin!(outcomes);

        let mut handled = 0usize;
        while let Some((entry, outcome)) = outcomes.next().await {
            handled += 1;
            match outcome {
                Ok(()) => {
                    tracing::debug!(
                        collection = %collection,
                        key = %entry.key,
                        bytes = entry.metadata.byte_size(),
                        dry_run = simulate,
                        "deleted"
                    );
                    result.record_deleted(entry.metadata.byte_size());
                }
                Err(e) => {
                    tracing::warn!(collection = %collection, key = %entry.key, error = %e, "delete failed");
                    result.record_error(Some(entry.key), e.to_string());
                }
            }
        }

        if handled < eligible_count {
            result.interrupted = true;
            tracing::warn!(
                collection = %collection,
                handled,
                remaining = eligible_count - handled,
                "sweep deadline reached, remaining entries left for the next run"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::domain::{BlobMetadata, Collection, SweepStatus};
    use crate::impls::{FsBlobStore, InMemoryBlobStore};
    use crate::ports::{BlobStore, FixedClock};
    use bytes::Bytes;
    use chrono::TimeZone;
    use std::time::Duration;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn ms(offset: i64) -> i64 {
        now().timestamp_millis() + offset
    }

    struct Fixture {
        shares: Arc<InMemoryBlobStore>,
        assets: Arc<InMemoryBlobStore>,
        coordinator: SweepCoordinator,
    }

    fn fixture_with(config: SweepConfig) -> Fixture {
        let shares = Arc::new(InMemoryBlobStore::new().with_page_size(2));
        let assets = Arc::new(InMemoryBlobStore::new().with_page_size(2));
        let client_config = ClientConfig::default();
        let coordinator = SweepCoordinator::new(
            CollectionClient::new(Collection::Shares, shares.clone(), client_config.clone()),
            CollectionClient::new(Collection::Assets, assets.clone(), client_config),
            Arc::new(FixedClock::new(now())),
            config,
        );
        Fixture {
            shares,
            assets,
            coordinator,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(SweepConfig::default())
    }

    async fn seed(store: &InMemoryBlobStore, key: &str, meta: BlobMetadata) {
        store.put(key, Bytes::from_static(b"payload"), meta).await.unwrap();
    }

    /// shares: a (expired), b (future), c (undated)
    /// assets: x (undated, 500 B), y (expired, 1000 B)
    async fn seeded() -> Fixture {
        let f = fixture();
        seed(&f.shares, "a", BlobMetadata::new().with_expires_at_millis(ms(-1_000))).await;
        seed(&f.shares, "b", BlobMetadata::new().with_expires_at_millis(ms(1_000))).await;
        seed(&f.shares, "c", BlobMetadata::new()).await;
        seed(&f.assets, "x", BlobMetadata::new().with_bytes(500)).await;
        seed(
            &f.assets,
            "y",
            BlobMetadata::new().with_bytes(1_000).with_expires_at_millis(ms(-1)),
        )
        .await;
        f
    }

    #[tokio::test]
    async fn deletes_expired_and_legacy_shares() {
        let f = seeded().await;
        let report = f.coordinator.run_sweep(false).await;

        assert_eq!(report.shares_scanned, 3);
        assert_eq!(report.shares_deleted, 2);
        assert!(!f.shares.contains("a").await);
        assert!(f.shares.contains("b").await);
        assert!(!f.shares.contains("c").await);
    }

    #[tokio::test]
    async fn deletes_only_dated_expired_assets() {
        let f = seeded().await;
        let report = f.coordinator.run_sweep(false).await;

        assert_eq!(report.assets_scanned, 2);
        assert_eq!(report.assets_deleted, 1);
        assert!(f.assets.contains("x").await);
        assert!(!f.assets.contains("y").await);
        assert_eq!(report.bytes_freed, 1_000);
        assert_eq!(report.status, SweepStatus::Completed);
        assert!(report.errors.is_empty());
        assert!(!report.dry_run);
        assert_eq!(report.timestamp, "2024-06-01T00:00:00.000Z");
    }

    #[tokio::test]
    async fn simulate_matches_real_run_without_deleting() {
        let dry = seeded().await;
        let real = seeded().await;

        let simulated = dry.coordinator.run_sweep(true).await;
        let executed = real.coordinator.run_sweep(false).await;

        assert_eq!(dry.shares.delete_calls(), 0);
        assert_eq!(dry.assets.delete_calls(), 0);
        assert_eq!(dry.shares.len().await, 3);
        assert_eq!(dry.assets.len().await, 2);

        assert!(simulated.dry_run);
        assert_eq!(simulated.shares_scanned, executed.shares_scanned);
        assert_eq!(simulated.shares_deleted, executed.shares_deleted);
        assert_eq!(simulated.assets_scanned, executed.assets_scanned);
        assert_eq!(simulated.assets_deleted, executed.assets_deleted);
        assert_eq!(simulated.bytes_freed, executed.bytes_freed);
    }

    #[tokio::test]
    async fn one_failing_delete_does_not_stop_the_sweep() {
        let baseline = seeded().await.coordinator.run_sweep(false).await;

        let f = seeded().await;
        f.shares.fail_delete_for("a");
        let report = f.coordinator.run_sweep(false).await;

        let shares = report.collection(Collection::Shares).unwrap();
        assert_eq!(shares.errors.len(), 1);
        assert_eq!(shares.errors[0].key.as_deref(), Some("a"));
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("a"));

        assert_eq!(report.shares_scanned, baseline.shares_scanned);
        assert_eq!(report.shares_deleted, baseline.shares_deleted - 1);
        assert_eq!(report.assets_scanned, baseline.assets_scanned);
        assert_eq!(report.assets_deleted, baseline.assets_deleted);
        assert_eq!(report.bytes_freed, baseline.bytes_freed);
        assert!(!f.shares.contains("c").await);
        assert_eq!(report.status.http_status(), 200);
    }

    #[tokio::test]
    async fn unreachable_collection_does_not_block_the_other() {
        let f = seeded().await;
        f.shares.set_unavailable(true);
        let report = f.coordinator.run_sweep(false).await;

        assert_eq!(report.status, SweepStatus::Completed);
        assert_eq!(report.shares_scanned, 0);
        assert_eq!(report.assets_deleted, 1);
        let shares = report.collection(Collection::Shares).unwrap();
        assert_eq!(shares.errors.len(), 1);
        assert!(shares.errors[0].key.is_none());
    }

    #[tokio::test]
    async fn listing_failure_after_probe_is_recorded() {
        let f = seeded().await;
        // both attempts of the first page fail
        f.assets.fail_next_reads(2);
        let report = f.coordinator.run_sweep(false).await;

        assert_eq!(report.shares_deleted, 2);
        assert_eq!(report.assets_scanned, 0);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("[assets] listing failed"));
    }

    #[tokio::test]
    async fn unreachable_store_means_not_started() {
        let f = seeded().await;
        f.shares.set_unavailable(true);
        f.assets.set_unavailable(true);
        let report = f.coordinator.run_sweep(false).await;

        assert_eq!(report.status, SweepStatus::NotStarted);
        assert_eq!(report.status.http_status(), 500);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("shares"));
        assert!(report.errors[0].contains("assets"));
        assert_eq!(report.total_deleted(), 0);
    }

    #[tokio::test]
    async fn corrupt_entry_on_disk_is_recorded_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let shares = FsBlobStore::open(dir.path().join("shares")).await.unwrap();
        let assets = FsBlobStore::open(dir.path().join("assets")).await.unwrap();
        for key in ["a", "c", "d"] {
            shares
                .put(key, Bytes::from_static(b"payload"), BlobMetadata::new())
                .await
                .unwrap();
        }
        tokio::fs::write(shares.root().join("b.meta.json"), b"not json")
            .await
            .unwrap();

        let config = ClientConfig::default();
        let coordinator = SweepCoordinator::new(
            CollectionClient::new(Collection::Shares, Arc::new(shares.clone()), config.clone()),
            CollectionClient::new(Collection::Assets, Arc::new(assets), config),
            Arc::new(FixedClock::new(now())),
            SweepConfig::default(),
        );
        let report = coordinator.run_sweep(false).await;

        assert_eq!(report.status, SweepStatus::Completed);
        assert_eq!(report.shares_scanned, 4);
        assert_eq!(report.shares_deleted, 3);
        let errors = &report.collection(Collection::Shares).unwrap().errors;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].key.as_deref(), Some("b"));
        assert!(report.errors[0].starts_with("[shares] b: corrupt entry b"));
        for key in ["a", "c", "d"] {
            assert!(matches!(shares.head(key).await, Err(StoreError::NotFound(_))));
        }
    }

    #[tokio::test]
    async fn bytes_freed_is_sum_of_deleted_sizes() {
        let f = fixture_with(SweepConfig {
            delete_concurrency: 3,
            deadline: None,
        });
        let mut expected = 0;
        for i in 0..25u64 {
            let mut meta = BlobMetadata::new();
            if i % 3 != 0 {
                meta = meta.with_bytes(i * 100);
            }
            if i % 2 == 0 {
                meta = meta.with_expires_at_millis(ms(-(i as i64) - 1));
                expected += i * 100 * u64::from(i % 3 != 0);
            } else {
                meta = meta.with_expires_at_millis(ms(i as i64));
            }
            seed(&f.assets, &format!("asset-{i:02}"), meta).await;
        }

        let report = f.coordinator.run_sweep(false).await;
        assert_eq!(report.assets_scanned, 25);
        assert_eq!(report.assets_deleted, 13);
        assert_eq!(report.bytes_freed, expected);
        assert_eq!(f.assets.len().await, 12);
    }

    #[tokio::test]
    async fn deadline_stops_dispatching_new_deletes() {
        let f = fixture_with(SweepConfig {
            delete_concurrency: 1,
            deadline: Some(Duration::from_millis(1_000)),
        });
        for i in 0..20 {
            seed(&f.shares, &format!("s{i:02}"), BlobMetadata::new()).await;
        }
        // probe + 10 list pages take ~550ms, then one delete per 50ms
        f.shares.set_latency(Some(Duration::from_millis(50)));

        let report = f.coordinator.run_sweep(false).await;

        assert_eq!(report.shares_scanned, 20);
        assert!(report.shares_deleted > 0);
        assert!(report.shares_deleted < 20);
        assert!(report.is_interrupted());
        assert!(report.errors.is_empty());
        assert_eq!(report.status, SweepStatus::Completed);
        assert_eq!(f.shares.len().await as u64, 20 - report.shares_deleted);
    }
}
