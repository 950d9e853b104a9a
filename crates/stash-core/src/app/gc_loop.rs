//! GcLoop - 定期 sweep のトリガー
//!
//! sweep 自体は SweepCoordinator::run_sweep（純粋に store 状態 + now → report）。
//! ここは「いつ呼ぶか」だけを担当する。
//!
//! # フロー
//! 1. interval ごとに run_sweep(false)
//! 2. 結果をログと watch チャネルに流す
//! 3. shutdown シグナルで停止（実行中の sweep は最後まで走る）

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::app::sweep::SweepCoordinator;
use crate::domain::SweepReport;

/// Handle of the background sweep task.
/// - `request_shutdown()` で次の tick 以降の sweep を止める
/// - `shutdown_and_join()` で終了を待つ
pub struct GcLoop {
    shutdown_tx: watch::Sender<bool>,
    reports_rx: watch::Receiver<Option<SweepReport>>,
    join: JoinHandle<()>,
}

impl GcLoop {
    /// First sweep runs one `interval` after spawning.
    pub fn spawn(coordinator: Arc<SweepCoordinator>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (reports_tx, reports_rx) = watch::channel(None);

        let join = tokio::spawn(gc_loop(coordinator, interval, shutdown_rx, reports_tx));

        Self {
            shutdown_tx,
            reports_rx,
            join,
        }
    }

    /// Most recent report, if any sweep has finished.
    pub fn last_report(&self) -> Option<SweepReport> {
        self.reports_rx.borrow().clone()
    }

    /// Wait until the next sweep finishes.
    pub async fn next_report(&mut self) -> Option<SweepReport> {
        self.reports_rx.changed().await.ok()?;
        self.reports_rx.borrow_and_update().clone()
    }

    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "gc loop task failed");
        }
    }
}

async fn gc_loop(
    coordinator: Arc<SweepCoordinator>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    reports_tx: watch::Sender<Option<SweepReport>>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(interval_secs = interval.as_secs_f64(), "gc loop started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        let report = coordinator.run_sweep(false).await;
        if !report.errors.is_empty() {
            tracing::warn!(errors = ?report.errors, "scheduled sweep finished with errors");
        }
        reports_tx.send_replace(Some(report));
    }

    tracing::info!("gc loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::client::CollectionClient;
    use crate::config::{ClientConfig, SweepConfig};
    use crate::domain::{BlobMetadata, Collection};
    use crate::impls::InMemoryBlobStore;
    use crate::ports::{BlobStore, SystemClock};
    use bytes::Bytes;

    #[tokio::test]
    async fn runs_sweeps_until_shutdown() {
        let shares = Arc::new(InMemoryBlobStore::new());
        let assets = Arc::new(InMemoryBlobStore::new());
        shares
            .put("legacy", Bytes::from_static(b"{}"), BlobMetadata::new())
            .await
            .unwrap();

        let coordinator = Arc::new(SweepCoordinator::new(
            CollectionClient::new(Collection::Shares, shares.clone(), ClientConfig::default()),
            CollectionClient::new(Collection::Assets, assets, ClientConfig::default()),
            Arc::new(SystemClock),
            SweepConfig::default(),
        ));

        let mut gc = GcLoop::spawn(coordinator, Duration::from_millis(20));
        assert!(gc.last_report().is_none());

        let report = tokio::time::timeout(Duration::from_secs(2), gc.next_report())
            .await
            .expect("a sweep within 2s")
            .expect("report");
        assert_eq!(report.shares_deleted, 1);
        assert!(!report.dry_run);
        assert!(!shares.contains("legacy").await);
        assert!(gc.last_report().is_some());

        tokio::time::timeout(Duration::from_secs(2), gc.shutdown_and_join())
            .await
            .expect("loop stops");
    }
}
