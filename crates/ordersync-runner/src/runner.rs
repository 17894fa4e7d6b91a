use std::{sync::Arc, time::Duration};

use futures_util::{stream, StreamExt};
use ordersync_core::{config::SyncConfig, Clock, ShopId, ShopIdentity, ShopProvider};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    adapters::{SourceReader, TargetWriter},
    error::{Result, SyncError},
    events::SyncEvent,
    locks::ShopLocks,
    stats::StatsTracker,
    types::{
        LookbackWindow, RunReport, RunRequest, ShopOutcome, ShopSelection, SourceOrder, SyncStats,
        SyncedOrder,
    },
};

/// Tuning knobs for [`SyncRunner`].
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub max_parallel_shops: usize,
    pub record_pause: Duration,
    pub shop_pause: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            max_parallel_shops: 1,
            record_pause: Duration::ZERO,
            shop_pause: Duration::ZERO,
        }
    }
}

impl From<&SyncConfig> for RunnerOptions {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            max_parallel_shops: cfg.max_parallel_shops.max(1),
            record_pause: Duration::from_millis(cfg.record_pause_ms),
            shop_pause: Duration::from_millis(cfg.shop_pause_ms),
        }
    }
}

enum Resolved {
    Shop(ShopIdentity),
    Missing(ShopId),
}

/// Executes sync runs: fetch changed orders per shop, skip the ones the
/// target already has, write the rest.
///
/// Failures are contained at the narrowest scope: a bad record bumps
/// `errored` and the loop moves on; an unreachable or unknown shop is
/// reported and its siblings still run. A target that reports itself
/// unreachable stops the shop at that record. Records within one shop are
/// processed strictly in order.
pub struct SyncRunner {
    shops: Arc<dyn ShopProvider>,
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    stats: Arc<StatsTracker>,
    clock: Arc<dyn Clock>,
    locks: ShopLocks,
    options: RunnerOptions,
    /// Replaced after every `abort_all` so later runs start un-cancelled.
    abort: Mutex<CancellationToken>,
}

impl SyncRunner {
    pub fn new(
        shops: Arc<dyn ShopProvider>,
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
        stats: Arc<StatsTracker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shops,
            source,
            target,
            stats,
            clock,
            locks: ShopLocks::new(),
            options: RunnerOptions::default(),
            abort: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn stats(&self) -> &Arc<StatsTracker> {
        &self.stats
    }

    pub fn locks(&self) -> &ShopLocks {
        &self.locks
    }

    pub fn shop_provider(&self) -> &Arc<dyn ShopProvider> {
        &self.shops
    }

    /// Signal every run currently in flight to stop at its next record boundary.
    pub fn abort_all(&self) {
        let mut slot = self.abort.lock();
        slot.cancel();
        *slot = CancellationToken::new();
        info!("abort requested for all running syncs");
    }

    /// Token that running syncs observe; cancelled by [`Self::abort_all`].
    pub fn abort_signal(&self) -> CancellationToken {
        self.abort.lock().clone()
    }

    /// Run `request`, observing the runner-wide abort signal.
    pub async fn run(&self, request: RunRequest) -> Result<RunReport> {
        let signal = self.abort_signal();
        self.run_with_signal(request, signal).await
    }

    /// Run `request`, stopping early once `signal` is cancelled.
    ///
    /// Only fails if no shop could be resolved at all; every other problem
    /// is reported inside the returned [`RunReport`].
    pub async fn run_with_signal(
        &self,
        request: RunRequest,
        signal: CancellationToken,
    ) -> Result<RunReport> {
        let started_at = self.clock.now();
        let resolved = self.resolve(&request.selection)?;
        info!(
            job_id = ?request.job_id,
            shops = resolved.len(),
            hours = request.lookback_hours,
            "starting sync run"
        );

        let parallel = self.options.max_parallel_shops.max(1);
        let outcomes: Vec<Option<ShopOutcome>> = stream::iter(resolved)
            .map(|shop| self.sync_resolved(shop, &request, &signal))
            .buffered(parallel)
            .collect()
            .await;

        let aborted = signal.is_cancelled()
            || outcomes
                .iter()
                .any(|o| o.is_none() || matches!(o, Some(ShopOutcome::Completed { stats }) if stats.aborted));

        let report = RunReport {
            job_id: request.job_id.clone(),
            started_at,
            finished_at: self.clock.now(),
            lookback_hours: request.lookback_hours,
            shops: outcomes.into_iter().flatten().collect(),
            aborted,
        };
        info!(
            job_id = ?report.job_id,
            shops = report.shops.len(),
            failed = report.failed_shops().len(),
            aborted = report.aborted,
            "sync run finished"
        );
        Ok(report)
    }

    // --- private helpers ---------------------------------------------------

    fn resolve(&self, selection: &ShopSelection) -> Result<Vec<Resolved>> {
        match selection {
            ShopSelection::All => {
                let shops = self.shops.list_shops();
                if shops.is_empty() {
                    return Err(SyncError::NoShopsConfigured);
                }
                Ok(shops.into_iter().map(Resolved::Shop).collect())
            }
            ShopSelection::Only(ids) => {
                if ids.is_empty() {
                    return Err(SyncError::NoShopsSelected);
                }
                let mut seen: Vec<&ShopId> = Vec::with_capacity(ids.len());
                let mut resolved = Vec::with_capacity(ids.len());
                for id in ids {
                    if seen.contains(&id) {
                        continue;
                    }
                    seen.push(id);
                    resolved.push(match self.shops.get_shop(id) {
                        Some(shop) => Resolved::Shop(shop),
                        None => Resolved::Missing(id.clone()),
                    });
                }
                if resolved.iter().all(|r| matches!(r, Resolved::Missing(_))) {
                    warn!(requested = seen.len(), "none of the requested shops exist");
                    return Err(SyncError::NoShopsResolved {
                        requested: seen.len(),
                    });
                }
                Ok(resolved)
            }
        }
    }

    /// `None` when the abort signal fired before the shop was started.
    async fn sync_resolved(
        &self,
        resolved: Resolved,
        request: &RunRequest,
        signal: &CancellationToken,
    ) -> Option<ShopOutcome> {
        let shop = match resolved {
            Resolved::Shop(shop) => shop,
            Resolved::Missing(shop_id) => {
                let err = SyncError::ShopNotFound {
                    id: shop_id.to_string(),
                };
                warn!(shop_id = %shop_id, "skipping shop: {err}");
                self.stats.publish(SyncEvent::Error {
                    job_id: request.job_id.clone(),
                    shop_id: Some(shop_id.clone()),
                    message: err.to_string(),
                });
                return Some(ShopOutcome::NotFound { shop_id });
            }
        };

        if signal.is_cancelled() {
            return None;
        }
        let guard = tokio::select! {
            biased;
            _ = signal.cancelled() => return None,
            guard = self.locks.acquire(&shop.id) => guard,
        };

        let outcome = self.sync_shop(&shop, request, signal).await;
        drop(guard);
        pause(self.options.shop_pause, signal).await;
        Some(outcome)
    }

    /// Sync one shop while holding its lock.
    async fn sync_shop(
        &self,
        shop: &ShopIdentity,
        request: &RunRequest,
        signal: &CancellationToken,
    ) -> ShopOutcome {
        let started = self.clock.now();
        let window = LookbackWindow::ending_at(started, request.lookback_hours);
        info!(shop_id = %shop.id, shop = %shop.name, hours = window.hours, "syncing shop");

        let orders = match self.source.fetch_changed_orders(shop, &window).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(shop_id = %shop.id, "fetching orders failed: {e}");
                let mut stats = SyncStats::begin(shop.id.clone(), 0, window.hours, started);
                stats.errored = 1;
                return self.fail_shop(request, stats, e);
            }
        };

        let mut stats = SyncStats::begin(shop.id.clone(), orders.len(), window.hours, started);
        info!(shop_id = %shop.id, total = stats.total, "found orders to process");
        self.publish_progress(&stats);

        for order in &orders {
            if signal.is_cancelled() {
                info!(shop_id = %shop.id, processed = stats.processed(), "sync aborted");
                stats.aborted = true;
                break;
            }
            if let Err(e) = self.process_order(shop, order, request, &mut stats).await {
                warn!(
                    shop_id = %shop.id,
                    processed = stats.processed(),
                    "target unreachable, giving up on shop: {e}"
                );
                return self.fail_shop(request, stats, e);
            }
            self.publish_progress(&stats);
            pause(self.options.record_pause, signal).await;
        }

        info!(
            shop_id = %shop.id,
            synced = stats.synced,
            skipped = stats.skipped,
            errored = stats.errored,
            aborted = stats.aborted,
            "shop sync completed"
        );
        self.stats.record_result(stats.clone());
        self.stats.publish(SyncEvent::ShopComplete {
            job_id: request.job_id.clone(),
            stats: stats.clone(),
        });
        ShopOutcome::Completed { stats }
    }

    /// Record the failed shop's partial stats and report it.
    fn fail_shop(&self, request: &RunRequest, stats: SyncStats, error: SyncError) -> ShopOutcome {
        self.stats.record_result(stats.clone());
        self.stats.publish(SyncEvent::Error {
            job_id: request.job_id.clone(),
            shop_id: Some(stats.shop_id.clone()),
            message: error.to_string(),
        });
        ShopOutcome::Failed {
            stats,
            error: error.to_string(),
        }
    }

    /// Check and write one record. Every failure is counted on `stats`;
    /// only `ShopUnreachable` is also returned, since the next record would
    /// hit the same dead target.
    async fn process_order(
        &self,
        shop: &ShopIdentity,
        order: &SourceOrder,
        request: &RunRequest,
        stats: &mut SyncStats,
    ) -> Result<()> {
        let written = match self.target.exists(shop, order).await {
            Ok(true) => {
                debug!(shop_id = %shop.id, order = %order.order_number, "already in target, skipped");
                stats.skipped += 1;
                return Ok(());
            }
            Ok(false) => self.target.write(shop, order).await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                debug!(shop_id = %shop.id, order = %order.order_number, "order synced");
                stats.synced += 1;
                self.record_synced(shop, order, request);
                Ok(())
            }
            Err(e @ SyncError::ShopUnreachable { .. }) => {
                stats.errored += 1;
                Err(e)
            }
            Err(e) => {
                warn!(shop_id = %shop.id, order = %order.order_number, "order failed: {e}");
                stats.errored += 1;
                Ok(())
            }
        }
    }

    fn record_synced(&self, shop: &ShopIdentity, order: &SourceOrder, request: &RunRequest) {
        let synced = SyncedOrder {
            shop_id: shop.id.clone(),
            source_id: order.source_id.clone(),
            order_number: order.order_number.clone(),
            synced_at: self.clock.now(),
        };
        self.stats.record_synced(synced.clone());
        self.stats.publish(SyncEvent::OrderSynced {
            job_id: request.job_id.clone(),
            order: synced,
        });
    }

    fn publish_progress(&self, stats: &SyncStats) {
        self.stats.publish(SyncEvent::Progress {
            shop_id: stats.shop_id.clone(),
            stats: stats.clone(),
        });
    }
}

/// Sleep for `duration` unless aborted first.
async fn pause(duration: Duration, signal: &CancellationToken) {
    if duration.is_zero() {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = signal.cancelled() => {}
    }
}
