use std::{collections::VecDeque, sync::Arc};

use dashmap::DashMap;
use ordersync_core::ShopId;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{
    events::{NotificationSink, SyncEvent},
    types::{SyncStats, SyncedOrder},
};

const BROADCAST_CAPACITY: usize = 256;

/// Synced orders remembered per shop; the oldest are dropped first.
pub const SYNCED_HISTORY_LIMIT: usize = 500;

/// Last-run stats per shop, a bounded history of synced orders, and the
/// notification fan-out.
///
/// Subscribers get a tokio broadcast receiver; a subscriber that falls more
/// than [`BROADCAST_CAPACITY`] events behind sees `Lagged` and skips ahead.
pub struct StatsTracker {
    stats: DashMap<ShopId, SyncStats>,
    history: DashMap<ShopId, VecDeque<SyncedOrder>>,
    tx: broadcast::Sender<SyncEvent>,
    sinks: RwLock<Vec<Arc<dyn NotificationSink>>>,
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsTracker {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            stats: DashMap::new(),
            history: DashMap::new(),
            tx,
            sinks: RwLock::new(Vec::new()),
        }
    }

    /// Replace the stored stats for `stats.shop_id`.
    pub fn record_result(&self, stats: SyncStats) {
        self.stats.insert(stats.shop_id.clone(), stats);
    }

    /// `None` means the shop has never finished a run in this process.
    pub fn get_stats(&self, shop_id: &ShopId) -> Option<SyncStats> {
        self.stats.get(shop_id).map(|s| s.clone())
    }

    /// Stats of every shop that has run, ordered by shop id.
    pub fn all_stats(&self) -> Vec<SyncStats> {
        let mut all: Vec<SyncStats> = self.stats.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.shop_id.cmp(&b.shop_id));
        all
    }

    /// Zero the counters of one shop, keeping its last sync time and window.
    pub fn reset(&self, shop_id: &ShopId) {
        if let Some(mut s) = self.stats.get_mut(shop_id) {
            s.total = 0;
            s.synced = 0;
            s.skipped = 0;
            s.errored = 0;
            s.aborted = false;
        }
    }

    /// Append to the shop's synced-order history, evicting the oldest
    /// entry past [`SYNCED_HISTORY_LIMIT`].
    pub fn record_synced(&self, order: SyncedOrder) {
        let mut entry = self.history.entry(order.shop_id.clone()).or_default();
        if entry.len() >= SYNCED_HISTORY_LIMIT {
            entry.pop_front();
        }
        entry.push_back(order);
    }

    /// Orders synced for `shop_id` in this process, oldest first.
    pub fn synced_orders(&self, shop_id: &ShopId) -> Vec<SyncedOrder> {
        self.history
            .get(shop_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop stats and synced-order history of every shop.
    pub fn clear(&self) {
        self.stats.clear();
        self.history.clear();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn add_sink(&self, sink: Arc<dyn NotificationSink>) {
        self.sinks.write().push(sink);
    }

    /// Deliver `event` to all subscribers and sinks. Silently drops if nobody listens.
    pub fn publish(&self, event: SyncEvent) {
        for sink in self.sinks.read().iter() {
            sink.emit(&event);
        }
        if self.tx.send(event).is_err() {
            debug!("no event subscribers");
        }
    }
}
