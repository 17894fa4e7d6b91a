//! In-process source and target, used for dry runs and tests.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use async_trait::async_trait;
use ordersync_core::{ShopId, ShopIdentity};
use parking_lot::Mutex;

use crate::{
    adapters::{SourceReader, TargetWriter},
    error::{Result, SyncError},
    types::{LookbackWindow, SourceOrder},
};

/// Orders held in memory per shop.
#[derive(Default)]
pub struct MemorySource {
    orders: Mutex<HashMap<ShopId, Vec<SourceOrder>>>,
    failing: Mutex<HashSet<ShopId>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_orders(&self, shop_id: impl Into<ShopId>, orders: Vec<SourceOrder>) {
        self.orders.lock().insert(shop_id.into(), orders);
    }

    /// Make every fetch for `shop_id` fail as unreachable.
    pub fn fail_shop(&self, shop_id: impl Into<ShopId>) {
        self.failing.lock().insert(shop_id.into());
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn fetch_changed_orders(
        &self,
        shop: &ShopIdentity,
        window: &LookbackWindow,
    ) -> Result<Vec<SourceOrder>> {
        if self.failing.lock().contains(&shop.id) {
            return Err(SyncError::ShopUnreachable {
                shop_id: shop.id.to_string(),
                reason: "source marked unreachable".to_string(),
            });
        }
        let mut orders: Vec<SourceOrder> = self
            .orders
            .lock()
            .get(&shop.id)
            .map(|all| {
                all.iter()
                    .filter(|o| window.contains(o.modified_at))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        orders.sort_by_key(|o| o.modified_at);
        Ok(orders)
    }
}

#[derive(Default)]
struct TargetState {
    written: HashMap<ShopId, Vec<String>>,
    failing: HashSet<String>,
    active: HashMap<ShopId, usize>,
    peak: HashMap<ShopId, usize>,
    active_total: usize,
    peak_total: usize,
    calls: usize,
    unreachable: bool,
    write_delay: Duration,
}

/// Records written orders and answers existence checks from that record.
///
/// Also tracks how many writes were in flight at once, per shop and in
/// total, which is how the tests prove two runs never touched a shop
/// together and that independent shops do overlap.
#[derive(Default)]
pub struct MemoryTarget {
    state: Mutex<TargetState>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes of this source id fail with a transform error.
    pub fn fail_on(&self, source_id: &str) {
        self.state.lock().failing.insert(source_id.to_string());
    }

    /// While set, every call fails as if the ERP were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Number of `exists` and `write` calls made so far.
    pub fn calls(&self) -> usize {
        self.state.lock().calls
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.state.lock().write_delay = delay;
    }

    /// Source ids written for `shop_id`, in write order.
    pub fn written(&self, shop_id: &str) -> Vec<String> {
        self.state
            .lock()
            .written
            .get(&ShopId::from(shop_id))
            .cloned()
            .unwrap_or_default()
    }

    /// Highest number of simultaneous writes seen for `shop_id`.
    pub fn peak_concurrency(&self, shop_id: &str) -> usize {
        self.state
            .lock()
            .peak
            .get(&ShopId::from(shop_id))
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of simultaneous writes seen across all shops.
    pub fn peak_total(&self) -> usize {
        self.state.lock().peak_total
    }
}

fn unreachable_error(shop: &ShopIdentity) -> SyncError {
    SyncError::ShopUnreachable {
        shop_id: shop.id.to_string(),
        reason: "target marked unreachable".to_string(),
    }
}

#[async_trait]
impl TargetWriter for MemoryTarget {
    async fn exists(&self, shop: &ShopIdentity, order: &SourceOrder) -> Result<bool> {
        let mut state = self.state.lock();
        state.calls += 1;
        if state.unreachable {
            return Err(unreachable_error(shop));
        }
        Ok(state
            .written
            .get(&shop.id)
            .is_some_and(|ids| ids.contains(&order.source_id)))
    }

    async fn write(&self, shop: &ShopIdentity, order: &SourceOrder) -> Result<()> {
        let delay = {
            let mut state = self.state.lock();
            state.calls += 1;
            if state.unreachable {
                return Err(unreachable_error(shop));
            }
            if state.failing.contains(&order.source_id) {
                return Err(SyncError::RecordTransformFailed {
                    order: order.order_number.clone(),
                    reason: "rejected by test target".to_string(),
                });
            }
            let active = state.active.entry(shop.id.clone()).or_insert(0);
            *active += 1;
            let now_active = *active;
            let peak = state.peak.entry(shop.id.clone()).or_insert(0);
            *peak = (*peak).max(now_active);
            state.active_total += 1;
            state.peak_total = state.peak_total.max(state.active_total);
            state.write_delay
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(active) = state.active.get_mut(&shop.id) {
            *active = active.saturating_sub(1);
        }
        state.active_total = state.active_total.saturating_sub(1);
        state
            .written
            .entry(shop.id.clone())
            .or_default()
            .push(order.source_id.clone());
        Ok(())
    }
}
