use std::sync::Arc;

use dashmap::DashMap;
use ordersync_core::ShopId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per shop id, created on first use.
///
/// Every run holds the guard of a shop for as long as it is syncing that
/// shop, so overlapping runs for the same shop queue up (FIFO) instead of
/// interleaving writes.
#[derive(Clone, Default)]
pub struct ShopLocks {
    locks: Arc<DashMap<ShopId, Arc<Mutex<()>>>>,
}

impl ShopLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `shop_id` is free and take it.
    pub async fn acquire(&self, shop_id: &ShopId) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the map shard is not held across the await.
        let lock = self.lock_for(shop_id);
        lock.lock_owned().await
    }

    /// Whether some run currently holds `shop_id`.
    pub fn is_locked(&self, shop_id: &ShopId) -> bool {
        self.locks
            .get(shop_id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    fn lock_for(&self, shop_id: &ShopId) -> Arc<Mutex<()>> {
        self.locks
            .entry(shop_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_shop_is_exclusive() {
        let locks = ShopLocks::new();
        let s1 = ShopId::from("s1");

        let guard = locks.acquire(&s1).await;
        assert!(locks.is_locked(&s1));

        let waiter = {
            let locks = locks.clone();
            let s1 = s1.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(&s1).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(!locks.is_locked(&s1));
    }

    #[tokio::test]
    async fn different_shops_do_not_block() {
        let locks = ShopLocks::new();
        let _a = locks.acquire(&ShopId::from("s1")).await;
        let _b = locks.acquire(&ShopId::from("s2")).await;
        assert!(locks.is_locked(&ShopId::from("s2")));
        assert!(!locks.is_locked(&ShopId::from("s3")));
    }
}
