use ordersync_runner::{NotificationSink, SyncEvent};
use tracing::{debug, info, warn};

/// Mirrors sync notifications into the log.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn emit(&self, event: &SyncEvent) {
        match event {
            SyncEvent::Progress { shop_id, stats } => debug!(
                shop_id = %shop_id,
                processed = stats.processed(),
                total = stats.total,
                "sync progress"
            ),
            SyncEvent::OrderSynced { job_id, order } => debug!(
                job_id = ?job_id,
                shop_id = %order.shop_id,
                order = %order.order_number,
                "order synced"
            ),
            SyncEvent::ShopComplete { job_id, stats } => info!(
                job_id = ?job_id,
                shop_id = %stats.shop_id,
                total = stats.total,
                synced = stats.synced,
                skipped = stats.skipped,
                errored = stats.errored,
                aborted = stats.aborted,
                "shop sync complete"
            ),
            SyncEvent::RunComplete {
                job_id,
                shops,
                aborted,
                failed,
            } => info!(
                job_id = ?job_id,
                shops = shops.len(),
                aborted,
                failed,
                "run complete"
            ),
            SyncEvent::Error {
                job_id,
                shop_id,
                message,
            } => warn!(job_id = ?job_id, shop_id = ?shop_id, "sync error: {message}"),
        }
    }
}
