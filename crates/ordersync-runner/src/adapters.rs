use async_trait::async_trait;
use ordersync_core::ShopIdentity;

use crate::{
    error::Result,
    types::{LookbackWindow, SourceOrder},
};

/// Reads orders from a shop's storefront database.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Orders created or modified within `window`, oldest first.
    ///
    /// An `Err` here means the whole shop is skipped for this run.
    async fn fetch_changed_orders(
        &self,
        shop: &ShopIdentity,
        window: &LookbackWindow,
    ) -> Result<Vec<SourceOrder>>;
}

/// Writes orders into the ERP.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Whether the ERP already holds this order, keyed by `order.source_id`.
    ///
    /// This check is what makes re-running a window idempotent.
    async fn exists(&self, shop: &ShopIdentity, order: &SourceOrder) -> Result<bool>;

    /// Transform `order` into the ERP's record shape and write it.
    async fn write(&self, shop: &ShopIdentity, order: &SourceOrder) -> Result<()>;
}
