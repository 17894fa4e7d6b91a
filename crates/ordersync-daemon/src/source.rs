use std::path::PathBuf;

use async_trait::async_trait;
use ordersync_core::ShopIdentity;
use ordersync_runner::{LookbackWindow, Result, SourceOrder, SourceReader, SyncError};
use tracing::debug;

/// Reads storefront orders from JSON exports, one file per shop:
/// `<export_dir>/<shop_id>.json`, holding an array of orders.
pub struct FileSource {
    export_dir: PathBuf,
}

impl FileSource {
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
        }
    }

    fn export_path(&self, shop: &ShopIdentity) -> PathBuf {
        self.export_dir.join(format!("{}.json", shop.id))
    }
}

#[async_trait]
impl SourceReader for FileSource {
    async fn fetch_changed_orders(
        &self,
        shop: &ShopIdentity,
        window: &LookbackWindow,
    ) -> Result<Vec<SourceOrder>> {
        let path = self.export_path(shop);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            // No export yet means nothing changed.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(shop_id = %shop.id, path = %path.display(), "no export file");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(SyncError::ShopUnreachable {
                    shop_id: shop.id.to_string(),
                    reason: format!("{}: {e}", path.display()),
                })
            }
        };

        let all: Vec<SourceOrder> =
            serde_json::from_str(&raw).map_err(|e| SyncError::ShopUnreachable {
                shop_id: shop.id.to_string(),
                reason: format!("{} is not a valid export: {e}", path.display()),
            })?;

        let mut changed: Vec<SourceOrder> = all
            .into_iter()
            .filter(|o| window.contains(o.modified_at))
            .collect();
        changed.sort_by_key(|o| o.modified_at);
        debug!(shop_id = %shop.id, count = changed.len(), "orders in window");
        Ok(changed)
    }
}
