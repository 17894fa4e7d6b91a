use thiserror::Error;

/// Errors raised while running a sync.
///
/// Only the `NoShops*` variants abort a whole run; everything else is
/// scoped to one shop or one record and is counted, logged and skipped.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Shop not found: {id}")]
    ShopNotFound { id: String },

    /// Source or target of a shop could not be reached at all.
    #[error("Shop {shop_id} unreachable: {reason}")]
    ShopUnreachable { shop_id: String, reason: String },

    #[error("Order {order} could not be transformed: {reason}")]
    RecordTransformFailed { order: String, reason: String },

    #[error("Writing order {order} to target failed: {reason}")]
    TargetWrite { order: String, reason: String },

    #[error("No shops selected for synchronization")]
    NoShopsSelected,

    /// An explicit shop list was given but none of the ids resolved.
    #[error("None of the {requested} requested shops exist")]
    NoShopsResolved { requested: usize },

    #[error("No shops configured")]
    NoShopsConfigured,
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::ShopNotFound { .. } => "SHOP_NOT_FOUND",
            SyncError::ShopUnreachable { .. } => "SHOP_UNREACHABLE",
            SyncError::RecordTransformFailed { .. } => "RECORD_TRANSFORM_FAILED",
            SyncError::TargetWrite { .. } => "TARGET_WRITE_FAILED",
            SyncError::NoShopsSelected => "NO_SHOPS_SELECTED",
            SyncError::NoShopsResolved { .. } => "NO_SHOPS_RESOLVED",
            SyncError::NoShopsConfigured => "NO_SHOPS_CONFIGURED",
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
