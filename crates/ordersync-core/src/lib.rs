//! `ordersync-core`: types and configuration shared by the sync runner,
//! the scheduler and the daemon.

pub mod clock;
pub mod config;
pub mod error;
pub mod shops;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, Result};
pub use shops::{ShopProvider, ShopRegistry};
pub use types::{DatabaseCredentials, JobId, ShopId, ShopIdentity, TableMapping};
