use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Identifier of a configured shop. Opaque; usually a UUID but hand-written
/// ids like `"shop1"` from older configs are accepted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShopId(pub String);

impl ShopId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ShopId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ShopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ShopId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ShopId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a scheduled job (UUIDv7, time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Connection credentials for one side of a shop (storefront or ERP).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseCredentials {
    pub host: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
}

impl DatabaseCredentials {
    pub fn localhost(database: &str) -> Self {
        Self {
            host: "localhost".to_string(),
            user: "root".to_string(),
            password: String::new(),
            database: database.to_string(),
        }
    }
}

/// Storefront table names for a shop. VirtueMart installs use a per-site prefix,
/// so these are configurable rather than hard-coded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    pub orders: String,
    pub order_items: String,
    pub customers: String,
}

impl Default for TableMapping {
    fn default() -> Self {
        Self {
            orders: "jos_virtuemart_orders".to_string(),
            order_items: "jos_virtuemart_order_items".to_string(),
            customers: "jos_virtuemart_order_userinfos".to_string(),
        }
    }
}

/// One configured storefront instance and the ERP it feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopIdentity {
    pub id: ShopId,
    pub name: String,
    pub source: DatabaseCredentials,
    pub target: DatabaseCredentials,
    #[serde(default)]
    pub tables: TableMapping,
}

impl ShopIdentity {
    /// Create a shop with a fresh id and localhost defaults.
    pub fn new(name: &str) -> Self {
        Self {
            id: ShopId::new(),
            name: name.to_string(),
            source: DatabaseCredentials::localhost("joomla"),
            target: DatabaseCredentials::localhost("jtl"),
            tables: TableMapping::default(),
        }
    }

    /// Reject shops that cannot possibly be synced.
    pub fn validate(&self) -> Result<()> {
        let required = [
            (self.id.as_str(), "shop id"),
            (self.name.as_str(), "shop name"),
            (self.source.host.as_str(), "source database host"),
            (self.source.user.as_str(), "source database user"),
            (self.source.database.as_str(), "source database name"),
            (self.tables.orders.as_str(), "orders table name"),
            (self.tables.order_items.as_str(), "order items table name"),
            (self.tables.customers.as_str(), "customers table name"),
        ];
        for (value, label) in required {
            if value.trim().is_empty() {
                return Err(CoreError::Validation(format!("{label} cannot be empty")));
            }
        }
        Ok(())
    }
}
