use parking_lot::RwLock;
use tracing::info;

use crate::{
    error::{CoreError, Result},
    types::{ShopId, ShopIdentity},
};

/// Read access to the configured shops.
///
/// The scheduler only ever holds shop ids; credentials are resolved through
/// this trait at run time so edits made between runs take effect immediately.
pub trait ShopProvider: Send + Sync {
    fn list_shops(&self) -> Vec<ShopIdentity>;

    fn get_shop(&self, id: &ShopId) -> Option<ShopIdentity>;
}

struct ShopList {
    shops: Vec<ShopIdentity>,
    current: usize,
}

/// Mutable, in-process shop configuration.
///
/// Persisting the list is the caller's job (see [`ShopRegistry::snapshot`]).
pub struct ShopRegistry {
    inner: RwLock<ShopList>,
}

impl ShopRegistry {
    /// Build a registry from a configured list. An out-of-range `current`
    /// index falls back to 0.
    pub fn new(shops: Vec<ShopIdentity>, current: usize) -> Self {
        let current = if current < shops.len() { current } else { 0 };
        Self {
            inner: RwLock::new(ShopList { shops, current }),
        }
    }

    pub fn add_shop(&self, shop: ShopIdentity) -> Result<()> {
        shop.validate()?;
        let mut list = self.inner.write();
        if list.shops.iter().any(|s| s.id == shop.id) {
            return Err(CoreError::Validation(format!(
                "a shop with id '{}' already exists",
                shop.id
            )));
        }
        info!(shop_id = %shop.id, name = %shop.name, "shop added");
        list.shops.push(shop);
        Ok(())
    }

    pub fn update_shop(&self, shop: ShopIdentity) -> Result<()> {
        shop.validate()?;
        let mut list = self.inner.write();
        let slot = list
            .shops
            .iter_mut()
            .find(|s| s.id == shop.id)
            .ok_or_else(|| CoreError::ShopNotFound {
                id: shop.id.to_string(),
            })?;
        *slot = shop;
        Ok(())
    }

    /// Remove a shop. The last remaining shop cannot be removed.
    ///
    /// If the removed shop was the current one, the current index falls back
    /// to 0; if it sat before the current one, the index shifts down so it
    /// still names the same shop.
    pub fn remove_shop(&self, id: &ShopId) -> Result<()> {
        let mut list = self.inner.write();
        if list.shops.len() <= 1 {
            return Err(CoreError::Validation(
                "cannot remove the last shop".to_string(),
            ));
        }
        let idx = list
            .shops
            .iter()
            .position(|s| &s.id == id)
            .ok_or_else(|| CoreError::ShopNotFound { id: id.to_string() })?;
        list.shops.remove(idx);

        if idx == list.current {
            list.current = 0;
        } else if idx < list.current {
            list.current -= 1;
        }
        info!(shop_id = %id, current = list.current, "shop removed");
        Ok(())
    }

    pub fn set_current(&self, id: &ShopId) -> Result<()> {
        let mut list = self.inner.write();
        let idx = list
            .shops
            .iter()
            .position(|s| &s.id == id)
            .ok_or_else(|| CoreError::ShopNotFound { id: id.to_string() })?;
        list.current = idx;
        Ok(())
    }

    /// The active shop, or `None` when no shops are configured.
    pub fn current_shop(&self) -> Option<ShopIdentity> {
        let list = self.inner.read();
        list.shops
            .get(list.current)
            .or_else(|| list.shops.first())
            .cloned()
    }

    pub fn current_index(&self) -> usize {
        self.inner.read().current
    }

    /// Copy of the shop list plus current index, for persisting.
    pub fn snapshot(&self) -> (Vec<ShopIdentity>, usize) {
        let list = self.inner.read();
        (list.shops.clone(), list.current)
    }
}

impl ShopProvider for ShopRegistry {
    fn list_shops(&self) -> Vec<ShopIdentity> {
        self.inner.read().shops.clone()
    }

    fn get_shop(&self, id: &ShopId) -> Option<ShopIdentity> {
        self.inner.read().shops.iter().find(|s| &s.id == id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shop(id: &str) -> ShopIdentity {
        let mut s = ShopIdentity::new(&format!("Shop {id}"));
        s.id = ShopId::from(id);
        s
    }

    fn registry(ids: &[&str], current: usize) -> ShopRegistry {
        ShopRegistry::new(ids.iter().map(|id| shop(id)).collect(), current)
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let reg = registry(&["s1"], 0);
        assert!(reg.add_shop(shop("s1")).is_err());
        assert_eq!(reg.list_shops().len(), 1);
    }

    #[test]
    fn removing_current_shop_falls_back_to_first() {
        let reg = registry(&["s1", "s2", "s3"], 2);
        reg.remove_shop(&ShopId::from("s3")).unwrap();
        assert_eq!(reg.current_index(), 0);
        assert_eq!(reg.current_shop().unwrap().id, ShopId::from("s1"));
    }

    #[test]
    fn removing_earlier_shop_keeps_current_pointing_at_same_shop() {
        let reg = registry(&["s1", "s2", "s3"], 2);
        reg.remove_shop(&ShopId::from("s1")).unwrap();
        assert_eq!(reg.current_shop().unwrap().id, ShopId::from("s3"));
    }

    #[test]
    fn last_shop_cannot_be_removed() {
        let reg = registry(&["s1"], 0);
        let err = reg.remove_shop(&ShopId::from("s1")).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn unknown_shop_lookups_miss() {
        let reg = registry(&["s1", "s2"], 0);
        assert!(reg.get_shop(&ShopId::from("gone")).is_none());
        assert!(matches!(
            reg.update_shop(shop("gone")),
            Err(CoreError::ShopNotFound { .. })
        ));
    }

    #[test]
    fn out_of_range_current_index_is_clamped() {
        let reg = registry(&["s1", "s2"], 9);
        assert_eq!(reg.current_index(), 0);
    }
}
