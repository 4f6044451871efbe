use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{Apartment, Filter, FilterError};
use crate::storage::Storage;

/// Stored filters plus an in-memory mirror, so matching an incoming
/// apartment against every filter never touches the database.
pub struct FilterRegistry {
    storage: Arc<dyn Storage>,
    mirror: RwLock<HashMap<String, Filter>>,
}

impl FilterRegistry {
    pub async fn new(storage: Arc<dyn Storage>) -> Result<Self, FilterError> {
        let stored = storage.filters(&Filter::default()).await?;

        let mut mirror = HashMap::with_capacity(stored.len());
        for f in stored {
            mirror.insert(f.id.clone(), f);
        }
        tracing::info!("📋 Loaded {} filters", mirror.len());

        Ok(Self {
            storage,
            mirror: RwLock::new(mirror),
        })
    }

    /// Persist a filter and mirror it. A filter without an id is new and
    /// gets one; re-saving an existing filter carries its pause timestamp
    /// over as the from-timestamp, so a resumed filter only matches ads
    /// newer than the pause.
    pub async fn add(&self, mut f: Filter) -> Result<Filter, FilterError> {
        if f.id.is_empty() {
            f.id = Uuid::new_v4().to_string();
        }
        // The edit marker is a draft-lifetime flag; a committed filter
        // must come back pristine no matter which backend stored it.
        f.is_update = false;

        let mut mirror = self.mirror.write().await;
        if let Some(previous) = mirror.get(&f.id) {
            f.from_timestamp = previous.pause_timestamp;
        }

        self.storage.save_filter(&f).await?;
        mirror.insert(f.id.clone(), f.clone());

        Ok(f)
    }

    /// Stamp the apartment with every matching filter, keyed by user id.
    /// Any previous match annotations are discarded first.
    pub async fn annotate(&self, a: &mut Apartment) {
        a.matched.clear();

        let mirror = self.mirror.read().await;
        for f in mirror.values() {
            if !f.is_fit(a) {
                continue;
            }
            if let (Some(user), Some(name)) = (f.user, f.name.clone()) {
                a.matched.entry(user.id).or_default().push(name);
            }
        }
    }

    pub async fn get(&self, criteria: &Filter) -> Result<Filter, FilterError> {
        let found = self.storage.filters(criteria).await?;

        let mut mirror = self.mirror.write().await;
        for f in &found {
            mirror.insert(f.id.clone(), f.clone());
        }

        found.into_iter().next().ok_or(FilterError::NotFound)
    }

    pub async fn get_for_user(&self, user_id: i64) -> Result<Vec<Filter>, FilterError> {
        let criteria = Filter::for_user(user_id);
        let found = self.storage.filters(&criteria).await?;

        let mut mirror = self.mirror.write().await;
        for f in &found {
            mirror.insert(f.id.clone(), f.clone());
        }

        Ok(found)
    }

    /// Delete every stored filter matching the criteria, dropping each
    /// from the mirror as it goes.
    pub async fn delete(&self, criteria: &Filter) -> Result<(), FilterError> {
        let found = self.storage.filters(criteria).await?;

        let mut mirror = self.mirror.write().await;
        for f in found {
            let mut single = Filter::default();
            single.id = f.id.clone();
            self.storage.delete_filter(&single).await?;
            mirror.remove(&f.id);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AdType, BuildingStatus, User};
    use crate::storage::MemoryStorage;
    use chrono::Utc;

    fn filter_for(user_id: i64, name: &str) -> Filter {
        let mut f = Filter::default();
        f.user = Some(User {
            id: user_id,
            ..Default::default()
        });
        f.name = Some(name.to_string());
        f
    }

    fn apartment() -> Apartment {
        Apartment {
            id: 1,
            ad_type: AdType::Rent,
            building_status: BuildingStatus::Old,
            price: 500.0,
            rooms: 2.0,
            bedrooms: 1,
            floor: 3,
            area: 60.0,
            phone: String::new(),
            district: "Vake".into(),
            city: "Tbilisi".into(),
            coordinates: None,
            comment: String::new(),
            order_date: Utc::now(),
            url: String::new(),
            photo_urls: Vec::new(),
            is_owner: false,
            matched: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn add_assigns_an_id_to_new_filters() {
        let storage = Arc::new(MemoryStorage::new());
        let registry = FilterRegistry::new(storage).await.unwrap();

        let saved = registry.add(filter_for(10, "vake")).await.unwrap();
        assert!(!saved.id.is_empty());

        let again = registry.add(saved.clone()).await.unwrap();
        assert_eq!(again.id, saved.id);
    }

    #[tokio::test]
    async fn committed_filters_shed_the_edit_marker() {
        let storage = Arc::new(MemoryStorage::new());
        let registry = FilterRegistry::new(storage).await.unwrap();

        let mut f = filter_for(10, "vake");
        f.is_update = true;
        let saved = registry.add(f).await.unwrap();
        assert!(!saved.is_update);

        let mut lookup = Filter::for_user(10);
        lookup.id = saved.id.clone();
        let reloaded = registry.get(&lookup).await.unwrap();
        assert!(!reloaded.is_update);
    }

    #[tokio::test]
    async fn resaving_carries_the_pause_timestamp_forward() {
        let storage = Arc::new(MemoryStorage::new());
        let registry = FilterRegistry::new(storage).await.unwrap();

        let mut f = registry.add(filter_for(10, "vake")).await.unwrap();
        f.pause_timestamp = Some(1_700_000_000);
        let paused = registry.add(f).await.unwrap();

        let mut resumed = paused.clone();
        resumed.pause_timestamp = None;
        let resumed = registry.add(resumed).await.unwrap();

        assert_eq!(resumed.from_timestamp, Some(1_700_000_000));
    }

    #[tokio::test]
    async fn annotate_collects_matching_filter_names_per_user() {
        let storage = Arc::new(MemoryStorage::new());
        let registry = FilterRegistry::new(storage).await.unwrap();

        registry.add(filter_for(10, "anything")).await.unwrap();

        let mut miss = filter_for(11, "expensive only");
        miss.min_price = Some(2_000.0);
        registry.add(miss).await.unwrap();

        let mut a = apartment();
        a.matched.insert(99, vec!["stale".into()]);
        registry.annotate(&mut a).await;

        assert_eq!(a.matched.get(&10), Some(&vec!["anything".to_string()]));
        assert!(!a.matched.contains_key(&11));
        assert!(!a.matched.contains_key(&99));
    }

    #[tokio::test]
    async fn delete_removes_every_filter_of_the_user() {
        let storage = Arc::new(MemoryStorage::new());
        let registry = FilterRegistry::new(storage).await.unwrap();

        registry.add(filter_for(10, "one")).await.unwrap();
        registry.add(filter_for(10, "two")).await.unwrap();

        registry.delete(&Filter::for_user(10)).await.unwrap();

        assert!(registry.get_for_user(10).await.unwrap().is_empty());

        let mut a = apartment();
        registry.annotate(&mut a).await;
        assert!(a.matched.is_empty());
    }

    #[tokio::test]
    async fn get_returns_not_found_for_unknown_criteria() {
        let storage = Arc::new(MemoryStorage::new());
        let registry = FilterRegistry::new(storage).await.unwrap();

        let err = registry.get(&filter_for(1, "ghost")).await.unwrap_err();
        assert!(matches!(err, FilterError::NotFound));
    }
}
