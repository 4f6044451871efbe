pub mod memory;
pub mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{Apartment, City, Filter};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An insert hit an already-persisted apartment id. The orchestrator
    /// relies on detecting this to turn a re-ingested apartment into a
    /// silent update.
    #[error("record already exists")]
    Duplicate,
    #[error("storage backend: {0}")]
    Backend(String),
}

/// Persistence contract. A `Filter` doubles as query criteria: present
/// fields constrain, absent fields do not.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    async fn save_apartment(&self, a: &Apartment) -> Result<(), StorageError>;
    async fn update_apartment(&self, a: &Apartment) -> Result<(), StorageError>;
    /// Streams persisted apartments matching the criteria.
    async fn apartments(&self, f: &Filter) -> Result<mpsc::Receiver<Apartment>, StorageError>;
    async fn apartment_count(&self, f: &Filter) -> Result<i64, StorageError>;
    async fn delete_apartment(&self, id: i64) -> Result<(), StorageError>;
    async fn delete_apartments(&self) -> Result<(), StorageError>;

    async fn save_filter(&self, f: &Filter) -> Result<(), StorageError>;
    async fn filters(&self, criteria: &Filter) -> Result<Vec<Filter>, StorageError>;
    async fn delete_filter(&self, criteria: &Filter) -> Result<(), StorageError>;

    async fn save_city(&self, c: &City) -> Result<(), StorageError>;
    async fn cities(&self) -> Result<Vec<City>, StorageError>;
}

/// Query semantics for apartments, shared by both backends. Unlike the live
/// matching predicate, stored-data queries compare districts and cities by
/// exact name (or an empty recorded value) and apply no distance tolerance.
pub(crate) fn apartment_matches(f: &Filter, a: &Apartment) -> bool {
    if let Some(id) = f.apartment_id {
        if a.id != id {
            return false;
        }
    }

    if let Some(ad_type) = f.ad_type {
        if a.ad_type != ad_type {
            return false;
        }
    }
    if let Some(status) = f.building_status {
        if a.building_status != status {
            return false;
        }
    }

    if !f.district.is_empty() && !a.district.is_empty() && !f.district.contains(&a.district) {
        return false;
    }
    if let Some(city) = &f.city {
        if !a.city.is_empty() && a.city != *city {
            return false;
        }
    }

    if let Some(min) = f.min_price {
        if a.price < min {
            return false;
        }
    }
    if let Some(max) = f.max_price {
        if a.price > max {
            return false;
        }
    }
    if let Some(min) = f.min_rooms {
        if a.rooms < min {
            return false;
        }
    }
    if let Some(max) = f.max_rooms {
        if a.rooms > max {
            return false;
        }
    }
    if let Some(min) = f.min_area {
        if a.area < min {
            return false;
        }
    }
    if let Some(max) = f.max_area {
        if a.area > max {
            return false;
        }
    }

    if let Some(is_owner) = f.is_owner {
        if a.is_owner != is_owner {
            return false;
        }
    }

    if let (Some(center), Some(max_distance)) = (f.coordinates, f.max_distance) {
        match a.coordinates {
            Some(c) => {
                if crate::domain::distance(c.lat, c.lng, center.lat, center.lng) > max_distance {
                    return false;
                }
            }
            None => return false,
        }
    }

    if let Some(from) = f.from_timestamp {
        if a.order_date.timestamp() < from {
            return false;
        }
    }

    true
}

/// Query semantics for stored filters: id, owning user, and name are the
/// only recognized criteria.
pub(crate) fn filter_matches(criteria: &Filter, f: &Filter) -> bool {
    if !criteria.id.is_empty() && f.id != criteria.id {
        return false;
    }
    if let Some(user) = criteria.user {
        if f.user_id() != user.id {
            return false;
        }
    }
    if let Some(name) = &criteria.name {
        if f.name.as_deref() != Some(name.as_str()) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AdType, BuildingStatus, User};
    use chrono::{TimeZone, Utc};

    fn apartment(id: i64) -> Apartment {
        Apartment {
            id,
            ad_type: AdType::Rent,
            building_status: BuildingStatus::Old,
            price: 500.0,
            rooms: 2.0,
            bedrooms: 1,
            floor: 3,
            area: 60.0,
            phone: String::new(),
            district: "Vake".to_string(),
            city: "Tbilisi".to_string(),
            coordinates: None,
            comment: String::new(),
            order_date: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            url: String::new(),
            photo_urls: Vec::new(),
            is_owner: false,
            matched: Default::default(),
        }
    }

    #[test]
    fn stored_query_district_is_exact() {
        let mut f = Filter::default();
        f.district.insert("Va".to_string());
        // Substring is a live-predicate nicety; stored queries need the
        // canonicalized name.
        assert!(!apartment_matches(&f, &apartment(1)));

        f.district.insert("Vake".to_string());
        assert!(apartment_matches(&f, &apartment(1)));
    }

    #[test]
    fn from_timestamp_bounds_the_listing_date() {
        let f = Filter {
            from_timestamp: Some(1_700_000_001),
            ..Filter::default()
        };
        assert!(!apartment_matches(&f, &apartment(1)));

        let f = Filter {
            from_timestamp: Some(1_700_000_000),
            ..Filter::default()
        };
        assert!(apartment_matches(&f, &apartment(1)));
    }

    #[test]
    fn filter_criteria_by_user_and_name() {
        let stored = Filter {
            id: "abc".to_string(),
            user: Some(User {
                id: 7,
                is_superuser: false,
            }),
            name: Some("home".to_string()),
            ..Filter::default()
        };

        assert!(filter_matches(&Filter::for_user(7), &stored));
        assert!(!filter_matches(&Filter::for_user(8), &stored));

        let by_name = Filter {
            name: Some("home".to_string()),
            ..Filter::default()
        };
        assert!(filter_matches(&by_name, &stored));

        let by_id = Filter {
            id: "abc".to_string(),
            ..Filter::default()
        };
        assert!(filter_matches(&by_id, &stored));
    }
}
