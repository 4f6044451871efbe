use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::apartment::{AdType, Apartment, BuildingStatus, Coordinates, User};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Fixed slack added to a filter's max-distance when comparing against the
/// computed distance. Matching results were tuned against this margin.
pub const DISTANCE_TOLERANCE_M: f64 = 100.0;

/// A saved search. Every constraint is optional; an absent constraint never
/// excludes an apartment. A non-nil `pause_timestamp` deactivates the filter.
///
/// The same struct doubles as query criteria for the storage layer, which is
/// why `apartment_id` exists: it narrows an apartment query to a single id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    /// Set once a draft has been edited; a commit of an untouched draft is
    /// rejected. Never persisted.
    #[serde(skip)]
    pub is_update: bool,

    pub id: String,
    pub user: Option<User>,
    pub name: Option<String>,

    pub ad_type: Option<AdType>,
    pub building_status: Option<BuildingStatus>,
    pub district: HashSet<String>,
    pub city: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_rooms: Option<f64>,
    pub max_rooms: Option<f64>,
    pub min_area: Option<f64>,
    pub max_area: Option<f64>,
    pub is_owner: Option<bool>,
    pub coordinates: Option<Coordinates>,
    pub max_distance: Option<f64>,

    /// Unix timestamp set when the filter is paused; `None` means active.
    pub pause_timestamp: Option<i64>,
    /// Lower bound for history replay: the pause timestamp the filter
    /// carried when it was last reactivated.
    pub from_timestamp: Option<i64>,

    pub apartment_id: Option<i64>,
}

impl Filter {
    pub fn for_user(user_id: i64) -> Self {
        Filter {
            user: Some(User {
                id: user_id,
                ..User::default()
            }),
            ..Filter::default()
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user.map(|u| u.id).unwrap_or_default()
    }

    /// The matching predicate: paused filters never match, otherwise every
    /// present constraint must hold.
    pub fn is_fit(&self, a: &Apartment) -> bool {
        if self.pause_timestamp.is_some() {
            return false;
        }

        let mut fit = self.check_district(a) && self.check_distance(a);

        if let Some(ad_type) = self.ad_type {
            fit = fit && ad_type == a.ad_type;
        }
        if let Some(status) = self.building_status {
            fit = fit && status == a.building_status;
        }
        if let Some(city) = &self.city {
            if !a.city.is_empty() {
                fit = fit && a.city.contains(city.as_str());
            }
        }

        if let Some(min) = self.min_price {
            fit = fit && min <= a.price;
        }
        if let Some(max) = self.max_price {
            fit = fit && max >= a.price;
        }
        if let Some(min) = self.min_rooms {
            fit = fit && min <= a.rooms;
        }
        if let Some(max) = self.max_rooms {
            fit = fit && max >= a.rooms;
        }
        if let Some(min) = self.min_area {
            fit = fit && min <= a.area;
        }
        if let Some(max) = self.max_area {
            fit = fit && max >= a.area;
        }

        if let Some(is_owner) = self.is_owner {
            fit = fit && is_owner == a.is_owner;
        }

        fit
    }

    /// True when the filter has no district constraint, or any constrained
    /// district is a case-insensitive substring of the apartment's district.
    pub fn check_district(&self, a: &Apartment) -> bool {
        if self.district.is_empty() {
            return true;
        }

        let apartment_district = a.district.to_lowercase();
        self.district
            .iter()
            .any(|d| apartment_district.contains(&d.to_lowercase()))
    }

    /// True when either side lacks a location, except that a located filter
    /// rejects an apartment without coordinates.
    pub fn check_distance(&self, a: &Apartment) -> bool {
        let (Some(max_distance), Some(center)) = (self.max_distance, self.coordinates) else {
            return true;
        };

        let Some(coords) = a.coordinates else {
            return false;
        };

        distance(coords.lat, coords.lng, center.lat, center.lng)
            <= max_distance + DISTANCE_TOLERANCE_M
    }
}

/// Distance in meters between two points, using the scaled-Euclidean
/// approximation the whole system is calibrated against. This is NOT a
/// great-circle (haversine) distance; do not "fix" it, the tolerance
/// constants and stored filters depend on it.
pub fn distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let dlat = lat2.to_radians() - lat1.to_radians();
    let dlng = lng2.to_radians() - lng1.to_radians();

    EARTH_RADIUS_M * (dlat.powi(2) + dlng.powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

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
            district: "Vake".to_string(),
            city: "Tbilisi".to_string(),
            coordinates: None,
            comment: String::new(),
            order_date: Utc::now(),
            url: String::new(),
            photo_urls: Vec::new(),
            is_owner: false,
            matched: HashMap::new(),
        }
    }

    #[test]
    fn one_degree_of_latitude() {
        let d = distance(41.0, 44.0, 42.0, 44.0);
        assert!((d - 111_194.93).abs() < 0.01, "got {d}");
    }

    #[test]
    fn approximation_is_not_haversine() {
        // At 41.7N a true great-circle distance for this pair is ~1387m;
        // the calibrated approximation yields ~1572m.
        let d = distance(41.70, 44.78, 41.71, 44.79);
        assert!((d - 1572.53).abs() < 0.5, "got {d}");
    }

    #[test]
    fn paused_filter_never_fits() {
        let f = Filter {
            pause_timestamp: Some(Utc::now().timestamp()),
            ..Filter::default()
        };
        assert!(!f.is_fit(&apartment()));
    }

    #[test]
    fn empty_filter_fits_everything() {
        assert!(Filter::default().is_fit(&apartment()));
    }

    #[test]
    fn district_substring_is_case_insensitive() {
        let mut f = Filter::default();
        f.district.insert("vake".to_string());
        assert!(f.is_fit(&apartment()));

        f.district.clear();
        f.district.insert("Saburtalo".to_string());
        assert!(!f.is_fit(&apartment()));

        // Any district matching is enough.
        f.district.insert("VAKE".to_string());
        assert!(f.is_fit(&apartment()));
    }

    #[test]
    fn distance_constraint_uses_the_calibrated_approximation() {
        let mut a = apartment();
        a.coordinates = Some(Coordinates {
            lat: 41.70,
            lng: 44.78,
        });

        let mut f = Filter {
            coordinates: Some(Coordinates {
                lat: 41.71,
                lng: 44.79,
            }),
            max_distance: Some(2000.0),
            ..Filter::default()
        };
        assert!(f.is_fit(&a));

        // ~1572m under the approximation: outside 1400m + 100m tolerance,
        // even though a haversine distance (~1387m) would be inside.
        f.max_distance = Some(1400.0);
        assert!(!f.is_fit(&a));

        // A located filter rejects apartments without coordinates.
        f.max_distance = Some(2000.0);
        a.coordinates = None;
        assert!(!f.is_fit(&a));
    }

    #[test]
    fn price_range_end_to_end() {
        let a = apartment();

        let fit = Filter {
            min_price: Some(400.0),
            max_price: Some(600.0),
            city: Some("Tbilisi".to_string()),
            ..Filter::default()
        };
        assert!(fit.is_fit(&a));

        let too_expensive = Filter {
            min_price: Some(700.0),
            ..Filter::default()
        };
        assert!(!too_expensive.is_fit(&a));
    }

    #[test]
    fn bounds_are_inclusive_and_independent() {
        let a = apartment();

        let exact = Filter {
            min_rooms: Some(2.0),
            max_rooms: Some(2.0),
            min_area: Some(60.0),
            ..Filter::default()
        };
        assert!(exact.is_fit(&a));

        let min_only = Filter {
            min_area: Some(61.0),
            ..Filter::default()
        };
        assert!(!min_only.is_fit(&a));
    }

    #[test]
    fn owner_flag_must_match_when_set() {
        let a = apartment();

        let owners_only = Filter {
            is_owner: Some(true),
            ..Filter::default()
        };
        assert!(!owners_only.is_fit(&a));

        let agencies = Filter {
            is_owner: Some(false),
            ..Filter::default()
        };
        assert!(agencies.is_fit(&a));
    }
}
