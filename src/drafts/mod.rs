use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::{AdType, BuildingStatus, Coordinates, Filter, FilterError, User};

/// Radius applied when a location is set without an explicit distance.
pub const DEFAULT_MAX_DISTANCE_M: f64 = 5_000.0;

/// One edit to a draft filter. Every variant marks the draft as updated;
/// a draft that was never edited cannot be committed.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterChange {
    Name(String),
    AdType(Option<AdType>),
    BuildingStatus(Option<BuildingStatus>),
    /// Changing the city invalidates any chosen districts.
    City(Option<String>),
    /// Toggle one district in or out of the set; `None` clears the set.
    ToggleDistrict(Option<String>),
    MinPrice(Option<f64>),
    MaxPrice(Option<f64>),
    MinRooms(Option<f64>),
    MaxRooms(Option<f64>),
    MinArea(Option<f64>),
    MaxArea(Option<f64>),
    /// Setting a location applies the default radius; clearing it also
    /// clears the radius.
    Location(Option<Coordinates>),
    /// Clearing the distance also clears the location.
    MaxDistance(Option<f64>),
    OwnerOnly(Option<bool>),
    TogglePause,
}

pub fn apply_change(f: &mut Filter, change: FilterChange) {
    f.is_update = true;

    match change {
        FilterChange::Name(name) => f.name = Some(name),
        FilterChange::AdType(ad_type) => f.ad_type = ad_type,
        FilterChange::BuildingStatus(status) => f.building_status = status,
        FilterChange::City(city) => {
            f.city = city;
            f.district.clear();
        }
        FilterChange::ToggleDistrict(None) => f.district.clear(),
        FilterChange::ToggleDistrict(Some(district)) => {
            if !f.district.remove(&district) {
                f.district.insert(district);
            }
        }
        FilterChange::MinPrice(v) => f.min_price = v,
        FilterChange::MaxPrice(v) => f.max_price = v,
        FilterChange::MinRooms(v) => f.min_rooms = v,
        FilterChange::MaxRooms(v) => f.max_rooms = v,
        FilterChange::MinArea(v) => f.min_area = v,
        FilterChange::MaxArea(v) => f.max_area = v,
        FilterChange::Location(coordinates) => {
            f.coordinates = coordinates;
            f.max_distance = match coordinates {
                Some(_) => Some(DEFAULT_MAX_DISTANCE_M),
                None => None,
            };
        }
        FilterChange::MaxDistance(v) => {
            f.max_distance = v;
            if v.is_none() {
                f.coordinates = None;
            }
        }
        FilterChange::OwnerOnly(v) => f.is_owner = v,
        FilterChange::TogglePause => {
            f.pause_timestamp = match f.pause_timestamp {
                Some(_) => None,
                None => Some(chrono::Utc::now().timestamp()),
            };
        }
    }
}

/// A draft must be named, touched at least once, and carry coherent
/// ranges before it can be committed.
pub fn validate(f: &Filter) -> Result<(), FilterError> {
    if f.name.is_none() {
        return Err(FilterError::NameNotSet);
    }
    if !f.is_update {
        return Err(FilterError::NotChanged);
    }

    if let (Some(min), Some(max)) = (f.min_price, f.max_price) {
        if min > max {
            return Err(FilterError::MinPriceAboveMax);
        }
    }
    if let (Some(min), Some(max)) = (f.min_rooms, f.max_rooms) {
        if min > max {
            return Err(FilterError::MinRoomsAboveMax);
        }
    }
    if let (Some(min), Some(max)) = (f.min_area, f.max_area) {
        if min > max {
            return Err(FilterError::MinAreaAboveMax);
        }
    }

    Ok(())
}

/// Per-user draft filters being edited before a commit.
pub struct DraftStore {
    drafts: RwLock<HashMap<i64, Filter>>,
}

impl DraftStore {
    pub fn new() -> Self {
        Self {
            drafts: RwLock::new(HashMap::new()),
        }
    }

    /// Start a fresh draft for the user, replacing any previous one.
    /// New drafts search for rentals until told otherwise.
    pub fn begin(&self, user: User) -> Filter {
        let mut draft = Filter::default();
        draft.user = Some(user);
        draft.ad_type = Some(AdType::Rent);

        self.drafts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user.id, draft.clone());
        draft
    }

    /// Make an existing filter the user's draft for further editing.
    pub fn replace(&self, user_id: i64, filter: Filter) {
        self.drafts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id, filter);
    }

    pub fn get(&self, user_id: i64) -> Result<Filter, FilterError> {
        self.drafts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&user_id)
            .cloned()
            .ok_or(FilterError::DraftNotFound)
    }

    pub fn apply(&self, user_id: i64, change: FilterChange) -> Result<Filter, FilterError> {
        let mut drafts = self.drafts.write().unwrap_or_else(|e| e.into_inner());
        let draft = drafts.get_mut(&user_id).ok_or(FilterError::DraftNotFound)?;
        apply_change(draft, change);
        Ok(draft.clone())
    }

    pub fn discard(&self, user_id: i64) {
        self.drafts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&user_id);
    }
}

impl Default for DraftStore {
    fn default() -> Self {
        Self::new()
    }
}
