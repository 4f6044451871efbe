use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdType {
    Rent,
    Sale,
}

impl AdType {
    pub fn as_i64(self) -> i64 {
        match self {
            AdType::Rent => 1,
            AdType::Sale => 2,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(AdType::Rent),
            2 => Some(AdType::Sale),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildingStatus {
    New,
    UnderConstruction,
    Old,
}

impl BuildingStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            BuildingStatus::New => 1,
            BuildingStatus::UnderConstruction => 2,
            BuildingStatus::Old => 3,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(BuildingStatus::New),
            2 => Some(BuildingStatus::UnderConstruction),
            3 => Some(BuildingStatus::Old),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// A single real-estate advertisement as seen by the rest of the system.
///
/// `matched` is transient: it is recomputed on every distribution cycle and
/// never persisted. It maps a user id to the names of that user's filters
/// which accepted this apartment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Apartment {
    pub id: i64,
    pub ad_type: AdType,
    pub building_status: BuildingStatus,
    pub price: f64,
    pub rooms: f64,
    pub bedrooms: i64,
    pub floor: i64,
    pub area: f64,
    pub phone: String,
    pub district: String,
    pub city: String,
    pub coordinates: Option<Coordinates>,
    pub comment: String,
    pub order_date: DateTime<Utc>,
    pub url: String,
    pub photo_urls: Vec<String>,
    pub is_owner: bool,

    #[serde(skip)]
    pub matched: HashMap<i64, Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct City {
    pub name: String,
    pub districts: HashSet<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub is_superuser: bool,
}
