use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AdType, Apartment, BuildingStatus, Coordinates};

pub const LISTING_PAGE_SIZE: i64 = 16;

const AD_URL_PREFIX: &str = "https://home.ss.ge/en/real-estate/";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingRequest {
    pub advanced_search: AdvancedSearch,
    pub real_estate_type: i64,
    pub currency_id: i64,
    pub order: i64,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedSearch {
    pub with_image_only: bool,
}

impl ListingRequest {
    pub fn for_page(page: i64) -> Self {
        Self {
            advanced_search: AdvancedSearch {
                with_image_only: true,
            },
            real_estate_type: 5,
            currency_id: 1,
            order: 1,
            page,
            page_size: LISTING_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListingPage {
    #[serde(rename = "realStateItemModel", default)]
    pub items: Vec<ListingItem>,
}

#[derive(Debug, Deserialize)]
pub struct ListingItem {
    #[serde(rename = "applicationId")]
    pub application_id: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdDetail {
    pub application_id: i64,
    pub is_inactive_application: bool,
    pub real_estate_deal_type_id: i64,
    pub real_estate_status_id: i64,
    pub address: Address,
    pub price: Price,
    pub app_images: Vec<AdImage>,
    pub application_phones: Vec<AdPhone>,
    pub description: Description,
    pub order_date: Option<DateTime<Utc>>,
    pub location_latitude: f64,
    pub location_longitude: f64,
    pub bedrooms: i64,
    pub floor: String,
    pub rooms: String,
    pub total_area: String,
    pub user_entity_type: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Address {
    pub city_title: String,
    pub subdistrict_title: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Price {
    pub price_usd: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdImage {
    pub file_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdPhone {
    pub phone_number: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Description {
    pub en: String,
}

impl AdDetail {
    pub fn ad_type(&self) -> Option<AdType> {
        match self.real_estate_deal_type_id {
            1 => Some(AdType::Rent),
            4 => Some(AdType::Sale),
            _ => None,
        }
    }

    pub fn building_status(&self) -> BuildingStatus {
        match self.real_estate_status_id {
            2 => BuildingStatus::New,
            3 => BuildingStatus::UnderConstruction,
            _ => BuildingStatus::Old,
        }
    }

    /// Convert into the domain model. `None` when the ad is inactive or
    /// carries a deal type other than rent or sale.
    pub fn into_apartment(self) -> Option<Apartment> {
        if self.is_inactive_application {
            return None;
        }
        let ad_type = self.ad_type()?;

        let coordinates = if self.location_latitude != 0.0 && self.location_longitude != 0.0 {
            Some(Coordinates {
                lat: self.location_latitude,
                lng: self.location_longitude,
            })
        } else {
            None
        };

        Some(Apartment {
            id: self.application_id,
            ad_type,
            building_status: self.building_status(),
            price: self.price.price_usd,
            rooms: self.rooms.parse().unwrap_or_default(),
            bedrooms: self.bedrooms,
            floor: self.floor.parse().unwrap_or_default(),
            area: self.total_area.parse().unwrap_or_default(),
            phone: self
                .application_phones
                .first()
                .map(|p| p.phone_number.clone())
                .unwrap_or_default(),
            district: prepare_title(&self.address.subdistrict_title),
            city: prepare_title(&self.address.city_title),
            coordinates,
            comment: self.description.en,
            order_date: self.order_date.unwrap_or_default(),
            url: format!("{}{}", AD_URL_PREFIX, self.application_id),
            photo_urls: self.app_images.into_iter().map(|i| i.file_name).collect(),
            is_owner: self.user_entity_type.eq_ignore_ascii_case("individual"),
            matched: Default::default(),
        })
    }
}

/// Title-case each word of an upstream label, which arrives in
/// inconsistent casing ("SABURTALO", "saburtalo", "Saburtalo").
pub fn prepare_title(title: &str) -> String {
    title
        .split_whitespace()
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
