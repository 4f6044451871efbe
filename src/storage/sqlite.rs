use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashSet;
use std::path::Path;
use tokio::sync::mpsc;

use super::{apartment_matches, Storage, StorageError};
use crate::domain::{AdType, Apartment, BuildingStatus, City, Coordinates, Filter, User};

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.message().contains("UNIQUE constraint failed") {
                return StorageError::Duplicate;
            }
        }
        StorageError::Backend(e.to_string())
    }
}

fn backend<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Backend(e.to_string())
}

#[derive(sqlx::FromRow)]
struct ApartmentRow {
    id: i64,
    ad_type: i64,
    building_status: i64,
    price: f64,
    rooms: f64,
    bedrooms: i64,
    floor: i64,
    area: f64,
    phone: String,
    district: String,
    city: String,
    lat: Option<f64>,
    lng: Option<f64>,
    comment: String,
    order_date: DateTime<Utc>,
    url: String,
    photo_urls: String,
    is_owner: bool,
}

impl ApartmentRow {
    fn into_apartment(self) -> Result<Apartment, StorageError> {
        let ad_type = AdType::from_i64(self.ad_type)
            .ok_or_else(|| backend(format!("unknown ad type {}", self.ad_type)))?;
        let building_status = BuildingStatus::from_i64(self.building_status)
            .ok_or_else(|| backend(format!("unknown building status {}", self.building_status)))?;
        let photo_urls: Vec<String> = serde_json::from_str(&self.photo_urls).map_err(backend)?;

        let coordinates = match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
            _ => None,
        };

        Ok(Apartment {
            id: self.id,
            ad_type,
            building_status,
            price: self.price,
            rooms: self.rooms,
            bedrooms: self.bedrooms,
            floor: self.floor,
            area: self.area,
            phone: self.phone,
            district: self.district,
            city: self.city,
            coordinates,
            comment: self.comment,
            order_date: self.order_date,
            url: self.url,
            photo_urls,
            is_owner: self.is_owner,
            matched: Default::default(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct FilterRow {
    id: String,
    user_id: Option<i64>,
    name: Option<String>,
    ad_type: Option<i64>,
    building_status: Option<i64>,
    districts: String,
    city: Option<String>,
    min_price: Option<f64>,
    max_price: Option<f64>,
    min_rooms: Option<f64>,
    max_rooms: Option<f64>,
    min_area: Option<f64>,
    max_area: Option<f64>,
    is_owner: Option<bool>,
    lat: Option<f64>,
    lng: Option<f64>,
    max_distance: Option<f64>,
    pause_timestamp: Option<i64>,
    from_timestamp: Option<i64>,
}

impl FilterRow {
    fn into_filter(self) -> Result<Filter, StorageError> {
        let district: HashSet<String> = serde_json::from_str(&self.districts).map_err(backend)?;

        let coordinates = match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
            _ => None,
        };

        Ok(Filter {
            is_update: false,
            id: self.id,
            user: self.user_id.map(|id| User {
                id,
                is_superuser: false,
            }),
            name: self.name,
            ad_type: self.ad_type.and_then(AdType::from_i64),
            building_status: self.building_status.and_then(BuildingStatus::from_i64),
            district,
            city: self.city,
            min_price: self.min_price,
            max_price: self.max_price,
            min_rooms: self.min_rooms,
            max_rooms: self.max_rooms,
            min_area: self.min_area,
            max_area: self.max_area,
            is_owner: self.is_owner,
            coordinates,
            max_distance: self.max_distance,
            pause_timestamp: self.pause_timestamp,
            from_timestamp: self.from_timestamp,
            apartment_id: None,
        })
    }
}

impl SqliteStorage {
    pub async fn new(database_path: &str) -> Result<Self, StorageError> {
        if let Some(parent) = Path::new(database_path).parent() {
            std::fs::create_dir_all(parent).map_err(backend)?;
        }

        let connection_string = if database_path.starts_with("sqlite:") {
            database_path.to_string()
        } else {
            format!("sqlite://{}?mode=rwc", database_path)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    async fn initialize_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS apartment (
                id INTEGER PRIMARY KEY,
                ad_type INTEGER NOT NULL,
                building_status INTEGER NOT NULL,
                price REAL NOT NULL,
                rooms REAL NOT NULL,
                bedrooms INTEGER NOT NULL,
                floor INTEGER NOT NULL,
                area REAL NOT NULL,
                phone TEXT NOT NULL,
                district TEXT NOT NULL,
                city TEXT NOT NULL,
                lat REAL,
                lng REAL,
                comment TEXT NOT NULL,
                order_date DATETIME NOT NULL,
                url TEXT NOT NULL,
                photo_urls TEXT NOT NULL DEFAULT '[]',
                is_owner INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS filter (
                id TEXT PRIMARY KEY,
                user_id INTEGER,
                name TEXT,
                ad_type INTEGER,
                building_status INTEGER,
                districts TEXT NOT NULL DEFAULT '[]',
                city TEXT,
                min_price REAL,
                max_price REAL,
                min_rooms REAL,
                max_rooms REAL,
                min_area REAL,
                max_area REAL,
                is_owner INTEGER,
                lat REAL,
                lng REAL,
                max_distance REAL,
                pause_timestamp INTEGER,
                from_timestamp INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS city (
                name TEXT PRIMARY KEY,
                districts TEXT NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("apartment database schema initialized");

        Ok(())
    }

    /// SELECT with the scalar criteria pushed into SQL; geo and exactness
    /// nuances are re-verified in Rust via `apartment_matches`.
    async fn query_apartments(&self, f: &Filter) -> Result<Vec<Apartment>, StorageError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, ad_type, building_status, price, rooms, bedrooms, floor, area, \
             phone, district, city, lat, lng, comment, order_date, url, photo_urls, is_owner \
             FROM apartment WHERE 1=1",
        );

        if let Some(id) = f.apartment_id {
            qb.push(" AND id = ").push_bind(id);
        }
        if let Some(ad_type) = f.ad_type {
            qb.push(" AND ad_type = ").push_bind(ad_type.as_i64());
        }
        if let Some(status) = f.building_status {
            qb.push(" AND building_status = ").push_bind(status.as_i64());
        }
        if !f.district.is_empty() {
            qb.push(" AND district IN (");
            {
                let mut sep = qb.separated(", ");
                for d in &f.district {
                    sep.push_bind(d.clone());
                }
                sep.push_bind("");
            }
            qb.push(")");
        }
        if let Some(city) = &f.city {
            qb.push(" AND city IN (").push_bind(city.clone());
            qb.push(", '')");
        }
        if let Some(min) = f.min_price {
            qb.push(" AND price >= ").push_bind(min);
        }
        if let Some(max) = f.max_price {
            qb.push(" AND price <= ").push_bind(max);
        }
        if let Some(min) = f.min_rooms {
            qb.push(" AND rooms >= ").push_bind(min);
        }
        if let Some(max) = f.max_rooms {
            qb.push(" AND rooms <= ").push_bind(max);
        }
        if let Some(min) = f.min_area {
            qb.push(" AND area >= ").push_bind(min);
        }
        if let Some(max) = f.max_area {
            qb.push(" AND area <= ").push_bind(max);
        }
        if let Some(is_owner) = f.is_owner {
            qb.push(" AND is_owner = ").push_bind(is_owner);
        }
        qb.push(" ORDER BY order_date");

        let rows: Vec<ApartmentRow> = qb.build_query_as().fetch_all(&self.pool).await?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let apartment = row.into_apartment()?;
            if apartment_matches(f, &apartment) {
                result.push(apartment);
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_apartment(&self, a: &Apartment) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO apartment (
                id, ad_type, building_status, price, rooms, bedrooms, floor, area,
                phone, district, city, lat, lng, comment, order_date, url,
                photo_urls, is_owner
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(a.id)
        .bind(a.ad_type.as_i64())
        .bind(a.building_status.as_i64())
        .bind(a.price)
        .bind(a.rooms)
        .bind(a.bedrooms)
        .bind(a.floor)
        .bind(a.area)
        .bind(&a.phone)
        .bind(&a.district)
        .bind(&a.city)
        .bind(a.coordinates.map(|c| c.lat))
        .bind(a.coordinates.map(|c| c.lng))
        .bind(&a.comment)
        .bind(a.order_date)
        .bind(&a.url)
        .bind(serde_json::to_string(&a.photo_urls).map_err(backend)?)
        .bind(a.is_owner)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_apartment(&self, a: &Apartment) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE apartment SET
                ad_type = ?, building_status = ?, price = ?, rooms = ?,
                bedrooms = ?, floor = ?, area = ?, phone = ?, district = ?,
                city = ?, lat = ?, lng = ?, comment = ?, order_date = ?,
                url = ?, photo_urls = ?, is_owner = ?
            WHERE id = ?
            "#,
        )
        .bind(a.ad_type.as_i64())
        .bind(a.building_status.as_i64())
        .bind(a.price)
        .bind(a.rooms)
        .bind(a.bedrooms)
        .bind(a.floor)
        .bind(a.area)
        .bind(&a.phone)
        .bind(&a.district)
        .bind(&a.city)
        .bind(a.coordinates.map(|c| c.lat))
        .bind(a.coordinates.map(|c| c.lng))
        .bind(&a.comment)
        .bind(a.order_date)
        .bind(&a.url)
        .bind(serde_json::to_string(&a.photo_urls).map_err(backend)?)
        .bind(a.is_owner)
        .bind(a.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn apartments(&self, f: &Filter) -> Result<mpsc::Receiver<Apartment>, StorageError> {
        let matching = self.query_apartments(f).await?;

        let (tx, rx) = mpsc::channel(matching.len().max(1));
        for a in matching {
            let _ = tx.try_send(a);
        }
        Ok(rx)
    }

    async fn apartment_count(&self, f: &Filter) -> Result<i64, StorageError> {
        Ok(self.query_apartments(f).await?.len() as i64)
    }

    async fn delete_apartment(&self, id: i64) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM apartment WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_apartments(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM apartment")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_filter(&self, f: &Filter) -> Result<(), StorageError> {
        let districts = serde_json::to_string(&f.district).map_err(backend)?;

        sqlx::query(
            r#"
            INSERT INTO filter (
                id, user_id, name, ad_type, building_status, districts, city,
                min_price, max_price, min_rooms, max_rooms, min_area, max_area,
                is_owner, lat, lng, max_distance, pause_timestamp, from_timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                name = excluded.name,
                ad_type = excluded.ad_type,
                building_status = excluded.building_status,
                districts = excluded.districts,
                city = excluded.city,
                min_price = excluded.min_price,
                max_price = excluded.max_price,
                min_rooms = excluded.min_rooms,
                max_rooms = excluded.max_rooms,
                min_area = excluded.min_area,
                max_area = excluded.max_area,
                is_owner = excluded.is_owner,
                lat = excluded.lat,
                lng = excluded.lng,
                max_distance = excluded.max_distance,
                pause_timestamp = excluded.pause_timestamp,
                from_timestamp = excluded.from_timestamp
            "#,
        )
        .bind(&f.id)
        .bind(f.user.map(|u| u.id))
        .bind(&f.name)
        .bind(f.ad_type.map(AdType::as_i64))
        .bind(f.building_status.map(BuildingStatus::as_i64))
        .bind(districts)
        .bind(&f.city)
        .bind(f.min_price)
        .bind(f.max_price)
        .bind(f.min_rooms)
        .bind(f.max_rooms)
        .bind(f.min_area)
        .bind(f.max_area)
        .bind(f.is_owner)
        .bind(f.coordinates.map(|c| c.lat))
        .bind(f.coordinates.map(|c| c.lng))
        .bind(f.max_distance)
        .bind(f.pause_timestamp)
        .bind(f.from_timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn filters(&self, criteria: &Filter) -> Result<Vec<Filter>, StorageError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, user_id, name, ad_type, building_status, districts, city, \
             min_price, max_price, min_rooms, max_rooms, min_area, max_area, \
             is_owner, lat, lng, max_distance, pause_timestamp, from_timestamp \
             FROM filter WHERE 1=1",
        );

        if !criteria.id.is_empty() {
            qb.push(" AND id = ").push_bind(criteria.id.clone());
        }
        if let Some(user) = criteria.user {
            qb.push(" AND user_id = ").push_bind(user.id);
        }
        if let Some(name) = &criteria.name {
            qb.push(" AND name = ").push_bind(name.clone());
        }
        qb.push(" ORDER BY id");

        let rows: Vec<FilterRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(FilterRow::into_filter).collect()
    }

    async fn delete_filter(&self, criteria: &Filter) -> Result<(), StorageError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM filter WHERE 1=1");

        if !criteria.id.is_empty() {
            qb.push(" AND id = ").push_bind(criteria.id.clone());
        }
        if let Some(user) = criteria.user {
            qb.push(" AND user_id = ").push_bind(user.id);
        }
        if let Some(name) = &criteria.name {
            qb.push(" AND name = ").push_bind(name.clone());
        }

        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn save_city(&self, c: &City) -> Result<(), StorageError> {
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT districts FROM city WHERE name = ?")
                .bind(&c.name)
                .fetch_optional(&self.pool)
                .await?;

        let mut districts = c.districts.clone();
        if let Some((stored,)) = existing {
            let stored: HashSet<String> = serde_json::from_str(&stored).map_err(backend)?;
            districts.extend(stored);
        }

        sqlx::query(
            r#"
            INSERT INTO city (name, districts) VALUES (?, ?)
            ON CONFLICT(name) DO UPDATE SET districts = excluded.districts
            "#,
        )
        .bind(&c.name)
        .bind(serde_json::to_string(&districts).map_err(backend)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn cities(&self) -> Result<Vec<City>, StorageError> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT name, districts FROM city")
            .fetch_all(&self.pool)
            .await?;

        let mut cities = Vec::with_capacity(rows.len());
        for (name, districts) in rows {
            cities.push(City {
                name,
                districts: serde_json::from_str(&districts).map_err(backend)?,
            });
        }
        Ok(cities)
    }
}
