use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

use super::{apartment_matches, filter_matches, Storage, StorageError};
use crate::domain::{Apartment, City, Filter};

/// In-process storage with the same criteria semantics as the SQLite
/// backend. Used by the integration tests and handy for local runs without
/// a database file.
#[derive(Default)]
pub struct MemoryStorage {
    apartments: Mutex<HashMap<i64, Apartment>>,
    filters: Mutex<HashMap<String, Filter>>,
    cities: Mutex<HashMap<String, City>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_apartment(&self, a: &Apartment) -> Result<(), StorageError> {
        let mut apartments = self.apartments.lock().unwrap_or_else(|e| e.into_inner());
        if apartments.contains_key(&a.id) {
            return Err(StorageError::Duplicate);
        }
        apartments.insert(a.id, a.clone());
        Ok(())
    }

    async fn update_apartment(&self, a: &Apartment) -> Result<(), StorageError> {
        self.apartments.lock().unwrap_or_else(|e| e.into_inner()).insert(a.id, a.clone());
        Ok(())
    }

    async fn apartments(&self, f: &Filter) -> Result<mpsc::Receiver<Apartment>, StorageError> {
        let mut matching: Vec<Apartment> = self
            .apartments
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|a| apartment_matches(f, a))
            .cloned()
            .collect();
        matching.sort_by_key(|a| a.id);

        let (tx, rx) = mpsc::channel(matching.len().max(1));
        for a in matching {
            // Capacity covers every element, so this cannot fail.
            let _ = tx.try_send(a);
        }
        Ok(rx)
    }

    async fn apartment_count(&self, f: &Filter) -> Result<i64, StorageError> {
        let count = self
            .apartments
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|a| apartment_matches(f, a))
            .count();
        Ok(count as i64)
    }

    async fn delete_apartment(&self, id: i64) -> Result<(), StorageError> {
        self.apartments.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
        Ok(())
    }

    async fn delete_apartments(&self) -> Result<(), StorageError> {
        self.apartments.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }

    async fn save_filter(&self, f: &Filter) -> Result<(), StorageError> {
        self.filters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(f.id.clone(), f.clone());
        Ok(())
    }

    async fn filters(&self, criteria: &Filter) -> Result<Vec<Filter>, StorageError> {
        let mut matching: Vec<Filter> = self
            .filters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|f| filter_matches(criteria, f))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }

    async fn delete_filter(&self, criteria: &Filter) -> Result<(), StorageError> {
        self.filters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, f| !filter_matches(criteria, f));
        Ok(())
    }

    async fn save_city(&self, c: &City) -> Result<(), StorageError> {
        let mut cities = self.cities.lock().unwrap_or_else(|e| e.into_inner());
        let entry = cities.entry(c.name.clone()).or_insert_with(|| City {
            name: c.name.clone(),
            districts: Default::default(),
        });
        entry.districts.extend(c.districts.iter().cloned());
        Ok(())
    }

    async fn cities(&self) -> Result<Vec<City>, StorageError> {
        Ok(self.cities.lock().unwrap_or_else(|e| e.into_inner()).values().cloned().collect())
    }
}
