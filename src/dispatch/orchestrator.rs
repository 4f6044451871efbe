use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch};

use super::history::HistoryReplays;
use super::subscription::SubscriptionHub;
use crate::api::ApartmentProvider;
use crate::core::Config;
use crate::domain::{Apartment, Filter, FilterError, User};
use crate::drafts::{self, DraftStore, FilterChange};
use crate::filters::FilterRegistry;
use crate::storage::{Storage, StorageError};

/// Lifecycle of the orchestrator. Stopped is terminal; a stopped
/// instance is not restartable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Idle = 0,
    Running = 1,
    Stopped = 2,
}

/// Wires the scanner output to persistence, matching and delivery, and
/// exposes the filter editing surface to the frontend.
///
/// Responsibilities per incoming apartment: canonicalize its district,
/// persist it (an already-known id becomes an update and is not
/// re-announced), annotate it with every matching filter, and broadcast
/// it to the matched subscribers. A periodic sweep drops stored ads
/// that have gone off-market.
pub struct Orchestrator {
    storage: Arc<dyn Storage>,
    provider: Arc<dyn ApartmentProvider>,
    registry: Arc<FilterRegistry>,
    drafts: DraftStore,
    hub: SubscriptionHub,
    history: HistoryReplays,

    cities: RwLock<HashMap<String, Vec<String>>>,
    state: AtomicU8,
    shutdown_tx: watch::Sender<bool>,
    sweep_interval: std::time::Duration,
}

impl Orchestrator {
    pub fn new(
        storage: Arc<dyn Storage>,
        provider: Arc<dyn ApartmentProvider>,
        registry: Arc<FilterRegistry>,
        config: &Config,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            storage,
            provider,
            registry,
            drafts: DraftStore::new(),
            hub: SubscriptionHub::new(),
            history: HistoryReplays::new(),
            cities: RwLock::new(HashMap::new()),
            state: AtomicU8::new(State::Idle as u8),
            shutdown_tx,
            sweep_interval: config.server.sweep_interval,
        }
    }

    /// Start consuming the scanner's channel. Fails when the city
    /// catalogue cannot be loaded; everything downstream needs it.
    pub async fn start(self: &Arc<Self>, mut watcher_rx: mpsc::Receiver<Apartment>) -> Result<()> {
        if self
            .state
            .compare_exchange(
                State::Idle as u8,
                State::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(anyhow!("Orchestrator has already been started"));
        }

        if let Err(e) = self.refresh_cities().await {
            self.state.store(State::Idle as u8, Ordering::SeqCst);
            return Err(e);
        }

        tracing::info!(
            "🚀 Orchestrator starting (sweep every {:?})",
            self.sweep_interval
        );

        let sweeper = Arc::clone(self);
        tokio::spawn(async move {
            sweeper.sweep_saved_apartments().await;
        });

        let orchestrator = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + orchestrator.sweep_interval;
            let mut sweep = tokio::time::interval_at(start, orchestrator.sweep_interval);

            loop {
                tokio::select! {
                    apartment = watcher_rx.recv() => {
                        let Some(apartment) = apartment else {
                            tracing::info!("Scanner channel closed, orchestrator exiting");
                            return;
                        };
                        orchestrator.process_apartment(apartment).await;
                    }
                    _ = sweep.tick() => {
                        orchestrator.sweep_saved_apartments().await;
                        if let Err(e) = orchestrator.refresh_cities().await {
                            tracing::error!("Failed to refresh cities: {}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Orchestrator stopped");
                        return;
                    }
                }
            }
        });

        Ok(())
    }

    pub fn stop(&self) {
        self.state.store(State::Stopped as u8, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
        self.hub.close_all();
    }

    pub fn state(&self) -> State {
        match self.state.load(Ordering::SeqCst) {
            0 => State::Idle,
            1 => State::Running,
            _ => State::Stopped,
        }
    }

    async fn process_apartment(&self, apartment: Apartment) {
        let Some(mut apartment) = self.persist(apartment).await else {
            return;
        };

        self.registry.annotate(&mut apartment).await;
        if apartment.matched.is_empty() {
            return;
        }

        tracing::info!(
            "🏠 Apartment {} matched {} users",
            apartment.id,
            apartment.matched.len()
        );
        self.hub.broadcast(&apartment);
    }

    /// Persist an incoming apartment. Returns `None` when the ad was
    /// already stored (saved as an update, not re-announced) or when
    /// persistence failed.
    async fn persist(&self, mut apartment: Apartment) -> Option<Apartment> {
        self.canonicalize_district(&mut apartment).await;

        match self.storage.save_apartment(&apartment).await {
            Ok(()) => Some(apartment),
            Err(StorageError::Duplicate) => {
                if let Err(e) = self.storage.update_apartment(&apartment).await {
                    tracing::error!("Failed to update apartment {}: {}", apartment.id, e);
                }
                None
            }
            Err(e) => {
                tracing::error!("Failed to save apartment {}: {}", apartment.id, e);
                None
            }
        }
    }

    /// Replace the ad's district with the catalogued one it contains,
    /// e.g. "Vake District" becomes "Vake". An unknown district extends
    /// the stored city catalogue instead.
    async fn canonicalize_district(&self, apartment: &mut Apartment) {
        let canonical = {
            let cities = self.cities.read().unwrap_or_else(|e| e.into_inner());
            cities.get(&apartment.city).and_then(|districts| {
                districts
                    .iter()
                    .find(|d| apartment.district.contains(d.as_str()))
                    .cloned()
            })
        };

        match canonical {
            Some(district) => apartment.district = district,
            None => {
                let mut city = crate::domain::City {
                    name: apartment.city.clone(),
                    districts: Default::default(),
                };
                if !apartment.district.is_empty() {
                    city.districts.insert(apartment.district.clone());
                }
                if let Err(e) = self.storage.save_city(&city).await {
                    tracing::error!("Failed to save city {}: {}", city.name, e);
                }
            }
        }
    }

    /// Re-check an ad against the provider. Keeps it on any error;
    /// drops it from storage and the seen cache once it is gone or
    /// stale upstream.
    async fn check_apartment(&self, apartment: &Apartment) -> bool {
        match self.provider.is_available(apartment.id).await {
            Err(e) => {
                tracing::warn!("Failed to check apartment {}: {}", apartment.id, e);
                true
            }
            Ok(true) => true,
            Ok(false) => {
                self.provider.clear_seen(apartment.id);
                if let Err(e) = self.storage.delete_apartment(apartment.id).await {
                    tracing::error!("Failed to delete apartment {}: {}", apartment.id, e);
                }
                tracing::info!("🗑️ Dropped off-market apartment {}", apartment.url);
                false
            }
        }
    }

    async fn sweep_saved_apartments(&self) {
        let mut rx = match self.storage.apartments(&Filter::default()).await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::error!("Failed to load stored apartments for sweep: {}", e);
                return;
            }
        };

        let mut checked = 0usize;
        while let Some(apartment) = rx.recv().await {
            self.check_apartment(&apartment).await;
            checked += 1;
        }
        tracing::info!("🧹 Sweep checked {} stored apartments", checked);
    }

    async fn refresh_cities(&self) -> Result<()> {
        let cities = self.storage.cities().await?;

        let mut map = HashMap::with_capacity(cities.len());
        for city in cities {
            map.insert(city.name, city.districts.into_iter().collect());
        }

        *self.cities.write().unwrap_or_else(|e| e.into_inner()) = map;
        Ok(())
    }

    /// Drop everything stored and rebuild the inventory from a full feed
    /// walk. The backfill is only persisted; subscribers hear nothing and
    /// no match annotation happens.
    pub async fn refresh_all(
        &self,
        mut source: mpsc::Receiver<Apartment>,
    ) -> Result<(), StorageError> {
        self.storage.delete_apartments().await?;

        let mut stored = 0usize;
        while let Some(apartment) = source.recv().await {
            self.storage.save_apartment(&apartment).await?;
            stored += 1;
        }

        tracing::info!("♻️ Rebuilt the inventory with {} apartments", stored);
        Ok(())
    }

    // --- filter editing surface ---

    pub fn begin_draft(&self, user: User) -> Filter {
        self.drafts.begin(user)
    }

    pub fn draft(&self, user_id: i64) -> Result<Filter, FilterError> {
        self.drafts.get(user_id)
    }

    pub fn discard_draft(&self, user_id: i64) {
        self.drafts.discard(user_id)
    }

    /// Load an existing filter into the user's draft slot for editing.
    pub async fn edit_filter(&self, user_id: i64, filter_id: &str) -> Result<Filter, FilterError> {
        let mut criteria = Filter::for_user(user_id);
        criteria.id = filter_id.to_string();

        let filter = self.registry.get(&criteria).await?;
        self.drafts.replace(user_id, filter.clone());
        Ok(filter)
    }

    /// Apply one edit to the user's draft. Renaming a draft to the name
    /// of an already-saved filter loads that filter instead, so the
    /// user continues editing the existing one.
    pub async fn change_draft(
        &self,
        user_id: i64,
        change: FilterChange,
    ) -> Result<Filter, FilterError> {
        if let FilterChange::Name(name) = &change {
            let mut criteria = Filter::for_user(user_id);
            criteria.name = Some(name.clone());

            match self.registry.get(&criteria).await {
                Ok(existing) => {
                    self.drafts.replace(user_id, existing.clone());
                    return Ok(existing);
                }
                Err(FilterError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }

        self.drafts.apply(user_id, change)
    }

    /// Commit the user's draft. Returns how many stored apartments the
    /// filter already matches; a paused filter reports zero. Ordinary
    /// users hold at most one filter, superusers are unrestricted.
    pub async fn save_filter(&self, user: User) -> Result<i64, FilterError> {
        let mut draft = self.drafts.get(user.id)?;
        draft.user = Some(user);

        drafts::validate(&draft)?;

        let existing = self.registry.get_for_user(user.id).await?;
        if let Some(first) = existing.first() {
            if first.id != draft.id && !user.is_superuser {
                return Err(FilterError::LimitExceeded);
            }
        }

        if !draft.id.is_empty() {
            self.history.stop(&draft.id);
        }

        let saved = self.registry.add(draft).await?;

        let count = if saved.pause_timestamp.is_some() {
            0
        } else {
            self.storage.apartment_count(&saved).await?
        };

        self.drafts.discard(user.id);
        tracing::info!(
            "💾 Saved filter {:?} for user {} ({} stored matches)",
            saved.name,
            user.id,
            count
        );

        Ok(count)
    }

    pub async fn filter(&self, criteria: &Filter) -> Result<Filter, FilterError> {
        self.registry.get(criteria).await
    }

    pub async fn filters_for_user(&self, user_id: i64) -> Result<Vec<Filter>, FilterError> {
        self.registry.get_for_user(user_id).await
    }

    pub async fn delete_filter(&self, criteria: &Filter) -> Result<(), FilterError> {
        if !criteria.id.is_empty() {
            self.history.stop(&criteria.id);
        }
        self.registry.delete(criteria).await
    }

    /// Delete every filter of a departing user and stop their replays.
    pub async fn disconnect_user(&self, user_id: i64) -> Result<(), FilterError> {
        let filters = self.registry.get_for_user(user_id).await?;
        for f in &filters {
            self.history.stop(&f.id);
        }
        self.drafts.discard(user_id);
        self.registry.delete(&Filter::for_user(user_id)).await
    }

    pub async fn cities(&self) -> Result<HashMap<String, Vec<String>>, StorageError> {
        let cities = self.storage.cities().await?;
        Ok(cities
            .into_iter()
            .map(|c| (c.name, c.districts.into_iter().collect()))
            .collect())
    }

    pub fn subscribe(&self, user_id: i64) -> mpsc::Receiver<Apartment> {
        self.hub.subscribe(user_id)
    }

    pub fn unsubscribe(&self, user_id: i64) {
        self.hub.unsubscribe(user_id)
    }

    /// Stream the stored apartments a filter matches, availability-checked
    /// on the way out. Saving or deleting the filter, or starting another
    /// replay for it, supersedes the stream mid-flight.
    pub async fn replay(
        self: &Arc<Self>,
        criteria: &Filter,
    ) -> Result<mpsc::Receiver<Apartment>, FilterError> {
        let filter = self.registry.get(criteria).await?;
        let mut source = self.storage.apartments(&filter).await?;

        let token = self.history.begin(&filter.id);
        let (tx, rx) = mpsc::channel(1);

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let user_id = filter.user_id();
            let name = filter.name.clone().unwrap_or_default();

            while let Some(mut apartment) = source.recv().await {
                if !orchestrator.history.is_live(&token) {
                    return;
                }
                if !orchestrator.check_apartment(&apartment).await {
                    continue;
                }

                apartment.matched = HashMap::from([(user_id, vec![name.clone()])]);
                if tx.send(apartment).await.is_err() {
                    break;
                }
            }
            orchestrator.history.finish(&token);
        });

        Ok(rx)
    }
}
