use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use apartment_radar::api::{ApartmentProvider, ApartmentSummary};
use apartment_radar::core::Config;
use apartment_radar::dispatch::{Orchestrator, State};
use apartment_radar::domain::{AdType, Apartment, BuildingStatus, Filter, FilterError, User};
use apartment_radar::drafts::FilterChange;
use apartment_radar::filters::FilterRegistry;
use apartment_radar::storage::{MemoryStorage, Storage};

/// Provider stub with a real seen-cache. Ads stay available unless
/// scripted off the market; availability checks can be made to fail.
struct FakeProvider {
    seen: RwLock<HashSet<i64>>,
    gone: RwLock<HashSet<i64>>,
    fail_checks: AtomicBool,
    checks: AtomicUsize,
}

impl FakeProvider {
    fn new() -> Self {
        Self {
            seen: RwLock::new(HashSet::new()),
            gone: RwLock::new(HashSet::new()),
            fail_checks: AtomicBool::new(false),
            checks: AtomicUsize::new(0),
        }
    }

    fn mark_gone(&self, id: i64) {
        self.gone.write().unwrap().insert(id);
    }

    fn fail_availability_checks(&self) {
        self.fail_checks.store(true, Ordering::SeqCst);
    }

    fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApartmentProvider for FakeProvider {
    async fn fetch_page(&self, _page: i64) -> Result<Vec<ApartmentSummary>> {
        Ok(Vec::new())
    }

    async fn fetch_detail(&self, _id: i64) -> Result<Option<Apartment>> {
        Ok(None)
    }

    async fn is_available(&self, id: i64) -> Result<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.fail_checks.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("gateway timeout"));
        }
        Ok(!self.gone.read().unwrap().contains(&id))
    }

    fn mark_seen(&self, id: i64) {
        self.seen.write().unwrap().insert(id);
    }

    fn clear_seen(&self, id: i64) {
        self.seen.write().unwrap().remove(&id);
    }

    fn has_seen(&self, id: i64) -> bool {
        self.seen.read().unwrap().contains(&id)
    }
}

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
        phone: "+995000000".into(),
        district: "Vake".into(),
        city: "Tbilisi".into(),
        coordinates: None,
        comment: String::new(),
        order_date: Utc::now(),
        url: format!("https://home.ss.ge/en/real-estate/{}", id),
        photo_urls: Vec::new(),
        is_owner: false,
        matched: HashMap::new(),
    }
}

fn user(id: i64) -> User {
    User {
        id,
        is_superuser: false,
    }
}

async fn build_pipeline_with(
    storage: Arc<dyn Storage>,
    provider: Arc<FakeProvider>,
) -> (Arc<Orchestrator>, mpsc::Sender<Apartment>) {
    let registry = Arc::new(FilterRegistry::new(storage.clone()).await.unwrap());

    let orchestrator = Arc::new(Orchestrator::new(
        storage.clone(),
        provider,
        registry,
        &Config::default(),
    ));

    let (tx, rx) = mpsc::channel(10);
    orchestrator.start(rx).await.unwrap();

    (orchestrator, tx)
}

async fn build_pipeline() -> (Arc<Orchestrator>, mpsc::Sender<Apartment>, Arc<dyn Storage>) {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let (orchestrator, tx) =
        build_pipeline_with(storage.clone(), Arc::new(FakeProvider::new())).await;
    (orchestrator, tx, storage)
}

async fn save_matching_filter(orchestrator: &Arc<Orchestrator>, u: User, name: &str) -> i64 {
    orchestrator.begin_draft(u);
    orchestrator
        .change_draft(u.id, FilterChange::Name(name.into()))
        .await
        .unwrap();
    orchestrator
        .change_draft(u.id, FilterChange::City(Some("Tbilisi".into())))
        .await
        .unwrap();
    orchestrator.save_filter(u).await.unwrap()
}

#[tokio::test]
async fn matched_apartment_reaches_the_subscriber() {
    let (orchestrator, tx, _) = build_pipeline().await;
    let u = user(1);

    save_matching_filter(&orchestrator, u, "home").await;
    let mut rx = orchestrator.subscribe(u.id);

    tx.send(apartment(100)).await.unwrap();

    let received = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("delivery timed out")
        .expect("stream closed");
    assert_eq!(received.id, 100);
    assert_eq!(received.matched.get(&u.id), Some(&vec!["home".to_string()]));
}

#[tokio::test]
async fn non_matching_apartment_is_stored_but_not_delivered() {
    let (orchestrator, tx, storage) = build_pipeline().await;
    let u = user(1);

    orchestrator.begin_draft(u);
    orchestrator
        .change_draft(u.id, FilterChange::Name("pricey".into()))
        .await
        .unwrap();
    orchestrator
        .change_draft(u.id, FilterChange::MinPrice(Some(5_000.0)))
        .await
        .unwrap();
    orchestrator.save_filter(u).await.unwrap();

    let mut rx = orchestrator.subscribe(u.id);
    tx.send(apartment(100)).await.unwrap();

    // The ad must land in storage even though nobody is notified.
    timeout(Duration::from_secs(2), async {
        loop {
            let count = storage.apartment_count(&Filter::default()).await.unwrap();
            if count == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("apartment was never persisted");

    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn backfill_is_persisted_without_announcements() {
    let (orchestrator, _tx, storage) = build_pipeline().await;
    let u = user(1);

    save_matching_filter(&orchestrator, u, "home").await;
    let mut sub = orchestrator.subscribe(u.id);

    // A rebuild feed, not the watcher channel.
    let (feed_tx, feed_rx) = mpsc::channel(10);
    feed_tx.send(apartment(100)).await.unwrap();
    drop(feed_tx);
    orchestrator.refresh_all(feed_rx).await.unwrap();

    assert_eq!(
        storage.apartment_count(&Filter::default()).await.unwrap(),
        1
    );
    assert!(sub.try_recv().is_err());
}

#[tokio::test]
async fn reingested_apartment_is_not_announced_twice() {
    let (orchestrator, tx, _) = build_pipeline().await;
    let u = user(1);

    save_matching_filter(&orchestrator, u, "home").await;
    let mut rx = orchestrator.subscribe(u.id);

    tx.send(apartment(100)).await.unwrap();
    let first = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.id, 100);

    // Same id again (price changed): an update, not a new announcement.
    let mut changed = apartment(100);
    changed.price = 450.0;
    tx.send(changed).await.unwrap();
    tx.send(apartment(101)).await.unwrap();

    let next = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.id, 101);
}

#[tokio::test]
async fn ordinary_users_hold_a_single_filter() {
    let (orchestrator, _tx, _) = build_pipeline().await;
    let u = user(1);

    save_matching_filter(&orchestrator, u, "first").await;

    orchestrator.begin_draft(u);
    orchestrator
        .change_draft(u.id, FilterChange::Name("second".into()))
        .await
        .unwrap();
    let err = orchestrator.save_filter(u).await.unwrap_err();
    assert!(matches!(err, FilterError::LimitExceeded));
}

#[tokio::test]
async fn resaving_the_same_filter_is_not_a_quota_violation() {
    let (orchestrator, _tx, _) = build_pipeline().await;
    let u = user(1);

    save_matching_filter(&orchestrator, u, "home").await;
    let saved = orchestrator
        .filters_for_user(u.id)
        .await
        .unwrap()
        .into_iter()
        .next()
        .unwrap();

    orchestrator.edit_filter(u.id, &saved.id).await.unwrap();
    orchestrator
        .change_draft(u.id, FilterChange::MaxPrice(Some(900.0)))
        .await
        .unwrap();
    orchestrator.save_filter(u).await.unwrap();

    let filters = orchestrator.filters_for_user(u.id).await.unwrap();
    assert_eq!(filters.len(), 1);
    assert_eq!(filters[0].max_price, Some(900.0));
}

#[tokio::test]
async fn superusers_are_not_limited() {
    let (orchestrator, _tx, _) = build_pipeline().await;
    let su = User {
        id: 9,
        is_superuser: true,
    };

    save_matching_filter(&orchestrator, su, "one").await;
    save_matching_filter(&orchestrator, su, "two").await;

    assert_eq!(orchestrator.filters_for_user(su.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn saving_reports_the_stored_match_count() {
    let (orchestrator, _tx, storage) = build_pipeline().await;

    storage.save_apartment(&apartment(1)).await.unwrap();
    storage.save_apartment(&apartment(2)).await.unwrap();
    let mut pricey = apartment(3);
    pricey.price = 9_000.0;
    storage.save_apartment(&pricey).await.unwrap();

    let u = user(1);
    orchestrator.begin_draft(u);
    orchestrator
        .change_draft(u.id, FilterChange::Name("cheap".into()))
        .await
        .unwrap();
    orchestrator
        .change_draft(u.id, FilterChange::MaxPrice(Some(1_000.0)))
        .await
        .unwrap();

    assert_eq!(orchestrator.save_filter(u).await.unwrap(), 2);
}

#[tokio::test]
async fn saving_a_paused_filter_reports_zero_matches() {
    let (orchestrator, _tx, storage) = build_pipeline().await;
    storage.save_apartment(&apartment(1)).await.unwrap();

    let u = user(1);
    orchestrator.begin_draft(u);
    orchestrator
        .change_draft(u.id, FilterChange::Name("paused".into()))
        .await
        .unwrap();
    orchestrator
        .change_draft(u.id, FilterChange::TogglePause)
        .await
        .unwrap();

    assert_eq!(orchestrator.save_filter(u).await.unwrap(), 0);
}

#[tokio::test]
async fn unnamed_or_untouched_drafts_cannot_be_committed() {
    let (orchestrator, _tx, _) = build_pipeline().await;
    let u = user(1);

    orchestrator.begin_draft(u);
    let err = orchestrator.save_filter(u).await.unwrap_err();
    assert!(matches!(err, FilterError::NameNotSet));

    // A saved filter reloaded for editing is named but untouched;
    // committing it without an edit is rejected.
    save_matching_filter(&orchestrator, u, "home").await;
    let saved = orchestrator
        .filters_for_user(u.id)
        .await
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    orchestrator.edit_filter(u.id, &saved.id).await.unwrap();
    let err = orchestrator.save_filter(u).await.unwrap_err();
    assert!(matches!(err, FilterError::NotChanged));
}

#[tokio::test]
async fn replay_streams_history_with_the_filter_annotation() {
    let (orchestrator, _tx, storage) = build_pipeline().await;
    storage.save_apartment(&apartment(1)).await.unwrap();
    storage.save_apartment(&apartment(2)).await.unwrap();

    let u = user(1);
    save_matching_filter(&orchestrator, u, "home").await;
    let saved = orchestrator
        .filters_for_user(u.id)
        .await
        .unwrap()
        .into_iter()
        .next()
        .unwrap();

    let mut criteria = Filter::for_user(u.id);
    criteria.id = saved.id.clone();

    let mut rx = orchestrator.replay(&criteria).await.unwrap();

    let mut ids = Vec::new();
    while let Ok(Some(a)) = timeout(Duration::from_secs(2), rx.recv()).await {
        assert_eq!(a.matched.get(&u.id), Some(&vec!["home".to_string()]));
        ids.push(a.id);
    }
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn a_second_replay_supersedes_the_first() {
    let (orchestrator, _tx, storage) = build_pipeline().await;
    for id in 1..=5 {
        storage.save_apartment(&apartment(id)).await.unwrap();
    }

    let u = user(1);
    save_matching_filter(&orchestrator, u, "home").await;
    let saved = orchestrator
        .filters_for_user(u.id)
        .await
        .unwrap()
        .into_iter()
        .next()
        .unwrap();

    let mut criteria = Filter::for_user(u.id);
    criteria.id = saved.id.clone();

    let mut first = orchestrator.replay(&criteria).await.unwrap();
    let opener = timeout(Duration::from_secs(2), first.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(opener.id, 1);

    let mut second = orchestrator.replay(&criteria).await.unwrap();

    // The superseded stream winds down without draining its source.
    let mut leftover = 1usize;
    while let Ok(Some(_)) = timeout(Duration::from_secs(2), first.recv()).await {
        leftover += 1;
    }
    assert!(leftover < 5, "superseded replay delivered everything");

    let mut ids = Vec::new();
    while let Ok(Some(a)) = timeout(Duration::from_secs(2), second.recv()).await {
        ids.push(a.id);
    }
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn sweep_keeps_listings_when_the_availability_check_fails() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    storage.save_apartment(&apartment(1)).await.unwrap();

    let provider = Arc::new(FakeProvider::new());
    provider.fail_availability_checks();

    let (_orchestrator, _tx) = build_pipeline_with(storage.clone(), provider.clone()).await;

    timeout(Duration::from_secs(2), async {
        while provider.checks() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("startup sweep never checked availability");
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Unreachable is not gone; the listing stays until a check succeeds.
    assert_eq!(
        storage.apartment_count(&Filter::default()).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn replay_drops_listings_that_left_the_market() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    storage.save_apartment(&apartment(1)).await.unwrap();
    storage.save_apartment(&apartment(2)).await.unwrap();

    let provider = Arc::new(FakeProvider::new());
    provider.mark_seen(1);
    provider.mark_seen(2);
    provider.mark_gone(1);

    let (orchestrator, _tx) = build_pipeline_with(storage.clone(), provider.clone()).await;

    let u = user(1);
    save_matching_filter(&orchestrator, u, "home").await;
    let saved = orchestrator
        .filters_for_user(u.id)
        .await
        .unwrap()
        .into_iter()
        .next()
        .unwrap();

    let mut criteria = Filter::for_user(u.id);
    criteria.id = saved.id.clone();

    let mut rx = orchestrator.replay(&criteria).await.unwrap();
    let mut ids = Vec::new();
    while let Ok(Some(a)) = timeout(Duration::from_secs(2), rx.recv()).await {
        ids.push(a.id);
    }
    assert_eq!(ids, vec![2]);

    // The vanished ad is deleted and forgotten, so a relisting of the
    // same id would be picked up again.
    assert_eq!(
        storage.apartment_count(&Filter::default()).await.unwrap(),
        1
    );
    assert!(!provider.has_seen(1));
    assert!(provider.has_seen(2));
}

#[tokio::test]
async fn renaming_a_draft_to_an_existing_filter_loads_it() {
    let (orchestrator, _tx, _) = build_pipeline().await;
    let u = user(1);

    save_matching_filter(&orchestrator, u, "home").await;
    let saved = orchestrator
        .filters_for_user(u.id)
        .await
        .unwrap()
        .into_iter()
        .next()
        .unwrap();

    orchestrator.begin_draft(u);
    let draft = orchestrator
        .change_draft(u.id, FilterChange::Name("home".into()))
        .await
        .unwrap();

    assert_eq!(draft.id, saved.id);
    assert_eq!(draft.city.as_deref(), Some("Tbilisi"));
}

#[tokio::test]
async fn the_orchestrator_starts_once_and_stops_terminally() {
    let (orchestrator, _tx, _) = build_pipeline().await;
    assert_eq!(orchestrator.state(), State::Running);

    let (_tx2, rx2) = mpsc::channel(1);
    assert!(orchestrator.start(rx2).await.is_err());

    let mut sub = orchestrator.subscribe(1);
    orchestrator.stop();
    assert_eq!(orchestrator.state(), State::Stopped);
    assert!(sub.recv().await.is_none());
}

#[tokio::test]
async fn disconnecting_a_user_drops_all_their_filters() {
    let (orchestrator, _tx, _) = build_pipeline().await;
    let su = User {
        id: 3,
        is_superuser: true,
    };

    save_matching_filter(&orchestrator, su, "one").await;
    save_matching_filter(&orchestrator, su, "two").await;

    orchestrator.disconnect_user(su.id).await.unwrap();
    assert!(orchestrator.filters_for_user(su.id).await.unwrap().is_empty());
}
