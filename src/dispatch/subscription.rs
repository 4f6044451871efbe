use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;

use crate::domain::Apartment;

/// Per-user delivery channels for matched apartments. Channels hold a
/// single apartment; a subscriber that is not keeping up loses the
/// oldest updates rather than stalling the pipeline.
pub struct SubscriptionHub {
    subscribers: RwLock<HashMap<i64, mpsc::Sender<Apartment>>>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a user, replacing (and thereby closing) any previous
    /// subscription of the same user.
    pub fn subscribe(&self, user_id: i64) -> mpsc::Receiver<Apartment> {
        let (tx, rx) = mpsc::channel(1);
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id, tx);

        tracing::info!("📬 New subscriber: {}", user_id);
        rx
    }

    pub fn unsubscribe(&self, user_id: i64) {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&user_id);

        tracing::info!("Unsubscribed: {}", user_id);
    }

    /// Deliver the annotated apartment to every registered subscriber;
    /// each receiver routes by the match map. Non-blocking; full channels
    /// are skipped.
    pub fn broadcast(&self, a: &Apartment) {
        let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        for tx in subscribers.values() {
            let _ = tx.try_send(a.clone());
        }
    }

    /// Drop every channel, closing all subscriber streams.
    pub fn close_all(&self) {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AdType, BuildingStatus};
    use chrono::Utc;

    fn matched_apartment(user_ids: &[i64]) -> Apartment {
        let mut a = Apartment {
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
        };
        for id in user_ids {
            a.matched.insert(*id, vec!["f".into()]);
        }
        a
    }

    #[tokio::test]
    async fn broadcast_reaches_every_registered_subscriber() {
        let hub = SubscriptionHub::new();
        let mut rx_a = hub.subscribe(1);
        let mut rx_b = hub.subscribe(2);

        hub.broadcast(&matched_apartment(&[1]));

        // Both streams carry the apartment; the match map says whose
        // filter it was.
        let got_a = rx_a.recv().await.unwrap();
        assert_eq!(got_a.id, 1);
        let got_b = rx_b.recv().await.unwrap();
        assert!(got_b.matched.contains_key(&1));
        assert!(!got_b.matched.contains_key(&2));
    }

    #[tokio::test]
    async fn slow_subscribers_lose_updates_instead_of_blocking() {
        let hub = SubscriptionHub::new();
        let mut rx = hub.subscribe(1);

        let mut first = matched_apartment(&[1]);
        first.id = 10;
        let mut second = matched_apartment(&[1]);
        second.id = 11;

        hub.broadcast(&first);
        hub.broadcast(&second);

        assert_eq!(rx.recv().await.map(|a| a.id), Some(10));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_closes_the_stream() {
        let hub = SubscriptionHub::new();
        let mut rx = hub.subscribe(1);
        hub.unsubscribe(1);

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn unsubscribe_of_unknown_user_is_a_no_op() {
        let hub = SubscriptionHub::new();
        hub.unsubscribe(42);
    }
}
