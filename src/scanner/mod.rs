use chrono::{Duration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::api::ApartmentProvider;
use crate::core::Config;
use crate::domain::Apartment;

/// Walks the listing feed page by page on a fixed interval and emits
/// every fresh, not-yet-seen apartment on its output channel.
pub struct ApartmentScanner {
    provider: Arc<dyn ApartmentProvider>,
    tx: mpsc::Sender<Apartment>,
    max_pages: i64,
    apartment_ttl: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl ApartmentScanner {
    pub fn new(
        provider: Arc<dyn ApartmentProvider>,
        config: &Config,
    ) -> (Self, mpsc::Receiver<Apartment>) {
        let (tx, rx) = mpsc::channel(10);
        let (shutdown_tx, _) = watch::channel(false);

        let scanner = Self {
            provider,
            tx,
            max_pages: config.provider.max_fetch_pages,
            apartment_ttl: Duration::from_std(config.provider.apartment_ttl)
                .unwrap_or_else(|_| Duration::days(7)),
            shutdown_tx,
        };
        (scanner, rx)
    }

    pub fn start(self: &Arc<Self>, poll_interval: std::time::Duration) {
        tracing::info!(
            "🔍 Apartment scanner starting (every {:?}, up to {} pages)",
            poll_interval,
            self.max_pages
        );

        let scanner = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        scanner.poll_cycle().await;
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Apartment scanner stopped");
                        return;
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// One pass over the feed. Skips ads the provider already saw; stops
    /// at the first empty page or page-level fetch error.
    async fn poll_cycle(&self) {
        let mut emitted = 0usize;

        for page in 1..=self.max_pages {
            let summaries = match self.provider.fetch_page(page).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Failed to fetch listing page {}: {}", page, e);
                    break;
                }
            };
            if summaries.is_empty() {
                break;
            }

            let fresh_ids: Vec<i64> = summaries
                .iter()
                .map(|s| s.id)
                .filter(|id| !self.provider.has_seen(*id))
                .collect();

            emitted += self.ingest_details(&fresh_ids, &self.tx).await;
        }

        if emitted > 0 {
            tracing::info!("🏠 Scanner emitted {} new apartments", emitted);
        }
    }

    /// Full re-walk of the feed, ignoring the seen cache. Used at startup
    /// to rebuild state after the stored ads were purged. The walk streams
    /// on its own channel; nothing here reaches the watcher channel, so
    /// backfilled ads are persisted without being announced.
    pub fn fetch_all(self: &Arc<Self>) -> mpsc::Receiver<Apartment> {
        let (tx, rx) = mpsc::channel(10);
        let scanner = Arc::clone(self);

        tokio::spawn(async move {
            let mut emitted = 0usize;

            for page in 1..=scanner.max_pages {
                let summaries = match scanner.provider.fetch_page(page).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!("Failed to fetch listing page {}: {}", page, e);
                        continue;
                    }
                };
                if summaries.is_empty() {
                    break;
                }

                let ids: Vec<i64> = summaries.iter().map(|s| s.id).collect();
                emitted += scanner.ingest_details(&ids, &tx).await;
            }

            tracing::info!("🏠 Full feed walk emitted {} apartments", emitted);
        });

        rx
    }

    /// Fetch the details of a batch of ids concurrently and emit the
    /// publishable, fresh ones on the given channel. Every processed id is
    /// marked seen so the next cycle skips it.
    async fn ingest_details(&self, ids: &[i64], tx: &mpsc::Sender<Apartment>) -> usize {
        let details = join_all(ids.iter().map(|id| self.provider.fetch_detail(*id))).await;

        let mut emitted = 0usize;
        for (id, detail) in ids.iter().zip(details) {
            let apartment = match detail {
                Ok(Some(a)) => a,
                Ok(None) => {
                    self.provider.mark_seen(*id);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Failed to fetch ad {}: {}", id, e);
                    continue;
                }
            };

            if Utc::now() - apartment.order_date >= self.apartment_ttl {
                self.provider.mark_seen(*id);
                continue;
            }

            self.provider.mark_seen(*id);
            if tx.send(apartment).await.is_ok() {
                emitted += 1;
            }
        }
        emitted
    }
}
