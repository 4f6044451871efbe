pub mod ssge;
pub mod types;

pub use ssge::SsgeClient;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::Apartment;

/// A single entry of a listing page; details are fetched separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApartmentSummary {
    pub id: i64,
}

/// Upstream listing source. One page of summaries at a time, detail
/// requests per id, plus a seen-id cache so the scanner can skip ads
/// it already ingested.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApartmentProvider: Send + Sync {
    /// Fetch one page of listing summaries. An empty page means the
    /// walk reached the end of the feed.
    async fn fetch_page(&self, page: i64) -> Result<Vec<ApartmentSummary>>;

    /// Fetch the full ad. `Ok(None)` means the ad exists upstream but is
    /// not publishable: deactivated, or a deal type we do not handle.
    async fn fetch_detail(&self, id: i64) -> Result<Option<Apartment>>;

    /// Whether the ad is still live upstream and fresh enough to keep.
    async fn is_available(&self, id: i64) -> Result<bool>;

    fn mark_seen(&self, id: i64);
    fn clear_seen(&self, id: i64);
    fn has_seen(&self, id: i64) -> bool;
}
