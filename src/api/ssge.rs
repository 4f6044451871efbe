use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use super::types::{AdDetail, ListingPage, ListingRequest};
use super::{ApartmentProvider, ApartmentSummary};
use crate::core::Config;
use crate::domain::Apartment;

const LISTING_URL: &str = "https://api-gateway.ss.ge/v1/RealEstate/LegendSearch";
const DETAIL_URL: &str = "https://api-gateway.ss.ge/v1/RealEstate/details";
const REFRESH_TOKEN_URL: &str = "https://home.ss.ge/api/refresh_access_token";
const SESSION_COOKIE: &str = "ss-session-token";

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// ss.ge listing client. The gateway wants a bearer token that the public
/// site hands out as a session cookie, so we periodically replay the
/// browser's refresh call and lift the cookie from the response.
pub struct SsgeClient {
    client: Client,
    token: RwLock<String>,
    seen: RwLock<HashSet<i64>>,
    apartment_ttl: Duration,
}

impl SsgeClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            token: RwLock::new(String::new()),
            seen: RwLock::new(HashSet::new()),
            apartment_ttl: Duration::from_std(config.provider.apartment_ttl)
                .context("Apartment TTL out of range")?,
        })
    }

    /// Obtain an initial token, then keep it fresh in the background.
    pub async fn start(self: &Arc<Self>, refresh_interval: std::time::Duration) -> Result<()> {
        self.refresh_token().await?;

        let provider = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh_interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = provider.refresh_token().await {
                    tracing::error!("Failed to refresh ss.ge token: {}", e);
                }
            }
        });

        Ok(())
    }

    async fn refresh_token(&self) -> Result<()> {
        let mut request = self
            .client
            .post(REFRESH_TOKEN_URL)
            .header("accept", "*/*")
            .header("origin", "https://home.ss.ge")
            .header("referer", "https://home.ss.ge/en/real-estate")
            .header("user-agent", USER_AGENT)
            .header("content-length", "0");

        {
            let token = self.token.read().unwrap_or_else(|e| e.into_inner());
            if !token.is_empty() {
                request = request.header("cookie", format!("{}={};", SESSION_COOKIE, *token));
            }
        }

        let response = request.send().await.context("Token refresh request failed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Token refresh failed with status {}", status));
        }

        let token = response
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(extract_session_token)
            .ok_or_else(|| anyhow!("No {} cookie in refresh response", SESSION_COOKIE))?;

        *self.token.write().unwrap_or_else(|e| e.into_inner()) = token;
        tracing::info!("🔑 Refreshed ss.ge session token");

        Ok(())
    }

    fn bearer(&self) -> String {
        let token = self.token.read().unwrap_or_else(|e| e.into_inner());
        format!("Bearer {}", *token)
    }

    async fn detail(&self, id: i64) -> Result<AdDetail> {
        let url = format!("{}?applicationId={}", DETAIL_URL, id);

        // The gateway serves ad details on PUT, not GET.
        let response = self
            .client
            .put(&url)
            .header("Accept-Language", "en")
            .header("Content-Type", "application/json")
            .header("User-Agent", USER_AGENT)
            .header("Authorization", self.bearer())
            .send()
            .await
            .with_context(|| format!("Detail request for ad {} failed", id))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Detail request for ad {} returned {}", id, status));
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse detail response for ad {}", id))
    }
}

fn extract_session_token(set_cookie: &str) -> Option<String> {
    let (name, rest) = set_cookie.split_once('=')?;
    if name.trim() != SESSION_COOKIE {
        return None;
    }
    let value = rest.split(';').next()?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[async_trait]
impl ApartmentProvider for SsgeClient {
    async fn fetch_page(&self, page: i64) -> Result<Vec<ApartmentSummary>> {
        let response = self
            .client
            .post(LISTING_URL)
            .header("Accept-Language", "en")
            .header("User-Agent", USER_AGENT)
            .header("Authorization", self.bearer())
            .json(&ListingRequest::for_page(page))
            .send()
            .await
            .with_context(|| format!("Listing request for page {} failed", page))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Listing page {} returned {}", page, status));
        }

        let listing: ListingPage = response
            .json()
            .await
            .with_context(|| format!("Failed to parse listing page {}", page))?;

        Ok(listing
            .items
            .into_iter()
            .map(|item| ApartmentSummary {
                id: item.application_id,
            })
            .collect())
    }

    async fn fetch_detail(&self, id: i64) -> Result<Option<Apartment>> {
        let detail = self.detail(id).await?;
        Ok(detail.into_apartment())
    }

    async fn is_available(&self, id: i64) -> Result<bool> {
        let detail = self.detail(id).await?;
        let Some(apartment) = detail.into_apartment() else {
            return Ok(false);
        };
        Ok(Utc::now() - apartment.order_date < self.apartment_ttl)
    }

    fn mark_seen(&self, id: i64) {
        self.seen.write().unwrap_or_else(|e| e.into_inner()).insert(id);
    }

    fn clear_seen(&self, id: i64) {
        self.seen.write().unwrap_or_else(|e| e.into_inner()).remove(&id);
    }

    fn has_seen(&self, id: i64) -> bool {
        self.seen.read().unwrap_or_else(|e| e.into_inner()).contains(&id)
    }
}
