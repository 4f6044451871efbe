use anyhow::Result;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub provider: ProviderConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Upper bound on listing pages walked per poll cycle.
    pub max_fetch_pages: i64,
    pub poll_interval: Duration,
    /// Ads older than this are treated as gone.
    pub apartment_ttl: Duration,
    pub token_refresh_interval: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// How often stored ads are re-checked against the provider.
    pub sweep_interval: Duration,
    pub health_port: u16,
    pub log_level: String,
    /// Drop all stored ads at boot and rebuild from a full feed walk.
    pub refresh_on_start: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub sqlite_path: String,
}

fn env_secs(key: &str, default: u64) -> Duration {
    let secs = env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            provider: ProviderConfig {
                max_fetch_pages: env::var("MAX_FETCH_PAGES")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
                poll_interval: env_secs("POLL_INTERVAL_SECS", 60),
                apartment_ttl: env_secs("APARTMENT_TTL_SECS", 7 * 24 * 3600),
                token_refresh_interval: env_secs("TOKEN_REFRESH_INTERVAL_SECS", 600),
            },
            server: ServerConfig {
                sweep_interval: env_secs("SWEEP_INTERVAL_SECS", 24 * 3600),
                health_port: env::var("HEALTH_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .unwrap_or(8080),
                log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
                refresh_on_start: env::var("REFRESH_ON_START")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .unwrap_or(false),
            },
            database: DatabaseConfig {
                sqlite_path: env::var("SQLITE_PATH")
                    .unwrap_or_else(|_| "data/apartments.db".to_string()),
            },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            provider: ProviderConfig {
                max_fetch_pages: 30,
                poll_interval: Duration::from_secs(60),
                apartment_ttl: Duration::from_secs(7 * 24 * 3600),
                token_refresh_interval: Duration::from_secs(600),
            },
            server: ServerConfig {
                sweep_interval: Duration::from_secs(24 * 3600),
                health_port: 8080,
                log_level: "info".to_string(),
                refresh_on_start: false,
            },
            database: DatabaseConfig {
                sqlite_path: "data/apartments.db".to_string(),
            },
        }
    }
}
