use crate::constants;
use crate::error::{Result, ScraperError};
use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Environment variable that overrides the configured guest token.
pub const GUEST_TOKEN_ENV: &str = "MARKET_GUEST_TOKEN";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub listings: ListingsConfig,
    pub reviews: ReviewsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub listings_url: String,
    pub reviews_url: String,
    pub user_agent: String,
    pub guest_token: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListingsConfig {
    pub retry_max_attempts: u32,
    pub retry_delay_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReviewsConfig {
    pub retry_max_attempts: u32,
    pub retry_delay_secs: u64,
    /// Size of the review worker pool; 0 selects the host parallelism.
    pub workers: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listings_url: constants::DEFAULT_LISTINGS_URL.to_string(),
            reviews_url: constants::DEFAULT_REVIEWS_URL.to_string(),
            user_agent: constants::DEFAULT_USER_AGENT.to_string(),
            guest_token: String::new(),
            timeout_secs: constants::DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Default for ListingsConfig {
    fn default() -> Self {
        Self {
            retry_max_attempts: constants::LISTINGS_RETRY_MAX_ATTEMPTS,
            retry_delay_secs: constants::LISTINGS_RETRY_DELAY_SECS,
        }
    }
}

impl Default for ReviewsConfig {
    fn default() -> Self {
        Self {
            retry_max_attempts: constants::REVIEWS_RETRY_MAX_ATTEMPTS,
            retry_delay_secs: constants::REVIEWS_RETRY_DELAY_SECS,
            workers: 0,
        }
    }
}

impl Config {
    /// Loads configuration from `path` when given, otherwise from
    /// `config.toml` in the working directory. A missing implicit file falls
    /// back to defaults; a missing explicit file is an error. The
    /// `MARKET_GUEST_TOKEN` environment variable overrides the configured
    /// guest token.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config: Config = match path {
            Some(p) => {
                let content = fs::read_to_string(p).map_err(|e| {
                    ScraperError::Config(format!(
                        "Failed to read config file '{}': {}",
                        p.display(),
                        e
                    ))
                })?;
                toml::from_str(&content)?
            }
            None => match fs::read_to_string(constants::DEFAULT_CONFIG_PATH) {
                Ok(content) => toml::from_str(&content)?,
                Err(_) => Config::default(),
            },
        };

        if let Ok(token) = std::env::var(GUEST_TOKEN_ENV) {
            if !token.trim().is_empty() {
                config.api.guest_token = token.trim().to_string();
            }
        }

        Ok(config)
    }

    pub fn listings_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.listings.retry_max_attempts,
            Duration::from_secs(self.listings.retry_delay_secs),
        )
    }

    pub fn reviews_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.reviews.retry_max_attempts,
            Duration::from_secs(self.reviews.retry_delay_secs),
        )
    }

    /// Worker count for the review pool.
    pub fn review_workers(&self) -> usize {
        if self.reviews.workers > 0 {
            self.reviews.workers
        } else {
            std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(4)
        }
    }
}
