use crate::config::ApiConfig;
use crate::constants;
use crate::error::{Result, ScraperError};
use crate::types::{CategoryId, ProductRef, RawRecord};
use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::warn;

/// Query for one page of a category's listings, ordered by ascending price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingsQuery {
    pub category: CategoryId,
    pub page: u32,
    pub min_price: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingsPage {
    #[serde(default)]
    pub data: Vec<RawRecord>,
    #[serde(default)]
    pub filters: Vec<FacetGroup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FacetGroup {
    #[serde(default)]
    pub query_name: String,
    #[serde(default)]
    pub values: Vec<FacetValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FacetValue {
    #[serde(default)]
    pub query_value: Value,
}

impl FacetValue {
    /// Category identifiers arrive as strings or bare numbers depending on
    /// the facet; normalize both to a string id.
    pub fn category_id(&self) -> Option<CategoryId> {
        match &self.query_value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewsPage {
    #[serde(default)]
    pub paging: ReviewsPaging,
    #[serde(default)]
    pub data: Vec<RawRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewsPaging {
    #[serde(default)]
    pub last_page: u32,
}

impl ReviewsPage {
    /// Products with no paging block still have the one page we just fetched.
    pub fn last_page(&self) -> u32 {
        self.paging.last_page.max(1)
    }
}

/// Read-only client for the marketplace's listings and reviews endpoints.
#[async_trait]
pub trait MarketApi: Send + Sync {
    /// Fetches one page of product listings for a category.
    async fn fetch_listings(&self, query: &ListingsQuery) -> Result<ListingsPage>;

    /// Fetches the facet groups for a category, used to discover subcategories.
    async fn fetch_facets(&self, category: &CategoryId) -> Result<ListingsPage>;

    /// Fetches one page of reviews for a product.
    async fn fetch_reviews(&self, product: &ProductRef, page: u32) -> Result<ReviewsPage>;
}

pub struct HttpMarketApi {
    client: reqwest::Client,
    listings_url: String,
    reviews_url: String,
}

impl HttpMarketApi {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| ScraperError::Config(format!("invalid user agent: {e}")))?,
        );
        if config.guest_token.is_empty() {
            warn!("no guest token configured; the reviews endpoint may reject requests");
        } else {
            headers.insert(
                HeaderName::from_static(constants::GUEST_TOKEN_HEADER),
                HeaderValue::from_str(&config.guest_token)
                    .map_err(|e| ScraperError::Config(format!("invalid guest token: {e}")))?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            listings_url: config.listings_url.clone(),
            reviews_url: config.reviews_url.clone(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let started = Instant::now();
        let response = self.client.get(url).query(query).send().await?;
        histogram!("scraper_fetch_duration_seconds").record(started.elapsed().as_secs_f64());

        let status = response.status();
        if !status.is_success() {
            counter!("scraper_fetch_errors_total").increment(1);
            return Err(ScraperError::Status(status));
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl MarketApi for HttpMarketApi {
    async fn fetch_listings(&self, query: &ListingsQuery) -> Result<ListingsPage> {
        let params = [
            ("limit", constants::LISTINGS_PAGE_SIZE.to_string()),
            ("aggregations", constants::FACET_AGGREGATIONS.to_string()),
            ("category", query.category.clone()),
            ("page", query.page.to_string()),
            ("sort", constants::LISTINGS_SORT.to_string()),
            ("price", query.min_price.to_string()),
        ];
        self.get_json(&self.listings_url, &params).await
    }

    // Facet discovery sends only the category and aggregation level, no
    // paging parameters
    async fn fetch_facets(&self, category: &CategoryId) -> Result<ListingsPage> {
        let params = [
            ("category", category.clone()),
            ("aggregations", constants::FACET_AGGREGATIONS.to_string()),
        ];
        self.get_json(&self.listings_url, &params).await
    }

    async fn fetch_reviews(&self, product: &ProductRef, page: u32) -> Result<ReviewsPage> {
        let params = [
            ("limit", constants::REVIEWS_PAGE_SIZE.to_string()),
            ("include", constants::REVIEWS_INCLUDE.to_string()),
            ("sort", constants::REVIEWS_SORT.to_string()),
            ("spid", product.seller_product_id.clone()),
            ("product_id", product.id.clone()),
            ("seller_id", product.seller_id.clone()),
            ("page", page.to_string()),
        ];
        self.get_json(&self.reviews_url, &params).await
    }
}
