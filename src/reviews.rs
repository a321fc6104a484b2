use crate::api::MarketApi;
use crate::retry::RetryPolicy;
use crate::types::{ProductRef, RawRecord};
use indicatif::ProgressBar;
use metrics::counter;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, warn};

/// Fetches review pages for a batch of products with a bounded worker pool.
pub struct ReviewFetcher {
    api: Arc<dyn MarketApi>,
    retry: RetryPolicy,
    workers: usize,
    progress: ProgressBar,
}

impl ReviewFetcher {
    pub fn new(api: Arc<dyn MarketApi>, retry: RetryPolicy, workers: usize) -> Self {
        Self {
            api,
            retry,
            workers: workers.max(1),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Runs one task per product, at most `workers` in flight. Tasks carry
    /// their own accumulators; results concatenate in completion order. A
    /// panicked task loses its product's reviews but not the run.
    pub async fn fetch_all(&self, products: Vec<ProductRef>) -> Vec<RawRecord> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for product in products {
            let api = self.api.clone();
            let retry = self.retry;
            let semaphore = semaphore.clone();
            let progress = self.progress.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let reviews = fetch_product_reviews(api.as_ref(), &product, retry).await;
                progress.inc(1);
                reviews
            });
        }

        let mut all_reviews = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(reviews) => all_reviews.extend(reviews),
                Err(e) => error!(error = %e, "review worker panicked; dropping its results"),
            }
        }
        all_reviews
    }
}

/// Pages through one product's reviews until `last_page`, inclusive.
///
/// The attempt budget is cumulative across the product's pages, not per
/// page; exhausting it keeps whatever was already fetched.
pub async fn fetch_product_reviews(
    api: &dyn MarketApi,
    product: &ProductRef,
    retry: RetryPolicy,
) -> Vec<RawRecord> {
    let mut reviews = Vec::new();
    let mut page = 1u32;
    let mut attempts = 0u32;

    loop {
        match api.fetch_reviews(product, page).await {
            Ok(fetched) => {
                let last_page = fetched.last_page();
                reviews.extend(fetched.data);
                counter!("scraper_review_pages_total").increment(1);
                if page >= last_page {
                    break;
                }
                page += 1;
            }
            Err(e) => {
                attempts += 1;
                counter!("scraper_review_fetch_errors_total").increment(1);
                if attempts >= retry.max_attempts {
                    error!(
                        product = %product.id,
                        error = %e,
                        "max attempts reached; keeping {} reviews",
                        reviews.len()
                    );
                    break;
                }
                warn!(
                    product = %product.id,
                    attempt = attempts,
                    error = %e,
                    "review fetch failed; retrying in {}s",
                    retry.delay.as_secs()
                );
                retry.wait().await;
            }
        }
    }

    reviews
}
