use crate::api::{FacetValue, ListingsPage, ListingsQuery, MarketApi};
use crate::constants;
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::storage::RecordSink;
use crate::types::{CategoryId, RawRecord};
use indicatif::ProgressBar;
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

static CATEGORY_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/([^/]+)/c(\d+)/?$").unwrap());

/// Extracts the category name and id from a storefront URL such as
/// `https://tiki.vn/nha-sach-tiki/c8322`.
pub fn parse_category_url(url: &str) -> Option<(String, CategoryId)> {
    let captures = CATEGORY_URL_RE.captures(url.trim())?;
    Some((captures[1].to_string(), captures[2].to_string()))
}

/// Discovers a category's children through the listings facet groups.
pub struct SubcategoryResolver {
    api: Arc<dyn MarketApi>,
    retry: RetryPolicy,
}

impl SubcategoryResolver {
    pub fn new(api: Arc<dyn MarketApi>, retry: RetryPolicy) -> Self {
        Self { api, retry }
    }

    /// Returns the subcategory ids, or an empty list for a leaf. Request
    /// failures retry per the policy; exhausting it also yields an empty
    /// list, so resolution never aborts a crawl.
    pub async fn resolve(&self, category: &CategoryId) -> Vec<CategoryId> {
        for attempt in 1..=self.retry.max_attempts {
            match self.api.fetch_facets(category).await {
                Ok(page) => {
                    let Some(group) = page.filters.first() else {
                        return Vec::new();
                    };
                    if group.query_name != constants::CATEGORY_FACET {
                        debug!(%category, facet = %group.query_name, "first facet group is not category; treating as leaf");
                        return Vec::new();
                    }
                    return group
                        .values
                        .iter()
                        .filter_map(FacetValue::category_id)
                        .collect();
                }
                Err(e) => {
                    warn!(%category, attempt, error = %e, "failed to fetch subcategories");
                    if attempt < self.retry.max_attempts {
                        self.retry.wait().await;
                    }
                }
            }
        }
        warn!(%category, "max attempts reached; unable to fetch subcategories");
        Vec::new()
    }
}

/// Position within a category's price-ordered listings.
///
/// The listings endpoint only pages so deep into one result window; once
/// enough items have been seen at the current floor, the floor moves up to
/// the last item's price and paging restarts at 1. Prices sort ascending,
/// so the floor never decreases within a crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceCursor {
    pub min_price: u64,
    pub page: u32,
    seen_at_floor: u32,
}

/// Outcome of feeding one fetched page into the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStep {
    NextPage,
    FloorAdvanced,
    Exhausted,
}

impl PriceCursor {
    pub fn starting_at(min_price: u64) -> Self {
        Self {
            min_price,
            page: 1,
            seen_at_floor: 0,
        }
    }

    /// Advances past a page that returned `returned` items whose last item
    /// cost `last_price`. The floor check runs before the short-page check,
    /// so a short page that crosses the window still advances the floor.
    pub fn advance(&mut self, returned: usize, last_price: u64) -> CursorStep {
        self.seen_at_floor += returned as u32;
        if self.seen_at_floor >= constants::PRICE_FLOOR_WINDOW {
            self.min_price = last_price;
            self.page = 1;
            self.seen_at_floor = 0;
            CursorStep::FloorAdvanced
        } else if returned == constants::LISTINGS_PAGE_SIZE as usize {
            self.page += 1;
            CursorStep::NextPage
        } else {
            CursorStep::Exhausted
        }
    }
}

/// Per-leaf crawl outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryStats {
    pub pages: u64,
    pub items: u64,
    pub floor_advances: u64,
    pub gave_up: bool,
}

/// Walks one category's listings with a [`PriceCursor`], writing each page
/// to the sink as it arrives.
pub struct PriceCursorPaginator {
    api: Arc<dyn MarketApi>,
    retry: RetryPolicy,
    progress: ProgressBar,
}

impl PriceCursorPaginator {
    pub fn new(api: Arc<dyn MarketApi>, retry: RetryPolicy) -> Self {
        Self {
            api,
            retry,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Crawls `category` from `start_min_price` upward until the listings
    /// run out or the category has to be abandoned. Abandonment is recorded
    /// in the stats, not raised; only sink failures propagate.
    pub async fn paginate(
        &self,
        category: &CategoryId,
        start_min_price: u64,
        sink: &mut dyn RecordSink,
    ) -> Result<CategoryStats> {
        let mut cursor = PriceCursor::starting_at(start_min_price);
        let mut stats = CategoryStats::default();

        loop {
            let query = ListingsQuery {
                category: category.clone(),
                page: cursor.page,
                min_price: cursor.min_price,
            };
            let Some(page) = self.fetch_page(&query).await else {
                stats.gave_up = true;
                counter!("scraper_categories_abandoned_total").increment(1);
                break;
            };
            if page.data.is_empty() {
                break;
            }

            sink.write_batch(&page.data).await?;
            stats.pages += 1;
            stats.items += page.data.len() as u64;
            self.progress.inc(page.data.len() as u64);
            counter!("scraper_listing_pages_total").increment(1);
            counter!("scraper_listing_items_total").increment(page.data.len() as u64);

            let Some(last_price) = last_item_price(&page.data) else {
                warn!(%category, "last item has no numeric price; stopping category");
                stats.gave_up = true;
                counter!("scraper_categories_abandoned_total").increment(1);
                break;
            };
            debug!(%category, last_price, "price of the last item");

            match cursor.advance(page.data.len(), last_price) {
                CursorStep::NextPage => {}
                CursorStep::FloorAdvanced => {
                    stats.floor_advances += 1;
                    debug!(%category, min_price = cursor.min_price, "advanced price floor");
                }
                CursorStep::Exhausted => break,
            }
        }

        Ok(stats)
    }

    /// Fetches one page, retrying denials with the identical query. Returns
    /// `None` when the category has to be abandoned: denials past the
    /// attempt budget, or any other failure at once.
    async fn fetch_page(&self, query: &ListingsQuery) -> Option<ListingsPage> {
        for attempt in 1..=self.retry.max_attempts {
            match self.api.fetch_listings(query).await {
                Ok(page) => return Some(page),
                Err(e) if e.is_denied() => {
                    counter!("scraper_listing_denials_total").increment(1);
                    if attempt < self.retry.max_attempts {
                        warn!(
                            category = %query.category,
                            attempt,
                            "request denied; retrying in {}s",
                            self.retry.delay.as_secs()
                        );
                        self.retry.wait().await;
                    }
                }
                Err(e) => {
                    error!(category = %query.category, error = %e, "listings request failed; stopping category");
                    return None;
                }
            }
        }
        warn!(
            category = %query.category,
            "request denied {} times; giving up on category",
            self.retry.max_attempts
        );
        None
    }
}

fn last_item_price(items: &[RawRecord]) -> Option<u64> {
    let price = items.last()?.get("price")?;
    price.as_u64().or_else(|| price.as_f64().map(|p| p as u64))
}

/// Combined outcome of a whole category-tree crawl.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    /// Leaf categories paginated.
    pub categories: u64,
    pub pages: u64,
    pub items: u64,
    /// Leaf categories abandoned before exhaustion.
    pub gave_up: u64,
}

/// Depth-first crawl over a category tree: leaves are paginated, inner
/// nodes only contribute their children.
pub struct CategoryCrawler {
    resolver: SubcategoryResolver,
    paginator: PriceCursorPaginator,
}

impl CategoryCrawler {
    pub fn new(api: Arc<dyn MarketApi>, retry: RetryPolicy) -> Self {
        Self {
            resolver: SubcategoryResolver::new(api.clone(), retry),
            paginator: PriceCursorPaginator::new(api, retry),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.paginator = self.paginator.with_progress(progress);
        self
    }

    /// Visits the tree under `root` depth-first, left-to-right. Every leaf
    /// crawl starts from `start_min_price`.
    pub async fn crawl(
        &self,
        root: CategoryId,
        start_min_price: u64,
        sink: &mut dyn RecordSink,
    ) -> Result<CrawlStats> {
        let mut totals = CrawlStats::default();
        let mut stack = vec![root];

        while let Some(category) = stack.pop() {
            let children = self.resolver.resolve(&category).await;
            if children.is_empty() {
                info!(%category, "crawling leaf category");
                let stats = self
                    .paginator
                    .paginate(&category, start_min_price, &mut *sink)
                    .await?;
                totals.categories += 1;
                totals.pages += stats.pages;
                totals.items += stats.items;
                if stats.gave_up {
                    totals.gave_up += 1;
                }
            } else {
                debug!(%category, children = children.len(), "descending into subcategories");
                // Reverse so the stack pops them left-to-right
                for child in children.into_iter().rev() {
                    stack.push(child);
                }
            }
        }

        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_category_name_and_id_from_url() {
        assert_eq!(
            parse_category_url("https://tiki.vn/nha-sach-tiki/c8322"),
            Some(("nha-sach-tiki".to_string(), "8322".to_string()))
        );
        assert_eq!(
            parse_category_url("https://tiki.vn/do-choi-me-be/c2549/"),
            Some(("do-choi-me-be".to_string(), "2549".to_string()))
        );
        assert_eq!(parse_category_url("https://tiki.vn/"), None);
        assert_eq!(parse_category_url("https://tiki.vn/nha-sach-tiki"), None);
    }

    #[test]
    fn cursor_pages_forward_on_full_pages() {
        let mut cursor = PriceCursor::starting_at(0);
        assert_eq!(cursor.advance(100, 35_000), CursorStep::NextPage);
        assert_eq!(cursor.page, 2);
        assert_eq!(cursor.min_price, 0);
        assert_eq!(cursor.advance(100, 52_000), CursorStep::NextPage);
        assert_eq!(cursor.page, 3);
    }

    #[test]
    fn cursor_stops_on_short_page() {
        let mut cursor = PriceCursor::starting_at(0);
        assert_eq!(cursor.advance(100, 10_000), CursorStep::NextPage);
        assert_eq!(cursor.advance(40, 12_000), CursorStep::Exhausted);
    }

    #[test]
    fn cursor_advances_floor_after_window() {
        let mut cursor = PriceCursor::starting_at(0);
        for page in 1..=19 {
            assert_eq!(cursor.advance(100, 1_000 * page as u64), CursorStep::NextPage);
        }
        assert_eq!(cursor.page, 20);
        assert_eq!(cursor.advance(100, 90_000), CursorStep::FloorAdvanced);
        assert_eq!(cursor.min_price, 90_000);
        assert_eq!(cursor.page, 1);
    }

    #[test]
    fn floor_advance_wins_over_short_page() {
        let mut cursor = PriceCursor::starting_at(0);
        for _ in 1..=19 {
            cursor.advance(100, 5_000);
        }
        cursor.advance(60, 6_000);
        // 1960 seen; this short page crosses the window, so the floor moves
        // instead of the crawl stopping
        assert_eq!(cursor.advance(60, 7_500), CursorStep::FloorAdvanced);
        assert_eq!(cursor.min_price, 7_500);
        assert_eq!(cursor.page, 1);
    }

    #[test]
    fn cursor_respects_starting_floor() {
        let cursor = PriceCursor::starting_at(250_000);
        assert_eq!(cursor.min_price, 250_000);
        assert_eq!(cursor.page, 1);
    }

    #[test]
    fn last_item_price_reads_integers_and_floats() {
        use serde_json::json;
        assert_eq!(last_item_price(&[json!({"price": 15000})]), Some(15_000));
        assert_eq!(last_item_price(&[json!({"price": 15000.9})]), Some(15_000));
        assert_eq!(last_item_price(&[json!({"price": "n/a"})]), None);
        assert_eq!(last_item_price(&[json!({"name": "x"})]), None);
        assert_eq!(last_item_price(&[]), None);
    }
}
