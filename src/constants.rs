//! Endpoint parameters and crawl constants shared across the codebase.

// Default endpoint URLs, overridable via config.toml
pub const DEFAULT_LISTINGS_URL: &str = "https://tiki.vn/api/personalish/v1/blocks/listings";
pub const DEFAULT_REVIEWS_URL: &str = "https://tiki.vn/api/v2/reviews";

/// Browser user agent sent with every request; the API rejects unknown clients.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36 Edg/114.0.1823.51";

/// Header carrying the guest token credential.
pub const GUEST_TOKEN_HEADER: &str = "x-guest-token";

// Listings endpoint paging
pub const LISTINGS_PAGE_SIZE: u32 = 100;
pub const LISTINGS_SORT: &str = "price,asc";

/// Aggregation level that makes the listings endpoint include filter facets.
pub const FACET_AGGREGATIONS: u32 = 2;

/// Facet group key whose values are subcategory ids.
pub const CATEGORY_FACET: &str = "category";

/// Items to accumulate at one price floor before advancing it. The API caps
/// how deep a result window can be paged; raising the floor opens a new one.
pub const PRICE_FLOOR_WINDOW: u32 = 2000;

// Reviews endpoint paging
pub const REVIEWS_PAGE_SIZE: u32 = 20;
pub const REVIEWS_INCLUDE: &str = "comments,contribute_info,attribute_vote_summary";
pub const REVIEWS_SORT: &str = "score|desc,id|desc,stars|all";

// Retry defaults; the two pipelines run different budgets
pub const LISTINGS_RETRY_MAX_ATTEMPTS: u32 = 3;
pub const LISTINGS_RETRY_DELAY_SECS: u64 = 5;
pub const REVIEWS_RETRY_MAX_ATTEMPTS: u32 = 5;
pub const REVIEWS_RETRY_DELAY_SECS: u64 = 10;

/// Default HTTP request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// Output locations
pub const DATA_DIR: &str = "data";
pub const LOG_DIR: &str = "data/logs";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
