use serde::{Deserialize, Serialize};

/// Raw listing or review data as returned from the marketplace API.
pub type RawRecord = serde_json::Value;

/// Category identifier as used by the listings endpoint.
pub type CategoryId = String;

/// Identity triple for a product listing: the same product can appear once
/// per seller offering it.
pub type ProductKey = (String, String, String);

/// A product whose reviews are to be fetched, as read from a listings export.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: String,
    pub seller_id: String,
    pub seller_product_id: String,
    pub review_count: u32,
}

impl ProductRef {
    pub fn key(&self) -> ProductKey {
        (
            self.id.clone(),
            self.seller_id.clone(),
            self.seller_product_id.clone(),
        )
    }
}
