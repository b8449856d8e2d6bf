pub mod builder;
pub mod extract;
pub mod mapping;
pub mod options;

pub use builder::{BuildContext, BuildError, build};

use serde::Serialize;
use serde_json::Value;
use serde_with::skip_serializing_none;

/// The marketplace-ready shape POSTed/PUT to `/listings`.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ListingPayload {
    pub title: String,
    pub description: String,
    /// Whole units only; the upstream rejects fractional prices.
    pub price: i64,
    pub category_id: i64,
    pub city_id: Option<i64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub listing_type: String,
    pub state: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Value>,
}
