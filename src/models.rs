use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A storefront tenant. Credentials belong to the shop's own marketplace
/// account; every engine call is scoped to one shop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shop {
    pub id: Uuid,
    pub name: String,
    pub olx_username: String,
    pub olx_password: String,
    /// Percent margin applied to imported products that carry none.
    pub default_margin: f64,
}

impl Shop {
    pub fn new(name: &str, olx_username: &str, olx_password: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            olx_username: olx_username.to_string(),
            olx_password: olx_password.to_string(),
            default_margin: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Bam,
    Eur,
    Usd,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Bam => "BAM",
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
        }
    }

    pub fn from_code(input: &str) -> Option<Self> {
        match input.trim().to_uppercase().as_str() {
            "BAM" | "KM" => Some(Currency::Bam),
            "EUR" => Some(Currency::Eur),
            "USD" => Some(Currency::Usd),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProductSource {
    Csv,
    Scraper,
    Marketplace,
}

impl ProductSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductSource::Csv => "csv",
            ProductSource::Scraper => "scraper",
            ProductSource::Marketplace => "marketplace",
        }
    }
}

/// A sellable item owned by exactly one shop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub shop_id: Uuid,
    pub title: String,
    pub sku: String,
    pub brand: String,
    /// Free-text category label from the source storefront, not a catalog ref.
    pub category_label: String,
    pub price: f64,
    pub currency: Currency,
    /// Percent markup on top of `price`.
    pub margin: f64,
    /// Always recomputed from price + margin before persistence.
    pub final_price: Option<f64>,
    pub stock: u32,
    pub description: String,
    pub specs: BTreeMap<String, String>,
    pub source: ProductSource,
    /// Upstream identifier, unique per (shop, source).
    pub source_id: String,
    pub olx_title: Option<String>,
    pub olx_description: Option<String>,
    pub template_id: Option<Uuid>,
    pub image_urls: Vec<String>,
    /// A marketplace listing id recorded outside the listing table, e.g. from
    /// an older session. Consumed by the reconnect recovery path.
    pub listing_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(shop_id: Uuid, source: ProductSource, source_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            shop_id,
            title: String::new(),
            sku: String::new(),
            brand: String::new(),
            category_label: String::new(),
            price: 0.0,
            currency: Currency::default(),
            margin: 0.0,
            final_price: None,
            stock: 0,
            description: String::new(),
            specs: BTreeMap::new(),
            source,
            source_id: source_id.to_string(),
            olx_title: None,
            olx_description: None,
            template_id: None,
            image_urls: Vec::new(),
            listing_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn recompute_final_price(&mut self) {
        self.final_price = Some(self.price * (1.0 + self.margin / 100.0));
    }

    /// Fills blank marketplace-facing title/description from the base fields.
    pub fn derive_marketplace_fields(&mut self) {
        if is_blank(self.olx_title.as_deref()) && !self.title.trim().is_empty() {
            self.olx_title = Some(self.title.trim().to_string());
        }
        if is_blank(self.olx_description.as_deref()) && !self.description.trim().is_empty() {
            self.olx_description = Some(self.description.trim().to_string());
        }
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(str::trim).filter(|text| !text.is_empty()).is_none()
}

/// Local mirror of a marketplace category node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub external_id: i64,
    pub name: String,
    pub slug: String,
    /// Resolved in the second sync pass; None for roots and unresolved refs.
    pub parent_id: Option<Uuid>,
    pub supports_shipping: bool,
    pub supports_brand: bool,
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Text,
    Number,
    Select,
}

impl AttributeKind {
    pub fn from_raw(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "number" | "integer" | "float" | "numeric" => Self::Number,
            "select" | "dropdown" | "checkbox" | "radio" => Self::Select,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryAttribute {
    pub id: Uuid,
    pub category_id: Uuid,
    /// Unique within the owning category.
    pub external_id: i64,
    pub name: String,
    pub kind: AttributeKind,
    /// Raw upstream widget hint, kept verbatim.
    pub input: String,
    pub required: bool,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: Uuid,
    pub external_id: i64,
    pub name: String,
    pub canton: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub zip: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ListingType {
    #[default]
    Sell,
    Rent,
}

impl ListingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingType::Sell => "sell",
            ListingType::Rent => "rent",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemCondition {
    #[default]
    New,
    Used,
}

impl ItemCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemCondition::New => "new",
            ItemCondition::Used => "used",
        }
    }
}

/// Shop-owned mapping configuration that parameterizes payload construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryTemplate {
    pub id: Uuid,
    pub shop_id: Uuid,
    pub name: String,
    pub category_id: Uuid,
    pub location_id: Option<Uuid>,
    pub listing_type: ListingType,
    pub condition: ItemCondition,
    /// attribute-name-or-external-id -> mapping rule string.
    pub attribute_mappings: BTreeMap<String, String>,
    /// Ordered allow-list of canonical field keys for description filtering.
    pub description_filter: Vec<String>,
    /// Informational only; resolution happens through attribute_mappings and
    /// description_filter, not substitution on these strings.
    pub title_template: Option<String>,
    pub description_template: Option<String>,
    pub auto_created: bool,
}

impl CategoryTemplate {
    pub fn new(shop_id: Uuid, category_id: Uuid, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            shop_id,
            name: name.to_string(),
            category_id,
            location_id: None,
            listing_type: ListingType::default(),
            condition: ItemCondition::default(),
            attribute_mappings: BTreeMap::new(),
            description_filter: Vec::new(),
            title_template: None,
            description_template: None,
            auto_created: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Pending,
    Published,
    Draft,
    Failed,
    Removed,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Pending => "pending",
            ListingStatus::Published => "published",
            ListingStatus::Draft => "draft",
            ListingStatus::Failed => "failed",
            ListingStatus::Removed => "removed",
        }
    }

    /// Maps a remote status word onto the local state machine.
    pub fn from_remote(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "active" | "published" | "live" => Self::Published,
            _ => Self::Draft,
        }
    }
}

/// Marketplace-side counterpart of a product, 1:1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub product_id: Uuid,
    pub shop_id: Uuid,
    /// Marketplace id, unique when present, None while only-local.
    pub external_id: Option<String>,
    pub status: ListingStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub synced_at: Option<DateTime<Utc>>,
    /// Full raw marketplace response. Audit trail and the source of truth for
    /// re-derivable data such as original attributes and GPS coordinates.
    pub metadata: Value,
}

impl Listing {
    pub fn pending(product: &Product) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id: product.id,
            shop_id: product.shop_id,
            external_id: None,
            status: ListingStatus::Pending,
            published_at: None,
            synced_at: None,
            metadata: Value::Null,
        }
    }
}

/// Product-shaped record emitted by the CSV and scraper collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub source_id: String,
    pub title: String,
    pub sub_title: Option<String>,
    pub sku: Option<String>,
    pub brand: Option<String>,
    pub price: f64,
    pub currency: Option<String>,
    /// Per-branch quantities; summed when no overall quantity is given.
    pub branch_availability: Option<BTreeMap<String, u32>>,
    pub quantity: Option<u32>,
    pub description: Option<String>,
    pub specs: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub images: Vec<String>,
    pub technical_description: Option<String>,
    pub models: Option<Vec<String>>,
    pub reuse_existing: Option<bool>,
}

/// Aggregate result of a batch operation. Batches never abort on single-item
/// failures; they count them and keep a capped sample of messages.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub removed: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub const MAX_ERRORS: usize = 10;

    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.failed += 1;
        if self.errors.len() < Self::MAX_ERRORS {
            self.errors.push(message.into());
        }
    }

    pub fn merge(&mut self, other: SyncReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.removed += other.removed;
        self.failed += other.failed;
        for message in other.errors {
            if self.errors.len() < Self::MAX_ERRORS {
                self.errors.push(message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_price_recomputed_from_price_and_margin() {
        let mut product = Product::new(Uuid::new_v4(), ProductSource::Csv, "p-1");
        product.price = 19.995;
        product.margin = 10.0;
        product.recompute_final_price();
        let final_price = product.final_price.expect("final price");
        assert!((final_price - 21.9945).abs() < 1e-9);
    }

    #[test]
    fn derive_fills_only_blank_marketplace_fields() {
        let mut product = Product::new(Uuid::new_v4(), ProductSource::Csv, "p-2");
        product.title = "Akumulator 77Ah".to_string();
        product.description = "Startni akumulator".to_string();
        product.olx_title = Some("  ".to_string());
        product.derive_marketplace_fields();
        assert_eq!(product.olx_title.as_deref(), Some("Akumulator 77Ah"));
        assert_eq!(product.olx_description.as_deref(), Some("Startni akumulator"));

        product.olx_title = Some("Custom".to_string());
        product.derive_marketplace_fields();
        assert_eq!(product.olx_title.as_deref(), Some("Custom"));
    }

    #[test]
    fn remote_status_vocabulary() {
        assert_eq!(ListingStatus::from_remote("Active"), ListingStatus::Published);
        assert_eq!(ListingStatus::from_remote("LIVE"), ListingStatus::Published);
        assert_eq!(ListingStatus::from_remote("published"), ListingStatus::Published);
        assert_eq!(ListingStatus::from_remote("paused"), ListingStatus::Draft);
        assert_eq!(ListingStatus::from_remote(""), ListingStatus::Draft);
    }

    #[test]
    fn currency_codes_round_trip() {
        assert_eq!(Currency::from_code("km"), Some(Currency::Bam));
        assert_eq!(Currency::from_code("EUR"), Some(Currency::Eur));
        assert_eq!(Currency::from_code("dinar"), None);
        assert_eq!(Currency::Bam.code(), "BAM");
    }

    #[test]
    fn sync_report_caps_error_list() {
        let mut report = SyncReport::default();
        for index in 0..25 {
            report.record_failure(format!("item {index}"));
        }
        assert_eq!(report.failed, 25);
        assert_eq!(report.errors.len(), SyncReport::MAX_ERRORS);
    }

    #[test]
    fn product_record_accepts_sparse_payloads() {
        let record: ProductRecord = serde_json::from_str(
            r#"{"source_id":"a-1","title":"Guma 205/55 R16","price":120.5,"images":["https://x/a.jpg"]}"#,
        )
        .expect("record");
        assert_eq!(record.source_id, "a-1");
        assert!(record.sku.is_none());
        assert_eq!(record.images.len(), 1);
    }
}
