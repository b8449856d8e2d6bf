//! Heuristic per-category attribute extraction. Extractors are pluggable:
//! each decides whether it applies to a category and mines values from the
//! product's free text. Results are keyed by normalized attribute name and
//! may be overridden by template mappings.

use crate::models::{Category, Product};
use crate::payload::options::normalize;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

pub trait AttributeExtractor: Send + Sync {
    fn applies(&self, category: &Category) -> bool;
    fn extract(&self, product: &Product) -> BTreeMap<String, String>;
}

fn category_is_tires(category: &Category) -> bool {
    let name = normalize(&category.name);
    let slug = normalize(&category.slug);
    ["gume", "guma", "tire", "pneumatik"]
        .iter()
        .any(|token| name.contains(token) || slug.contains(token))
}

static TIRE_SIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{3})\s*/\s*(\d{2,3})\s*[Rr]\s*(\d{2})").expect("tire pattern"));

/// Reads width/aspect-ratio/rim-diameter out of a "205/55 R16" style title.
pub struct TireSizeExtractor;

impl AttributeExtractor for TireSizeExtractor {
    fn applies(&self, category: &Category) -> bool {
        category_is_tires(category)
    }

    fn extract(&self, product: &Product) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        if let Some(captures) = TIRE_SIZE.captures(&product.title) {
            values.insert("sirina".to_string(), captures[1].to_string());
            values.insert("visina".to_string(), captures[2].to_string());
            values.insert("promjer".to_string(), captures[3].to_string());
        }
        values
    }
}

/// Season keyword scan over the description (and title, which often carries
/// the season when the description does not).
pub struct SeasonExtractor;

impl AttributeExtractor for SeasonExtractor {
    fn applies(&self, category: &Category) -> bool {
        category_is_tires(category)
    }

    fn extract(&self, product: &Product) -> BTreeMap<String, String> {
        let haystack = normalize(&format!("{} {}", product.title, product.description));
        let season = if haystack.contains("cjelogodisnj") || haystack.contains("all season") {
            Some("Cjelogodišnje")
        } else if haystack.contains("zimsk") || haystack.contains("winter") {
            Some("Zimske")
        } else if haystack.contains("ljetn") || haystack.contains("summer") {
            Some("Ljetne")
        } else {
            None
        };
        season
            .map(|value| BTreeMap::from([("sezona".to_string(), value.to_string())]))
            .unwrap_or_default()
    }
}

static EXTRACTORS: Lazy<Vec<Box<dyn AttributeExtractor>>> =
    Lazy::new(|| vec![Box::new(TireSizeExtractor), Box::new(SeasonExtractor)]);

/// Runs every applicable extractor; later extractors never overwrite keys
/// produced by earlier ones.
pub fn auto_attributes(category: &Category, product: &Product) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    for extractor in EXTRACTORS.iter() {
        if !extractor.applies(category) {
            continue;
        }
        for (key, value) in extractor.extract(product) {
            merged.entry(key).or_insert(value);
        }
    }
    merged
}
