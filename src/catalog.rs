//! Category/location catalog sync: a local mirror of the marketplace's
//! category tree and attribute schema plus its (optional) city list.
//!
//! Tree writes happen in exactly two passes: pass one creates/updates every
//! node without parent links, pass two resolves parent_id through the
//! completed external_id map. Single-pass recursive insertion is where the
//! ordering bugs live; do not reintroduce it.

use crate::models::{AttributeKind, Category, CategoryAttribute, Location, Shop, SyncReport};
use crate::olx::client::MarketplaceApi;
use crate::olx::error::ApiError;
use crate::olx::remote::{as_f64, as_i64};
use crate::store::{CategoryStore, LocationStore, StoreError};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Batch-aborting failures. Anything item-scoped lands in the report instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("marketplace authentication failed: {0}")]
    Authentication(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("category {0} is not in the local catalog")]
    UnknownCategory(i64),
}

impl From<ApiError> for SyncError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Authentication(message) => SyncError::Authentication(message),
            other => SyncError::Upstream(other.to_string()),
        }
    }
}

/// One category node as discovered upstream, before local ids exist.
#[derive(Debug, Clone)]
pub struct CategoryNode {
    pub external_id: i64,
    pub name: String,
    pub slug: String,
    pub parent_external_id: Option<i64>,
    pub supports_shipping: bool,
    pub supports_brand: bool,
    pub metadata: Value,
    pub children: Vec<CategoryNode>,
}

impl CategoryNode {
    pub fn new(external_id: i64, name: &str, parent_external_id: Option<i64>) -> Self {
        Self {
            external_id,
            name: name.to_string(),
            slug: slugify(name),
            parent_external_id,
            supports_shipping: false,
            supports_brand: false,
            metadata: Value::Null,
            children: Vec::new(),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        let external_id = value
            .get("id")
            .or_else(|| value.get("external_id"))
            .and_then(as_i64)?;
        let name = value
            .get("name")
            .or_else(|| value.get("title"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())?
            .to_string();
        let slug = value
            .get("slug")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| slugify(&name));
        let parent_external_id = value
            .get("parent_id")
            .or_else(|| value.get("parent"))
            .or_else(|| value.pointer("/parent/id"))
            .and_then(as_i64)
            .filter(|id| *id > 0);
        let supports_shipping = ["shipping", "supports_shipping", "has_shipping"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_bool))
            .unwrap_or(false);
        let supports_brand = ["brand", "supports_brand", "has_brand"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_bool))
            .unwrap_or(false);
        let children = ["categories", "children", "subcategories"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_array))
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(CategoryNode::from_value)
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            external_id,
            name,
            slug,
            parent_external_id,
            supports_shipping,
            supports_brand,
            metadata: value.clone(),
            children,
        })
    }
}

fn slugify(name: &str) -> String {
    crate::payload::options::normalize(name)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

fn root_entries(value: &Value) -> Vec<CategoryNode> {
    let entries = value
        .as_array()
        .cloned()
        .or_else(|| {
            ["data", "categories"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_array).cloned())
        })
        .unwrap_or_default();
    entries.iter().filter_map(CategoryNode::from_value).collect()
}

fn detail_children(detail: &Value, parent: i64) -> Vec<CategoryNode> {
    let entries = ["categories", "children", "subcategories"]
        .iter()
        .find_map(|key| {
            detail
                .get(*key)
                .or_else(|| detail.pointer(&format!("/data/{key}")))
                .and_then(Value::as_array)
        });
    let Some(entries) = entries else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(CategoryNode::from_value)
        .map(|mut child| {
            child.parent_external_id.get_or_insert(parent);
            child
        })
        .collect()
}

/// Recursively walks the remote tree. The API is inconsistent: some
/// categories nest children inline, others only reveal them on a per-ID
/// follow-up fetch, so every newly seen node gets both treatments.
/// De-duplication by external_id bounds the walk.
async fn discover(
    api: &dyn MarketplaceApi,
    shop: &Shop,
    report: &mut SyncReport,
) -> Result<BTreeMap<i64, CategoryNode>, SyncError> {
    let roots = api.fetch_categories(shop).await?;
    let mut queue: VecDeque<CategoryNode> = root_entries(&roots).into();
    let mut found: BTreeMap<i64, CategoryNode> = BTreeMap::new();
    let mut expanded: BTreeSet<i64> = BTreeSet::new();

    while let Some(node) = queue.pop_front() {
        let id = node.external_id;
        if found.contains_key(&id) {
            continue;
        }
        for mut child in node.children.clone() {
            child.parent_external_id.get_or_insert(id);
            queue.push_back(child);
        }
        if expanded.insert(id) {
            match api.fetch_category(shop, id).await {
                Ok(detail) => {
                    for child in detail_children(&detail, id) {
                        queue.push_back(child);
                    }
                }
                Err(ApiError::Authentication(message)) => {
                    return Err(SyncError::Authentication(message));
                }
                Err(err) => {
                    warn!(target = "olx.catalog", category = id, error = %err, "subcategory_fetch_failed");
                    report.record_failure(format!("category {id}: {err}"));
                }
            }
        }
        found.insert(id, node);
    }
    Ok(found)
}

fn mirror_fields(category: &mut Category, node: &CategoryNode) -> bool {
    let changed = category.name != node.name
        || category.slug != node.slug
        || category.supports_shipping != node.supports_shipping
        || category.supports_brand != node.supports_brand
        || category.metadata != node.metadata;
    category.name = node.name.clone();
    category.slug = node.slug.clone();
    category.supports_shipping = node.supports_shipping;
    category.supports_brand = node.supports_brand;
    category.metadata = node.metadata.clone();
    changed
}

fn write_two_pass(
    store: &dyn CategoryStore,
    nodes: &BTreeMap<i64, CategoryNode>,
    report: &mut SyncReport,
) {
    let mut local_ids: BTreeMap<i64, Uuid> = BTreeMap::new();

    // Pass one: every node lands without a parent link.
    for node in nodes.values() {
        let outcome = (|| -> Result<(), StoreError> {
            match store.category_by_external_id(node.external_id)? {
                Some(existing) => {
                    local_ids.insert(node.external_id, existing.id);
                    let mut updated = existing;
                    if mirror_fields(&mut updated, node) {
                        store.update_category(updated)?;
                        report.updated += 1;
                    }
                }
                None => {
                    let mut category = Category {
                        id: Uuid::new_v4(),
                        external_id: node.external_id,
                        name: String::new(),
                        slug: String::new(),
                        parent_id: None,
                        supports_shipping: false,
                        supports_brand: false,
                        metadata: Value::Null,
                    };
                    mirror_fields(&mut category, node);
                    local_ids.insert(node.external_id, category.id);
                    store.insert_category(category)?;
                    report.created += 1;
                }
            }
            Ok(())
        })();
        if let Err(err) = outcome {
            warn!(target = "olx.catalog", category = node.external_id, error = %err, "category_write_failed");
            report.record_failure(format!("category {}: {err}", node.external_id));
        }
    }

    // Pass two: resolve parents through the now-complete id map, updating
    // only rows whose stored parent differs.
    for node in nodes.values() {
        let Some(parent_external) = node.parent_external_id else {
            continue;
        };
        let (Some(&child_id), Some(&parent_id)) = (
            local_ids.get(&node.external_id),
            local_ids.get(&parent_external),
        ) else {
            continue;
        };
        let outcome = (|| -> Result<(), StoreError> {
            let mut child = store.category(child_id)?;
            if child.parent_id != Some(parent_id) {
                child.parent_id = Some(parent_id);
                store.update_category(child)?;
                report.updated += 1;
            }
            Ok(())
        })();
        if let Err(err) = outcome {
            warn!(target = "olx.catalog", category = node.external_id, error = %err, "parent_link_failed");
            report.record_failure(format!("category {} parent: {err}", node.external_id));
        }
    }
}

pub async fn sync_all_categories(
    api: &dyn MarketplaceApi,
    store: &dyn CategoryStore,
    shop: &Shop,
) -> Result<SyncReport, SyncError> {
    let mut report = SyncReport::default();
    let nodes = discover(api, shop, &mut report).await?;
    write_two_pass(store, &nodes, &mut report);
    info!(
        target = "olx.catalog",
        shop = %shop.name,
        created = report.created,
        updated = report.updated,
        failed = report.failed,
        "categories_synced"
    );
    Ok(report)
}

/// Bulk seed import. Same two-pass discipline as the live sync, so reversed
/// or nested input ordering cannot produce dangling parents.
pub fn seed_categories(
    store: &dyn CategoryStore,
    nodes: Vec<CategoryNode>,
) -> Result<SyncReport, SyncError> {
    let mut flat: BTreeMap<i64, CategoryNode> = BTreeMap::new();
    let mut queue: VecDeque<CategoryNode> = nodes.into();
    while let Some(node) = queue.pop_front() {
        let id = node.external_id;
        for mut child in node.children.clone() {
            child.parent_external_id.get_or_insert(id);
            queue.push_back(child);
        }
        flat.entry(id).or_insert(node);
    }
    let mut report = SyncReport::default();
    write_two_pass(store, &flat, &mut report);
    Ok(report)
}

fn attribute_entries(value: &Value) -> Vec<Value> {
    value
        .as_array()
        .cloned()
        .or_else(|| {
            ["data", "attributes"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_array).cloned())
        })
        .unwrap_or_default()
}

/// Accepts both upstream option shapes: a flat array of values, or an
/// object carrying a `values` sub-list plus label/validation metadata.
fn parse_attribute_options(value: Option<&Value>) -> Vec<String> {
    let Some(value) = value else {
        return Vec::new();
    };
    let items = value
        .as_array()
        .or_else(|| value.get("values").and_then(Value::as_array));
    let Some(items) = items else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            Value::Object(_) => ["value", "name", "label"]
                .iter()
                .find_map(|key| item.get(*key).and_then(Value::as_str))
                .map(str::to_string),
            _ => None,
        })
        .filter(|text| !text.trim().is_empty())
        .collect()
}

pub async fn sync_category_attributes(
    api: &dyn MarketplaceApi,
    store: &dyn CategoryStore,
    shop: &Shop,
    category_external_id: i64,
) -> Result<SyncReport, SyncError> {
    let category = store
        .category_by_external_id(category_external_id)?
        .ok_or(SyncError::UnknownCategory(category_external_id))?;
    let response = api
        .fetch_category_attributes(shop, category_external_id)
        .await?;
    let mut report = SyncReport::default();
    for entry in attribute_entries(&response) {
        let outcome = (|| -> Result<bool, StoreError> {
            let external_id = entry
                .get("id")
                .or_else(|| entry.get("external_id"))
                .and_then(as_i64)
                .ok_or_else(|| StoreError::Backend("attribute without id".to_string()))?;
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string();
            let raw_kind = entry
                .get("type")
                .or_else(|| entry.get("input_type"))
                .and_then(Value::as_str)
                .unwrap_or("text");
            let attribute = CategoryAttribute {
                id: Uuid::new_v4(),
                category_id: category.id,
                external_id,
                name,
                kind: AttributeKind::from_raw(raw_kind),
                input: entry
                    .get("input")
                    .or_else(|| entry.get("input_type"))
                    .and_then(Value::as_str)
                    .unwrap_or(raw_kind)
                    .to_string(),
                required: entry
                    .get("required")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                options: parse_attribute_options(entry.get("options")),
            };
            store.upsert_attribute(attribute)
        })();
        match outcome {
            Ok(true) => report.created += 1,
            Ok(false) => report.updated += 1,
            Err(err) => {
                warn!(target = "olx.catalog", category = category_external_id, error = %err, "attribute_write_failed");
                report.record_failure(format!(
                    "attribute in category {category_external_id}: {err}"
                ));
            }
        }
    }
    Ok(report)
}

struct CityNode {
    external_id: i64,
    name: String,
    canton: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    zip: Option<String>,
}

fn collect_cities(value: &Value, canton: Option<&str>, out: &mut Vec<CityNode>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_cities(item, canton, out);
            }
        }
        Value::Object(map) => {
            if let Some(data) = map.get("data") {
                collect_cities(data, canton, out);
            } else if let Some(cantons) = map.get("cantons") {
                collect_cities(cantons, canton, out);
            } else if let Some(cities) = map.get("cities") {
                let label = map.get("name").and_then(Value::as_str).or(canton);
                collect_cities(cities, label, out);
            } else if let (Some(external_id), Some(name)) = (
                map.get("id").and_then(as_i64),
                map.get("name").and_then(Value::as_str),
            ) {
                out.push(CityNode {
                    external_id,
                    name: name.trim().to_string(),
                    canton: map
                        .get("canton")
                        .and_then(Value::as_str)
                        .or(canton)
                        .map(str::to_string),
                    lat: map.get("lat").and_then(as_f64),
                    lon: map.get("lon").and_then(as_f64),
                    zip: map
                        .get("zip")
                        .and_then(|zip| match zip {
                            Value::String(text) => Some(text.clone()),
                            Value::Number(number) => Some(number.to_string()),
                            _ => None,
                        }),
                });
            }
        }
        _ => {}
    }
}

/// Locations are optional infrastructure: an empty upstream cities payload
/// is an observed real-world case (GPS-only marketplaces) and reports as
/// success with zero writes, never as a failure.
pub async fn sync_locations(
    api: &dyn MarketplaceApi,
    store: &dyn LocationStore,
    shop: &Shop,
) -> Result<SyncReport, SyncError> {
    let response = api.fetch_cities(shop).await?;
    let mut cities = Vec::new();
    collect_cities(&response, None, &mut cities);
    let mut report = SyncReport::default();
    if cities.is_empty() {
        info!(target = "olx.catalog", shop = %shop.name, "no_cities_upstream");
        return Ok(report);
    }
    for city in cities {
        let location = Location {
            id: Uuid::new_v4(),
            external_id: city.external_id,
            name: city.name.clone(),
            canton: city.canton.clone(),
            lat: city.lat,
            lon: city.lon,
            zip: city.zip.clone(),
        };
        match store.upsert_location(location) {
            Ok(true) => report.created += 1,
            Ok(false) => report.updated += 1,
            Err(err) => {
                warn!(target = "olx.catalog", city = city.external_id, error = %err, "location_write_failed");
                report.record_failure(format!("location {}: {err}", city.external_id));
            }
        }
    }
    Ok(report)
}

/// Destructive diff against a fresh remote fetch; invoke deliberately, not
/// as part of every sync.
pub async fn cleanup_removed(
    api: &dyn MarketplaceApi,
    store: &dyn CategoryStore,
    shop: &Shop,
) -> Result<SyncReport, SyncError> {
    let mut report = SyncReport::default();
    let fresh = discover(api, shop, &mut report).await?;
    let doomed: Vec<i64> = store
        .category_external_ids()?
        .into_iter()
        .filter(|id| !fresh.contains_key(id))
        .collect();
    report.removed = store.delete_categories_by_external_ids(&doomed)?;
    info!(
        target = "olx.catalog",
        shop = %shop.name,
        removed = report.removed,
        "categories_cleaned"
    );
    Ok(report)
}
