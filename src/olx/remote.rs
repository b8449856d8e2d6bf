//! Centralized field extraction over the loosely-typed upstream JSON. The
//! same field appears under different keys depending on endpoint and API
//! version; each accessor here owns the full alternative-key list so the
//! engines never probe paths ad hoc.

use serde_json::Value;

/// Listings array of a paginated "user listings" page.
pub fn listing_entries(page: &Value) -> Vec<Value> {
    for key in ["data", "listings", "results"] {
        if let Some(entries) = page.get(key).and_then(Value::as_array) {
            return entries.clone();
        }
    }
    page.as_array().cloned().unwrap_or_default()
}

/// True when the page metadata says the loop is on the final page.
pub fn is_last_page(page: &Value) -> bool {
    if let Some(last) = page
        .pointer("/meta/last_page")
        .or_else(|| page.pointer("/last_page"))
        .and_then(as_i64)
        && let Some(current) = page
            .pointer("/meta/current_page")
            .or_else(|| page.pointer("/current_page"))
            .and_then(as_i64)
    {
        return current >= last;
    }
    page.pointer("/meta/last")
        .or_else(|| page.get("last"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

pub fn external_id(listing: &Value) -> Option<String> {
    listing
        .get("id")
        .or_else(|| listing.get("listing_id"))
        .and_then(|value| match value {
            Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        })
}

pub fn title(listing: &Value) -> Option<String> {
    for key in ["title", "name"] {
        if let Some(text) = listing.get(key).and_then(Value::as_str)
            && !text.trim().is_empty()
        {
            return Some(text.trim().to_string());
        }
    }
    None
}

/// Detail payloads put the description under `additional.description`;
/// summaries and older payloads use flatter keys.
pub fn description(listing: &Value) -> Option<String> {
    let candidates = [
        listing.pointer("/additional/description"),
        listing.get("description"),
        listing.get("short_description"),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

pub fn price(listing: &Value) -> Option<f64> {
    listing
        .get("price")
        .or_else(|| listing.pointer("/data/price"))
        .and_then(as_f64)
}

pub fn status(listing: &Value) -> Option<String> {
    listing
        .get("status")
        .or_else(|| listing.get("state"))
        .and_then(Value::as_str)
        .map(|text| text.trim().to_lowercase())
        .filter(|text| !text.is_empty())
}

pub fn city_external_id(listing: &Value) -> Option<i64> {
    listing
        .get("city_id")
        .or_else(|| listing.get("location_id"))
        .or_else(|| listing.pointer("/location/id"))
        .and_then(as_i64)
}

pub fn coordinates(listing: &Value) -> Option<(f64, f64)> {
    let lat = listing
        .get("lat")
        .or_else(|| listing.get("latitude"))
        .or_else(|| listing.pointer("/location/lat"))
        .and_then(as_f64)?;
    let lon = listing
        .get("lon")
        .or_else(|| listing.get("longitude"))
        .or_else(|| listing.pointer("/location/lon"))
        .and_then(as_f64)?;
    Some((lat, lon))
}

pub fn category_external_id(listing: &Value) -> Option<i64> {
    listing
        .get("category_id")
        .or_else(|| listing.pointer("/category/id"))
        .and_then(as_i64)
}

pub fn attributes(listing: &Value) -> Vec<Value> {
    listing
        .get("attributes")
        .or_else(|| listing.pointer("/data/attributes"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Image URLs; entries may be plain strings or objects with a url-ish key.
pub fn images(listing: &Value) -> Vec<String> {
    let entries = listing
        .get("images")
        .or_else(|| listing.get("photos"))
        .and_then(Value::as_array);
    let Some(entries) = entries else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(url) => Some(url.clone()),
            Value::Object(_) => ["url", "src", "path", "original"]
                .iter()
                .find_map(|key| entry.get(key).and_then(Value::as_str))
                .map(str::to_string),
            _ => None,
        })
        .filter(|url| !url.trim().is_empty())
        .collect()
}

pub(crate) fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}
