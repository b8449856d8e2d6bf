//! The translation core: product + template -> marketplace payload.

use crate::models::{
    AttributeKind, Category, CategoryAttribute, CategoryTemplate, Location, Product, ProductSource,
};
use crate::olx::config::{DEFAULT_LAT, DEFAULT_LON};
use crate::olx::remote;
use crate::payload::{ListingPayload, mapping, options};
use once_cell::sync::Lazy;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use thiserror::Error;

/// The upstream rejects titles over this many characters, even when the
/// overflow comes from an added suffix; truncation is silent on purpose.
pub const TITLE_LIMIT: usize = 65;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("product has no usable title")]
    MissingTitle,
    #[error("product has no category template assigned")]
    MissingTemplate,
    #[error("template category is missing from the local catalog")]
    MissingCategory,
}

/// Catalog context resolved by the caller before building. A missing
/// location is not fatal; the GPS fallback covers it.
pub struct BuildContext<'a> {
    pub category: &'a Category,
    pub attributes: &'a [CategoryAttribute],
    pub location: Option<&'a Location>,
    /// Metadata of a previously-synced listing, when one exists.
    pub stored_metadata: Option<&'a Value>,
}

pub fn build(
    product: &Product,
    template: &CategoryTemplate,
    ctx: &BuildContext<'_>,
) -> Result<ListingPayload, BuildError> {
    let title_source = product
        .olx_title
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| product.title.trim());
    if title_source.is_empty() {
        return Err(BuildError::MissingTitle);
    }
    let title = truncate_title(title_source);
    let description = compose_description(product, template, title_source);

    // Whole units only; round, do not truncate.
    let price = product.final_price.unwrap_or(product.price).round() as i64;

    let (city_id, lat, lon) = resolve_location(ctx);

    let attributes = if product.source == ProductSource::Marketplace {
        // Pass-through: a round-tripped listing must not silently mutate
        // attributes the seller set directly on the marketplace.
        ctx.stored_metadata
            .map(remote::attributes)
            .unwrap_or_default()
    } else {
        derive_attributes(product, template, ctx)
    };

    Ok(ListingPayload {
        title,
        description,
        price,
        category_id: ctx.category.external_id,
        city_id,
        lat,
        lon,
        listing_type: template.listing_type.as_str().to_string(),
        state: template.condition.as_str().to_string(),
        available: product.stock > 0,
        attributes,
    })
}

/// Hard cut at the character limit, no ellipsis.
fn truncate_title(title: &str) -> String {
    title.chars().take(TITLE_LIMIT).collect()
}

fn resolve_location(ctx: &BuildContext<'_>) -> (Option<i64>, Option<f64>, Option<f64>) {
    if let Some(location) = ctx.location {
        return (Some(location.external_id), None, None);
    }
    if let Some((lat, lon)) = ctx.stored_metadata.and_then(remote::coordinates) {
        return (None, Some(lat), Some(lon));
    }
    (None, Some(*DEFAULT_LAT), Some(*DEFAULT_LON))
}

/// Canonical field key -> label variants as they appear in seller-written
/// descriptions. The filter matches on the "Label: value" prefix of a line.
static FIELD_LABELS: Lazy<Vec<(&'static str, &'static [&'static str])>> = Lazy::new(|| {
    vec![
        (
            "sku",
            &["šifra", "sifra", "kataloški broj", "kataloski broj", "sku"][..],
        ),
        ("brand", &["brend", "marka", "proizvođač", "proizvodjac"][..]),
        (
            "stock",
            &["količina", "kolicina", "zaliha", "dostupnost", "stanje zaliha"][..],
        ),
        ("model", &["model"][..]),
        ("warranty", &["garancija"][..]),
        ("dimensions", &["dimenzije"][..]),
        ("weight", &["težina", "tezina", "masa"][..]),
        ("color", &["boja"][..]),
    ]
});

fn line_matches_field(line: &str, field: &str) -> bool {
    let Some((label, _)) = line.split_once(':') else {
        return false;
    };
    let normalized = options::normalize(label);
    FIELD_LABELS
        .iter()
        .find(|(key, _)| *key == field)
        .map(|(_, labels)| {
            labels
                .iter()
                .any(|variant| options::normalize(variant) == normalized)
        })
        .unwrap_or(false)
}

fn compose_description(product: &Product, template: &CategoryTemplate, title: &str) -> String {
    let base = product
        .olx_description
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| product.description.trim());

    let text = if template.description_filter.is_empty() {
        full_description(base, product)
    } else {
        filtered_description(base, product, &template.description_filter)
    };

    if text.trim().is_empty() {
        title.to_string()
    } else {
        text
    }
}

fn full_description(base: &str, product: &Product) -> String {
    let mut lines: Vec<String> = Vec::new();
    if !base.is_empty() {
        lines.push(base.to_string());
    }
    if !product.sku.trim().is_empty() {
        lines.push(format!("Šifra: {}", product.sku.trim()));
    }
    if !product.brand.trim().is_empty() {
        lines.push(format!("Brend: {}", product.brand.trim()));
    }
    lines.push(format!("Količina: {}", product.stock));
    lines.join("\n")
}

fn filtered_description(base: &str, product: &Product, filter: &[String]) -> String {
    let mut kept: Vec<String> = Vec::new();
    let mut matched: Vec<&str> = Vec::new();
    for line in base.lines() {
        if let Some(field) = filter
            .iter()
            .find(|field| line_matches_field(line, field))
            .map(String::as_str)
        {
            kept.push(line.trim().to_string());
            matched.push(field);
        }
    }
    if filter.iter().any(|field| field == "sku")
        && !matched.contains(&"sku")
        && !product.sku.trim().is_empty()
    {
        kept.push(format!("Šifra: {}", product.sku.trim()));
    }
    if filter.iter().any(|field| field == "brand")
        && !matched.contains(&"brand")
        && !product.brand.trim().is_empty()
    {
        kept.push(format!("Brend: {}", product.brand.trim()));
    }
    kept.join("\n")
}

fn derive_attributes(
    product: &Product,
    template: &CategoryTemplate,
    ctx: &BuildContext<'_>,
) -> Vec<Value> {
    let auto = crate::payload::extract::auto_attributes(ctx.category, product);
    let mut resolved = Vec::new();
    for attribute in ctx.attributes {
        let rule = template
            .attribute_mappings
            .get(&attribute.name)
            .or_else(|| {
                template
                    .attribute_mappings
                    .get(&attribute.external_id.to_string())
            });
        let mut value = rule.and_then(|raw| mapping::evaluate(&mapping::parse(raw), product, template));
        if value.is_none() {
            value = auto_lookup(&auto, &attribute.name);
        }
        let Some(mut value) = value else { continue };
        if attribute.kind == AttributeKind::Number
            && let Some(number) = options::first_number(&value)
        {
            value = number;
        }
        if !attribute.options.is_empty() {
            match options::match_option(&value, &attribute.options) {
                Some(canonical) => value = canonical,
                // Unknown option values get the attribute dropped, not sent.
                None => continue,
            }
        }
        resolved.push(json!({ "id": attribute.external_id, "value": value }));
    }
    resolved
}

fn auto_lookup(auto: &BTreeMap<String, String>, attribute_name: &str) -> Option<String> {
    let wanted = options::normalize(attribute_name);
    auto.iter()
        .find(|(key, _)| wanted == **key || wanted.contains(key.as_str()) || key.contains(&wanted))
        .map(|(_, value)| value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemCondition, ListingType, Shop};
    use uuid::Uuid;

    fn catalog_category() -> Category {
        Category {
            id: Uuid::new_v4(),
            external_id: 996,
            name: "Gume i felge".to_string(),
            slug: "gume-i-felge".to_string(),
            parent_id: None,
            supports_shipping: true,
            supports_brand: true,
            metadata: Value::Null,
        }
    }

    fn attribute(
        category: &Category,
        external_id: i64,
        name: &str,
        kind: AttributeKind,
        options: &[&str],
    ) -> CategoryAttribute {
        CategoryAttribute {
            id: Uuid::new_v4(),
            category_id: category.id,
            external_id,
            name: name.to_string(),
            kind,
            input: "select".to_string(),
            required: false,
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    fn setup() -> (Shop, Product, CategoryTemplate, Category) {
        let shop = Shop::new("demo", "user", "pass");
        let category = catalog_category();
        let mut product = Product::new(shop.id, ProductSource::Csv, "p-1");
        product.title = "Michelin Alpin 205/55 R16".to_string();
        product.sku = "MIC-205".to_string();
        product.brand = "Michelin".to_string();
        product.price = 120.0;
        product.stock = 8;
        product.description = "Zimske gume u odličnom stanju.".to_string();
        let mut template = CategoryTemplate::new(shop.id, category.id, "Gume");
        template.listing_type = ListingType::Sell;
        template.condition = ItemCondition::New;
        (shop, product, template, category)
    }

    #[test]
    fn seventy_char_title_truncates_to_exactly_sixty_five() {
        let (_, mut product, template, category) = setup();
        product.title = "a".repeat(70);
        let ctx = BuildContext {
            category: &category,
            attributes: &[],
            location: None,
            stored_metadata: None,
        };
        let payload = build(&product, &template, &ctx).expect("payload");
        assert_eq!(payload.title.chars().count(), 65);
        assert!(!payload.title.ends_with('.'));
        assert_eq!(payload.title, "a".repeat(65));
    }

    #[test]
    fn price_is_rounded_from_final_price() {
        let (_, mut product, template, category) = setup();
        product.price = 19.995;
        product.margin = 10.0;
        product.recompute_final_price();
        let ctx = BuildContext {
            category: &category,
            attributes: &[],
            location: None,
            stored_metadata: None,
        };
        let payload = build(&product, &template, &ctx).expect("payload");
        assert_eq!(payload.price, 22);
    }

    #[test]
    fn blank_title_is_a_precondition_failure() {
        let (_, mut product, template, category) = setup();
        product.title = "   ".to_string();
        product.olx_title = None;
        let ctx = BuildContext {
            category: &category,
            attributes: &[],
            location: None,
            stored_metadata: None,
        };
        assert!(matches!(
            build(&product, &template, &ctx),
            Err(BuildError::MissingTitle)
        ));
    }

    #[test]
    fn location_fallback_order() {
        let (_, product, template, category) = setup();
        let location = Location {
            id: Uuid::new_v4(),
            external_id: 32,
            name: "Sarajevo".to_string(),
            canton: Some("KS".to_string()),
            lat: Some(43.85),
            lon: Some(18.41),
            zip: Some("71000".to_string()),
        };

        let ctx = BuildContext {
            category: &category,
            attributes: &[],
            location: Some(&location),
            stored_metadata: None,
        };
        let payload = build(&product, &template, &ctx).expect("payload");
        assert_eq!(payload.city_id, Some(32));
        assert_eq!(payload.lat, None);

        let metadata = json!({"location": {"lat": 44.2, "lon": 17.9}});
        let ctx = BuildContext {
            category: &category,
            attributes: &[],
            location: None,
            stored_metadata: Some(&metadata),
        };
        let payload = build(&product, &template, &ctx).expect("payload");
        assert_eq!(payload.city_id, None);
        assert_eq!(payload.lat, Some(44.2));
        assert_eq!(payload.lon, Some(17.9));

        let ctx = BuildContext {
            category: &category,
            attributes: &[],
            location: None,
            stored_metadata: None,
        };
        let payload = build(&product, &template, &ctx).expect("payload");
        assert_eq!(payload.lat, Some(*DEFAULT_LAT));
        assert_eq!(payload.lon, Some(*DEFAULT_LON));
    }

    #[test]
    fn marketplace_origin_passes_attributes_through_untouched() {
        let (_, mut product, template, category) = setup();
        product.source = ProductSource::Marketplace;
        // Values deliberately outside the declared options: pass-through must
        // not run any mapping or option matching.
        let attributes = [attribute(
            &category,
            7,
            "Sezona",
            AttributeKind::Select,
            &["Zimske", "Ljetne"],
        )];
        let metadata = json!({
            "attributes": [
                {"id": 7, "value": "NotAnOption"},
                {"id": 9, "value": "77"}
            ]
        });
        let ctx = BuildContext {
            category: &category,
            attributes: &attributes,
            location: None,
            stored_metadata: Some(&metadata),
        };
        let payload = build(&product, &template, &ctx).expect("payload");
        assert_eq!(payload.attributes.len(), 2);
        assert_eq!(payload.attributes[0]["value"], "NotAnOption");
    }

    #[test]
    fn derived_attributes_combine_auto_extraction_and_mappings() {
        let (_, mut product, mut template, category) = setup();
        product
            .specs
            .insert("Proizvođač".to_string(), "Michelin".to_string());
        template
            .attribute_mappings
            .insert("Brend".to_string(), "{proizvođač} | product.brand".to_string());
        let attributes = [
            attribute(&category, 1, "Širina", AttributeKind::Number, &[]),
            attribute(&category, 2, "Visina", AttributeKind::Number, &[]),
            attribute(
                &category,
                3,
                "Sezona",
                AttributeKind::Select,
                &["Zimske", "Ljetne"],
            ),
            attribute(&category, 4, "Brend", AttributeKind::Text, &[]),
        ];
        let ctx = BuildContext {
            category: &category,
            attributes: &attributes,
            location: None,
            stored_metadata: None,
        };
        let payload = build(&product, &template, &ctx).expect("payload");
        let by_id: BTreeMap<i64, String> = payload
            .attributes
            .iter()
            .map(|entry| {
                (
                    entry["id"].as_i64().expect("id"),
                    entry["value"].as_str().expect("value").to_string(),
                )
            })
            .collect();
        assert_eq!(by_id.get(&1).map(String::as_str), Some("205"));
        assert_eq!(by_id.get(&2).map(String::as_str), Some("55"));
        assert_eq!(by_id.get(&3).map(String::as_str), Some("Zimske"));
        assert_eq!(by_id.get(&4).map(String::as_str), Some("Michelin"));
    }

    #[test]
    fn mapping_overrides_auto_extracted_value() {
        let (_, product, mut template, category) = setup();
        template
            .attribute_mappings
            .insert("Sezona".to_string(), "fixed:Ljetne".to_string());
        let attributes = [attribute(
            &category,
            3,
            "Sezona",
            AttributeKind::Select,
            &["Zimske", "Ljetne"],
        )];
        let ctx = BuildContext {
            category: &category,
            attributes: &attributes,
            location: None,
            stored_metadata: None,
        };
        let payload = build(&product, &template, &ctx).expect("payload");
        assert_eq!(payload.attributes[0]["value"], "Ljetne");
    }

    #[test]
    fn unmatched_option_drops_the_attribute() {
        let (_, product, mut template, category) = setup();
        template
            .attribute_mappings
            .insert("Sezona".to_string(), "fixed:Purple".to_string());
        let attributes = [attribute(
            &category,
            3,
            "Sezona",
            AttributeKind::Select,
            &["Zimske", "Ljetne"],
        )];
        let ctx = BuildContext {
            category: &category,
            attributes: &attributes,
            location: None,
            stored_metadata: None,
        };
        let payload = build(&product, &template, &ctx).expect("payload");
        assert!(payload.attributes.is_empty());
    }

    #[test]
    fn numeric_attribute_strips_to_first_number() {
        let (_, mut product, mut template, category) = setup();
        product
            .specs
            .insert("Kapacitet".to_string(), "77.0 Ah".to_string());
        template
            .attribute_mappings
            .insert("Kapacitet".to_string(), "{kapacitet}".to_string());
        let attributes = [attribute(
            &category,
            5,
            "Kapacitet",
            AttributeKind::Number,
            &[],
        )];
        let ctx = BuildContext {
            category: &category,
            attributes: &attributes,
            location: None,
            stored_metadata: None,
        };
        let payload = build(&product, &template, &ctx).expect("payload");
        assert_eq!(payload.attributes[0]["value"], "77");
    }

    #[test]
    fn description_filter_keeps_allow_listed_lines_and_synthesizes_missing() {
        let (_, mut product, mut template, category) = setup();
        product.description = "Marka: Michelin\nGarancija: 2 godine\nSlobodan tekst".to_string();
        template.description_filter =
            vec!["brand".to_string(), "warranty".to_string(), "sku".to_string()];
        let ctx = BuildContext {
            category: &category,
            attributes: &[],
            location: None,
            stored_metadata: None,
        };
        let payload = build(&product, &template, &ctx).expect("payload");
        let lines: Vec<&str> = payload.description.lines().collect();
        assert_eq!(
            lines,
            vec!["Marka: Michelin", "Garancija: 2 godine", "Šifra: MIC-205"]
        );
    }

    #[test]
    fn unfiltered_description_appends_sku_brand_stock() {
        let (_, product, template, category) = setup();
        let ctx = BuildContext {
            category: &category,
            attributes: &[],
            location: None,
            stored_metadata: None,
        };
        let payload = build(&product, &template, &ctx).expect("payload");
        assert!(payload.description.contains("Zimske gume"));
        assert!(payload.description.contains("Šifra: MIC-205"));
        assert!(payload.description.contains("Brend: Michelin"));
        assert!(payload.description.contains("Količina: 8"));
    }

    #[test]
    fn empty_description_falls_back_to_title() {
        let (_, mut product, template, category) = setup();
        product.description = String::new();
        product.sku = String::new();
        product.brand = String::new();
        product.title = "Samo naslov".to_string();
        let mut template = template;
        template.description_filter = vec!["warranty".to_string()];
        let ctx = BuildContext {
            category: &category,
            attributes: &[],
            location: None,
            stored_metadata: None,
        };
        let payload = build(&product, &template, &ctx).expect("payload");
        assert_eq!(payload.description, "Samo naslov");
    }
}
