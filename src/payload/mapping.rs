//! The string-keyed mapping-rule mini-language used by category templates:
//! `fixed:`, `product.`, `template.`, `extract:`, `{placeholder}` and a
//! pipe-delimited fallback chain. One parser, one interpreter.

use crate::models::{CategoryTemplate, Product};
use crate::payload::options::normalize;

#[derive(Debug, Clone, PartialEq)]
pub enum MappingRule {
    Fixed(String),
    ProductField(String),
    TemplateField(String),
    Extract(String),
    Placeholder(String),
    Fallback(Vec<MappingRule>),
}

pub fn parse(raw: &str) -> MappingRule {
    let raw = raw.trim();
    if raw.contains('|') {
        return MappingRule::Fallback(raw.split('|').map(parse).collect());
    }
    if let Some(rest) = raw.strip_prefix("fixed:") {
        return MappingRule::Fixed(rest.trim().to_string());
    }
    if let Some(rest) = raw.strip_prefix("product.") {
        return MappingRule::ProductField(rest.trim().to_string());
    }
    if let Some(rest) = raw.strip_prefix("template.") {
        return MappingRule::TemplateField(rest.trim().to_string());
    }
    if let Some(rest) = raw.strip_prefix("extract:") {
        return MappingRule::Extract(rest.trim().to_string());
    }
    if let Some(inner) = raw
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
    {
        return MappingRule::Placeholder(inner.trim().to_string());
    }
    // A bare string is a literal.
    MappingRule::Fixed(raw.to_string())
}

/// Evaluates a rule to a non-empty trimmed value, or None. Fallback chains
/// are evaluated left-to-right, first non-empty result wins.
pub fn evaluate(
    rule: &MappingRule,
    product: &Product,
    template: &CategoryTemplate,
) -> Option<String> {
    let resolved = match rule {
        MappingRule::Fixed(value) => Some(value.clone()),
        MappingRule::ProductField(name) => product_field(product, name),
        MappingRule::TemplateField(name) => template_field(template, name),
        MappingRule::Extract(keyword) => extract_keyword(product, keyword),
        MappingRule::Placeholder(key) => placeholder(product, key),
        MappingRule::Fallback(rules) => rules
            .iter()
            .find_map(|inner| evaluate(inner, product, template)),
    };
    resolved
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn product_field(product: &Product, name: &str) -> Option<String> {
    match name {
        "title" => Some(product.title.clone()),
        "sku" => Some(product.sku.clone()),
        "brand" => Some(product.brand.clone()),
        "category" => Some(product.category_label.clone()),
        "description" => Some(product.description.clone()),
        "currency" => Some(product.currency.code().to_string()),
        "price" => Some(format_number(product.price)),
        "final_price" => product.final_price.map(format_number),
        "margin" => Some(format_number(product.margin)),
        "stock" => Some(product.stock.to_string()),
        _ => None,
    }
}

fn template_field(template: &CategoryTemplate, name: &str) -> Option<String> {
    match name {
        "name" => Some(template.name.clone()),
        "listing_type" => Some(template.listing_type.as_str().to_string()),
        "condition" | "state" => Some(template.condition.as_str().to_string()),
        "title_template" => template.title_template.clone(),
        "description_template" => template.description_template.clone(),
        _ => None,
    }
}

/// Case/diacritic-normalized lookup into the product's spec map, falling
/// back to a small fixed set of direct product-field aliases.
fn placeholder(product: &Product, key: &str) -> Option<String> {
    let wanted = normalize(key);
    if let Some(value) = product
        .specs
        .iter()
        .find(|(spec_key, _)| normalize(spec_key) == wanted)
        .map(|(_, value)| value.clone())
    {
        return Some(value);
    }
    match wanted.as_str() {
        "title" | "naslov" => Some(product.title.clone()),
        "sku" | "sifra" => Some(product.sku.clone()),
        "brand" | "brend" | "marka" => Some(product.brand.clone()),
        "price" | "cijena" => Some(format_number(product.price)),
        "stock" | "kolicina" => Some(product.stock.to_string()),
        "description" | "opis" => Some(product.description.clone()),
        _ => None,
    }
}

/// Free-text keyword scan of the description; the keyword itself is the
/// resolved value when present.
fn extract_keyword(product: &Product, keyword: &str) -> Option<String> {
    let wanted = normalize(keyword);
    if wanted.is_empty() {
        return None;
    }
    let haystack = normalize(&product.description);
    if haystack.contains(&wanted) {
        Some(keyword.trim().to_string())
    } else {
        None
    }
}

fn format_number(value: f64) -> String {
    if (value - value.trunc()).abs() < f64::EPSILON {
        format!("{}", value.trunc() as i64)
    } else {
        format!("{value}")
    }
}
