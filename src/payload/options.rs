//! Normalization and fuzzy matching of attribute values against a category's
//! declared option list.

use once_cell::sync::Lazy;
use regex::Regex;

/// Lowercases, folds Bosnian/Latin diacritics and collapses whitespace.
pub fn normalize(value: &str) -> String {
    let mut folded = String::with_capacity(value.len());
    for ch in value.to_lowercase().chars() {
        match ch {
            'č' | 'ć' => folded.push('c'),
            'đ' => folded.push_str("dj"),
            'š' => folded.push('s'),
            'ž' => folded.push('z'),
            'ä' | 'á' | 'à' | 'â' => folded.push('a'),
            'é' | 'è' | 'ê' | 'ë' => folded.push('e'),
            'í' | 'ì' | 'î' | 'ï' => folded.push('i'),
            'ó' | 'ò' | 'ô' | 'ö' => folded.push('o'),
            'ú' | 'ù' | 'û' | 'ü' => folded.push('u'),
            other => folded.push(other),
        }
    }
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolves a value against allowed options: exact, case-insensitive,
/// diacritic-normalized, ending-tolerant stem, then substring containment.
/// No match means the caller must drop the attribute; the marketplace
/// rejects unknown option values.
pub fn match_option(value: &str, options: &[String]) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(found) = options.iter().find(|option| option.as_str() == trimmed) {
        return Some(found.clone());
    }
    let lowered = trimmed.to_lowercase();
    if let Some(found) = options
        .iter()
        .find(|option| option.to_lowercase() == lowered)
    {
        return Some(found.clone());
    }
    let normalized = normalize(trimmed);
    if let Some(found) = options
        .iter()
        .find(|option| normalize(option) == normalized)
    {
        return Some(found.clone());
    }
    if let Some(found) = options
        .iter()
        .find(|option| stems_match(&normalized, &normalize(option)))
    {
        return Some(found.clone());
    }
    options
        .iter()
        .find(|option| {
            let candidate = normalize(option);
            candidate.contains(&normalized) || normalized.contains(&candidate)
        })
        .cloned()
}

/// Gender/ending-tolerant comparison: the words share at least three leading
/// normalized characters and differ only in a short ending.
fn stems_match(a: &str, b: &str) -> bool {
    let shared = a
        .chars()
        .zip(b.chars())
        .take_while(|(left, right)| left == right)
        .count();
    shared >= 3 && shared + 2 >= a.chars().count() && shared + 2 >= b.chars().count()
}

static FIRST_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("digit pattern"));

/// First numeric substring of a raw value, e.g. "77.0 Ah" yields "77".
pub fn first_number(value: &str) -> Option<String> {
    FIRST_NUMBER
        .find(value)
        .map(|found| found.as_str().to_string())
}
