use once_cell::sync::Lazy;
use std::env;

pub static API_ROOT: Lazy<String> = Lazy::new(|| {
    env::var("OLX_API_ROOT")
        .map(|root| root.trim_end_matches('/').to_string())
        .unwrap_or_else(|_| "https://api.olx.ba".to_string())
});

/// The upstream never reports a token expiry; the TTL is a local guess and
/// therefore configurable rather than a literal.
pub static TOKEN_TTL_DAYS: Lazy<i64> = Lazy::new(|| {
    env::var("OLX_TOKEN_TTL_DAYS")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(30)
});

pub static PAGE_SIZE: Lazy<usize> = Lazy::new(|| {
    env::var("OLX_PAGE_SIZE")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(20)
});

/// Fallback coordinate used when neither a template location nor stored
/// listing metadata yields one. The marketplace requires some location
/// signal; Sarajevo by default.
pub static DEFAULT_LAT: Lazy<f64> = Lazy::new(|| {
    env::var("OLX_DEFAULT_LAT")
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(43.8563)
});

pub static DEFAULT_LON: Lazy<f64> = Lazy::new(|| {
    env::var("OLX_DEFAULT_LON")
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(18.4131)
});
