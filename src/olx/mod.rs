pub mod client;
pub mod config;
pub mod error;
pub mod remote;
#[cfg(test)]
pub mod testing;

pub use client::{MarketplaceApi, OlxClient};
pub use error::ApiError;
