//! Storefront-to-OLX bridge core: category/location catalog mirroring,
//! listing payload construction, remote listing lifecycle, and pull-based
//! reconciliation against the marketplace inventory.
//!
//! The web layer, CSV parsing and the browser scraper itself live outside
//! this crate; they talk to it through [`models::ProductRecord`], the store
//! traits in [`store`] and the blob boundary in [`media`].

pub mod catalog;
pub mod import;
pub mod lifecycle;
pub mod media;
pub mod models;
pub mod olx;
pub mod payload;
pub mod scraper;
pub mod store;
pub mod sync;

pub use catalog::SyncError;
pub use models::SyncReport;
