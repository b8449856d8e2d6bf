//! Programmable [`MarketplaceApi`] stub shared by the engine tests.

use crate::models::Shop;
use crate::olx::client::MarketplaceApi;
use crate::olx::error::ApiError;
use crate::payload::ListingPayload;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct StubApi {
    pub categories: Value,
    pub category_details: HashMap<i64, Value>,
    pub category_attributes: HashMap<i64, Value>,
    pub cities: Value,
    pub listing_pages: Vec<Value>,
    pub listing_details: HashMap<String, Value>,
    pub create_response: Value,
    pub publish_response: Value,
    pub fail_uploads: bool,
    pub calls: Mutex<Vec<String>>,
}

impl StubApi {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl MarketplaceApi for StubApi {
    async fn fetch_categories(&self, _shop: &Shop) -> Result<Value, ApiError> {
        self.record("categories");
        Ok(self.categories.clone())
    }

    async fn fetch_category(&self, _shop: &Shop, external_id: i64) -> Result<Value, ApiError> {
        self.record(format!("category:{external_id}"));
        Ok(self
            .category_details
            .get(&external_id)
            .cloned()
            .unwrap_or_else(|| json!({ "id": external_id })))
    }

    async fn fetch_category_attributes(
        &self,
        _shop: &Shop,
        external_id: i64,
    ) -> Result<Value, ApiError> {
        self.record(format!("attributes:{external_id}"));
        Ok(self
            .category_attributes
            .get(&external_id)
            .cloned()
            .unwrap_or_else(|| json!([])))
    }

    async fn fetch_locations(&self, _shop: &Shop) -> Result<Value, ApiError> {
        self.record("locations");
        Ok(json!([]))
    }

    async fn fetch_cities(&self, _shop: &Shop) -> Result<Value, ApiError> {
        self.record("cities");
        Ok(self.cities.clone())
    }

    async fn fetch_listing(&self, _shop: &Shop, external_id: &str) -> Result<Value, ApiError> {
        self.record(format!("listing:{external_id}"));
        self.listing_details
            .get(external_id)
            .cloned()
            .ok_or_else(|| ApiError::Upstream(format!("detail fetch failed for {external_id}")))
    }

    async fn fetch_user_listings(&self, _shop: &Shop, page: usize) -> Result<Value, ApiError> {
        self.record(format!("page:{page}"));
        Ok(self
            .listing_pages
            .get(page.saturating_sub(1))
            .cloned()
            .unwrap_or_else(|| json!({ "data": [] })))
    }

    async fn create_listing(
        &self,
        _shop: &Shop,
        payload: &ListingPayload,
    ) -> Result<Value, ApiError> {
        self.record(format!("create:{}", payload.title));
        if self.create_response.is_null() {
            return Err(ApiError::Validation("create not configured".to_string()));
        }
        Ok(self.create_response.clone())
    }

    async fn update_listing(
        &self,
        _shop: &Shop,
        external_id: &str,
        _payload: &ListingPayload,
    ) -> Result<Value, ApiError> {
        self.record(format!("update:{external_id}"));
        Ok(json!({ "id": external_id, "status": "active" }))
    }

    async fn delete_listing(&self, _shop: &Shop, external_id: &str) -> Result<Value, ApiError> {
        self.record(format!("delete:{external_id}"));
        Ok(json!({}))
    }

    async fn publish_listing(&self, _shop: &Shop, external_id: &str) -> Result<Value, ApiError> {
        self.record(format!("publish:{external_id}"));
        if self.publish_response.is_null() {
            Ok(json!({ "id": external_id, "status": "active" }))
        } else {
            Ok(self.publish_response.clone())
        }
    }

    async fn unpublish_listing(&self, _shop: &Shop, external_id: &str) -> Result<Value, ApiError> {
        self.record(format!("unpublish:{external_id}"));
        Ok(json!({ "id": external_id, "status": "paused" }))
    }

    async fn upload_images(
        &self,
        _shop: &Shop,
        external_id: &str,
        urls: &[String],
    ) -> Result<Vec<String>, ApiError> {
        self.record(format!("upload:{external_id}:{}", urls.len()));
        if self.fail_uploads {
            return Err(ApiError::Upstream("upload refused".to_string()));
        }
        Ok(urls.to_vec())
    }

    async fn download_image(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        self.record(format!("download:{url}"));
        Ok(vec![0xFF, 0xD8, 0xFF, 0xE0])
    }
}
