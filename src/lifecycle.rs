//! Listing lifecycle: create, update, publish/unpublish, delete and the
//! reconnect recovery path. Every remote response is merged into the local
//! listing's metadata so the row doubles as an audit trail.

use crate::models::{Listing, ListingStatus, Product, Shop};
use crate::olx::client::MarketplaceApi;
use crate::olx::error::ApiError;
use crate::olx::remote;
use crate::payload::{BuildContext, BuildError, ListingPayload, build};
use crate::store::{StoreError, Stores};
use chrono::Utc;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("category {0} has subcategories and cannot host listings")]
    NonLeafCategory(i64),
    #[error("listing has no marketplace id yet")]
    MissingExternalId,
    #[error("product carries no recorded listing reference")]
    MissingListingRef,
}

impl LifecycleError {
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleError::Build(_) => "build",
            LifecycleError::Api(err) => err.kind(),
            LifecycleError::Store(_) => "store",
            LifecycleError::NonLeafCategory(_) => "non_leaf_category",
            LifecycleError::MissingExternalId => "missing_external_id",
            LifecycleError::MissingListingRef => "missing_listing_ref",
        }
    }
}

/// Outcome of [`Lifecycle::reconnect_listing`].
pub enum ReconnectOutcome {
    /// The remote listing still exists and is now linked locally.
    Reconnected(Listing),
    /// The recorded reference points nowhere; it has been cleared.
    Gone,
}

pub struct Lifecycle<'a> {
    pub api: &'a dyn MarketplaceApi,
    pub stores: &'a Stores,
}

impl<'a> Lifecycle<'a> {
    pub fn new(api: &'a dyn MarketplaceApi, stores: &'a Stores) -> Self {
        Self { api, stores }
    }

    /// Resolves the catalog context and builds the outgoing payload.
    fn build_payload(&self, product: &Product) -> Result<ListingPayload, LifecycleError> {
        let template_id = product.template_id.ok_or(BuildError::MissingTemplate)?;
        let template = self.stores.templates.template(template_id)?;
        let category = match self.stores.categories.category(template.category_id) {
            Ok(category) => category,
            Err(StoreError::NotFound { .. }) => {
                return Err(BuildError::MissingCategory.into());
            }
            Err(err) => return Err(err.into()),
        };
        // Only leaf categories host listings; the marketplace rejects the rest.
        if !self.stores.categories.is_leaf(category.id)? {
            return Err(LifecycleError::NonLeafCategory(category.external_id));
        }
        let attributes = self.stores.categories.attributes_for(category.id)?;
        let location = match template.location_id {
            Some(id) => Some(self.stores.locations.location(id)?),
            None => None,
        };
        let stored_metadata = self
            .stores
            .listings
            .listing_for_product(product.id)?
            .map(|listing| listing.metadata)
            .filter(|metadata| !metadata.is_null());

        let ctx = BuildContext {
            category: &category,
            attributes: &attributes,
            location: location.as_ref(),
            stored_metadata: stored_metadata.as_ref(),
        };
        Ok(build(product, &template, &ctx)?)
    }

    /// Creates the marketplace listing for a product. The local row is
    /// persisted as Pending before the network call so a crash mid-flight
    /// leaves an inspectable record rather than silence.
    pub async fn create_listing(
        &self,
        shop: &Shop,
        mut product: Product,
    ) -> Result<Listing, LifecycleError> {
        product.derive_marketplace_fields();
        product.recompute_final_price();
        product.updated_at = Utc::now();
        self.stores.products.update_product(product.clone())?;

        let payload = self.build_payload(&product)?;

        let mut listing = Listing::pending(&product);
        self.stores.listings.insert_listing(listing.clone())?;

        let response = match self.api.create_listing(shop, &payload).await {
            Ok(response) => response,
            Err(err) => {
                self.mark_failed(&mut listing, &err)?;
                return Err(err.into());
            }
        };

        listing.external_id = remote::external_id(&response);
        listing.status = remote::status(&response)
            .map(|raw| ListingStatus::from_remote(&raw))
            .unwrap_or(ListingStatus::Draft);
        if listing.status == ListingStatus::Published {
            listing.published_at = Some(Utc::now());
        }
        listing.metadata = response;
        listing.synced_at = Some(Utc::now());
        self.stores.listings.update_listing(listing.clone())?;
        info!(
            target = "olx.lifecycle",
            shop = %shop.name,
            product = %product.id,
            external_id = listing.external_id.as_deref().unwrap_or(""),
            status = listing.status.as_str(),
            "listing_created"
        );

        self.upload_images_best_effort(shop, &product, &listing).await;
        Ok(listing)
    }

    /// Full payload rebuild pushed over the existing marketplace listing.
    pub async fn update_listing(
        &self,
        shop: &Shop,
        mut product: Product,
    ) -> Result<Listing, LifecycleError> {
        product.derive_marketplace_fields();
        product.recompute_final_price();
        product.updated_at = Utc::now();
        self.stores.products.update_product(product.clone())?;

        let mut listing = self
            .stores
            .listings
            .listing_for_product(product.id)?
            .ok_or_else(|| StoreError::not_found("listing", product.id))?;
        let external_id = listing
            .external_id
            .clone()
            .ok_or(LifecycleError::MissingExternalId)?;

        let payload = self.build_payload(&product)?;
        let response = match self.api.update_listing(shop, &external_id, &payload).await {
            Ok(response) => response,
            Err(err) => {
                self.mark_failed(&mut listing, &err)?;
                return Err(err.into());
            }
        };

        merge_metadata(&mut listing.metadata, &response);
        listing.synced_at = Some(Utc::now());
        self.stores.listings.update_listing(listing.clone())?;
        info!(
            target = "olx.lifecycle",
            shop = %shop.name,
            external_id = %external_id,
            "listing_updated"
        );

        self.upload_images_best_effort(shop, &product, &listing).await;
        Ok(listing)
    }

    pub async fn publish_listing(
        &self,
        shop: &Shop,
        listing_id: Uuid,
    ) -> Result<Listing, LifecycleError> {
        let mut listing = self.stores.listings.listing(listing_id)?;
        let external_id = listing
            .external_id
            .clone()
            .ok_or(LifecycleError::MissingExternalId)?;
        let response = self.api.publish_listing(shop, &external_id).await?;
        merge_metadata(&mut listing.metadata, &response);
        listing.status = ListingStatus::Published;
        listing.published_at = Some(Utc::now());
        listing.synced_at = Some(Utc::now());
        self.stores.listings.update_listing(listing.clone())?;
        info!(target = "olx.lifecycle", external_id = %external_id, "listing_published");
        Ok(listing)
    }

    pub async fn unpublish_listing(
        &self,
        shop: &Shop,
        listing_id: Uuid,
    ) -> Result<Listing, LifecycleError> {
        let mut listing = self.stores.listings.listing(listing_id)?;
        let external_id = listing
            .external_id
            .clone()
            .ok_or(LifecycleError::MissingExternalId)?;
        let response = self.api.unpublish_listing(shop, &external_id).await?;
        merge_metadata(&mut listing.metadata, &response);
        listing.status = ListingStatus::Draft;
        listing.synced_at = Some(Utc::now());
        self.stores.listings.update_listing(listing.clone())?;
        info!(target = "olx.lifecycle", external_id = %external_id, "listing_unpublished");
        Ok(listing)
    }

    /// Removes the marketplace listing. The local row is retained in the
    /// Removed state; a remote 404 counts as already done.
    pub async fn delete_listing(
        &self,
        shop: &Shop,
        listing_id: Uuid,
    ) -> Result<Listing, LifecycleError> {
        let mut listing = self.stores.listings.listing(listing_id)?;
        if let Some(external_id) = listing.external_id.clone() {
            match self.api.delete_listing(shop, &external_id).await {
                Ok(_) => {}
                Err(ApiError::NotFound(_)) => {
                    info!(target = "olx.lifecycle", external_id = %external_id, "already_gone_remotely");
                }
                Err(err) => return Err(err.into()),
            }
        }
        listing.status = ListingStatus::Removed;
        merge_metadata(
            &mut listing.metadata,
            &json!({ "removed_at": Utc::now().to_rfc3339() }),
        );
        listing.synced_at = Some(Utc::now());
        self.stores.listings.update_listing(listing.clone())?;
        Ok(listing)
    }

    /// Recovery path for products that carry a listing reference from an
    /// earlier session but have no local listing row.
    pub async fn reconnect_listing(
        &self,
        shop: &Shop,
        mut product: Product,
    ) -> Result<ReconnectOutcome, LifecycleError> {
        let reference = product
            .listing_ref
            .clone()
            .ok_or(LifecycleError::MissingListingRef)?;
        match self.api.fetch_listing(shop, &reference).await {
            Ok(detail) => {
                let mut listing = match self.stores.listings.listing_for_product(product.id)? {
                    Some(existing) => existing,
                    None => {
                        let fresh = Listing::pending(&product);
                        self.stores.listings.insert_listing(fresh.clone())?;
                        fresh
                    }
                };
                listing.external_id = Some(reference.clone());
                listing.status = remote::status(&detail)
                    .map(|raw| ListingStatus::from_remote(&raw))
                    .unwrap_or(ListingStatus::Draft);
                listing.metadata = detail;
                listing.synced_at = Some(Utc::now());
                self.stores.listings.update_listing(listing.clone())?;

                product.listing_ref = None;
                product.updated_at = Utc::now();
                self.stores.products.update_product(product)?;
                info!(target = "olx.lifecycle", external_id = %reference, "listing_reconnected");
                Ok(ReconnectOutcome::Reconnected(listing))
            }
            Err(ApiError::NotFound(_)) => {
                product.listing_ref = None;
                product.updated_at = Utc::now();
                self.stores.products.update_product(product)?;
                info!(target = "olx.lifecycle", reference = %reference, "listing_reference_stale");
                Ok(ReconnectOutcome::Gone)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Image upload failures never fail the lifecycle operation; the listing
    /// exists either way and images can be retried on the next update.
    async fn upload_images_best_effort(&self, shop: &Shop, product: &Product, listing: &Listing) {
        let Some(external_id) = listing.external_id.as_deref() else {
            return;
        };
        if product.image_urls.is_empty() {
            return;
        }
        match self
            .api
            .upload_images(shop, external_id, &product.image_urls)
            .await
        {
            Ok(uploaded) => {
                info!(
                    target = "olx.lifecycle",
                    external_id = %external_id,
                    uploaded = uploaded.len(),
                    of = product.image_urls.len(),
                    "images_uploaded"
                );
            }
            Err(err) => {
                warn!(
                    target = "olx.lifecycle",
                    external_id = %external_id,
                    error = %err,
                    "image_upload_failed"
                );
            }
        }
    }

    fn mark_failed(&self, listing: &mut Listing, err: &ApiError) -> Result<(), StoreError> {
        listing.status = ListingStatus::Failed;
        merge_metadata(
            &mut listing.metadata,
            &json!({
                "error": {
                    "message": err.to_string(),
                    "kind": err.kind(),
                    "at": Utc::now().to_rfc3339(),
                }
            }),
        );
        self.stores.listings.update_listing(listing.clone())
    }
}

/// Shallow merge of a response object into stored metadata; non-object
/// responses replace the stored value outright.
fn merge_metadata(target: &mut Value, incoming: &Value) {
    match (target.as_object_mut(), incoming.as_object()) {
        (Some(existing), Some(new_fields)) => {
            for (key, value) in new_fields {
                existing.insert(key.clone(), value.clone());
            }
        }
        _ => *target = incoming.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, CategoryTemplate, ProductSource};
    use crate::olx::testing::StubApi;
    use serde_json::json;

    struct Fixture {
        shop: Shop,
        stores: Stores,
        product: Product,
    }

    fn fixture() -> Fixture {
        let shop = Shop::new("demo", "user", "pass");
        let stores = Stores::in_memory();
        let category = Category {
            id: Uuid::new_v4(),
            external_id: 996,
            name: "Gume i felge".to_string(),
            slug: "gume-i-felge".to_string(),
            parent_id: None,
            supports_shipping: true,
            supports_brand: true,
            metadata: Value::Null,
        };
        stores
            .categories
            .insert_category(category.clone())
            .expect("category");
        let template = CategoryTemplate::new(shop.id, category.id, "Gume");
        stores
            .templates
            .insert_template(template.clone())
            .expect("template");

        let mut product = Product::new(shop.id, ProductSource::Csv, "p-1");
        product.title = "Michelin Alpin 205/55 R16".to_string();
        product.price = 120.0;
        product.stock = 4;
        product.template_id = Some(template.id);
        stores
            .products
            .insert_product(product.clone())
            .expect("product");
        Fixture {
            shop,
            stores,
            product,
        }
    }

    #[tokio::test]
    async fn create_records_external_id_and_status() {
        let fx = fixture();
        let api = StubApi {
            create_response: json!({"id": 9911, "status": "active"}),
            ..StubApi::default()
        };
        let lifecycle = Lifecycle::new(&api, &fx.stores);
        let listing = lifecycle
            .create_listing(&fx.shop, fx.product.clone())
            .await
            .expect("create");
        assert_eq!(listing.external_id.as_deref(), Some("9911"));
        assert_eq!(listing.status, ListingStatus::Published);
        assert!(listing.published_at.is_some());
        assert!(listing.synced_at.is_some());

        // Final price was recomputed before building.
        let stored = fx.stores.products.product(fx.product.id).expect("product");
        assert_eq!(stored.final_price, Some(120.0));
    }

    #[tokio::test]
    async fn create_failure_leaves_a_failed_row_with_error_metadata() {
        let fx = fixture();
        // create_response left null => StubApi returns a validation error.
        let api = StubApi::default();
        let lifecycle = Lifecycle::new(&api, &fx.stores);
        let err = lifecycle
            .create_listing(&fx.shop, fx.product.clone())
            .await
            .expect_err("must fail");
        assert_eq!(err.kind(), "validation");

        let listing = fx
            .stores
            .listings
            .listing_for_product(fx.product.id)
            .expect("lookup")
            .expect("row persists");
        assert_eq!(listing.status, ListingStatus::Failed);
        assert_eq!(listing.metadata["error"]["kind"], "validation");
        assert!(
            listing.metadata["error"]["message"]
                .as_str()
                .expect("message")
                .contains("create not configured")
        );
    }

    #[tokio::test]
    async fn image_upload_failure_does_not_fail_the_create() {
        let mut fx = fixture();
        fx.product.image_urls = vec!["https://img/1.jpg".to_string()];
        fx.stores
            .products
            .update_product(fx.product.clone())
            .expect("update");
        let api = StubApi {
            create_response: json!({"id": 5, "status": "active"}),
            fail_uploads: true,
            ..StubApi::default()
        };
        let lifecycle = Lifecycle::new(&api, &fx.stores);
        let listing = lifecycle
            .create_listing(&fx.shop, fx.product.clone())
            .await
            .expect("create succeeds despite upload failure");
        assert_eq!(listing.status, ListingStatus::Published);
        assert_eq!(api.call_count("upload:"), 1);
    }

    #[tokio::test]
    async fn publish_and_unpublish_drive_the_status_machine() {
        let fx = fixture();
        let api = StubApi {
            create_response: json!({"id": 7, "status": "pending"}),
            ..StubApi::default()
        };
        let lifecycle = Lifecycle::new(&api, &fx.stores);
        let listing = lifecycle
            .create_listing(&fx.shop, fx.product.clone())
            .await
            .expect("create");
        assert_eq!(listing.status, ListingStatus::Draft);

        let published = lifecycle
            .publish_listing(&fx.shop, listing.id)
            .await
            .expect("publish");
        assert_eq!(published.status, ListingStatus::Published);
        assert!(published.published_at.is_some());

        let parked = lifecycle
            .unpublish_listing(&fx.shop, listing.id)
            .await
            .expect("unpublish");
        assert_eq!(parked.status, ListingStatus::Draft);
        // Earlier response fields survive the shallow merges.
        assert_eq!(parked.metadata["id"], "7");
    }

    #[tokio::test]
    async fn delete_retains_the_row_as_removed() {
        let fx = fixture();
        let api = StubApi {
            create_response: json!({"id": 7, "status": "active"}),
            ..StubApi::default()
        };
        let lifecycle = Lifecycle::new(&api, &fx.stores);
        let listing = lifecycle
            .create_listing(&fx.shop, fx.product.clone())
            .await
            .expect("create");
        let removed = lifecycle
            .delete_listing(&fx.shop, listing.id)
            .await
            .expect("delete");
        assert_eq!(removed.status, ListingStatus::Removed);
        assert!(removed.metadata["removed_at"].is_string());
        assert!(
            fx.stores
                .listings
                .listing(listing.id)
                .expect("row retained")
                .external_id
                .is_some()
        );
    }

    #[tokio::test]
    async fn reconnect_links_a_live_remote_listing() {
        let mut fx = fixture();
        fx.product.listing_ref = Some("4040".to_string());
        fx.stores
            .products
            .update_product(fx.product.clone())
            .expect("update");
        let mut api = StubApi::default();
        api.listing_details.insert(
            "4040".to_string(),
            json!({"id": 4040, "status": "active", "title": "Stari oglas"}),
        );
        let lifecycle = Lifecycle::new(&api, &fx.stores);
        let outcome = lifecycle
            .reconnect_listing(&fx.shop, fx.product.clone())
            .await
            .expect("reconnect");
        let ReconnectOutcome::Reconnected(listing) = outcome else {
            panic!("expected a reconnect");
        };
        assert_eq!(listing.external_id.as_deref(), Some("4040"));
        assert_eq!(listing.status, ListingStatus::Published);
        let product = fx.stores.products.product(fx.product.id).expect("product");
        assert!(product.listing_ref.is_none());
    }

    #[tokio::test]
    async fn reconnect_clears_a_stale_reference() {
        let mut fx = fixture();
        fx.product.listing_ref = Some("999".to_string());
        fx.stores
            .products
            .update_product(fx.product.clone())
            .expect("update");
        // StubApi signals Upstream for unknown ids; a stale ref needs NotFound.
        struct GoneApi(StubApi);
        #[async_trait::async_trait]
        impl crate::olx::client::MarketplaceApi for GoneApi {
            async fn fetch_categories(&self, shop: &Shop) -> Result<Value, ApiError> {
                self.0.fetch_categories(shop).await
            }
            async fn fetch_category(&self, shop: &Shop, id: i64) -> Result<Value, ApiError> {
                self.0.fetch_category(shop, id).await
            }
            async fn fetch_category_attributes(
                &self,
                shop: &Shop,
                id: i64,
            ) -> Result<Value, ApiError> {
                self.0.fetch_category_attributes(shop, id).await
            }
            async fn fetch_locations(&self, shop: &Shop) -> Result<Value, ApiError> {
                self.0.fetch_locations(shop).await
            }
            async fn fetch_cities(&self, shop: &Shop) -> Result<Value, ApiError> {
                self.0.fetch_cities(shop).await
            }
            async fn fetch_listing(&self, _shop: &Shop, id: &str) -> Result<Value, ApiError> {
                Err(ApiError::NotFound(format!("listing {id} gone")))
            }
            async fn fetch_user_listings(&self, shop: &Shop, page: usize) -> Result<Value, ApiError> {
                self.0.fetch_user_listings(shop, page).await
            }
            async fn create_listing(
                &self,
                shop: &Shop,
                payload: &crate::payload::ListingPayload,
            ) -> Result<Value, ApiError> {
                self.0.create_listing(shop, payload).await
            }
            async fn update_listing(
                &self,
                shop: &Shop,
                id: &str,
                payload: &crate::payload::ListingPayload,
            ) -> Result<Value, ApiError> {
                self.0.update_listing(shop, id, payload).await
            }
            async fn delete_listing(&self, shop: &Shop, id: &str) -> Result<Value, ApiError> {
                self.0.delete_listing(shop, id).await
            }
            async fn publish_listing(&self, shop: &Shop, id: &str) -> Result<Value, ApiError> {
                self.0.publish_listing(shop, id).await
            }
            async fn unpublish_listing(&self, shop: &Shop, id: &str) -> Result<Value, ApiError> {
                self.0.unpublish_listing(shop, id).await
            }
            async fn upload_images(
                &self,
                shop: &Shop,
                id: &str,
                urls: &[String],
            ) -> Result<Vec<String>, ApiError> {
                self.0.upload_images(shop, id, urls).await
            }
            async fn download_image(&self, url: &str) -> Result<Vec<u8>, ApiError> {
                self.0.download_image(url).await
            }
        }
        let api = GoneApi(StubApi::default());
        let lifecycle = Lifecycle::new(&api, &fx.stores);
        let outcome = lifecycle
            .reconnect_listing(&fx.shop, fx.product.clone())
            .await
            .expect("reconnect");
        assert!(matches!(outcome, ReconnectOutcome::Gone));
        let product = fx.stores.products.product(fx.product.id).expect("product");
        assert!(product.listing_ref.is_none());
        assert!(
            fx.stores
                .listings
                .listing_for_product(product.id)
                .expect("lookup")
                .is_none()
        );
    }

    #[tokio::test]
    async fn non_leaf_template_category_is_rejected() {
        let fx = fixture();
        let parent = fx
            .stores
            .categories
            .category_by_external_id(996)
            .expect("lookup")
            .expect("category");
        let child = Category {
            id: Uuid::new_v4(),
            external_id: 997,
            name: "Felge".to_string(),
            slug: "felge".to_string(),
            parent_id: Some(parent.id),
            supports_shipping: false,
            supports_brand: false,
            metadata: Value::Null,
        };
        fx.stores.categories.insert_category(child).expect("child");

        let api = StubApi {
            create_response: json!({"id": 1, "status": "active"}),
            ..StubApi::default()
        };
        let lifecycle = Lifecycle::new(&api, &fx.stores);
        let err = lifecycle
            .create_listing(&fx.shop, fx.product.clone())
            .await
            .expect_err("parent category must be refused");
        assert!(matches!(err, LifecycleError::NonLeafCategory(996)));
        // Refused before any network traffic.
        assert_eq!(api.call_count("create:"), 0);
    }

    #[tokio::test]
    async fn update_requires_an_external_id() {
        let fx = fixture();
        let api = StubApi::default();
        let lifecycle = Lifecycle::new(&api, &fx.stores);
        fx.stores
            .listings
            .insert_listing(Listing::pending(&fx.product))
            .expect("pending row");
        let err = lifecycle
            .update_listing(&fx.shop, fx.product.clone())
            .await
            .expect_err("no external id");
        assert!(matches!(err, LifecycleError::MissingExternalId));
    }
}
