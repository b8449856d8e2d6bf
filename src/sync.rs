//! Remote pull-sync: walks the shop's own marketplace listings page by page
//! and mirrors them into the local product/listing tables. Item-scoped
//! failures are counted in the report; only enumeration failures abort.

use crate::catalog::SyncError;
use crate::media::MediaStore;
use crate::models::{
    Listing, ListingStatus, Product, ProductSource, Shop, SyncReport,
};
use crate::olx::client::{MarketplaceApi, filename_from_url};
use crate::olx::remote;
use crate::store::Stores;
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Upper bound on processed listings, not on pages.
    pub limit: usize,
    /// Only mirror listings whose summary status matches.
    pub status_filter: Option<String>,
    /// Only mirror listings in this remote category.
    pub category_filter: Option<i64>,
    /// Skip listings that already have a local row without fetching their
    /// detail. Wins over the category filter: a skipped item is never
    /// fetched, so its category is never known.
    pub skip_existing: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            status_filter: None,
            category_filter: None,
            skip_existing: false,
        }
    }
}

pub struct RemoteSync<'a> {
    pub api: &'a dyn MarketplaceApi,
    pub stores: &'a Stores,
    pub media: &'a dyn MediaStore,
}

impl<'a> RemoteSync<'a> {
    pub fn new(api: &'a dyn MarketplaceApi, stores: &'a Stores, media: &'a dyn MediaStore) -> Self {
        Self { api, stores, media }
    }

    pub async fn sync_products(
        &self,
        shop: &Shop,
        options: &SyncOptions,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        let mut processed = 0usize;
        let mut page = 1usize;

        'pages: loop {
            let body = self.api.fetch_user_listings(shop, page).await?;
            let entries = remote::listing_entries(&body);
            if entries.is_empty() {
                break;
            }
            for entry in &entries {
                if processed >= options.limit {
                    break 'pages;
                }
                processed += 1;
                self.sync_one(shop, entry, options, &mut report).await;
            }
            if remote::is_last_page(&body) {
                break;
            }
            page += 1;
        }

        info!(
            target = "olx.sync",
            shop = %shop.name,
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            "pull_sync_finished"
        );
        Ok(report)
    }

    async fn sync_one(
        &self,
        shop: &Shop,
        summary: &Value,
        options: &SyncOptions,
        report: &mut SyncReport,
    ) {
        let Some(external_id) = remote::external_id(summary) else {
            report.record_failure("listing without an id in page payload");
            return;
        };

        let existing_listing = match self
            .stores
            .listings
            .listing_by_external_id(shop.id, &external_id)
        {
            Ok(found) => found,
            Err(err) => {
                report.record_failure(format!("listing {external_id}: {err}"));
                return;
            }
        };
        if options.skip_existing && existing_listing.is_some() {
            report.skipped += 1;
            return;
        }

        if let Some(wanted) = &options.status_filter
            && remote::status(summary).as_deref() != Some(wanted.as_str())
        {
            report.skipped += 1;
            return;
        }

        let detail = match self.api.fetch_listing(shop, &external_id).await {
            Ok(detail) => detail,
            Err(err) => {
                warn!(target = "olx.sync", listing = %external_id, error = %err, "detail_fetch_failed");
                report.record_failure(format!("listing {external_id}: {err}"));
                return;
            }
        };

        let category_external = remote::category_external_id(&detail);
        if let Some(wanted) = options.category_filter
            && category_external != Some(wanted)
        {
            report.skipped += 1;
            return;
        }

        if let Err(err) = self
            .mirror_listing(shop, &external_id, &detail, existing_listing, report)
            .await
        {
            warn!(target = "olx.sync", listing = %external_id, error = %err, "mirror_failed");
            report.record_failure(format!("listing {external_id}: {err}"));
        }
    }

    async fn mirror_listing(
        &self,
        shop: &Shop,
        external_id: &str,
        detail: &Value,
        existing_listing: Option<Listing>,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        // A listing in an unknown category is a soft failure: the category
        // sync has not seen it yet, so there is no local node to anchor the
        // template to.
        let category_external = remote::category_external_id(detail)
            .ok_or_else(|| SyncError::Upstream(format!("listing {external_id} has no category")))?;
        let category = self
            .stores
            .categories
            .category_by_external_id(category_external)?
            .ok_or(SyncError::UnknownCategory(category_external))?;

        let location = match remote::city_external_id(detail) {
            Some(city) => self.stores.locations.location_by_external_id(city)?,
            None => None,
        };

        let template = self.find_or_create_template(shop, &category, location.as_ref())?;

        match existing_listing {
            Some(mut listing) => {
                let mut product = self.stores.products.product(listing.product_id)?;
                apply_remote_fields(&mut product, detail);
                product.recompute_final_price();
                product.template_id.get_or_insert(template.id);
                product.updated_at = Utc::now();
                self.stores.products.update_product(product.clone())?;
                self.refresh_images(&product).await;

                listing.status = remote::status(detail)
                    .map(|raw| ListingStatus::from_remote(&raw))
                    .unwrap_or(listing.status);
                listing.metadata = detail.clone();
                listing.synced_at = Some(Utc::now());
                self.stores.listings.update_listing(listing)?;
                report.updated += 1;
            }
            None => {
                let mut product = Product::new(shop.id, ProductSource::Marketplace, external_id);
                apply_remote_fields(&mut product, detail);
                product.template_id = Some(template.id);
                product.margin = 0.0;
                product.recompute_final_price();
                self.stores.products.insert_product(product.clone())?;
                self.refresh_images(&product).await;

                let mut listing = Listing::pending(&product);
                listing.external_id = Some(external_id.to_string());
                listing.status = remote::status(detail)
                    .map(|raw| ListingStatus::from_remote(&raw))
                    .unwrap_or(ListingStatus::Draft);
                if listing.status == ListingStatus::Published {
                    listing.published_at = Some(Utc::now());
                }
                listing.metadata = detail.clone();
                listing.synced_at = Some(Utc::now());
                self.stores.listings.insert_listing(listing)?;
                report.created += 1;
            }
        }
        Ok(())
    }

    fn find_or_create_template(
        &self,
        shop: &Shop,
        category: &crate::models::Category,
        location: Option<&crate::models::Location>,
    ) -> Result<crate::models::CategoryTemplate, SyncError> {
        let location_id = location.map(|entry| entry.id);
        if let Some(existing) =
            self.stores
                .templates
                .auto_template(shop.id, category.id, location_id)?
        {
            return Ok(existing);
        }
        let name = match location {
            Some(location) => format!("Auto: {} – {}", category.name, location.name),
            None => format!("Auto: {}", category.name),
        };
        let mut template = crate::models::CategoryTemplate::new(shop.id, category.id, &name);
        template.location_id = location_id;
        template.auto_created = true;
        self.stores.templates.insert_template(template.clone())?;
        info!(target = "olx.sync", template = %template.name, "auto_template_created");
        Ok(template)
    }

    /// Downloads the remote images into blob storage, replacing whatever was
    /// attached before. One bad image skips, the rest land.
    async fn refresh_images(&self, product: &Product) {
        if product.image_urls.is_empty() {
            return;
        }
        if let Err(err) = self.media.purge(product.id) {
            warn!(target = "olx.sync", product = %product.id, error = %err, "image_purge_failed");
            return;
        }
        for url in &product.image_urls {
            match self.api.download_image(url).await {
                Ok(bytes) => {
                    if let Err(err) = self.media.attach(product.id, &filename_from_url(url), bytes)
                    {
                        warn!(target = "olx.sync", product = %product.id, image = %url, error = %err, "image_attach_failed");
                    }
                }
                Err(err) => {
                    warn!(target = "olx.sync", product = %product.id, image = %url, error = %err, "image_download_failed");
                }
            }
        }
    }
}

/// Copies the mirrored fields out of a detail payload. Marketplace-origin
/// products keep price as the listed price with no margin on top.
fn apply_remote_fields(product: &mut Product, detail: &Value) {
    if let Some(title) = remote::title(detail) {
        product.title = title.clone();
        product.olx_title = Some(title);
    }
    if let Some(description) = remote::description(detail) {
        product.description = description.clone();
        product.olx_description = Some(description);
    }
    if let Some(price) = remote::price(detail) {
        product.price = price;
    }
    product.image_urls = remote::images(detail);
    product.stock = product.stock.max(1);
}
