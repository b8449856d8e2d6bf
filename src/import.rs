//! Storefront record import: maps product-shaped records from the CSV and
//! scraper collaborators onto the product table, keyed by (shop, source,
//! source_id).

use crate::media::MediaStore;
use crate::models::{Currency, Product, ProductRecord, ProductSource, Shop, SyncReport};
use crate::olx::client::{MarketplaceApi, filename_from_url};
use crate::store::{StoreError, Stores};
use chrono::Utc;
use tracing::{info, warn};

pub async fn import_records(
    api: &dyn MarketplaceApi,
    stores: &Stores,
    media: &dyn MediaStore,
    shop: &Shop,
    source: ProductSource,
    records: Vec<ProductRecord>,
) -> SyncReport {
    let mut report = SyncReport::default();
    for record in records {
        let source_id = record.source_id.clone();
        match import_one(api, stores, media, shop, source, record).await {
            Ok(true) => report.created += 1,
            Ok(false) => report.updated += 1,
            Err(err) => {
                warn!(target = "olx.import", source_id = %source_id, error = %err, "record_import_failed");
                report.record_failure(format!("record {source_id}: {err}"));
            }
        }
    }
    info!(
        target = "olx.import",
        shop = %shop.name,
        source = source.as_str(),
        created = report.created,
        updated = report.updated,
        failed = report.failed,
        "records_imported"
    );
    report
}

/// Returns true when a new product was created.
async fn import_one(
    api: &dyn MarketplaceApi,
    stores: &Stores,
    media: &dyn MediaStore,
    shop: &Shop,
    source: ProductSource,
    record: ProductRecord,
) -> Result<bool, StoreError> {
    let existing = stores
        .products
        .product_by_source(shop.id, source, &record.source_id)?;
    let created = existing.is_none();
    let reuse_images = !created && record.reuse_existing == Some(true);

    let mut product = existing.unwrap_or_else(|| {
        let mut fresh = Product::new(shop.id, source, &record.source_id);
        fresh.margin = shop.default_margin;
        fresh
    });
    apply_record(&mut product, &record);
    product.recompute_final_price();
    product.updated_at = Utc::now();

    if created {
        stores.products.insert_product(product.clone())?;
    } else {
        stores.products.update_product(product.clone())?;
    }

    if !reuse_images {
        refresh_images(api, media, &product).await;
    }
    Ok(created)
}

fn apply_record(product: &mut Product, record: &ProductRecord) {
    product.title = match &record.sub_title {
        Some(sub) if !sub.trim().is_empty() => {
            format!("{} {}", record.title.trim(), sub.trim())
        }
        _ => record.title.trim().to_string(),
    };
    if let Some(sku) = &record.sku {
        product.sku = sku.trim().to_string();
    }
    if let Some(brand) = &record.brand {
        product.brand = brand.trim().to_string();
    }
    product.price = record.price;
    product.currency = record
        .currency
        .as_deref()
        .and_then(Currency::from_code)
        .unwrap_or(Currency::Bam);
    product.stock = record.quantity.unwrap_or_else(|| {
        record
            .branch_availability
            .as_ref()
            .map(|branches| branches.values().sum())
            .unwrap_or(0)
    });
    product.description = match &record.technical_description {
        Some(technical) if !technical.trim().is_empty() => {
            let base = record.description.as_deref().unwrap_or("").trim();
            if base.is_empty() {
                technical.trim().to_string()
            } else {
                format!("{base}\n{}", technical.trim())
            }
        }
        _ => record
            .description
            .as_deref()
            .unwrap_or("")
            .trim()
            .to_string(),
    };
    if let Some(specs) = &record.specs {
        for (key, value) in specs {
            product.specs.insert(key.clone(), value.clone());
        }
    }
    if let Some(models) = &record.models
        && !models.is_empty()
    {
        product
            .specs
            .insert("Modeli".to_string(), models.join(", "));
    }
    if !record.images.is_empty() {
        product.image_urls = record.images.clone();
    }
}

async fn refresh_images(api: &dyn MarketplaceApi, media: &dyn MediaStore, product: &Product) {
    if product.image_urls.is_empty() {
        return;
    }
    if let Err(err) = media.purge(product.id) {
        warn!(target = "olx.import", product = %product.id, error = %err, "image_purge_failed");
        return;
    }
    for url in &product.image_urls {
        match api.download_image(url).await {
            Ok(bytes) => {
                if let Err(err) = media.attach(product.id, &filename_from_url(url), bytes) {
                    warn!(target = "olx.import", product = %product.id, image = %url, error = %err, "image_attach_failed");
                }
            }
            Err(err) => {
                warn!(target = "olx.import", product = %product.id, image = %url, error = %err, "image_download_failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MemoryMediaStore;
    use crate::olx::testing::StubApi;
    use std::collections::BTreeMap;

    fn record(source_id: &str, price: f64) -> ProductRecord {
        ProductRecord {
            source_id: source_id.to_string(),
            title: "Akumulator".to_string(),
            sub_title: Some("77Ah 760A".to_string()),
            sku: Some("AKU-77".to_string()),
            brand: Some("Varta".to_string()),
            price,
            currency: Some("KM".to_string()),
            branch_availability: None,
            quantity: Some(3),
            description: Some("Startni akumulator.".to_string()),
            specs: Some(BTreeMap::from([(
                "Kapacitet".to_string(),
                "77 Ah".to_string(),
            )])),
            images: vec!["https://img/aku.jpg".to_string()],
            technical_description: Some("Tehnika: AGM".to_string()),
            models: None,
            reuse_existing: None,
        }
    }

    #[tokio::test]
    async fn import_creates_then_updates_by_source_key() {
        let api = StubApi::default();
        let stores = Stores::in_memory();
        let media = MemoryMediaStore::default();
        let mut shop = Shop::new("demo", "user", "pass");
        shop.default_margin = 10.0;

        let first = import_records(
            &api,
            &stores,
            &media,
            &shop,
            ProductSource::Csv,
            vec![record("a-1", 100.0)],
        )
        .await;
        assert_eq!(first.created, 1);

        let product = stores
            .products
            .product_by_source(shop.id, ProductSource::Csv, "a-1")
            .expect("lookup")
            .expect("product");
        assert_eq!(product.title, "Akumulator 77Ah 760A");
        assert_eq!(product.margin, 10.0);
        let final_price = product.final_price.expect("final price");
        assert!((final_price - 110.0).abs() < 1e-9);
        assert_eq!(product.currency, Currency::Bam);
        assert_eq!(product.stock, 3);
        assert!(product.description.contains("Startni akumulator."));
        assert!(product.description.contains("Tehnika: AGM"));
        assert_eq!(media.attached(product.id).expect("blobs").len(), 1);

        let second = import_records(
            &api,
            &stores,
            &media,
            &shop,
            ProductSource::Csv,
            vec![record("a-1", 120.0)],
        )
        .await;
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 1);

        let updated = stores
            .products
            .product_by_source(shop.id, ProductSource::Csv, "a-1")
            .expect("lookup")
            .expect("product");
        // Margin survives the update; final price tracks the new base price.
        assert_eq!(updated.margin, 10.0);
        let final_price = updated.final_price.expect("final price");
        assert!((final_price - 132.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn branch_availability_sums_when_quantity_is_missing() {
        let api = StubApi::default();
        let stores = Stores::in_memory();
        let media = MemoryMediaStore::default();
        let shop = Shop::new("demo", "user", "pass");

        let mut sparse = record("b-1", 50.0);
        sparse.quantity = None;
        sparse.branch_availability = Some(BTreeMap::from([
            ("Sarajevo".to_string(), 2),
            ("Tuzla".to_string(), 5),
        ]));
        import_records(
            &api,
            &stores,
            &media,
            &shop,
            ProductSource::Scraper,
            vec![sparse],
        )
        .await;
        let product = stores
            .products
            .product_by_source(shop.id, ProductSource::Scraper, "b-1")
            .expect("lookup")
            .expect("product");
        assert_eq!(product.stock, 7);
    }

    #[tokio::test]
    async fn reuse_existing_keeps_attached_blobs() {
        let api = StubApi::default();
        let stores = Stores::in_memory();
        let media = MemoryMediaStore::default();
        let shop = Shop::new("demo", "user", "pass");

        import_records(
            &api,
            &stores,
            &media,
            &shop,
            ProductSource::Csv,
            vec![record("c-1", 80.0)],
        )
        .await;
        let product = stores
            .products
            .product_by_source(shop.id, ProductSource::Csv, "c-1")
            .expect("lookup")
            .expect("product");
        assert_eq!(api.call_count("download:"), 1);

        let mut again = record("c-1", 80.0);
        again.reuse_existing = Some(true);
        import_records(
            &api,
            &stores,
            &media,
            &shop,
            ProductSource::Csv,
            vec![again],
        )
        .await;
        // No re-download on reuse.
        assert_eq!(api.call_count("download:"), 1);
        assert_eq!(media.attached(product.id).expect("blobs").len(), 1);
    }
}
