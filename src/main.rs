//! Maintenance binary: runs catalog syncs and remote pulls against the shop
//! configured through the environment and prints the resulting report.

use olx_bridge::catalog;
use olx_bridge::media::MemoryMediaStore;
use olx_bridge::models::Shop;
use olx_bridge::olx::OlxClient;
use olx_bridge::store::Stores;
use olx_bridge::sync::{RemoteSync, SyncOptions};
use tracing::error;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();
    if let Err(err) = run().await {
        error!(target = "olx.cli", "command failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{USAGE}");
        return Ok(());
    };

    let shop = shop_from_env()?;
    let api = OlxClient::new();
    let stores = Stores::in_memory();
    let media = MemoryMediaStore::default();

    let report = match command {
        "categories" => catalog::sync_all_categories(&api, stores.categories.as_ref(), &shop).await?,
        "attributes" => {
            let external_id: i64 = args
                .get(1)
                .ok_or("usage: attributes <category-external-id>")?
                .parse()?;
            catalog::sync_all_categories(&api, stores.categories.as_ref(), &shop).await?;
            catalog::sync_category_attributes(&api, stores.categories.as_ref(), &shop, external_id)
                .await?
        }
        "locations" => catalog::sync_locations(&api, stores.locations.as_ref(), &shop).await?,
        "cleanup-categories" => {
            catalog::sync_all_categories(&api, stores.categories.as_ref(), &shop).await?;
            catalog::cleanup_removed(&api, stores.categories.as_ref(), &shop).await?
        }
        "pull" => {
            let mut options = SyncOptions::default();
            if let Some(limit) = args.get(1) {
                options.limit = limit.parse()?;
            }
            catalog::sync_all_categories(&api, stores.categories.as_ref(), &shop).await?;
            catalog::sync_locations(&api, stores.locations.as_ref(), &shop).await?;
            RemoteSync::new(&api, &stores, &media)
                .sync_products(&shop, &options)
                .await?
        }
        other => {
            eprintln!("unknown command: {other}\n{USAGE}");
            return Ok(());
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

const USAGE: &str = "usage: olx-bridge <command>
  categories             mirror the remote category tree
  attributes <ext-id>    mirror one category's attribute schema
  locations              mirror the remote city list
  pull [limit]           pull the shop's own listings into local products
  cleanup-categories     delete local categories gone from the remote tree";

fn shop_from_env() -> Result<Shop, Box<dyn std::error::Error + Send + Sync>> {
    let username = std::env::var("OLX_USERNAME").map_err(|_| "OLX_USERNAME is not set")?;
    let password = std::env::var("OLX_PASSWORD").map_err(|_| "OLX_PASSWORD is not set")?;
    let name = std::env::var("SHOP_NAME").unwrap_or_else(|_| username.clone());
    let mut shop = Shop::new(&name, &username, &password);
    if let Ok(margin) = std::env::var("SHOP_DEFAULT_MARGIN")
        && let Ok(parsed) = margin.parse::<f64>()
    {
        shop.default_margin = parsed;
    }
    Ok(shop)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
