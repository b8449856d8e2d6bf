use crate::models::Shop;
use crate::olx::config::{API_ROOT, TOKEN_TTL_DAYS};
use crate::olx::error::ApiError;
use crate::payload::ListingPayload;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Method, multipart};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use urlencoding::encode;
use uuid::Uuid;

/// The seam between the engines and HTTP. Implemented by [`OlxClient`] for
/// production and by stubs in tests.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    async fn fetch_categories(&self, shop: &Shop) -> Result<Value, ApiError>;
    async fn fetch_category(&self, shop: &Shop, external_id: i64) -> Result<Value, ApiError>;
    async fn fetch_category_attributes(
        &self,
        shop: &Shop,
        external_id: i64,
    ) -> Result<Value, ApiError>;
    async fn fetch_locations(&self, shop: &Shop) -> Result<Value, ApiError>;
    async fn fetch_cities(&self, shop: &Shop) -> Result<Value, ApiError>;
    async fn fetch_listing(&self, shop: &Shop, external_id: &str) -> Result<Value, ApiError>;
    async fn fetch_user_listings(&self, shop: &Shop, page: usize) -> Result<Value, ApiError>;
    async fn create_listing(
        &self,
        shop: &Shop,
        payload: &ListingPayload,
    ) -> Result<Value, ApiError>;
    async fn update_listing(
        &self,
        shop: &Shop,
        external_id: &str,
        payload: &ListingPayload,
    ) -> Result<Value, ApiError>;
    async fn delete_listing(&self, shop: &Shop, external_id: &str) -> Result<Value, ApiError>;
    async fn publish_listing(&self, shop: &Shop, external_id: &str) -> Result<Value, ApiError>;
    async fn unpublish_listing(&self, shop: &Shop, external_id: &str) -> Result<Value, ApiError>;
    /// Uploads source images to the listing. Returns the successfully
    /// uploaded subset; a single bad image never aborts the batch.
    async fn upload_images(
        &self,
        shop: &Shop,
        external_id: &str,
        urls: &[String],
    ) -> Result<Vec<String>, ApiError>;
    async fn download_image(&self, url: &str) -> Result<Vec<u8>, ApiError>;
}

struct TokenSession {
    token: String,
    expires_at: DateTime<Utc>,
    generation: u64,
}

pub struct OlxClient {
    http: Client,
    sessions: Mutex<HashMap<Uuid, TokenSession>>,
}

impl Default for OlxClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OlxClient {
    pub fn new() -> Self {
        Self {
            http: build_client(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Re-authenticates only when no token is held or the held one expired.
    /// Expiry is re-checked under the lock so two concurrent callers cannot
    /// double-refresh; the generation counter makes each refresh observable.
    async fn ensure_authenticated(&self, shop: &Shop) -> Result<String, ApiError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&shop.id)
            && session.expires_at > Utc::now()
        {
            return Ok(session.token.clone());
        }
        let token = self.request_token(shop).await?;
        let generation = sessions
            .get(&shop.id)
            .map(|session| session.generation + 1)
            .unwrap_or(0);
        debug!(target = "olx.client", shop = %shop.name, generation, "token_refreshed");
        sessions.insert(
            shop.id,
            TokenSession {
                token: token.clone(),
                expires_at: Utc::now() + Duration::days(*TOKEN_TTL_DAYS),
                generation,
            },
        );
        Ok(token)
    }

    async fn request_token(&self, shop: &Shop) -> Result<String, ApiError> {
        let url = format!("{}/auth/login", *API_ROOT);
        let response = self
            .http
            .post(url)
            .json(&json!({
                "username": shop.olx_username,
                "password": shop.olx_password,
            }))
            .send()
            .await
            .map_err(|err| ApiError::Authentication(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| ApiError::Authentication(err.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(ApiError::Authentication(super::error::extract_message(
                &body,
            )));
        }
        let parsed: Value = serde_json::from_str(&body)
            .map_err(|err| ApiError::Authentication(format!("invalid token response: {err}")))?;
        parsed
            .get("token")
            .or_else(|| parsed.get("access_token"))
            .or_else(|| parsed.pointer("/data/token"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::Authentication("token missing from login response".into()))
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        shop: &Shop,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let token = self.ensure_authenticated(shop).await?;
        let url = format!("{}{}", *API_ROOT, path);
        let mut builder = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| ApiError::Upstream(err.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|err| ApiError::Upstream(err.to_string()))?;
        classify(status, &text)
    }

    async fn get(&self, path: &str, shop: &Shop) -> Result<Value, ApiError> {
        self.request(Method::GET, path, shop, None).await
    }

    async fn post(&self, path: &str, shop: &Shop, body: Option<&Value>) -> Result<Value, ApiError> {
        self.request(Method::POST, path, shop, body).await
    }

    async fn put(&self, path: &str, shop: &Shop, body: &Value) -> Result<Value, ApiError> {
        self.request(Method::PUT, path, shop, Some(body)).await
    }

    async fn delete(&self, path: &str, shop: &Shop) -> Result<Value, ApiError> {
        self.request(Method::DELETE, path, shop, None).await
    }

    async fn upload_single(
        &self,
        shop: &Shop,
        external_id: &str,
        url: &str,
    ) -> Result<(), ApiError> {
        let bytes = self.download_image(url).await?;
        let filename = filename_from_url(url);
        let part = multipart::Part::bytes(bytes).file_name(filename);
        let form = multipart::Form::new().part("images[]", part);
        let token = self.ensure_authenticated(shop).await?;
        let endpoint = format!(
            "{}/listings/{}/image-upload",
            *API_ROOT,
            encode(external_id)
        );
        let response = self
            .http
            .post(endpoint)
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(|err| ApiError::Upstream(err.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|err| ApiError::Upstream(err.to_string()))?;
        classify(status, &text).map(|_| ())
    }
}

fn classify(status: u16, body: &str) -> Result<Value, ApiError> {
    if status == 204 {
        return Ok(json!({}));
    }
    if (200..300).contains(&status) {
        return serde_json::from_str(body)
            .map_err(|err| ApiError::Upstream(format!("invalid response body: {err}")));
    }
    Err(ApiError::from_response(status, body))
}

pub(crate) fn filename_from_url(url: &str) -> String {
    url.split('/')
        .next_back()
        .map(|segment| segment.split('?').next().unwrap_or(segment))
        .filter(|segment| !segment.is_empty())
        .unwrap_or("image.jpg")
        .to_string()
}

const VARIANT_RANK: &[(&str, u8)] = &[
    ("original", 5),
    ("big", 4),
    ("velika", 4),
    ("large", 4),
    ("medium", 2),
    ("srednja", 2),
    ("small", 1),
    ("mala", 1),
    ("thumbnail", 0),
    ("thumb", 0),
];

fn variant_rank(url: &str) -> (String, u8) {
    let lowered = url.to_lowercase();
    for (token, rank) in VARIANT_RANK {
        if lowered.contains(token) {
            return (lowered.replacen(token, "", 1), *rank);
        }
    }
    (lowered, 3)
}

/// Collapses size variants of the same logical picture to the highest
/// resolution one, preserving first-seen order across pictures.
pub fn prefer_variants(urls: &[String]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut best: HashMap<String, (u8, String)> = HashMap::new();
    for url in urls {
        let (key, rank) = variant_rank(url);
        match best.get(&key) {
            Some((held, _)) if *held >= rank => {}
            _ => {
                if !order.contains(&key) {
                    order.push(key.clone());
                }
                best.insert(key, (rank, url.clone()));
            }
        }
    }
    order
        .into_iter()
        .filter_map(|key| best.remove(&key).map(|(_, url)| url))
        .collect()
}

#[async_trait]
impl MarketplaceApi for OlxClient {
    async fn fetch_categories(&self, shop: &Shop) -> Result<Value, ApiError> {
        self.get("/categories", shop).await
    }

    async fn fetch_category(&self, shop: &Shop, external_id: i64) -> Result<Value, ApiError> {
        self.get(&format!("/categories/{external_id}"), shop).await
    }

    async fn fetch_category_attributes(
        &self,
        shop: &Shop,
        external_id: i64,
    ) -> Result<Value, ApiError> {
        self.get(&format!("/categories/{external_id}/attributes"), shop)
            .await
    }

    async fn fetch_locations(&self, shop: &Shop) -> Result<Value, ApiError> {
        self.get("/locations", shop).await
    }

    async fn fetch_cities(&self, shop: &Shop) -> Result<Value, ApiError> {
        self.get("/cities", shop).await
    }

    async fn fetch_listing(&self, shop: &Shop, external_id: &str) -> Result<Value, ApiError> {
        self.get(&format!("/listings/{}", encode(external_id)), shop)
            .await
    }

    async fn fetch_user_listings(&self, shop: &Shop, page: usize) -> Result<Value, ApiError> {
        let path = format!(
            "/users/{}/listings?page={page}&per_page={}",
            encode(&shop.olx_username),
            *super::config::PAGE_SIZE
        );
        self.get(&path, shop).await
    }

    async fn create_listing(
        &self,
        shop: &Shop,
        payload: &ListingPayload,
    ) -> Result<Value, ApiError> {
        let body = serde_json::to_value(payload)
            .map_err(|err| ApiError::Upstream(format!("payload serialization: {err}")))?;
        self.post("/listings", shop, Some(&body)).await
    }

    async fn update_listing(
        &self,
        shop: &Shop,
        external_id: &str,
        payload: &ListingPayload,
    ) -> Result<Value, ApiError> {
        let body = serde_json::to_value(payload)
            .map_err(|err| ApiError::Upstream(format!("payload serialization: {err}")))?;
        self.put(&format!("/listings/{}", encode(external_id)), shop, &body)
            .await
    }

    async fn delete_listing(&self, shop: &Shop, external_id: &str) -> Result<Value, ApiError> {
        self.delete(&format!("/listings/{}", encode(external_id)), shop)
            .await
    }

    async fn publish_listing(&self, shop: &Shop, external_id: &str) -> Result<Value, ApiError> {
        self.post(
            &format!("/listings/{}/publish", encode(external_id)),
            shop,
            None,
        )
        .await
    }

    async fn unpublish_listing(&self, shop: &Shop, external_id: &str) -> Result<Value, ApiError> {
        self.post(
            &format!("/listings/{}/unpublish", encode(external_id)),
            shop,
            None,
        )
        .await
    }

    async fn upload_images(
        &self,
        shop: &Shop,
        external_id: &str,
        urls: &[String],
    ) -> Result<Vec<String>, ApiError> {
        let mut uploaded = Vec::new();
        for url in prefer_variants(urls) {
            match self.upload_single(shop, external_id, &url).await {
                Ok(()) => uploaded.push(url),
                Err(err) => {
                    warn!(target = "olx.client", listing = %external_id, image = %url, error = %err, "image_upload_failed");
                }
            }
        }
        Ok(uploaded)
    }

    async fn download_image(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| ApiError::Upstream(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ApiError::Upstream(format!(
                "image download HTTP {}",
                response.status()
            )));
        }
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|err| ApiError::Upstream(err.to_string()))
    }
}

fn build_client() -> Client {
    let timeout = std::env::var("HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(15);
    let connect = std::env::var("HTTP_CONNECT_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(5);
    Client::builder()
        .timeout(StdDuration::from_secs(timeout))
        .connect_timeout(StdDuration::from_secs(connect))
        .build()
        .unwrap_or_else(|_| Client::new())
}
