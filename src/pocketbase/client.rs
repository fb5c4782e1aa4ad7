// src/pocketbase/client.rs
use super::models::{BackendTarget, ForcedHostRoute, ProxySettings};
use super::{FORCED_HOSTS_COLLECTION, SERVERS_COLLECTION, SETTINGS_COLLECTION};
use crate::error::SyncError;
use anyhow::{bail, Context, Result};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// How long a PATCH of our own is remembered so the realtime handler can
/// ignore the echo event it produces.
const SELF_WRITE_WINDOW: Duration = Duration::from_secs(3);

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    items: Vec<T>,
}

/// Client for the PocketBase record API.
///
/// Authenticates once at startup; the token is held in an `ArcSwap` so
/// concurrent tasks read it without locking.
pub struct PocketBaseClient {
    http: reqwest::Client,
    base: Url,
    admin_email: String,
    admin_password: String,
    download_timeout: Duration,
    token: ArcSwap<String>,
    recent_writes: DashMap<String, Instant>,
}

impl PocketBaseClient {
    pub fn new(
        base: Url,
        admin_email: String,
        admin_password: String,
        download_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base,
            admin_email,
            admin_password,
            download_timeout,
            token: ArcSwap::from_pointee(String::new()),
            recent_writes: DashMap::new(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn token(&self) -> Arc<String> {
        self.token.load_full()
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("Invalid endpoint path: {path}"))
    }

    /// Authenticate with admin credentials. Called once at startup; the
    /// daemon exits if this fails.
    pub async fn authenticate(&self) -> Result<()> {
        let url = self.endpoint("api/admins/auth-with-password")?;
        let response = self
            .http
            .post(url)
            .json(&serde_json::json!({
                "identity": self.admin_email,
                "password": self.admin_password,
            }))
            .send()
            .await
            .context("PocketBase auth request failed")?;

        if !response.status().is_success() {
            bail!("PocketBase auth rejected: HTTP {}", response.status());
        }

        let auth: AuthResponse = response
            .json()
            .await
            .context("Failed to decode auth response")?;
        self.token.store(Arc::new(auth.token));
        tracing::info!("Authenticated against PocketBase at {}", self.base);
        Ok(())
    }

    async fn fetch_list<T: serde::de::DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        let url = self.endpoint(&format!("api/collections/{collection}/records"))?;
        let response = self
            .http
            .get(url)
            .bearer_auth(self.token())
            .query(&[("perPage", "500"), ("sort", "created")])
            .send()
            .await
            .map_err(|e| SyncError::SourceUnreachable(format!("fetch {collection}: {e}")))?;

        if !response.status().is_success() {
            return Err(SyncError::SourceUnreachable(format!(
                "fetch {collection}: HTTP {}",
                response.status()
            ))
            .into());
        }

        let list: ListResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to decode {collection} list"))?;
        Ok(list.items)
    }

    /// The singleton settings record. The collection is provisioned with
    /// exactly one record; anything else is a deployment error.
    pub async fn fetch_settings(&self) -> Result<ProxySettings> {
        let mut items: Vec<ProxySettings> = self.fetch_list(SETTINGS_COLLECTION).await?;
        if items.is_empty() {
            bail!("{SETTINGS_COLLECTION} collection is empty");
        }
        Ok(items.remove(0))
    }

    pub async fn fetch_servers(&self) -> Result<Vec<BackendTarget>> {
        self.fetch_list(SERVERS_COLLECTION).await
    }

    pub async fn fetch_forced_hosts(&self) -> Result<Vec<ForcedHostRoute>> {
        self.fetch_list(FORCED_HOSTS_COLLECTION).await
    }

    /// PATCH a record. The record id is remembered briefly so the realtime
    /// handler can skip the change event this write generates.
    pub async fn update_record(
        &self,
        collection: &str,
        id: &str,
        body: &serde_json::Value,
    ) -> Result<()> {
        let url = self.endpoint(&format!("api/collections/{collection}/records/{id}"))?;
        self.recent_writes.insert(id.to_string(), Instant::now());

        self.http
            .patch(url)
            .bearer_auth(self.token())
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to update {collection}/{id}"))?
            .error_for_status()
            .with_context(|| format!("Update of {collection}/{id} rejected"))?;
        Ok(())
    }

    /// True when this record id was PATCHed by us inside the echo window.
    /// For the settings record this alone is not enough to drop an event:
    /// use [`is_settings_echo`](Self::is_settings_echo), which also checks
    /// the content.
    pub fn was_recently_written(&self, id: &str) -> bool {
        self.recent_writes.retain(|_, at| at.elapsed() < SELF_WRITE_WINDOW);
        self.recent_writes.contains_key(id)
    }

    /// True when a settings change event is an echo of one of our own
    /// status writes: the record id was PATCHed recently AND the
    /// admin-editable content matches the cached snapshot. The status
    /// poller writes every tick, so an admin edit landing inside the echo
    /// window must still get through; it differs in content.
    pub fn is_settings_echo(
        &self,
        cached: Option<&ProxySettings>,
        record: &serde_json::Value,
    ) -> bool {
        let id = record["id"].as_str().unwrap_or_default();
        if !self.was_recently_written(id) {
            return false;
        }
        let incoming: ProxySettings = match serde_json::from_value(record.clone()) {
            Ok(settings) => settings,
            Err(_) => return false,
        };
        cached.is_some_and(|snapshot| snapshot.content_eq(&incoming))
    }

    /// Register the realtime subscription list for an SSE connection.
    pub async fn subscribe_realtime(&self, client_id: &str, topics: &[&str]) -> Result<()> {
        let url = self.endpoint("api/realtime")?;
        self.http
            .post(url)
            .bearer_auth(self.token())
            .json(&serde_json::json!({
                "clientId": client_id,
                "subscriptions": topics,
            }))
            .send()
            .await
            .context("Realtime subscription request failed")?
            .error_for_status()
            .context("Realtime subscription rejected")?;
        Ok(())
    }

    /// Download a record's file attachment (bearer-token authenticated).
    pub async fn download_file(
        &self,
        collection: &str,
        record_id: &str,
        filename: &str,
    ) -> Result<Vec<u8>> {
        let url = self.endpoint(&format!("api/files/{collection}/{record_id}/{filename}"))?;
        let response = self
            .http
            .get(url)
            .bearer_auth(self.token())
            .timeout(self.download_timeout)
            .send()
            .await
            .with_context(|| format!("Failed to download {filename}"))?
            .error_for_status()
            .with_context(|| format!("Download of {filename} rejected"))?;

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {filename}"))?;
        Ok(bytes.to_vec())
    }
}
