//! Secondary [`Tier`] backed by a remote key/value config service over HTTPS.
//!
//! Reads go to the edge read endpoint, `GET {read_url}/{id}/{key}`, with an
//! optional bearer token; a 404 means the key is absent. Writes go to the
//! management API, `PATCH {write_url}/v1/edge-config/{id}/items`, as a
//! single-item `upsert` batch and require the token.
//!
//! The subscriber set is stored as a JSON array under [`SUBSCRIBERS_KEY`];
//! each term list as a JSON array under its `terms_key`.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::config::StorageConfig;
use crate::error::TierError;

use super::Tier;

/// Key holding the subscriber set.
pub const SUBSCRIBERS_KEY: &str = "emails";

pub struct EdgeConfigTier {
    client: reqwest::Client,
    id: String,
    token: Option<String>,
    read_url: String,
    write_url: String,
}

impl EdgeConfigTier {
    pub fn new(
        id: &str,
        token: Option<String>,
        read_url: &str,
        write_url: &str,
        timeout: Duration,
    ) -> Result<Self, TierError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            id: id.to_string(),
            token,
            read_url: read_url.trim_end_matches('/').to_string(),
            write_url: write_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build from configuration, or `None` when no config id is set.
    pub fn from_config(config: &StorageConfig) -> Result<Option<Self>, TierError> {
        let Some(id) = config.resolved_edge_config_id() else {
            return Ok(None);
        };
        Self::new(
            &id,
            config.edge_config_token(),
            &config.edge_config_read_url,
            &config.edge_config_write_url,
            Duration::from_secs(config.timeout_secs),
        )
        .map(Some)
    }

    fn item_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.read_url, self.id, key)
    }

    fn items_url(&self) -> String {
        format!("{}/v1/edge-config/{}/items", self.write_url, self.id)
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, TierError> {
        let mut request = self.client.get(self.item_url(key));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        match response.status() {
            StatusCode::OK => {
                let body = response.bytes().await?;
                // A key explicitly set to null reads as absent.
                let value: Option<T> = serde_json::from_slice(&body)?;
                Ok(value)
            }
            StatusCode::NOT_FOUND => {
                debug!(key, "edge config key absent");
                Ok(None)
            }
            other => Err(TierError::Backend(format!(
                "edge config read of '{}' returned {}",
                key, other
            ))),
        }
    }

    async fn upsert<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), TierError> {
        let Some(token) = &self.token else {
            return Err(TierError::Unavailable(
                "VERCEL_TOKEN not set; edge config is read-only".to_string(),
            ));
        };
        let body = json!({
            "items": [
                { "operation": "upsert", "key": key, "value": value }
            ]
        });

        let response = self
            .client
            .patch(self.items_url())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TierError::Backend(format!(
                "edge config write of '{}' returned {}: {}",
                key, status, text
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Tier for EdgeConfigTier {
    fn name(&self) -> &str {
        "edge-config"
    }

    async fn load_subscribers(&self) -> Result<Option<BTreeSet<String>>, TierError> {
        let list: Option<Vec<String>> = self.read(SUBSCRIBERS_KEY).await?;
        Ok(list.map(|emails| emails.into_iter().collect()))
    }

    async fn store_subscribers(&self, subscribers: &BTreeSet<String>) -> Result<(), TierError> {
        let list: Vec<&String> = subscribers.iter().collect();
        self.upsert(SUBSCRIBERS_KEY, &list).await
    }

    async fn load_terms(&self, key: &str) -> Result<Option<Vec<String>>, TierError> {
        self.read(key).await
    }

    async fn store_terms(&self, key: &str, terms: &[String]) -> Result<(), TierError> {
        self.upsert(key, terms).await
    }
}
