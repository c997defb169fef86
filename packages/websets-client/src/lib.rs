//! Pure Websets REST API client.
//!
//! A minimal client for the websets search/enrichment/research platform.
//! Supports creating websets, polling their status, streaming items page by
//! page, registering monitors, and running deep-research jobs.
//!
//! # Example
//!
//! ```rust,ignore
//! use websets_client::{WebsetsApi, WebsetsClient};
//!
//! let client = WebsetsClient::new("your-api-key".into());
//!
//! let webset = client.get_webset("ws_abc123").await?;
//! println!("{:?}", webset.status);
//! ```

pub mod error;
pub mod types;

pub use error::{Result, WebsetsError};
pub use types::*;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

const BASE_URL: &str = "https://api.exa.ai";

/// Operations the orchestration layer consumes from the upstream.
///
/// Kept as a trait so workflows can run against a scripted mock in tests.
#[async_trait]
pub trait WebsetsApi: Send + Sync {
    async fn create_webset(&self, params: CreateWebsetParams) -> Result<Webset>;
    async fn get_webset(&self, id: &str) -> Result<Webset>;
    async fn cancel_webset(&self, id: &str) -> Result<Webset>;
    async fn delete_webset(&self, id: &str) -> Result<()>;
    async fn list_items(
        &self,
        webset_id: &str,
        cursor: Option<String>,
        limit: u64,
    ) -> Result<ItemsPage>;
    async fn create_monitor(&self, params: CreateMonitorParams) -> Result<Monitor>;
    async fn create_enrichment(
        &self,
        webset_id: &str,
        params: CreateEnrichmentParams,
    ) -> Result<Enrichment>;
    async fn get_enrichment(&self, webset_id: &str, id: &str) -> Result<Enrichment>;
    async fn create_import(&self, params: CreateImportParams) -> Result<Import>;
    async fn get_import(&self, id: &str) -> Result<Import>;
    async fn list_imports(&self, cursor: Option<String>, limit: u64) -> Result<ImportsPage>;
    async fn list_events(&self, cursor: Option<String>, limit: u64) -> Result<EventsPage>;
    async fn get_event(&self, id: &str) -> Result<Event>;
    async fn create_research(&self, params: CreateResearchParams) -> Result<Research>;
    async fn get_research(&self, id: &str) -> Result<Research>;
}

/// HTTP implementation of [`WebsetsApi`].
pub struct WebsetsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl WebsetsClient {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: BASE_URL.to_string(),
            api_key,
        }
    }

    /// Override the base URL (local stub servers in tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(WebsetsError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(resp.json().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("x-api-key", &self.api_key)
            .send()
            .await?;
        Self::read_json(resp).await
    }

    async fn post<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("x-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;
        Self::read_json(resp).await
    }
}

#[async_trait]
impl WebsetsApi for WebsetsClient {
    async fn create_webset(&self, params: CreateWebsetParams) -> Result<Webset> {
        tracing::info!(query = %params.search.query, "creating webset");
        self.post("/websets/v0/websets", &params).await
    }

    async fn get_webset(&self, id: &str) -> Result<Webset> {
        self.get(&format!("/websets/v0/websets/{id}")).await
    }

    async fn cancel_webset(&self, id: &str) -> Result<Webset> {
        tracing::info!(webset_id = %id, "cancelling webset");
        self.post(&format!("/websets/v0/websets/{id}/cancel"), &serde_json::json!({}))
            .await
    }

    async fn delete_webset(&self, id: &str) -> Result<()> {
        let resp = self
            .client
            .delete(format!("{}/websets/v0/websets/{id}", self.base_url))
            .header("x-api-key", &self.api_key)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(WebsetsError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(())
    }

    async fn list_items(
        &self,
        webset_id: &str,
        cursor: Option<String>,
        limit: u64,
    ) -> Result<ItemsPage> {
        let mut path = format!("/websets/v0/websets/{webset_id}/items?limit={limit}");
        if let Some(cursor) = cursor {
            path.push_str(&format!("&cursor={cursor}"));
        }
        self.get(&path).await
    }

    async fn create_monitor(&self, params: CreateMonitorParams) -> Result<Monitor> {
        tracing::info!(webset_id = %params.webset_id, "creating monitor");
        self.post("/websets/v0/monitors", &params).await
    }

    async fn create_enrichment(
        &self,
        webset_id: &str,
        params: CreateEnrichmentParams,
    ) -> Result<Enrichment> {
        tracing::info!(webset_id = %webset_id, description = %params.description, "creating enrichment");
        self.post(&format!("/websets/v0/websets/{webset_id}/enrichments"), &params)
            .await
    }

    async fn get_enrichment(&self, webset_id: &str, id: &str) -> Result<Enrichment> {
        self.get(&format!("/websets/v0/websets/{webset_id}/enrichments/{id}"))
            .await
    }

    async fn create_import(&self, params: CreateImportParams) -> Result<Import> {
        tracing::info!(title = %params.title, "creating import");
        self.post("/websets/v0/imports", &params).await
    }

    async fn get_import(&self, id: &str) -> Result<Import> {
        self.get(&format!("/websets/v0/imports/{id}")).await
    }

    async fn list_imports(&self, cursor: Option<String>, limit: u64) -> Result<ImportsPage> {
        let mut path = format!("/websets/v0/imports?limit={limit}");
        if let Some(cursor) = cursor {
            path.push_str(&format!("&cursor={cursor}"));
        }
        self.get(&path).await
    }

    async fn list_events(&self, cursor: Option<String>, limit: u64) -> Result<EventsPage> {
        let mut path = format!("/websets/v0/events?limit={limit}");
        if let Some(cursor) = cursor {
            path.push_str(&format!("&cursor={cursor}"));
        }
        self.get(&path).await
    }

    async fn get_event(&self, id: &str) -> Result<Event> {
        self.get(&format!("/websets/v0/events/{id}")).await
    }

    async fn create_research(&self, params: CreateResearchParams) -> Result<Research> {
        tracing::info!("creating research run");
        self.post("/research/v1", &params).await
    }

    async fn get_research(&self, id: &str) -> Result<Research> {
        self.get(&format!("/research/v1/{id}")).await
    }
}
