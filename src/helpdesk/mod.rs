//! Helpdesk asset-tracking API client
//!
//! The helpdesk is the source of truth for where a device lives (building and
//! room) and what state it is in. Collections come back paged as
//! `{"items": [...], "paging": {"page": n, "pageCount": m}}`.

use crate::config::HelpdeskConfig;
use crate::error::{EduSyncError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Read side of the helpdesk inventory used by the reconcilers
#[async_trait]
pub trait Inventory: Send + Sync {
    async fn list_rooms(&self) -> Result<Vec<Room>>;

    /// Asset tags of every device assigned to the room
    async fn list_devices_by_room(&self, room_id: &str) -> Result<Vec<String>>;

    async fn list_devices_by_status(
        &self,
        statuses: &[String],
        types: &[String],
    ) -> Result<Vec<Asset>>;

    async fn get_device(&self, serial: &str) -> Result<Option<Asset>>;

    async fn list_buildings(&self) -> Result<Vec<Building>>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub room_id: String,
    pub name: String,
    /// Canonical building name
    pub building: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub asset_id: String,
    #[serde(default)]
    pub asset_tag: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub asset_type: Option<String>,
    #[serde(default)]
    pub building: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Building {
    pub building_id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    items: Vec<T>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paging {
    page: u32,
    page_count: u32,
}

pub struct HelpdeskClient {
    client: Client,
    base_url: String,
    api_token: String,
    site_id: Option<String>,
    page_size: u32,
}

impl HelpdeskClient {
    pub fn new(config: &HelpdeskConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(EduSyncError::ConfigError(
                "[helpdesk] base_url is not set".into(),
            ));
        }

        Ok(Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            site_id: config.site_id.clone(),
            page_size: config.page_size.max(1),
        })
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.bearer_auth(&self.api_token);
        match &self.site_id {
            Some(site) => builder.header("SiteId", site),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<Option<T>> {
        let resp = self.request(builder).send().await?;
        let status = resp.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(EduSyncError::HelpdeskError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(Some(resp.json::<T>().await?))
    }

    /// Walk every page of a collection endpoint
    async fn get_paged<T: DeserializeOwned>(
        &self,
        path: &str,
        search: Option<&serde_json::Value>,
    ) -> Result<Vec<T>> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut items = Vec::new();
        let mut page = 0u32;

        loop {
            let query = [("page", page), ("pageSize", self.page_size)];
            let builder = match search {
                Some(body) => self.client.post(&url).query(&query).json(body),
                None => self.client.get(&url).query(&query),
            };

            let Some(batch) = self.send::<Page<T>>(builder).await? else {
                return Err(EduSyncError::not_found("Helpdesk endpoint", path));
            };
            items.extend(batch.items);

            match batch.paging {
                Some(p) if p.page + 1 < p.page_count => page = p.page + 1,
                _ => break,
            }
        }

        tracing::debug!("helpdesk {} returned {} item(s)", path, items.len());
        Ok(items)
    }
}

#[async_trait]
impl Inventory for HelpdeskClient {
    async fn list_rooms(&self) -> Result<Vec<Room>> {
        self.get_paged("rooms", None).await
    }

    async fn list_devices_by_room(&self, room_id: &str) -> Result<Vec<String>> {
        let assets: Vec<Asset> = self
            .get_paged(&format!("rooms/{}/assets", urlencoding::encode(room_id)), None)
            .await?;
        Ok(assets.into_iter().filter_map(|a| a.asset_tag).collect())
    }

    async fn list_devices_by_status(
        &self,
        statuses: &[String],
        types: &[String],
    ) -> Result<Vec<Asset>> {
        let search = json!({
            "statuses": statuses,
            "types": types,
        });
        self.get_paged("assets/search", Some(&search)).await
    }

    async fn get_device(&self, serial: &str) -> Result<Option<Asset>> {
        let url = format!(
            "{}/assets/serial/{}",
            self.base_url,
            urlencoding::encode(serial)
        );
        self.send(self.client.get(url)).await
    }

    async fn list_buildings(&self) -> Result<Vec<Building>> {
        self.get_paged("buildings", None).await
    }
}
