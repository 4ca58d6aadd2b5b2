pub mod auth;
pub mod groups;
pub mod intune;

use crate::config::ConfigManager;
use crate::error::{EduSyncError, Result};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
pub const GRAPH_API_BETA: &str = "https://graph.microsoft.com/beta";

/// Default retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 30000;
const JITTER_FACTOR: f64 = 0.3; // +/- 30% jitter

/// Calculate backoff with jitter for exponential backoff
fn calculate_backoff_with_jitter(attempt: u32) -> Duration {
    let base_backoff = INITIAL_BACKOFF_MS * 2u64.pow(attempt);
    let capped_backoff = base_backoff.min(MAX_BACKOFF_MS);

    let jitter_range = (capped_backoff as f64 * JITTER_FACTOR) as u64;
    let jitter = if jitter_range > 0 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        std::time::SystemTime::now().hash(&mut hasher);
        (hasher.finish() % (jitter_range * 2)) as i64 - jitter_range as i64
    } else {
        0
    };

    let final_backoff = (capped_backoff as i64 + jitter).max(100) as u64;
    Duration::from_millis(final_backoff)
}

/// Graph API client with retry support
#[derive(Clone)]
pub struct GraphClient {
    client: Client,
    access_token: String,
    base_url: String,
    beta_url: String,
}

impl GraphClient {
    pub fn new(access_token: String) -> Self {
        Self::with_base_urls(access_token, GRAPH_API_BASE, GRAPH_API_BETA)
    }

    /// Point the client somewhere other than graph.microsoft.com (mock servers, sovereign clouds)
    pub fn with_base_urls(access_token: String, base_url: &str, beta_url: &str) -> Self {
        Self {
            client: Client::new(),
            access_token,
            base_url: base_url.trim_end_matches('/').to_string(),
            beta_url: beta_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a GraphClient from the run configuration, acquiring a token if needed
    pub async fn from_config(
        manager: &ConfigManager,
        tenant: &crate::config::TenantConfig,
    ) -> Result<Self> {
        let graph_auth = auth::GraphAuth::new(manager.clone());
        let access_token = graph_auth.get_access_token(tenant).await?;

        Ok(Self::new(access_token))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str, beta: bool) -> String {
        let base = if beta { &self.beta_url } else { &self.base_url };
        format!("{}/{}", base, endpoint.trim_start_matches('/'))
    }

    /// POST where Graph answers 204 No Content (e.g. `members/$ref`)
    pub async fn post_no_content<T: Serialize>(&self, endpoint: &str, body: &T) -> Result<()> {
        let body = serde_json::to_value(body)?;
        self.send_with_retry(Method::POST, &self.url(endpoint, false), Some(&body))
            .await?;
        Ok(())
    }

    /// Make a DELETE request to Graph API with retry
    pub async fn delete(&self, endpoint: &str) -> Result<()> {
        self.send_with_retry(Method::DELETE, &self.url(endpoint, false), None)
            .await?;
        Ok(())
    }

    /// Make a DELETE request to Graph API (beta endpoint) with retry
    pub async fn delete_beta(&self, endpoint: &str) -> Result<()> {
        self.send_with_retry(Method::DELETE, &self.url(endpoint, true), None)
            .await?;
        Ok(())
    }

    /// Send a request, retrying 429 (honouring Retry-After), 5xx and connection errors.
    /// Returns the response only when the status is a success.
    async fn send_with_retry(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            let mut request = self
                .client
                .request(method.clone(), url)
                .bearer_auth(&self.access_token);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RETRIES - 1
                    {
                        let retry_after = resp
                            .headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(INITIAL_BACKOFF_MS / 1000);

                        tracing::warn!(
                            "Rate limited (429) on {} {}. Retrying in {}s (attempt {}/{})",
                            method,
                            url,
                            retry_after,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(Duration::from_secs(retry_after)).await;
                        continue;
                    }

                    if status.is_server_error() && attempt < MAX_RETRIES - 1 {
                        let wait_time = calculate_backoff_with_jitter(attempt);
                        tracing::warn!(
                            "Server error ({}) on {} {}. Retrying in {:?} (attempt {}/{})",
                            status,
                            method,
                            url,
                            wait_time,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(wait_time).await;
                        continue;
                    }

                    if !status.is_success() {
                        let error_text = resp.text().await.unwrap_or_default();
                        return Err(EduSyncError::GraphApiError {
                            status: status.as_u16(),
                            message: crate::error::enhance_graph_error(&error_text),
                        });
                    }

                    tracing::debug!("{} {} -> {}", method, url, status);
                    return Ok(resp);
                }
                Err(e) => {
                    if attempt < MAX_RETRIES - 1 {
                        let wait_time = calculate_backoff_with_jitter(attempt);
                        tracing::warn!(
                            "Connection error: {}. Retrying in {:?} (attempt {}/{})",
                            e,
                            wait_time,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(wait_time).await;
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }

        Err(last_error.map(|e| e.into()).unwrap_or_else(|| {
            EduSyncError::GraphApiError {
                status: 0,
                message: format!("{} {} failed after {} retries", method, url, MAX_RETRIES),
            }
        }))
    }
}

// ============================================================================
// Pagination Helpers
// ============================================================================

/// Generic paginated response from Graph API
///
/// Use this for standard OData paginated responses with `value` array and `@odata.nextLink`
#[derive(Debug, Deserialize)]
pub struct PaginatedResponse<T> {
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

impl GraphClient {
    /// Fetch all pages of a paginated Graph API endpoint
    ///
    /// Follows `@odata.nextLink` until all pages are retrieved.
    ///
    /// ```ignore
    /// let members: Vec<DirectoryDevice> = client.get_all_pages("groups/{id}/members").await?;
    /// ```
    pub async fn get_all_pages<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Vec<T>> {
        self.collect_pages(self.url(endpoint, false)).await
    }

    /// Fetch all pages from a beta endpoint
    pub async fn get_all_pages_beta<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Vec<T>> {
        self.collect_pages(self.url(endpoint, true)).await
    }

    async fn collect_pages<T: DeserializeOwned>(&self, first_url: String) -> Result<Vec<T>> {
        let mut all_items: Vec<T> = Vec::new();
        let mut current_url = first_url;

        loop {
            let resp = self
                .send_with_retry(Method::GET, &current_url, None)
                .await?;
            let page: PaginatedResponse<T> = resp.json().await?;
            all_items.extend(page.value);

            match page.next_link {
                Some(next) => current_url = next,
                None => break,
            }
        }

        Ok(all_items)
    }
}

/// Quote a value for an OData `$filter` literal and URL-encode it
pub fn odata_literal(value: &str) -> String {
    urlencoding::encode(&value.replace('\'', "''")).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_capped_and_positive() {
        for attempt in 0..10 {
            let wait = calculate_backoff_with_jitter(attempt);
            assert!(wait >= Duration::from_millis(100));
            assert!(wait <= Duration::from_millis((MAX_BACKOFF_MS as f64 * 1.3) as u64));
        }
    }

    #[test]
    fn test_odata_literal_escapes_quotes_and_spaces() {
        assert_eq!(odata_literal("O'Brien Lab"), "O%27%27Brien%20Lab");
        assert_eq!(odata_literal("D-1001"), "D-1001");
    }

    #[test]
    fn test_url_joining() {
        let client = GraphClient::with_base_urls(
            "t".into(),
            "http://localhost/v1.0/",
            "http://localhost/beta",
        );
        assert_eq!(
            client.url("/groups", false),
            "http://localhost/v1.0/groups"
        );
        assert_eq!(
            client.url("deviceManagement", true),
            "http://localhost/beta/deviceManagement"
        );
    }
}
