use crate::config::{AuthType, ConfigManager, TenantConfig, TokenCache};
use crate::error::{EduSyncError, Result};
use oauth2::{
    AuthUrl, ClientId, ClientSecret, DeviceAuthorizationUrl, EmptyExtraDeviceAuthorizationFields,
    Scope, TokenResponse, TokenUrl, basic::BasicClient, reqwest::async_http_client,
};
use std::time::Duration;

const MICROSOFT_AUTHORITY: &str = "https://login.microsoftonline.com";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Application permissions the app registration needs
pub const REQUIRED_SCOPES: &[&str] = &[
    "Device.ReadWrite.All",
    "GroupMember.ReadWrite.All",
    "DeviceManagementManagedDevices.ReadWrite.All",
    "DeviceManagementServiceConfig.ReadWrite.All",
    "DeviceManagementApps.Read.All",
];

pub struct GraphAuth {
    config_manager: ConfigManager,
}

impl GraphAuth {
    pub fn new(config_manager: ConfigManager) -> Self {
        Self { config_manager }
    }

    fn endpoint(tenant_id: &str, path: &str) -> String {
        format!("{}/{}/oauth2/v2.0/{}", MICROSOFT_AUTHORITY, tenant_id, path)
    }

    fn expiry(expires_in: Option<Duration>) -> Result<chrono::DateTime<chrono::Utc>> {
        let lifetime = chrono::Duration::from_std(expires_in.unwrap_or(Duration::from_secs(3600)))
            .map_err(|e| EduSyncError::AuthError(format!("Invalid token lifetime: {}", e)))?;
        Ok(chrono::Utc::now() + lifetime)
    }

    /// Authenticate using device code flow (interactive)
    pub async fn login_device_code(&self, tenant: &TenantConfig) -> Result<TokenCache> {
        let client_id = ClientId::new(tenant.client_id.clone());

        let auth_url = AuthUrl::new(Self::endpoint(&tenant.tenant_id, "authorize"))
            .map_err(|e| EduSyncError::AuthError(format!("Invalid auth URL: {}", e)))?;
        let token_url = TokenUrl::new(Self::endpoint(&tenant.tenant_id, "token"))
            .map_err(|e| EduSyncError::AuthError(format!("Invalid token URL: {}", e)))?;
        let device_auth_url =
            DeviceAuthorizationUrl::new(Self::endpoint(&tenant.tenant_id, "devicecode"))
                .map_err(|e| EduSyncError::AuthError(format!("Invalid device auth URL: {}", e)))?;

        let client = BasicClient::new(client_id, None, auth_url, Some(token_url))
            .set_device_authorization_url(device_auth_url);

        let details: oauth2::DeviceAuthorizationResponse<EmptyExtraDeviceAuthorizationFields> =
            client
                .exchange_device_code()
                .map_err(|e| {
                    EduSyncError::AuthError(format!("Device code exchange failed: {}", e))
                })?
                .add_scope(Scope::new(GRAPH_SCOPE.to_string()))
                .request_async(async_http_client)
                .await
                .map_err(|e| {
                    EduSyncError::AuthError(format!("Device authorization request failed: {}", e))
                })?;

        println!("\nPlease visit: {}", details.verification_uri().as_str());
        println!("Enter code: {}\n", details.user_code().secret());

        let token = client
            .exchange_device_access_token(&details)
            .request_async(async_http_client, tokio::time::sleep, None)
            .await
            .map_err(|e| EduSyncError::AuthError(format!("Token exchange failed: {}", e)))?;

        let token_cache = TokenCache {
            access_token: token.access_token().secret().clone(),
            refresh_token: token.refresh_token().map(|t| t.secret().clone()),
            expires_at: Self::expiry(token.expires_in())?,
            tenant_id: tenant.tenant_id.clone(),
        };

        self.config_manager
            .save_token(&tenant.tenant_id, &token_cache)?;
        tracing::info!("Device code authentication succeeded for tenant {}", tenant.tenant_id);

        Ok(token_cache)
    }

    /// Authenticate using client credentials flow (non-interactive)
    pub async fn login_client_credentials(&self, tenant: &TenantConfig) -> Result<TokenCache> {
        let client_secret = tenant.client_secret.as_ref().ok_or_else(|| {
            EduSyncError::AuthError("Client secret required for client credentials flow".into())
        })?;

        let client_id = ClientId::new(tenant.client_id.clone());
        let client_secret = ClientSecret::new(client_secret.clone());

        let auth_url = AuthUrl::new(Self::endpoint(&tenant.tenant_id, "authorize"))
            .map_err(|e| EduSyncError::AuthError(format!("Invalid auth URL: {}", e)))?;
        let token_url = TokenUrl::new(Self::endpoint(&tenant.tenant_id, "token"))
            .map_err(|e| EduSyncError::AuthError(format!("Invalid token URL: {}", e)))?;

        let client = BasicClient::new(client_id, Some(client_secret), auth_url, Some(token_url));

        let token = client
            .exchange_client_credentials()
            .add_scope(Scope::new(GRAPH_SCOPE.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| {
                EduSyncError::AuthError(format!("Client credentials exchange failed: {}", e))
            })?;

        let token_cache = TokenCache {
            access_token: token.access_token().secret().clone(),
            refresh_token: None,
            expires_at: Self::expiry(token.expires_in())?,
            tenant_id: tenant.tenant_id.clone(),
        };

        self.config_manager
            .save_token(&tenant.tenant_id, &token_cache)?;
        tracing::info!(
            "Client credentials authentication succeeded for tenant {}",
            tenant.tenant_id
        );

        Ok(token_cache)
    }

    /// Get a valid access token: cached if still valid, otherwise a fresh
    /// client-credentials token. Device-code tenants must run `edusync login`.
    pub async fn get_access_token(&self, tenant: &TenantConfig) -> Result<String> {
        match self.config_manager.load_token(&tenant.tenant_id) {
            Ok(token) => Ok(token.access_token),
            Err(EduSyncError::AuthError(_)) | Err(EduSyncError::TokenNotFound) => {
                match tenant.auth_type {
                    AuthType::ClientCredentials => {
                        Ok(self.login_client_credentials(tenant).await?.access_token)
                    }
                    AuthType::DeviceCode => Err(EduSyncError::TokenNotFound),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Logout (delete token cache)
    pub fn logout(&self, tenant: &TenantConfig) -> Result<()> {
        self.config_manager.delete_token(&tenant.tenant_id)
    }
}
