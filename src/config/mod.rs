use crate::error::{EduSyncError, Result};
use crate::reconcile::rooms::BuildingMap;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure, read once per run and passed by reference.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    pub tenant: TenantConfig,

    #[serde(default)]
    pub helpdesk: HelpdeskConfig,

    /// Building code -> canonical building name as the helpdesk spells it
    #[serde(default)]
    pub buildings: BTreeMap<String, String>,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub computers: ComputersConfig,
}

/// Entra ID tenant and app registration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TenantConfig {
    pub tenant_id: String,
    pub client_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(default)]
    pub auth_type: AuthType,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    ClientCredentials,
    DeviceCode,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HelpdeskConfig {
    pub base_url: String,

    #[serde(default)]
    pub api_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,

    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for HelpdeskConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_token: String::new(),
            site_id: None,
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> u32 {
    500
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_missing_log")]
    pub missing_log: PathBuf,

    #[serde(default = "default_audit_log")]
    pub audit_log: PathBuf,

    #[serde(default)]
    pub labs: Vec<LabTarget>,

    #[serde(default)]
    pub buildings: Vec<BuildingTarget>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unassigned: Option<StatusTarget>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<CompletedTarget>,

    /// Only devices whose OS version starts with this lose their primary user
    #[serde(default = "default_os_prefix")]
    pub primary_user_os_prefix: String,

    /// Helpdesk statuses that mark a device as retired
    #[serde(default = "default_retired_statuses")]
    pub retired_statuses: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            missing_log: default_missing_log(),
            audit_log: default_audit_log(),
            labs: Vec::new(),
            buildings: Vec::new(),
            unassigned: None,
            completed: None,
            primary_user_os_prefix: default_os_prefix(),
            retired_statuses: default_retired_statuses(),
        }
    }
}

fn default_missing_log() -> PathBuf {
    PathBuf::from("missing-devices.log")
}

fn default_audit_log() -> PathBuf {
    PathBuf::from("edusync-audit.jsonl")
}

fn default_os_prefix() -> String {
    "10.0.".to_string()
}

fn default_retired_statuses() -> Vec<String> {
    vec!["Retired".to_string(), "Disposed".to_string()]
}

/// A lab room whose devices make up one group
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LabTarget {
    pub group: String,
    pub building: String,
    pub room: String,
}

/// Every device of a building (filtered by status and type) makes up one group
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BuildingTarget {
    pub group: String,
    pub building: String,

    #[serde(default)]
    pub statuses: Vec<String>,

    #[serde(default)]
    pub types: Vec<String>,
}

/// Devices in the given helpdesk statuses make up one group
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StatusTarget {
    pub group: String,
    pub statuses: Vec<String>,

    #[serde(default)]
    pub types: Vec<String>,
}

/// Autopilot-enrolled Windows devices make up one group
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CompletedTarget {
    pub group: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ComputersConfig {
    /// OU searched for computer objects
    #[serde(default)]
    pub search_base: String,

    /// Names matching this pattern follow the naming convention and are left alone
    #[serde(default = "default_name_pattern")]
    pub name_pattern: String,

    #[serde(default = "default_grace_days")]
    pub stale_grace_days: i64,

    #[serde(default = "default_probe_port")]
    pub probe_port: u16,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

impl Default for ComputersConfig {
    fn default() -> Self {
        Self {
            search_base: String::new(),
            name_pattern: default_name_pattern(),
            stale_grace_days: default_grace_days(),
            probe_port: default_probe_port(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

fn default_name_pattern() -> String {
    r"^[A-Z]{2,4}-\d{4,6}$".to_string()
}

fn default_grace_days() -> i64 {
    1
}

fn default_probe_port() -> u16 {
    445
}

fn default_probe_timeout() -> u64 {
    3
}

/// Starter building table written by `config init`
pub const DEFAULT_BUILDINGS: &[(&str, &str)] = &[
    ("AD", "Administration Center"),
    ("AE", "Adult Education Center"),
    ("BE", "Brookside Elementary"),
    ("CE", "Cedar Elementary"),
    ("CHS", "Central High School"),
    ("CMS", "Central Middle School"),
    ("EC", "Early Childhood Center"),
    ("FE", "Forest Elementary"),
    ("HE", "Highland Elementary"),
    ("LE", "Lakeview Elementary"),
    ("MA", "Maintenance Facility"),
    ("ME", "Meadow Elementary"),
    ("NHS", "North High School"),
    ("NMS", "North Middle School"),
    ("PE", "Pinecrest Elementary"),
    ("RE", "Riverside Elementary"),
    ("SHS", "South High School"),
    ("SMS", "South Middle School"),
    ("TC", "Technology Center"),
    ("TR", "Transportation Center"),
];

impl Config {
    /// Starter configuration with placeholders and the default building table
    pub fn starter() -> Self {
        Self {
            tenant: TenantConfig {
                tenant_id: "00000000-0000-0000-0000-000000000000".into(),
                client_id: "00000000-0000-0000-0000-000000000000".into(),
                client_secret: Some("change-me".into()),
                auth_type: AuthType::ClientCredentials,
            },
            helpdesk: HelpdeskConfig {
                base_url: "https://helpdesk.example.org/api/v1".into(),
                api_token: "change-me".into(),
                ..HelpdeskConfig::default()
            },
            buildings: DEFAULT_BUILDINGS
                .iter()
                .map(|(code, name)| (code.to_string(), name.to_string()))
                .collect(),
            sync: SyncConfig {
                labs: vec![LabTarget {
                    group: "Lab-CHS-101".into(),
                    building: "CHS".into(),
                    room: "101".into(),
                }],
                ..SyncConfig::default()
            },
            computers: ComputersConfig::default(),
        }
    }

    /// Names of every group a sync run touches
    pub fn target_groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = Vec::new();
        groups.extend(self.sync.labs.iter().map(|l| l.group.as_str()));
        groups.extend(self.sync.buildings.iter().map(|b| b.group.as_str()));
        if let Some(unassigned) = &self.sync.unassigned {
            groups.push(&unassigned.group);
        }
        if let Some(completed) = &self.sync.completed {
            groups.push(&completed.group);
        }
        groups
    }

    /// Check the configuration for mistakes that would only surface mid-run
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut problems = Vec::new();

        if self.tenant.tenant_id.trim().is_empty() || self.tenant.client_id.trim().is_empty() {
            problems.push("[tenant] needs tenant_id and client_id".to_string());
        }
        if self.tenant.auth_type == AuthType::ClientCredentials
            && self.tenant.client_secret.is_none()
        {
            problems.push("[tenant] client credentials auth needs client_secret".to_string());
        }

        let mut seen = HashSet::new();
        for group in self.target_groups() {
            if !seen.insert(group) {
                problems.push(format!("group '{}' is targeted more than once", group));
            }
        }

        let mut codes: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for code in self.buildings.keys() {
            codes
                .entry(code.trim().to_uppercase())
                .or_default()
                .push(code);
        }
        for (normalized, spellings) in &codes {
            if spellings.len() > 1 {
                problems.push(format!(
                    "[buildings] codes {} all mean '{}'; only one is kept",
                    spellings
                        .iter()
                        .map(|c| format!("'{}'", c))
                        .collect::<Vec<_>>()
                        .join(", "),
                    normalized
                ));
            }
        }

        let buildings = BuildingMap::new(&self.buildings);
        for lab in &self.sync.labs {
            if buildings.resolve(&lab.building).is_none() {
                problems.push(format!(
                    "lab '{}' uses unknown building code '{}'",
                    lab.group, lab.building
                ));
            }
        }
        for cohort in &self.sync.buildings {
            if buildings.resolve(&cohort.building).is_none() {
                problems.push(format!(
                    "building group '{}' uses unknown building code '{}'",
                    cohort.group, cohort.building
                ));
            }
        }

        if let Err(e) = regex::Regex::new(&self.computers.name_pattern) {
            problems.push(format!("[computers] name_pattern is invalid: {}", e));
        }

        Ok(problems)
    }
}

/// Token cache structure
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenCache {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub tenant_id: String,
}

/// Configuration manager
#[derive(Clone, Debug)]
pub struct ConfigManager {
    config_dir: PathBuf,
    config_file: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let project_dirs = ProjectDirs::from("org", "edusync", "edusync").ok_or_else(|| {
            EduSyncError::ConfigError("Failed to determine config directory".into())
        })?;

        let config_dir = project_dirs.config_dir().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
        }

        Ok(Self {
            config_file: config_dir.join("config.toml"),
            config_dir,
        })
    }

    /// Use an explicit config file; the token cache lives next to it
    pub fn with_config_file(path: impl Into<PathBuf>) -> Self {
        let config_file = path.into();
        let config_dir = config_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            config_dir,
            config_file,
        }
    }

    /// Resolve from the optional `--config` flag
    pub fn from_flag(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Ok(Self::with_config_file(p)),
            None => Self::new(),
        }
    }

    pub fn config_dir(&self) -> &PathBuf {
        &self.config_dir
    }

    pub fn config_file(&self) -> &PathBuf {
        &self.config_file
    }

    pub fn token_cache_file(&self, tenant_id: &str) -> PathBuf {
        self.config_dir
            .join("cache")
            .join(format!("{}.token", tenant_id))
    }

    /// Load main config; a missing file is a configuration error, not a default
    pub fn load_config(&self) -> Result<Config> {
        if !self.config_file.exists() {
            return Err(EduSyncError::ConfigError(format!(
                "No configuration at {}. Run 'edusync config init' first",
                self.config_file.display()
            )));
        }

        let contents = fs::read_to_string(&self.config_file)?;
        let mut config: Config = toml::from_str(&contents)?;
        self.anchor_paths(&mut config);
        Ok(config)
    }

    /// Relative log paths are taken relative to the config directory
    fn anchor_paths(&self, config: &mut Config) {
        if config.sync.missing_log.is_relative() {
            config.sync.missing_log = self.config_dir.join(&config.sync.missing_log);
        }
        if config.sync.audit_log.is_relative() {
            config.sync.audit_log = self.config_dir.join(&config.sync.audit_log);
        }
    }

    /// Save main config
    pub fn save_config(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.config_file.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let contents = toml::to_string_pretty(config)
            .map_err(|e| EduSyncError::ConfigError(format!("Failed to serialize config: {}", e)))?;
        fs::write(&self.config_file, contents)?;
        Ok(())
    }

    /// Save token cache
    pub fn save_token(&self, tenant_id: &str, token: &TokenCache) -> Result<()> {
        let cache_dir = self.config_dir.join("cache");
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)?;
        }

        let contents = serde_json::to_string_pretty(token)?;
        fs::write(self.token_cache_file(tenant_id), contents)?;
        Ok(())
    }

    /// Load token cache
    pub fn load_token(&self, tenant_id: &str) -> Result<TokenCache> {
        let token_path = self.token_cache_file(tenant_id);

        if !token_path.exists() {
            return Err(EduSyncError::TokenNotFound);
        }

        let contents = fs::read_to_string(token_path)?;
        let token: TokenCache = serde_json::from_str(&contents)?;

        if token.expires_at < chrono::Utc::now() {
            return Err(EduSyncError::AuthError("Token expired".into()));
        }

        Ok(token)
    }

    /// Delete token cache
    pub fn delete_token(&self, tenant_id: &str) -> Result<()> {
        let token_path = self.token_cache_file(tenant_id);

        if token_path.exists() {
            fs::remove_file(token_path)?;
        }

        Ok(())
    }
}
