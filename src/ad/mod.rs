//! On-premises Active Directory bridge
//!
//! Computer objects are read and changed through the ActiveDirectory
//! PowerShell module (`pwsh`), with results exchanged as JSON. Reachability of
//! a host is a plain TCP connect.

use crate::error::{EduSyncError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Computer {
    pub name: String,
    pub distinguished_name: String,
    #[serde(default)]
    pub dns_host_name: Option<String>,
    pub when_created: DateTime<Utc>,
}

impl Computer {
    /// Address used to reach the machine itself
    pub fn host(&self) -> &str {
        self.dns_host_name
            .as_deref()
            .filter(|h| !h.is_empty())
            .unwrap_or(&self.name)
    }
}

#[async_trait]
pub trait ComputerDirectory: Send + Sync {
    async fn list_computers(&self) -> Result<Vec<Computer>>;
    async fn delete_computer(&self, computer: &Computer) -> Result<()>;
    async fn rename_computer(&self, computer: &Computer, new_name: &str) -> Result<()>;
}

#[async_trait]
pub trait HostProbe: Send + Sync {
    async fn is_reachable(&self, host: &str) -> bool;
}

/// Quote a value as a single-quoted PowerShell string literal
pub fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub struct PowerShellDirectory {
    shell: String,
    search_base: String,
}

impl PowerShellDirectory {
    pub fn new(search_base: impl Into<String>) -> Self {
        Self {
            shell: "pwsh".to_string(),
            search_base: search_base.into(),
        }
    }

    /// Use another PowerShell host (e.g. `powershell.exe` on older servers)
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    fn list_script(&self) -> String {
        let scope = if self.search_base.is_empty() {
            String::new()
        } else {
            format!(" -SearchBase {}", ps_quote(&self.search_base))
        };

        format!(
            "Import-Module ActiveDirectory -ErrorAction Stop; \
             $items = Get-ADComputer -Filter *{} -Properties whenCreated,dNSHostName | \
             ForEach-Object {{ [pscustomobject]@{{ Name = $_.Name; DistinguishedName = $_.DistinguishedName; \
             DnsHostName = $_.DNSHostName; WhenCreated = $_.whenCreated.ToUniversalTime().ToString('o') }} }}; \
             ConvertTo-Json -InputObject @($items) -Compress",
            scope
        )
    }

    async fn run(&self, script: &str) -> Result<String> {
        tracing::debug!("{}: {}", self.shell, script);

        let output = Command::new(&self.shell)
            .args(["-NoProfile", "-NonInteractive", "-Command", script])
            .output()
            .await
            .map_err(|e| {
                EduSyncError::DirectoryError(format!("Failed to start {}: {}", self.shell, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EduSyncError::DirectoryError(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ComputerDirectory for PowerShellDirectory {
    async fn list_computers(&self) -> Result<Vec<Computer>> {
        let stdout = self.run(&self.list_script()).await?;
        if stdout.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&stdout)?)
    }

    async fn delete_computer(&self, computer: &Computer) -> Result<()> {
        self.run(&format!(
            "Import-Module ActiveDirectory -ErrorAction Stop; \
             Remove-ADObject -Identity {} -Recursive -Confirm:$false -ErrorAction Stop",
            ps_quote(&computer.distinguished_name)
        ))
        .await?;
        Ok(())
    }

    async fn rename_computer(&self, computer: &Computer, new_name: &str) -> Result<()> {
        self.run(&format!(
            "Rename-Computer -ComputerName {} -NewName {} -Force -Restart -ErrorAction Stop",
            ps_quote(computer.host()),
            ps_quote(new_name)
        ))
        .await?;
        Ok(())
    }
}

/// Reachable means something accepts a TCP connection on `port` in time
pub struct TcpProbe {
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

#[async_trait]
impl HostProbe for TcpProbe {
    async fn is_reachable(&self, host: &str) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect((host, self.port))).await,
            Ok(Ok(_))
        )
    }
}
