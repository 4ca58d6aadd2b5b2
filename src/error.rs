use thiserror::Error;

#[derive(Error, Debug)]
pub enum EduSyncError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Graph API error (HTTP {status}): {message}")]
    GraphApiError { status: u16, message: String },

    #[error("Helpdesk API error (HTTP {status}): {message}")]
    HelpdeskError { status: u16, message: String },

    #[error("Active Directory error: {0}")]
    DirectoryError(String),

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid pattern: {0}")]
    RegexError(#[from] regex::Error),

    #[error("Interactive prompt error: {0}")]
    DialoguerError(#[from] dialoguer::Error),

    #[error("Token not found. Please run 'edusync login' first")]
    TokenNotFound,

    #[error("Run finished with {0} failed operation(s); see the audit log")]
    RunIncomplete(usize),
}

pub type Result<T> = std::result::Result<T, EduSyncError>;

pub use EduSyncError as Error;

impl EduSyncError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::GraphApiError { status, .. } | Self::HelpdeskError { status, .. } => {
                *status == 429 || *status >= 500
            }
            Self::HttpError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::GraphApiError { status, .. } | Self::HelpdeskError { status, .. } => {
                *status == 404
            }
            _ => false,
        }
    }

    /// Authentication and configuration failures abort the whole run.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::AuthError(_) | Self::TokenNotFound | Self::ConfigError(_) => true,
            Self::GraphApiError { status, .. } | Self::HelpdeskError { status, .. } => {
                *status == 401
            }
            _ => false,
        }
    }
}

/// Parse Graph API error response and provide helpful context
pub fn enhance_graph_error(error_response: &str) -> String {
    if let Ok(error_json) = serde_json::from_str::<serde_json::Value>(error_response) {
        if let Some(error_obj) = error_json.get("error") {
            let code = error_obj
                .get("code")
                .and_then(|c| c.as_str())
                .unwrap_or("Unknown");
            let message = error_obj
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("No message");

            let hint = match code {
                "Unauthorized" | "InvalidAuthenticationToken" => {
                    " (hint: the access token may have expired, run 'edusync login' again)"
                }
                "Forbidden" | "Authorization_RequestDenied" | "InsufficientPrivileges" => {
                    " (hint: check the app registration has GroupMember.ReadWrite.All and DeviceManagementManagedDevices.ReadWrite.All with admin consent)"
                }
                "TooManyRequests" => {
                    " (hint: Graph throttled the request, the next run will pick it up)"
                }
                _ => "",
            };

            return format!("{}: {}{}", code, message, hint);
        }
    }

    error_response.to_string()
}

/// True when a Graph error body says the reference being added is already present.
pub fn is_already_member_error(error_response: &str) -> bool {
    error_response.contains("added object references already exist")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enhance_graph_error_extracts_code_and_message() {
        let body = r#"{"error":{"code":"Request_ResourceNotFound","message":"Resource 'abc' does not exist."}}"#;
        assert_eq!(
            enhance_graph_error(body),
            "Request_ResourceNotFound: Resource 'abc' does not exist."
        );
    }

    #[test]
    fn test_enhance_graph_error_passes_through_plain_text() {
        assert_eq!(enhance_graph_error("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_error_classification() {
        let throttled = EduSyncError::GraphApiError {
            status: 429,
            message: String::new(),
        };
        assert!(throttled.is_transient());
        assert!(!throttled.is_fatal());

        let missing = EduSyncError::GraphApiError {
            status: 404,
            message: String::new(),
        };
        assert!(missing.is_not_found());
        assert!(!missing.is_transient());

        let unauthorized = EduSyncError::HelpdeskError {
            status: 401,
            message: String::new(),
        };
        assert!(unauthorized.is_fatal());

        assert!(EduSyncError::not_found("Group", "Lab-101").is_not_found());
        assert!(EduSyncError::AuthError("nope".into()).is_fatal());
    }

    #[test]
    fn test_already_member_detection() {
        let body = r#"{"error":{"code":"Request_BadRequest","message":"One or more added object references already exist for the following modified properties: 'members'."}}"#;
        assert!(is_already_member_error(body));
        assert!(!is_already_member_error("{}"));
    }
}
