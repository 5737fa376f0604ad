use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use equinix_core::config::ConfigError;
use equinix_core::provider::ProviderError;

/// One entry of the error array the Fabric API returns
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FabricErrorDetail {
    #[serde(default)]
    pub error_code: String,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub help: Option<String>,
}

impl std::fmt::Display for FabricErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code, self.error_message)?;
        if let Some(details) = self.details.as_deref().filter(|d| !d.is_empty()) {
            write!(f, " {}", details)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Non-success status with the decoded Fabric error array
    #[error("HTTP {status}: {}", format_errors(errors, body))]
    Api {
        status: u16,
        errors: Vec<FabricErrorDetail>,
        body: String,
    },

    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

fn format_errors(errors: &[FabricErrorDetail], body: &str) -> String {
    if errors.is_empty() {
        return body.to_string();
    }
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ApiError {
    pub(crate) fn from_response(status: StatusCode, body: String) -> Self {
        // The Fabric API answers with either an array of errors or a single object
        let errors = serde_json::from_str::<Vec<FabricErrorDetail>>(&body)
            .or_else(|_| serde_json::from_str::<FabricErrorDetail>(&body).map(|e| vec![e]))
            .unwrap_or_default()
            .into_iter()
            .filter(|e| !e.error_code.is_empty() || !e.error_message.is_empty())
            .collect();
        let body = if body.is_empty() {
            status.to_string()
        } else {
            body
        };
        ApiError::Api {
            status: status.as_u16(),
            errors,
            body,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Api { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// 403 and 404 both mean the object is gone or no longer visible
    pub fn is_not_found(&self) -> bool {
        matches!(self.status(), Some(403) | Some(404))
    }

    pub fn has_error_code(&self, code: &str) -> bool {
        match self {
            ApiError::Api { errors, .. } => errors.iter().any(|e| e.error_code == code),
            _ => false,
        }
    }

    pub fn has_status(&self, statuses: &[u16]) -> bool {
        self.status().is_some_and(|s| statuses.contains(&s))
    }

    /// Wrap into a provider error; the summary becomes the diagnostic
    /// summary and this error its detail
    pub fn context(self, summary: impl Into<String>) -> ProviderError {
        ProviderError::new(summary).with_cause(self)
    }
}
