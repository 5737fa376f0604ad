use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use equinix_core::config::ConfigError;
use equinix_core::provider::ProviderError;

/// Metal error bodies carry either an `errors` list or a single `error`
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Non-success status; `api` is set when the body was a Metal error document
    #[error("{}HTTP {status} {}", if *api { "API Error " } else { "" }, errors.join("; "))]
    Api {
        status: u16,
        errors: Vec<String>,
        api: bool,
    },

    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl ApiError {
    pub(crate) fn from_response(status: StatusCode, body: &str) -> Self {
        let parsed = serde_json::from_str::<ErrorBody>(body).ok();
        let (mut errors, api) = match parsed {
            Some(ErrorBody { errors, error }) => {
                let mut all = errors;
                all.extend(error);
                let api = !all.is_empty();
                (all, api)
            }
            None => (Vec::new(), false),
        };
        if errors.is_empty() {
            let text = body.trim();
            errors.push(if text.is_empty() {
                status.canonical_reason().unwrap_or_default().to_string()
            } else {
                text.to_string()
            });
        }
        ApiError::Api {
            status: status.as_u16(),
            errors,
            api,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Api { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn has_status(&self, statuses: &[u16]) -> bool {
        self.status().is_some_and(|s| statuses.contains(&s))
    }

    pub fn context(self, summary: impl Into<String>) -> ProviderError {
        ProviderError::new(summary).with_cause(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_metal_error_list() {
        let body = r#"{"errors":["Name can't be blank","Address is invalid"]}"#;
        let err = ApiError::from_response(StatusCode::UNPROCESSABLE_ENTITY, body);
        assert_eq!(
            err.to_string(),
            "API Error HTTP 422 Name can't be blank; Address is invalid"
        );
    }

    #[test]
    fn single_error_field_is_accepted() {
        let err = ApiError::from_response(StatusCode::NOT_FOUND, r#"{"error":"Not found"}"#);
        assert_eq!(err.to_string(), "API Error HTTP 404 Not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn non_api_body_is_kept_verbatim() {
        let err = ApiError::from_response(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert_eq!(err.to_string(), "HTTP 502 <html>bad gateway</html>");
        assert!(!err.is_not_found());
        assert!(err.has_status(&[502]));
    }

    #[test]
    fn forbidden_is_not_absence() {
        let err = ApiError::from_response(StatusCode::FORBIDDEN, "");
        assert!(!err.is_not_found());
        assert!(err.has_status(&[403, 404]));
        assert_eq!(err.to_string(), "HTTP 403 Forbidden");
    }
}
