//! Provider configuration
//!
//! Defaults, then an optional TOML file, then `EQUINIX_*` environment
//! variables (plus `METAL_AUTH_TOKEN`), later sources winning.

use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_ENDPOINT: &str = "https://api.equinix.com";
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error(
        "no Fabric credentials configured: set EQUINIX_API_TOKEN or EQUINIX_API_CLIENTID and EQUINIX_API_CLIENTSECRET"
    )]
    NoFabricCredentials,

    #[error("no Metal credentials configured: set METAL_AUTH_TOKEN")]
    NoMetalCredentials,

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// How the Fabric client authenticates
#[derive(Debug, Clone)]
pub enum FabricAuth {
    /// Pre-issued bearer token
    Token(SecretString),
    /// OAuth client-credentials exchange
    ClientCredentials {
        client_id: String,
        client_secret: SecretString,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Base URL shared by the Fabric, Metal and OAuth APIs
    pub api_endpoint: String,
    pub api_clientid: Option<String>,
    pub api_clientsecret: Option<SecretString>,
    pub api_token: Option<SecretString>,
    /// HTTP request timeout in seconds
    pub api_timeout: u64,
    pub metal_auth_token: Option<SecretString>,
}

impl ProviderConfig {
    /// Load from defaults, the optional TOML file, and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Self::defaults();
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment
            .merge(Env::prefixed("EQUINIX_"))
            .merge(Env::raw().only(&["METAL_AUTH_TOKEN"]));
        Self::from_figment(figment)
    }

    fn defaults() -> Figment {
        Figment::new()
            .merge(Serialized::default("api_endpoint", DEFAULT_API_ENDPOINT))
            .merge(Serialized::default("api_timeout", DEFAULT_API_TIMEOUT_SECS))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: ProviderConfig = figment.extract()?;
        config.endpoint()?;
        Ok(config)
    }

    /// Parsed API endpoint with any trailing slash removed
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        let trimmed = self.api_endpoint.trim_end_matches('/');
        let url = Url::parse(trimmed).map_err(|e| ConfigError::Validation {
            field: "api_endpoint".into(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation {
                field: "api_endpoint".into(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        Ok(url)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout)
    }

    /// A static token wins over client credentials
    pub fn fabric_auth(&self) -> Result<FabricAuth, ConfigError> {
        if let Some(token) = &self.api_token {
            return Ok(FabricAuth::Token(token.clone()));
        }
        match (&self.api_clientid, &self.api_clientsecret) {
            (Some(client_id), Some(client_secret)) if !client_id.is_empty() => {
                Ok(FabricAuth::ClientCredentials {
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                })
            }
            _ => Err(ConfigError::NoFabricCredentials),
        }
    }

    pub fn metal_token(&self) -> Result<SecretString, ConfigError> {
        self.metal_auth_token
            .clone()
            .ok_or(ConfigError::NoMetalCredentials)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            api_clientid: None,
            api_clientsecret: None,
            api_token: None,
            api_timeout: DEFAULT_API_TIMEOUT_SECS,
            metal_auth_token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;

    fn from_toml(contents: &str) -> Result<ProviderConfig, ConfigError> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        ProviderConfig::from_figment(ProviderConfig::defaults().merge(Toml::file(file.path())))
    }

    #[test]
    fn defaults_apply_without_sources() {
        let config = ProviderConfig::from_figment(ProviderConfig::defaults()).unwrap();
        assert_eq!(config.api_endpoint, DEFAULT_API_ENDPOINT);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(matches!(
            config.fabric_auth(),
            Err(ConfigError::NoFabricCredentials)
        ));
        assert!(config.metal_token().is_err());
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let config = from_toml(
            r#"
            api_endpoint = "https://uatapi.equinix.com/"
            api_clientid = "client"
            api_clientsecret = "shh"
            api_timeout = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.endpoint().unwrap().as_str(), "https://uatapi.equinix.com/");
        assert_eq!(config.api_timeout, 5);
        match config.fabric_auth().unwrap() {
            FabricAuth::ClientCredentials {
                client_id,
                client_secret,
            } => {
                assert_eq!(client_id, "client");
                assert_eq!(client_secret.expose_secret(), "shh");
            }
            other => panic!("expected client credentials, got {:?}", other),
        }
    }

    #[test]
    fn static_token_wins() {
        let config = from_toml(
            r#"
            api_token = "token"
            api_clientid = "client"
            api_clientsecret = "shh"
            "#,
        )
        .unwrap();
        assert!(matches!(config.fabric_auth().unwrap(), FabricAuth::Token(_)));
    }

    #[test]
    fn rejects_bad_endpoint() {
        let err = from_toml(r#"api_endpoint = "ftp://example.com""#).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
        assert!(from_toml(r#"api_endpoint = "not a url""#).is_err());
    }
}
