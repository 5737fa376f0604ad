//! Metal REST client
//!
//! Authenticates with the `X-Auth-Token` header against `{endpoint}/metal/v1/`.

use std::time::Duration;

use log::debug;
use reqwest::{Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use url::Url;

use equinix_core::config::ProviderConfig;

use crate::error::ApiError;

const USER_AGENT: &str = concat!("equinix-provider/", env!("CARGO_PKG_VERSION"));
const AUTH_HEADER: &str = "X-Auth-Token";

#[derive(Clone)]
pub struct MetalClient {
    http: reqwest::Client,
    base_url: Url,
    token: SecretString,
}

impl std::fmt::Debug for MetalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl MetalClient {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ApiError> {
        let endpoint = config.endpoint()?;
        let token = config.metal_token()?;
        Self::build(&endpoint, token, config.timeout())
    }

    pub fn with_token(endpoint: &str, token: SecretString, timeout: Duration) -> Result<Self, ApiError> {
        Self::build(&Url::parse(endpoint)?, token, timeout)
    }

    fn build(endpoint: &Url, token: SecretString, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        let mut base_url = endpoint.clone();
        let path = base_url.path().trim_end_matches('/').to_owned();
        base_url.set_path(&format!("{path}/metal/v1/"));
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self.base_url.join(path.trim_start_matches('/'))?;
        debug!("{} {}", method, url);
        Ok(self
            .http
            .request(method, url)
            .header(AUTH_HEADER, self.token.expose_secret()))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<serde_json::Value, ApiError> {
        let resp = builder.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ApiError::from_response(status, &body));
        }
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| ApiError::Deserialization {
            message: e.to_string(),
            body,
        })
    }

    pub async fn get(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, ApiError> {
        self.send(self.request(Method::GET, path)?.query(params)).await
    }

    pub async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<serde_json::Value, ApiError> {
        self.send(self.request(Method::POST, path)?.json(body)).await
    }

    pub async fn put<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<serde_json::Value, ApiError> {
        self.send(self.request(Method::PUT, path)?.json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<serde_json::Value, ApiError> {
        self.send(self.request(Method::DELETE, path)?).await
    }
}
