//! Fabric v4 REST client
//!
//! Thin JSON client: request bodies and responses stay `serde_json::Value`
//! and are mapped through resource schemas by the handlers.

use std::time::Duration;

use log::debug;
use reqwest::{Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use equinix_core::config::{FabricAuth, ProviderConfig};

use crate::error::ApiError;

const USER_AGENT: &str = concat!("equinix-provider/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Clone)]
pub struct FabricClient {
    http: reqwest::Client,
    /// `{endpoint}/fabric/v4/`
    base_url: Url,
    token: SecretString,
}

impl std::fmt::Debug for FabricClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FabricClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl FabricClient {
    /// Build a client from provider configuration, exchanging client
    /// credentials for a token when no static token is configured.
    pub async fn connect(config: &ProviderConfig) -> Result<Self, ApiError> {
        let endpoint = config.endpoint()?;
        let http = build_http(config.timeout())?;
        let token = match config.fabric_auth()? {
            FabricAuth::Token(token) => token,
            FabricAuth::ClientCredentials {
                client_id,
                client_secret,
            } => fetch_token(&http, &endpoint, &client_id, &client_secret).await?,
        };
        Self::from_parts(http, &endpoint, token)
    }

    /// Build a client around a pre-issued bearer token
    pub fn with_token(endpoint: &str, token: SecretString, timeout: Duration) -> Result<Self, ApiError> {
        let endpoint = Url::parse(endpoint)?;
        Self::from_parts(build_http(timeout)?, &endpoint, token)
    }

    fn from_parts(http: reqwest::Client, endpoint: &Url, token: SecretString) -> Result<Self, ApiError> {
        let mut base_url = endpoint.clone();
        let path = base_url.path().trim_end_matches('/').to_owned();
        base_url.set_path(&format!("{path}/fabric/v4/"));
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self.url(path)?;
        debug!("{} {}", method, url);
        Ok(self
            .http
            .request(method, url)
            .bearer_auth(self.token.expose_secret()))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<serde_json::Value, ApiError> {
        let resp = builder.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ApiError::from_response(status, body));
        }
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| ApiError::Deserialization {
            message: e.to_string(),
            body,
        })
    }

    pub async fn get(&self, path: &str) -> Result<serde_json::Value, ApiError> {
        self.send(self.request(Method::GET, path)?).await
    }

    pub async fn get_with_query(
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

    pub async fn patch<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<serde_json::Value, ApiError> {
        self.send(self.request(Method::PATCH, path)?.json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<serde_json::Value, ApiError> {
        self.send(self.request(Method::DELETE, path)?).await
    }
}

fn build_http(timeout: Duration) -> Result<reqwest::Client, ApiError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()?)
}

async fn fetch_token(
    http: &reqwest::Client,
    endpoint: &Url,
    client_id: &str,
    client_secret: &SecretString,
) -> Result<SecretString, ApiError> {
    let url = endpoint.join("/oauth2/v1/token")?;
    debug!("POST {}", url);
    let resp = http
        .post(url)
        .json(&TokenRequest {
            grant_type: "client_credentials",
            client_id,
            client_secret: client_secret.expose_secret(),
        })
        .send()
        .await?;
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(ApiError::Authentication {
            message: format!("token request returned HTTP {}: {}", status.as_u16(), body),
        });
    }
    let token: TokenResponse =
        serde_json::from_str(&body).map_err(|e| ApiError::Authentication {
            message: format!("invalid token response: {e}"),
        })?;
    Ok(SecretString::from(token.access_token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup() -> (MockServer, FabricClient) {
        let server = MockServer::start().await;
        let client = FabricClient::with_token(
            &server.uri(),
            SecretString::from("test-token"),
            Duration::from_secs(5),
        )
        .unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn get_sends_bearer_token_under_fabric_v4() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .and(path("/fabric/v4/streams/s-1"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uuid": "s-1"})))
            .mount(&server)
            .await;

        let body = client.get("/streams/s-1").await.unwrap();
        assert_eq!(body["uuid"], "s-1");
    }

    #[tokio::test]
    async fn error_body_is_decoded() {
        let (server, client) = setup().await;
        Mock::given(method("DELETE"))
            .and(path("/fabric/v4/routeAggregations/ra-1"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!([
                {"errorCode": "EQ-3044301", "errorMessage": "Route aggregation not found"}
            ])))
            .mount(&server)
            .await;

        let err = client.delete("routeAggregations/ra-1").await.unwrap_err();
        assert!(err.has_error_code("EQ-3044301"));
    }

    #[tokio::test]
    async fn empty_success_body_is_null() {
        let (server, client) = setup().await;
        Mock::given(method("DELETE"))
            .and(path("/fabric/v4/streams/s-1/subscriptions/sub-1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let body = client.delete("streams/s-1/subscriptions/sub-1").await.unwrap();
        assert!(body.is_null());
    }

    #[tokio::test]
    async fn connect_exchanges_client_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v1/token"))
            .and(body_json(json!({
                "grant_type": "client_credentials",
                "client_id": "id",
                "client_secret": "secret"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "issued"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fabric/v4/metros/SV"))
            .and(header("authorization", "Bearer issued"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": "SV"})))
            .mount(&server)
            .await;

        let config = ProviderConfig {
            api_endpoint: server.uri(),
            api_clientid: Some("id".into()),
            api_clientsecret: Some(SecretString::from("secret")),
            ..ProviderConfig::default()
        };
        let client = FabricClient::connect(&config).await.unwrap();
        assert_eq!(client.get("metros/SV").await.unwrap()["code"], "SV");
    }

    #[tokio::test]
    async fn connect_reports_rejected_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v1/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid client"))
            .mount(&server)
            .await;

        let config = ProviderConfig {
            api_endpoint: server.uri(),
            api_clientid: Some("id".into()),
            api_clientsecret: Some(SecretString::from("bad")),
            ..ProviderConfig::default()
        };
        let err = FabricClient::connect(&config).await.unwrap_err();
        assert!(matches!(err, ApiError::Authentication { .. }));
    }
}
