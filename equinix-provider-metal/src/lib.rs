//! Equinix Metal Provider
//!
//! Organizations managed through the Metal v1 REST API.

pub mod client;
pub mod error;
pub mod organization;

use std::sync::Arc;

use equinix_core::config::ProviderConfig;
use equinix_core::provider::{DataSourceHandler, Provider, ResourceHandler};

pub use client::MetalClient;
pub use error::ApiError;

/// Equinix Metal Provider
#[derive(Debug, Clone)]
pub struct MetalProvider {
    client: Arc<MetalClient>,
}

impl MetalProvider {
    pub fn new(client: Arc<MetalClient>) -> Self {
        Self { client }
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, ApiError> {
        Ok(Self::new(Arc::new(MetalClient::from_config(config)?)))
    }
}

impl Provider for MetalProvider {
    fn name(&self) -> &'static str {
        "metal"
    }

    fn resources(&self) -> Vec<Arc<dyn ResourceHandler>> {
        vec![Arc::new(organization::OrganizationResource::new(
            self.client.clone(),
        ))]
    }

    fn data_sources(&self) -> Vec<Arc<dyn DataSourceHandler>> {
        vec![Arc::new(organization::OrganizationDataSource::new(
            self.client.clone(),
        ))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use secrecy::SecretString;

    #[test]
    fn exposes_organization_resource_and_data_source() {
        let client = MetalClient::with_token(
            "https://api.equinix.com",
            SecretString::from("token"),
            Duration::from_secs(5),
        )
        .unwrap();
        let provider = MetalProvider::new(Arc::new(client));
        assert_eq!(provider.name(), "metal");
        assert!(provider.resource("equinix_metal_organization").is_some());
        assert!(provider.data_source("equinix_metal_organization").is_some());
    }
}
