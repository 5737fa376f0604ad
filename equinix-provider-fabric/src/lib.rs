//! Equinix Fabric Provider
//!
//! Resources and data sources backed by the Fabric v4 REST API.
//!
//! ## Module Structure
//!
//! - `client` - Authenticated HTTP client and request helpers
//! - `error` - Fabric API error bodies
//! - `common` - Shared schema fragments, polling and data source plumbing
//! - `stream`, `stream_subscription`, `stream_attachment`, `stream_alert_rule` - Event streams
//! - `route_aggregation`, `connection_route_aggregation` - Route aggregation policies
//! - `precision_time` - NTP/PTP precision time services
//! - `connection` - Virtual connections
//! - `metro` - Metro lookups

pub mod client;
pub mod common;
pub mod connection;
pub mod connection_route_aggregation;
pub mod error;
pub mod metro;
pub mod precision_time;
pub mod route_aggregation;
pub mod stream;
pub mod stream_alert_rule;
pub mod stream_attachment;
pub mod stream_subscription;

use std::sync::Arc;

use equinix_core::config::ProviderConfig;
use equinix_core::provider::{DataSourceHandler, Provider, ResourceHandler};

pub use client::FabricClient;
pub use common::Pacing;
pub use error::ApiError;

use common::FabricContext;

/// Equinix Fabric Provider
#[derive(Debug, Clone)]
pub struct FabricProvider {
    ctx: FabricContext,
}

impl FabricProvider {
    pub fn new(client: Arc<FabricClient>) -> Self {
        Self {
            ctx: FabricContext::new(client, Pacing::Api),
        }
    }

    /// Authenticate against the configured endpoint
    pub async fn connect(config: &ProviderConfig) -> Result<Self, ApiError> {
        let client = FabricClient::connect(config).await?;
        Ok(Self::new(Arc::new(client)))
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.ctx.pacing = pacing;
        self
    }
}

impl Provider for FabricProvider {
    fn name(&self) -> &'static str {
        "fabric"
    }

    fn resources(&self) -> Vec<Arc<dyn ResourceHandler>> {
        let ctx = &self.ctx;
        vec![
            Arc::new(stream::StreamResource::new(ctx.clone())),
            Arc::new(stream_subscription::StreamSubscriptionResource::new(ctx.clone())),
            Arc::new(stream_attachment::StreamAttachmentResource::new(ctx.clone())),
            Arc::new(stream_alert_rule::StreamAlertRuleResource::new(ctx.clone())),
            Arc::new(route_aggregation::RouteAggregationResource::new(ctx.clone())),
            Arc::new(
                connection_route_aggregation::ConnectionRouteAggregationResource::new(ctx.clone()),
            ),
            Arc::new(precision_time::PrecisionTimeResource::new(ctx.clone())),
            Arc::new(connection::ConnectionResource::new(ctx.clone())),
        ]
    }

    fn data_sources(&self) -> Vec<Arc<dyn DataSourceHandler>> {
        let client = &self.ctx.client;
        [
            stream::data_sources(client),
            stream_subscription::data_sources(client),
            stream_attachment::data_sources(client),
            stream_alert_rule::data_sources(client),
            route_aggregation::data_sources(client),
            connection_route_aggregation::data_sources(client),
            precision_time::data_sources(client),
            connection::data_sources(client),
            metro::data_sources(client),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    use secrecy::SecretString;

    fn provider() -> FabricProvider {
        let client = FabricClient::with_token(
            "https://api.equinix.com",
            SecretString::from("token"),
            Duration::from_secs(5),
        )
        .unwrap();
        FabricProvider::new(Arc::new(client))
    }

    #[test]
    fn lists_every_resource_type() {
        let provider = provider();
        let names: Vec<&str> = provider.resources().iter().map(|r| r.type_name()).collect();
        assert_eq!(
            names,
            vec![
                "equinix_fabric_stream",
                "equinix_fabric_stream_subscription",
                "equinix_fabric_stream_attachment",
                "equinix_fabric_stream_alert_rule",
                "equinix_fabric_route_aggregation",
                "equinix_fabric_connection_route_aggregation",
                "equinix_fabric_precision_time_service",
                "equinix_fabric_connection",
            ]
        );
    }

    #[test]
    fn data_source_names_are_unique() {
        let provider = provider();
        let sources = provider.data_sources();
        let names: HashSet<&str> = sources.iter().map(|d| d.type_name()).collect();
        assert_eq!(names.len(), sources.len());
        assert!(names.contains("equinix_fabric_metro"));
        assert!(names.contains("equinix_fabric_metros"));
        assert!(names.contains("equinix_fabric_connections"));
    }

    #[test]
    fn looks_up_handlers_by_type() {
        let provider = provider();
        assert!(provider.resource("equinix_fabric_stream").is_some());
        assert!(provider.resource("equinix_fabric_metro").is_none());
        assert!(provider.data_source("equinix_fabric_metro").is_some());
    }
}
