//! equinix_fabric_metro and equinix_fabric_metros data sources

use std::sync::Arc;

use equinix_core::provider::DataSourceHandler;
use equinix_core::schema::{AttributeSchema, AttributeType, ResourceSchema};

use crate::client::FabricClient;
use crate::common::{ListDataSource, ListRequest, LookupDataSource, page_query};

fn string(name: &str) -> AttributeSchema {
    AttributeSchema::new(name, AttributeType::String).computed()
}

fn int(name: &str) -> AttributeSchema {
    AttributeSchema::new(name, AttributeType::Int).computed()
}

fn float(name: &str) -> AttributeSchema {
    AttributeSchema::new(name, AttributeType::Float).computed()
}

/// A metro as returned by `GET /metros/{code}`
pub fn metro_schema() -> ResourceSchema {
    ResourceSchema::new("equinix_fabric_metro")
        .with_description("Fabric V4 API compatible data resource that allows user to fetch metro details by metro code")
        .attribute(string("href"))
        .attribute(string("type"))
        .attribute(string("code").with_description("Code assigned to an Equinix IBX data center in a specified metropolitan area"))
        .attribute(string("region"))
        .attribute(string("name"))
        .attribute(int("equinix_asn").with_description("Autonomous system number (ASN) for a specified Fabric metro"))
        .attribute(
            int("local_vc_bandwidth_max")
                .with_provider_name("localVCBandwidthMax")
                .with_description("Local virtual connection bandwidth supported for a specified Fabric metro"),
        )
        .attribute(
            AttributeSchema::new(
                "geo_coordinates",
                AttributeType::Object(vec![float("latitude"), float("longitude")]),
            )
            .computed(),
        )
        .attribute(
            AttributeSchema::new(
                "connected_metros",
                AttributeType::list_of(AttributeType::Object(vec![
                    string("href"),
                    string("code"),
                    float("avg_latency"),
                    int("remote_vc_bandwidth_max").with_provider_name("remoteVCBandwidthMax"),
                ])),
            )
            .computed()
            .with_description("Arrays of objects containing latency data for the specified metro"),
        )
        .attribute(
            AttributeSchema::new("geo_scopes", AttributeType::list_of(AttributeType::String))
                .computed()
                .with_description("List of supported geographic boundaries of a Fabric Metro"),
        )
}

pub(crate) fn data_sources(client: &Arc<FabricClient>) -> Vec<Arc<dyn DataSourceHandler>> {
    vec![
        Arc::new(LookupDataSource {
            type_name: "equinix_fabric_metro",
            client: client.clone(),
            what: "metro",
            item_schema: metro_schema,
            keys: &["metro_code"],
            path: |keys| format!("metros/{}", keys[0]),
            post_parse: None,
        }),
        Arc::new(ListDataSource {
            type_name: "equinix_fabric_metros",
            client: client.clone(),
            what: "metros",
            item_schema: metro_schema,
            params: || {
                vec![
                    AttributeSchema::new("presence", AttributeType::String)
                        .optional()
                        .with_description("User On Boarded Metros based on Fabric resource availability"),
                ]
            },
            request: |config| {
                let mut query = page_query(config);
                if let Some(presence) = config.get_str("presence").filter(|p| !p.is_empty()) {
                    query.push(("presence", presence.to_string()));
                }
                Ok(ListRequest::Get {
                    path: "metros".to_string(),
                    query,
                })
            },
            post_parse: None,
        }),
    ]
}
