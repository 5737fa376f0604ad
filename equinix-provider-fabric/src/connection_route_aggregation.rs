//! equinix_fabric_connection_route_aggregation resource and data sources
//!
//! Attaches a route aggregation to a connection. Every configurable
//! attribute identifies the attachment, so any change replaces it.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use serde_json::json;

use equinix_core::diagnostics::Response;
use equinix_core::provider::{
    BoxFuture, DataSourceHandler, NO_UPDATABLE_FIELDS, ProviderError, ProviderResult,
    ResourceHandler, no_updatable_fields_detail,
};
use equinix_core::resource::{Resource, State, Value};
use equinix_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use equinix_core::timeouts::{Timeouts, timeouts_attribute};
use equinix_core::waiter::DELETED_MARKER;

use crate::client::FabricClient;
use crate::common::{
    Cadence, FabricContext, ListDataSource, ListRequest, LookupDataSource, href_attribute,
    id_attribute, page_query, removed, require, to_state, uuid_attribute, wait_for_deletion,
    wait_for_status,
};

pub const RESOURCE_TYPE: &str = "equinix_fabric_connection_route_aggregation";

pub fn schema() -> ResourceSchema {
    let key = |name: &str, description: &str| {
        AttributeSchema::new(name, AttributeType::String)
            .required()
            .local()
            .force_new()
            .with_description(description)
    };
    ResourceSchema::new(RESOURCE_TYPE)
        .with_description("Fabric V4 API compatible resource allows attachment of Route Aggregations to Fabric Connections")
        .attribute(id_attribute())
        .attribute(timeouts_attribute())
        .attribute(key("route_aggregation_id", "UUID of the Route Aggregation to attach this Connection to"))
        .attribute(key("connection_id", "UUID of the Connection to attach this Route Aggregation to"))
        .attribute(href_attribute())
        .attribute(AttributeSchema::new("type", AttributeType::String).computed())
        .attribute(uuid_attribute())
        .attribute(
            AttributeSchema::new("attachment_status", AttributeType::String)
                .computed()
                .with_description("Status of the Route Aggregation Policy attachment lifecycle"),
        )
}

fn collection(connection_id: &str) -> String {
    format!("connections/{}/routeAggregations", connection_id)
}

fn path(connection_id: &str, route_aggregation_id: &str) -> String {
    format!("{}/{}", collection(connection_id), route_aggregation_id)
}

fn attachment_path(attributes: &HashMap<String, Value>) -> ProviderResult<String> {
    Ok(path(
        require(attributes, "connection_id")?,
        require(attributes, "route_aggregation_id")?,
    ))
}

pub struct ConnectionRouteAggregationResource {
    ctx: FabricContext,
}

impl ConnectionRouteAggregationResource {
    pub(crate) fn new(ctx: FabricContext) -> Self {
        Self { ctx }
    }

    async fn attach(&self, plan: &Resource) -> ProviderResult<State> {
        let path = attachment_path(&plan.attributes)?;
        let timeouts = Timeouts::from_attributes(&plan.attributes)?;
        self.ctx
            .client
            .put(&path, &json!({}))
            .await
            .map_err(|e| e.context("Failed attaching connection to route aggregation"))?;

        let waiter = self
            .ctx
            .waiter(Cadence::Slow, &["ATTACHING"], &["ATTACHED"], timeouts.create);
        let attachment = wait_for_status(
            &self.ctx.client,
            &path,
            "/attachmentStatus",
            &waiter,
            "connection route aggregation",
        )
        .await
        .map_err(|e| ProviderError::new(format!("Failed attaching route aggregation at {}", path)).with_cause(e))?;
        info!("attached {}", path);
        Ok(to_state(&schema(), &plan.id, &attachment, &plan.attributes))
    }

    async fn read_attachment(&self, current: &State) -> ProviderResult<Response<State>> {
        let path = attachment_path(&current.attributes)?;
        match self.ctx.client.get(&path).await {
            Ok(body) => Ok(Response::ok(to_state(
                &schema(),
                &current.id,
                &body,
                &current.attributes,
            ))),
            Err(e) if e.is_not_found() => {
                Ok(removed(&current.id, "Connection route aggregation", &path))
            }
            Err(e) => Err(e.context(format!(
                "Failed retrieving connection route aggregation attachment {}",
                current.get_str("id").unwrap_or(&path)
            ))),
        }
    }

    async fn detach(&self, current: &State) -> ProviderResult<()> {
        let path = attachment_path(&current.attributes)?;
        let timeouts = Timeouts::from_attributes(&current.attributes)?;
        let id = current.get_str("id").unwrap_or(&path).to_string();
        if let Err(e) = self.ctx.client.delete(&path).await
            && !e.is_not_found()
        {
            return Err(e.context(format!(
                "Failed detaching connection route aggregation {}",
                id
            )));
        }

        let waiter = self.ctx.waiter(
            Cadence::Fast,
            &["DETACHING"],
            &["DETACHED", DELETED_MARKER],
            timeouts.delete,
        );
        wait_for_deletion(
            &self.ctx.client,
            &path,
            "/attachmentStatus",
            &waiter,
            |e| e.is_not_found(),
            "connection route aggregation",
        )
        .await
        .map_err(|e| {
            ProviderError::new(format!("Failed detaching connection route aggregation {}", id))
                .with_cause(e)
        })?;
        info!("detached {}", path);
        Ok(())
    }
}

impl ResourceHandler for ConnectionRouteAggregationResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        schema()
    }

    fn create<'a>(&'a self, plan: &'a Resource) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move { self.attach(plan).await.into() })
    }

    fn read<'a>(&'a self, current: &'a State) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move {
            self.read_attachment(current)
                .await
                .unwrap_or_else(Response::from_error)
        })
    }

    /// Nothing is updatable in place; planning forces replacement instead
    fn update<'a>(
        &'a self,
        prior: &'a State,
        _plan: &'a Resource,
    ) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move {
            Response::warning(
                prior.clone(),
                NO_UPDATABLE_FIELDS,
                no_updatable_fields_detail("connection route aggregation"),
            )
        })
    }

    fn delete<'a>(&'a self, current: &'a State) -> BoxFuture<'a, Response<()>> {
        Box::pin(async move { self.detach(current).await.into() })
    }

    fn import_attributes(&self) -> &'static [&'static str] {
        &["connection_id", "route_aggregation_id"]
    }
}

pub(crate) fn data_sources(client: &Arc<FabricClient>) -> Vec<Arc<dyn DataSourceHandler>> {
    vec![
        Arc::new(LookupDataSource {
            type_name: "equinix_fabric_connection_route_aggregation",
            client: client.clone(),
            what: "connection route aggregation",
            item_schema: schema,
            keys: &["connection_id", "route_aggregation_id"],
            path: |keys| path(keys[0], keys[1]),
            post_parse: None,
        }),
        Arc::new(ListDataSource {
            type_name: "equinix_fabric_connection_route_aggregations",
            client: client.clone(),
            what: "connection route aggregations",
            item_schema: schema,
            params: || {
                vec![
                    AttributeSchema::new("connection_id", AttributeType::String)
                        .required()
                        .with_description("The uuid of the connection this data source should retrieve"),
                ]
            },
            request: |config| {
                let connection_id = require(&config.attributes, "connection_id")?;
                Ok(ListRequest::Get {
                    path: collection(connection_id),
                    query: page_query(config),
                })
            },
            post_parse: None,
        }),
    ]
}
