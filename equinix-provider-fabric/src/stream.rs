//! equinix_fabric_stream resource and data sources

use std::sync::Arc;

use log::info;
use serde_json::json;

use equinix_core::diagnostics::Response;
use equinix_core::model::build_request;
use equinix_core::provider::{
    BoxFuture, DataSourceHandler, ProviderError, ProviderResult, ResourceHandler,
};
use equinix_core::resource::{Resource, State};
use equinix_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use equinix_core::timeouts::{Timeouts, timeouts_attribute};

use crate::client::FabricClient;
use crate::common::{
    Cadence, FabricContext, ListDataSource, ListRequest, LookupDataSource, change_log_attribute,
    href_attribute, id_attribute, page_query, project_attribute, removed, require,
    state_attribute, to_state, unchanged, uuid_attribute, wait_for_deletion, wait_for_status,
};

pub const RESOURCE_TYPE: &str = "equinix_fabric_stream";

const PROVISIONING: &[&str] = &["PROVISIONING"];
const PROVISIONED: &[&str] = &["PROVISIONED"];
const DEPROVISIONING: &[&str] = &["DEPROVISIONING"];
const DEPROVISIONED: &[&str] = &["DEPROVISIONED", equinix_core::waiter::DELETED_MARKER];

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(RESOURCE_TYPE)
        .with_description("Fabric V4 API compatible resource allows creation and management of Equinix Fabric Stream")
        .attribute(id_attribute())
        .attribute(timeouts_attribute())
        .attribute(
            AttributeSchema::new("type", AttributeType::String)
                .required()
                .with_description("Equinix defined Streaming Type"),
        )
        .attribute(
            AttributeSchema::new("name", AttributeType::String)
                .required()
                .with_description("Customer-provided name of the stream resource"),
        )
        .attribute(
            AttributeSchema::new("description", AttributeType::String)
                .required()
                .with_description("Customer-provided description of the stream resource"),
        )
        .attribute(project_attribute().stable())
        .attribute(href_attribute())
        .attribute(uuid_attribute())
        .attribute(state_attribute())
        .attribute(AttributeSchema::new("assets_count", AttributeType::Int).computed())
        .attribute(
            AttributeSchema::new("stream_subscriptions_count", AttributeType::Int).computed(),
        )
        .attribute(change_log_attribute())
}

fn path(id: &str) -> String {
    format!("streams/{}", id)
}

pub struct StreamResource {
    ctx: FabricContext,
}

impl StreamResource {
    pub(crate) fn new(ctx: FabricContext) -> Self {
        Self { ctx }
    }

    async fn wait_provisioned(&self, id: &str, timeout: std::time::Duration) -> ProviderResult<serde_json::Value> {
        let waiter = self.ctx.waiter(Cadence::Fast, PROVISIONING, PROVISIONED, timeout);
        wait_for_status(&self.ctx.client, &path(id), "/state", &waiter, "stream").await
    }

    async fn create_stream(&self, plan: &Resource) -> ProviderResult<State> {
        let schema = schema();
        let timeouts = Timeouts::from_attributes(&plan.attributes)?;
        let body = build_request(&schema, &plan.attributes);
        let created = self
            .ctx
            .client
            .post("streams", &body)
            .await
            .map_err(|e| e.context("Failed creating Stream"))?;
        let id = crate::common::status_at(&created, "/uuid");
        info!("created stream {}", id);

        let stream = self
            .wait_provisioned(&id, timeouts.create)
            .await
            .map_err(|e| ProviderError::new(format!("Failed creating Stream {}", id)).with_cause(e))?;
        Ok(to_state(&schema, &plan.id, &stream, &plan.attributes))
    }

    async fn read_stream(&self, current: &State) -> ProviderResult<Response<State>> {
        let id = require(&current.attributes, "id")?;
        match self.ctx.client.get(&path(id)).await {
            Ok(body) => Ok(Response::ok(to_state(
                &schema(),
                &current.id,
                &body,
                &current.attributes,
            ))),
            Err(e) if e.is_not_found() => Ok(removed(&current.id, "Stream", id)),
            Err(e) => Err(e.context(format!("Failed retrieving Stream {}", id))),
        }
    }

    async fn update_stream(&self, prior: &State, plan: &Resource) -> ProviderResult<Response<State>> {
        let id = require(&prior.attributes, "id")?;
        let changed = ["name", "description"]
            .iter()
            .any(|field| plan.get(field) != prior.get(field));
        if !changed {
            return Ok(unchanged(prior, "stream"));
        }

        let timeouts = Timeouts::from_attributes(&plan.attributes)?;
        let request = json!({
            "name": plan.get_str("name").unwrap_or_default(),
            "description": plan.get_str("description").unwrap_or_default(),
        });
        self.ctx
            .client
            .put(&path(id), &request)
            .await
            .map_err(|e| e.context(format!("Failed updating Stream {}", id)))?;

        let stream = self
            .wait_provisioned(id, timeouts.update)
            .await
            .map_err(|e| ProviderError::new(format!("Failed updating Stream {}", id)).with_cause(e))?;
        let mut previous = plan.attributes.clone();
        previous.insert("id".to_string(), prior.get("id").clone());
        Ok(Response::ok(to_state(&schema(), &prior.id, &stream, &previous)))
    }

    async fn delete_stream(&self, current: &State) -> ProviderResult<()> {
        let id = require(&current.attributes, "id")?;
        let timeouts = Timeouts::from_attributes(&current.attributes)?;
        if let Err(e) = self.ctx.client.delete(&path(id)).await
            && !e.is_not_found()
        {
            return Err(e.context(format!("Failed deleting Stream {}", id)));
        }

        let waiter = self
            .ctx
            .waiter(Cadence::Fast, DEPROVISIONING, DEPROVISIONED, timeouts.delete);
        wait_for_deletion(
            &self.ctx.client,
            &path(id),
            "/state",
            &waiter,
            |e| e.is_not_found(),
            "stream",
        )
        .await
        .map_err(|e| ProviderError::new(format!("Failed deleting Stream {}", id)).with_cause(e))?;
        info!("deleted stream {}", id);
        Ok(())
    }
}

impl ResourceHandler for StreamResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        schema()
    }

    fn create<'a>(&'a self, plan: &'a Resource) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move { self.create_stream(plan).await.into() })
    }

    fn read<'a>(&'a self, current: &'a State) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move { self.read_stream(current).await.unwrap_or_else(Response::from_error) })
    }

    fn update<'a>(
        &'a self,
        prior: &'a State,
        plan: &'a Resource,
    ) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move {
            self.update_stream(prior, plan)
                .await
                .unwrap_or_else(Response::from_error)
        })
    }

    fn delete<'a>(&'a self, current: &'a State) -> BoxFuture<'a, Response<()>> {
        Box::pin(async move { self.delete_stream(current).await.into() })
    }
}

pub(crate) fn data_sources(client: &Arc<FabricClient>) -> Vec<Arc<dyn DataSourceHandler>> {
    vec![
        Arc::new(LookupDataSource {
            type_name: "equinix_fabric_stream",
            client: client.clone(),
            what: "Stream",
            item_schema: schema,
            keys: &["stream_id"],
            path: |keys| path(keys[0]),
            post_parse: None,
        }),
        Arc::new(ListDataSource {
            type_name: "equinix_fabric_streams",
            client: client.clone(),
            what: "streams",
            item_schema: schema,
            params: Vec::new,
            request: |config| {
                Ok(ListRequest::Get {
                    path: "streams".to_string(),
                    query: page_query(config),
                })
            },
            post_parse: None,
        }),
    ]
}
