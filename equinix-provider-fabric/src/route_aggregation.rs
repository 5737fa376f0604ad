//! equinix_fabric_route_aggregation resource and data sources
//!
//! Route aggregations summarize BGP prefixes advertised over Fabric
//! connections. Only the name is updatable; it is sent as a one-op patch.

use std::sync::Arc;
use std::time::Duration;

use log::info;

use equinix_core::diagnostics::Response;
use equinix_core::model::build_request;
use equinix_core::patch::PatchOp;
use equinix_core::provider::{
    BoxFuture, DataSourceHandler, ProviderError, ProviderResult, ResourceHandler,
};
use equinix_core::resource::{Resource, State};
use equinix_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use equinix_core::timeouts::{Timeouts, timeouts_attribute};
use equinix_core::waiter::DELETED_MARKER;
use serde_json::json;

use crate::client::FabricClient;
use crate::common::{
    Cadence, FabricContext, ListDataSource, ListRequest, LookupDataSource, change_attribute,
    change_log_attribute, filters_attribute, href_attribute, id_attribute, project_attribute,
    removed, require, search_body, sort_attribute, state_attribute, status_at, to_state,
    unchanged, uuid_attribute, wait_for_deletion, wait_for_status,
};
use crate::error::ApiError;

pub const RESOURCE_TYPE: &str = "equinix_fabric_route_aggregation";

/// Returned while reading an aggregation whose deletion has completed
const DELETED_ERROR_CODE: &str = "EQ-3044301";

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(RESOURCE_TYPE)
        .with_description("Fabric V4 API compatible resource allows creation and management of Equinix Fabric Route Aggregations")
        .attribute(id_attribute())
        .attribute(timeouts_attribute())
        .attribute(
            AttributeSchema::new(
                "type",
                AttributeType::enumeration(&[
                    "BGP_IPv4_PREFIX_AGGREGATION",
                    "BGP_IPv6_PREFIX_AGGREGATION",
                ]),
            )
            .required()
            .force_new(),
        )
        .attribute(AttributeSchema::new("name", AttributeType::String).required())
        .attribute(
            AttributeSchema::new("description", AttributeType::String)
                .optional()
                .force_new(),
        )
        .attribute(project_attribute().force_new())
        .attribute(href_attribute())
        .attribute(uuid_attribute())
        .attribute(state_attribute())
        .attribute(change_attribute())
        .attribute(AttributeSchema::new("connections_count", AttributeType::Int).computed())
        .attribute(AttributeSchema::new("rules_count", AttributeType::Int).computed())
        .attribute(change_log_attribute())
}

fn path(id: &str) -> String {
    format!("routeAggregations/{}", id)
}

fn gone(e: &ApiError) -> bool {
    e.is_not_found() || e.has_error_code(DELETED_ERROR_CODE)
}

pub struct RouteAggregationResource {
    ctx: FabricContext,
}

impl RouteAggregationResource {
    pub(crate) fn new(ctx: FabricContext) -> Self {
        Self { ctx }
    }

    async fn wait_provisioned(&self, id: &str, timeout: Duration) -> ProviderResult<serde_json::Value> {
        let waiter = self
            .ctx
            .waiter(Cadence::Slow, &["PROVISIONING"], &["PROVISIONED"], timeout);
        wait_for_status(&self.ctx.client, &path(id), "/state", &waiter, "route aggregation").await
    }

    async fn create_aggregation(&self, plan: &Resource) -> ProviderResult<State> {
        let timeouts = Timeouts::from_attributes(&plan.attributes)?;
        let created = self
            .ctx
            .client
            .post("routeAggregations", &build_request(&schema(), &plan.attributes))
            .await
            .map_err(|e| e.context("Failed creating route aggregation"))?;
        let id = status_at(&created, "/uuid");
        info!("created route aggregation {}", id);

        let aggregation = self
            .wait_provisioned(&id, timeouts.create)
            .await
            .map_err(|e| {
                ProviderError::new(format!("Failed creating route aggregation {}", id)).with_cause(e)
            })?;
        Ok(to_state(&schema(), &plan.id, &aggregation, &plan.attributes))
    }

    async fn read_aggregation(&self, current: &State) -> ProviderResult<Response<State>> {
        let id = require(&current.attributes, "id")?;
        match self.ctx.client.get(&path(id)).await {
            Ok(body) => Ok(Response::ok(to_state(
                &schema(),
                &current.id,
                &body,
                &current.attributes,
            ))),
            Err(e) if e.is_not_found() => Ok(removed(&current.id, "Route aggregation", id)),
            Err(e) => Err(e.context(format!("Failed retrieving route aggregation {}", id))),
        }
    }

    async fn update_aggregation(
        &self,
        prior: &State,
        plan: &Resource,
    ) -> ProviderResult<Response<State>> {
        let id = require(&prior.attributes, "id")?;
        let name = plan.get("name");
        if name.is_null() || name == prior.get("name") {
            return Ok(unchanged(prior, "route aggregation"));
        }

        let timeouts = Timeouts::from_attributes(&plan.attributes)?;
        let ops = [PatchOp::replace("/name", json!(name.as_str()))];
        self.ctx
            .client
            .patch(&path(id), &ops)
            .await
            .map_err(|e| e.context(format!("Failed updating route aggregation {}", id)))?;

        let aggregation = self
            .wait_provisioned(id, timeouts.update)
            .await
            .map_err(|e| {
                ProviderError::new(format!("Failed updating route aggregation {}", id)).with_cause(e)
            })?;
        Ok(Response::ok(to_state(
            &schema(),
            &prior.id,
            &aggregation,
            &plan.attributes,
        )))
    }

    async fn delete_aggregation(&self, current: &State) -> ProviderResult<()> {
        let id = require(&current.attributes, "id")?;
        let timeouts = Timeouts::from_attributes(&current.attributes)?;
        if let Err(e) = self.ctx.client.delete(&path(id)).await
            && !e.is_not_found()
        {
            return Err(e.context(format!("Failed deleting route aggregation {}", id)));
        }

        let waiter = self.ctx.waiter(
            Cadence::Fast,
            &["DEPROVISIONING"],
            &["DEPROVISIONED", DELETED_MARKER],
            timeouts.delete,
        );
        wait_for_deletion(&self.ctx.client, &path(id), "/state", &waiter, gone, "route aggregation")
            .await
            .map_err(|e| {
                ProviderError::new(format!("Failed deleting route aggregation {}", id)).with_cause(e)
            })?;
        info!("deleted route aggregation {}", id);
        Ok(())
    }
}

impl ResourceHandler for RouteAggregationResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        schema()
    }

    fn create<'a>(&'a self, plan: &'a Resource) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move { self.create_aggregation(plan).await.into() })
    }

    fn read<'a>(&'a self, current: &'a State) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move {
            self.read_aggregation(current)
                .await
                .unwrap_or_else(Response::from_error)
        })
    }

    fn update<'a>(
        &'a self,
        prior: &'a State,
        plan: &'a Resource,
    ) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move {
            self.update_aggregation(prior, plan)
                .await
                .unwrap_or_else(Response::from_error)
        })
    }

    fn delete<'a>(&'a self, current: &'a State) -> BoxFuture<'a, Response<()>> {
        Box::pin(async move { self.delete_aggregation(current).await.into() })
    }
}

pub(crate) fn data_sources(client: &Arc<FabricClient>) -> Vec<Arc<dyn DataSourceHandler>> {
    vec![
        Arc::new(LookupDataSource {
            type_name: "equinix_fabric_route_aggregation",
            client: client.clone(),
            what: "route aggregation",
            item_schema: schema,
            keys: &["route_aggregation_id"],
            path: |keys| path(keys[0]),
            post_parse: None,
        }),
        Arc::new(ListDataSource {
            type_name: "equinix_fabric_route_aggregations",
            client: client.clone(),
            what: "route aggregations",
            item_schema: schema,
            params: || vec![filters_attribute(), sort_attribute()],
            request: |config| {
                Ok(ListRequest::Search {
                    path: "routeAggregations/search".to_string(),
                    body: search_body(config),
                })
            },
            post_parse: None,
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::test_context;
    use equinix_core::resource::{ResourceId, Value};
    use std::collections::HashMap;
    use wiremock::matchers::{body_json, method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RA_PATH: &str = "/fabric/v4/routeAggregations/ra-1";

    fn aggregation_json(name: &str, state: &str) -> serde_json::Value {
        json!({
            "uuid": "ra-1",
            "href": "https://api.equinix.com/fabric/v4/routeAggregations/ra-1",
            "type": "BGP_IPv4_PREFIX_AGGREGATION",
            "name": name,
            "state": state,
            "project": {"projectId": "p-1"},
            "connectionsCount": 0,
            "rulesCount": 2
        })
    }

    fn plan(name: &str) -> Resource {
        let mut project = HashMap::new();
        project.insert("project_id".to_string(), Value::string("p-1"));
        Resource::new(RESOURCE_TYPE, "ra")
            .with_attribute("type", "BGP_IPv4_PREFIX_AGGREGATION")
            .with_attribute("name", name)
            .with_attribute("project", Value::Map(project))
    }

    fn prior(name: &str) -> State {
        to_state(
            &schema(),
            &ResourceId::new(RESOURCE_TYPE, "ra"),
            &aggregation_json(name, "PROVISIONED"),
            &plan(name).attributes,
        )
    }

    #[tokio::test]
    async fn create_posts_and_waits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/fabric/v4/routeAggregations"))
            .and(body_json(json!({
                "type": "BGP_IPv4_PREFIX_AGGREGATION",
                "name": "ra",
                "project": {"projectId": "p-1"}
            })))
            .respond_with(ResponseTemplate::new(202).set_body_json(aggregation_json("ra", "PROVISIONING")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path(RA_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(aggregation_json("ra", "PROVISIONED")))
            .mount(&server)
            .await;

        let resource = RouteAggregationResource::new(test_context(&server.uri()));
        let state = resource.create(&plan("ra")).await.into_result().unwrap();
        assert_eq!(state.get_str("id"), Some("ra-1"));
        assert_eq!(state.get("rules_count"), &Value::Int(2));
    }

    #[tokio::test]
    async fn rename_sends_replace_op() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(url_path(RA_PATH))
            .and(body_json(json!([{"op": "replace", "path": "/name", "value": "renamed"}])))
            .respond_with(ResponseTemplate::new(202).set_body_json(aggregation_json("renamed", "PROVISIONING")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path(RA_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(aggregation_json("renamed", "PROVISIONED")))
            .mount(&server)
            .await;

        let resource = RouteAggregationResource::new(test_context(&server.uri()));
        let state = resource
            .update(&prior("ra"), &plan("renamed"))
            .await
            .into_result()
            .unwrap();
        assert_eq!(state.get_str("name"), Some("renamed"));
    }

    #[tokio::test]
    async fn same_name_is_not_an_update() {
        let resource = RouteAggregationResource::new(test_context("http://127.0.0.1:9"));
        let response = resource.update(&prior("ra"), &plan("ra")).await;
        assert!(!response.has_error());
        assert_eq!(response.diagnostics.warnings().count(), 1);
    }

    #[tokio::test]
    async fn deleted_error_code_ends_delete_wait() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(url_path(RA_PATH))
            .respond_with(ResponseTemplate::new(202).set_body_json(aggregation_json("ra", "DEPROVISIONING")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path(RA_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!([
                {"errorCode": "EQ-3044301", "errorMessage": "Route Aggregation not found"}
            ])))
            .mount(&server)
            .await;

        let resource = RouteAggregationResource::new(test_context(&server.uri()));
        let response = resource.delete(&prior("ra")).await;
        assert!(!response.has_error(), "{:?}", response.diagnostics);
    }

    #[tokio::test]
    async fn unexpected_delete_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(url_path(RA_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!([
                {"errorCode": "EQ-3044011", "errorMessage": "aggregation is attached"}
            ])))
            .mount(&server)
            .await;

        let resource = RouteAggregationResource::new(test_context(&server.uri()));
        let response = resource.delete(&prior("ra")).await;
        let diag = response.diagnostics.errors().next().unwrap();
        assert_eq!(diag.summary, "Failed deleting route aggregation ra-1");
        assert!(diag.detail.contains("EQ-3044011"));
    }
}
