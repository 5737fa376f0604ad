//! equinix_fabric_stream_alert_rule resource and data sources

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::info;

use equinix_core::diagnostics::Response;
use equinix_core::model::build_request;
use equinix_core::provider::{
    BoxFuture, DataSourceHandler, ProviderError, ProviderResult, ResourceHandler,
};
use equinix_core::resource::{Resource, State, Value};
use equinix_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use equinix_core::timeouts::{Timeouts, timeouts_attribute};
use equinix_core::waiter::DELETED_MARKER;

use crate::client::FabricClient;
use crate::common::{
    Cadence, FabricContext, ListDataSource, ListRequest, LookupDataSource, any_changed,
    change_log_attribute, href_attribute, id_attribute, page_query, removed, require,
    state_attribute, status_at, to_state, unchanged, uuid_attribute, wait_for_deletion,
    wait_for_status,
};

pub const RESOURCE_TYPE: &str = "equinix_fabric_stream_alert_rule";

const UPDATABLE: &[&str] = &[
    "name",
    "description",
    "enabled",
    "metric_name",
    "resource_selector",
    "window_size",
    "warning_threshold",
    "critical_threshold",
    "operand",
];

pub fn schema() -> ResourceSchema {
    let string = |name: &str| AttributeSchema::new(name, AttributeType::String);
    ResourceSchema::new(RESOURCE_TYPE)
        .with_description("Fabric V4 API compatible resource allows creation and management of Equinix Fabric Stream Alert Rules")
        .attribute(id_attribute())
        .attribute(timeouts_attribute())
        .attribute(
            string("stream_id")
                .required()
                .local()
                .force_new()
                .with_description("The stream UUID that contains this alert rule"),
        )
        .attribute(
            AttributeSchema::new("type", AttributeType::enumeration(&["METRIC_ALERT"]))
                .required()
                .force_new(),
        )
        .attribute(string("name").required())
        .attribute(string("description").required())
        .attribute(
            AttributeSchema::new("enabled", AttributeType::Bool)
                .optional()
                .computed()
                .with_default(Value::Bool(true)),
        )
        .attribute(
            string("metric_name")
                .required()
                .with_description("Stream alert rule metric name"),
        )
        .attribute(
            AttributeSchema::new(
                "resource_selector",
                AttributeType::Object(vec![
                    AttributeSchema::new("include", AttributeType::list_of(AttributeType::String))
                        .required(),
                ]),
            )
            .optional()
            .computed()
            .stable()
            .with_description("Lists of resources the alert rule evaluates"),
        )
        .attribute(string("window_size").optional().computed())
        .attribute(
            AttributeSchema::new("operand", AttributeType::enumeration(&["ABOVE", "BELOW"]))
                .optional()
                .computed(),
        )
        .attribute(string("warning_threshold").optional().computed())
        .attribute(string("critical_threshold").optional().computed())
        .attribute(href_attribute())
        .attribute(uuid_attribute())
        .attribute(state_attribute())
        .attribute(change_log_attribute())
}

fn collection(stream_id: &str) -> String {
    format!("streams/{}/alertRules", stream_id)
}

fn path(stream_id: &str, id: &str) -> String {
    format!("streams/{}/alertRules/{}", stream_id, id)
}

/// State the rule settles in: disabled rules never leave INACTIVE
fn settled(attributes: &HashMap<String, Value>) -> (&'static str, &'static str) {
    match attributes.get("enabled").and_then(Value::as_bool) {
        Some(false) => ("ACTIVE", "INACTIVE"),
        _ => ("INACTIVE", "ACTIVE"),
    }
}

pub struct StreamAlertRuleResource {
    ctx: FabricContext,
}

impl StreamAlertRuleResource {
    pub(crate) fn new(ctx: FabricContext) -> Self {
        Self { ctx }
    }

    async fn wait_settled(
        &self,
        stream_id: &str,
        id: &str,
        plan: &Resource,
        timeout: Duration,
    ) -> ProviderResult<serde_json::Value> {
        let (pending, target) = settled(&plan.attributes);
        let waiter = self
            .ctx
            .waiter(Cadence::Slow, &[pending], &[target], timeout);
        wait_for_status(
            &self.ctx.client,
            &path(stream_id, id),
            "/state",
            &waiter,
            "stream alert rule",
        )
        .await
    }

    async fn create_rule(&self, plan: &Resource) -> ProviderResult<State> {
        let stream_id = require(&plan.attributes, "stream_id")?;
        let timeouts = Timeouts::from_attributes(&plan.attributes)?;
        let created = self
            .ctx
            .client
            .post(&collection(stream_id), &build_request(&schema(), &plan.attributes))
            .await
            .map_err(|e| e.context("Failed creating stream alert rule"))?;
        let id = status_at(&created, "/uuid");
        info!("created stream alert rule {} on stream {}", id, stream_id);

        let rule = self
            .wait_settled(stream_id, &id, plan, timeouts.create)
            .await
            .map_err(|e| {
                ProviderError::new(format!("Failed creating stream alert rule {}", id)).with_cause(e)
            })?;
        Ok(to_state(&schema(), &plan.id, &rule, &plan.attributes))
    }

    async fn read_rule(&self, current: &State) -> ProviderResult<Response<State>> {
        let stream_id = require(&current.attributes, "stream_id")?;
        let id = require(&current.attributes, "id")?;
        match self.ctx.client.get(&path(stream_id, id)).await {
            Ok(body) => Ok(Response::ok(to_state(
                &schema(),
                &current.id,
                &body,
                &current.attributes,
            ))),
            Err(e) if e.is_not_found() => Ok(removed(&current.id, "Stream alert rule", id)),
            Err(e) => Err(e.context(format!("Failed retrieving stream alert rule {}", id))),
        }
    }

    async fn update_rule(&self, prior: &State, plan: &Resource) -> ProviderResult<Response<State>> {
        let stream_id = require(&prior.attributes, "stream_id")?;
        let id = require(&prior.attributes, "id")?;
        if !any_changed(&schema(), UPDATABLE, plan, prior) {
            return Ok(unchanged(prior, "stream alert rule"));
        }

        let timeouts = Timeouts::from_attributes(&plan.attributes)?;
        let mut body = build_request(&schema(), &plan.attributes);
        if let Some(map) = body.as_object_mut() {
            map.remove("type");
        }
        self.ctx
            .client
            .put(&path(stream_id, id), &body)
            .await
            .map_err(|e| e.context(format!("Failed updating stream alert rule {}", id)))?;

        let rule = self
            .wait_settled(stream_id, id, plan, timeouts.update)
            .await
            .map_err(|e| {
                ProviderError::new(format!("Failed updating stream alert rule {}", id)).with_cause(e)
            })?;
        Ok(Response::ok(to_state(
            &schema(),
            &prior.id,
            &rule,
            &plan.attributes,
        )))
    }

    async fn delete_rule(&self, current: &State) -> ProviderResult<()> {
        let stream_id = require(&current.attributes, "stream_id")?;
        let id = require(&current.attributes, "id")?;
        let timeouts = Timeouts::from_attributes(&current.attributes)?;
        if let Err(e) = self.ctx.client.delete(&path(stream_id, id)).await
            && !e.is_not_found()
        {
            return Err(e.context(format!("Failed deleting stream alert rule {}", id)));
        }

        let waiter = self.ctx.waiter(
            Cadence::Fast,
            &["ACTIVE"],
            &["INACTIVE", DELETED_MARKER],
            timeouts.delete,
        );
        wait_for_deletion(
            &self.ctx.client,
            &path(stream_id, id),
            "/state",
            &waiter,
            |e| e.is_not_found(),
            "stream alert rule",
        )
        .await
        .map_err(|e| {
            ProviderError::new(format!("Failed deleting stream alert rule {}", id)).with_cause(e)
        })?;
        info!("deleted stream alert rule {}", id);
        Ok(())
    }
}

impl ResourceHandler for StreamAlertRuleResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        schema()
    }

    fn create<'a>(&'a self, plan: &'a Resource) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move { self.create_rule(plan).await.into() })
    }

    fn read<'a>(&'a self, current: &'a State) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move { self.read_rule(current).await.unwrap_or_else(Response::from_error) })
    }

    fn update<'a>(
        &'a self,
        prior: &'a State,
        plan: &'a Resource,
    ) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move {
            self.update_rule(prior, plan)
                .await
                .unwrap_or_else(Response::from_error)
        })
    }

    fn delete<'a>(&'a self, current: &'a State) -> BoxFuture<'a, Response<()>> {
        Box::pin(async move { self.delete_rule(current).await.into() })
    }

    fn import_attributes(&self) -> &'static [&'static str] {
        &["stream_id", "id"]
    }
}

pub(crate) fn data_sources(client: &Arc<FabricClient>) -> Vec<Arc<dyn DataSourceHandler>> {
    vec![
        Arc::new(LookupDataSource {
            type_name: "equinix_fabric_stream_alert_rule",
            client: client.clone(),
            what: "stream alert rule",
            item_schema: schema,
            keys: &["stream_id", "alert_rule_id"],
            path: |keys| path(keys[0], keys[1]),
            post_parse: None,
        }),
        Arc::new(ListDataSource {
            type_name: "equinix_fabric_stream_alert_rules",
            client: client.clone(),
            what: "stream alert rules",
            item_schema: schema,
            params: || {
                vec![
                    AttributeSchema::new("stream_id", AttributeType::String)
                        .required()
                        .with_description("The uuid of the stream that is the target of the stream alert rules"),
                ]
            },
            request: |config| {
                let stream_id = require(&config.attributes, "stream_id")?;
                Ok(ListRequest::Get {
                    path: collection(stream_id),
                    query: page_query(config),
                })
            },
            post_parse: None,
        }),
    ]
}
