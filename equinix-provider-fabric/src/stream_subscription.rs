//! equinix_fabric_stream_subscription resource and data sources
//!
//! Subscriptions deliver a stream's events and metrics to an external sink
//! (Splunk, Slack, PagerDuty, Datadog, Teams, ...). Filters are a flat list
//! in configuration; on the wire they are an `{and: [..., {or: [...]}]}`
//! group.

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
    change_log_attribute, filter_group, filters_attribute, flatten_filter_group, href_attribute,
    id_attribute, page_query, removed, require, state_attribute, status_at, to_state, unchanged,
    uuid_attribute, wait_for_deletion, wait_for_status,
};

pub const RESOURCE_TYPE: &str = "equinix_fabric_stream_subscription";

const UPDATABLE: &[&str] = &[
    "name",
    "description",
    "enabled",
    "filters",
    "metric_selector",
    "event_selector",
    "sink",
];

fn selector(name: &str) -> AttributeSchema {
    let strings = || AttributeType::list_of(AttributeType::String);
    AttributeSchema::new(
        name,
        AttributeType::Object(vec![
            AttributeSchema::new("include", strings()).optional(),
            AttributeSchema::new("except", strings()).optional(),
        ]),
    )
    .optional()
}

fn sink() -> AttributeSchema {
    let string = |name: &str| AttributeSchema::new(name, AttributeType::String).optional();
    let credential = AttributeSchema::new(
        "credential",
        AttributeType::Object(vec![
            AttributeSchema::new(
                "type",
                AttributeType::enumeration(&[
                    "ACCESS_TOKEN",
                    "INTEGRATION_KEY",
                    "API_KEY",
                    "USERNAME_PASSWORD",
                ]),
            )
            .required(),
            string("access_token").sensitive(),
            string("integration_key").sensitive(),
            string("api_key").sensitive(),
            string("username"),
            string("password").sensitive(),
        ]),
    )
    .optional();
    let settings = AttributeSchema::new(
        "settings",
        AttributeType::Object(vec![
            string("event_index"),
            string("metric_index"),
            string("source"),
            string("application_key"),
            string("event_uri"),
            string("metric_uri"),
            string("alert_uri"),
            string("change_uri"),
            AttributeSchema::new("transform_alerts", AttributeType::Bool).optional(),
        ]),
    )
    .optional();

    AttributeSchema::new(
        "sink",
        AttributeType::Object(vec![
            string("uri"),
            AttributeSchema::new("type", AttributeType::String).required(),
            AttributeSchema::new("batch_enabled", AttributeType::Bool)
                .optional()
                .computed(),
            AttributeSchema::new("batch_size_max", AttributeType::Int)
                .optional()
                .computed(),
            AttributeSchema::new("batch_wait_time_max", AttributeType::Int)
                .optional()
                .computed(),
            string("host"),
            credential,
            settings,
        ]),
    )
    .required()
    .with_description("Delivery target of the subscription")
}

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(RESOURCE_TYPE)
        .with_description("Fabric V4 API compatible resource allows creation and management of Equinix Fabric Stream Subscriptions")
        .attribute(id_attribute())
        .attribute(timeouts_attribute())
        .attribute(
            AttributeSchema::new("stream_id", AttributeType::String)
                .required()
                .local()
                .force_new()
                .with_description("The uuid of the stream that is the target of the stream subscription"),
        )
        .attribute(
            AttributeSchema::new("type", AttributeType::enumeration(&["STREAM_SUBSCRIPTION"]))
                .required(),
        )
        .attribute(AttributeSchema::new("name", AttributeType::String).required())
        .attribute(AttributeSchema::new("description", AttributeType::String).optional())
        .attribute(
            AttributeSchema::new("enabled", AttributeType::Bool)
                .optional()
                .computed(),
        )
        .attribute(filters_attribute())
        .attribute(selector("metric_selector"))
        .attribute(selector("event_selector"))
        .attribute(sink())
        .attribute(href_attribute())
        .attribute(uuid_attribute())
        .attribute(state_attribute())
        .attribute(change_log_attribute())
}

fn collection(stream_id: &str) -> String {
    format!("streams/{}/subscriptions", stream_id)
}

fn path(stream_id: &str, id: &str) -> String {
    format!("streams/{}/subscriptions/{}", stream_id, id)
}

fn parse_filters(json: &serde_json::Value, attributes: &mut HashMap<String, Value>) {
    let filters = json
        .get("filters")
        .map(flatten_filter_group)
        .unwrap_or(Value::Null);
    attributes.insert("filters".to_string(), filters);
}

/// Request body from planned attributes; `filters` is regrouped
fn request_body(schema: &ResourceSchema, attributes: &HashMap<String, Value>) -> serde_json::Value {
    let mut body = build_request(schema, attributes);
    if let (Some(filters), Some(map)) = (
        attributes.get("filters").and_then(Value::as_list),
        body.as_object_mut(),
    ) {
        map.insert("filters".to_string(), filter_group(filters));
    }
    body
}

pub struct StreamSubscriptionResource {
    ctx: FabricContext,
}

impl StreamSubscriptionResource {
    pub(crate) fn new(ctx: FabricContext) -> Self {
        Self { ctx }
    }

    fn to_state(
        &self,
        id: &equinix_core::resource::ResourceId,
        json: &serde_json::Value,
        previous: &HashMap<String, Value>,
    ) -> State {
        let mut state = to_state(&schema(), id, json, previous);
        parse_filters(json, &mut state.attributes);
        state
    }

    async fn wait_provisioned(
        &self,
        stream_id: &str,
        id: &str,
        timeout: Duration,
    ) -> ProviderResult<serde_json::Value> {
        let waiter = self
            .ctx
            .waiter(Cadence::Fast, &["PROVISIONING"], &["PROVISIONED"], timeout);
        wait_for_status(
            &self.ctx.client,
            &path(stream_id, id),
            "/state",
            &waiter,
            "stream subscription",
        )
        .await
    }

    async fn create_subscription(&self, plan: &Resource) -> ProviderResult<State> {
        let stream_id = require(&plan.attributes, "stream_id")?;
        let timeouts = Timeouts::from_attributes(&plan.attributes)?;
        let body = request_body(&schema(), &plan.attributes);
        let created = self
            .ctx
            .client
            .post(&collection(stream_id), &body)
            .await
            .map_err(|e| e.context("Failed creating stream subscription"))?;
        let id = status_at(&created, "/uuid");
        info!("created stream subscription {} on stream {}", id, stream_id);

        let subscription = self
            .wait_provisioned(stream_id, &id, timeouts.create)
            .await
            .map_err(|e| {
                ProviderError::new(format!("Failed creating stream subscription {}", id))
                    .with_cause(e)
            })?;
        Ok(self.to_state(&plan.id, &subscription, &plan.attributes))
    }

    async fn read_subscription(&self, current: &State) -> ProviderResult<Response<State>> {
        let stream_id = require(&current.attributes, "stream_id")?;
        let id = require(&current.attributes, "id")?;
        match self.ctx.client.get(&path(stream_id, id)).await {
            Ok(body) => Ok(Response::ok(self.to_state(
                &current.id,
                &body,
                &current.attributes,
            ))),
            Err(e) if e.is_not_found() => Ok(removed(&current.id, "Stream subscription", id)),
            Err(e) => Err(e.context(format!("Failed retrieving stream subscription {}", id))),
        }
    }

    async fn update_subscription(
        &self,
        prior: &State,
        plan: &Resource,
    ) -> ProviderResult<Response<State>> {
        let stream_id = require(&prior.attributes, "stream_id")?;
        let id = require(&prior.attributes, "id")?;
        if !any_changed(&schema(), UPDATABLE, plan, prior) {
            return Ok(unchanged(prior, "stream subscription"));
        }

        let timeouts = Timeouts::from_attributes(&plan.attributes)?;
        let mut body = request_body(&schema(), &plan.attributes);
        if let Some(map) = body.as_object_mut() {
            map.remove("type");
        }
        self.ctx
            .client
            .put(&path(stream_id, id), &body)
            .await
            .map_err(|e| e.context(format!("Failed updating stream subscription {}", id)))?;

        let subscription = self
            .wait_provisioned(stream_id, id, timeouts.update)
            .await
            .map_err(|e| {
                ProviderError::new(format!("Failed updating stream subscription {}", id))
                    .with_cause(e)
            })?;
        let mut previous = plan.attributes.clone();
        previous.insert("id".to_string(), Value::string(id));
        Ok(Response::ok(self.to_state(&prior.id, &subscription, &previous)))
    }

    async fn delete_subscription(&self, current: &State) -> ProviderResult<()> {
        let stream_id = require(&current.attributes, "stream_id")?;
        let id = require(&current.attributes, "id")?;
        let timeouts = Timeouts::from_attributes(&current.attributes)?;
        let fail = |e: ProviderError| {
            ProviderError::new(format!("Failed deleting stream subscription {}", id)).with_cause(e)
        };
        if let Err(e) = self.ctx.client.delete(&path(stream_id, id)).await
            && !e.is_not_found()
        {
            return Err(e.context(format!("Failed deleting stream subscription {}", id)));
        }

        let waiter = self.ctx.waiter(
            Cadence::Fast,
            &["DEPROVISIONING"],
            &["DEPROVISIONED", DELETED_MARKER],
            timeouts.delete,
        );
        wait_for_deletion(
            &self.ctx.client,
            &path(stream_id, id),
            "/state",
            &waiter,
            |e| e.is_not_found(),
            "stream subscription",
        )
        .await
        .map_err(fail)?;
        info!("deleted stream subscription {}", id);
        Ok(())
    }
}

impl ResourceHandler for StreamSubscriptionResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        schema()
    }

    fn create<'a>(&'a self, plan: &'a Resource) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move { self.create_subscription(plan).await.into() })
    }

    fn read<'a>(&'a self, current: &'a State) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move {
            self.read_subscription(current)
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
            self.update_subscription(prior, plan)
                .await
                .unwrap_or_else(Response::from_error)
        })
    }

    fn delete<'a>(&'a self, current: &'a State) -> BoxFuture<'a, Response<()>> {
        Box::pin(async move { self.delete_subscription(current).await.into() })
    }

    fn import_attributes(&self) -> &'static [&'static str] {
        &["stream_id", "id"]
    }
}

pub(crate) fn data_sources(client: &Arc<FabricClient>) -> Vec<Arc<dyn DataSourceHandler>> {
    vec![
        Arc::new(LookupDataSource {
            type_name: "equinix_fabric_stream_subscription",
            client: client.clone(),
            what: "stream subscription",
            item_schema: schema,
            keys: &["stream_id", "subscription_id"],
            path: |keys| path(keys[0], keys[1]),
            post_parse: Some(parse_filters),
        }),
        Arc::new(ListDataSource {
            type_name: "equinix_fabric_stream_subscriptions",
            client: client.clone(),
            what: "stream subscriptions",
            item_schema: schema,
            params: || {
                vec![
                    AttributeSchema::new("stream_id", AttributeType::String)
                        .required()
                        .with_description("The uuid of the stream that is the target of the stream subscriptions"),
                ]
            },
            request: |config| {
                let stream_id = require(&config.attributes, "stream_id")?;
                Ok(ListRequest::Get {
                    path: collection(stream_id),
                    query: page_query(config),
                })
            },
            post_parse: Some(parse_filters),
        }),
    ]
}
