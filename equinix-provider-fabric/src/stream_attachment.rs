//! equinix_fabric_stream_attachment resource and data sources
//!
//! Attaches an asset (port, connection, router, ...) to a stream. The
//! attachment is addressed by `streams/{stream_id}/{asset}/{asset_id}`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use serde_json::json;

use equinix_core::diagnostics::Response;
use equinix_core::provider::{
    BoxFuture, DataSourceHandler, ProviderError, ProviderResult, ResourceHandler,
};
use equinix_core::resource::{Resource, State, Value};
use equinix_core::schema::{AttributeSchema, AttributeType, ResourceSchema};
use equinix_core::timeouts::{Timeouts, timeouts_attribute};
use equinix_core::waiter::DELETED_MARKER;

use crate::client::FabricClient;
use crate::common::{
    Cadence, FabricContext, ListDataSource, ListRequest, LookupDataSource, filters_attribute,
    href_attribute, id_attribute, removed, require, search_body, sort_attribute, to_state,
    unchanged, uuid_attribute, wait_for_deletion, wait_for_status,
};
use crate::error::ApiError;

pub const RESOURCE_TYPE: &str = "equinix_fabric_stream_attachment";

pub fn schema() -> ResourceSchema {
    let key = |name: &str, description: &str| {
        AttributeSchema::new(name, AttributeType::String)
            .required()
            .local()
            .force_new()
            .with_description(description)
    };
    ResourceSchema::new(RESOURCE_TYPE)
        .with_description("Fabric V4 API compatible resource allows attachment of Equinix Fabric assets to Streams")
        .attribute(id_attribute())
        .attribute(timeouts_attribute())
        .attribute(key("stream_id", "The uuid of the stream this asset is attached to"))
        .attribute(key(
            "asset",
            "Equinix defined asset category. Matches the product name the asset is a part of",
        ))
        .attribute(key("asset_id", "Equinix defined UUID of the asset being attached to the stream"))
        .attribute(
            AttributeSchema::new("metrics_enabled", AttributeType::Bool)
                .optional()
                .computed()
                .with_description("Boolean value indicating enablement of metrics for this asset stream attachment"),
        )
        .attribute(AttributeSchema::new("type", AttributeType::String).computed())
        .attribute(href_attribute())
        .attribute(uuid_attribute())
        .attribute(AttributeSchema::new("attachment_status", AttributeType::String).computed())
}

fn path(stream_id: &str, asset: &str, asset_id: &str) -> String {
    format!("streams/{}/{}/{}", stream_id, asset, asset_id)
}

/// The assets API answers 400 for a missing attachment as well as 403/404
fn gone(e: &ApiError) -> bool {
    e.has_status(&[400, 403, 404])
}

struct Keys<'a> {
    stream_id: &'a str,
    asset: &'a str,
    asset_id: &'a str,
}

impl<'a> Keys<'a> {
    fn of(attributes: &'a HashMap<String, Value>) -> ProviderResult<Self> {
        Ok(Self {
            stream_id: require(attributes, "stream_id")?,
            asset: require(attributes, "asset")?,
            asset_id: require(attributes, "asset_id")?,
        })
    }

    fn path(&self) -> String {
        path(self.stream_id, self.asset, self.asset_id)
    }
}

pub struct StreamAttachmentResource {
    ctx: FabricContext,
}

impl StreamAttachmentResource {
    pub(crate) fn new(ctx: FabricContext) -> Self {
        Self { ctx }
    }

    async fn attach(&self, keys: &Keys<'_>, metrics_enabled: bool, timeout: Duration) -> ProviderResult<serde_json::Value> {
        self.ctx
            .client
            .put(&keys.path(), &json!({ "metricsEnabled": metrics_enabled }))
            .await
            .map_err(|e| e.context("Failed attaching asset to stream"))?;
        let waiter = self
            .ctx
            .waiter(Cadence::Fast, &["ATTACHING"], &["ATTACHED"], timeout);
        wait_for_status(
            &self.ctx.client,
            &keys.path(),
            "/attachmentStatus",
            &waiter,
            "stream attachment",
        )
        .await
    }

    async fn create_attachment(&self, plan: &Resource) -> ProviderResult<State> {
        let keys = Keys::of(&plan.attributes)?;
        let timeouts = Timeouts::from_attributes(&plan.attributes)?;
        let metrics_enabled = plan.get("metrics_enabled").as_bool().unwrap_or(false);
        let attachment = self
            .attach(&keys, metrics_enabled, timeouts.create)
            .await
            .map_err(|e| ProviderError::new("Failed creating stream attachment").with_cause(e))?;
        info!(
            "attached {} {} to stream {}",
            keys.asset, keys.asset_id, keys.stream_id
        );
        Ok(to_state(&schema(), &plan.id, &attachment, &plan.attributes))
    }

    async fn read_attachment(&self, current: &State) -> ProviderResult<Response<State>> {
        let keys = Keys::of(&current.attributes)?;
        match self.ctx.client.get(&keys.path()).await {
            Ok(body) => Ok(Response::ok(to_state(
                &schema(),
                &current.id,
                &body,
                &current.attributes,
            ))),
            Err(e) if gone(&e) => Ok(removed(&current.id, "Stream attachment", keys.asset_id)),
            Err(e) => Err(e.context(format!(
                "Failed retrieving stream attachment {}",
                keys.asset_id
            ))),
        }
    }

    async fn update_attachment(
        &self,
        prior: &State,
        plan: &Resource,
    ) -> ProviderResult<Response<State>> {
        let planned = plan.get("metrics_enabled");
        if planned.is_null() || planned == prior.get("metrics_enabled") {
            return Ok(unchanged(prior, "stream attachment"));
        }
        let keys = Keys::of(&plan.attributes)?;
        let timeouts = Timeouts::from_attributes(&plan.attributes)?;
        let id = prior.get_str("id").unwrap_or(keys.asset_id);
        let attachment = self
            .attach(&keys, planned.as_bool().unwrap_or(false), timeouts.update)
            .await
            .map_err(|e| {
                ProviderError::new(format!("Failed updating stream attachment {}", id)).with_cause(e)
            })?;
        Ok(Response::ok(to_state(
            &schema(),
            &prior.id,
            &attachment,
            &plan.attributes,
        )))
    }

    async fn delete_attachment(&self, current: &State) -> ProviderResult<()> {
        let keys = Keys::of(&current.attributes)?;
        let timeouts = Timeouts::from_attributes(&current.attributes)?;
        let id = current.get_str("id").unwrap_or(keys.asset_id);
        if let Err(e) = self.ctx.client.delete(&keys.path()).await
            && !gone(&e)
        {
            return Err(e.context(format!("Failed deleting stream attachment {}", id)));
        }

        let waiter = self.ctx.waiter(
            Cadence::Fast,
            &["ATTACHED", "DETACHING"],
            &["DETACHED", DELETED_MARKER],
            timeouts.delete,
        );
        wait_for_deletion(
            &self.ctx.client,
            &keys.path(),
            "/attachmentStatus",
            &waiter,
            gone,
            "stream attachment",
        )
        .await
        .map_err(|e| {
            ProviderError::new(format!("Failed deleting stream attachment {}", id)).with_cause(e)
        })?;
        info!(
            "detached {} {} from stream {}",
            keys.asset, keys.asset_id, keys.stream_id
        );
        Ok(())
    }
}

impl ResourceHandler for StreamAttachmentResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        schema()
    }

    fn create<'a>(&'a self, plan: &'a Resource) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move { self.create_attachment(plan).await.into() })
    }

    fn read<'a>(&'a self, current: &'a State) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move {
            self.read_attachment(current)
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
            self.update_attachment(prior, plan)
                .await
                .unwrap_or_else(Response::from_error)
        })
    }

    fn delete<'a>(&'a self, current: &'a State) -> BoxFuture<'a, Response<()>> {
        Box::pin(async move { self.delete_attachment(current).await.into() })
    }

    fn import_attributes(&self) -> &'static [&'static str] {
        &["stream_id", "asset", "asset_id"]
    }
}

pub(crate) fn data_sources(client: &Arc<FabricClient>) -> Vec<Arc<dyn DataSourceHandler>> {
    vec![
        Arc::new(LookupDataSource {
            type_name: "equinix_fabric_stream_attachment",
            client: client.clone(),
            what: "stream attachment",
            item_schema: schema,
            keys: &["stream_id", "asset", "asset_id"],
            path: |keys| path(keys[0], keys[1], keys[2]),
            post_parse: None,
        }),
        Arc::new(ListDataSource {
            type_name: "equinix_fabric_stream_attachments",
            client: client.clone(),
            what: "stream attachments",
            item_schema: schema,
            params: || vec![filters_attribute(), sort_attribute()],
            request: |config| {
                Ok(ListRequest::Search {
                    path: "streamAssets/search".to_string(),
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
    use equinix_core::resource::ResourceId;
    use wiremock::matchers::{body_json, method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ASSET_PATH: &str = "/fabric/v4/streams/s-1/ports/port-1";

    fn attachment_json(status: &str, metrics: bool) -> serde_json::Value {
        json!({
            "uuid": "port-1",
            "type": "XF_PORT",
            "href": "https://api.equinix.com/fabric/v4/ports/port-1",
            "metricsEnabled": metrics,
            "attachmentStatus": status
        })
    }

    fn plan(metrics: bool) -> Resource {
        Resource::new(RESOURCE_TYPE, "port")
            .with_attribute("stream_id", "s-1")
            .with_attribute("asset", "ports")
            .with_attribute("asset_id", "port-1")
            .with_attribute("metrics_enabled", metrics)
    }

    #[tokio::test]
    async fn create_waits_for_attached() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(url_path(ASSET_PATH))
            .and(body_json(json!({"metricsEnabled": true})))
            .respond_with(ResponseTemplate::new(202).set_body_json(attachment_json("ATTACHING", true)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path(ASSET_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(attachment_json("ATTACHING", true)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path(ASSET_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(attachment_json("ATTACHED", true)))
            .mount(&server)
            .await;

        let resource = StreamAttachmentResource::new(test_context(&server.uri()));
        let state = resource.create(&plan(true)).await.into_result().unwrap();
        assert_eq!(state.get_str("attachment_status"), Some("ATTACHED"));
        assert_eq!(state.get_str("asset"), Some("ports"));
        assert_eq!(state.get("metrics_enabled"), &Value::Bool(true));
    }

    #[tokio::test]
    async fn bad_request_on_read_means_detached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path(ASSET_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!([
                {"errorCode": "EQ-3040001", "errorMessage": "asset not attached"}
            ])))
            .mount(&server)
            .await;

        let resource = StreamAttachmentResource::new(test_context(&server.uri()));
        let state = resource
            .import_state(ResourceId::new(RESOURCE_TYPE, "port"), "s-1/ports/port-1")
            .into_result()
            .unwrap();
        let response = resource.read(&state).await;
        assert!(!response.has_error());
        assert!(!response.value.unwrap().exists);
    }

    #[tokio::test]
    async fn delete_accepts_bad_request_as_gone() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(url_path(ASSET_PATH))
            .respond_with(ResponseTemplate::new(202).set_body_json(attachment_json("DETACHING", false)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path(ASSET_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(attachment_json("DETACHING", false)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path(ASSET_PATH))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let resource = StreamAttachmentResource::new(test_context(&server.uri()));
        let state = resource
            .import_state(ResourceId::new(RESOURCE_TYPE, "port"), "s-1/ports/port-1")
            .into_result()
            .unwrap();
        assert!(!resource.delete(&state).await.has_error());
    }

    #[tokio::test]
    async fn unchanged_metrics_flag_warns() {
        let resource = StreamAttachmentResource::new(test_context("http://127.0.0.1:9"));
        let prior = to_state(
            &schema(),
            &ResourceId::new(RESOURCE_TYPE, "port"),
            &attachment_json("ATTACHED", true),
            &plan(true).attributes,
        );
        let response = resource.update(&prior, &plan(true)).await;
        assert_eq!(response.diagnostics.warnings().count(), 1);
        assert_eq!(response.value.unwrap(), prior);
    }

    #[tokio::test]
    async fn attachments_data_source_searches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/fabric/v4/streamAssets/search"))
            .and(body_json(json!({"pagination": {"offset": 0, "limit": 20}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "pagination": {"offset": 0, "limit": 20, "total": 1},
                "data": [attachment_json("ATTACHED", true)]
            })))
            .mount(&server)
            .await;

        let ctx = test_context(&server.uri());
        let sources = data_sources(&ctx.client);
        let list = sources
            .iter()
            .find(|d| d.type_name() == "equinix_fabric_stream_attachments")
            .unwrap();
        let state = list
            .read(&Resource::new("equinix_fabric_stream_attachments", "all"))
            .await
            .into_result()
            .unwrap();
        let data = state.get("data").as_list().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].lookup("uuid"), Some(&Value::string("port-1")));
        assert_eq!(
            state.get("pagination").lookup("total"),
            Some(&Value::Int(1))
        );
    }
}
