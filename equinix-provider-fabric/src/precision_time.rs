//! equinix_fabric_precision_time_service resource and data sources
//!
//! Precision Time (EPT) services deliver NTP or PTP timing over existing
//! Fabric connections. Updates go out as JSON-Patch operations, one
//! request per operation, so that a rejected change does not block the
//! others.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use serde_json::json;

use equinix_core::diagnostics::{Diagnostics, Response};
use equinix_core::model::{build_request, build_value};
use equinix_core::patch::{PatchOp, PatchOpKind};
use equinix_core::provider::{
    BoxFuture, DataSourceHandler, ProviderError, ProviderResult, ResourceHandler,
};
use equinix_core::resource::{Resource, State, Value};
use equinix_core::schema::{
    AttributeSchema, AttributeType, FieldNaming, ResourceSchema, Validator, types,
};
use equinix_core::timeouts::{Timeouts, timeouts_attribute};
use equinix_core::waiter::DELETED_MARKER;

use crate::client::FabricClient;
use crate::common::{
    Cadence, FabricContext, ListDataSource, ListRequest, LookupDataSource, filters_attribute,
    href_attribute, id_attribute, project_attribute, removed, require, search_body,
    sort_attribute, state_attribute, status_at, to_state, unchanged, uuid_attribute,
    wait_for_deletion, wait_for_status,
};

pub const RESOURCE_TYPE: &str = "equinix_fabric_precision_time_service";

fn string(name: &str) -> AttributeSchema {
    AttributeSchema::new(name, AttributeType::String)
}

fn int(name: &str) -> AttributeSchema {
    AttributeSchema::new(name, AttributeType::Int)
}

fn package_attribute() -> AttributeSchema {
    AttributeSchema::new(
        "package",
        AttributeType::Object(vec![
            AttributeSchema::new(
                "code",
                AttributeType::enumeration(&[
                    "NTP_STANDARD",
                    "NTP_ENTERPRISE",
                    "PTP_STANDARD",
                    "PTP_ENTERPRISE",
                ]),
            )
            .required()
            .with_description("Time Precision Package Code for the desired billing package"),
            string("href").optional().computed(),
            string("type").computed(),
            int("bandwidth").computed(),
            int("clients_per_second_max").computed(),
            AttributeSchema::new("redundancy_supported", AttributeType::Bool).computed(),
            AttributeSchema::new("multi_subnet_supported", AttributeType::Bool).computed(),
            string("accuracy_unit").computed(),
            int("accuracy_sla").computed(),
            int("accuracy_avg_min").computed(),
            int("accuracy_avg_max").computed(),
        ]),
    )
    .required()
    .stable()
    .with_description("Precision Time Service Package Details")
}

fn ipv4_attribute() -> AttributeSchema {
    AttributeSchema::new(
        "ipv4",
        AttributeType::Object(vec![
            AttributeSchema::new("primary", types::ipv4())
                .required()
                .with_description("IPv4 address for the Primary Timing Master Server"),
            AttributeSchema::new("secondary", types::ipv4())
                .required()
                .with_description("IPv4 address for the Secondary Timing Master Server"),
            AttributeSchema::new("network_mask", types::ipv4()).required(),
            AttributeSchema::new("default_gateway", types::ipv4()).required(),
        ]),
    )
    .required()
    .with_description("Network IP configuration for the Timing Master Servers")
}

/// MD5 authentication keys for NTP
fn ntp_attribute() -> AttributeSchema {
    AttributeSchema::new(
        "ntp",
        AttributeType::list_of(AttributeType::Object(vec![
            AttributeSchema::new("type", AttributeType::enumeration(&["ASCII", "HEX"])).optional(),
            string("id").optional(),
            string("password").optional().sensitive(),
        ])),
    )
    .optional()
    .computed()
}

fn ptp_attribute() -> AttributeSchema {
    AttributeSchema::new(
        "ptp",
        AttributeType::Object(vec![
            AttributeSchema::new("time_scale", AttributeType::enumeration(&["ARB", "PTP"]))
                .optional()
                .computed(),
            int("domain").optional().computed(),
            int("priority_1").optional().computed(),
            int("priority_2").optional().computed(),
            int("log_announce_interval").optional().computed(),
            int("log_sync_interval").optional().computed(),
            int("log_delay_req_interval").optional().computed(),
            AttributeSchema::new(
                "transport_mode",
                AttributeType::enumeration(&["MULTICAST", "UNICAST", "HYBRID"]),
            )
            .optional()
            .computed(),
            int("grant_time")
                .optional()
                .computed()
                .with_description("Unicast grant time in seconds"),
        ]),
    )
    .optional()
    .computed()
}

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(RESOURCE_TYPE)
        .with_description("Fabric V4 API compatible resource allows creation and management of Equinix Precision Time Services")
        .attribute(id_attribute())
        .attribute(timeouts_attribute())
        .attribute(
            AttributeSchema::new("type", AttributeType::enumeration(&["NTP", "PTP"]))
                .required()
                .force_new(),
        )
        .attribute(
            string("name")
                .required()
                .with_validator(Validator::StringLength { min: 1, max: 24 }),
        )
        .attribute(string("description").optional().stable())
        .attribute(state_attribute())
        .attribute(package_attribute())
        .attribute(
            AttributeSchema::new(
                "connections",
                AttributeType::list_of(AttributeType::Object(vec![
                    string("uuid").required(),
                    string("href").computed(),
                    string("type").computed(),
                ])),
            )
            .required()
            .force_new(),
        )
        .attribute(ipv4_attribute())
        .attribute(
            AttributeSchema::new(
                "advance_configuration",
                AttributeType::Object(vec![ntp_attribute(), ptp_attribute()]),
            )
            .optional()
            .stable(),
        )
        .attribute(project_attribute().force_new())
        .attribute(
            AttributeSchema::new(
                "account",
                AttributeType::Object(vec![
                    int("account_number").computed(),
                    AttributeSchema::new("is_reseller_account", AttributeType::Bool).computed(),
                    string("org_id").computed(),
                    string("global_org_id").computed(),
                ]),
            )
            .computed(),
        )
        .attribute(
            AttributeSchema::new(
                "operation",
                AttributeType::Object(vec![string("operational_status").computed()]),
            )
            .computed(),
        )
        .attribute(href_attribute())
        .attribute(uuid_attribute())
}

fn path(id: &str) -> String {
    format!("timeServices/{}", id)
}

/// Patch op for a structured field, with the value rendered in API field names
fn structured_op(path: &str, attr: &AttributeSchema, old: &Value, new: &Value) -> Option<PatchOp> {
    let op = PatchOp::diff(path, old, new)?;
    let source = if op.op == PatchOpKind::Remove { old } else { new };
    Some(PatchOp::new(
        op.op,
        op.path,
        build_value(attr, FieldNaming::CamelCase, source),
    ))
}

/// One op per changed field. Clearing `advance_configuration` removes
/// whichever of its blocks were set.
fn update_ops(prior: &State, plan: &Resource) -> Vec<PatchOp> {
    let schema = schema();
    let mut ops = Vec::new();

    if let Some(name) = schema.attributes.get("name")
        && name.value_changed(plan.get("name"), prior.get("name"))
        && let Some(op) = PatchOp::diff("/name", prior.get("name"), plan.get("name"))
    {
        ops.push(op);
    }

    let ipv4 = ipv4_attribute();
    if ipv4.value_changed(plan.get("ipv4"), prior.get("ipv4"))
        && let Some(op) = structured_op("/ipv4", &ipv4, prior.get("ipv4"), plan.get("ipv4"))
    {
        ops.push(op);
    }

    let advanced = plan.get("advance_configuration");
    let prior_advanced = prior.get("advance_configuration");
    let cleared = advanced.is_null() && !prior_advanced.is_empty();
    for (attr, path) in [
        (ntp_attribute(), "/advanceConfiguration/ntp"),
        (ptp_attribute(), "/advanceConfiguration/ptp"),
    ] {
        let old = prior_advanced.lookup(&attr.name).unwrap_or(&Value::Null);
        let new = advanced.lookup(&attr.name).unwrap_or(&Value::Null);
        if (cleared || attr.value_changed(new, old))
            && let Some(op) = structured_op(path, &attr, old, new)
        {
            ops.push(op);
        }
    }

    let old_code = prior.get("package").lookup("code").unwrap_or(&Value::Null);
    let new_code = plan.get("package").lookup("code").unwrap_or(&Value::Null);
    if !new_code.is_null()
        && let Some(op) = PatchOp::diff("/package/code", old_code, new_code)
    {
        ops.push(op);
    }

    ops
}

pub struct PrecisionTimeResource {
    ctx: FabricContext,
}

impl PrecisionTimeResource {
    pub(crate) fn new(ctx: FabricContext) -> Self {
        Self { ctx }
    }

    async fn wait_ready(&self, id: &str, timeout: Duration) -> ProviderResult<serde_json::Value> {
        let waiter = self.ctx.waiter(
            Cadence::Fast,
            &["PROVISIONING"],
            &["PROVISIONED", "PENDING_CONFIGURATION"],
            timeout,
        );
        wait_for_status(&self.ctx.client, &path(id), "/state", &waiter, "precision time service")
            .await
    }

    async fn create_service(&self, plan: &Resource) -> ProviderResult<State> {
        let timeouts = Timeouts::from_attributes(&plan.attributes)?;
        let created = self
            .ctx
            .client
            .post("timeServices", &build_request(&schema(), &plan.attributes))
            .await
            .map_err(|e| e.context("Failed creating precision time service"))?;
        let id = status_at(&created, "/uuid");
        info!("created precision time service {}", id);

        let service = self.wait_ready(&id, timeouts.create).await.map_err(|e| {
            ProviderError::new(format!("Failed creating precision time service {}", id))
                .with_cause(e)
        })?;
        Ok(to_state(&schema(), &plan.id, &service, &plan.attributes))
    }

    async fn read_service(&self, current: &State) -> ProviderResult<Response<State>> {
        let id = require(&current.attributes, "id")?;
        match self.ctx.client.get(&path(id)).await {
            Ok(body) => Ok(Response::ok(to_state(
                &schema(),
                &current.id,
                &body,
                &current.attributes,
            ))),
            Err(e) if e.is_not_found() => Ok(removed(&current.id, "Precision time service", id)),
            Err(e) => Err(e.context(format!("Failed retrieving precision time service {}", id))),
        }
    }

    async fn update_service(
        &self,
        prior: &State,
        plan: &Resource,
    ) -> ProviderResult<Response<State>> {
        let id = require(&prior.attributes, "id")?;
        let ops = update_ops(prior, plan);
        if ops.is_empty() {
            return Ok(unchanged(prior, "precision time service"));
        }

        let timeouts = Timeouts::from_attributes(&plan.attributes)?;
        let mut diagnostics = Diagnostics::new();
        for op in ops {
            debug!("patching precision time service {} at {}", id, op.path);
            let target = op.path.clone();
            if let Err(e) = self.ctx.client.patch(&path(id), &[op]).await {
                diagnostics.push(
                    e.context(format!(
                        "Failed updating precision time service {} at {}",
                        id, target
                    ))
                    .into(),
                );
            }
        }

        let service = self.wait_ready(id, timeouts.update).await.map_err(|e| {
            ProviderError::new(format!("Failed updating precision time service {}", id))
                .with_cause(e)
        })?;
        Ok(Response {
            value: Some(to_state(&schema(), &prior.id, &service, &plan.attributes)),
            diagnostics,
        })
    }

    async fn delete_service(&self, current: &State) -> ProviderResult<()> {
        let id = require(&current.attributes, "id")?;
        let timeouts = Timeouts::from_attributes(&current.attributes)?;
        if let Err(e) = self.ctx.client.delete(&path(id)).await
            && !e.is_not_found()
        {
            return Err(e.context(format!("Failed deleting precision time service {}", id)));
        }

        let waiter = self.ctx.waiter(
            Cadence::Fast,
            &[],
            &["DEPROVISIONED", DELETED_MARKER],
            timeouts.delete,
        );
        wait_for_deletion(
            &self.ctx.client,
            &path(id),
            "/state",
            &waiter,
            |e| e.is_not_found(),
            "precision time service",
        )
        .await
        .map_err(|e| {
            ProviderError::new(format!("Failed deleting precision time service {}", id))
                .with_cause(e)
        })?;
        info!("deleted precision time service {}", id);
        Ok(())
    }
}

impl ResourceHandler for PrecisionTimeResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        schema()
    }

    fn create<'a>(&'a self, plan: &'a Resource) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move { self.create_service(plan).await.into() })
    }

    fn read<'a>(&'a self, current: &'a State) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move {
            self.read_service(current)
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
            self.update_service(prior, plan)
                .await
                .unwrap_or_else(Response::from_error)
        })
    }

    fn delete<'a>(&'a self, current: &'a State) -> BoxFuture<'a, Response<()>> {
        Box::pin(async move { self.delete_service(current).await.into() })
    }
}

pub(crate) fn data_sources(client: &Arc<FabricClient>) -> Vec<Arc<dyn DataSourceHandler>> {
    vec![
        Arc::new(LookupDataSource {
            type_name: "equinix_fabric_precision_time_service",
            client: client.clone(),
            what: "precision time service",
            item_schema: schema,
            keys: &["ept_service_id"],
            path: |keys| path(keys[0]),
            post_parse: None,
        }),
        Arc::new(ListDataSource {
            type_name: "equinix_fabric_precision_time_services",
            client: client.clone(),
            what: "precision time services",
            item_schema: schema,
            params: || vec![filters_attribute(), sort_attribute()],
            request: |config| {
                Ok(ListRequest::Search {
                    path: "timeServices/search".to_string(),
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
    use std::collections::HashMap;
    use wiremock::matchers::{body_json, method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EPT_PATH: &str = "/fabric/v4/timeServices/ept-1";

    fn map(pairs: &[(&str, Value)]) -> Value {
        Value::Map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<HashMap<_, _>>(),
        )
    }

    fn service_json(name: &str, code: &str, state: &str) -> serde_json::Value {
        json!({
            "uuid": "ept-1",
            "href": "https://api.equinix.com/fabric/v4/timeServices/ept-1",
            "type": "NTP",
            "name": name,
            "state": state,
            "package": {
                "code": code,
                "href": "https://api.equinix.com/fabric/v4/timeServicePackages/NTP_STANDARD",
                "type": "TIME_SERVICE_PACKAGE",
                "bandwidth": 1,
                "redundancySupported": true
            },
            "connections": [{"uuid": "c-1", "type": "EVPL_VC", "href": "https://api.equinix.com/fabric/v4/connections/c-1"}],
            "ipv4": {
                "primary": "192.168.0.2",
                "secondary": "192.168.0.3",
                "networkMask": "255.255.255.0",
                "defaultGateway": "192.168.0.1"
            },
            "project": {"projectId": "p-1"},
            "account": {"accountNumber": 123, "isResellerAccount": false}
        })
    }

    fn plan(name: &str, code: &str) -> Resource {
        Resource::new(RESOURCE_TYPE, "ntp")
            .with_attribute("type", "NTP")
            .with_attribute("name", name)
            .with_attribute("package", map(&[("code", Value::string(code))]))
            .with_attribute(
                "connections",
                Value::List(vec![map(&[("uuid", Value::string("c-1"))])]),
            )
            .with_attribute(
                "ipv4",
                map(&[
                    ("primary", Value::string("192.168.0.2")),
                    ("secondary", Value::string("192.168.0.3")),
                    ("network_mask", Value::string("255.255.255.0")),
                    ("default_gateway", Value::string("192.168.0.1")),
                ]),
            )
            .with_attribute("project", map(&[("project_id", Value::string("p-1"))]))
    }

    fn prior() -> State {
        to_state(
            &schema(),
            &ResourceId::new(RESOURCE_TYPE, "ntp"),
            &service_json("ept", "NTP_STANDARD", "PROVISIONED"),
            &plan("ept", "NTP_STANDARD").attributes,
        )
    }

    #[tokio::test]
    async fn create_waits_for_provisioned() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/fabric/v4/timeServices"))
            .and(body_json(json!({
                "type": "NTP",
                "name": "ept",
                "package": {"code": "NTP_STANDARD"},
                "connections": [{"uuid": "c-1"}],
                "ipv4": {
                    "primary": "192.168.0.2",
                    "secondary": "192.168.0.3",
                    "networkMask": "255.255.255.0",
                    "defaultGateway": "192.168.0.1"
                },
                "project": {"projectId": "p-1"}
            })))
            .respond_with(
                ResponseTemplate::new(202)
                    .set_body_json(service_json("ept", "NTP_STANDARD", "PROVISIONING")),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path(EPT_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(service_json("ept", "NTP_STANDARD", "PROVISIONING")),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path(EPT_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(service_json("ept", "NTP_STANDARD", "PENDING_CONFIGURATION")),
            )
            .mount(&server)
            .await;

        let resource = PrecisionTimeResource::new(test_context(&server.uri()));
        let state = resource
            .create(&plan("ept", "NTP_STANDARD"))
            .await
            .into_result()
            .unwrap();
        assert_eq!(state.get_str("id"), Some("ept-1"));
        assert_eq!(state.get_str("state"), Some("PENDING_CONFIGURATION"));
        assert_eq!(
            state.get("package").lookup("redundancy_supported"),
            Some(&Value::Bool(true))
        );
    }

    #[tokio::test]
    async fn update_sends_each_op_alone() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(url_path(EPT_PATH))
            .and(body_json(json!([{"op": "replace", "path": "/name", "value": "ept-2"}])))
            .respond_with(ResponseTemplate::new(202).set_body_json(service_json(
                "ept-2",
                "NTP_STANDARD",
                "PROVISIONING",
            )))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(url_path(EPT_PATH))
            .and(body_json(json!([
                {"op": "replace", "path": "/package/code", "value": "NTP_ENTERPRISE"}
            ])))
            .respond_with(ResponseTemplate::new(202).set_body_json(service_json(
                "ept-2",
                "NTP_ENTERPRISE",
                "PROVISIONING",
            )))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path(EPT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(service_json(
                "ept-2",
                "NTP_ENTERPRISE",
                "PROVISIONED",
            )))
            .mount(&server)
            .await;

        let resource = PrecisionTimeResource::new(test_context(&server.uri()));
        let state = resource
            .update(&prior(), &plan("ept-2", "NTP_ENTERPRISE"))
            .await
            .into_result()
            .unwrap();
        assert_eq!(state.get_str("name"), Some("ept-2"));
        assert_eq!(
            state.get("package").lookup("code"),
            Some(&Value::string("NTP_ENTERPRISE"))
        );
    }

    #[tokio::test]
    async fn rejected_op_is_reported_and_others_still_apply() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(url_path(EPT_PATH))
            .and(body_json(json!([{"op": "replace", "path": "/name", "value": "ept-2"}])))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!([
                {"errorCode": "EQ-3045101", "errorMessage": "invalid name"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(url_path(EPT_PATH))
            .and(body_json(json!([
                {"op": "replace", "path": "/package/code", "value": "NTP_ENTERPRISE"}
            ])))
            .respond_with(ResponseTemplate::new(202).set_body_json(service_json(
                "ept",
                "NTP_ENTERPRISE",
                "PROVISIONING",
            )))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path(EPT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(service_json(
                "ept",
                "NTP_ENTERPRISE",
                "PROVISIONED",
            )))
            .mount(&server)
            .await;

        let resource = PrecisionTimeResource::new(test_context(&server.uri()));
        let response = resource
            .update(&prior(), &plan("ept-2", "NTP_ENTERPRISE"))
            .await;
        assert!(response.has_error());
        let diag = response.diagnostics.errors().next().unwrap();
        assert_eq!(diag.summary, "Failed updating precision time service ept-1 at /name");
        assert!(diag.detail.contains("EQ-3045101"));
        assert!(response.value.is_some());
    }

    #[test]
    fn advanced_config_ops_use_api_field_names() {
        let ptp = map(&[
            ("time_scale", Value::string("PTP")),
            ("priority_1", Value::Int(128)),
        ]);
        let plan = plan("ept", "NTP_STANDARD")
            .with_attribute("advance_configuration", map(&[("ptp", ptp)]));
        let ops = update_ops(&prior(), &plan);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op, PatchOpKind::Add);
        assert_eq!(ops[0].path, "/advanceConfiguration/ptp");
        assert_eq!(ops[0].value, json!({"timeScale": "PTP", "priority1": 128}));
    }

    #[test]
    fn clearing_advanced_configuration_removes_its_blocks() {
        let ptp = map(&[("time_scale", Value::string("PTP"))]);
        let mut current = prior();
        current.attributes.insert(
            "advance_configuration".to_string(),
            map(&[("ptp", ptp)]),
        );
        let ops = update_ops(&current, &plan("ept", "NTP_STANDARD"));
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op, PatchOpKind::Remove);
        assert_eq!(ops[0].path, "/advanceConfiguration/ptp");
    }

    #[test]
    fn clearing_an_ntp_key_field_replaces_the_keys() {
        let key = |id: Option<&str>| {
            let mut pairs = vec![("type", Value::string("ASCII"))];
            if let Some(id) = id {
                pairs.push(("id", Value::string(id)));
            }
            Value::List(vec![map(&pairs)])
        };
        let mut current = prior();
        current.attributes.insert(
            "advance_configuration".to_string(),
            map(&[("ntp", key(Some("1")))]),
        );
        let plan = plan("ept", "NTP_STANDARD")
            .with_attribute("advance_configuration", map(&[("ntp", key(None))]));
        let ops = update_ops(&current, &plan);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op, PatchOpKind::Replace);
        assert_eq!(ops[0].value, json!([{"type": "ASCII"}]));
    }

    #[tokio::test]
    async fn unchanged_plan_warns() {
        let resource = PrecisionTimeResource::new(test_context("http://127.0.0.1:9"));
        let response = resource.update(&prior(), &plan("ept", "NTP_STANDARD")).await;
        assert!(!response.has_error());
        assert_eq!(response.diagnostics.warnings().count(), 1);
    }

    #[tokio::test]
    async fn read_keeps_ntp_passwords() {
        let server = MockServer::start().await;
        let mut body = service_json("ept", "NTP_STANDARD", "PROVISIONED");
        body["advanceConfiguration"] = json!({"ntp": [{"type": "ASCII", "id": "1"}]});
        Mock::given(method("GET"))
            .and(url_path(EPT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let key = map(&[
            ("type", Value::string("ASCII")),
            ("id", Value::string("1")),
            ("password", Value::string("secret")),
        ]);
        let mut current = prior();
        current.attributes.insert(
            "advance_configuration".to_string(),
            map(&[("ntp", Value::List(vec![key]))]),
        );

        let resource = PrecisionTimeResource::new(test_context(&server.uri()));
        let state = resource.read(&current).await.into_result().unwrap();
        assert_eq!(
            state
                .get("advance_configuration")
                .lookup("ntp")
                .and_then(Value::as_list)
                .and_then(|keys| keys[0].lookup("password")),
            Some(&Value::string("secret"))
        );
    }

    #[tokio::test]
    async fn missing_service_is_removed_from_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path(EPT_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let resource = PrecisionTimeResource::new(test_context(&server.uri()));
        let response = resource.read(&prior()).await;
        assert!(!response.has_error());
        assert!(!response.value.unwrap().exists);
    }

    #[tokio::test]
    async fn delete_waits_for_deprovisioned() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(url_path(EPT_PATH))
            .respond_with(ResponseTemplate::new(202).set_body_json(service_json(
                "ept",
                "NTP_STANDARD",
                "DEPROVISIONING",
            )))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path(EPT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(service_json(
                "ept",
                "NTP_STANDARD",
                "DEPROVISIONED",
            )))
            .mount(&server)
            .await;

        let resource = PrecisionTimeResource::new(test_context(&server.uri()));
        assert!(!resource.delete(&prior()).await.has_error());
    }

    #[tokio::test]
    async fn delete_polls_through_intermediate_states() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(url_path(EPT_PATH))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path(EPT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(service_json(
                "ept",
                "NTP_STANDARD",
                "PROVISIONED",
            )))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path(EPT_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let resource = PrecisionTimeResource::new(test_context(&server.uri()));
        assert!(!resource.delete(&prior()).await.has_error());
    }
}
