//! equinix_fabric_connection resource and data sources
//!
//! Connections join two access points (ports, service profiles, cloud
//! routers, networks, ...). Name and bandwidth are updated in place, one
//! patch per field, each followed by a wait on the change record. AWS
//! connections additionally get their access/secret keys pushed once the
//! provider side is awaiting approval.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::json;

use equinix_core::diagnostics::{Diagnostics, Response};
use equinix_core::model::{build_request, value_to_json};
use equinix_core::patch::{PatchOp, PatchOpKind};
use equinix_core::provider::{
    BoxFuture, DataSourceHandler, ProviderError, ProviderResult, ResourceHandler,
};
use equinix_core::resource::{Resource, State, Value};
use equinix_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Validator};
use equinix_core::timeouts::{Timeouts, timeouts_attribute};
use equinix_core::waiter::DELETED_MARKER;

use crate::client::FabricClient;
use crate::common::{
    Cadence, FabricContext, ListDataSource, ListRequest, LookupDataSource, account_attribute,
    change_attribute, change_log_attribute, filters_attribute, href_attribute, id_attribute,
    project_attribute, removed, require, search_body, sort_attribute, state_attribute, status_at,
    to_state, unchanged, uuid_attribute, wait_for_deletion, wait_for_status,
};

pub const RESOURCE_TYPE: &str = "equinix_fabric_connection";

/// Returned when deleting a connection that is already gone
const ALREADY_DELETED_CODE: &str = "EQ-3142509";

const CONNECTION_TYPES: &[&str] = &[
    "EVPL_VC",
    "EPL_VC",
    "IP_VC",
    "IPWAN_VC",
    "ACCESS_EPL_VC",
    "EVPLAN_VC",
    "EPLAN_VC",
    "EIA_VC",
    "IA_VC",
    "EC_VC",
];

fn timeouts_default() -> Timeouts {
    Timeouts {
        read: Duration::from_secs(10 * 60),
        ..Timeouts::uniform(Duration::from_secs(15 * 60))
    }
}

fn string(name: &str) -> AttributeSchema {
    AttributeSchema::new(name, AttributeType::String)
}

fn object(name: &str, fields: Vec<AttributeSchema>) -> AttributeSchema {
    AttributeSchema::new(name, AttributeType::Object(fields))
}

/// `{uuid, href}` reference to another Fabric object
fn reference(name: &str) -> AttributeSchema {
    object(name, vec![string("uuid").optional(), string("href").computed()]).optional()
}

fn location_attribute() -> AttributeSchema {
    object(
        "location",
        vec![
            string("region").optional().computed(),
            string("metro_name").optional().computed(),
            string("metro_code").optional().computed(),
            string("ibx").optional().computed(),
        ],
    )
    .optional()
    .computed()
}

fn port_attribute() -> AttributeSchema {
    object(
        "port",
        vec![
            string("uuid").optional().computed(),
            string("href").computed(),
            string("name").computed(),
            object(
                "redundancy",
                vec![
                    AttributeSchema::new("enabled", AttributeType::Bool).computed(),
                    string("group").computed(),
                    string("priority").computed(),
                ],
            )
            .computed(),
        ],
    )
    .optional()
}

fn profile_attribute() -> AttributeSchema {
    object(
        "profile",
        vec![
            AttributeSchema::new(
                "type",
                AttributeType::enumeration(&[
                    "L2_PROFILE",
                    "L3_PROFILE",
                    "ECIA_PROFILE",
                    "ECMC_PROFILE",
                    "IA_PROFILE",
                ]),
            )
            .required(),
            string("uuid").required(),
            string("href").computed(),
            string("name").computed(),
            string("description").computed(),
            AttributeSchema::new(
                "access_point_type_configs",
                AttributeType::list_of(AttributeType::Object(vec![
                    string("type").computed(),
                    string("uuid").computed(),
                ])),
            )
            .computed(),
        ],
    )
    .optional()
    .with_description("Service Profile")
}

fn link_protocol_attribute() -> AttributeSchema {
    let tag = |name: &str| AttributeSchema::new(name, AttributeType::Int).optional().computed();
    object(
        "link_protocol",
        vec![
            AttributeSchema::new(
                "type",
                AttributeType::enumeration(&["UNTAGGED", "DOT1Q", "QINQ", "EVPN_VXLAN"]),
            )
            .optional(),
            tag("vlan_tag"),
            tag("vlan_s_tag"),
            tag("vlan_c_tag"),
        ],
    )
    .optional()
}

fn access_point_attribute() -> AttributeSchema {
    object(
        "access_point",
        vec![
            AttributeSchema::new(
                "type",
                AttributeType::enumeration(&[
                    "COLO",
                    "VD",
                    "VG",
                    "SP",
                    "IGW",
                    "SUBNET",
                    "CLOUD_ROUTER",
                    "NETWORK",
                    "METAL_NETWORK",
                ]),
            )
            .optional(),
            account_attribute().optional(),
            location_attribute(),
            port_attribute(),
            profile_attribute(),
            reference("router").with_description("Cloud Router access point information"),
            link_protocol_attribute(),
            object(
                "virtual_device",
                vec![
                    string("uuid").optional(),
                    string("type").optional(),
                    string("name").optional(),
                    string("href").computed(),
                ],
            )
            .optional(),
            object(
                "interface",
                vec![
                    string("uuid").optional(),
                    AttributeSchema::new("id", AttributeType::Int).optional().computed(),
                    string("type").optional(),
                ],
            )
            .optional(),
            reference("network"),
            string("seller_region").optional(),
            AttributeSchema::new(
                "peering_type",
                AttributeType::enumeration(&["PRIVATE", "MICROSOFT", "PUBLIC", "MANUAL"]),
            )
            .optional(),
            string("authentication_key").optional().sensitive(),
            string("provider_connection_id").computed(),
        ],
    )
    .optional()
    .with_description("Point of access details")
}

fn key_value_list(name: &str) -> AttributeSchema {
    AttributeSchema::new(
        name,
        AttributeType::list_of(AttributeType::Object(vec![
            string("key").optional(),
            string("value").optional(),
        ])),
    )
    .optional()
}

fn side_attribute(name: &str, description: &str) -> AttributeSchema {
    object(
        name,
        vec![
            object(
                "service_token",
                vec![
                    AttributeSchema::new("type", AttributeType::enumeration(&["VC_TOKEN"]))
                        .optional(),
                    string("uuid").optional(),
                    string("href").computed(),
                    string("description").computed(),
                ],
            )
            .optional(),
            access_point_attribute(),
            key_value_list("additional_info"),
        ],
    )
    .required()
    .force_new()
    .with_description(description)
}

fn notifications_attribute() -> AttributeSchema {
    AttributeSchema::new(
        "notifications",
        AttributeType::list_of(AttributeType::Object(vec![
            AttributeSchema::new(
                "type",
                AttributeType::enumeration(&[
                    "NOTIFICATION",
                    "BANDWIDTH_ALERT",
                    "CONNECTION_APPROVAL",
                    "PROFILE_LIFECYCLE",
                    "ALL",
                    "SALES_REP_NOTIFICATIONS",
                ]),
            )
            .required(),
            string("send_interval").optional(),
            AttributeSchema::new("emails", AttributeType::list_of(AttributeType::String))
                .required(),
        ])),
    )
    .required()
    .with_description("Preferences for notifications on connection configuration or status changes")
}

fn operation_attribute() -> AttributeSchema {
    object(
        "operation",
        vec![
            string("provider_status").computed(),
            string("equinix_status").computed(),
            AttributeSchema::new(
                "errors",
                AttributeType::list_of(AttributeType::Object(vec![
                    string("error_code").computed(),
                    string("error_message").computed(),
                    string("correlation_id").computed(),
                    string("details").computed(),
                    string("help").computed(),
                ])),
            )
            .computed(),
        ],
    )
    .computed()
    .with_description("Connection type-specific operational data")
}

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(RESOURCE_TYPE)
        .with_description("Fabric V4 API compatible resource allows creation and management of Equinix Fabric connection")
        .attribute(id_attribute())
        .attribute(timeouts_attribute())
        .attribute(
            AttributeSchema::new("type", AttributeType::enumeration(CONNECTION_TYPES))
                .required()
                .force_new(),
        )
        .attribute(
            string("name")
                .required()
                .with_validator(Validator::StringLength { min: 1, max: 24 }),
        )
        .attribute(string("description").optional())
        .attribute(
            AttributeSchema::new("bandwidth", AttributeType::Int)
                .required()
                .with_description("Connection bandwidth in Mbps"),
        )
        .attribute(
            object(
                "order",
                vec![
                    string("purchase_order_number").optional(),
                    string("billing_tier").optional(),
                    string("order_id").optional(),
                    string("order_number").optional(),
                ],
            )
            .optional()
            .stable(),
        )
        .attribute(notifications_attribute())
        .attribute(
            object(
                "redundancy",
                vec![
                    string("group").optional().computed(),
                    AttributeSchema::new(
                        "priority",
                        AttributeType::enumeration(&["PRIMARY", "SECONDARY"]),
                    )
                    .optional()
                    .computed(),
                ],
            )
            .optional()
            .force_new(),
        )
        .attribute(side_attribute(
            "a_side",
            "Requester or Customer side connection configuration object of the multi-segment connection",
        ))
        .attribute(side_attribute(
            "z_side",
            "Destination or Provider side connection configuration object of the multi-segment connection",
        ))
        .attribute(project_attribute())
        .attribute(key_value_list("additional_info").with_description("Connection additional information"))
        .attribute(href_attribute())
        .attribute(uuid_attribute())
        .attribute(state_attribute())
        .attribute(operation_attribute())
        .attribute(account_attribute())
        .attribute(change_attribute())
        .attribute(change_log_attribute())
        .attribute(AttributeSchema::new("is_remote", AttributeType::Bool).computed())
        .attribute(string("direction").computed())
}

fn path(id: &str) -> String {
    format!("connections/{}", id)
}

/// The `accessKey`/`secretKey` pair from `additional_info`, when both are set
fn aws_secrets(additional_info: &Value) -> Option<Vec<Value>> {
    let secrets: Vec<Value> = additional_info
        .as_list()
        .unwrap_or_default()
        .iter()
        .filter(|item| {
            matches!(
                item.lookup("key").and_then(Value::as_str),
                Some("accessKey" | "secretKey")
            )
        })
        .cloned()
        .collect();
    (secrets.len() == 2).then_some(secrets)
}

fn secrets_op(secrets: &[Value]) -> PatchOp {
    let secrets: Vec<serde_json::Value> = secrets.iter().map(value_to_json).collect();
    PatchOp::add("", json!({ "additionalInfo": secrets }))
}

pub struct ConnectionResource {
    ctx: FabricContext,
}

impl ConnectionResource {
    pub(crate) fn new(ctx: FabricContext) -> Self {
        Self { ctx }
    }

    /// Whether the z-side service profile declares custom fields; only then
    /// does the API accept `additionalInfo` on create
    async fn profile_takes_additional_info(&self, plan: &Resource) -> bool {
        let Some(uuid) = plan
            .get("z_side")
            .lookup("access_point.profile.uuid")
            .and_then(Value::as_str)
        else {
            return false;
        };
        match self.ctx.client.get(&format!("serviceProfiles/{}", uuid)).await {
            Ok(profile) => profile
                .get("customFields")
                .and_then(serde_json::Value::as_array)
                .is_some_and(|fields| !fields.is_empty()),
            Err(e) => {
                warn!("could not read service profile {}: {}", uuid, e);
                false
            }
        }
    }

    async fn wait_state(
        &self,
        id: &str,
        pending: &[&str],
        target: &[&str],
        timeout: Duration,
    ) -> ProviderResult<serde_json::Value> {
        let waiter = self.ctx.waiter(Cadence::Slow, pending, target, timeout);
        wait_for_status(&self.ctx.client, &path(id), "/state", &waiter, "connection").await
    }

    async fn wait_provider_provisioned(
        &self,
        id: &str,
        timeout: Duration,
    ) -> ProviderResult<serde_json::Value> {
        let waiter = self.ctx.waiter(
            Cadence::Slow,
            &["PENDING_APPROVAL", "PROVISIONING"],
            &["PROVISIONED"],
            timeout,
        );
        wait_for_status(
            &self.ctx.client,
            &path(id),
            "/operation/providerStatus",
            &waiter,
            "connection",
        )
        .await
    }

    async fn wait_change_completed(
        &self,
        id: &str,
        timeout: Duration,
    ) -> ProviderResult<serde_json::Value> {
        let waiter = self
            .ctx
            .waiter(Cadence::Slow, &[], &["COMPLETED"], timeout);
        wait_for_status(&self.ctx.client, &path(id), "/change/status", &waiter, "connection").await
    }

    async fn create_connection(&self, plan: &Resource) -> ProviderResult<State> {
        let timeouts = Timeouts::from_attributes_or(&plan.attributes, timeouts_default())?;
        let mut request = build_request(&schema(), &plan.attributes);
        if let Some(body) = request.as_object_mut()
            && body.contains_key("additionalInfo")
            && !self.profile_takes_additional_info(plan).await
        {
            body.remove("additionalInfo");
        }

        let created = self
            .ctx
            .client
            .post("connections", &request)
            .await
            .map_err(|e| e.context("Failed creating connection"))?;
        let id = status_at(&created, "/uuid");
        info!("created connection {}", id);

        let mut connection = self
            .wait_state(
                &id,
                &["PROVISIONING"],
                &["PENDING", "PROVISIONED", "ACTIVE"],
                timeouts.create,
            )
            .await
            .map_err(|e| {
                ProviderError::new(format!("Failed waiting for connection {} to be created", id))
                    .with_cause(e)
            })?;

        if let Some(secrets) = aws_secrets(plan.get("additional_info")) {
            self.ctx
                .client
                .patch(&path(&id), &[secrets_op(&secrets)])
                .await
                .map_err(|e| e.context(format!("Failed sending AWS secrets for connection {}", id)))?;
            connection = self
                .wait_provider_provisioned(&id, timeouts.create)
                .await
                .map_err(|e| {
                    ProviderError::new(format!("Failed waiting for AWS approval of connection {}", id))
                        .with_cause(e)
                })?;
        }

        Ok(to_state(&schema(), &plan.id, &connection, &plan.attributes))
    }

    async fn read_connection(&self, current: &State) -> ProviderResult<Response<State>> {
        let id = require(&current.attributes, "id")?;
        match self.ctx.client.get(&path(id)).await {
            Ok(body) => Ok(Response::ok(to_state(
                &schema(),
                &current.id,
                &body,
                &current.attributes,
            ))),
            Err(e) if e.is_not_found() => Ok(removed(&current.id, "Connection", id)),
            Err(e) => Err(e.context(format!("Failed retrieving connection {}", id))),
        }
    }

    async fn update_connection(
        &self,
        prior: &State,
        plan: &Resource,
    ) -> ProviderResult<Response<State>> {
        let id = require(&prior.attributes, "id")?;
        let timeouts = Timeouts::from_attributes_or(&plan.attributes, timeouts_default())?;

        // Changes are computed against the live object, which must have
        // settled first
        let mut latest = self
            .wait_state(id, &[], &["ACTIVE", "PROVISIONED", "PENDING"], timeouts.update)
            .await
            .map_err(|e| {
                ProviderError::new(format!("Failed fetching connection {} for update", id))
                    .with_cause(e)
            })?;

        let mut ops = Vec::new();
        if let Some(name) = plan.get_str("name")
            && latest.get("name").and_then(serde_json::Value::as_str) != Some(name)
        {
            ops.push(PatchOp::replace("/name", json!(name)));
        }
        if let Some(bandwidth) = plan.get("bandwidth").as_i64()
            && latest.get("bandwidth").and_then(serde_json::Value::as_i64) != Some(bandwidth)
        {
            ops.push(PatchOp::replace("/bandwidth", json!(bandwidth)));
        }
        if status_at(&latest, "/operation/providerStatus") == "PENDING_APPROVAL"
            && let Some(secrets) = aws_secrets(plan.get("additional_info"))
        {
            ops.push(secrets_op(&secrets));
        }
        if ops.is_empty() {
            return Ok(unchanged(prior, "connection"));
        }

        let mut diagnostics = Diagnostics::new();
        for op in ops {
            let kind = op.op;
            let target = if op.path.is_empty() { "additionalInfo".to_string() } else { op.path.clone() };
            debug!("patching connection {} at {}", id, target);
            if let Err(e) = self.ctx.client.patch(&path(id), &[op]).await {
                diagnostics.push(
                    e.context(format!("Failed updating connection {} at {}", id, target))
                        .into(),
                );
                continue;
            }

            let waited = match kind {
                PatchOpKind::Add => self.wait_provider_provisioned(id, timeouts.update).await,
                _ => self.wait_change_completed(id, timeouts.update).await,
            };
            match waited {
                Ok(connection) => latest = connection,
                Err(e) => diagnostics.push(
                    ProviderError::new(format!(
                        "Failed waiting for connection {} update at {}",
                        id, target
                    ))
                    .with_cause(e)
                    .into(),
                ),
            }
        }

        Ok(Response {
            value: Some(to_state(&schema(), &prior.id, &latest, &plan.attributes)),
            diagnostics,
        })
    }

    async fn delete_connection(&self, current: &State) -> ProviderResult<()> {
        let id = require(&current.attributes, "id")?;
        let timeouts = Timeouts::from_attributes_or(&current.attributes, timeouts_default())?;
        if let Err(e) = self.ctx.client.delete(&path(id)).await {
            if e.has_error_code(ALREADY_DELETED_CODE) {
                info!("connection {} was already deleted", id);
                return Ok(());
            }
            if !e.is_not_found() {
                return Err(e.context(format!("Failed deleting connection {}", id)));
            }
        }

        let waiter = self.ctx.waiter(
            Cadence::Slow,
            &["DEPROVISIONING", "ACTIVE", "PENDING"],
            &["DEPROVISIONED", DELETED_MARKER],
            timeouts.delete,
        );
        wait_for_deletion(
            &self.ctx.client,
            &path(id),
            "/state",
            &waiter,
            |e| e.is_not_found(),
            "connection",
        )
        .await
        .map_err(|e| {
            ProviderError::new(format!("Failed waiting for connection {} deletion", id))
                .with_cause(e)
        })?;
        info!("deleted connection {}", id);
        Ok(())
    }
}

impl ResourceHandler for ConnectionResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        schema()
    }

    fn create<'a>(&'a self, plan: &'a Resource) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move { self.create_connection(plan).await.into() })
    }

    fn read<'a>(&'a self, current: &'a State) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move {
            self.read_connection(current)
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
            self.update_connection(prior, plan)
                .await
                .unwrap_or_else(Response::from_error)
        })
    }

    fn delete<'a>(&'a self, current: &'a State) -> BoxFuture<'a, Response<()>> {
        Box::pin(async move { self.delete_connection(current).await.into() })
    }
}

pub(crate) fn data_sources(client: &Arc<FabricClient>) -> Vec<Arc<dyn DataSourceHandler>> {
    vec![
        Arc::new(LookupDataSource {
            type_name: "equinix_fabric_connection",
            client: client.clone(),
            what: "connection",
            item_schema: schema,
            keys: &["connection_id"],
            path: |keys| path(keys[0]),
            post_parse: None,
        }),
        Arc::new(ListDataSource {
            type_name: "equinix_fabric_connections",
            client: client.clone(),
            what: "connections",
            item_schema: schema,
            params: || vec![filters_attribute(), sort_attribute()],
            request: |config| {
                Ok(ListRequest::Search {
                    path: "connections/search".to_string(),
                    body: search_body(config),
                })
            },
            post_parse: None,
        }),
    ]
}
