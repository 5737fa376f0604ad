//! Shared schema groups and handler plumbing for Fabric resources

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use serde_json::json;

use equinix_core::diagnostics::Response;
use equinix_core::model::{parse_object, parse_response};
use equinix_core::provider::{
    BoxFuture, DataSourceHandler, NO_UPDATABLE_FIELDS, ProviderError, ProviderResult,
    no_updatable_fields_detail,
};
use equinix_core::resource::{Resource, ResourceId, State, Value};
use equinix_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Validator};
use equinix_core::waiter::{DELETED_MARKER, StateWaiter};

use crate::client::FabricClient;
use crate::error::ApiError;

/// Page size used when a list data source leaves `limit` unset
pub(crate) const DEFAULT_LIMIT: i64 = 20;

// ── Handler context ─────────────────────────────────────────────────

/// How long waiters sleep between polls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Pacing {
    /// Delays the Fabric API expects between status checks
    #[default]
    Api,
    /// Poll back-to-back; for mocked endpoints
    Immediate,
}

/// Waiter delay and poll interval pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cadence {
    /// 30s delay, 30s interval
    Slow,
    /// 10s delay, 5s interval
    Fast,
}

/// Client plus polling behavior shared by every Fabric handler
#[derive(Debug, Clone)]
pub(crate) struct FabricContext {
    pub client: Arc<FabricClient>,
    pub pacing: Pacing,
}

impl FabricContext {
    pub fn new(client: Arc<FabricClient>, pacing: Pacing) -> Self {
        Self { client, pacing }
    }

    pub fn waiter(
        &self,
        cadence: Cadence,
        pending: &[&str],
        target: &[&str],
        timeout: Duration,
    ) -> StateWaiter {
        let (delay, interval) = match (self.pacing, cadence) {
            (Pacing::Immediate, _) => (Duration::ZERO, Duration::from_millis(10)),
            (Pacing::Api, Cadence::Slow) => (Duration::from_secs(30), Duration::from_secs(30)),
            (Pacing::Api, Cadence::Fast) => (Duration::from_secs(10), Duration::from_secs(5)),
        };
        StateWaiter::new(pending.iter().copied(), target.iter().copied())
            .with_delay(delay)
            .with_min_interval(interval)
            .with_timeout(timeout)
    }
}

// ── Schema groups ───────────────────────────────────────────────────

fn string(name: &str) -> AttributeSchema {
    AttributeSchema::new(name, AttributeType::String)
}

fn computed_strings(names: &[&str]) -> Vec<AttributeSchema> {
    names.iter().map(|n| string(n).computed()).collect()
}

/// Terraform-side identifier; mirrors `uuid`
pub(crate) fn id_attribute() -> AttributeSchema {
    string("id")
        .stable()
        .local()
        .with_description("The unique identifier of the resource")
}

pub(crate) fn href_attribute() -> AttributeSchema {
    string("href").stable()
}

pub(crate) fn uuid_attribute() -> AttributeSchema {
    string("uuid")
        .stable()
        .with_description("Equinix assigned unique identifier")
}

pub(crate) fn state_attribute() -> AttributeSchema {
    string("state").computed()
}

pub(crate) fn change_log_attribute() -> AttributeSchema {
    let mut fields = Vec::new();
    for prefix in ["created", "updated", "deleted"] {
        fields.extend(computed_strings(&[
            &format!("{prefix}_by"),
            &format!("{prefix}_by_full_name"),
            &format!("{prefix}_by_email"),
            &format!("{prefix}_date_time"),
        ]));
    }
    AttributeSchema::new("change_log", AttributeType::Object(fields))
        .computed()
        .with_description("Details of the last change on the resource")
}

/// `{project_id}`; optional on create, filled in by the API otherwise
pub(crate) fn project_attribute() -> AttributeSchema {
    AttributeSchema::new(
        "project",
        AttributeType::Object(vec![string("project_id").required()]),
    )
    .optional()
    .computed()
}

pub(crate) fn account_attribute() -> AttributeSchema {
    AttributeSchema::new(
        "account",
        AttributeType::Object(vec![
            AttributeSchema::new("account_number", AttributeType::Int).computed(),
            string("account_name").computed(),
            AttributeSchema::new("org_id", AttributeType::Int).computed(),
            string("organization_name").computed(),
            string("global_org_id").computed(),
            string("global_organization_name").computed(),
            AttributeSchema::new("global_cust_id", AttributeType::String).computed(),
            string("ucm_id").computed(),
        ]),
    )
    .computed()
}

/// Pending change record returned by asynchronous updates
pub(crate) fn change_attribute() -> AttributeSchema {
    AttributeSchema::new(
        "change",
        AttributeType::Object(computed_strings(&["uuid", "type", "href"])),
    )
    .computed()
}

pub(crate) fn pagination_attribute() -> AttributeSchema {
    AttributeSchema::new(
        "pagination",
        AttributeType::Object(vec![
            AttributeSchema::new("offset", AttributeType::Int)
                .optional()
                .computed()
                .with_validator(Validator::IntRange {
                    min: 0,
                    max: i64::MAX,
                }),
            AttributeSchema::new("limit", AttributeType::Int)
                .optional()
                .computed()
                .with_validator(Validator::IntRange { min: 1, max: 100 }),
            AttributeSchema::new("total", AttributeType::Int).computed(),
            string("next").computed(),
            string("previous").computed(),
        ]),
    )
    .optional()
    .computed()
    .with_description("Pagination request and response details")
}

/// Search filters; entries with `or = true` are grouped into one OR clause
pub(crate) fn filters_attribute() -> AttributeSchema {
    AttributeSchema::new(
        "filters",
        AttributeType::list_of(AttributeType::Object(vec![
            string("property").required(),
            string("operator").required(),
            AttributeSchema::new("values", AttributeType::list_of(AttributeType::String))
                .required(),
            AttributeSchema::new("or", AttributeType::Bool).optional(),
        ])),
    )
    .optional()
    .with_validator(Validator::ListLength { min: 1, max: 10 })
}

pub(crate) fn sort_attribute() -> AttributeSchema {
    AttributeSchema::new(
        "sort",
        AttributeType::list_of(AttributeType::Object(vec![
            AttributeSchema::new("direction", AttributeType::enumeration(&["DESC", "ASC"]))
                .optional(),
            string("property").optional(),
        ])),
    )
    .optional()
}

// ── Request helpers ─────────────────────────────────────────────────

/// `(offset, limit)` from a `pagination` block
pub(crate) fn page(config: &Resource) -> (i64, i64) {
    let pagination = config.get("pagination");
    let offset = pagination
        .lookup("offset")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let limit = pagination
        .lookup("limit")
        .and_then(Value::as_i64)
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_LIMIT);
    (offset, limit)
}

pub(crate) fn page_query(config: &Resource) -> Vec<(&'static str, String)> {
    let (offset, limit) = page(config);
    vec![("offset", offset.to_string()), ("limit", limit.to_string())]
}

fn expression(filter: &Value) -> serde_json::Value {
    let values: Vec<&str> = filter
        .lookup("values")
        .and_then(Value::as_list)
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    json!({
        "property": filter.lookup("property").and_then(Value::as_str).unwrap_or_default(),
        "operator": filter.lookup("operator").and_then(Value::as_str).unwrap_or_default(),
        "values": values,
    })
}

/// `{and: [expr, ..., {or: [expr, ...]}]}` from a flat filter list
pub(crate) fn filter_group(filters: &[Value]) -> serde_json::Value {
    let mut and = Vec::new();
    let mut or = Vec::new();
    for filter in filters {
        if filter.lookup("or").and_then(Value::as_bool).unwrap_or(false) {
            or.push(expression(filter));
        } else {
            and.push(expression(filter));
        }
    }
    if !or.is_empty() {
        and.push(json!({ "or": or }));
    }
    json!({ "and": and })
}

/// Flatten an `{and: [...]}` group back into filter entries, marking
/// members of OR clauses with `or = true`
pub(crate) fn flatten_filter_group(json: &serde_json::Value) -> Value {
    let Some(and) = json.get("and").and_then(serde_json::Value::as_array) else {
        return Value::Null;
    };
    let entry = |expr: &serde_json::Value, or: bool| {
        let mut map = HashMap::new();
        for key in ["property", "operator"] {
            let v = expr.get(key).and_then(serde_json::Value::as_str);
            map.insert(key.to_string(), v.map(Value::string).unwrap_or(Value::Null));
        }
        let values = expr
            .get("values")
            .and_then(serde_json::Value::as_array)
            .map(|vs| {
                Value::List(
                    vs.iter()
                        .filter_map(serde_json::Value::as_str)
                        .map(Value::string)
                        .collect(),
                )
            })
            .unwrap_or(Value::Null);
        map.insert("values".to_string(), values);
        map.insert("or".to_string(), Value::Bool(or));
        Value::Map(map)
    };
    let mut filters = Vec::new();
    for item in and {
        match item.get("or").and_then(serde_json::Value::as_array) {
            Some(group) => filters.extend(group.iter().map(|expr| entry(expr, true))),
            None => filters.push(entry(item, false)),
        }
    }
    Value::List(filters)
}

/// Search request body: `{filter: {and: [...]}, pagination, sort}`
pub(crate) fn search_body(config: &Resource) -> serde_json::Value {
    let (offset, limit) = page(config);
    let mut body = serde_json::Map::new();
    body.insert("pagination".into(), json!({"offset": offset, "limit": limit}));

    if let Some(filters) = config.get("filters").as_list().filter(|f| !f.is_empty()) {
        body.insert("filter".into(), filter_group(filters));
    }

    if let Some(sort) = config.get("sort").as_list().filter(|s| !s.is_empty()) {
        let criteria: Vec<serde_json::Value> = sort
            .iter()
            .map(|s| {
                let mut c = serde_json::Map::new();
                for key in ["direction", "property"] {
                    if let Some(v) = s.lookup(key).and_then(Value::as_str) {
                        c.insert(key.into(), json!(v));
                    }
                }
                serde_json::Value::Object(c)
            })
            .collect();
        body.insert("sort".into(), serde_json::Value::Array(criteria));
    }

    serde_json::Value::Object(body)
}

// ── State helpers ───────────────────────────────────────────────────

/// Status string at a JSON pointer (e.g. `/state`, `/change/status`)
pub(crate) fn status_at(json: &serde_json::Value, pointer: &str) -> String {
    json.pointer(pointer)
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Project a response through the schema into state. Local attributes and
/// secrets the API does not echo come from `previous`; `id` mirrors `uuid`.
pub(crate) fn to_state(
    schema: &ResourceSchema,
    id: &ResourceId,
    json: &serde_json::Value,
    previous: &HashMap<String, Value>,
) -> State {
    let mut attributes = parse_response(schema, json);
    equinix_core::model::carry_forward(schema, &mut attributes, previous);
    let uuid = attributes
        .get("uuid")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default();
    attributes.insert("id".to_string(), Value::string(uuid.clone()));
    State::existing(id.clone(), attributes).with_identifier(uuid)
}

/// Whether any of the named top-level attributes changed
pub(crate) fn any_changed(
    schema: &ResourceSchema,
    fields: &[&str],
    plan: &Resource,
    prior: &State,
) -> bool {
    fields.iter().any(|field| {
        schema
            .attributes
            .get(*field)
            .is_some_and(|attr| attr.value_changed(plan.get(field), prior.get(field)))
    })
}

/// Read answered "gone": drop from state with a warning
pub(crate) fn removed(id: &ResourceId, what: &str, key: &str) -> Response<State> {
    warn!("{} {} not found, removing from state", what, key);
    Response::warning(
        State::not_found(id.clone()),
        format!("{} not found", what),
        format!("{} {} no longer exists and was removed from state", what, key),
    )
}

/// Update with nothing updatable: keep the prior state and warn
pub(crate) fn unchanged(prior: &State, what: &str) -> Response<State> {
    Response::warning(
        prior.clone(),
        NO_UPDATABLE_FIELDS,
        no_updatable_fields_detail(what),
    )
}

/// Required string attribute; validation normally rejects its absence first
pub(crate) fn require<'a>(attrs: &'a HashMap<String, Value>, name: &str) -> ProviderResult<&'a str> {
    attrs
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProviderError::new(format!("missing required attribute '{}'", name)))
}

// ── Polling ─────────────────────────────────────────────────────────

/// Poll `path` until the status at `pointer` reaches the waiter's target
pub(crate) async fn wait_for_status(
    client: &FabricClient,
    path: &str,
    pointer: &str,
    waiter: &StateWaiter,
    what: &str,
) -> ProviderResult<serde_json::Value> {
    let body = waiter
        .wait(|| async move {
            let body = client
                .get(path)
                .await
                .map_err(|e| e.context(format!("Failed retrieving {}", what)))?;
            let status = status_at(&body, pointer);
            Ok::<_, ProviderError>((body, status))
        })
        .await?;
    Ok(body)
}

/// Poll `path` until the object reaches a deleted status or `gone` accepts
/// the read error, which reports [`DELETED_MARKER`]
pub(crate) async fn wait_for_deletion(
    client: &FabricClient,
    path: &str,
    pointer: &str,
    waiter: &StateWaiter,
    gone: fn(&ApiError) -> bool,
    what: &str,
) -> ProviderResult<()> {
    waiter
        .wait(|| async move {
            match client.get(path).await {
                Ok(body) => Ok(((), status_at(&body, pointer))),
                Err(e) if gone(&e) => Ok(((), DELETED_MARKER.to_string())),
                Err(e) => Err(e.context(format!("Failed retrieving {}", what))),
            }
        })
        .await?;
    Ok(())
}

// ── Data sources ────────────────────────────────────────────────────

/// Resource attributes as a data source exposes them: read-only, without
/// local attributes
fn exposed_attributes(schema: &ResourceSchema) -> Vec<AttributeSchema> {
    let mut attrs: Vec<AttributeSchema> = schema
        .attributes
        .values()
        .filter(|a| !a.local)
        .cloned()
        .map(AttributeSchema::into_computed)
        .collect();
    attrs.sort_by(|a, b| a.name.cmp(&b.name));
    attrs
}

/// Fix-up applied to each parsed object for fields whose wire shape
/// differs from the attribute shape
pub(crate) type PostParse = fn(&serde_json::Value, &mut HashMap<String, Value>);

/// Single object looked up by identifier attributes
pub(crate) struct LookupDataSource {
    pub type_name: &'static str,
    pub client: Arc<FabricClient>,
    /// Human-readable name used in messages (e.g. "stream subscription")
    pub what: &'static str,
    pub item_schema: fn() -> ResourceSchema,
    /// Required identifier attributes, in path order
    pub keys: &'static [&'static str],
    pub path: fn(&[&str]) -> String,
    pub post_parse: Option<PostParse>,
}

impl LookupDataSource {
    async fn lookup(&self, config: &Resource) -> ProviderResult<State> {
        let keys = self
            .keys
            .iter()
            .map(|k| require(&config.attributes, k))
            .collect::<ProviderResult<Vec<&str>>>()?;
        let body = self
            .client
            .get(&(self.path)(&keys))
            .await
            .map_err(|e| e.context(format!("Failed retrieving {}", self.what)))?;

        let schema = self.schema();
        let mut attributes = parse_response(&schema, &body);
        if let Some(post_parse) = self.post_parse {
            post_parse(&body, &mut attributes);
        }
        for key in self.keys {
            attributes.insert(key.to_string(), config.get(key).clone());
        }
        // Objects without a uuid (e.g. metros) are identified by their key
        let id = Some(status_at(&body, "/uuid"))
            .filter(|uuid| !uuid.is_empty())
            .unwrap_or_else(|| keys.join("/"));
        attributes.insert("id".to_string(), Value::string(id.clone()));
        Ok(State::existing(config.id.clone(), attributes).with_identifier(id))
    }
}

impl DataSourceHandler for LookupDataSource {
    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn schema(&self) -> ResourceSchema {
        let item = (self.item_schema)();
        let mut schema = ResourceSchema::new(self.type_name)
            .with_field_naming(item.naming)
            .attributes(exposed_attributes(&item))
            .attribute(id_attribute());
        for key in self.keys {
            schema = schema.attribute(string(key).required().local());
        }
        schema
    }

    fn read<'a>(&'a self, config: &'a Resource) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move { self.lookup(config).await.into() })
    }
}

/// How a list data source fetches a page
pub(crate) enum ListRequest {
    Get {
        path: String,
        query: Vec<(&'static str, String)>,
    },
    Search {
        path: String,
        body: serde_json::Value,
    },
}

/// Page of objects with `data` and `pagination` outputs
pub(crate) struct ListDataSource {
    pub type_name: &'static str,
    pub client: Arc<FabricClient>,
    /// Plural name used in messages (e.g. "streams")
    pub what: &'static str,
    pub item_schema: fn() -> ResourceSchema,
    /// Input attributes besides `pagination`
    pub params: fn() -> Vec<AttributeSchema>,
    pub request: fn(&Resource) -> ProviderResult<ListRequest>,
    pub post_parse: Option<PostParse>,
}

impl ListDataSource {
    async fn list(&self, config: &Resource) -> ProviderResult<State> {
        let body = match (self.request)(config)? {
            ListRequest::Get { path, query } => self.client.get_with_query(&path, &query).await,
            ListRequest::Search { path, body } => self.client.post(&path, &body).await,
        }
        .map_err(|e| e.context(format!("Failed retrieving {}", self.what)))?;

        let data = body
            .get("data")
            .and_then(serde_json::Value::as_array)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| {
                ProviderError::new(format!("no data retrieved by {} data source", self.what))
                    .with_cause(EmptyPage(self.what))
            })?;

        let item = (self.item_schema)();
        let item_attrs = exposed_attributes(&item);
        let items = data
            .iter()
            .map(|entry| {
                let mut attrs = parse_object(&item_attrs, item.naming, entry);
                if let Some(post_parse) = self.post_parse {
                    post_parse(entry, &mut attrs);
                }
                Value::Map(attrs)
            })
            .collect();

        let mut attributes = config.attributes.clone();
        attributes.insert("data".to_string(), Value::List(items));
        if let Some(pagination) = body.get("pagination") {
            let schema = pagination_attribute();
            if let AttributeType::Object(fields) = &schema.attr_type {
                attributes.insert(
                    "pagination".to_string(),
                    Value::Map(parse_object(fields, item.naming, pagination)),
                );
            }
        }
        let id = format!("{}-{}", self.type_name, page(config).0);
        attributes.insert("id".to_string(), Value::string(id.clone()));
        Ok(State::existing(config.id.clone(), attributes).with_identifier(id))
    }
}

#[derive(Debug, thiserror::Error)]
#[error(
    "either the account does not have any {0} data to pull or the combination of limit and offset needs to be updated"
)]
struct EmptyPage(&'static str);

impl DataSourceHandler for ListDataSource {
    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn schema(&self) -> ResourceSchema {
        let item = (self.item_schema)();
        ResourceSchema::new(self.type_name)
            .with_field_naming(item.naming)
            .attributes((self.params)())
            .attribute(pagination_attribute())
            .attribute(
                AttributeSchema::new(
                    "data",
                    AttributeType::list_of(AttributeType::Object(exposed_attributes(&item))),
                )
                .computed(),
            )
            .attribute(string("id").computed())
    }

    fn read<'a>(&'a self, config: &'a Resource) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move { self.list(config).await.into() })
    }
}

#[cfg(test)]
pub(crate) fn test_context(uri: &str) -> FabricContext {
    use secrecy::SecretString;

    let client = FabricClient::with_token(uri, SecretString::from("test-token"), Duration::from_secs(5))
        .unwrap_or_else(|e| panic!("mock endpoint should parse: {e}"));
    FabricContext::new(Arc::new(client), Pacing::Immediate)
}
