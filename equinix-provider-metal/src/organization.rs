//! equinix_metal_organization resource and data source

use std::collections::HashMap;
use std::sync::Arc;

use log::{info, warn};
use serde_json::json;

use equinix_core::diagnostics::Response;
use equinix_core::model::{build_request, build_value, parse_response};
use equinix_core::provider::{
    BoxFuture, DataSourceHandler, ProviderError, ProviderResult, ResourceHandler,
};
use equinix_core::resource::{Resource, ResourceId, State, Value};
use equinix_core::schema::{
    AttributeSchema, AttributeType, FieldNaming, ResourceSchema, Validator, types,
};

use crate::client::MetalClient;
use crate::error::ApiError;

pub const RESOURCE_TYPE: &str = "equinix_metal_organization";

/// Organization fields PUT accepts one by one
const UPDATABLE: &[&str] = &["name", "description", "website", "twitter", "logo"];

const INCLUDE_ADDRESS: (&str, &str) = ("include", "address");

fn string(name: &str) -> AttributeSchema {
    AttributeSchema::new(name, AttributeType::String)
}

fn non_empty(name: &str) -> AttributeSchema {
    string(name)
        .required()
        .with_validator(Validator::StringLength {
            min: 1,
            max: usize::MAX,
        })
}

fn address_attribute() -> AttributeSchema {
    AttributeSchema::new(
        "address",
        AttributeType::Object(vec![
            non_empty("address").with_description("Postal address"),
            non_empty("city").with_description("City name"),
            non_empty("zip_code").with_description("Zip Code"),
            AttributeSchema::new("country", types::country_code())
                .required()
                .with_description("Two letter country code (ISO 3166-1 alpha-2), e.g. US"),
            string("state").optional().with_description("State name"),
        ]),
    )
    .required()
    .with_description("Address information block")
}

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(RESOURCE_TYPE)
        .with_description("Provides a resource to manage organization resource in Equinix Metal")
        .with_field_naming(FieldNaming::SnakeCase)
        .attribute(
            string("id")
                .computed()
                .stable()
                .with_description("The unique identifier for the Organization"),
        )
        .attribute(string("name").required().with_description("The name of the Organization"))
        .attribute(string("description").optional().with_description("Description string"))
        .attribute(string("website").optional().with_description("Website link"))
        .attribute(string("twitter").optional().with_description("Twitter handle"))
        .attribute(string("logo").optional().with_description("Logo URL"))
        .attribute(
            string("created")
                .computed()
                .with_provider_name("created_at")
                .with_description("The timestamp for when the Organization was created"),
        )
        .attribute(
            string("updated")
                .computed()
                .with_provider_name("updated_at")
                .with_description("The timestamp for the last time the Organization was updated"),
        )
        .attribute(address_attribute())
}

fn path(id: &str) -> String {
    format!("organizations/{}", id)
}

fn include_address() -> [(&'static str, String); 1] {
    [(INCLUDE_ADDRESS.0, INCLUDE_ADDRESS.1.to_string())]
}

fn to_state(id: &ResourceId, body: &serde_json::Value) -> State {
    let attributes = parse_response(&schema(), body);
    let org_id = attributes
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    State::existing(id.clone(), attributes).with_identifier(org_id)
}

/// PUT body with only the fields that changed between prior state and plan.
/// A cleared text field is sent as an empty string.
fn update_request(prior: &State, plan: &Resource) -> serde_json::Map<String, serde_json::Value> {
    let schema = schema();
    let changed = |name: &str| {
        schema
            .attributes
            .get(name)
            .is_some_and(|attr| attr.value_changed(plan.get(name), prior.get(name)))
    };
    let mut body = serde_json::Map::new();
    for field in UPDATABLE {
        if changed(field) {
            body.insert(
                field.to_string(),
                json!(plan.get(field).as_str().unwrap_or_default()),
            );
        }
    }
    let address = plan.get("address");
    if !address.is_null() && changed("address") {
        body.insert(
            "address".to_string(),
            build_value(&address_attribute(), FieldNaming::SnakeCase, address),
        );
    }
    body
}

fn require<'a>(attrs: &'a HashMap<String, Value>, name: &str) -> ProviderResult<&'a str> {
    attrs
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProviderError::new(format!("missing required attribute '{}'", name)))
}

pub struct OrganizationResource {
    client: Arc<MetalClient>,
}

impl OrganizationResource {
    pub(crate) fn new(client: Arc<MetalClient>) -> Self {
        Self { client }
    }

    async fn fetch(&self, id: &str) -> Result<serde_json::Value, ApiError> {
        self.client.get(&path(id), &include_address()).await
    }

    async fn create_organization(&self, plan: &Resource) -> ProviderResult<State> {
        let body = build_request(&schema(), &plan.attributes);
        let created = self
            .client
            .post("organizations", &body)
            .await
            .map_err(|e| e.context("Failed to create Organizations"))?;
        let id = created
            .get("id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        info!("created organization {}", id);

        let org = self.fetch(&id).await.map_err(|e| {
            e.context(format!("Could not read Metal Organization with ID {}", id))
        })?;
        Ok(to_state(&plan.id, &org))
    }

    async fn read_organization(&self, current: &State) -> ProviderResult<Response<State>> {
        let id = require(&current.attributes, "id")?;
        match self.fetch(id).await {
            Ok(body) => Ok(Response::ok(to_state(&current.id, &body))),
            Err(e) if e.is_not_found() => {
                warn!("organization {} not found, removing from state", id);
                Ok(Response::warning(
                    State::not_found(current.id.clone()),
                    "Equinix Metal Organization not found during refresh",
                    format!("Organization ({}) not found, removing from state", id),
                ))
            }
            Err(e) => Err(e.context(format!("Could not read Metal Organization with ID {}", id))),
        }
    }

    async fn update_organization(&self, prior: &State, plan: &Resource) -> ProviderResult<State> {
        let id = require(&prior.attributes, "id")?;
        let request = update_request(prior, plan);
        if !request.is_empty() {
            self.client
                .put(&path(id), &request)
                .await
                .map_err(|e| e.context(format!("Could not update Metal Organization with ID {}", id)))?;
        }
        let org = self.fetch(id).await.map_err(|e| {
            e.context(format!("Could not read Metal Organization with ID {}", id))
        })?;
        Ok(to_state(&prior.id, &org))
    }

    async fn delete_organization(&self, current: &State) -> ProviderResult<()> {
        let id = require(&current.attributes, "id")?;
        match self.client.delete(&path(id)).await {
            Ok(_) => {
                info!("deleted organization {}", id);
                Ok(())
            }
            Err(e) if e.has_status(&[403, 404]) => Ok(()),
            Err(e) => Err(e.context(format!("Failed to delete Organizations {}", id))),
        }
    }
}

impl ResourceHandler for OrganizationResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        schema()
    }

    fn create<'a>(&'a self, plan: &'a Resource) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move { self.create_organization(plan).await.into() })
    }

    fn read<'a>(&'a self, current: &'a State) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move {
            self.read_organization(current)
                .await
                .unwrap_or_else(Response::from_error)
        })
    }

    fn update<'a>(
        &'a self,
        prior: &'a State,
        plan: &'a Resource,
    ) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move { self.update_organization(prior, plan).await.into() })
    }

    fn delete<'a>(&'a self, current: &'a State) -> BoxFuture<'a, Response<()>> {
        Box::pin(async move { self.delete_organization(current).await.into() })
    }
}

// ── Data source ─────────────────────────────────────────────────────

pub fn data_source_schema() -> ResourceSchema {
    let address = address_attribute().into_computed().with_description("Business' address");
    ResourceSchema::new(RESOURCE_TYPE)
        .with_field_naming(FieldNaming::SnakeCase)
        .attribute(string("id").computed())
        .attribute(
            string("name")
                .optional()
                .computed()
                .with_description("The organization name"),
        )
        .attribute(
            string("organization_id")
                .optional()
                .computed()
                .local()
                .with_description("The UUID of the organization resource"),
        )
        .attribute(string("description").computed().with_description("Description string"))
        .attribute(string("website").computed().with_description("Website link"))
        .attribute(string("twitter").computed().with_description("Twitter handle"))
        .attribute(string("logo").computed().with_description("Logo URL"))
        .attribute(
            AttributeSchema::new("project_ids", AttributeType::list_of(AttributeType::String))
                .computed()
                .local()
                .with_description("UUIDs of project resources which belong to this organization"),
        )
        .attribute(address)
}

/// Exactly one organization must carry `name`
fn find_by_name<'a>(
    organizations: &'a [serde_json::Value],
    name: &str,
) -> ProviderResult<&'a serde_json::Value> {
    let matches: Vec<&serde_json::Value> = organizations
        .iter()
        .filter(|o| o.get("name").and_then(serde_json::Value::as_str) == Some(name))
        .collect();
    match matches.as_slice() {
        [org] => Ok(org),
        [] => Err(ProviderError::new(format!(
            "no organization found with name {}",
            name
        ))),
        many => Err(ProviderError::new(format!(
            "too many organizations found with name {} (found {}, expected 1)",
            name,
            many.len()
        ))),
    }
}

/// Project ids are the last segment of each project href
fn project_ids(org: &serde_json::Value) -> Value {
    let ids = org
        .get("projects")
        .and_then(serde_json::Value::as_array)
        .map(|projects| {
            projects
                .iter()
                .filter_map(|p| p.get("href").and_then(serde_json::Value::as_str))
                .filter_map(|href| href.trim_end_matches('/').rsplit('/').next())
                .map(Value::string)
                .collect()
        })
        .unwrap_or_default();
    Value::List(ids)
}

pub struct OrganizationDataSource {
    client: Arc<MetalClient>,
}

impl OrganizationDataSource {
    pub(crate) fn new(client: Arc<MetalClient>) -> Self {
        Self { client }
    }

    /// Every organization visible to the token, following `meta.last_page`
    async fn list_all(&self) -> ProviderResult<Vec<serde_json::Value>> {
        let mut organizations = Vec::new();
        let mut page = 1;
        loop {
            let params = [
                (INCLUDE_ADDRESS.0, INCLUDE_ADDRESS.1.to_string()),
                ("page", page.to_string()),
            ];
            let body = self
                .client
                .get("organizations", &params)
                .await
                .map_err(|e| e.context("Failed listing organizations"))?;
            if let Some(items) = body.get("organizations").and_then(serde_json::Value::as_array) {
                organizations.extend(items.iter().cloned());
            }
            let last_page = body
                .pointer("/meta/last_page")
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(page);
            if page >= last_page {
                return Ok(organizations);
            }
            page += 1;
        }
    }

    async fn lookup(&self, config: &Resource) -> ProviderResult<State> {
        let name = config.get_str("name").filter(|s| !s.is_empty());
        let org_id = config.get_str("organization_id").filter(|s| !s.is_empty());

        let org = match (org_id, name) {
            (Some(_), Some(_)) => {
                return Err(ProviderError::new(
                    "organization_id and name cannot be set together",
                ));
            }
            (None, None) => {
                return Err(ProviderError::new("you must supply organization_id or name"));
            }
            (Some(id), None) => self
                .client
                .get(&path(id), &include_address())
                .await
                .map_err(|e| e.context(format!("Failed retrieving organization {}", id)))?,
            (None, Some(name)) => {
                let organizations = self.list_all().await?;
                find_by_name(&organizations, name)?.clone()
            }
        };

        let mut attributes = parse_response(&self.schema(), &org);
        let id = attributes
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        attributes.insert("organization_id".to_string(), Value::string(id.clone()));
        attributes.insert("project_ids".to_string(), project_ids(&org));
        Ok(State::existing(config.id.clone(), attributes).with_identifier(id))
    }
}

impl DataSourceHandler for OrganizationDataSource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        data_source_schema()
    }

    fn read<'a>(&'a self, config: &'a Resource) -> BoxFuture<'a, Response<State>> {
        Box::pin(async move { self.lookup(config).await.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use secrecy::SecretString;
    use wiremock::matchers::{body_json, method, path as url_path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> Arc<MetalClient> {
        Arc::new(
            MetalClient::with_token(&server.uri(), SecretString::from("t"), Duration::from_secs(5))
                .unwrap(),
        )
    }

    fn org_json(id: &str, name: &str) -> serde_json::Value {
        json!({
            "id": id,
            "name": name,
            "description": "ops team",
            "website": "https://example.com",
            "twitter": "@example",
            "logo": "",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-02T00:00:00Z",
            "address": {
                "address": "1 Main St",
                "city": "Springfield",
                "state": "IL",
                "zip_code": "62701",
                "country": "US"
            },
            "projects": [
                {"href": "/metal/v1/projects/p-1"},
                {"href": "/metal/v1/projects/p-2"}
            ]
        })
    }

    fn address() -> Value {
        Value::Map(
            [
                ("address", "1 Main St"),
                ("city", "Springfield"),
                ("zip_code", "62701"),
                ("country", "US"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::string(v)))
            .collect(),
        )
    }

    fn prior_state() -> State {
        to_state(&ResourceId::new(RESOURCE_TYPE, "org"), &org_json("o-1", "Acme"))
    }

    #[tokio::test]
    async fn create_posts_and_reads_back_with_address() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/metal/v1/organizations"))
            .and(body_json(json!({
                "name": "Acme",
                "address": {
                    "address": "1 Main St",
                    "city": "Springfield",
                    "zip_code": "62701",
                    "country": "US"
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "o-1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/metal/v1/organizations/o-1"))
            .and(query_param("include", "address"))
            .respond_with(ResponseTemplate::new(200).set_body_json(org_json("o-1", "Acme")))
            .mount(&server)
            .await;

        let resource = OrganizationResource::new(client(&server));
        let plan = Resource::new(RESOURCE_TYPE, "org")
            .with_attribute("name", "Acme")
            .with_attribute("address", address());
        let state = resource.create(&plan).await.into_result().unwrap();

        assert_eq!(state.identifier.as_deref(), Some("o-1"));
        assert_eq!(state.get_str("created"), Some("2024-01-01T00:00:00Z"));
        assert_eq!(state.get("address").lookup("state"), Some(&Value::string("IL")));
    }

    #[test]
    fn update_request_holds_only_changed_fields() {
        let prior = prior_state();
        let mut plan = Resource::new(RESOURCE_TYPE, "org");
        plan.attributes = prior.attributes.clone();
        plan.attributes.insert("website".to_string(), Value::string("https://acme.io"));

        let body = update_request(&prior, &plan);
        assert_eq!(serde_json::Value::Object(body), json!({"website": "https://acme.io"}));
    }

    #[test]
    fn cleared_fields_are_sent_empty() {
        let prior = prior_state();
        let mut plan = Resource::new(RESOURCE_TYPE, "org");
        plan.attributes = prior.attributes.clone();
        plan.attributes.remove("website");
        plan.attributes.insert("address".to_string(), address());

        let body = serde_json::Value::Object(update_request(&prior, &plan));
        assert_eq!(
            body,
            json!({
                "website": "",
                "address": {
                    "address": "1 Main St",
                    "city": "Springfield",
                    "zip_code": "62701",
                    "country": "US"
                }
            })
        );
    }

    #[test]
    fn address_change_sends_whole_address() {
        let prior = prior_state();
        let mut plan = Resource::new(RESOURCE_TYPE, "org");
        plan.attributes = prior.attributes.clone();
        let mut moved = address();
        if let Value::Map(map) = &mut moved {
            map.insert("city".to_string(), Value::string("Chicago"));
        }
        plan.attributes.insert("address".to_string(), moved);

        let body = serde_json::Value::Object(update_request(&prior, &plan));
        assert_eq!(
            body,
            json!({"address": {
                "address": "1 Main St",
                "city": "Chicago",
                "zip_code": "62701",
                "country": "US"
            }})
        );
    }

    #[tokio::test]
    async fn update_puts_changes_then_reads_back() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(url_path("/metal/v1/organizations/o-1"))
            .and(body_json(json!({"name": "Acme Corp"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(org_json("o-1", "Acme Corp")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/metal/v1/organizations/o-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(org_json("o-1", "Acme Corp")))
            .mount(&server)
            .await;

        let resource = OrganizationResource::new(client(&server));
        let prior = prior_state();
        let mut plan = Resource::new(RESOURCE_TYPE, "org");
        plan.attributes = prior.attributes.clone();
        plan.attributes.insert("name".to_string(), Value::string("Acme Corp"));

        let state = resource.update(&prior, &plan).await.into_result().unwrap();
        assert_eq!(state.get_str("name"), Some("Acme Corp"));
    }

    #[tokio::test]
    async fn missing_organization_is_removed_from_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/metal/v1/organizations/o-1"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": ["Not found"]})))
            .mount(&server)
            .await;

        let resource = OrganizationResource::new(client(&server));
        let response = resource.read(&prior_state()).await;
        assert!(!response.has_error());
        assert!(!response.value.as_ref().unwrap().exists);
        assert_eq!(response.diagnostics.warnings().count(), 1);
    }

    #[tokio::test]
    async fn delete_tolerates_forbidden() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(url_path("/metal/v1/organizations/o-1"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let resource = OrganizationResource::new(client(&server));
        assert!(!resource.delete(&prior_state()).await.has_error());
    }

    #[tokio::test]
    async fn delete_reports_other_failures() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(url_path("/metal/v1/organizations/o-1"))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_json(json!({"errors": ["organization has active projects"]})),
            )
            .mount(&server)
            .await;

        let resource = OrganizationResource::new(client(&server));
        let response = resource.delete(&prior_state()).await;
        let diag = response.diagnostics.errors().next().unwrap();
        assert_eq!(diag.summary, "Failed to delete Organizations o-1");
        assert!(diag.detail.contains("organization has active projects"));
    }

    #[tokio::test]
    async fn data_source_by_id_lists_project_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/metal/v1/organizations/o-1"))
            .and(query_param("include", "address"))
            .respond_with(ResponseTemplate::new(200).set_body_json(org_json("o-1", "Acme")))
            .mount(&server)
            .await;

        let source = OrganizationDataSource::new(client(&server));
        let config = Resource::new(RESOURCE_TYPE, "org")
            .with_read_only(true)
            .with_attribute("organization_id", "o-1");
        let state = source.read(&config).await.into_result().unwrap();

        assert_eq!(state.get_str("name"), Some("Acme"));
        assert_eq!(
            state.get("project_ids"),
            &Value::List(vec![Value::string("p-1"), Value::string("p-2")])
        );
    }

    #[tokio::test]
    async fn data_source_by_name_walks_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/metal/v1/organizations"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "organizations": [org_json("o-1", "Acme")],
                "meta": {"current_page": 1, "last_page": 2}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/metal/v1/organizations"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "organizations": [org_json("o-2", "Globex")],
                "meta": {"current_page": 2, "last_page": 2}
            })))
            .mount(&server)
            .await;

        let source = OrganizationDataSource::new(client(&server));
        let config = Resource::new(RESOURCE_TYPE, "org")
            .with_read_only(true)
            .with_attribute("name", "Globex");
        let state = source.read(&config).await.into_result().unwrap();
        assert_eq!(state.get_str("organization_id"), Some("o-2"));
    }

    #[test]
    fn name_must_match_exactly_one_organization() {
        let orgs = vec![org_json("o-1", "Acme"), org_json("o-2", "Acme")];
        let err = find_by_name(&orgs, "Acme").unwrap_err();
        assert_eq!(
            err.message,
            "too many organizations found with name Acme (found 2, expected 1)"
        );
        let err = find_by_name(&orgs, "Globex").unwrap_err();
        assert_eq!(err.message, "no organization found with name Globex");
    }

    #[tokio::test]
    async fn data_source_needs_id_or_name() {
        let server = MockServer::start().await;
        let source = OrganizationDataSource::new(client(&server));
        let response = source
            .read(&Resource::new(RESOURCE_TYPE, "org").with_read_only(true))
            .await;
        let diag = response.diagnostics.errors().next().unwrap();
        assert_eq!(diag.summary, "you must supply organization_id or name");
    }
}
