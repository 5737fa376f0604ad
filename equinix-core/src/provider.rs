//! Provider - Traits abstracting resource and data source operations
//!
//! A Provider groups the resource handlers for one API surface (Fabric,
//! Metal). Each handler owns its schema and its CRUD behavior; the shared
//! pieces (validation, import) live here as default trait methods.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::diagnostics::{Diagnostics, Response};
use crate::resource::{Resource, ResourceId, State, Value};
use crate::schema::ResourceSchema;

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub message: String,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Summary used for every "nothing to send" update
pub const NO_UPDATABLE_FIELDS: &str = "No updatable fields have changed";

/// Warning detail for an update that touched only non-updatable fields
pub fn no_updatable_fields_detail(kind: &str) -> String {
    format!(
        "Terraform detected a config change, but it is for a field that isn't updatable for the {} resource. Please revert to prior config",
        kind
    )
}

/// Check a configuration against a schema, one diagnostic per problem
pub fn validate_against(schema: &ResourceSchema, config: &Resource) -> Diagnostics {
    let mut diags = Diagnostics::new();
    if let Err(errors) = schema.validate(&config.attributes) {
        for err in errors {
            diags.add_error(format!("Invalid configuration for {}", schema.resource_type), err.to_string());
        }
    }
    diags
}

/// A managed resource type with a full create/read/update/delete lifecycle
pub trait ResourceHandler: Send + Sync {
    /// Resource type name (e.g., "equinix_fabric_stream")
    fn type_name(&self) -> &'static str;

    /// Attribute schema for this resource type
    fn schema(&self) -> ResourceSchema;

    /// Create the remote object and return its observed state
    fn create<'a>(&'a self, plan: &'a Resource) -> BoxFuture<'a, Response<State>>;

    /// Refresh state. Returns `State::not_found()` when the remote object is gone.
    fn read<'a>(&'a self, current: &'a State) -> BoxFuture<'a, Response<State>>;

    /// Apply the delta between prior state and plan
    fn update<'a>(&'a self, prior: &'a State, plan: &'a Resource)
    -> BoxFuture<'a, Response<State>>;

    /// Delete the remote object
    fn delete<'a>(&'a self, current: &'a State) -> BoxFuture<'a, Response<()>>;

    /// Attribute names encoded in an import id, `/`-separated
    fn import_attributes(&self) -> &'static [&'static str] {
        &["id"]
    }

    fn validate(&self, config: &Resource) -> Diagnostics {
        validate_against(&self.schema(), config)
    }

    /// Build the minimal state an import id describes. A subsequent read
    /// fills in the rest.
    fn import_state(&self, id: ResourceId, import_id: &str) -> Response<State> {
        let names = self.import_attributes();
        let parts: Vec<&str> = import_id.split('/').collect();
        if parts.len() != names.len() || parts.iter().any(|p| p.is_empty()) {
            return Response::error(
                "Unexpected import identifier",
                format!(
                    "expected import identifier with format {}, got: {}",
                    names.join("/"),
                    import_id
                ),
            );
        }
        let attributes = names
            .iter()
            .zip(parts)
            .map(|(name, part)| (name.to_string(), Value::string(part)))
            .collect();
        Response::ok(State::existing(id, attributes).with_identifier(import_id))
    }
}

/// A read-only projection of remote state
pub trait DataSourceHandler: Send + Sync {
    /// Data source type name (e.g., "equinix_fabric_metro")
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    fn read<'a>(&'a self, config: &'a Resource) -> BoxFuture<'a, Response<State>>;

    fn validate(&self, config: &Resource) -> Diagnostics {
        validate_against(&self.schema(), config)
    }
}

/// Main Provider trait
///
/// Each API surface (Fabric, Metal) implements this trait and hands out
/// configured handlers.
pub trait Provider: Send + Sync {
    /// Name of this Provider (e.g., "fabric")
    fn name(&self) -> &'static str;

    /// Resource types this Provider can manage
    fn resources(&self) -> Vec<Arc<dyn ResourceHandler>>;

    /// Data sources this Provider exposes
    fn data_sources(&self) -> Vec<Arc<dyn DataSourceHandler>>;

    fn resource(&self, type_name: &str) -> Option<Arc<dyn ResourceHandler>> {
        self.resources()
            .into_iter()
            .find(|r| r.type_name() == type_name)
    }

    fn data_source(&self, type_name: &str) -> Option<Arc<dyn DataSourceHandler>> {
        self.data_sources()
            .into_iter()
            .find(|d| d.type_name() == type_name)
    }
}

/// Provider implementation for Box<dyn Provider>
/// This enables dynamic dispatch for Providers
impl Provider for Box<dyn Provider> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn resources(&self) -> Vec<Arc<dyn ResourceHandler>> {
        (**self).resources()
    }

    fn data_sources(&self) -> Vec<Arc<dyn DataSourceHandler>> {
        (**self).data_sources()
    }
}
