//! Schema - Define attribute schemas for resources and data sources
//!
//! Each resource type declares its attributes once. The same declaration
//! drives validation, plan computation, and the mapping between attribute
//! names and API field names.

use std::collections::HashMap;
use std::fmt;

use heck::{ToLowerCamelCase, ToSnakeCase};

use crate::resource::{State, Value};

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    /// String
    String,
    /// Integer
    Int,
    /// Floating point number
    Float,
    /// Boolean
    Bool,
    /// Enum (list of allowed values)
    Enum(Vec<String>),
    /// Custom type (with validation function)
    Custom {
        name: String,
        base: Box<AttributeType>,
        validate: fn(&Value) -> Result<(), String>,
    },
    /// List
    List(Box<AttributeType>),
    /// Map
    Map(Box<AttributeType>),
    /// Single nested object
    Object(Vec<AttributeSchema>),
}

impl AttributeType {
    pub fn enumeration(variants: &[&str]) -> Self {
        AttributeType::Enum(variants.iter().map(|v| v.to_string()).collect())
    }

    pub fn list_of(inner: AttributeType) -> Self {
        AttributeType::List(Box::new(inner))
    }

    /// Check if a value conforms to this type
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        match (self, value) {
            // Null is "unset"; required-ness is checked by the owning schema
            (_, Value::Null) => Ok(()),
            (AttributeType::String, Value::String(_)) => Ok(()),
            (AttributeType::Int, Value::Int(_)) => Ok(()),
            (AttributeType::Float, Value::Float(_) | Value::Int(_)) => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(variants), Value::String(s)) => {
                if variants.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: variants.clone(),
                    })
                }
            }

            (AttributeType::Custom { validate, base, .. }, v) => {
                base.validate(v)?;
                validate(v).map_err(|msg| TypeError::ValidationFailed { message: msg })
            }

            (AttributeType::List(inner), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Map(inner), Value::Map(map)) => {
                for (k, v) in map {
                    inner.validate(v).map_err(|e| TypeError::MapValueError {
                        key: k.clone(),
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Object(attributes), Value::Map(map)) => {
                for attr in attributes {
                    let value = map.get(&attr.name).unwrap_or(&Value::Null);
                    attr.validate_value(value).map_err(|e| TypeError::MapValueError {
                        key: attr.name.clone(),
                        inner: Box::new(e),
                    })?;
                }
                if let Some(unknown) = map
                    .keys()
                    .find(|k| !attributes.iter().any(|a| &a.name == *k))
                {
                    return Err(TypeError::UnknownAttribute {
                        name: unknown.clone(),
                    });
                }
                Ok(())
            }

            _ => Err(TypeError::TypeMismatch {
                expected: self.type_name(),
                got: value.type_name(),
            }),
        }
    }

    fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Float => "Float".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Enum(variants) => format!("Enum({})", variants.join(" | ")),
            AttributeType::Custom { name, .. } => name.clone(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
            AttributeType::Object(_) => "Object".to_string(),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Type error
#[derive(Debug, Clone, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid enum variant '{value}', expected one of: {}", expected.join(", "))]
    InvalidEnumVariant {
        value: String,
        expected: Vec<String>,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Required attribute '{name}' is missing")]
    MissingRequired { name: String },

    #[error("Unknown attribute '{name}'")]
    UnknownAttribute { name: String },

    #[error("Attribute '{name}' is read-only and cannot be configured")]
    ReadOnly { name: String },

    #[error("List item at index {index}: {inner}")]
    ListItemError { index: usize, inner: Box<TypeError> },

    #[error("Map value for key '{key}': {inner}")]
    MapValueError { key: String, inner: Box<TypeError> },
}

/// Value constraint checked after the type check passes
#[derive(Debug, Clone, PartialEq)]
pub enum Validator {
    /// String length bounds (inclusive, in characters)
    StringLength { min: usize, max: usize },
    /// Integer range (inclusive)
    IntRange { min: i64, max: i64 },
    /// List length bounds (inclusive)
    ListLength { min: usize, max: usize },
}

impl Validator {
    fn check(&self, value: &Value) -> Result<(), String> {
        match (self, value) {
            (Validator::StringLength { min, max }, Value::String(s)) => {
                let len = s.chars().count();
                if len < *min || len > *max {
                    return Err(format!(
                        "string length must be between {} and {}, got {}",
                        min, max, len
                    ));
                }
                Ok(())
            }
            (Validator::IntRange { min, max }, Value::Int(n)) => {
                if n < min || n > max {
                    return Err(format!("value must be between {} and {}, got {}", min, max, n));
                }
                Ok(())
            }
            (Validator::ListLength { min, max }, Value::List(items)) => {
                if items.len() < *min || items.len() > *max {
                    return Err(format!(
                        "list must contain between {} and {} items, got {}",
                        min,
                        max,
                        items.len()
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Rule altering how an attribute's planned value is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanModifier {
    /// Keep the prior value when the configuration leaves the attribute unset
    UseStateForUnknown,
    /// A change to this attribute replaces the resource instead of updating it
    RequiresReplace,
}

/// How attribute names map onto API field names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldNaming {
    /// `change_log` -> `changeLog` (Fabric v4)
    #[default]
    CamelCase,
    /// `zip_code` -> `zip_code` (Metal)
    SnakeCase,
}

impl FieldNaming {
    pub fn apply(&self, name: &str) -> String {
        match self {
            FieldNaming::CamelCase => name.to_lower_camel_case(),
            FieldNaming::SnakeCase => name.to_snake_case(),
        }
    }
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    pub sensitive: bool,
    /// Lives only in provider state; never sent to or read from the API
    pub local: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
    /// API field name when it differs from the naming convention
    pub provider_name: Option<String>,
    pub validators: Vec<Validator>,
    pub plan_modifiers: Vec<PlanModifier>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            optional: false,
            computed: false,
            sensitive: false,
            local: false,
            default: None,
            description: None,
            provider_name: None,
            validators: Vec::new(),
            plan_modifiers: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Optional attribute. Combined with `computed()` the API may fill it in.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Value is produced by the API
    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = Some(name.into());
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn with_plan_modifier(mut self, modifier: PlanModifier) -> Self {
        self.plan_modifiers.push(modifier);
        self
    }

    /// Shorthand for `RequiresReplace`
    pub fn force_new(self) -> Self {
        self.with_plan_modifier(PlanModifier::RequiresReplace)
    }

    /// Shorthand for a computed attribute that keeps its prior value
    pub fn stable(self) -> Self {
        self.computed()
            .with_plan_modifier(PlanModifier::UseStateForUnknown)
    }

    /// Read-only copy, recursively through nested objects and lists of
    /// objects. Data sources expose resource attributes this way.
    pub fn into_computed(mut self) -> Self {
        self.required = false;
        self.optional = false;
        self.computed = true;
        self.default = None;
        self.validators.clear();
        self.plan_modifiers.clear();
        self.attr_type = match self.attr_type {
            AttributeType::Object(nested) => {
                AttributeType::Object(nested.into_iter().map(Self::into_computed).collect())
            }
            AttributeType::List(inner) => match *inner {
                AttributeType::Object(nested) => AttributeType::list_of(AttributeType::Object(
                    nested.into_iter().map(Self::into_computed).collect(),
                )),
                other => AttributeType::list_of(other),
            },
            other => other,
        };
        self
    }

    /// Whether a configuration may set this attribute
    pub fn is_configurable(&self) -> bool {
        self.required || self.optional || !self.computed
    }

    /// Whether a planned value differs from the prior one. An unset plan
    /// value keeps the prior one only for computed attributes; clearing
    /// anything else that was set is a change. Objects compare field by
    /// field, so computed fields the plan leaves out are ignored.
    pub fn value_changed(&self, plan: &Value, prior: &Value) -> bool {
        if plan.is_null() {
            return !self.computed && !prior.is_empty();
        }
        match (&self.attr_type, plan) {
            (AttributeType::Object(fields), Value::Map(planned)) => {
                let previous = prior.as_map();
                fields
                    .iter()
                    .filter(|field| field.is_configurable())
                    .any(|field| {
                        field.value_changed(
                            planned.get(&field.name).unwrap_or(&Value::Null),
                            previous
                                .and_then(|map| map.get(&field.name))
                                .unwrap_or(&Value::Null),
                        )
                    })
            }
            _ => plan != prior,
        }
    }

    pub fn has_modifier(&self, modifier: PlanModifier) -> bool {
        self.plan_modifiers.contains(&modifier)
    }

    /// API field name under the given naming convention
    pub fn api_name(&self, naming: FieldNaming) -> String {
        self.provider_name
            .clone()
            .unwrap_or_else(|| naming.apply(&self.name))
    }

    fn validate_value(&self, value: &Value) -> Result<(), TypeError> {
        if value.is_null() {
            if self.required && self.default.is_none() {
                return Err(TypeError::MissingRequired {
                    name: self.name.clone(),
                });
            }
            return Ok(());
        }
        self.attr_type.validate(value)?;
        for validator in &self.validators {
            validator
                .check(value)
                .map_err(|message| TypeError::ValidationFailed {
                    message: format!("{}: {}", self.name, message),
                })?;
        }
        Ok(())
    }
}

/// Result of planning a configuration against prior state
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedChange {
    /// Planned attribute values
    pub attributes: HashMap<String, Value>,
    /// Configurable attributes whose planned value differs from prior state
    pub changed: Vec<String>,
    /// Changed attributes that force replacement
    pub requires_replace: Vec<String>,
}

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: HashMap<String, AttributeSchema>,
    pub description: Option<String>,
    pub naming: FieldNaming,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: HashMap::new(),
            description: None,
            naming: FieldNaming::default(),
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    /// Add every attribute of a shared attribute group
    pub fn attributes(mut self, schemas: impl IntoIterator<Item = AttributeSchema>) -> Self {
        for schema in schemas {
            self.attributes.insert(schema.name.clone(), schema);
        }
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_field_naming(mut self, naming: FieldNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Attribute names in stable order
    pub fn attribute_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.attributes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Validate configured attributes
    pub fn validate(&self, attributes: &HashMap<String, Value>) -> Result<(), Vec<TypeError>> {
        let mut errors = Vec::new();

        for name in self.attribute_names() {
            let schema = &self.attributes[name];
            let value = attributes.get(name).unwrap_or(&Value::Null);
            if !schema.is_configurable() && !value.is_null() {
                errors.push(TypeError::ReadOnly {
                    name: name.to_string(),
                });
                continue;
            }
            if let Err(e) = schema.validate_value(value) {
                errors.push(e);
            }
        }

        let mut unknown: Vec<&String> = attributes
            .keys()
            .filter(|k| !self.attributes.contains_key(*k))
            .collect();
        unknown.sort();
        errors.extend(
            unknown
                .into_iter()
                .map(|name| TypeError::UnknownAttribute { name: name.clone() }),
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Compute planned values from configuration and prior state, applying
    /// defaults and plan modifiers
    pub fn plan(&self, prior: Option<&State>, config: &HashMap<String, Value>) -> PlannedChange {
        let mut attributes = HashMap::new();
        let mut changed = Vec::new();
        let mut requires_replace = Vec::new();

        for name in self.attribute_names() {
            let schema = &self.attributes[name];
            let configured = config.get(name).filter(|v| !v.is_null());
            let prior_value = prior.map(|s| s.get(name)).unwrap_or(&Value::Null);

            let planned = match configured {
                Some(v) if schema.is_configurable() => {
                    fill_computed(&schema.attr_type, v.clone(), prior_value)
                }
                _ if schema.is_configurable() && schema.default.is_some() => {
                    schema.default.clone().unwrap_or(Value::Null)
                }
                _ if schema.computed
                    && (schema.has_modifier(PlanModifier::UseStateForUnknown)
                        || !schema.is_configurable()
                        || schema.optional) =>
                {
                    prior_value.clone()
                }
                _ => schema.default.clone().unwrap_or(Value::Null),
            };

            if prior.is_some()
                && schema.is_configurable()
                && schema.value_changed(&planned, prior_value)
            {
                changed.push(name.to_string());
                if schema.has_modifier(PlanModifier::RequiresReplace) {
                    requires_replace.push(name.to_string());
                }
            }

            if !planned.is_null() {
                attributes.insert(name.to_string(), planned);
            }
        }

        PlannedChange {
            attributes,
            changed,
            requires_replace,
        }
    }
}

/// Copy prior values of computed nested attributes the configuration
/// leaves unset. List items are matched by position.
fn fill_computed(attr_type: &AttributeType, planned: Value, prior: &Value) -> Value {
    match (attr_type, planned, prior) {
        (AttributeType::Object(nested), Value::Map(mut map), Value::Map(prior_map)) => {
            for attr in nested {
                let prior_value = prior_map.get(&attr.name).unwrap_or(&Value::Null);
                let value = map.remove(&attr.name).unwrap_or(Value::Null);
                let value = match value {
                    Value::Null if attr.computed => prior_value.clone(),
                    v => fill_computed(&attr.attr_type, v, prior_value),
                };
                if !value.is_null() {
                    map.insert(attr.name.clone(), value);
                }
            }
            Value::Map(map)
        }
        (AttributeType::List(inner), Value::List(items), Value::List(prior_items)) => Value::List(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| fill_computed(inner, item, prior_items.get(i).unwrap_or(&Value::Null)))
                .collect(),
        ),
        (_, planned, _) => planned,
    }
}

/// Helper functions for common types
pub mod types {
    use std::sync::LazyLock;

    use regex::Regex;

    use super::*;

    static COUNTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)^[a-z]{2}$").unwrap_or_else(|_| unreachable!("country pattern is valid"))
    });

    /// IPv4 address type (e.g., "192.168.0.1")
    pub fn ipv4() -> AttributeType {
        AttributeType::Custom {
            name: "Ipv4".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| match value {
                Value::String(s) => s
                    .parse::<std::net::Ipv4Addr>()
                    .map(|_| ())
                    .map_err(|_| format!("Invalid IPv4 address '{}'", s)),
                _ => Err("Expected string".to_string()),
            },
        }
    }

    /// Two letter country code (ISO 3166-1 alpha-2), e.g. "US"
    pub fn country_code() -> AttributeType {
        AttributeType::Custom {
            name: "CountryCode".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| match value {
                Value::String(s) if COUNTRY_RE.is_match(s) => Ok(()),
                Value::String(_) => {
                    Err("Address country must be a two letter code (ISO 3166-1 alpha-2)".to_string())
                }
                _ => Err("Expected string".to_string()),
            },
        }
    }
}
