//! Timeouts - Per-operation wait limits configured on a resource
//!
//! Every asynchronous resource accepts a `timeouts` block such as
//! `{ "create": "20m", "delete": "5m" }`. Unset operations fall back to
//! [`DEFAULT_TIMEOUT`].

use std::collections::HashMap;
use std::time::Duration;

use crate::provider::{ProviderError, ProviderResult};
use crate::resource::Value;
use crate::schema::{AttributeSchema, AttributeType};
use crate::waiter::DEFAULT_TIMEOUT;

pub const TIMEOUTS_ATTRIBUTE: &str = "timeouts";

/// Duration string type (e.g. "10m", "1h 30m")
pub fn duration_type() -> AttributeType {
    AttributeType::Custom {
        name: "Duration".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) => humantime::parse_duration(s)
                .map(|_| ())
                .map_err(|e| format!("Invalid duration '{}': {}", s, e)),
            _ => Err("Expected string".to_string()),
        },
    }
}

/// Schema of the `timeouts` block
pub fn timeouts_attribute() -> AttributeSchema {
    let op = |name: &str| AttributeSchema::new(name, duration_type()).optional();
    AttributeSchema::new(
        TIMEOUTS_ATTRIBUTE,
        AttributeType::Object(vec![op("create"), op("read"), op("update"), op("delete")]),
    )
    .optional()
    .local()
    .with_description("Per-operation wait limits, e.g. \"20m\"")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::uniform(DEFAULT_TIMEOUT)
    }
}

impl Timeouts {
    /// Every operation limited to `limit`
    pub fn uniform(limit: Duration) -> Self {
        Self {
            create: limit,
            read: limit,
            update: limit,
            delete: limit,
        }
    }

    /// Read the `timeouts` block out of a resource's attributes
    pub fn from_attributes(attributes: &HashMap<String, Value>) -> ProviderResult<Self> {
        Self::from_attributes_or(attributes, Self::default())
    }

    /// Like [`Timeouts::from_attributes`], with resource-specific fallbacks
    pub fn from_attributes_or(
        attributes: &HashMap<String, Value>,
        defaults: Timeouts,
    ) -> ProviderResult<Self> {
        let Some(block) = attributes.get(TIMEOUTS_ATTRIBUTE).and_then(Value::as_map) else {
            return Ok(defaults);
        };
        let get = |name: &str, fallback: Duration| -> ProviderResult<Duration> {
            match block.get(name).and_then(Value::as_str) {
                Some(s) => humantime::parse_duration(s).map_err(|e| {
                    ProviderError::new(format!("invalid {} timeout '{}'", name, s)).with_cause(e)
                }),
                None => Ok(fallback),
            }
        };
        Ok(Self {
            create: get("create", defaults.create)?,
            read: get("read", defaults.read)?,
            update: get("update", defaults.update)?,
            delete: get("delete", defaults.delete)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(entries: &[(&str, &str)]) -> HashMap<String, Value> {
        let inner = entries
            .iter()
            .map(|(k, v)| (k.to_string(), Value::string(*v)))
            .collect();
        let mut attrs = HashMap::new();
        attrs.insert(TIMEOUTS_ATTRIBUTE.to_string(), Value::Map(inner));
        attrs
    }

    #[test]
    fn unset_block_uses_defaults() {
        let timeouts = Timeouts::from_attributes(&HashMap::new()).unwrap();
        assert_eq!(timeouts, Timeouts::default());
        assert_eq!(timeouts.create, Duration::from_secs(600));
    }

    #[test]
    fn parses_configured_operations() {
        let timeouts = Timeouts::from_attributes(&block(&[("create", "20m"), ("delete", "90s")])).unwrap();
        assert_eq!(timeouts.create, Duration::from_secs(1200));
        assert_eq!(timeouts.delete, Duration::from_secs(90));
        assert_eq!(timeouts.update, DEFAULT_TIMEOUT);
    }

    #[test]
    fn resource_defaults_fill_unset_operations() {
        let defaults = Timeouts::uniform(Duration::from_secs(900));
        let timeouts = Timeouts::from_attributes_or(&block(&[("read", "1m")]), defaults).unwrap();
        assert_eq!(timeouts.read, Duration::from_secs(60));
        assert_eq!(timeouts.create, Duration::from_secs(900));
    }

    #[test]
    fn rejects_malformed_duration() {
        assert!(Timeouts::from_attributes(&block(&[("create", "soon")])).is_err());
        assert!(duration_type().validate(&Value::string("soon")).is_err());
        assert!(duration_type().validate(&Value::string("1h 30m")).is_ok());
    }
}
