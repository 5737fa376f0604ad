//! Patch - JSON-Patch style change operations
//!
//! Partial updates are sent as a list of `{op, path, value}` operations.
//! The op is chosen by which side of the change is empty.

use serde::Serialize;

use crate::model::value_to_json;
use crate::resource::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOpKind {
    Add,
    Replace,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchOp {
    pub op: PatchOpKind,
    pub path: String,
    pub value: serde_json::Value,
}

impl PatchOp {
    pub fn new(op: PatchOpKind, path: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            op,
            path: path.into(),
            value,
        }
    }

    pub fn replace(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self::new(PatchOpKind::Replace, path, value)
    }

    pub fn add(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self::new(PatchOpKind::Add, path, value)
    }

    /// Operation turning `old` into `new`, or `None` when they are equal.
    ///
    /// `add` when `old` is empty, `remove` when `new` is empty, otherwise
    /// `replace`. A remove carries the old value.
    pub fn diff(path: impl Into<String>, old: &Value, new: &Value) -> Option<Self> {
        if old == new || (old.is_empty() && new.is_empty()) {
            return None;
        }
        let op = if old.is_empty() {
            PatchOpKind::Add
        } else if new.is_empty() {
            PatchOpKind::Remove
        } else {
            PatchOpKind::Replace
        };
        let value = match op {
            PatchOpKind::Remove => value_to_json(old),
            _ => value_to_json(new),
        };
        Some(Self::new(op, path, value))
    }
}

/// Collects one operation per changed top-level field
#[derive(Debug, Clone, Default)]
pub struct PatchBuilder {
    ops: Vec<PatchOp>,
}

impl PatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the change for one field; equal values record nothing
    pub fn field(mut self, path: &str, old: &Value, new: &Value) -> Self {
        if let Some(op) = PatchOp::diff(path, old, new) {
            self.ops.push(op);
        }
        self
    }

    pub fn push(mut self, op: PatchOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn build(self) -> Vec<PatchOp> {
        self.ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equal_values_produce_no_op() {
        assert_eq!(
            PatchOp::diff("/name", &Value::string("a"), &Value::string("a")),
            None
        );
        assert_eq!(PatchOp::diff("/name", &Value::Null, &Value::string("")), None);
    }

    #[test]
    fn op_selection_follows_empty_side() {
        let add = PatchOp::diff("/name", &Value::Null, &Value::string("new")).unwrap();
        assert_eq!(add.op, PatchOpKind::Add);
        assert_eq!(add.value, json!("new"));

        let remove = PatchOp::diff("/name", &Value::string("old"), &Value::string("")).unwrap();
        assert_eq!(remove.op, PatchOpKind::Remove);

        let replace = PatchOp::diff("/name", &Value::string("old"), &Value::string("new")).unwrap();
        assert_eq!(replace.op, PatchOpKind::Replace);
        assert_eq!(replace.path, "/name");
    }

    #[test]
    fn builder_emits_one_op_per_changed_field() {
        let ops = PatchBuilder::new()
            .field("/name", &Value::string("a"), &Value::string("b"))
            .field("/bandwidth", &Value::Int(50), &Value::Int(50))
            .field("/description", &Value::Null, &Value::string("d"))
            .build();

        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].path, "/name");
        assert_eq!(ops[1].path, "/description");
        assert_eq!(ops[1].op, PatchOpKind::Add);
    }

    #[test]
    fn serializes_lowercase_op() {
        let op = PatchOp::replace("/bandwidth", json!(100));
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            json!({"op": "replace", "path": "/bandwidth", "value": 100})
        );
    }
}
