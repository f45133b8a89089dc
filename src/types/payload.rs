//! Narrow, read-only view over untyped bridge payloads.
//!
//! The injected scripts report plain JSON whose shape is owned upstream and
//! changes without notice. Every accessor here is total: a missing key, a
//! `null`, or a value of the wrong type all read as "absent".

use serde_json::Value;

/// Untyped JSON payload received from the page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPayload(Value);

impl RawPayload {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Whether the page reported nothing at all.
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    /// Field `key`, unless absent or `null`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|value| !value.is_null())
    }

    /// Nested object at `key`; an empty view if absent.
    pub fn nested(&self, key: &str) -> RawPayload {
        RawPayload(self.get(key).cloned().unwrap_or(Value::Null))
    }

    /// Non-empty string at `key`.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
    }

    /// Boolean at `key`; numbers read as JavaScript truthiness.
    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(flag) => Some(*flag),
            Value::Number(number) => number.as_f64().map(|n| n != 0.0),
            _ => None,
        }
    }

    /// Integer at `key`, accepting floats and numeric strings.
    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|n| n as i64)),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// Identity at `key`, given either as `{ _serialized }` or a flat string.
    pub fn wid(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(text) if !text.is_empty() => Some(text.clone()),
            Value::Object(map) => map
                .get("_serialized")
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
                .map(str::to_string),
            _ => None,
        }
    }

    /// The payload's own identity (`id`).
    pub fn serialized_id(&self) -> Option<String> {
        self.wid("id")
    }
}

impl From<Value> for RawPayload {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialized_id_accepts_both_shapes() {
        let nested = RawPayload::new(json!({ "id": { "_serialized": "123@c.us" } }));
        let flat = RawPayload::new(json!({ "id": "123@c.us" }));
        assert_eq!(nested.serialized_id().as_deref(), Some("123@c.us"));
        assert_eq!(flat.serialized_id().as_deref(), Some("123@c.us"));
    }

    #[test]
    fn test_accessors_are_total_on_garbage() {
        let payload = RawPayload::new(json!("not an object"));
        assert_eq!(payload.text("body"), None);
        assert_eq!(payload.flag("isGroup"), None);
        assert_eq!(payload.integer("t"), None);
        assert_eq!(payload.serialized_id(), None);
        assert!(payload.nested("id").is_null());

        let odd = RawPayload::new(json!({ "id": 42, "body": null, "t": "17", "isMe": 1 }));
        assert_eq!(odd.serialized_id(), None);
        assert_eq!(odd.text("body"), None);
        assert_eq!(odd.integer("t"), Some(17));
        assert_eq!(odd.flag("isMe"), Some(true));
    }

    #[test]
    fn test_empty_strings_read_as_absent() {
        let payload = RawPayload::new(json!({ "name": "", "id": { "_serialized": "" } }));
        assert_eq!(payload.text("name"), None);
        assert_eq!(payload.serialized_id(), None);
    }
}
