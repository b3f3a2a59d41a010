//! Call parameters and normalized method results

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::channel::ChannelEnd;
use crate::error::RpcError;

/// Normalized result of a method call
#[derive(Debug, Clone)]
pub enum Reply {
    /// A plain value, sent once
    Value(Value),
    /// A live event source, registered and forwarded until closed
    Channel(ChannelEnd),
}

impl Reply {
    pub fn is_channel(&self) -> bool {
        matches!(self, Reply::Channel(_))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Reply::Value(v) => Some(v),
            Reply::Channel(_) => None,
        }
    }

    pub fn as_channel(&self) -> Option<&ChannelEnd> {
        match self {
            Reply::Channel(end) => Some(end),
            Reply::Value(_) => None,
        }
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Value(value)
    }
}

impl From<ChannelEnd> for Reply {
    fn from(end: ChannelEnd) -> Self {
        Reply::Channel(end)
    }
}

/// The mutable record passed through one call.
///
/// Holds the caller's fields from the envelope body plus fields injected by the
/// framework. Hooks receive it by value and hand it on, so anything a hook changes
/// is seen by every later hook and by the method.
#[derive(Debug, Clone, Default)]
pub struct Params {
    data: Map<String, Value>,
    /// Connection the call arrived on, if any
    pub connection_id: Option<String>,
    /// Correlation id of the envelope that started the call
    pub request_id: Option<String>,
    /// Identity produced by the authorizer
    pub user: Option<Value>,
    /// Set after the method completes; after-hooks may replace it
    pub result: Option<Reply>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build params from an envelope body. `null` is treated as an empty record.
    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        match value {
            Value::Object(data) => Ok(data.into()),
            Value::Null => Ok(Self::new()),
            other => Err(RpcError::bad_request(format!(
                "Invalid message data. Expected an object, got {}",
                type_name(&other)
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Deserialize a required field, failing with a 400 if it is missing or mistyped
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, RpcError> {
        let value = self
            .data
            .get(key)
            .ok_or_else(|| RpcError::bad_request(format!("Missing '{}' parameter", key)))?;
        serde_json::from_value(value.clone())
            .map_err(|e| RpcError::bad_request(format!("Invalid '{}' parameter: {}", key, e)))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Set `key`, failing with a 500 if `value` cannot be represented as JSON
    pub fn insert(&mut self, key: impl Into<String>, value: impl Serialize) -> Result<(), RpcError> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|e| {
            RpcError::internal(format!("param \"{}\" is not representable as JSON: {}", key, e))
        })?;
        self.data.insert(key, value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Merge `other` into these params; keys in `other` overwrite existing ones
    pub fn merge(&mut self, other: &Map<String, Value>) {
        for (k, v) in other {
            self.data.insert(k.clone(), v.clone());
        }
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn into_data(self) -> Map<String, Value> {
        self.data
    }

    /// Take the result out, leaving `None`
    pub fn take_result(&mut self) -> Option<Reply> {
        self.result.take()
    }
}

impl From<Map<String, Value>> for Params {
    fn from(data: Map<String, Value>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_accepts_objects_and_null() {
        let params = Params::from_value(json!({"a": 3})).unwrap();
        assert_eq!(params.get("a"), Some(&json!(3)));

        let params = Params::from_value(Value::Null).unwrap();
        assert!(params.data().is_empty());
    }

    #[test]
    fn test_from_value_rejects_scalars() {
        let err = Params::from_value(json!([1, 2])).unwrap_err();
        assert_eq!(err.code, crate::error::BAD_REQUEST);
        assert!(err.message.contains("array"));
    }

    #[test]
    fn test_get_as() {
        let params = Params::from_value(json!({"a": 3, "b": "x"})).unwrap();
        assert_eq!(params.get_as::<i64>("a").unwrap(), 3);
        assert!(params.get_as::<i64>("b").is_err());
        assert!(params.get_as::<i64>("missing").unwrap_err().message.contains("missing"));
    }

    #[test]
    fn test_insert_rejects_unserializable_values() {
        let mut params = Params::new();
        params.insert("n", 7).unwrap();
        assert_eq!(params.get("n"), Some(&json!(7)));

        let mut bad = std::collections::HashMap::new();
        bad.insert(vec![1u8], 1u8);
        let err = params.insert("bad", bad).unwrap_err();
        assert_eq!(err.code, crate::error::INTERNAL_ERROR);
        assert!(!params.contains("bad"));
    }

    #[test]
    fn test_merge_overwrites() {
        let mut params = Params::from_value(json!({"role": "admin", "a": 1})).unwrap();
        let injected = json!({"role": "guest"});
        params.merge(injected.as_object().unwrap());
        assert_eq!(params.get("role"), Some(&json!("guest")));
        assert_eq!(params.get("a"), Some(&json!(1)));
    }
}
