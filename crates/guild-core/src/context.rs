use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named values visible to condition expressions and agent executors.
///
/// Seeded from the simulation inputs and extended with every agent's
/// outputs as a run progresses. Keys are strings; values are JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueEnvironment {
    data: Map<String, Value>,
}

impl ValueEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an environment from an existing JSON object.
    pub fn from_map(data: Map<String, Value>) -> Self {
        Self { data }
    }

    /// Create an environment from any JSON value; non-objects yield an empty one.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(data) => Self { data },
            _ => Self::default(),
        }
    }

    /// Get a top-level value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), Value::String(value.into()));
    }

    /// Merge another environment into this one (overwrites on conflict).
    pub fn merge(&mut self, other: &ValueEnvironment) {
        for (k, v) in &other.data {
            self.data.insert(k.clone(), v.clone());
        }
    }

    /// Merge a node's output values, overwriting on conflict.
    pub fn ingest(&mut self, outputs: &Map<String, Value>) {
        for (k, v) in outputs {
            self.data.insert(k.clone(), v.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }
}

impl From<Map<String, Value>> for ValueEnvironment {
    fn from(data: Map<String, Value>) -> Self {
        Self { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn basic_operations() {
        let mut env = ValueEnvironment::new();
        env.set_str("name", "Alice");
        env.set("count", json!(42));

        assert_eq!(env.get("name"), Some(&json!("Alice")));
        assert_eq!(env.get("count"), Some(&json!(42)));
        assert_eq!(env.get("missing"), None);
    }

    #[test]
    fn merge_overwrites() {
        let mut a = ValueEnvironment::new();
        a.set_str("a", "1");
        a.set_str("b", "2");

        let mut b = ValueEnvironment::new();
        b.set_str("b", "overwritten");
        b.set_str("c", "3");

        a.merge(&b);

        assert_eq!(a.get("a"), Some(&json!("1")));
        assert_eq!(a.get("b"), Some(&json!("overwritten")));
        assert_eq!(a.get("c"), Some(&json!("3")));
    }

    #[test]
    fn non_object_value_is_empty() {
        assert!(ValueEnvironment::from_value(json!([1, 2])).is_empty());
    }
}
