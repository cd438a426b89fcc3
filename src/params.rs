//! Parameter structures.
//!
//! Every argument source (parsed command-line flags, the embedded
//! `--exp-config` override, defaults) is turned into a [`Params`] mapping
//! before merging and fingerprinting. Typed records only appear at the
//! edges, through [`Params::from_record`] and [`Params::to_record`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// String-keyed tree of mappings, sequences and scalars.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(Map<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build from any record that serializes to a mapping
    pub fn from_record<T: Serialize>(record: &T) -> Result<Self> {
        let value = serde_json::to_value(record)
            .map_err(|e| Error::json("Failed to serialize parameters", e))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::json(
                "Parameters must be a mapping",
                <serde_json::Error as serde::de::Error>::custom(format!(
                    "expected an object, found {}",
                    other
                )),
            )),
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(s).map_err(|e| Error::json("Failed to parse parameters", e))?;
        Self::from_value(value)
    }

    /// Convert into a typed record for ergonomic field access
    pub fn to_record<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| Error::json("Failed to convert parameters into record", e))
    }

    pub fn to_json_string(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> serde_json::map::Iter<'_> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Right-biased merge of `other` over `self`.
    ///
    /// Recurses only when both sides hold a mapping at the same key; any
    /// other combination replaces the left value wholesale.
    pub fn merge(&self, other: &Params) -> Params {
        let mut merged = self.0.clone();
        merge_maps(&mut merged, &other.0);
        Params(merged)
    }

    /// Copy of `self` without the given top-level keys. Absent keys are ignored.
    pub fn without_keys<I, S>(&self, keys: I) -> Params
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = self.0.clone();
        for key in keys {
            map.remove(key.as_ref());
        }
        Params(map)
    }
}

fn merge_maps(left: &mut Map<String, Value>, right: &Map<String, Value>) {
    for (key, value) in right {
        match (left.get_mut(key), value) {
            (Some(Value::Object(l)), Value::Object(r)) => merge_maps(l, r),
            _ => {
                left.insert(key.clone(), value.clone());
            }
        }
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl std::fmt::Display for Params {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        Params::from_value(value).unwrap()
    }

    #[test]
    fn test_merge_is_right_biased() {
        let a = params(json!({"x": 1, "y": 2}));
        let b = params(json!({"y": 3, "z": 4}));
        assert_eq!(a.merge(&b), params(json!({"x": 1, "y": 3, "z": 4})));
    }

    #[test]
    fn test_merge_recurses_into_nested_mappings() {
        let a = params(json!({"opt": {"lr": 0.1, "momentum": 0.9}}));
        let b = params(json!({"opt": {"lr": 0.01}}));
        assert_eq!(
            a.merge(&b),
            params(json!({"opt": {"lr": 0.01, "momentum": 0.9}}))
        );
    }

    #[test]
    fn test_merge_replaces_when_shapes_differ() {
        let a = params(json!({"k": {"inner": 1}, "s": 5}));
        let b = params(json!({"k": 3, "s": {"inner": 2}}));
        assert_eq!(a.merge(&b), params(json!({"k": 3, "s": {"inner": 2}})));
    }

    #[test]
    fn test_merge_does_not_mutate_inputs() {
        let a = params(json!({"opt": {"lr": 0.1}}));
        let b = params(json!({"opt": {"lr": 0.5}}));
        let _ = a.merge(&b);
        assert_eq!(a, params(json!({"opt": {"lr": 0.1}})));
    }

    #[test]
    fn test_without_keys_ignores_missing() {
        let a = params(json!({"a": 1, "b": 2}));
        assert_eq!(a.without_keys(["b", "missing"]), params(json!({"a": 1})));
    }

    #[test]
    fn test_record_round_trip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Args {
            op: String,
            size: u32,
        }

        let record = Args {
            op: "linear".to_string(),
            size: 10,
        };
        let p = Params::from_record(&record).unwrap();
        assert_eq!(p.get("size"), Some(&json!(10)));
        assert_eq!(p.to_record::<Args>().unwrap(), record);
    }

    #[test]
    fn test_non_mapping_is_rejected() {
        assert!(Params::from_json_str("[1, 2]").is_err());
        assert!(Params::from_json_str("{\"a\": 1}").is_ok());
    }
}
