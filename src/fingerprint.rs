/// Fingerprint computation for parameter structures
///
/// A fingerprint is the hex-encoded SHA-224 digest of a canonical JSON
/// encoding: mapping keys sorted at every depth, sequences kept in order,
/// no whitespace, scalars written exactly as serde_json formats them.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha224};
use std::collections::BTreeMap;
use std::fmt;

use crate::params::Params;

/// Length in hex characters of a computed fingerprint
pub const FINGERPRINT_LEN: usize = 56;

/// Cache key of a parameter structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already computed fingerprint without validation
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this looks like something [`fingerprint`] produced
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == FINGERPRINT_LEN && self.0.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Anything that resolves to a cache key: a parameter mapping, which is
/// hashed, or a fingerprint, which passes through unchanged.
pub trait Fingerprintable {
    fn fingerprint(&self) -> Fingerprint;
}

impl Fingerprintable for Fingerprint {
    fn fingerprint(&self) -> Fingerprint {
        self.clone()
    }
}

impl Fingerprintable for Params {
    fn fingerprint(&self) -> Fingerprint {
        fingerprint(&Value::Object(self.as_map().clone()))
    }
}

impl Fingerprintable for Value {
    fn fingerprint(&self) -> Fingerprint {
        fingerprint(self)
    }
}

impl Fingerprintable for str {
    fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_raw(self)
    }
}

impl Fingerprintable for String {
    fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_raw(self.as_str())
    }
}

impl<T: Fingerprintable + ?Sized> Fingerprintable for &T {
    fn fingerprint(&self) -> Fingerprint {
        (**self).fingerprint()
    }
}

/// Canonical, byte-exact JSON encoding of `value`
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(_) => value.to_string(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, String> =
                map.iter().map(|(k, v)| (k, canonical_json(v))).collect();
            let items: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
                .collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

/// Hash a parameter structure into its fingerprint
pub fn fingerprint(value: &Value) -> Fingerprint {
    let mut hasher = Sha224::new();
    hasher.update(canonical_json(value).as_bytes());
    Fingerprint(hex::encode(hasher.finalize()))
}
