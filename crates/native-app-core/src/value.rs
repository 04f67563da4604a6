//! Values stored against keys in a named storage.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

/// A scalar or binary payload held by a storage.
///
/// Binary payloads travel as base64 text in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StorageValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Blob(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl StorageValue {
    /// Create a blob value from raw bytes.
    #[must_use]
    pub fn blob(data: &[u8]) -> Self {
        Self::Blob(data.to_vec())
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        if let Self::Int(v) = self { Some(*v) } else { None }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let Self::Text(s) = self { Some(s) } else { None }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        if let Self::Blob(b) = self { Some(b) } else { None }
    }
}

impl From<i64> for StorageValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for StorageValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for StorageValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for StorageValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for StorageValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::BASE64;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[test]
    fn blob_travels_as_base64() {
        let value = StorageValue::blob(b"Hello, World!");
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["type"], "blob");
        assert_eq!(json["value"], "SGVsbG8sIFdvcmxkIQ==");

        let parsed: StorageValue = assert_ok!(serde_json::from_value(json));
        assert_eq!(parsed.as_bytes(), Some(&b"Hello, World!"[..]));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        assert_err!(serde_json::from_str::<StorageValue>(r#"{"type":"blob","value":"@@"}"#));
    }

    #[test]
    fn scalar_conversions() {
        assert_eq!(StorageValue::from(5_i64), StorageValue::Int(5));
        assert_eq!(StorageValue::from("x").as_text(), Some("x"));
        assert_eq!(StorageValue::Null.as_int(), None);
    }
}
