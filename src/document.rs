//! Document value object exchanged with callers.

use crate::error::{Error, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Maximum key length in bytes accepted by the engine
pub const MAX_KEY_LEN: usize = 250;

/// Expiry values up to this many seconds are relative; larger ones are unix time
pub const RELATIVE_EXPIRY_LIMIT: u32 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    id: String,
    content: Bytes,
    cas: u64,
    expiry: u32,
}

impl Document {
    /// Unconditional document (cas 0, never expires).
    pub fn new(id: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Document {
            id: id.into(),
            content: content.into(),
            cas: 0,
            expiry: 0,
        }
    }

    /// Document whose content is the JSON encoding of `value`.
    pub fn json<T: Serialize + ?Sized>(id: impl Into<String>, value: &T) -> Result<Self> {
        let content = serde_json::to_vec(value)?;
        Ok(Document::new(id, content))
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    pub fn with_expiry(mut self, expiry: u32) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn content_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }

    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.content)?)
    }

    pub fn cas(&self) -> u64 {
        self.cas
    }

    pub fn expiry(&self) -> u32 {
        self.expiry
    }

    pub fn into_content(self) -> Bytes {
        self.content
    }
}

pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid("document id must not be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(Error::invalid(format!(
            "document id longer than {} bytes",
            MAX_KEY_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_defaults() {
        let doc = Document::new("a", "body");
        assert_eq!(doc.cas(), 0);
        assert_eq!(doc.expiry(), 0);
        assert_eq!(doc.content_str(), Some("body"));

        let doc = doc.with_cas(42).with_expiry(10);
        assert_eq!(doc.cas(), 42);
        assert_eq!(doc.expiry(), 10);
    }

    #[test]
    fn test_json_helpers() {
        let doc = Document::json("u", &json!({"name": "ann", "age": 31})).unwrap();
        let value: serde_json::Value = doc.parse_json().unwrap();
        assert_eq!(value["age"], 31);

        let raw = Document::new("r", vec![0xff, 0xfe]);
        assert!(raw.content_str().is_none());
        assert!(raw.parse_json::<serde_json::Value>().is_err());
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("ok").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
    }
}
