//! Stored cache entries and their document encoding.
//!
//! A cache entry is persisted as one JSON document:
//!
//! ```json
//! {
//!   "id": "<key>",
//!   "content": "<base64 bytes>",
//!   "ttl": 20,
//!   "isSlidingExpiration": true,
//!   "absoluteSlidingExpiration": 1700000000,
//!   "<partition attribute>": "<key>"
//! }
//! ```
//!
//! Only `id` and `content` are required. Optional fields are written only when
//! present and read back as absent when missing.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

const ID_FIELD: &str = "id";
const CONTENT_FIELD: &str = "content";
const TTL_FIELD: &str = "ttl";
const SLIDING_FIELD: &str = "isSlidingExpiration";
const ABSOLUTE_SLIDING_FIELD: &str = "absoluteSlidingExpiration";

/// A cache entry as persisted in the document store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoredSession {
    /// Cache key, used as document id and partition key.
    pub key: String,

    /// Opaque caller payload.
    pub content: Vec<u8>,

    /// Seconds until the store expires the document. `None` never expires.
    pub time_to_live: Option<i64>,

    /// Whether reads renew the time to live.
    pub is_sliding_expiration: Option<bool>,

    /// Unix seconds that sliding renewal must never extend past.
    pub absolute_sliding_expiration: Option<i64>,

    /// Custom partition key property, written alongside `id`.
    ///
    /// Not recovered on decode; the cache re-applies it from its options.
    pub partition_key_attribute: Option<String>,
}

impl StoredSession {
    /// Create an entry with no expiration metadata.
    pub fn new(key: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    /// Returns true if reads must renew this entry's time to live.
    ///
    /// An explicit `false` and an absent flag are treated the same.
    pub fn is_sliding(&self) -> bool {
        self.is_sliding_expiration.unwrap_or(false)
    }

    fn partition_field(&self) -> Option<&str> {
        self.partition_key_attribute
            .as_deref()
            .map(str::trim)
            .filter(|attr| !attr.is_empty() && !attr.eq_ignore_ascii_case(ID_FIELD))
    }

    /// Build the JSON document for this entry.
    pub fn to_json(&self) -> Value {
        let mut doc = Map::new();
        doc.insert(ID_FIELD.to_string(), Value::from(self.key.as_str()));
        doc.insert(
            CONTENT_FIELD.to_string(),
            Value::from(STANDARD.encode(&self.content)),
        );
        if let Some(ttl) = self.time_to_live {
            doc.insert(TTL_FIELD.to_string(), Value::from(ttl));
        }
        if let Some(sliding) = self.is_sliding_expiration {
            doc.insert(SLIDING_FIELD.to_string(), Value::from(sliding));
        }
        if let Some(deadline) = self.absolute_sliding_expiration {
            doc.insert(ABSOLUTE_SLIDING_FIELD.to_string(), Value::from(deadline));
        }
        if let Some(attr) = self.partition_field() {
            doc.insert(attr.to_string(), Value::from(self.key.as_str()));
        }
        Value::Object(doc)
    }

    /// Read an entry from its JSON document.
    pub fn from_json(doc: &Value) -> Result<Self> {
        let doc = doc
            .as_object()
            .ok_or_else(|| Error::MalformedEntry("document is not a JSON object".to_string()))?;

        let key = match doc.get(ID_FIELD) {
            Some(Value::String(id)) => id.clone(),
            Some(_) => return Err(malformed("'id' must be a string")),
            None => return Err(malformed("missing 'id'")),
        };

        let content = match doc.get(CONTENT_FIELD) {
            Some(Value::String(encoded)) => STANDARD
                .decode(encoded)
                .map_err(|e| Error::MalformedEntry(format!("invalid base64 content: {e}")))?,
            Some(_) => return Err(malformed("'content' must be a string")),
            None => return Err(malformed("missing 'content'")),
        };

        Ok(Self {
            key,
            content,
            time_to_live: optional_i64(doc, TTL_FIELD)?,
            is_sliding_expiration: optional_bool(doc, SLIDING_FIELD)?,
            absolute_sliding_expiration: optional_i64(doc, ABSOLUTE_SLIDING_FIELD)?,
            partition_key_attribute: None,
        })
    }

    /// Encode to document bytes.
    pub fn encode(&self) -> Vec<u8> {
        self.to_json().to_string().into_bytes()
    }

    /// Decode from document bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let doc: Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::MalformedEntry(format!("invalid JSON: {e}")))?;
        Self::from_json(&doc)
    }
}

fn malformed(reason: &str) -> Error {
    Error::MalformedEntry(reason.to_string())
}

fn optional_i64(doc: &Map<String, Value>, field: &'static str) -> Result<Option<i64>> {
    match doc.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| Error::MalformedEntry(format!("'{field}' must be an integer"))),
    }
}

fn optional_bool(doc: &Map<String, Value>, field: &'static str) -> Result<Option<bool>> {
    match doc.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_bool()
            .map(Some)
            .ok_or_else(|| Error::MalformedEntry(format!("'{field}' must be a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_ttl_is_not_written() {
        let session = StoredSession::new("key", vec![1, 2, 3]);
        let doc = session.to_json();

        assert_eq!(doc, json!({ "id": "key", "content": "AQID" }));
    }

    #[test]
    fn test_optional_fields_written_when_present() {
        let session = StoredSession {
            time_to_live: Some(5),
            is_sliding_expiration: Some(true),
            absolute_sliding_expiration: Some(1_700_000_000),
            ..StoredSession::new("key", Vec::new())
        };

        assert_eq!(
            session.to_json(),
            json!({
                "id": "key",
                "content": "",
                "ttl": 5,
                "isSlidingExpiration": true,
                "absoluteSlidingExpiration": 1_700_000_000i64,
            })
        );
    }

    #[test]
    fn test_custom_partition_attribute_duplicates_key() {
        let mut session = StoredSession::new("key", Vec::new());
        session.partition_key_attribute = Some("pk".to_string());

        let doc = session.to_json();
        assert_eq!(doc["pk"], json!("key"));
        assert_eq!(doc["id"], json!("key"));
    }

    #[test]
    fn test_id_partition_attribute_not_duplicated() {
        for attr in ["id", "ID", "  ", ""] {
            let mut session = StoredSession::new("key", Vec::new());
            session.partition_key_attribute = Some(attr.to_string());
            let doc = session.to_json();
            assert_eq!(doc.as_object().unwrap().len(), 2, "attribute {attr:?}");
        }
    }

    #[test]
    fn test_decode_contract() {
        let session = StoredSession {
            time_to_live: Some(20),
            is_sliding_expiration: Some(false),
            ..StoredSession::new("user-42", b"session-state".to_vec())
        };

        let decoded = StoredSession::decode(&session.encode()).unwrap();
        assert_eq!(decoded, session);
        assert_eq!(decoded.absolute_sliding_expiration, None);
    }

    #[test]
    fn test_decode_binary_and_empty_content() {
        let binary: Vec<u8> = (0..=255).collect();
        for content in [Vec::new(), binary] {
            let session = StoredSession::new("key", content.clone());
            let decoded = StoredSession::decode(&session.encode()).unwrap();
            assert_eq!(decoded.content, content);
        }
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let doc = json!({ "id": "key", "content": "AQID", "_etag": "x", "pk": "key" });
        let session = StoredSession::from_json(&doc).unwrap();
        assert_eq!(session.content, vec![1, 2, 3]);
        assert_eq!(session.partition_key_attribute, None);
    }

    #[test]
    fn test_missing_required_fields() {
        let no_id = json!({ "content": "AQID" });
        assert!(matches!(
            StoredSession::from_json(&no_id),
            Err(Error::MalformedEntry(_))
        ));

        let no_content = json!({ "id": "key" });
        assert!(matches!(
            StoredSession::from_json(&no_content),
            Err(Error::MalformedEntry(_))
        ));
    }

    #[test]
    fn test_malformed_documents() {
        let cases = [
            json!([1, 2]),
            json!({ "id": 7, "content": "" }),
            json!({ "id": "key", "content": "not base64!" }),
            json!({ "id": "key", "content": "", "ttl": "ten" }),
            json!({ "id": "key", "content": "", "isSlidingExpiration": 1 }),
        ];
        for doc in cases {
            assert!(
                matches!(StoredSession::from_json(&doc), Err(Error::MalformedEntry(_))),
                "expected malformed: {doc}"
            );
        }

        assert!(matches!(
            StoredSession::decode(b"{not json"),
            Err(Error::MalformedEntry(_))
        ));
    }

    #[test]
    fn test_is_sliding() {
        let mut session = StoredSession::new("key", Vec::new());
        assert!(!session.is_sliding());
        session.is_sliding_expiration = Some(false);
        assert!(!session.is_sliding());
        session.is_sliding_expiration = Some(true);
        assert!(session.is_sliding());
    }
}
