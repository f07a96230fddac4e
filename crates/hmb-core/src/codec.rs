//! Text (JSON) and binary (BSON) document codecs.
//!
//! The text format has no native concatenation, so a batch is wrapped in an
//! index-keyed object `{"0": msg, "1": msg, ...}`. The binary format is a
//! plain sequence of documents laid back to back.

use bson::{Bson, Document};
use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::Message;

/// Codec error.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("BSON encoding error: {0}")]
    BsonEncode(#[from] bson::ser::Error),
    #[error("BSON decoding error: {0}")]
    BsonDecode(#[from] bson::de::Error),
    #[error("Truncated BSON document at offset {0}")]
    Truncated(usize),
    #[error("Batch is missing message index {0}")]
    MissingIndex(usize),
    #[error("Unexpected document shape: {0}")]
    Shape(String),
}

/// Negotiated document format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// UTF-8 JSON documents.
    Json,
    /// Concatenated BSON documents.
    #[default]
    Bson,
}

impl Encoding {
    /// Value of the `Content-type` header for this format.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Bson => "application/bson",
        }
    }

    /// Encode a single document (session parameters, acknowledgments).
    ///
    /// # Errors
    /// Returns error if the value cannot be represented in this format.
    pub fn encode_document<T: Serialize>(self, value: &T) -> Result<Bytes, CodecError> {
        let bytes = match self {
            Self::Json => serde_json::to_vec(value)?,
            Self::Bson => bson::to_vec(value)?,
        };
        Ok(Bytes::from(bytes))
    }

    /// Decode a single document.
    ///
    /// # Errors
    /// Returns error if the body is not one well-formed document of type `T`.
    pub fn decode_document<T: DeserializeOwned>(self, body: &[u8]) -> Result<T, CodecError> {
        match self {
            Self::Json => Ok(serde_json::from_slice(body)?),
            Self::Bson => {
                let docs = split_bson(body)?;
                let [doc] = docs.as_slice() else {
                    return Err(CodecError::Shape(format!(
                        "expected one document, found {}",
                        docs.len()
                    )));
                };
                from_bson_document(doc.clone())
            }
        }
    }

    /// Encode a batch of messages for `POST /send`.
    ///
    /// # Errors
    /// Returns error if a message cannot be represented in this format.
    pub fn encode_batch(self, messages: &[Message]) -> Result<Bytes, CodecError> {
        match self {
            Self::Json => {
                let mut indexed = Map::with_capacity(messages.len());
                for (i, msg) in messages.iter().enumerate() {
                    indexed.insert(i.to_string(), serde_json::to_value(msg)?);
                }
                Ok(Bytes::from(serde_json::to_vec(&Value::Object(indexed))?))
            }
            Self::Bson => {
                let mut out = Vec::new();
                for msg in messages {
                    out.extend(bson::to_vec(msg)?);
                }
                Ok(Bytes::from(out))
            }
        }
    }

    /// Decode a batch of messages returned by `GET /recv`, in order.
    ///
    /// An empty body is an empty batch.
    ///
    /// # Errors
    /// Returns error if the body is malformed or an entry is not a message.
    pub fn decode_batch(self, body: &[u8]) -> Result<Vec<Message>, CodecError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        match self {
            Self::Json => {
                let Value::Object(mut indexed) = serde_json::from_slice(body)? else {
                    return Err(CodecError::Shape("batch is not an object".to_string()));
                };
                (0..indexed.len())
                    .map(|i| {
                        let entry = indexed
                            .remove(&i.to_string())
                            .ok_or(CodecError::MissingIndex(i))?;
                        Ok(serde_json::from_value(entry)?)
                    })
                    .collect()
            }
            Self::Bson => split_bson(body)?
                .into_iter()
                .map(from_bson_document)
                .collect(),
        }
    }
}

/// Split a byte stream into consecutive BSON documents.
fn split_bson(mut body: &[u8]) -> Result<Vec<Document>, CodecError> {
    let mut docs = Vec::new();
    let mut offset = 0;
    while !body.is_empty() {
        let len = body
            .get(..4)
            .and_then(|b| <[u8; 4]>::try_from(b).ok())
            .map(i32::from_le_bytes)
            .and_then(|n| usize::try_from(n).ok())
            .filter(|&n| n >= 5 && n <= body.len())
            .ok_or(CodecError::Truncated(offset))?;
        let (doc, rest) = body.split_at(len);
        docs.push(Document::from_reader(doc)?);
        body = rest;
        offset += len;
    }
    Ok(docs)
}

/// Deserialize through relaxed extended JSON so binary, date and other
/// BSON-only values arrive as plain JSON documents in opaque payloads.
fn from_bson_document<T: DeserializeOwned>(doc: Document) -> Result<T, CodecError> {
    Ok(serde_json::from_value(Bson::Document(doc).into_relaxed_extjson())?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{MessageType, OpenAck, QueueCursor, SessionParameters};

    fn sample_batch() -> Vec<Message> {
        vec![
            Message::msg("Q1", json!({"content": "first", "n": 1})).with_seq(97),
            Message::new("EMSC_MSG", "Q2", json!({"nested": {"list": [1, 2.5, "x"]}}))
                .with_topic("felt")
                .with_seq(3),
            Message::marker(MessageType::Eof),
        ]
    }

    #[test]
    fn test_content_types() {
        assert_eq!(Encoding::Json.content_type(), "application/json");
        assert_eq!(Encoding::Bson.content_type(), "application/bson");
    }

    #[test]
    fn test_json_batch_is_index_keyed() {
        let body = Encoding::Json
            .encode_batch(&[Message::touch("Q")])
            .unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"0": {"type": "TOUCH", "queue": "Q"}}));
    }

    #[test]
    fn test_json_batch_keeps_index_order() {
        // Object key order must not matter, only the indices.
        let body = br#"{"1": {"type": "EOF"}, "0": {"type": "MSG", "queue": "Q", "seq": 5}}"#;
        let batch = Encoding::Json.decode_batch(body).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].position(), Some(("Q", 5)));
        assert!(batch[1].is_eof());
    }

    #[test]
    fn test_json_batch_missing_index() {
        let body = br#"{"0": {"type": "MSG"}, "2": {"type": "EOF"}}"#;
        let err = Encoding::Json.decode_batch(body).unwrap_err();
        assert!(matches!(err, CodecError::MissingIndex(1)));
    }

    #[test]
    fn test_both_formats_decode_to_same_messages() {
        let batch = sample_batch();
        let from_json = Encoding::Json
            .decode_batch(&Encoding::Json.encode_batch(&batch).unwrap())
            .unwrap();
        let from_bson = Encoding::Bson
            .decode_batch(&Encoding::Bson.encode_batch(&batch).unwrap())
            .unwrap();
        assert_eq!(from_json, batch);
        assert_eq!(from_bson, batch);
    }

    #[test]
    fn test_bson_concatenation() {
        let batch = sample_batch();
        let mut body = Vec::new();
        for msg in &batch {
            body.extend(bson::to_vec(msg).unwrap());
        }
        assert_eq!(Encoding::Bson.encode_batch(&batch).unwrap(), body);
    }

    #[test]
    fn test_bson_binary_payload_is_opaque_document() {
        let mut doc = bson::doc! {"type": "MSG", "queue": "Q", "seq": 1_i64};
        doc.insert(
            "data",
            bson::Binary {
                subtype: bson::spec::BinarySubtype::Generic,
                bytes: vec![1, 2, 3],
            },
        );
        let body = bson::to_vec(&doc).unwrap();
        let batch = Encoding::Bson.decode_batch(&body).unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batch[0].data.as_ref().is_some_and(Value::is_object));
    }

    #[test]
    fn test_bson_truncated() {
        let mut body = Encoding::Bson
            .encode_batch(&[Message::touch("Q")])
            .unwrap()
            .to_vec();
        body.truncate(body.len() - 1);
        assert!(matches!(
            Encoding::Bson.decode_batch(&body),
            Err(CodecError::Truncated(0))
        ));
    }

    #[test]
    fn test_empty_body_is_empty_batch() {
        assert!(Encoding::Json.decode_batch(b"").unwrap().is_empty());
        assert!(Encoding::Bson.decode_batch(b"").unwrap().is_empty());
    }

    #[test]
    fn test_document_round_trip() {
        let params = SessionParameters::new()
            .with_heartbeat(30)
            .with_queue("Q1", QueueCursor::backlog(10).filter(json!({"data.mag": {"$gt": 5}})));
        for encoding in [Encoding::Json, Encoding::Bson] {
            let body = encoding.encode_document(&params).unwrap();
            let decoded: SessionParameters = encoding.decode_document(&body).unwrap();
            assert_eq!(decoded, params);
        }
    }

    #[test]
    fn test_bson_ack_with_int32_seq() {
        let body = bson::to_vec(&bson::doc! {
            "sid": "S1",
            "cid": "C1",
            "queue": {"Q1": {"seq": 97_i32}},
        })
        .unwrap();
        let ack: OpenAck = Encoding::Bson.decode_document(&body).unwrap();
        assert_eq!(ack.sid, "S1");
        assert_eq!(ack.queue["Q1"].seq, Some(97));
    }
}
