//! Application messages and the codecs that map them onto frame payloads.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::CodecError;

/// Key under which [`ContentCodec`] stores the frame text.
pub const CONTENT_KEY: &str = "content";

/// One application-level message.
///
/// `channel` names the emulator that produced the message (receive path) or
/// the one that should send it (send path).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Message {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Self::default()
        }
    }

    /// A message whose payload is `{ "content": content }`.
    pub fn with_content(channel: impl Into<String>, content: impl Into<String>) -> Self {
        let content: String = content.into();
        Self::new(channel).with_payload(CONTENT_KEY, content)
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The `content` payload field, if it is a string.
    pub fn content(&self) -> Option<&str> {
        self.payload.get(CONTENT_KEY).and_then(Value::as_str)
    }
}

/// Converts between messages and frame payload bytes.
pub trait PayloadCodec: Send + Sync + fmt::Debug + 'static {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, CodecError>;

    /// Build a message from a received payload; `channel` is the receiving emulator.
    fn decode(&self, channel: &str, payload: &[u8]) -> Result<Message, CodecError>;
}

/// Carries only the `content` text as UTF-8.
///
/// A missing `content` encodes as an empty payload; non-string values are
/// written as their JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentCodec;

impl PayloadCodec for ContentCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, CodecError> {
        Ok(match message.payload.get(CONTENT_KEY) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(text)) => text.as_bytes().to_vec(),
            Some(other) => serde_json::to_vec(other)?,
        })
    }

    fn decode(&self, channel: &str, payload: &[u8]) -> Result<Message, CodecError> {
        let text = std::str::from_utf8(payload)?;
        Ok(Message::with_content(channel, text))
    }
}

/// Carries the whole message as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(message)?)
    }

    fn decode(&self, channel: &str, payload: &[u8]) -> Result<Message, CodecError> {
        let mut message: Message = serde_json::from_slice(payload)?;
        message.channel = channel.to_string();
        Ok(message)
    }
}

/// Codec selector used in configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Content,
    Json,
}

impl CodecKind {
    pub fn build(self) -> Arc<dyn PayloadCodec> {
        match self {
            CodecKind::Content => Arc::new(ContentCodec),
            CodecKind::Json => Arc::new(JsonCodec),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_codec_writes_raw_text() {
        let message = Message::with_content("EM1", "Hello world!");
        assert_eq!(ContentCodec.encode(&message).unwrap(), b"Hello world!");
    }

    #[test]
    fn content_codec_tags_decoded_message_with_receiver() {
        let message = ContentCodec.decode("EM2", b"HELLO").unwrap();
        assert_eq!(message.channel, "EM2");
        assert_eq!(message.content(), Some("HELLO"));
        assert!(message.metadata.is_empty());
        assert_eq!(message.correlation_id, None);
    }

    #[test]
    fn content_codec_missing_content_is_empty() {
        assert!(ContentCodec.encode(&Message::new("EM1")).unwrap().is_empty());
    }

    #[test]
    fn content_codec_rejects_invalid_utf8() {
        let err = ContentCodec.decode("EM1", &[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, CodecError::Utf8(_)));
    }

    #[test]
    fn json_codec_keeps_metadata_and_correlation() {
        let message = Message::new("sender")
            .with_correlation_id("c-1")
            .with_metadata("kind", "order")
            .with_payload("qty", 3);
        let bytes = JsonCodec.encode(&message).unwrap();
        let decoded = JsonCodec.decode("EM1", &bytes).unwrap();
        assert_eq!(decoded.channel, "EM1");
        assert_eq!(decoded.correlation_id.as_deref(), Some("c-1"));
        assert_eq!(decoded.metadata.get("kind"), Some(&json!("order")));
        assert_eq!(decoded.payload.get("qty"), Some(&json!(3)));
    }

    #[test]
    fn message_deserializes_with_defaults() {
        let message: Message =
            serde_json::from_value(json!({ "channel": "EM1", "payload": { "content": "x" } }))
                .unwrap();
        assert_eq!(message, Message::with_content("EM1", "x"));
    }
}
