use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::constants::MessageType;
use crate::messages::FILE_REQUEST_ALL;

/// One logical protocol message.
///
/// `content` is absent for `heartbeat`/`heartbeat_ack`, a string for `chat`
/// and `file_chunk`, a number for `network_quality` and an object for
/// `file_start`/`file_end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub content: serde_json::Value,
}

impl Envelope {
    /// Creates an envelope with arbitrary content.
    pub fn new(msg_type: MessageType, content: serde_json::Value) -> Self {
        Self { msg_type, content }
    }

    /// Creates an envelope whose content is the JSON form of `payload`.
    pub fn with_payload<T: Serialize>(
        msg_type: MessageType,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(msg_type, serde_json::to_value(payload)?))
    }

    pub fn heartbeat() -> Self {
        Self::new(MessageType::Heartbeat, serde_json::Value::Null)
    }

    pub fn heartbeat_ack() -> Self {
        Self::new(MessageType::HeartbeatAck, serde_json::Value::Null)
    }

    pub fn chat(text: impl Into<String>) -> Self {
        Self::new(MessageType::Chat, serde_json::Value::String(text.into()))
    }

    /// Asks the hub for every file in its serving directory.
    pub fn file_request() -> Self {
        Self::new(
            MessageType::FileRequest,
            serde_json::Value::String(FILE_REQUEST_ALL.into()),
        )
    }

    pub fn network_quality(quality: f64) -> Self {
        Self::new(MessageType::NetworkQuality, serde_json::json!(quality))
    }

    pub fn file_start(filename: impl Into<String>, filesize: u64) -> Self {
        let filename: String = filename.into();
        Self::new(
            MessageType::FileStart,
            serde_json::json!({ "filename": filename, "filesize": filesize }),
        )
    }

    /// Creates a `file_chunk` carrying `data` as standard base64.
    pub fn file_chunk(data: &[u8]) -> Self {
        Self::new(
            MessageType::FileChunk,
            serde_json::Value::String(BASE64.encode(data)),
        )
    }

    pub fn file_end(filename: impl Into<String>) -> Self {
        let filename: String = filename.into();
        Self::new(MessageType::FileEnd, serde_json::json!({ "filename": filename }))
    }

    /// Deserializes the content into the given type.
    pub fn parse_content<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.content)
    }

    /// Returns the content as a string slice, if it is one.
    pub fn content_str(&self) -> Option<&str> {
        self.content.as_str()
    }

    /// Returns the content as a number, if it is one.
    pub fn content_f64(&self) -> Option<f64> {
        self.content.as_f64()
    }
}

/// Decodes the base64 payload of a `file_chunk` content string.
pub fn decode_chunk(content: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{FileEnd, FileStart};

    #[test]
    fn heartbeat_omits_content() {
        let json = serde_json::to_string(&Envelope::heartbeat()).unwrap();
        assert_eq!(json, r#"{"type":"heartbeat"}"#);
    }

    #[test]
    fn missing_content_defaults_to_null() {
        let env: Envelope = serde_json::from_str(r#"{"type":"heartbeat_ack"}"#).unwrap();
        assert_eq!(env.msg_type, MessageType::HeartbeatAck);
        assert!(env.content.is_null());
    }

    #[test]
    fn explicit_null_content_is_accepted() {
        let env: Envelope =
            serde_json::from_str(r#"{"type":"heartbeat_ack","content":null}"#).unwrap();
        assert_eq!(env, Envelope::heartbeat_ack());
    }

    #[test]
    fn chat_carries_string() {
        let env = Envelope::chat("hello");
        assert_eq!(env.msg_type, MessageType::Chat);
        assert_eq!(env.content_str(), Some("hello"));
    }

    #[test]
    fn file_request_content_is_all() {
        let json = serde_json::to_value(Envelope::file_request()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "filerequest", "content": "all"})
        );
    }

    #[test]
    fn network_quality_is_a_number() {
        let env = Envelope::network_quality(0.75);
        assert_eq!(env.content_f64(), Some(0.75));
    }

    #[test]
    fn file_start_parses_back() {
        let env = Envelope::file_start("movie.mp4", 1234);
        let start: FileStart = env.parse_content().unwrap();
        assert_eq!(start.filename, "movie.mp4");
        assert_eq!(start.filesize, 1234);
    }

    #[test]
    fn file_end_parses_back() {
        let env = Envelope::file_end("movie.mp4");
        let end: FileEnd = env.parse_content().unwrap();
        assert_eq!(end.filename, "movie.mp4");
    }

    #[test]
    fn file_chunk_is_standard_base64() {
        let env = Envelope::file_chunk(b"hello world");
        assert_eq!(env.content_str(), Some("aGVsbG8gd29ybGQ="));
        let decoded = decode_chunk(env.content_str().unwrap()).unwrap();
        assert_eq!(decoded, b"hello world");
    }

    #[test]
    fn decode_chunk_rejects_garbage() {
        assert!(decode_chunk("not base64 !!!").is_err());
    }

    #[test]
    fn parse_content_wrong_shape_fails() {
        let env = Envelope::chat("just text");
        assert!(env.parse_content::<FileStart>().is_err());
    }

    #[test]
    fn unknown_type_parses_structurally() {
        let env: Envelope =
            serde_json::from_str(r#"{"type":"shutdown","content":{"now":true}}"#).unwrap();
        assert_eq!(env.msg_type, MessageType::Other("shutdown".into()));
        assert_eq!(env.content["now"], true);
    }
}
