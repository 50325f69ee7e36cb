//! Message envelope shared by the agent and the backend.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

/// A typed, opaque payload travelling in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Type tag used for routing
    pub msg_type: String,
    /// Encoded payload
    pub payload: Bytes,
}

impl Message {
    /// Create a message from a type tag and raw payload
    pub fn new(msg_type: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: payload.into(),
        }
    }

    /// Create a message whose payload is the JSON encoding of `value`
    pub fn json<T: Serialize>(
        msg_type: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::new(msg_type, payload))
    }

    /// Decode the payload as JSON
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Check the type tag
    pub fn is(&self, msg_type: &str) -> bool {
        self.msg_type == msg_type
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct CheckResult {
        check: String,
        status: u32,
    }

    #[test]
    fn test_json_message() {
        let result = CheckResult {
            check: "disk".to_string(),
            status: 2,
        };
        let msg = Message::json("event", &result).unwrap();

        assert!(msg.is("event"));
        assert!(!msg.is_empty());

        let decoded: CheckResult = msg.decode().unwrap();
        assert_eq!(decoded, result);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let msg = Message::new("event", &b"not json"[..]);
        assert!(msg.decode::<CheckResult>().is_err());
    }

    #[test]
    fn test_raw_payload_untouched() {
        let msg = Message::new("keepalive", vec![0u8, 1, 2, 255]);
        assert_eq!(msg.len(), 4);
        assert_eq!(&msg.payload[..], &[0u8, 1, 2, 255]);
    }
}
