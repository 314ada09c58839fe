//! Wire frames exchanged over the status socket

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Action of the unsolicited status push.
pub const STATUS_UPDATE_ACTION: &str = "status_update";

/// Action used to ask the server for the current status of resources.
pub const QUERY_STATUS_ACTION: &str = "query_status";

/// Client-to-server frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub action: String,
    pub msg_uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Server-to-client frame: `{ code, data: { action, msg_uuid, data? }, timestamp }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEnvelope {
    pub code: i64,
    pub data: InboundMessage,
    #[serde(default)]
    pub timestamp: i64,
}

impl InboundEnvelope {
    pub fn is_error(&self) -> bool {
        self.code != 0
    }
}

/// Body of an inbound frame; returned to the caller of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub action: String,
    /// Empty for unsolicited pushes.
    #[serde(default)]
    pub msg_uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_omits_missing_data() {
        let message = OutboundMessage {
            action: "ping".to_string(),
            msg_uuid: "u-1".to_string(),
            data: None,
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            serde_json::json!({"action": "ping", "msg_uuid": "u-1"})
        );
    }

    #[test]
    fn test_push_envelope_without_uuid() {
        let raw = r#"{
            "code": 0,
            "data": {
                "action": "status_update",
                "data": [{"resource_id": "scope-1", "is_online": true}]
            },
            "timestamp": 1718000000000
        }"#;
        let envelope: InboundEnvelope = serde_json::from_str(raw).unwrap();
        assert!(!envelope.is_error());
        assert_eq!(envelope.data.action, STATUS_UPDATE_ACTION);
        assert!(envelope.data.msg_uuid.is_empty());
        assert!(envelope.data.data.unwrap().is_array());
    }

    #[test]
    fn test_error_envelope() {
        let raw = r#"{"code": 4003, "data": {"action": "get_device", "msg_uuid": "u-9"}, "timestamp": 1}"#;
        let envelope: InboundEnvelope = serde_json::from_str(raw).unwrap();
        assert!(envelope.is_error());
        assert_eq!(envelope.data.msg_uuid, "u-9");
    }

    #[test]
    fn test_envelope_without_data_is_rejected() {
        assert!(serde_json::from_str::<InboundEnvelope>(r#"{"code": 0}"#).is_err());
    }
}
