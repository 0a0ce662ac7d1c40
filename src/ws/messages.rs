//! Wire message shapes for the `/ws` endpoint (§6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Identify {
        device_type: String,
        session_id: String,
    },
    MobileInit {
        device_type: String,
        pairing_code: String,
        session_id: String,
    },
    Ping {
        sequence: u64,
    },
    ChannelMessage {
        #[serde(rename = "channelId")]
        channel_id: String,
        payload: serde_json::Value,
    },
    AudioData {
        format: String,
        audio_data: String,
    },
    FlushAudio,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Connected,
    Identified {
        device_type: String,
    },
    ChannelJoined {
        channel: String,
    },
    Pong {
        sequence: u64,
    },
    TranscriptionResult {
        text: String,
        raw: String,
        normalized: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_text: Option<String>,
        language: String,
        duration: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        chunk_id: Option<u64>,
        timestamp: i64,
    },
    MobileDisconnected,
    ChannelMessage {
        payload: serde_json::Value,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_parses_from_wire_shape() {
        let json = r#"{"type":"identify","device_type":"desktop","session_id":"abc"}"#;
        let parsed: InboundMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(parsed, InboundMessage::Identify { session_id, .. } if session_id == "abc"));
    }

    #[test]
    fn flush_audio_parses_with_no_fields() {
        let json = r#"{"type":"flush_audio"}"#;
        let parsed: InboundMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(parsed, InboundMessage::FlushAudio));
    }

    #[test]
    fn transcription_result_serializes_with_tag() {
        let msg = OutboundMessage::TranscriptionResult {
            text: "hoi".into(),
            raw: "hoi".into(),
            normalized: "hoi".into(),
            session_text: None,
            language: "nl".into(),
            duration: 1.0,
            chunk_id: Some(3),
            timestamp: 0,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"transcription_result\""));
        assert!(!json.contains("session_text"));
    }
}
