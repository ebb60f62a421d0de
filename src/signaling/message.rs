use serde::{Deserialize, Serialize};

/// Display role of a participant within a recording room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Host,
    Guest,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Host => "host",
            ParticipantRole::Guest => "guest",
        }
    }
}

/// Roster entry broadcast with every membership change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub participant_id: String,
    pub role: ParticipantRole,
    pub name: Option<String>,
}

/// Room-scoped signaling protocol.
///
/// Messages that target a single recipient carry `to`; the hub still fans
/// them out to the whole room and recipients discard frames not addressed to
/// them. `from` is stamped by the hub on relay, never trusted from clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalMessage {
    JoinRoom {
        room_id: String,
        participant_id: String,
        role: ParticipantRole,
        name: Option<String>,
        /// Invite token, required for guests
        token: Option<String>,
    },

    RoomJoined {
        room_id: String,
        members: Vec<MemberInfo>,
    },

    UserJoined {
        room_id: String,
        participant_id: String,
        members: Vec<MemberInfo>,
    },

    Ready {
        room_id: String,
        #[serde(default)]
        from: Option<String>,
    },

    Offer {
        room_id: String,
        to: String,
        #[serde(default)]
        from: Option<String>,
        sdp: String,
    },

    Answer {
        room_id: String,
        to: String,
        #[serde(default)]
        from: Option<String>,
        sdp: String,
    },

    IceCandidate {
        room_id: String,
        to: String,
        #[serde(default)]
        from: Option<String>,
        candidate: String,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    },

    StartRecordingRequest {
        room_id: String,
    },

    /// Broadcast to every member with a shared capture start target
    StartRecording {
        room_id: String,
        /// Epoch milliseconds
        start_time: u64,
    },

    #[serde(rename = "stop_rec")]
    StopRecording {
        room_id: String,
    },

    RecordingStopped {
        room_id: String,
        participant_id: String,
    },

    ParticipantLeft {
        room_id: String,
        participant_id: String,
        members: Vec<MemberInfo>,
    },

    Heartbeat {
        room_id: String,
    },

    Error {
        message: String,
    },
}

impl SignalMessage {
    /// Stamp the sender identity onto relayed messages that carry one
    pub fn with_sender(mut self, sender_id: &str) -> Self {
        match &mut self {
            SignalMessage::Ready { from, .. }
            | SignalMessage::Offer { from, .. }
            | SignalMessage::Answer { from, .. }
            | SignalMessage::IceCandidate { from, .. } => {
                *from = Some(sender_id.to_string());
            }
            _ => {}
        }
        self
    }

    /// Target recipient for directed messages, if any
    pub fn target(&self) -> Option<&str> {
        match self {
            SignalMessage::Offer { to, .. }
            | SignalMessage::Answer { to, .. }
            | SignalMessage::IceCandidate { to, .. } => Some(to.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tags_are_snake_case() {
        let msg = SignalMessage::StartRecording {
            room_id: "r1".to_string(),
            start_time: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"start_recording\""));
        assert!(json.contains("\"start_time\":1700000000000"));
    }

    #[test]
    fn test_stop_rec_wire_name() {
        let msg = SignalMessage::StopRecording {
            room_id: "r1".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"stop_rec\""));

        let parsed: SignalMessage =
            serde_json::from_str(r#"{"type":"stop_rec","room_id":"r1"}"#).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_with_sender_stamps_directed_messages() {
        let msg = SignalMessage::Offer {
            room_id: "r1".to_string(),
            to: "bob".to_string(),
            from: None,
            sdp: "v=0".to_string(),
        };
        let stamped = msg.with_sender("alice");
        match stamped {
            SignalMessage::Offer { from, .. } => assert_eq!(from.as_deref(), Some("alice")),
            _ => panic!("unexpected variant"),
        }
    }

    #[test]
    fn test_with_sender_ignores_untargeted_messages() {
        let msg = SignalMessage::Heartbeat {
            room_id: "r1".to_string(),
        };
        assert_eq!(msg.clone().with_sender("alice"), msg);
        assert_eq!(msg.target(), None);
    }

    #[test]
    fn test_join_room_deserializes_without_token() {
        let parsed: SignalMessage = serde_json::from_str(
            r#"{"type":"join_room","room_id":"r1","participant_id":"alice","role":"host","name":null,"token":null}"#,
        )
        .unwrap();
        match parsed {
            SignalMessage::JoinRoom { role, token, .. } => {
                assert_eq!(role, ParticipantRole::Host);
                assert!(token.is_none());
            }
            _ => panic!("unexpected variant"),
        }
    }
}
