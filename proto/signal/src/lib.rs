//! Signaling protocol spoken between Confab endpoints and the relay.
//!
//! Every message that travels through the relay is a [`SignalEnvelope`]:
//! optional addressing (`to`, `sender_channel`) around one [`Signal`]. The
//! JSON representation is flat: the [`Signal`] kind is carried in a `type`
//! field next to the addressing fields, which is what the relay expects when
//! it routes directed messages and stamps `sender_channel` on them.
//!
//! An envelope without `to` is a broadcast and must be treated by receivers
//! as addressed to them.

#![forbid(unsafe_code)]

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

/// ID of an endpoint in a room, assigned by the relay on connect.
#[derive(
    Clone,
    Debug,
    Deserialize,
    Display,
    Eq,
    From,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[from(forward)]
pub struct EndpointId(pub String);

/// Binary capability state of a microphone or camera.
///
/// Serialized as the `"on"` / `"off"` strings the relay stores verbatim.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Switch {
    /// Capability is enabled.
    #[display(fmt = "on")]
    On,

    /// Capability is disabled.
    #[display(fmt = "off")]
    Off,
}

impl Switch {
    /// Indicates whether this [`Switch`] is [`Switch::On`].
    #[inline]
    #[must_use]
    pub fn is_on(self) -> bool {
        matches!(self, Switch::On)
    }
}

impl Default for Switch {
    #[inline]
    fn default() -> Self {
        Switch::Off
    }
}

/// Roster entry as announced through the relay.
///
/// `video_on` is what the remote endpoint *claims*; receivers recompute it
/// from locally observed media and must not trust this field.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ParticipantInfo {
    /// Endpoint this entry describes.
    pub channel: EndpointId,

    /// Human-readable display name.
    pub name: String,

    /// Announced microphone state.
    pub mic: Switch,

    /// Announced camera state.
    pub cam: Switch,

    /// Claimed "video is flowing" flag.
    #[serde(rename = "videoOn")]
    pub video_on: bool,

    /// Raised-hand flag.
    #[serde(rename = "handRaised")]
    pub hand_raised: bool,
}

impl Default for ParticipantInfo {
    fn default() -> Self {
        Self {
            channel: EndpointId(String::new()),
            name: PLACEHOLDER_NAME.to_owned(),
            mic: Switch::Off,
            cam: Switch::Off,
            video_on: false,
            hand_raised: false,
        }
    }
}

/// Display name the relay assigns to endpoints that haven't announced one.
pub const PLACEHOLDER_NAME: &str = "Guest";

/// One trickle ICE candidate.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IceCandidate {
    /// The candidate-attribute line.
    pub candidate: String,

    /// ID of the media description this candidate belongs to.
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,

    /// Index of the media description this candidate belongs to.
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
}

/// Message kinds exchanged through the relay.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    /// Relay assigns the receiver its [`EndpointId`] and politeness hint.
    Welcome {
        /// ID assigned to the receiving endpoint.
        channel: EndpointId,

        /// Relay-side politeness hint (the room founder is marked polite).
        polite: bool,
    },

    /// Full roster snapshot sent right after [`Signal::Welcome`].
    Participants {
        /// All current room members, including the receiver.
        participants: Vec<ParticipantInfo>,
    },

    /// A new endpoint connected to the room.
    ParticipantJoined {
        /// Roster entry of the new endpoint.
        participant: ParticipantInfo,
    },

    /// An endpoint disconnected from the room.
    ParticipantLeft {
        /// ID of the endpoint that left.
        channel: EndpointId,
    },

    /// An endpoint changed its announced attributes.
    ParticipantUpdated {
        /// Updated roster entry.
        participant: ParticipantInfo,
    },

    /// Announces the sender's display name after connecting.
    Join {
        /// Display name to record on the relay.
        name: String,
    },

    /// Display name change.
    NameUpdate {
        /// New display name.
        name: String,
    },

    /// Microphone toggle announcement.
    MicToggle {
        /// New microphone state.
        mic: Switch,
    },

    /// Camera toggle announcement.
    CamToggle {
        /// New camera state.
        cam: Switch,
    },

    /// Raised-hand toggle announcement.
    HandToggle {
        /// New raised-hand state.
        #[serde(rename = "handRaised")]
        hand_raised: bool,
    },

    /// SDP offer for a directed session negotiation.
    Offer {
        /// The offer description.
        sdp: String,
    },

    /// SDP answer concluding a negotiation round.
    Answer {
        /// The answer description.
        sdp: String,
    },

    /// One trickle ICE candidate for a directed session.
    IceCandidate {
        /// The candidate itself.
        candidate: IceCandidate,
    },

    /// Graceful departure notice.
    Bye,
}

/// Addressed [`Signal`] as it travels through the relay.
///
/// `from` is stamped by the relay on directed messages (`sender_channel` on
/// the wire); senders never fill it themselves.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SignalEnvelope {
    /// Receiver of this envelope. `None` means broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<EndpointId>,

    /// Sender of this envelope, stamped by the relay.
    #[serde(
        default,
        rename = "sender_channel",
        skip_serializing_if = "Option::is_none"
    )]
    pub from: Option<EndpointId>,

    /// The message itself.
    #[serde(flatten)]
    pub signal: Signal,
}

impl SignalEnvelope {
    /// Creates an envelope directed at the given endpoint.
    #[inline]
    #[must_use]
    pub fn directed(to: EndpointId, signal: Signal) -> Self {
        Self {
            to: Some(to),
            from: None,
            signal,
        }
    }

    /// Creates a broadcast envelope.
    #[inline]
    #[must_use]
    pub fn broadcast(signal: Signal) -> Self {
        Self {
            to: None,
            from: None,
            signal,
        }
    }
}

#[cfg(test)]
mod spec {
    use serde_json::json;

    use super::*;

    #[test]
    fn welcome_matches_relay_wire_format() {
        let json = r#"{"type":"welcome","channel":"chan.42","polite":true}"#;

        let envelope: SignalEnvelope = serde_json::from_str(json).unwrap();

        assert_eq!(envelope.to, None);
        assert_eq!(envelope.from, None);
        assert_eq!(
            envelope.signal,
            Signal::Welcome {
                channel: "chan.42".into(),
                polite: true,
            },
        );
    }

    #[test]
    fn directed_offer_serializes_flat() {
        let envelope = SignalEnvelope::directed(
            "chan.7".into(),
            Signal::Offer {
                sdp: "v=0".to_owned(),
            },
        );

        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"to": "chan.7", "type": "offer", "sdp": "v=0"}),
        );
    }

    #[test]
    fn relay_stamped_candidate_roundtrips() {
        let json = json!({
            "type": "ice_candidate",
            "to": "chan.1",
            "sender_channel": "chan.2",
            "candidate": {
                "candidate": "candidate:0 1 UDP 1 198.51.100.1 4242 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0,
            },
        });

        let envelope: SignalEnvelope =
            serde_json::from_value(json.clone()).unwrap();

        assert_eq!(envelope.from.as_ref().unwrap().0, "chan.2");
        match &envelope.signal {
            Signal::IceCandidate { candidate } => {
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_m_line_index, Some(0));
            }
            other => panic!("unexpected signal: {:?}", other),
        }
        assert_eq!(serde_json::to_value(&envelope).unwrap(), json);
    }

    #[test]
    fn participant_payload_uses_relay_field_names() {
        let json = json!({
            "type": "participant_updated",
            "participant": {
                "channel": "chan.3",
                "name": "Ada",
                "mic": "on",
                "cam": "off",
                "videoOn": false,
                "handRaised": true,
            },
        });

        let envelope: SignalEnvelope =
            serde_json::from_value(json.clone()).unwrap();

        match &envelope.signal {
            Signal::ParticipantUpdated { participant } => {
                assert_eq!(participant.name, "Ada");
                assert!(participant.mic.is_on());
                assert!(!participant.cam.is_on());
                assert!(participant.hand_raised);
            }
            other => panic!("unexpected signal: {:?}", other),
        }
        assert_eq!(serde_json::to_value(&envelope).unwrap(), json);
    }

    #[test]
    fn partial_participant_payload_fills_defaults() {
        let json = json!({
            "type": "participant_joined",
            "participant": {"channel": "chan.9"},
        });

        let envelope: SignalEnvelope = serde_json::from_value(json).unwrap();

        match envelope.signal {
            Signal::ParticipantJoined { participant } => {
                assert_eq!(participant.name, PLACEHOLDER_NAME);
                assert_eq!(participant.mic, Switch::Off);
                assert!(!participant.video_on);
            }
            other => panic!("unexpected signal: {:?}", other),
        }
    }
}
