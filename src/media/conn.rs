//! Abstraction over the platform primitive that carries one peer-to-peer
//! media session.
//!
//! The engine decides *when* descriptions and candidates are exchanged;
//! producing and applying them is delegated to a [`MediaConnection`]
//! implementation injected through a [`MediaConnector`]. On browsers that is
//! an `RTCPeerConnection` adapter, in native builds whatever the media stack
//! provides.

use std::{borrow::Cow, fmt::Debug};

use derive_more::{Display, From};
use failure::Fail;

use confab_signal_proto::{EndpointId, IceCandidate};

use crate::media::{MediaKind, TrackHandle};

/// Failure reported by a [`MediaConnection`] or [`MediaConnector`].
///
/// Always local to one peer; the engine recovers by resetting that peer's
/// session and never escalates it further.
#[derive(Debug, Display, Fail, From)]
#[display(fmt = "media capability error: {}", _0)]
#[from(forward)]
pub struct MediaError(pub Cow<'static, str>);

/// Session description to be applied as the remote one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SdpKind {
    /// SDP offer.
    Offer(String),

    /// SDP answer.
    Answer(String),
}

/// One peer-to-peer media session primitive.
///
/// Implementations are expected to set descriptions they produce as the
/// local one themselves (`create_*` is "create and apply"), and to support
/// replacing a sender's track without renegotiating.
#[cfg_attr(test, mockall::automock)]
pub trait MediaConnection: Debug {
    /// Creates an SDP offer and applies it as the local description.
    fn create_offer(&self) -> Result<String, MediaError>;

    /// Creates an SDP answer to the applied remote offer and applies it as
    /// the local description.
    fn create_answer(&self) -> Result<String, MediaError>;

    /// Applies the given remote description.
    fn set_remote_description(&self, sdp: SdpKind) -> Result<(), MediaError>;

    /// Discards the not-yet-answered local description, returning the
    /// session to its last settled description.
    fn rollback(&self) -> Result<(), MediaError>;

    /// Applies one remote trickle [`IceCandidate`].
    fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<(), MediaError>;

    /// Binds `track` to this session's sender of the given [`MediaKind`],
    /// replacing whatever was bound before. `None` clears the sender.
    ///
    /// Must not require renegotiation.
    fn replace_sender_track(
        &self,
        kind: MediaKind,
        track: Option<TrackHandle>,
    ) -> Result<(), MediaError>;

    /// Releases the underlying session. Infallible by contract.
    fn close(&self);
}

/// Factory producing a [`MediaConnection`] per remote endpoint.
#[cfg_attr(test, mockall::automock)]
pub trait MediaConnector: Debug {
    /// Creates a fresh [`MediaConnection`] towards the given endpoint.
    fn create_connection(
        &self,
        remote: &EndpointId,
    ) -> Result<Box<dyn MediaConnection>, MediaError>;
}

#[cfg(test)]
impl Debug for MockMediaConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "MockMediaConnection")
    }
}

#[cfg(test)]
impl Debug for MockMediaConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "MockMediaConnector")
    }
}
