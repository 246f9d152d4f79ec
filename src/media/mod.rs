//! Media-facing half of the engine: the injected session capability, local
//! track bindings, trickle candidate buffering and the per-peer negotiation
//! state machine.

pub mod conn;
pub mod ice;
pub mod peer;
pub mod track;

#[cfg(test)]
pub use self::conn::{MockMediaConnection, MockMediaConnector};
pub use self::{
    conn::{MediaConnection, MediaConnector, MediaError, SdpKind},
    ice::{CandidateBuffer, CandidateOverflow},
    peer::{NegotiationState, PeerSession, Role, SessionError},
    track::{MediaKind, TrackBindings, TrackHandle, TrackId},
};
