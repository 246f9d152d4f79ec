//! Confab session negotiation engine.
//!
//! The core of a multi-party call client: per-peer offer/answer state
//! machines with deterministic glare resolution, trickle candidate
//! buffering, and a reconciled participant roster, all driven by signaling
//! envelopes relayed through a room-scoped fan-out channel.
//!
//! Capturing and transporting media is not done here: a
//! [`media::MediaConnection`] implementation is injected and the engine
//! only decides when and how session-description and candidate metadata is
//! exchanged.

#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

pub mod conf;
pub mod log;
pub mod media;
pub mod signalling;

pub use confab_signal_proto as proto;

pub use self::{
    conf::Conf,
    signalling::{Room, RoomError},
};
