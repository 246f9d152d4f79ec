//! Signalling half of the engine: envelope routing, the sessions map and
//! the participant roster.

pub mod participants;
pub mod peer_repo;
pub mod room;

pub use self::{
    participants::{Participant, ParticipantRegistry, ParticipantUpdate},
    peer_repo::PeerRepository,
    room::{Room, RoomError},
};
