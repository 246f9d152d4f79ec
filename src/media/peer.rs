//! Per-peer session negotiation state machine.
//!
//! Every remote endpoint gets one [`PeerSession`] driving the offer/answer
//! exchange for that pair. Both ends may decide to (re)negotiate at the same
//! instant, so each session carries a fixed [`Role`]: on a collision the
//! impolite side ignores the incoming offer and keeps its own in flight,
//! while the polite side rolls its offer back and answers the remote one.
//! Roles are assigned deterministically per pair, which makes glare resolve
//! in a single exchange instead of cycling.
//!
//! Remote trickle candidates that arrive before a remote description has
//! been applied are buffered in arrival order and flushed once the session
//! settles.

use derive_more::{Display, From};
use failure::Fail;

use confab_signal_proto::{EndpointId, IceCandidate};

use crate::{
    log::prelude::*,
    media::{
        CandidateBuffer, MediaConnection, MediaError, MediaKind, SdpKind,
        TrackBindings, TrackHandle,
    },
};

/// Tie-break designation of the local endpoint towards one remote, fixed
/// for the session's lifetime.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Role {
    /// Yields on collision: rolls the own offer back and answers.
    #[display(fmt = "polite")]
    Polite,

    /// Wins on collision: ignores the remote offer.
    #[display(fmt = "impolite")]
    Impolite,
}

/// Where one [`PeerSession`] currently is in the offer/answer exchange.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum NegotiationState {
    /// No description exchanged yet.
    #[display(fmt = "idle")]
    Idle,

    /// A local offer is being produced by the media capability.
    #[display(fmt = "making-offer")]
    MakingOffer,

    /// A local offer was sent, its answer is outstanding.
    #[display(fmt = "have-local-offer")]
    HaveLocalOffer,

    /// A remote offer was received; `pending_rollback` while the collided
    /// local offer is still being discarded.
    #[display(fmt = "have-remote-offer")]
    HaveRemoteOffer {
        /// Whether the own in-flight offer is still being rolled back.
        pending_rollback: bool,
    },

    /// Descriptions are settled on both ends.
    #[display(fmt = "stable")]
    Stable,

    /// Session is torn down; no further transitions.
    #[display(fmt = "closed")]
    Closed,
}

impl NegotiationState {
    /// Indicates whether a new negotiation round may start from this state.
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, NegotiationState::Idle | NegotiationState::Stable)
    }

    /// Indicates whether a remote description is currently applied, i.e.
    /// remote candidates can be attached right away.
    #[must_use]
    pub fn has_remote_description(self) -> bool {
        matches!(
            self,
            NegotiationState::Stable | NegotiationState::HaveRemoteOffer { .. }
        )
    }

    /// Indicates whether this is the terminal [`NegotiationState::Closed`].
    #[must_use]
    pub fn is_closed(self) -> bool {
        matches!(self, NegotiationState::Closed)
    }
}

/// Error of a [`PeerSession`] operation. Always scoped to that one peer.
#[derive(Debug, Display, Fail, From)]
pub enum SessionError {
    /// Trickle candidate queue grew past its cap; the session should be
    /// closed and recreated on the next inbound offer.
    #[display(fmt = "candidate queue for peer [id = {}] overflowed", _0)]
    #[from(ignore)]
    CandidateQueueOverflow(EndpointId),

    /// The media capability failed; the session was reset to a settled
    /// state and stays negotiable.
    #[display(fmt = "{}", _0)]
    Media(MediaError),
}

/// Negotiation state machine for one remote endpoint.
#[derive(Debug)]
pub struct PeerSession {
    /// Relay-assigned ID of the remote endpoint.
    remote_id: EndpointId,

    /// Fixed collision tie-break role of the local side.
    role: Role,

    /// Current position in the offer/answer exchange.
    state: NegotiationState,

    /// Media session primitive towards this peer.
    conn: Box<dyn MediaConnection>,

    /// Remote candidates waiting for a remote description.
    pending_candidates: CandidateBuffer,

    /// Local tracks currently bound to this session's senders.
    bound_tracks: TrackBindings,

    /// Whether this session has ever settled with the remote; decides the
    /// state capability failures reset to.
    ever_stable: bool,
}

impl PeerSession {
    /// Creates a new [`PeerSession`] in [`NegotiationState::Idle`].
    #[must_use]
    pub fn new(
        remote_id: EndpointId,
        role: Role,
        conn: Box<dyn MediaConnection>,
        candidate_queue_cap: usize,
    ) -> Self {
        Self {
            remote_id,
            role,
            state: NegotiationState::Idle,
            conn,
            pending_candidates: CandidateBuffer::new(candidate_queue_cap),
            bound_tracks: TrackBindings::default(),
            ever_stable: false,
        }
    }

    /// ID of the remote endpoint this session negotiates with.
    #[inline]
    #[must_use]
    pub fn remote_id(&self) -> &EndpointId {
        &self.remote_id
    }

    /// Collision role of the local side for this session.
    #[inline]
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current [`NegotiationState`].
    #[inline]
    #[must_use]
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Number of remote candidates waiting for a remote description.
    #[inline]
    #[must_use]
    pub fn buffered_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Starts a negotiation round, returning the offer SDP to send.
    ///
    /// Redundant requests collapse: while an offer is already in flight (or
    /// the session is closed) this is a no-op returning `None`, so at most
    /// one offer is ever outstanding per peer.
    pub fn request_offer(&mut self) -> Result<Option<String>, SessionError> {
        if !self.state.is_settled() {
            debug!(
                "renegotiation request towards [id = {}] collapsed \
                 (state: {})",
                self.remote_id, self.state,
            );
            return Ok(None);
        }

        self.state = NegotiationState::MakingOffer;
        let created = self.conn.create_offer();
        let offer = self.settle_on_err(created)?;
        self.state = NegotiationState::HaveLocalOffer;

        Ok(Some(offer))
    }

    /// Handles a remote offer, returning the answer SDP to send, or `None`
    /// when the offer lost a collision and was ignored.
    ///
    /// On a collision the outcome depends on [`Role`]: impolite ignores the
    /// remote offer, polite rolls the own one back first. After the remote
    /// description is applied, current local tracks are re-bound onto this
    /// session's senders (replace, not remove/re-add), an answer is
    /// produced, and buffered candidates are flushed in arrival order.
    pub fn on_remote_offer(
        &mut self,
        sdp: String,
        local_tracks: &TrackBindings,
    ) -> Result<Option<String>, SessionError> {
        if self.state.is_closed() {
            debug!("offer for closed session [id = {}]", self.remote_id);
            return Ok(None);
        }

        if !self.state.is_settled() {
            match self.role {
                Role::Impolite => {
                    debug!(
                        "glare with [id = {}]: ignoring remote offer",
                        self.remote_id,
                    );
                    return Ok(None);
                }
                Role::Polite => {
                    self.state = NegotiationState::HaveRemoteOffer {
                        pending_rollback: true,
                    };
                    let rolled = self.conn.rollback();
                    self.settle_on_err(rolled)?;
                    self.state = NegotiationState::Idle;
                }
            }
        }

        let applied = self.conn.set_remote_description(SdpKind::Offer(sdp));
        self.settle_on_err(applied)?;
        self.state = NegotiationState::HaveRemoteOffer {
            pending_rollback: false,
        };

        let bound = self.sync_senders(local_tracks);
        self.settle_on_err(bound)?;

        let created = self.conn.create_answer();
        let answer = self.settle_on_err(created)?;
        self.settle();

        Ok(Some(answer))
    }

    /// Handles a remote answer. Valid only while a local offer is
    /// outstanding; an answer in any other state is stale (the race it
    /// belonged to has already been resolved) and is dropped.
    pub fn on_remote_answer(&mut self, sdp: String) -> Result<(), SessionError> {
        if self.state != NegotiationState::HaveLocalOffer {
            debug!(
                "stale answer from [id = {}] dropped (state: {})",
                self.remote_id, self.state,
            );
            return Ok(());
        }

        let applied = self.conn.set_remote_description(SdpKind::Answer(sdp));
        self.settle_on_err(applied)?;
        self.settle();

        Ok(())
    }

    /// Handles one remote trickle candidate: applies it right away if a
    /// remote description is present, buffers it otherwise.
    ///
    /// Application failures are tolerated silently: the candidate may
    /// belong to an offer this side ignored during glare.
    pub fn on_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<(), SessionError> {
        if self.state.is_closed() {
            debug!("candidate for closed session [id = {}]", self.remote_id);
            return Ok(());
        }

        if self.state.has_remote_description() {
            if let Err(err) = self.conn.add_ice_candidate(candidate) {
                debug!(
                    "candidate from [id = {}] not applied: {}",
                    self.remote_id, err,
                );
            }
            return Ok(());
        }

        self.pending_candidates.push(candidate).map_err(|_| {
            SessionError::CandidateQueueOverflow(self.remote_id.clone())
        })
    }

    /// Binds `track` to this session's sender for the given kind without
    /// renegotiating. No-op on a closed session.
    pub fn replace_sender_track(
        &mut self,
        kind: MediaKind,
        track: Option<TrackHandle>,
    ) -> Result<(), SessionError> {
        if self.state.is_closed() {
            return Ok(());
        }
        self.conn.replace_sender_track(kind, track.clone())?;
        self.bound_tracks.set(kind, track);

        Ok(())
    }

    /// Tears the session down: releases the media primitive and discards
    /// buffered candidates. Safe to call in any state, terminal afterwards.
    pub fn close(&mut self) {
        if self.state.is_closed() {
            return;
        }
        self.conn.close();
        self.pending_candidates.clear();
        self.state = NegotiationState::Closed;
    }

    /// Replaces sender bindings that differ from `local_tracks`.
    fn sync_senders(
        &mut self,
        local_tracks: &TrackBindings,
    ) -> Result<(), MediaError> {
        for (kind, track) in local_tracks.iter() {
            if self.bound_tracks.get(kind) != track {
                self.conn.replace_sender_track(kind, track.cloned())?;
            }
        }
        self.bound_tracks = local_tracks.clone();

        Ok(())
    }

    /// Marks the session settled and flushes buffered candidates in
    /// arrival order.
    fn settle(&mut self) {
        self.state = NegotiationState::Stable;
        self.ever_stable = true;

        let candidates: Vec<_> = self.pending_candidates.drain().collect();
        for candidate in candidates {
            if let Err(err) = self.conn.add_ice_candidate(candidate) {
                debug!(
                    "buffered candidate from [id = {}] not applied: {}",
                    self.remote_id, err,
                );
            }
        }
    }

    /// Resets to the last settled state on a capability failure, keeping
    /// the peer negotiable.
    fn settle_on_err<T>(
        &mut self,
        result: Result<T, MediaError>,
    ) -> Result<T, SessionError> {
        result.map_err(|err| {
            self.state = if self.ever_stable {
                NegotiationState::Stable
            } else {
                NegotiationState::Idle
            };
            SessionError::Media(err)
        })
    }
}
