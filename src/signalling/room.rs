//! Room definitions and implementations. A [`Room`] is the single entry
//! point of the negotiation engine: it owns every [`PeerSession`] of the
//! call, routes inbound [`SignalEnvelope`]s to the right session, applies
//! local intents (renegotiate, swap a capture track) and keeps the
//! [`ParticipantRegistry`] in sync.
//!
//! Every failure a session reports is contained to that one peer: the
//! session is reset or evicted, a log record is written, and all other
//! sessions and the roster stay untouched. Nothing in here is fatal to the
//! call.

use derive_more::{Display, From};
use failure::Fail;
use futures::channel::mpsc::UnboundedSender;

use confab_signal_proto::{
    EndpointId, IceCandidate, ParticipantInfo, Signal, SignalEnvelope, Switch,
};

use crate::{
    conf::Conf,
    log::prelude::*,
    media::{
        MediaConnector, MediaError, MediaKind, NegotiationState, PeerSession,
        Role, SessionError, TrackBindings, TrackHandle,
    },
    signalling::{
        participants::{Participant, ParticipantRegistry, ParticipantUpdate},
        peer_repo::PeerRepository,
    },
};

/// Error of a [`Room`] operation requested by the local caller.
#[derive(Debug, Display, Fail, From)]
pub enum RoomError {
    /// Operation needs the relay-assigned local ID, but no `welcome` has
    /// been received yet.
    #[display(fmt = "no welcome from the relay received yet")]
    NotWelcomed,

    /// A [`PeerSession`] operation failed; already contained to that peer.
    #[display(fmt = "{}", _0)]
    Session(SessionError),

    /// The media capability failed to produce a new session primitive.
    #[display(fmt = "{}", _0)]
    Media(MediaError),
}

/// Negotiation engine for one call.
///
/// Inbound envelopes go through [`Room::dispatch`]; local intents have
/// dedicated methods. One envelope or intent is processed to completion
/// before the next; suspending capability steps are guarded by the
/// session's own state, not by a scheduler.
#[derive(Debug)]
pub struct Room {
    /// Relay-assigned ID of the local endpoint, from `welcome`.
    my_id: Option<EndpointId>,

    /// Relay's politeness hint from `welcome` (the room founder). Kept for
    /// introspection; pair roles are derived deterministically instead,
    /// see [`Room::role_for`].
    polite_hint: bool,

    /// Factory for per-peer media session primitives.
    media: Box<dyn MediaConnector>,

    /// [`PeerSession`]s of this call, one per remote endpoint.
    sessions: PeerRepository,

    /// UI-facing roster.
    participants: ParticipantRegistry,

    /// Local tracks currently bound to outbound senders.
    local_tracks: TrackBindings,

    /// Outbound envelope stream towards the relay transport.
    signal_tx: UnboundedSender<SignalEnvelope>,

    /// Cap of each session's trickle candidate queue.
    candidate_queue_cap: usize,
}

impl Room {
    /// Creates a new [`Room`] emitting outbound envelopes into `signal_tx`.
    #[must_use]
    pub fn new(
        conf: &Conf,
        media: Box<dyn MediaConnector>,
        signal_tx: UnboundedSender<SignalEnvelope>,
    ) -> Self {
        Self {
            my_id: None,
            polite_hint: false,
            media,
            sessions: PeerRepository::new(),
            participants: ParticipantRegistry::new(),
            local_tracks: TrackBindings::default(),
            signal_tx,
            candidate_queue_cap: conf.ice.candidate_queue_cap,
        }
    }

    /// Relay-assigned local ID, once `welcome` has been received.
    #[inline]
    #[must_use]
    pub fn my_id(&self) -> Option<&EndpointId> {
        self.my_id.as_ref()
    }

    /// Relay's politeness hint from `welcome`.
    #[inline]
    #[must_use]
    pub fn polite_hint(&self) -> bool {
        self.polite_hint
    }

    /// Current roster in join order.
    #[must_use]
    pub fn participants(&self) -> Vec<Participant> {
        self.participants.snapshot()
    }

    /// [`NegotiationState`] of the session towards the given remote.
    #[must_use]
    pub fn negotiation_state(
        &self,
        remote: &EndpointId,
    ) -> Option<NegotiationState> {
        self.sessions.get(remote).map(PeerSession::state)
    }

    /// Routes one inbound envelope.
    ///
    /// Envelopes directed at another endpoint are discarded before lookup;
    /// an absent `to` is a broadcast and counts as addressed to us. All
    /// per-peer failures are contained here.
    pub fn dispatch(&mut self, envelope: SignalEnvelope) {
        if let Some(to) = &envelope.to {
            if self.my_id.as_ref() != Some(to) {
                debug!(
                    "envelope for [id = {}] discarded (not addressed to us)",
                    to,
                );
                return;
            }
        }

        match envelope.signal {
            Signal::Welcome { channel, polite } => {
                self.on_welcome(channel, polite);
            }
            Signal::Participants { participants } => {
                for info in participants {
                    self.upsert_announced(info);
                }
            }
            Signal::ParticipantJoined { participant }
            | Signal::ParticipantUpdated { participant } => {
                self.upsert_announced(participant);
            }
            Signal::ParticipantLeft { channel } => {
                self.participants.remove(&channel);
                self.remove_peer(&channel);
            }
            Signal::Offer { sdp } => match envelope.from {
                Some(from) => self.on_offer(from, sdp),
                None => debug!("offer without sender dropped"),
            },
            Signal::Answer { sdp } => match envelope.from {
                Some(from) => self.on_answer(&from, sdp),
                None => debug!("answer without sender dropped"),
            },
            Signal::IceCandidate { candidate } => match envelope.from {
                Some(from) => self.on_candidate(&from, candidate),
                None => debug!("candidate without sender dropped"),
            },
            other => {
                debug!("unroutable signal dropped: {:?}", other);
            }
        }
    }

    /// Starts (or restarts) negotiation towards the given remote, creating
    /// the session if this is the first contact.
    ///
    /// Collapses into a no-op while an offer towards that remote is
    /// already in flight.
    pub fn request_offer(
        &mut self,
        remote: &EndpointId,
    ) -> Result<(), RoomError> {
        if !self.sessions.contains(remote) {
            self.create_session(remote)?;
        }

        let result = match self.sessions.get_mut(remote) {
            Some(session) => session.request_offer(),
            None => return Ok(()),
        };
        match result {
            Ok(Some(offer)) => {
                self.send_to(remote.clone(), Signal::Offer { sdp: offer });
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                self.fail_peer(remote, &err);
                Err(err.into())
            }
        }
    }

    /// Re-runs the offer/answer exchange with every connected peer, e.g.
    /// after the set of sent media kinds changed.
    pub fn renegotiate_all(&mut self) {
        for remote in self.sessions.ids() {
            let _ = self.request_offer(&remote);
        }
    }

    /// Swaps the local track bound for the given kind on every live
    /// session's sender.
    ///
    /// Replacing a bound track never renegotiates by itself; when the
    /// *direction* or track *count* changes (e.g. audio newly present),
    /// follow up with [`Room::renegotiate_all`].
    pub fn replace_local_track(
        &mut self,
        kind: MediaKind,
        track: Option<TrackHandle>,
    ) {
        let was_live = self.local_tracks.has_enabled(kind);
        self.local_tracks.set(kind, track.clone());
        let is_live = self.local_tracks.has_enabled(kind);

        for session in self.sessions.iter_mut() {
            if let Err(err) =
                session.replace_sender_track(kind, track.clone())
            {
                warn!(
                    "sender track swap failed for [id = {}]: {}",
                    session.remote_id(),
                    err,
                );
            }
        }

        if was_live != is_live {
            if let Some(my_id) = self.my_id.clone() {
                if is_live {
                    self.participants.track_live(&my_id, kind);
                } else {
                    self.participants.track_ended(&my_id, kind);
                }
            }
        }
    }

    /// Closes and evicts the session towards the given remote. Idempotent.
    pub fn remove_peer(&mut self, remote: &EndpointId) {
        if let Some(mut session) = self.sessions.remove(remote) {
            session.close();
            debug!("session towards [id = {}] closed", remote);
        }
    }

    /// Leaves the call: announces `bye`, tears down every session and
    /// clears the roster.
    pub fn leave(&mut self) {
        self.broadcast(Signal::Bye);
        self.sessions.close_all();
        self.participants.clear();
    }

    /// Announces the local display name after `welcome`.
    pub fn join(&mut self, name: String) -> Result<(), RoomError> {
        self.update_self(ParticipantUpdate {
            display_name: Some(name.clone()),
            ..ParticipantUpdate::default()
        })?;
        self.broadcast(Signal::Join { name });
        Ok(())
    }

    /// Announces a display name change.
    pub fn set_display_name(&mut self, name: String) -> Result<(), RoomError> {
        self.update_self(ParticipantUpdate {
            display_name: Some(name.clone()),
            ..ParticipantUpdate::default()
        })?;
        self.broadcast(Signal::NameUpdate { name });
        Ok(())
    }

    /// Toggles the local microphone announcement.
    ///
    /// A capability toggle never tears media down; it only updates the
    /// roster and tells the room.
    pub fn set_mic(&mut self, mic: Switch) -> Result<(), RoomError> {
        self.update_self(ParticipantUpdate {
            mic: Some(mic),
            ..ParticipantUpdate::default()
        })?;
        self.broadcast(Signal::MicToggle { mic });
        Ok(())
    }

    /// Toggles the local camera announcement.
    pub fn set_cam(&mut self, cam: Switch) -> Result<(), RoomError> {
        self.update_self(ParticipantUpdate {
            cam: Some(cam),
            ..ParticipantUpdate::default()
        })?;
        self.broadcast(Signal::CamToggle { cam });
        Ok(())
    }

    /// Toggles the local raised-hand announcement.
    pub fn set_hand_raised(
        &mut self,
        hand_raised: bool,
    ) -> Result<(), RoomError> {
        self.update_self(ParticipantUpdate {
            hand_raised: Some(hand_raised),
            ..ParticipantUpdate::default()
        })?;
        self.broadcast(Signal::HandToggle { hand_raised });
        Ok(())
    }

    /// Records a live media track observed from the given remote.
    pub fn remote_track_live(&mut self, remote: &EndpointId, kind: MediaKind) {
        self.participants.track_live(remote, kind);
    }

    /// Records the end of a media track observed from the given remote.
    pub fn remote_track_ended(
        &mut self,
        remote: &EndpointId,
        kind: MediaKind,
    ) {
        self.participants.track_ended(remote, kind);
    }

    /// Handles the relay's `welcome`.
    fn on_welcome(&mut self, channel: EndpointId, polite: bool) {
        info!(
            "joined as [id = {}], relay marked us {}",
            channel,
            if polite { "polite" } else { "impolite" },
        );
        self.participants.set_local(channel.clone());
        self.my_id = Some(channel);
        self.polite_hint = polite;
    }

    /// Merges an announced roster entry, never trusting its `video_on`.
    fn upsert_announced(&mut self, info: ParticipantInfo) {
        let id = info.channel.clone();
        self.participants.upsert(id, info.into());
    }

    /// Handles an inbound offer; first contact from a remote creates its
    /// session.
    fn on_offer(&mut self, from: EndpointId, sdp: String) {
        if !self.sessions.contains(&from) {
            if let Err(err) = self.create_session(&from) {
                warn!(
                    "no session towards offering [id = {}]: {}",
                    from, err,
                );
                return;
            }
        }

        let local_tracks = self.local_tracks.clone();
        let result = match self.sessions.get_mut(&from) {
            Some(session) => session.on_remote_offer(sdp, &local_tracks),
            None => return,
        };
        match result {
            Ok(Some(answer)) => {
                self.send_to(from, Signal::Answer { sdp: answer });
            }
            Ok(None) => {}
            Err(err) => self.fail_peer(&from, &err),
        }
    }

    /// Handles an inbound answer; unknown peers are dropped, answers are
    /// not session-creating.
    fn on_answer(&mut self, from: &EndpointId, sdp: String) {
        let result = match self.sessions.get_mut(from) {
            Some(session) => session.on_remote_answer(sdp),
            None => {
                debug!("answer from unknown [id = {}] dropped", from);
                return;
            }
        };
        if let Err(err) = result {
            self.fail_peer(from, &err);
        }
    }

    /// Handles an inbound trickle candidate; unknown peers are dropped.
    fn on_candidate(&mut self, from: &EndpointId, candidate: IceCandidate) {
        let result = match self.sessions.get_mut(from) {
            Some(session) => session.on_remote_candidate(candidate),
            None => {
                debug!("candidate from unknown [id = {}] dropped", from);
                return;
            }
        };
        if let Err(err) = result {
            self.fail_peer(from, &err);
        }
    }

    /// Creates a fresh session towards `remote` and binds the current
    /// local tracks to its senders.
    fn create_session(&mut self, remote: &EndpointId) -> Result<(), RoomError> {
        let role = self.role_for(remote).ok_or(RoomError::NotWelcomed)?;
        let conn = self.media.create_connection(remote)?;
        let mut session = PeerSession::new(
            remote.clone(),
            role,
            conn,
            self.candidate_queue_cap,
        );

        let locals = self.local_tracks.clone();
        for (kind, track) in locals.iter() {
            if track.is_some() {
                if let Err(err) =
                    session.replace_sender_track(kind, track.cloned())
                {
                    session.close();
                    return Err(RoomError::Session(err));
                }
            }
        }

        debug!(
            "session towards [id = {}] created, our role: {}",
            remote, role,
        );
        self.sessions.insert(session);

        Ok(())
    }

    /// Derives the fixed collision role towards `remote`.
    ///
    /// Pairwise-deterministic: both ends order the two relay-assigned ids
    /// the same way, so exactly one side of every pair is polite, also
    /// for pairs where the relay's founder hint marks neither side.
    fn role_for(&self, remote: &EndpointId) -> Option<Role> {
        self.my_id.as_ref().map(|my_id| {
            if *my_id < *remote {
                Role::Polite
            } else {
                Role::Impolite
            }
        })
    }

    /// Contains a session failure to that one peer: queue overflow evicts
    /// the session (recreated on the next inbound offer), capability
    /// failures leave it reset and negotiable.
    fn fail_peer(&mut self, remote: &EndpointId, err: &SessionError) {
        warn!("peer [id = {}] failed: {}", remote, err);
        if let SessionError::CandidateQueueOverflow(_) = err {
            self.remove_peer(remote);
        }
    }

    /// Emits a directed envelope; a gone transport is not an error here.
    fn send_to(&self, to: EndpointId, signal: Signal) {
        let _ = self
            .signal_tx
            .unbounded_send(SignalEnvelope::directed(to, signal));
    }

    /// Emits a broadcast envelope.
    fn broadcast(&self, signal: Signal) {
        let _ = self
            .signal_tx
            .unbounded_send(SignalEnvelope::broadcast(signal));
    }

    /// Merges an update into the local roster entry.
    fn update_self(
        &mut self,
        update: ParticipantUpdate,
    ) -> Result<(), RoomError> {
        let my_id = self.my_id.clone().ok_or(RoomError::NotWelcomed)?;
        self.participants.upsert(my_id, update);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::channel::mpsc;

    use crate::media::{MockMediaConnection, MockMediaConnector};

    use super::*;

    fn stable_conn() -> MockMediaConnection {
        let mut conn = MockMediaConnection::new();
        conn.expect_create_offer()
            .returning(|| Ok("local-offer".to_owned()));
        conn.expect_create_answer()
            .returning(|| Ok("local-answer".to_owned()));
        conn.expect_set_remote_description().returning(|_| Ok(()));
        conn.expect_rollback().returning(|| Ok(()));
        conn.expect_add_ice_candidate().returning(|_| Ok(()));
        conn.expect_replace_sender_track().returning(|_, _| Ok(()));
        conn.expect_close().return_const(());
        conn
    }

    fn room_with_connector(
        connector: MockMediaConnector,
    ) -> (Room, mpsc::UnboundedReceiver<SignalEnvelope>) {
        let (tx, rx) = mpsc::unbounded();
        (Room::new(&Conf::default(), Box::new(connector), tx), rx)
    }

    fn welcomed_room(
        my_id: &str,
    ) -> (Room, mpsc::UnboundedReceiver<SignalEnvelope>) {
        let mut connector = MockMediaConnector::new();
        connector
            .expect_create_connection()
            .returning(|_| Ok(Box::new(stable_conn())));
        let (mut room, rx) = room_with_connector(connector);
        room.dispatch(SignalEnvelope::broadcast(Signal::Welcome {
            channel: my_id.into(),
            polite: false,
        }));
        (room, rx)
    }

    fn drain(
        rx: &mut mpsc::UnboundedReceiver<SignalEnvelope>,
    ) -> Vec<SignalEnvelope> {
        let mut drained = Vec::new();
        while let Ok(Some(envelope)) = rx.try_next() {
            drained.push(envelope);
        }
        drained
    }

    #[test]
    fn inbound_offer_is_answered() {
        let (mut room, mut rx) = welcomed_room("me");

        room.dispatch(SignalEnvelope {
            to: Some("me".into()),
            from: Some("them".into()),
            signal: Signal::Offer {
                sdp: "their-offer".to_owned(),
            },
        });

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, Some("them".into()));
        assert_eq!(
            sent[0].signal,
            Signal::Answer {
                sdp: "local-answer".to_owned(),
            },
        );
        assert_eq!(
            room.negotiation_state(&"them".into()),
            Some(NegotiationState::Stable),
        );
    }

    #[test]
    fn envelope_for_someone_else_is_discarded() {
        // Connector without expectations: any session creation panics.
        let (mut room, mut rx) = room_with_connector(MockMediaConnector::new());
        room.dispatch(SignalEnvelope::broadcast(Signal::Welcome {
            channel: "me".into(),
            polite: false,
        }));

        room.dispatch(SignalEnvelope {
            to: Some("someone-else".into()),
            from: Some("them".into()),
            signal: Signal::Offer {
                sdp: "their-offer".to_owned(),
            },
        });

        assert!(drain(&mut rx).is_empty());
        assert_eq!(room.negotiation_state(&"them".into()), None);
    }

    #[test]
    fn answer_from_unknown_peer_is_dropped() {
        let (mut room, mut rx) = welcomed_room("me");

        room.dispatch(SignalEnvelope {
            to: Some("me".into()),
            from: Some("stranger".into()),
            signal: Signal::Answer {
                sdp: "late".to_owned(),
            },
        });

        assert!(drain(&mut rx).is_empty());
        assert_eq!(room.negotiation_state(&"stranger".into()), None);
    }

    #[test]
    fn left_notice_evicts_session_and_roster_entry() {
        let (mut room, mut rx) = welcomed_room("me");
        room.dispatch(SignalEnvelope::broadcast(Signal::ParticipantJoined {
            participant: ParticipantInfo {
                channel: "them".into(),
                name: "Ada".to_owned(),
                ..ParticipantInfo::default()
            },
        }));
        room.request_offer(&"them".into()).unwrap();
        drain(&mut rx);

        room.dispatch(SignalEnvelope::broadcast(Signal::ParticipantLeft {
            channel: "them".into(),
        }));

        assert_eq!(room.negotiation_state(&"them".into()), None);
        assert!(room.participants().iter().all(|p| p.id.0 != "them"));

        // A late answer for the evicted peer is an unknown-peer drop now.
        room.dispatch(SignalEnvelope {
            to: Some("me".into()),
            from: Some("them".into()),
            signal: Signal::Answer {
                sdp: "late".to_owned(),
            },
        });
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn announced_video_on_is_not_trusted() {
        let (mut room, _rx) = welcomed_room("me");

        room.dispatch(SignalEnvelope::broadcast(Signal::ParticipantUpdated {
            participant: ParticipantInfo {
                channel: "them".into(),
                name: "Ada".to_owned(),
                cam: Switch::On,
                video_on: true,
                ..ParticipantInfo::default()
            },
        }));

        let roster = room.participants();
        assert!(!roster[0].video_on, "claimed video_on must be recomputed");

        room.remote_track_live(&"them".into(), MediaKind::Video);
        assert!(room.participants()[0].video_on);
    }

    #[test]
    fn replace_local_track_stays_silent_on_the_wire() {
        let (mut room, mut rx) = welcomed_room("me");
        room.request_offer(&"them".into()).unwrap();
        room.dispatch(SignalEnvelope {
            to: Some("me".into()),
            from: Some("them".into()),
            signal: Signal::Answer {
                sdp: "their-answer".to_owned(),
            },
        });
        drain(&mut rx);

        room.replace_local_track(
            MediaKind::Video,
            Some(TrackHandle::new(crate::media::TrackId(1), MediaKind::Video)),
        );

        assert!(drain(&mut rx).is_empty());
        assert_eq!(
            room.negotiation_state(&"them".into()),
            Some(NegotiationState::Stable),
        );
    }

    #[test]
    fn candidate_queue_overflow_fails_only_that_peer() {
        let mut conf = Conf::default();
        conf.ice.candidate_queue_cap = 2;

        let mut connector = MockMediaConnector::new();
        connector
            .expect_create_connection()
            .times(3)
            .returning(|_| Ok(Box::new(stable_conn())));
        let (tx, mut rx) = mpsc::unbounded();
        let mut room = Room::new(&conf, Box::new(connector), tx);
        room.dispatch(SignalEnvelope::broadcast(Signal::Welcome {
            channel: "me".into(),
            polite: false,
        }));

        // Two sessions with outstanding local offers buffer candidates.
        room.request_offer(&"them".into()).unwrap();
        room.request_offer(&"other".into()).unwrap();
        drain(&mut rx);

        for n in 0..3 {
            room.dispatch(SignalEnvelope {
                to: Some("me".into()),
                from: Some("them".into()),
                signal: Signal::IceCandidate {
                    candidate: IceCandidate {
                        candidate: format!("candidate:{}", n),
                        sdp_mid: None,
                        sdp_m_line_index: Some(n),
                    },
                },
            });
        }

        assert_eq!(room.negotiation_state(&"them".into()), None);
        assert_eq!(
            room.negotiation_state(&"other".into()),
            Some(NegotiationState::HaveLocalOffer),
        );

        // Next inbound offer recreates the evicted session.
        room.dispatch(SignalEnvelope {
            to: Some("me".into()),
            from: Some("them".into()),
            signal: Signal::Offer {
                sdp: "retry-offer".to_owned(),
            },
        });
        assert_eq!(
            room.negotiation_state(&"them".into()),
            Some(NegotiationState::Stable),
        );
    }

    #[test]
    fn local_toggles_update_self_and_announce() {
        let (mut room, mut rx) = welcomed_room("me");

        room.join("Ada".to_owned()).unwrap();
        room.set_mic(Switch::On).unwrap();
        room.set_hand_raised(true).unwrap();

        let kinds: Vec<_> = drain(&mut rx)
            .into_iter()
            .map(|envelope| envelope.signal)
            .collect();
        assert_eq!(
            kinds,
            vec![
                Signal::Join {
                    name: "Ada".to_owned(),
                },
                Signal::MicToggle { mic: Switch::On },
                Signal::HandToggle { hand_raised: true },
            ],
        );

        let roster = room.participants();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].display_name, "Ada");
        assert!(roster[0].mic.is_on());
        assert!(roster[0].hand_raised);
    }

    #[test]
    fn toggles_before_welcome_are_rejected() {
        let (mut room, mut rx) = room_with_connector(MockMediaConnector::new());

        assert!(room.join("Ada".to_owned()).is_err());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn leave_says_bye_and_tears_everything_down() {
        let (mut room, mut rx) = welcomed_room("me");
        room.request_offer(&"them".into()).unwrap();
        drain(&mut rx);

        room.leave();

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].signal, Signal::Bye);
        assert_eq!(room.negotiation_state(&"them".into()), None);
        assert!(room.participants().is_empty());
    }
}
