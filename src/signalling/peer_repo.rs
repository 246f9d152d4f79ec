//! Repository that stores a [`Room`]'s [`PeerSession`]s.
//!
//! [`Room`]: crate::signalling::Room

use std::collections::HashMap;

use confab_signal_proto::EndpointId;

use crate::media::PeerSession;

/// Owned collection of [`PeerSession`]s, one per remote endpoint.
///
/// All mutation goes through the owning [`Room`]'s methods; nothing outside
/// reaches into a session directly, which keeps per-peer processing
/// serialized.
///
/// [`Room`]: crate::signalling::Room
#[derive(Debug, Default)]
pub struct PeerRepository {
    /// [`PeerSession`]s by the remote endpoint they negotiate with.
    peers: HashMap<EndpointId, PeerSession>,
}

impl PeerRepository {
    /// Creates an empty [`PeerRepository`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the given [`PeerSession`], replacing a previous one for the
    /// same remote.
    pub fn insert(&mut self, session: PeerSession) {
        self.peers.insert(session.remote_id().clone(), session);
    }

    /// Returns the session for the given remote.
    #[must_use]
    pub fn get(&self, id: &EndpointId) -> Option<&PeerSession> {
        self.peers.get(id)
    }

    /// Returns a mutable reference to the session for the given remote.
    pub fn get_mut(&mut self, id: &EndpointId) -> Option<&mut PeerSession> {
        self.peers.get_mut(id)
    }

    /// IDs of all remotes a session currently exists for.
    #[must_use]
    pub fn ids(&self) -> Vec<EndpointId> {
        self.peers.keys().cloned().collect()
    }

    /// Indicates whether a session for the given remote exists.
    #[must_use]
    pub fn contains(&self, id: &EndpointId) -> bool {
        self.peers.contains_key(id)
    }

    /// Removes and returns the session for the given remote.
    pub fn remove(&mut self, id: &EndpointId) -> Option<PeerSession> {
        self.peers.remove(id)
    }

    /// Iterates over all sessions mutably.
    pub fn iter_mut(
        &mut self,
    ) -> impl Iterator<Item = &mut PeerSession> + '_ {
        self.peers.values_mut()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Indicates whether no sessions exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Closes every session and drops the map.
    pub fn close_all(&mut self) {
        for session in self.peers.values_mut() {
            session.close();
        }
        self.peers.clear();
    }
}
