//! UI-facing view of who is in the call and their announced capabilities.
//!
//! [`ParticipantRegistry`] reconciles two independent input streams: roster
//! announcements relayed from remote endpoints and locally observed media
//! events. Announcements are merged field-wise; the derived `video_on` flag
//! is always recomputed from what is actually observed locally: a remote
//! claim and actually-flowing media can diverge mid-renegotiation, so the
//! claim is never trusted.

use std::collections::HashMap;

use confab_signal_proto::{
    EndpointId, ParticipantInfo, Switch, PLACEHOLDER_NAME,
};

use crate::{log::prelude::*, media::MediaKind};

/// One room member as presented to UI consumers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Participant {
    /// First-seen relay ID of this member.
    pub id: EndpointId,

    /// Display name announced by the member.
    pub display_name: String,

    /// Announced microphone state.
    pub mic: Switch,

    /// Announced camera state.
    pub cam: Switch,

    /// Whether video from this member is actually flowing. Derived locally,
    /// never copied from announcements.
    pub video_on: bool,

    /// Raised-hand flag.
    pub hand_raised: bool,
}

/// Field-wise partial update of a [`Participant`]; unset fields keep their
/// previous values.
#[derive(Clone, Debug, Default)]
pub struct ParticipantUpdate {
    /// New display name.
    pub display_name: Option<String>,

    /// New microphone state.
    pub mic: Option<Switch>,

    /// New camera state.
    pub cam: Option<Switch>,

    /// New raised-hand state.
    pub hand_raised: Option<bool>,
}

impl From<ParticipantInfo> for ParticipantUpdate {
    /// Converts a wire roster entry into an update, deliberately dropping
    /// its `video_on` claim.
    fn from(info: ParticipantInfo) -> Self {
        Self {
            display_name: Some(info.name),
            mic: Some(info.mic),
            cam: Some(info.cam),
            hand_raised: Some(info.hand_raised),
        }
    }
}

#[derive(Debug)]
struct Entry {
    participant: Participant,
    live_audio: usize,
    live_video: usize,
}

/// Registry of call participants, insertion-ordered.
///
/// Some relays reassign transport ids mid-call; a later announcement that
/// carries an already-known display name under a fresh id is folded into
/// the first-seen entry instead of growing the roster, and the fresh id
/// keeps resolving to that entry. The relay's `"Guest"` placeholder (and
/// empty names) are exempt, since they are not identities.
#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    entries: HashMap<EndpointId, Entry>,
    order: Vec<EndpointId>,
    aliases: HashMap<EndpointId, EndpointId>,
    local_id: Option<EndpointId>,
}

impl ParticipantRegistry {
    /// Creates an empty [`ParticipantRegistry`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks which entry describes the local endpoint. Self entries never
    /// take part in display-name folding.
    pub fn set_local(&mut self, id: EndpointId) {
        self.local_id = Some(id);
    }

    /// Merges `update` into the participant known under `id`, creating the
    /// entry if needed. Returns the canonical id the update landed on.
    pub fn upsert(
        &mut self,
        id: EndpointId,
        update: ParticipantUpdate,
    ) -> EndpointId {
        let canonical = self.canonicalize(id, update.display_name.as_deref());

        if !self.entries.contains_key(&canonical) {
            self.order.push(canonical.clone());
            self.entries.insert(
                canonical.clone(),
                Entry {
                    participant: Participant {
                        id: canonical.clone(),
                        display_name: PLACEHOLDER_NAME.to_owned(),
                        mic: Switch::Off,
                        cam: Switch::Off,
                        video_on: false,
                        hand_raised: false,
                    },
                    live_audio: 0,
                    live_video: 0,
                },
            );
        }

        if let Some(entry) = self.entries.get_mut(&canonical) {
            let participant = &mut entry.participant;
            if let Some(name) = update.display_name {
                participant.display_name = name;
            }
            if let Some(mic) = update.mic {
                participant.mic = mic;
            }
            if let Some(cam) = update.cam {
                participant.cam = cam;
            }
            if let Some(hand_raised) = update.hand_raised {
                participant.hand_raised = hand_raised;
            }
            recompute(entry);
        }

        canonical
    }

    /// Records a live media track observed from (or, for the local entry,
    /// bound towards) the given participant.
    pub fn track_live(&mut self, id: &EndpointId, kind: MediaKind) {
        let canonical = self.resolve(id);
        if let Some(entry) = self.entries.get_mut(&canonical) {
            match kind {
                MediaKind::Audio => entry.live_audio += 1,
                MediaKind::Video => entry.live_video += 1,
            }
            recompute(entry);
        }
    }

    /// Records the end of a media track of the given participant.
    pub fn track_ended(&mut self, id: &EndpointId, kind: MediaKind) {
        let canonical = self.resolve(id);
        if let Some(entry) = self.entries.get_mut(&canonical) {
            match kind {
                MediaKind::Audio => {
                    entry.live_audio = entry.live_audio.saturating_sub(1);
                }
                MediaKind::Video => {
                    entry.live_video = entry.live_video.saturating_sub(1);
                }
            }
            recompute(entry);
        }
    }

    /// Removes the participant known under `id` (directly or through an
    /// alias), returning its entry.
    pub fn remove(&mut self, id: &EndpointId) -> Option<Participant> {
        let canonical = self.resolve(id);
        let removed = self.entries.remove(&canonical)?;
        self.order.retain(|known| *known != canonical);
        self.aliases.retain(|_, target| *target != canonical);

        Some(removed.participant)
    }

    /// Returns the participant known under `id`, if any.
    #[must_use]
    pub fn get(&self, id: &EndpointId) -> Option<&Participant> {
        self.entries.get(&self.resolve(id)).map(|e| &e.participant)
    }

    /// Clones the current roster in join order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Participant> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|entry| entry.participant.clone())
            .collect()
    }

    /// Number of distinct participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Indicates whether the roster is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops all entries and aliases.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.aliases.clear();
    }

    /// Follows a recorded alias, if any.
    fn resolve(&self, id: &EndpointId) -> EndpointId {
        self.aliases.get(id).unwrap_or(id).clone()
    }

    /// Decides which entry an announcement under `id` belongs to: an
    /// existing alias target, the entry itself, or (when a fresh id
    /// carries an already-known real display name) the first-seen entry
    /// announcing that name.
    fn canonicalize(
        &mut self,
        id: EndpointId,
        announced_name: Option<&str>,
    ) -> EndpointId {
        let resolved = self.resolve(&id);
        if self.entries.contains_key(&resolved) {
            return resolved;
        }

        let name = match announced_name {
            Some(name) if !name.is_empty() && name != PLACEHOLDER_NAME => name,
            _ => return resolved,
        };

        let first_seen = self.order.iter().find(|known| {
            Some(*known) != self.local_id.as_ref()
                && self
                    .entries
                    .get(*known)
                    .map_or(false, |e| e.participant.display_name == name)
        });
        match first_seen {
            Some(original) => {
                debug!(
                    "folding re-announced participant [id = {}] into \
                     [id = {}]",
                    id, original,
                );
                let original = original.clone();
                self.aliases.insert(id, original.clone());
                original
            }
            None => resolved,
        }
    }
}

/// Recomputes the derived `video_on` flag of one entry.
fn recompute(entry: &mut Entry) {
    entry.participant.video_on =
        entry.participant.cam.is_on() && entry.live_video > 0;
}
