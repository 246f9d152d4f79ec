//! Local media track handles and their per-kind bindings.

use derive_more::Display;

/// ID of a local [`TrackHandle`].
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub struct TrackId(pub u32);

/// Kind of media a track carries.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum MediaKind {
    /// Audio track.
    #[display(fmt = "audio")]
    Audio,

    /// Video track.
    #[display(fmt = "video")]
    Video,
}

/// Handle to a local capture track, owned by whatever captures media.
///
/// The engine never touches the media bytes; it only forwards handles to
/// per-peer senders through [`MediaConnection::replace_sender_track`].
///
/// [`MediaConnection::replace_sender_track`]:
/// crate::media::MediaConnection::replace_sender_track
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrackHandle {
    /// ID of the track.
    pub id: TrackId,

    /// Kind of media the track carries.
    pub kind: MediaKind,

    /// Whether the track is currently producing frames.
    pub enabled: bool,
}

impl TrackHandle {
    /// Creates a new enabled [`TrackHandle`].
    #[inline]
    #[must_use]
    pub fn new(id: TrackId, kind: MediaKind) -> Self {
        Self {
            id,
            kind,
            enabled: true,
        }
    }
}

/// Current local tracks bound (or about to be bound) to outbound senders,
/// one slot per [`MediaKind`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TrackBindings {
    audio: Option<TrackHandle>,
    video: Option<TrackHandle>,
}

impl TrackBindings {
    /// Returns the track bound for the given [`MediaKind`], if any.
    #[inline]
    #[must_use]
    pub fn get(&self, kind: MediaKind) -> Option<&TrackHandle> {
        match kind {
            MediaKind::Audio => self.audio.as_ref(),
            MediaKind::Video => self.video.as_ref(),
        }
    }

    /// Replaces the track bound for the given [`MediaKind`] returning the
    /// previous one.
    pub fn set(
        &mut self,
        kind: MediaKind,
        track: Option<TrackHandle>,
    ) -> Option<TrackHandle> {
        let slot = match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        };
        std::mem::replace(slot, track)
    }

    /// Indicates whether at least one enabled track of the given
    /// [`MediaKind`] is bound.
    #[must_use]
    pub fn has_enabled(&self, kind: MediaKind) -> bool {
        self.get(kind).map_or(false, |track| track.enabled)
    }

    /// Iterates over both kind slots in a fixed order.
    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (MediaKind, Option<&TrackHandle>)> + '_ {
        vec![
            (MediaKind::Audio, self.audio.as_ref()),
            (MediaKind::Video, self.video.as_ref()),
        ]
        .into_iter()
    }
}
