//! [ICE] candidate handling settings.
//!
//! [ICE]: https://webrtcglossary.com/ice

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// [ICE] candidate handling settings.
///
/// [ICE]: https://webrtcglossary.com/ice
#[derive(Clone, Copy, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Ice {
    /// Cap of the per-peer queue holding trickle candidates that arrived
    /// before a remote description was applied. A peer exceeding it is
    /// considered broken and its session is torn down.
    ///
    /// Defaults to `64`.
    #[default = 64]
    pub candidate_queue_cap: usize,
}
