//! Buffering of trickle ICE candidates that arrive before their session has
//! a remote description to attach them to.

use std::collections::VecDeque;

use confab_signal_proto::IceCandidate;

/// Per-peer FIFO of not-yet-applicable remote [`IceCandidate`]s.
///
/// Candidates are drained exactly once, in arrival order, when the remote
/// description becomes applicable. The queue is capped: trickle gathering is
/// bounded in practice, so growth past the cap means the peer is broken and
/// its session should be torn down instead of hoarding memory.
#[derive(Debug)]
pub struct CandidateBuffer {
    queue: VecDeque<IceCandidate>,
    cap: usize,
}

/// [`CandidateBuffer`] grew past its configured cap.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CandidateOverflow;

impl CandidateBuffer {
    /// Creates an empty buffer holding at most `cap` candidates.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            cap,
        }
    }

    /// Appends a candidate, rejecting it once the cap is reached.
    pub fn push(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<(), CandidateOverflow> {
        if self.queue.len() >= self.cap {
            return Err(CandidateOverflow);
        }
        self.queue.push_back(candidate);
        Ok(())
    }

    /// Removes and returns all buffered candidates in arrival order.
    pub fn drain(&mut self) -> impl Iterator<Item = IceCandidate> + '_ {
        self.queue.drain(..)
    }

    /// Drops all buffered candidates.
    #[inline]
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Number of buffered candidates.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Indicates whether the buffer holds no candidates.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: u16) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{}", n),
            sdp_mid: Some("0".to_owned()),
            sdp_m_line_index: Some(n),
        }
    }

    #[test]
    fn drains_in_arrival_order() {
        let mut buffer = CandidateBuffer::new(8);
        for n in 0..5 {
            buffer.push(candidate(n)).unwrap();
        }

        let drained: Vec<_> = buffer.drain().collect();

        assert_eq!(
            drained.iter().map(|c| c.sdp_m_line_index).collect::<Vec<_>>(),
            (0..5).map(Some).collect::<Vec<_>>(),
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn rejects_past_cap() {
        let mut buffer = CandidateBuffer::new(2);
        buffer.push(candidate(0)).unwrap();
        buffer.push(candidate(1)).unwrap();

        assert_eq!(buffer.push(candidate(2)), Err(CandidateOverflow));
        assert_eq!(buffer.len(), 2);
    }
}
