use crate::signaling::IceCandidate;

/// Local candidates discovered before the offer round-trip finished.
///
/// Append-only until [`drain`](Self::drain); the first drain empties the
/// buffer for good and later pushes are refused.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: Vec<IceCandidate>,
    drained: bool,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the candidate back when the buffer has already been drained.
    pub fn push(&mut self, candidate: IceCandidate) -> Result<(), IceCandidate> {
        if self.drained {
            return Err(candidate);
        }
        self.pending.push(candidate);
        Ok(())
    }

    /// Takes every buffered candidate in insertion order. Only the first
    /// call yields anything.
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        if self.drained {
            return Vec::new();
        }
        self.drained = true;
        std::mem::take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate::new(format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000 typ host"))
    }

    #[test]
    fn drains_in_insertion_order_once() {
        let mut buffer = CandidateBuffer::new();
        for n in 1..=3 {
            buffer.push(candidate(n)).unwrap();
        }
        assert_eq!(buffer.len(), 3);
        let drained = buffer.drain();
        assert_eq!(drained, vec![candidate(1), candidate(2), candidate(3)]);
        assert_eq!(buffer.len(), 0);
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn refuses_pushes_after_drain() {
        let mut buffer = CandidateBuffer::new();
        assert!(buffer.drain().is_empty());
        assert!(buffer.is_drained());
        assert_eq!(buffer.push(candidate(7)), Err(candidate(7)));
        assert_eq!(buffer.len(), 0);
    }
}
