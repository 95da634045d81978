//! Circular buffers for the two staging areas of the filter.
//!
//! Each stage (input and output) holds one sample FIFO per channel plus a
//! metadata FIFO describing packet boundaries. The worker drains the input
//! stage one window at a time and refills the output stage; the host-facing
//! tick appends to the input stage and pops from the output stage.

use std::collections::VecDeque;

/// Framing metadata carried from input packets to output packets unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    /// Samples per channel in this packet.
    pub frames: u32,
    /// Host-supplied monotonic presentation timestamp in nanoseconds.
    pub timestamp: u64,
}

/// FIFO of f32 samples for a single channel.
#[derive(Debug, Default)]
pub(crate) struct SampleRing {
    samples: VecDeque<f32>,
}

impl SampleRing {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.samples.len()
    }

    pub(crate) fn push_slice(&mut self, samples: &[f32]) {
        self.samples.extend(samples.iter().copied());
    }

    /// Pop `dst.len()` samples from the front into `dst`.
    ///
    /// Pops fewer if the ring runs dry; returns the number written.
    pub(crate) fn pop_into(&mut self, dst: &mut [f32]) -> usize {
        let take = dst.len().min(self.samples.len());
        let (head, tail) = self.samples.as_slices();
        if take <= head.len() {
            dst[..take].copy_from_slice(&head[..take]);
        } else {
            dst[..head.len()].copy_from_slice(head);
            dst[head.len()..take].copy_from_slice(&tail[..take - head.len()]);
        }
        self.samples.drain(..take);
        take
    }
}

/// FIFO of packet descriptors with front push-back for partially consumed
/// entries.
#[derive(Debug, Default)]
pub(crate) struct PacketRing {
    infos: VecDeque<PacketInfo>,
}

impl PacketRing {
    pub(crate) fn len(&self) -> usize {
        self.infos.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub(crate) fn push_back(&mut self, info: PacketInfo) {
        self.infos.push_back(info);
    }

    pub(crate) fn pop_front(&mut self) -> Option<PacketInfo> {
        self.infos.pop_front()
    }

    /// Return a descriptor to the head of the ring, e.g. when the window
    /// assembler took fewer frames than the packet offers.
    pub(crate) fn push_front(&mut self, info: PacketInfo) {
        self.infos.push_front(info);
    }
}

/// One staging area: per-channel sample rings plus the matching packet ring.
///
/// Invariant: the sum of `frames` across `meta` equals every channel ring's
/// sample count; channels advance in lockstep.
#[derive(Debug)]
pub(crate) struct StageBuffers {
    pub(crate) pcm: Vec<SampleRing>,
    pub(crate) meta: PacketRing,
}

impl StageBuffers {
    pub(crate) fn new(channels: usize, capacity_per_channel: usize) -> Self {
        Self {
            pcm: (0..channels)
                .map(|_| SampleRing::with_capacity(capacity_per_channel))
                .collect(),
            meta: PacketRing::default(),
        }
    }

    /// Samples currently queued per channel (channel 0 is authoritative).
    pub(crate) fn queued_samples(&self) -> usize {
        self.pcm.first().map_or(0, SampleRing::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_ring_pops_in_fifo_order() {
        let mut ring = SampleRing::with_capacity(8);
        ring.push_slice(&[1.0, 2.0, 3.0, 4.0]);
        let mut dst = [0.0f32; 2];
        assert_eq!(ring.pop_into(&mut dst), 2);
        assert_eq!(dst, [1.0, 2.0]);
        assert_eq!(ring.pop_into(&mut dst), 2);
        assert_eq!(dst, [3.0, 4.0]);
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn sample_ring_pop_is_bounded_by_available() {
        let mut ring = SampleRing::with_capacity(4);
        ring.push_slice(&[0.5]);
        let mut dst = [0.0f32; 3];
        assert_eq!(ring.pop_into(&mut dst), 1);
        assert_eq!(dst[0], 0.5);
    }

    #[test]
    fn sample_ring_pop_spans_wrapped_storage() {
        let mut ring = SampleRing::with_capacity(4);
        // Force the deque to wrap by cycling through its capacity.
        ring.push_slice(&[1.0, 2.0, 3.0, 4.0]);
        let mut drain = [0.0f32; 3];
        ring.pop_into(&mut drain);
        ring.push_slice(&[5.0, 6.0, 7.0]);
        let mut dst = [0.0f32; 4];
        assert_eq!(ring.pop_into(&mut dst), 4);
        assert_eq!(dst, [4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn packet_ring_push_front_restores_order() {
        let mut ring = PacketRing::default();
        ring.push_back(PacketInfo {
            frames: 100,
            timestamp: 1,
        });
        ring.push_back(PacketInfo {
            frames: 200,
            timestamp: 2,
        });
        let first = ring.pop_front().unwrap();
        assert_eq!(first.frames, 100);
        ring.push_front(first);
        assert_eq!(ring.pop_front().unwrap().timestamp, 1);
        assert_eq!(ring.pop_front().unwrap().timestamp, 2);
        assert!(ring.is_empty());
    }

    #[test]
    fn stage_buffers_report_channel_zero_depth() {
        let mut stage = StageBuffers::new(2, 16);
        stage.pcm[0].push_slice(&[0.0; 5]);
        stage.pcm[1].push_slice(&[0.0; 5]);
        assert_eq!(stage.queued_samples(), 5);
        assert_eq!(stage.meta.len(), 0);
    }
}
