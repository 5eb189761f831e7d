//! Receive queue header/payload pair.
//!
//! The adapter splits every received frame across two rings posted in
//! lockstep: the FC header lands in a buffer from the header RQ and the
//! payload in a buffer from the payload RQ. Both rings always hold the same
//! number of entries and are indexed by the same slot. `rq_map` records which
//! buffer pair sits in each slot, since buffers retained by the upper layer
//! come back out of order.

use crate::dma::DmaRegion;
use crate::frame::{FC_HEADER_LEN, FcFrameHeader};
use crate::queue::{QueueError, RQE_SIZE, SliQueue};
use crate::types::QueueKind;

/// Largest RQ the pair supports.
pub const MAX_RQ_ENTRIES: usize = 4096;
/// Size of each payload buffer.
pub const RQ_BUFFER_SIZE: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RqError {
    #[error("header RQ has {hdr} entries but payload RQ has {payload}")]
    RingMismatch { hdr: u16, payload: u16 },
    #[error("RQ of {0} entries exceeds {MAX_RQ_ENTRIES}")]
    TooLarge(u16),
    #[error("expected {expected} buffer pairs, got {hdr} header and {payload} payload buffers")]
    BufferCount {
        expected: usize,
        hdr: usize,
        payload: usize,
    },
    #[error("buffer index {0} out of range")]
    BadBufferIndex(u16),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub struct RqPair {
    hdr: SliQueue,
    payload: SliQueue,
    hdr_bufs: Vec<DmaRegion>,
    payload_bufs: Vec<DmaRegion>,
    rq_map: Vec<u16>,
}

impl std::fmt::Debug for RqPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RqPair")
            .field("hdr", &self.hdr)
            .field("payload", &self.payload)
            .field("num_buffers", &self.hdr_bufs.len())
            .finish()
    }
}

/// One RQ entry: bus address, high word first.
fn rqe(addr: u64) -> [u8; RQE_SIZE] {
    let mut out = [0u8; RQE_SIZE];
    out[..4].copy_from_slice(&((addr >> 32) as u32).to_le_bytes());
    out[4..].copy_from_slice(&(addr as u32).to_le_bytes());
    out
}

impl RqPair {
    /// Pair two rings with one header and one payload buffer per slot.
    pub fn new(
        hdr: SliQueue,
        payload: SliQueue,
        hdr_bufs: Vec<DmaRegion>,
        payload_bufs: Vec<DmaRegion>,
    ) -> Result<Self, RqError> {
        for (q, kind) in [(&hdr, QueueKind::RecvHeader), (&payload, QueueKind::RecvPayload)] {
            if q.kind() != kind {
                return Err(QueueError::WrongKind {
                    kind: q.kind(),
                    op: "rq pair",
                }
                .into());
            }
        }
        if hdr.max_entries() != payload.max_entries() {
            return Err(RqError::RingMismatch {
                hdr: hdr.max_entries(),
                payload: payload.max_entries(),
            });
        }
        let entries = hdr.max_entries() as usize;
        if entries > MAX_RQ_ENTRIES {
            return Err(RqError::TooLarge(hdr.max_entries()));
        }
        if hdr_bufs.len() != entries || payload_bufs.len() != entries {
            return Err(RqError::BufferCount {
                expected: entries,
                hdr: hdr_bufs.len(),
                payload: payload_bufs.len(),
            });
        }
        Ok(Self {
            hdr,
            payload,
            hdr_bufs,
            payload_bufs,
            rq_map: vec![0; entries],
        })
    }

    pub fn hdr(&self) -> &SliQueue {
        &self.hdr
    }

    pub fn payload(&self) -> &SliQueue {
        &self.payload
    }

    pub fn num_buffers(&self) -> usize {
        self.payload_bufs.len()
    }

    /// Post every buffer pair once, in order, without ringing the doorbell.
    ///
    /// Returns the number of pairs posted.
    pub fn post_all(&mut self) -> Result<u16, RqError> {
        let n = self.num_buffers() as u16;
        for idx in 0..n {
            self.post(idx, false)?;
        }
        Ok(n)
    }

    /// Post buffer pair `buf_idx` at the head of both rings.
    ///
    /// Both rings are checked for space before either is written.
    pub fn post(&mut self, buf_idx: u16, notify: bool) -> Result<(), RqError> {
        let idx = buf_idx as usize;
        if idx >= self.num_buffers() {
            return Err(RqError::BadBufferIndex(buf_idx));
        }
        for q in [&self.payload, &self.hdr] {
            if q.is_full() {
                return Err(QueueError::Full(q.kind()).into());
            }
        }
        self.rq_map[self.hdr.head() as usize] = buf_idx;
        self.payload.enqueue(&rqe(self.payload_bufs[idx].phys()))?;
        self.hdr.enqueue(&rqe(self.hdr_bufs[idx].phys()))?;
        if notify {
            self.notify(1);
        }
        Ok(())
    }

    /// The adapter consumed the slot at tail; give `buf_idx` back at head.
    ///
    /// A bad `buf_idx` leaves both rings untouched.
    pub fn retire_and_repost(&mut self, buf_idx: u16) -> Result<(), RqError> {
        if buf_idx as usize >= self.num_buffers() {
            return Err(RqError::BadBufferIndex(buf_idx));
        }
        self.hdr.retire();
        self.payload.retire();
        self.post(buf_idx, true)
    }

    /// Ring the header RQ doorbell for `count` posted entries.
    pub fn notify(&self, count: u16) {
        self.hdr.notify(false, count);
    }

    /// Buffer pair index behind RQ slot `rq_element_index`.
    pub fn buffer_index_for(&self, rq_element_index: u16) -> Option<u16> {
        self.rq_map.get(rq_element_index as usize).copied()
    }

    /// Decode the FC header the adapter placed in header buffer `buf_idx`.
    pub fn frame_header(&self, buf_idx: u16) -> Option<FcFrameHeader> {
        let buf = self.hdr_bufs.get(buf_idx as usize)?;
        let bytes = buf.as_slice();
        if bytes.len() < FC_HEADER_LEN {
            return None;
        }
        Some(FcFrameHeader::from_be_bytes(&bytes[..FC_HEADER_LEN]))
    }

    pub fn payload_buffer(&self, buf_idx: u16) -> Option<&DmaRegion> {
        self.payload_bufs.get(buf_idx as usize)
    }

    pub fn payload_buffer_mut(&mut self, buf_idx: u16) -> Option<&mut DmaRegion> {
        self.payload_bufs.get_mut(buf_idx as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{SimDoorbell, heap_buffers, sim_queue};

    fn pair(entries: u16) -> (RqPair, SimDoorbell) {
        let db = SimDoorbell::new();
        let hdr = sim_queue(QueueKind::RecvHeader, 40, entries, &db);
        let payload = sim_queue(QueueKind::RecvPayload, 41, entries, &db);
        let rq = RqPair::new(
            hdr,
            payload,
            heap_buffers(entries as usize, 128),
            heap_buffers(entries as usize, RQ_BUFFER_SIZE),
        )
        .unwrap();
        (rq, db)
    }

    fn entry_addr(q: &SliQueue, slot: u16) -> u64 {
        let e = q.entry(slot);
        let hi = u32::from_le_bytes([e[0], e[1], e[2], e[3]]) as u64;
        let lo = u32::from_le_bytes([e[4], e[5], e[6], e[7]]) as u64;
        (hi << 32) | lo
    }

    #[test]
    fn test_post_all_fills_both_rings() {
        let (mut rq, _db) = pair(8);
        assert_eq!(rq.post_all().unwrap(), 8);
        assert_eq!(rq.hdr().used(), 8);
        assert_eq!(rq.payload().used(), 8);
        for slot in 0..8 {
            assert_eq!(rq.buffer_index_for(slot), Some(slot));
            assert_eq!(
                entry_addr(rq.payload(), slot),
                rq.payload_buffer(slot).unwrap().phys()
            );
        }
        assert_eq!(
            rq.post(0, false),
            Err(RqError::Queue(QueueError::Full(QueueKind::RecvPayload)))
        );
    }

    #[test]
    fn test_retire_and_repost_remaps_slot() {
        let (mut rq, db) = pair(4);
        rq.post_all().unwrap();
        // Slot 0 consumed; its buffer is still held upstream, buffer 2 comes back first.
        rq.retire_and_repost(2).unwrap();
        assert_eq!(rq.hdr().used(), 4);
        assert_eq!(rq.hdr().tail(), 1);
        assert_eq!(rq.buffer_index_for(0), Some(2));
        assert_eq!(db.last(), 40 | (1 << 16));
    }

    #[test]
    fn test_mismatched_rings_rejected() {
        let db = SimDoorbell::new();
        let hdr = sim_queue(QueueKind::RecvHeader, 1, 8, &db);
        let payload = sim_queue(QueueKind::RecvPayload, 2, 16, &db);
        let err = RqPair::new(hdr, payload, heap_buffers(8, 128), heap_buffers(16, 256));
        assert_eq!(
            err.map(|_| ()),
            Err(RqError::RingMismatch { hdr: 8, payload: 16 })
        );
    }

    #[test]
    fn test_buffer_count_checked() {
        let db = SimDoorbell::new();
        let hdr = sim_queue(QueueKind::RecvHeader, 1, 8, &db);
        let payload = sim_queue(QueueKind::RecvPayload, 2, 8, &db);
        let err = RqPair::new(hdr, payload, heap_buffers(8, 128), heap_buffers(7, 256));
        assert!(matches!(err, Err(RqError::BufferCount { expected: 8, .. })));
    }

    #[test]
    fn test_bad_buffer_index() {
        let (mut rq, _db) = pair(4);
        assert_eq!(rq.post(9, false), Err(RqError::BadBufferIndex(9)));
        assert_eq!(rq.buffer_index_for(4), None);
    }

    #[test]
    fn test_bad_repost_leaves_rings_untouched() {
        let (mut rq, _db) = pair(4);
        rq.post_all().unwrap();
        assert_eq!(rq.retire_and_repost(9), Err(RqError::BadBufferIndex(9)));
        assert_eq!(rq.hdr().tail(), 0);
        assert_eq!(rq.hdr().used(), 4);
        assert_eq!(rq.payload().tail(), 0);
        assert_eq!(rq.payload().used(), 4);
        // the slot is still there to be reposted properly
        rq.retire_and_repost(1).unwrap();
        assert_eq!(rq.hdr().tail(), 1);
    }
}
