//! SLI-4 ring queues.
//!
//! A [`SliQueue`] is a fixed array of equally sized entries in DMA memory,
//! indexed by a software `head` (producer) and `tail` (consumer). Work and
//! receive rings are produced by software and consumed by the adapter;
//! event and completion rings go the other way and are gated by a per-entry
//! valid bit that software clears after reading.

use crate::cqe::{CQE_SIZE, Cqe, EQE_SIZE, Eqe};
use crate::dma::DmaRegion;
use crate::doorbell::{self, Doorbell};
use crate::rq::RqPair;
use crate::types::QueueKind;

/// RQ entries are a pair of 32-bit address words.
pub const RQE_SIZE: usize = 8;

/// Batching thresholds of a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    /// Entries processed between intermediate doorbell writes.
    pub posted_limit: u16,
    /// Entries processed per drain before yielding.
    pub processed_limit: u16,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            posted_limit: 16,
            processed_limit: 64,
        }
    }
}

/// Ring queue errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("{} queue full", .0.name())]
    Full(QueueKind),
    #[error("no valid entry at tail")]
    Empty,
    #[error("{op} not supported on {} queue", .kind.name())]
    WrongKind { kind: QueueKind, op: &'static str },
    #[error("{} queue: entry size {entry_size} does not match region of {region_len} bytes", .kind.name())]
    BadGeometry {
        kind: QueueKind,
        entry_size: usize,
        region_len: usize,
    },
    #[error("entry of {got} bytes does not fit {expected}-byte slot")]
    EntrySize { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Ring queue over a DMA region.
pub struct SliQueue {
    kind: QueueKind,
    qid: u16,
    region: DmaRegion,
    entry_size: usize,
    max_entries: u16,
    head: u16,
    tail: u16,
    used: u16,
    limits: QueueLimits,
    doorbell: Doorbell,
}

impl std::fmt::Debug for SliQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SliQueue")
            .field("kind", &self.kind)
            .field("qid", &self.qid)
            .field("entry_size", &self.entry_size)
            .field("max_entries", &self.max_entries)
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("used", &self.used)
            .finish()
    }
}

fn entry_size_ok(kind: QueueKind, size: usize) -> bool {
    match kind {
        QueueKind::Event => size == EQE_SIZE,
        QueueKind::CompletionWq | QueueKind::CompletionRq => size == CQE_SIZE,
        QueueKind::Work => size == 64 || size == 128,
        QueueKind::RecvHeader | QueueKind::RecvPayload => size == RQE_SIZE,
    }
}

impl SliQueue {
    /// Wrap an adapter-created ring. The entry count is `region.len() / entry_size`.
    pub fn new(
        kind: QueueKind,
        qid: u16,
        region: DmaRegion,
        entry_size: usize,
        doorbell: Doorbell,
    ) -> Result<Self> {
        let region_len = region.len();
        let geometry = QueueError::BadGeometry {
            kind,
            entry_size,
            region_len,
        };
        if !entry_size_ok(kind, entry_size) || region_len % entry_size != 0 {
            return Err(geometry);
        }
        let entries = region_len / entry_size;
        if entries < 2 || entries > u16::MAX as usize {
            return Err(geometry);
        }
        Ok(Self {
            kind,
            qid,
            region,
            entry_size,
            max_entries: entries as u16,
            head: 0,
            tail: 0,
            used: 0,
            limits: QueueLimits::default(),
            doorbell,
        })
    }

    pub fn with_limits(mut self, limits: QueueLimits) -> Self {
        self.limits = limits;
        self
    }

    #[inline]
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    #[inline]
    pub fn qid(&self) -> u16 {
        self.qid
    }

    #[inline]
    pub fn head(&self) -> u16 {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> u16 {
        self.tail
    }

    #[inline]
    pub fn used(&self) -> u16 {
        self.used
    }

    #[inline]
    pub fn max_entries(&self) -> u16 {
        self.max_entries
    }

    #[inline]
    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    #[inline]
    pub fn limits(&self) -> QueueLimits {
        self.limits
    }

    pub fn set_limits(&mut self, limits: QueueLimits) {
        self.limits = limits;
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.used >= self.max_entries
    }

    /// Bus address of the ring memory.
    pub fn phys(&self) -> u64 {
        self.region.phys()
    }

    /// CPU address of the ring memory.
    pub fn as_ptr(&self) -> *mut u8 {
        self.region.as_ptr()
    }

    pub fn doorbell(&self) -> &Doorbell {
        &self.doorbell
    }

    /// Raw bytes of slot `idx` (modulo the ring size).
    pub fn entry(&self, idx: u16) -> &[u8] {
        let idx = (idx % self.max_entries) as usize;
        let start = idx * self.entry_size;
        &self.region.as_slice()[start..start + self.entry_size]
    }

    #[inline]
    fn slot_ptr(&self, idx: u16) -> *mut u8 {
        unsafe { self.region.as_ptr().add(idx as usize * self.entry_size) }
    }

    #[inline]
    fn advance(&self, idx: u16) -> u16 {
        if idx + 1 == self.max_entries { 0 } else { idx + 1 }
    }

    fn check_submission(&self, op: &'static str) -> Result<()> {
        if self.kind.is_submission() {
            Ok(())
        } else {
            Err(QueueError::WrongKind {
                kind: self.kind,
                op,
            })
        }
    }

    fn check_completion(&self, op: &'static str) -> Result<()> {
        if self.kind.is_completion() {
            Ok(())
        } else {
            Err(QueueError::WrongKind {
                kind: self.kind,
                op,
            })
        }
    }

    /// Let `fill` write the slot at `head`, then advance head and count it used.
    ///
    /// The slot is zeroed before `fill` runs. Returns the slot index.
    pub fn enqueue_with(&mut self, fill: impl FnOnce(&mut [u8])) -> Result<u16> {
        self.check_submission("enqueue")?;
        if self.is_full() {
            return Err(QueueError::Full(self.kind));
        }
        let idx = self.head;
        let slot =
            unsafe { std::slice::from_raw_parts_mut(self.slot_ptr(idx), self.entry_size) };
        slot.fill(0);
        fill(slot);
        self.head = self.advance(idx);
        self.used += 1;
        Ok(idx)
    }

    /// Copy `entry` into the slot at `head`.
    pub fn enqueue(&mut self, entry: &[u8]) -> Result<u16> {
        if entry.len() > self.entry_size {
            return Err(QueueError::EntrySize {
                expected: self.entry_size,
                got: entry.len(),
            });
        }
        self.enqueue_with(|slot| slot[..entry.len()].copy_from_slice(entry))
    }

    /// Location of the valid bit: (byte offset, mask).
    fn valid_bit(&self) -> (usize, u8) {
        match self.kind {
            QueueKind::Event => (0, 0x01),
            _ => (CQE_SIZE - 1, 0x80),
        }
    }

    /// Copy the entry at `tail` into `out` if its valid bit is set, clear the
    /// valid bit in the ring and advance tail. `used` is left untouched.
    pub fn dequeue(&mut self, out: &mut [u8]) -> Result<()> {
        self.check_completion("dequeue")?;
        if out.len() < self.entry_size {
            return Err(QueueError::EntrySize {
                expected: self.entry_size,
                got: out.len(),
            });
        }
        let (offset, mask) = self.valid_bit();
        let slot = self.slot_ptr(self.tail);
        unsafe {
            let flag_ptr = slot.add(offset);
            let flags = std::ptr::read_volatile(flag_ptr);
            if flags & mask == 0 {
                return Err(QueueError::Empty);
            }
            udma_from_device_barrier!();
            for (i, b) in out[..self.entry_size].iter_mut().enumerate() {
                *b = std::ptr::read_volatile(slot.add(i));
            }
            std::ptr::write_volatile(flag_ptr, flags & !mask);
        }
        self.tail = self.advance(self.tail);
        Ok(())
    }

    pub fn dequeue_eqe(&mut self) -> Result<Eqe> {
        let mut raw = [0u8; EQE_SIZE];
        self.dequeue(&mut raw)?;
        Ok(Eqe::from_bytes(&raw))
    }

    pub fn dequeue_cqe(&mut self) -> Result<Cqe> {
        let mut raw = [0u8; CQE_SIZE];
        self.dequeue(&mut raw)?;
        Ok(Cqe::from_bytes(&raw))
    }

    /// Consumer side of a submission ring: the adapter took the entry at
    /// `tail`. Saturates at zero.
    pub fn retire(&mut self) {
        self.used = self.used.saturating_sub(1);
        self.tail = self.advance(self.tail);
    }

    /// Give back `n` slots after a release notification. Saturates at zero.
    pub fn reclaim(&mut self, n: u16) {
        self.used = self.used.saturating_sub(n);
    }

    /// Ring this queue's doorbell.
    pub fn notify(&self, rearm: bool, count: u16) {
        let value = doorbell::encode(self.kind, self.qid, self.head, rearm, count);
        self.doorbell.ring(value);
    }
}

/// The rings of one hardware queue pair as created by the adapter: one EQ
/// feeding a WQ completion queue and an RQ completion queue, one WQ and the
/// RQ header/payload pair.
#[derive(Debug)]
pub struct QueueSet {
    pub eq: SliQueue,
    pub cq_wq: SliQueue,
    pub cq_rq: SliQueue,
    pub wq: SliQueue,
    pub rq: RqPair,
}

impl QueueSet {
    /// Check every ring sits in its role.
    pub fn validate(&self) -> Result<()> {
        let roles = [
            (&self.eq, QueueKind::Event),
            (&self.cq_wq, QueueKind::CompletionWq),
            (&self.cq_rq, QueueKind::CompletionRq),
            (&self.wq, QueueKind::Work),
        ];
        for (q, kind) in roles {
            if q.kind() != kind {
                return Err(QueueError::WrongKind {
                    kind: q.kind(),
                    op: kind.name(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cqe::CqeBuilder;
    use crate::test_utils::SimDoorbell;

    fn ring(kind: QueueKind, entry_size: usize, entries: usize) -> (SliQueue, SimDoorbell) {
        let db = SimDoorbell::new();
        let region = DmaRegion::alloc(entry_size * entries, 64).unwrap();
        let q = SliQueue::new(kind, 3, region, entry_size, db.doorbell()).unwrap();
        (q, db)
    }

    #[test]
    fn test_enqueue_until_full() {
        let (mut q, _db) = ring(QueueKind::Work, 64, 4);
        for i in 0..4u16 {
            assert_eq!(q.enqueue(&[i as u8; 64]).unwrap(), i);
        }
        assert!(q.is_full());
        assert_eq!(q.enqueue(&[0; 64]), Err(QueueError::Full(QueueKind::Work)));
        assert_eq!(q.used(), 4);
        assert_eq!(q.head(), 0);
        assert_eq!(q.entry(2)[0], 2);
    }

    #[test]
    fn test_reclaim_and_wrap() {
        let (mut q, _db) = ring(QueueKind::Work, 64, 4);
        for _ in 0..4 {
            q.enqueue(&[1; 64]).unwrap();
        }
        q.reclaim(2);
        assert_eq!(q.used(), 2);
        assert_eq!(q.enqueue(&[7; 64]).unwrap(), 0);
        q.reclaim(10);
        assert_eq!(q.used(), 0);
    }

    #[test]
    fn test_dequeue_empty_does_not_move_tail() {
        let (mut q, _db) = ring(QueueKind::CompletionWq, CQE_SIZE, 8);
        assert_eq!(q.dequeue_cqe(), Err(QueueError::Empty));
        assert_eq!(q.tail(), 0);
    }

    #[test]
    fn test_dequeue_clears_valid_bit() {
        let (mut q, _db) = ring(QueueKind::CompletionWq, CQE_SIZE, 8);
        let cqe = CqeBuilder::work_completion(5, 0, 0).build();
        unsafe {
            std::ptr::copy_nonoverlapping(cqe.to_bytes().as_ptr(), q.as_ptr(), CQE_SIZE);
        }
        let got = q.dequeue_cqe().unwrap();
        assert_eq!(got, cqe);
        assert_eq!(q.tail(), 1);
        assert_eq!(q.entry(0)[15] & 0x80, 0);
        assert_eq!(q.dequeue_cqe(), Err(QueueError::Empty));
    }

    #[test]
    fn test_wrong_kind_is_an_error() {
        let (mut eq, _db) = ring(QueueKind::Event, EQE_SIZE, 8);
        assert!(matches!(
            eq.enqueue(&[0; 4]),
            Err(QueueError::WrongKind { op: "enqueue", .. })
        ));
        let (mut wq, _db2) = ring(QueueKind::Work, 64, 2);
        let mut out = [0u8; 64];
        assert!(matches!(
            wq.dequeue(&mut out),
            Err(QueueError::WrongKind { op: "dequeue", .. })
        ));
    }

    #[test]
    fn test_bad_geometry() {
        let db = SimDoorbell::new();
        let region = DmaRegion::alloc(100, 64).unwrap();
        assert!(matches!(
            SliQueue::new(QueueKind::Work, 1, region, 64, db.doorbell()),
            Err(QueueError::BadGeometry { .. })
        ));
        let region = DmaRegion::alloc(64, 64).unwrap();
        assert!(SliQueue::new(QueueKind::CompletionRq, 1, region, 8, db.doorbell()).is_err());
    }

    #[test]
    fn test_notify_encodes_head() {
        let (mut q, db) = ring(QueueKind::Work, 64, 4);
        q.enqueue(&[0; 64]).unwrap();
        q.notify(false, 1);
        assert_eq!(db.last(), 3 | (1 << 16) | (1 << 24));
    }

    #[test]
    fn test_retire_advances_tail() {
        let (mut q, _db) = ring(QueueKind::RecvHeader, RQE_SIZE, 2);
        q.enqueue(&[0; 8]).unwrap();
        q.enqueue(&[0; 8]).unwrap();
        q.retire();
        assert_eq!((q.used(), q.tail()), (1, 1));
        q.retire();
        assert_eq!((q.used(), q.tail()), (0, 0));
        q.retire();
        assert_eq!(q.used(), 0);
    }
}
