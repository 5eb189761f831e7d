//! Hardware simulator for unit tests, integration tests and benchmarks.
//!
//! Rings and buffers are heap [`DmaRegion`]s whose bus address equals their
//! virtual address, and doorbells are leaked memory cells. [`SimHba`] plays
//! the adapter: it writes EQEs and CQEs at its own producer indices, reads
//! WQEs the driver posted, and places received frames into the buffers the
//! driver posted on the RQ pair. Enable the `test-utils` feature to use it.

use std::ptr::NonNull;

use crate::cqe::{CQE_SIZE, Cqe, CqeBuilder, EQE_SIZE, Eqe};
use crate::dma::DmaRegion;
use crate::doorbell::Doorbell;
use crate::frame::{FC_HEADER_LEN, FcFrameHeader};
use crate::queue::{QueueSet, RQE_SIZE, SliQueue};
use crate::rq::{RQ_BUFFER_SIZE, RqPair};
use crate::types::{QueueKind, WqeSize, rq_status};
use crate::wqe::Wqe;

/// Size of each simulated header buffer.
pub const HDR_BUFFER_SIZE: usize = 128;

/// A doorbell register backed by a leaked memory cell.
#[derive(Debug, Clone, Copy)]
pub struct SimDoorbell {
    reg: NonNull<u32>,
}

impl Default for SimDoorbell {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDoorbell {
    pub fn new() -> Self {
        let cell: &'static mut u32 = Box::leak(Box::new(0));
        Self {
            reg: NonNull::from(cell),
        }
    }

    /// A doorbell handle writing to this cell.
    pub fn doorbell(&self) -> Doorbell {
        unsafe { Doorbell::new(self.reg) }
    }

    /// Last value written.
    pub fn last(&self) -> u32 {
        unsafe { std::ptr::read_volatile(self.reg.as_ptr()) }
    }

    pub fn clear(&self) {
        unsafe { std::ptr::write_volatile(self.reg.as_ptr(), 0) };
    }
}

fn entry_size(kind: QueueKind) -> usize {
    match kind {
        QueueKind::Event => EQE_SIZE,
        QueueKind::CompletionWq | QueueKind::CompletionRq => CQE_SIZE,
        QueueKind::Work => WqeSize::Extended.bytes(),
        QueueKind::RecvHeader | QueueKind::RecvPayload => RQE_SIZE,
    }
}

/// Heap-backed ring of `entries` entries of the kind's natural size
/// (128-byte WQEs for work queues).
pub fn sim_queue(kind: QueueKind, qid: u16, entries: u16, db: &SimDoorbell) -> SliQueue {
    sim_queue_sized(kind, qid, entries, entry_size(kind), db)
}

pub fn sim_queue_sized(
    kind: QueueKind,
    qid: u16,
    entries: u16,
    entry_size: usize,
    db: &SimDoorbell,
) -> SliQueue {
    let region = DmaRegion::alloc(entries as usize * entry_size, 4096)
        .unwrap_or_else(|| panic!("ring allocation of {} entries failed", entries));
    SliQueue::new(kind, qid, region, entry_size, db.doorbell())
        .unwrap_or_else(|e| panic!("bad simulated ring: {}", e))
}

/// `count` zeroed buffers of `size` bytes each.
pub fn heap_buffers(count: usize, size: usize) -> Vec<DmaRegion> {
    (0..count)
        .map(|i| {
            DmaRegion::alloc(size, 64)
                .unwrap_or_else(|| panic!("buffer {} allocation failed", i))
        })
        .collect()
}

/// Ring sizes and ids of a simulated queue pair.
#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    pub eq_entries: u16,
    pub cq_entries: u16,
    pub wq_entries: u16,
    pub rq_entries: u16,
    pub wqe_size: WqeSize,
    pub eq_id: u16,
    pub cq_wq_id: u16,
    pub cq_rq_id: u16,
    pub wq_id: u16,
    pub rq_hdr_id: u16,
    pub rq_payload_id: u16,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            eq_entries: 128,
            cq_entries: 128,
            wq_entries: 128,
            rq_entries: 32,
            wqe_size: WqeSize::Extended,
            eq_id: 10,
            cq_wq_id: 20,
            cq_rq_id: 21,
            wq_id: 30,
            rq_hdr_id: 40,
            rq_payload_id: 41,
        }
    }
}

/// Adapter-side view of one ring.
#[derive(Debug)]
struct SimRing {
    base: *mut u8,
    entry_size: usize,
    entries: u16,
    index: u16,
}

impl SimRing {
    fn of(q: &SliQueue) -> Self {
        Self {
            base: q.as_ptr(),
            entry_size: q.entry_size(),
            entries: q.max_entries(),
            index: 0,
        }
    }

    fn slot(&self, idx: u16) -> *mut u8 {
        unsafe { self.base.add((idx % self.entries) as usize * self.entry_size) }
    }

    /// Write at the producer index and advance it.
    fn produce(&mut self, bytes: &[u8]) -> u16 {
        let idx = self.index;
        unsafe {
            for (i, b) in bytes.iter().enumerate() {
                std::ptr::write_volatile(self.slot(idx).add(i), *b);
            }
        }
        self.index = (idx + 1) % self.entries;
        idx
    }

    /// Read the slot at the consumer index and advance it.
    fn consume(&mut self) -> (u16, Vec<u8>) {
        let idx = self.index;
        let bytes = self.read(idx);
        self.index = (idx + 1) % self.entries;
        (idx, bytes)
    }

    fn read(&self, idx: u16) -> Vec<u8> {
        let ptr = self.slot(idx);
        (0..self.entry_size)
            .map(|i| unsafe { std::ptr::read_volatile(ptr.add(i)) })
            .collect()
    }
}

/// Doorbells of a simulated queue pair.
#[derive(Debug, Clone, Copy)]
pub struct SimDoorbells {
    pub eq: SimDoorbell,
    pub cq_wq: SimDoorbell,
    pub cq_rq: SimDoorbell,
    pub wq: SimDoorbell,
    pub rq_hdr: SimDoorbell,
    pub rq_payload: SimDoorbell,
}

/// The adapter side of a simulated queue pair.
///
/// Holds raw pointers into the rings of the [`QueueSet`] it was created
/// with; it must not outlive those rings.
#[derive(Debug)]
pub struct SimHba {
    pub config: SimConfig,
    pub doorbells: SimDoorbells,
    eq: SimRing,
    cq_wq: SimRing,
    cq_rq: SimRing,
    wq: SimRing,
    rq_hdr: SimRing,
    rq_payload: SimRing,
}

impl SimHba {
    /// Build a queue set and the simulator driving it.
    pub fn new(config: SimConfig) -> (Self, QueueSet) {
        let doorbells = SimDoorbells {
            eq: SimDoorbell::new(),
            cq_wq: SimDoorbell::new(),
            cq_rq: SimDoorbell::new(),
            wq: SimDoorbell::new(),
            rq_hdr: SimDoorbell::new(),
            rq_payload: SimDoorbell::new(),
        };
        let c = &config;
        let eq = sim_queue(QueueKind::Event, c.eq_id, c.eq_entries, &doorbells.eq);
        let cq_wq = sim_queue(QueueKind::CompletionWq, c.cq_wq_id, c.cq_entries, &doorbells.cq_wq);
        let cq_rq = sim_queue(QueueKind::CompletionRq, c.cq_rq_id, c.cq_entries, &doorbells.cq_rq);
        let wq = sim_queue_sized(
            QueueKind::Work,
            c.wq_id,
            c.wq_entries,
            c.wqe_size.bytes(),
            &doorbells.wq,
        );
        let rq_hdr = sim_queue(QueueKind::RecvHeader, c.rq_hdr_id, c.rq_entries, &doorbells.rq_hdr);
        let rq_payload = sim_queue(
            QueueKind::RecvPayload,
            c.rq_payload_id,
            c.rq_entries,
            &doorbells.rq_payload,
        );

        let hba = Self {
            config,
            doorbells,
            eq: SimRing::of(&eq),
            cq_wq: SimRing::of(&cq_wq),
            cq_rq: SimRing::of(&cq_rq),
            wq: SimRing::of(&wq),
            rq_hdr: SimRing::of(&rq_hdr),
            rq_payload: SimRing::of(&rq_payload),
        };
        let rq = RqPair::new(
            rq_hdr,
            rq_payload,
            heap_buffers(config.rq_entries as usize, HDR_BUFFER_SIZE),
            heap_buffers(config.rq_entries as usize, RQ_BUFFER_SIZE),
        )
        .unwrap_or_else(|e| panic!("bad simulated RQ pair: {}", e));
        let queues = QueueSet {
            eq,
            cq_wq,
            cq_rq,
            wq,
            rq,
        };
        (hba, queues)
    }

    // =========================================================================
    // Event / completion injection
    // =========================================================================

    pub fn push_eqe(&mut self, eqe: Eqe) {
        self.eq.produce(&eqe.to_bytes());
    }

    /// Write a CQE to the WQ completion queue without raising an event.
    pub fn push_wq_cqe(&mut self, cqe: Cqe) {
        self.cq_wq.produce(&cqe.to_bytes());
    }

    /// Write a CQE to the RQ completion queue without raising an event.
    pub fn push_rq_cqe(&mut self, cqe: Cqe) {
        self.cq_rq.produce(&cqe.to_bytes());
    }

    /// Raise a standard event for the WQ completion queue.
    pub fn signal_wq_cq(&mut self) {
        self.push_eqe(Eqe::standard(self.config.cq_wq_id));
    }

    /// Raise a standard event for the RQ completion queue.
    pub fn signal_rq_cq(&mut self) {
        self.push_eqe(Eqe::standard(self.config.cq_rq_id));
    }

    /// Complete a WQE: CQE on the WQ completion queue plus an event.
    pub fn complete(&mut self, cqe: Cqe) {
        self.push_wq_cqe(cqe);
        self.signal_wq_cq();
    }

    /// Successful work completion for `request_tag`.
    pub fn complete_ok(&mut self, request_tag: u16) {
        self.complete(CqeBuilder::work_completion(request_tag, 0, 0).build());
    }

    // =========================================================================
    // Work queue
    // =========================================================================

    /// Take the next WQE the driver posted.
    pub fn take_wqe(&mut self) -> Wqe {
        let (_, bytes) = self.wq.consume();
        Wqe::from_bytes(&bytes)
    }

    /// Read WQ slot `idx` without consuming it.
    pub fn wqe_at(&self, idx: u16) -> Wqe {
        Wqe::from_bytes(&self.wq.read(idx))
    }

    /// WQEs consumed so far modulo the ring size.
    pub fn wq_index(&self) -> u16 {
        self.wq.index
    }

    // =========================================================================
    // Receive path
    // =========================================================================

    /// Bus address stored in RQ entry `idx`.
    fn rq_addr(ring: &SimRing, idx: u16) -> u64 {
        let e = ring.read(idx);
        let hi = u32::from_le_bytes([e[0], e[1], e[2], e[3]]) as u64;
        let lo = u32::from_le_bytes([e[4], e[5], e[6], e[7]]) as u64;
        (hi << 32) | lo
    }

    /// Place a frame into the next posted buffer pair and report it on the
    /// RQ completion queue. Returns the RQ slot used.
    pub fn deliver_frame(&mut self, header: &FcFrameHeader, payload: &[u8]) -> u16 {
        assert!(payload.len() <= RQ_BUFFER_SIZE, "payload larger than an RQ buffer");
        let slot = self.rq_hdr.index;
        let hdr_addr = Self::rq_addr(&self.rq_hdr, slot);
        let payload_addr = Self::rq_addr(&self.rq_payload, slot);
        let hdr_bytes: [u8; FC_HEADER_LEN] = header.to_be_bytes();
        unsafe {
            std::ptr::copy_nonoverlapping(hdr_bytes.as_ptr(), hdr_addr as *mut u8, FC_HEADER_LEN);
            std::ptr::copy_nonoverlapping(payload.as_ptr(), payload_addr as *mut u8, payload.len());
        }
        self.rq_hdr.index = (slot + 1) % self.rq_hdr.entries;
        self.rq_payload.index = (slot + 1) % self.rq_payload.entries;
        let cqe = CqeBuilder::async_frame(
            self.config.rq_hdr_id,
            slot,
            rq_status::SUCCESS,
            payload.len() as u16,
        )
        .build();
        self.push_rq_cqe(cqe);
        self.signal_rq_cq();
        slot
    }

    /// Report a receive failure for the next RQ slot.
    pub fn fail_frame(&mut self, status: u8) -> u16 {
        let slot = self.rq_hdr.index;
        self.rq_hdr.index = (slot + 1) % self.rq_hdr.entries;
        self.rq_payload.index = (slot + 1) % self.rq_payload.entries;
        let cqe = CqeBuilder::async_frame(self.config.rq_hdr_id, slot, status, 0).build();
        self.push_rq_cqe(cqe);
        self.signal_rq_cq();
        slot
    }

    /// Deliver a queue-sync marker completion for the next RQ slot.
    pub fn deliver_marker(&mut self, tag: u64) -> u16 {
        let slot = self.rq_hdr.index;
        self.rq_hdr.index = (slot + 1) % self.rq_hdr.entries;
        self.rq_payload.index = (slot + 1) % self.rq_payload.entries;
        self.push_rq_cqe(CqeBuilder::marker(self.config.rq_hdr_id, slot, tag).build());
        self.signal_rq_cq();
        slot
    }

    /// Report that the adapter finished tearing down `xri`.
    pub fn xri_aborted(&mut self, xri: u16) {
        self.complete(CqeBuilder::xri_aborted(xri, 0xffff).build());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_doorbell_records_last_write() {
        let db = SimDoorbell::new();
        db.doorbell().ring(5);
        db.doorbell().ring(9);
        assert_eq!(db.last(), 9);
        db.clear();
        assert_eq!(db.last(), 0);
    }

    #[test]
    fn test_injected_cqe_is_dequeued() {
        let (mut hba, mut queues) = SimHba::new(SimConfig::default());
        hba.complete_ok(7);
        let eqe = queues.eq.dequeue_eqe().unwrap();
        assert_eq!(eqe.resource_id(), hba.config.cq_wq_id);
        let cqe = queues.cq_wq.dequeue_cqe().unwrap();
        assert_eq!(cqe.code(), 0x01);
    }

    #[test]
    fn test_frame_lands_in_posted_buffers() {
        let (mut hba, mut queues) = SimHba::new(SimConfig::default());
        queues.rq.post_all().unwrap();
        let header = FcFrameHeader {
            r_ctl: 0x06,
            ox_id: 0x1234,
            ..Default::default()
        };
        let slot = hba.deliver_frame(&header, &[0xaa; 64]);
        assert_eq!(slot, 0);
        let buf = queues.rq.buffer_index_for(slot).unwrap();
        assert_eq!(queues.rq.frame_header(buf), Some(header));
        assert_eq!(queues.rq.payload_buffer(buf).unwrap().as_slice()[63], 0xaa);
    }
}
