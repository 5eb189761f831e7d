//! Doorbell register encoding and writes.
//!
//! Each ring kind has its own 32-bit doorbell layout. Software tells the
//! adapter how many entries it consumed (EQ/CQ) or posted (WQ/RQ), and for
//! EQ/CQ whether to re-arm interrupts.

use std::ptr::NonNull;

use crate::bits::{BitRange, Dwords};
use crate::types::QueueKind;

mod eq_db {
    use crate::bits::BitRange;

    pub const EQ_ID: BitRange = BitRange::new(0, 0, 9);
    pub const CI: BitRange = BitRange::bit(0, 9);
    pub const QT: BitRange = BitRange::bit(0, 10);
    pub const EQ_ID_EXT: BitRange = BitRange::new(0, 11, 5);
    pub const NUM_POPPED: BitRange = BitRange::new(0, 16, 13);
    pub const ARM: BitRange = BitRange::bit(0, 29);
}

mod cq_db {
    use crate::bits::BitRange;

    pub const CQ_ID: BitRange = BitRange::new(0, 0, 10);
    pub const CQ_ID_EXT: BitRange = BitRange::new(0, 11, 5);
    pub const NUM_POPPED: BitRange = BitRange::new(0, 16, 13);
    pub const ARM: BitRange = BitRange::bit(0, 29);
    pub const SOLICIT_ENABLE: BitRange = BitRange::bit(0, 31);
}

mod wq_db {
    use crate::bits::BitRange;

    pub const WQ_ID: BitRange = BitRange::new(0, 0, 16);
    pub const WQ_INDEX: BitRange = BitRange::new(0, 16, 8);
    pub const NUM_POSTED: BitRange = BitRange::new(0, 24, 8);
}

mod rq_db {
    use crate::bits::BitRange;

    pub const RQ_ID: BitRange = BitRange::new(0, 0, 16);
    pub const NUM_POSTED: BitRange = BitRange::new(0, 16, 14);
}

fn set(word: &mut Dwords<1>, f: BitRange, v: u32) {
    word.set(f, v);
}

/// Encode the doorbell word for a ring.
///
/// `head` is only used by work queues (low 8 bits of the producer index).
pub fn encode(kind: QueueKind, qid: u16, head: u16, rearm: bool, count: u16) -> u32 {
    let qid = qid as u32;
    let count = count as u32;
    let mut w = Dwords::<1>::new();
    match kind {
        QueueKind::Event => {
            set(&mut w, eq_db::QT, 1);
            set(&mut w, eq_db::CI, 1);
            set(&mut w, eq_db::NUM_POPPED, count);
            set(&mut w, eq_db::EQ_ID, qid & 0x1ff);
            set(&mut w, eq_db::EQ_ID_EXT, (qid >> 9) & 0x1f);
            set(&mut w, eq_db::ARM, rearm as u32);
        }
        QueueKind::CompletionWq | QueueKind::CompletionRq => {
            set(&mut w, cq_db::NUM_POPPED, count);
            set(&mut w, cq_db::CQ_ID, qid & 0x3ff);
            set(&mut w, cq_db::CQ_ID_EXT, (qid >> 10) & 0x1f);
            set(&mut w, cq_db::SOLICIT_ENABLE, 0);
            set(&mut w, cq_db::ARM, rearm as u32);
        }
        QueueKind::Work => {
            set(&mut w, wq_db::WQ_ID, qid);
            set(&mut w, wq_db::WQ_INDEX, head as u32 & 0xff);
            set(&mut w, wq_db::NUM_POSTED, count);
        }
        QueueKind::RecvHeader | QueueKind::RecvPayload => {
            set(&mut w, rq_db::RQ_ID, qid);
            set(&mut w, rq_db::NUM_POSTED, count);
        }
    }
    w.word(0)
}

/// An MMIO doorbell register.
#[derive(Debug)]
pub struct Doorbell {
    reg: NonNull<u32>,
}

impl Doorbell {
    /// # Safety
    /// `reg` must point to a mapped, 4-byte aligned doorbell register (or
    /// memory standing in for one) that outlives this value.
    pub unsafe fn new(reg: NonNull<u32>) -> Self {
        Self { reg }
    }

    /// Write `value` after a full write barrier, so every prior store to
    /// queue memory is visible to the adapter first.
    #[inline]
    pub fn ring(&self, value: u32) {
        doorbell_wmb!();
        unsafe { std::ptr::write_volatile(self.reg.as_ptr(), value) };
        tracing::trace!(reg = ?self.reg, value, "doorbell");
    }

    pub fn as_ptr(&self) -> *mut u32 {
        self.reg.as_ptr()
    }
}
