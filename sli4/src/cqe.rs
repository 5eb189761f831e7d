//! Event and completion queue entry decoding.
//!
//! An EQE is a single 32-bit word; a CQE is four words with the event code at
//! byte 14 and the valid bit at byte 15 bit 7. Decoding reads the event code
//! first and then hands the words to a per-variant parser, so one
//! variant's fields are never read out of another variant's layout.

use crate::bits::{BitRange, Dwords};
use crate::types::{
    CqeCode, DiError, EQE_MAJOR_SENTINEL, EQE_MAJOR_STANDARD, XriAbortFlags, local_reject,
    rq_status, wcqe_status,
};

/// EQE size in bytes.
pub const EQE_SIZE: usize = 4;
/// CQE size in bytes.
pub const CQE_SIZE: usize = 16;

// =============================================================================
// EQE
// =============================================================================

mod eqe_field {
    use crate::bits::BitRange;

    pub const VALID: BitRange = BitRange::bit(0, 0);
    pub const MAJOR_CODE: BitRange = BitRange::new(0, 1, 3);
    pub const MINOR_CODE: BitRange = BitRange::new(0, 4, 12);
    pub const RESOURCE_ID: BitRange = BitRange::new(0, 16, 16);
}

/// Raw event queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eqe(Dwords<1>);

/// Meaning of an EQE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqEvent {
    /// Completion pending on the CQ with this id.
    Completion { cq_id: u16 },
    /// The EQ overflowed; every CQ must be drained.
    Sentinel,
    /// Major code this driver does not handle.
    Unsupported { major: u8, minor: u16 },
}

impl Eqe {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Dwords::from_le_bytes(bytes))
    }

    pub fn from_word(word: u32) -> Self {
        Self(Dwords::from_words([word]))
    }

    /// Build a standard EQE pointing at `cq_id`, with the valid bit set.
    pub fn standard(cq_id: u16) -> Self {
        let mut d = Dwords::new();
        d.set_flag(eqe_field::VALID, true);
        d.set(eqe_field::MAJOR_CODE, EQE_MAJOR_STANDARD as u32);
        d.set(eqe_field::RESOURCE_ID, cq_id as u32);
        Self(d)
    }

    /// Build a sentinel EQE, with the valid bit set.
    pub fn sentinel() -> Self {
        let mut d = Dwords::new();
        d.set_flag(eqe_field::VALID, true);
        d.set(eqe_field::MAJOR_CODE, EQE_MAJOR_SENTINEL as u32);
        Self(d)
    }

    pub fn word(&self) -> u32 {
        self.0.word(0)
    }

    pub fn to_bytes(&self) -> [u8; EQE_SIZE] {
        self.word().to_le_bytes()
    }

    pub fn valid(&self) -> bool {
        self.0.flag(eqe_field::VALID)
    }

    pub fn major_code(&self) -> u8 {
        self.0.get(eqe_field::MAJOR_CODE) as u8
    }

    pub fn minor_code(&self) -> u16 {
        self.0.get(eqe_field::MINOR_CODE) as u16
    }

    pub fn resource_id(&self) -> u16 {
        self.0.get(eqe_field::RESOURCE_ID) as u16
    }

    pub fn event(&self) -> EqEvent {
        match self.major_code() {
            EQE_MAJOR_STANDARD => EqEvent::Completion {
                cq_id: self.resource_id(),
            },
            EQE_MAJOR_SENTINEL => EqEvent::Sentinel,
            major => EqEvent::Unsupported {
                major,
                minor: self.minor_code(),
            },
        }
    }
}

// =============================================================================
// CQE field tables
// =============================================================================

/// Fields shared by every CQE.
mod common {
    use crate::bits::BitRange;

    pub const CODE: BitRange = BitRange::new(3, 16, 8);
    pub const VALID: BitRange = BitRange::bit(3, 31);
}

/// Work completion (0x01).
mod wcqe {
    use crate::bits::BitRange;

    pub const HW_STATUS: BitRange = BitRange::new(0, 0, 8);
    pub const STATUS: BitRange = BitRange::new(0, 8, 8);
    pub const REQUEST_TAG: BitRange = BitRange::new(0, 16, 16);
    pub const WQE_SPECIFIC_1: BitRange = BitRange::new(1, 0, 32);
    pub const WQE_SPECIFIC_2: BitRange = BitRange::new(2, 0, 32);
    pub const QX: BitRange = BitRange::bit(3, 15);
    pub const PRI: BitRange = BitRange::new(3, 24, 3);
    pub const PV: BitRange = BitRange::bit(3, 27);
    pub const XB: BitRange = BitRange::bit(3, 28);
    pub const RHA: BitRange = BitRange::bit(3, 29);
}

/// WQ release (0x02).
mod release {
    use crate::bits::BitRange;

    pub const WQE_INDEX: BitRange = BitRange::new(2, 0, 16);
    pub const WQ_ID: BitRange = BitRange::new(2, 16, 16);
}

/// Async receive (0x04).
mod rcqe {
    use crate::bits::BitRange;

    pub const STATUS: BitRange = BitRange::new(0, 8, 8);
    pub const RQ_ELEMENT_INDEX: BitRange = BitRange::new(0, 16, 12);
    pub const FCFI: BitRange = BitRange::new(2, 0, 6);
    pub const RQ_ID: BitRange = BitRange::new(2, 6, 10);
    pub const PDPL: BitRange = BitRange::new(2, 16, 16);
    pub const SOF: BitRange = BitRange::new(3, 0, 8);
    pub const EOF: BitRange = BitRange::new(3, 8, 8);
    pub const HDPL: BitRange = BitRange::new(3, 24, 6);
}

/// Async receive, revision 1 (0x09).
mod rcqe_v1 {
    use crate::bits::BitRange;

    pub const STATUS: BitRange = BitRange::new(0, 8, 8);
    pub const RQ_ELEMENT_INDEX: BitRange = BitRange::new(0, 16, 15);
    pub const FCFI: BitRange = BitRange::new(1, 0, 6);
    pub const RQ_ID: BitRange = BitRange::new(2, 0, 16);
    pub const PDPL: BitRange = BitRange::new(2, 16, 16);
    pub const SOF: BitRange = BitRange::new(3, 0, 8);
    pub const EOF: BitRange = BitRange::new(3, 8, 8);
    pub const HDPL: BitRange = BitRange::new(3, 24, 6);
}

/// Receive marker (0x1D).
mod marker {
    use crate::bits::BitRange;

    pub const STATUS: BitRange = BitRange::new(0, 8, 8);
    pub const RQ_ELEMENT_INDEX: BitRange = BitRange::new(0, 16, 15);
    pub const IV: BitRange = BitRange::bit(0, 31);
    pub const TAG_LOWER: BitRange = BitRange::new(1, 0, 32);
    pub const TAG_HIGHER: BitRange = BitRange::new(2, 0, 32);
    pub const RQ_ID: BitRange = BitRange::new(3, 0, 16);
}

/// XRI aborted (0x05).
mod xri_aborted {
    use crate::bits::BitRange;

    pub const STATUS: BitRange = BitRange::new(0, 8, 8);
    pub const EXT_STATUS: BitRange = BitRange::new(1, 0, 32);
    pub const XRI: BitRange = BitRange::new(2, 0, 16);
    pub const REMOTE_XID: BitRange = BitRange::new(2, 16, 16);
    pub const XR: BitRange = BitRange::bit(3, 24);
    pub const EO: BitRange = BitRange::bit(3, 28);
    pub const BR: BitRange = BitRange::bit(3, 29);
    pub const IA: BitRange = BitRange::bit(3, 30);
}

/// Optimized write command (0x0B).
mod opt_write_cmd {
    use crate::bits::BitRange;

    pub const STATUS: BitRange = BitRange::new(0, 8, 8);
    pub const RQ_ELEMENT_INDEX: BitRange = BitRange::new(0, 16, 15);
    pub const IV: BitRange = BitRange::bit(0, 31);
    pub const FCFI: BitRange = BitRange::new(1, 0, 6);
    pub const OOX: BitRange = BitRange::bit(1, 14);
    pub const AGXR: BitRange = BitRange::bit(1, 15);
    pub const XRI: BitRange = BitRange::new(1, 16, 16);
    pub const RQ_ID: BitRange = BitRange::new(2, 0, 16);
    pub const PDPL: BitRange = BitRange::new(2, 16, 16);
    pub const RPI: BitRange = BitRange::new(3, 0, 16);
    pub const HDPL: BitRange = BitRange::new(3, 24, 6);
}

/// Optimized write data (0x0C).
mod opt_write_data {
    use crate::bits::BitRange;

    pub const HW_STATUS: BitRange = BitRange::new(0, 0, 8);
    pub const STATUS: BitRange = BitRange::new(0, 8, 8);
    pub const XRI: BitRange = BitRange::new(0, 16, 16);
    pub const TOTAL_DATA_PLACED: BitRange = BitRange::new(1, 0, 32);
    pub const EXT_STATUS: BitRange = BitRange::new(2, 0, 32);
    pub const XB: BitRange = BitRange::bit(3, 28);
}

// =============================================================================
// Decoded variants
// =============================================================================

/// Work completion for a WQE identified by its request tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkCompletion {
    pub hw_status: u8,
    pub status: u8,
    pub request_tag: u16,
    /// Word 1; total data placed for data-transfer WQEs.
    pub wqe_specific_1: u32,
    /// Word 2; the unmasked extended status.
    pub wqe_specific_2: u32,
    pub qx: bool,
    pub priority: u8,
    pub pv: bool,
    /// Exchange still busy in hardware.
    pub xb: bool,
    pub rha: bool,
}

impl WorkCompletion {
    /// Extended status masked according to the primary status.
    pub fn ext_status(&self) -> u32 {
        let mask = match self.status {
            wcqe_status::FCP_RSP_FAILURE
            | wcqe_status::NPORT_RJT
            | wcqe_status::FABRIC_RJT
            | wcqe_status::NPORT_BSY
            | wcqe_status::FABRIC_BSY
            | wcqe_status::LS_RJT
            | wcqe_status::DI_ERROR => u32::MAX,
            wcqe_status::LOCAL_REJECT | wcqe_status::CMD_REJECT => 0xff,
            _ => 0,
        };
        self.wqe_specific_2 & mask
    }

    pub fn total_data_placed(&self) -> u32 {
        self.wqe_specific_1
    }

    /// Protection-information error bits, present only with `DI_ERROR`.
    pub fn di_error(&self) -> Option<DiError> {
        (self.status == wcqe_status::DI_ERROR)
            .then(|| DiError::from_bits_truncate(self.wqe_specific_2))
    }

    /// Failure the adapter reports when an exchange is already gone or was
    /// aborted on request; no ABTS is needed for these.
    pub fn is_benign_reject(&self) -> bool {
        self.status == wcqe_status::LOCAL_REJECT
            && matches!(
                self.ext_status(),
                local_reject::NO_XRI | local_reject::INVALID_RPI | local_reject::ABORT_REQUESTED
            )
    }

    /// Whether the exchange must be torn down with an ABTS on the wire.
    pub fn abts_required(&self) -> bool {
        self.status != wcqe_status::SUCCESS && !self.is_benign_reject()
    }
}

/// Reclaim notification for WQ slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WqRelease {
    pub wqe_index: u16,
    pub wq_id: u16,
}

/// Layout revision of an async receive CQE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RcqeRevision {
    V0,
    V1,
}

/// A frame landed in the RQ header/payload pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncFrame {
    pub revision: RcqeRevision,
    pub status: u8,
    pub rq_element_index: u16,
    pub rq_id: u16,
    pub fcfi: u8,
    /// Payload data placement length.
    pub payload_len: u16,
    /// Header data placement length.
    pub header_len: u8,
    pub sof: u8,
    pub eof: u8,
}

impl AsyncFrame {
    pub fn is_success(&self) -> bool {
        self.status == rq_status::SUCCESS
    }
}

/// Completion of a queue-sync marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RqMarker {
    pub status: u8,
    pub rq_element_index: u16,
    pub rq_id: u16,
    pub iv: bool,
    pub tag: u64,
}

impl RqMarker {
    pub fn is_success(&self) -> bool {
        self.status == rq_status::SUCCESS
    }
}

/// The adapter finished tearing down an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XriAborted {
    pub status: u8,
    pub ext_status: u32,
    pub xri: u16,
    pub remote_xid: u16,
    pub xr: bool,
    pub eo: bool,
    pub br: bool,
    pub ia: bool,
}

impl XriAborted {
    pub fn flags(&self) -> XriAbortFlags {
        let mut flags = XriAbortFlags::empty();
        flags.set(XriAbortFlags::XR, self.xr);
        flags.set(XriAbortFlags::EO, self.eo);
        flags.set(XriAbortFlags::BR, self.br);
        flags.set(XriAbortFlags::IA, self.ia);
        flags
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizedWriteCmd {
    pub status: u8,
    pub rq_element_index: u16,
    pub iv: bool,
    pub fcfi: u8,
    pub oox: bool,
    pub agxr: bool,
    pub xri: u16,
    pub rq_id: u16,
    pub payload_len: u16,
    pub rpi: u16,
    pub header_len: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizedWriteData {
    pub hw_status: u8,
    pub status: u8,
    pub xri: u16,
    pub total_data_placed: u32,
    pub ext_status: u32,
    pub xb: bool,
}

/// A CQE classified by event code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CqeKind {
    WorkCompletion(WorkCompletion),
    WqRelease(WqRelease),
    AsyncFrame(AsyncFrame),
    Marker(RqMarker),
    XriAborted(XriAborted),
    OptimizedWriteCmd(OptimizedWriteCmd),
    OptimizedWriteData(OptimizedWriteData),
    /// Known code with no handler in this engine (coalescing, consumption,
    /// measurement, NVMe ERSP).
    Unhandled(CqeCode),
}

/// CQE decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown CQE event code {0:#04x}")]
    UnknownCode(u8),
}

// =============================================================================
// Raw CQE
// =============================================================================

/// Raw 16-byte completion queue entry, copied out of the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cqe(Dwords<4>);

impl Default for Cqe {
    fn default() -> Self {
        Self(Dwords::new())
    }
}

impl Cqe {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Dwords::from_le_bytes(bytes))
    }

    pub fn from_words(words: [u32; 4]) -> Self {
        Self(Dwords::from_words(words))
    }

    pub fn words(&self) -> &[u32; 4] {
        self.0.words()
    }

    pub fn to_bytes(&self) -> [u8; CQE_SIZE] {
        let mut out = [0u8; CQE_SIZE];
        self.0.write_le_bytes(&mut out);
        out
    }

    pub fn code(&self) -> u8 {
        self.0.get(common::CODE) as u8
    }

    pub fn valid(&self) -> bool {
        self.0.flag(common::VALID)
    }

    /// Exchange-busy bit of the generic layout.
    pub fn xb(&self) -> bool {
        self.0.flag(wcqe::XB)
    }

    pub fn decode(&self) -> Result<CqeKind, DecodeError> {
        let code = self.code();
        let kind = CqeCode::from_u8(code).ok_or(DecodeError::UnknownCode(code))?;
        let d = &self.0;
        Ok(match kind {
            CqeCode::WorkCompletion => CqeKind::WorkCompletion(WorkCompletion {
                hw_status: d.get(wcqe::HW_STATUS) as u8,
                status: d.get(wcqe::STATUS) as u8,
                request_tag: d.get(wcqe::REQUEST_TAG) as u16,
                wqe_specific_1: d.get(wcqe::WQE_SPECIFIC_1),
                wqe_specific_2: d.get(wcqe::WQE_SPECIFIC_2),
                qx: d.flag(wcqe::QX),
                priority: d.get(wcqe::PRI) as u8,
                pv: d.flag(wcqe::PV),
                xb: d.flag(wcqe::XB),
                rha: d.flag(wcqe::RHA),
            }),
            CqeCode::WqRelease => CqeKind::WqRelease(WqRelease {
                wqe_index: d.get(release::WQE_INDEX) as u16,
                wq_id: d.get(release::WQ_ID) as u16,
            }),
            CqeCode::RqAsync => CqeKind::AsyncFrame(AsyncFrame {
                revision: RcqeRevision::V0,
                status: d.get(rcqe::STATUS) as u8,
                rq_element_index: d.get(rcqe::RQ_ELEMENT_INDEX) as u16,
                rq_id: d.get(rcqe::RQ_ID) as u16,
                fcfi: d.get(rcqe::FCFI) as u8,
                payload_len: d.get(rcqe::PDPL) as u16,
                header_len: d.get(rcqe::HDPL) as u8,
                sof: d.get(rcqe::SOF) as u8,
                eof: d.get(rcqe::EOF) as u8,
            }),
            CqeCode::RqAsyncV1 => CqeKind::AsyncFrame(AsyncFrame {
                revision: RcqeRevision::V1,
                status: d.get(rcqe_v1::STATUS) as u8,
                rq_element_index: d.get(rcqe_v1::RQ_ELEMENT_INDEX) as u16,
                rq_id: d.get(rcqe_v1::RQ_ID) as u16,
                fcfi: d.get(rcqe_v1::FCFI) as u8,
                payload_len: d.get(rcqe_v1::PDPL) as u16,
                header_len: d.get(rcqe_v1::HDPL) as u8,
                sof: d.get(rcqe_v1::SOF) as u8,
                eof: d.get(rcqe_v1::EOF) as u8,
            }),
            CqeCode::RqMarker => CqeKind::Marker(RqMarker {
                status: d.get(marker::STATUS) as u8,
                rq_element_index: d.get(marker::RQ_ELEMENT_INDEX) as u16,
                rq_id: d.get(marker::RQ_ID) as u16,
                iv: d.flag(marker::IV),
                tag: ((d.get(marker::TAG_HIGHER) as u64) << 32) | d.get(marker::TAG_LOWER) as u64,
            }),
            CqeCode::XriAborted => CqeKind::XriAborted(XriAborted {
                status: d.get(xri_aborted::STATUS) as u8,
                ext_status: d.get(xri_aborted::EXT_STATUS),
                xri: d.get(xri_aborted::XRI) as u16,
                remote_xid: d.get(xri_aborted::REMOTE_XID) as u16,
                xr: d.flag(xri_aborted::XR),
                eo: d.flag(xri_aborted::EO),
                br: d.flag(xri_aborted::BR),
                ia: d.flag(xri_aborted::IA),
            }),
            CqeCode::OptimizedWriteCmd => CqeKind::OptimizedWriteCmd(OptimizedWriteCmd {
                status: d.get(opt_write_cmd::STATUS) as u8,
                rq_element_index: d.get(opt_write_cmd::RQ_ELEMENT_INDEX) as u16,
                iv: d.flag(opt_write_cmd::IV),
                fcfi: d.get(opt_write_cmd::FCFI) as u8,
                oox: d.flag(opt_write_cmd::OOX),
                agxr: d.flag(opt_write_cmd::AGXR),
                xri: d.get(opt_write_cmd::XRI) as u16,
                rq_id: d.get(opt_write_cmd::RQ_ID) as u16,
                payload_len: d.get(opt_write_cmd::PDPL) as u16,
                rpi: d.get(opt_write_cmd::RPI) as u16,
                header_len: d.get(opt_write_cmd::HDPL) as u8,
            }),
            CqeCode::OptimizedWriteData => CqeKind::OptimizedWriteData(OptimizedWriteData {
                hw_status: d.get(opt_write_data::HW_STATUS) as u8,
                status: d.get(opt_write_data::STATUS) as u8,
                xri: d.get(opt_write_data::XRI) as u16,
                total_data_placed: d.get(opt_write_data::TOTAL_DATA_PLACED),
                ext_status: d.get(opt_write_data::EXT_STATUS),
                xb: d.flag(opt_write_data::XB),
            }),
            other => CqeKind::Unhandled(other),
        })
    }
}

// =============================================================================
// Encoders (adapter side)
// =============================================================================

/// Builds CQEs the way the adapter writes them. Used by the hardware
/// simulator and by tests; the valid bit is always set.
#[derive(Debug, Clone, Copy, Default)]
pub struct CqeBuilder(Dwords<4>);

impl CqeBuilder {
    fn with_code(code: CqeCode) -> Self {
        let mut d = Dwords::new();
        d.set(common::CODE, code as u32);
        d.set_flag(common::VALID, true);
        Self(d)
    }

    pub fn work_completion(request_tag: u16, status: u8, ext_status: u32) -> Self {
        let mut b = Self::with_code(CqeCode::WorkCompletion);
        b.0.set(wcqe::REQUEST_TAG, request_tag as u32);
        b.0.set(wcqe::STATUS, status as u32);
        b.0.set(wcqe::WQE_SPECIFIC_2, ext_status);
        b
    }

    pub fn wq_release(wq_id: u16, wqe_index: u16) -> Self {
        let mut b = Self::with_code(CqeCode::WqRelease);
        b.0.set(release::WQ_ID, wq_id as u32);
        b.0.set(release::WQE_INDEX, wqe_index as u32);
        b
    }

    pub fn async_frame(rq_id: u16, rq_element_index: u16, status: u8, payload_len: u16) -> Self {
        let mut b = Self::with_code(CqeCode::RqAsync);
        b.0.set(rcqe::RQ_ID, rq_id as u32);
        b.0.set(rcqe::RQ_ELEMENT_INDEX, rq_element_index as u32);
        b.0.set(rcqe::STATUS, status as u32);
        b.0.set(rcqe::PDPL, payload_len as u32);
        b.0.set(rcqe::HDPL, 24);
        b
    }

    pub fn async_frame_v1(rq_id: u16, rq_element_index: u16, status: u8, payload_len: u16) -> Self {
        let mut b = Self::with_code(CqeCode::RqAsyncV1);
        b.0.set(rcqe_v1::RQ_ID, rq_id as u32);
        b.0.set(rcqe_v1::RQ_ELEMENT_INDEX, rq_element_index as u32);
        b.0.set(rcqe_v1::STATUS, status as u32);
        b.0.set(rcqe_v1::PDPL, payload_len as u32);
        b.0.set(rcqe_v1::HDPL, 24);
        b
    }

    pub fn marker(rq_id: u16, rq_element_index: u16, tag: u64) -> Self {
        let mut b = Self::with_code(CqeCode::RqMarker);
        b.0.set(marker::RQ_ID, rq_id as u32);
        b.0.set(marker::RQ_ELEMENT_INDEX, rq_element_index as u32);
        b.0.set(marker::STATUS, rq_status::SUCCESS as u32);
        b.0.set(marker::TAG_LOWER, tag as u32);
        b.0.set(marker::TAG_HIGHER, (tag >> 32) as u32);
        b
    }

    pub fn xri_aborted(xri: u16, remote_xid: u16) -> Self {
        let mut b = Self::with_code(CqeCode::XriAborted);
        b.0.set(xri_aborted::XRI, xri as u32);
        b.0.set(xri_aborted::REMOTE_XID, remote_xid as u32);
        b
    }

    /// Raw event code; lets tests produce codes the decoder rejects.
    pub fn raw_code(code: u8) -> Self {
        let mut d = Dwords::new();
        d.set(common::CODE, code as u32);
        d.set_flag(common::VALID, true);
        Self(d)
    }

    pub fn xb(mut self, on: bool) -> Self {
        self.0.set_flag(wcqe::XB, on);
        self
    }

    pub fn total_data_placed(mut self, len: u32) -> Self {
        self.0.set(wcqe::WQE_SPECIFIC_1, len);
        self
    }

    pub fn hw_status(mut self, hw_status: u8) -> Self {
        self.0.set(wcqe::HW_STATUS, hw_status as u32);
        self
    }

    pub fn build(self) -> Cqe {
        Cqe(self.0)
    }
}

/// Field used to read the request tag without a full decode.
pub const REQUEST_TAG_FIELD: BitRange = wcqe::REQUEST_TAG;
