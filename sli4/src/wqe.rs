//! Work Queue Entry (WQE) encoders.
//!
//! Every WQE is built on the stack as a 128-byte [`Wqe`] and copied into the
//! work queue ring, which takes the first 64 or 128 bytes depending on the
//! queue's entry size. Words 6..=11 form a trailer shared by every command
//! (XRI tag, command, request tag, flag word, command type, WQEC and CQ id);
//! the remaining words are command specific.

use crate::bits::{BitRange, Dwords};
use crate::frame::{FC_HEADER_LEN, FcFrameHeader};
use crate::types::{
    ABORT_CRITERIA_XRI_TAG, CLASS_3, CONTEXT_RPI, CQ_ID_DEFAULT, DIR_READ, DIR_WRITE,
    MARKER_CATEGORY_ALL_RQ, MARKER_CATEGORY_ALL_RQ_EXCEPT_ONE, WqeSize, wqe_cmd_type,
    wqe_command,
};

/// Number of words in the largest (128-byte) WQE.
pub const WQE_WORDS: usize = 32;
/// Byte offset of inline payloads in extended WQEs.
pub const INLINE_OFFSET: usize = 64;
/// Largest inline payload an extended WQE can carry.
pub const MAX_INLINE_LEN: usize = 64;
/// Size of one SGE in bytes.
pub const SGE_SIZE: usize = 16;

/// Encoding failures for WQE variants that carry caller-sized data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("inline payload of {len} bytes exceeds {max} bytes")]
    InlineTooLarge { len: usize, max: usize },
    #[error("inline response length {0} is not a non-zero multiple of 4")]
    InlineMisaligned(usize),
}

// =============================================================================
// Field table
// =============================================================================

/// Bit ranges of the common WQE layout.
pub mod field {
    use crate::bits::BitRange;

    // BDE, words 0..=2 (or 13..=15 for the first data BDE)
    pub const BDE_LENGTH: BitRange = BitRange::new(0, 0, 24);
    pub const BDE_TYPE: BitRange = BitRange::new(0, 24, 8);
    pub const BDE_ADDR_LO: BitRange = BitRange::new(1, 0, 32);
    pub const BDE_ADDR_HI: BitRange = BitRange::new(2, 0, 32);

    // Word 6
    pub const XRI_TAG: BitRange = BitRange::new(6, 0, 16);
    pub const CONTEXT_TAG: BitRange = BitRange::new(6, 16, 16);

    // Word 7
    pub const DIF: BitRange = BitRange::new(7, 0, 2);
    pub const CT: BitRange = BitRange::new(7, 2, 2);
    pub const BS: BitRange = BitRange::new(7, 4, 3);
    pub const DNRX: BitRange = BitRange::bit(7, 4);
    pub const COMMAND: BitRange = BitRange::new(7, 8, 8);
    pub const CLASS: BitRange = BitRange::new(7, 16, 3);
    /// `ar` for data-send, `ag` for response.
    pub const AR: BitRange = BitRange::bit(7, 19);
    pub const PU: BitRange = BitRange::new(7, 20, 2);
    pub const CONF: BitRange = BitRange::bit(7, 22);
    pub const LNK: BitRange = BitRange::bit(7, 23);
    pub const TIMER: BitRange = BitRange::new(7, 24, 8);

    // Word 8
    pub const ABORT_TAG: BitRange = BitRange::new(8, 0, 32);

    // Word 9
    pub const REQUEST_TAG: BitRange = BitRange::new(9, 0, 16);
    pub const REMOTE_XID: BitRange = BitRange::new(9, 16, 16);

    // Word 10
    pub const EBDE_CNT: BitRange = BitRange::new(10, 0, 4);
    pub const NVME: BitRange = BitRange::bit(10, 4);
    pub const APPID: BitRange = BitRange::bit(10, 5);
    pub const OAS: BitRange = BitRange::bit(10, 6);
    pub const LEN_LOC: BitRange = BitRange::new(10, 7, 2);
    pub const QOSD: BitRange = BitRange::bit(10, 9);
    pub const WCHN: BitRange = BitRange::bit(10, 10);
    pub const XBL: BitRange = BitRange::bit(10, 11);
    pub const HLM: BitRange = BitRange::bit(10, 12);
    pub const IOD: BitRange = BitRange::bit(10, 13);
    pub const DBDE: BitRange = BitRange::bit(10, 14);
    pub const WQES: BitRange = BitRange::bit(10, 15);
    pub const PRI: BitRange = BitRange::new(10, 16, 3);
    pub const PV: BitRange = BitRange::bit(10, 19);
    pub const EAT: BitRange = BitRange::bit(10, 20);
    pub const XC: BitRange = BitRange::bit(10, 21);
    pub const SR: BitRange = BitRange::bit(10, 22);
    pub const CCPE: BitRange = BitRange::bit(10, 23);
    pub const CCP: BitRange = BitRange::new(10, 24, 8);

    // Word 11
    pub const CMD_TYPE: BitRange = BitRange::new(11, 0, 4);
    pub const IRSP: BitRange = BitRange::bit(11, 4);
    pub const PBDE: BitRange = BitRange::bit(11, 5);
    pub const SRIU: BitRange = BitRange::bit(11, 6);
    pub const WQEC: BitRange = BitRange::bit(11, 7);
    pub const IRSPLEN: BitRange = BitRange::new(11, 8, 4);
    pub const CQ_ID: BitRange = BitRange::new(11, 16, 16);

    // Command-specific words shared by several variants.
    pub const WORD3: BitRange = BitRange::new(3, 0, 32);
    pub const WORD4: BitRange = BitRange::new(4, 0, 32);
    pub const WORD12: BitRange = BitRange::new(12, 0, 32);
    pub const WORD15: BitRange = BitRange::new(15, 0, 32);

    // XMIT_SEQUENCE64 / GEN_REQUEST64 word 5
    pub const SEQ_SI: BitRange = BitRange::bit(5, 2);
    pub const SEQ_FT: BitRange = BitRange::bit(5, 3);
    pub const SEQ_XO: BitRange = BitRange::bit(5, 6);
    pub const SEQ_LS: BitRange = BitRange::bit(5, 7);
    pub const DF_CTL: BitRange = BitRange::new(5, 8, 8);
    pub const FC_TYPE: BitRange = BitRange::new(5, 16, 8);
    pub const R_CTL: BitRange = BitRange::new(5, 24, 8);
    pub const REMOTE_N_PORT_ID: BitRange = BitRange::new(3, 0, 24);

    // ABORT
    pub const EXT_T_TAG: BitRange = BitRange::new(2, 0, 32);
    pub const ABORT_IA: BitRange = BitRange::bit(3, 0);
    pub const ABORT_IR: BitRange = BitRange::bit(3, 1);
    pub const ABORT_CRITERIA: BitRange = BitRange::new(3, 8, 8);
    pub const EXT_T_MASK: BitRange = BitRange::new(4, 0, 32);
    pub const T_MASK: BitRange = BitRange::new(5, 0, 32);

    // XMIT_BLS_RSP
    pub const BLS_PAYLOAD_WORD0: BitRange = BitRange::new(0, 0, 32);
    pub const BLS_RX_ID: BitRange = BitRange::new(1, 0, 16);
    pub const BLS_OX_ID: BitRange = BitRange::new(1, 16, 16);
    pub const BLS_HIGH_SEQ_CNT: BitRange = BitRange::new(2, 0, 16);
    pub const BLS_LOW_SEQ_CNT: BitRange = BitRange::new(2, 16, 16);
    pub const BLS_LOCAL_N_PORT_ID: BitRange = BitRange::new(4, 0, 24);
    pub const BLS_REMOTE_ID: BitRange = BitRange::new(5, 0, 24);
    pub const BLS_AR: BitRange = BitRange::bit(5, 30);
    pub const BLS_XO: BitRange = BitRange::bit(5, 31);
    pub const BLS_TEMPORARY_RPI: BitRange = BitRange::new(12, 0, 16);

    // SEND_FRAME
    pub const SF_EOF: BitRange = BitRange::new(9, 16, 8);
    pub const SF_SOF: BitRange = BitRange::new(9, 24, 8);

    // MARKER
    pub const MARKER_CATEGORY: BitRange = BitRange::new(3, 0, 2);
    pub const MARKER_TAG_LOWER: BitRange = BitRange::new(4, 0, 32);
    pub const MARKER_TAG_HIGHER: BitRange = BitRange::new(5, 0, 32);
    pub const MARKER_RQ_ID: BitRange = BitRange::new(9, 16, 16);
}

// =============================================================================
// BDE / SGE
// =============================================================================

/// Buffer descriptor embedded in a WQE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bde {
    /// 64-bit data buffer.
    Data64 { addr: u64, len: u32 },
    /// Data inline in the WQE at byte `offset`.
    Immediate { offset: u32, len: u32 },
    /// Pointer to an SGL segment of `len` bytes.
    BufferList { addr: u64, len: u32 },
}

impl Bde {
    pub const TYPE_BDE_64: u32 = 0x00;
    pub const TYPE_IMM: u32 = 0x01;
    pub const TYPE_BLP: u32 = 0x40;

    /// Write the descriptor at words `base..base + 3`.
    pub fn write_to(&self, wqe: &mut Wqe, base: usize) {
        let at = |f: BitRange| BitRange::new(base + f.word, f.shift, f.width);
        let (ty, len, lo, hi) = match *self {
            Bde::Data64 { addr, len } => (Self::TYPE_BDE_64, len, addr as u32, (addr >> 32) as u32),
            Bde::Immediate { offset, len } => (Self::TYPE_IMM, len, offset, 0),
            Bde::BufferList { addr, len } => (Self::TYPE_BLP, len, addr as u32, (addr >> 32) as u32),
        };
        wqe.set(at(field::BDE_TYPE), ty);
        wqe.set(at(field::BDE_LENGTH), len);
        wqe.set(at(field::BDE_ADDR_LO), lo);
        wqe.set(at(field::BDE_ADDR_HI), hi);
    }

    /// Read back a descriptor from words `base..base + 3`.
    pub fn read_from(wqe: &Wqe, base: usize) -> Option<Bde> {
        let at = |f: BitRange| BitRange::new(base + f.word, f.shift, f.width);
        let len = wqe.get(at(field::BDE_LENGTH));
        let lo = wqe.get(at(field::BDE_ADDR_LO));
        let addr = ((wqe.get(at(field::BDE_ADDR_HI)) as u64) << 32) | lo as u64;
        match wqe.get(at(field::BDE_TYPE)) {
            Self::TYPE_BDE_64 => Some(Bde::Data64 { addr, len }),
            Self::TYPE_IMM => Some(Bde::Immediate { offset: lo, len }),
            Self::TYPE_BLP => Some(Bde::BufferList { addr, len }),
            _ => None,
        }
    }

    fn is_data(&self) -> bool {
        matches!(self, Bde::Data64 { .. })
    }
}

mod sge_field {
    use crate::bits::BitRange;

    pub const ADDR_HI: BitRange = BitRange::new(0, 0, 32);
    pub const ADDR_LO: BitRange = BitRange::new(1, 0, 32);
    pub const DATA_OFFSET: BitRange = BitRange::new(2, 0, 27);
    pub const TYPE: BitRange = BitRange::new(2, 27, 4);
    pub const LAST: BitRange = BitRange::bit(2, 31);
    pub const LENGTH: BitRange = BitRange::new(3, 0, 32);
}

/// Scatter-gather element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SgeType {
    Data,
    Skip,
}

impl SgeType {
    fn raw(self) -> u32 {
        match self {
            SgeType::Data => 0x00,
            SgeType::Skip => 0x0c,
        }
    }

    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0x00 => Some(SgeType::Data),
            0x0c => Some(SgeType::Skip),
            _ => None,
        }
    }
}

/// 16-byte scatter-gather element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sge {
    pub sge_type: SgeType,
    pub addr: u64,
    pub len: u32,
    pub data_offset: u32,
    pub last: bool,
}

impl Sge {
    pub fn data(addr: u64, len: u32) -> Self {
        Self {
            sge_type: SgeType::Data,
            addr,
            len,
            data_offset: 0,
            last: false,
        }
    }

    pub fn skip() -> Self {
        Self {
            sge_type: SgeType::Skip,
            addr: 0,
            len: 0,
            data_offset: 0,
            last: false,
        }
    }

    pub fn encode(&self) -> [u8; SGE_SIZE] {
        let mut d = Dwords::<4>::new();
        d.set(sge_field::ADDR_HI, (self.addr >> 32) as u32);
        d.set(sge_field::ADDR_LO, self.addr as u32);
        d.set(sge_field::DATA_OFFSET, self.data_offset);
        d.set(sge_field::TYPE, self.sge_type.raw());
        d.set_flag(sge_field::LAST, self.last);
        d.set(sge_field::LENGTH, self.len);
        let mut out = [0u8; SGE_SIZE];
        d.write_le_bytes(&mut out);
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let d = Dwords::<4>::from_le_bytes(bytes);
        Some(Self {
            sge_type: SgeType::from_raw(d.get(sge_field::TYPE))?,
            addr: ((d.get(sge_field::ADDR_HI) as u64) << 32) | d.get(sge_field::ADDR_LO) as u64,
            len: d.get(sge_field::LENGTH),
            data_offset: d.get(sge_field::DATA_OFFSET),
            last: d.flag(sge_field::LAST),
        })
    }
}

// =============================================================================
// Wqe
// =============================================================================

/// A fully built WQE.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Wqe(Dwords<WQE_WORDS>);

impl std::fmt::Debug for Wqe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wqe")
            .field("command", &format_args!("{:#04x}", self.command()))
            .field("request_tag", &self.request_tag())
            .field("xri_tag", &self.xri_tag())
            .field("words", &self.0)
            .finish()
    }
}

impl Wqe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Dwords::from_le_bytes(bytes))
    }

    #[inline]
    pub fn get(&self, f: BitRange) -> u32 {
        self.0.get(f)
    }

    #[inline]
    pub fn set(&mut self, f: BitRange, value: u32) {
        self.0.set(f, value);
    }

    #[inline]
    pub fn flag(&self, f: BitRange) -> bool {
        self.0.flag(f)
    }

    #[inline]
    pub fn set_flag(&mut self, f: BitRange, on: bool) {
        self.0.set_flag(f, on);
    }

    pub fn word(&self, idx: usize) -> u32 {
        self.0.word(idx)
    }

    pub fn command(&self) -> u8 {
        self.get(field::COMMAND) as u8
    }

    pub fn cmd_type(&self) -> u8 {
        self.get(field::CMD_TYPE) as u8
    }

    pub fn xri_tag(&self) -> u16 {
        self.get(field::XRI_TAG) as u16
    }

    pub fn request_tag(&self) -> u16 {
        self.get(field::REQUEST_TAG) as u16
    }

    pub fn set_request_tag(&mut self, tag: u16) {
        self.set(field::REQUEST_TAG, tag as u32);
    }

    pub fn wqec(&self) -> bool {
        self.flag(field::WQEC)
    }

    pub fn set_wqec(&mut self, on: bool) {
        self.set_flag(field::WQEC, on);
    }

    /// Serialize into a ring slot; writes `min(out.len(), 128)` bytes.
    pub fn write_to(&self, out: &mut [u8]) {
        self.0.write_le_bytes(out);
    }

    pub fn to_bytes(&self, size: WqeSize) -> Vec<u8> {
        let mut out = vec![0u8; size.bytes()];
        self.write_to(&mut out);
        out
    }

    /// Inline bytes starting at [`INLINE_OFFSET`].
    pub fn inline_bytes(&self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; 128];
        self.write_to(&mut out);
        out[INLINE_OFFSET..INLINE_OFFSET + len.min(MAX_INLINE_LEN)].to_vec()
    }

    fn put_inline(&mut self, bytes: &[u8]) {
        self.0.put_bytes(INLINE_OFFSET / 4, bytes);
    }

    /// Fields every engine-issued WQE carries: class 3, default CQ.
    fn base(command: u8, cmd_type: u8) -> Self {
        let mut w = Self::new();
        w.set(field::COMMAND, command as u32);
        w.set(field::CMD_TYPE, cmd_type as u32);
        w.set(field::CQ_ID, CQ_ID_DEFAULT as u32);
        w
    }
}

// =============================================================================
// Variants
// =============================================================================

/// FCP_TRECEIVE64: pull write data from the initiator.
#[derive(Debug, Clone, Copy)]
pub struct TReceive64 {
    pub bde: Bde,
    pub xri_tag: u16,
    pub rpi: u16,
    pub remote_xid: u16,
    pub relative_offset: u32,
    pub data_length: u32,
}

impl TReceive64 {
    pub fn encode(&self) -> Wqe {
        let mut w = Wqe::base(wqe_command::FCP_TRECEIVE64, wqe_cmd_type::FCP_TRECEIVE64);
        self.bde.write_to(&mut w, 0);
        w.set_flag(field::DBDE, self.bde.is_data());
        w.set_flag(field::XBL, true);
        w.set(field::WORD4, self.relative_offset);
        w.set(field::XRI_TAG, self.xri_tag as u32);
        w.set(field::CONTEXT_TAG, self.rpi as u32);
        w.set(field::PU, 1);
        w.set_flag(field::AR, false);
        w.set(field::CLASS, CLASS_3 as u32);
        w.set(field::CT, CONTEXT_RPI as u32);
        w.set(field::REMOTE_XID, self.remote_xid as u32);
        w.set_flag(field::NVME, true);
        w.set(field::IOD, DIR_READ as u32);
        w.set(field::LEN_LOC, 2);
        w.set(field::TIMER, 30);
        w.set(field::WORD12, self.data_length);
        w
    }
}

/// FCP_TSEND64: push read data to the initiator.
#[derive(Debug, Clone, Copy)]
pub struct TSend64 {
    pub bde: Bde,
    pub xri_tag: u16,
    pub rpi: u16,
    pub remote_xid: u16,
    pub relative_offset: u32,
    pub data_length: u32,
    /// Let the adapter generate the good response after the data.
    pub auto_response: bool,
}

impl TSend64 {
    pub fn encode(&self) -> Wqe {
        let mut w = Wqe::base(wqe_command::FCP_TSEND64, wqe_cmd_type::FCP_TSEND64);
        self.bde.write_to(&mut w, 0);
        w.set_flag(field::DBDE, self.bde.is_data());
        w.set_flag(field::XBL, true);
        w.set(field::WORD4, self.relative_offset);
        w.set(field::XRI_TAG, self.xri_tag as u32);
        w.set(field::CONTEXT_TAG, self.rpi as u32);
        w.set(field::PU, 1);
        w.set_flag(field::AR, self.auto_response);
        w.set(field::CLASS, CLASS_3 as u32);
        w.set(field::CT, CONTEXT_RPI as u32);
        w.set(field::REMOTE_XID, self.remote_xid as u32);
        w.set_flag(field::NVME, true);
        w.set(field::LEN_LOC, 2);
        w.set(field::WORD12, self.data_length);
        w
    }
}

/// FCP_TRSP64: send the response IU.
#[derive(Debug, Clone, Copy)]
pub struct TRsp64<'a> {
    pub xri_tag: u16,
    pub rpi: u16,
    pub remote_xid: u16,
    /// Exchange already has a data phase outstanding.
    pub exchange_continue: bool,
    /// Extended response IU to send inline; `None` auto-generates the
    /// 12-byte all-zero good response.
    pub inline_rsp: Option<&'a [u8]>,
}

impl TRsp64<'_> {
    pub fn encode(&self) -> Result<Wqe, EncodeError> {
        let mut w = Wqe::base(wqe_command::FCP_TRSP64, wqe_cmd_type::FCP_TRSP64);
        match self.inline_rsp {
            None => w.set_flag(field::AR, true),
            Some(rsp) => {
                if rsp.len() > MAX_INLINE_LEN {
                    return Err(EncodeError::InlineTooLarge {
                        len: rsp.len(),
                        max: MAX_INLINE_LEN,
                    });
                }
                if rsp.is_empty() || rsp.len() % 4 != 0 {
                    return Err(EncodeError::InlineMisaligned(rsp.len()));
                }
                w.set_flag(field::WQES, true);
                w.set_flag(field::IRSP, true);
                w.set(field::WORD3, rsp.len() as u32);
                w.set(field::IRSPLEN, ((rsp.len() >> 2) - 1) as u32);
                w.put_inline(rsp);
            }
        }
        w.set_flag(field::XC, self.exchange_continue);
        w.set(field::CLASS, CLASS_3 as u32);
        w.set(field::XRI_TAG, self.xri_tag as u32);
        w.set(field::REMOTE_XID, self.remote_xid as u32);
        w.set(field::CONTEXT_TAG, self.rpi as u32);
        w.set(field::LEN_LOC, 1);
        w.set_flag(field::NVME, true);
        Ok(w)
    }
}

/// ABORT by XRI tag.
#[derive(Debug, Clone, Copy)]
pub struct Abort {
    /// XRI of the exchange to abort.
    pub xri: u16,
    /// Also send an ABTS on the wire (clears `IA`).
    pub send_abts: bool,
}

impl Abort {
    pub fn encode(&self) -> Wqe {
        let mut w = Wqe::base(wqe_command::ABORT, wqe_cmd_type::ABORT);
        w.set(field::ABORT_CRITERIA, ABORT_CRITERIA_XRI_TAG as u32);
        w.set_flag(field::ABORT_IA, !self.send_abts);
        // Suppress ABTS retries.
        w.set_flag(field::ABORT_IR, true);
        w.set_flag(field::QOSD, true);
        w.set(field::ABORT_TAG, self.xri as u32);
        w
    }
}

/// XMIT_SEQUENCE64: send an LS response sequence.
#[derive(Debug, Clone, Copy)]
pub struct XmitSequence64 {
    pub payload_addr: u64,
    pub payload_len: u32,
    pub xri_tag: u16,
    pub rpi: u16,
    pub remote_xid: u16,
    pub fc_type: u8,
    pub r_ctl: u8,
}

impl XmitSequence64 {
    pub fn encode(&self) -> Wqe {
        let mut w = Wqe::base(wqe_command::XMIT_SEQUENCE64, wqe_cmd_type::XMIT_SEQUENCE64);
        Bde::Data64 {
            addr: self.payload_addr,
            len: self.payload_len,
        }
        .write_to(&mut w, 0);
        w.set_flag(field::XBL, true);
        w.set_flag(field::DBDE, true);
        w.set(field::WORD12, self.payload_len);
        w.set_flag(field::SEQ_LS, true);
        w.set(field::FC_TYPE, self.fc_type as u32);
        w.set(field::R_CTL, self.r_ctl as u32);
        w.set(field::CLASS, CLASS_3 as u32);
        w.set(field::CT, CONTEXT_RPI as u32);
        w.set(field::IOD, DIR_WRITE as u32);
        w.set(field::XRI_TAG, self.xri_tag as u32);
        w.set(field::REMOTE_XID, self.remote_xid as u32);
        w.set(field::CONTEXT_TAG, self.rpi as u32);
        w.set(field::LEN_LOC, 2);
        w
    }
}

/// Outcome carried by a BLS response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlsResponse {
    /// BA_ACC covering the whole sequence-count range.
    Accept,
    /// BA_RJT with reason code and explanation.
    Reject { reason: u8, explanation: u8 },
}

/// XMIT_BLS_RSP: answer an ABTS.
#[derive(Debug, Clone, Copy)]
pub struct XmitBlsRsp {
    pub xri_tag: u16,
    pub rpi: u16,
    pub ox_id: u16,
    pub rx_id: u16,
    pub response: BlsResponse,
}

impl XmitBlsRsp {
    pub fn encode(&self) -> Wqe {
        let mut w = Wqe::base(wqe_command::XMIT_BLS_RSP, wqe_cmd_type::XMIT_BLS_RSP64);
        match self.response {
            BlsResponse::Accept => w.set(field::BLS_HIGH_SEQ_CNT, u16::MAX as u32),
            BlsResponse::Reject {
                reason,
                explanation,
            } => {
                w.set(
                    field::BLS_PAYLOAD_WORD0,
                    ((reason as u32) << 16) | ((explanation as u32) << 8),
                );
                w.set_flag(field::BLS_AR, true);
            }
        }
        w.set(field::BLS_OX_ID, self.ox_id as u32);
        w.set(field::BLS_RX_ID, self.rx_id as u32);
        w.set(field::CT, CONTEXT_RPI as u32);
        w.set(field::CONTEXT_TAG, self.rpi as u32);
        w.set(field::XRI_TAG, self.xri_tag as u32);
        w.set(field::CLASS, CLASS_3 as u32);
        w.set_flag(field::QOSD, true);
        w
    }
}

/// Start-of-frame delimiter: SOFi3.
pub const SOF_I3: u8 = 0x2e;
/// End-of-frame delimiter: EOFt.
pub const EOF_T: u8 = 0x42;

/// SEND_FRAME: transmit one raw frame with an inline payload.
#[derive(Debug, Clone, Copy)]
pub struct SendFrame<'a> {
    pub xri_tag: u16,
    pub header: FcFrameHeader,
    pub payload: &'a [u8],
}

impl SendFrame<'_> {
    pub fn encode(&self) -> Result<Wqe, EncodeError> {
        if self.payload.len() > MAX_INLINE_LEN {
            return Err(EncodeError::InlineTooLarge {
                len: self.payload.len(),
                max: MAX_INLINE_LEN,
            });
        }
        let mut w = Wqe::base(wqe_command::SEND_FRAME, wqe_cmd_type::SEND_FRAME);
        let mut hdr = [0u8; FC_HEADER_LEN];
        self.header.write_le_words(&mut hdr);
        // Header words 0..2 go to WQE words 4..6, words 2..6 to WQE words 12..16.
        w.0.put_bytes(4, &hdr[..8]);
        w.0.put_bytes(12, &hdr[8..]);

        if !self.payload.is_empty() {
            let len = self.payload.len() as u32;
            w.set(field::WORD3, len);
            w.set_flag(field::DBDE, true);
            Bde::Immediate {
                offset: INLINE_OFFSET as u32,
                len,
            }
            .write_to(&mut w, 0);
            w.put_inline(self.payload);
        }

        w.set(field::XRI_TAG, self.xri_tag as u32);
        w.set(field::SF_SOF, SOF_I3 as u32);
        w.set(field::SF_EOF, EOF_T as u32);
        w.set_flag(field::WQES, true);
        w.set(field::IOD, DIR_WRITE as u32);
        w.set_flag(field::QOSD, false);
        w.set(field::LEN_LOC, 1);
        w.set_flag(field::XC, true);
        w.set_flag(field::XBL, true);
        Ok(w)
    }
}

/// Recover the frame header embedded in a SEND_FRAME WQE.
pub fn send_frame_header(wqe: &Wqe) -> FcFrameHeader {
    let mut bytes = [0u8; FC_HEADER_LEN];
    for (i, word) in [4usize, 5, 12, 13, 14, 15].into_iter().enumerate() {
        bytes[i * 4..i * 4 + 4].copy_from_slice(&wqe.word(word).to_le_bytes());
    }
    FcFrameHeader::from_le_words(&bytes)
}

/// GEN_REQUEST64: send a request sequence and receive the response.
#[derive(Debug, Clone, Copy)]
pub struct GenRequest64 {
    /// Two-entry SGL: request buffer, then response buffer.
    pub sgl_addr: u64,
    pub request_len: u32,
    pub max_response_len: u32,
    pub xri_tag: u16,
    pub rpi: u16,
    pub fc_type: u8,
    pub r_ctl: u8,
}

impl GenRequest64 {
    pub fn encode(&self) -> Wqe {
        let mut w = Wqe::base(wqe_command::GEN_REQUEST64, wqe_cmd_type::GEN_REQUEST64);
        w.set_flag(field::XBL, true);
        Bde::BufferList {
            addr: self.sgl_addr,
            len: 2 * SGE_SIZE as u32,
        }
        .write_to(&mut w, 0);
        w.set(field::WORD3, self.request_len);
        w.set(field::WORD15, self.max_response_len);
        w.set(field::DF_CTL, 0);
        w.set(field::FC_TYPE, self.fc_type as u32);
        w.set(field::R_CTL, self.r_ctl as u32);
        w.set(field::XRI_TAG, self.xri_tag as u32);
        w.set(field::CT, CONTEXT_RPI as u32);
        w.set(field::CONTEXT_TAG, self.rpi as u32);
        w.set(field::CLASS, CLASS_3 as u32);
        w.set(field::TIMER, 30);
        w.set(field::IOD, DIR_READ as u32);
        w.set_flag(field::QOSD, true);
        w
    }
}

/// MARKER: queue-sync marker delivered through the RQ completion path.
#[derive(Debug, Clone, Copy)]
pub struct Marker {
    pub tag: u64,
    /// RQ excluded from the marker, or `None` for every RQ.
    pub skip_rq: Option<u16>,
}

impl Marker {
    pub fn encode(&self) -> Wqe {
        let mut w = Wqe::base(wqe_command::MARKER, wqe_cmd_type::MARKER);
        match self.skip_rq {
            Some(rq_id) => {
                w.set(field::MARKER_CATEGORY, MARKER_CATEGORY_ALL_RQ_EXCEPT_ONE as u32);
                w.set(field::MARKER_RQ_ID, rq_id as u32);
            }
            None => w.set(field::MARKER_CATEGORY, MARKER_CATEGORY_ALL_RQ as u32),
        }
        w.set(field::MARKER_TAG_LOWER, self.tag as u32);
        w.set(field::MARKER_TAG_HIGHER, (self.tag >> 32) as u32);
        w.set_flag(field::QOSD, true);
        w
    }
}
