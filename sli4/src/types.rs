//! SLI-4 protocol constants and small shared types.

use bitflags::bitflags;

// =============================================================================
// Queue kinds
// =============================================================================

/// Role of a ring in the queue-pair topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Event queue (4-byte EQEs).
    Event,
    /// Completion queue for work-queue completions.
    CompletionWq,
    /// Completion queue for received frames.
    CompletionRq,
    /// Work queue (64 or 128-byte WQEs).
    Work,
    /// Receive queue carrying frame header buffers.
    RecvHeader,
    /// Receive queue carrying frame payload buffers.
    RecvPayload,
}

impl QueueKind {
    /// Whether the adapter produces entries into this ring.
    pub fn is_completion(self) -> bool {
        matches!(self, Self::Event | Self::CompletionWq | Self::CompletionRq)
    }

    /// Whether software produces entries into this ring.
    pub fn is_submission(self) -> bool {
        !self.is_completion()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Event => "eq",
            Self::CompletionWq => "cq_wq",
            Self::CompletionRq => "cq_rq",
            Self::Work => "wq",
            Self::RecvHeader => "rq_hdr",
            Self::RecvPayload => "rq_payload",
        }
    }
}

// =============================================================================
// EQE major codes
// =============================================================================

pub const EQE_MAJOR_STANDARD: u8 = 0;
pub const EQE_MAJOR_SENTINEL: u8 = 1;

// =============================================================================
// CQE event codes (byte 14)
// =============================================================================

/// Byte offset of the event code inside a CQE.
pub const CQE_CODE_OFFSET: usize = 14;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CqeCode {
    WorkCompletion = 0x01,
    WqRelease = 0x02,
    RqAsync = 0x04,
    XriAborted = 0x05,
    RqCoalescing = 0x06,
    RqConsumption = 0x07,
    MeasurementReporting = 0x08,
    RqAsyncV1 = 0x09,
    OptimizedWriteCmd = 0x0b,
    OptimizedWriteData = 0x0c,
    NvmeErspCompletion = 0x0d,
    RqMarker = 0x1d,
}

impl CqeCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::WorkCompletion),
            0x02 => Some(Self::WqRelease),
            0x04 => Some(Self::RqAsync),
            0x05 => Some(Self::XriAborted),
            0x06 => Some(Self::RqCoalescing),
            0x07 => Some(Self::RqConsumption),
            0x08 => Some(Self::MeasurementReporting),
            0x09 => Some(Self::RqAsyncV1),
            0x0b => Some(Self::OptimizedWriteCmd),
            0x0c => Some(Self::OptimizedWriteData),
            0x0d => Some(Self::NvmeErspCompletion),
            0x1d => Some(Self::RqMarker),
            _ => None,
        }
    }
}

// =============================================================================
// Work completion status
// =============================================================================

/// WCQE status values (word 0, bits 8..16).
pub mod wcqe_status {
    pub const SUCCESS: u8 = 0x00;
    pub const FCP_RSP_FAILURE: u8 = 0x01;
    pub const REMOTE_STOP: u8 = 0x02;
    pub const LOCAL_REJECT: u8 = 0x03;
    pub const NPORT_RJT: u8 = 0x04;
    pub const FABRIC_RJT: u8 = 0x05;
    pub const NPORT_BSY: u8 = 0x06;
    pub const FABRIC_BSY: u8 = 0x07;
    pub const LS_RJT: u8 = 0x09;
    pub const RX_BUFF_OVERRUN: u8 = 0x0a;
    pub const CMD_REJECT: u8 = 0x0b;
    pub const FCP_TGT_LENCHECK: u8 = 0x0c;
    pub const RQ_BUF_LEN_EXCEEDED: u8 = 0x11;
    pub const RQ_INSUFF_BUF_NEEDED: u8 = 0x12;
    pub const RQ_INSUFF_FRM_DISC: u8 = 0x13;
    pub const RQ_DMA_FAILURE: u8 = 0x14;
    pub const FCP_RSP_TRUNCATE: u8 = 0x15;
    pub const DI_ERROR: u8 = 0x16;
    pub const BA_RJT: u8 = 0x17;
    pub const RQ_INSUFF_XRI_NEEDED: u8 = 0x18;
    pub const RQ_INSUFF_XRI_DISC: u8 = 0x19;
    pub const RX_ERROR_DETECT: u8 = 0x1a;
    pub const RX_ABORT_REQUEST: u8 = 0x1b;

    // Driver-generated statuses, never produced by the adapter.
    pub const TARGET_WQE_TIMEOUT: u8 = 0xff;
    pub const SHUTDOWN: u8 = 0xfe;
    pub const DISPATCH_ERROR: u8 = 0xfd;
}

/// LOCAL_REJECT extended status reasons.
pub mod local_reject {
    pub const MISSING_CONTINUE: u32 = 0x01;
    pub const SEQUENCE_TIMEOUT: u32 = 0x02;
    pub const INTERNAL_ERROR: u32 = 0x03;
    pub const INVALID_RPI: u32 = 0x04;
    pub const NO_XRI: u32 = 0x05;
    pub const ILLEGAL_COMMAND: u32 = 0x06;
    pub const XCHG_DROPPED: u32 = 0x07;
    pub const ILLEGAL_FIELD: u32 = 0x08;
    pub const NO_ABORT_MATCH: u32 = 0x0c;
    pub const TX_DMA_FAILED: u32 = 0x0d;
    pub const RX_DMA_FAILED: u32 = 0x0e;
    pub const ILLEGAL_FRAME: u32 = 0x0f;
    pub const NO_RESOURCES: u32 = 0x11;
    pub const FCP_CONF_FAILURE: u32 = 0x12;
    pub const ILLEGAL_LENGTH: u32 = 0x13;
    pub const UNSUPPORTED_FEATURE: u32 = 0x14;
    pub const ABORT_IN_PROGRESS: u32 = 0x15;
    pub const ABORT_REQUESTED: u32 = 0x16;
    pub const RCV_BUFFER_TIMEOUT: u32 = 0x17;
    pub const LOOP_OPEN_FAILURE: u32 = 0x18;
    pub const LINK_DOWN: u32 = 0x1a;
    pub const CORRUPTED_DATA: u32 = 0x1b;
    pub const CORRUPTED_RPI: u32 = 0x1c;
    pub const OUT_OF_ORDER_DATA: u32 = 0x1d;
    pub const OUT_OF_ORDER_ACK: u32 = 0x1e;
    pub const DUP_FRAME: u32 = 0x1f;
    pub const LINK_CONTROL_FRAME: u32 = 0x20;
    pub const BAD_HOST_ADDRESS: u32 = 0x21;
    pub const MISSING_HDR_BUFFER: u32 = 0x23;
    pub const MSEQ_CHAIN_CORRUPTED: u32 = 0x24;
    pub const ABORTMULT_REQUESTED: u32 = 0x25;
    pub const BUFFER_SHORTAGE: u32 = 0x28;
    pub const RCV_XRIBUF_WAITING: u32 = 0x29;
    pub const INVALID_VPI: u32 = 0x2e;
    pub const MISSING_XRIBUF: u32 = 0x30;
    pub const INVALID_RELOFFSET: u32 = 0x40;
    pub const MISSING_RELOFFSET: u32 = 0x41;
    pub const INSUFF_BUFFERSPACE: u32 = 0x42;
    pub const MISSING_SI: u32 = 0x43;
    pub const MISSING_ES: u32 = 0x44;
    pub const INCOMPLETE_XFER: u32 = 0x45;
    pub const SLER_FAILURE: u32 = 0x46;
    pub const SLER_CMD_RCV_FAILURE: u32 = 0x47;
    pub const SLER_REC_RJT_ERR: u32 = 0x48;
    pub const SLER_REC_SRR_RETRY_ERR: u32 = 0x49;
    pub const SLER_SRR_RJT_ERR: u32 = 0x4a;
    pub const SLER_RRQ_RJT_ERR: u32 = 0x4c;
    pub const SLER_RRQ_RETRY_ERR: u32 = 0x4d;
    pub const SLER_ABTS_ERR: u32 = 0x4e;
}

/// Status values carried by async receive CQEs.
pub mod rq_status {
    pub const SUCCESS: u8 = 0x10;
    pub const BUF_LEN_EXCEEDED: u8 = 0x11;
    pub const INSUFF_BUF_NEEDED: u8 = 0x12;
    pub const INSUFF_BUF_FRM_DISC: u8 = 0x13;
    pub const DMA_FAILURE: u8 = 0x14;
}

bitflags! {
    /// Extended status bits reported with `DI_ERROR`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DiError: u32 {
        /// Guard tag error.
        const GUARD = 1 << 0;
        /// Application tag error.
        const APP_TAG = 1 << 1;
        /// Reference tag error.
        const REF_TAG = 1 << 2;
        /// Total data placed is valid.
        const TDPV = 1 << 3;
        /// Uninitialized DIF block.
        const UDB = 1 << 4;
        /// Error direction.
        const EDIR = 1 << 5;
    }
}

bitflags! {
    /// Flag bits of an XRI-aborted CQE (word 3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct XriAbortFlags: u32 {
        /// Exchange was reclaimed by the adapter.
        const XR = 1 << 24;
        /// Exchange originator.
        const EO = 1 << 28;
        /// BA_RJT received.
        const BR = 1 << 29;
        /// Abort was issued with ABTS suppressed.
        const IA = 1 << 30;
    }
}

// =============================================================================
// WQE command codes and command types
// =============================================================================

pub mod wqe_command {
    pub const ABORT: u8 = 0x0f;
    pub const ELS_REQUEST64: u8 = 0x8a;
    pub const FCP_IBIDIR64: u8 = 0xac;
    pub const FCP_IREAD64: u8 = 0x9a;
    pub const FCP_IWRITE64: u8 = 0x98;
    pub const FCP_ICMND64: u8 = 0x9c;
    pub const FCP_TRECEIVE64: u8 = 0xa1;
    pub const FCP_CONT_TRECEIVE64: u8 = 0xe5;
    pub const FCP_TRSP64: u8 = 0xa3;
    pub const FCP_TSEND64: u8 = 0x9f;
    pub const GEN_REQUEST64: u8 = 0xc2;
    pub const SEND_FRAME: u8 = 0xe1;
    pub const XMIT_BCAST64: u8 = 0x84;
    pub const XMIT_BLS_RSP: u8 = 0x97;
    pub const ELS_RSP64: u8 = 0x95;
    pub const XMIT_SEQUENCE64: u8 = 0x82;
    pub const REQUEUE_XRI: u8 = 0x93;
    pub const MARKER: u8 = 0xe6;
}

pub mod wqe_cmd_type {
    pub const FCP_IREAD64: u8 = 0x00;
    pub const FCP_IWRITE64: u8 = 0x01;
    pub const FCP_TRECEIVE64: u8 = 0x02;
    pub const FCP_TRSP64: u8 = 0x03;
    pub const FCP_TSEND64: u8 = 0x07;
    pub const GEN_REQUEST64: u8 = 0x08;
    pub const XMIT_BLS_RSP64: u8 = 0x08;
    pub const ABORT: u8 = 0x08;
    pub const XMIT_SEQUENCE64: u8 = 0x08;
    pub const REQUEUE_XRI: u8 = 0x0a;
    pub const SEND_FRAME: u8 = 0x0a;
    pub const MARKER: u8 = 0x0a;
}

/// Context type (`ct`) values.
pub const CONTEXT_RPI: u8 = 0x0;
pub const CONTEXT_VPI: u8 = 0x1;
pub const CONTEXT_VFI: u8 = 0x2;
pub const CONTEXT_FCFI: u8 = 0x3;

/// FC class of service.
pub const CLASS_2: u8 = 0x1;
pub const CLASS_3: u8 = 0x2;

/// Data direction (`iod`).
pub const DIR_WRITE: u8 = 0x0;
pub const DIR_READ: u8 = 0x1;

pub const ABORT_CRITERIA_XRI_TAG: u8 = 0x01;

pub const MARKER_CATEGORY_ALL_RQ: u8 = 0x1;
pub const MARKER_CATEGORY_ALL_RQ_EXCEPT_ONE: u8 = 0x2;

/// CQ id meaning "use the WQ's default completion queue".
pub const CQ_ID_DEFAULT: u16 = 0xffff;

/// WQE size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WqeSize {
    /// 64-byte WQE (16 words).
    Standard,
    /// 128-byte WQE (32 words), needed for inline responses.
    Extended,
}

impl WqeSize {
    pub fn bytes(self) -> usize {
        match self {
            Self::Standard => 64,
            Self::Extended => 128,
        }
    }

    pub fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            64 => Some(Self::Standard),
            128 => Some(Self::Extended),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cqe_code_roundtrip_known() {
        for code in [0x01u8, 0x02, 0x04, 0x05, 0x09, 0x0b, 0x0c, 0x1d] {
            assert_eq!(CqeCode::from_u8(code).map(|c| c as u8), Some(code));
        }
        assert_eq!(CqeCode::from_u8(0x03), None);
        assert_eq!(CqeCode::from_u8(0xff), None);
    }

    #[test]
    fn test_queue_kind_roles() {
        assert!(QueueKind::Event.is_completion());
        assert!(QueueKind::CompletionRq.is_completion());
        assert!(QueueKind::Work.is_submission());
        assert!(QueueKind::RecvPayload.is_submission());
    }
}
