//! Outbound operations.
//!
//! Each operation builds one WQE, binds a completion to a fresh request tag
//! and hands the WQE to the adapter. Operations that carry an exchange mark
//! it active only once the WQE is in the ring; on failure the exchange is
//! returned untouched or put back in the pool.

use std::sync::Arc;

use sli4::dma::DmaRegion;
use sli4::wqe::{
    Abort, BlsResponse, GenRequest64, Marker, SGE_SIZE, SendFrame, TReceive64, TRsp64, TSend64,
    XmitBlsRsp, XmitSequence64,
};
use sli4::{Bde, Cqe, FcFrameHeader, Sge};

use crate::error::{CompletionStatus, Error, Result};
use crate::hwqp::{Callback, DoneCallback, HwQueuePair};
use crate::xchg::{Exchange, HeldExchange};

/// FC-NVMe frame constants.
pub mod fcnvme {
    pub const R_CTL_STATUS: u8 = 0x07;
    pub const R_CTL_ERSP_STATUS: u8 = 0x08;
    pub const R_CTL_LS_REQUEST: u8 = 0x32;
    pub const R_CTL_LS_RESPONSE: u8 = 0x33;
    pub const TYPE_FC_EXCHANGE: u8 = 0x08;
    pub const TYPE_NVMF_DATA: u8 = 0x28;
    /// Exchange responder, last sequence, end of sequence, sequence initiative.
    pub const F_CTL_RSP: u32 = 0x99_0000;
    /// BA_RJT reason: unable to perform command request.
    pub const BLS_REJECT_UNABLE_TO_PERFORM: u8 = 0x09;
    /// All-zero good response IU.
    pub const GOOD_RSP_LEN: usize = 12;
}

/// Data SGEs one request can carry.
pub const MAX_IOVECS: usize = 16;
/// Offset of the XFER_RDY IU in an RQ payload buffer, after the command IU.
pub const XFER_RDY_OFFSET: usize = 96;
pub const XFER_RDY_LEN: usize = 12;
/// Offset of the SGL in an RQ payload buffer.
pub const SGL_OFFSET: usize = XFER_RDY_OFFSET + XFER_RDY_LEN;

// =============================================================================
// Request model
// =============================================================================

/// One data segment, by CPU virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoVec {
    pub addr: u64,
    pub len: u32,
}

/// Data direction of an NVMe command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
    /// Write: data is pulled from the initiator.
    HostToController,
    /// Read: data is pushed to the initiator.
    ControllerToHost,
    None,
}

/// What the engine needs to know about an I/O command.
///
/// The request layer owns it. The command IU sits in RQ payload buffer
/// `buf_index`, which also provides room for the XFER_RDY IU and the SGL.
#[derive(Debug)]
pub struct IoRequest {
    pub buf_index: u16,
    pub rpi: u16,
    pub ox_id: u16,
    /// Source and destination ids of the command frame.
    pub s_id: u32,
    pub d_id: u32,
    /// Total transfer length.
    pub length: u32,
    pub direction: DataDirection,
    pub iov: Vec<IoVec>,
    pub xchg: Option<Exchange>,
}

impl IoRequest {
    fn xri(&self) -> Result<u16> {
        self.xchg
            .as_ref()
            .map(Exchange::id)
            .ok_or(Error::InvalidArgument("request has no exchange"))
    }

    fn mark_active(&mut self) {
        if let Some(xchg) = self.xchg.as_mut() {
            xchg.set_active(true);
        }
    }
}

/// An LS response ready to go out on the exchange of its request.
#[derive(Debug)]
pub struct LsResponse {
    pub xchg: Exchange,
    /// RQ buffer holding the LS request; reposted on completion.
    pub buf_index: u16,
    pub rpi: u16,
    pub ox_id: u16,
    /// Bus address and length of the response payload.
    pub rsp_phys: u64,
    pub rsp_len: u32,
}

/// A single frame answering a received one.
#[derive(Debug, Clone, Copy)]
pub struct ReplyFrame<'a> {
    /// Source id of the frame being answered.
    pub s_id: u32,
    /// Destination id of the frame being answered.
    pub d_id: u32,
    pub ox_id: u16,
    pub fc_type: u8,
    pub r_ctl: u8,
    pub f_ctl: u32,
    pub payload: &'a [u8],
}

/// Request, response and SGL of a generic (single request, single
/// response) sequence in one DMA region.
pub struct SrsrBuffers {
    region: DmaRegion,
    rqst_len: u32,
    rsp_len: u32,
    pub rpi: u16,
}

impl std::fmt::Debug for SrsrBuffers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrsrBuffers")
            .field("phys", &format_args!("{:#x}", self.region.phys()))
            .field("rqst_len", &self.rqst_len)
            .field("rsp_len", &self.rsp_len)
            .field("rpi", &self.rpi)
            .finish()
    }
}

impl SrsrBuffers {
    pub fn new(rqst_len: u32, rsp_len: u32, rpi: u16) -> Result<Self> {
        let total = rqst_len as usize + rsp_len as usize + 2 * SGE_SIZE;
        let region = DmaRegion::alloc(total, 64)
            .ok_or(Error::InvalidArgument("cannot allocate SRSR buffers"))?;
        Ok(Self {
            region,
            rqst_len,
            rsp_len,
            rpi,
        })
    }

    pub fn request_mut(&mut self) -> &mut [u8] {
        let len = self.rqst_len as usize;
        &mut self.region.as_mut_slice()[..len]
    }

    pub fn response(&self) -> &[u8] {
        let start = self.rqst_len as usize;
        &self.region.as_slice()[start..start + self.rsp_len as usize]
    }

    fn rqst_phys(&self) -> u64 {
        self.region.phys()
    }

    fn rsp_phys(&self) -> u64 {
        self.region.phys() + self.rqst_len as u64
    }

    fn sgl_offset(&self) -> usize {
        (self.rqst_len + self.rsp_len) as usize
    }

    pub fn sgl_phys(&self) -> u64 {
        self.region.phys() + self.sgl_offset() as u64
    }

    fn write_sgl(&mut self) {
        let rqst = Sge::data(self.rqst_phys(), self.rqst_len);
        let mut rsp = Sge::data(self.rsp_phys(), self.rsp_len);
        rsp.last = true;
        let off = self.sgl_offset();
        let buf = self.region.as_mut_slice();
        buf[off..off + SGE_SIZE].copy_from_slice(&rqst.encode());
        buf[off + SGE_SIZE..off + 2 * SGE_SIZE].copy_from_slice(&rsp.encode());
    }

    /// SGEs as the adapter will read them.
    pub fn sgl(&self) -> [Option<Sge>; 2] {
        let off = self.sgl_offset();
        let buf = self.region.as_slice();
        [
            Sge::decode(&buf[off..off + SGE_SIZE]),
            Sge::decode(&buf[off + SGE_SIZE..off + 2 * SGE_SIZE]),
        ]
    }
}

/// Completion of a generic request; gets the buffers back to read the
/// response.
pub type SrsrCallback = Box<dyn FnOnce(&mut HwQueuePair, SrsrBuffers, CompletionStatus)>;

// =============================================================================
// Data transfer
// =============================================================================

impl HwQueuePair {
    /// Write the SGL for `req` into its RQ payload buffer. Returns the number
    /// of data bytes it describes.
    ///
    /// A write starts with an SGE for the XFER_RDY IU (burst length filled in
    /// big-endian), a read with a SKIP; a second SKIP follows, then one DATA
    /// SGE per iovec.
    pub fn fill_sgl(&mut self, req: &IoRequest) -> Result<u32> {
        if req.iov.is_empty() {
            return Err(Error::InvalidArgument("request has no iovecs"));
        }
        if req.iov.len() > MAX_IOVECS {
            return Err(Error::InvalidArgument("too many iovecs"));
        }
        if req.direction == DataDirection::None {
            return Err(Error::InvalidArgument("request has no data phase"));
        }

        let mut data = Vec::with_capacity(req.iov.len());
        let mut offset = 0u32;
        for iov in &req.iov {
            let phys = self
                .translator
                .translate(iov.addr, iov.len as usize)
                .ok_or(Error::InvalidArgument("iovec not mapped"))?;
            let mut sge = Sge::data(phys, iov.len);
            sge.data_offset = offset;
            offset += iov.len;
            data.push(sge);
        }
        if let Some(last) = data.last_mut() {
            last.last = true;
        }

        let buf = self
            .queues
            .rq
            .payload_buffer_mut(req.buf_index)
            .ok_or(Error::InvalidArgument("bad RQ buffer index"))?;
        let phys = buf.phys();
        let bytes = buf.as_mut_slice();
        if bytes.len() < SGL_OFFSET + (MAX_IOVECS + 2) * SGE_SIZE {
            return Err(Error::InvalidArgument("RQ buffer too small for SGL"));
        }

        let first = match req.direction {
            DataDirection::HostToController => {
                let iu = &mut bytes[XFER_RDY_OFFSET..SGL_OFFSET];
                iu.fill(0);
                iu[4..8].copy_from_slice(&req.length.to_be_bytes());
                Sge::data(phys + XFER_RDY_OFFSET as u64, XFER_RDY_LEN as u32)
            }
            _ => Sge::skip(),
        };

        let sgl = &mut bytes[SGL_OFFSET..SGL_OFFSET + (MAX_IOVECS + 2) * SGE_SIZE];
        sgl.fill(0);
        let entries = [first, Sge::skip()].into_iter().chain(data);
        for (chunk, sge) in sgl.chunks_exact_mut(SGE_SIZE).zip(entries) {
            chunk.copy_from_slice(&sge.encode());
        }
        Ok(offset)
    }

    /// BDE for the data phase of `req`: one 64-bit BDE for a single iovec,
    /// otherwise a pointer to the SGL built by [`fill_sgl`](Self::fill_sgl).
    fn data_bde(&mut self, req: &IoRequest) -> Result<Bde> {
        match req.iov.as_slice() {
            [] => Err(Error::InvalidArgument("request has no iovecs")),
            [iov] => {
                let addr = self
                    .translator
                    .translate(iov.addr, req.length as usize)
                    .ok_or(Error::InvalidArgument("iovec not mapped"))?;
                Ok(Bde::Data64 {
                    addr,
                    len: req.length,
                })
            }
            _ => {
                self.fill_sgl(req)?;
                let phys = self
                    .queues
                    .rq
                    .payload_buffer(req.buf_index)
                    .map(DmaRegion::phys)
                    .ok_or(Error::InvalidArgument("bad RQ buffer index"))?;
                Ok(Bde::BufferList {
                    addr: phys + SGL_OFFSET as u64,
                    len: req.length,
                })
            }
        }
    }

    /// Pull write data from the initiator (FCP_TRECEIVE64).
    pub fn post_receive_data(&mut self, req: &mut IoRequest, cb: Callback) -> Result<u16> {
        let xri = req.xri()?;
        self.check_post_ready()?;
        let bde = self.data_bde(req)?;
        let wqe = TReceive64 {
            bde,
            xri_tag: xri,
            rpi: req.rpi,
            remote_xid: req.ox_id,
            relative_offset: 0,
            data_length: req.length,
        }
        .encode();
        let tag = self.post_wqe(wqe, true, cb)?;
        req.mark_active();
        Ok(tag)
    }

    /// Push read data to the initiator (FCP_TSEND64). With `auto_response`
    /// the adapter sends the good response after the data.
    pub fn post_send_data(
        &mut self,
        req: &mut IoRequest,
        auto_response: bool,
        cb: Callback,
    ) -> Result<u16> {
        let xri = req.xri()?;
        self.check_post_ready()?;
        let bde = self.data_bde(req)?;
        let wqe = TSend64 {
            bde,
            xri_tag: xri,
            rpi: req.rpi,
            remote_xid: req.ox_id,
            relative_offset: 0,
            data_length: req.length,
            auto_response,
        }
        .encode();
        let tag = self.post_wqe(wqe, true, cb)?;
        req.mark_active();
        Ok(tag)
    }

    // =========================================================================
    // Responses
    // =========================================================================

    /// Send the response IU (FCP_TRSP64). `None` lets the adapter generate
    /// the 12-byte good response; `Some` sends an extended response inline.
    pub fn post_response(
        &mut self,
        req: &mut IoRequest,
        ersp: Option<&[u8]>,
        cb: Callback,
    ) -> Result<u16> {
        let xri = req.xri()?;
        let exchange_continue = req.xchg.as_ref().is_some_and(Exchange::is_active);
        let wqe = TRsp64 {
            xri_tag: xri,
            rpi: req.rpi,
            remote_xid: req.ox_id,
            exchange_continue,
            inline_rsp: ersp,
        }
        .encode()?;
        let tag = self.post_wqe(wqe, true, cb)?;
        req.mark_active();
        Ok(tag)
    }

    /// Send the response as a raw frame on the send-frame exchange.
    ///
    /// The frame's own completion carries nothing the request needs, so
    /// `cb` runs right away with a synthetic success completion.
    pub fn post_response_frame(
        &mut self,
        req: &IoRequest,
        ersp: Option<&[u8]>,
        cb: Callback,
    ) -> Result<u16> {
        let good = [0u8; fcnvme::GOOD_RSP_LEN];
        let (payload, r_ctl) = match ersp {
            Some(buf) => (buf, fcnvme::R_CTL_ERSP_STATUS),
            None => (&good[..], fcnvme::R_CTL_STATUS),
        };
        let hwqp_id = self.config.hwqp_id;
        let tag = self
            .send_frame(&ReplyFrame {
                s_id: req.s_id,
                d_id: req.d_id,
                ox_id: req.ox_id,
                fc_type: fcnvme::TYPE_FC_EXCHANGE,
                r_ctl,
                f_ctl: fcnvme::F_CTL_RSP,
                payload,
            })
            .inspect_err(|e| {
                tracing::error!(hwqp_id, error = %e, "send frame failed");
            })?;
        self.complete_now(tag, cb);
        Ok(tag)
    }

    /// Transmit one frame answering `reply` (SEND_FRAME), with the ids
    /// swapped, `rx_id = 0xffff` and the next sequence id of this queue pair.
    pub fn send_frame(&mut self, reply: &ReplyFrame<'_>) -> Result<u16> {
        let header = FcFrameHeader {
            r_ctl: reply.r_ctl,
            d_id: reply.s_id,
            s_id: reply.d_id,
            fc_type: reply.fc_type,
            f_ctl: reply.f_ctl,
            seq_id: self.send_frame_seq_id,
            ox_id: reply.ox_id,
            rx_id: 0xffff,
            ..FcFrameHeader::default()
        };
        let wqe = SendFrame {
            xri_tag: self.config.send_frame_xri,
            header,
            payload: reply.payload,
        }
        .encode()?;
        let hwqp_id = self.config.hwqp_id;
        let tag = self.post_wqe(
            wqe,
            true,
            Box::new(move |_, _, status| {
                if !status.is_success() {
                    tracing::error!(hwqp_id, status = status.status, "send frame completed with error");
                }
            }),
        )?;
        self.send_frame_seq_id = self.send_frame_seq_id.wrapping_add(1);
        Ok(tag)
    }

    /// Send an LS response (XMIT_SEQUENCE64) on the request's exchange.
    ///
    /// On completion the exchange is cleaned up, with an ABTS if the
    /// completion calls for one, and the request's RQ buffer is reposted.
    /// On failure the response comes back unchanged.
    pub fn post_ls_response(
        &mut self,
        rsp: LsResponse,
    ) -> std::result::Result<u16, (Error, LsResponse)> {
        let wqe = XmitSequence64 {
            payload_addr: rsp.rsp_phys,
            payload_len: rsp.rsp_len,
            xri_tag: rsp.xchg.id(),
            rpi: rsp.rpi,
            remote_xid: rsp.ox_id,
            fc_type: fcnvme::TYPE_NVMF_DATA,
            r_ctl: fcnvme::R_CTL_LS_RESPONSE,
        }
        .encode();
        let hwqp_id = self.config.hwqp_id;
        let port = Arc::clone(&self.port);
        self.post_wqe_owned(wqe, true, rsp, move |mut rsp| {
            rsp.xchg.set_active(true);
            let LsResponse {
                xchg, buf_index, ..
            } = rsp;
            let held = HeldExchange::new(xchg, port);
            Box::new(move |hwqp: &mut HwQueuePair, cqe: &Cqe, status: CompletionStatus| {
                if let Some(xchg) = held.take() {
                    hwqp.complete_exchange(xchg, cqe);
                }
                hwqp.release_rq_buffer_logged(buf_index);
                if !status.is_success() {
                    tracing::error!(hwqp_id, status = status.status, "LS response completed with error");
                }
            })
        })
    }

    /// Answer an ABTS (XMIT_BLS_RSP) on a fresh exchange. `reject` carries
    /// the BA_RJT explanation; `None` sends BA_ACC.
    pub fn post_bls_response(
        &mut self,
        ox_id: u16,
        rx_id: u16,
        rpi: u16,
        reject: Option<u8>,
        done: Option<DoneCallback>,
    ) -> Result<u16> {
        let xchg = self.acquire_exchange()?;
        let response = match reject {
            Some(explanation) => BlsResponse::Reject {
                reason: fcnvme::BLS_REJECT_UNABLE_TO_PERFORM,
                explanation,
            },
            None => BlsResponse::Accept,
        };
        let wqe = XmitBlsRsp {
            xri_tag: xchg.id(),
            rpi,
            ox_id,
            rx_id,
            response,
        }
        .encode();
        let hwqp_id = self.config.hwqp_id;
        let port = Arc::clone(&self.port);
        let posted = self.post_wqe_owned(wqe, true, (xchg, done), move |(mut xchg, done)| {
            xchg.set_active(true);
            let held = HeldExchange::new(xchg, port);
            Box::new(move |hwqp: &mut HwQueuePair, cqe: &Cqe, status: CompletionStatus| {
                tracing::debug!(hwqp_id, status = status.status, "BLS response completed");
                if let Some(xchg) = held.take() {
                    hwqp.cleanup_exchange(xchg, cqe.xb(), false);
                }
                if let Some(done) = done {
                    done(hwqp, status);
                }
            })
        });
        match posted {
            Ok(tag) => Ok(tag),
            Err((e, (xchg, _))) => {
                self.port.pool().put(xchg);
                Err(e)
            }
        }
    }

    /// Send a generic request sequence and collect its response
    /// (GEN_REQUEST64) on a fresh exchange.
    pub fn post_generic_request(
        &mut self,
        mut bufs: SrsrBuffers,
        done: SrsrCallback,
    ) -> std::result::Result<u16, (Error, SrsrBuffers)> {
        let xchg = match self.acquire_exchange() {
            Ok(xchg) => xchg,
            Err(e) => return Err((e, bufs)),
        };
        bufs.write_sgl();
        let wqe = GenRequest64 {
            sgl_addr: bufs.sgl_phys(),
            request_len: bufs.rqst_len,
            max_response_len: bufs.rsp_len,
            xri_tag: xchg.id(),
            rpi: bufs.rpi,
            fc_type: fcnvme::TYPE_NVMF_DATA,
            r_ctl: fcnvme::R_CTL_LS_REQUEST,
        }
        .encode();
        let hwqp_id = self.config.hwqp_id;
        let port = Arc::clone(&self.port);
        let posted = self.post_wqe_owned(wqe, true, (xchg, bufs), move |(mut xchg, bufs)| {
            xchg.set_active(true);
            let held = HeldExchange::new(xchg, port);
            Box::new(move |hwqp: &mut HwQueuePair, cqe: &Cqe, status: CompletionStatus| {
                tracing::debug!(hwqp_id, status = status.status, "generic request completed");
                if let Some(xchg) = held.take() {
                    hwqp.complete_exchange(xchg, cqe);
                }
                done(hwqp, bufs, status);
            })
        });
        posted.map_err(|(e, (xchg, bufs))| {
            self.port.pool().put(xchg);
            (e, bufs)
        })
    }

    /// Post a queue-sync marker. Its completion comes back through the RQ
    /// path as [`RequestLayer::queue_sync_done`](crate::RequestLayer::queue_sync_done)
    /// with `tag`. `skip_rq` excludes one RQ from the marker.
    pub fn issue_queue_sync(&mut self, tag: u64, skip_rq: Option<u16>) -> Result<u16> {
        let wqe = Marker { tag, skip_rq }.encode();
        let hwqp_id = self.config.hwqp_id;
        self.post_wqe(
            wqe,
            true,
            Box::new(move |_, _, status| {
                tracing::debug!(hwqp_id, status = status.status, "marker WQE completed");
            }),
        )
    }

    /// ABORT the exchange with id `xri` without owning it, for exchanges the
    /// request layer tracks itself.
    pub fn issue_abort_xri(&mut self, xri: u16, send_abts: bool) -> Result<u16> {
        let wqe = Abort { xri, send_abts }.encode();
        let hwqp_id = self.config.hwqp_id;
        let tag = self.post_wqe(
            wqe,
            true,
            Box::new(move |_, _, status| {
                tracing::debug!(hwqp_id, xri, status = status.status, "abort WQE completed");
            }),
        )?;
        if send_abts {
            self.counters.num_abts_sent += 1;
        }
        Ok(tag)
    }
}
