//! Completion dispatch loop.
//!
//! One call to [`HwQueuePair::poll`] drains a budgeted batch of EQEs. Each
//! standard event names a CQ; that CQ is drained under its own budget and
//! every CQE is routed by event code:
//!
//! | CQE                  | owner                                   |
//! |----------------------|-----------------------------------------|
//! | work completion      | callback bound to the request tag       |
//! | WQ release           | WQ slot accounting                      |
//! | async frame / marker | RQ pair, then the [`RequestLayer`]      |
//! | XRI aborted          | pending-abort set                       |
//!
//! Consumed entries are acknowledged every `posted_limit` entries without
//! re-arming; a CQ is re-armed when its drain ends.

use sli4::cqe::{AsyncFrame, RqMarker, WorkCompletion};
use sli4::types::rq_status;
use sli4::{Cqe, CqeKind, DecodeError, EqEvent, SliQueue};

use crate::error::{CompletionStatus, ProtocolError, Result};
use crate::hwqp::{FrameDisposition, HwQueuePair, ReceivedFrame, RequestLayer};

/// The two completion queues of a queue pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CqSel {
    Wq,
    Rq,
}

impl HwQueuePair {
    /// Drain up to the EQ's `processed_limit` events.
    ///
    /// Returns the number of EQEs consumed. Stops early on an event with an
    /// unsupported major code or once the queue pair goes offline.
    pub fn poll(&mut self, layer: &mut dyn RequestLayer) -> u32 {
        let limits = self.queues.eq.limits();
        let mut budget = limits.processed_limit;
        let mut n: u16 = 0;
        let mut total: u32 = 0;
        let mut pending_done = false;

        while budget > 0 {
            let Ok(eqe) = self.queues.eq.dequeue_eqe() else {
                break;
            };
            n += 1;
            budget -= 1;

            match eqe.event() {
                EqEvent::Sentinel => {
                    // EQ overflowed: events may be lost, so drain both CQs.
                    tracing::debug!(hwqp_id = self.config.hwqp_id, "EQ sentinel");
                    self.drain_cq(CqSel::Wq, layer);
                    self.drain_cq(CqSel::Rq, layer);
                    layer.process_pending(self);
                    pending_done = true;
                }
                EqEvent::Unsupported { major, minor } => {
                    tracing::warn!(
                        hwqp_id = self.config.hwqp_id,
                        major,
                        minor,
                        "unsupported EQE major code"
                    );
                    break;
                }
                EqEvent::Completion { cq_id } => {
                    if cq_id == self.queues.cq_wq.qid() {
                        self.drain_cq(CqSel::Wq, layer);
                        // Completions may have freed tags and exchanges.
                        layer.process_pending(self);
                    } else if cq_id == self.queues.cq_rq.qid() {
                        self.drain_cq(CqSel::Rq, layer);
                    } else {
                        tracing::error!(
                            hwqp_id = self.config.hwqp_id,
                            error = %ProtocolError::UnknownCqId(cq_id),
                            "bad CQ id in EQE"
                        );
                        self.counters.invalid_cq_id += 1;
                    }
                }
            }

            if n >= limits.posted_limit {
                self.queues.eq.notify(false, n);
                total += n as u32;
                n = 0;
            }
            if !self.online {
                break;
            }
        }

        if !pending_done {
            layer.process_pending(self);
        }
        if n > 0 {
            self.queues.eq.notify(false, n);
        }
        total + n as u32
    }

    fn cq(&self, sel: CqSel) -> &SliQueue {
        match sel {
            CqSel::Wq => &self.queues.cq_wq,
            CqSel::Rq => &self.queues.cq_rq,
        }
    }

    fn cq_mut(&mut self, sel: CqSel) -> &mut SliQueue {
        match sel {
            CqSel::Wq => &mut self.queues.cq_wq,
            CqSel::Rq => &mut self.queues.cq_rq,
        }
    }

    /// Drain one CQ under its own budget and re-arm it. Returns the number
    /// of CQEs consumed.
    fn drain_cq(&mut self, sel: CqSel, layer: &mut dyn RequestLayer) -> u32 {
        let limits = self.cq(sel).limits();
        let mut budget = limits.processed_limit;
        let mut n: u16 = 0;
        let mut total: u32 = 0;

        while budget > 0 {
            let Ok(cqe) = self.cq_mut(sel).dequeue_cqe() else {
                break;
            };
            n += 1;
            budget -= 1;
            total += 1;

            self.dispatch_cqe(&cqe, layer);

            if n >= limits.posted_limit {
                self.cq(sel).notify(false, n);
                n = 0;
            }
            if !self.online {
                break;
            }
        }

        self.cq(sel).notify(true, n);
        total
    }

    fn dispatch_cqe(&mut self, cqe: &Cqe, layer: &mut dyn RequestLayer) {
        let hwqp_id = self.config.hwqp_id;
        match cqe.decode() {
            Ok(CqeKind::WorkCompletion(wc)) => self.on_work_completion(&wc, cqe),
            Ok(CqeKind::WqRelease(rel)) => {
                self.queues.wq.reclaim(self.wqec.threshold());
                tracing::debug!(hwqp_id, wqe_index = rel.wqe_index, "WQE release");
            }
            Ok(CqeKind::AsyncFrame(frame)) => self.on_async_frame(&frame, layer),
            Ok(CqeKind::Marker(marker)) => self.on_marker(&marker, layer),
            Ok(CqeKind::XriAborted(xa)) => {
                tracing::debug!(hwqp_id, xri = xa.xri, flags = ?xa.flags(), "XRI aborted");
                self.on_exchange_aborted(xa.xri);
            }
            Ok(other) => {
                tracing::warn!(hwqp_id, code = cqe.code(), kind = ?other, "unhandled CQE type");
                self.counters.invalid_cq_type += 1;
            }
            Err(DecodeError::UnknownCode(code)) => {
                tracing::warn!(
                    hwqp_id,
                    error = %ProtocolError::UnhandledCqe(code),
                    words = ?cqe.words(),
                    "unknown CQE code"
                );
                self.counters.invalid_cq_type += 1;
            }
        }
    }

    // =========================================================================
    // Work completions
    // =========================================================================

    /// Release the tag, then run its callback. The callback may post again
    /// and reuse the tag.
    fn on_work_completion(&mut self, wc: &WorkCompletion, cqe: &Cqe) {
        let hwqp_id = self.config.hwqp_id;
        let tag = wc.request_tag;
        if wc.status != sli4::types::wcqe_status::SUCCESS {
            if wc.is_benign_reject() {
                tracing::debug!(
                    hwqp_id,
                    tag,
                    status = wc.status,
                    ext_status = wc.ext_status(),
                    "WQE rejected"
                );
            } else {
                tracing::info!(
                    hwqp_id,
                    tag,
                    status = wc.status,
                    hw_status = wc.hw_status,
                    ext_status = wc.ext_status(),
                    w1 = wc.wqe_specific_1,
                    w2 = wc.wqe_specific_2,
                    xb = wc.xb,
                    words = ?cqe.words(),
                    "WQE completed with error"
                );
            }
        }

        if self.tags.lookup(tag).is_none() {
            tracing::error!(hwqp_id, error = %ProtocolError::UnknownRequestTag(tag), "dropping WQE completion");
            self.counters.protocol_errors += 1;
            return;
        }
        let Some(cb) = self.tags.release(tag) else {
            return;
        };
        cb(self, cqe, CompletionStatus::new(wc.status, wc.ext_status()));
    }

    // =========================================================================
    // Receive path
    // =========================================================================

    /// Buffer pair consumed by an RQ completion, or `None` when there is
    /// nothing left for the caller to do with it.
    ///
    /// Length and DMA failures consume the buffer; it is reposted here.
    /// Insufficient-buffer statuses do not consume one.
    fn rq_completion_buffer(&mut self, status: u8, rq_element_index: u16, rq_id: u16) -> Option<u16> {
        let hwqp_id = self.config.hwqp_id;
        let max = self.queues.rq.hdr().max_entries();
        if status != rq_status::SUCCESS {
            match status {
                rq_status::BUF_LEN_EXCEEDED | rq_status::DMA_FAILURE => {
                    if rq_element_index >= max {
                        tracing::debug!(hwqp_id, status, rq_id, "RQ index lookup failed");
                        self.counters.rq_buf_len_err += 1;
                    } else if let Some(buf) = self.queues.rq.buffer_index_for(rq_element_index) {
                        self.release_rq_buffer_logged(buf);
                    }
                }
                rq_status::INSUFF_BUF_NEEDED | rq_status::INSUFF_BUF_FRM_DISC => {
                    tracing::debug!(hwqp_id, status, rq_id, "RQ out of buffers");
                    self.counters.rq_status_err += 1;
                }
                _ => {
                    tracing::debug!(hwqp_id, status, rq_id, "RQ completion status");
                }
            }
            return None;
        }
        if rq_element_index >= max {
            tracing::debug!(hwqp_id, rq_id, rq_element_index, "RQ index out of range");
            self.counters.rq_index_err += 1;
            return None;
        }
        self.queues.rq.buffer_index_for(rq_element_index)
    }

    fn on_async_frame(&mut self, frame: &AsyncFrame, layer: &mut dyn RequestLayer) {
        let Some(buf) = self.rq_completion_buffer(frame.status, frame.rq_element_index, frame.rq_id)
        else {
            return;
        };
        let header = self.queues.rq.frame_header(buf);
        let payload_phys = self.queues.rq.payload_buffer(buf).map(|b| b.phys());
        let (Some(header), Some(payload_phys)) = (header, payload_phys) else {
            tracing::error!(hwqp_id = self.config.hwqp_id, buf, "RQ buffer missing");
            return;
        };
        let received = ReceivedFrame {
            buf_index: buf,
            rq_element_index: frame.rq_element_index,
            header,
            payload_len: frame.payload_len,
            payload_phys,
        };
        match layer.frame_received(self, received) {
            FrameDisposition::Retained => {}
            FrameDisposition::Release => self.release_rq_buffer_logged(buf),
        }
    }

    fn on_marker(&mut self, marker: &RqMarker, layer: &mut dyn RequestLayer) {
        if !marker.is_success() {
            tracing::error!(
                hwqp_id = self.config.hwqp_id,
                status = marker.status,
                tag = marker.tag,
                "marker completed with error"
            );
        }
        let Some(buf) = self.rq_completion_buffer(marker.status, marker.rq_element_index, marker.rq_id)
        else {
            return;
        };
        tracing::debug!(hwqp_id = self.config.hwqp_id, tag = marker.tag, "queue sync marker done");
        layer.queue_sync_done(self, marker.tag);
        self.release_rq_buffer_logged(buf);
    }

    /// Give a retained RQ buffer pair back to the adapter.
    pub fn rq_buffer_release(&mut self, buf_index: u16) -> Result<()> {
        self.queues.rq.retire_and_repost(buf_index)?;
        Ok(())
    }

    pub(crate) fn release_rq_buffer_logged(&mut self, buf_index: u16) {
        if let Err(e) = self.rq_buffer_release(buf_index) {
            tracing::error!(hwqp_id = self.config.hwqp_id, buf_index, error = %e, "RQ buffer repost failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    use sli4::test_utils::{SimConfig, SimHba};
    use sli4::types::{local_reject, wcqe_status};
    use sli4::wqe::Marker;
    use sli4::{CqeBuilder, Eqe, FcFrameHeader, IdentityTranslator, QueueLimits, Wqe};

    use super::*;
    use crate::config::HwqpConfig;
    use crate::hwqp::Callback;
    use crate::port::Port;

    #[derive(Default)]
    struct Recorder {
        frames: Vec<ReceivedFrame>,
        syncs: Vec<u64>,
        pending_runs: u32,
        retain: bool,
    }

    impl RequestLayer for Recorder {
        fn frame_received(&mut self, _hwqp: &mut HwQueuePair, frame: ReceivedFrame) -> FrameDisposition {
            self.frames.push(frame);
            if self.retain {
                FrameDisposition::Retained
            } else {
                FrameDisposition::Release
            }
        }

        fn queue_sync_done(&mut self, _hwqp: &mut HwQueuePair, tag: u64) {
            self.syncs.push(tag);
        }

        fn process_pending(&mut self, _hwqp: &mut HwQueuePair) {
            self.pending_runs += 1;
        }
    }

    fn setup(config: HwqpConfig) -> (SimHba, HwQueuePair) {
        let (hba, queues) = SimHba::new(SimConfig::default());
        let port = Arc::new(Port::new(0, 0x100, 8));
        let mut q = HwQueuePair::new(config, queues, port, Box::new(IdentityTranslator)).unwrap();
        q.init_buffers().unwrap();
        q.set_online(true);
        (hba, q)
    }

    fn marker() -> Wqe {
        Marker {
            tag: 7,
            skip_rq: None,
        }
        .encode()
    }

    type Seen = Rc<RefCell<Vec<CompletionStatus>>>;

    fn recording(seen: &Seen) -> Callback {
        let seen = Rc::clone(seen);
        Box::new(move |_, _, status| seen.borrow_mut().push(status))
    }

    #[test]
    fn test_empty_poll() {
        let (_hba, mut q) = setup(HwqpConfig::default());
        let mut layer = Recorder::default();
        assert_eq!(q.poll(&mut layer), 0);
        assert_eq!(layer.pending_runs, 1);
    }

    #[test]
    fn test_completion_invokes_callback_and_frees_tag() {
        let (mut hba, mut q) = setup(HwqpConfig::default());
        let seen: Seen = Rc::default();
        let tag = q.post_wqe(marker(), true, recording(&seen)).unwrap();
        assert_eq!(hba.take_wqe().request_tag(), tag);
        hba.complete_ok(tag);

        let mut layer = Recorder::default();
        assert_eq!(q.poll(&mut layer), 1);
        assert_eq!(*seen.borrow(), vec![CompletionStatus::SUCCESS]);
        assert_eq!(q.outstanding(), 0);
        // one WQ-CQ drain plus nothing else: the hook ran after the drain and
        // once more at the end of the poll
        assert_eq!(layer.pending_runs, 2);
    }

    #[test]
    fn test_status_surfaced_verbatim() {
        let (mut hba, mut q) = setup(HwqpConfig::default());
        let seen: Seen = Rc::default();
        let tag = q.post_wqe(marker(), true, recording(&seen)).unwrap();
        hba.complete(
            CqeBuilder::work_completion(tag, wcqe_status::LOCAL_REJECT, local_reject::NO_XRI)
                .build(),
        );
        q.poll(&mut Recorder::default());
        assert_eq!(
            *seen.borrow(),
            vec![CompletionStatus::new(wcqe_status::LOCAL_REJECT, local_reject::NO_XRI)]
        );
    }

    #[test]
    fn test_unknown_tag_counts_protocol_error() {
        let (mut hba, mut q) = setup(HwqpConfig::default());
        hba.complete_ok(42);
        q.poll(&mut Recorder::default());
        assert_eq!(q.counters().protocol_errors, 1);
    }

    #[test]
    fn test_callback_may_reuse_its_tag() {
        let (mut hba, mut q) = setup(HwqpConfig::default().with_reqtag_pool_size(1));
        let reposted = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&reposted);
        let tag = q
            .post_wqe(
                marker(),
                true,
                Box::new(move |q, _, _| {
                    *slot.borrow_mut() = q.post_wqe(marker(), true, Box::new(|_, _, _| {})).ok();
                }),
            )
            .unwrap();
        hba.complete_ok(tag);
        q.poll(&mut Recorder::default());
        assert_eq!(*reposted.borrow(), Some(tag));
        assert_eq!(q.outstanding(), 1);
    }

    #[test]
    fn test_bad_cq_id_counted() {
        let (mut hba, mut q) = setup(HwqpConfig::default());
        hba.push_eqe(Eqe::standard(0x3ff));
        assert_eq!(q.poll(&mut Recorder::default()), 1);
        assert_eq!(q.counters().invalid_cq_id, 1);
    }

    #[test]
    fn test_unknown_cqe_code_counted() {
        let (mut hba, mut q) = setup(HwqpConfig::default());
        hba.complete(CqeBuilder::raw_code(0x3f).build());
        hba.complete(CqeBuilder::raw_code(0x0b).build());
        q.poll(&mut Recorder::default());
        assert_eq!(q.counters().invalid_cq_type, 2);
    }

    #[test]
    fn test_sentinel_drains_both_cqs() {
        let (mut hba, mut q) = setup(HwqpConfig::default());
        let seen: Seen = Rc::default();
        let tag = q.post_wqe(marker(), true, recording(&seen)).unwrap();
        hba.push_wq_cqe(CqeBuilder::work_completion(tag, 0, 0).build());
        hba.push_rq_cqe(CqeBuilder::marker(hba.config.rq_hdr_id, 0, 99).build());
        hba.push_eqe(Eqe::sentinel());

        let mut layer = Recorder::default();
        assert_eq!(q.poll(&mut layer), 1);
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(layer.syncs, vec![99]);
        assert_eq!(layer.pending_runs, 1);
    }

    #[test]
    fn test_unsupported_major_stops_poll() {
        let (mut hba, mut q) = setup(HwqpConfig::default());
        let seen: Seen = Rc::default();
        let tag = q.post_wqe(marker(), true, recording(&seen)).unwrap();
        // major 2, valid
        hba.push_eqe(Eqe::from_word(1 | (2 << 1)));
        hba.complete_ok(tag);
        assert_eq!(q.poll(&mut Recorder::default()), 1);
        assert!(seen.borrow().is_empty());
        assert_eq!(q.poll(&mut Recorder::default()), 1);
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_eq_budget_and_intermediate_ack() {
        let limits = QueueLimits {
            posted_limit: 2,
            processed_limit: 3,
        };
        let (mut hba, mut q) = setup(HwqpConfig::default().with_eq_limits(limits));
        for _ in 0..5 {
            hba.push_eqe(Eqe::standard(0x3ff));
        }
        assert_eq!(q.poll(&mut Recorder::default()), 3);
        // last doorbell acknowledged the one entry left after the batch of 2
        assert_eq!((hba.doorbells.eq.last() >> 16) & 0x1fff, 1);
        assert_eq!(q.poll(&mut Recorder::default()), 2);
        assert_eq!(q.counters().invalid_cq_id, 5);
    }

    #[test]
    fn test_cq_rearmed_after_drain() {
        let (mut hba, mut q) = setup(HwqpConfig::default());
        let tag = q.post_wqe(marker(), true, Box::new(|_, _, _| {})).unwrap();
        hba.complete_ok(tag);
        q.poll(&mut Recorder::default());
        let db = hba.doorbells.cq_wq.last();
        assert_eq!(db & 0x3ff, hba.config.cq_wq_id as u32);
        assert_eq!((db >> 16) & 0x1fff, 1);
        assert!(db & (1 << 29) != 0);
    }

    #[test]
    fn test_wq_release_reclaims_threshold() {
        let (mut hba, mut q) = setup(HwqpConfig::default());
        for _ in 0..6 {
            q.post_wqe(marker(), false, Box::new(|_, _, _| {})).unwrap();
        }
        assert_eq!(q.queues().wq.used(), 6);
        hba.complete(CqeBuilder::wq_release(hba.config.wq_id, 4).build());
        q.poll(&mut Recorder::default());
        assert_eq!(q.queues().wq.used(), 1);
    }

    #[test]
    fn test_offline_stops_dispatch() {
        let (mut hba, mut q) = setup(HwqpConfig::default());
        let seen: Seen = Rc::default();
        let first = q
            .post_wqe(
                marker(),
                true,
                Box::new(|q: &mut HwQueuePair, _: &Cqe, _| q.set_online(false)),
            )
            .unwrap();
        let second = q.post_wqe(marker(), true, recording(&seen)).unwrap();
        hba.push_wq_cqe(CqeBuilder::work_completion(first, 0, 0).build());
        hba.push_wq_cqe(CqeBuilder::work_completion(second, 0, 0).build());
        hba.signal_wq_cq();
        q.poll(&mut Recorder::default());
        assert!(seen.borrow().is_empty());
        assert_eq!(q.outstanding(), 1);
    }

    #[test]
    fn test_frame_released_and_reposted() {
        let (mut hba, mut q) = setup(HwqpConfig::default());
        let header = FcFrameHeader {
            r_ctl: 0x06,
            fc_type: 0x28,
            ox_id: 0x1234,
            ..FcFrameHeader::default()
        };
        let slot = hba.deliver_frame(&header, b"cmd");
        let mut layer = Recorder::default();
        q.poll(&mut layer);

        assert_eq!(layer.frames.len(), 1);
        let frame = layer.frames[0];
        assert_eq!(frame.rq_element_index, slot);
        assert_eq!(frame.header.ox_id, 0x1234);
        assert_eq!(frame.payload_len, 3);
        // released buffer went back at head: one slot retired, one reposted
        assert_eq!(q.queues().rq.hdr().used(), 32);
        assert_eq!(q.queues().rq.hdr().tail(), 1);
    }

    #[test]
    fn test_frame_retained_until_released() {
        let (mut hba, mut q) = setup(HwqpConfig::default());
        hba.deliver_frame(&FcFrameHeader::default(), b"ls");
        let mut layer = Recorder {
            retain: true,
            ..Recorder::default()
        };
        q.poll(&mut layer);
        assert_eq!(q.queues().rq.hdr().tail(), 0);
        assert_eq!(q.rq_payload(layer.frames[0].buf_index, 2), Some(&b"ls"[..]));

        q.rq_buffer_release(layer.frames[0].buf_index).unwrap();
        assert_eq!(q.queues().rq.hdr().tail(), 1);
        assert_eq!(q.queues().rq.hdr().used(), 32);
    }

    #[test]
    fn test_rq_insufficient_buffers_not_consumed() {
        let (mut hba, mut q) = setup(HwqpConfig::default());
        hba.fail_frame(rq_status::INSUFF_BUF_NEEDED);
        let mut layer = Recorder::default();
        q.poll(&mut layer);
        assert!(layer.frames.is_empty());
        assert_eq!(q.counters().rq_status_err, 1);
        assert_eq!(q.queues().rq.hdr().tail(), 0);
    }

    #[test]
    fn test_rq_length_error_reposts_buffer() {
        let (mut hba, mut q) = setup(HwqpConfig::default());
        hba.fail_frame(rq_status::BUF_LEN_EXCEEDED);
        let mut layer = Recorder::default();
        q.poll(&mut layer);
        assert!(layer.frames.is_empty());
        assert_eq!(q.counters().rq_buf_len_err, 0);
        assert_eq!(q.queues().rq.hdr().tail(), 1);
    }

    #[test]
    fn test_rq_bad_index_counted() {
        let (mut hba, mut q) = setup(HwqpConfig::default());
        let rq_id = hba.config.rq_hdr_id;
        hba.push_rq_cqe(CqeBuilder::async_frame(rq_id, 500, rq_status::SUCCESS, 0).build());
        hba.push_rq_cqe(
            CqeBuilder::async_frame(rq_id, 500, rq_status::DMA_FAILURE, 0).build(),
        );
        hba.signal_rq_cq();
        let mut layer = Recorder::default();
        q.poll(&mut layer);
        assert!(layer.frames.is_empty());
        assert_eq!(q.counters().rq_index_err, 1);
        assert_eq!(q.counters().rq_buf_len_err, 1);
    }

    #[test]
    fn test_marker_reports_tag_and_reposts() {
        let (mut hba, mut q) = setup(HwqpConfig::default());
        hba.deliver_marker(0xdead_beef);
        let mut layer = Recorder::default();
        q.poll(&mut layer);
        assert_eq!(layer.syncs, vec![0xdead_beef]);
        assert_eq!(q.queues().rq.hdr().tail(), 1);
    }

    #[test]
    fn test_xri_aborted_returns_pending_exchange() {
        let (mut hba, mut q) = setup(HwqpConfig::default());
        let x = q.acquire_exchange().unwrap();
        let xri = x.id();
        assert_eq!(q.cleanup_exchange(x, true, false), None);
        assert_eq!(q.exchange_info().available, 7);
        hba.xri_aborted(xri);
        q.poll(&mut Recorder::default());
        assert_eq!(q.pending_aborts(), 0);
        assert_eq!(q.exchange_info().available, 8);
    }
}
