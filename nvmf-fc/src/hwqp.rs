//! Hardware queue pair.
//!
//! A [`HwQueuePair`] owns one [`QueueSet`] (EQ, two CQs, WQ and the RQ
//! pair), the request-tag pool for its WQ and the set of exchanges waiting
//! for an XRI-aborted confirmation. It is polled by exactly one thread.
//!
//! Posting splits into a readiness check and the ring write so that an
//! operation holding an [`Exchange`] learns about a full queue or an empty
//! tag pool before it hands the exchange to a completion callback.

use std::collections::HashMap;
use std::sync::Arc;

use sli4::frame::FcFrameHeader;
use sli4::{AddressTranslator, Cqe, QueueSet, Wqe};

use crate::config::HwqpConfig;
use crate::error::{CompletionStatus, Error, Resource, Result};
use crate::port::Port;
use crate::reqtag::{ReqTagPool, WqecCounter};
use crate::xchg::{Exchange, ExchangeInfo};

/// Completion callback bound to a request tag.
///
/// Invoked exactly once from [`HwQueuePair::poll`] with the raw CQE and its
/// status. Dropped without being invoked only by [`HwQueuePair::reinit`].
pub type Callback = Box<dyn FnOnce(&mut HwQueuePair, &Cqe, CompletionStatus)>;

/// Notification for operations whose internal completion handling the queue
/// pair does itself (BLS responses, generic requests).
pub type DoneCallback = Box<dyn FnOnce(&mut HwQueuePair, CompletionStatus)>;

// =============================================================================
// Counters
// =============================================================================

/// Error and event counters of one queue pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// WQE could not be written into the WQ ring.
    pub wqe_write_err: u64,
    /// Abort WQEs posted with ABTS on the wire.
    pub num_abts_sent: u64,
    /// Exchanges released while an ABTS was still owed.
    pub abts_dropped: u64,
    /// CQEs with a code the dispatch loop does not handle.
    pub invalid_cq_type: u64,
    /// EQEs naming a CQ that is not part of this queue pair.
    pub invalid_cq_id: u64,
    /// Work completions for a request tag that is not checked out.
    pub protocol_errors: u64,
    /// RQ length or DMA errors with an out-of-range element index.
    pub rq_buf_len_err: u64,
    /// RQ completions reporting insufficient buffers.
    pub rq_status_err: u64,
    /// Successful RQ completions with an out-of-range element index.
    pub rq_index_err: u64,
}

// =============================================================================
// Request layer
// =============================================================================

/// A frame the adapter placed in an RQ buffer pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedFrame {
    /// Buffer pair holding the frame; hand it back through
    /// [`HwQueuePair::rq_buffer_release`] after retaining it.
    pub buf_index: u16,
    pub rq_element_index: u16,
    pub header: FcFrameHeader,
    pub payload_len: u16,
    /// Bus address of the payload buffer.
    pub payload_phys: u64,
}

/// What the request layer did with a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// The buffer stays with the request layer until it is released.
    Retained,
    /// Repost the buffer right away.
    Release,
}

/// Upper layer fed by the dispatch loop.
pub trait RequestLayer {
    fn frame_received(&mut self, hwqp: &mut HwQueuePair, frame: ReceivedFrame) -> FrameDisposition;

    /// A queue-sync marker posted with `tag` came back through the RQ path.
    fn queue_sync_done(&mut self, hwqp: &mut HwQueuePair, tag: u64) {
        let _ = (hwqp, tag);
    }

    /// Run deferred work after WQ completions were processed.
    fn process_pending(&mut self, hwqp: &mut HwQueuePair) {
        let _ = hwqp;
    }
}

// =============================================================================
// HwQueuePair
// =============================================================================

pub struct HwQueuePair {
    pub(crate) config: HwqpConfig,
    pub(crate) queues: QueueSet,
    pub(crate) port: Arc<Port>,
    pub(crate) translator: Box<dyn AddressTranslator>,
    pub(crate) tags: ReqTagPool<Callback>,
    pub(crate) wqec: WqecCounter,
    /// Exchanges with an abort outstanding, keyed by XRI.
    pub(crate) pending: HashMap<u16, Exchange>,
    pub(crate) online: bool,
    pub(crate) counters: Counters,
    pub(crate) send_frame_seq_id: u8,
    pub(crate) free_rq_slots: u32,
    pub(crate) num_conns: u32,
    pub(crate) cid_cnt: u32,
}

impl std::fmt::Debug for HwQueuePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HwQueuePair")
            .field("hwqp_id", &self.config.hwqp_id)
            .field("port", &self.port.id())
            .field("online", &self.online)
            .field("queues", &self.queues)
            .field("tags", &self.tags)
            .field("pending", &self.pending.len())
            .field("counters", &self.counters)
            .finish()
    }
}

impl HwQueuePair {
    /// Take ownership of an adapter-created queue set.
    ///
    /// The queue pair starts offline; call [`init_buffers`](Self::init_buffers)
    /// and [`set_online`](Self::set_online) before posting.
    pub fn new(
        config: HwqpConfig,
        mut queues: QueueSet,
        port: Arc<Port>,
        translator: Box<dyn AddressTranslator>,
    ) -> Result<Self> {
        config.validate()?;
        Self::apply_limits(&config, &mut queues)?;
        Ok(Self {
            tags: ReqTagPool::new(config.reqtag_pool_size),
            wqec: WqecCounter::new(config.wqec_threshold),
            config,
            queues,
            port,
            translator,
            pending: HashMap::new(),
            online: false,
            counters: Counters::default(),
            send_frame_seq_id: 0,
            free_rq_slots: 0,
            num_conns: 0,
            cid_cnt: 0,
        })
    }

    fn apply_limits(config: &HwqpConfig, queues: &mut QueueSet) -> Result<()> {
        queues.validate()?;
        queues.eq.set_limits(config.eq_limits);
        queues.cq_wq.set_limits(config.cq_limits);
        queues.cq_rq.set_limits(config.cq_limits);
        Ok(())
    }

    /// Post every RQ buffer pair, arm both CQs and hand the RQ to the adapter.
    pub fn init_buffers(&mut self) -> Result<()> {
        let posted = self.queues.rq.post_all()?;
        self.queues.cq_wq.notify(true, 0);
        self.queues.cq_rq.notify(true, 0);
        self.queues.rq.notify(posted.saturating_sub(1));
        tracing::debug!(hwqp_id = self.config.hwqp_id, posted, "RQ buffers posted");
        Ok(())
    }

    pub fn set_online(&mut self, online: bool) {
        self.online = online;
        self.free_rq_slots = self.queues.rq.num_buffers() as u32;
        self.num_conns = 0;
    }

    /// Swap in the rings of a reset queue pair.
    ///
    /// The tag pool is kept, but every outstanding tag is released and its
    /// callback dropped: the adapter no longer knows about those WQEs.
    /// Exchanges owned by the queue pair's own callbacks (LS, BLS and
    /// generic requests) return to the pool as those callbacks drop.
    /// Exchanges waiting for an abort confirmation go back to the pool for
    /// the same reason. Call [`init_buffers`](Self::init_buffers) afterwards.
    pub fn reinit(&mut self, mut queues: QueueSet) -> Result<QueueSet> {
        Self::apply_limits(&self.config, &mut queues)?;
        let old = std::mem::replace(&mut self.queues, queues);
        let released = self.tags.release_all();
        if released > 0 {
            tracing::debug!(
                hwqp_id = self.config.hwqp_id,
                released,
                "released outstanding request tags"
            );
        }
        for (_, xchg) in self.pending.drain() {
            self.port.pool().put(xchg);
        }
        self.wqec.reset();
        Ok(old)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn hwqp_id(&self) -> u16 {
        self.config.hwqp_id
    }

    pub fn config(&self) -> &HwqpConfig {
        &self.config
    }

    #[inline]
    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn queues(&self) -> &QueueSet {
        &self.queues
    }

    pub fn port(&self) -> &Arc<Port> {
        &self.port
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Request tags with a WQE in flight.
    pub fn outstanding(&self) -> usize {
        self.tags.in_use()
    }

    pub fn pending_aborts(&self) -> usize {
        self.pending.len()
    }

    pub fn is_abort_pending(&self, xri: u16) -> bool {
        self.pending.contains_key(&xri)
    }

    pub fn exchange_info(&self) -> ExchangeInfo {
        self.port.exchange_info()
    }

    /// Bytes the adapter placed in payload buffer `buf_index`.
    pub fn rq_payload(&self, buf_index: u16, len: usize) -> Option<&[u8]> {
        let buf = self.queues.rq.payload_buffer(buf_index)?.as_slice();
        buf.get(..len)
    }

    // =========================================================================
    // WQE posting
    // =========================================================================

    /// Fail fast if a WQE could not be posted right now.
    pub(crate) fn check_post_ready(&self) -> Result<()> {
        if self.port.is_dead() {
            return Err(Error::PortDead);
        }
        if !self.online {
            return Err(Error::Offline);
        }
        if self.queues.wq.is_full() {
            return Err(Error::QueueFull);
        }
        if self.tags.next_tag().is_none() {
            return Err(Error::ResourceExhausted(Resource::RequestTag));
        }
        Ok(())
    }

    /// Post `wqe` with a fresh request tag bound to `cb`.
    pub(crate) fn post_wqe(&mut self, wqe: Wqe, notify: bool, cb: Callback) -> Result<u16> {
        self.post_wqe_owned(wqe, notify, cb, |cb| cb)
            .map_err(|(e, _)| e)
    }

    /// Post `wqe`; the callback is built from `owned` only once the WQE is in
    /// the ring. On failure `owned` is handed back untouched.
    pub(crate) fn post_wqe_owned<T>(
        &mut self,
        mut wqe: Wqe,
        notify: bool,
        owned: T,
        make_cb: impl FnOnce(T) -> Callback,
    ) -> std::result::Result<u16, (Error, T)> {
        if let Err(e) = self.check_post_ready() {
            return Err((e, owned));
        }
        let Some(tag) = self.tags.next_tag() else {
            return Err((Error::ResourceExhausted(Resource::RequestTag), owned));
        };
        wqe.set_request_tag(tag);
        let wqec = self.wqec.next_is_wqec();
        wqe.set_wqec(wqec);

        if let Err(e) = self.queues.wq.enqueue_with(|slot| wqe.write_to(slot)) {
            self.counters.wqe_write_err += 1;
            tracing::error!(hwqp_id = self.config.hwqp_id, tag, error = %e, "WQE write failed");
            return Err((e.into(), owned));
        }
        self.wqec.commit(wqec);
        let bound = self.tags.acquire(make_cb(owned));
        debug_assert_eq!(bound, Some(tag));

        if notify {
            self.queues.wq.notify(false, 1);
        }
        Ok(tag)
    }

    /// Invoke `cb` outside the dispatch loop, as if its WQE had completed
    /// successfully with request tag `tag`.
    pub(crate) fn complete_now(&mut self, tag: u16, cb: Callback) {
        let cqe = sli4::CqeBuilder::work_completion(tag, CompletionStatus::SUCCESS.status, 0).build();
        cb(self, &cqe, CompletionStatus::SUCCESS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sli4::IdentityTranslator;
    use sli4::test_utils::{SimConfig, SimHba};
    use sli4::wqe::Marker;

    fn hwqp(config: HwqpConfig) -> (SimHba, HwQueuePair) {
        let (hba, queues) = SimHba::new(SimConfig {
            wq_entries: 8,
            ..SimConfig::default()
        });
        let port = Arc::new(Port::new(0, 0x100, 16));
        let q = HwQueuePair::new(config, queues, port, Box::new(IdentityTranslator)).unwrap();
        (hba, q)
    }

    fn nop() -> Callback {
        Box::new(|_, _, _| {})
    }

    fn marker() -> Wqe {
        Marker {
            tag: 1,
            skip_rq: None,
        }
        .encode()
    }

    #[test]
    fn test_offline_rejects_post() {
        let (_hba, mut q) = hwqp(HwqpConfig::default());
        assert!(matches!(q.post_wqe(marker(), true, nop()), Err(Error::Offline)));
        assert_eq!(q.outstanding(), 0);
    }

    #[test]
    fn test_post_writes_tag_and_rings_doorbell() {
        let (mut hba, mut q) = hwqp(HwqpConfig::default());
        q.set_online(true);
        let tag = q.post_wqe(marker(), true, nop()).unwrap();
        assert_eq!(tag, 0);
        let wqe = hba.take_wqe();
        assert_eq!(wqe.request_tag(), tag);
        // wq_id 30, index = head 1, one posted
        assert_eq!(hba.doorbells.wq.last(), 30 | (1 << 16) | (1 << 24));
        assert_eq!(q.queues().wq.used(), 1);
    }

    #[test]
    fn test_wq_full_keeps_tag_pool_intact() {
        let (_hba, mut q) = hwqp(HwqpConfig::default());
        q.set_online(true);
        for _ in 0..8 {
            q.post_wqe(marker(), false, nop()).unwrap();
        }
        assert!(matches!(q.post_wqe(marker(), false, nop()), Err(Error::QueueFull)));
        assert_eq!(q.outstanding(), 8);
    }

    #[test]
    fn test_tag_exhaustion_returns_owned_value() {
        let (_hba, mut q) = hwqp(HwqpConfig::default().with_reqtag_pool_size(1));
        q.set_online(true);
        q.post_wqe(marker(), false, nop()).unwrap();
        let err = q
            .post_wqe_owned(marker(), false, 42u32, |_| nop())
            .unwrap_err();
        assert!(matches!(err.0, Error::ResourceExhausted(Resource::RequestTag)));
        assert_eq!(err.1, 42);
    }

    #[test]
    fn test_wqec_set_on_fifth_wqe() {
        let (mut hba, mut q) = hwqp(HwqpConfig::default());
        q.set_online(true);
        let flags: Vec<bool> = (0..5)
            .map(|_| {
                q.post_wqe(marker(), false, nop()).unwrap();
                hba.take_wqe().wqec()
            })
            .collect();
        assert_eq!(flags, vec![false, false, false, false, true]);
    }

    #[test]
    fn test_set_online_resets_connection_state() {
        let (_hba, mut q) = hwqp(HwqpConfig::default());
        q.num_conns = 3;
        q.set_online(true);
        assert!(q.is_online());
        assert_eq!(q.num_conns, 0);
        assert_eq!(q.free_rq_slots, 32);
    }
}
