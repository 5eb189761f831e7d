//! Common test utilities for queue-pair integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Once};

pub use sli4::test_utils::{SimConfig, SimHba};

use nvmf_fc::{
    CompletionStatus, DataDirection, Exchange, FrameDisposition, HwQueuePair, HwqpConfig,
    IoRequest, IoVec, Port, ReceivedFrame, RequestLayer,
};
use sli4::{Cqe, IdentityTranslator};

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness. Filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Simulated adapter plus an online queue pair with posted RQ buffers.
pub struct TestQueuePair {
    pub hba: SimHba,
    pub hwqp: HwQueuePair,
}

impl TestQueuePair {
    pub fn new(config: HwqpConfig, port: Arc<Port>) -> Self {
        Self::with_sim(SimConfig::default(), config, port)
    }

    pub fn with_sim(sim: SimConfig, config: HwqpConfig, port: Arc<Port>) -> Self {
        init_tracing();
        let (hba, queues) = SimHba::new(sim);
        let mut hwqp = HwQueuePair::new(config, queues, port, Box::new(IdentityTranslator))
            .expect("queue pair");
        hwqp.init_buffers().expect("RQ buffers");
        hwqp.set_online(true);
        Self { hba, hwqp }
    }

    pub fn poll(&mut self, layer: &mut Recorder) -> u32 {
        self.hwqp.poll(layer)
    }
}

/// Request layer that records everything the dispatch loop hands it.
#[derive(Debug, Default)]
pub struct Recorder {
    pub frames: Vec<ReceivedFrame>,
    pub syncs: Vec<u64>,
    pub pending_runs: usize,
    /// EQ tail at each pending-work run, i.e. how many EQEs were consumed.
    pub pending_eq_tails: Vec<u16>,
    /// Keep received buffers instead of releasing them.
    pub retain: bool,
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

    fn process_pending(&mut self, hwqp: &mut HwQueuePair) {
        self.pending_runs += 1;
        self.pending_eq_tails.push(hwqp.queues().eq.tail());
    }
}

/// Single-iovec I/O on a freshly acquired exchange.
pub fn io_request(hwqp: &HwQueuePair, direction: DataDirection, len: u32) -> IoRequest {
    IoRequest {
        buf_index: 0,
        rpi: 0x10,
        ox_id: 0x1234,
        s_id: 0x01_0000,
        d_id: 0x02_0000,
        length: len,
        direction,
        iov: vec![IoVec {
            addr: 0x8000_0000,
            len,
        }],
        xchg: Some(hwqp.acquire_exchange().expect("exchange")),
    }
}

/// Where a completion callback left its results.
#[derive(Debug, Default)]
pub struct Outcome {
    pub status: Option<CompletionStatus>,
    pub xb: bool,
    /// XRI returned straight to the pool by the cleanup, if any.
    pub released: Option<Option<u16>>,
}

/// Callback that tears down `xchg` the way a request layer would once its
/// last WQE completed.
pub fn finish_with(
    xchg: Rc<RefCell<Option<Exchange>>>,
    outcome: Rc<RefCell<Outcome>>,
) -> nvmf_fc::Callback {
    Box::new(move |hwqp: &mut HwQueuePair, cqe: &Cqe, status| {
        let mut out = outcome.borrow_mut();
        out.status = Some(status);
        out.xb = cqe.xb();
        if let Some(x) = xchg.borrow_mut().take() {
            out.released = Some(hwqp.complete_exchange(x, cqe));
        }
    })
}
