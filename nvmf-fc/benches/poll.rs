//! Post/complete cycle through the dispatch loop on a simulated adapter.
//!
//! Run with:
//! ```bash
//! cargo bench --package nvmf-fc --bench poll
//! ```

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use nvmf_fc::{FrameDisposition, HwQueuePair, HwqpConfig, Port, ReceivedFrame, RequestLayer};
use sli4::test_utils::{SimConfig, SimHba};
use sli4::{CqeBuilder, FcFrameHeader, IdentityTranslator};

// =============================================================================
// Setup
// =============================================================================

struct Sink {
    frames: u64,
}

impl RequestLayer for Sink {
    fn frame_received(&mut self, _hwqp: &mut HwQueuePair, _frame: ReceivedFrame) -> FrameDisposition {
        self.frames += 1;
        FrameDisposition::Release
    }
}

fn setup() -> (SimHba, HwQueuePair) {
    let sim = SimConfig {
        wq_entries: 1024,
        cq_entries: 1024,
        eq_entries: 1024,
        ..Default::default()
    };
    let (hba, queues) = SimHba::new(sim);
    let port = Arc::new(Port::new(0, 0x100, 256));
    let mut hwqp = HwQueuePair::new(HwqpConfig::default(), queues, port, Box::new(IdentityTranslator))
        .expect("queue pair");
    hwqp.init_buffers().expect("RQ buffers");
    hwqp.set_online(true);
    (hba, hwqp)
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_post_complete(c: &mut Criterion) {
    let mut group = c.benchmark_group("post_complete");

    for batch in [1u16, 8, 32] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let (mut hba, mut hwqp) = setup();
            let mut sink = Sink { frames: 0 };
            let wq_id = hba.config.wq_id;
            b.iter(|| {
                for i in 0..batch {
                    let tag = hwqp.issue_queue_sync(i as u64, None).expect("post");
                    let wqe = hba.take_wqe();
                    let idx = hba.wq_index().wrapping_sub(1);
                    if wqe.wqec() {
                        hba.push_wq_cqe(CqeBuilder::wq_release(wq_id, idx).build());
                    }
                    hba.complete_ok(tag);
                }
                black_box(hwqp.poll(&mut sink));
            });
        });
    }
    group.finish();
}

fn bench_receive(c: &mut Criterion) {
    let (mut hba, mut hwqp) = setup();
    let mut sink = Sink { frames: 0 };
    let header = FcFrameHeader {
        r_ctl: 0x06,
        fc_type: 0x28,
        ..Default::default()
    };
    let payload = [0u8; 64];

    c.bench_function("receive_frame", |b| {
        b.iter(|| {
            hba.deliver_frame(&header, &payload);
            black_box(hwqp.poll(&mut sink));
        });
    });
    black_box(sink.frames);
}

criterion_group!(benches, bench_post_complete, bench_receive);
criterion_main!(benches);
