//! Human-readable ring state for debugging a stuck queue pair.

use std::fmt::Write;

use sli4::SliQueue;

use crate::hwqp::HwQueuePair;

/// Entries printed on each side of a ring's tail.
const DUMP_RADIUS: u16 = 1;

/// Dwords per output line.
const DWORDS_PER_LINE: usize = 8;

impl HwQueuePair {
    /// Render every ring of this queue pair with the entries around its tail.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "hwqp:{}, online:{}, outstanding:{}, pending_aborts:{}",
            self.config.hwqp_id,
            self.online,
            self.tags.in_use(),
            self.pending.len()
        );
        let q = &self.queues;
        for ring in [&q.eq, &q.cq_wq, &q.cq_rq, &q.wq, q.rq.hdr(), q.rq.payload()] {
            dump_ring(&mut out, ring);
        }
        out
    }
}

/// Dump the LS queue pair followed by every IO queue pair.
pub fn dump_all(ls: &HwQueuePair, io: &[HwQueuePair]) -> String {
    let mut out = ls.dump();
    for hwqp in io {
        out.push_str(&hwqp.dump());
    }
    out
}

fn dump_ring(out: &mut String, q: &SliQueue) {
    let limits = q.limits();
    let _ = writeln!(
        out,
        "name:{}, head:{}, tail:{}, used:{}, posted_limit:{}, processed_limit:{}, qid:{}, size:{}, max_entries:{}",
        q.kind().name(),
        q.head(),
        q.tail(),
        q.used(),
        limits.posted_limit,
        limits.processed_limit,
        q.qid(),
        q.entry_size(),
        q.max_entries()
    );

    let max = q.max_entries();
    let tail = q.tail();
    let first = (tail + max - DUMP_RADIUS.min(max - 1)) % max;
    let count = (2 * DUMP_RADIUS + 1).min(max);
    for i in 0..count {
        let idx = (first + i) % max;
        let _ = writeln!(out, "entry:{idx}");
        dump_dwords(out, q.entry(idx));
    }
}

fn dump_dwords(out: &mut String, bytes: &[u8]) {
    for (i, chunk) in bytes.chunks(4).enumerate() {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        if i > 0 {
            out.push(if i % DWORDS_PER_LINE == 0 { '\n' } else { ' ' });
        }
        let _ = write!(out, "{:08x}", u32::from_le_bytes(word));
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sli4::test_utils::{SimConfig, SimHba};
    use sli4::{CqeBuilder, IdentityTranslator};

    use super::*;
    use crate::config::HwqpConfig;
    use crate::port::Port;

    fn online() -> (SimHba, HwQueuePair) {
        let (hba, queues) = SimHba::new(SimConfig::default());
        let port = Arc::new(Port::new(1, 0x100, 4));
        let mut q =
            HwQueuePair::new(HwqpConfig::default(), queues, port, Box::new(IdentityTranslator))
                .unwrap();
        q.set_online(true);
        (hba, q)
    }

    #[test]
    fn test_dump_lists_every_ring() {
        let (_hba, q) = online();
        let text = q.dump();
        for name in ["eq", "cq_wq", "cq_rq", "wq", "rq_hdr", "rq_payload"] {
            assert!(text.contains(&format!("name:{name},")), "missing {name}");
        }
        assert!(text.contains("qid:30,"));
        assert!(text.contains("posted_limit:16, processed_limit:64"));
        // three entries per ring
        assert_eq!(text.matches("entry:").count(), 18);
    }

    #[test]
    fn test_dump_shows_entries_around_tail() {
        let (mut hba, q) = online();
        hba.push_wq_cqe(CqeBuilder::work_completion(7, 0, 0).build());
        let text = q.dump();
        let cq = text
            .split("name:")
            .find(|s| s.starts_with("cq_wq,"))
            .unwrap();
        let max = q.queues().cq_wq.max_entries() - 1;
        assert!(cq.contains(&format!("entry:{max}\n")));
        assert!(cq.contains("entry:0\n"));
        assert!(cq.contains("entry:1\n"));
        // tag 7 in the top half of word 0
        assert!(cq.contains("entry:0\n00070000"));
    }

    #[test]
    fn test_dwords_wrap_every_eight() {
        let mut out = String::new();
        let bytes: Vec<u8> = (0u8..64).collect();
        dump_dwords(&mut out, &bytes);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].split(' ').count(), 8);
        assert!(lines[0].starts_with("03020100 07060504"));
    }

    #[test]
    fn test_dump_all_concatenates() {
        let (_a, ls) = online();
        let (_b, io) = online();
        let text = dump_all(&ls, std::slice::from_ref(&io));
        assert_eq!(text.matches("hwqp:0,").count(), 2);
    }
}
