//! Exchange teardown.
//!
//! An exchange outlives the request that used it whenever the adapter still
//! holds it (`xb` set in the completion). Such an exchange is aborted and
//! parked until the adapter reports XRI_ABORTED; only then does the id go
//! back to the port's pool.
//!
//! ```text
//! Free -> Active -> Completed -----------------------------> Free
//!                \-> AbortIssued -> PendingConfirmation ---> Free
//! ```

use sli4::wqe::Abort;
use sli4::{Cqe, CqeKind};

use crate::error::{Error, Resource, Result};
use crate::hwqp::HwQueuePair;
use crate::xchg::Exchange;

impl HwQueuePair {
    /// Check out an exchange from the port's pool.
    pub fn acquire_exchange(&self) -> Result<Exchange> {
        if self.port.is_dead() {
            return Err(Error::PortDead);
        }
        self.port
            .pool()
            .acquire()
            .ok_or(Error::ResourceExhausted(Resource::Exchange))
    }

    /// Hand an exchange back once the request that owned it is done.
    ///
    /// An exchange with a WQE still outstanding is aborted first. Returns
    /// the XRI when it went straight back to the pool.
    pub fn release_exchange(&mut self, xchg: Exchange) -> Option<u16> {
        if xchg.is_active() {
            let send_abts = xchg.send_abts();
            return self.cleanup_exchange(xchg, true, send_abts);
        }
        if xchg.is_aborted() && xchg.send_abts() {
            self.counters.abts_dropped += 1;
            tracing::warn!(
                hwqp_id = self.config.hwqp_id,
                xri = xchg.id(),
                "exchange released with ABTS still owed"
            );
        }
        let id = xchg.id();
        self.port.pool().put(xchg);
        Some(id)
    }

    /// Tear down an exchange after its last WQE completed.
    ///
    /// `hw_busy` is the completion's `xb` bit. When the adapter still holds
    /// the exchange and the port is alive, an abort is issued (if the
    /// exchange is still active) and the exchange waits in the pending set
    /// for XRI_ABORTED. Otherwise it goes straight back to the pool and its
    /// XRI is returned.
    pub fn cleanup_exchange(
        &mut self,
        mut xchg: Exchange,
        hw_busy: bool,
        send_abts: bool,
    ) -> Option<u16> {
        if send_abts {
            xchg.set_send_abts(true);
        }
        if hw_busy && !self.port.is_dead() {
            if xchg.is_active() {
                // A failed abort still leaves the exchange busy in hardware.
                if let Err(e) = self.issue_abort(&mut xchg) {
                    tracing::error!(
                        hwqp_id = self.config.hwqp_id,
                        xri = xchg.id(),
                        error = %e,
                        "abort post failed"
                    );
                }
            }
            let xri = xchg.id();
            if self.pending.insert(xri, xchg).is_some() {
                tracing::warn!(hwqp_id = self.config.hwqp_id, xri, "exchange already pending abort");
            }
            return None;
        }
        xchg.set_active(false);
        let xri = xchg.id();
        self.port.pool().put(xchg);
        Some(xri)
    }

    /// [`cleanup_exchange`](Self::cleanup_exchange) with `xb` and the ABTS
    /// decision taken from a work completion.
    pub fn complete_exchange(&mut self, xchg: Exchange, cqe: &Cqe) -> Option<u16> {
        let send_abts = match cqe.decode() {
            Ok(CqeKind::WorkCompletion(wc)) => wc.abts_required(),
            _ => false,
        };
        self.cleanup_exchange(xchg, cqe.xb(), send_abts)
    }

    /// Post an ABORT for `xchg`. The wire ABTS is sent only if the exchange
    /// asks for it.
    pub fn issue_abort(&mut self, xchg: &mut Exchange) -> Result<u16> {
        let send_abts = xchg.send_abts();
        let wqe = Abort {
            xri: xchg.id(),
            send_abts,
        }
        .encode();
        let hwqp_id = self.config.hwqp_id;
        let xri = xchg.id();
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
        xchg.set_active(false);
        xchg.set_send_abts(false);
        tracing::info!(hwqp_id, xri, send_abts, "Abort WQE posted");
        Ok(tag)
    }

    /// The adapter finished aborting `xri`. Returns whether it was pending.
    pub fn on_exchange_aborted(&mut self, xri: u16) -> bool {
        match self.pending.remove(&xri) {
            Some(xchg) => {
                self.port.pool().put(xchg);
                true
            }
            None => {
                tracing::debug!(hwqp_id = self.config.hwqp_id, xri, "XRI aborted for unknown exchange");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sli4::test_utils::{SimConfig, SimHba};
    use sli4::types::{local_reject, wcqe_status, wqe_command};
    use sli4::wqe::field;
    use sli4::{CqeBuilder, IdentityTranslator};

    use super::*;
    use crate::config::HwqpConfig;
    use crate::port::Port;

    fn online() -> (SimHba, HwQueuePair) {
        let (hba, queues) = SimHba::new(SimConfig::default());
        let port = Arc::new(Port::new(1, 0x200, 4));
        let mut q =
            HwQueuePair::new(HwqpConfig::default(), queues, port, Box::new(IdentityTranslator))
                .unwrap();
        q.set_online(true);
        (hba, q)
    }

    fn active(q: &HwQueuePair) -> Exchange {
        let mut x = q.acquire_exchange().unwrap();
        x.set_active(true);
        x
    }

    #[test]
    fn test_inactive_release_returns_to_pool() {
        let (_hba, mut q) = online();
        let x = q.acquire_exchange().unwrap();
        assert_eq!(q.exchange_info().available, 3);
        assert_eq!(q.release_exchange(x), Some(0x200));
        assert_eq!(q.exchange_info().available, 4);
        assert_eq!(q.outstanding(), 0);
    }

    #[test]
    fn test_active_release_aborts_and_parks() {
        let (mut hba, mut q) = online();
        let x = active(&q);
        assert_eq!(q.release_exchange(x), None);
        assert!(q.is_abort_pending(0x200));
        assert_eq!(q.exchange_info().available, 3);

        let wqe = hba.take_wqe();
        assert_eq!(wqe.command(), wqe_command::ABORT);
        assert_eq!(wqe.get(field::ABORT_TAG), 0x200);
        // no ABTS owed: IA stays set
        assert!(wqe.flag(field::ABORT_IA));

        assert!(q.on_exchange_aborted(0x200));
        assert!(!q.is_abort_pending(0x200));
        assert_eq!(q.exchange_info().available, 4);
    }

    #[test]
    fn test_abts_required_clears_ia() {
        let (mut hba, mut q) = online();
        let x = active(&q);
        assert_eq!(q.cleanup_exchange(x, true, true), None);
        let wqe = hba.take_wqe();
        assert!(!wqe.flag(field::ABORT_IA));
        assert_eq!(q.counters().num_abts_sent, 1);
    }

    #[test]
    fn test_not_busy_skips_abort() {
        let (hba, mut q) = online();
        let x = active(&q);
        let cqe =
            CqeBuilder::work_completion(0, wcqe_status::LOCAL_REJECT, local_reject::NO_XRI).build();
        assert_eq!(q.complete_exchange(x, &cqe), Some(0x200));
        assert_eq!(q.outstanding(), 0);
        assert_eq!(q.queues().wq.head(), 0);
        assert_eq!(hba.doorbells.wq.last(), 0);
        assert_eq!(q.exchange_info().available, 4);
    }

    #[test]
    fn test_dead_port_returns_busy_exchange() {
        let (_hba, mut q) = online();
        let x = active(&q);
        q.port().mark_dead();
        assert_eq!(q.cleanup_exchange(x, true, true), Some(0x200));
        assert_eq!(q.pending_aborts(), 0);
        assert_eq!(q.outstanding(), 0);
        assert!(matches!(q.acquire_exchange(), Err(Error::PortDead)));
    }

    #[test]
    fn test_busy_inactive_waits_without_abort() {
        let (_hba, mut q) = online();
        let x = q.acquire_exchange().unwrap();
        assert_eq!(q.cleanup_exchange(x, true, false), None);
        assert_eq!(q.outstanding(), 0);
        assert!(q.is_abort_pending(0x200));
    }

    #[test]
    fn test_aborted_with_abts_owed_is_counted() {
        let (_hba, mut q) = online();
        let mut x = q.acquire_exchange().unwrap();
        x.mark_aborted();
        x.set_send_abts(true);
        assert_eq!(q.release_exchange(x), Some(0x200));
        assert_eq!(q.counters().abts_dropped, 1);
        assert_eq!(q.exchange_info().available, 4);
    }

    #[test]
    fn test_exhaustion_then_release() {
        let (_hba, mut q) = online();
        let held: Vec<Exchange> = (0..4).map(|_| q.acquire_exchange().unwrap()).collect();
        assert!(matches!(
            q.acquire_exchange(),
            Err(Error::ResourceExhausted(Resource::Exchange))
        ));
        for x in held {
            q.release_exchange(x);
        }
        assert!(q.acquire_exchange().is_ok());
    }

    #[test]
    fn test_unknown_xri_aborted_is_ignored() {
        let (_hba, mut q) = online();
        assert!(!q.on_exchange_aborted(0x999));
    }
}
