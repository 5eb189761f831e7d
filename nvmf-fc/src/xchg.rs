//! Hardware exchange contexts (XRIs).
//!
//! An XRI is a per-port hardware resource. Software holds it as a
//! move-only [`Exchange`]; the value is always in exactly one place: the
//! port's free ring, a queue pair's pending-abort set, or the operation
//! that acquired it.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::port::Port;

/// A checked-out exchange.
#[must_use = "an exchange must be released back to its pool"]
#[derive(Debug, PartialEq, Eq)]
pub struct Exchange {
    id: u16,
    active: bool,
    aborted: bool,
    send_abts: bool,
}

impl Exchange {
    fn fresh(id: u16) -> Self {
        Self {
            id,
            active: false,
            aborted: false,
            send_abts: false,
        }
    }

    #[inline]
    pub fn id(&self) -> u16 {
        self.id
    }

    /// A WQE using this exchange is owned by the adapter.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Tearing down this exchange must put an ABTS on the wire.
    #[inline]
    pub fn send_abts(&self) -> bool {
        self.send_abts
    }

    /// The request owning this exchange was aborted.
    pub fn mark_aborted(&mut self) {
        self.aborted = true;
    }

    pub fn set_send_abts(&mut self, on: bool) {
        self.send_abts = on;
    }

    pub(crate) fn set_active(&mut self, on: bool) {
        self.active = on;
    }
}

/// An exchange owned by a pending completion callback.
///
/// If the callback is dropped without running (queue-pair reinit), the
/// exchange goes back to its port's pool.
#[derive(Debug)]
pub(crate) struct HeldExchange {
    xchg: Option<Exchange>,
    port: Arc<Port>,
}

impl HeldExchange {
    pub(crate) fn new(xchg: Exchange, port: Arc<Port>) -> Self {
        Self {
            xchg: Some(xchg),
            port,
        }
    }

    /// Hand the exchange to the completion path.
    pub(crate) fn take(mut self) -> Option<Exchange> {
        self.xchg.take()
    }
}

impl Drop for HeldExchange {
    fn drop(&mut self) {
        if let Some(mut xchg) = self.xchg.take() {
            tracing::debug!(xri = xchg.id(), "exchange returned by dropped callback");
            xchg.set_active(false);
            self.port.pool().put(xchg);
        }
    }
}

/// Snapshot of a pool's occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeInfo {
    pub base: u16,
    pub total: u16,
    pub available: usize,
}

/// Lock-free free list of a port's XRIs, shared by its queue pairs.
#[derive(Debug)]
pub struct ExchangePool {
    ring: ArrayQueue<u16>,
    base: u16,
    count: u16,
}

impl ExchangePool {
    /// Pool holding XRIs `base..base + count`.
    pub fn new(base: u16, count: u16) -> Self {
        let ring = ArrayQueue::new(count.max(1) as usize);
        for i in 0..count {
            // Cannot fail: the ring holds exactly `count` ids.
            let _ = ring.push(base.wrapping_add(i));
        }
        Self { ring, base, count }
    }

    /// Pop a free XRI with all flags cleared.
    pub fn acquire(&self) -> Option<Exchange> {
        self.ring.pop().map(Exchange::fresh)
    }

    /// Return an exchange to the free ring.
    pub fn put(&self, xchg: Exchange) {
        let id = xchg.id;
        if self.ring.push(id).is_err() {
            tracing::error!(xri = id, "exchange pool overflow");
        }
    }

    pub fn contains(&self, id: u16) -> bool {
        id.wrapping_sub(self.base) < self.count
    }

    pub fn available(&self) -> usize {
        self.ring.len()
    }

    pub fn info(&self) -> ExchangeInfo {
        ExchangeInfo {
            base: self.base,
            total: self.count,
            available: self.available(),
        }
    }

    /// Empty the free ring, returning how many ids it held.
    pub fn drain(&self) -> usize {
        let mut n = 0;
        while self.ring.pop().is_some() {
            n += 1;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_resets_flags() {
        let pool = ExchangePool::new(0x100, 2);
        let mut x = pool.acquire().unwrap();
        assert_eq!(x.id(), 0x100);
        x.set_active(true);
        x.mark_aborted();
        x.set_send_abts(true);
        pool.put(x);
        let _second = pool.acquire().unwrap();
        let again = pool.acquire().unwrap();
        assert_eq!(again.id(), 0x100);
        assert!(!again.is_active());
        assert!(!again.is_aborted());
        assert!(!again.send_abts());
    }

    #[test]
    fn test_exhaustion_then_release() {
        let pool = ExchangePool::new(10, 3);
        let held: Vec<Exchange> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        assert!(pool.acquire().is_none());
        let mut held = held.into_iter();
        pool.put(held.next().unwrap());
        assert_eq!(pool.acquire().map(|x| x.id()), Some(10));
        for x in held {
            pool.put(x);
        }
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_held_exchange_returns_on_drop() {
        let port = Arc::new(Port::new(0, 0x10, 2));
        let x = port.pool().acquire().unwrap();
        let held = HeldExchange::new(x, Arc::clone(&port));
        assert_eq!(port.pool().available(), 1);
        drop(held);
        assert_eq!(port.pool().available(), 2);

        let x = port.pool().acquire().unwrap();
        let taken = HeldExchange::new(x, Arc::clone(&port)).take().unwrap();
        assert_eq!(port.pool().available(), 1);
        port.pool().put(taken);
    }

    #[test]
    fn test_info_and_contains() {
        let pool = ExchangePool::new(0x40, 8);
        let x = pool.acquire().unwrap();
        assert_eq!(
            pool.info(),
            ExchangeInfo {
                base: 0x40,
                total: 8,
                available: 7
            }
        );
        assert!(pool.contains(0x47));
        assert!(!pool.contains(0x48));
        assert!(!pool.contains(0x3f));
        pool.put(x);
        assert_eq!(pool.drain(), 8);
        assert_eq!(pool.available(), 0);
    }
}
