//! FC ports and the registry that owns their exchange pools.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::xchg::{ExchangeInfo, ExchangePool};

/// A physical FC port: its XRI pool and liveness.
#[derive(Debug)]
pub struct Port {
    id: u32,
    pool: ExchangePool,
    dead: AtomicBool,
}

impl Port {
    pub fn new(id: u32, xri_base: u16, xri_count: u16) -> Self {
        Self {
            id,
            pool: ExchangePool::new(xri_base, xri_count),
            dead: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn pool(&self) -> &ExchangePool {
        &self.pool
    }

    /// A dead port no longer accepts aborts; exchanges go straight back to
    /// the pool.
    #[inline]
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub fn mark_dead(&self) {
        self.dead.store(true, Ordering::Release);
    }

    pub fn exchange_info(&self) -> ExchangeInfo {
        self.pool.info()
    }
}

/// Ports by id. Owned by adapter bring-up and torn down explicitly.
#[derive(Debug, Default)]
pub struct PortRegistry {
    ports: HashMap<u32, Arc<Port>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a port with XRIs `xri_base..xri_base + xri_count`.
    pub fn create_port(&mut self, port_id: u32, xri_base: u16, xri_count: u16) -> Result<Arc<Port>> {
        if self.ports.contains_key(&port_id) {
            return Err(Error::InvalidArgument("port already registered"));
        }
        if xri_count == 0 {
            return Err(Error::InvalidArgument("port needs at least one XRI"));
        }
        let port = Arc::new(Port::new(port_id, xri_base, xri_count));
        self.ports.insert(port_id, Arc::clone(&port));
        tracing::debug!(port_id, xri_base, xri_count, "port registered");
        Ok(port)
    }

    pub fn get(&self, port_id: u32) -> Option<Arc<Port>> {
        self.ports.get(&port_id).cloned()
    }

    /// Returns false when the port is unknown.
    pub fn mark_dead(&self, port_id: u32) -> bool {
        match self.ports.get(&port_id) {
            Some(port) => {
                port.mark_dead();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Drain every pool and forget every port. Returns the number of free
    /// XRIs drained.
    pub fn teardown(&mut self) -> usize {
        let mut drained = 0;
        for (port_id, port) in self.ports.drain() {
            let n = port.pool().drain();
            tracing::debug!(port_id, drained = n, "port torn down");
            drained += n;
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_lookup() {
        let mut reg = PortRegistry::new();
        let port = reg.create_port(1, 0x100, 16).unwrap();
        assert_eq!(port.exchange_info().available, 16);
        assert!(Arc::ptr_eq(&port, &reg.get(1).unwrap()));
        assert!(reg.get(2).is_none());
        assert!(matches!(
            reg.create_port(1, 0, 4),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_mark_dead() {
        let mut reg = PortRegistry::new();
        let port = reg.create_port(7, 0, 4).unwrap();
        assert!(!port.is_dead());
        assert!(reg.mark_dead(7));
        assert!(port.is_dead());
        assert!(!reg.mark_dead(8));
    }

    #[test]
    fn test_teardown_drains_pools() {
        let mut reg = PortRegistry::new();
        reg.create_port(1, 0, 4).unwrap();
        let port = reg.create_port(2, 100, 8).unwrap();
        let held = port.pool().acquire().unwrap();
        assert_eq!(reg.teardown(), 4 + 7);
        assert!(reg.is_empty());
        port.pool().put(held);
        assert_eq!(port.pool().available(), 1);
    }
}
