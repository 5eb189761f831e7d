//! Connection placement.
//!
//! Each NVMe-oF connection is pinned to one queue pair and reserves as many
//! RQ buffers as its submission queue has entries. The connection id encodes
//! the queue pair in its low part so the owning queue pair can be found from
//! the id alone.

use crate::hwqp::HwQueuePair;

impl HwQueuePair {
    /// Reserve `sq_size` RQ buffers for a new connection.
    ///
    /// Returns the connection id, or `None` if the queue pair does not have
    /// enough free RQ buffers left.
    pub fn assign_connection(&mut self, sq_size: u32) -> Option<u64> {
        if self.free_rq_slots < sq_size {
            tracing::debug!(
                hwqp_id = self.config.hwqp_id,
                sq_size,
                free = self.free_rq_slots,
                "not enough RQ buffers for connection"
            );
            return None;
        }
        self.free_rq_slots -= sq_size;
        self.num_conns += 1;
        self.cid_cnt = self.cid_cnt.wrapping_add(1);
        let conn_id =
            self.config.num_io_queues as u64 * self.cid_cnt as u64 + self.config.hwqp_id as u64;
        tracing::debug!(
            hwqp_id = self.config.hwqp_id,
            conn_id,
            num_conns = self.num_conns,
            free = self.free_rq_slots,
            "connection assigned"
        );
        Some(conn_id)
    }

    /// Give back the RQ buffers reserved by [`assign_connection`](Self::assign_connection).
    pub fn release_connection(&mut self, sq_size: u32) {
        self.num_conns = self.num_conns.saturating_sub(1);
        self.free_rq_slots = self.free_rq_slots.saturating_add(sq_size);
    }

    #[inline]
    pub fn num_connections(&self) -> u32 {
        self.num_conns
    }

    /// RQ buffers not reserved by any connection.
    #[inline]
    pub fn free_rq_slots(&self) -> u32 {
        self.free_rq_slots
    }
}

/// Index of the queue pair that owns `conn_id` among `num_queues` IO queue
/// pairs.
#[inline]
pub fn hwqp_index_for_connection(conn_id: u64, num_queues: u32) -> usize {
    (conn_id % num_queues.max(1) as u64) as usize
}
