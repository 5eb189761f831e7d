//! Configuration types for a hardware queue pair.

use sli4::QueueLimits;

use crate::error::{Error, Result};

/// Largest request-tag pool; tags live in a 16-bit WQE field.
pub const MAX_REQTAG_POOL_SIZE: usize = 0xffff;

/// Hardware queue pair configuration.
#[derive(Debug, Clone)]
pub struct HwqpConfig {
    /// Queue pair id, also the low part of connection ids.
    /// Default: 0
    pub hwqp_id: u16,
    /// Number of IO queue pairs on the port.
    /// Default: 1
    pub num_io_queues: u32,
    /// Request tags available for in-flight WQEs.
    /// Default: 8191
    pub reqtag_pool_size: usize,
    /// Every n-th WQE asks for a WQ release completion.
    /// Default: 5
    pub wqec_threshold: u16,
    /// Default: posted 16, processed 64
    pub eq_limits: QueueLimits,
    /// Applied to both completion queues.
    /// Default: posted 16, processed 64
    pub cq_limits: QueueLimits,
    /// XRI used by SEND_FRAME WQEs.
    /// Default: 0
    pub send_frame_xri: u16,
}

impl Default for HwqpConfig {
    fn default() -> Self {
        Self {
            hwqp_id: 0,
            num_io_queues: 1,
            reqtag_pool_size: 8191,
            wqec_threshold: 5,
            eq_limits: QueueLimits::default(),
            cq_limits: QueueLimits::default(),
            send_frame_xri: 0,
        }
    }
}

impl HwqpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hwqp_id(mut self, hwqp_id: u16) -> Self {
        self.hwqp_id = hwqp_id;
        self
    }

    pub fn with_num_io_queues(mut self, num_io_queues: u32) -> Self {
        self.num_io_queues = num_io_queues;
        self
    }

    pub fn with_reqtag_pool_size(mut self, size: usize) -> Self {
        self.reqtag_pool_size = size;
        self
    }

    pub fn with_wqec_threshold(mut self, threshold: u16) -> Self {
        self.wqec_threshold = threshold;
        self
    }

    pub fn with_eq_limits(mut self, limits: QueueLimits) -> Self {
        self.eq_limits = limits;
        self
    }

    pub fn with_cq_limits(mut self, limits: QueueLimits) -> Self {
        self.cq_limits = limits;
        self
    }

    pub fn with_send_frame_xri(mut self, xri: u16) -> Self {
        self.send_frame_xri = xri;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.reqtag_pool_size == 0 || self.reqtag_pool_size > MAX_REQTAG_POOL_SIZE {
            return Err(Error::InvalidArgument("reqtag_pool_size must be in 1..=65535"));
        }
        if self.wqec_threshold == 0 {
            return Err(Error::InvalidArgument("wqec_threshold must be non-zero"));
        }
        if self.num_io_queues == 0 {
            return Err(Error::InvalidArgument("num_io_queues must be non-zero"));
        }
        for limits in [self.eq_limits, self.cq_limits] {
            if limits.posted_limit == 0 || limits.processed_limit == 0 {
                return Err(Error::InvalidArgument("queue limits must be non-zero"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HwqpConfig::default();
        assert_eq!(config.reqtag_pool_size, 8191);
        assert_eq!(config.wqec_threshold, 5);
        assert_eq!(config.eq_limits.posted_limit, 16);
        assert_eq!(config.cq_limits.processed_limit, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(HwqpConfig::new().with_reqtag_pool_size(0).validate().is_err());
        assert!(HwqpConfig::new().with_reqtag_pool_size(0x10000).validate().is_err());
        assert!(HwqpConfig::new().with_reqtag_pool_size(0xffff).validate().is_ok());
        assert!(HwqpConfig::new().with_wqec_threshold(0).validate().is_err());
        let limits = QueueLimits {
            posted_limit: 0,
            processed_limit: 64,
        };
        assert!(HwqpConfig::new().with_eq_limits(limits).validate().is_err());
    }
}
