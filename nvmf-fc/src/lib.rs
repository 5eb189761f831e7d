//! # nvmf-fc - Fibre Channel NVMe-oF target queue-pair engine
//!
//! Software half of an SLI-4 hardware queue pair serving an NVMe-over-FC
//! target. One [`HwQueuePair`] per polling thread owns its rings from the
//! [`sli4`] crate and drives everything that happens on them:
//!
//! - posting data, response, LS, BLS and generic-request WQEs, each bound to
//!   a request tag and a completion [`Callback`]
//! - the event/completion dispatch loop ([`HwQueuePair::poll`])
//! - received-frame delivery to a [`RequestLayer`] and RQ buffer recycling
//! - exchange teardown, including aborts and XRI-aborted confirmations
//! - connection placement across queue pairs
//!
//! ## Ownership
//!
//! Exchanges (XRIs) are shared across a port's queue pairs through a
//! lock-free [`ExchangePool`] hanging off an `Arc<Port>`. An [`Exchange`] is
//! an owned handle: holding it means the exchange is checked out, and the
//! operations that post a WQE for it take it by value so that it ends up in
//! the completion callback, back in the pool, or parked until the adapter
//! confirms an abort.
//!
//! ```ignore
//! let mut hwqp = HwQueuePair::new(config, queues, port, translator)?;
//! hwqp.init_buffers()?;
//! hwqp.set_online(true);
//! loop {
//!     hwqp.poll(&mut request_layer);
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`error`]: error types and completion status
//! - [`config`]: queue-pair configuration
//! - [`reqtag`]: request-tag pool and WQEC pacing
//! - [`xchg`]: exchanges and the per-port exchange pool
//! - [`port`]: ports and the port registry
//! - [`hwqp`]: the queue pair and WQE posting
//! - [`poll`]: the dispatch loop
//! - [`ops`]: target operations built on WQEs
//! - [`cleanup`]: exchange teardown and aborts
//! - [`conn`]: connection placement
//! - [`dump`]: ring state dumps

pub mod cleanup;
pub mod config;
pub mod conn;
pub mod dump;
pub mod error;
pub mod hwqp;
pub mod ops;
pub mod poll;
pub mod port;
pub mod reqtag;
pub mod xchg;

pub use config::HwqpConfig;
pub use conn::hwqp_index_for_connection;
pub use dump::dump_all;
pub use error::{CompletionStatus, Error, ProtocolError, Resource, Result};
pub use hwqp::{
    Callback, Counters, DoneCallback, FrameDisposition, HwQueuePair, ReceivedFrame, RequestLayer,
};
pub use ops::{
    DataDirection, IoRequest, IoVec, LsResponse, ReplyFrame, SrsrBuffers, SrsrCallback,
};
pub use port::{Port, PortRegistry};
pub use reqtag::{ReqTagPool, WqecCounter};
pub use xchg::{Exchange, ExchangeInfo, ExchangePool};
