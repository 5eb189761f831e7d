//! # sli4 - Queue primitives for Broadcom SLI-4 Fibre Channel adapters
//!
//! This crate covers the hardware-facing half of an SLI-4 queue pair: the
//! fixed binary layouts the adapter reads and writes, the ring queues that
//! hold them, and the doorbells that hand entries over.
//!
//! ## Queue Topology
//!
//! A hardware queue pair is six rings:
//!
//! - **Event Queue (EQ)**: 4-byte EQEs naming the completion queue with work
//! - **WQ Completion Queue**: 16-byte CQEs for posted work
//! - **RQ Completion Queue**: 16-byte CQEs for received frames and markers
//! - **Work Queue (WQ)**: 64 or 128-byte WQEs posted by software
//! - **Header / Payload RQ**: buffer addresses for received frames, posted in
//!   lockstep as an [`RqPair`]
//!
//! Software produces into WQ and RQ rings and consumes EQ and CQ rings. Every
//! hand-over goes through a [`Doorbell`] write preceded by a write barrier.
//!
//! ## Layouts
//!
//! All entries are little-endian words with fields packed LSB-first. Layouts
//! are tables of [`bits::BitRange`] constants applied through
//! [`bits::Dwords`], so nothing depends on host bitfield order:
//!
//! ```ignore
//! let wqe = Abort { xri: 0x0abc, send_abts: true }.encode();
//! queue.enqueue_with(|slot| wqe.write_to(slot))?;
//! queue.notify(false, 1);
//!
//! match queue.dequeue_cqe()?.decode()? {
//!     CqeKind::WorkCompletion(wc) => { /* wc.request_tag */ }
//!     _ => {}
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`bits`]: packed bit-range codec
//! - [`types`]: queue kinds, event codes, status values, command codes
//! - [`wqe`]: WQE encoders, BDEs and SGEs
//! - [`cqe`]: EQE and CQE decoders
//! - [`frame`]: FC frame header codec
//! - [`dma`]: DMA regions and address translation
//! - [`doorbell`]: doorbell encoding and register writes
//! - [`queue`]: ring queues
//! - [`rq`]: the RQ header/payload pair

#![allow(unsafe_op_in_unsafe_fn)]

#[macro_use]
mod barrier;

pub mod bits;
pub mod cqe;
pub mod dma;
pub mod doorbell;
pub mod frame;
pub mod queue;
pub mod rq;
pub mod types;
pub mod wqe;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cqe::{Cqe, CqeBuilder, CqeKind, DecodeError, EqEvent, Eqe, WorkCompletion};
pub use dma::{AddressTranslator, DmaRegion, IdentityTranslator};
pub use doorbell::Doorbell;
pub use frame::FcFrameHeader;
pub use queue::{QueueError, QueueLimits, QueueSet, SliQueue};
pub use rq::{RqError, RqPair};
pub use types::{QueueKind, WqeSize};
pub use wqe::{Bde, EncodeError, Sge, Wqe};
