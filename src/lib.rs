//! Receive-side 802.11 Block-Ack frame reordering.
//!
//! Block-Ack sessions let frames arrive out of transmission order (due to
//! retransmission and aggregation) while the upper layer still requires
//! strictly increasing sequence order. This crate holds out-of-order
//! frames in a bounded per-session window, releases them in order, and
//! forces forward progress past permanently lost frames with an aging
//! timeout, with one independent window per `(peer, TID)` pair.
//!
//! Session negotiation, frame decoding, and the network stack itself live
//! outside this crate: callers feed in start/stop/advance events and
//! decoded frames with extracted sequence numbers, and receive in-order
//! frames through a [`FrameSink`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ba_reorder::{EngineConfig, FrameSink, MacAddr, OwnedFrame, ReorderEngine, SessionKey};
//!
//! struct StackSink;
//!
//! impl FrameSink for StackSink {
//!     fn deliver(&self, frame: OwnedFrame) {
//!         println!("in-order frame: {} bytes", frame.len());
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = ReorderEngine::new(EngineConfig::default(), Arc::new(StackSink))?;
//!     let key = SessionKey::new(MacAddr::new([0x02, 0, 0, 0, 0, 0x01]), 0);
//!
//!     // ADDBA established a 64-frame window starting at sn 0.
//!     engine.start_session(key, 64, 0).await?;
//!
//!     // sn 1 arrives first and is held; sn 0 releases both in order.
//!     engine.frame_in(key, 1, OwnedFrame::new(vec![0xAA])).await?;
//!     engine.frame_in(key, 0, OwnedFrame::new(vec![0xBB])).await?;
//!
//!     engine.stop_session(key, false).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod frame;
pub mod pool;
pub mod seq;
pub mod session;
mod timer;

// Re-export commonly used items
pub use config::EngineConfig;
pub use engine::{FrameSink, ReorderEngine};
pub use frame::{MacAddr, OwnedFrame, SessionKey, Tid};
pub use pool::{SessionHandle, SessionPool};
pub use seq::{SequenceNum, MAX_REORDER_WINDOW, SEQ_MODULUS, WINDOW_BOUNDARY};
pub use session::{EngineError, ReorderSession, SessionStats};
