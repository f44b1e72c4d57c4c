//! Chat channel bridging
//!
//! The bridge is fully decoupled from the worker: inbound room events become
//! envelopes on the work queue, outbound replies arrive on a dedicated
//! delivery queue.

mod matrix;

pub use matrix::MatrixBridge;

/// A reply addressed to a chat room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    /// Destination room
    pub room_id: String,
    /// Reply text (may contain markdown)
    pub text: String,
}
