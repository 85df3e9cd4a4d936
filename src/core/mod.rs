//! Controller side: the wire format and the per-request worker process.

pub mod channel;
pub mod protocol;

pub use channel::IsolationChannel;
