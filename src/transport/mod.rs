//! Output transports.
//!
//! A transport delivers one pre-formatted record at a time. The writer
//! implementations here cover development and file-based deployments;
//! anything with the same two-method shape (a message bus producer, a
//! HTTP forwarder) slots into the pipeline unchanged.

mod file;
mod rotate;

pub use file::{SplitWriterTransport, WriterTransport};
pub use rotate::{RotateConfig, RotatingFile};

use crate::error::Result;

/// Pipeline contract for all transports. `send` delivers one formatted
/// record; `close` flushes and releases resources.
pub trait Transport: Send + Sync {
    fn send(&self, data: &[u8]) -> Result<()>;
    fn close(&self) -> Result<()>;
}
