//! Transport layer for tracker I/O
//!
//! The session never touches sockets directly. A [`Connector`] opens a fresh
//! [`Transport`] on every (re)connect; the reader thread owns that transport
//! and a cloned handle is kept for writing commands and for shutdown.
//!
//! [`TcpConnector`] reaches a real tracker and [`SimulatedConnector`] stands
//! one in for demos without hardware. [`MockConnector`] is scripted by tests.

use crate::error::Result;

mod line_buffer;
pub mod mock;
mod sim;
mod tcp;

pub use line_buffer::LineBuffer;
pub use mock::{MockConnector, MockTransport};
pub use sim::{SimulatedConnector, SimulatedTransport};
pub use tcp::{TcpConnector, TcpTransport};

/// Byte stream to the tracker
pub trait Transport: Send {
    /// Read available bytes into `buffer`
    ///
    /// `Ok(0)` means the peer closed the stream. A read timeout is reported as
    /// an `Io` error of kind `TimedOut`/`WouldBlock` and is not a disconnect.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write the whole buffer
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Flush pending writes
    fn flush(&mut self) -> Result<()>;

    /// Close both directions; unblocks a pending `read` on any clone
    fn shutdown(&mut self) -> Result<()>;

    /// Second handle to the same stream (used for writing from another thread)
    fn try_clone(&self) -> Result<Box<dyn Transport>>;
}

/// Opens transports to the tracker
pub trait Connector: Send {
    /// Establish a new connection
    fn connect(&mut self) -> Result<Box<dyn Transport>>;

    /// Human-readable endpoint for logs
    fn endpoint(&self) -> String;
}
