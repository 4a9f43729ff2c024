//! gaze-link - Streaming client and screen calibration for eye trackers
//!
//! Talks to a tracker over a line-delimited tagged-attribute protocol
//! (`<SET ID="..." STATE="1" />` terminated by CRLF).
//!
//! ## Layout
//!
//! - [`protocol`]: message codec and command builders
//! - [`transport`]: byte streams (TCP, in-memory mock) and line framing
//! - [`session`]: connection state, command/ACK matching, counters
//! - [`stream`]: reader thread, bounded sample queue, consumer drain
//! - [`calibration`]: four-point affine calibration and tracker calibration records
//! - [`client`]: [`GazeClient`], the facade a presentation layer drives
//!
//! ## Threads
//!
//! One reader thread per client blocks on socket reads and pushes samples into
//! the queue. The caller's loop drains it once per tick via
//! [`GazeClient::tick`] and never blocks on the network.

pub mod calibration;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod stream;
pub mod transport;

// Re-export commonly used types
pub use calibration::{CalibrationQuality, CalibrationResult, CalibrationStatus};
pub use client::GazeClient;
pub use config::AppConfig;
pub use error::{Error, Result};
pub use session::{ConnectionState, SessionStats};
pub use stream::{GazePoint, GazeSample, GazeSource};
