//! Tracker wire protocol
//!
//! Every message is one line of the form
//!
//! ```text
//! <TAG NAME="value" NAME2="value" />\r\n
//! ```
//!
//! Outbound commands use the `SET`/`GET` tags, the tracker answers with
//! `ACK` (or `NACK`) carrying the same `ID`, streams data as `REC` and reports
//! calibration progress as `CAL`.

pub mod codec;
pub mod commands;

pub use codec::{LINE_DELIMITER, MessageKind, RawMessage, decode, encode};
