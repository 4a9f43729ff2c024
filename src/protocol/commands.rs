//! Outbound command builders
//!
//! Boolean parameters use `STATE="0|1"`, numeric parameters use `VALUE`.
//! The tracker acknowledges each command with an `ACK` carrying the same `ID`,
//! so the ack id of a command is simply its `ID` attribute.

use super::codec::RawMessage;

/// Master switch for the data record stream
pub const ENABLE_SEND_DATA: &str = "ENABLE_SEND_DATA";

/// Enable-field commands sent after [`ENABLE_SEND_DATA`] on every connect
///
/// | Command | Record fields |
/// |---------|---------------|
/// | `ENABLE_SEND_COUNTER` | `CNT` |
/// | `ENABLE_SEND_TIME` | `TIME` |
/// | `ENABLE_SEND_POG_BEST` | `BPOGX`, `BPOGY`, `BPOGV` |
/// | `ENABLE_SEND_POG_LEFT` | `LPOGX`, `LPOGY`, `LPOGV` |
/// | `ENABLE_SEND_POG_RIGHT` | `RPOGX`, `RPOGY`, `RPOGV` |
/// | `ENABLE_SEND_POG_FIX` | `FPOGX`, `FPOGY`, `FPOGV` |
/// | `ENABLE_SEND_PUPIL_LEFT` | `LPD`, `LPV` |
/// | `ENABLE_SEND_PUPIL_RIGHT` | `RPD`, `RPV` |
/// | `ENABLE_SEND_EYE_LEFT` | `LEYEZ`, `LPUPILD`, `LPUPILV` |
/// | `ENABLE_SEND_EYE_RIGHT` | `REYEZ`, `RPUPILD`, `RPUPILV` |
pub const DEFAULT_ENABLED_FIELDS: [&str; 10] = [
    "ENABLE_SEND_COUNTER",
    "ENABLE_SEND_TIME",
    "ENABLE_SEND_POG_BEST",
    "ENABLE_SEND_POG_LEFT",
    "ENABLE_SEND_POG_RIGHT",
    "ENABLE_SEND_POG_FIX",
    "ENABLE_SEND_PUPIL_LEFT",
    "ENABLE_SEND_PUPIL_RIGHT",
    "ENABLE_SEND_EYE_LEFT",
    "ENABLE_SEND_EYE_RIGHT",
];

pub const CALIBRATE_SHOW: &str = "CALIBRATE_SHOW";
pub const CALIBRATE_CLEAR: &str = "CALIBRATE_CLEAR";
pub const CALIBRATE_RESET: &str = "CALIBRATE_RESET";
pub const CALIBRATE_START: &str = "CALIBRATE_START";
pub const CALIBRATE_ADDPOINT: &str = "CALIBRATE_ADDPOINT";
pub const CALIBRATE_DELAY: &str = "CALIBRATE_DELAY";
pub const CALIBRATE_TIMEOUT: &str = "CALIBRATE_TIMEOUT";
pub const CALIBRATE_RESULT_SUMMARY: &str = "CALIBRATE_RESULT_SUMMARY";

/// `<SET ID="id" STATE="0|1" />`
pub fn set_state(id: &str, on: bool) -> RawMessage {
    RawMessage::new("SET")
        .with("ID", id)
        .with("STATE", if on { "1" } else { "0" })
}

/// `<SET ID="id" VALUE="v" />`
pub fn set_value(id: &str, value: f64) -> RawMessage {
    RawMessage::new("SET")
        .with("ID", id)
        .with("VALUE", format!("{}", value))
}

/// `<SET ID="id" />`
pub fn set(id: &str) -> RawMessage {
    RawMessage::new("SET").with("ID", id)
}

/// `<GET ID="id" />`
pub fn get(id: &str) -> RawMessage {
    RawMessage::new("GET").with("ID", id)
}

pub fn enable_send_data() -> RawMessage {
    set_state(ENABLE_SEND_DATA, true)
}

pub fn enable_field(field: &str) -> RawMessage {
    set_state(field, true)
}

/// Show or hide the tracker's calibration window
pub fn calibrate_show(show: bool) -> RawMessage {
    set_state(CALIBRATE_SHOW, show)
}

/// Clear the tracker's internal calibration point list
pub fn calibrate_clear() -> RawMessage {
    set(CALIBRATE_CLEAR)
}

/// Reset the tracker's calibration point list to its defaults
pub fn calibrate_reset() -> RawMessage {
    set(CALIBRATE_RESET)
}

/// Start (`true`) or stop (`false`) the tracker's calibration sequence
pub fn calibrate_start(start: bool) -> RawMessage {
    set_state(CALIBRATE_START, start)
}

/// Append a point in normalized screen coordinates `[0, 1]`
pub fn calibrate_add_point(x: f64, y: f64) -> RawMessage {
    set(CALIBRATE_ADDPOINT)
        .with("X", format!("{:.5}", x))
        .with("Y", format!("{:.5}", y))
}

/// Animation time before each point is sampled, in seconds
pub fn calibrate_delay(seconds: f64) -> RawMessage {
    set_value(CALIBRATE_DELAY, seconds)
}

/// Sampling duration per point, in seconds
pub fn calibrate_timeout(seconds: f64) -> RawMessage {
    set_value(CALIBRATE_TIMEOUT, seconds)
}

/// Request the tracker's calibration summary (answered by an ACK with `AVE_ERROR`)
pub fn calibrate_result_summary() -> RawMessage {
    get(CALIBRATE_RESULT_SUMMARY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_field_line() {
        let line = enable_field("ENABLE_SEND_POG_BEST").encode().unwrap();
        assert_eq!(line, "<SET ID=\"ENABLE_SEND_POG_BEST\" STATE=\"1\" />\r\n");
    }

    #[test]
    fn test_add_point_formats_five_decimals() {
        let msg = calibrate_add_point(0.1, 0.9);
        assert_eq!(msg.id(), Some(CALIBRATE_ADDPOINT));
        assert_eq!(msg.attr("X"), Some("0.10000"));
        assert_eq!(msg.attr("Y"), Some("0.90000"));
    }

    #[test]
    fn test_value_commands() {
        assert_eq!(calibrate_delay(0.2).attr("VALUE"), Some("0.2"));
        assert_eq!(calibrate_timeout(1.0).attr("VALUE"), Some("1"));
    }

    #[test]
    fn test_summary_is_get() {
        let msg = calibrate_result_summary();
        assert_eq!(msg.tag(), "GET");
        assert_eq!(msg.id(), Some(CALIBRATE_RESULT_SUMMARY));
    }

    #[test]
    fn test_stop_uses_state_zero() {
        assert_eq!(calibrate_start(false).attr("STATE"), Some("0"));
        assert_eq!(calibrate_show(true).attr("STATE"), Some("1"));
    }
}
