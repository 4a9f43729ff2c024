//! Message codec for the tagged-attribute line protocol
//!
//! Encoding and decoding are pure functions over strings; framing (splitting
//! the byte stream at the line delimiter) lives in
//! [`LineBuffer`](crate::transport::LineBuffer).
//!
//! Decoding is lenient about what the tracker sends:
//!
//! - attribute values may be double-quoted, single-quoted or bare
//! - attributes may appear in any order
//! - the closing `/>` (or `>`) is optional
//!
//! A line without a recognizable tag is reported as
//! [`Error::Malformed`]; callers log and discard it.

use crate::error::{Error, Result};

/// Line delimiter required by the tracker (CRLF)
pub const LINE_DELIMITER: &[u8] = b"\r\n";

/// Message category derived from the tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Command acknowledgment (`ACK`)
    Ack,
    /// Command rejection (`NACK`)
    Nack,
    /// Calibration progress/result record (`CAL`)
    Cal,
    /// Data record (`REC`)
    Rec,
    /// Outbound set command (`SET`)
    Set,
    /// Outbound get command (`GET`)
    Get,
    /// Any other tag
    Unknown,
}

/// A single decoded protocol line: tag plus attributes in wire order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    tag: String,
    attributes: Vec<(String, String)>,
}

impl RawMessage {
    /// Create a message with no attributes
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
        }
    }

    /// Builder form of [`RawMessage::set`]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Set an attribute, replacing an existing one of the same name in place
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self
            .attributes
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            slot.1 = value;
        } else {
            self.attributes.push((name, value));
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn kind(&self) -> MessageKind {
        match self.tag.to_ascii_uppercase().as_str() {
            "ACK" => MessageKind::Ack,
            "NACK" => MessageKind::Nack,
            "CAL" => MessageKind::Cal,
            "REC" => MessageKind::Rec,
            "SET" => MessageKind::Set,
            "GET" => MessageKind::Get,
            _ => MessageKind::Unknown,
        }
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// Attribute value by name (names compare case-insensitively)
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The `ID` attribute, trimmed
    pub fn id(&self) -> Option<&str> {
        self.attr("ID").map(str::trim)
    }

    /// Attribute parsed as a float; empty or non-numeric values are `None`
    pub fn attr_f64(&self, name: &str) -> Option<f64> {
        self.attr(name)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }

    /// Attribute parsed as an unsigned integer (accepts "12" and "12.0")
    pub fn attr_u64(&self, name: &str) -> Option<u64> {
        let raw = self.attr(name)?.trim();
        raw.parse::<u64>().ok().or_else(|| {
            raw.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(|v| v as u64)
        })
    }

    /// Validity flag: present and numerically greater than 0.5
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.attr_f64(name).map(|v| v > 0.5)
    }

    /// Encode this message as a delimited line
    pub fn encode(&self) -> Result<String> {
        encode(&self.tag, &self.attributes)
    }
}

/// Encode a tag and attributes as one CRLF-terminated line
///
/// Values are double-quoted unless they contain a double quote, in which case
/// single quotes are used. A value containing both quote kinds (or a line
/// break) cannot be represented and is rejected.
pub fn encode<K: AsRef<str>, V: AsRef<str>>(tag: &str, attributes: &[(K, V)]) -> Result<String> {
    if !is_identifier(tag) {
        return Err(Error::InvalidParameter(format!("invalid tag: {:?}", tag)));
    }

    let mut line = String::with_capacity(16 + attributes.len() * 24);
    line.push('<');
    line.push_str(tag);

    for (name, value) in attributes {
        let name = name.as_ref();
        let value = value.as_ref();
        if !is_identifier(name) {
            return Err(Error::InvalidParameter(format!(
                "invalid attribute name: {:?}",
                name
            )));
        }
        if value.contains(['\r', '\n']) {
            return Err(Error::Unencodable {
                name: name.to_string(),
            });
        }
        let quote = match (value.contains('"'), value.contains('\'')) {
            (false, _) => '"',
            (true, false) => '\'',
            (true, true) => {
                return Err(Error::Unencodable {
                    name: name.to_string(),
                });
            }
        };
        line.push(' ');
        line.push_str(name);
        line.push('=');
        line.push(quote);
        line.push_str(value);
        line.push(quote);
    }

    line.push_str(" />\r\n");
    Ok(line)
}

/// Decode one protocol line (with or without its trailing delimiter)
pub fn decode(line: &str) -> Result<RawMessage> {
    let mut scanner = Scanner::new(line.trim());

    scanner.eat('<');
    scanner.skip_whitespace();
    let tag = scanner.identifier();
    if tag.is_empty() {
        return Err(Error::Malformed(format!("no tag in {:?}", truncate(line))));
    }

    let mut message = RawMessage::new(tag);

    loop {
        scanner.skip_whitespace();
        if scanner.at_end() || scanner.at_close() {
            break;
        }

        let name = scanner.identifier();
        if name.is_empty() {
            return Err(Error::Malformed(format!(
                "unexpected {:?} in {:?}",
                scanner.peek().unwrap_or(' '),
                truncate(line)
            )));
        }

        scanner.skip_whitespace();
        let value = if scanner.eat('=') {
            scanner.skip_whitespace();
            match scanner.peek() {
                Some(q @ ('"' | '\'')) => {
                    scanner.bump();
                    scanner.until_quote(q).ok_or_else(|| {
                        Error::Malformed(format!(
                            "unterminated value for {} in {:?}",
                            name,
                            truncate(line)
                        ))
                    })?
                }
                _ => scanner.bare_value(),
            }
        } else {
            ""
        };

        message.attributes.push((name.to_string(), value.to_string()));
    }

    Ok(message)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn truncate(line: &str) -> &str {
    match line.char_indices().nth(120) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

/// Cursor over a single line
struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn at_close(&self) -> bool {
        let rest = self.rest();
        rest.starts_with("/>") || rest.starts_with('>')
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn identifier(&mut self) -> &'a str {
        let start = self.pos;
        let mut first = true;
        while let Some(c) = self.peek() {
            let ok = if first {
                c.is_ascii_alphabetic() || c == '_'
            } else {
                c.is_ascii_alphanumeric() || c == '_'
            };
            if !ok {
                break;
            }
            first = false;
            self.bump();
        }
        &self.src[start..self.pos]
    }

    /// Consume through the closing quote, returning the quoted content
    fn until_quote(&mut self, quote: char) -> Option<&'a str> {
        let rest = self.rest();
        let end = rest.find(quote)?;
        let value = &rest[..end];
        self.pos += end + quote.len_utf8();
        Some(value)
    }

    /// Unquoted value: runs to whitespace or the closing `/>`/`>`
    fn bare_value(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || self.at_close() {
                break;
            }
            self.bump();
        }
        &self.src[start..self.pos]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_set_command() {
        let line = encode("SET", &[("ID", "ENABLE_SEND_DATA"), ("STATE", "1")]).unwrap();
        assert_eq!(line, "<SET ID=\"ENABLE_SEND_DATA\" STATE=\"1\" />\r\n");
        assert!(line.as_bytes().ends_with(LINE_DELIMITER));
    }

    #[test]
    fn test_encode_without_attributes() {
        let line = RawMessage::new("GET").encode().unwrap();
        assert_eq!(line, "<GET />\r\n");
    }

    #[test]
    fn test_decode_rec_line() {
        let msg = decode("<REC CNT=\"42\" BPOGX=\"0.51\" BPOGY=\"0.25\" BPOGV=\"1\" />").unwrap();
        assert_eq!(msg.tag(), "REC");
        assert_eq!(msg.kind(), MessageKind::Rec);
        assert_eq!(msg.attr_u64("CNT"), Some(42));
        assert_eq!(msg.attr_f64("BPOGX"), Some(0.51));
        assert_eq!(msg.flag("BPOGV"), Some(true));
    }

    #[test]
    fn test_decode_unquoted_and_single_quoted_values() {
        let msg = decode("<ACK ID='CALIBRATE_START' STATE=1 VALUE = 0.5/>").unwrap();
        assert_eq!(msg.kind(), MessageKind::Ack);
        assert_eq!(msg.id(), Some("CALIBRATE_START"));
        assert_eq!(msg.attr("STATE"), Some("1"));
        assert_eq!(msg.attr_f64("VALUE"), Some(0.5));
    }

    #[test]
    fn test_decode_attribute_order_is_irrelevant() {
        let a = decode("<ACK ID=\"X\" STATE=\"1\" />").unwrap();
        let b = decode("<ACK STATE=\"1\" ID=\"X\" />").unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(a.attr("STATE"), b.attr("STATE"));
    }

    #[test]
    fn test_decode_trailing_delimiter_and_case_insensitive_lookup() {
        let msg = decode("<REC fpogx=\"0.3\" />\r\n").unwrap();
        assert_eq!(msg.attr_f64("FPOGX"), Some(0.3));
    }

    #[test]
    fn test_decode_without_brackets() {
        let msg = decode("CAL ID=\"CALIB_START_PT\" PT=\"2\"").unwrap();
        assert_eq!(msg.kind(), MessageKind::Cal);
        assert_eq!(msg.attr_u64("PT"), Some(2));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(decode(""), Err(Error::Malformed(_))));
        assert!(matches!(decode("<>"), Err(Error::Malformed(_))));
        assert!(matches!(decode("<123 A=\"1\" />"), Err(Error::Malformed(_))));
        assert!(matches!(
            decode("<REC A=\"unterminated />"),
            Err(Error::Malformed(_))
        ));
        assert!(matches!(decode("<REC =\"1\" />"), Err(Error::Malformed(_))));
    }

    #[test]
    fn test_roundtrip_preserves_tag_and_attributes() {
        let cases: Vec<(&str, Vec<(&str, &str)>)> = vec![
            ("SET", vec![("ID", "CALIBRATE_ADDPOINT"), ("X", "0.10000"), ("Y", "0.90000")]),
            ("ACK", vec![("ID", "ENABLE_SEND_POG_FIX"), ("STATE", "1")]),
            ("REC", vec![("NOTE", "say \"hi\""), ("EMPTY", "")]),
            ("GET", vec![]),
        ];

        for (tag, attrs) in cases {
            let line = encode(tag, &attrs).unwrap();
            let msg = decode(&line).unwrap();
            assert_eq!(msg.tag(), tag);
            let decoded: Vec<(&str, &str)> = msg
                .attributes()
                .iter()
                .map(|(n, v)| (n.as_str(), v.as_str()))
                .collect();
            assert_eq!(decoded, attrs);
        }
    }

    #[test]
    fn test_encode_rejects_unrepresentable_values() {
        assert!(matches!(
            encode("SET", &[("NOTE", "both \" and '")]),
            Err(Error::Unencodable { .. })
        ));
        assert!(matches!(
            encode("SET", &[("NOTE", "two\r\nlines")]),
            Err(Error::Unencodable { .. })
        ));
        assert!(encode("S ET", &[("ID", "X")]).is_err());
        assert!(encode("SET", &[("BAD NAME", "X")]).is_err());
    }

    #[test]
    fn test_set_replaces_existing_attribute() {
        let msg = RawMessage::new("SET")
            .with("ID", "CALIBRATE_SHOW")
            .with("STATE", "0")
            .with("state", "1");
        assert_eq!(msg.attributes().len(), 2);
        assert_eq!(msg.attr("STATE"), Some("1"));
    }

    #[test]
    fn test_numeric_helpers_reject_garbage() {
        let msg = decode("<REC A=\"\" B=\"abc\" C=\"nan\" D=\"3.0\" />").unwrap();
        assert_eq!(msg.attr_f64("A"), None);
        assert_eq!(msg.attr_f64("B"), None);
        assert_eq!(msg.attr_f64("C"), None);
        assert_eq!(msg.attr_u64("D"), Some(3));
        assert_eq!(msg.flag("MISSING"), None);
    }
}
