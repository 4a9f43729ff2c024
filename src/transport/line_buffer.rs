//! Line framing buffer
//!
//! Bytes from each read are appended; complete lines are cut at the first
//! CRLF and the remainder is kept for the next read. Consuming a line only
//! advances a start offset; the storage is compacted once the consumed prefix
//! dominates, so draining many small lines stays cheap.

use crate::protocol::LINE_DELIMITER;

/// Default upper bound on buffered bytes without a delimiter
pub const DEFAULT_MAX_PENDING: usize = 64 * 1024;

/// Growing byte buffer that yields CRLF-terminated lines
#[derive(Debug)]
pub struct LineBuffer {
    data: Vec<u8>,
    start: usize,
    max_pending: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_PENDING)
    }

    /// Buffer that discards its contents once `max_pending` bytes accumulate
    /// without a delimiter
    pub fn with_limit(max_pending: usize) -> Self {
        Self {
            data: Vec::with_capacity(4096),
            start: 0,
            max_pending,
        }
    }

    /// Append bytes from one read
    ///
    /// Returns `false` if the pending data overflowed the limit and was
    /// discarded.
    pub fn extend(&mut self, bytes: &[u8]) -> bool {
        self.data.extend_from_slice(bytes);
        if self.len() > self.max_pending && self.find_delimiter().is_none() {
            self.clear();
            return false;
        }
        true
    }

    /// Cut the next complete line (delimiter stripped)
    ///
    /// Empty lines are skipped. Invalid UTF-8 is replaced, not rejected.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let offset = self.find_delimiter()?;
            let line_start = self.start;
            let line_end = self.start + offset;
            self.start = line_end + LINE_DELIMITER.len();

            let line = String::from_utf8_lossy(&self.data[line_start..line_end]).into_owned();
            self.compact();

            if !line.trim().is_empty() {
                return Some(line);
            }
        }
    }

    /// Bytes buffered but not yet consumed
    pub fn len(&self) -> usize {
        self.data.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything, including a partial trailing line
    pub fn clear(&mut self) {
        self.data.clear();
        self.start = 0;
    }

    /// Offset of the first delimiter from the read position
    fn find_delimiter(&self) -> Option<usize> {
        self.data[self.start..]
            .windows(LINE_DELIMITER.len())
            .position(|w| w == LINE_DELIMITER)
    }

    fn compact(&mut self) {
        if self.start == self.data.len() {
            self.clear();
        } else if self.start > 4096 && self.start * 2 > self.data.len() {
            self.data.drain(..self.start);
            self.start = 0;
        }
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        let mut buf = LineBuffer::new();
        buf.extend(b"<ACK ID=\"A\" />\r\n");
        assert_eq!(buf.next_line().as_deref(), Some("<ACK ID=\"A\" />"));
        assert_eq!(buf.next_line(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_read_is_kept() {
        let mut buf = LineBuffer::new();
        buf.extend(b"<REC CNT=\"1\"");
        assert_eq!(buf.next_line(), None);
        assert_eq!(buf.len(), 12);

        buf.extend(b" />\r\n<REC CNT=");
        assert_eq!(buf.next_line().as_deref(), Some("<REC CNT=\"1\" />"));
        assert_eq!(buf.next_line(), None);
        assert_eq!(buf.len(), 9);
    }

    #[test]
    fn test_multiple_lines_in_one_read() {
        let mut buf = LineBuffer::new();
        buf.extend(b"<A />\r\n<B />\r\n\r\n<C />\r\n");
        assert_eq!(buf.next_line().as_deref(), Some("<A />"));
        assert_eq!(buf.next_line().as_deref(), Some("<B />"));
        assert_eq!(buf.next_line().as_deref(), Some("<C />"));
        assert_eq!(buf.next_line(), None);
    }

    #[test]
    fn test_delimiter_split_across_reads() {
        let mut buf = LineBuffer::new();
        buf.extend(b"<A />\r");
        assert_eq!(buf.next_line(), None);
        buf.extend(b"\n");
        assert_eq!(buf.next_line().as_deref(), Some("<A />"));
    }

    #[test]
    fn test_bare_lf_is_not_a_delimiter() {
        let mut buf = LineBuffer::new();
        buf.extend(b"<A />\n<B />\r\n");
        assert_eq!(buf.next_line().as_deref(), Some("<A />\n<B />"));
    }

    #[test]
    fn test_clear_drops_partial_line() {
        let mut buf = LineBuffer::new();
        buf.extend(b"<REC BPOGX=\"0.");
        buf.clear();
        buf.extend(b"<REC CNT=\"7\" />\r\n");
        assert_eq!(buf.next_line().as_deref(), Some("<REC CNT=\"7\" />"));
    }

    #[test]
    fn test_overflow_without_delimiter_discards() {
        let mut buf = LineBuffer::with_limit(16);
        assert!(buf.extend(b"0123456789"));
        assert!(!buf.extend(b"0123456789"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_many_lines_compact() {
        let mut buf = LineBuffer::new();
        let mut produced = 0;
        for i in 0..2000 {
            buf.extend(format!("<REC CNT=\"{}\" />\r\n", i).as_bytes());
            if i % 3 == 0 {
                while buf.next_line().is_some() {
                    produced += 1;
                }
            }
        }
        while buf.next_line().is_some() {
            produced += 1;
        }
        assert_eq!(produced, 2000);
        assert!(buf.is_empty());
    }
}
