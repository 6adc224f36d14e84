//! Record framing for `data: <JSON>` streams.
//!
//! A record ends at a blank line (`\n\n` or `\r\n\r\n`). Anything after the
//! last delimiter is carried over to the next chunk, so the records produced
//! never depend on where the transport happened to cut the byte stream.

/// Splits `previous + chunk` into complete records and the unterminated tail.
///
/// The tail must be passed back as `previous` on the next call. Records are
/// returned without their delimiter; empty records are skipped.
pub fn split_records(previous: &str, chunk: &str) -> (Vec<String>, String) {
    let mut joined = String::with_capacity(previous.len() + chunk.len());
    joined.push_str(previous);
    joined.push_str(chunk);

    let mut records = Vec::new();
    let mut rest = joined.as_str();
    while let Some((idx, delim_len)) = find_record_delimiter(rest.as_bytes()) {
        if idx > 0 {
            records.push(rest[..idx].to_string());
        }
        rest = &rest[idx + delim_len..];
    }
    (records, rest.to_string())
}

/// Byte-level record buffer fed directly from a response body.
///
/// Buffering bytes rather than text keeps a multi-byte character that is cut
/// between two chunks intact.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    buf: Vec<u8>,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and drains every record it completes.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut records = Vec::new();
        while let Some((idx, delim_len)) = find_record_delimiter(&self.buf) {
            if idx > 0 {
                records.push(String::from_utf8_lossy(&self.buf[..idx]).into_owned());
            }
            self.buf.drain(..idx + delim_len);
        }
        records
    }

    /// Returns the unterminated tail once the transport has closed.
    pub fn finish(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.buf);
        let text = String::from_utf8_lossy(&tail);
        let text = text.trim_matches(|c| c == '\r' || c == '\n');
        if text.trim().is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }

    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

fn find_record_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len()
            && buf[i] == b'\r'
            && buf[i + 1] == b'\n'
            && buf[i + 2] == b'\r'
            && buf[i + 3] == b'\n'
        {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

/// Joins the `data:` lines of a record.
///
/// Returns `None` when the record has no data field at all. `event:`, `id:`,
/// `retry:` and comment lines are ignored.
pub(crate) fn record_data(record: &str) -> Option<String> {
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in record.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if data_lines.is_empty() {
        return None;
    }
    Some(data_lines.join("\n"))
}
