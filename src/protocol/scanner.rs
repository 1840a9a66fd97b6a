//! Incremental record scanner
//!
//! Extracts `<key|value>` records from a byte stream delivered in chunks of
//! any size:
//!
//! ```text
//!            '<'              '|'               '>'
//! Seeking ────────► Key ────────────► Value ──────────► emit, Seeking
//!    ▲               │ '>' / EOL        │ EOL
//!    │               ▼                  ▼
//!    └──────────── malformed ◄──────────┘
//!
//! '<' inside Key or Value abandons the current record and opens a new one.
//! ```
//!
//! There is no escaping. A value may contain `|`; neither key nor value may
//! contain `<`, `>` or a line break. Only the bytes of the record being
//! assembled are buffered, so noise between records costs nothing.
//! Decoding to text happens once per complete record, which keeps multi-byte
//! UTF-8 characters split across reads intact.

use bytes::BytesMut;

use super::constants::{DEFAULT_MAX_RECORD_LEN, KEY_VALUE_SEPARATOR, RECORD_END, RECORD_START};
use super::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Skipping bytes until a record opens
    Seeking,
    /// Inside the key, before the separator
    Key,
    /// Inside the value, before the closing delimiter
    Value,
}

/// Record scanner state machine
#[derive(Debug)]
pub struct RecordScanner {
    state: ScanState,
    key: BytesMut,
    value: BytesMut,
    max_record_len: usize,
    records: u64,
    malformed: u64,
}

impl RecordScanner {
    /// Create a scanner with the default record length limit
    pub fn new() -> Self {
        Self::with_max_record_len(DEFAULT_MAX_RECORD_LEN)
    }

    /// Create a scanner that drops records longer than `max_record_len` bytes
    pub fn with_max_record_len(max_record_len: usize) -> Self {
        Self {
            state: ScanState::Seeking,
            key: BytesMut::with_capacity(64),
            value: BytesMut::with_capacity(64),
            max_record_len: max_record_len.max(2),
            records: 0,
            malformed: 0,
        }
    }

    /// Feed received bytes, calling `emit` for each complete record in order
    ///
    /// Returns the number of records emitted from this chunk.
    pub fn feed<F>(&mut self, mut data: &[u8], mut emit: F) -> usize
    where
        F: FnMut(Record),
    {
        let mut emitted = 0;

        while !data.is_empty() {
            match self.state {
                ScanState::Seeking => match data.iter().position(|&b| b == RECORD_START) {
                    Some(i) => {
                        data = &data[i + 1..];
                        self.begin();
                    }
                    None => break,
                },
                ScanState::Key => {
                    let stop = data.iter().position(|&b| {
                        matches!(b, KEY_VALUE_SEPARATOR | RECORD_START | RECORD_END)
                            || is_line_break(b)
                    });
                    let end = stop.unwrap_or(data.len());
                    self.key.extend_from_slice(&data[..end]);
                    if self.too_long() {
                        self.reject("record too long");
                        data = &data[end..];
                        continue;
                    }

                    let Some(i) = stop else { break };
                    let delimiter = data[i];
                    data = &data[i + 1..];

                    match delimiter {
                        KEY_VALUE_SEPARATOR => self.state = ScanState::Value,
                        RECORD_START => {
                            self.reject("unexpected '<' in key");
                            self.begin();
                        }
                        RECORD_END => self.reject("missing '|' separator"),
                        _ => self.reject("line break in key"),
                    }
                }
                ScanState::Value => {
                    let stop = data
                        .iter()
                        .position(|&b| matches!(b, RECORD_START | RECORD_END) || is_line_break(b));
                    let end = stop.unwrap_or(data.len());
                    self.value.extend_from_slice(&data[..end]);
                    if self.too_long() {
                        self.reject("record too long");
                        data = &data[end..];
                        continue;
                    }

                    let Some(i) = stop else { break };
                    let delimiter = data[i];
                    data = &data[i + 1..];

                    match delimiter {
                        RECORD_END => {
                            if let Some(record) = self.complete() {
                                emitted += 1;
                                emit(record);
                            }
                        }
                        RECORD_START => {
                            self.reject("unexpected '<' in value");
                            self.begin();
                        }
                        _ => self.reject("line break in value"),
                    }
                }
            }
        }

        emitted
    }

    /// Signal end of stream
    ///
    /// A partially assembled record is dropped and counted as malformed.
    /// Returns true if one was pending.
    pub fn finish(&mut self) -> bool {
        if self.state == ScanState::Seeking {
            return false;
        }
        self.reject("stream closed inside record");
        true
    }

    /// Discard any partial record without counting it
    pub fn reset(&mut self) {
        self.state = ScanState::Seeking;
        self.key.clear();
        self.value.clear();
    }

    /// Check if a record is partially assembled
    pub fn in_record(&self) -> bool {
        self.state != ScanState::Seeking
    }

    /// Number of bytes held for the record being assembled
    pub fn pending_len(&self) -> usize {
        self.key.len() + self.value.len()
    }

    /// Total records emitted
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Total records dropped as malformed
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    fn begin(&mut self) {
        self.key.clear();
        self.value.clear();
        self.state = ScanState::Key;
    }

    fn too_long(&self) -> bool {
        self.pending_len() > self.max_record_len
    }

    fn reject(&mut self, reason: &'static str) {
        self.malformed += 1;
        tracing::debug!(
            reason = reason,
            pending = self.pending_len(),
            "Dropped malformed record"
        );
        self.reset();
    }

    fn complete(&mut self) -> Option<Record> {
        let key = String::from_utf8_lossy(&self.key).trim().to_string();
        if key.is_empty() {
            self.reject("empty key");
            return None;
        }
        if self.value.is_empty() {
            self.reject("empty value");
            return None;
        }

        let value = String::from_utf8_lossy(&self.value).into_owned();
        self.reset();
        self.records += 1;
        Some(Record { key, value })
    }
}

impl Default for RecordScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn is_line_break(b: u8) -> bool {
    b == b'\n' || b == b'\r'
}
