//! Packet log decoder
//!
//! Parses a decompressed decom packet-log stream into an ordered sequence
//! of decoded records. The framing header is authoritative for entry
//! boundaries; the JSON payload supplies the field map. A single bad
//! payload skips that entry and keeps going; a broken frame (truncation,
//! implausible length) ends the file with the last valid offset reported.
//!
//! The decoder pulls entry-by-entry from any [`Read`], holding one entry
//! in memory at a time, so peak memory is bounded by the largest single
//! entry regardless of file size.
//!
//! File layout (integers big-endian):
//!
//! ```text
//! [8-byte magic "DECOM5L\x01"]
//! repeated entries:
//!   u32  entry length (bytes after this field)
//!   u64  receive timestamp, nanoseconds since epoch
//!   u16  target name length, then target name (UTF-8)
//!   u16  packet name length, then packet name (UTF-8)
//!   ...  JSON payload (see `payload`)
//! ```

mod payload;

pub use payload::parse_fields;

use crate::coerce::FieldValue;
use crate::model::LogCategory;
use std::io::Read;

/// File format marker: identifies a version-1 decom packet log
pub const FILE_MAGIC: [u8; 8] = *b"DECOM5L\x01";

/// Frame length ceiling. A length above this means the framing is lost,
/// not that a real entry is this large.
const MAX_ENTRY_LEN: u32 = 64 * 1024 * 1024;

/// Minimum frame body: timestamp + two name length prefixes
const MIN_ENTRY_LEN: u32 = 8 + 2 + 2;

/// One decoded packet instance
///
/// Created by the decoder; never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    /// Receive timestamp, nanoseconds since Unix epoch
    pub time_nsec: u64,
    pub target: String,
    pub packet: String,
    pub category: LogCategory,
    /// Field name -> typed value
    pub fields: Vec<(String, FieldValue)>,
}

/// Outcome of decoding one entry
#[derive(Debug)]
pub enum Decoded {
    /// A valid record
    Record(DecodedRecord),
    /// This entry was malformed; the frame was consumed and decoding
    /// continues with the next entry
    Skip { reason: String },
    /// The stream is truncated or the framing is lost; decoding stops.
    /// `offset()` reports how far the file was validly consumed.
    Fatal { reason: String },
    /// Clean end of stream
    Eof,
}

/// Streaming decoder over a decompressed packet-log byte stream
pub struct PacketLogDecoder<R: Read> {
    reader: R,
    category: LogCategory,
    /// Byte offset just past the last fully consumed entry
    offset: u64,
    /// Entries skipped for payload-level corruption
    faults: u64,
    /// Reused entry buffer; grows to the largest entry seen
    buf: Vec<u8>,
}

impl<R: Read> PacketLogDecoder<R> {
    /// Open a decoder at the start of a file, validating the magic marker
    pub fn new(mut reader: R, category: LogCategory) -> Result<Self, String> {
        let mut magic = [0u8; 8];
        reader
            .read_exact(&mut magic)
            .map_err(|e| format!("unreadable file header: {}", e))?;
        if magic != FILE_MAGIC {
            return Err(format!("bad file magic: {:02x?}", magic));
        }
        Ok(Self {
            reader,
            category,
            offset: FILE_MAGIC.len() as u64,
            faults: 0,
            buf: Vec::new(),
        })
    }

    /// Resume decoding from a reader already positioned at an entry
    /// boundary (`offset` bytes into the file)
    pub fn resume(reader: R, category: LogCategory, offset: u64) -> Self {
        Self {
            reader,
            category,
            offset,
            faults: 0,
            buf: Vec::new(),
        }
    }

    /// Byte offset just past the last fully consumed entry
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of entries skipped for payload corruption
    pub fn faults(&self) -> u64 {
        self.faults
    }

    /// Decode the next entry
    pub fn next_entry(&mut self) -> Decoded {
        // Frame length prefix. A clean EOF here is the end of the file;
        // a partial read is a truncated entry.
        let mut len_bytes = [0u8; 4];
        match read_exact_or_eof(&mut self.reader, &mut len_bytes) {
            Ok(ReadOutcome::Eof) => return Decoded::Eof,
            Ok(ReadOutcome::Full) => {},
            Ok(ReadOutcome::Partial) => {
                return Decoded::Fatal {
                    reason: "truncated entry length prefix".to_string(),
                }
            },
            Err(e) => {
                return Decoded::Fatal {
                    reason: format!("read error: {}", e),
                }
            },
        }

        let len = u32::from_be_bytes(len_bytes);
        if !(MIN_ENTRY_LEN..=MAX_ENTRY_LEN).contains(&len) {
            return Decoded::Fatal {
                reason: format!("implausible entry length {}", len),
            };
        }

        self.buf.resize(len as usize, 0);
        match read_exact_or_eof(&mut self.reader, &mut self.buf) {
            Ok(ReadOutcome::Full) => {},
            Ok(ReadOutcome::Eof | ReadOutcome::Partial) => {
                return Decoded::Fatal {
                    reason: format!("truncated entry body (wanted {} bytes)", len),
                }
            },
            Err(e) => {
                return Decoded::Fatal {
                    reason: format!("read error: {}", e),
                }
            },
        }

        // Frame fully consumed; from here on problems are entry-local
        self.offset += 4 + len as u64;

        match self.parse_entry() {
            Ok(record) => Decoded::Record(record),
            Err(reason) => {
                self.faults += 1;
                Decoded::Skip { reason }
            },
        }
    }

    /// Parse the buffered entry body into a record
    fn parse_entry(&self) -> Result<DecodedRecord, String> {
        let buf = &self.buf;
        let time_nsec = u64::from_be_bytes(
            buf[0..8]
                .try_into()
                .map_err(|_| "short timestamp".to_string())?,
        );

        let mut pos = 8usize;
        let target = read_name(buf, &mut pos).ok_or("bad target name field")?;
        let packet = read_name(buf, &mut pos).ok_or("bad packet name field")?;

        let fields = parse_fields(&buf[pos..])?;

        Ok(DecodedRecord {
            time_nsec,
            target,
            packet,
            category: self.category,
            fields,
        })
    }
}

/// Read a u16-length-prefixed UTF-8 name at `pos`, advancing it
fn read_name(buf: &[u8], pos: &mut usize) -> Option<String> {
    if buf.len() < *pos + 2 {
        return None;
    }
    let len = u16::from_be_bytes([buf[*pos], buf[*pos + 1]]) as usize;
    *pos += 2;
    if buf.len() < *pos + len {
        return None;
    }
    let name = std::str::from_utf8(&buf[*pos..*pos + len]).ok()?.to_string();
    *pos += len;
    if name.is_empty() {
        return None;
    }
    Some(name)
}

enum ReadOutcome {
    Full,
    /// Zero bytes available (clean end of stream)
    Eof,
    /// Some but not all bytes available
    Partial,
}

/// Fill `buf` from the reader, distinguishing a clean EOF from a
/// mid-buffer truncation
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<ReadOutcome> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Partial
                })
            },
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(ReadOutcome::Full)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::FILE_MAGIC;

    /// Build one framed entry
    pub fn entry(time_nsec: u64, target: &str, packet: &str, json: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&time_nsec.to_be_bytes());
        body.extend_from_slice(&(target.len() as u16).to_be_bytes());
        body.extend_from_slice(target.as_bytes());
        body.extend_from_slice(&(packet.len() as u16).to_be_bytes());
        body.extend_from_slice(packet.as_bytes());
        body.extend_from_slice(json.as_bytes());

        let mut framed = Vec::new();
        framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
        framed.extend_from_slice(&body);
        framed
    }

    /// Build a whole log file from entries
    pub fn log_file(entries: &[Vec<u8>]) -> Vec<u8> {
        let mut out = FILE_MAGIC.to_vec();
        for e in entries {
            out.extend_from_slice(e);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{entry, log_file};
    use super::*;
    use crate::coerce::{FieldValue, IntWidth};

    fn decode_all(data: &[u8]) -> (Vec<DecodedRecord>, u64, Option<String>) {
        let mut dec =
            PacketLogDecoder::new(std::io::Cursor::new(data), LogCategory::Telemetry).unwrap();
        let mut records = Vec::new();
        let mut fatal = None;
        loop {
            match dec.next_entry() {
                Decoded::Record(r) => records.push(r),
                Decoded::Skip { .. } => {},
                Decoded::Fatal { reason } => {
                    fatal = Some(reason);
                    break;
                },
                Decoded::Eof => break,
            }
        }
        (records, dec.faults(), fatal)
    }

    #[test]
    fn test_decodes_entries_in_order() {
        let data = log_file(&[
            entry(100, "INST", "HEALTH", r#"{"TEMP":{"$t":"FLOAT","$w":32,"$v":1.5}}"#),
            entry(200, "INST", "HEALTH", r#"{"TEMP":{"$t":"FLOAT","$w":32,"$v":2.5}}"#),
            entry(300, "INST", "HEALTH", r#"{"COUNT":{"$t":"UINT","$w":16,"$v":7}}"#),
        ]);

        let (records, faults, fatal) = decode_all(&data);
        assert_eq!(faults, 0);
        assert!(fatal.is_none());
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].time_nsec, 100);
        assert_eq!(records[2].target, "INST");
        assert_eq!(
            records[2].fields[0],
            (
                "COUNT".to_string(),
                FieldValue::Uint {
                    width: IntWidth::W16,
                    value: 7
                }
            )
        );
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut data = log_file(&[]);
        data[0] = b'X';
        assert!(
            PacketLogDecoder::new(std::io::Cursor::new(data), LogCategory::Telemetry).is_err()
        );
    }

    #[test]
    fn test_corrupt_middle_entry_is_skipped() {
        let data = log_file(&[
            entry(100, "INST", "HEALTH", r#"{"A":{"$t":"INT","$w":8,"$v":1}}"#),
            entry(200, "INST", "HEALTH", r#"{"A": not valid json"#),
            entry(300, "INST", "HEALTH", r#"{"A":{"$t":"INT","$w":8,"$v":3}}"#),
        ]);

        let (records, faults, fatal) = decode_all(&data);
        assert!(fatal.is_none());
        assert_eq!(faults, 1);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].time_nsec, 100);
        assert_eq!(records[1].time_nsec, 300);
    }

    #[test]
    fn test_truncated_final_entry_reports_last_valid_offset() {
        let good = entry(100, "INST", "HEALTH", r#"{"A":true}"#);
        let good_len = good.len() as u64;
        let mut data = log_file(&[good, entry(200, "INST", "HEALTH", r#"{"B":false}"#)]);
        // Chop the last entry mid-body
        data.truncate(data.len() - 5);

        let mut dec = PacketLogDecoder::new(
            std::io::Cursor::new(&data),
            LogCategory::Telemetry,
        )
        .unwrap();

        assert!(matches!(dec.next_entry(), Decoded::Record(_)));
        assert!(matches!(dec.next_entry(), Decoded::Fatal { .. }));
        assert_eq!(dec.offset(), FILE_MAGIC.len() as u64 + good_len);
    }

    #[test]
    fn test_implausible_length_is_fatal() {
        let mut data = log_file(&[]);
        data.extend_from_slice(&u32::MAX.to_be_bytes());
        data.extend_from_slice(&[0u8; 32]);

        let mut dec = PacketLogDecoder::new(
            std::io::Cursor::new(&data),
            LogCategory::Telemetry,
        )
        .unwrap();
        assert!(matches!(dec.next_entry(), Decoded::Fatal { .. }));
    }

    #[test]
    fn test_resume_from_offset_skips_no_validation() {
        let first = entry(100, "INST", "HEALTH", r#"{"A":true}"#);
        let second = entry(200, "INST", "HEALTH", r#"{"B":false}"#);
        let resume_at = FILE_MAGIC.len() as u64 + first.len() as u64;

        let data = log_file(&[first, second]);
        let mut dec = PacketLogDecoder::resume(
            std::io::Cursor::new(&data[resume_at as usize..]),
            LogCategory::Telemetry,
            resume_at,
        );

        match dec.next_entry() {
            Decoded::Record(r) => assert_eq!(r.time_nsec, 200),
            other => panic!("expected record, got {:?}", other),
        }
        assert!(matches!(dec.next_entry(), Decoded::Eof));
        assert_eq!(dec.offset(), data.len() as u64);
    }
}
