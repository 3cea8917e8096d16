//! Tagged log records (spec §3/§6). Encoding follows the teacher's
//! byteorder-tagged-record convention (fixed-width length-prefixed fields,
//! big-endian) adapted to the record shapes this protocol family needs.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crate::error::{CResult, Error};
use crate::key::AbKey;

const LABEL_INSERT: u8 = 1;
const LABEL_UPDATE: u8 = 2;
const LABEL_DELETE: u8 = 3;
const LABEL_COMMIT: u8 = 4;
/// Courier-Save's tombstone discriminant for an uninitialised ring slot,
/// distinguishing "never written" from "written but not committed" when a
/// recovery scan crosses a wrap point.
const LABEL_NONE: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTuple {
    Insert { ts: u64, key: AbKey, data: Vec<u8> },
    Update { ts: u64, key: AbKey, offset: u32, data: Vec<u8> },
    Delete { ts: u64, key: AbKey },
    Commit { ts: u64 },
    /// Courier-Save's uninitialised-slot tombstone. Never written
    /// deliberately by the CC -- produced only when a recovery scan reads
    /// past the last real record of a wrapped ring.
    None,
}

impl LogTuple {
    pub fn ts(&self) -> Option<u64> {
        match self {
            LogTuple::Insert { ts, .. }
            | LogTuple::Update { ts, .. }
            | LogTuple::Delete { ts, .. }
            | LogTuple::Commit { ts } => Some(*ts),
            LogTuple::None => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            LogTuple::Insert { ts, key, data } => {
                buf.write_u8(LABEL_INSERT).unwrap();
                buf.write_u64::<BigEndian>(*ts).unwrap();
                buf.write_u32::<BigEndian>(key.type_tag).unwrap();
                buf.write_u64::<BigEndian>(key.logic_key).unwrap();
                buf.write_u32::<BigEndian>(data.len() as u32).unwrap();
                buf.write_all(data).unwrap();
            }
            LogTuple::Update { ts, key, offset, data } => {
                buf.write_u8(LABEL_UPDATE).unwrap();
                buf.write_u64::<BigEndian>(*ts).unwrap();
                buf.write_u32::<BigEndian>(key.type_tag).unwrap();
                buf.write_u64::<BigEndian>(key.logic_key).unwrap();
                buf.write_u32::<BigEndian>(*offset).unwrap();
                buf.write_u32::<BigEndian>(data.len() as u32).unwrap();
                buf.write_all(data).unwrap();
            }
            LogTuple::Delete { ts, key } => {
                buf.write_u8(LABEL_DELETE).unwrap();
                buf.write_u64::<BigEndian>(*ts).unwrap();
                buf.write_u32::<BigEndian>(key.type_tag).unwrap();
                buf.write_u64::<BigEndian>(key.logic_key).unwrap();
            }
            LogTuple::Commit { ts } => {
                buf.write_u8(LABEL_COMMIT).unwrap();
                buf.write_u64::<BigEndian>(*ts).unwrap();
            }
            LogTuple::None => {
                buf.write_u8(LABEL_NONE).unwrap();
            }
        }
        buf
    }

    /// Decodes one tuple from the front of `bytes`, returning it along with
    /// the number of bytes consumed. A zero (uninitialised) label with no
    /// further bytes decodes as `LogTuple::None` rather than erroring, since
    /// that is the expected shape of an unwritten ring slot.
    pub fn decode(bytes: &[u8]) -> CResult<(LogTuple, usize)> {
        let mut cursor = Cursor::new(bytes);
        let label = cursor.read_u8().map_err(Error::Io)?;
        match label {
            LABEL_NONE => Ok((LogTuple::None, 1)),
            LABEL_INSERT => {
                let ts = cursor.read_u64::<BigEndian>()?;
                let type_tag = cursor.read_u32::<BigEndian>()?;
                let logic_key = cursor.read_u64::<BigEndian>()?;
                let len = cursor.read_u32::<BigEndian>()? as usize;
                let mut data = vec![0u8; len];
                cursor.read_exact(&mut data)?;
                let consumed = cursor.position() as usize;
                Ok((LogTuple::Insert { ts, key: AbKey::new(type_tag, logic_key), data }, consumed))
            }
            LABEL_UPDATE => {
                let ts = cursor.read_u64::<BigEndian>()?;
                let type_tag = cursor.read_u32::<BigEndian>()?;
                let logic_key = cursor.read_u64::<BigEndian>()?;
                let offset = cursor.read_u32::<BigEndian>()?;
                let len = cursor.read_u32::<BigEndian>()? as usize;
                let mut data = vec![0u8; len];
                cursor.read_exact(&mut data)?;
                let consumed = cursor.position() as usize;
                Ok((
                    LogTuple::Update { ts, key: AbKey::new(type_tag, logic_key), offset, data },
                    consumed,
                ))
            }
            LABEL_DELETE => {
                let ts = cursor.read_u64::<BigEndian>()?;
                let type_tag = cursor.read_u32::<BigEndian>()?;
                let logic_key = cursor.read_u64::<BigEndian>()?;
                let consumed = cursor.position() as usize;
                Ok((LogTuple::Delete { ts, key: AbKey::new(type_tag, logic_key) }, consumed))
            }
            LABEL_COMMIT => {
                let ts = cursor.read_u64::<BigEndian>()?;
                let consumed = cursor.position() as usize;
                Ok((LogTuple::Commit { ts }, consumed))
            }
            other => Err(Error::value(format!("unknown log tuple label {other}"))),
        }
    }
}

/// Fixed-capacity chunk in a per-thread pointer-log chain (Romulus, spec
/// §3 LogChunk). Each entry is a header reference whose prior image has
/// already been copied to the backup slot.
pub struct LogChunk {
    entries: Vec<u64>,
    next: Option<Box<LogChunk>>,
}

impl LogChunk {
    pub const CAPACITY: usize = 1024;

    pub fn new() -> Self {
        LogChunk { entries: Vec::with_capacity(Self::CAPACITY), next: None }
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= Self::CAPACITY
    }

    /// Pushes `header_ref`, returning `false` if the chunk is full (the
    /// caller should link a fresh chunk and retry there).
    pub fn push(&mut self, header_ref: u64) -> bool {
        if self.is_full() {
            return false;
        }
        self.entries.push(header_ref);
        true
    }

    pub fn entries(&self) -> &[u64] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.next = None;
    }

    pub fn link(&mut self, next: LogChunk) {
        self.next = Some(Box::new(next));
    }
}

impl Default for LogChunk {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_round_trips_through_encode_decode() {
        let tuple = LogTuple::Insert { ts: 7, key: AbKey::new(1, 2), data: vec![9, 9, 9] };
        let bytes = tuple.encode();
        let (decoded, consumed) = LogTuple::decode(&bytes).unwrap();
        assert_eq!(decoded, tuple);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn update_round_trips_with_offset() {
        let tuple = LogTuple::Update { ts: 3, key: AbKey::new(4, 5), offset: 16, data: vec![1, 2] };
        let bytes = tuple.encode();
        let (decoded, _) = LogTuple::decode(&bytes).unwrap();
        assert_eq!(decoded, tuple);
    }

    #[test]
    fn commit_has_no_payload_beyond_timestamp() {
        let tuple = LogTuple::Commit { ts: 99 };
        let bytes = tuple.encode();
        assert_eq!(bytes.len(), 1 + 8);
        let (decoded, _) = LogTuple::decode(&bytes).unwrap();
        assert_eq!(decoded, tuple);
    }

    #[test]
    fn sequence_of_tuples_decodes_in_order() {
        let tuples = vec![
            LogTuple::Insert { ts: 1, key: AbKey::new(0, 1), data: vec![1] },
            LogTuple::Update { ts: 2, key: AbKey::new(0, 1), offset: 0, data: vec![2] },
            LogTuple::Commit { ts: 2 },
        ];
        let mut buf = Vec::new();
        for t in &tuples {
            buf.extend(t.encode());
        }
        let mut offset = 0;
        let mut decoded = Vec::new();
        while offset < buf.len() {
            let (t, consumed) = LogTuple::decode(&buf[offset..]).unwrap();
            decoded.push(t);
            offset += consumed;
        }
        assert_eq!(decoded, tuples);
    }

    #[test]
    fn log_chunk_reports_full_at_capacity() {
        let mut chunk = LogChunk::new();
        for i in 0..LogChunk::CAPACITY {
            assert!(chunk.push(i as u64));
        }
        assert!(chunk.is_full());
        assert!(!chunk.push(9999));
    }
}
