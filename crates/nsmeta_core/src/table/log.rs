//! Append-only table log.
//!
//! Every frame is wrapped in the same envelope:
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload | crc32 (4) |
//! ```
//!
//! All integers are little-endian and the checksum covers everything
//! before it.

use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use nsmeta_storage::StorageBackend;
use tracing::{debug, warn};

/// Magic bytes identifying a table log frame.
pub const LOG_MAGIC: [u8; 4] = *b"NSTB";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

const HEADER_SIZE: usize = 11;
const CRC_SIZE: usize = 4;

/// A buffered write: the row key and its new value, or `None` to delete.
pub type RowWrite = (Vec<u8>, Option<Vec<u8>>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum FrameType {
    Commit = 1,
    Rollback = 2,
}

impl FrameType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Commit),
            2 => Some(Self::Rollback),
            _ => None,
        }
    }
}

/// One entry of a table log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Writes installed by a transaction.
    Commit {
        /// Writing transaction.
        txid: TransactionId,
        /// Rows written, in key order.
        writes: Vec<RowWrite>,
    },
    /// Cancels the latest commit frame of `txid`.
    Rollback {
        /// Transaction whose commit frame is cancelled.
        txid: TransactionId,
    },
}

impl Frame {
    fn frame_type(&self) -> FrameType {
        match self {
            Self::Commit { .. } => FrameType::Commit,
            Self::Rollback { .. } => FrameType::Rollback,
        }
    }

    fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Commit { txid, writes } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                put_len(&mut buf, writes.len())?;
                for (key, value) in writes {
                    put_len(&mut buf, key.len())?;
                    buf.extend_from_slice(key);
                    match value {
                        Some(value) => {
                            buf.push(1);
                            put_len(&mut buf, value.len())?;
                            buf.extend_from_slice(value);
                        }
                        None => buf.push(0),
                    }
                }
            }
            Self::Rollback { txid } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
            }
        }
        Ok(buf)
    }

    fn decode_payload(frame_type: FrameType, payload: &[u8]) -> CoreResult<Self> {
        let mut reader = PayloadReader { payload, pos: 0 };
        let txid = TransactionId::new(reader.u64()?);
        let frame = match frame_type {
            FrameType::Commit => {
                let count = reader.u32()? as usize;
                let mut writes = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let key_len = reader.u32()? as usize;
                    let key = reader.bytes(key_len)?.to_vec();
                    let value = match reader.u8()? {
                        0 => None,
                        1 => {
                            let len = reader.u32()? as usize;
                            Some(reader.bytes(len)?.to_vec())
                        }
                        flag => {
                            return Err(CoreError::log_corruption(format!(
                                "invalid value flag {flag}"
                            )))
                        }
                    };
                    writes.push((key, value));
                }
                Self::Commit { txid, writes }
            }
            FrameType::Rollback => Self::Rollback { txid },
        };
        if reader.pos != payload.len() {
            return Err(CoreError::log_corruption(format!(
                "trailing bytes in frame payload: expected {} bytes, got {}",
                reader.pos,
                payload.len()
            )));
        }
        Ok(frame)
    }

    /// Encodes the frame with its envelope.
    ///
    /// # Errors
    ///
    /// Fails if a key, value or the payload exceeds `u32::MAX` bytes.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&LOG_MAGIC);
        data.extend_from_slice(&LOG_VERSION.to_le_bytes());
        data.push(self.frame_type() as u8);
        put_len(&mut data, payload.len())?;
        data.extend_from_slice(&payload);
        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}

fn put_len(buf: &mut Vec<u8>, len: usize) -> CoreResult<()> {
    let len = u32::try_from(len)
        .map_err(|_| CoreError::invalid_operation("table log entry too large"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

struct PayloadReader<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn bytes(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.payload.len())
            .ok_or_else(|| CoreError::log_corruption("unexpected end of payload"))?;
        let out = &self.payload[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let raw: [u8; 4] = self
            .bytes(4)?
            .try_into()
            .map_err(|_| CoreError::log_corruption("invalid u32"))?;
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let raw: [u8; 8] = self
            .bytes(8)?
            .try_into()
            .map_err(|_| CoreError::log_corruption("invalid u64"))?;
        Ok(u64::from_le_bytes(raw))
    }
}

/// Result of reading one frame from a byte slice.
enum Parsed {
    Frame(Frame, usize),
    /// The slice ends inside this frame, or it is the last frame and its
    /// checksum does not match: a torn write.
    Torn,
}

fn parse_frame(buf: &[u8], offset: usize) -> CoreResult<Parsed> {
    if buf.len() < HEADER_SIZE {
        return Ok(Parsed::Torn);
    }
    if buf[0..4] != LOG_MAGIC {
        return Err(CoreError::log_corruption(format!(
            "invalid magic at offset {offset}"
        )));
    }
    let version = u16::from_le_bytes([buf[4], buf[5]]);
    if version != LOG_VERSION {
        return Err(CoreError::log_corruption(format!(
            "unsupported log version {version} at offset {offset}"
        )));
    }
    let type_byte = buf[6];
    let len = u32::from_le_bytes([buf[7], buf[8], buf[9], buf[10]]) as usize;
    let total = HEADER_SIZE + len + CRC_SIZE;
    if buf.len() < total {
        return Ok(Parsed::Torn);
    }

    let body_end = HEADER_SIZE + len;
    let stored = u32::from_le_bytes([
        buf[body_end],
        buf[body_end + 1],
        buf[body_end + 2],
        buf[body_end + 3],
    ]);
    if compute_crc32(&buf[..body_end]) != stored {
        if buf.len() == total {
            return Ok(Parsed::Torn);
        }
        return Err(CoreError::log_corruption(format!(
            "checksum mismatch at offset {offset}"
        )));
    }

    let frame_type = FrameType::from_byte(type_byte).ok_or_else(|| {
        CoreError::log_corruption(format!("unknown frame type {type_byte} at offset {offset}"))
    })?;
    let frame = Frame::decode_payload(frame_type, &buf[HEADER_SIZE..body_end])?;
    Ok(Parsed::Frame(frame, total))
}

/// Writer and reader of one table's frames.
pub struct TableLog {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
    frames: usize,
}

impl TableLog {
    /// Wraps a backend.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend,
            sync_on_commit,
            frames: 0,
        }
    }

    /// Appends a frame, flushing afterwards if `sync_on_commit` is set.
    ///
    /// Returns the offset of the frame.
    ///
    /// # Errors
    ///
    /// Returns encoding or storage failures.
    pub fn append(&mut self, frame: &Frame) -> CoreResult<u64> {
        let data = frame.encode()?;
        let offset = self.backend.append(&data)?;
        if self.sync_on_commit {
            self.backend.flush()?;
        }
        self.frames += 1;
        Ok(offset)
    }

    /// Returns the number of frames replayed or appended through this
    /// handle.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// Returns the size of the log in bytes.
    ///
    /// # Errors
    ///
    /// Returns storage failures.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Reads every frame and returns the write sets of commits that were
    /// not rolled back, oldest first.
    ///
    /// A torn frame at the end of the log is cut off.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogCorruption`] for damage before the tail, or
    /// storage failures.
    pub fn replay(&mut self) -> CoreResult<Vec<Vec<RowWrite>>> {
        let data = self.backend.read_all()?;
        let mut commits: Vec<(TransactionId, Vec<RowWrite>)> = Vec::new();
        let mut pos = 0;
        self.frames = 0;

        while pos < data.len() {
            match parse_frame(&data[pos..], pos)? {
                Parsed::Frame(Frame::Commit { txid, writes }, len) => {
                    commits.push((txid, writes));
                    self.frames += 1;
                    pos += len;
                }
                Parsed::Frame(Frame::Rollback { txid }, len) => {
                    match commits.iter().rposition(|(id, _)| *id == txid) {
                        Some(index) => {
                            commits.remove(index);
                        }
                        None => debug!(%txid, "rollback frame without matching commit"),
                    }
                    self.frames += 1;
                    pos += len;
                }
                Parsed::Torn => {
                    warn!(
                        offset = pos,
                        dropped = data.len() - pos,
                        "discarding torn frame at end of table log"
                    );
                    self.backend.truncate(pos as u64)?;
                    break;
                }
            }
        }

        Ok(commits.into_iter().map(|(_, writes)| writes).collect())
    }
}

impl std::fmt::Debug for TableLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableLog")
            .field("size", &self.backend.size().ok())
            .field("sync_on_commit", &self.sync_on_commit)
            .field("frames", &self.frames)
            .finish()
    }
}

/// Computes the CRC32 (IEEE) checksum of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsmeta_storage::InMemoryBackend;

    fn commit(txid: u64, writes: &[(&str, Option<&str>)]) -> Frame {
        Frame::Commit {
            txid: TransactionId::new(txid),
            writes: writes
                .iter()
                .map(|(k, v)| (k.as_bytes().to_vec(), v.map(|v| v.as_bytes().to_vec())))
                .collect(),
        }
    }

    fn log_over(backend: &InMemoryBackend) -> TableLog {
        TableLog::new(Box::new(backend.clone()), false)
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn frames_survive_encode_and_parse() {
        for frame in [
            commit(3, &[("a", Some("1")), ("b", None)]),
            Frame::Rollback {
                txid: TransactionId::new(9),
            },
        ] {
            let bytes = frame.encode().unwrap();
            match parse_frame(&bytes, 0).unwrap() {
                Parsed::Frame(parsed, len) => {
                    assert_eq!(parsed, frame);
                    assert_eq!(len, bytes.len());
                }
                Parsed::Torn => panic!("complete frame reported torn"),
            }
        }
    }

    #[test]
    fn empty_log_replays_nothing() {
        let backend = InMemoryBackend::new();
        assert!(log_over(&backend).replay().unwrap().is_empty());
    }

    #[test]
    fn rollback_cancels_latest_commit_of_same_transaction() {
        let backend = InMemoryBackend::new();
        let mut log = log_over(&backend);
        log.append(&commit(1, &[("a", Some("1"))])).unwrap();
        log.append(&commit(2, &[("a", Some("2"))])).unwrap();
        log.append(&Frame::Rollback {
            txid: TransactionId::new(2),
        })
        .unwrap();
        log.append(&commit(3, &[("b", Some("3"))])).unwrap();

        assert_eq!(log.frame_count(), 4);

        let mut reopened = log_over(&backend);
        let commits = reopened.replay().unwrap();
        assert_eq!(reopened.frame_count(), 4);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0][0].1.as_deref(), Some(&b"1"[..]));
        assert_eq!(commits[1][0].0, b"b".to_vec());
    }

    #[test]
    fn torn_tail_is_truncated() {
        let backend = InMemoryBackend::new();
        let mut log = log_over(&backend);
        log.append(&commit(1, &[("a", Some("1"))])).unwrap();
        let good_size = log.size().unwrap();

        let partial = commit(2, &[("b", Some("2"))]).encode().unwrap();
        let mut data = backend.data();
        data.extend_from_slice(&partial[..partial.len() - 3]);
        let torn = InMemoryBackend::with_data(data);

        let mut log = log_over(&torn);
        let commits = log.replay().unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(log.size().unwrap(), good_size);
    }

    #[test]
    fn bad_checksum_on_last_frame_is_torn() {
        let backend = InMemoryBackend::new();
        log_over(&backend)
            .append(&commit(1, &[("a", Some("1"))]))
            .unwrap();
        let mut data = backend.data();
        let last = data.len() - 1;
        data[last] ^= 0xFF;

        let damaged = InMemoryBackend::with_data(data);
        let mut log = log_over(&damaged);
        assert!(log.replay().unwrap().is_empty());
        assert_eq!(log.size().unwrap(), 0);
    }

    #[test]
    fn bad_checksum_before_tail_is_corruption() {
        let backend = InMemoryBackend::new();
        let mut log = log_over(&backend);
        log.append(&commit(1, &[("a", Some("1"))])).unwrap();
        log.append(&commit(2, &[("b", Some("2"))])).unwrap();
        let mut data = backend.data();
        data[HEADER_SIZE + 2] ^= 0xFF;

        let damaged = InMemoryBackend::with_data(data);
        let err = log_over(&damaged).replay().unwrap_err();
        assert!(matches!(err, CoreError::LogCorruption { .. }));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut data = commit(1, &[]).encode().unwrap();
        data[0] = b'X';
        let backend = InMemoryBackend::with_data(data);
        assert!(matches!(
            log_over(&backend).replay(),
            Err(CoreError::LogCorruption { .. })
        ));
    }
}
