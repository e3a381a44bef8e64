use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use plan_types::ChangeEvent;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::envelope::{DeadLetter, EventId};
use crate::error::{FabricError, FabricResult};

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// A dead letter as persisted on disk.
///
/// The event is kept as JSON bytes; the rest of the record is bincode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub event_id: EventId,
    pub object_id: String,
    pub operation: String,
    pub reason: String,
    pub attempts: u32,
    pub published_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
    pub event_json: Vec<u8>,
}

impl DeadLetterRecord {
    pub fn from_dead_letter(letter: &DeadLetter) -> FabricResult<Self> {
        let event = &letter.envelope.event;
        let event_json = serde_json::to_vec(event)
            .map_err(|e| FabricError::Serialization(e.to_string()))?;
        Ok(Self {
            event_id: letter.envelope.event_id,
            object_id: event.object_id().to_string(),
            operation: event.kind().to_string(),
            reason: letter.reason.clone(),
            attempts: letter.attempts,
            published_at: letter.envelope.published_at,
            dead_lettered_at: letter.dead_lettered_at,
            event_json,
        })
    }

    /// Decode the original change event.
    pub fn event(&self) -> FabricResult<ChangeEvent> {
        serde_json::from_slice(&self.event_json)
            .map_err(|e| FabricError::Serialization(e.to_string()))
    }
}

struct LogWriter {
    writer: BufWriter<File>,
    offset: u64,
}

/// Append-only, crash-recoverable log of dead letters.
///
/// On-disk format, one frame per record:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized DeadLetterRecord)]
/// ```
/// Every append is flushed and synced before it returns.
pub struct DeadLetterLog {
    path: PathBuf,
    writer: Mutex<LogWriter>,
}

impl DeadLetterLog {
    /// Open (or create) the log file at `path`.
    pub fn open(path: &Path) -> FabricResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let offset = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(LogWriter {
                writer: BufWriter::new(file),
                offset,
            }),
        })
    }

    /// Append one record. Returns the byte offset of its frame.
    pub fn append(&self, record: &DeadLetterRecord) -> FabricResult<u64> {
        let payload =
            bincode::serialize(record).map_err(|e| FabricError::Serialization(e.to_string()))?;
        let length = u32::try_from(payload.len())
            .map_err(|_| FabricError::Serialization("dead letter exceeds 4 GiB".into()))?;
        let crc = crc32fast::hash(&payload);

        let mut w = self
            .writer
            .lock()
            .map_err(|e| FabricError::Unavailable(format!("log lock poisoned: {e}")))?;
        let entry_offset = w.offset;

        w.writer.write_all(&length.to_le_bytes())?;
        w.writer.write_all(&crc.to_le_bytes())?;
        w.writer.write_all(&payload)?;
        w.writer.flush()?;
        w.writer.get_ref().sync_all()?;

        w.offset += (HEADER_SIZE + payload.len()) as u64;

        debug!(offset = entry_offset, len = payload.len(), event_id = %record.event_id, "dead letter appended");
        Ok(entry_offset)
    }

    /// Read every intact record, front to back.
    ///
    /// Frames failing the CRC check are skipped; a torn tail ends recovery.
    pub fn recover(&self) -> FabricResult<Vec<DeadLetterRecord>> {
        let mut file = BufReader::new(File::open(&self.path)?);
        let file_len = file.get_ref().metadata()?.len();
        let mut records = Vec::new();
        let mut offset: u64 = 0;

        while offset + HEADER_SIZE as u64 <= file_len {
            file.seek(SeekFrom::Start(offset))?;

            let mut header = [0u8; HEADER_SIZE];
            match file.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            if length == 0 || offset + HEADER_SIZE as u64 + length as u64 > file_len {
                warn!(offset, length, file_len, "invalid dead-letter frame length; stopping recovery");
                break;
            }

            let mut payload = vec![0u8; length as usize];
            match file.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(offset, "truncated dead-letter frame; stopping recovery");
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let actual_crc = crc32fast::hash(&payload);
            if actual_crc != expected_crc {
                warn!(offset, expected = expected_crc, actual = actual_crc, "CRC mismatch; skipping dead letter");
            } else {
                match bincode::deserialize::<DeadLetterRecord>(&payload) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(offset, error = %e, "undecodable dead letter; skipping"),
                }
            }

            offset += HEADER_SIZE as u64 + length as u64;
        }

        debug!(recovered = records.len(), "dead-letter recovery complete");
        Ok(records)
    }

    /// Current end-of-log offset.
    pub fn offset(&self) -> u64 {
        self.writer.lock().map(|w| w.offset).unwrap_or(0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for DeadLetterLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterLog")
            .field("path", &self.path)
            .field("offset", &self.offset())
            .finish()
    }
}
