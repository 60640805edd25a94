use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use cxo_types::{Hash, PubKey};

use crate::error::{DataError, DataResult};
use crate::record::RootRecord;

/// One logged mutation of the store.
///
/// Operations that touch several keys are a single entry so they replay
/// all-or-nothing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogOp {
    Set { hash: Hash, data: Bytes },
    DelObjects { hashes: Vec<Hash> },
    AddFeed { feed: PubKey },
    DelFeed { feed: PubKey },
    AddRoot { feed: PubKey, root: RootRecord },
    DelRoots { feed: PubKey, seqs: Vec<u64> },
}

/// Flush/sync strategy for the log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum SyncMode {
    /// `fsync` after every write (safest, highest latency).
    EveryWrite,
    /// `fsync` on a write once the interval has elapsed since the last one.
    Periodic { interval_ms: u64 },
    /// Rely on OS page-cache buffering (fastest, least durable).
    #[default]
    OsDefault,
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

struct LogWriter {
    /// `None` once a failed append could not be rolled back.
    writer: Option<BufWriter<File>>,
    /// Current write offset in the log file.
    offset: u64,
    last_sync: Instant,
}

/// Append-only operation log behind [`LogDb`](crate::LogDb).
///
/// On-disk format, repeated until end of file:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized LogOp)]
/// ```
///
/// A damaged last frame is a torn write from a crash and is cut off on
/// open. A damaged frame anywhere else cannot be skipped (later frames may
/// depend on it) and fails the open with [`DataError::CorruptLog`].
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<LogWriter>,
    sync_mode: SyncMode,
}

impl WriteAheadLog {
    /// Open (or create) the log at `path` and return every recorded
    /// operation in order.
    pub fn open(path: &Path, sync_mode: SyncMode) -> DataResult<(Self, Vec<LogOp>)> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let file_len = file.metadata()?.len();
        let (ops, valid_len) = read_frames(&mut file, file_len)?;
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                valid_len,
                file_len,
                "dropping torn tail of the log"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        info!(path = %path.display(), ops = ops.len(), bytes = valid_len, "log recovered");

        let log = Self {
            path: path.to_path_buf(),
            writer: Mutex::new(LogWriter {
                writer: Some(BufWriter::new(file)),
                offset: valid_len,
                last_sync: Instant::now(),
            }),
            sync_mode,
        };
        Ok((log, ops))
    }

    /// Append a single operation. Returns the byte offset of its frame.
    ///
    /// On failure the file is cut back to where the frame started, so a
    /// failed operation is never replayed. If that is impossible the log
    /// refuses all further appends with [`DataError::LogFailed`].
    pub fn append(&self, op: &LogOp) -> DataResult<u64> {
        let frame = encode_frame(op)?;

        let mut w = self.lock()?;
        let frame_offset = w.offset;

        if let Err(e) = self.write_frame(&mut w, &frame) {
            self.roll_back(&mut w);
            return Err(e);
        }
        w.offset += frame.len() as u64;

        debug!(offset = frame_offset, len = frame.len(), "log append");
        Ok(frame_offset)
    }

    fn write_frame(&self, w: &mut LogWriter, frame: &[u8]) -> DataResult<()> {
        let writer = w.writer.as_mut().ok_or(DataError::LogFailed)?;
        writer.write_all(frame)?;
        writer.flush()?;
        match self.sync_mode {
            SyncMode::EveryWrite => writer.get_ref().sync_data()?,
            SyncMode::Periodic { interval_ms } => {
                if w.last_sync.elapsed() >= Duration::from_millis(interval_ms) {
                    writer.get_ref().sync_data()?;
                    w.last_sync = Instant::now();
                }
            }
            SyncMode::OsDefault => {}
        }
        Ok(())
    }

    /// Drop whatever part of a failed frame is buffered or already on disk.
    fn roll_back(&self, w: &mut LogWriter) {
        let Some(stale) = w.writer.take() else {
            return;
        };
        // into_parts hands back the buffer instead of flushing it on drop
        let _ = stale.into_parts();

        let restored = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .and_then(|file| file.set_len(w.offset).map(|()| file));
        match restored {
            Ok(file) => {
                w.writer = Some(BufWriter::new(file));
                warn!(path = %self.path.display(), offset = w.offset, "rolled back failed log append");
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "cannot roll back log; refusing further writes");
            }
        }
    }

    /// Replace the whole log with `ops`.
    ///
    /// The new log is written to a temporary file next to the old one and
    /// renamed over it, so a crash leaves either the old or the new log.
    /// A log that refused writes after a failed append accepts them again.
    pub fn rewrite(&self, ops: &[LogOp]) -> DataResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut w = self.lock()?;
        if let Some(writer) = w.writer.as_mut() {
            writer.flush()?;
        }

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        let mut written: u64 = 0;
        {
            let mut out = BufWriter::new(tmp.as_file_mut());
            for op in ops {
                let frame = encode_frame(op)?;
                out.write_all(&frame)?;
                written += frame.len() as u64;
            }
            out.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| DataError::Io(e.error))?;

        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        w.writer = Some(BufWriter::new(file));
        w.offset = written;
        w.last_sync = Instant::now();

        info!(path = %self.path.display(), ops = ops.len(), bytes = written, "log rewritten");
        Ok(())
    }

    /// Flush buffered frames and `fsync` the file.
    pub fn sync(&self) -> DataResult<()> {
        let mut w = self.lock()?;
        let writer = w.writer.as_mut().ok_or(DataError::LogFailed)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        w.last_sync = Instant::now();
        Ok(())
    }

    /// Current size of the log in bytes.
    pub fn offset(&self) -> u64 {
        self.writer.lock().map(|w| w.offset).unwrap_or_default()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> DataResult<std::sync::MutexGuard<'_, LogWriter>> {
        self.writer.lock().map_err(|_| DataError::Poisoned)
    }
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("path", &self.path)
            .field("offset", &self.offset())
            .field("sync_mode", &self.sync_mode)
            .finish()
    }
}

fn encode_frame(op: &LogOp) -> DataResult<Vec<u8>> {
    let payload = bincode::serialize(op).map_err(|e| DataError::Serialization(e.to_string()))?;
    let length = u32::try_from(payload.len())
        .map_err(|_| DataError::Serialization(format!("log entry of {} bytes", payload.len())))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Read frames front to back. Returns the decoded operations and the
/// length of the intact prefix of the file.
fn read_frames(file: &mut File, file_len: u64) -> DataResult<(Vec<LogOp>, u64)> {
    let mut reader = BufReader::new(file);
    let mut ops = Vec::new();
    let mut offset: u64 = 0;

    while offset < file_len {
        if offset + HEADER_SIZE as u64 > file_len {
            break; // torn header
        }

        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header)?;
        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let end = offset + HEADER_SIZE as u64 + length as u64;
        if end > file_len {
            break; // torn payload
        }
        let is_tail = end == file_len;

        let mut payload = vec![0u8; length as usize];
        match reader.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc {
            if is_tail {
                warn!(offset, "CRC mismatch in last log frame; treating as torn write");
                break;
            }
            return Err(DataError::CorruptLog {
                offset,
                reason: format!("CRC mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"),
            });
        }

        let op = bincode::deserialize::<LogOp>(&payload).map_err(|e| DataError::CorruptLog {
            offset,
            reason: e.to_string(),
        })?;
        ops.push(op);
        offset = end;
    }

    Ok((ops, offset))
}
