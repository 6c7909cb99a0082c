//! Append-only recording of socket payloads.
//!
//! File layout, repeated until end of file:
//!
//! ```text
//! ┌──────────┬────────────────┐
//! │ len: u32 │ payload: [len] │
//! └──────────┴────────────────┘
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use super::WorkQueue;
use crate::codec::ByteReader;
use crate::config::BackgroundConfig;
use crate::error::{CodecError, RecorderError};
use crate::protocol::{DecoderTable, Message};

/// Recorder counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecorderStats {
    /// Payloads written
    pub frames: u64,
    /// Bytes written, length prefixes included
    pub bytes: u64,
    /// Batches written
    pub batches: u64,
    /// Failed writes
    pub write_errors: u64,
}

/// Writes payloads to a file from a worker thread.
#[derive(Debug)]
pub struct FrameRecorder {
    path: PathBuf,
    queue: Arc<WorkQueue<Vec<u8>>>,
    stats: Arc<Mutex<RecorderStats>>,
    shutdown: Arc<AtomicBool>,
    writer: Option<JoinHandle<()>>,
}

impl FrameRecorder {
    /// Opens (or creates) a recording and starts the writer.
    pub fn open(path: impl AsRef<Path>, config: BackgroundConfig) -> Result<Self, RecorderError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| RecorderError::Io {
                path: path.clone(),
                source,
            })?;

        let queue = Arc::new(WorkQueue::new(config.queue_capacity));
        let stats = Arc::new(Mutex::new(RecorderStats::default()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let writer = {
            let queue = Arc::clone(&queue);
            let stats = Arc::clone(&stats);
            let shutdown = Arc::clone(&shutdown);
            let poll = config.poll_interval();
            let path = path.clone();
            thread::spawn(move || Self::writer_loop(file, &path, &queue, &stats, &shutdown, poll))
        };

        tracing::info!(path = %path.display(), "recording started");
        Ok(Self {
            path,
            queue,
            stats,
            shutdown,
            writer: Some(writer),
        })
    }

    fn writer_loop(
        file: File,
        path: &Path,
        queue: &WorkQueue<Vec<u8>>,
        stats: &Mutex<RecorderStats>,
        shutdown: &AtomicBool,
        poll: Duration,
    ) {
        let mut writer = BufWriter::with_capacity(64 * 1024, file);
        loop {
            let stopping = shutdown.load(Ordering::Acquire);
            let batch = queue.drain_wait(if stopping { Duration::ZERO } else { poll });

            if !batch.is_empty() {
                let mut bytes = 0_u64;
                let mut failed = 0_u64;
                for payload in &batch {
                    let Ok(len) = u32::try_from(payload.len()) else {
                        failed += 1;
                        continue;
                    };
                    let written = writer
                        .write_all(&len.to_le_bytes())
                        .and_then(|()| writer.write_all(payload));
                    match written {
                        Ok(()) => bytes += 4 + u64::from(len),
                        Err(error) => {
                            tracing::error!(path = %path.display(), %error, "recording write failed");
                            failed += 1;
                        }
                    }
                }
                if let Err(error) = writer.flush() {
                    tracing::error!(path = %path.display(), %error, "recording flush failed");
                    failed += 1;
                }

                let mut s = stats.lock();
                s.frames += batch.len() as u64 - failed.min(batch.len() as u64);
                s.bytes += bytes;
                s.batches += 1;
                s.write_errors += failed;
            }

            if stopping {
                break;
            }
        }
    }

    /// Queues a raw payload.
    pub fn record(&self, payload: Vec<u8>) -> Result<(), RecorderError> {
        self.queue.push(payload).map_err(|_| RecorderError::BufferFull)
    }

    /// Queues an encoded message.
    pub fn record_message(&self, message: &Message) -> Result<(), RecorderError> {
        self.record(message.to_bytes())
    }

    /// Recording file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Payloads not yet handed to the file.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> RecorderStats {
        *self.stats.lock()
    }
}

impl Drop for FrameRecorder {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.queue.wake();
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

/// Reads every payload of a recording.
pub fn read_recording(path: impl AsRef<Path>) -> Result<Vec<Vec<u8>>, RecorderError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| RecorderError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut reader = ByteReader::new(&bytes);
    let mut frames = Vec::new();
    while reader.remaining() > 0 {
        let offset = reader.position();
        let frame = reader
            .read_u32()
            .and_then(|len| reader.read_bytes(usize::try_from(len).ok()?))
            .ok_or(CodecError::Unreadable {
                what: "recorded frame",
                offset,
            })?;
        frames.push(frame.to_vec());
    }
    Ok(frames)
}

/// Reads and decodes every message of a recording.
pub fn replay_recording(path: impl AsRef<Path>, table: &DecoderTable) -> Result<Vec<Message>, RecorderError> {
    read_recording(path)?
        .iter()
        .map(|payload| table.decode(payload).map_err(RecorderError::from))
        .collect()
}
