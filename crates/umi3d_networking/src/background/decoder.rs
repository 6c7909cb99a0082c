//! Off-thread payload decoding.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::WorkQueue;
use crate::config::BackgroundConfig;
use crate::error::{CodecResult, NetworkError};
use crate::protocol::{DecoderTable, Message};

/// One decoded payload, tagged with where it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Decoded<K> {
    /// Caller supplied source tag
    pub source: K,
    /// Decoded message, or why the payload was discarded
    pub result: CodecResult<Message>,
}

/// Decoder counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Payloads decoded successfully
    pub decoded: u64,
    /// Payloads discarded as malformed
    pub malformed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    decoded: AtomicU64,
    malformed: AtomicU64,
}

/// Decodes raw payloads on a worker thread.
///
/// Payloads go in with [`submit`](Self::submit); decoded messages come back,
/// in submission order, through [`drain`](Self::drain).
#[derive(Debug)]
pub struct InboundDecoder<K: Send + 'static> {
    input: Arc<WorkQueue<(K, Vec<u8>)>>,
    output: Arc<WorkQueue<Decoded<K>>>,
    counters: Arc<Counters>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl<K: Send + 'static> InboundDecoder<K> {
    /// Starts the worker.
    #[must_use]
    pub fn spawn(table: DecoderTable, config: BackgroundConfig) -> Self {
        let input = Arc::new(WorkQueue::new(config.queue_capacity));
        // Results are never refused; the input bound already limits them.
        let output = Arc::new(WorkQueue::new(usize::MAX));
        let counters = Arc::new(Counters::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = {
            let input = Arc::clone(&input);
            let output = Arc::clone(&output);
            let counters = Arc::clone(&counters);
            let shutdown = Arc::clone(&shutdown);
            let poll = config.poll_interval();
            thread::spawn(move || Self::decode_loop(&table, &input, &output, &counters, &shutdown, poll))
        };

        Self {
            input,
            output,
            counters,
            shutdown,
            worker: Some(worker),
        }
    }

    fn decode_loop(
        table: &DecoderTable,
        input: &WorkQueue<(K, Vec<u8>)>,
        output: &WorkQueue<Decoded<K>>,
        counters: &Counters,
        shutdown: &AtomicBool,
        poll: Duration,
    ) {
        loop {
            let stopping = shutdown.load(Ordering::Acquire);
            for (source, payload) in input.drain_wait(if stopping { Duration::ZERO } else { poll }) {
                let result = table.decode(&payload);
                match &result {
                    Ok(_) => counters.decoded.fetch_add(1, Ordering::Relaxed),
                    Err(error) => {
                        tracing::warn!(%error, len = payload.len(), "malformed payload discarded");
                        counters.malformed.fetch_add(1, Ordering::Relaxed)
                    }
                };
                // unbounded
                let _ = output.push(Decoded { source, result });
            }
            if stopping {
                break;
            }
        }
    }

    /// Queues a payload for decoding.
    pub fn submit(&self, source: K, payload: Vec<u8>) -> Result<(), NetworkError> {
        self.input.push((source, payload)).map_err(|_| {
            tracing::warn!("inbound decoder queue full");
            NetworkError::QueueFull
        })
    }

    /// Takes every decoded payload without waiting.
    pub fn drain(&self) -> Vec<Decoded<K>> {
        self.output.drain()
    }

    /// Takes every decoded payload, waiting up to `timeout` for the first.
    pub fn drain_wait(&self, timeout: Duration) -> Vec<Decoded<K>> {
        self.output.drain_wait(timeout)
    }

    /// Payloads waiting for the worker.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.input.len()
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            decoded: self.counters.decoded.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
        }
    }
}

impl<K: Send + 'static> Drop for InboundDecoder<K> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.input.wake();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use crate::error::CodecError;
    use crate::protocol::TrackingFrameMessage;
    use crate::server::UserId;

    fn collect<K: Send + 'static>(decoder: &InboundDecoder<K>, count: usize) -> Vec<Decoded<K>> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut out = Vec::new();
        while out.len() < count && Instant::now() < deadline {
            out.extend(decoder.drain_wait(Duration::from_millis(20)));
        }
        out
    }

    #[test]
    fn test_decodes_in_submission_order() {
        let decoder = InboundDecoder::spawn(DecoderTable::standard(), BackgroundConfig::default());
        let first = Message::TrackingFrame(TrackingFrameMessage::new(UserId(1)));
        let second = Message::TrackingFrame(TrackingFrameMessage::new(UserId(2)));
        decoder.submit("a", first.to_bytes()).unwrap();
        decoder.submit("b", vec![99]).unwrap();
        decoder.submit("c", second.to_bytes()).unwrap();

        let out = collect(&decoder, 3);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], Decoded { source: "a", result: Ok(first) });
        assert_eq!(out[1].result, Err(CodecError::UnknownMessageType(99)));
        assert_eq!(out[2], Decoded { source: "c", result: Ok(second) });
        assert_eq!(decoder.stats(), DecoderStats { decoded: 2, malformed: 1 });
    }

    #[test]
    fn test_drop_joins_worker() {
        let decoder: InboundDecoder<u32> = InboundDecoder::spawn(DecoderTable::standard(), BackgroundConfig::default());
        decoder.submit(1, vec![]).unwrap();
        drop(decoder);
    }
}
