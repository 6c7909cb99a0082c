//! # Transaction Batcher
//!
//! Accumulates operations over a tick window and hands them to the network
//! as one ordered [`Transaction`].
//!
//! ## State Machine
//!
//! ```text
//!            push                    interval elapsed
//!   Idle ───────────> Accumulating ─────────────────────> Flushing ──> Idle
//!                        │    ▲                              ▲
//!                        │    │ push                         │
//!                        └────┘                              │
//!                        └── (max_operations + 1)-th push ───┘
//! ```
//!
//! The operation that would exceed `max_operations` first flushes what is
//! pending, then starts the next batch. A batch the sink refuses is dropped:
//! every operation replays a current value, so the next flush repairs the
//! receiver.

use std::time::Instant;

use crate::config::BatcherConfig;
use crate::error::NetworkError;
use crate::protocol::{Operation, Transaction};

/// Where flushed transactions go.
pub trait TransactionSink {
    /// Hands one transaction to the network.
    fn send(&mut self, transaction: Transaction) -> Result<(), NetworkError>;
}

impl TransactionSink for Vec<Transaction> {
    fn send(&mut self, transaction: Transaction) -> Result<(), NetworkError> {
        self.push(transaction);
        Ok(())
    }
}

/// Batcher state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatcherState {
    /// Nothing pending.
    Idle,
    /// Operations pending since `since`.
    Accumulating {
        /// Arrival of the oldest pending operation
        since: Instant,
    },
    /// Handing a batch to the sink.
    Flushing,
}

/// Batcher counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatcherStats {
    /// Transactions accepted by the sink.
    pub flushed_transactions: u64,
    /// Operations in accepted transactions.
    pub flushed_operations: u64,
    /// Transactions the sink refused.
    pub dropped_transactions: u64,
    /// Operations in refused transactions.
    pub dropped_operations: u64,
}

/// Accumulates operations and flushes them under a time and count budget.
#[derive(Debug)]
pub struct TransactionBatcher<S> {
    config: BatcherConfig,
    sink: S,
    pending: Vec<Operation>,
    state: BatcherState,
    stats: BatcherStats,
}

impl<S: TransactionSink> TransactionBatcher<S> {
    /// Creates an idle batcher.
    pub fn new(config: BatcherConfig, sink: S) -> Self {
        Self {
            config,
            sink,
            pending: Vec::with_capacity(config.max_operations),
            state: BatcherState::Idle,
            stats: BatcherStats::default(),
        }
    }

    /// Adds one operation, flushing first if it would exceed the count
    /// budget.
    pub fn push(&mut self, operation: Operation, now: Instant) {
        let max = self.config.max_operations;
        if max > 0 && self.pending.len() + 1 > max {
            self.flush();
        }
        self.pending.push(operation);
        if self.state == BatcherState::Idle {
            self.state = BatcherState::Accumulating { since: now };
        }
    }

    /// Adds operations in order.
    pub fn extend(&mut self, operations: impl IntoIterator<Item = Operation>, now: Instant) {
        for operation in operations {
            self.push(operation, now);
        }
    }

    /// Flushes if the oldest pending operation has waited long enough.
    ///
    /// Returns true if a batch was flushed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let interval = self.config.flush_interval();
        match self.state {
            BatcherState::Accumulating { since }
                if !interval.is_zero() && now.saturating_duration_since(since) >= interval =>
            {
                self.flush()
            }
            _ => false,
        }
    }

    /// Flushes whatever is pending as one transaction.
    ///
    /// Returns true if the sink accepted a batch.
    pub fn flush(&mut self) -> bool {
        if self.pending.is_empty() {
            self.state = BatcherState::Idle;
            return false;
        }

        self.state = BatcherState::Flushing;
        let operations = std::mem::replace(&mut self.pending, Vec::with_capacity(self.config.max_operations));
        let transaction = Transaction::from_operations(operations);
        let count = transaction.len() as u64;
        let reliable = transaction.reliable;

        let sent = match self.sink.send(transaction) {
            Ok(()) => {
                self.stats.flushed_transactions += 1;
                self.stats.flushed_operations += count;
                tracing::trace!(operations = count, reliable, "transaction flushed");
                true
            }
            Err(err) => {
                self.stats.dropped_transactions += 1;
                self.stats.dropped_operations += count;
                tracing::warn!(operations = count, reliable, error = %err, "transaction dropped");
                false
            }
        };
        self.state = BatcherState::Idle;
        sent
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> BatcherState {
        self.state
    }

    /// Number of pending operations.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Counters.
    #[must_use]
    pub const fn stats(&self) -> &BatcherStats {
        &self.stats
    }

    /// The sink.
    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// The sink, mutably.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Budgets.
    #[must_use]
    pub const fn config(&self) -> &BatcherConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;
    use crate::protocol::UserSet;
    use std::time::Duration;
    use umi3d_shared::{keys, EntityCategory};

    fn set(serial: u64) -> Operation {
        Operation::SetEntityProperty {
            entity: EntityId::new(EntityCategory::Object3D, serial),
            key: keys::NAME,
            value: "x".into(),
            users: UserSet::All,
        }
    }

    fn config(flush_interval_ms: u64, max_operations: usize) -> BatcherConfig {
        BatcherConfig {
            flush_interval_ms,
            max_operations,
        }
    }

    struct Offline;

    impl TransactionSink for Offline {
        fn send(&mut self, _: Transaction) -> Result<(), NetworkError> {
            Err(NetworkError::Unavailable)
        }
    }

    #[test]
    fn test_count_threshold_flushes_before_accumulating() {
        let mut batcher = TransactionBatcher::new(config(0, 3), Vec::new());
        let now = Instant::now();
        for serial in 1..=4 {
            batcher.push(set(serial), now);
        }
        assert_eq!(batcher.sink().len(), 1);
        assert_eq!(batcher.sink()[0].len(), 3);
        assert_eq!(batcher.pending_len(), 1);

        assert!(batcher.flush());
        assert_eq!(batcher.sink().len(), 2);
        assert_eq!(batcher.sink()[1].operations, vec![set(4)]);
        assert_eq!(batcher.state(), BatcherState::Idle);
    }

    #[test]
    fn test_time_threshold() {
        let mut batcher = TransactionBatcher::new(config(10, 0), Vec::new());
        let start = Instant::now();
        assert!(!batcher.tick(start));

        batcher.push(set(1), start);
        assert_eq!(batcher.state(), BatcherState::Accumulating { since: start });
        assert!(!batcher.tick(start + Duration::from_millis(9)));
        batcher.push(set(2), start + Duration::from_millis(9));
        assert!(batcher.tick(start + Duration::from_millis(10)));

        assert_eq!(batcher.sink().len(), 1);
        assert_eq!(batcher.sink()[0].len(), 2);
        assert_eq!(batcher.state(), BatcherState::Idle);
    }

    #[test]
    fn test_disabled_budgets_only_flush_explicitly() {
        let mut batcher = TransactionBatcher::new(config(0, 0), Vec::new());
        let start = Instant::now();
        for serial in 0..1_000 {
            batcher.push(set(serial), start);
        }
        assert!(!batcher.tick(start + Duration::from_secs(60)));
        assert!(batcher.sink().is_empty());
        assert!(batcher.flush());
        assert_eq!(batcher.sink()[0].len(), 1_000);
    }

    #[test]
    fn test_structural_batches_are_reliable() {
        let mut batcher = TransactionBatcher::new(config(0, 0), Vec::new());
        let now = Instant::now();
        batcher.push(set(1), now);
        batcher.flush();
        batcher.push(set(1), now);
        batcher.push(
            Operation::DeleteEntity {
                entity: EntityId::new(EntityCategory::Object3D, 1),
                users: UserSet::All,
            },
            now,
        );
        batcher.flush();
        assert!(!batcher.sink()[0].reliable);
        assert!(batcher.sink()[1].reliable);
    }

    #[test]
    fn test_unavailable_network_drops_the_batch() {
        let mut batcher = TransactionBatcher::new(config(0, 2), Offline);
        let now = Instant::now();
        for serial in 1..=3 {
            batcher.push(set(serial), now);
        }
        assert!(!batcher.flush());
        assert_eq!(batcher.pending_len(), 0);
        assert_eq!(
            *batcher.stats(),
            BatcherStats {
                flushed_transactions: 0,
                flushed_operations: 0,
                dropped_transactions: 2,
                dropped_operations: 3,
            }
        );
    }
}
