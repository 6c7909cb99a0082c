//! # Environment Server
//!
//! The authoritative side of an environment.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ENVIRONMENT SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  transport ──NetworkEvent──> InboundDecoder ──> messages     │
//! │                                                  │          │
//! │  HTTP ──Request──> routes ──> SessionDirectory   │          │
//! │                                 │                ▼          │
//! │  app logic ──> EntityRegistry ──┼──> TransactionBatcher     │
//! │                                 ▼          │                │
//! │               per-user split <─────────────┘                │
//! │                     │                                       │
//! │  transport <──NetworkCommand── socket users                 │
//! │  /update   <── polling queues                               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on the tick thread except payload decoding. Audiences
//! never travel on the wire: each flushed transaction is split per user and
//! `LoadEntity` descriptors are re-derived as that user sees them.

mod routes;
mod tick;
mod user;

pub use routes::{ConnectionRequest, EnterDescriptor, MediaDescriptor, Method, Request, Response};
pub use tick::{TickLoop, TickStats};
pub use user::{Delivery, SessionDirectory, UserId, UserSession, UserStatus};

use std::collections::BTreeSet;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use umi3d_shared::keys;

use crate::background::InboundDecoder;
use crate::config::Umi3dConfig;
use crate::entity::EntityRegistry;
use crate::error::{NetworkError, ServerError, ServerResult};
use crate::protocol::{DecoderTable, InteractionRequest, Message, Operation, PropertyValue, Transaction, UserSet};
use crate::transaction::{BatcherStats, TransactionBatcher, TransactionSink};

/// Event from the transport thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkEvent {
    /// A logged-in user opened its socket.
    Connected(UserId),
    /// A socket payload arrived.
    Payload {
        /// Sender
        user: UserId,
        /// Raw message
        bytes: Vec<u8>,
    },
    /// A socket closed.
    Disconnected(UserId),
}

/// Command to the transport thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkCommand {
    /// Send a payload to one user.
    Send {
        /// Recipient
        user: UserId,
        /// Reliable path
        reliable: bool,
        /// Raw message
        bytes: Vec<u8>,
    },
    /// Close a user's socket.
    Close(UserId),
    /// Stop the transport.
    Shutdown,
}

/// Transport side of the server channels.
#[derive(Debug)]
pub struct NetworkHandle {
    /// Where the transport reports events.
    pub events: Sender<NetworkEvent>,
    /// Where the transport picks up commands.
    pub commands: Receiver<NetworkCommand>,
}

/// Batcher sink holding flushed transactions until they are split per user.
#[derive(Debug)]
pub struct OutboundQueue {
    flushed: Vec<Transaction>,
    available: bool,
}

impl TransactionSink for OutboundQueue {
    fn send(&mut self, transaction: Transaction) -> Result<(), NetworkError> {
        if !self.available {
            return Err(NetworkError::Unavailable);
        }
        self.flushed.push(transaction);
        Ok(())
    }
}

/// Server counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Tracking frames relayed to peers
    pub relayed_frames: u64,
    /// Socket payloads that did not decode
    pub malformed_messages: u64,
    /// Messages contradicting the connection they arrived on
    pub inconsistencies: u64,
    /// Commands the transport queue refused
    pub dropped_commands: u64,
    /// Per-user transactions handed out
    pub delivered_transactions: u64,
}

/// Authoritative environment.
#[derive(Debug)]
pub struct EnvironmentServer {
    config: Umi3dConfig,
    table: DecoderTable,
    registry: EntityRegistry,
    batcher: TransactionBatcher<OutboundQueue>,
    sessions: SessionDirectory,
    sockets: BTreeSet<UserId>,
    decoder: InboundDecoder<UserId>,
    events: Receiver<NetworkEvent>,
    commands: Sender<NetworkCommand>,
    interactions: Vec<InteractionRequest>,
    tick: u64,
    stats: ServerStats,
}

impl EnvironmentServer {
    /// Creates a server and the channel ends its transport uses.
    #[must_use]
    pub fn new(config: Umi3dConfig) -> (Self, NetworkHandle) {
        let capacity = config.server.channel_capacity.max(1);
        let (event_tx, event_rx) = bounded(capacity);
        let (command_tx, command_rx) = bounded(capacity);
        let table = DecoderTable::standard();

        let server = Self {
            registry: EntityRegistry::new(),
            batcher: TransactionBatcher::new(
                config.batcher,
                OutboundQueue {
                    flushed: Vec::new(),
                    available: true,
                },
            ),
            sessions: SessionDirectory::new(config.server.max_users, config.server.max_pending_updates),
            sockets: BTreeSet::new(),
            decoder: InboundDecoder::spawn(table.clone(), config.background),
            table,
            events: event_rx,
            commands: command_tx,
            interactions: Vec::new(),
            tick: 0,
            stats: ServerStats::default(),
            config,
        };
        let handle = NetworkHandle {
            events: event_tx,
            commands: command_rx,
        };
        (server, handle)
    }

    /// Runs one tick.
    ///
    /// Handles network events and decoded messages, expires silent users,
    /// then flushes the registry's operations to every user.
    pub fn tick(&mut self, now: Instant) {
        self.tick += 1;

        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
        }

        for decoded in self.decoder.drain() {
            match decoded.result {
                Ok(message) => {
                    // errors are logged where they are raised
                    let _ = self.handle_message(decoded.source, message);
                }
                Err(error) => {
                    self.stats.malformed_messages += 1;
                    tracing::warn!(user = %decoded.source, %error, "malformed socket message discarded");
                }
            }
        }

        for user in self.sessions.expire(self.tick, self.config.server.user_timeout_ticks) {
            tracing::info!(%user, "user timed out");
            self.disconnect(user);
        }

        let operations = self.registry.drain_operations();
        self.batcher.extend(operations, now);
        self.batcher.tick(now);
        self.distribute();
    }

    /// Flushes pending operations immediately, ignoring the time budget.
    pub fn flush(&mut self, now: Instant) {
        let operations = self.registry.drain_operations();
        self.batcher.extend(operations, now);
        self.batcher.flush();
        self.distribute();
    }

    fn handle_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Connected(user) => self.connect_socket(user),
            NetworkEvent::Payload { user, bytes } => {
                if !self.sockets.contains(&user) {
                    tracing::warn!(%user, len = bytes.len(), "payload from a user without socket, dropped");
                    return;
                }
                self.sessions.touch(user, self.tick, Some(UserStatus::Active));
                if self.decoder.submit(user, bytes).is_err() {
                    self.stats.malformed_messages += 1;
                }
            }
            NetworkEvent::Disconnected(user) => {
                if self.sockets.remove(&user) {
                    tracing::info!(%user, "socket closed");
                }
            }
        }
    }

    fn connect_socket(&mut self, user: UserId) {
        if !self.sessions.contains(user) {
            tracing::warn!(%user, "socket for unknown user refused");
            self.send_command(NetworkCommand::Close(user));
            return;
        }
        self.sockets.insert(user);
        self.sessions.touch(user, self.tick, Some(UserStatus::Active));
        tracing::info!(%user, "socket connected");

        if self.sessions.get(user).is_some_and(|s| s.delivery() == Delivery::Socket) {
            for transaction in self.sessions.take_pending(user).unwrap_or_default() {
                self.deliver(user, transaction);
            }
        }
    }

    /// Handles one decoded socket message from `source`.
    pub fn handle_message(&mut self, source: UserId, message: Message) -> ServerResult<()> {
        match message {
            Message::TrackingFrame(frame) => {
                self.check_sender(source, frame.user, "tracking frame")?;
                let bytes = Message::TrackingFrame(frame).to_bytes();
                let peers: Vec<UserId> = self.sockets.iter().copied().filter(|peer| *peer != source).collect();
                for peer in peers {
                    self.send_command(NetworkCommand::Send {
                        user: peer,
                        reliable: false,
                        bytes: bytes.clone(),
                    });
                }
                self.stats.relayed_frames += 1;
                Ok(())
            }
            Message::Interaction(request) => {
                self.check_sender(source, request.user, "interaction")?;
                if !self.registry.contains(request.entity) {
                    tracing::debug!(user = %source, entity = %request.entity, "interaction with unknown entity");
                    return Err(ServerError::UnknownEntity(request.entity));
                }
                self.interactions.push(request);
                Ok(())
            }
            Message::Transaction(transaction) => {
                tracing::warn!(user = %source, operations = transaction.len(), "client sent a transaction, ignored");
                Ok(())
            }
        }
    }

    fn check_sender(&mut self, source: UserId, claimed: UserId, what: &str) -> ServerResult<()> {
        if claimed == source && self.sessions.contains(claimed) {
            return Ok(());
        }
        self.stats.inconsistencies += 1;
        tracing::error!(%source, %claimed, what, "message does not belong to its connection");
        Err(ServerError::InternalInconsistency(format!(
            "{what} for {claimed} arrived on the connection of {source}"
        )))
    }

    /// Closes a session: registry overrides, socket and queue go with it.
    pub fn disconnect(&mut self, user: UserId) -> bool {
        let Some(session) = self.sessions.remove(user) else {
            return false;
        };
        self.registry.forget_user(user);
        if self.sockets.remove(&user) {
            self.send_command(NetworkCommand::Close(user));
        }
        tracing::info!(%user, login = session.login(), "user left");
        true
    }

    fn distribute(&mut self) {
        let flushed = std::mem::take(&mut self.batcher.sink_mut().flushed);
        for transaction in flushed {
            let recipients: Vec<UserId> = self
                .sessions
                .iter()
                .filter(|session| session.receives_updates())
                .map(UserSession::id)
                .collect();
            for user in recipients {
                if let Some(personal) = self.personalize(&transaction, user) {
                    self.deliver(user, personal);
                }
            }
        }
    }

    /// The part of a transaction `user` should see.
    fn personalize(&self, transaction: &Transaction, user: UserId) -> Option<Transaction> {
        let operations: Vec<Operation> = transaction
            .operations
            .iter()
            .filter(|operation| operation.users().contains(user))
            .filter_map(|operation| self.personalize_operation(operation, user))
            .collect();
        if operations.is_empty() {
            return None;
        }
        let reliable = transaction.reliable || operations.iter().any(Operation::is_structural);
        Some(Transaction { reliable, operations })
    }

    fn personalize_operation(&self, operation: &Operation, user: UserId) -> Option<Operation> {
        let load = |entity| {
            self.registry.descriptor(entity, user).map(|descriptor| Operation::LoadEntity {
                entity,
                descriptor: Some(descriptor),
                users: UserSet::only(user),
            })
        };
        match operation {
            Operation::LoadEntity { entity, .. } => load(*entity),
            // an entity turning visible arrives whole
            Operation::SetEntityProperty {
                entity,
                key,
                value: PropertyValue::Bool(true),
                ..
            } if *key == keys::ACTIVE => load(*entity).or_else(|| Some(operation.clone())),
            _ => Some(operation.clone().addressed_to(UserSet::only(user))),
        }
    }

    fn deliver(&mut self, user: UserId, transaction: Transaction) {
        let by_socket = self.sockets.contains(&user)
            && self.sessions.get(user).is_some_and(|s| s.delivery() == Delivery::Socket);
        self.stats.delivered_transactions += 1;
        if by_socket {
            self.send_command(NetworkCommand::Send {
                user,
                reliable: transaction.reliable,
                bytes: Message::Transaction(transaction).to_bytes(),
            });
        } else {
            self.sessions.enqueue(user, transaction);
        }
    }

    fn send_command(&mut self, command: NetworkCommand) -> bool {
        match self.commands.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.stats.dropped_commands += 1;
                tracing::warn!("transport command queue full, command dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.stats.dropped_commands += 1;
                if self.batcher.sink().available {
                    tracing::warn!("transport gone, network marked unavailable");
                    self.set_network_available(false);
                }
                false
            }
        }
    }

    /// Marks the network up or down. Batches flushed while down are dropped.
    pub fn set_network_available(&mut self, available: bool) {
        self.batcher.sink_mut().available = available;
    }

    /// Asks the transport to stop.
    pub fn shutdown(&mut self) {
        self.send_command(NetworkCommand::Shutdown);
    }

    /// Interaction requests received since the last call.
    pub fn drain_interactions(&mut self) -> Vec<InteractionRequest> {
        std::mem::take(&mut self.interactions)
    }

    /// The scene graph.
    #[must_use]
    pub const fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// The scene graph, for application logic.
    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    /// Connected users.
    #[must_use]
    pub const fn sessions(&self) -> &SessionDirectory {
        &self.sessions
    }

    /// Users with an open socket.
    pub fn sockets(&self) -> impl Iterator<Item = UserId> + '_ {
        self.sockets.iter().copied()
    }

    /// Batching counters.
    #[must_use]
    pub const fn batcher_stats(&self) -> &BatcherStats {
        self.batcher.stats()
    }

    /// Server counters.
    #[must_use]
    pub const fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Ticks run so far.
    #[must_use]
    pub const fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &Umi3dConfig {
        &self.config
    }
}
