//! # User Sessions
//!
//! Who is connected, how they receive updates, and when they were last heard
//! from.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::codec::{ByteReader, ByteWriter, Decode, Encode};
use crate::error::{ServerError, ServerResult};
use crate::protocol::Transaction;

/// Identifier of a connected user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u32);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user_{}", self.0)
    }
}

impl Encode for UserId {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_u32(self.0);
    }
}

impl Decode for UserId {
    fn decode(reader: &mut ByteReader<'_>) -> Option<Self> {
        reader.read_u32().map(Self)
    }
}

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserStatus {
    /// Logged in, nothing loaded yet
    Created,
    /// Scene loaded
    Ready,
    /// Traffic seen on the socket
    Active,
    /// Silent past the timeout; dropped if silence continues
    Missing,
}

/// How a user receives transactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// Pushed on the socket channel
    Socket,
    /// Queued until the next `/update`
    Polling,
}

/// One connected user.
#[derive(Clone, Debug)]
pub struct UserSession {
    id: UserId,
    login: String,
    status: UserStatus,
    delivery: Delivery,
    last_seen_tick: u64,
    pending: VecDeque<Transaction>,
    overflowed: u64,
}

impl UserSession {
    /// Identifier.
    #[must_use]
    pub const fn id(&self) -> UserId {
        self.id
    }

    /// Login name.
    #[must_use]
    pub fn login(&self) -> &str {
        &self.login
    }

    /// Status.
    #[must_use]
    pub const fn status(&self) -> UserStatus {
        self.status
    }

    /// Delivery mode.
    #[must_use]
    pub const fn delivery(&self) -> Delivery {
        self.delivery
    }

    /// Tick of the last request or message.
    #[must_use]
    pub const fn last_seen_tick(&self) -> u64 {
        self.last_seen_tick
    }

    /// Transactions waiting for `/update`.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Transactions discarded because the polling queue was full.
    #[must_use]
    pub const fn overflowed(&self) -> u64 {
        self.overflowed
    }

    /// Whether flushed transactions are addressed to this user yet.
    #[must_use]
    pub const fn receives_updates(&self) -> bool {
        !matches!(self.status, UserStatus::Created)
    }
}

/// Every session of an environment.
#[derive(Debug)]
pub struct SessionDirectory {
    sessions: BTreeMap<UserId, UserSession>,
    next_id: u32,
    max_users: usize,
    max_pending: usize,
}

impl SessionDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new(max_users: usize, max_pending: usize) -> Self {
        Self {
            sessions: BTreeMap::new(),
            next_id: 1,
            max_users,
            max_pending,
        }
    }

    /// Opens a session.
    pub fn login(&mut self, login: &str, delivery: Delivery, tick: u64) -> ServerResult<UserId> {
        if self.sessions.len() >= self.max_users {
            return Err(ServerError::Full(self.max_users));
        }
        let id = UserId(self.next_id);
        self.next_id += 1;
        self.sessions.insert(
            id,
            UserSession {
                id,
                login: login.to_string(),
                status: UserStatus::Created,
                delivery,
                last_seen_tick: tick,
                pending: VecDeque::new(),
                overflowed: 0,
            },
        );
        Ok(id)
    }

    /// Closes a session.
    pub fn remove(&mut self, user: UserId) -> Option<UserSession> {
        self.sessions.remove(&user)
    }

    /// Looks up a session.
    #[must_use]
    pub fn get(&self, user: UserId) -> Option<&UserSession> {
        self.sessions.get(&user)
    }

    /// Returns true if the user is connected.
    #[must_use]
    pub fn contains(&self, user: UserId) -> bool {
        self.sessions.contains_key(&user)
    }

    /// Number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true when nobody is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions, ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &UserSession> + '_ {
        self.sessions.values()
    }

    /// Records traffic from a user, promoting it to at least `status`.
    pub fn touch(&mut self, user: UserId, tick: u64, status: Option<UserStatus>) -> bool {
        let Some(session) = self.sessions.get_mut(&user) else {
            return false;
        };
        session.last_seen_tick = tick;
        session.status = match (session.status, status) {
            (UserStatus::Missing, None) => UserStatus::Active,
            (current, None) => current,
            (UserStatus::Active, Some(UserStatus::Ready)) => UserStatus::Active,
            (_, Some(next)) => next,
        };
        true
    }

    /// Switches the delivery mode of a user.
    pub fn set_delivery(&mut self, user: UserId, delivery: Delivery) -> bool {
        match self.sessions.get_mut(&user) {
            Some(session) => {
                session.delivery = delivery;
                true
            }
            None => false,
        }
    }

    /// Queues a transaction for a polling user, dropping the oldest when full.
    pub fn enqueue(&mut self, user: UserId, transaction: Transaction) {
        let max_pending = self.max_pending;
        let Some(session) = self.sessions.get_mut(&user) else {
            return;
        };
        if max_pending > 0 && session.pending.len() >= max_pending {
            session.pending.pop_front();
            session.overflowed += 1;
            tracing::warn!(%user, max_pending, "polling queue full, oldest update dropped");
        }
        session.pending.push_back(transaction);
    }

    /// Takes every transaction queued for a polling user.
    pub fn take_pending(&mut self, user: UserId) -> Option<Vec<Transaction>> {
        self.sessions
            .get_mut(&user)
            .map(|session| session.pending.drain(..).collect())
    }

    /// Marks silent users missing and returns the ones silent for twice the
    /// timeout.
    pub fn expire(&mut self, tick: u64, timeout: u64) -> Vec<UserId> {
        if timeout == 0 {
            return Vec::new();
        }
        let mut expired = Vec::new();
        for session in self.sessions.values_mut() {
            let silence = tick.saturating_sub(session.last_seen_tick);
            if silence > timeout.saturating_mul(2) {
                expired.push(session.id);
            } else if silence > timeout && session.status != UserStatus::Missing {
                tracing::warn!(user = %session.id, silence, "user went silent");
                session.status = UserStatus::Missing;
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_allocates_fresh_ids() {
        let mut sessions = SessionDirectory::new(2, 8);
        let a = sessions.login("alice", Delivery::Socket, 0).unwrap();
        let b = sessions.login("bob", Delivery::Polling, 0).unwrap();
        assert_ne!(a, b);
        assert_eq!(sessions.login("carol", Delivery::Socket, 0), Err(ServerError::Full(2)));

        sessions.remove(a);
        let c = sessions.login("carol", Delivery::Socket, 0).unwrap();
        assert_ne!(c, a);
        assert_eq!(sessions.get(c).map(UserSession::login), Some("carol"));
    }

    #[test]
    fn test_status_progression() {
        let mut sessions = SessionDirectory::new(4, 8);
        let user = sessions.login("alice", Delivery::Socket, 0).unwrap();
        assert_eq!(sessions.get(user).unwrap().status(), UserStatus::Created);
        assert!(!sessions.get(user).unwrap().receives_updates());

        sessions.touch(user, 1, Some(UserStatus::Ready));
        sessions.touch(user, 2, Some(UserStatus::Active));
        // a later /load does not demote
        sessions.touch(user, 3, Some(UserStatus::Ready));
        assert_eq!(sessions.get(user).unwrap().status(), UserStatus::Active);
    }

    #[test]
    fn test_expiry_goes_through_missing() {
        let mut sessions = SessionDirectory::new(4, 8);
        let user = sessions.login("alice", Delivery::Socket, 0).unwrap();

        assert!(sessions.expire(11, 10).is_empty());
        assert_eq!(sessions.get(user).unwrap().status(), UserStatus::Missing);

        sessions.touch(user, 12, None);
        assert_eq!(sessions.get(user).unwrap().status(), UserStatus::Active);

        assert_eq!(sessions.expire(33, 10), vec![user]);
        assert!(sessions.expire(1_000, 0).is_empty());
    }

    #[test]
    fn test_polling_queue_is_bounded() {
        let mut sessions = SessionDirectory::new(4, 2);
        let user = sessions.login("bob", Delivery::Polling, 0).unwrap();
        for reliable in [true, false, false] {
            sessions.enqueue(
                user,
                Transaction {
                    reliable,
                    operations: Vec::new(),
                },
            );
        }
        assert_eq!(sessions.get(user).unwrap().overflowed(), 1);
        let pending = sessions.take_pending(user).unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|t| !t.reliable));
        assert_eq!(sessions.take_pending(UserId(99)), None);
    }
}
