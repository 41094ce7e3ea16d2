//! FIFO matchmaking.
//!
//! The queue owns the set of identities waiting for an opponent. Pairing
//! always takes the two longest-waiting entries, the earlier arrival
//! playing white. Callers serialize access (the server keeps the queue
//! behind one mutex and runs `enqueue` + `try_pair` under a single lock).

use crate::session::GameSession;
use crate::storage;
use crate::types::Identity;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use utoipa::ToSchema;

/// An identity waiting for an opponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WaitingEntry {
    #[schema(value_type = String)]
    pub identity: Identity,
    /// Unix timestamp when the identity joined the queue.
    pub enqueued_at: u64,
}

#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    waiting: VecDeque<WaitingEntry>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `identity` to the back of the queue. Returns `false` without
    /// changing anything if it is already waiting.
    pub fn enqueue(&mut self, identity: Identity) -> bool {
        if self.contains(&identity) {
            log::debug!("{} is already queued", identity);
            return false;
        }
        log::info!("{} joined matchmaking", identity);
        self.waiting.push_back(WaitingEntry {
            identity,
            enqueued_at: storage::unix_timestamp(),
        });
        true
    }

    /// Pairs the two longest-waiting identities into a new session, first
    /// as white and second as black. `None` with fewer than two waiting.
    pub fn try_pair(&mut self) -> Option<GameSession> {
        if self.waiting.len() < 2 {
            return None;
        }
        let white = self.waiting.pop_front()?.identity;
        let black = self.waiting.pop_front()?.identity;
        let session = GameSession::new(white, black);
        log::info!(
            "Paired {} (white) with {} (black) in session {}",
            session.white,
            session.black,
            session.id
        );
        Some(session)
    }

    /// Removes `identity` from the queue. Returns whether it was waiting.
    pub fn cancel(&mut self, identity: &Identity) -> bool {
        let before = self.waiting.len();
        self.waiting.retain(|entry| &entry.identity != identity);
        let removed = self.waiting.len() != before;
        if removed {
            log::info!("{} left matchmaking", identity);
        }
        removed
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.waiting.iter().any(|entry| &entry.identity == identity)
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Waiting entries, longest-waiting first.
    pub fn entries(&self) -> impl Iterator<Item = &WaitingEntry> {
        self.waiting.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Color;

    fn id(name: &str) -> Identity {
        Identity::new(name)
    }

    #[test]
    fn test_fifo_pairing() {
        let mut q = MatchmakingQueue::new();
        assert!(q.enqueue(id("a")));
        assert!(q.enqueue(id("b")));
        assert!(q.enqueue(id("c")));

        let session = q.try_pair().unwrap();
        assert_eq!(session.white, id("a"));
        assert_eq!(session.black, id("b"));
        assert_eq!(session.current_turn, Color::White);

        assert_eq!(q.len(), 1);
        assert!(q.contains(&id("c")));
        assert!(q.try_pair().is_none());

        q.enqueue(id("d"));
        let next = q.try_pair().unwrap();
        assert_eq!((next.white, next.black), (id("c"), id("d")));
        assert!(q.is_empty());
    }

    #[test]
    fn test_enqueue_twice_is_noop() {
        let mut q = MatchmakingQueue::new();
        assert!(q.enqueue(id("a")));
        assert!(!q.enqueue(id("a")));
        assert_eq!(q.len(), 1);
        assert!(q.try_pair().is_none());
    }

    #[test]
    fn test_cancel() {
        let mut q = MatchmakingQueue::new();
        q.enqueue(id("a"));
        q.enqueue(id("b"));
        assert!(q.cancel(&id("a")));
        assert!(!q.cancel(&id("a")));
        assert!(!q.cancel(&id("nobody")));
        assert_eq!(q.entries().map(|e| e.identity.clone()).collect::<Vec<_>>(), vec![id("b")]);
    }
}
