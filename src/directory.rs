//! Live session directory.
//!
//! Maps session ids to their state machines, routes player actions to the
//! right session and sends the resulting events to the participants.
//! Every completion is persisted to the record store and the session is
//! dropped from the directory right after. A record the store refuses is
//! kept in an unsaved list and retried on every later completion and by
//! [`SessionDirectory::flush_unsaved`], so a completed game is never lost
//! to a transient storage failure.
//!
//! Locking: each session sits behind its own mutex, taken for the whole
//! read-modify-write of one action. The map lock is only held to look up,
//! insert or remove an entry and is never held while waiting on a session
//! lock, so actions on different sessions run in parallel.

use crate::error::GameError;
use crate::events::{Notifier, ServerEvent};
use crate::session::{GameSession, MoveApplied, SessionSummary};
use crate::storage::{GameRecord, RecordStore};
use crate::types::*;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub type SharedSession = Arc<Mutex<GameSession>>;

pub struct SessionDirectory {
    sessions: RwLock<HashMap<Uuid, SharedSession>>,
    /// Completed records whose save failed, oldest first.
    unsaved: Mutex<Vec<GameRecord>>,
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
}

impl SessionDirectory {
    pub fn new(store: Arc<dyn RecordStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            unsaved: Mutex::new(Vec::new()),
            store,
            notifier,
        }
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    /// Registers a session without notifying anyone.
    pub fn create(&self, session: GameSession) -> SharedSession {
        let id = session.id;
        let shared = Arc::new(Mutex::new(session));
        self.sessions.write().insert(id, Arc::clone(&shared));
        shared
    }

    pub fn get(&self, id: Uuid) -> Result<SharedSession, GameError> {
        self.sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or(GameError::SessionNotFound(id))
    }

    pub fn remove(&self, id: Uuid) -> Option<SharedSession> {
        self.sessions.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Runs `f` against a locked session.
    pub fn with_session<R>(&self, id: Uuid, f: impl FnOnce(&GameSession) -> R) -> Result<R, GameError> {
        let shared = self.get(id)?;
        let session = shared.lock();
        Ok(f(&*session))
    }

    /// Clones the handles out so no session lock is taken under the map lock.
    fn snapshot(&self) -> Vec<SharedSession> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut list: Vec<SessionSummary> = self
            .snapshot()
            .iter()
            .map(|shared| shared.lock().summary())
            .collect();
        list.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        list
    }

    /// The live session `identity` plays in, if any.
    pub fn session_of(&self, identity: &Identity) -> Option<Uuid> {
        self.snapshot().iter().find_map(|shared| {
            let session = shared.lock();
            session.color_of(identity).map(|_| session.id)
        })
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    /// Registers a freshly paired session and tells both players.
    pub fn start_session(&self, session: GameSession) -> Uuid {
        let id = session.id;
        let (white, black) = (session.white.clone(), session.black.clone());
        self.create(session);
        log::info!("Session {} started: {} vs {}", id, white, black);

        self.notifier.notify(
            &white,
            ServerEvent::GameFound {
                session_id: id,
                color: Color::White,
                opponent: black.clone(),
            },
        );
        self.notifier.notify(
            &black,
            ServerEvent::GameFound {
                session_id: id,
                color: Color::Black,
                opponent: white,
            },
        );
        id
    }

    /// Plays a move. The opponent receives `opponent_move`; a move that ends
    /// the game also sends `game_over` to both players.
    pub fn route_move(&self, id: Uuid, identity: &Identity, mv: Move) -> Result<MoveApplied, GameError> {
        let shared = self.get(id)?;
        let (applied, opponent, record) = {
            let mut session = shared.lock();
            let applied = session.apply_move(identity, mv).inspect_err(|e| {
                log::debug!("Session {}: rejected {} from {}: {}", id, mv, identity, e);
            })?;
            let opponent = session.player(applied.mover.opponent()).clone();
            (applied, opponent, session.to_record())
        };

        self.notifier.notify(
            &opponent,
            ServerEvent::OpponentMove {
                session_id: id,
                from: applied.mv.from,
                to: applied.mv.to,
                promotion: applied.mv.promotion,
                in_check: applied.in_check,
            },
        );

        if let Some(completion) = &applied.completion {
            let event = ServerEvent::game_over(id, completion);
            self.finish(record, &[identity.clone(), opponent], Some(event));
        }
        Ok(applied)
    }

    pub fn route_resign(&self, id: Uuid, identity: &Identity) -> Result<Completion, GameError> {
        self.route_forfeit(id, identity, GameSession::resign)
    }

    pub fn route_quit(&self, id: Uuid, identity: &Identity) -> Result<Completion, GameError> {
        self.route_forfeit(id, identity, GameSession::quit)
    }

    fn route_forfeit(
        &self,
        id: Uuid,
        identity: &Identity,
        action: fn(&mut GameSession, &Identity) -> Result<Completion, GameError>,
    ) -> Result<Completion, GameError> {
        let shared = self.get(id)?;
        let (completion, record) = {
            let mut session = shared.lock();
            let completion = action(&mut *session, identity)?;
            (completion, session.to_record())
        };
        let remaining = completion.winner().cloned().into_iter().collect::<Vec<_>>();
        let event = ServerEvent::game_over(id, &completion);
        self.finish(record, &remaining, Some(event));
        Ok(completion)
    }

    /// Records a draw offer and forwards it to the opponent.
    pub fn route_offer_draw(&self, id: Uuid, identity: &Identity) -> Result<(), GameError> {
        let shared = self.get(id)?;
        let opponent = {
            let mut session = shared.lock();
            session.offer_draw(identity)?;
            session.opponent_of(identity).cloned()
        };
        if let Some(opponent) = opponent {
            self.notifier.notify(
                &opponent,
                ServerEvent::DrawRequested {
                    session_id: id,
                    by: identity.clone(),
                },
            );
        }
        Ok(())
    }

    /// Accepts a pending offer; the offerer receives `draw_accepted`.
    pub fn route_accept_draw(&self, id: Uuid, identity: &Identity) -> Result<Completion, GameError> {
        let shared = self.get(id)?;
        let (completion, offerer, record) = {
            let mut session = shared.lock();
            let completion = session.accept_draw(identity)?;
            let offerer = session.opponent_of(identity).cloned();
            (completion, offerer, session.to_record())
        };
        self.finish(record, &[], None);
        if let Some(offerer) = offerer {
            self.notifier
                .notify(&offerer, ServerEvent::DrawAccepted { session_id: id });
        }
        Ok(completion)
    }

    /// Declines a pending offer. Nobody else is told.
    pub fn route_reject_draw(&self, id: Uuid, identity: &Identity) -> Result<(), GameError> {
        let shared = self.get(id)?;
        let mut session = shared.lock();
        session.reject_draw(identity)
    }

    /// Ends a session administratively and tells both players.
    pub fn abort(&self, id: Uuid) -> Result<Completion, GameError> {
        let shared = self.get(id)?;
        let (completion, players, record) = {
            let mut session = shared.lock();
            let completion = session.abort().ok_or(GameError::SessionNotFound(id))?;
            let players = [session.white.clone(), session.black.clone()];
            (completion, players, session.to_record())
        };
        log::warn!("Session {} aborted", id);
        let event = ServerEvent::game_over(id, &completion);
        self.finish(record, &players, Some(event));
        Ok(completion)
    }

    /// Completes every live session `identity` plays in, in the opponent's
    /// favour. Sessions already completed are left alone, so repeated
    /// signals for the same identity do nothing.
    pub fn route_disconnect(&self, identity: &Identity) -> Vec<(Uuid, Completion)> {
        let mut finished = Vec::new();
        for shared in self.snapshot() {
            let outcome = {
                let mut session = shared.lock();
                session
                    .handle_disconnect(identity)
                    .map(|completion| (session.id, completion, session.to_record()))
            };
            if let Some((id, completion, record)) = outcome {
                let remaining = completion.winner().cloned().into_iter().collect::<Vec<_>>();
                let event = ServerEvent::game_over(id, &completion);
                self.finish(record, &remaining, Some(event));
                finished.push((id, completion));
            }
        }
        finished
    }

    /// Persists a completed session, drops it from the map and sends
    /// `event` to `recipients`.
    fn finish(&self, record: GameRecord, recipients: &[Identity], event: Option<ServerEvent>) {
        let id = record.id;
        self.flush_unsaved();
        if let Err(record) = self.persist(record) {
            self.unsaved.lock().push(record);
        }
        self.remove(id);

        if let Some(event) = event {
            for recipient in recipients {
                self.notifier.notify(recipient, event.clone());
            }
        }
    }
}

impl SessionDirectory {
    /// Saves one record, handing it back if the store failed.
    fn persist(&self, record: GameRecord) -> Result<(), GameRecord> {
        match self.store.save_game(&record) {
            Ok(true) => {
                log::info!("Session {} persisted", record.id);
                Ok(())
            }
            Ok(false) => {
                log::debug!("Session {} was already persisted", record.id);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to persist session {}, will retry: {}", record.id, e);
                Err(record)
            }
        }
    }

    /// Retries every record whose save failed. Returns how many are still
    /// unsaved.
    pub fn flush_unsaved(&self) -> usize {
        let pending = std::mem::take(&mut *self.unsaved.lock());
        if pending.is_empty() {
            return 0;
        }
        let failed: Vec<GameRecord> = pending
            .into_iter()
            .filter_map(|record| self.persist(record).err())
            .collect();
        let mut unsaved = self.unsaved.lock();
        unsaved.extend(failed);
        unsaved.len()
    }

    /// Completed records not yet in the store.
    pub fn unsaved_count(&self) -> usize {
        self.unsaved.lock().len()
    }
}
