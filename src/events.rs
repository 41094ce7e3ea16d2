//! Outbound events pushed to connected players.
//!
//! The session directory decides *who* receives which event; a
//! [`Notifier`] implementation decides *how* it reaches them (the
//! websocket client registry in production, a recorder in tests).

use crate::types::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An unsolicited message for one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A session was created for this player.
    GameFound {
        session_id: Uuid,
        color: Color,
        opponent: Identity,
    },
    /// The opponent played a move.
    OpponentMove {
        session_id: Uuid,
        from: Position,
        to: Position,
        #[serde(default)]
        promotion: Option<PieceKind>,
        /// Whether the receiving player is now in check.
        in_check: bool,
    },
    /// The session completed. `winner` is `null` for draws and aborts.
    GameOver {
        session_id: Uuid,
        winner: Option<Identity>,
        reason: EndReason,
    },
    DrawRequested {
        session_id: Uuid,
        by: Identity,
    },
    DrawAccepted {
        session_id: Uuid,
    },
}

impl ServerEvent {
    /// The event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::GameFound { .. } => "game_found",
            ServerEvent::OpponentMove { .. } => "opponent_move",
            ServerEvent::GameOver { .. } => "game_over",
            ServerEvent::DrawRequested { .. } => "draw_requested",
            ServerEvent::DrawAccepted { .. } => "draw_accepted",
        }
    }

    pub(crate) fn game_over(session_id: Uuid, completion: &Completion) -> Self {
        ServerEvent::GameOver {
            session_id,
            winner: completion.winner().cloned(),
            reason: completion.reason,
        }
    }
}

/// Delivers events to players. Delivery is best effort: a player with no
/// live connection simply misses the event.
pub trait Notifier: Send + Sync {
    fn notify(&self, recipient: &Identity, event: ServerEvent);
}

/// Notifier that drops every event, for headless use.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _recipient: &Identity, _event: ServerEvent) {}
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Captures every event in delivery order.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(Identity, ServerEvent)>>,
    }

    impl RecordingNotifier {
        /// Events delivered to `recipient`, in order.
        pub fn events_for(&self, recipient: &str) -> Vec<ServerEvent> {
            self.sent
                .lock()
                .iter()
                .filter(|(to, _)| to.as_str() == recipient)
                .map(|(_, ev)| ev.clone())
                .collect()
        }

        pub fn clear(&self) {
            self.sent.lock().clear();
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, recipient: &Identity, event: ServerEvent) {
            self.sent.lock().push((recipient.clone(), event));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_serialize_with_tag() {
        let id = Uuid::nil();
        let ev = ServerEvent::GameOver {
            session_id: id,
            winner: None,
            reason: EndReason::DrawAgreement,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "game_over");
        assert_eq!(json["reason"], "draw_agreement");
        assert!(json["winner"].is_null());
        assert_eq!(ev.name(), "game_over");

        let ev = ServerEvent::GameFound {
            session_id: id,
            color: Color::Black,
            opponent: Identity::new("alice"),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "game_found");
        assert_eq!(json["color"], "black");
        assert_eq!(json["opponent"], "alice");
    }
}
