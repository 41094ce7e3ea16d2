//! Error types for the chess server.
//!
//! Every rejection leaves the session, queue and store unchanged; none of
//! these errors are fatal to the process.

use uuid::Uuid;

/// Errors returned when a player action is rejected by a session or the
/// session directory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// Wrong mover, non-participant mover, or session already completed.
    #[error("It is not your turn")]
    NotYourTurn,

    /// Destination not legal, wrong piece, or invalid promotion kind.
    #[error("Illegal move: {0}")]
    IllegalMove(String),

    /// Stale or unknown session id.
    #[error("Session {0} not found")]
    SessionNotFound(Uuid),

    /// The identity does not play in this session.
    #[error("You are not a participant in this session")]
    NotAParticipant,

    /// Accept/reject without a pending offer from the opponent.
    #[error("There is no pending draw offer from your opponent")]
    NoDrawOffer,
}

impl GameError {
    /// Stable machine-readable name sent to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            GameError::NotYourTurn => "NotYourTurn",
            GameError::IllegalMove(_) => "IllegalMove",
            GameError::SessionNotFound(_) => "SessionNotFound",
            GameError::NotAParticipant => "NotAParticipant",
            GameError::NoDrawOffer => "NoDrawOffer",
        }
    }
}

/// Errors from the record store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Errors from registration and login.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Username is already taken")]
    UsernameTaken,

    #[error("Username must be 3-32 characters of letters, digits, '_' or '-'")]
    InvalidUsername,

    #[error("Password must not be empty")]
    EmptyPassword,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_variant_names() {
        assert_eq!(GameError::NotYourTurn.code(), "NotYourTurn");
        assert_eq!(GameError::IllegalMove("x".into()).code(), "IllegalMove");
        assert_eq!(GameError::SessionNotFound(Uuid::nil()).code(), "SessionNotFound");
    }

    #[test]
    fn test_messages_carry_detail() {
        let err = GameError::IllegalMove("e2 to e5 is not reachable".into());
        assert_eq!(err.to_string(), "Illegal move: e2 to e5 is not reachable");
    }
}
