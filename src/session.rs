//! Game session state machine.
//!
//! A [`GameSession`] is the single authority over one game between two
//! identities: it owns the board, the turn flag and the castling rights,
//! decides whether a proposed move is legal, applies it and detects the
//! end of the game. Every mutation goes through a method here; a rejected
//! action returns an error and leaves the session exactly as it was.
//!
//! States are `ongoing -> completed`. Once completed, moves and other
//! player actions are refused, and disconnect signals are ignored.

use crate::error::GameError;
use crate::legality;
use crate::storage::{self, GameRecord};
use crate::types::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// GameSession
// ---------------------------------------------------------------------------

/// One two-player game.
#[derive(Debug, Clone)]
pub struct GameSession {
    /// Unique identifier for the session.
    pub id: Uuid,

    /// Player of the white pieces.
    pub white: Identity,

    /// Player of the black pieces.
    pub black: Identity,

    /// Current board position.
    pub board: Board,

    /// Side to move.
    pub current_turn: Color,

    /// Castling flags.
    pub castling: CastlingRights,

    pub status: SessionStatus,

    /// Result and reason, set exactly when `status` is `Completed`.
    pub completion: Option<Completion>,

    /// Color of the player with a pending draw offer.
    pub draw_offer: Option<Color>,

    /// Unix timestamp when the session was created.
    pub created_at: u64,

    /// Unix timestamp when the session completed (0 while ongoing).
    pub completed_at: u64,
}

/// Outcome of an accepted move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveApplied {
    /// The move as played. `promotion` is set only when a pawn promoted,
    /// and then names the piece it became.
    pub mv: Move,
    pub mover: Color,
    /// Board after the move.
    pub board: Board,
    /// Side to move after the move.
    pub turn: Color,
    /// Whether the side to move is now in check.
    pub in_check: bool,
    /// Set when this move ended the game.
    pub completion: Option<Completion>,
}

impl GameSession {
    /// Creates a new session from the standard starting position.
    pub fn new(white: Identity, black: Identity) -> Self {
        Self::from_position(
            white,
            black,
            Board::standard_setup(),
            Color::White,
            CastlingRights::default(),
        )
    }

    /// Creates a session from an arbitrary position.
    pub fn from_position(
        white: Identity,
        black: Identity,
        board: Board,
        current_turn: Color,
        castling: CastlingRights,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            white,
            black,
            board,
            current_turn,
            castling,
            status: SessionStatus::Ongoing,
            completion: None,
            draw_offer: None,
            created_at: storage::unix_timestamp(),
            completed_at: 0,
        }
    }

    /// Returns `true` once the session has completed.
    pub fn is_over(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    /// The color `identity` plays, or `None` for strangers.
    pub fn color_of(&self, identity: &Identity) -> Option<Color> {
        if &self.white == identity {
            Some(Color::White)
        } else if &self.black == identity {
            Some(Color::Black)
        } else {
            None
        }
    }

    /// Returns the identity playing `color`.
    pub fn player(&self, color: Color) -> &Identity {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }

    /// The other participant, or `None` if `identity` does not play here.
    pub fn opponent_of(&self, identity: &Identity) -> Option<&Identity> {
        self.color_of(identity).map(|c| self.player(c.opponent()))
    }

    /// Whether the side to move is in check.
    pub fn in_check(&self) -> bool {
        legality::is_in_check(&self.board, self.current_turn)
    }

    /// Legal destinations of the piece on `from` under the session's
    /// castling flags. Ignores whose turn it is.
    pub fn legal_moves_from(&self, from: Position) -> Vec<crate::movegen::Destination> {
        legality::legal_moves(&self.board, from, &self.castling)
    }

    /// Validates and plays a move for `identity`.
    ///
    /// Returns `NotYourTurn` when the session is over or it is not this
    /// identity's turn (strangers included), and `IllegalMove` when the
    /// move is not legal. Both leave the session untouched.
    pub fn apply_move(&mut self, identity: &Identity, mv: Move) -> Result<MoveApplied, GameError> {
        if self.is_over() || self.color_of(identity) != Some(self.current_turn) {
            return Err(GameError::NotYourTurn);
        }
        let mover = self.current_turn;

        let piece = match self.board.get(mv.from) {
            None => return Err(GameError::IllegalMove(format!("No piece on {}", mv.from))),
            Some(p) if p.color != mover => {
                return Err(GameError::IllegalMove(format!(
                    "Piece on {} belongs to {}",
                    mv.from, p.color
                )));
            }
            Some(p) => p,
        };

        if let Some(kind) = mv.promotion
            && !kind.is_promotion_target()
        {
            return Err(GameError::IllegalMove(format!("Cannot promote to a {}", kind)));
        }

        let destinations = legality::legal_moves(&self.board, mv.from, &self.castling);
        let dest = match destinations.iter().find(|d| d.to == mv.to) {
            Some(d) => *d,
            None => {
                let available: Vec<String> =
                    destinations.iter().map(|d| d.to.to_algebraic()).collect();
                return Err(GameError::IllegalMove(if available.is_empty() {
                    format!("{} on {} has no legal moves", piece.kind, mv.from)
                } else {
                    format!(
                        "{} to {} is not legal. Legal moves from {}: {}",
                        mv.from,
                        mv.to,
                        mv.from,
                        available.join(", ")
                    )
                }));
            }
        };

        let played = Move {
            from: mv.from,
            to: mv.to,
            promotion: dest.promotes.then(|| mv.promotion.unwrap_or(PieceKind::Queen)),
        };

        legality::apply_move_to_board(&mut self.board, &played);
        self.castling.record_move(piece, played.from, played.to);
        self.current_turn = mover.opponent();
        self.draw_offer = None;

        log::debug!("Session {}: {} played {}", self.id, mover, played);

        let opponent = self.current_turn;
        let completion = if legality::is_checkmate(&self.board, opponent) {
            Some(self.complete(Completion::win(identity.clone(), EndReason::Checkmate)))
        } else if legality::is_stalemate(&self.board, opponent, &self.castling) {
            Some(self.complete(Completion::draw(EndReason::Stalemate)))
        } else {
            None
        };

        Ok(MoveApplied {
            mv: played,
            mover,
            board: self.board.clone(),
            turn: self.current_turn,
            in_check: self.in_check(),
            completion,
        })
    }

    /// Concedes the game for `identity`.
    pub fn resign(&mut self, identity: &Identity) -> Result<Completion, GameError> {
        self.forfeit(identity, EndReason::Resignation)
    }

    /// Leaves the game for `identity`; the opponent wins.
    pub fn quit(&mut self, identity: &Identity) -> Result<Completion, GameError> {
        self.forfeit(identity, EndReason::Quit)
    }

    fn forfeit(&mut self, identity: &Identity, reason: EndReason) -> Result<Completion, GameError> {
        if self.is_over() {
            return Err(GameError::NotYourTurn);
        }
        let winner = self
            .opponent_of(identity)
            .cloned()
            .ok_or(GameError::NotAParticipant)?;
        Ok(self.complete(Completion::win(winner, reason)))
    }

    /// Handles a lost connection. Completes the session in the opponent's
    /// favour; returns `None` when already completed or when `identity`
    /// does not play here.
    pub fn handle_disconnect(&mut self, identity: &Identity) -> Option<Completion> {
        if self.is_over() {
            return None;
        }
        let winner = self.opponent_of(identity)?.clone();
        Some(self.complete(Completion::win(winner, EndReason::Disconnected)))
    }

    /// Records a draw offer from `identity`.
    pub fn offer_draw(&mut self, identity: &Identity) -> Result<(), GameError> {
        let color = self.acting_color(identity)?;
        self.draw_offer = Some(color);
        Ok(())
    }

    /// Accepts the opponent's pending draw offer.
    pub fn accept_draw(&mut self, identity: &Identity) -> Result<Completion, GameError> {
        self.take_opponent_offer(identity)?;
        Ok(self.complete(Completion::draw(EndReason::DrawAgreement)))
    }

    /// Declines the opponent's pending draw offer. The game continues.
    pub fn reject_draw(&mut self, identity: &Identity) -> Result<(), GameError> {
        self.take_opponent_offer(identity)
    }

    fn take_opponent_offer(&mut self, identity: &Identity) -> Result<(), GameError> {
        let color = self.acting_color(identity)?;
        if self.draw_offer != Some(color.opponent()) {
            return Err(GameError::NoDrawOffer);
        }
        self.draw_offer = None;
        Ok(())
    }

    fn acting_color(&self, identity: &Identity) -> Result<Color, GameError> {
        if self.is_over() {
            return Err(GameError::NotYourTurn);
        }
        self.color_of(identity).ok_or(GameError::NotAParticipant)
    }

    /// Ends the session administratively. `None` if already completed.
    pub fn abort(&mut self) -> Option<Completion> {
        if self.is_over() {
            return None;
        }
        Some(self.complete(Completion::aborted()))
    }

    fn complete(&mut self, completion: Completion) -> Completion {
        self.status = SessionStatus::Completed;
        self.completed_at = storage::unix_timestamp();
        self.draw_offer = None;
        self.completion = Some(completion.clone());
        log::info!(
            "Session {} completed: {} ({})",
            self.id,
            completion.winner().map_or("no winner", Identity::as_str),
            completion.reason
        );
        completion
    }

    /// Builds the persisted form of this session.
    pub fn to_record(&self) -> GameRecord {
        GameRecord {
            id: self.id,
            white: self.white.clone(),
            black: self.black.clone(),
            winner: self.completion.as_ref().and_then(|c| c.winner().cloned()),
            status: self.status,
            reason: self.completion.as_ref().map(|c| c.reason),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }

    /// Builds the API view of this session.
    pub fn view(&self) -> SessionView {
        SessionView {
            session_id: self.id.to_string(),
            white: self.white.clone(),
            black: self.black.clone(),
            board: self.board.to_rows(),
            current_turn: self.current_turn,
            castling: self.castling,
            status: self.status,
            in_check: self.in_check(),
            draw_offer: self.draw_offer,
            winner: self.completion.as_ref().and_then(|c| c.winner().cloned()),
            reason: self.completion.as_ref().map(|c| c.reason),
            created_at: self.created_at,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.to_string(),
            white: self.white.clone(),
            black: self.black.clone(),
            current_turn: self.current_turn,
            status: self.status,
        }
    }
}

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

/// Full state of a live session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionView {
    pub session_id: String,
    #[schema(value_type = String)]
    pub white: Identity,
    #[schema(value_type = String)]
    pub black: Identity,
    /// 8 rows of FEN letters, `.` for empty, row 0 (rank 8) first.
    pub board: Vec<String>,
    pub current_turn: Color,
    pub castling: CastlingRights,
    pub status: SessionStatus,
    /// Whether the side to move is in check.
    pub in_check: bool,
    /// Color with a pending draw offer.
    pub draw_offer: Option<Color>,
    #[schema(value_type = Option<String>)]
    pub winner: Option<Identity>,
    pub reason: Option<EndReason>,
    pub created_at: u64,
}

/// Summary information about a live session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionSummary {
    pub session_id: String,
    #[schema(value_type = String)]
    pub white: Identity,
    #[schema(value_type = String)]
    pub black: Identity,
    pub current_turn: Color,
    pub status: SessionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity::new("alice")
    }

    fn bob() -> Identity {
        Identity::new("bob")
    }

    fn uci(s: &str) -> Move {
        Move::from_uci(s).unwrap()
    }

    fn sq(s: &str) -> Position {
        Position::from_algebraic(s).unwrap()
    }

    fn session_with(rows: [&str; 8], turn: Color, castling: CastlingRights) -> GameSession {
        let board = Board::from_rows(&rows).unwrap();
        GameSession::from_position(alice(), bob(), board, turn, castling)
    }

    #[test]
    fn test_fools_mate() {
        let mut s = GameSession::new(alice(), bob());
        s.apply_move(&alice(), uci("f2f3")).unwrap();
        s.apply_move(&bob(), uci("e7e5")).unwrap();
        s.apply_move(&alice(), uci("g2g4")).unwrap();
        let applied = s.apply_move(&bob(), uci("d8h4")).unwrap();

        assert!(applied.in_check);
        assert_eq!(
            applied.completion,
            Some(Completion::win(bob(), EndReason::Checkmate))
        );
        assert_eq!(s.status, SessionStatus::Completed);
        assert!(legality::is_checkmate(&s.board, Color::White));
        assert_eq!(s.to_record().winner, Some(bob()));

        // No further moves once completed
        assert_eq!(s.apply_move(&alice(), uci("e2e4")), Err(GameError::NotYourTurn));
    }

    #[test]
    fn test_turn_alternates() {
        let mut s = GameSession::new(alice(), bob());
        assert_eq!(s.current_turn, Color::White);
        let applied = s.apply_move(&alice(), uci("e2e4")).unwrap();
        assert_eq!(applied.turn, Color::Black);
        assert_eq!(s.current_turn, Color::Black);
        s.apply_move(&bob(), uci("c7c5")).unwrap();
        assert_eq!(s.current_turn, Color::White);
    }

    #[test]
    fn test_rejected_moves_leave_state_unchanged() {
        let mut s = GameSession::new(alice(), bob());
        let before = s.board.clone();

        // Out of turn
        assert_eq!(s.apply_move(&bob(), uci("e7e5")), Err(GameError::NotYourTurn));
        // Stranger
        assert_eq!(
            s.apply_move(&Identity::new("mallory"), uci("e2e4")),
            Err(GameError::NotYourTurn)
        );
        // Opponent's piece
        assert!(matches!(s.apply_move(&alice(), uci("e7e5")), Err(GameError::IllegalMove(_))));
        // Empty square
        assert!(matches!(s.apply_move(&alice(), uci("e4e5")), Err(GameError::IllegalMove(_))));
        // Unreachable destination
        assert!(matches!(s.apply_move(&alice(), uci("e2e5")), Err(GameError::IllegalMove(_))));

        assert_eq!(s.board, before);
        assert_eq!(s.current_turn, Color::White);
        assert_eq!(s.castling, CastlingRights::default());
    }

    #[test]
    fn test_pinned_piece_cannot_leave_line() {
        let mut s = session_with(
            [
                "....r..k",
                "........",
                "........",
                "........",
                "........",
                "........",
                "....N...",
                "....K...",
            ],
            Color::White,
            CastlingRights::none(),
        );
        let err = s.apply_move(&alice(), uci("e2c3")).unwrap_err();
        assert!(matches!(err, GameError::IllegalMove(_)));
        assert_eq!(s.current_turn, Color::White);
    }

    #[test]
    fn test_kingside_castling() {
        let mut s = session_with(
            [
                "rnbqk..r",
                "pppppppp",
                "........",
                "........",
                "........",
                "........",
                "PPPPPPPP",
                "RNBQK..R",
            ],
            Color::White,
            CastlingRights::default(),
        );
        s.apply_move(&alice(), uci("e1g1")).unwrap();
        assert_eq!(s.board.get(sq("g1")), Some(Piece::new(PieceKind::King, Color::White)));
        assert_eq!(s.board.get(sq("f1")), Some(Piece::new(PieceKind::Rook, Color::White)));
        assert!(s.board.get(sq("h1")).is_none());
        assert!(s.castling.white.king_moved);
        assert!(s.castling.white.kingside_rook_moved);
        assert!(!s.castling.black.king_moved);

        s.apply_move(&bob(), uci("e8g8")).unwrap();
        assert_eq!(s.board.get(sq("g8")), Some(Piece::new(PieceKind::King, Color::Black)));
        assert_eq!(s.board.get(sq("f8")), Some(Piece::new(PieceKind::Rook, Color::Black)));
        assert!(s.castling.black.king_moved);
        assert!(s.castling.black.kingside_rook_moved);
    }

    #[test]
    fn test_castling_sets_rook_flags_both_wings() {
        let mut s = session_with(
            [
                "r...k..r",
                "........",
                "........",
                "........",
                "........",
                "........",
                "........",
                "R...K..R",
            ],
            Color::White,
            CastlingRights::default(),
        );
        s.apply_move(&alice(), uci("e1c1")).unwrap();
        assert!(s.castling.white.king_moved);
        assert!(s.castling.white.queenside_rook_moved);
        assert!(!s.castling.white.kingside_rook_moved);

        s.apply_move(&bob(), uci("e8g8")).unwrap();
        assert!(s.castling.black.king_moved);
        assert!(s.castling.black.kingside_rook_moved);
        assert!(!s.castling.black.queenside_rook_moved);
    }

    #[test]
    fn test_rook_move_blocks_later_castling() {
        let mut s = session_with(
            [
                "....k...",
                "........",
                "........",
                "........",
                "........",
                "........",
                "........",
                "R...K..R",
            ],
            Color::White,
            CastlingRights::default(),
        );
        s.apply_move(&alice(), uci("h1h2")).unwrap();
        s.apply_move(&bob(), uci("e8d8")).unwrap();
        s.apply_move(&alice(), uci("h2h1")).unwrap();
        s.apply_move(&bob(), uci("d8e8")).unwrap();

        assert!(s.castling.white.kingside_rook_moved);
        assert!(matches!(s.apply_move(&alice(), uci("e1g1")), Err(GameError::IllegalMove(_))));
        s.apply_move(&alice(), uci("e1c1")).unwrap();
        assert_eq!(s.board.get(sq("d1")), Some(Piece::new(PieceKind::Rook, Color::White)));
    }

    #[test]
    fn test_promotion_to_queen() {
        let mut s = session_with(
            [
                "........",
                "P.......",
                "........",
                "....k...",
                "........",
                "........",
                "........",
                "....K...",
            ],
            Color::White,
            CastlingRights::none(),
        );
        let applied = s
            .apply_move(&alice(), Move::with_promotion(Position::at(1, 0), Position::at(0, 0), PieceKind::Queen))
            .unwrap();
        assert_eq!(applied.mv.promotion, Some(PieceKind::Queen));
        assert_eq!(s.board.get(Position::at(0, 0)), Some(Piece::new(PieceKind::Queen, Color::White)));
        assert!(s.board.get(Position::at(1, 0)).is_none());
        assert!(!s.is_over());
    }

    #[test]
    fn test_promotion_choice_and_default() {
        let rows = [
            "........",
            "P.......",
            "........",
            "....k...",
            "........",
            "........",
            "........",
            "....K...",
        ];
        let mut s = session_with(rows, Color::White, CastlingRights::none());
        s.apply_move(&alice(), uci("a7a8n")).unwrap();
        assert_eq!(s.board.get(sq("a8")), Some(Piece::new(PieceKind::Knight, Color::White)));

        let mut s = session_with(rows, Color::White, CastlingRights::none());
        let applied = s.apply_move(&alice(), uci("a7a8")).unwrap();
        assert_eq!(applied.mv.promotion, Some(PieceKind::Queen));

        let mut s = session_with(rows, Color::White, CastlingRights::none());
        let bad = Move::with_promotion(sq("a7"), sq("a8"), PieceKind::King);
        assert!(matches!(s.apply_move(&alice(), bad), Err(GameError::IllegalMove(_))));
        assert!(s.board.get(sq("a8")).is_none());
    }

    #[test]
    fn test_promotion_tag_dropped_on_plain_move() {
        let mut s = GameSession::new(alice(), bob());
        let applied = s
            .apply_move(&alice(), Move::with_promotion(sq("e2"), sq("e4"), PieceKind::Rook))
            .unwrap();
        assert_eq!(applied.mv.promotion, None);
        assert_eq!(s.board.get(sq("e4")), Some(Piece::new(PieceKind::Pawn, Color::White)));
    }

    #[test]
    fn test_stalemate_ends_in_draw() {
        let mut s = session_with(
            [
                "k.......",
                "........",
                "........",
                "..Q.....",
                "........",
                "........",
                "........",
                "..K.....",
            ],
            Color::White,
            CastlingRights::none(),
        );
        let applied = s.apply_move(&alice(), uci("c5b6")).unwrap();
        assert_eq!(applied.completion, Some(Completion::draw(EndReason::Stalemate)));
        assert!(!applied.in_check);
        assert_eq!(s.to_record().winner, None);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut s = GameSession::new(alice(), bob());
        let first = s.handle_disconnect(&alice());
        assert_eq!(first, Some(Completion::win(bob(), EndReason::Disconnected)));
        assert_eq!(s.handle_disconnect(&alice()), None);
        assert_eq!(s.handle_disconnect(&bob()), None);
        assert_eq!(s.completion, first);
    }

    #[test]
    fn test_disconnect_from_stranger_is_ignored() {
        let mut s = GameSession::new(alice(), bob());
        assert_eq!(s.handle_disconnect(&Identity::new("mallory")), None);
        assert!(!s.is_over());
    }

    #[test]
    fn test_resign_and_quit() {
        let mut s = GameSession::new(alice(), bob());
        assert_eq!(
            s.resign(&Identity::new("mallory")),
            Err(GameError::NotAParticipant)
        );
        let done = s.resign(&bob()).unwrap();
        assert_eq!(done, Completion::win(alice(), EndReason::Resignation));
        assert_eq!(s.quit(&alice()), Err(GameError::NotYourTurn));

        let mut s = GameSession::new(alice(), bob());
        assert_eq!(s.quit(&alice()).unwrap(), Completion::win(bob(), EndReason::Quit));
    }

    #[test]
    fn test_draw_handshake() {
        let mut s = GameSession::new(alice(), bob());
        assert_eq!(s.accept_draw(&bob()), Err(GameError::NoDrawOffer));

        s.offer_draw(&alice()).unwrap();
        // The offerer cannot accept their own offer
        assert_eq!(s.accept_draw(&alice()), Err(GameError::NoDrawOffer));

        s.reject_draw(&bob()).unwrap();
        assert_eq!(s.draw_offer, None);
        assert!(!s.is_over());

        s.offer_draw(&alice()).unwrap();
        let done = s.accept_draw(&bob()).unwrap();
        assert_eq!(done, Completion::draw(EndReason::DrawAgreement));
        assert!(s.is_over());
    }

    #[test]
    fn test_move_clears_draw_offer() {
        let mut s = GameSession::new(alice(), bob());
        s.offer_draw(&bob()).unwrap();
        s.apply_move(&alice(), uci("d2d4")).unwrap();
        assert_eq!(s.draw_offer, None);
        assert_eq!(s.accept_draw(&alice()), Err(GameError::NoDrawOffer));
    }

    #[test]
    fn test_abort_once() {
        let mut s = GameSession::new(alice(), bob());
        assert_eq!(s.abort(), Some(Completion::aborted()));
        assert_eq!(s.abort(), None);
        assert_eq!(s.to_record().reason, Some(EndReason::Aborted));
    }
}
