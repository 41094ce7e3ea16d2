//! Computer opponent.
//!
//! Fixed-depth negamax with alpha-beta pruning over
//! [`legality::all_legal_moves`], scoring leaves with material plus a small
//! positional term. Used by the terminal `play` mode.

use crate::legality;
use crate::types::*;

/// Score of a checkmate at the root; shallower mates score higher.
pub const MATE_SCORE: i32 = 1_000_000;
const INFINITY: i32 = 10_000_000;

const CENTRE_BONUS: i32 = 20;
const KING_SHELTER_BONUS: i32 = 10;

/// Anything that can pick a move for one side.
pub trait Opponent: Send {
    /// Chooses a move for `color`, or `None` when it has no legal move.
    fn choose_move(&mut self, board: &Board, color: Color, castling: &CastlingRights) -> Option<Move>;
}

#[derive(Debug, Clone, Copy)]
pub struct MinimaxOpponent {
    pub depth: u32,
    nodes: u64,
}

impl MinimaxOpponent {
    pub fn new(depth: u32) -> Self {
        Self {
            depth: depth.max(1),
            nodes: 0,
        }
    }

    /// Nodes visited by the last search.
    pub fn nodes(&self) -> u64 {
        self.nodes
    }

    fn negamax(
        &mut self,
        board: &Board,
        color: Color,
        castling: &CastlingRights,
        depth: u32,
        mut alpha: i32,
        beta: i32,
    ) -> i32 {
        self.nodes += 1;

        let mut moves = legality::all_legal_moves(board, color, castling);
        if moves.is_empty() {
            return if legality::is_in_check(board, color) {
                -(MATE_SCORE - (self.depth - depth) as i32)
            } else {
                0
            };
        }
        if depth == 0 {
            return perspective(evaluate(board), color);
        }

        order_moves(board, &mut moves);
        let mut best = -INFINITY;
        for mv in moves {
            let (next_board, next_castling) = play(board, castling, &mv);
            let score = -self.negamax(
                &next_board,
                color.opponent(),
                &next_castling,
                depth - 1,
                -beta,
                -alpha,
            );
            best = best.max(score);
            alpha = alpha.max(score);
            if alpha >= beta {
                break;
            }
        }
        best
    }
}

impl Default for MinimaxOpponent {
    fn default() -> Self {
        Self::new(3)
    }
}

impl Opponent for MinimaxOpponent {
    fn choose_move(&mut self, board: &Board, color: Color, castling: &CastlingRights) -> Option<Move> {
        self.nodes = 0;
        let mut moves = legality::all_legal_moves(board, color, castling);
        order_moves(board, &mut moves);

        let mut best_move = None;
        let mut best_score = -INFINITY;
        let mut alpha = -INFINITY;

        for mv in moves {
            let (next_board, next_castling) = play(board, castling, &mv);
            let score = -self.negamax(
                &next_board,
                color.opponent(),
                &next_castling,
                self.depth - 1,
                -INFINITY,
                -alpha,
            );
            if score > best_score {
                best_score = score;
                best_move = Some(mv);
            }
            alpha = alpha.max(score);
        }

        log::debug!(
            "Search depth {} for {}: {:?} (score {}, {} nodes)",
            self.depth,
            color,
            best_move.map(|m| m.to_string()),
            best_score,
            self.nodes
        );
        best_move
    }
}

/// Plays `mv` on copies of the board and castling flags.
fn play(board: &Board, castling: &CastlingRights, mv: &Move) -> (Board, CastlingRights) {
    let mut next = board.clone();
    let mut rights = *castling;
    if let Some(piece) = board.get(mv.from) {
        rights.record_move(piece, mv.from, mv.to);
    }
    legality::apply_move_to_board(&mut next, mv);
    (next, rights)
}

/// Captures first, most valuable victim first.
fn order_moves(board: &Board, moves: &mut [Move]) {
    moves.sort_by_key(|mv| {
        let victim = board.get(mv.to).map_or(0, |p| piece_value(p.kind));
        let promo = mv.promotion.map_or(0, piece_value);
        -(victim + promo)
    });
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Material value in centipawns.
pub const fn piece_value(kind: PieceKind) -> i32 {
    match kind {
        PieceKind::Pawn => 100,
        PieceKind::Knight => 320,
        PieceKind::Bishop => 333,
        PieceKind::Rook => 510,
        PieceKind::Queen => 880,
        PieceKind::King => 100_000,
    }
}

/// The central 4x4 block minus its corners.
fn is_centre(pos: Position) -> bool {
    let (r, c) = (pos.row, pos.col);
    matches!((r, c), (3..=4, 2..=5) | (2 | 5, 3..=4))
}

/// Static score, positive when White is better.
pub fn evaluate(board: &Board) -> i32 {
    let mut score = 0;
    for color in [Color::White, Color::Black] {
        let sign = if color == Color::White { 1 } else { -1 };
        for (pos, piece) in board.pieces(color) {
            let mut value = piece_value(piece.kind);
            if piece.kind == PieceKind::King {
                if pos.row < 2 || pos.row > 5 || pos.col < 2 || pos.col > 5 {
                    value += KING_SHELTER_BONUS;
                }
            } else if is_centre(pos) {
                value += CENTRE_BONUS;
            }
            score += sign * value;
        }
    }
    score
}

fn perspective(score: i32, color: Color) -> i32 {
    match color {
        Color::White => score,
        Color::Black => -score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board(rows: [&str; 8]) -> Board {
        Board::from_rows(&rows).unwrap()
    }

    #[test]
    fn test_starting_position_is_balanced() {
        assert_eq!(evaluate(&Board::standard_setup()), 0);
    }

    #[test]
    fn test_centre_squares() {
        let centre: Vec<String> = Position::all()
            .filter(|p| is_centre(*p))
            .map(|p| p.to_algebraic())
            .collect();
        assert_eq!(centre.len(), 12);
        assert!(centre.contains(&"d4".to_string()));
        assert!(centre.contains(&"c5".to_string()));
        assert!(!centre.contains(&"c6".to_string()));
    }

    #[test]
    fn test_finds_mate_in_one() {
        let b = board([
            "......k.",
            ".....ppp",
            "........",
            "........",
            "........",
            "........",
            "........",
            "R...K...",
        ]);
        let mut ai = MinimaxOpponent::new(2);
        let mv = ai.choose_move(&b, Color::White, &CastlingRights::none()).unwrap();
        assert_eq!(mv, Move::from_uci("a1a8").unwrap());
        assert!(ai.nodes() > 0);
    }

    #[test]
    fn test_takes_hanging_queen() {
        let b = board([
            "....k...",
            "........",
            "........",
            "...q....",
            "........",
            "....N...",
            "........",
            "....K...",
        ]);
        let mut ai = MinimaxOpponent::new(1);
        let mv = ai.choose_move(&b, Color::White, &CastlingRights::none()).unwrap();
        assert_eq!(mv, Move::from_uci("e3d5").unwrap());
    }

    #[test]
    fn test_black_takes_hanging_queen() {
        let b = board([
            "....k...",
            "........",
            ".....n..",
            "...Q....",
            "........",
            "........",
            "........",
            "....K...",
        ]);
        let mut ai = MinimaxOpponent::new(2);
        let mv = ai.choose_move(&b, Color::Black, &CastlingRights::none()).unwrap();
        assert_eq!(mv, Move::from_uci("f6d5").unwrap());
    }

    #[test]
    fn test_play_tracks_castling_rook() {
        let b = board([
            "....k...",
            "........",
            "........",
            "........",
            "........",
            "........",
            "........",
            "R...K..R",
        ]);
        let (after, rights) = play(&b, &CastlingRights::default(), &Move::from_uci("e1g1").unwrap());
        assert_eq!(after.get(Position::at(7, 5)), Some(Piece::new(PieceKind::Rook, Color::White)));
        assert!(rights.white.king_moved);
        assert!(rights.white.kingside_rook_moved);
        assert!(!rights.white.queenside_rook_moved);
    }

    #[test]
    fn test_no_move_when_mated() {
        let b = board([
            "R.....k.",
            ".....ppp",
            "........",
            "........",
            "........",
            "........",
            "........",
            "....K...",
        ]);
        let mut ai = MinimaxOpponent::new(2);
        assert!(ai.choose_move(&b, Color::Black, &CastlingRights::none()).is_none());
    }
}
