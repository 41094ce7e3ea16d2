//! Legality filtering and end-of-game detection.
//!
//! Turns pseudo-legal destinations into legal ones by simulating each move
//! on a cloned board and discarding those that leave the mover's king
//! attacked. Pins and check evasion fall out of this filter; there is no
//! separate pin computation.

use crate::movegen::{self, BISHOP_DIRS, Destination, KNIGHT_OFFSETS, ROOK_DIRS};
use crate::types::*;

// ---------------------------------------------------------------------------
// Attack detection
// ---------------------------------------------------------------------------

/// Returns `true` if the given square is attacked by any piece of `attacker_color`.
///
/// Looks outward from `pos` for each attacker pattern instead of generating
/// every enemy move, so castling never enters the computation. Pawn
/// diagonals count whether or not `pos` is occupied.
pub fn is_square_attacked(board: &Board, pos: Position, attacker_color: Color) -> bool {
    let holds = |at: Position, kinds: &[PieceKind]| {
        matches!(
            board.get(at),
            Some(piece) if piece.color == attacker_color && kinds.contains(&piece.kind)
        )
    };

    // Knights
    for &(dr, dc) in &KNIGHT_OFFSETS {
        if let Some(from) = pos.offset(dr, dc)
            && holds(from, &[PieceKind::Knight])
        {
            return true;
        }
    }

    // King (one square in any direction)
    for dr in -1..=1i8 {
        for dc in -1..=1i8 {
            if dr == 0 && dc == 0 {
                continue;
            }
            if let Some(from) = pos.offset(dr, dc)
                && holds(from, &[PieceKind::King])
            {
                return true;
            }
        }
    }

    // Pawns: an attacking pawn sits one step behind the target from its own perspective
    let behind = -attacker_color.pawn_direction();
    for dc in [-1i8, 1] {
        if let Some(from) = pos.offset(behind, dc)
            && holds(from, &[PieceKind::Pawn])
        {
            return true;
        }
    }

    // Sliding pieces along rays
    let rays = BISHOP_DIRS
        .iter()
        .map(|d| (d, [PieceKind::Bishop, PieceKind::Queen]))
        .chain(ROOK_DIRS.iter().map(|d| (d, [PieceKind::Rook, PieceKind::Queen])));
    for (&(dr, dc), kinds) in rays {
        let mut cur = pos;
        while let Some(next) = cur.offset(dr, dc) {
            if board.get(next).is_some() {
                if holds(next, &kinds) {
                    return true;
                }
                break; // blocked by another piece
            }
            cur = next;
        }
    }

    false
}

/// Returns `true` if the king of the given color is currently in check.
pub fn is_in_check(board: &Board, color: Color) -> bool {
    match board.find_king(color) {
        Some(king) => is_square_attacked(board, king, color.opponent()),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Legal move generation
// ---------------------------------------------------------------------------

/// Returns the legal destinations for the piece on `from`.
///
/// A destination survives when the board after the move leaves the
/// mover's king unattacked.
pub fn legal_moves(board: &Board, from: Position, castling: &CastlingRights) -> Vec<Destination> {
    let color = match board.get(from) {
        Some(piece) => piece.color,
        None => return Vec::new(),
    };

    movegen::pseudo_legal_moves(board, from, castling)
        .into_iter()
        .filter(|dest| {
            let mut test_board = board.clone();
            apply_move_to_board(&mut test_board, &Move::new(from, dest.to));
            !is_in_check(&test_board, color)
        })
        .collect()
}

/// Returns `true` if any piece of `color` has at least one legal move.
pub fn has_legal_move(board: &Board, color: Color, castling: &CastlingRights) -> bool {
    board
        .pieces(color)
        .any(|(pos, _)| !legal_moves(board, pos, castling).is_empty())
}

/// Every legal move for `color`. Promoting destinations are expanded to
/// one move per promotion kind.
pub fn all_legal_moves(board: &Board, color: Color, castling: &CastlingRights) -> Vec<Move> {
    let mut moves = Vec::with_capacity(48);
    for (from, _) in board.pieces(color) {
        for dest in legal_moves(board, from, castling) {
            if dest.promotes {
                moves.extend(
                    PieceKind::PROMOTIONS
                        .iter()
                        .map(|&kind| Move::with_promotion(from, dest.to, kind)),
                );
            } else {
                moves.push(Move::new(from, dest.to));
            }
        }
    }
    moves
}

/// Returns `true` if `color` is in check and has no legal move.
///
/// Castling can never resolve a check, so the castling flags do not
/// affect the answer.
pub fn is_checkmate(board: &Board, color: Color) -> bool {
    is_in_check(board, color) && !has_legal_move(board, color, &CastlingRights::none())
}

/// Returns `true` if `color` is not in check but has no legal move.
pub fn is_stalemate(board: &Board, color: Color, castling: &CastlingRights) -> bool {
    !is_in_check(board, color) && !has_legal_move(board, color, castling)
}

// ---------------------------------------------------------------------------
// Board mutation
// ---------------------------------------------------------------------------

/// Applies a move to a board (mutating it). Used both to simulate
/// candidate moves and to play accepted ones.
///
/// Handles:
/// - Normal moves and captures
/// - Castling (a two-column king move also relocates the rook)
/// - Promotion (a pawn landing on its promotion row becomes
///   `mv.promotion`, a queen when absent or not a valid target)
///
/// An empty origin square leaves the board untouched.
pub fn apply_move_to_board(board: &mut Board, mv: &Move) {
    let piece = match board.get(mv.from) {
        Some(p) => p,
        None => return,
    };

    board.set(mv.from, None);

    if piece.kind == PieceKind::King && mv.from.col.abs_diff(mv.to.col) == 2 {
        let row = mv.from.row;
        let (rook_from, rook_to) = if mv.to.col == 6 { (7, 5) } else { (0, 3) };
        let rook = board.get(Position::at(row, rook_from));
        board.set(Position::at(row, rook_from), None);
        board.set(Position::at(row, rook_to), rook);
    }

    let placed = if piece.kind == PieceKind::Pawn && mv.to.row == piece.color.promotion_row() {
        let kind = mv
            .promotion
            .filter(|k| k.is_promotion_target())
            .unwrap_or(PieceKind::Queen);
        Piece::new(kind, piece.color)
    } else {
        piece
    };
    board.set(mv.to, Some(placed));
}
