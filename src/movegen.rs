//! Pseudo-legal move generation.
//!
//! Computes, for the piece on a given square, every destination that
//! follows the piece's movement pattern without looking at whether the
//! move would leave the mover's own king in check. The legality filter in
//! [`crate::legality`] removes those. Whose turn it is never matters here.
//!
//! Supported:
//! - Pawn single and double steps, diagonal captures, promotion tagging
//! - Knight jumps, bishop/rook/queen rays, king steps
//! - Castling (both wings) with flag, path, rook presence and attack checks
//!
//! En passant is not generated.

use crate::legality::is_square_attacked;
use crate::types::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A reachable square for the piece being generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Destination {
    pub to: Position,
    /// Set when a pawn lands on its promotion row.
    pub promotes: bool,
}

impl Destination {
    fn plain(to: Position) -> Self {
        Self { to, promotes: false }
    }
}

/// Direction vectors for sliding pieces, as `(dr, dc)`.
pub(crate) const ROOK_DIRS: [(i8, i8); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
pub(crate) const BISHOP_DIRS: [(i8, i8); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];
const QUEEN_DIRS: [(i8, i8); 8] = [
    (-1, 0), (1, 0), (0, -1), (0, 1),
    (-1, -1), (-1, 1), (1, -1), (1, 1),
];

pub(crate) const KNIGHT_OFFSETS: [(i8, i8); 8] = [
    (-2, -1), (-2, 1), (-1, -2), (-1, 2),
    (1, -2), (1, 2), (2, -1), (2, 1),
];

/// Generates the pseudo-legal destinations of the piece on `from`.
///
/// Returns an empty list when the square is empty.
pub fn pseudo_legal_moves(
    board: &Board,
    from: Position,
    castling: &CastlingRights,
) -> Vec<Destination> {
    let piece = match board.get(from) {
        Some(p) => p,
        None => return Vec::new(),
    };

    let mut moves = Vec::with_capacity(28);
    let color = piece.color;
    match piece.kind {
        PieceKind::King => generate_king_moves(board, from, color, castling, &mut moves),
        PieceKind::Queen => generate_sliding_moves(board, from, color, &QUEEN_DIRS, &mut moves),
        PieceKind::Rook => generate_sliding_moves(board, from, color, &ROOK_DIRS, &mut moves),
        PieceKind::Bishop => generate_sliding_moves(board, from, color, &BISHOP_DIRS, &mut moves),
        PieceKind::Knight => generate_knight_moves(board, from, color, &mut moves),
        PieceKind::Pawn => generate_pawn_moves(board, from, color, &mut moves),
    }
    moves
}

/// Pushes `to` if it is empty or holds an enemy piece.
fn push_step(board: &Board, to: Position, color: Color, moves: &mut Vec<Destination>) {
    match board.get(to) {
        None => moves.push(Destination::plain(to)),
        Some(target) if target.color != color => moves.push(Destination::plain(to)),
        Some(_) => {}
    }
}

/// Generates sliding piece moves (rook, bishop, queen).
fn generate_sliding_moves(
    board: &Board,
    from: Position,
    color: Color,
    directions: &[(i8, i8)],
    moves: &mut Vec<Destination>,
) {
    for &(dr, dc) in directions {
        let mut cur = from;
        while let Some(to) = cur.offset(dr, dc) {
            match board.get(to) {
                None => {
                    moves.push(Destination::plain(to));
                    cur = to;
                }
                Some(target) => {
                    if target.color != color {
                        moves.push(Destination::plain(to)); // capture
                    }
                    break; // blocked
                }
            }
        }
    }
}

/// Generates knight moves.
fn generate_knight_moves(
    board: &Board,
    from: Position,
    color: Color,
    moves: &mut Vec<Destination>,
) {
    for &(dr, dc) in &KNIGHT_OFFSETS {
        if let Some(to) = from.offset(dr, dc) {
            push_step(board, to, color, moves);
        }
    }
}

/// Generates king moves (including castling).
fn generate_king_moves(
    board: &Board,
    from: Position,
    color: Color,
    castling: &CastlingRights,
    moves: &mut Vec<Destination>,
) {
    for dr in -1..=1i8 {
        for dc in -1..=1i8 {
            if dr == 0 && dc == 0 {
                continue;
            }
            if let Some(to) = from.offset(dr, dc) {
                push_step(board, to, color, moves);
            }
        }
    }

    let rights = castling.for_color(color);
    let row = color.home_row();
    let enemy = color.opponent();

    // Only attempt castling if king is on its starting square
    if from != Position::at(row, 4) || rights.king_moved {
        return;
    }

    // King must not be in check to castle
    if is_square_attacked(board, from, enemy) {
        return;
    }

    let rook_present = |col: u8| {
        matches!(
            board.get(Position::at(row, col)),
            Some(Piece { kind: PieceKind::Rook, color: c }) if c == color
        )
    };
    let empty = |col: u8| board.get(Position::at(row, col)).is_none();
    let safe = |col: u8| !is_square_attacked(board, Position::at(row, col), enemy);

    // Kingside: f and g empty and safe, rook on h
    if rights.kingside_open() && rook_present(7) && empty(5) && empty(6) && safe(5) && safe(6) {
        moves.push(Destination::plain(Position::at(row, 6)));
    }

    // Queenside: d, c, b empty; only the king's path d, c must be safe
    if rights.queenside_open()
        && rook_present(0)
        && empty(3)
        && empty(2)
        && empty(1)
        && safe(3)
        && safe(2)
    {
        moves.push(Destination::plain(Position::at(row, 2)));
    }
}

/// Generates pawn moves (forward steps, captures, promotion tagging).
fn generate_pawn_moves(
    board: &Board,
    from: Position,
    color: Color,
    moves: &mut Vec<Destination>,
) {
    let dir = color.pawn_direction();
    let promo_row = color.promotion_row();
    let mut add = |to: Position| {
        moves.push(Destination {
            to,
            promotes: to.row == promo_row,
        });
    };

    // Single step forward
    if let Some(one_ahead) = from.offset(dir, 0)
        && board.get(one_ahead).is_none()
    {
        add(one_ahead);

        // Double step from starting row
        if from.row == color.pawn_start_row()
            && let Some(two_ahead) = from.offset(dir * 2, 0)
            && board.get(two_ahead).is_none()
        {
            add(two_ahead);
        }
    }

    // Diagonal captures onto enemy pieces only
    for dc in [-1i8, 1] {
        if let Some(to) = from.offset(dir, dc)
            && let Some(target) = board.get(to)
            && target.color != color
        {
            add(to);
        }
    }
}
