//! Core types for the chess server.
//!
//! This module defines the board model shared by every other component:
//! colors, piece kinds, board coordinates, the 8×8 grid, castling flags
//! and the move representation. Coordinates follow the `(row, col)`
//! convention used on the wire: row 0 is Black's back rank (rank 8),
//! row 7 is White's back rank (rank 1) and col 0 is the a-file.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// Piece & Color
// ---------------------------------------------------------------------------

/// Represents the color (side) of a chess piece or player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    /// The White side (starts on rows 6–7).
    White,
    /// The Black side (starts on rows 0–1).
    Black,
}

impl Color {
    /// Returns the opposite color.
    pub fn opponent(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    /// Row holding this color's king and rooks at the start.
    pub fn home_row(self) -> u8 {
        match self {
            Color::White => 7,
            Color::Black => 0,
        }
    }

    /// Row pawns of this color start on.
    pub fn pawn_start_row(self) -> u8 {
        match self {
            Color::White => 6,
            Color::Black => 1,
        }
    }

    /// Row on which pawns of this color promote.
    pub fn promotion_row(self) -> u8 {
        match self {
            Color::White => 0,
            Color::Black => 7,
        }
    }

    /// Row delta of a pawn step: White moves toward row 0, Black toward row 7.
    pub fn pawn_direction(self) -> i8 {
        match self {
            Color::White => -1,
            Color::Black => 1,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::White => write!(f, "white"),
            Color::Black => write!(f, "black"),
        }
    }
}

/// Represents a chess piece type (without color information).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceKind {
    /// The kinds a pawn may promote to, strongest first.
    pub const PROMOTIONS: [PieceKind; 4] = [
        PieceKind::Queen,
        PieceKind::Rook,
        PieceKind::Bishop,
        PieceKind::Knight,
    ];

    /// Whether a pawn may be promoted to this kind.
    pub fn is_promotion_target(self) -> bool {
        !matches!(self, PieceKind::Pawn | PieceKind::King)
    }
}

impl fmt::Display for PieceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PieceKind::Pawn => "pawn",
            PieceKind::Knight => "knight",
            PieceKind::Bishop => "bishop",
            PieceKind::Rook => "rook",
            PieceKind::Queen => "queen",
            PieceKind::King => "king",
        };
        f.write_str(name)
    }
}

/// A chess piece with both kind and color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Piece {
    pub kind: PieceKind,
    pub color: Color,
}

impl Piece {
    /// Creates a new piece.
    pub fn new(kind: PieceKind, color: Color) -> Self {
        Self { kind, color }
    }

    /// Converts the piece to its FEN character.
    /// Uppercase for White, lowercase for Black.
    pub fn to_fen_char(self) -> char {
        let c = match self.kind {
            PieceKind::King => 'K',
            PieceKind::Queen => 'Q',
            PieceKind::Rook => 'R',
            PieceKind::Bishop => 'B',
            PieceKind::Knight => 'N',
            PieceKind::Pawn => 'P',
        };
        match self.color {
            Color::White => c,
            Color::Black => c.to_ascii_lowercase(),
        }
    }

    /// Parses a FEN character into a `Piece`.
    /// Returns `None` if the character is not a valid piece symbol.
    pub fn from_fen_char(c: char) -> Option<Self> {
        let color = if c.is_ascii_uppercase() {
            Color::White
        } else {
            Color::Black
        };
        let kind = match c.to_ascii_uppercase() {
            'K' => PieceKind::King,
            'Q' => PieceKind::Queen,
            'R' => PieceKind::Rook,
            'B' => PieceKind::Bishop,
            'N' => PieceKind::Knight,
            'P' => PieceKind::Pawn,
            _ => return None,
        };
        Some(Piece { kind, color })
    }
}

/// One board square's content.
pub type Cell = Option<Piece>;

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A square on the board as `(row, col)`, both in `0..8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Position {
    pub row: u8,
    pub col: u8,
}

impl Position {
    /// Creates a position, or `None` when either coordinate is off the board.
    pub fn new(row: u8, col: u8) -> Option<Self> {
        if row < 8 && col < 8 {
            Some(Self { row, col })
        } else {
            None
        }
    }

    /// Creates a position from coordinates known to be on the board.
    pub(crate) const fn at(row: u8, col: u8) -> Self {
        debug_assert!(row < 8 && col < 8, "Position out of bounds");
        Self { row, col }
    }

    /// Returns whether both coordinates are on the board.
    pub fn is_valid(self) -> bool {
        self.row < 8 && self.col < 8
    }

    /// Parses algebraic notation ("e2") into a position.
    pub fn from_algebraic(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return None;
        }
        let col = bytes[0].to_ascii_lowercase().wrapping_sub(b'a');
        let rank = bytes[1].wrapping_sub(b'1');
        if col < 8 && rank < 8 {
            Some(Position::at(7 - rank, col))
        } else {
            None
        }
    }

    /// Converts the position to algebraic notation ("e2").
    pub fn to_algebraic(self) -> String {
        format!("{}{}", (b'a' + self.col) as char, 8 - self.row)
    }

    /// Returns the position shifted by `(dr, dc)`, or `None` if off the board.
    pub fn offset(self, dr: i8, dc: i8) -> Option<Position> {
        let r = self.row as i8 + dr;
        let c = self.col as i8 + dc;
        if (0..8).contains(&r) && (0..8).contains(&c) {
            Some(Position::at(r as u8, c as u8))
        } else {
            None
        }
    }

    /// Iterates all 64 positions, row 0 first.
    pub fn all() -> impl Iterator<Item = Position> {
        (0..8u8).flat_map(|row| (0..8u8).map(move |col| Position::at(row, col)))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_algebraic())
    }
}

// ---------------------------------------------------------------------------
// Castling Rights
// ---------------------------------------------------------------------------

/// Castling flags for one side. Each flag records that the piece has left
/// its origin square at least once; they never flip back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct SideCastlingRights {
    pub king_moved: bool,
    pub kingside_rook_moved: bool,
    pub queenside_rook_moved: bool,
}

impl SideCastlingRights {
    /// Whether the flags still permit kingside castling.
    pub fn kingside_open(&self) -> bool {
        !self.king_moved && !self.kingside_rook_moved
    }

    /// Whether the flags still permit queenside castling.
    pub fn queenside_open(&self) -> bool {
        !self.king_moved && !self.queenside_rook_moved
    }
}

/// Castling flags for both sides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct CastlingRights {
    pub white: SideCastlingRights,
    pub black: SideCastlingRights,
}

impl CastlingRights {
    /// Flags with every king and rook marked as moved.
    pub fn none() -> Self {
        let moved = SideCastlingRights {
            king_moved: true,
            kingside_rook_moved: true,
            queenside_rook_moved: true,
        };
        Self {
            white: moved,
            black: moved,
        }
    }

    /// Returns the castling rights for the given color.
    pub fn for_color(&self, color: Color) -> &SideCastlingRights {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }

    /// Returns a mutable reference to the castling rights for the given color.
    pub fn for_color_mut(&mut self, color: Color) -> &mut SideCastlingRights {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }

    /// Records a played move of `piece`. A castling king move also counts as
    /// a departure of the rook it jumps over.
    pub fn record_move(&mut self, piece: Piece, from: Position, to: Position) {
        self.record_departure(piece, from);
        if piece.kind == PieceKind::King && from.col.abs_diff(to.col) == 2 {
            let rook_col = if to.col > from.col { 7 } else { 0 };
            let rook = Piece::new(PieceKind::Rook, piece.color);
            self.record_departure(rook, Position::at(from.row, rook_col));
        }
    }

    /// Records that `piece` left `from`. Only departures from the king's and
    /// rooks' origin squares flip a flag.
    pub fn record_departure(&mut self, piece: Piece, from: Position) {
        let home = piece.color.home_row();
        let rights = self.for_color_mut(piece.color);
        match piece.kind {
            PieceKind::King => rights.king_moved = true,
            PieceKind::Rook if from.row == home && from.col == 0 => {
                rights.queenside_rook_moved = true;
            }
            PieceKind::Rook if from.row == home && from.col == 7 => {
                rights.kingside_rook_moved = true;
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

/// The 8×8 grid of cells, indexed `[row][col]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Board {
    cells: [[Cell; 8]; 8],
}

impl Default for Board {
    /// Returns an empty board.
    fn default() -> Self {
        Self::empty()
    }
}

impl Board {
    /// Returns a board with every square empty.
    pub fn empty() -> Self {
        Self {
            cells: [[None; 8]; 8],
        }
    }

    /// Creates the standard starting position.
    pub fn standard_setup() -> Self {
        const BACK_RANK: [PieceKind; 8] = [
            PieceKind::Rook,
            PieceKind::Knight,
            PieceKind::Bishop,
            PieceKind::Queen,
            PieceKind::King,
            PieceKind::Bishop,
            PieceKind::Knight,
            PieceKind::Rook,
        ];

        let mut board = Board::empty();
        for color in [Color::White, Color::Black] {
            for (col, kind) in BACK_RANK.iter().enumerate() {
                let col = col as u8;
                board.set(
                    Position::at(color.home_row(), col),
                    Some(Piece::new(*kind, color)),
                );
                board.set(
                    Position::at(color.pawn_start_row(), col),
                    Some(Piece::new(PieceKind::Pawn, color)),
                );
            }
        }
        board
    }

    /// Returns the content of the given square.
    pub fn get(&self, pos: Position) -> Cell {
        self.cells[pos.row as usize][pos.col as usize]
    }

    /// Sets (or clears) the given square.
    pub fn set(&mut self, pos: Position, cell: Cell) {
        self.cells[pos.row as usize][pos.col as usize] = cell;
    }

    /// Finds the king of the given color.
    /// Returns `None` if that king is not on the board.
    pub fn find_king(&self, color: Color) -> Option<Position> {
        Position::all().find(|&pos| {
            self.get(pos) == Some(Piece::new(PieceKind::King, color))
        })
    }

    /// Iterates every occupied square holding a piece of `color`.
    pub fn pieces(&self, color: Color) -> impl Iterator<Item = (Position, Piece)> + '_ {
        Position::all().filter_map(move |pos| match self.get(pos) {
            Some(piece) if piece.color == color => Some((pos, piece)),
            _ => None,
        })
    }

    /// Renders the board as 8 strings, row 0 first, using FEN letters
    /// and `.` for empty squares.
    pub fn to_rows(&self) -> Vec<String> {
        self.cells
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| cell.map_or('.', Piece::to_fen_char))
                    .collect()
            })
            .collect()
    }

    /// Parses the format produced by [`Board::to_rows`].
    pub fn from_rows(rows: &[&str]) -> Result<Self, String> {
        if rows.len() != 8 {
            return Err(format!("Expected 8 rows, got {}", rows.len()));
        }
        let mut board = Board::empty();
        for (row, line) in rows.iter().enumerate() {
            let chars: Vec<char> = line.chars().collect();
            if chars.len() != 8 {
                return Err(format!("Row {} has {} squares, expected 8", row, chars.len()));
            }
            for (col, ch) in chars.into_iter().enumerate() {
                if ch == '.' {
                    continue;
                }
                let piece = Piece::from_fen_char(ch)
                    .ok_or_else(|| format!("Invalid piece symbol '{}' in row {}", ch, row))?;
                board.set(Position::at(row as u8, col as u8), Some(piece));
            }
        }
        Ok(board)
    }
}

// ---------------------------------------------------------------------------
// Moves
// ---------------------------------------------------------------------------

/// A proposed move. `promotion` names the piece a pawn reaching the far
/// rank turns into; the session defaults to a queen when it is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Move {
    pub from: Position,
    pub to: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<PieceKind>,
}

impl Move {
    /// Creates a move without a promotion choice.
    pub fn new(from: Position, to: Position) -> Self {
        Self {
            from,
            to,
            promotion: None,
        }
    }

    /// Creates a move carrying a promotion choice.
    pub fn with_promotion(from: Position, to: Position, kind: PieceKind) -> Self {
        Self {
            from,
            to,
            promotion: Some(kind),
        }
    }

    /// Parses long algebraic input such as `e2e4` or `e7e8q`.
    pub fn from_uci(input: &str) -> Option<Self> {
        let input = input.trim();
        if !input.is_ascii() || !(4..=5).contains(&input.len()) {
            return None;
        }
        let from = Position::from_algebraic(&input[0..2])?;
        let to = Position::from_algebraic(&input[2..4])?;
        let promotion = match input[4..].chars().next() {
            None => None,
            Some(c) => match Piece::from_fen_char(c.to_ascii_uppercase())?.kind {
                kind if kind.is_promotion_target() => Some(kind),
                _ => return None,
            },
        };
        Some(Move { from, to, promotion })
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(kind) = self.promotion {
            let c = Piece::new(kind, Color::White).to_fen_char();
            write!(f, "={}", c)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Players & session outcome
// ---------------------------------------------------------------------------

/// An authenticated player reference. The core only compares identities
/// for equality; the string is the username issued by authentication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub String);

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a game session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Ongoing,
    Completed,
}

/// Why a session completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Checkmate,
    Stalemate,
    Resignation,
    Quit,
    Disconnected,
    DrawAgreement,
    Aborted,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndReason::Checkmate => "checkmate",
            EndReason::Stalemate => "stalemate",
            EndReason::Resignation => "resignation",
            EndReason::Quit => "quit",
            EndReason::Disconnected => "disconnected",
            EndReason::DrawAgreement => "draw_agreement",
            EndReason::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Final result of a completed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "winner", rename_all = "snake_case")]
pub enum GameResult {
    Winner(Identity),
    Draw,
    Aborted,
}

impl GameResult {
    /// The winning identity, if the game was decided.
    pub fn winner(&self) -> Option<&Identity> {
        match self {
            GameResult::Winner(identity) => Some(identity),
            GameResult::Draw | GameResult::Aborted => None,
        }
    }
}

/// Result plus the reason the session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub result: GameResult,
    pub reason: EndReason,
}

impl Completion {
    pub fn win(winner: Identity, reason: EndReason) -> Self {
        Self {
            result: GameResult::Winner(winner),
            reason,
        }
    }

    pub fn draw(reason: EndReason) -> Self {
        Self {
            result: GameResult::Draw,
            reason,
        }
    }

    pub fn aborted() -> Self {
        Self {
            result: GameResult::Aborted,
            reason: EndReason::Aborted,
        }
    }

    pub fn winner(&self) -> Option<&Identity> {
        self.result.winner()
    }
}
