//! Terminal play against the computer.
//!
//! Drives a [`GameSession`] between the human at the keyboard and a
//! [`MinimaxOpponent`], so every move goes through the same legality
//! checks as an online game.
//!
//! - Colored board display (row 0 / rank 8 at the top)
//! - Move input in long algebraic form (`e2e4`, `e7e8q`, `e2 e4`)
//! - Listing legal moves, resignation

use colored::Colorize;
use std::io::{self, BufRead, Write};

use crate::engine::{MinimaxOpponent, Opponent};
use crate::legality;
use crate::session::GameSession;
use crate::types::*;

const HUMAN: &str = "you";
const COMPUTER: &str = "computer";

/// Renders the board to the terminal.
pub fn print_board(board: &Board) {
    println!();
    println!("  +---+---+---+---+---+---+---+---+");

    for row in 0..8u8 {
        print!("{} ", 8 - row);
        for col in 0..8u8 {
            let is_dark_square = (row + col) % 2 == 1;

            let piece_str = match board.get(Position::at(row, col)) {
                Some(piece) => {
                    let symbol = piece.to_fen_char().to_string();
                    if piece.color == Color::White {
                        symbol.white().bold().to_string()
                    } else {
                        symbol.blue().bold().to_string()
                    }
                }
                None if is_dark_square => "·".dimmed().to_string(),
                None => " ".to_string(),
            };

            print!("| {} ", piece_str);
        }
        println!("|");
        println!("  +---+---+---+---+---+---+---+---+");
    }
    println!("    a   b   c   d   e   f   g   h");
    println!();
}

fn color_label(color: Color) -> colored::ColoredString {
    match color {
        Color::White => "White".white().bold(),
        Color::Black => "Black".blue().bold(),
    }
}

/// Prints whose turn it is and whether they are in check.
pub fn print_status(session: &GameSession) {
    print!("{} to move", color_label(session.current_turn));
    if session.in_check() {
        print!("  {}", "CHECK".red().bold());
    }
    let legal = legality::all_legal_moves(&session.board, session.current_turn, &session.castling);
    println!("  ({} legal moves)", legal.len());
    println!();
}

/// Prints the game result when the game ends.
pub fn print_game_result(session: &GameSession) {
    if let Some(completion) = &session.completion {
        let result = match completion.winner() {
            Some(winner) if winner.as_str() == HUMAN => "You win".green().bold(),
            Some(_) => "The computer wins".red().bold(),
            None => "Draw".yellow().bold(),
        };
        println!();
        println!("{}", "═══════════════════════════════════".yellow());
        println!("  {} ({})", result, completion.reason);
        println!("{}", "═══════════════════════════════════".yellow());
        println!();
    }
}

/// Prints available commands in the terminal.
pub fn print_help() {
    println!("{}", "Commands:".yellow().bold());
    println!("  {}      - make a move (add q/r/b/n to promote)", "e2e4".green());
    println!("  {}     - list your legal moves", "moves".green());
    println!("  {}     - show the board", "board".green());
    println!("  {}    - resign the game", "resign".green());
    println!("  {}      - show this help", "help".green());
    println!("  {}      - leave", "quit".green());
    println!();
}

/// Runs an interactive game against the computer until it ends or the
/// player quits.
pub fn run_terminal_game(depth: u32, human_color: Color) -> io::Result<()> {
    println!();
    println!("{}", "╔═══════════════════════════════════════╗".cyan());
    println!("{}", "║          chessroom terminal           ║".cyan());
    println!("{}", "╚═══════════════════════════════════════╝".cyan());
    println!();

    let human = Identity::new(HUMAN);
    let computer = Identity::new(COMPUTER);
    let mut session = match human_color {
        Color::White => GameSession::new(human.clone(), computer.clone()),
        Color::Black => GameSession::new(computer.clone(), human.clone()),
    };
    let mut ai = MinimaxOpponent::new(depth);

    print_help();
    print_board(&session.board);
    print_status(&session);

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    while !session.is_over() {
        if session.current_turn != human_color {
            println!("{}", "Computer is thinking...".dimmed());
            let chosen = ai.choose_move(&session.board, session.current_turn, &session.castling);
            let applied = chosen.and_then(|mv| session.apply_move(&computer, mv).ok());
            match applied {
                Some(applied) => {
                    println!("Computer plays {}", applied.mv.to_string().green());
                    print_board(&session.board);
                    print_status(&session);
                }
                None => {
                    log::error!("Computer found no playable move in an ongoing game");
                    break;
                }
            }
            continue;
        }

        print!("{} > ", color_label(human_color));
        io::stdout().flush()?;

        let input = match lines.next() {
            Some(line) => line?.trim().to_lowercase(),
            None => break,
        };
        if input.is_empty() {
            continue;
        }

        match input.as_str() {
            "quit" | "exit" | "q" => {
                println!("Goodbye.");
                return Ok(());
            }
            "help" | "h" | "?" => print_help(),
            "board" | "b" => {
                print_board(&session.board);
                print_status(&session);
            }
            "moves" | "m" => {
                let moves =
                    legality::all_legal_moves(&session.board, human_color, &session.castling);
                println!("{} ({})", "Legal moves:".yellow().bold(), moves.len());
                for (i, mv) in moves.iter().enumerate() {
                    if i > 0 && i % 8 == 0 {
                        println!();
                    }
                    print!("  {}", mv.to_string().green());
                }
                println!();
                println!();
            }
            "resign" | "r" => {
                if let Err(e) = session.resign(&human) {
                    println!("{}: {}", "Error".red().bold(), e);
                }
            }
            _ => match parse_move_input(&input) {
                Some(mv) => match session.apply_move(&human, mv) {
                    Ok(_) => {
                        print_board(&session.board);
                        print_status(&session);
                    }
                    Err(e) => println!("{}: {}", "Rejected".red().bold(), e),
                },
                None => println!("Unknown command '{}'. Type {} for the list.", input, "help".green()),
            },
        }
    }

    print_game_result(&session);
    Ok(())
}

/// Parses a move input string like "e2e4" or "e7e8Q".
///
/// Accepts formats:
/// - `e2e4`: normal move
/// - `e7e8q`: promotion (q, r, b, n)
/// - `e2 e4`: with space separator
fn parse_move_input(input: &str) -> Option<Move> {
    Move::from_uci(&input.replace(' ', ""))
}
