//! # chessroom: online chess server
//!
//! An authoritative chess server. Players register, log in, and connect
//! over WebSocket to be paired by a first-come matchmaking queue. Every
//! move is validated on the server against the full rules of chess,
//! including check, pins, castling, promotion, checkmate and stalemate.
//!
//! ## Features
//!
//! - **Rules engine**: per-piece move generation and a legality filter
//!   that rejects any move leaving the mover's king attacked.
//! - **Sessions**: one state machine per game; resign, quit, disconnect,
//!   draw offers and administrative abort all end it exactly once.
//! - **Persistence**: completed games and accounts in a directory of
//!   JSON files (game records zstd-compressed), or in memory.
//! - **REST API** with Swagger UI at `/swagger-ui/`.
//! - **Terminal play** against a built-in minimax opponent.
//!
//! ## Usage
//!
//! ```bash
//! # Start the server (default: http://127.0.0.1:8080)
//! chessroom serve
//!
//! # Custom port, in-memory storage
//! chessroom serve --port 3000 --memory
//!
//! # Play the computer in the terminal
//! chessroom play --depth 4 --color black
//! ```
//!
//! ## Endpoints
//!
//! | Method | Path                             | Description                  |
//! |--------|----------------------------------|------------------------------|
//! | POST   | `/api/register`                  | Create an account            |
//! | POST   | `/api/login`                     | Get a token                  |
//! | POST   | `/api/logout`                    | Revoke the bearer token      |
//! | GET    | `/api/user/stats`                | Wins, losses, draws          |
//! | GET    | `/api/games`                     | Completed game records       |
//! | GET    | `/api/games/{id}`                | One game record              |
//! | GET    | `/api/sessions`                  | Live sessions                |
//! | GET    | `/api/sessions/{id}`             | Live session state           |
//! | DELETE | `/api/sessions/{id}`             | Abort a session (players)    |
//! | GET    | `/api/sessions/{id}/moves`       | Legal moves from a square    |
//! | GET    | `/api/sessions/{id}/board`       | ASCII board                  |
//! | GET    | `/api/matchmaking`               | Waiting players              |
//! | GET    | `/ws?token=...`                  | WebSocket gameplay           |

pub mod api;
pub mod auth;
pub mod directory;
pub mod engine;
pub mod error;
pub mod events;
pub mod legality;
pub mod matchmaking;
pub mod movegen;
pub mod session;
pub mod storage;
pub mod terminal;
pub mod types;
pub mod ws;

use actix::Actor;
use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{ApiDoc, AppState};
use crate::storage::{FileStore, MemoryStore, RecordStore};
use crate::types::Color;
use crate::ws::{ActorNotifier, ClientRegistry};

/// How often completed games whose save failed are written again.
const UNSAVED_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// chessroom: an online chess server.
#[derive(Parser, Debug)]
#[command(name = "chessroom")]
#[command(about = "Online chess server with matchmaking and an authoritative rules engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP + WebSocket server.
    Serve {
        /// Port to listen on.
        #[arg(short, long, env = "CHESS_PORT", default_value_t = 8080)]
        port: u16,

        /// Host address to bind to.
        #[arg(long, env = "CHESS_HOST", default_value = "127.0.0.1")]
        host: String,

        /// Directory for accounts and completed games.
        #[arg(long, env = "CHESS_DATA_DIR", default_value = "data")]
        data_dir: String,

        /// Keep everything in memory; nothing survives a restart.
        #[arg(long)]
        memory: bool,
    },

    /// Play against the computer in the terminal.
    Play {
        /// Search depth in plies.
        #[arg(short, long, default_value_t = 3)]
        depth: u32,

        /// Your color.
        #[arg(short, long, value_enum, default_value_t = SideArg::White)]
        color: SideArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SideArg {
    White,
    Black,
}

impl From<SideArg> for Color {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::White => Color::White,
            SideArg::Black => Color::Black,
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            host,
            data_dir,
            memory,
        } => {
            let store: Arc<dyn RecordStore> = if memory {
                log::info!("Using in-memory storage");
                Arc::new(MemoryStore::new())
            } else {
                log::info!("Storage directory: {}", data_dir);
                Arc::new(FileStore::new(&data_dir).map_err(std::io::Error::other)?)
            };
            run_server(&host, port, store).await
        }
        Commands::Play { depth, color } => terminal::run_terminal_game(depth, color.into()),
    }
}

/// Starts the HTTP + WebSocket server with all API routes and Swagger UI.
async fn run_server(host: &str, port: u16, store: Arc<dyn RecordStore>) -> std::io::Result<()> {
    let openapi = ApiDoc::openapi();

    // Central identity → connection registry; also the event notifier
    let registry = ClientRegistry::new().start();
    let notifier = Arc::new(ActorNotifier::new(registry.clone()));

    let app_state = web::Data::new(AppState::new(store, notifier));
    let registry_data = web::Data::new(registry);

    let retry_state = app_state.clone();
    actix_web::rt::spawn(async move {
        let mut ticker = actix_web::rt::time::interval(UNSAVED_RETRY_INTERVAL);
        loop {
            ticker.tick().await;
            let remaining = retry_state.directory.flush_unsaved();
            if remaining > 0 {
                log::warn!("{} completed games are still unsaved", remaining);
            }
        }
    });

    log::info!("Starting chessroom server on {}:{}", host, port);
    log::info!("Swagger UI available at http://{}:{}/swagger-ui/", host, port);
    log::info!("API base URL: http://{}:{}/api", host, port);
    log::info!("WebSocket endpoint: ws://{}:{}/ws?token=...", host, port);

    let server_state = app_state.clone();
    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(server_state.clone())
            .app_data(registry_data.clone())
            .configure(api::configure_routes)
            .route("/ws", web::get().to(ws::ws_connect))
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone()),
            )
    })
    .bind((host, port))?
    .run()
    .await?;

    let lost = app_state.directory.flush_unsaved();
    if lost > 0 {
        log::error!("Shutting down with {} completed games unsaved", lost);
    }
    Ok(())
}
