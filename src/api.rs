//! REST API for the chess server.
//!
//! This module provides:
//! - Account registration and login (token issuance)
//! - Player statistics and completed-game records
//! - Inspection of live sessions, their legal moves and boards
//! - Administrative abort of a live session
//! - A view of the matchmaking queue
//!
//! Gameplay itself (matchmaking, moves, draws) runs over the websocket
//! in [`crate::ws`]; both share the [`AppState`] defined here.
//!
//! The API is documented with OpenAPI/Swagger via `utoipa`.
//! Swagger UI is available at `/swagger-ui/`.

use actix_web::{HttpRequest, HttpResponse, Responder, http::header, web};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::auth::{AuthService, AuthToken, Credentials};
use crate::directory::SessionDirectory;
use crate::error::{AuthError, GameError};
use crate::events::Notifier;
use crate::matchmaking::{MatchmakingQueue, WaitingEntry};
use crate::movegen::Destination;
use crate::session::{SessionSummary, SessionView};
use crate::storage::{self, GameRecord, RecordStore, UserStats};
use crate::types::*;

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// Shared application state.
///
/// Wrapped in `web::Data` (which uses `Arc` internally) and shared across
/// all HTTP and WebSocket handlers. Every component is an owned instance,
/// so tests build a fresh one per case.
pub struct AppState {
    pub auth: AuthService,
    /// Waiting players. `enqueue` and `try_pair` run under one lock.
    pub matchmaking: Mutex<MatchmakingQueue>,
    pub directory: SessionDirectory,
    pub store: Arc<dyn RecordStore>,
}

/// What a `find_match` request led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "session_id", rename_all = "snake_case")]
pub enum MatchStatus {
    /// Added to the queue.
    Queued,
    /// Was already waiting; nothing changed.
    AlreadyQueued,
    /// Paired immediately into this session.
    Paired(Uuid),
    /// Already playing in this session; not queued.
    InSession(Uuid),
}

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            auth: AuthService::new(Arc::clone(&store)),
            matchmaking: Mutex::new(MatchmakingQueue::new()),
            directory: SessionDirectory::new(Arc::clone(&store), notifier),
            store,
        }
    }

    /// Queues `identity` and pairs the two longest-waiting players if
    /// possible. Both paired players receive `game_found`.
    ///
    /// The live-session check, the enqueue, the pairing and the session
    /// registration all happen under the queue lock, so a player can never
    /// be both waiting and playing.
    pub fn find_match(&self, identity: &Identity) -> MatchStatus {
        let mut queue = self.matchmaking.lock();
        if let Some(id) = self.directory.session_of(identity) {
            return MatchStatus::InSession(id);
        }

        let queued = queue.enqueue(identity.clone());
        match queue.try_pair() {
            Some(session) => {
                let includes_caller = session.color_of(identity).is_some();
                let id = self.directory.start_session(session);
                if includes_caller {
                    MatchStatus::Paired(id)
                } else if queued {
                    MatchStatus::Queued
                } else {
                    MatchStatus::AlreadyQueued
                }
            }
            None if queued => MatchStatus::Queued,
            None => MatchStatus::AlreadyQueued,
        }
    }

    pub fn cancel_matchmaking(&self, identity: &Identity) -> bool {
        self.matchmaking.lock().cancel(identity)
    }

    /// Connection loss: leave the queue and forfeit any live session.
    pub fn disconnect(&self, identity: &Identity) {
        self.cancel_matchmaking(identity);
        for (id, completion) in self.directory.route_disconnect(identity) {
            log::info!(
                "{} disconnected from session {} ({:?})",
                identity,
                id,
                completion.winner().map(Identity::as_str)
            );
        }
    }

    /// Resolves the `Authorization: Bearer <token>` header.
    pub fn identity_from_request(&self, req: &HttpRequest) -> Option<Identity> {
        let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
        let token = value.strip_prefix("Bearer ")?.trim();
        self.auth.verify(token)
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Error response for the API.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message describing what went wrong.
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub active_sessions: usize,
    pub waiting_players: usize,
    /// Completed games waiting for a storage retry.
    pub unsaved_games: usize,
}

/// Completed games known to the store.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GameListResponse {
    pub games: Vec<GameRecord>,
    pub total: usize,
}

/// Live sessions.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
    pub total: usize,
}

/// Response listing the legal destinations of one piece.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LegalMovesResponse {
    pub from: Position,
    /// The color of the piece on `from`, if any.
    pub color: Option<Color>,
    pub moves: Vec<Destination>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AbortResponse {
    pub session_id: String,
    pub reason: EndReason,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MatchmakingResponse {
    pub waiting: Vec<WaitingEntry>,
    pub count: usize,
}

/// Query parameters for the legal-moves endpoint.
#[derive(Debug, Deserialize)]
pub struct SquareQuery {
    pub row: u8,
    pub col: u8,
}

fn error(status: actix_web::http::StatusCode, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(ErrorResponse {
        error: message.into(),
    })
}

fn game_error_response(err: &GameError) -> HttpResponse {
    let mut builder = match err {
        GameError::SessionNotFound(_) => HttpResponse::NotFound(),
        GameError::NotAParticipant => HttpResponse::Forbidden(),
        _ => HttpResponse::BadRequest(),
    };
    builder.json(ErrorResponse {
        error: err.to_string(),
    })
}

fn auth_error_response(err: &AuthError) -> HttpResponse {
    let status = match err {
        AuthError::UsernameTaken => actix_web::http::StatusCode::CONFLICT,
        AuthError::InvalidUsername | AuthError::EmptyPassword => {
            actix_web::http::StatusCode::BAD_REQUEST
        }
        AuthError::InvalidCredentials => actix_web::http::StatusCode::UNAUTHORIZED,
        AuthError::Storage(e) => {
            log::error!("Auth storage failure: {}", e);
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR
        }
        AuthError::PasswordHash(e) => {
            log::error!("Password hashing failure: {}", e);
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error(status, err.to_string())
}

fn parse_id(raw: &str) -> Result<Uuid, HttpResponse> {
    Uuid::parse_str(raw).map_err(|_| {
        HttpResponse::BadRequest().json(ErrorResponse {
            error: format!("Invalid id: {}", raw),
        })
    })
}

// ---------------------------------------------------------------------------
// OpenAPI definition
// ---------------------------------------------------------------------------

/// OpenAPI documentation for the chess server API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "chessroom: online chess server",
        version = "0.1.0",
        description = "Accounts, game records and live-session inspection. \
            Gameplay (matchmaking, moves, draws) runs over the websocket at `/ws?token=...`.",
        license(name = "MIT")
    ),
    paths(
        health,
        register,
        login,
        logout,
        user_stats,
        list_games,
        get_game,
        list_sessions,
        get_session,
        abort_session,
        get_legal_moves,
        get_board_ascii,
        get_matchmaking,
    ),
    components(schemas(
        ErrorResponse,
        HealthResponse,
        Credentials,
        AuthToken,
        UserStats,
        GameRecord,
        GameListResponse,
        SessionView,
        SessionSummary,
        SessionListResponse,
        LegalMovesResponse,
        Destination,
        Position,
        AbortResponse,
        MatchmakingResponse,
        WaitingEntry,
        Color,
        PieceKind,
        CastlingRights,
        SideCastlingRights,
        SessionStatus,
        EndReason,
    )),
    tags(
        (name = "accounts", description = "Registration, login and statistics"),
        (name = "games", description = "Completed game records"),
        (name = "sessions", description = "Live session inspection and administration"),
        (name = "matchmaking", description = "Matchmaking queue"),
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Account handlers
// ---------------------------------------------------------------------------

/// Liveness check with session and queue counts.
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "sessions",
    responses((status = 200, description = "Server is up", body = HealthResponse))
)]
pub async fn health(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        active_sessions: data.directory.len(),
        waiting_players: data.matchmaking.lock().len(),
        unsaved_games: data.directory.unsaved_count(),
    })
}

/// Register a new account.
///
/// Usernames are 3-32 characters of letters, digits, `_` and `-`.
/// Returns a token usable immediately.
#[utoipa::path(
    post,
    path = "/api/register",
    tag = "accounts",
    request_body = Credentials,
    responses(
        (status = 201, description = "Account created", body = AuthToken),
        (status = 400, description = "Invalid username or password", body = ErrorResponse),
        (status = 409, description = "Username taken", body = ErrorResponse),
    )
)]
pub async fn register(body: web::Json<Credentials>, data: web::Data<AppState>) -> impl Responder {
    match data.auth.register(&body) {
        Ok(token) => HttpResponse::Created().json(token),
        Err(e) => auth_error_response(&e),
    }
}

/// Log in with existing credentials.
#[utoipa::path(
    post,
    path = "/api/login",
    tag = "accounts",
    request_body = Credentials,
    responses(
        (status = 200, description = "Logged in", body = AuthToken),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
    )
)]
pub async fn login(body: web::Json<Credentials>, data: web::Data<AppState>) -> impl Responder {
    match data.auth.login(&body) {
        Ok(token) => HttpResponse::Ok().json(token),
        Err(e) => auth_error_response(&e),
    }
}

/// Revoke the caller's bearer token.
#[utoipa::path(
    post,
    path = "/api/logout",
    tag = "accounts",
    params(("Authorization" = String, Header, description = "Bearer token")),
    responses(
        (status = 204, description = "Token revoked"),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
    )
)]
pub async fn logout(req: HttpRequest, data: web::Data<AppState>) -> impl Responder {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);
    match token {
        Some(token) if data.auth.logout(token) => HttpResponse::NoContent().finish(),
        _ => error(
            actix_web::http::StatusCode::UNAUTHORIZED,
            "Missing or invalid bearer token",
        ),
    }
}

/// Win/loss/draw totals of the calling player.
///
/// Aborted games are not counted.
#[utoipa::path(
    get,
    path = "/api/user/stats",
    tag = "accounts",
    params(("Authorization" = String, Header, description = "Bearer token")),
    responses(
        (status = 200, description = "Statistics", body = UserStats),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
    )
)]
pub async fn user_stats(req: HttpRequest, data: web::Data<AppState>) -> impl Responder {
    let Some(identity) = data.identity_from_request(&req) else {
        return error(
            actix_web::http::StatusCode::UNAUTHORIZED,
            "Missing or invalid bearer token",
        );
    };
    match storage::user_stats(data.store.as_ref(), &identity) {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            log::error!("Failed to compute stats for {}: {}", identity, e);
            error(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Game record handlers
// ---------------------------------------------------------------------------

/// List completed games, most recent first.
#[utoipa::path(
    get,
    path = "/api/games",
    tag = "games",
    responses((status = 200, description = "Stored games", body = GameListResponse))
)]
pub async fn list_games(data: web::Data<AppState>) -> impl Responder {
    match data.store.list_games() {
        Ok(games) => {
            let total = games.len();
            HttpResponse::Ok().json(GameListResponse { games, total })
        }
        Err(e) => error(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Get one completed game.
#[utoipa::path(
    get,
    path = "/api/games/{game_id}",
    tag = "games",
    params(("game_id" = String, Path, description = "Game identifier (UUID)")),
    responses(
        (status = 200, description = "Game record", body = GameRecord),
        (status = 404, description = "Game not found", body = ErrorResponse),
    )
)]
pub async fn get_game(path: web::Path<String>, data: web::Data<AppState>) -> impl Responder {
    let id = match parse_id(&path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match data.store.get_game(&id) {
        Ok(Some(record)) => HttpResponse::Ok().json(record),
        Ok(None) => error(
            actix_web::http::StatusCode::NOT_FOUND,
            format!("Game {} not found", id),
        ),
        Err(e) => error(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Live session handlers
// ---------------------------------------------------------------------------

/// List live sessions.
#[utoipa::path(
    get,
    path = "/api/sessions",
    tag = "sessions",
    responses((status = 200, description = "Live sessions", body = SessionListResponse))
)]
pub async fn list_sessions(data: web::Data<AppState>) -> impl Responder {
    let sessions = data.directory.summaries();
    let total = sessions.len();
    HttpResponse::Ok().json(SessionListResponse { sessions, total })
}

/// Get the full state of a live session.
#[utoipa::path(
    get,
    path = "/api/sessions/{session_id}",
    tag = "sessions",
    params(("session_id" = String, Path, description = "Session identifier (UUID)")),
    responses(
        (status = 200, description = "Session state", body = SessionView),
        (status = 404, description = "Session not found", body = ErrorResponse),
    )
)]
pub async fn get_session(path: web::Path<String>, data: web::Data<AppState>) -> impl Responder {
    let id = match parse_id(&path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match data.directory.with_session(id, |s| s.view()) {
        Ok(view) => HttpResponse::Ok().json(view),
        Err(e) => game_error_response(&e),
    }
}

/// Abort a live session.
///
/// Only a participant may abort. Both players receive `game_over` with
/// reason `aborted` and no winner. The session is stored and removed.
#[utoipa::path(
    delete,
    path = "/api/sessions/{session_id}",
    tag = "sessions",
    params(
        ("session_id" = String, Path, description = "Session identifier (UUID)"),
        ("Authorization" = String, Header, description = "Bearer token"),
    ),
    responses(
        (status = 200, description = "Session aborted", body = AbortResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 403, description = "Caller is not a participant", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
    )
)]
pub async fn abort_session(
    req: HttpRequest,
    path: web::Path<String>,
    data: web::Data<AppState>,
) -> impl Responder {
    let Some(identity) = data.identity_from_request(&req) else {
        return error(
            actix_web::http::StatusCode::UNAUTHORIZED,
            "Missing or invalid bearer token",
        );
    };
    let id = match parse_id(&path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match data.directory.with_session(id, |s| s.color_of(&identity).is_some()) {
        Ok(true) => {}
        Ok(false) => {
            log::warn!("{} tried to abort session {} without playing in it", identity, id);
            return error(
                actix_web::http::StatusCode::FORBIDDEN,
                "Only a participant may abort this session",
            );
        }
        Err(e) => return game_error_response(&e),
    }
    log::info!("{} aborted session {}", identity, id);
    match data.directory.abort(id) {
        Ok(completion) => HttpResponse::Ok().json(AbortResponse {
            session_id: id.to_string(),
            reason: completion.reason,
        }),
        Err(e) => game_error_response(&e),
    }
}

/// Legal destinations of the piece on one square.
///
/// Ignores whose turn it is; an empty square yields no moves.
#[utoipa::path(
    get,
    path = "/api/sessions/{session_id}/moves",
    tag = "sessions",
    params(
        ("session_id" = String, Path, description = "Session identifier (UUID)"),
        ("row" = u8, Query, description = "Row 0-7, 0 is rank 8"),
        ("col" = u8, Query, description = "Column 0-7, 0 is the a-file"),
    ),
    responses(
        (status = 200, description = "Legal destinations", body = LegalMovesResponse),
        (status = 400, description = "Square off the board", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
    )
)]
pub async fn get_legal_moves(
    path: web::Path<String>,
    query: web::Query<SquareQuery>,
    data: web::Data<AppState>,
) -> impl Responder {
    let id = match parse_id(&path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Some(from) = Position::new(query.row, query.col) else {
        return error(
            actix_web::http::StatusCode::BAD_REQUEST,
            format!("Square ({}, {}) is off the board", query.row, query.col),
        );
    };

    let result = data.directory.with_session(id, |s| {
        (s.board.get(from).map(|p| p.color), s.legal_moves_from(from))
    });
    match result {
        Ok((color, moves)) => {
            let count = moves.len();
            HttpResponse::Ok().json(LegalMovesResponse {
                from,
                color,
                moves,
                count,
            })
        }
        Err(e) => game_error_response(&e),
    }
}

/// Get an ASCII representation of a live session's board.
#[utoipa::path(
    get,
    path = "/api/sessions/{session_id}/board",
    tag = "sessions",
    params(("session_id" = String, Path, description = "Session identifier (UUID)")),
    responses(
        (status = 200, description = "Board ASCII art", content_type = "text/plain"),
        (status = 404, description = "Session not found", body = ErrorResponse),
    )
)]
pub async fn get_board_ascii(path: web::Path<String>, data: web::Data<AppState>) -> impl Responder {
    let id = match parse_id(&path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match data
        .directory
        .with_session(id, |s| board_to_ascii(&s.board, s.current_turn))
    {
        Ok(ascii) => HttpResponse::Ok().content_type("text/plain").body(ascii),
        Err(e) => HttpResponse::NotFound()
            .content_type("text/plain")
            .body(e.to_string()),
    }
}

/// Players currently waiting for an opponent.
#[utoipa::path(
    get,
    path = "/api/matchmaking",
    tag = "matchmaking",
    responses((status = 200, description = "Waiting players", body = MatchmakingResponse))
)]
pub async fn get_matchmaking(data: web::Data<AppState>) -> impl Responder {
    let waiting: Vec<WaitingEntry> = data.matchmaking.lock().entries().cloned().collect();
    let count = waiting.len();
    HttpResponse::Ok().json(MatchmakingResponse { waiting, count })
}

/// Renders the board as an ASCII art string, rank 8 at the top.
pub fn board_to_ascii(board: &Board, turn: Color) -> String {
    let mut s = String::new();
    s.push_str("  +---+---+---+---+---+---+---+---+\n");
    for row in 0..8u8 {
        s.push_str(&format!("{} ", 8 - row));
        for col in 0..8u8 {
            let ch = board
                .get(Position::at(row, col))
                .map_or(' ', Piece::to_fen_char);
            s.push_str(&format!("| {} ", ch));
        }
        s.push_str("|\n");
        s.push_str("  +---+---+---+---+---+---+---+---+\n");
    }
    s.push_str("    a   b   c   d   e   f   g   h\n");
    s.push_str(&format!("\n  {} to move\n", turn));
    s
}

/// Configures all API routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(health))
            .route("/register", web::post().to(register))
            .route("/login", web::post().to(login))
            .route("/logout", web::post().to(logout))
            .route("/user/stats", web::get().to(user_stats))
            .route("/games", web::get().to(list_games))
            .route("/games/{game_id}", web::get().to(get_game))
            .route("/sessions", web::get().to(list_sessions))
            .route("/sessions/{session_id}", web::get().to(get_session))
            .route("/sessions/{session_id}", web::delete().to(abort_session))
            .route("/sessions/{session_id}/moves", web::get().to(get_legal_moves))
            .route("/sessions/{session_id}/board", web::get().to(get_board_ascii))
            .route("/matchmaking", web::get().to(get_matchmaking)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ServerEvent;
    use crate::events::testing::RecordingNotifier;
    use crate::storage::MemoryStore;
    use actix_web::{App, test as actix_test};
    use std::collections::HashMap;

    fn state() -> (web::Data<AppState>, Arc<RecordingNotifier>) {
        let events = Arc::new(RecordingNotifier::default());
        let state = AppState::new(Arc::new(MemoryStore::new()), events.clone());
        (web::Data::new(state), events)
    }

    fn id(name: &str) -> Identity {
        Identity::new(name)
    }

    fn creds(user: &str, pass: &str) -> Credentials {
        Credentials {
            username: user.into(),
            password: pass.into(),
        }
    }

    #[test]
    fn test_find_match_pairs_in_arrival_order() {
        let (data, events) = state();
        assert_eq!(data.find_match(&id("a")), MatchStatus::Queued);
        assert_eq!(data.find_match(&id("a")), MatchStatus::AlreadyQueued);

        let MatchStatus::Paired(session_id) = data.find_match(&id("b")) else {
            panic!("expected a pairing");
        };
        assert_eq!(
            events.events_for("a"),
            vec![ServerEvent::GameFound {
                session_id,
                color: Color::White,
                opponent: id("b"),
            }]
        );
        assert_eq!(data.find_match(&id("a")), MatchStatus::InSession(session_id));
        assert_eq!(data.find_match(&id("c")), MatchStatus::Queued);
        assert_eq!(data.matchmaking.lock().len(), 1);
    }

    #[test]
    fn test_disconnect_leaves_queue_and_forfeits() {
        let (data, events) = state();
        data.find_match(&id("a"));
        let MatchStatus::Paired(session_id) = data.find_match(&id("b")) else {
            panic!("expected a pairing");
        };
        data.find_match(&id("c"));

        data.disconnect(&id("c"));
        assert!(data.matchmaking.lock().is_empty());

        data.disconnect(&id("b"));
        data.disconnect(&id("b"));
        let record = data.store.get_game(&session_id).unwrap().unwrap();
        assert_eq!(record.winner, Some(id("a")));
        let game_overs = events
            .events_for("a")
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::GameOver { .. }))
            .count();
        assert_eq!(game_overs, 1);
    }

    #[test]
    fn test_concurrent_find_match_pairs_everyone_once() {
        const PAIRS: usize = 16;
        let (data, events) = state();
        let players: Vec<Identity> = (0..PAIRS * 2).map(|i| id(&format!("player_{}", i))).collect();

        std::thread::scope(|scope| {
            for player in &players {
                let data = &data;
                scope.spawn(move || data.find_match(player));
            }
        });

        assert_eq!(data.directory.len(), PAIRS);
        assert!(data.matchmaking.lock().is_empty());

        let mut seats: HashMap<Uuid, usize> = HashMap::new();
        for player in &players {
            let session_id = data
                .directory
                .session_of(player)
                .unwrap_or_else(|| panic!("{} was left without a session", player));
            *seats.entry(session_id).or_default() += 1;

            let found = events
                .events_for(player.as_str())
                .into_iter()
                .filter(|e| matches!(e, ServerEvent::GameFound { .. }))
                .count();
            assert_eq!(found, 1);
        }
        assert_eq!(seats.len(), PAIRS);
        assert!(seats.values().all(|&n| n == 2));
    }

    #[actix_web::test]
    async fn test_health() {
        let (data, _) = state();
        let app = actix_test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;
        let req = actix_test::TestRequest::get().uri("/api/health").to_request();
        let resp: HealthResponse = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.status, "ok");
        assert_eq!(resp.active_sessions, 0);
    }

    #[actix_web::test]
    async fn test_register_login_and_stats() {
        let (data, _) = state();
        let app = actix_test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;
        let creds = serde_json::json!({ "username": "alice", "password": "pw" });

        let req = actix_test::TestRequest::post().uri("/api/register").set_json(&creds).to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);

        let req = actix_test::TestRequest::post().uri("/api/register").set_json(&creds).to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 409);

        let req = actix_test::TestRequest::post().uri("/api/login").set_json(&creds).to_request();
        let token: AuthToken = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(token.username, "alice");

        let bad = serde_json::json!({ "username": "alice", "password": "nope" });
        let req = actix_test::TestRequest::post().uri("/api/login").set_json(&bad).to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 401);

        let req = actix_test::TestRequest::get().uri("/api/user/stats").to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 401);

        let req = actix_test::TestRequest::get()
            .uri("/api/user/stats")
            .insert_header((header::AUTHORIZATION, format!("Bearer {}", token.token)))
            .to_request();
        let stats: UserStats = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(stats, UserStats::default());
    }

    #[actix_web::test]
    async fn test_logout_revokes_bearer_token() {
        let (data, _) = state();
        let token = data.auth.register(&creds("alice", "pw")).unwrap().token;
        let app = actix_test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;
        let bearer = format!("Bearer {}", token);

        let req = actix_test::TestRequest::post()
            .uri("/api/logout")
            .insert_header((header::AUTHORIZATION, bearer.clone()))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 204);

        let req = actix_test::TestRequest::get()
            .uri("/api/user/stats")
            .insert_header((header::AUTHORIZATION, bearer.clone()))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 401);

        let req = actix_test::TestRequest::post()
            .uri("/api/logout")
            .insert_header((header::AUTHORIZATION, bearer))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 401);
    }

    #[actix_web::test]
    async fn test_session_inspection_and_abort() {
        let (data, events) = state();
        data.find_match(&id("alice"));
        let MatchStatus::Paired(session_id) = data.find_match(&id("bob")) else {
            panic!("expected a pairing");
        };
        let app = actix_test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let req = actix_test::TestRequest::get()
            .uri(&format!("/api/sessions/{}", session_id))
            .to_request();
        let view: SessionView = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(view.white, id("alice"));
        assert_eq!(view.board[7], "RNBQKBNR");
        assert_eq!(view.current_turn, Color::White);

        // Knight on g1
        let req = actix_test::TestRequest::get()
            .uri(&format!("/api/sessions/{}/moves?row=7&col=6", session_id))
            .to_request();
        let moves: LegalMovesResponse = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(moves.count, 2);
        assert_eq!(moves.color, Some(Color::White));

        let req = actix_test::TestRequest::get()
            .uri(&format!("/api/sessions/{}/moves?row=8&col=0", session_id))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 400);

        let req = actix_test::TestRequest::delete()
            .uri(&format!("/api/sessions/{}", session_id))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 401);

        let stranger = data.auth.register(&creds("mallory", "pw")).unwrap();
        let req = actix_test::TestRequest::delete()
            .uri(&format!("/api/sessions/{}", session_id))
            .insert_header((header::AUTHORIZATION, format!("Bearer {}", stranger.token)))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 403);
        assert!(data.directory.session_of(&id("bob")).is_some());

        let player = data.auth.register(&creds("alice", "pw")).unwrap();
        let req = actix_test::TestRequest::delete()
            .uri(&format!("/api/sessions/{}", session_id))
            .insert_header((header::AUTHORIZATION, format!("Bearer {}", player.token)))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 200);
        assert!(matches!(
            events.events_for("bob").last(),
            Some(ServerEvent::GameOver { winner: None, reason: EndReason::Aborted, .. })
        ));

        let req = actix_test::TestRequest::get()
            .uri(&format!("/api/sessions/{}", session_id))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), 404);

        let req = actix_test::TestRequest::get()
            .uri(&format!("/api/games/{}", session_id))
            .to_request();
        let record: GameRecord = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(record.reason, Some(EndReason::Aborted));
    }

    #[test]
    fn test_board_ascii_has_rank_8_on_top() {
        let ascii = board_to_ascii(&Board::standard_setup(), Color::White);
        let second_line = ascii.lines().nth(1).unwrap();
        assert!(second_line.starts_with("8 | r "));
        assert!(ascii.contains("white to move"));
    }
}
