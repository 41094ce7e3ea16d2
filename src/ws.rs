//! WebSocket transport for live play.
//!
//! ## Architecture
//!
//! - **`ClientRegistry`**: a singleton actor mapping each logged-in
//!   identity to its live connection. [`ActorNotifier`] wraps its address
//!   and is the [`Notifier`] the session directory pushes events through.
//!
//! - **`WsSession`**: one actor per connection. Authenticated by the
//!   `?token=` query parameter at upgrade time; parses JSON commands,
//!   routes them through [`AppState`] and answers the caller.
//!
//! ## Client → Server Protocol
//!
//! Clients send JSON messages with an `"action"` field:
//!
//! | Action               | Extra Fields                                 |
//! |----------------------|----------------------------------------------|
//! | `find_match`         |                                              |
//! | `cancel_matchmaking` |                                              |
//! | `make_move`          | `session_id`, `from`, `to`, `promotion?`     |
//! | `quit_game`          | `session_id`                                 |
//! | `resign`             | `session_id`                                 |
//! | `request_draw`       | `session_id`                                 |
//! | `accept_draw`        | `session_id`                                 |
//! | `reject_draw`        | `session_id`                                 |
//! | `get_session`        | `session_id`                                 |
//! | `get_legal_moves`    | `session_id`, `from`                         |
//!
//! Squares are either algebraic strings (`"e2"`) or `{"row": 6, "col": 4}`
//! objects. Every message may include a `"request_id"` string that is
//! echoed back in the response.
//!
//! ## Server → Client Protocol
//!
//! **Responses** (to a client command):
//! ```json
//! {
//!   "type": "response",
//!   "action": "<action>",
//!   "request_id": "<id or null>",
//!   "success": true,
//!   "data": { ... }
//! }
//! ```
//! Failures carry `"error"` and a machine-readable `"code"` instead of
//! `"data"`.
//!
//! **Events** (pushed by the session directory):
//! ```json
//! { "type": "event", "event": "opponent_move", "session_id": "<uuid>", ... }
//! ```

use actix::prelude::*;
use actix_web::{HttpRequest, HttpResponse, web};
use actix_web_actors::ws;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::GameError;
use crate::events::{Notifier, ServerEvent};
use crate::types::*;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// How often the server sends a WebSocket ping frame.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Maximum time the server waits for a pong before dropping the client.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Registry messages (actor mailbox protocol)
// ---------------------------------------------------------------------------

/// Registers a connection for an identity, replacing any older one.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub identity: Identity,
    pub conn_id: Uuid,
    pub addr: Addr<WsSession>,
}

/// Unregisters a connection. Ignored if the identity has since
/// reconnected under a different `conn_id`.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub identity: Identity,
    pub conn_id: Uuid,
}

/// A serialized event frame for one identity.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct Deliver {
    pub recipient: Identity,
    pub frame: String,
}

/// Internal message: deliver a text frame to a single `WsSession`.
#[derive(Message)]
#[rtype(result = "()")]
pub struct WsText(pub String);

// ---------------------------------------------------------------------------
// ClientRegistry: identity → connection (actor)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ClientRegistry {
    clients: HashMap<Identity, (Uuid, Addr<WsSession>)>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Actor for ClientRegistry {
    type Context = Context<Self>;
}

impl Handler<Connect> for ClientRegistry {
    type Result = ();

    fn handle(&mut self, msg: Connect, _ctx: &mut Context<Self>) {
        log::debug!("{} connected ({})", msg.identity, msg.conn_id);
        if let Some((old, _)) = self.clients.insert(msg.identity.clone(), (msg.conn_id, msg.addr)) {
            log::info!("{} reconnected, connection {} superseded", msg.identity, old);
        }
    }
}

impl Handler<Disconnect> for ClientRegistry {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _ctx: &mut Context<Self>) {
        let current = self.clients.get(&msg.identity).map(|(id, _)| *id);
        if current == Some(msg.conn_id) {
            self.clients.remove(&msg.identity);
            log::debug!("{} disconnected ({})", msg.identity, msg.conn_id);
        }
    }
}

impl Handler<Deliver> for ClientRegistry {
    type Result = ();

    fn handle(&mut self, msg: Deliver, _ctx: &mut Context<Self>) {
        match self.clients.get(&msg.recipient) {
            Some((_, addr)) => addr.do_send(WsText(msg.frame)),
            None => log::debug!("Dropping event for offline player {}", msg.recipient),
        }
    }
}

/// [`Notifier`] backed by the client registry actor.
pub struct ActorNotifier {
    registry: Addr<ClientRegistry>,
}

impl ActorNotifier {
    pub fn new(registry: Addr<ClientRegistry>) -> Self {
        Self { registry }
    }
}

impl Notifier for ActorNotifier {
    fn notify(&self, recipient: &Identity, event: ServerEvent) {
        match build_event_frame(&event) {
            Some(frame) => self.registry.do_send(Deliver {
                recipient: recipient.clone(),
                frame,
            }),
            None => log::error!("Failed to serialize {} event", event.name()),
        }
    }
}

// ---------------------------------------------------------------------------
// Client → Server message types
// ---------------------------------------------------------------------------

/// A square as sent by a client.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SquareInput {
    Algebraic(String),
    Coords { row: u8, col: u8 },
}

impl SquareInput {
    fn resolve(&self) -> Option<Position> {
        match self {
            SquareInput::Algebraic(s) => Position::from_algebraic(s),
            SquareInput::Coords { row, col } => Position::new(*row, *col),
        }
    }
}

/// A single JSON message received from a WebSocket client.
#[derive(Debug, Deserialize)]
struct WsClientMessage {
    action: String,

    #[serde(default)]
    request_id: Option<String>,

    #[serde(default)]
    session_id: Option<String>,

    /// Move origin square, also the square queried by `get_legal_moves`.
    #[serde(default)]
    from: Option<SquareInput>,

    #[serde(default)]
    to: Option<SquareInput>,

    /// Promotion piece: "q", "r", "b", "n" (or the full name).
    #[serde(default)]
    promotion: Option<String>,
}

fn parse_promotion(raw: &str) -> Option<PieceKind> {
    let kind = match raw.to_ascii_lowercase().as_str() {
        "q" | "queen" => PieceKind::Queen,
        "r" | "rook" => PieceKind::Rook,
        "b" | "bishop" => PieceKind::Bishop,
        "n" | "knight" => PieceKind::Knight,
        _ => return None,
    };
    Some(kind)
}

// ---------------------------------------------------------------------------
// Server → Client frame helpers
// ---------------------------------------------------------------------------

fn build_response(action: &str, request_id: &Option<String>, data: &serde_json::Value) -> String {
    serde_json::json!({
        "type": "response",
        "action": action,
        "request_id": request_id,
        "success": true,
        "data": data,
    })
    .to_string()
}

fn build_error_response(
    action: &str,
    request_id: &Option<String>,
    code: &str,
    error: &str,
) -> String {
    serde_json::json!({
        "type": "response",
        "action": action,
        "request_id": request_id,
        "success": false,
        "code": code,
        "error": error,
    })
    .to_string()
}

fn build_game_error(msg: &WsClientMessage, err: &GameError) -> String {
    build_error_response(&msg.action, &msg.request_id, err.code(), &err.to_string())
}

/// Serializes an event and marks it with `"type": "event"`.
fn build_event_frame(event: &ServerEvent) -> Option<String> {
    let mut value = serde_json::to_value(event).ok()?;
    value
        .as_object_mut()?
        .insert("type".to_string(), serde_json::Value::from("event"));
    Some(value.to_string())
}

// ---------------------------------------------------------------------------
// WsSession: per-connection actor
// ---------------------------------------------------------------------------

/// Actor representing a single authenticated WebSocket connection.
pub struct WsSession {
    conn_id: Uuid,
    identity: Identity,
    /// Timestamp of the last received pong (or initial connect time).
    last_heartbeat: Instant,
    app_state: web::Data<AppState>,
    registry: Addr<ClientRegistry>,
}

impl WsSession {
    pub fn new(identity: Identity, app_state: web::Data<AppState>, registry: Addr<ClientRegistry>) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            identity,
            last_heartbeat: Instant::now(),
            app_state,
            registry,
        }
    }

    /// Closes the connection if no pong arrives within `CLIENT_TIMEOUT`.
    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                log::warn!("{} heartbeat timeout, disconnecting", act.identity);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    // -----------------------------------------------------------------------
    // Command dispatch
    // -----------------------------------------------------------------------

    fn handle_message(&self, text: &str) -> String {
        let msg: WsClientMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                return build_error_response(
                    "unknown",
                    &None,
                    "InvalidMessage",
                    &format!("Invalid JSON: {}", e),
                );
            }
        };

        let result = match msg.action.as_str() {
            "find_match" => Ok(self.handle_find_match()),
            "cancel_matchmaking" => Ok(self.handle_cancel_matchmaking()),
            "make_move" => self.handle_make_move(&msg),
            "quit_game" => self.handle_forfeit(&msg, true),
            "resign" => self.handle_forfeit(&msg, false),
            "request_draw" => self.handle_request_draw(&msg),
            "accept_draw" => self.handle_accept_draw(&msg),
            "reject_draw" => self.handle_reject_draw(&msg),
            "get_session" => self.handle_get_session(&msg),
            "get_legal_moves" => self.handle_get_legal_moves(&msg),
            _ => Err(build_error_response(
                &msg.action,
                &msg.request_id,
                "UnknownAction",
                &format!("Unknown action: '{}'", msg.action),
            )),
        };

        match result {
            Ok(data) => build_response(&msg.action, &msg.request_id, &data),
            Err(frame) => frame,
        }
    }

    /// Extracts the `session_id` field, or a ready-made error frame.
    fn parse_session_id(&self, msg: &WsClientMessage) -> Result<Uuid, String> {
        let raw = msg.session_id.as_deref().ok_or_else(|| {
            build_error_response(&msg.action, &msg.request_id, "InvalidMessage", "Missing field: session_id")
        })?;
        Uuid::parse_str(raw).map_err(|_| {
            build_error_response(
                &msg.action,
                &msg.request_id,
                "InvalidMessage",
                &format!("Invalid session_id: {}", raw),
            )
        })
    }

    fn parse_square(
        &self,
        msg: &WsClientMessage,
        field: &str,
        input: &Option<SquareInput>,
    ) -> Result<Position, String> {
        let input = input.as_ref().ok_or_else(|| {
            build_error_response(
                &msg.action,
                &msg.request_id,
                "InvalidMessage",
                &format!("Missing field: {}", field),
            )
        })?;
        input.resolve().ok_or_else(|| {
            build_error_response(
                &msg.action,
                &msg.request_id,
                "InvalidMessage",
                &format!("Invalid square in field '{}': {:?}", field, input),
            )
        })
    }

    // -----------------------------------------------------------------------
    // Action handlers
    // -----------------------------------------------------------------------

    fn handle_find_match(&self) -> serde_json::Value {
        let status = self.app_state.find_match(&self.identity);
        serde_json::to_value(status).unwrap_or(serde_json::Value::Null)
    }

    fn handle_cancel_matchmaking(&self) -> serde_json::Value {
        let cancelled = self.app_state.cancel_matchmaking(&self.identity);
        serde_json::json!({ "cancelled": cancelled })
    }

    fn handle_make_move(&self, msg: &WsClientMessage) -> Result<serde_json::Value, String> {
        let id = self.parse_session_id(msg)?;
        let from = self.parse_square(msg, "from", &msg.from)?;
        let to = self.parse_square(msg, "to", &msg.to)?;
        let promotion = match msg.promotion.as_deref() {
            None => None,
            Some(raw) => Some(parse_promotion(raw).ok_or_else(|| {
                build_error_response(
                    &msg.action,
                    &msg.request_id,
                    "IllegalMove",
                    &format!("Invalid promotion piece: '{}'", raw),
                )
            })?),
        };
        let mv = Move {
            from,
            to,
            promotion,
        };

        let applied = self
            .app_state
            .directory
            .route_move(id, &self.identity, mv)
            .map_err(|e| build_game_error(msg, &e))?;

        Ok(serde_json::json!({
            "session_id": id.to_string(),
            "move": applied.mv,
            "notation": applied.mv.to_string(),
            "board": applied.board.to_rows(),
            "current_turn": applied.turn,
            "in_check": applied.in_check,
            "completion": applied.completion,
        }))
    }

    fn handle_forfeit(&self, msg: &WsClientMessage, quit: bool) -> Result<serde_json::Value, String> {
        let id = self.parse_session_id(msg)?;
        let directory = &self.app_state.directory;
        let outcome = if quit {
            directory.route_quit(id, &self.identity)
        } else {
            directory.route_resign(id, &self.identity)
        };
        let completion = outcome.map_err(|e| build_game_error(msg, &e))?;
        Ok(serde_json::json!({
            "session_id": id.to_string(),
            "completion": completion,
        }))
    }

    fn handle_request_draw(&self, msg: &WsClientMessage) -> Result<serde_json::Value, String> {
        let id = self.parse_session_id(msg)?;
        self.app_state
            .directory
            .route_offer_draw(id, &self.identity)
            .map_err(|e| build_game_error(msg, &e))?;
        Ok(serde_json::json!({ "session_id": id.to_string(), "offered": true }))
    }

    fn handle_accept_draw(&self, msg: &WsClientMessage) -> Result<serde_json::Value, String> {
        let id = self.parse_session_id(msg)?;
        let completion = self
            .app_state
            .directory
            .route_accept_draw(id, &self.identity)
            .map_err(|e| build_game_error(msg, &e))?;
        Ok(serde_json::json!({
            "session_id": id.to_string(),
            "completion": completion,
        }))
    }

    fn handle_reject_draw(&self, msg: &WsClientMessage) -> Result<serde_json::Value, String> {
        let id = self.parse_session_id(msg)?;
        self.app_state
            .directory
            .route_reject_draw(id, &self.identity)
            .map_err(|e| build_game_error(msg, &e))?;
        Ok(serde_json::json!({ "session_id": id.to_string(), "rejected": true }))
    }

    fn handle_get_session(&self, msg: &WsClientMessage) -> Result<serde_json::Value, String> {
        let id = self.parse_session_id(msg)?;
        let view = self
            .app_state
            .directory
            .with_session(id, |s| s.view())
            .map_err(|e| build_game_error(msg, &e))?;
        serde_json::to_value(view).map_err(|e| {
            build_error_response(&msg.action, &msg.request_id, "Internal", &e.to_string())
        })
    }

    fn handle_get_legal_moves(&self, msg: &WsClientMessage) -> Result<serde_json::Value, String> {
        let id = self.parse_session_id(msg)?;
        let from = self.parse_square(msg, "from", &msg.from)?;
        let moves = self
            .app_state
            .directory
            .with_session(id, |s| s.legal_moves_from(from))
            .map_err(|e| build_game_error(msg, &e))?;
        Ok(serde_json::json!({
            "session_id": id.to_string(),
            "from": from,
            "count": moves.len(),
            "moves": moves,
        }))
    }
}

// ---------------------------------------------------------------------------
// WsSession: Actor + StreamHandler implementation
// ---------------------------------------------------------------------------

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        log::info!("WS connection {} started for {}", self.conn_id, self.identity);
        self.start_heartbeat(ctx);
        self.registry.do_send(Connect {
            identity: self.identity.clone(),
            conn_id: self.conn_id,
            addr: ctx.address(),
        });
    }

    /// Leaving the connection leaves the queue and forfeits live sessions.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        log::info!("WS connection {} stopped for {}", self.conn_id, self.identity);
        self.registry.do_send(Disconnect {
            identity: self.identity.clone(),
            conn_id: self.conn_id,
        });
        self.app_state.disconnect(&self.identity);
    }
}

/// Handler for incoming WebSocket frames (text, binary, ping, pong, close).
impl actix::StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                let response = self.handle_message(&text);
                ctx.text(response);
            }
            Ok(ws::Message::Binary(_)) => {
                log::warn!("{}: binary messages not supported", self.identity);
                ctx.text(build_error_response(
                    "binary",
                    &None,
                    "InvalidMessage",
                    "Binary messages are not supported. Please send JSON text.",
                ));
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                log::info!("{} closed the connection: {:?}", self.identity, reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                log::error!("{} protocol error: {}", self.identity, e);
                ctx.stop();
            }
        }
    }
}

impl Handler<WsText> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: WsText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

// ---------------------------------------------------------------------------
// HTTP → WebSocket upgrade handler
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Upgrades an authenticated HTTP request to a WebSocket connection.
pub async fn ws_connect(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<WsAuthQuery>,
    app_state: web::Data<AppState>,
    registry: web::Data<Addr<ClientRegistry>>,
) -> Result<HttpResponse, actix_web::Error> {
    let identity = query
        .token
        .as_deref()
        .and_then(|token| app_state.auth.verify(token));
    let Some(identity) = identity else {
        log::warn!("Rejected WebSocket connection from {:?}: bad token", req.peer_addr());
        return Ok(HttpResponse::Unauthorized().json(crate::api::ErrorResponse {
            error: "Missing or invalid token".to_string(),
        }));
    };

    log::info!("WebSocket connection request from {} ({:?})", identity, req.peer_addr());
    let session = WsSession::new(identity, app_state, registry.get_ref().clone());
    ws::start(session, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_input_accepts_both_forms() {
        let a: SquareInput = serde_json::from_str("\"e2\"").unwrap();
        assert_eq!(a.resolve(), Some(Position::at(6, 4)));
        let b: SquareInput = serde_json::from_str(r#"{"row": 6, "col": 4}"#).unwrap();
        assert_eq!(b.resolve(), Some(Position::at(6, 4)));
        let off: SquareInput = serde_json::from_str(r#"{"row": 8, "col": 0}"#).unwrap();
        assert_eq!(off.resolve(), None);
    }

    #[test]
    fn test_client_message_defaults() {
        let msg: WsClientMessage = serde_json::from_str(r#"{"action": "find_match"}"#).unwrap();
        assert_eq!(msg.action, "find_match");
        assert!(msg.session_id.is_none());
        assert!(msg.request_id.is_none());
    }

    #[test]
    fn test_parse_promotion() {
        assert_eq!(parse_promotion("Q"), Some(PieceKind::Queen));
        assert_eq!(parse_promotion("knight"), Some(PieceKind::Knight));
        assert_eq!(parse_promotion("k"), None);
        assert_eq!(parse_promotion("p"), None);
    }

    #[test]
    fn test_event_frame_is_tagged() {
        let frame = build_event_frame(&ServerEvent::DrawAccepted {
            session_id: Uuid::nil(),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"], "draw_accepted");
    }

    #[test]
    fn test_error_frame_carries_code() {
        let err = GameError::NotYourTurn;
        let frame = build_error_response("make_move", &Some("r1".into()), err.code(), &err.to_string());
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["code"], "NotYourTurn");
        assert_eq!(value["request_id"], "r1");
    }
}
