//! WASI-compatible rendezvous and signaling relay using wstd
//!
//! Two clients that share a passkey are paired into a session and can then
//! exchange opaque negotiation payloads (offers, answers, ICE candidates)
//! until they have a direct connection. The payloads are never inspected.
//!
//! # Sessions
//!
//! - The first client to join a passkey is the host, the second the guest.
//! - A session holds at most two clients; further joins get `Room is full`.
//! - A session disappears as soon as its last client leaves.
//!
//! # Protocol
//!
//! Messages are JSON envelopes `{"event": <name>, "data": <payload>}`.
//!
//! Client → server:
//! - `{"event": "join-room", "data": {"passkey": "...", "playerName": "...", "opponentName": "..."}}`
//! - `{"event": "signal", "data": <anything>}`
//!
//! Server → client:
//! - `{"event": "room-joined", "data": {"isHost": true, "roomId": "<passkey>"}}`
//! - `{"event": "player-joined"}` - sent to the host once a guest arrives
//! - `{"event": "signal", "data": <anything>}`
//! - `{"event": "error", "data": "Room is full"}`
//!
//! # Transport
//!
//! HTTP long-polling, since WASI HTTP components have no WebSocket upgrade:
//!
//! - **POST /connect** - open a connection, returns `{"connectionId": "<uuid>"}`
//! - **POST /emit** - send an event (X-Connection-Id header required),
//!   returns `{"events": [...]}`
//! - **GET /poll?connection_id={id}** - fetch queued events
//! - **POST /disconnect** - leave (X-Connection-Id header required)
//! - **GET /health** - Health check
//!
//! Connections that stop polling are dropped after the idle timeout.
//!
//! # Example
//!
//! ```bash
//! # Start the server
//! wasmtime serve -S common --dir . --env RENDEZVOUS_STATE_FILE=rendezvous_state.json \
//!   --addr 127.0.0.1:3001 rendezvous-signaling-wasm.wasm
//!
//! # Open a connection
//! curl -X POST http://127.0.0.1:3001/connect
//!
//! # Join a room
//! curl -X POST -H "X-Connection-Id: <your-id>" -H "Content-Type: application/json" \
//!   -d '{"event":"join-room","data":{"passkey":"ABC123","playerName":"Alice"}}' \
//!   http://127.0.0.1:3001/emit
//!
//! # Poll for events
//! curl "http://127.0.0.1:3001/poll?connection_id=<your-id>"
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod session;
pub mod state;

pub use config::Config;
pub use error::{GatewayError, Rejection};
pub use gateway::{Gateway, GatewayStatus};
pub use handler::handle_request;
pub use protocol::{ClientEvent, ConnectionId, JoinRoom, Passkey, RoomJoined, ServerEvent};
pub use registry::SessionRegistry;
pub use session::{Participant, Role, Session, SessionState};
pub use state::{ServerState, StoreAccess};
