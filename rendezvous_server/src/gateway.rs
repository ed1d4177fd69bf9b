//! Connection lifecycle: join, relay and cleanup
//!
//! The gateway is the only component that touches the session registry.
//! Every operation runs under a single lock, so admissions and releases for
//! the same passkey can never interleave.

use crate::config::Config;
use crate::error::{GatewayError, Rejection};
use crate::protocol::{ClientEvent, ConnectionId, JoinRoom, Passkey, RoomJoined, ServerEvent};
use crate::registry::SessionRegistry;
use crate::relay::{Mailboxes, Timestamp, now_millis};
use crate::session::{Participant, Role, SessionState};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything the gateway mutates
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct GatewayState {
    registry: SessionRegistry,
    /// Session each open connection has joined, if any
    connections: HashMap<ConnectionId, Option<Passkey>>,
    mailboxes: Mailboxes,
}

impl GatewayState {
    fn open(&mut self, connection_id: ConnectionId, now: Timestamp) {
        self.connections.insert(connection_id, None);
        self.mailboxes.open(connection_id, now);
    }

    fn join(&mut self, connection_id: ConnectionId, request: JoinRoom) -> Result<Role, GatewayError> {
        let Some(current) = self.connections.get(&connection_id).cloned() else {
            return Err(GatewayError::UnknownConnection);
        };
        let passkey = match request.passkey {
            Some(passkey) if !passkey.is_empty() => Passkey(passkey),
            _ => return Err(GatewayError::InvalidRequest),
        };

        if let Some(current) = current {
            if current == passkey {
                if let Some(role) = self
                    .registry
                    .get(&passkey)
                    .and_then(|session| session.role_of(connection_id))
                {
                    self.mailboxes
                        .deliver(connection_id, room_joined(role, &passkey));
                    return Ok(role);
                }
            }
            if self
                .registry
                .get(&passkey)
                .is_some_and(|session| session.state() == SessionState::Full)
            {
                return Err(Rejection::RoomFull.into());
            }
            self.leave(connection_id);
        }

        let session = self.registry.resolve_or_create(&passkey);
        let role = session.admit(Participant {
            connection_id,
            name: request.player_name,
            opponent_name: request.opponent_name,
        })?;
        let peers = session.broadcast_targets(connection_id);

        self.connections.insert(connection_id, Some(passkey.clone()));

        // The joiner's confirmation is queued before anyone else hears of it
        self.mailboxes
            .deliver(connection_id, room_joined(role, &passkey));
        if !peers.is_empty() {
            self.mailboxes.relay(&peers, &ServerEvent::PlayerJoined);
        }

        Ok(role)
    }

    fn signal(&mut self, sender: ConnectionId, payload: Value) -> Result<usize, GatewayError> {
        let passkey = match self.connections.get(&sender) {
            None => return Err(GatewayError::UnknownConnection),
            Some(None) => return Ok(0),
            Some(Some(passkey)) => passkey,
        };
        // The session may already be gone if this event lagged behind an eviction
        let Some(session) = self.registry.get(passkey) else {
            return Ok(0);
        };
        let targets = session.broadcast_targets(sender);
        Ok(self.mailboxes.relay(&targets, &ServerEvent::Signal(payload)))
    }

    /// Remove a connection from its session, evicting the session once empty
    fn leave(&mut self, connection_id: ConnectionId) {
        let Some(Some(passkey)) = self.connections.get_mut(&connection_id).map(Option::take) else {
            return;
        };
        let Some(session) = self.registry.get_mut(&passkey) else {
            return;
        };
        if session.release(connection_id) {
            self.registry.remove(&passkey);
        }
        debug!(%connection_id, %passkey, "left session");
    }

    fn disconnect(&mut self, connection_id: ConnectionId) -> bool {
        self.leave(connection_id);
        let was_open = self.connections.remove(&connection_id).is_some();
        self.mailboxes.close(connection_id);
        was_open
    }
}

fn room_joined(role: Role, passkey: &Passkey) -> ServerEvent {
    ServerEvent::RoomJoined(RoomJoined {
        is_host: role.is_host(),
        room_id: passkey.to_string(),
    })
}

/// Counts reported by the `GET /` status page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    pub rooms: usize,
    pub connections: usize,
}

/// Handle to the shared gateway state
#[derive(Debug, Clone)]
pub struct Gateway {
    state: Arc<Mutex<GatewayState>>,
    idle_timeout: Duration,
}

impl Gateway {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(GatewayState::default())),
            idle_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.idle_timeout())
    }

    fn lock(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock()
    }

    /// Open a new connection with an empty mailbox
    pub fn connect(&self) -> ConnectionId {
        let connection_id = ConnectionId::new();
        self.lock().open(connection_id, now_millis());
        info!(%connection_id, "client connected");
        connection_id
    }

    pub fn is_connected(&self, connection_id: ConnectionId) -> bool {
        self.lock().connections.contains_key(&connection_id)
    }

    /// Dispatch an inbound client event
    pub fn handle_event(
        &self,
        connection_id: ConnectionId,
        event: ClientEvent,
    ) -> Result<(), GatewayError> {
        match event {
            ClientEvent::JoinRoom(request) => self.handle_join(connection_id, request).map(|_| ()),
            ClientEvent::Signal(payload) => self.handle_signal(connection_id, payload).map(|_| ()),
        }
    }

    /// Join the session named by the request's passkey
    ///
    /// Rejections are also queued as an `error` event for the connection,
    /// which stays open either way.
    pub fn handle_join(
        &self,
        connection_id: ConnectionId,
        request: JoinRoom,
    ) -> Result<Role, GatewayError> {
        let passkey = request.passkey.clone().unwrap_or_default();
        let player_name = request.player_name.clone();
        info!(%connection_id, %passkey, %player_name, "joining room");

        let mut state = self.lock();
        state.mailboxes.touch(connection_id, now_millis());
        let result = state.join(connection_id, request);

        match &result {
            Ok(role) => info!(%connection_id, %passkey, ?role, "joined room"),
            Err(GatewayError::UnknownConnection) => {
                warn!(%connection_id, "join from unknown connection")
            }
            Err(err) => {
                info!(%connection_id, %passkey, %err, "join rejected");
                state
                    .mailboxes
                    .deliver(connection_id, ServerEvent::Error(err.to_string()));
            }
        }
        result
    }

    /// Forward an opaque payload to the other participants of the sender's session
    ///
    /// Returns the number of recipients. A sender without a session gets zero.
    pub fn handle_signal(
        &self,
        connection_id: ConnectionId,
        payload: Value,
    ) -> Result<usize, GatewayError> {
        let mut state = self.lock();
        state.mailboxes.touch(connection_id, now_millis());
        let delivered = state.signal(connection_id, payload)?;
        debug!(%connection_id, delivered, "relayed signal");
        Ok(delivered)
    }

    /// Close a connection and release its session slot
    ///
    /// Safe to call for connections that are already gone.
    pub fn handle_disconnect(&self, connection_id: ConnectionId) -> bool {
        let was_open = self.lock().disconnect(connection_id);
        if was_open {
            info!(%connection_id, "client disconnected");
        }
        was_open
    }

    /// Drain pending events for a connection
    pub fn poll(&self, connection_id: ConnectionId) -> Result<Vec<ServerEvent>, GatewayError> {
        self.lock()
            .mailboxes
            .drain(connection_id, now_millis())
            .ok_or(GatewayError::UnknownConnection)
    }

    /// Disconnect every connection that has been silent longer than the idle timeout
    pub fn reap_idle(&self, now: Timestamp) -> Vec<ConnectionId> {
        let timeout = i64::try_from(self.idle_timeout.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(timeout);

        let mut state = self.lock();
        let idle = state.mailboxes.idle_since(cutoff);
        for connection_id in &idle {
            state.disconnect(*connection_id);
            info!(%connection_id, "reaped idle connection");
        }
        idle
    }

    pub fn status(&self) -> GatewayStatus {
        let state = self.lock();
        GatewayStatus {
            rooms: state.registry.len(),
            connections: state.connections.len(),
        }
    }

    /// Number of participants in the session for `passkey`, if it exists
    pub fn session_size(&self, passkey: &Passkey) -> Option<usize> {
        self.lock().registry.get(passkey).map(|session| session.len())
    }

    /// Copy of the full state, for persisting between requests
    pub fn snapshot(&self) -> GatewayState {
        self.lock().clone()
    }

    pub fn restore(&self, snapshot: GatewayState) {
        *self.lock() = snapshot;
    }
}
