//! A single pairing session and its participants

use crate::error::Rejection;
use crate::protocol::{ConnectionId, Passkey};
use serde::{Deserialize, Serialize};

/// Maximum number of participants in one session
pub const SESSION_CAPACITY: usize = 2;

/// One joined connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub name: String,
    /// Name the participant expects its counterpart to have (not verified)
    pub opponent_name: String,
}

/// Role assigned on admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Host,
    Guest,
}

impl Role {
    pub fn is_host(self) -> bool {
        self == Role::Host
    }
}

/// Occupancy of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    Single,
    Full,
}

/// Pairing context for up to two participants under one passkey
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    passkey: Passkey,
    /// Participants in join order
    participants: Vec<Participant>,
    host: Option<ConnectionId>,
}

impl Session {
    pub fn new(passkey: Passkey) -> Self {
        Self {
            passkey,
            participants: Vec::with_capacity(SESSION_CAPACITY),
            host: None,
        }
    }

    pub fn passkey(&self) -> &Passkey {
        &self.passkey
    }

    pub fn host(&self) -> Option<ConnectionId> {
        self.host
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.participants
            .iter()
            .any(|p| p.connection_id == connection_id)
    }

    pub fn state(&self) -> SessionState {
        match self.participants.len() {
            0 => SessionState::Empty,
            n if n < SESSION_CAPACITY => SessionState::Single,
            _ => SessionState::Full,
        }
    }

    /// Role currently held by a participant, if it is in this session
    pub fn role_of(&self, connection_id: ConnectionId) -> Option<Role> {
        if !self.contains(connection_id) {
            return None;
        }
        if self.host == Some(connection_id) {
            Some(Role::Host)
        } else {
            Some(Role::Guest)
        }
    }

    /// Admit a participant
    ///
    /// The first participant becomes host. Nothing changes when the session
    /// is already full.
    pub fn admit(&mut self, participant: Participant) -> Result<Role, Rejection> {
        if self.participants.len() >= SESSION_CAPACITY {
            return Err(Rejection::RoomFull);
        }

        let role = if self.host.is_none() {
            self.host = Some(participant.connection_id);
            Role::Host
        } else {
            Role::Guest
        };
        self.participants.push(participant);
        Ok(role)
    }

    /// Remove a participant by connection ID
    ///
    /// Returns true when the session is left empty and should be evicted.
    /// If the host leaves, the longest-present remaining participant takes
    /// over as host.
    pub fn release(&mut self, connection_id: ConnectionId) -> bool {
        self.participants
            .retain(|p| p.connection_id != connection_id);

        if self.host == Some(connection_id) {
            self.host = self.participants.first().map(|p| p.connection_id);
        }

        self.participants.is_empty()
    }

    /// Connections that should receive a message sent by `exclude`
    pub fn broadcast_targets(&self, exclude: ConnectionId) -> Vec<ConnectionId> {
        self.participants
            .iter()
            .map(|p| p.connection_id)
            .filter(|id| *id != exclude)
            .collect()
    }
}
