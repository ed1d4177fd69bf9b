//! Passkey to session mapping

use crate::protocol::Passkey;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Owns every live session
///
/// Sessions are created on first join and must be removed once empty; the
/// registry never holds an empty session between operations.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SessionRegistry {
    sessions: HashMap<Passkey, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the session for a passkey, creating an empty one if none exists
    pub fn resolve_or_create(&mut self, passkey: &Passkey) -> &mut Session {
        self.sessions.entry(passkey.clone()).or_insert_with(|| {
            debug!(%passkey, "creating session");
            Session::new(passkey.clone())
        })
    }

    /// Drop a session. Removing an absent passkey is a no-op.
    pub fn remove(&mut self, passkey: &Passkey) -> Option<Session> {
        let removed = self.sessions.remove(passkey);
        if removed.is_some() {
            debug!(%passkey, "evicted session");
        }
        removed
    }

    pub fn get(&self, passkey: &Passkey) -> Option<&Session> {
        self.sessions.get(passkey)
    }

    pub fn get_mut(&mut self, passkey: &Passkey) -> Option<&mut Session> {
        self.sessions.get_mut(passkey)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
