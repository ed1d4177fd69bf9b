//! Per-connection mailboxes and scoped relay
//!
//! Outbound events are queued per connection and drained by the transport
//! on the next poll. Each mailbox is FIFO, so successive messages from one
//! sender arrive in the order they were sent.

use crate::protocol::{ConnectionId, ServerEvent};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace};

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Mailbox {
    events: VecDeque<ServerEvent>,
    /// Last time the owning connection was heard from
    last_seen: Timestamp,
}

/// Outbound queues for every open connection
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Mailboxes {
    boxes: HashMap<ConnectionId, Mailbox>,
}

impl Mailboxes {
    pub fn open(&mut self, connection_id: ConnectionId, now: Timestamp) {
        self.boxes.entry(connection_id).or_insert_with(|| Mailbox {
            events: VecDeque::new(),
            last_seen: now,
        });
    }

    /// Close a mailbox, discarding undelivered events
    pub fn close(&mut self, connection_id: ConnectionId) -> bool {
        self.boxes.remove(&connection_id).is_some()
    }

    pub fn is_open(&self, connection_id: ConnectionId) -> bool {
        self.boxes.contains_key(&connection_id)
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Queue an event for one connection
    ///
    /// Returns false if the recipient is gone; nothing is buffered for it.
    pub fn deliver(&mut self, recipient: ConnectionId, event: ServerEvent) -> bool {
        match self.boxes.get_mut(&recipient) {
            Some(mailbox) => {
                trace!(%recipient, %event, "queued event");
                mailbox.events.push_back(event);
                true
            }
            None => false,
        }
    }

    /// Deliver a copy of `event` to every target, returning how many were reached
    pub fn relay(&mut self, targets: &[ConnectionId], event: &ServerEvent) -> usize {
        let delivered = targets
            .iter()
            .filter(|recipient| self.deliver(**recipient, event.clone()))
            .count();
        debug!(targets = targets.len(), delivered, "relayed event");
        delivered
    }

    /// Take all pending events for a connection and mark it as alive
    pub fn drain(&mut self, connection_id: ConnectionId, now: Timestamp) -> Option<Vec<ServerEvent>> {
        let mailbox = self.boxes.get_mut(&connection_id)?;
        mailbox.last_seen = now;
        Some(mailbox.events.drain(..).collect())
    }

    pub fn touch(&mut self, connection_id: ConnectionId, now: Timestamp) {
        if let Some(mailbox) = self.boxes.get_mut(&connection_id) {
            mailbox.last_seen = now;
        }
    }

    /// Connections not heard from since `cutoff`
    pub fn idle_since(&self, cutoff: Timestamp) -> Vec<ConnectionId> {
        self.boxes
            .iter()
            .filter(|(_, mailbox)| mailbox.last_seen < cutoff)
            .map(|(id, _)| *id)
            .collect()
    }
}
