use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;
use uuid::Uuid;

use orbit_types::events::GatewayEvent;

/// A frame pushed to one client's socket writer task.
#[derive(Debug, Clone)]
pub enum SocketFrame {
    Event(GatewayEvent),
    Close { code: u16, reason: String },
}

struct RegisteredSocket {
    conn_id: Uuid,
    frames: UnboundedSender<SocketFrame>,
}

/// Live sockets keyed by user id, owned by the directory actor and
/// mutated only from its serialized loop. At most one socket per user:
/// registering a replacement closes the old one first.
#[derive(Default)]
pub struct ConnectionRegistry {
    sockets: HashMap<String, RegisteredSocket>,
}

impl ConnectionRegistry {
    /// Register a socket for `user_id`, displacing (and closing with
    /// code 1000) any previous one. Returns the new connection id.
    pub fn register(&mut self, user_id: &str, frames: UnboundedSender<SocketFrame>) -> Uuid {
        let conn_id = Uuid::new_v4();
        let previous = self
            .sockets
            .insert(user_id.to_string(), RegisteredSocket { conn_id, frames });

        if let Some(old) = previous {
            let _ = old.frames.send(SocketFrame::Close {
                code: 1000,
                reason: "Replaced by a newer connection".into(),
            });
        }

        conn_id
    }

    /// Remove the user's entry, but only if it still belongs to the
    /// given connection. A socket displaced by a newer one must not
    /// unregister its successor on teardown.
    pub fn remove(&mut self, user_id: &str, conn_id: Uuid) -> bool {
        match self.sockets.get(user_id) {
            Some(socket) if socket.conn_id == conn_id => {
                self.sockets.remove(user_id);
                true
            }
            _ => false,
        }
    }

    /// Close and drop a user's socket (logout path). Returns whether
    /// one existed.
    pub fn close(&mut self, user_id: &str, code: u16, reason: &str) -> bool {
        match self.sockets.remove(user_id) {
            Some(socket) => {
                let _ = socket.frames.send(SocketFrame::Close {
                    code,
                    reason: reason.into(),
                });
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.sockets.contains_key(user_id)
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    pub fn online_user_ids(&self) -> Vec<String> {
        self.sockets.keys().cloned().collect()
    }

    /// Push an event to each target with a live socket. Stale entries
    /// (writer task gone) are pruned; one dead socket never aborts the
    /// rest of the fan-out.
    pub fn send_to_users<'a>(
        &mut self,
        targets: impl IntoIterator<Item = &'a str>,
        event: &GatewayEvent,
    ) {
        let mut stale = Vec::new();

        for user_id in targets {
            let Some(socket) = self.sockets.get(user_id) else {
                continue;
            };
            if socket.frames.is_closed()
                || socket.frames.send(SocketFrame::Event(event.clone())).is_err()
            {
                warn!("pruning stale socket for user {user_id}");
                stale.push(user_id.to_string());
            }
        }

        for user_id in stale {
            self.sockets.remove(&user_id);
        }
    }

    /// Push an event to every connected user except `skip`, pruning
    /// stale entries along the way.
    pub fn broadcast_except(&mut self, skip: &str, event: &GatewayEvent) {
        let targets: Vec<String> = self
            .sockets
            .keys()
            .filter(|id| id.as_str() != skip)
            .cloned()
            .collect();
        self.send_to_users(targets.iter().map(String::as_str), event);
    }
}
