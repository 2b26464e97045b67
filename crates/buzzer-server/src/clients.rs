// Registry of connected WebSocket clients and their outbound queues.
//
// Owned by the game loop, so no locking: every send happens on the loop's task.

use std::collections::HashMap;

use buzzer_core::session::ClientId;
use tokio::sync::mpsc;
use tracing::debug;

/// Sender half of a connection's outbound queue. The connection's writer
/// task drains it into the socket.
pub type Outbound = mpsc::UnboundedSender<String>;

#[derive(Debug)]
struct ClientHandle {
    addr: String,
    outbound: Outbound,
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, ClientHandle>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, client: ClientId, addr: String, outbound: Outbound) {
        self.clients.insert(client, ClientHandle { addr, outbound });
    }

    /// Forget `client`, returning its peer address if it was known.
    pub fn remove(&mut self, client: ClientId) -> Option<String> {
        self.clients.remove(&client).map(|h| h.addr)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Queue `payload` for one client. Returns false (and drops the client)
    /// if its writer has already gone away.
    pub fn send_to(&mut self, client: ClientId, payload: &str) -> bool {
        let Some(handle) = self.clients.get(&client) else {
            return false;
        };
        if handle.outbound.send(payload.to_string()).is_ok() {
            return true;
        }
        debug!("Outbound queue for {client} closed, dropping it");
        self.clients.remove(&client);
        false
    }

    /// Queue `payload` for every client. Returns how many accepted it.
    pub fn broadcast(&mut self, payload: &str) -> usize {
        let mut closed = Vec::new();
        for (id, handle) in &self.clients {
            if handle.outbound.send(payload.to_string()).is_err() {
                closed.push(*id);
            }
        }
        for id in &closed {
            debug!("Outbound queue for {id} closed, dropping it");
            self.clients.remove(id);
        }
        self.clients.len()
    }
}
