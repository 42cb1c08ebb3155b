//! Server connection manager (spec §4.9): allocates connection IDs, tracks
//! active/inactive connections, and reaps closed ones on a periodic sweep.
//! Grounded on the teacher's `start_multi_server` accept loop
//! (`ipc/tcp_socket.rs`) generalized from a flat connection map to the
//! active/inactive/reap lifecycle spec.md describes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::connection::{Connection, Role};
use crate::routing::SignatureMap;
use crate::transport::ByteStreamEndpoint;

pub type ConnectionId = u64;

/// Reserved ID never assigned to a real connection (spec §4.9).
pub const INVALID_CONNECTION_ID: ConnectionId = 0;

/// Background cleanup wake interval (spec §4.9: "wakes every ~500 ms").
pub const CLEANUP_INTERVAL: Duration = Duration::from_millis(500);

struct Slot {
    handle: JoinHandle<()>,
}

/// Owns the shared port signature map and the set of live connections. One
/// `Server` per listening endpoint (TCP port, Unix socket path, ...).
pub struct Server {
    signature_map: Arc<SignatureMap>,
    active: Mutex<Vec<ConnectionId>>,
    inactive: Mutex<Vec<ConnectionId>>,
    slots: Mutex<HashMap<ConnectionId, Slot>>,
    next_id: AtomicU64,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Self {
            signature_map: Arc::new(SignatureMap::new()),
            active: Mutex::new(Vec::new()),
            inactive: Mutex::new(Vec::new()),
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(INVALID_CONNECTION_ID + 1),
        }
    }

    pub fn signature_map(&self) -> &Arc<SignatureMap> {
        &self.signature_map
    }

    /// Scan from `next_id`, skipping any ID currently in use and the
    /// reserved `INVALID_CONNECTION_ID` (spec §4.9).
    fn allocate_id(&self) -> ConnectionId {
        let slots = self.slots.lock().expect("server slots mutex poisoned");
        loop {
            let candidate = self.next_id.fetch_add(1, Ordering::SeqCst);
            if candidate != INVALID_CONNECTION_ID && !slots.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Take ownership of an already-constructed `Connection`, drive its
    /// handshake and message loop on a dedicated task, and track it as
    /// active until the task finishes.
    pub fn spawn_connection<T>(self: &Arc<Self>, mut connection: Connection<T>) -> ConnectionId
    where
        T: ByteStreamEndpoint + 'static,
    {
        let id = self.allocate_id();
        self.active.lock().expect("active list mutex poisoned").push(id);

        let server = self.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = connection.run().await {
                debug!(connection = id, error = %e, "connection task ended with error");
            }
            server.mark_inactive(id);
        });

        self.slots
            .lock()
            .expect("server slots mutex poisoned")
            .insert(id, Slot { handle });
        id
    }

    fn mark_inactive(&self, id: ConnectionId) {
        self.active.lock().expect("active list mutex poisoned").retain(|c| *c != id);
        self.inactive.lock().expect("inactive list mutex poisoned").push(id);
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().expect("active list mutex poisoned").len()
    }

    pub fn inactive_count(&self) -> usize {
        self.inactive.lock().expect("inactive list mutex poisoned").len()
    }

    /// One sweep of the reap queue: a connection whose task has finished is
    /// stopped, closed, and freed. Returns the number of connections reaped.
    pub fn reap_once(&self) -> usize {
        let mut inactive = self.inactive.lock().expect("inactive list mutex poisoned");
        let mut slots = self.slots.lock().expect("server slots mutex poisoned");
        let mut reaped = 0;
        inactive.retain(|id| {
            let done = slots.get(id).map(|slot| slot.handle.is_finished()).unwrap_or(true);
            if done {
                slots.remove(id);
                reaped += 1;
            }
            !done
        });
        reaped
    }

    /// Spawn the background cleanup worker (spec §4.9). Runs until the
    /// `Server` is dropped (the returned handle is usually left detached).
    pub fn spawn_cleanup_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let server = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                ticker.tick().await;
                let reaped = server.reap_once();
                if reaped > 0 {
                    info!(reaped, "cleanup worker reaped closed connections");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Role;

    struct NullEndpoint;

    #[async_trait::async_trait]
    impl ByteStreamEndpoint for NullEndpoint {
        async fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0) // EOF immediately
        }

        async fn write_all(&mut self, _buf: &[u8]) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn allocate_id_skips_invalid_and_in_use() {
        let server = Server::new();
        let a = server.allocate_id();
        let b = server.allocate_id();
        assert_ne!(a, INVALID_CONNECTION_ID);
        assert_ne!(b, INVALID_CONNECTION_ID);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn spawned_connection_becomes_inactive_then_reaped() {
        let server = Arc::new(Server::new());
        let connection = Connection::new(NullEndpoint, Role::Server, server.signature_map().clone());
        let id = server.spawn_connection(connection);
        assert_eq!(server.active_count(), 1);

        // NullEndpoint reports EOF on first read, so the handshake fails
        // fast and the task finishes almost immediately.
        for _ in 0..50 {
            if server.inactive_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(server.inactive_count(), 1);

        let reaped = server.reap_once();
        assert_eq!(reaped, 1);
        assert_eq!(server.inactive_count(), 0);
        let _ = id;
    }
}
