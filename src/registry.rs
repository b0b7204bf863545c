use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;

use log::{debug, warn};
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::Mutex;

use crate::transport::Stream;

/// The shared map from live connection to identity - the only mutable state
/// shared across handlers. Every operation takes the single internal lock,
/// so a broadcast never observes a half-inserted or half-removed entry.
///
/// The map itself is never exposed; all mutation goes through the named
/// operations below.
pub struct Registry {
    peers: Mutex<HashMap<u64, Peer>>,
}

struct Peer {
    username: String,
    writer: WriteHalf<Stream>,
}

/// Returned when a connection id is registered twice. This is a caller bug,
/// not a runtime condition expected in normal operation.
#[derive(Debug)]
pub struct AlreadyRegistered(pub u64);

impl fmt::Display for AlreadyRegistered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection {} is already registered", self.0)
    }
}

impl std::error::Error for AlreadyRegistered {}

impl Registry {
    pub fn new() -> Self {
        Registry {
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a connection's identity and write half.
    pub async fn register(
        &self,
        id: u64,
        username: &str,
        writer: WriteHalf<Stream>,
    ) -> Result<(), AlreadyRegistered> {
        let mut peers = self.peers.lock().await;
        // Entry API avoids a double lookup
        match peers.entry(id) {
            Entry::Occupied(_) => Err(AlreadyRegistered(id)),
            Entry::Vacant(slot) => {
                slot.insert(Peer {
                    username: username.to_string(),
                    writer,
                });
                Ok(())
            }
        }
    }

    /// Remove a connection and return its identity. Returns `None` if it was
    /// already removed - benign, racing cleanup paths both call this.
    pub async fn unregister(&self, id: u64) -> Option<String> {
        let mut peers = self.peers.lock().await;
        peers.remove(&id).map(|peer| peer.username)
    }

    /// Write a newline-terminated line to every registered connection except
    /// `exclude`. A peer whose write fails is pruned from the registry and
    /// the fan-out continues - one dead peer never aborts delivery to the
    /// others. No acknowledgement is awaited beyond the write itself.
    pub async fn broadcast(&self, message: &str, exclude: Option<u64>) {
        let line = format!("{}\n", message);
        let mut peers = self.peers.lock().await;

        let targets: Vec<u64> = peers
            .keys()
            .copied()
            .filter(|&id| Some(id) != exclude)
            .collect();

        let mut dead = Vec::new();
        for id in targets {
            let Some(peer) = peers.get_mut(&id) else { continue };
            let result = async {
                peer.writer.write_all(line.as_bytes()).await?;
                peer.writer.flush().await
            }
            .await;

            if let Err(e) = result {
                debug!("write to connection {} failed: {}", id, e);
                dead.push(id);
            }
        }

        for id in dead {
            if let Some(peer) = peers.remove(&id) {
                warn!("removed dead connection: {}", peer.username);
                println!("[-] Removed dead connection: {}", peer.username);
            }
        }
    }

    /// Number of registered connections.
    pub async fn count(&self) -> usize {
        self.peers.lock().await.len()
    }

    /// Current (id, identity) pairs, in no particular order.
    pub async fn snapshot(&self) -> Vec<(u64, String)> {
        let peers = self.peers.lock().await;
        peers
            .iter()
            .map(|(&id, peer)| (id, peer.username.clone()))
            .collect()
    }

    /// Shut down every registered write half. Used when the accept loop
    /// winds down; blocked per-connection reads surface the close as EOF.
    pub async fn close_all(&self) {
        let mut peers = self.peers.lock().await;
        for (id, mut peer) in peers.drain() {
            if let Err(e) = peer.writer.shutdown().await {
                debug!("shutdown of connection {} failed: {}", id, e);
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
