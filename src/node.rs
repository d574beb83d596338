//! Explicit per-node state shared across connection handlers, replacing the
//! donor tutorial's process-global peer list and mempool with a bundle
//! passed by reference into every handler.

use chain_core::{ChainStore, Mempool};
use std::sync::Mutex;

/// The bootstrap/"central" peer every other node hands off to on startup.
pub const CENTRAL_NODE: &str = "127.0.0.1:3000";

pub struct NodeContext {
    pub store: ChainStore,
    pub mempool: Mutex<Mempool>,
    pub peers: Mutex<Vec<String>>,
    /// Block hashes requested via `getblocks` but not yet received, in the
    /// order they must still be pulled down — drained one at a time as each
    /// arrives via `block`.
    pub blocks_in_transit: Mutex<Vec<Vec<u8>>>,
    pub mining_address: Option<String>,
    pub node_address: String,
}

impl NodeContext {
    #[must_use]
    pub fn new(store: ChainStore, node_address: String, mining_address: Option<String>) -> Self {
        let peers = if node_address == CENTRAL_NODE {
            Vec::new()
        } else {
            vec![CENTRAL_NODE.to_string()]
        };
        Self {
            store,
            mempool: Mutex::new(Mempool::new()),
            peers: Mutex::new(peers),
            blocks_in_transit: Mutex::new(Vec::new()),
            mining_address,
            node_address,
        }
    }

    #[must_use]
    pub fn is_central(&self) -> bool {
        self.node_address == CENTRAL_NODE
    }

    pub fn add_peer(&self, addr: &str) {
        if addr == self.node_address {
            return;
        }
        let mut peers = self.peers.lock().unwrap();
        if !peers.iter().any(|p| p == addr) {
            peers.push(addr.to_string());
        }
    }

    pub fn remove_peer(&self, addr: &str) {
        self.peers.lock().unwrap().retain(|p| p != addr);
    }

    #[must_use]
    pub fn known_peers(&self) -> Vec<String> {
        self.peers.lock().unwrap().clone()
    }
}
