//! # Consistent Hash Ring
//!
//! Maps a [`RoutingKey`] to one endpoint so that the same key keeps going to
//! the same backend, and a fleet change only moves the keys it has to.
//!
//! ## How it works
//!
//! Every endpoint is placed on a ring of `u64` positions `virtual_nodes` times,
//! at `sha256("{endpoint}:{i}")`. A key is hashed into the same space and owned
//! by the first position at or after its hash, wrapping around to the lowest
//! position:
//!
//! ```text
//!        0 ───────────────────────────────────────────── u64::MAX
//!          A:17   B:3   key   A:92  C:5   B:140   A:8
//!                        └──> A:92 owns the key
//! ```
//!
//! Adding an endpoint only inserts new positions; a key moves only when one of
//! those new positions lands between it and its previous owner, so about
//! `1 / |endpoints|` of the keys move, and all of them move to the new
//! endpoint. Removal is symmetric.
//!
//! A ring is immutable once built. The load balancer publishes a new
//! `Arc<HashRing>` on every fleet change.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::core::config::DEFAULT_VIRTUAL_NODES;
use crate::core::error::{LbResult, LoadBalancerError};
use crate::core::types::{normalize_endpoints, Endpoint, RoutingKey};

/// Immutable mapping from hash positions to endpoints
#[derive(Debug, Clone)]
pub struct HashRing {
    positions: BTreeMap<u64, Endpoint>,
    endpoints: Vec<Endpoint>,
    virtual_nodes: usize,
}

impl HashRing {
    /// Build a ring over `endpoints`
    ///
    /// The list is deduplicated and sorted first, so the same set always builds
    /// the same ring. On a position collision the endpoint that sorts first
    /// keeps the position.
    pub fn build<I>(endpoints: I, virtual_nodes: usize) -> Self
    where
        I: IntoIterator<Item = Endpoint>,
    {
        let endpoints = normalize_endpoints(endpoints);
        let virtual_nodes = virtual_nodes.max(1);

        let mut positions = BTreeMap::new();
        for endpoint in &endpoints {
            for i in 0..virtual_nodes {
                let position = hash_bytes(format!("{}:{}", endpoint, i).as_bytes());
                positions.entry(position).or_insert_with(|| endpoint.clone());
            }
        }

        Self {
            positions,
            endpoints,
            virtual_nodes,
        }
    }

    /// Build a ring with the default number of virtual nodes
    pub fn with_defaults<I>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = Endpoint>,
    {
        Self::build(endpoints, DEFAULT_VIRTUAL_NODES)
    }

    /// Find the endpoint owning `key`
    pub fn locate(&self, key: &RoutingKey) -> LbResult<&Endpoint> {
        self.owner(key).ok_or(LoadBalancerError::NoEndpoints)
    }

    /// Like [`HashRing::locate`], `None` when the ring is empty
    pub fn owner(&self, key: &RoutingKey) -> Option<&Endpoint> {
        let key_hash = hash_bytes(key.as_bytes());

        self.positions
            .range(key_hash..)
            .next()
            // Wrap around to the beginning of the ring
            .or_else(|| self.positions.iter().next())
            .map(|(_, endpoint)| endpoint)
    }

    /// The normalized endpoint set this ring was built from
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.endpoints.binary_search(endpoint).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    /// Number of occupied ring positions
    pub fn position_count(&self) -> usize {
        self.positions.len()
    }
}

/// First 8 bytes of the SHA-256 digest as a big-endian `u64`
fn hash_bytes(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[0..8]);
    u64::from_be_bytes(prefix)
}
