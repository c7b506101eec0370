//! Consistent-hash ring registry.
//!
//! One ring per table, mapping encoded keys to shards (uniform strategy)
//! and each shard to its owning nodes per data center. The registry is the
//! authoritative runtime view of which shards exist and where; the catalog
//! holds the durable copy and rings are rebuilt from it on open.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::table::{RingEntry, ShardPlacement};

/// Hash algorithm used to place keys on the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha,
}

/// Shard spacing strategy on the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Shards own equal-width slices of the hash space.
    Uniform,
}

/// Options a ring is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingOptions {
    pub algorithm: HashAlgorithm,
    pub strategy: Strategy,
    /// Node-local ring: shards carry no placement entries.
    pub local: bool,
}

impl RingOptions {
    pub fn distributed() -> Self {
        Self {
            algorithm: HashAlgorithm::Sha,
            strategy: Strategy::Uniform,
            local: false,
        }
    }

    pub fn local() -> Self {
        Self {
            algorithm: HashAlgorithm::Sha,
            strategy: Strategy::Uniform,
            local: true,
        }
    }
}

/// One table's ring.
#[derive(Debug, Clone)]
pub struct Ring {
    pub shards: Vec<ShardPlacement>,
    pub options: RingOptions,
}

impl Ring {
    /// Map an encoded distribution key to its owning shard.
    ///
    /// Uniform strategy: shard i owns the i-th equal slice of the 64-bit
    /// hash space.
    pub fn find_shard(&self, hash_key: &[u8]) -> Option<&ShardPlacement> {
        if self.shards.is_empty() {
            return None;
        }
        let h = sha_position(hash_key);
        let idx = ((h as u128) * (self.shards.len() as u128) >> 64) as usize;
        self.shards.get(idx)
    }
}

/// Ticket for a pending ring creation; confirm or revert exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingCommit(u64);

/// Shared registry of all rings on this node.
pub struct RingRegistry {
    rings: RwLock<BTreeMap<String, Ring>>,
    pending: Mutex<BTreeMap<u64, String>>,
    next_commit: AtomicU64,
}

impl RingRegistry {
    pub fn new() -> Self {
        Self {
            rings: RwLock::new(BTreeMap::new()),
            pending: Mutex::new(BTreeMap::new()),
            next_commit: AtomicU64::new(1),
        }
    }

    /// Install a new ring, returning a commit ticket.
    ///
    /// The ring is visible immediately (readers routed during creation see
    /// it), but `revert` removes it again if the surrounding operation
    /// fails before `confirm`.
    pub fn create_ring(
        &self,
        name: &str,
        shards: Vec<ShardPlacement>,
        options: RingOptions,
    ) -> Result<RingCommit> {
        let mut rings = self.rings.write().unwrap();
        if rings.contains_key(name) {
            return Err(Error::TableExists(name.to_string()));
        }
        rings.insert(name.to_string(), Ring { shards, options });
        let id = self.next_commit.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().unwrap().insert(id, name.to_string());
        Ok(RingCommit(id))
    }

    /// Finalize a pending ring creation.
    pub fn confirm(&self, commit: RingCommit) {
        self.pending.lock().unwrap().remove(&commit.0);
    }

    /// Roll back a pending ring creation, removing the ring.
    pub fn revert(&self, commit: RingCommit) {
        if let Some(name) = self.pending.lock().unwrap().remove(&commit.0) {
            self.rings.write().unwrap().remove(&name);
            tracing::warn!(table = %name, "reverted ring creation");
        }
    }

    /// Reinstall a ring from its durable (catalog) copy, e.g. on open.
    pub fn restore(&self, name: &str, shards: Vec<ShardPlacement>, options: RingOptions) {
        self.rings
            .write()
            .unwrap()
            .entry(name.to_string())
            .or_insert(Ring { shards, options });
    }

    /// Placement of every shard of `name`, or `None` if no such ring.
    pub fn get_nodes(&self, name: &str) -> Option<Vec<ShardPlacement>> {
        self.rings.read().unwrap().get(name).map(|r| r.shards.clone())
    }

    /// Route a distribution key to a shard of `name`.
    pub fn find_shard(&self, name: &str, hash_key: &[u8]) -> Option<ShardPlacement> {
        self.rings
            .read()
            .unwrap()
            .get(name)
            .and_then(|r| r.find_shard(hash_key).cloned())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.rings.read().unwrap().contains_key(name)
    }

    pub fn delete_ring(&self, name: &str) {
        self.rings.write().unwrap().remove(name);
    }
}

impl Default for RingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Assign `rf` nodes per data center to each shard.
///
/// Placement is a pure function of the inputs: the shard name's hash picks
/// a deterministic starting offset in each DC's node list, then `rf`
/// consecutive nodes (wrapping) are taken.
pub fn allocate_nodes(
    shards: &[String],
    rf: u32,
    members: &BTreeMap<String, Vec<String>>,
) -> Vec<ShardPlacement> {
    shards
        .iter()
        .map(|shard| {
            let mut entry: RingEntry = BTreeMap::new();
            for (dc, nodes) in members {
                if nodes.is_empty() {
                    continue;
                }
                let take = (rf as usize).min(nodes.len());
                let start = (sha_position(shard.as_bytes()) % nodes.len() as u64) as usize;
                let picked = (0..take)
                    .map(|i| nodes[(start + i) % nodes.len()].clone())
                    .collect();
                entry.insert(dc.clone(), picked);
            }
            ShardPlacement {
                shard: shard.clone(),
                ring_entry: Some(entry),
            }
        })
        .collect()
}

/// First 8 bytes of SHA-256 as a ring position.
fn sha_position(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(dcs: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        dcs.iter()
            .map(|(dc, nodes)| {
                (
                    dc.to_string(),
                    nodes.iter().map(|n| n.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn allocate_is_deterministic_and_respects_rf() {
        let shards = vec!["t_shard0".to_string(), "t_shard1".to_string()];
        let members = members(&[("dc1", &["n1", "n2", "n3"]), ("dc2", &["n4", "n5"])]);
        let a = allocate_nodes(&shards, 2, &members);
        let b = allocate_nodes(&shards, 2, &members);
        assert_eq!(a, b);
        for placement in &a {
            let entry = placement.ring_entry.as_ref().unwrap();
            assert_eq!(entry["dc1"].len(), 2);
            assert_eq!(entry["dc2"].len(), 2);
        }
    }

    #[test]
    fn rf_larger_than_dc_takes_every_node_once() {
        let shards = vec!["t_shard0".to_string()];
        let members = members(&[("dc1", &["n1", "n2"])]);
        let placed = allocate_nodes(&shards, 5, &members);
        let entry = placed[0].ring_entry.as_ref().unwrap();
        let mut picked = entry["dc1"].clone();
        picked.sort();
        assert_eq!(picked, vec!["n1".to_string(), "n2".to_string()]);
    }

    #[test]
    fn commit_and_revert_protocol() {
        let registry = RingRegistry::new();
        let commit = registry
            .create_ring("t", Vec::new(), RingOptions::local())
            .unwrap();
        assert!(registry.exists("t"));
        registry.revert(commit);
        assert!(!registry.exists("t"));

        let commit = registry
            .create_ring("t", Vec::new(), RingOptions::local())
            .unwrap();
        registry.confirm(commit);
        // Revert after confirm is a no-op.
        registry.revert(commit);
        assert!(registry.exists("t"));
    }

    #[test]
    fn duplicate_ring_is_a_conflict() {
        let registry = RingRegistry::new();
        let commit = registry
            .create_ring("t", Vec::new(), RingOptions::local())
            .unwrap();
        registry.confirm(commit);
        assert!(matches!(
            registry.create_ring("t", Vec::new(), RingOptions::local()),
            Err(Error::TableExists(_))
        ));
    }

    #[test]
    fn uniform_routing_covers_all_shards() {
        let shards: Vec<ShardPlacement> = (0..4)
            .map(|i| ShardPlacement {
                shard: format!("t_shard{i}"),
                ring_entry: None,
            })
            .collect();
        let ring = Ring {
            shards,
            options: RingOptions::local(),
        };
        let mut hit = std::collections::HashSet::new();
        for i in 0..256u32 {
            let key = format!("key-{i}");
            let placement = ring.find_shard(key.as_bytes()).unwrap();
            hit.insert(placement.shard.clone());
        }
        assert_eq!(hit.len(), 4, "every shard should receive some keys");
    }
}
