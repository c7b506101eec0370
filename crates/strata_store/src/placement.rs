//! Shard naming and node placement for new tables.

use std::collections::BTreeMap;

use crate::ring::allocate_nodes;
use crate::table::ShardPlacement;

/// Generate the shard ids for a table: `<name>_shard<i>`.
pub fn shard_names(name: &str, n_shards: u32) -> Vec<String> {
    (0..n_shards).map(|i| format!("{name}_shard{i}")).collect()
}

/// Allocate a distributed table's shards across the member nodes.
pub fn allocate(
    name: &str,
    n_shards: u32,
    rf: u32,
    members: &BTreeMap<String, Vec<String>>,
) -> Vec<ShardPlacement> {
    allocate_nodes(&shard_names(name, n_shards), rf, members)
}

/// Allocate a local-only table's shards; no ring entries.
pub fn allocate_local(name: &str, n_shards: u32) -> Vec<ShardPlacement> {
    shard_names(name, n_shards)
        .into_iter()
        .map(|shard| ShardPlacement {
            shard,
            ring_entry: None,
        })
        .collect()
}

/// Filter a placed shard list down to the shards this node owns.
///
/// Shards without a ring entry (local tables) pass through unchanged.
pub fn find_local_shards<'a>(
    shards: &'a [ShardPlacement],
    this_node: &str,
    this_dc: &str,
) -> Vec<&'a ShardPlacement> {
    shards
        .iter()
        .filter(|p| match &p.ring_entry {
            None => true,
            Some(entry) => entry
                .get(this_dc)
                .map(|nodes| nodes.iter().any(|n| n == this_node))
                .unwrap_or(false),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_names_are_indexed() {
        assert_eq!(
            shard_names("t1", 3),
            vec!["t1_shard0", "t1_shard1", "t1_shard2"]
        );
    }

    #[test]
    fn local_allocation_has_no_ring_entries() {
        let placed = allocate_local("t1", 2);
        assert_eq!(placed.len(), 2);
        assert!(placed.iter().all(|p| p.ring_entry.is_none()));
    }

    #[test]
    fn local_filter_matches_node_within_dc() {
        let mut members = BTreeMap::new();
        members.insert("dc1".to_string(), vec!["n1".to_string(), "n2".to_string()]);
        let placed = allocate("t1", 4, 1, &members);

        let mine = find_local_shards(&placed, "n1", "dc1");
        let theirs = find_local_shards(&placed, "n2", "dc1");
        assert_eq!(mine.len() + theirs.len(), 4);
        for p in &mine {
            let entry = p.ring_entry.as_ref().unwrap();
            assert!(entry["dc1"].contains(&"n1".to_string()));
        }
        // A node from another DC owns nothing here.
        assert!(find_local_shards(&placed, "n1", "dc9").is_empty());
    }

    #[test]
    fn local_filter_passes_flat_lists_through() {
        let placed = allocate_local("t1", 3);
        assert_eq!(find_local_shards(&placed, "anyone", "anywhere").len(), 3);
    }
}
