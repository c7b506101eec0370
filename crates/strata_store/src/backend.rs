//! Per-shard ordered store over a fjall partition.
//!
//! Each shard (or each bucket of a wrapped shard) owns exactly one
//! partition of the node keyspace. Encoded keys are always stored in
//! ascending byte order; descending tables reverse the iteration
//! direction instead of the encoding.

use std::ops::Bound;
use std::sync::Arc;

use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle};

use crate::error::{Error, Result};
use crate::table::SortOrder;

/// How a store open treats pre-existing data.
#[derive(Debug, Clone, Copy)]
pub struct OpenMode {
    pub create_if_missing: bool,
    pub error_if_exists: bool,
}

impl OpenMode {
    /// Fresh create: the partition must not already exist.
    pub fn create() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: true,
        }
    }

    /// Reopen: the partition must already exist.
    pub fn open() -> Self {
        Self {
            create_if_missing: false,
            error_if_exists: false,
        }
    }
}

/// A byte range, both bounds inclusive, in the table's logical order
/// (for descending tables `start` is the byte-wise larger bound).
#[derive(Debug, Clone)]
pub struct BinRange {
    pub start: Vec<u8>,
    pub stop: Vec<u8>,
}

/// Where a paged range read stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// The range was exhausted.
    Complete,
    /// Next key that would have been returned, in backend bytes.
    Key(Vec<u8>),
}

/// One shard's (or bucket's) ordered store.
pub struct ShardStore {
    keyspace: Arc<Keyspace>,
    partition: PartitionHandle,
    order: SortOrder,
}

impl ShardStore {
    /// Open the partition backing `shard` with the given mode.
    pub fn open(
        keyspace: Arc<Keyspace>,
        shard: &str,
        order: SortOrder,
        mode: OpenMode,
    ) -> Result<Self> {
        let name = partition_name(shard);
        let exists = keyspace.partition_exists(&name);
        if exists && mode.error_if_exists {
            return Err(Error::TableExists(shard.to_string()));
        }
        if !exists && !mode.create_if_missing {
            return Err(Error::NoShard(shard.to_string()));
        }
        let partition = keyspace.open_partition(&name, PartitionCreateOptions::default())?;
        Ok(Self {
            keyspace,
            partition,
            order,
        })
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.partition.insert(key, value)?;
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.partition.get(key)?.map(|v| v.to_vec()))
    }

    pub fn del(&self, key: &[u8]) -> Result<()> {
        self.partition.remove(key)?;
        Ok(())
    }

    /// Read up to `chunk` pairs of `[start, stop]` in the shard's order.
    ///
    /// Returns the page plus either `Complete` or the next key that
    /// iteration would have produced.
    pub fn read_range_binary(
        &self,
        range: &BinRange,
        chunk: usize,
    ) -> Result<(Vec<(Vec<u8>, Vec<u8>)>, Continuation)> {
        let chunk = chunk.max(1);
        let (lo, hi) = byte_bounds(range, self.order);
        if lo > hi {
            return Ok((Vec::new(), Continuation::Complete));
        }
        let bounds = (Bound::Included(lo), Bound::Included(hi));
        let mut iter: Box<dyn Iterator<Item = fjall::Result<fjall::KvPair>>> = match self.order {
            SortOrder::Ascending => Box::new(self.partition.range(bounds)),
            SortOrder::Descending => Box::new(self.partition.range(bounds).rev()),
        };

        let mut out = Vec::with_capacity(chunk.min(1024));
        while let Some(item) = iter.next() {
            let (key, value) = item?;
            if out.len() == chunk {
                return Ok((out, Continuation::Key(key.to_vec())));
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok((out, Continuation::Complete))
    }

    /// Read up to `n` pairs starting at `start` (inclusive) in the shard's
    /// order, with no stop bound.
    pub fn read_range_n_binary(&self, start: &[u8], n: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let start = start.to_vec();
        let mut iter: Box<dyn Iterator<Item = fjall::Result<fjall::KvPair>>> = match self.order {
            SortOrder::Ascending => Box::new(self.partition.range(start..)),
            SortOrder::Descending => Box::new(
                self.partition
                    .range((Bound::Unbounded, Bound::Included(start)))
                    .rev(),
            ),
        };
        let mut out = Vec::with_capacity(n.min(1024));
        while out.len() < n {
            match iter.next() {
                Some(item) => {
                    let (key, value) = item?;
                    out.push((key.to_vec(), value.to_vec()));
                }
                None => break,
            }
        }
        Ok(out)
    }

    /// Rough on-disk size of this shard.
    pub fn approximate_size(&self) -> Result<u64> {
        Ok(self.partition.disk_space())
    }

    /// Drop the shard's on-disk data.
    pub fn delete_db(&self) -> Result<()> {
        self.keyspace.delete_partition(self.partition.clone())?;
        Ok(())
    }
}

/// Translate a logical inclusive range into ascending byte bounds.
fn byte_bounds(range: &BinRange, order: SortOrder) -> (Vec<u8>, Vec<u8>) {
    match order {
        SortOrder::Ascending => (range.start.clone(), range.stop.clone()),
        SortOrder::Descending => (range.stop.clone(), range.start.clone()),
    }
}

/// Map a free-form shard id onto a partition name fjall accepts.
///
/// Shard ids derive from user table names, which are free-form UTF-8;
/// partition names are not. Unsafe characters are replaced and a crc32
/// fingerprint of the original id keeps distinct ids distinct.
pub fn partition_name(shard: &str) -> String {
    let mut safe: String = shard
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    // Keep total length within fjall's partition-name budget.
    safe.truncate(192);
    format!("{safe}_{:08x}", crc32fast::hash(shard.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_keyspace(name: &str) -> (std::path::PathBuf, Arc<Keyspace>) {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "strata_backend_{name}_{}_{}",
            std::process::id(),
            nanos
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let keyspace = Arc::new(fjall::Config::new(&dir).open().expect("open keyspace"));
        (dir, keyspace)
    }

    #[test]
    fn open_modes_enforce_existence() {
        let (dir, keyspace) = temp_keyspace("open_modes");
        assert!(matches!(
            ShardStore::open(
                keyspace.clone(),
                "s0",
                SortOrder::Ascending,
                OpenMode::open()
            ),
            Err(Error::NoShard(_))
        ));
        let store =
            ShardStore::open(keyspace.clone(), "s0", SortOrder::Ascending, OpenMode::create())
                .expect("create shard");
        drop(store);
        assert!(matches!(
            ShardStore::open(
                keyspace.clone(),
                "s0",
                SortOrder::Ascending,
                OpenMode::create()
            ),
            Err(Error::TableExists(_))
        ));
        ShardStore::open(keyspace, "s0", SortOrder::Ascending, OpenMode::open())
            .expect("reopen shard");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn paged_range_reads_return_a_continuation_key() {
        let (dir, keyspace) = temp_keyspace("paged");
        let store = ShardStore::open(keyspace, "s0", SortOrder::Ascending, OpenMode::create())
            .expect("create shard");
        for i in 0..10u8 {
            store.put(&[i], &[i]).expect("put");
        }
        let range = BinRange {
            start: vec![2],
            stop: vec![8],
        };
        let (page, cont) = store.read_range_binary(&range, 3).expect("read");
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].0, vec![2]);
        assert_eq!(cont, Continuation::Key(vec![5]));

        let resumed = BinRange {
            start: vec![5],
            stop: vec![8],
        };
        let (page, cont) = store.read_range_binary(&resumed, 10).expect("read rest");
        assert_eq!(
            page.iter().map(|(k, _)| k[0]).collect::<Vec<_>>(),
            vec![5, 6, 7, 8]
        );
        assert_eq!(cont, Continuation::Complete);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn descending_reads_reverse_direction_not_encoding() {
        let (dir, keyspace) = temp_keyspace("desc");
        let store = ShardStore::open(keyspace, "s0", SortOrder::Descending, OpenMode::create())
            .expect("create shard");
        for i in 0..6u8 {
            store.put(&[i], &[i]).expect("put");
        }
        // Logical order is descending, so start is the high bound.
        let range = BinRange {
            start: vec![4],
            stop: vec![1],
        };
        let (page, cont) = store.read_range_binary(&range, 2).expect("read");
        assert_eq!(page.iter().map(|(k, _)| k[0]).collect::<Vec<_>>(), vec![4, 3]);
        assert_eq!(cont, Continuation::Key(vec![2]));

        let page = store.read_range_n_binary(&[3], 2).expect("read n");
        assert_eq!(page.iter().map(|(k, _)| k[0]).collect::<Vec<_>>(), vec![3, 2]);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn partition_names_are_safe_and_distinct() {
        let a = partition_name("weird name/◆");
        let b = partition_name("weird name/◇");
        assert_ne!(a, b);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }
}
