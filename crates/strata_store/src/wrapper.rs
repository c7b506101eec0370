//! Bucket wrapper for time/size-rotated shards.
//!
//! A wrapped shard stores its data across a fixed set of buckets, each an
//! ordered store of its own. Writes land in the newest bucket; reads merge
//! across all live buckets. Rotation itself is driven externally and
//! arrives as a replacement bucket list.

use std::sync::{Arc, RwLock};

use fjall::Keyspace;

use crate::backend::{BinRange, Continuation, OpenMode, ShardStore};
use crate::error::Result;
use crate::range_reader::merge_pages;
use crate::table::{SortOrder, WrapperSpec};

/// Generate the initial bucket ids for a shard, newest first.
pub fn create_bucket_list(shard: &str, wrapper: &WrapperSpec) -> Vec<String> {
    (0..wrapper.num_of_buckets)
        .map(|i| format!("{shard}_b{i}"))
        .collect()
}

/// All live buckets of one wrapped shard.
pub struct WrappedStore {
    keyspace: Arc<Keyspace>,
    order: SortOrder,
    // Bucket id plus its store, newest first. Swapped wholesale on rotation.
    buckets: RwLock<Vec<(String, Arc<ShardStore>)>>,
}

impl WrappedStore {
    /// Open one store per bucket id, in list order.
    pub fn init_buckets(
        keyspace: Arc<Keyspace>,
        order: SortOrder,
        bucket_ids: &[String],
        mode: OpenMode,
    ) -> Result<Self> {
        let mut buckets = Vec::with_capacity(bucket_ids.len());
        for id in bucket_ids {
            let store = ShardStore::open(keyspace.clone(), id, order, mode)?;
            buckets.push((id.clone(), Arc::new(store)));
        }
        Ok(Self {
            keyspace,
            order,
            buckets: RwLock::new(buckets),
        })
    }

    /// Write to the newest bucket.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let buckets = self.buckets.read().unwrap();
        match buckets.first() {
            Some((_, store)) => store.put(key, value),
            None => Ok(()),
        }
    }

    /// Read newest-to-oldest; the first hit wins.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let buckets = self.buckets.read().unwrap();
        for (_, store) in buckets.iter() {
            if let Some(value) = store.get(key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Remove from every bucket; the key may live in any of them.
    pub fn del(&self, key: &[u8]) -> Result<()> {
        let buckets = self.buckets.read().unwrap();
        for (_, store) in buckets.iter() {
            store.del(key)?;
        }
        Ok(())
    }

    /// Paged range read across all buckets, merged in `dir` order.
    ///
    /// Each bucket produces its own page and frontier; the combined page is
    /// cut at the earliest bucket frontier so no later bucket page can slot
    /// items before the returned continuation.
    pub fn read_range_binary(
        &self,
        range: &BinRange,
        chunk: usize,
        dir: SortOrder,
    ) -> Result<(Vec<(Vec<u8>, Vec<u8>)>, Continuation)> {
        let buckets = self.buckets.read().unwrap();
        let mut pages = Vec::with_capacity(buckets.len());
        for (_, store) in buckets.iter() {
            pages.push(store.read_range_binary(range, chunk)?);
        }
        Ok(merge_pages(dir, pages))
    }

    /// Bounded-count read across all buckets.
    pub fn read_range_n_binary(&self, start: &[u8], n: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let buckets = self.buckets.read().unwrap();
        let mut pages = Vec::with_capacity(buckets.len());
        for (_, store) in buckets.iter() {
            pages.push((store.read_range_n_binary(start, n)?, Continuation::Complete));
        }
        let (mut merged, _) = merge_pages(self.order, pages);
        merged.truncate(n);
        Ok(merged)
    }

    /// Drop every bucket's on-disk data.
    pub fn delete_shard(&self) -> Result<()> {
        let buckets = self.buckets.read().unwrap();
        for (_, store) in buckets.iter() {
            store.delete_db()?;
        }
        Ok(())
    }

    /// Apply a rotated bucket list: open stores for new ids, delete stores
    /// for retired ids, and adopt the new order.
    pub fn apply_bucket_update(&self, new_ids: &[String]) -> Result<()> {
        let mut buckets = self.buckets.write().unwrap();
        let mut next = Vec::with_capacity(new_ids.len());
        for id in new_ids {
            match buckets.iter().find(|(have, _)| have == id) {
                Some((_, store)) => next.push((id.clone(), store.clone())),
                None => {
                    let store = ShardStore::open(
                        self.keyspace.clone(),
                        id,
                        self.order,
                        OpenMode::create(),
                    )?;
                    next.push((id.clone(), Arc::new(store)));
                }
            }
        }
        for (id, store) in buckets.iter() {
            if !new_ids.contains(id) {
                // Retired bucket: its data ages out with it.
                store.delete_db()?;
                tracing::debug!(bucket = %id, "deleted retired bucket");
            }
        }
        *buckets = next;
        Ok(())
    }

    /// Current bucket ids, newest first.
    pub fn bucket_ids(&self) -> Vec<String> {
        self.buckets
            .read()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{SizeMargin, WrapperSpec};

    fn temp_keyspace(name: &str) -> (std::path::PathBuf, Arc<Keyspace>) {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "strata_wrapper_{name}_{}_{}",
            std::process::id(),
            nanos
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let keyspace = Arc::new(fjall::Config::new(&dir).open().expect("open keyspace"));
        (dir, keyspace)
    }

    fn spec(n: u32) -> WrapperSpec {
        WrapperSpec {
            num_of_buckets: n,
            time_margin: None,
            size_margin: Some(SizeMargin::Megabytes(64)),
        }
    }

    #[test]
    fn bucket_list_ids_are_indexed() {
        let ids = create_bucket_list("t_shard0", &spec(3));
        assert_eq!(ids, vec!["t_shard0_b0", "t_shard0_b1", "t_shard0_b2"]);
    }

    #[test]
    fn range_read_merges_across_buckets() {
        let (dir, keyspace) = temp_keyspace("merge");
        let ids = create_bucket_list("s", &spec(3));
        let wrapped =
            WrappedStore::init_buckets(keyspace, SortOrder::Ascending, &ids, OpenMode::create())
                .expect("init buckets");

        for key in [1u8, 4, 7] {
            wrapped.put(&[key], b"v").expect("put");
        }
        // Simulate older data living in other buckets.
        {
            let buckets = wrapped.buckets.read().unwrap();
            buckets[1].1.put(&[2], b"v").expect("put");
            buckets[1].1.put(&[5], b"v").expect("put");
            buckets[2].1.put(&[3], b"v").expect("put");
        }

        let range = BinRange {
            start: vec![0],
            stop: vec![9],
        };
        let (page, cont) = wrapped
            .read_range_binary(&range, 10, SortOrder::Ascending)
            .expect("read");
        assert_eq!(
            page.iter().map(|(k, _)| k[0]).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5, 7]
        );
        assert_eq!(cont, Continuation::Complete);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn bucket_update_opens_new_and_drops_retired() {
        let (dir, keyspace) = temp_keyspace("rotate");
        let ids = create_bucket_list("s", &spec(3));
        let wrapped = WrappedStore::init_buckets(
            keyspace.clone(),
            SortOrder::Ascending,
            &ids,
            OpenMode::create(),
        )
        .expect("init buckets");
        wrapped.put(b"k", b"v").expect("put");

        // Rotate: new head bucket, oldest bucket retired.
        let rotated = vec!["s_b3".to_string(), "s_b0".to_string(), "s_b1".to_string()];
        wrapped.apply_bucket_update(&rotated).expect("rotate");
        assert_eq!(wrapped.bucket_ids(), rotated);
        // Data written before rotation is still readable (bucket b0 kept).
        assert_eq!(wrapped.get(b"k").expect("get"), Some(b"v".to_vec()));
        // New writes land in the new head.
        wrapped.put(b"k2", b"v2").expect("put");
        {
            let buckets = wrapped.buckets.read().unwrap();
            assert_eq!(buckets[0].1.get(b"k2").expect("get"), Some(b"v2".to_vec()));
        }
        let _ = std::fs::remove_dir_all(dir);
    }
}
