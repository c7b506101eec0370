//! Shard lifecycle: create, open, close, and delete the shards this node
//! owns, dispatching on shard type.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use fjall::Keyspace;

use crate::backend::{OpenMode, ShardStore};
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::placement::find_local_shards;
use crate::table::{ShardDescriptor, TableDescriptor};
use crate::wrapper::{create_bucket_list, WrappedStore};

/// A live shard worker, one per locally owned shard.
///
/// The worker owns its backend handle exclusively; nothing else opens or
/// closes the underlying partitions.
#[derive(Clone)]
pub enum ShardHandle {
    Ordered(Arc<ShardStore>),
    Wrapped(Arc<WrappedStore>),
}

/// Manages the shard workers on this node.
pub struct ShardManager {
    keyspace: Arc<Keyspace>,
    catalog: Arc<Catalog>,
    node: String,
    dc: String,
    stores: RwLock<HashMap<String, ShardHandle>>,
}

impl ShardManager {
    pub fn new(keyspace: Arc<Keyspace>, catalog: Arc<Catalog>, node: String, dc: String) -> Self {
        Self {
            keyspace,
            catalog,
            node,
            dc,
            stores: RwLock::new(HashMap::new()),
        }
    }

    /// The worker for `shard`, if it is open on this node.
    pub fn handle(&self, shard: &str) -> Option<ShardHandle> {
        self.stores.read().unwrap().get(shard).cloned()
    }

    /// Open the store behind a shard descriptor, dispatching on type.
    fn open_store(&self, desc: &ShardDescriptor, mode: OpenMode) -> Result<ShardHandle> {
        // A wrapped kind without a wrapper degrades to the plain form.
        if desc.kind.is_wrapped() && desc.wrapper.is_some() {
            let bucket_ids = desc
                .buckets
                .clone()
                .ok_or_else(|| Error::Corrupt(format!("wrapped shard {} has no buckets", desc.shard)))?;
            let store = WrappedStore::init_buckets(
                self.keyspace.clone(),
                desc.comparator,
                &bucket_ids,
                mode,
            )?;
            Ok(ShardHandle::Wrapped(Arc::new(store)))
        } else {
            let store =
                ShardStore::open(self.keyspace.clone(), &desc.shard, desc.comparator, mode)?;
            Ok(ShardHandle::Ordered(Arc::new(store)))
        }
    }

    /// Create every shard of `table` placed on this node.
    ///
    /// Backends are created first; the shard rows are then written before
    /// the table row, so a visible table row implies all of its local
    /// shard rows. A failure along the way unwinds the partial state.
    pub fn create_local(&self, table: &TableDescriptor) -> Result<()> {
        let locals = find_local_shards(&table.shards, &self.node, &self.dc);
        let mut descs = Vec::with_capacity(locals.len());
        let mut opened: Vec<(String, ShardHandle)> = Vec::with_capacity(locals.len());

        for placement in &locals {
            let buckets = match (&table.wrapper, table.kind.is_wrapped()) {
                (Some(wrapper), true) => Some(create_bucket_list(&placement.shard, wrapper)),
                _ => None,
            };
            let desc = ShardDescriptor::from_table(table, &placement.shard, buckets);
            match self.open_store(&desc, OpenMode::create()) {
                Ok(handle) => {
                    opened.push((placement.shard.clone(), handle));
                    descs.push(desc);
                }
                Err(err) => {
                    self.scrap_stores(&opened);
                    return Err(err);
                }
            }
        }

        for (written, desc) in descs.iter().enumerate() {
            if let Err(err) = self.catalog.put_shard(desc) {
                self.scrap_rows(&descs[..written]);
                self.scrap_stores(&opened);
                return Err(err);
            }
        }
        if let Err(err) = self.catalog.put_table(table) {
            self.scrap_rows(&descs);
            self.scrap_stores(&opened);
            return Err(err);
        }

        let mut stores = self.stores.write().unwrap();
        for (shard, handle) in opened {
            stores.insert(shard, handle);
        }
        tracing::info!(table = %table.name, shards = descs.len(), "created local shards");
        Ok(())
    }

    /// Open every locally placed shard of an existing table.
    pub fn open_local(&self, name: &str) -> Result<()> {
        let table = self.table(name)?;
        let locals = find_local_shards(&table.shards, &self.node, &self.dc);
        let mut opened = Vec::with_capacity(locals.len());
        for placement in &locals {
            let desc = self
                .catalog
                .get_shard(&placement.shard)?
                .ok_or_else(|| Error::NoShard(placement.shard.clone()))?;
            let handle = self.open_store(&desc, OpenMode::open())?;
            opened.push((placement.shard.clone(), handle));
        }
        let mut stores = self.stores.write().unwrap();
        for (shard, handle) in opened {
            stores.insert(shard, handle);
        }
        tracing::info!(table = %name, "opened local shards");
        Ok(())
    }

    /// Stop this node's shard workers for a table. Metadata stays intact.
    pub fn close_local(&self, name: &str) -> Result<()> {
        let table = self.table(name)?;
        let locals = find_local_shards(&table.shards, &self.node, &self.dc);
        let mut stores = self.stores.write().unwrap();
        for placement in &locals {
            stores.remove(&placement.shard);
        }
        tracing::info!(table = %name, "closed local shards");
        Ok(())
    }

    /// Delete this node's shards of a table: on-disk data first, then the
    /// catalog rows (table row removed before shard rows, one batch).
    pub fn delete_local(&self, name: &str) -> Result<()> {
        let table = self.table(name)?;
        let locals = find_local_shards(&table.shards, &self.node, &self.dc);
        for placement in &locals {
            let handle = match self.handle(&placement.shard) {
                Some(handle) => Some(handle),
                None => {
                    // Closed table: reopen just to tear the data down.
                    match self.catalog.get_shard(&placement.shard)? {
                        Some(desc) => Some(self.open_store(&desc, OpenMode::open())?),
                        None => None,
                    }
                }
            };
            match handle {
                Some(ShardHandle::Ordered(store)) => store.delete_db()?,
                Some(ShardHandle::Wrapped(store)) => store.delete_shard()?,
                None => {}
            }
        }
        {
            let mut stores = self.stores.write().unwrap();
            for placement in &locals {
                stores.remove(&placement.shard);
            }
        }
        // Reverse of creation: the table row goes first, shard rows last.
        self.catalog.delete_table(name)?;
        for shard in table.shard_ids() {
            self.catalog.delete_shard(&shard)?;
        }
        tracing::info!(table = %name, "deleted local shards");
        Ok(())
    }

    /// Apply a rotated bucket list to a wrapped shard.
    ///
    /// The catalog row is updated transactionally first; the live worker
    /// (if open) then adopts the new list.
    pub fn update_bucket_list(&self, shard: &str, buckets: Vec<String>) -> Result<()> {
        let desc = self
            .catalog
            .get_shard(shard)?
            .ok_or_else(|| Error::NoShard(shard.to_string()))?;
        if !desc.kind.is_wrapped() {
            return Err(Error::TypeNotSupported(desc.kind.as_str().to_string()));
        }
        self.catalog.update_bucket_list(shard, buckets.clone())?;
        if let Some(ShardHandle::Wrapped(store)) = self.handle(shard) {
            store.apply_bucket_update(&buckets)?;
        }
        tracing::info!(shard = %shard, buckets = buckets.len(), "updated bucket list");
        Ok(())
    }

    fn table(&self, name: &str) -> Result<TableDescriptor> {
        self.catalog
            .get_table(name)?
            .ok_or_else(|| Error::NoTable(name.to_string()))
    }

    /// Best-effort removal of partially written shard rows on a failed
    /// create.
    fn scrap_rows(&self, descs: &[ShardDescriptor]) {
        for desc in descs {
            if let Err(err) = self.catalog.delete_shard(&desc.shard) {
                tracing::warn!(shard = %desc.shard, error = %err, "failed to clean up shard row");
            }
        }
    }

    /// Best-effort removal of partially created backends on a failed create.
    fn scrap_stores(&self, opened: &[(String, ShardHandle)]) {
        for (shard, handle) in opened {
            let result = match handle {
                ShardHandle::Ordered(store) => store.delete_db(),
                ShardHandle::Wrapped(store) => store.delete_shard(),
            };
            if let Err(err) = result {
                tracing::warn!(shard = %shard, error = %err, "failed to clean up partial shard");
            }
        }
    }
}
