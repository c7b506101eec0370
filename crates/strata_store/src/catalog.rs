//! Durable catalog of table and shard descriptors.
//!
//! Two fjall partitions hold one JSON row per table and per shard. Row
//! writes are ordered so that a reader observing a table row always finds
//! the table's shard rows: shard rows go in first on create, and come out
//! last on delete.

use std::sync::{Arc, Mutex};

use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle};

use crate::error::{Error, Result};
use crate::table::{ShardDescriptor, TableDescriptor};

const TABLES_PARTITION: &str = "strata_tables";
const SHARDS_PARTITION: &str = "strata_shards";

/// Catalog over the node keyspace.
pub struct Catalog {
    tables: PartitionHandle,
    shards: PartitionHandle,
    // Serializes row writes; plain reads and deletes stay dirty.
    write_lock: Mutex<()>,
}

impl Catalog {
    pub fn open(keyspace: Arc<Keyspace>) -> Result<Self> {
        let tables = keyspace.open_partition(TABLES_PARTITION, PartitionCreateOptions::default())?;
        let shards = keyspace.open_partition(SHARDS_PARTITION, PartitionCreateOptions::default())?;
        Ok(Self {
            tables,
            shards,
            write_lock: Mutex::new(()),
        })
    }

    /// Write one table row.
    ///
    /// Creation flows write every shard row before this one, so the table
    /// row's visibility implies its shard rows.
    pub fn put_table(&self, table: &TableDescriptor) -> Result<()> {
        let row = encode_row(table)?;
        let _guard = self.write_lock.lock().unwrap();
        self.tables
            .insert(table.name.as_bytes(), row)
            .map_err(txn_err)
    }

    /// Write one shard row.
    pub fn put_shard(&self, shard: &ShardDescriptor) -> Result<()> {
        let row = encode_row(shard)?;
        let _guard = self.write_lock.lock().unwrap();
        self.shards
            .insert(shard.shard.as_bytes(), row)
            .map_err(txn_err)
    }

    /// Dirty read of a table row.
    pub fn get_table(&self, name: &str) -> Result<Option<TableDescriptor>> {
        match self.tables.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(decode_row(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Dirty read of a shard row.
    pub fn get_shard(&self, shard: &str) -> Result<Option<ShardDescriptor>> {
        match self.shards.get(shard.as_bytes())? {
            Some(bytes) => Ok(Some(decode_row(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Dirty delete of one table row.
    ///
    /// Deletion flows remove this row before the shard rows (the reverse
    /// of creation).
    pub fn delete_table(&self, name: &str) -> Result<()> {
        self.tables.remove(name.as_bytes()).map_err(txn_err)
    }

    /// Dirty delete of one shard row.
    pub fn delete_shard(&self, shard: &str) -> Result<()> {
        self.shards.remove(shard.as_bytes()).map_err(txn_err)
    }

    /// Replace a wrapped shard's live bucket list.
    ///
    /// Read-modify-write under the catalog write lock so concurrent
    /// rotations cannot interleave.
    pub fn update_bucket_list(&self, shard: &str, buckets: Vec<String>) -> Result<ShardDescriptor> {
        let _guard = self.write_lock.lock().unwrap();
        let mut desc = match self.shards.get(shard.as_bytes())? {
            Some(bytes) => decode_row::<ShardDescriptor>(&bytes)?,
            None => return Err(Error::NoShard(shard.to_string())),
        };
        desc.buckets = Some(buckets);
        self.shards
            .insert(shard.as_bytes(), encode_row(&desc)?)
            .map_err(txn_err)?;
        Ok(desc)
    }
}

fn txn_err(err: fjall::Error) -> Error {
    Error::Aborted(err.to_string())
}

fn encode_row<T: serde::Serialize>(row: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(row).map_err(|err| Error::Corrupt(err.to_string()))
}

fn decode_row<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|err| Error::Corrupt(err.to_string()))
}
