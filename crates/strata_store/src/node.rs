//! Node façade: table lifecycle, single-key operations, and range reads.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::codec;
use crate::error::{Error, Result};
use crate::placement;
use crate::range_reader::{self, RangeCont, Row};
use crate::ring::{RingOptions, RingRegistry};
use crate::shard_manager::{ShardHandle, ShardManager};
use crate::table::{CreateTableRequest, Fields, TableDescriptor};
use crate::topology::{two_phase, LocalTopology, TableOp, Topology, TwoPhase};
use crate::validator::verify_create_table_args;

/// Node-level configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This node's name within the cluster.
    pub node: String,
    /// Data center this node lives in.
    pub dc: String,
    /// Default shard count for tables that do not set one.
    pub num_of_local_shards: u32,
    /// Root directory for the node keyspace.
    pub data_dir: PathBuf,
    /// Cluster membership: nodes per data center. Defaults to just this
    /// node when empty.
    pub members: BTreeMap<String, Vec<String>>,
}

impl NodeConfig {
    /// Single-node configuration rooted at `data_dir`.
    pub fn single(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            node: "node1".to_string(),
            dc: "dc1".to_string(),
            num_of_local_shards: 4,
            data_dir: data_dir.into(),
            members: BTreeMap::new(),
        }
    }
}

/// One storage node: the catalog, the ring registry, and the local shard
/// workers, plus the topology used for distributed table operations.
pub struct Node {
    config: NodeConfig,
    manager: Arc<ShardManager>,
    catalog: Arc<Catalog>,
    rings: Arc<RingRegistry>,
    topology: Arc<dyn Topology>,
    /// Cancels outstanding fanout when the node shuts down.
    shutdown: CancellationToken,
}

impl Node {
    /// Open a node with the single-node topology.
    pub fn open(config: NodeConfig) -> Result<Self> {
        let storage_dir = config.data_dir.join("storage");
        std::fs::create_dir_all(&storage_dir)
            .map_err(|err| Error::Aborted(format!("create storage dir: {err}")))?;
        let keyspace = Arc::new(fjall::Config::new(&storage_dir).open()?);
        let catalog = Arc::new(Catalog::open(keyspace.clone())?);
        let manager = Arc::new(ShardManager::new(
            keyspace,
            catalog.clone(),
            config.node.clone(),
            config.dc.clone(),
        ));
        let topology: Arc<dyn Topology> = Arc::new(LocalTopology::new(manager.clone()));
        Ok(Self::with_topology(config, manager, catalog, topology))
    }

    /// Open a node with an externally provided topology (cluster builds).
    pub fn with_topology(
        config: NodeConfig,
        manager: Arc<ShardManager>,
        catalog: Arc<Catalog>,
        topology: Arc<dyn Topology>,
    ) -> Self {
        let mut config = config;
        if config.members.is_empty() {
            config
                .members
                .insert(config.dc.clone(), vec![config.node.clone()]);
        }
        Self {
            config,
            manager,
            catalog,
            rings: Arc::new(RingRegistry::new()),
            topology,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancel outstanding fanout work.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Validate, place, and create a table on every owning node.
    pub async fn create_table(&self, req: CreateTableRequest) -> Result<()> {
        // The ring registry is rebuilt lazily after a restart, so the
        // durable catalog gets the final say on name uniqueness.
        if self.catalog.get_table(&req.name)?.is_some() {
            return Err(Error::TableExists(req.name));
        }
        let (mut table, n_shards) =
            verify_create_table_args(&req, &self.rings, self.config.num_of_local_shards)?;
        table.shards = if table.distributed {
            placement::allocate(
                &table.name,
                n_shards,
                table.replication_factor,
                &self.config.members,
            )
        } else {
            placement::allocate_local(&table.name, n_shards)
        };

        // The ring goes first, with commit semantics: shard creation only
        // proceeds once the ring is loaded, and any failure rolls it back.
        let ring_options = if table.distributed {
            RingOptions::distributed()
        } else {
            RingOptions::local()
        };
        let commit = self
            .rings
            .create_ring(&table.name, table.shards.clone(), ring_options)?;

        let result = two_phase(
            &self.topology,
            TwoPhase {
                forward: TableOp::CreateShards(Box::new(table.clone())),
                revert: Some(TableOp::DeleteShards(table.name.clone())),
            },
        )
        .await;
        match result {
            Ok(()) => {
                self.rings.confirm(commit);
                tracing::info!(table = %table.name, shards = table.shards.len(), "created table");
                Ok(())
            }
            Err(err) => {
                self.rings.revert(commit);
                Err(err)
            }
        }
    }

    /// Open a previously created (or closed) table's shards.
    pub async fn open_table(&self, name: &str) -> Result<()> {
        let table = self.table(name)?;
        // Rebuild the ring from the durable copy if this node restarted.
        let ring_options = if table.distributed {
            RingOptions::distributed()
        } else {
            RingOptions::local()
        };
        self.rings.restore(name, table.shards.clone(), ring_options);
        two_phase(
            &self.topology,
            TwoPhase {
                forward: TableOp::OpenShards(name.to_string()),
                revert: Some(TableOp::CloseShards(name.to_string())),
            },
        )
        .await
    }

    /// Stop a table's shard workers; metadata is retained.
    pub async fn close_table(&self, name: &str) -> Result<()> {
        self.table(name)?;
        two_phase(
            &self.topology,
            TwoPhase {
                forward: TableOp::CloseShards(name.to_string()),
                revert: Some(TableOp::OpenShards(name.to_string())),
            },
        )
        .await
    }

    /// Delete a table everywhere: shard data, catalog rows, and the ring.
    ///
    /// Deletion is terminal, so there is no revert.
    pub async fn delete_table(&self, name: &str) -> Result<()> {
        self.table(name)?;
        two_phase(
            &self.topology,
            TwoPhase {
                forward: TableOp::DeleteShards(name.to_string()),
                revert: None,
            },
        )
        .await?;
        self.rings.delete_ring(name);
        tracing::info!(table = %name, "deleted table");
        Ok(())
    }

    /// Read back a table's descriptor.
    pub fn table_info(&self, name: &str) -> Result<TableDescriptor> {
        self.table(name)
    }

    /// Write one row: key fields plus data columns.
    pub fn write(&self, name: &str, key: Fields, columns: Fields) -> Result<()> {
        let table = self.table(name)?;
        // Index term generation rejects indexed tables until secondary
        // indexes land; for index-free tables it yields nothing.
        codec::encode_indexes(&table.indexes, &columns)?;
        let encoded_key = codec::encode_key(&table.key, &key)?;
        let value = codec::encode_value(table.data_model, &table.columns, &columns)?;
        match self.shard_for(&table, &key)? {
            ShardHandle::Ordered(store) => store.put(&encoded_key, &value),
            ShardHandle::Wrapped(store) => store.put(&encoded_key, &value),
        }
    }

    /// Read one row by key.
    pub fn read(&self, name: &str, key: Fields) -> Result<Option<Fields>> {
        let table = self.table(name)?;
        let encoded_key = codec::encode_key(&table.key, &key)?;
        let value = match self.shard_for(&table, &key)? {
            ShardHandle::Ordered(store) => store.get(&encoded_key)?,
            ShardHandle::Wrapped(store) => store.get(&encoded_key)?,
        };
        value
            .map(|bytes| codec::decode_value(table.data_model, &table.columns, &bytes))
            .transpose()
    }

    /// Delete one row by key.
    pub fn delete(&self, name: &str, key: Fields) -> Result<()> {
        let table = self.table(name)?;
        let encoded_key = codec::encode_key(&table.key, &key)?;
        match self.shard_for(&table, &key)? {
            ShardHandle::Ordered(store) => store.del(&encoded_key),
            ShardHandle::Wrapped(store) => store.del(&encoded_key),
        }
    }

    /// Bounded range read across all shards; see `range_reader`.
    pub async fn read_range(
        &self,
        name: &str,
        start: &Fields,
        stop: &Fields,
        chunk: usize,
    ) -> Result<(Vec<Row>, RangeCont)> {
        let table = self.table(name)?;
        let cancel = self.shutdown.child_token();
        range_reader::read_range_on_shards(
            &self.manager,
            &self.topology,
            &table,
            start,
            stop,
            chunk,
            &cancel,
        )
        .await
    }

    /// Bounded-count range read across all shards.
    pub async fn read_range_n(&self, name: &str, start: &Fields, n: usize) -> Result<Vec<Row>> {
        let table = self.table(name)?;
        let cancel = self.shutdown.child_token();
        range_reader::read_range_n_on_shards(
            &self.manager,
            &self.topology,
            &table,
            start,
            n,
            &cancel,
        )
        .await
    }

    /// Sum of the table's backend size estimates.
    pub async fn approximate_size(&self, name: &str) -> Result<u64> {
        let table = self.table(name)?;
        let cancel = self.shutdown.child_token();
        range_reader::approximate_size(&self.manager, &self.topology, &table, &cancel).await
    }

    /// Replace a wrapped shard's bucket list (rotation callback).
    pub fn update_bucket_list(&self, shard: &str, buckets: Vec<String>) -> Result<()> {
        self.manager.update_bucket_list(shard, buckets)
    }

    /// The ring registry (placement lookups, existence checks).
    pub fn rings(&self) -> &RingRegistry {
        &self.rings
    }

    /// The catalog (descriptor reads).
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn table(&self, name: &str) -> Result<TableDescriptor> {
        self.catalog
            .get_table(name)?
            .ok_or_else(|| Error::NoTable(name.to_string()))
    }

    /// Route a key to its local shard worker via the ring.
    fn shard_for(&self, table: &TableDescriptor, key: &Fields) -> Result<ShardHandle> {
        let hash_key = codec::encode_hash_key(&table.key, key, table.time_series)?;
        let placement = self
            .rings
            .find_shard(&table.name, &hash_key)
            .ok_or_else(|| Error::NoTable(table.name.clone()))?;
        self.manager
            .handle(&placement.shard)
            .ok_or(Error::NoShard(placement.shard))
    }
}
