//! Topology seam for distributed table operations.
//!
//! The real cluster transport lives behind the `Topology` trait; this
//! crate ships the single-node implementation, which executes every
//! operation against the local shard manager. Distributed table ops are
//! two-phase: a forward op under a timeout, and a revert op applied on
//! failure to restore the pre-operation state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::range_reader::{map_shards_local, ShardRead, ShardReadResult};
use crate::shard_manager::ShardManager;
use crate::table::{ShardPlacement, SortOrder, TableDescriptor};

/// Timeout applied to each distributed table operation.
pub const TOPO_TIMEOUT: Duration = Duration::from_secs(10);

/// A table-level operation shipped to every node owning the table.
#[derive(Debug, Clone)]
pub enum TableOp {
    CreateShards(Box<TableDescriptor>),
    OpenShards(String),
    CloseShards(String),
    DeleteShards(String),
}

impl TableOp {
    fn name(&self) -> &str {
        match self {
            TableOp::CreateShards(table) => &table.name,
            TableOp::OpenShards(name)
            | TableOp::CloseShards(name)
            | TableOp::DeleteShards(name) => name,
        }
    }
}

/// Transport-agnostic view of the cluster.
#[async_trait]
pub trait Topology: Send + Sync {
    /// Execute `op` on every node that owns the table.
    async fn call(&self, op: TableOp) -> Result<()>;

    /// Execute one read per shard, one successful replica each, results
    /// positionally aligned with `shards`.
    async fn map_shards_seq(
        &self,
        read: ShardRead,
        dir: SortOrder,
        shards: &[ShardPlacement],
    ) -> Result<Vec<Result<ShardReadResult>>>;
}

/// Forward/revert pair for one distributed operation.
pub struct TwoPhase {
    pub forward: TableOp,
    /// Inverse operation; `None` for terminal operations like delete.
    pub revert: Option<TableOp>,
}

/// Run `action.forward` under the topology timeout; on failure or timeout
/// apply the revert op (best effort) and surface the original error.
pub async fn two_phase(topology: &Arc<dyn Topology>, action: TwoPhase) -> Result<()> {
    let name = action.forward.name().to_string();
    let outcome = match tokio::time::timeout(TOPO_TIMEOUT, topology.call(action.forward)).await {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(err)) => err,
        Err(_) => Error::Timeout {
            op: "distributed table operation",
        },
    };
    if let Some(revert) = action.revert {
        tracing::warn!(table = %name, error = %outcome, "table operation failed, reverting");
        if let Err(revert_err) =
            tokio::time::timeout(TOPO_TIMEOUT, topology.call(revert)).await.unwrap_or(Err(
                Error::Timeout {
                    op: "table operation revert",
                },
            ))
        {
            tracing::warn!(table = %name, error = %revert_err, "revert failed");
        }
    }
    Err(outcome)
}

/// Single-node topology: every owning node is this node.
pub struct LocalTopology {
    manager: Arc<ShardManager>,
}

impl LocalTopology {
    pub fn new(manager: Arc<ShardManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Topology for LocalTopology {
    async fn call(&self, op: TableOp) -> Result<()> {
        match op {
            TableOp::CreateShards(table) => self.manager.create_local(&table),
            TableOp::OpenShards(name) => self.manager.open_local(&name),
            TableOp::CloseShards(name) => self.manager.close_local(&name),
            TableOp::DeleteShards(name) => self.manager.delete_local(&name),
        }
    }

    async fn map_shards_seq(
        &self,
        read: ShardRead,
        dir: SortOrder,
        shards: &[ShardPlacement],
    ) -> Result<Vec<Result<ShardReadResult>>> {
        // Locally there is exactly one replica per shard.
        let cancel = CancellationToken::new();
        map_shards_local(self.manager.clone(), read, dir, shards, &cancel).await
    }
}
