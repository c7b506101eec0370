//! Table and shard descriptors plus the option set accepted at creation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Longest accepted table name, in bytes.
pub const MAX_NAME_LEN: usize = 128;
/// Most key fields a table may declare.
pub const MAX_KEY_FIELDS: usize = 100;
/// Most columns a table may declare.
pub const MAX_COLUMNS: usize = 10_000;

/// One application-level field value, usable in keys and columns.
///
/// Keys have a total order: values order by type tag first (`Str` < `Int` <
/// `Float` < `Bytes`), then by value within a type. `Float` keys reject NaN
/// at encode time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Str(String),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
}

/// An association of field names to values, in application order.
pub type Fields = Vec<(String, Datum)>;

/// Key sort direction for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// How a row's non-key columns are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataModel {
    /// The whole column association stored opaquely, returned unchanged.
    Binary,
    /// Positional values in declared column order, no names on the wire.
    Array,
    /// Name/value map, canonicalized by name.
    Hash,
}

/// Storage flavor of a shard.
///
/// The `Ets*` variants are accepted as aliases for a future cache-fronted
/// mode; at this layer they behave exactly like their plain counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardKind {
    Ordered,
    OrderedWrapped,
    EtsOrdered,
    EtsOrderedWrapped,
}

impl ShardKind {
    /// Whether shards of this kind rotate through time/size-bounded buckets.
    pub fn is_wrapped(self) -> bool {
        matches!(self, ShardKind::OrderedWrapped | ShardKind::EtsOrderedWrapped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ShardKind::Ordered => "ordered",
            ShardKind::OrderedWrapped => "ordered_wrapped",
            ShardKind::EtsOrdered => "ets_ordered",
            ShardKind::EtsOrderedWrapped => "ets_ordered_wrapped",
        }
    }
}

/// Age bound for bucket rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeMargin {
    Seconds(u32),
    Minutes(u32),
    Hours(u32),
}

/// Size bound for bucket rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeMargin {
    Megabytes(u32),
}

/// Bucket rotation policy for wrapped shards.
///
/// At least one of the margins must be set; `num_of_buckets` must be >= 3 so
/// the rotation always has a current, a draining, and a retiring bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperSpec {
    pub num_of_buckets: u32,
    pub time_margin: Option<TimeMargin>,
    pub size_margin: Option<SizeMargin>,
}

/// Nodes owning a shard, grouped by data center.
pub type RingEntry = BTreeMap<String, Vec<String>>;

/// One shard of a table together with its placement, if any.
///
/// Local-only tables carry no ring entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardPlacement {
    pub shard: String,
    pub ring_entry: Option<RingEntry>,
}

/// Options accepted by `create_table`.
#[derive(Debug, Clone, PartialEq)]
pub enum TableOption {
    Shards(u32),
    Distributed(bool),
    ReplicationFactor(u32),
    Kind(ShardKind),
    DataModel(DataModel),
    Wrapper(WrapperSpec),
    Comparator(SortOrder),
    TimeSeries(bool),
}

/// Canonical descriptor of a table. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    /// Ordered key fields; never empty.
    pub key: Vec<String>,
    /// Data columns: declared columns minus key fields, plus any index
    /// fields not already present, in declaration order.
    pub columns: Vec<String>,
    pub indexes: Vec<String>,
    pub kind: ShardKind,
    pub data_model: DataModel,
    pub comparator: SortOrder,
    pub wrapper: Option<WrapperSpec>,
    pub time_series: bool,
    pub distributed: bool,
    pub replication_factor: u32,
    /// Placement materialized at creation.
    pub shards: Vec<ShardPlacement>,
}

impl TableDescriptor {
    /// Shard ids without placement info.
    pub fn shard_ids(&self) -> Vec<String> {
        self.shards.iter().map(|p| p.shard.clone()).collect()
    }
}

/// Per-shard descriptor stored in the catalog. Only `buckets` mutates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardDescriptor {
    pub shard: String,
    /// Owning table.
    pub name: String,
    pub kind: ShardKind,
    pub key: Vec<String>,
    pub columns: Vec<String>,
    pub indexes: Vec<String>,
    pub comparator: SortOrder,
    pub data_model: DataModel,
    pub wrapper: Option<WrapperSpec>,
    /// Live buckets for wrapped shards, newest first; absent otherwise.
    pub buckets: Option<Vec<String>>,
}

impl ShardDescriptor {
    /// Build the shard row for `shard` from its owning table's descriptor.
    pub fn from_table(table: &TableDescriptor, shard: &str, buckets: Option<Vec<String>>) -> Self {
        Self {
            shard: shard.to_string(),
            name: table.name.clone(),
            kind: table.kind,
            key: table.key.clone(),
            columns: table.columns.clone(),
            indexes: table.indexes.clone(),
            comparator: table.comparator,
            data_model: table.data_model,
            wrapper: table.wrapper.clone(),
            buckets,
        }
    }
}

/// Arguments to `create_table` before validation.
#[derive(Debug, Clone, Default)]
pub struct CreateTableRequest {
    pub name: String,
    pub key: Vec<String>,
    pub columns: Vec<String>,
    pub indexes: Vec<String>,
    pub options: Vec<TableOption>,
}
