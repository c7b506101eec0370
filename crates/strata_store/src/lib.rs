//! Control plane and range-read fanout for a sharded key/value store
//! layered on an ordered embedded LSM backend.
//!
//! The crate covers:
//! - table definition, validation, and the durable table/shard catalog,
//! - shard placement over a per-table consistent-hash ring,
//! - shard lifecycle including time/size-rotated bucket wrapping,
//! - an order-preserving key codec and three column value models,
//! - parallel range reads merged across shards with a stable
//!   continuation protocol.
//!
//! The per-shard stores, the single-node topology, and the catalog all run
//! on one `fjall` keyspace; the cluster transport is a trait seam.

pub mod backend;
pub mod catalog;
pub mod codec;
pub mod error;
pub mod node;
pub mod placement;
pub mod range_reader;
pub mod ring;
pub mod shard_manager;
pub mod table;
pub mod topology;
pub mod validator;
pub mod wrapper;

pub use backend::Continuation;
pub use error::{Error, ErrorKind, Result};
pub use node::{Node, NodeConfig};
pub use range_reader::{RangeCont, Row};
pub use table::{
    CreateTableRequest, DataModel, Datum, Fields, ShardKind, SizeMargin, SortOrder, TableOption,
    TimeMargin, WrapperSpec,
};
