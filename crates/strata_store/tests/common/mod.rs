//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;

use strata_store::{CreateTableRequest, Datum, Fields, Node, NodeConfig, TableOption};

/// Process-unique scratch directory for one test.
pub fn test_dir(name: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    std::env::temp_dir().join(format!("strata_{name}_{}_{}", std::process::id(), nanos))
}

/// Open a fresh single-node instance under a scratch dir.
pub fn open_node(name: &str) -> (PathBuf, Node) {
    let dir = test_dir(name);
    std::fs::create_dir_all(&dir).expect("create test dir");
    let node = Node::open(NodeConfig::single(&dir)).expect("open node");
    (dir, node)
}

pub fn cleanup_dir(dir: &PathBuf) {
    let _ = std::fs::remove_dir_all(dir);
}

/// A simple int-keyed table request: key `id`, columns `id`, `payload`.
pub fn int_table(name: &str, options: Vec<TableOption>) -> CreateTableRequest {
    CreateTableRequest {
        name: name.to_string(),
        key: vec!["id".to_string()],
        columns: vec!["id".to_string(), "payload".to_string()],
        indexes: Vec::new(),
        options,
    }
}

pub fn int_key(id: i64) -> Fields {
    vec![("id".to_string(), Datum::Int(id))]
}

pub fn payload(text: &str) -> Fields {
    vec![("payload".to_string(), Datum::Str(text.to_string()))]
}

/// Extract the integer ids of a row list, in returned order.
pub fn row_ids(rows: &[strata_store::Row]) -> Vec<i64> {
    rows.iter()
        .map(|row| match &row.key[0].1 {
            Datum::Int(id) => *id,
            other => panic!("unexpected key datum: {other:?}"),
        })
        .collect()
}
