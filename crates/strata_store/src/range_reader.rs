//! Range-read fanout across shards and the sorted-merge continuation
//! protocol.
//!
//! Every shard returns an independently sorted page plus a frontier (the
//! next key it would have produced). The merged result is only safe up to
//! the earliest frontier: past it, a lagging shard's next page could still
//! slot items in. The merge therefore cuts at that frontier and hands it
//! back as the continuation key.

use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::backend::{BinRange, Continuation};
use crate::codec;
use crate::error::{Error, Result};
use crate::shard_manager::{ShardHandle, ShardManager};
use crate::table::{Fields, ShardKind, ShardPlacement, SortOrder, TableDescriptor};
use crate::topology::Topology;

/// One decoded row of a range read.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: Fields,
    pub columns: Fields,
}

/// Continuation of a table-level range read, in decoded form.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeCont {
    Complete,
    Key(Fields),
}

/// A read request executed uniformly on every shard.
#[derive(Debug, Clone)]
pub enum ShardRead {
    /// Bounded range, paged by `chunk`.
    Page { range: BinRange, chunk: usize },
    /// Up to `n` items from `start` onward.
    Counted { start: Vec<u8>, n: usize },
    /// Backend size estimate.
    Size,
}

/// Per-shard result of a `ShardRead`.
#[derive(Debug, Clone)]
pub enum ShardReadResult {
    Page {
        kvl: Vec<(Vec<u8>, Vec<u8>)>,
        cont: Continuation,
    },
    Size(u64),
}

/// Run one read against one local shard handle, dispatching on shard type.
pub(crate) fn execute_read(
    handle: &ShardHandle,
    read: &ShardRead,
    dir: SortOrder,
) -> Result<ShardReadResult> {
    match (handle, read) {
        (ShardHandle::Ordered(store), ShardRead::Page { range, chunk }) => {
            let (kvl, cont) = store.read_range_binary(range, *chunk)?;
            Ok(ShardReadResult::Page { kvl, cont })
        }
        (ShardHandle::Wrapped(store), ShardRead::Page { range, chunk }) => {
            let (kvl, cont) = store.read_range_binary(range, *chunk, dir)?;
            Ok(ShardReadResult::Page { kvl, cont })
        }
        (ShardHandle::Ordered(store), ShardRead::Counted { start, n }) => {
            let kvl = store.read_range_n_binary(start, *n)?;
            Ok(ShardReadResult::Page {
                kvl,
                cont: Continuation::Complete,
            })
        }
        (ShardHandle::Wrapped(store), ShardRead::Counted { start, n }) => {
            let kvl = store.read_range_n_binary(start, *n)?;
            Ok(ShardReadResult::Page {
                kvl,
                cont: Continuation::Complete,
            })
        }
        (ShardHandle::Ordered(store), ShardRead::Size) => {
            Ok(ShardReadResult::Size(store.approximate_size()?))
        }
        (ShardHandle::Wrapped(_), ShardRead::Size) => Err(Error::TypeNotSupported(
            ShardKind::OrderedWrapped.as_str().to_string(),
        )),
    }
}

/// Dispatch one task per shard on this node and await them all.
///
/// Results stay positionally aligned with `shards`. Cancelling the token
/// abandons outstanding tasks without touching shard state.
pub(crate) async fn map_shards_local(
    manager: Arc<ShardManager>,
    read: ShardRead,
    dir: SortOrder,
    shards: &[ShardPlacement],
    cancel: &CancellationToken,
) -> Result<Vec<Result<ShardReadResult>>> {
    let mut tasks = FuturesUnordered::new();
    for (idx, placement) in shards.iter().enumerate() {
        let manager = manager.clone();
        let shard = placement.shard.clone();
        let read = read.clone();
        tasks.push(tokio::spawn(async move {
            let result = match manager.handle(&shard) {
                Some(handle) => execute_read(&handle, &read, dir),
                None => Err(Error::NoShard(shard)),
            };
            (idx, result)
        }));
    }

    let mut slots: Vec<Option<Result<ShardReadResult>>> =
        (0..shards.len()).map(|_| None).collect();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                for task in tasks.iter() {
                    task.abort();
                }
                return Err(Error::Aborted("range fanout cancelled".into()));
            }
            next = tasks.next() => match next {
                Some(Ok((idx, result))) => slots[idx] = Some(result),
                Some(Err(join_err)) => {
                    return Err(Error::Aborted(format!("shard task failed: {join_err}")));
                }
                None => break,
            }
        }
    }
    Ok(slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err(Error::Aborted("missing shard result".into()))))
        .collect())
}

/// Is `a` earlier than `b` under the merge direction?
fn earlier(dir: SortOrder, a: &[u8], b: &[u8]) -> bool {
    match dir {
        SortOrder::Ascending => a < b,
        SortOrder::Descending => a > b,
    }
}

/// Stable k-way merge of per-shard sorted pages.
///
/// Ties across pages keep the first-arriving (lowest page index) pair;
/// duplicate keys beyond it are dropped.
pub(crate) fn merge_sorted_kvls(
    dir: SortOrder,
    kvls: Vec<Vec<(Vec<u8>, Vec<u8>)>>,
) -> Vec<(Vec<u8>, Vec<u8>)> {
    let total: usize = kvls.iter().map(|l| l.len()).sum();
    let mut cursor = vec![0usize; kvls.len()];
    let mut out: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(total);
    loop {
        let mut best: Option<usize> = None;
        for (li, list) in kvls.iter().enumerate() {
            let Some((key, _)) = list.get(cursor[li]) else {
                continue;
            };
            best = match best {
                None => Some(li),
                Some(bi) => {
                    let best_key = &kvls[bi][cursor[bi]].0;
                    if earlier(dir, key, best_key) {
                        Some(li)
                    } else {
                        Some(bi)
                    }
                }
            };
        }
        let Some(li) = best else { break };
        let pair = kvls[li][cursor[li]].clone();
        cursor[li] += 1;
        if out.last().map(|(k, _)| *k == pair.0).unwrap_or(false) {
            // Duplicate across pages: first one encountered wins.
            continue;
        }
        out.push(pair);
    }
    out
}

/// Merge per-shard pages and compute the combined continuation.
///
/// If any shard has an unconsumed frontier, the merge is cut just before
/// the earliest such frontier key: everything past it could still be
/// preceded by items from a lagging shard's next page. A sentinel pair
/// guarantees the cut key is present in the merge even when no shard
/// returned it as data.
pub(crate) fn merge_pages(
    dir: SortOrder,
    pages: Vec<(Vec<(Vec<u8>, Vec<u8>)>, Continuation)>,
) -> (Vec<(Vec<u8>, Vec<u8>)>, Continuation) {
    let mut frontier: Option<Vec<u8>> = None;
    for (_, cont) in &pages {
        if let Continuation::Key(key) = cont {
            frontier = Some(match frontier {
                None => key.clone(),
                Some(best) => {
                    if earlier(dir, key, &best) {
                        key.clone()
                    } else {
                        best
                    }
                }
            });
        }
    }
    let kvls: Vec<_> = pages.into_iter().map(|(kvl, _)| kvl).collect();
    match frontier {
        None => (merge_sorted_kvls(dir, kvls), Continuation::Complete),
        Some(cut) => {
            let mut lists = Vec::with_capacity(kvls.len() + 1);
            lists.push(vec![(cut.clone(), Vec::new())]);
            lists.extend(kvls);
            let mut merged = merge_sorted_kvls(dir, lists);
            if let Some(pos) = merged.iter().position(|(key, _)| *key == cut) {
                merged.truncate(pos);
            }
            (merged, Continuation::Key(cut))
        }
    }
}

fn dir_of(table: &TableDescriptor) -> SortOrder {
    table.comparator
}

/// Fan a bounded range read out to every shard of `table` and merge.
pub async fn read_range_on_shards(
    manager: &Arc<ShardManager>,
    topology: &Arc<dyn Topology>,
    table: &TableDescriptor,
    start: &Fields,
    stop: &Fields,
    chunk: usize,
    cancel: &CancellationToken,
) -> Result<(Vec<Row>, RangeCont)> {
    let dir = dir_of(table);
    let range = BinRange {
        start: codec::encode_key(&table.key, start)?,
        stop: codec::encode_key(&table.key, stop)?,
    };
    let read = ShardRead::Page { range, chunk };
    let results = dispatch(manager, topology, table, read, dir, cancel).await?;
    let pages = collect_pages(results)?;
    let (kvl, cont) = merge_pages(dir, pages);
    let rows = decode_rows(table, kvl)?;
    let cont = match cont {
        Continuation::Complete => RangeCont::Complete,
        Continuation::Key(key) => RangeCont::Key(codec::decode_key(&table.key, &key)?),
    };
    Ok((rows, cont))
}

/// Fan a bounded-count read out to every shard of `table` and merge.
///
/// Each shard is asked for the full `n`: that is the safe upper bound, as
/// any single shard could hold all of the first `n` keys.
pub async fn read_range_n_on_shards(
    manager: &Arc<ShardManager>,
    topology: &Arc<dyn Topology>,
    table: &TableDescriptor,
    start: &Fields,
    n: usize,
    cancel: &CancellationToken,
) -> Result<Vec<Row>> {
    let dir = dir_of(table);
    let read = ShardRead::Counted {
        start: codec::encode_key(&table.key, start)?,
        n,
    };
    let results = dispatch(manager, topology, table, read, dir, cancel).await?;
    let pages = collect_pages(results)?;
    let kvls: Vec<_> = pages.into_iter().map(|(kvl, _)| kvl).collect();
    let mut merged = merge_sorted_kvls(dir, kvls);
    merged.truncate(n);
    decode_rows(table, merged)
}

/// Sum the backend size estimates across a table's shards.
pub async fn approximate_size(
    manager: &Arc<ShardManager>,
    topology: &Arc<dyn Topology>,
    table: &TableDescriptor,
    cancel: &CancellationToken,
) -> Result<u64> {
    if !matches!(table.kind, ShardKind::Ordered | ShardKind::EtsOrdered) {
        return Err(Error::TypeNotSupported(table.kind.as_str().to_string()));
    }
    let dir = dir_of(table);
    let results = dispatch(manager, topology, table, ShardRead::Size, dir, cancel).await?;
    let mut total = 0u64;
    for result in results {
        match result? {
            ShardReadResult::Size(size) => total = total.saturating_add(size),
            ShardReadResult::Page { .. } => {
                return Err(Error::Corrupt("size request returned a page".into()));
            }
        }
    }
    Ok(total)
}

async fn dispatch(
    manager: &Arc<ShardManager>,
    topology: &Arc<dyn Topology>,
    table: &TableDescriptor,
    read: ShardRead,
    dir: SortOrder,
    cancel: &CancellationToken,
) -> Result<Vec<Result<ShardReadResult>>> {
    if table.distributed {
        topology.map_shards_seq(read, dir, &table.shards).await
    } else {
        map_shards_local(manager.clone(), read, dir, &table.shards, cancel).await
    }
}

/// Unwrap per-shard results, surfacing the first error in shard order.
fn collect_pages(
    results: Vec<Result<ShardReadResult>>,
) -> Result<Vec<(Vec<(Vec<u8>, Vec<u8>)>, Continuation)>> {
    let mut pages = Vec::with_capacity(results.len());
    for result in results {
        match result? {
            ShardReadResult::Page { kvl, cont } => pages.push((kvl, cont)),
            ShardReadResult::Size(_) => {
                return Err(Error::Corrupt("page request returned a size".into()));
            }
        }
    }
    Ok(pages)
}

fn decode_rows(table: &TableDescriptor, kvl: Vec<(Vec<u8>, Vec<u8>)>) -> Result<Vec<Row>> {
    kvl.into_iter()
        .map(|(key, value)| {
            Ok(Row {
                key: codec::decode_key(&table.key, &key)?,
                columns: codec::decode_value(table.data_model, &table.columns, &value)?,
            })
        })
        .collect()
}
