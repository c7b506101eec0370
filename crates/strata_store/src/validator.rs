//! Validation and normalization of `create_table` arguments.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::ring::RingRegistry;
use crate::table::{
    CreateTableRequest, DataModel, ShardKind, SizeMargin, SortOrder, TableDescriptor, TableOption,
    TimeMargin, WrapperSpec, MAX_COLUMNS, MAX_KEY_FIELDS, MAX_NAME_LEN,
};

/// Check `create_table` arguments and normalize them into a canonical
/// descriptor plus the shard count to place (placement is filled in later
/// by the caller).
///
/// Validation never mutates state; the ring registry is only consulted for
/// the name-uniqueness check.
pub fn verify_create_table_args(
    req: &CreateTableRequest,
    rings: &RingRegistry,
    default_shards: u32,
) -> Result<(TableDescriptor, u32)> {
    verify_name(&req.name, rings)?;
    verify_key(&req.key)?;
    let columns = verify_columns(&req.columns, &req.key)?;
    let (columns, indexes) = verify_indexes(&req.indexes, columns, &req.key)?;
    let options = verify_options(&req.options, default_shards)?;

    let table = TableDescriptor {
        name: req.name.clone(),
        key: req.key.clone(),
        columns,
        indexes,
        kind: options.kind,
        data_model: options.data_model,
        comparator: options.comparator,
        wrapper: options.wrapper,
        time_series: options.time_series,
        distributed: options.distributed,
        replication_factor: options.replication_factor,
        shards: Vec::new(),
    };
    Ok((table, options.n_shards))
}

/// Options after defaulting, before placement.
struct ResolvedOptions {
    n_shards: u32,
    distributed: bool,
    replication_factor: u32,
    kind: ShardKind,
    data_model: DataModel,
    wrapper: Option<WrapperSpec>,
    comparator: SortOrder,
    time_series: bool,
}

fn verify_name(name: &str, rings: &RingRegistry) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid("name", "empty table name"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::invalid(
            "name",
            format!("longer than {MAX_NAME_LEN} bytes"),
        ));
    }
    if !is_printable(name) {
        return Err(Error::invalid("name", "contains unprintable characters"));
    }
    if rings.exists(name) {
        return Err(Error::TableExists(name.to_string()));
    }
    Ok(())
}

fn verify_key(key: &[String]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid("key", "no key field given"));
    }
    if key.len() > MAX_KEY_FIELDS {
        return Err(Error::invalid(
            "key",
            format!("more than {MAX_KEY_FIELDS} key fields"),
        ));
    }
    check_printable_unique("key", key)?;
    Ok(())
}

/// Accept the declared columns, then remove key fields so only data columns
/// remain (order preserved).
fn verify_columns(columns: &[String], key: &[String]) -> Result<Vec<String>> {
    if columns.is_empty() {
        return Err(Error::invalid("columns", "no columns given"));
    }
    if columns.len() > MAX_COLUMNS {
        return Err(Error::invalid(
            "columns",
            format!("more than {MAX_COLUMNS} columns"),
        ));
    }
    check_printable_unique("columns", columns)?;
    Ok(columns
        .iter()
        .filter(|c| !key.contains(c))
        .cloned()
        .collect())
}

/// Validate index fields and append any not already present to the data
/// columns.
fn verify_indexes(
    indexes: &[String],
    mut columns: Vec<String>,
    key: &[String],
) -> Result<(Vec<String>, Vec<String>)> {
    check_printable_unique("indexes", indexes)?;
    // Index fields must not shadow key fields.
    for field in indexes {
        if key.contains(field) {
            return Err(Error::invalid(
                "indexes",
                format!("index field {field} duplicates a key field"),
            ));
        }
    }
    for field in indexes {
        if !columns.contains(field) {
            columns.push(field.clone());
        }
    }
    Ok((columns, indexes.to_vec()))
}

fn verify_options(options: &[TableOption], default_shards: u32) -> Result<ResolvedOptions> {
    let mut out = ResolvedOptions {
        n_shards: default_shards.max(1),
        distributed: true,
        replication_factor: 1,
        kind: ShardKind::Ordered,
        data_model: DataModel::Binary,
        wrapper: None,
        comparator: SortOrder::Ascending,
        time_series: false,
    };
    for option in options {
        match option {
            TableOption::Shards(n) => {
                if *n == 0 {
                    return Err(Error::invalid("options", "shards must be positive"));
                }
                out.n_shards = *n;
            }
            TableOption::Distributed(d) => out.distributed = *d,
            TableOption::ReplicationFactor(rf) => {
                if *rf == 0 {
                    return Err(Error::invalid(
                        "options",
                        "replication_factor must be positive",
                    ));
                }
                out.replication_factor = *rf;
            }
            TableOption::Kind(kind) => out.kind = *kind,
            TableOption::DataModel(model) => out.data_model = *model,
            TableOption::Wrapper(spec) => {
                verify_wrapper(spec)?;
                out.wrapper = Some(spec.clone());
            }
            TableOption::Comparator(order) => out.comparator = *order,
            TableOption::TimeSeries(ts) => out.time_series = *ts,
        }
    }
    if out.kind.is_wrapped() && out.wrapper.is_none() {
        // A wrapped kind without a wrapper degrades to the plain form.
        out.kind = match out.kind {
            ShardKind::EtsOrderedWrapped => ShardKind::EtsOrdered,
            _ => ShardKind::Ordered,
        };
    }
    if !out.kind.is_wrapped() {
        out.wrapper = None;
    }
    Ok(out)
}

fn verify_wrapper(spec: &WrapperSpec) -> Result<()> {
    if spec.num_of_buckets < 3 {
        return Err(Error::invalid("options", "wrapper needs at least 3 buckets"));
    }
    if spec.time_margin.is_none() && spec.size_margin.is_none() {
        return Err(Error::invalid(
            "options",
            "wrapper needs a time or size margin",
        ));
    }
    match spec.time_margin {
        Some(TimeMargin::Seconds(0) | TimeMargin::Minutes(0) | TimeMargin::Hours(0)) => {
            return Err(Error::invalid("options", "time margin must be positive"));
        }
        _ => {}
    }
    if let Some(SizeMargin::Megabytes(0)) = spec.size_margin {
        return Err(Error::invalid("options", "size margin must be positive"));
    }
    Ok(())
}

fn check_printable_unique(field: &'static str, names: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(names.len());
    for name in names {
        if name.is_empty() || !is_printable(name) {
            return Err(Error::invalid(
                field,
                format!("field {name:?} is not a printable name"),
            ));
        }
        if !seen.insert(name.as_str()) {
            return Err(Error::invalid(field, format!("duplicate field {name}")));
        }
    }
    Ok(())
}

fn is_printable(s: &str) -> bool {
    s.chars().all(|c| !c.is_control())
}
