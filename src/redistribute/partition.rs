//! Splitting a row stream into per-shard result fragments

use std::collections::BTreeMap;

use crate::broadcast::{Broadcaster, DestinationSet};
use crate::connection::LocalOnly;
use crate::encoding::{ColumnType, Row, Value};
use crate::errors::{ExchangeError, ExchangeResult};
use crate::namespace::{NodeId, TransactionContext};
use crate::result_file::ResultId;

/// How partition key values map onto shard intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionMethod {
    /// Intervals cover crc32 hash tokens of the key
    Hash,
    /// Intervals cover integer key values directly
    Range,
}

/// Inclusive value interval owned by one target shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardInterval {
    pub shard_id: u64,
    pub min: i64,
    pub max: i64,
}

/// Sorted, non-overlapping shard intervals of a target relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionScheme {
    method: PartitionMethod,
    intervals: Vec<ShardInterval>,
}

impl PartitionScheme {
    /// Intervals must be non-empty, each `min <= max`, sorted and disjoint
    pub fn new(method: PartitionMethod, intervals: Vec<ShardInterval>) -> ExchangeResult<Self> {
        if intervals.is_empty() {
            return Err(ExchangeError::invalid_state(
                "partitioning requires at least one shard interval",
            ));
        }

        for (index, interval) in intervals.iter().enumerate() {
            if interval.min > interval.max {
                return Err(ExchangeError::invalid_state(format!(
                    "shard {} has min {} greater than max {}",
                    interval.shard_id, interval.min, interval.max
                )));
            }
            if index > 0 && intervals[index - 1].max >= interval.min {
                return Err(ExchangeError::invalid_state(format!(
                    "shard intervals {} and {} overlap or are not sorted",
                    intervals[index - 1].shard_id, interval.shard_id
                )));
            }
        }

        Ok(Self { method, intervals })
    }

    /// `shard_count` hash intervals evenly covering the i32 token space.
    /// Shard ids are `first_shard_id`, `first_shard_id + 1`, ...
    pub fn uniform_hash(shard_count: u32, first_shard_id: u64) -> ExchangeResult<Self> {
        if shard_count == 0 {
            return Err(ExchangeError::invalid_state("shard count must be positive"));
        }

        let increment = (1i64 << 32) / i64::from(shard_count);
        let intervals = (0..shard_count)
            .map(|index| {
                let min = i64::from(i32::MIN) + i64::from(index) * increment;
                let max = if index == shard_count - 1 {
                    i64::from(i32::MAX)
                } else {
                    min + increment - 1
                };
                ShardInterval {
                    shard_id: first_shard_id + u64::from(index),
                    min,
                    max,
                }
            })
            .collect();

        Self::new(PartitionMethod::Hash, intervals)
    }

    pub fn method(&self) -> PartitionMethod {
        self.method
    }

    pub fn intervals(&self) -> &[ShardInterval] {
        &self.intervals
    }

    pub fn shard_count(&self) -> usize {
        self.intervals.len()
    }

    /// Index of the interval that owns `key`
    pub fn partition_index(&self, key: &Value) -> ExchangeResult<usize> {
        let token = match self.method {
            PartitionMethod::Hash => i64::from(hash_token(key)?),
            PartitionMethod::Range => range_token(key)?,
        };

        let index = self.intervals.partition_point(|interval| interval.max < token);
        match self.intervals.get(index) {
            Some(interval) if interval.min <= token => Ok(index),
            _ => Err(ExchangeError::encode_failed(format!(
                "could not find shard for partition column value {}",
                token
            ))),
        }
    }
}

/// crc32 of the key's big-endian bytes, reinterpreted as i32
pub fn hash_token(key: &Value) -> ExchangeResult<i32> {
    let bytes: Vec<u8> = match key {
        Value::Null => return Err(null_key()),
        Value::Bool(v) => vec![u8::from(*v)],
        Value::Int2(v) => v.to_be_bytes().to_vec(),
        Value::Int4(v) => v.to_be_bytes().to_vec(),
        Value::Int8(v) => v.to_be_bytes().to_vec(),
        Value::Text(v) => v.as_bytes().to_vec(),
        Value::Bytea(v) => v.clone(),
        other => return Err(unsupported_key(other)),
    };
    Ok(crc32fast::hash(&bytes) as i32)
}

fn range_token(key: &Value) -> ExchangeResult<i64> {
    match key {
        Value::Null => Err(null_key()),
        Value::Int2(v) => Ok(i64::from(*v)),
        Value::Int4(v) => Ok(i64::from(*v)),
        Value::Int8(v) => Ok(*v),
        other => Err(unsupported_key(other)),
    }
}

fn null_key() -> ExchangeError {
    ExchangeError::encode_failed("the partition column value cannot be NULL")
}

fn unsupported_key(value: &Value) -> ExchangeError {
    ExchangeError::encode_failed(format!(
        "cannot partition on a {} value",
        value.kind()
    ))
}

/// Result id prefix for every fragment one source shard produces
pub fn source_shard_prefix(result_prefix: &str, shard_id: u64) -> String {
    format!("{}_from_{}_to", result_prefix, shard_id)
}

/// Id of the fragment holding partition `partition_index`
pub fn fragment_result_id(source_prefix: &str, partition_index: usize) -> String {
    format!("{}_{}", source_prefix, partition_index)
}

/// A local result holding one source shard's rows for one target shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFragment {
    pub source_node: NodeId,
    pub partition_index: usize,
    pub target_shard_id: u64,
    pub result_id: ResultId,
    pub row_count: u64,
}

/// Rows of one source shard plus where to send them
#[derive(Debug)]
pub struct PartitionTask<'s> {
    pub result_prefix: &'s str,
    pub source_shard_id: u64,
    pub source_node: NodeId,
    pub schema: &'s [ColumnType],
    pub key_column: usize,
    pub scheme: &'s PartitionScheme,
}

/// Write every row into the local result of its partition.
///
/// Only partitions that receive rows produce a fragment; fragments come back
/// ordered by partition index.
pub async fn partition_rows<I>(
    context: &TransactionContext,
    task: &PartitionTask<'_>,
    rows: I,
) -> ExchangeResult<Vec<ResultFragment>>
where
    I: IntoIterator<Item = Row>,
{
    if task.key_column >= task.schema.len() {
        return Err(ExchangeError::invalid_state(format!(
            "partition column {} is outside a {}-column schema",
            task.key_column,
            task.schema.len()
        )));
    }

    let prefix = source_shard_prefix(task.result_prefix, task.source_shard_id);
    let provider = LocalOnly;
    let mut partitions: BTreeMap<usize, Broadcaster<'_, LocalOnly>> = BTreeMap::new();

    for row in rows {
        let key = row.get(task.key_column).ok_or_else(|| {
            ExchangeError::encode_failed(format!(
                "row has {} values but the schema has {} columns",
                row.len(),
                task.schema.len()
            ))
        })?;
        let index = task.scheme.partition_index(key)?;

        if !partitions.contains_key(&index) {
            let broadcaster = Broadcaster::new(
                &fragment_result_id(&prefix, index),
                task.schema,
                DestinationSet::local_only(),
                context,
                &provider,
            )?;
            partitions.insert(index, broadcaster);
        }
        if let Some(broadcaster) = partitions.get_mut(&index) {
            broadcaster.push(&row).await?;
        }
    }

    let mut fragments = Vec::with_capacity(partitions.len());
    for (index, mut broadcaster) in partitions {
        let outcome = broadcaster.close().await?;
        fragments.push(ResultFragment {
            source_node: task.source_node,
            partition_index: index,
            target_shard_id: task.scheme.intervals()[index].shard_id,
            result_id: broadcaster.result_id().clone(),
            row_count: outcome.progress.rows_sent,
        });
    }

    Ok(fragments)
}
