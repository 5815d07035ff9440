//! Repartitioning results across the shards of a target relation
//!
//! Each source shard splits its rows into one local result per target
//! partition (`partition`), named `<prefix>_from_<sourceShardId>_to_<index>`.
//! The fragments are then pulled by every node holding a placement of their
//! target shard (`transfer`), after which each shard reads its colocated
//! result ids with a `ResultReader`.

mod partition;
mod transfer;

pub use partition::{
    fragment_result_id, hash_token, partition_rows, source_shard_prefix, PartitionMethod,
    PartitionScheme, PartitionTask, ResultFragment, ShardInterval,
};
pub use transfer::{
    colocation_transfers, execute_transfers, shard_result_ids, NodePair, NodeToNodeTransfer,
    ShardPlacements, TransferOutcome,
};
