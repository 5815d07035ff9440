//! Moving fragments to the nodes that hold their target shards

use std::collections::{BTreeMap, HashMap};

use futures_util::future::try_join_all;

use crate::connection::{Command, ConnectionProvider, NodeAddress, RemoteConnection};
use crate::errors::{ExchangeError, ExchangeResult};
use crate::namespace::{NodeId, TransactionContext};
use crate::observability::{log_event, Event};
use crate::result_file::ResultId;

use super::partition::ResultFragment;

/// Nodes holding a placement of each target shard
pub type ShardPlacements = HashMap<u64, Vec<NodeId>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodePair {
    pub source: NodeId,
    pub target: NodeId,
}

/// Fragments one target node pulls from one source node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeToNodeTransfer {
    pub nodes: NodePair,
    pub fragments: Vec<ResultFragment>,
}

impl NodeToNodeTransfer {
    pub fn result_ids(&self) -> Vec<ResultId> {
        self.fragments.iter().map(|f| f.result_id.clone()).collect()
    }

    /// Command the target runs to pull the fragments from `source`
    pub fn fetch_command(&self, source: &NodeAddress) -> Command {
        Command::FetchResults {
            result_ids: self.result_ids(),
            source: source.clone(),
        }
    }
}

/// Group fragments into per-node-pair transfers.
///
/// Every placement of a fragment's target shard gets a copy, so replicated
/// shards produce one transfer per replica node. Fragments already on the
/// target node need no transfer. Output is ordered by `(source, target)`.
pub fn colocation_transfers(
    fragments: &[ResultFragment],
    placements: &ShardPlacements,
) -> ExchangeResult<Vec<NodeToNodeTransfer>> {
    let mut transfers: BTreeMap<NodePair, Vec<ResultFragment>> = BTreeMap::new();

    for fragment in fragments {
        let nodes = placements.get(&fragment.target_shard_id).ok_or_else(|| {
            ExchangeError::invalid_state(format!(
                "no active placement for shard {}",
                fragment.target_shard_id
            ))
        })?;

        for target in nodes {
            if *target == fragment.source_node {
                continue;
            }
            let pair = NodePair {
                source: fragment.source_node,
                target: *target,
            };
            transfers.entry(pair).or_default().push(fragment.clone());
        }
    }

    Ok(transfers
        .into_iter()
        .map(|(nodes, fragments)| NodeToNodeTransfer { nodes, fragments })
        .collect())
}

/// Result ids colocated with each target shard, indexed by partition index
pub fn shard_result_ids(
    fragments: &[ResultFragment],
    shard_count: usize,
) -> ExchangeResult<Vec<Vec<ResultId>>> {
    let mut by_shard = vec![Vec::new(); shard_count];
    for fragment in fragments {
        let slot = by_shard.get_mut(fragment.partition_index).ok_or_else(|| {
            ExchangeError::invalid_state(format!(
                "fragment {} targets partition {} of {}",
                fragment.result_id, fragment.partition_index, shard_count
            ))
        })?;
        slot.push(fragment.result_id.clone());
    }
    Ok(by_shard)
}

/// Returned by `execute_transfers`
#[derive(Debug)]
pub struct TransferOutcome<C> {
    pub bytes: u64,
    /// Target connections, released but still inside their transaction
    /// blocks; fetched fragments live until those blocks end
    pub connections: Vec<C>,
}

/// Run every transfer concurrently; any failure fails the whole step.
pub async fn execute_transfers<P: ConnectionProvider>(
    provider: &P,
    context: &TransactionContext,
    transfers: &[NodeToNodeTransfer],
    nodes: &BTreeMap<NodeId, NodeAddress>,
) -> ExchangeResult<TransferOutcome<P::Connection>> {
    let transaction = context.require_distributed_transaction("repartitioning results")?;

    let lookup = |node: NodeId| {
        nodes.get(&node).ok_or_else(|| {
            ExchangeError::invalid_state(format!("node {} is not in the node directory", node))
        })
    };
    let mut planned = Vec::with_capacity(transfers.len());
    for transfer in transfers {
        let source = lookup(transfer.nodes.source)?;
        let target = lookup(transfer.nodes.target)?;
        planned.push((target, transfer.fetch_command(source)));
    }

    let count = planned.len().to_string();
    log_event(Event::TransfersDispatched, &[("transfers", count.as_str())]);

    let results = try_join_all(planned.into_iter().map(|(target, command)| async move {
        let mut connection = provider.connect(target).await?;
        connection.claim_exclusively()?;
        connection.mark_critical();
        connection.begin_transaction_if_necessary(transaction).await?;
        let tag = connection.execute_command(&command).await?;
        connection.release();
        Ok::<_, ExchangeError>((fetched_bytes(&tag)?, connection))
    }))
    .await?;

    let mut outcome = TransferOutcome {
        bytes: 0,
        connections: Vec::with_capacity(results.len()),
    };
    for (bytes, connection) in results {
        outcome.bytes += bytes;
        outcome.connections.push(connection);
    }
    Ok(outcome)
}

fn fetched_bytes(tag: &str) -> ExchangeResult<u64> {
    tag.strip_prefix("FETCH ")
        .and_then(|bytes| bytes.parse().ok())
        .ok_or_else(|| {
            ExchangeError::protocol_violation(format!("unexpected fetch result tag \"{}\"", tag))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(source: u32, partition: usize, shard: u64) -> ResultFragment {
        ResultFragment {
            source_node: NodeId(source),
            partition_index: partition,
            target_shard_id: shard,
            result_id: ResultId::new(format!("p_from_{}_to_{}", source, partition)).unwrap(),
            row_count: 1,
        }
    }

    fn placements() -> ShardPlacements {
        HashMap::from([
            (100, vec![NodeId(1)]),
            (101, vec![NodeId(2)]),
            (102, vec![NodeId(2), NodeId(3)]),
        ])
    }

    #[test]
    fn test_same_node_transfers_pruned() {
        let fragments = vec![fragment(1, 0, 100), fragment(2, 1, 101)];
        let transfers = colocation_transfers(&fragments, &placements()).unwrap();
        assert!(transfers.is_empty());
    }

    #[test]
    fn test_transfers_grouped_by_node_pair() {
        let fragments = vec![
            fragment(1, 1, 101),
            fragment(1, 2, 102),
            fragment(3, 0, 100),
            fragment(2, 0, 100),
        ];
        let transfers = colocation_transfers(&fragments, &placements()).unwrap();
        let pairs: Vec<(u32, u32)> = transfers
            .iter()
            .map(|t| (t.nodes.source.0, t.nodes.target.0))
            .collect();
        assert_eq!(pairs, vec![(1, 2), (1, 3), (2, 1), (3, 1)]);

        assert_eq!(transfers[0].fragments.len(), 2);
        assert_eq!(transfers[1].fragments.len(), 1);
        assert_eq!(transfers[1].fragments[0].target_shard_id, 102);
    }

    #[test]
    fn test_missing_placement_is_an_error() {
        let fragments = vec![fragment(1, 0, 999)];
        assert!(colocation_transfers(&fragments, &placements()).is_err());
    }

    #[test]
    fn test_fetch_command_names_source() {
        let transfer = NodeToNodeTransfer {
            nodes: NodePair {
                source: NodeId(1),
                target: NodeId(2),
            },
            fragments: vec![fragment(1, 0, 100), fragment(1, 2, 102)],
        };
        let command = transfer.fetch_command(&NodeAddress::new("w1", 6001));
        assert_eq!(
            command.render(),
            "SELECT bytes FROM fetch_intermediate_results(ARRAY['p_from_1_to_0','p_from_1_to_2']::text[], 'w1', 6001) bytes"
        );
    }

    #[test]
    fn test_shard_result_ids_in_fragment_order() {
        let fragments = vec![fragment(1, 1, 101), fragment(2, 1, 101), fragment(3, 0, 100)];
        let ids = shard_result_ids(&fragments, 3).unwrap();
        assert_eq!(ids[0].len(), 1);
        assert_eq!(ids[1][0].as_str(), "p_from_1_to_1");
        assert_eq!(ids[1][1].as_str(), "p_from_2_to_1");
        assert!(ids[2].is_empty());

        assert!(shard_result_ids(&fragments, 1).is_err());
    }

    #[test]
    fn test_fetched_bytes_tag() {
        assert_eq!(fetched_bytes("FETCH 42").unwrap(), 42);
        assert!(fetched_bytes("COPY 42").is_err());
    }
}
