//! Repartition Tests
//!
//! Source shard rows are split into fragments on node 1, fragments whose
//! target shard lives on node 2 are pulled there by node 2 itself, and each
//! shard then reads its colocated fragments.

use std::collections::{BTreeMap, HashMap};

use aerodb_exchange::cancel::{cancellation, CancelHandle};
use aerodb_exchange::config::ExchangeConfig;
use aerodb_exchange::connection::{NodeAddress, RemoteConnection, TcpConnector};
use aerodb_exchange::encoding::{ColumnType, CopyFormat, Row, Value};
use aerodb_exchange::namespace::{
    BackendId, DistributedTransactionId, NodeId, TransactionContext, UserId,
};
use aerodb_exchange::reader::ResultReader;
use aerodb_exchange::redistribute::{
    colocation_transfers, execute_transfers, partition_rows, shard_result_ids, PartitionMethod,
    PartitionScheme, PartitionTask, ShardInterval,
};
use aerodb_exchange::server::ResultServer;
use chrono::Utc;
use tempfile::TempDir;

const USER: UserId = UserId(10);

struct Node {
    _dir: TempDir,
    config: ExchangeConfig,
    address: NodeAddress,
    _shutdown: CancelHandle,
}

async fn start_node() -> Node {
    let dir = TempDir::new().unwrap();
    let mut config = ExchangeConfig::with_data_dir(dir.path().to_string_lossy());
    config.listen_address = "127.0.0.1:0".to_string();

    let server = ResultServer::bind(config.clone()).await.unwrap();
    let address = server.local_addr().unwrap();
    let (handle, token) = cancellation();
    tokio::spawn(server.serve(token));

    Node {
        _dir: dir,
        config,
        address,
        _shutdown: handle,
    }
}

/// A backend on `node` taking part in `transaction`
fn backend_on(node: &Node, transaction: &DistributedTransactionId, backend: u32) -> TransactionContext {
    let mut context = TransactionContext::from_config(&node.config, USER, BackendId(backend));
    context
        .assign_distributed_transaction(transaction.clone())
        .unwrap();
    context
}

fn scheme() -> PartitionScheme {
    PartitionScheme::new(
        PartitionMethod::Range,
        vec![
            ShardInterval {
                shard_id: 100,
                min: 0,
                max: 9,
            },
            ShardInterval {
                shard_id: 101,
                min: 10,
                max: 19,
            },
        ],
    )
    .unwrap()
}

fn keyed(key: i32) -> Row {
    vec![Value::Int4(key), Value::Text(format!("v{}", key))]
}

#[tokio::test]
async fn test_repartition_across_two_nodes() {
    let node1 = start_node().await;
    let node2 = start_node().await;
    let txn = DistributedTransactionId::new(NodeId(1), 900, Utc::now());
    let schema = [ColumnType::Int4, ColumnType::Text];
    let scheme = scheme();

    // Source shard 55 lives on node 1
    let source = backend_on(&node1, &txn, 500);
    let task = PartitionTask {
        result_prefix: "repartition_900",
        source_shard_id: 55,
        source_node: NodeId(1),
        schema: &schema,
        key_column: 0,
        scheme: &scheme,
    };
    let rows = vec![keyed(12), keyed(3), keyed(17), keyed(8), keyed(10)];
    let fragments = partition_rows(&source, &task, rows).await.unwrap();
    assert_eq!(fragments.len(), 2);
    assert_eq!(fragments[0].row_count, 2);
    assert_eq!(fragments[1].row_count, 3);

    // Shard 100 is on node 1, shard 101 on node 2
    let placements = HashMap::from([(100, vec![NodeId(1)]), (101, vec![NodeId(2)])]);
    let transfers = colocation_transfers(&fragments, &placements).unwrap();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].nodes.source, NodeId(1));
    assert_eq!(transfers[0].nodes.target, NodeId(2));

    let coordinator_dir = TempDir::new().unwrap();
    let coordinator_config = ExchangeConfig::with_data_dir(coordinator_dir.path().to_string_lossy());
    let mut coordinator = TransactionContext::from_config(&coordinator_config, USER, BackendId(1));
    coordinator
        .assign_distributed_transaction(txn.clone())
        .unwrap();
    let connector = TcpConnector::from_config(&coordinator_config, USER);
    let nodes = BTreeMap::from([
        (NodeId(1), node1.address.clone()),
        (NodeId(2), node2.address.clone()),
    ]);

    let outcome = execute_transfers(&connector, &coordinator, &transfers, &nodes)
        .await
        .unwrap();
    assert!(outcome.bytes > 0);
    assert_eq!(outcome.connections.len(), 1);

    // Each shard reads its colocated fragments on its own node
    let per_shard = shard_result_ids(&fragments, scheme.shard_count()).unwrap();
    let format = CopyFormat::Binary;

    let shard_100 = ResultReader::new(&source)
        .read_results(per_shard[0].as_slice(), &schema, format)
        .unwrap();
    assert_eq!(shard_100.rows, vec![keyed(3), keyed(8)]);

    let reader_on_node2 = backend_on(&node2, &txn, 501);
    let shard_101 = ResultReader::new(&reader_on_node2)
        .read_results(per_shard[1].as_slice(), &schema, format)
        .unwrap();
    assert_eq!(shard_101.rows, vec![keyed(12), keyed(17), keyed(10)]);
    assert!(shard_101.warnings.is_empty());

    // Ending the transaction on node 2 removes the pulled fragments
    for mut connection in outcome.connections {
        connection.commit_transaction().await.unwrap();
        connection.close().await;
    }
    let after = ResultReader::new(&reader_on_node2)
        .read_results(per_shard[1].as_slice(), &schema, format)
        .unwrap();
    assert!(after.rows.is_empty());
    assert_eq!(after.warnings.len(), 1);
}

#[tokio::test]
async fn test_execute_transfers_unknown_node_fails() {
    let node1 = start_node().await;
    let txn = DistributedTransactionId::new(NodeId(1), 901, Utc::now());
    let schema = [ColumnType::Int4, ColumnType::Text];
    let scheme = scheme();

    let source = backend_on(&node1, &txn, 600);
    let task = PartitionTask {
        result_prefix: "repartition_901",
        source_shard_id: 1,
        source_node: NodeId(1),
        schema: &schema,
        key_column: 0,
        scheme: &scheme,
    };
    let fragments = partition_rows(&source, &task, vec![keyed(15)]).await.unwrap();
    let placements = HashMap::from([(101, vec![NodeId(3)])]);
    let transfers = colocation_transfers(&fragments, &placements).unwrap();

    let nodes = BTreeMap::from([(NodeId(1), node1.address.clone())]);
    let connector = TcpConnector::from_config(&node1.config, USER);
    let err = execute_transfers(&connector, &source, &transfers, &nodes)
        .await
        .unwrap_err();
    assert_eq!(err.code().code(), "AERO_INVALID_STATE");
}
