//! Fan-out of an encoded row stream to remote nodes and a local file
//!
//! Lifecycle: `Unstarted -> Streaming -> Closed`. Destinations are prepared on
//! the first row, or at close when there are no rows. Any error moves the
//! broadcaster to `Failed`, after which every call is rejected.

use crate::connection::{
    Command, CommandResult, ConnectionProvider, NodeAddress, RemoteConnection,
};
use crate::encoding::{ColumnType, CopyFormat, Row, RowStreamEncoder, Value};
use crate::errors::{ExchangeError, ExchangeResult};
use crate::namespace::TransactionContext;
use crate::observability::{log_event, Event};
use crate::result_file::{LocalResultFile, ResultId};

/// Where a result goes, fixed at construction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationSet {
    nodes: Vec<NodeAddress>,
    write_local_file: bool,
}

impl DestinationSet {
    pub fn new(nodes: Vec<NodeAddress>, write_local_file: bool) -> Self {
        Self {
            nodes,
            write_local_file,
        }
    }

    /// Only the local result file
    pub fn local_only() -> Self {
        Self::new(Vec::new(), true)
    }

    pub fn nodes(&self) -> &[NodeAddress] {
        &self.nodes
    }

    pub fn writes_local_file(&self) -> bool {
        self.write_local_file
    }
}

/// Rows and row payload bytes delivered to every destination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub rows_sent: u64,
    pub bytes_sent: u64,
}

/// Returned by `Broadcaster::close`
#[derive(Debug)]
pub struct BroadcastOutcome<C> {
    pub progress: TransferProgress,
    /// Remote connections, released but still inside their transaction
    /// blocks; the owner ends those with the distributed transaction
    pub connections: Vec<C>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastState {
    Unstarted,
    Streaming,
    Closed,
    Failed,
}

/// One prepared destination
#[derive(Debug)]
enum Destination<C> {
    Remote(C),
    Local(LocalResultFile),
}

impl<C: RemoteConnection> Destination<C> {
    async fn write(&mut self, bytes: &[u8]) -> ExchangeResult<()> {
        match self {
            Destination::Remote(connection) => connection.put_copy_data(bytes).await,
            Destination::Local(file) => file.write_all(bytes),
        }
    }
}

/// Streams one result to a fixed set of destinations
pub struct Broadcaster<'a, P: ConnectionProvider> {
    result_id: ResultId,
    destinations: DestinationSet,
    context: &'a TransactionContext,
    provider: &'a P,
    encoder: RowStreamEncoder,
    state: BroadcastState,
    progress: TransferProgress,
    /// Remote destinations in node order, then the local file
    active: Vec<Destination<P::Connection>>,
}

impl<'a, P: ConnectionProvider> Broadcaster<'a, P> {
    /// Validates the identifier; performs no I/O
    pub fn new(
        result_id: &str,
        schema: &[ColumnType],
        destinations: DestinationSet,
        context: &'a TransactionContext,
        provider: &'a P,
    ) -> ExchangeResult<Self> {
        let result_id = ResultId::new(result_id)?;
        let encoder = RowStreamEncoder::new(
            schema,
            context.binary_transfer(),
            context.text_options().clone(),
        );

        Ok(Self {
            result_id,
            destinations,
            context,
            provider,
            encoder,
            state: BroadcastState::Unstarted,
            progress: TransferProgress::default(),
            active: Vec::new(),
        })
    }

    pub fn result_id(&self) -> &ResultId {
        &self.result_id
    }

    pub fn format(&self) -> CopyFormat {
        self.encoder.format()
    }

    pub fn state(&self) -> BroadcastState {
        self.state
    }

    pub fn progress(&self) -> TransferProgress {
        self.progress
    }

    /// Open every destination and write the stream prefix
    pub async fn prepare(&mut self) -> ExchangeResult<()> {
        self.expect_state(BroadcastState::Unstarted, "prepare")?;
        let result = self.prepare_destinations().await;
        self.track(result)
    }

    /// Encode one row and write it to every destination
    pub async fn push(&mut self, row: &[Value]) -> ExchangeResult<()> {
        if self.state == BroadcastState::Unstarted {
            self.prepare().await?;
        }
        self.expect_state(BroadcastState::Streaming, "push")?;
        let result = self.push_row(row).await;
        self.track(result)
    }

    /// Finish the stream on every destination
    pub async fn close(&mut self) -> ExchangeResult<BroadcastOutcome<P::Connection>> {
        if self.state == BroadcastState::Unstarted {
            self.prepare().await?;
        }
        self.expect_state(BroadcastState::Streaming, "close")?;
        let result = self.finish().await;
        let connections = self.track(result)?;
        self.state = BroadcastState::Closed;

        let result_id = self.result_id.to_string();
        let rows = self.progress.rows_sent.to_string();
        let bytes = self.progress.bytes_sent.to_string();
        log_event(
            Event::BroadcastComplete,
            &[
                ("bytes", bytes.as_str()),
                ("result_id", result_id.as_str()),
                ("rows", rows.as_str()),
            ],
        );

        Ok(BroadcastOutcome {
            progress: self.progress,
            connections,
        })
    }

    /// Push every row then close
    pub async fn broadcast_rows<I>(mut self, rows: I) -> ExchangeResult<BroadcastOutcome<P::Connection>>
    where
        I: IntoIterator<Item = Row>,
    {
        for row in rows {
            self.push(&row).await?;
        }
        self.close().await
    }

    fn expect_state(&self, expected: BroadcastState, operation: &str) -> ExchangeResult<()> {
        if self.state != expected {
            return Err(ExchangeError::invalid_state(format!(
                "cannot {} result \"{}\" in state {:?}",
                operation, self.result_id, self.state
            )));
        }
        Ok(())
    }

    fn track<T>(&mut self, result: ExchangeResult<T>) -> ExchangeResult<T> {
        if let Err(ref err) = result {
            if self.state != BroadcastState::Failed {
                self.state = BroadcastState::Failed;
                let result_id = self.result_id.to_string();
                let reason = err.to_string();
                log_event(
                    Event::BroadcastFailed,
                    &[("reason", reason.as_str()), ("result_id", result_id.as_str())],
                );
            }
        }
        result
    }

    async fn prepare_destinations(&mut self) -> ExchangeResult<()> {
        let transaction = if self.destinations.nodes.is_empty() {
            None
        } else {
            Some(
                self.context
                    .require_distributed_transaction("broadcasting to remote nodes")?
                    .clone(),
            )
        };

        let local = if self.destinations.write_local_file {
            let directory = self.context.ensure_namespace()?;
            Some(LocalResultFile::create(directory.join(self.result_id.file_name()))?)
        } else {
            None
        };

        let command = Command::ReceiveResult(self.result_id.clone());
        let mut connections = Vec::with_capacity(self.destinations.nodes.len());
        if let Some(transaction) = &transaction {
            for node in &self.destinations.nodes {
                let mut connection = self.provider.connect(node).await?;
                connection.claim_exclusively()?;
                connection.mark_critical();
                connection.begin_transaction_if_necessary(transaction).await?;
                connection.send_command(&command).await?;
                connections.push(connection);
            }
        }

        for connection in &mut connections {
            match connection.get_command_result().await? {
                CommandResult::CopyIn { .. } => {}
                CommandResult::Error { message } => {
                    return Err(ExchangeError::remote_command_failed(
                        connection.address(),
                        format!(
                            "could not start transfer of result \"{}\": {}",
                            self.result_id, message
                        ),
                    ));
                }
                other => {
                    return Err(ExchangeError::remote_command_failed(
                        connection.address(),
                        format!(
                            "could not start transfer of result \"{}\": unexpected {:?}",
                            self.result_id, other
                        ),
                    ));
                }
            }
        }

        self.active = connections.into_iter().map(Destination::Remote).collect();
        if let Some(file) = local {
            self.active.push(Destination::Local(file));
        }

        let prefix = self.encoder.begin();
        if !prefix.is_empty() {
            for destination in self.active.iter_mut() {
                destination.write(prefix).await?;
            }
        }

        self.state = BroadcastState::Streaming;
        let result_id = self.result_id.to_string();
        let remotes = self.destinations.nodes.len().to_string();
        let local = self.destinations.write_local_file.to_string();
        log_event(
            Event::BroadcastStart,
            &[
                ("local", local.as_str()),
                ("remotes", remotes.as_str()),
                ("result_id", result_id.as_str()),
            ],
        );
        Ok(())
    }

    async fn push_row(&mut self, row: &[Value]) -> ExchangeResult<()> {
        if self.context.cancellation().is_cancelled() {
            return Err(ExchangeError::cancelled(format!(
                "broadcast of result \"{}\" cancelled",
                self.result_id
            )));
        }

        let bytes = self.encoder.encode_row(row)?;
        for destination in self.active.iter_mut() {
            destination.write(bytes).await?;
        }

        self.progress.rows_sent += 1;
        self.progress.bytes_sent += bytes.len() as u64;
        self.context.metrics().record_row_broadcast(bytes.len() as u64);
        Ok(())
    }

    async fn finish(&mut self) -> ExchangeResult<Vec<P::Connection>> {
        let suffix = self.encoder.end();
        if !suffix.is_empty() {
            for destination in self.active.iter_mut() {
                destination.write(suffix).await?;
            }
        }

        let mut connections = Vec::new();
        for destination in std::mem::take(&mut self.active) {
            match destination {
                Destination::Remote(mut connection) => {
                    connection.put_copy_end(None).await?;
                    match connection.get_command_result().await? {
                        CommandResult::CommandOk { .. } => {}
                        CommandResult::Error { message } => {
                            return Err(ExchangeError::remote_copy_failed(
                                connection.address(),
                                format!(
                                    "failed to finish transfer of result \"{}\": {}",
                                    self.result_id, message
                                ),
                            ));
                        }
                        other => {
                            return Err(ExchangeError::protocol_violation(format!(
                                "unexpected {:?} after copy of result \"{}\"",
                                other, self.result_id
                            ))
                            .with_details(format!("node: {}", connection.address())));
                        }
                    }
                    connection.release();
                    connections.push(connection);
                }
                Destination::Local(mut file) => {
                    file.close()?;
                }
            }
        }

        Ok(connections)
    }
}
