//! Pulling named results from a remote node into the local namespace

use crate::connection::{
    Command, CommandResult, ConnectionProvider, CopyReceive, NodeAddress, RemoteConnection,
};
use crate::errors::{ExchangeError, ExchangeErrorCode, ExchangeResult};
use crate::namespace::TransactionContext;
use crate::observability::{log_event, Event};
use crate::result_file::{file_size, LocalResultFile, ResultId};

/// Outcome of fetching one result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub result_id: ResultId,
    pub bytes: u64,
    /// A local copy already existed and no data crossed the network
    pub skipped_transfer: bool,
}

/// Client side of a result transfer over an existing connection
#[derive(Debug, Clone, Copy)]
pub struct Fetcher<'a> {
    context: &'a TransactionContext,
}

impl<'a> Fetcher<'a> {
    pub fn new(context: &'a TransactionContext) -> Self {
        Self { context }
    }

    /// Fetch one result into this backend's namespace.
    ///
    /// Requires a distributed transaction. If the file is already present its
    /// size is returned without touching the connection.
    pub async fn fetch<C: RemoteConnection>(
        &self,
        connection: &mut C,
        result_id: &str,
    ) -> ExchangeResult<FetchOutcome> {
        let result_id = ResultId::new(result_id)?;
        self.context
            .require_distributed_transaction("fetching intermediate results")?;

        let directory = self.context.ensure_namespace()?;
        let path = directory.join(result_id.file_name());
        let id_str = result_id.to_string();

        if let Some(bytes) = file_size(&path)? {
            self.context.metrics().increment_fetch_fast_paths();
            let bytes_str = bytes.to_string();
            log_event(
                Event::FetchSkipped,
                &[("bytes", bytes_str.as_str()), ("result_id", id_str.as_str())],
            );
            return Ok(FetchOutcome {
                result_id,
                bytes,
                skipped_transfer: true,
            });
        }

        let node = connection.address().to_string();
        log_event(
            Event::FetchStart,
            &[("node", node.as_str()), ("result_id", id_str.as_str())],
        );

        connection
            .send_command(&Command::SendResult(result_id.clone()))
            .await?;
        match connection.get_command_result().await? {
            CommandResult::CopyOut { .. } => {}
            CommandResult::Error { message } => {
                return Err(ExchangeError::remote_command_failed(
                    connection.address(),
                    format!(
                        "cannot fetch intermediate result \"{}\" from node {}: {}",
                        result_id, node, message
                    ),
                ));
            }
            other => {
                return Err(ExchangeError::remote_command_failed(
                    connection.address(),
                    format!(
                        "cannot fetch intermediate result \"{}\" from node {}: unexpected {:?}",
                        result_id, node, other
                    ),
                ));
            }
        }

        // Data lands under the staging name and becomes visible to the fast
        // path only after the peer confirms the copy
        let mut file = LocalResultFile::create_staged(&directory, &result_id)?;
        let drained = self.drain(connection, &mut file).await;
        let closed = file.close();
        let transferred = match drained.and_then(|bytes| closed.map(|_| bytes)) {
            Ok(bytes) => match self.finish(connection, &result_id, bytes).await {
                Ok(bytes) => file.publish().map(|_| bytes),
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        };

        let bytes = match transferred {
            Ok(bytes) => bytes,
            Err(err) => {
                let reason = err.to_string();
                log_event(
                    Event::FetchFailed,
                    &[
                        ("node", node.as_str()),
                        ("reason", reason.as_str()),
                        ("result_id", id_str.as_str()),
                    ],
                );
                return Err(err);
            }
        };

        self.context.metrics().add_bytes_fetched(bytes);
        let bytes_str = bytes.to_string();
        log_event(
            Event::FetchComplete,
            &[
                ("bytes", bytes_str.as_str()),
                ("node", node.as_str()),
                ("result_id", id_str.as_str()),
            ],
        );

        Ok(FetchOutcome {
            result_id,
            bytes,
            skipped_transfer: false,
        })
    }

    /// Copy data into `file` until the peer ends the copy
    async fn drain<C: RemoteConnection>(
        &self,
        connection: &mut C,
        file: &mut LocalResultFile,
    ) -> ExchangeResult<u64> {
        let cancellation = self.context.cancellation();
        let mut bytes = 0u64;

        loop {
            match connection.try_get_copy_data() {
                CopyReceive::Data(chunk) => {
                    file.write_all(&chunk)?;
                    bytes += chunk.len() as u64;
                }
                CopyReceive::WouldBlock => {
                    tokio::select! {
                        biased;
                        _ = cancellation.cancelled() => {
                            return Err(ExchangeError::cancelled(
                                "cancelled while waiting for intermediate result data",
                            ));
                        }
                        ready = connection.wait_readable() => ready?,
                    }
                }
                CopyReceive::Done => return Ok(bytes),
                CopyReceive::Failed(err) => return Err(err),
            }
        }
    }

    /// Read the final command result of a completed copy
    async fn finish<C: RemoteConnection>(
        &self,
        connection: &mut C,
        result_id: &ResultId,
        bytes: u64,
    ) -> ExchangeResult<u64> {
        match connection.get_command_result().await? {
            CommandResult::CommandOk { .. } => Ok(bytes),
            CommandResult::Error { message } => Err(ExchangeError::remote_copy_failed(
                connection.address(),
                format!(
                    "failed to fetch intermediate result \"{}\": {}",
                    result_id, message
                ),
            )),
            other => Err(ExchangeError::protocol_violation(format!(
                "unexpected {:?} after copy of result \"{}\"",
                other, result_id
            ))),
        }
    }
}

/// Outcome of a batch fetch from one node
#[derive(Debug, Default)]
pub struct BatchFetchReport {
    pub total_bytes: u64,
    pub fetched: Vec<FetchOutcome>,
    /// Results the peer failed after a completed copy
    pub failures: Vec<(ResultId, ExchangeError)>,
}

impl BatchFetchReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Fetch several results from one node over a fresh connection.
///
/// The connection runs inside a remote transaction block bound to the
/// current distributed transaction and is committed and closed afterwards.
/// A result the peer fails after a completed copy is recorded and the batch
/// continues on the same connection; any other failure aborts the batch.
pub async fn fetch_results<P, S>(
    provider: &P,
    context: &TransactionContext,
    result_ids: &[S],
    node: &NodeAddress,
) -> ExchangeResult<BatchFetchReport>
where
    P: ConnectionProvider,
    S: AsRef<str>,
{
    if result_ids.is_empty() {
        return Ok(BatchFetchReport::default());
    }

    let transaction = context
        .require_distributed_transaction("fetching intermediate results")?
        .clone();
    let result_ids = result_ids
        .iter()
        .map(|id| ResultId::new(id.as_ref()))
        .collect::<ExchangeResult<Vec<_>>>()?;

    let mut connection = provider.connect(node).await?;
    connection.claim_exclusively()?;
    connection.mark_critical();
    connection.begin_transaction_if_necessary(&transaction).await?;
    context.ensure_namespace()?;

    let fetcher = Fetcher::new(context);
    let mut report = BatchFetchReport::default();

    for result_id in result_ids {
        match fetcher.fetch(&mut connection, result_id.as_str()).await {
            Ok(outcome) => {
                report.total_bytes += outcome.bytes;
                report.fetched.push(outcome);
            }
            Err(err) if err.code() == ExchangeErrorCode::AeroRemoteCopyFailed => {
                report.failures.push((result_id, err));
            }
            Err(err) => return Err(err),
        }
    }

    connection.commit_transaction().await?;
    connection.release();
    connection.close().await;

    Ok(report)
}
