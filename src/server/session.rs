//! One client connection to the result service

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::config::ExchangeConfig;
use crate::connection::wire::{Message, MessageStream, WireError};
use crate::connection::{Command, NodeAddress, TcpConnector};
use crate::encoding::CopyFormat;
use crate::fetch::fetch_results;
use crate::namespace::{BackendId, TransactionContext, UserId};
use crate::observability::{log_event, Event, ExchangeMetrics};
use crate::result_file::{LocalResultFile, ResultId};

pub(super) struct Session {
    stream: MessageStream,
    peer: String,
    config: Arc<ExchangeConfig>,
    metrics: Arc<ExchangeMetrics>,
    backend: BackendId,
}

impl Session {
    pub(super) fn new(
        stream: TcpStream,
        peer: SocketAddr,
        config: Arc<ExchangeConfig>,
        metrics: Arc<ExchangeMetrics>,
        backend: BackendId,
    ) -> Self {
        Self {
            stream: MessageStream::new(stream, config.max_message_size),
            peer: peer.to_string(),
            config,
            metrics,
            backend,
        }
    }

    /// Serve the connection until the client leaves, then end its transaction
    pub(super) async fn run(mut self) {
        let backend = self.backend.to_string();
        log_event(
            Event::SessionStart,
            &[("backend", backend.as_str()), ("peer", self.peer.as_str())],
        );

        let outcome = match self.startup().await {
            Ok(Some(mut context)) => {
                let outcome = self.serve(&mut context).await;
                context.end_transaction();
                outcome
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };

        let reason = match outcome {
            Ok(()) | Err(WireError::Closed) => "client disconnected".to_string(),
            Err(e) => e.to_string(),
        };
        log_event(
            Event::SessionEnd,
            &[
                ("backend", backend.as_str()),
                ("peer", self.peer.as_str()),
                ("reason", reason.as_str()),
            ],
        );
    }

    /// First message must name the user; anything else ends the session
    async fn startup(&mut self) -> Result<Option<TransactionContext>, WireError> {
        match self.stream.read_message().await? {
            Message::Startup { user_id } => {
                let context =
                    TransactionContext::from_config(&self.config, UserId(user_id), self.backend)
                        .with_metrics(Arc::clone(&self.metrics));
                self.complete("STARTUP").await?;
                Ok(Some(context))
            }
            other => {
                self.error(format!(
                    "expected startup message, got '{}'",
                    other.tag() as char
                ))
                .await?;
                Ok(None)
            }
        }
    }

    async fn serve(&mut self, context: &mut TransactionContext) -> Result<(), WireError> {
        loop {
            match self.stream.read_message().await? {
                Message::Query(text) => self.execute(context, &text).await?,
                Message::Terminate => return Ok(()),
                other => {
                    self.error(format!(
                        "unexpected message '{}' outside of a command",
                        other.tag() as char
                    ))
                    .await?
                }
            }
        }
    }

    async fn execute(
        &mut self,
        context: &mut TransactionContext,
        text: &str,
    ) -> Result<(), WireError> {
        let command = match Command::parse(text) {
            Ok(command) => command,
            Err(e) => return self.error(e.to_string()).await,
        };

        match command {
            Command::BeginDistributed(transaction) => {
                match context.assign_distributed_transaction(transaction) {
                    Ok(()) => self.complete("BEGIN").await,
                    Err(e) => self.error(e.to_string()).await,
                }
            }
            Command::ReceiveResult(result_id) => self.receive_result(context, &result_id).await,
            Command::SendResult(result_id) => self.send_result(context, &result_id).await,
            Command::FetchResults { result_ids, source } => {
                self.fetch_results(context, &result_ids, &source).await
            }
            Command::Commit => {
                context.end_transaction();
                self.complete("COMMIT").await
            }
            Command::Rollback => {
                context.end_transaction();
                self.complete("ROLLBACK").await
            }
        }
    }

    /// Copy-in: write every chunk into the named result file
    async fn receive_result(
        &mut self,
        context: &TransactionContext,
        result_id: &ResultId,
    ) -> Result<(), WireError> {
        let created = context
            .ensure_namespace()
            .and_then(|directory| LocalResultFile::create_staged(&directory, result_id));
        let mut file = match created {
            Ok(file) => file,
            Err(e) => return self.error(e.to_string()).await,
        };

        // Result files are copied as opaque bytes
        self.stream
            .write_message(&Message::CopyInResponse {
                format: CopyFormat::Binary,
            })
            .await?;

        let mut failure: Option<String> = None;
        loop {
            match self.stream.read_message().await? {
                Message::CopyData(bytes) => {
                    if failure.is_none() {
                        if let Err(e) = file.write_all(&bytes) {
                            failure = Some(e.to_string());
                        }
                    }
                }
                Message::CopyDone => break,
                Message::CopyFail(reason) => {
                    failure = Some(format!("COPY from stdin failed: {}", reason));
                    break;
                }
                other => {
                    let _ = file.close();
                    self.error(format!(
                        "unexpected message '{}' during copy",
                        other.tag() as char
                    ))
                    .await?;
                    return Err(WireError::Malformed("copy-in"));
                }
            }
        }

        // A failed copy stays under its staging name until teardown
        let published = match failure {
            Some(reason) => {
                let _ = file.close();
                Err(reason)
            }
            None => file.publish().map_err(|e| e.to_string()),
        };
        match published {
            Err(reason) => self.error(reason).await,
            Ok(bytes) => {
                let bytes_str = bytes.to_string();
                let id = result_id.to_string();
                log_event(
                    Event::ResultReceived,
                    &[
                        ("bytes", bytes_str.as_str()),
                        ("peer", self.peer.as_str()),
                        ("result_id", id.as_str()),
                    ],
                );
                self.complete(format!("COPY {}", bytes)).await
            }
        }
    }

    /// Copy-out: stream the named result file in fixed-size chunks
    async fn send_result(
        &mut self,
        context: &TransactionContext,
        result_id: &ResultId,
    ) -> Result<(), WireError> {
        let path = context.result_path(result_id);
        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return self
                    .error(format!("result \"{}\" does not exist", result_id))
                    .await;
            }
            Err(e) => {
                return self
                    .error(format!("could not open result \"{}\": {}", result_id, e))
                    .await;
            }
        };

        self.stream
            .write_message(&Message::CopyOutResponse {
                format: CopyFormat::Binary,
            })
            .await?;

        let mut buffer = vec![0u8; self.config.copy_chunk_size];
        let mut bytes = 0u64;
        loop {
            let n = match file.read(&mut buffer).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    return self
                        .error(format!("could not read result \"{}\": {}", result_id, e))
                        .await;
                }
            };
            self.stream
                .write_message(&Message::CopyData(buffer[..n].to_vec()))
                .await?;
            bytes += n as u64;
        }

        self.stream.write_message(&Message::CopyDone).await?;

        let bytes_str = bytes.to_string();
        let id = result_id.to_string();
        log_event(
            Event::ResultSent,
            &[
                ("bytes", bytes_str.as_str()),
                ("peer", self.peer.as_str()),
                ("result_id", id.as_str()),
            ],
        );
        self.complete(format!("COPY {}", bytes)).await
    }

    /// Pull results from `source` into this session's namespace
    async fn fetch_results(
        &mut self,
        context: &TransactionContext,
        result_ids: &[ResultId],
        source: &NodeAddress,
    ) -> Result<(), WireError> {
        let connector = TcpConnector::from_config(&self.config, context.user());

        match fetch_results(&connector, context, result_ids, source).await {
            Ok(report) => match report.failures.first() {
                None => self.complete(format!("FETCH {}", report.total_bytes)).await,
                Some((result_id, err)) => {
                    self.error(format!(
                        "could not fetch result \"{}\" from {}: {}",
                        result_id, source, err
                    ))
                    .await
                }
            },
            Err(e) => self.error(e.to_string()).await,
        }
    }

    async fn complete(&mut self, tag: impl Into<String>) -> Result<(), WireError> {
        self.stream
            .write_message(&Message::CommandComplete(tag.into()))
            .await
    }

    async fn error(&mut self, message: impl Into<String>) -> Result<(), WireError> {
        self.stream
            .write_message(&Message::ErrorResponse(message.into()))
            .await
    }
}
