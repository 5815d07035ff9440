//! TCP transport to a node's result service

use std::time::Duration;

use tokio::net::TcpStream;
use uuid::Uuid;

use crate::config::ExchangeConfig;
use crate::errors::{ExchangeError, ExchangeResult};
use crate::namespace::UserId;

use super::wire::{Message, MessageStream, WireError};
use super::{
    Command, CommandResult, ConnectionProvider, CopyReceive, NodeAddress, RemoteConnection,
    RemoteTransactionState,
};

/// Opens `TcpConnection`s on behalf of one user
#[derive(Debug, Clone)]
pub struct TcpConnector {
    user: UserId,
    connect_timeout: Duration,
    max_message_size: usize,
}

impl TcpConnector {
    pub fn new(user: UserId, connect_timeout: Duration, max_message_size: usize) -> Self {
        Self {
            user,
            connect_timeout,
            max_message_size,
        }
    }

    pub fn from_config(config: &ExchangeConfig, user: UserId) -> Self {
        Self::new(user, config.connect_timeout(), config.max_message_size)
    }
}

impl ConnectionProvider for TcpConnector {
    type Connection = TcpConnection;

    async fn connect(&self, address: &NodeAddress) -> ExchangeResult<TcpConnection> {
        let target = (address.host(), address.port());
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ExchangeError::connection_io(address, "could not connect", e));
            }
            Err(_) => {
                return Err(ExchangeError::connection_failed(
                    address,
                    format!("connection timed out after {} ms", self.connect_timeout.as_millis()),
                ));
            }
        };
        let _ = stream.set_nodelay(true);

        let mut connection = TcpConnection {
            id: Uuid::new_v4(),
            address: address.clone(),
            stream: MessageStream::new(stream, self.max_message_size),
            claimed: false,
            critical: false,
            failed: false,
            transaction_state: RemoteTransactionState::Idle,
            pending_result: None,
        };
        connection.startup(self.user).await?;
        Ok(connection)
    }
}

/// Connection to one peer's result service
#[derive(Debug)]
pub struct TcpConnection {
    id: Uuid,
    address: NodeAddress,
    stream: MessageStream,
    claimed: bool,
    critical: bool,
    failed: bool,
    transaction_state: RemoteTransactionState,
    /// Command result that arrived while draining copy data
    pending_result: Option<CommandResult>,
}

impl TcpConnection {
    /// Unique id for log correlation
    pub fn id(&self) -> Uuid {
        self.id
    }

    async fn startup(&mut self, user: UserId) -> ExchangeResult<()> {
        self.write(&Message::Startup { user_id: user.0 }).await?;
        match self.read().await? {
            Message::CommandComplete(_) => Ok(()),
            Message::ErrorResponse(message) => {
                Err(ExchangeError::connection_failed(&self.address, message))
            }
            other => Err(self.unexpected(&other)),
        }
    }

    async fn write(&mut self, message: &Message) -> ExchangeResult<()> {
        let result = self.stream.write_message(message).await;
        result.map_err(|e| self.transport_error(e))
    }

    async fn read(&mut self) -> ExchangeResult<Message> {
        let result = self.stream.read_message().await;
        result.map_err(|e| self.transport_error(e))
    }

    fn transport_error(&mut self, err: WireError) -> ExchangeError {
        self.failed = true;
        match err {
            WireError::Io(e) => ExchangeError::connection_io(&self.address, "connection lost", e),
            WireError::Closed => {
                ExchangeError::connection_failed(&self.address, "connection closed by peer")
            }
            other => ExchangeError::protocol_violation(other.to_string())
                .with_details(format!("node: {}", self.address)),
        }
    }

    fn unexpected(&mut self, message: &Message) -> ExchangeError {
        self.failed = true;
        ExchangeError::protocol_violation(format!(
            "unexpected message '{}' from peer",
            message.tag() as char
        ))
        .with_details(format!("node: {}", self.address))
    }
}

impl RemoteConnection for TcpConnection {
    fn address(&self) -> &NodeAddress {
        &self.address
    }

    fn claim_exclusively(&mut self) -> ExchangeResult<()> {
        if self.claimed {
            return Err(ExchangeError::connection_claimed(&self.address));
        }
        self.claimed = true;
        Ok(())
    }

    fn release(&mut self) {
        self.claimed = false;
    }

    fn mark_critical(&mut self) {
        self.critical = true;
    }

    fn is_critical(&self) -> bool {
        self.critical
    }

    fn has_failed(&self) -> bool {
        self.failed
    }

    fn transaction_state(&self) -> RemoteTransactionState {
        self.transaction_state
    }

    fn set_transaction_state(&mut self, state: RemoteTransactionState) {
        self.transaction_state = state;
    }

    async fn send_command(&mut self, command: &Command) -> ExchangeResult<()> {
        self.write(&Message::Query(command.render())).await
    }

    async fn get_command_result(&mut self) -> ExchangeResult<CommandResult> {
        if let Some(result) = self.pending_result.take() {
            return Ok(result);
        }

        match self.read().await? {
            Message::CommandComplete(tag) => Ok(CommandResult::CommandOk { tag }),
            Message::CopyInResponse { format } => Ok(CommandResult::CopyIn { format }),
            Message::CopyOutResponse { format } => Ok(CommandResult::CopyOut { format }),
            Message::ErrorResponse(message) => Ok(CommandResult::Error { message }),
            other => Err(self.unexpected(&other)),
        }
    }

    async fn put_copy_data(&mut self, bytes: &[u8]) -> ExchangeResult<()> {
        self.write(&Message::CopyData(bytes.to_vec())).await
    }

    async fn put_copy_end(&mut self, failure: Option<&str>) -> ExchangeResult<()> {
        let message = match failure {
            Some(reason) => Message::CopyFail(reason.to_string()),
            None => Message::CopyDone,
        };
        self.write(&message).await
    }

    fn try_get_copy_data(&mut self) -> CopyReceive {
        match self.stream.try_read_message() {
            Ok(None) => CopyReceive::WouldBlock,
            Ok(Some(Message::CopyData(bytes))) => CopyReceive::Data(bytes),
            Ok(Some(Message::CopyDone)) => CopyReceive::Done,
            // Peer ended the copy with a result instead of copy-done
            Ok(Some(Message::ErrorResponse(message))) => {
                self.pending_result = Some(CommandResult::Error { message });
                CopyReceive::Done
            }
            Ok(Some(Message::CommandComplete(tag))) => {
                self.pending_result = Some(CommandResult::CommandOk { tag });
                CopyReceive::Done
            }
            Ok(Some(other)) => CopyReceive::Failed(self.unexpected(&other)),
            Err(e) => CopyReceive::Failed(self.transport_error(e)),
        }
    }

    async fn wait_readable(&mut self) -> ExchangeResult<()> {
        let result = self.stream.readable().await;
        result.map_err(|e| self.transport_error(e))
    }

    async fn close(mut self) {
        let _ = self.stream.write_message(&Message::Terminate).await;
        let _ = self.stream.shutdown().await;
    }
}
