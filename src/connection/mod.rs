//! Connections to remote nodes
//!
//! `RemoteConnection` is the seam the broadcaster and fetcher drive;
//! `ConnectionProvider` opens new ones. `tcp` provides the implementation
//! that talks to the result service over the framing in `wire`.

mod command;
mod tcp;
pub mod wire;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::encoding::CopyFormat;
use crate::errors::{ExchangeError, ExchangeResult};
use crate::namespace::DistributedTransactionId;

pub use command::Command;
pub use tcp::{TcpConnection, TcpConnector};

/// Host and port of a node's result service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    host: String,
    port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<std::net::SocketAddr> for NodeAddress {
    fn from(addr: std::net::SocketAddr) -> Self {
        NodeAddress::new(addr.ip().to_string(), addr.port())
    }
}

/// Outcome of a command as reported by the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    CommandOk { tag: String },
    CopyIn { format: CopyFormat },
    CopyOut { format: CopyFormat },
    Error { message: String },
}

/// Non-blocking receive during a copy-out
#[derive(Debug)]
pub enum CopyReceive {
    /// A chunk of copy data
    Data(Vec<u8>),
    /// Nothing buffered; wait for readiness
    WouldBlock,
    /// Transfer finished; fetch the command result next
    Done,
    /// Transport failure; the connection is unusable
    Failed(ExchangeError),
}

/// Remote transaction block state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteTransactionState {
    Idle,
    InTransaction,
}

/// A connection to one remote node.
///
/// Only one operation may drive a connection at a time: callers claim it
/// exclusively first and release it when done.
#[allow(async_fn_in_trait)]
pub trait RemoteConnection {
    fn address(&self) -> &NodeAddress;

    /// Claim for one operation; fails if already claimed
    fn claim_exclusively(&mut self) -> ExchangeResult<()>;

    fn release(&mut self);

    /// Failure on this connection must abort the distributed transaction
    fn mark_critical(&mut self);

    fn is_critical(&self) -> bool;

    /// A transport or protocol failure left this connection unusable
    fn has_failed(&self) -> bool {
        false
    }

    fn transaction_state(&self) -> RemoteTransactionState;

    fn set_transaction_state(&mut self, state: RemoteTransactionState);

    async fn send_command(&mut self, command: &Command) -> ExchangeResult<()>;

    async fn get_command_result(&mut self) -> ExchangeResult<CommandResult>;

    async fn put_copy_data(&mut self, bytes: &[u8]) -> ExchangeResult<()>;

    /// End a copy-in; `Some(reason)` aborts it
    async fn put_copy_end(&mut self, failure: Option<&str>) -> ExchangeResult<()>;

    /// Receive without waiting
    fn try_get_copy_data(&mut self) -> CopyReceive;

    /// Suspend until the socket is readable
    async fn wait_readable(&mut self) -> ExchangeResult<()>;

    async fn close(self);

    /// Send a command and require a success result
    async fn execute_command(&mut self, command: &Command) -> ExchangeResult<String> {
        self.send_command(command).await?;
        match self.get_command_result().await? {
            CommandResult::CommandOk { tag } => Ok(tag),
            CommandResult::Error { message } => Err(ExchangeError::remote_command_failed(
                self.address(),
                message,
            )),
            other => Err(ExchangeError::protocol_violation(format!(
                "unexpected result {:?} for command \"{}\"",
                other, command
            ))),
        }
    }

    /// Open the remote transaction block unless one is already open
    async fn begin_transaction_if_necessary(
        &mut self,
        transaction: &DistributedTransactionId,
    ) -> ExchangeResult<()> {
        if self.transaction_state() == RemoteTransactionState::InTransaction {
            return Ok(());
        }
        self.execute_command(&Command::BeginDistributed(transaction.clone()))
            .await?;
        self.set_transaction_state(RemoteTransactionState::InTransaction);
        Ok(())
    }

    /// Commit the remote transaction block if one is open.
    ///
    /// A critical connection that has failed refuses to commit: the work it
    /// carried is lost and the distributed transaction has to abort.
    async fn commit_transaction(&mut self) -> ExchangeResult<()> {
        if self.is_critical() && self.has_failed() {
            return Err(ExchangeError::connection_failed(
                self.address(),
                "critical connection failed, the distributed transaction must abort",
            ));
        }
        if self.transaction_state() == RemoteTransactionState::Idle {
            return Ok(());
        }
        let result = self.execute_command(&Command::Commit).await;
        self.set_transaction_state(RemoteTransactionState::Idle);
        result.map(|_| ())
    }
}

/// Opens connections to remote nodes
#[allow(async_fn_in_trait)]
pub trait ConnectionProvider {
    type Connection: RemoteConnection;

    async fn connect(&self, address: &NodeAddress) -> ExchangeResult<Self::Connection>;
}

/// Uninhabited connection type for providers that never connect
#[derive(Debug)]
pub enum NoConnection {}

impl RemoteConnection for NoConnection {
    fn address(&self) -> &NodeAddress {
        match *self {}
    }

    fn claim_exclusively(&mut self) -> ExchangeResult<()> {
        match *self {}
    }

    fn release(&mut self) {
        match *self {}
    }

    fn mark_critical(&mut self) {
        match *self {}
    }

    fn is_critical(&self) -> bool {
        match *self {}
    }

    fn transaction_state(&self) -> RemoteTransactionState {
        match *self {}
    }

    fn set_transaction_state(&mut self, _state: RemoteTransactionState) {
        match *self {}
    }

    async fn send_command(&mut self, _command: &Command) -> ExchangeResult<()> {
        match *self {}
    }

    async fn get_command_result(&mut self) -> ExchangeResult<CommandResult> {
        match *self {}
    }

    async fn put_copy_data(&mut self, _bytes: &[u8]) -> ExchangeResult<()> {
        match *self {}
    }

    async fn put_copy_end(&mut self, _failure: Option<&str>) -> ExchangeResult<()> {
        match *self {}
    }

    fn try_get_copy_data(&mut self) -> CopyReceive {
        match *self {}
    }

    async fn wait_readable(&mut self) -> ExchangeResult<()> {
        match *self {}
    }

    async fn close(self) {
        match self {}
    }
}

/// Provider for local-only broadcasts; every connect attempt fails
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOnly;

impl ConnectionProvider for LocalOnly {
    type Connection = NoConnection;

    async fn connect(&self, address: &NodeAddress) -> ExchangeResult<NoConnection> {
        Err(ExchangeError::invalid_state(format!(
            "no connection provider available to reach node {}",
            address
        )))
    }
}
