//! Identity of the transaction that owns a namespace

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authenticated user owning the results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u32);

/// Cluster node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Local backend (one control flow serving one session)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackendId(pub u32);

impl BackendId {
    /// Backend id of the current process
    pub fn current() -> Self {
        BackendId(std::process::id())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a distributed transaction, assigned by its initiator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedTransactionId {
    pub initiator_node: NodeId,
    pub transaction_number: u64,
    pub timestamp: DateTime<Utc>,
}

impl DistributedTransactionId {
    pub fn new(initiator_node: NodeId, transaction_number: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            initiator_node,
            transaction_number,
            timestamp,
        }
    }

    /// Number zero is reserved for "no distributed transaction"
    pub fn is_assigned(&self) -> bool {
        self.transaction_number > 0
    }
}

/// Key that scopes a namespace directory
///
/// Distributed transactions share one directory per user across every backend
/// that participates in them; otherwise the directory is private to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionScope {
    Distributed {
        user: UserId,
        node: NodeId,
        transaction_number: u64,
    },
    Local {
        user: UserId,
        backend: BackendId,
    },
}

impl TransactionScope {
    /// Scope for a backend, distributed when an assigned transaction id is present
    pub fn for_backend(
        user: UserId,
        backend: BackendId,
        transaction: Option<&DistributedTransactionId>,
    ) -> Self {
        match transaction {
            Some(id) if id.is_assigned() => TransactionScope::Distributed {
                user,
                node: id.initiator_node,
                transaction_number: id.transaction_number,
            },
            _ => TransactionScope::Local { user, backend },
        }
    }

    pub fn user(&self) -> UserId {
        match self {
            TransactionScope::Distributed { user, .. } | TransactionScope::Local { user, .. } => {
                *user
            }
        }
    }

    pub fn is_distributed(&self) -> bool {
        matches!(self, TransactionScope::Distributed { .. })
    }

    /// Directory name under the namespace root
    pub fn directory_name(&self) -> String {
        match self {
            TransactionScope::Distributed {
                user,
                node,
                transaction_number,
            } => format!("{}_{}_{}", user, node, transaction_number),
            TransactionScope::Local { user, backend } => format!("{}_{}", user, backend),
        }
    }
}
