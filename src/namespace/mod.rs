//! Transaction-scoped namespaces for intermediate results
//!
//! Layout: `<root>/<user>_<node>_<txn>` inside a distributed transaction,
//! `<root>/<user>_<backend>` otherwise. A directory is removed at the end of
//! the transaction by the backend that created it.

mod context;
mod directory;
mod scope;

pub use context::TransactionContext;
pub use directory::{EnsuredNamespace, NamespaceRegistry, ResultNamespace, TeardownSummary};
pub use scope::{BackendId, DistributedTransactionId, NodeId, TransactionScope, UserId};
