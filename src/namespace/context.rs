//! Per-backend transaction state

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::cancel::CancellationToken;
use crate::config::ExchangeConfig;
use crate::encoding::TextOptions;
use crate::errors::{ExchangeError, ExchangeResult};
use crate::observability::ExchangeMetrics;
use crate::result_file::ResultId;

use super::directory::{NamespaceRegistry, ResultNamespace, TeardownSummary};
use super::scope::{BackendId, DistributedTransactionId, TransactionScope, UserId};

/// State one backend carries through a transaction.
///
/// Owns the namespace registry: every directory this backend creates is
/// recorded here and removed by `end_transaction()`, or on drop if the
/// transaction never ended cleanly.
#[derive(Debug)]
pub struct TransactionContext {
    namespace: ResultNamespace,
    user: UserId,
    backend: BackendId,
    transaction: Option<DistributedTransactionId>,
    registry: Mutex<NamespaceRegistry>,
    cancellation: CancellationToken,
    metrics: Arc<ExchangeMetrics>,
    text_options: TextOptions,
    binary_transfer: bool,
}

impl TransactionContext {
    pub fn new(namespace: ResultNamespace, user: UserId, backend: BackendId) -> Self {
        Self {
            namespace,
            user,
            backend,
            transaction: None,
            registry: Mutex::new(NamespaceRegistry::new()),
            cancellation: CancellationToken::never(),
            metrics: Arc::new(ExchangeMetrics::new()),
            text_options: TextOptions::default(),
            binary_transfer: true,
        }
    }

    /// Context rooted at the configured namespace with configured encodings
    pub fn from_config(config: &ExchangeConfig, user: UserId, backend: BackendId) -> Self {
        Self::new(ResultNamespace::new(config.namespace_root()), user, backend)
            .with_text_options(config.text_options())
            .with_binary_transfer(config.binary_transfer)
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ExchangeMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_text_options(mut self, text_options: TextOptions) -> Self {
        self.text_options = text_options;
        self
    }

    pub fn with_binary_transfer(mut self, enabled: bool) -> Self {
        self.binary_transfer = enabled;
        self
    }

    /// Join a distributed transaction.
    ///
    /// Re-assigning the same id is a no-op. A different id, or switching
    /// after this backend already created a local-scope namespace, would
    /// change the scope mid-transaction and is rejected.
    pub fn assign_distributed_transaction(
        &mut self,
        transaction: DistributedTransactionId,
    ) -> ExchangeResult<()> {
        if !transaction.is_assigned() {
            return Err(ExchangeError::invalid_state(
                "distributed transaction number must be greater than zero",
            ));
        }

        match &self.transaction {
            Some(current) if *current == transaction => return Ok(()),
            Some(current) => {
                return Err(ExchangeError::invalid_state(format!(
                    "backend is already part of distributed transaction {}:{}",
                    current.initiator_node, current.transaction_number
                )));
            }
            None => {}
        }

        if !self.lock_registry().is_empty() {
            return Err(ExchangeError::invalid_state(
                "cannot join a distributed transaction after creating local intermediate results",
            ));
        }

        self.transaction = Some(transaction);
        Ok(())
    }

    pub fn distributed_transaction(&self) -> Option<&DistributedTransactionId> {
        self.transaction.as_ref()
    }

    /// Distributed transaction id or an invalid-state error naming the operation
    pub fn require_distributed_transaction(
        &self,
        operation: &str,
    ) -> ExchangeResult<&DistributedTransactionId> {
        self.transaction.as_ref().ok_or_else(|| {
            ExchangeError::invalid_state(format!(
                "{} requires a distributed transaction",
                operation
            ))
        })
    }

    pub fn scope(&self) -> TransactionScope {
        TransactionScope::for_backend(self.user, self.backend, self.transaction.as_ref())
    }

    pub fn namespace(&self) -> &ResultNamespace {
        &self.namespace
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn backend(&self) -> BackendId {
        self.backend
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn metrics(&self) -> &Arc<ExchangeMetrics> {
        &self.metrics
    }

    pub fn text_options(&self) -> &TextOptions {
        &self.text_options
    }

    pub fn binary_transfer(&self) -> bool {
        self.binary_transfer
    }

    /// Create the scope directory if needed and return it
    pub fn ensure_namespace(&self) -> ExchangeResult<PathBuf> {
        let scope = self.scope();
        let mut registry = self.lock_registry();
        let ensured = self.namespace.ensure_created(&scope, &mut registry)?;
        if ensured.created {
            self.metrics.increment_namespaces_created();
        }
        Ok(ensured.path)
    }

    /// Path of a result file in the current scope. No I/O.
    pub fn result_path(&self, result_id: &ResultId) -> PathBuf {
        self.namespace
            .resolve(&self.scope())
            .join(result_id.file_name())
    }

    /// Number of directories awaiting teardown
    pub fn registered_namespaces(&self) -> usize {
        self.lock_registry().len()
    }

    /// End the transaction: tear down every namespace this backend created and
    /// leave the distributed transaction.
    pub fn end_transaction(&mut self) -> TeardownSummary {
        let summary = self.teardown();
        self.transaction = None;
        summary
    }

    fn teardown(&self) -> TeardownSummary {
        let mut registry = self.lock_registry();
        let summary = self.namespace.teardown_all(&mut registry, self.backend);
        self.metrics.add_namespaces_removed(summary.removed as u64);
        self.metrics.add_teardown_failures(summary.failed as u64);
        summary
    }

    fn lock_registry(&self) -> MutexGuard<'_, NamespaceRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        if self.registered_namespaces() > 0 {
            self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::scope::NodeId;
    use chrono::Utc;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> TransactionContext {
        TransactionContext::new(
            ResultNamespace::new(dir.path().join("result_cache")),
            UserId(10),
            BackendId(5),
        )
    }

    #[test]
    fn test_scope_switches_on_assignment() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        assert_eq!(ctx.scope().directory_name(), "10_5");

        ctx.assign_distributed_transaction(DistributedTransactionId::new(NodeId(2), 8, Utc::now()))
            .unwrap();
        assert_eq!(ctx.scope().directory_name(), "10_2_8");
    }

    #[test]
    fn test_reassigning_different_transaction_fails() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        let txn = DistributedTransactionId::new(NodeId(2), 8, Utc::now());

        ctx.assign_distributed_transaction(txn.clone()).unwrap();
        ctx.assign_distributed_transaction(txn).unwrap();

        let other = DistributedTransactionId::new(NodeId(2), 9, Utc::now());
        let err = ctx.assign_distributed_transaction(other).unwrap_err();
        assert_eq!(err.code().code(), "AERO_INVALID_STATE");
    }

    #[test]
    fn test_assignment_after_local_namespace_fails() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        ctx.ensure_namespace().unwrap();

        let txn = DistributedTransactionId::new(NodeId(2), 8, Utc::now());
        assert!(ctx.assign_distributed_transaction(txn).is_err());
    }

    #[test]
    fn test_end_transaction_tears_down() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        let path = ctx.ensure_namespace().unwrap();
        assert!(path.is_dir());

        let summary = ctx.end_transaction();
        assert_eq!(summary.removed, 1);
        assert!(!path.exists());
        assert_eq!(ctx.registered_namespaces(), 0);
        assert_eq!(ctx.metrics().snapshot().namespaces_removed, 1);
        assert!(ctx.distributed_transaction().is_none());
    }

    #[test]
    fn test_drop_tears_down() {
        let dir = TempDir::new().unwrap();
        let path = {
            let ctx = context(&dir);
            ctx.ensure_namespace().unwrap()
        };
        assert!(!path.exists());
    }
}
