//! Result service: the peer side of broadcasts and fetches
//!
//! Accepts connections until shut down and runs one session task per
//! connection. Each session owns a `TransactionContext` for the user named in
//! its startup message; namespaces the session creates are removed when the
//! client commits, rolls back or disconnects.

mod session;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::cancel::CancellationToken;
use crate::config::ExchangeConfig;
use crate::connection::NodeAddress;
use crate::errors::{ExchangeError, ExchangeResult};
use crate::namespace::BackendId;
use crate::observability::{log_event, Event, ExchangeMetrics};

use session::Session;

static NEXT_SESSION: AtomicU32 = AtomicU32::new(1);

/// Backend id for a new session, unique within this process
fn next_backend_id() -> BackendId {
    let sequence = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
    BackendId(std::process::id().wrapping_mul(1000).wrapping_add(sequence))
}

/// Listening result service
#[derive(Debug)]
pub struct ResultServer {
    config: Arc<ExchangeConfig>,
    listener: TcpListener,
    metrics: Arc<ExchangeMetrics>,
}

impl ResultServer {
    /// Validate the config and bind `listen_address`
    pub async fn bind(config: ExchangeConfig) -> ExchangeResult<Self> {
        config.validate()?;

        let addr: SocketAddr = config.listen_address.parse().map_err(|e| {
            ExchangeError::config_invalid(format!(
                "invalid listen_address '{}': {}",
                config.listen_address, e
            ))
        })?;
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            ExchangeError::service_start_failed(format!("could not listen on {}", addr), e)
        })?;

        Ok(Self {
            config: Arc::new(config),
            listener,
            metrics: Arc::new(ExchangeMetrics::new()),
        })
    }

    /// Share counters with the caller
    pub fn with_metrics(mut self, metrics: Arc<ExchangeMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<ExchangeMetrics> {
        &self.metrics
    }

    /// Bound address; useful when listening on port 0
    pub fn local_addr(&self) -> ExchangeResult<NodeAddress> {
        self.listener.local_addr().map(NodeAddress::from).map_err(|e| {
            ExchangeError::config_invalid(format!("listener has no local address: {}", e))
        })
    }

    /// Accept connections until `shutdown` fires.
    ///
    /// Sessions already running are left to finish on their own.
    pub async fn serve(self, shutdown: CancellationToken) -> ExchangeResult<()> {
        let address = self.local_addr()?.to_string();
        log_event(Event::ServiceListening, &[("address", address.as_str())]);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let _ = stream.set_nodelay(true);
                            let session = Session::new(
                                stream,
                                peer,
                                Arc::clone(&self.config),
                                Arc::clone(&self.metrics),
                                next_backend_id(),
                            );
                            tokio::spawn(session.run());
                        }
                        Err(e) => {
                            let reason = e.to_string();
                            log_event(
                                Event::AcceptFailed,
                                &[("address", address.as_str()), ("reason", reason.as_str())],
                            );
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    log_event(Event::ServiceShutdown, &[("address", address.as_str())]);
                    break;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancellation;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> ExchangeConfig {
        let mut config = ExchangeConfig::with_data_dir(dir.path().to_string_lossy());
        config.listen_address = "127.0.0.1:0".to_string();
        config
    }

    #[test]
    fn test_backend_ids_are_distinct() {
        assert_ne!(next_backend_id(), next_backend_id());
    }

    #[tokio::test]
    async fn test_bind_reports_local_address() {
        let dir = TempDir::new().unwrap();
        let server = ResultServer::bind(config(&dir)).await.unwrap();
        let address = server.local_addr().unwrap();
        assert_eq!(address.host(), "127.0.0.1");
        assert_ne!(address.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.listen_address = "not an address".to_string();
        let err = ResultServer::bind(config).await.unwrap_err();
        assert_eq!(err.code().code(), "AERO_CONFIG_INVALID");
    }

    #[tokio::test]
    async fn test_bind_port_in_use_fails_start() {
        let dir = TempDir::new().unwrap();
        let first = ResultServer::bind(config(&dir)).await.unwrap();
        let mut config = config(&dir);
        config.listen_address = first.local_addr().unwrap().to_string();

        let err = ResultServer::bind(config).await.unwrap_err();
        assert_eq!(err.code().code(), "AERO_SERVICE_START_FAILED");
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let server = ResultServer::bind(config(&dir)).await.unwrap();
        let (handle, token) = cancellation();
        let task = tokio::spawn(server.serve(token));
        handle.cancel();
        task.await.unwrap().unwrap();
    }
}
