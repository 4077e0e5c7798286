//! Process-wide, lazily built Timesketch client handle.
//!
//! The first call to [`ClientAccessor::get`] builds the handle through a
//! [`ClientFactory`]; every later call returns the same `Arc`. Construction
//! runs behind a `tokio::sync::OnceCell`, so concurrent first callers wait
//! for one construction instead of racing. A failed construction is not
//! cached and the next call tries again.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

use timesketch_mcp_core::backend::TimesketchBackend;
use timesketch_mcp_core::TimesketchError;

use crate::client::TimesketchClient;
use crate::config::TimesketchSettings;

/// Builds a backend handle on first use.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn TimesketchBackend>, TimesketchError>;
}

/// Reads `TIMESKETCH_*` from the environment and logs in over HTTP.
pub struct EnvClientFactory {
    timeout: Duration,
}

impl EnvClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ClientFactory for EnvClientFactory {
    async fn connect(&self) -> Result<Arc<dyn TimesketchBackend>, TimesketchError> {
        let settings = TimesketchSettings::from_env()?;
        info!(host = %settings.host_uri(), user = %settings.username, "connecting to Timesketch");
        let client = TimesketchClient::connect(&settings, self.timeout).await?;
        Ok(Arc::new(client))
    }
}

/// Memoized access to the shared backend handle.
pub struct ClientAccessor {
    cell: OnceCell<Arc<dyn TimesketchBackend>>,
    factory: Box<dyn ClientFactory>,
}

impl ClientAccessor {
    pub fn new(factory: Box<dyn ClientFactory>) -> Self {
        Self {
            cell: OnceCell::new(),
            factory,
        }
    }

    /// Accessor backed by the environment-configured HTTP client.
    pub fn from_env(timeout: Duration) -> Self {
        Self::new(Box::new(EnvClientFactory::new(timeout)))
    }

    /// Accessor that always hands out `backend`.
    pub fn with_backend(backend: Arc<dyn TimesketchBackend>) -> Self {
        Self {
            cell: OnceCell::new_with(Some(backend)),
            factory: Box::new(NoFactory),
        }
    }

    /// Return the shared handle, building it on first use.
    pub async fn get(&self) -> Result<Arc<dyn TimesketchBackend>, TimesketchError> {
        self.cell
            .get_or_try_init(|| self.factory.connect())
            .await
            .cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}

struct NoFactory;

#[async_trait]
impl ClientFactory for NoFactory {
    async fn connect(&self) -> Result<Arc<dyn TimesketchBackend>, TimesketchError> {
        Err(TimesketchError::Connection(
            "no client factory configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use timesketch_mcp_core::backend::memory::InMemoryBackend;

    /// Fails the first `failures` attempts, then succeeds.
    struct CountingFactory {
        calls: Arc<AtomicUsize>,
        failures: usize,
    }

    #[async_trait]
    impl ClientFactory for CountingFactory {
        async fn connect(&self) -> Result<Arc<dyn TimesketchBackend>, TimesketchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if n < self.failures {
                return Err(TimesketchError::Connection("refused".into()));
            }
            Ok(Arc::new(InMemoryBackend::new()))
        }
    }

    fn accessor(failures: usize) -> (ClientAccessor, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let factory = CountingFactory {
            calls: calls.clone(),
            failures,
        };
        (ClientAccessor::new(Box::new(factory)), calls)
    }

    #[tokio::test]
    async fn test_same_handle_every_call() {
        let (acc, calls) = accessor(0);
        let a = acc.get().await.unwrap();
        let b = acc.get().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let (acc, calls) = accessor(1);
        assert!(acc.get().await.is_err());
        assert!(!acc.is_initialized());
        assert!(acc.get().await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_first_use_builds_once() {
        let (acc, calls) = accessor(0);
        let acc = Arc::new(acc);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let acc = acc.clone();
                tokio::spawn(async move { acc.get().await.unwrap() })
            })
            .collect();
        let mut clients = Vec::new();
        for h in handles {
            clients.push(h.await.unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clients.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn test_with_backend_skips_factory() {
        let backend: Arc<dyn TimesketchBackend> = Arc::new(InMemoryBackend::new());
        let acc = ClientAccessor::with_backend(backend.clone());
        assert!(acc.is_initialized());
        assert!(Arc::ptr_eq(&acc.get().await.unwrap(), &backend));
    }
}
