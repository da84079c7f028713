//! Purpose: Async boundary around the blocking upstream client plus its process-wide cache.
//! Exports: `Upstream`, `Connector`, `UpstreamHandle`.
//! Role: Turns one blocking remote call into an awaitable result for request handlers.
//! Invariants: The client is constructed at most once per handle; a failed construction is retried later.
//! Invariants: The cached client is never invalidated; new credentials need a process restart.
//! Invariants: Blocking I/O runs on the runtime's blocking pool, never on an async worker.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::core::error::{Error, ErrorKind};
use crate::operation::Operation;

type UpstreamResult<T> = Result<T, Error>;

/// One blocking call per operation, taking the JSON-encoded string parameter.
pub trait Upstream: Send + Sync {
    /// Returns the raw remote call result. Transport and remote failures are
    /// reported with `ErrorKind::Transport`.
    fn invoke(&self, operation: Operation, payload: &str) -> UpstreamResult<Value>;
}

/// Builds the upstream client on first use.
pub trait Connector: Send + Sync {
    fn connect(&self) -> UpstreamResult<Arc<dyn Upstream>>;
}

#[derive(Clone)]
pub struct UpstreamHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    connector: Arc<dyn Connector>,
    client: OnceCell<Arc<dyn Upstream>>,
}

impl UpstreamHandle {
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self::from_arc(Arc::new(connector))
    }

    pub fn from_arc(connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                connector,
                client: OnceCell::new(),
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.client.initialized()
    }

    /// Returns the cached client, constructing it if this is the first use.
    pub async fn client(&self) -> UpstreamResult<Arc<dyn Upstream>> {
        let client = self
            .inner
            .client
            .get_or_try_init(|| async {
                let connector = self.inner.connector.clone();
                let client = run_blocking(move || connector.connect()).await?;
                info!("upstream client ready");
                Ok::<_, Error>(client)
            })
            .await?;
        Ok(client.clone())
    }

    /// Invokes `operation` with the JSON-encoded `payload`.
    pub async fn call(&self, operation: Operation, payload: String) -> UpstreamResult<Value> {
        let client = self.client().await?;
        debug!(operation = operation.soap_name(), "invoking upstream");
        run_blocking(move || client.invoke(operation, &payload)).await
    }
}

async fn run_blocking<T, F>(task: F) -> UpstreamResult<T>
where
    F: FnOnce() -> UpstreamResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task).await.map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("upstream task failed")
            .with_source(err)
    })?
}

#[cfg(test)]
mod tests {
    use super::{Connector, Upstream, UpstreamHandle, UpstreamResult};
    use crate::core::error::{Error, ErrorKind};
    use crate::operation::Operation;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Echo;

    impl Upstream for Echo {
        fn invoke(&self, operation: Operation, payload: &str) -> UpstreamResult<Value> {
            Ok(json!({ "op": operation.soap_name(), "payload": payload }))
        }
    }

    struct CountingConnector {
        attempts: Arc<AtomicUsize>,
        fail_first: bool,
    }

    impl Connector for CountingConnector {
        fn connect(&self) -> UpstreamResult<Arc<dyn Upstream>> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            if self.fail_first && attempt == 0 {
                return Err(Error::new(ErrorKind::Transport).with_message("wsdl unreachable"));
            }
            Ok(Arc::new(Echo))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_use_connects_once() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let handle = UpstreamHandle::new(CountingConnector {
            attempts: attempts.clone(),
            fail_first: false,
        });

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle
                    .call(Operation::NextSlot, "{}".to_string())
                    .await
                    .expect("call")
            }));
        }
        for task in tasks {
            let value = task.await.expect("join");
            assert_eq!(value["op"], "NextRegTime");
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(handle.is_connected());
    }

    #[tokio::test]
    async fn failed_connect_is_retried_on_next_call() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let handle = UpstreamHandle::new(CountingConnector {
            attempts: attempts.clone(),
            fail_first: true,
        });

        let err = handle
            .call(Operation::Authorize, "{}".to_string())
            .await
            .expect_err("first connect fails");
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(!handle.is_connected());

        let value = handle
            .call(Operation::Authorize, r#"{"GarNomer":"1"}"#.to_string())
            .await
            .expect("second call");
        assert_eq!(value["payload"], r#"{"GarNomer":"1"}"#);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
