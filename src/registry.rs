//! Live connection tracking for server-wide stop.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, trace};

/// Relaxed ordering is enough: ids only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Set of running connection tasks, keyed by id.
///
/// A task removes itself when it finishes, whether it completed or was
/// aborted. [`ConnectionRegistry::close_all`] aborts every task left, which
/// drops and so closes both of its sockets.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    live: Arc<Mutex<HashMap<ConnectionId, JoinHandle<()>>>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task` as connection `id` and tracks it until it finishes.
    pub fn spawn<F>(&self, id: ConnectionId, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let registry = self.clone();
        let (inserted, wait_inserted) = oneshot::channel::<()>();

        // The task must not deregister before its handle is in the map, and
        // the lock must not be held while the runtime may drop the future.
        let handle = tokio::spawn(async move {
            let _membership = Membership { registry, id };
            if wait_inserted.await.is_err() {
                return;
            }
            task.await;
        });
        self.lock().insert(id, handle);
        if inserted.send(()).is_err() {
            // The runtime dropped the task without running it.
            self.lock().remove(&id);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Aborts every tracked connection and waits until each task has been
    /// dropped. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();

        for (id, handle) in drained {
            handle.abort();
            // Cancellation is the expected outcome; a panic was already
            // reported by the runtime.
            let _ = handle.await;
            trace!(connection_id = %id, "Connection force-closed");
        }

        debug!(count, "Closed all tracked connections");
        count
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, JoinHandle<()>>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Membership {
    registry: ConnectionRegistry,
    id: ConnectionId,
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
        trace!(connection_id = %self.id, "Connection removed from registry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::{
        io::AsyncReadExt,
        net::{TcpListener, TcpStream},
        time::{sleep, timeout},
    };

    const TEST_TIMEOUT: Duration = Duration::from_secs(2);

    async fn wait_until_empty(registry: &ConnectionRegistry) {
        timeout(TEST_TIMEOUT, async {
            while !registry.is_empty() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn connection_ids_are_unique() {
        let first = ConnectionId::new();
        let second = ConnectionId::new();
        assert_ne!(first, second);
        assert!(first.to_string().starts_with("conn-"));
    }

    #[tokio::test]
    async fn finished_tasks_leave_the_registry() {
        let registry = ConnectionRegistry::new();
        let (release, released) = oneshot::channel::<()>();
        let id = ConnectionId::new();

        registry.spawn(id, async move {
            let _ = released.await;
        });
        assert!(registry.contains(id));
        assert_eq!(registry.len(), 1);

        release.send(()).unwrap();
        wait_until_empty(&registry).await;
    }

    #[tokio::test]
    async fn instantly_finishing_task_is_not_leaked() {
        let registry = ConnectionRegistry::new();
        for _ in 0..50 {
            registry.spawn(ConnectionId::new(), async {});
        }
        wait_until_empty(&registry).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_spawns_are_tracked_and_released() {
        let registry = ConnectionRegistry::new();
        let (release, released) = tokio::sync::watch::channel(false);

        let spawners: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let released = released.clone();
                tokio::spawn(async move {
                    for _ in 0..25 {
                        let mut released = released.clone();
                        registry.spawn(ConnectionId::new(), async move {
                            let _ = released.changed().await;
                        });
                    }
                })
            })
            .collect();
        for spawner in spawners {
            spawner.await.unwrap();
        }
        assert_eq!(registry.len(), 200);

        release.send(true).unwrap();
        wait_until_empty(&registry).await;
    }

    #[test]
    fn spawn_on_a_stopped_runtime_does_not_block() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let handle = runtime.handle().clone();
        runtime.shutdown_background();

        let registry = ConnectionRegistry::new();
        let _guard = handle.enter();
        registry.spawn(ConnectionId::new(), async {});
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn close_all_drops_sockets_of_blocked_tasks() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = ConnectionRegistry::new();

        let mut peers = Vec::new();
        for _ in 0..3 {
            let peer = TcpStream::connect(addr).await.unwrap();
            let (mut stream, _) = listener.accept().await.unwrap();
            registry.spawn(ConnectionId::new(), async move {
                // Blocks until the socket is closed from outside.
                let mut buf = [0u8; 16];
                let _ = stream.read(&mut buf).await;
            });
            peers.push(peer);
        }
        assert_eq!(registry.len(), 3);

        assert_eq!(registry.close_all().await, 3);
        assert!(registry.is_empty());

        for mut peer in peers {
            let mut buf = [0u8; 16];
            let n = timeout(TEST_TIMEOUT, peer.read(&mut buf)).await.unwrap().unwrap_or(0);
            assert_eq!(n, 0, "socket should be closed");
        }
    }
}
