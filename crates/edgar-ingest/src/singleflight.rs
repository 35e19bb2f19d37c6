//! Keyed single-flight call deduplication.
//!
//! Concurrent callers for the same key share the result of one in-flight
//! future: the first caller's future runs, everyone else attaches to it.
//! Entries are removed once the call completes, so a later caller starts a
//! fresh flight.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use edgar_core::EdgarError;
use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, TryFutureExt};

type Flight<T> = Shared<BoxFuture<'static, Result<T, Arc<EdgarError>>>>;

/// A group of single-flight calls keyed by string.
pub(crate) struct Group<T: Clone> {
    inflight: Mutex<HashMap<String, Flight<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Group<T> {
    pub(crate) fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `fut` under `key`, or attaches to the call already in flight
    /// for that key. Followers observe the leader's value or error; the
    /// follower's own future is dropped unexecuted.
    pub(crate) async fn run<F>(&self, key: &str, fut: F) -> Result<T, Arc<EdgarError>>
    where
        F: Future<Output = Result<T, EdgarError>> + Send + 'static,
    {
        let flight = {
            let mut inflight = self.inflight.lock().expect("singleflight lock");
            match inflight.get(key) {
                Some(flight) => flight.clone(),
                None => {
                    let flight = fut.map_err(Arc::new).boxed().shared();
                    inflight.insert(key.to_string(), flight.clone());
                    flight
                }
            }
        };

        let result = flight.clone().await;

        // Forget the call, unless a newer flight already took the key.
        let mut inflight = self.inflight.lock().expect("singleflight lock");
        if inflight.get(key).is_some_and(|current| current.ptr_eq(&flight)) {
            inflight.remove(key);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn single_caller_runs_its_future() {
        let group = Group::new();
        let got = group.run("key", async { Ok(7u32) }).await.unwrap();
        assert_eq!(got, 7);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_run() {
        let group = Arc::new(Group::new());
        let runs = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let group = Arc::clone(&group);
            let runs = Arc::clone(&runs);
            tasks.push(tokio::spawn(async move {
                group
                    .run("key", async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(42u32)
                    })
                    .await
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 42);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn leader_error_is_shared() {
        let group = Arc::new(Group::<u32>::new());
        let err = group
            .run("key", async { Err(EdgarError::Other("boom".to_string())) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn key_is_forgotten_after_completion() {
        let group = Group::new();
        let first = group.run("key", async { Ok(1u32) }).await.unwrap();
        let second = group.run("key", async { Ok(2u32) }).await.unwrap();
        assert_eq!((first, second), (1, 2));
    }

    #[tokio::test]
    async fn different_keys_run_independently() {
        let group = Arc::new(Group::new());
        let a = group.run("a", async { Ok(1u32) });
        let b = group.run("b", async { Ok(2u32) });
        let (a, b) = tokio::join!(a, b);
        assert_eq!((a.unwrap(), b.unwrap()), (1, 2));
    }
}
