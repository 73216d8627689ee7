//! Per-key single-flight。
//!
//! 同一鍵的並行請求共用一次上游抓取：後到者訂閱先到者的 shared future，
//! 完成後所有等待者拿到同一份結果。領頭的抓取跑在獨立 task 上，
//! 等待者被取消不會中斷它，結果仍會發布給留下來的等待者。
//! 完成時從表中移除鍵，之後的請求重新起飛。

use std::{collections::HashMap, hash::Hash, sync::Arc, sync::Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::error::{Error, Result};

type SharedResult<V> = Shared<BoxFuture<'static, std::result::Result<V, Arc<Error>>>>;

pub struct SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    inflight: Arc<Mutex<HashMap<K, SharedResult<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        SingleFlight {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 以指定鍵執行 `make` 產生的 future；同鍵已有在途請求時改為等它。
    pub async fn run<F>(&self, key: K, make: F) -> Result<V>
    where
        F: FnOnce() -> BoxFuture<'static, Result<V>>,
    {
        let shared = {
            let mut inflight = self.inflight.lock().expect("single-flight map poisoned");

            if let Some(existing) = inflight.get(&key) {
                existing.clone()
            } else {
                let map = Arc::clone(&self.inflight);
                let cleanup_key = key.clone();
                let work = make();

                // 領頭 task 獨立於呼叫者，完成時自表中移除鍵再發布結果
                let leader = tokio::spawn(async move {
                    let outcome = work.await.map_err(Arc::new);
                    map.lock().expect("single-flight map poisoned").remove(&cleanup_key);
                    outcome
                });

                let shared: SharedResult<V> = async move {
                    match leader.await {
                        Ok(outcome) => outcome,
                        Err(join_error) => Err(Arc::new(Error::TransientFetch(format!(
                            "single-flight leader aborted: {}",
                            join_error
                        )))),
                    }
                }
                .boxed()
                .shared();

                inflight.insert(key, shared.clone());
                shared
            }
        };

        shared.await.map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    /// P4：空快取下 N 個並行請求只觸發一次上游，結果全部相同
    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let flights = Arc::new(SingleFlight::<String, i64>::new());
        let upstream_calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let flights = Arc::clone(&flights);
            let upstream_calls = Arc::clone(&upstream_calls);
            handles.push(tokio::spawn(async move {
                flights
                    .run("2330-113Q3".to_string(), move || {
                        async move {
                            upstream_calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(42)
                        }
                        .boxed()
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(upstream_calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|value| *value == 42));
    }

    /// 完成後鍵被移除，下一次請求重新起飛
    #[tokio::test]
    async fn test_key_removed_after_completion() {
        let flights = SingleFlight::<&'static str, i64>::new();
        let upstream_calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let upstream_calls = Arc::clone(&upstream_calls);
            let value = flights
                .run("key", move || {
                    async move {
                        upstream_calls.fetch_add(1, Ordering::SeqCst);
                        Ok(7)
                    }
                    .boxed()
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }

        assert_eq!(upstream_calls.load(Ordering::SeqCst), 2);
    }

    /// 等待者被取消不會中斷領頭抓取，留下的等待者仍拿到結果
    #[tokio::test]
    async fn test_cancelled_waiter_does_not_abort_leader() {
        let flights = Arc::new(SingleFlight::<&'static str, i64>::new());
        let upstream_finished = Arc::new(AtomicUsize::new(0));

        let leader_flights = Arc::clone(&flights);
        let leader_finished = Arc::clone(&upstream_finished);
        let cancelled = tokio::spawn(async move {
            leader_flights
                .run("key", move || {
                    async move {
                        tokio::time::sleep(Duration::from_millis(80)).await;
                        leader_finished.fetch_add(1, Ordering::SeqCst);
                        Ok(99)
                    }
                    .boxed()
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let survivor_flights = Arc::clone(&flights);
        let survivor = tokio::spawn(async move {
            survivor_flights
                .run("key", move || async move { Ok(-1) }.boxed())
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancelled.abort();

        // 倖存的等待者拿到領頭的結果，而不是自己的 -1
        assert_eq!(survivor.await.unwrap().unwrap(), 99);
        assert_eq!(upstream_finished.load(Ordering::SeqCst), 1);
    }

    /// 錯誤也會共享發布，且不會卡住後續請求
    #[tokio::test]
    async fn test_error_is_shared_then_cleared() {
        let flights = SingleFlight::<&'static str, i64>::new();

        let first = flights
            .run("key", || {
                async move { Err(Error::NotFound("no data".to_string())) }.boxed()
            })
            .await;
        assert!(matches!(first, Err(Error::NotFound(_))));

        let second = flights
            .run("key", || async move { Ok(5) }.boxed())
            .await
            .unwrap();
        assert_eq!(second, 5);
    }
}
