use crate::core::error::{FetchError, PhaseError};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::JoinSet;

/// Result of one request within a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    /// The endpoint reported the entity as nonexistent.
    NotFound,
    /// Timeout, transport error, bad status, bad payload or a panic in the
    /// request. Retried on the next pass.
    Transient(String),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

/// Outcomes of a batch, keyed by the item that produced them.
#[derive(Debug)]
pub struct BatchOutcomes<K, T> {
    outcomes: HashMap<K, Outcome<T>>,
}

impl<K: Eq + Hash, T> BatchOutcomes<K, T> {
    pub fn take(&mut self, key: &K) -> Option<Outcome<T>> {
        self.outcomes.remove(key)
    }

    #[cfg(test)]
    pub fn get(&self, key: &K) -> Option<&Outcome<T>> {
        self.outcomes.get(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs `request` for every item concurrently, one task per item, and waits
/// for all of them. A timeout, error or panic in one request only affects
/// that item's outcome.
///
/// The only error returned is a task that failed to join, which means
/// something escaped the per-request isolation.
pub async fn execute_batch<K, T, F, Fut>(
    items: &[K],
    timeout: Duration,
    request: F,
) -> Result<BatchOutcomes<K, T>, PhaseError>
where
    K: Clone + Eq + Hash + Send + 'static,
    T: Send + 'static,
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    let mut tasks = JoinSet::new();

    for item in items {
        let key = item.clone();
        let call = request(item.clone());

        tasks.spawn(async move {
            let outcome = match AssertUnwindSafe(tokio::time::timeout(timeout, call))
                .catch_unwind()
                .await
            {
                Ok(Ok(Ok(payload))) => Outcome::Success(payload),
                Ok(Ok(Err(FetchError::NotFound))) => Outcome::NotFound,
                Ok(Ok(Err(FetchError::Transient(cause)))) => Outcome::Transient(cause),
                Ok(Err(_)) => Outcome::Transient(format!("timed out after {timeout:?}")),
                Err(panic) => {
                    Outcome::Transient(format!("request panicked: {}", panic_message(&*panic)))
                }
            };
            (key, outcome)
        });
    }

    let mut outcomes = HashMap::with_capacity(items.len());
    while let Some(joined) = tasks.join_next().await {
        let (key, outcome) = joined?;
        outcomes.insert(key, outcome);
    }

    Ok(BatchOutcomes { outcomes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_outcomes_keyed_by_item() {
        let items = vec![1u32, 2, 3, 4];
        let mut outcomes = execute_batch(&items, Duration::from_secs(1), |n| async move {
            match n {
                2 => Err(FetchError::NotFound),
                3 => Err(FetchError::transient("HTTP 500")),
                n => Ok(n * 10),
            }
        })
        .await
        .unwrap();

        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes.success_count(), 2);
        assert_eq!(outcomes.take(&1), Some(Outcome::Success(10)));
        assert_eq!(outcomes.take(&2), Some(Outcome::NotFound));
        assert_eq!(
            outcomes.take(&3),
            Some(Outcome::Transient("HTTP 500".to_string()))
        );
        assert_eq!(outcomes.take(&4), Some(Outcome::Success(40)));
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_panic_does_not_abort_siblings() {
        let items: Vec<u32> = (0..10).collect();
        let outcomes = execute_batch(&items, Duration::from_secs(1), |n| async move {
            if n == 7 {
                panic!("boom");
            }
            Ok(n)
        })
        .await
        .unwrap();

        assert_eq!(outcomes.len(), 10);
        assert_eq!(outcomes.success_count(), 9);
        match outcomes.get(&7) {
            Some(Outcome::Transient(cause)) => assert!(cause.contains("boom")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_only_affects_hung_call() {
        let items = vec!["fast", "hung"];
        let outcomes = execute_batch(&items, Duration::from_secs(30), |key| async move {
            if key == "hung" {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(key.len())
        })
        .await
        .unwrap();

        assert_eq!(outcomes.get(&"fast"), Some(&Outcome::Success(4)));
        assert!(matches!(outcomes.get(&"hung"), Some(Outcome::Transient(_))));
    }

    #[tokio::test]
    async fn test_all_requests_run_concurrently() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let items: Vec<u32> = (0..8).collect();

        let outcomes = execute_batch(&items, Duration::from_secs(5), |n| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(n)
            }
        })
        .await
        .unwrap();

        assert_eq!(outcomes.success_count(), 8);
        assert_eq!(peak.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let items: Vec<u32> = Vec::new();
        let outcomes = execute_batch(&items, Duration::from_secs(1), |n| async move { Ok(n) })
            .await
            .unwrap();
        assert!(outcomes.is_empty());
    }
}
