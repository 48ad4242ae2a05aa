use crate::domain::DomainResult;
use async_trait::async_trait;
use std::time::Duration;

/// Shared store holding consecutive-breach counters.
///
/// Every operation must be a single atomic primitive on the store side: detector replicas
/// race on the same keys and a read-modify-write sequence would lose updates.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BreachCounterStore: Send + Sync {
    /// Increment the counter and refresh its idle expiry, returning the new count
    async fn increment(&self, key: &str, idle_expiry: Duration) -> DomainResult<u64>;

    /// Delete the counter if present
    async fn reset(&self, key: &str) -> DomainResult<()>;

    /// Whether a processed marker exists for this message
    async fn is_processed(&self, marker: &str) -> DomainResult<bool>;

    /// Record that a message's side effects have been applied
    async fn mark_processed(&self, marker: &str, ttl: Duration) -> DomainResult<()>;
}

#[cfg(any(test, feature = "testing"))]
pub use in_memory::InMemoryBreachCounterStore;

#[cfg(any(test, feature = "testing"))]
mod in_memory {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Debug, Clone, Copy)]
    struct Entry {
        value: u64,
        expires_at: Instant,
    }

    /// Counter store backed by a HashMap with tokio-clock expiry, for tests and local runs
    #[derive(Default)]
    pub struct InMemoryBreachCounterStore {
        entries: Mutex<HashMap<String, Entry>>,
    }

    impl InMemoryBreachCounterStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Current value of a live key
        pub async fn get(&self, key: &str) -> Option<u64> {
            let mut entries = self.entries.lock().await;
            Self::evict_expired(&mut entries, key);
            entries.get(key).map(|e| e.value)
        }

        fn evict_expired(entries: &mut HashMap<String, Entry>, key: &str) {
            if let Some(entry) = entries.get(key) {
                if entry.expires_at <= Instant::now() {
                    entries.remove(key);
                }
            }
        }
    }

    #[async_trait]
    impl BreachCounterStore for InMemoryBreachCounterStore {
        async fn increment(&self, key: &str, idle_expiry: Duration) -> DomainResult<u64> {
            let mut entries = self.entries.lock().await;
            Self::evict_expired(&mut entries, key);

            let value = entries.get(key).map(|e| e.value).unwrap_or(0) + 1;
            entries.insert(
                key.to_string(),
                Entry {
                    value,
                    expires_at: Instant::now() + idle_expiry,
                },
            );
            Ok(value)
        }

        async fn reset(&self, key: &str) -> DomainResult<()> {
            self.entries.lock().await.remove(key);
            Ok(())
        }

        async fn is_processed(&self, marker: &str) -> DomainResult<bool> {
            Ok(self.get(marker).await.is_some())
        }

        async fn mark_processed(&self, marker: &str, ttl: Duration) -> DomainResult<()> {
            self.entries.lock().await.insert(
                marker.to_string(),
                Entry {
                    value: 1,
                    expires_at: Instant::now() + ttl,
                },
            );
            Ok(())
        }
    }

}
