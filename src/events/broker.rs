use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use tokio::sync::Mutex;

use crate::events::broadcaster::StateBroadcaster;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("state broadcaster already exists for topic {0}")]
    AlreadyExists(String),

    #[error("state broadcaster does not exist for topic {0}")]
    Missing(String),
}

/// Registry associating topics with their state broadcaster.
///
/// At most one broadcaster exists per topic at any time.
pub struct StateBroker<K, T> {
    broadcasters: Mutex<HashMap<K, StateBroadcaster<T>>>,
    subscriber_buffer: usize,
}

impl<K, T> StateBroker<K, T>
where
    K: Eq + Hash + Display,
    T: Clone + Send + 'static,
{
    pub fn new(subscriber_buffer: usize) -> Self {
        Self {
            broadcasters: Mutex::new(HashMap::new()),
            subscriber_buffer,
        }
    }

    /// Start a broadcaster for `topic`, seeded with `initial`
    pub async fn add(&self, topic: K, initial: T) -> Result<StateBroadcaster<T>, BrokerError> {
        let mut broadcasters = self.broadcasters.lock().await;
        if broadcasters.contains_key(&topic) {
            return Err(BrokerError::AlreadyExists(topic.to_string()));
        }

        let broadcaster = StateBroadcaster::start(initial, self.subscriber_buffer);
        broadcasters.insert(topic, broadcaster.clone());
        Ok(broadcaster)
    }

    pub async fn get(&self, topic: &K) -> Result<StateBroadcaster<T>, BrokerError> {
        self.broadcasters
            .lock()
            .await
            .get(topic)
            .cloned()
            .ok_or_else(|| BrokerError::Missing(topic.to_string()))
    }

    /// Drop the registry entry. The broadcaster must already have been ended.
    pub async fn remove(&self, topic: &K) -> Result<(), BrokerError> {
        self.broadcasters
            .lock()
            .await
            .remove(topic)
            .map(|_| ())
            .ok_or_else(|| BrokerError::Missing(topic.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_add_get_remove() {
        let broker: StateBroker<u64, String> = StateBroker::new(4);

        let added = assert_ok!(broker.add(1, "pending".to_string()).await);
        let fetched = assert_ok!(broker.get(&1).await);

        fetched.publish(&"running".to_string());
        let mut subscription = assert_ok!(added.subscribe().await);
        assert_eq!(subscription.recv().await.as_deref(), Some("running"));

        added.end();
        assert_ok!(broker.remove(&1).await);
        assert_eq!(broker.get(&1).await.err(), Some(BrokerError::Missing("1".to_string())));
    }

    #[tokio::test]
    async fn test_one_broadcaster_per_topic() {
        let broker: StateBroker<u64, i32> = StateBroker::new(4);
        assert_ok!(broker.add(7, 0).await);

        let duplicate = broker.add(7, 1).await;
        assert_eq!(duplicate.err(), Some(BrokerError::AlreadyExists("7".to_string())));
    }

    #[tokio::test]
    async fn test_remove_unknown_topic() {
        let broker: StateBroker<u64, i32> = StateBroker::new(4);
        assert_err!(broker.remove(&3).await);
    }
}
