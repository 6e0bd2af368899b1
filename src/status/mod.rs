//! Repository status snapshots and the subscriber hub.
//!
//! A [`Status`] is the observable state of one tracked repository:
//!
//! ```json
//! {"active":true,"hash":"3f786850e387550fdab836ed7e6dc881de23001b","last_updated":"2024-05-01T12:00:00Z"}
//! ```
//!
//! [`StatusHub`] fans snapshots out to connected observers. A subscriber
//! whose channel is closed or full is treated as disconnected and dropped
//! during the same notification pass.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Buffered snapshots per subscriber before it counts as disconnected.
const SUBSCRIBER_BUFFER: usize = 16;

/// Seconds from 0001-01-01T00:00:00Z to the Unix epoch.
const ZERO_TIME_UNIX_SECS: i64 = -62_135_596_800;

/// Point-in-time status of a tracked repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// An initial clone has succeeded.
    pub active: bool,

    /// Hash of the checked-out commit; empty before the first sync.
    pub hash: String,

    /// Time of the last successful sync; `0001-01-01T00:00:00Z` if never.
    pub last_updated: DateTime<Utc>,
}

impl Status {
    /// The timestamp reported before any successful sync.
    pub fn never_updated() -> DateTime<Utc> {
        DateTime::from_timestamp(ZERO_TIME_UNIX_SECS, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Identifies one registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// A registered subscriber's receiving end.
pub struct Subscription {
    pub id: SubscriberId,
    pub updates: mpsc::Receiver<Status>,
}

/// The set of observers subscribed to one repository.
#[derive(Default)]
pub struct StatusHub {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<Status>>>,
}

impl StatusHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber and returns its receiving end.
    pub fn register(&self) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, updates) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.lock().insert(id, tx);
        debug!(subscriber = id.0, "Status subscriber registered");
        Subscription { id, updates }
    }

    /// Removes a subscriber. Removing an unknown id is a no-op.
    pub fn unregister(&self, id: SubscriberId) {
        if self.lock().remove(&id).is_some() {
            debug!(subscriber = id.0, "Status subscriber unregistered");
        }
    }

    /// Delivers `status` to every subscriber, dropping the ones that can no
    /// longer receive.
    pub fn notify(&self, status: &Status) {
        self.lock().retain(|id, tx| match tx.try_send(status.clone()) {
            Ok(()) => true,
            Err(e) => {
                warn!(subscriber = id.0, error = %e, "Dropping status subscriber");
                false
            }
        });
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriberId, mpsc::Sender<Status>>> {
        // A panic while holding the lock cannot leave the map half-updated,
        // so a poisoned lock is still usable.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn status(hash: &str) -> Status {
        Status {
            active: true,
            hash: hash.into(),
            last_updated: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn serializes_with_expected_field_names() {
        let json = serde_json::to_value(status("abc")).unwrap();
        assert_eq!(json["active"], true);
        assert_eq!(json["hash"], "abc");
        assert_eq!(json["last_updated"], "2023-11-14T22:13:20Z");
    }

    #[test]
    fn never_updated_is_year_one() {
        let json = serde_json::to_value(Status::never_updated()).unwrap();
        assert_eq!(json, "0001-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn notify_reaches_every_subscriber() {
        let hub = StatusHub::new();
        let mut a = hub.register();
        let mut b = hub.register();

        hub.notify(&status("one"));

        assert_eq!(a.updates.recv().await.unwrap().hash, "one");
        assert_eq!(b.updates.recv().await.unwrap().hash, "one");
        assert_eq!(hub.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn closed_subscribers_are_removed_during_notify() {
        let hub = StatusHub::new();
        let mut kept = hub.register();
        let dropped = hub.register();
        drop(dropped.updates);

        hub.notify(&status("x"));

        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(kept.updates.recv().await.unwrap().hash, "x");
    }

    #[test]
    fn full_subscribers_are_removed() {
        let hub = StatusHub::new();
        let _slow = hub.register();
        for i in 0..SUBSCRIBER_BUFFER {
            hub.notify(&status(&i.to_string()));
        }
        assert_eq!(hub.subscriber_count(), 1);
        hub.notify(&status("overflow"));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn unregister_removes_only_that_subscriber() {
        let hub = StatusHub::new();
        let a = hub.register();
        let _b = hub.register();
        hub.unregister(a.id);
        hub.unregister(a.id);
        assert_eq!(hub.subscriber_count(), 1);
    }

    proptest! {
        #[test]
        fn json_round_trip(
            active in any::<bool>(),
            hash in "[0-9a-f]{0,40}",
            secs in 0i64..4_000_000_000,
        ) {
            let original = Status {
                active,
                hash,
                last_updated: DateTime::from_timestamp(secs, 0).unwrap(),
            };
            let json = serde_json::to_string(&original).unwrap();
            let parsed: Status = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(parsed, original);
        }
    }
}
