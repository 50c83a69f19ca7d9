//! Per-build event fan-out to a single observer
//!
//! Publishing never blocks. Each subscribed build gets a bounded channel;
//! when it is full the new event is dropped and counted, and when nobody is
//! subscribed the event is dropped silently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::event::Event;
use crate::types::BuildId;

const DEFAULT_BUFFER: usize = 256;

/// Event bus shared by the orchestrator, agents and observers
#[derive(Debug)]
pub struct EventBus {
    subscribers: Mutex<HashMap<BuildId, mpsc::Sender<Event>>>,
    buffer: usize,
    dropped: AtomicU64,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Subscribe to one build's events
    ///
    /// A second subscription for the same build replaces the first, whose
    /// stream then ends.
    pub fn subscribe(&self, build_id: BuildId) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.buffer);
        if self.lock().insert(build_id, tx).is_some() {
            debug!(build_id = %build_id, "replaced existing subscriber");
        }
        rx
    }

    pub fn unsubscribe(&self, build_id: BuildId) {
        self.lock().remove(&build_id);
    }

    /// End the observer's stream once the final event has been published
    pub fn close(&self, build_id: BuildId) {
        self.unsubscribe(build_id);
    }

    /// Deliver an event without waiting
    pub fn publish(&self, event: Event) {
        let mut subscribers = self.lock();
        let Some(tx) = subscribers.get(&event.build_id) else {
            trace!(build_id = %event.build_id, "no subscriber, event dropped");
            return;
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(build_id = %event.build_id, "subscriber buffer full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                subscribers.remove(&event.build_id);
                debug!(build_id = %event.build_id, "subscriber gone, removed");
            }
        }
    }

    /// Events dropped because a subscriber's buffer was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn has_subscriber(&self, build_id: BuildId) -> bool {
        self.lock().contains_key(&build_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<BuildId, mpsc::Sender<Event>>> {
        // A poisoned map is still structurally valid
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentKind, AgentStatus, BuildStatus};
    use std::sync::Arc;

    fn agent_event(id: BuildId, progress: u8) -> Event {
        Event::agent(id, AgentKind::Plan, AgentStatus::Working, progress, "working")
    }

    #[tokio::test]
    async fn test_publish_without_subscriber_is_silent() {
        let bus = EventBus::default();
        bus.publish(agent_event(BuildId::new(), 10));
        assert_eq!(bus.dropped(), 0);
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let bus = EventBus::default();
        let id = BuildId::new();
        let mut rx = bus.subscribe(id);

        for p in [10, 20, 30] {
            bus.publish(agent_event(id, p));
        }
        bus.publish(Event::build(id, BuildStatus::Completed, 100, "done"));
        bus.close(id);

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            seen.push(event.progress);
        }
        assert_eq!(seen, vec![10, 20, 30, 100]);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_new_events() {
        let bus = EventBus::new(2);
        let id = BuildId::new();
        let mut rx = bus.subscribe(id);

        for p in [1, 2, 3, 4] {
            bus.publish(agent_event(id, p));
        }
        assert_eq!(bus.dropped(), 2);
        assert_eq!(rx.recv().await.unwrap().progress, 1);
        assert_eq!(rx.recv().await.unwrap().progress, 2);
    }

    #[tokio::test]
    async fn test_other_builds_are_isolated() {
        let bus = EventBus::default();
        let a = BuildId::new();
        let b = BuildId::new();
        let mut rx = bus.subscribe(a);

        bus.publish(agent_event(b, 50));
        bus.publish(agent_event(a, 5));
        bus.close(a);

        assert_eq!(rx.recv().await.unwrap().progress, 5);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_second_subscribe_replaces_first() {
        let bus = EventBus::default();
        let id = BuildId::new();
        let mut first = bus.subscribe(id);
        let mut second = bus.subscribe(id);

        bus.publish(agent_event(id, 42));
        assert!(first.recv().await.is_none());
        assert_eq!(second.recv().await.unwrap().progress, 42);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_removed() {
        let bus = EventBus::default();
        let id = BuildId::new();
        drop(bus.subscribe(id));

        bus.publish(agent_event(id, 1));
        assert!(!bus.has_subscriber(id));
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = Arc::new(EventBus::new(1024));
        let id = BuildId::new();
        let mut rx = bus.subscribe(id);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let bus = Arc::clone(&bus);
                tokio::spawn(async move {
                    for p in 0..50 {
                        bus.publish(agent_event(id, p));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        bus.close(id);

        let mut count = 0;
        while rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 200);
    }
}
