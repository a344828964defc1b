//! Circuit breaker transition notifications.
//!
//! Every breaker owns a broadcast channel. Subscribers (metrics sinks,
//! status pages, tests) receive a [`BreakerEvent`] for each transition,
//! timeout and rejection. Publishing never blocks and never fails: with no
//! subscribers the event is simply dropped.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Capacity of each breaker's event channel; slow subscribers lag.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerEventKind {
    Open,
    HalfOpen,
    Close,
    Timeout { after: Duration },
    Reject,
}

impl BreakerEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::HalfOpen => "half_open",
            Self::Close => "close",
            Self::Timeout { .. } => "timeout",
            Self::Reject => "reject",
        }
    }
}

/// One notification from a named breaker.
#[derive(Debug, Clone)]
pub struct BreakerEvent {
    pub breaker: Arc<str>,
    pub kind: BreakerEventKind,
}

/// Sending half held by a breaker.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    name: Arc<str>,
    sender: broadcast::Sender<BreakerEvent>,
}

impl EventPublisher {
    pub fn new(name: Arc<str>) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { name, sender }
    }

    pub fn publish(&self, kind: BreakerEventKind) {
        // Err only means nobody is listening.
        let _ = self.sender.send(BreakerEvent {
            breaker: Arc::clone(&self.name),
            kind,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let publisher = EventPublisher::new(Arc::from("ANM"));
        let mut rx = publisher.subscribe();

        publisher.publish(BreakerEventKind::Open);
        publisher.publish(BreakerEventKind::Reject);

        let first = rx.recv().await.unwrap();
        assert_eq!(&*first.breaker, "ANM");
        assert_eq!(first.kind, BreakerEventKind::Open);
        assert_eq!(rx.recv().await.unwrap().kind.as_str(), "reject");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let publisher = EventPublisher::new(Arc::from("USGS"));
        publisher.publish(BreakerEventKind::Close);
    }
}
