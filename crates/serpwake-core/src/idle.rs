//! Idle service capability
//!
//! The host environment reports three signals: the user went idle, the user
//! became active again, and the machine woke from sleep. Consumers subscribe
//! to receive them and drain their subscription from the thread that owns
//! the scheduler.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

use crate::error::IdleServiceError;

/// Signal emitted by the idle service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleSignal {
    Idle,
    Active,
    WakeNotification,
}

impl IdleSignal {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::WakeNotification => "wake_notification",
        }
    }
}

impl fmt::Display for IdleSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdleSignal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "active" => Ok(Self::Active),
            "wake_notification" | "wake" => Ok(Self::WakeNotification),
            other => Err(format!("unknown idle signal: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// Receiving end of an idle service subscription
#[derive(Debug)]
pub struct IdleSubscription {
    id: SubscriptionId,
    receiver: UnboundedReceiver<IdleSignal>,
}

impl IdleSubscription {
    #[must_use]
    pub fn new(id: SubscriptionId, receiver: UnboundedReceiver<IdleSignal>) -> Self {
        Self { id, receiver }
    }

    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next queued signal, without waiting
    pub fn try_next(&mut self) -> Option<IdleSignal> {
        match self.receiver.try_recv() {
            Ok(signal) => Some(signal),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Wait for the next signal. Returns `None` once the service dropped the subscription.
    pub async fn recv(&mut self) -> Option<IdleSignal> {
        self.receiver.recv().await
    }
}

/// Source of idle/active/wake signals
pub trait IdleService: Send + Sync {
    /// Register a new subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot accept subscribers.
    fn subscribe(&self) -> Result<IdleSubscription, IdleServiceError>;

    /// Stop delivering signals to `id`. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    subscribers: BTreeMap<SubscriptionId, UnboundedSender<IdleSignal>>,
    refusal: Option<String>,
    closed: bool,
}

/// In-process idle service. Signals are injected with [`ChannelIdleService::fire`].
#[derive(Debug, Clone, Default)]
pub struct ChannelIdleService {
    registry: Arc<Mutex<Registry>>,
}

impl ChannelIdleService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `signal` to every live subscriber, returning how many received it
    pub fn fire(&self, signal: IdleSignal) -> usize {
        let mut registry = self.registry();
        registry
            .subscribers
            .retain(|_, sender| sender.send(signal).is_ok());
        log::debug!(
            "Fired {signal} to {} subscriber(s)",
            registry.subscribers.len()
        );
        registry.subscribers.len()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry().subscribers.len()
    }

    /// Make future `subscribe` calls fail with `reason`; `None` accepts them again
    pub fn refuse_subscriptions(&self, reason: Option<String>) {
        self.registry().refusal = reason;
    }

    /// Drop every subscriber and refuse new ones
    pub fn close(&self) {
        let mut registry = self.registry();
        registry.closed = true;
        registry.subscribers.clear();
    }
}

impl IdleService for ChannelIdleService {
    fn subscribe(&self) -> Result<IdleSubscription, IdleServiceError> {
        let mut registry = self.registry();
        if registry.closed {
            return Err(IdleServiceError::Closed);
        }
        if let Some(reason) = &registry.refusal {
            return Err(IdleServiceError::Refused(reason.clone()));
        }

        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        let (sender, receiver) = mpsc::unbounded_channel();
        registry.subscribers.insert(id, sender);
        Ok(IdleSubscription::new(id, receiver))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if self.registry().subscribers.remove(&id).is_none() {
            log::debug!("Ignoring unsubscribe for unknown subscription {id:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        for signal in [
            IdleSignal::Idle,
            IdleSignal::Active,
            IdleSignal::WakeNotification,
        ] {
            assert_eq!(signal.as_str().parse::<IdleSignal>(), Ok(signal));
        }
        assert_eq!("wake".parse::<IdleSignal>(), Ok(IdleSignal::WakeNotification));
        assert!("sleep".parse::<IdleSignal>().is_err());

        let json = serde_json::to_string(&IdleSignal::WakeNotification).unwrap();
        assert_eq!(json, "\"wake_notification\"");
    }

    #[test]
    fn test_fire_reaches_every_subscriber_in_order() {
        let service = ChannelIdleService::new();
        let mut first = service.subscribe().unwrap();
        let mut second = service.subscribe().unwrap();
        assert_ne!(first.id(), second.id());

        assert_eq!(service.fire(IdleSignal::Idle), 2);
        assert_eq!(service.fire(IdleSignal::WakeNotification), 2);

        assert_eq!(first.try_next(), Some(IdleSignal::Idle));
        assert_eq!(first.try_next(), Some(IdleSignal::WakeNotification));
        assert_eq!(first.try_next(), None);
        assert_eq!(second.try_next(), Some(IdleSignal::Idle));
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let service = ChannelIdleService::new();
        let mut subscription = service.subscribe().unwrap();
        service.unsubscribe(subscription.id());

        assert_eq!(service.fire(IdleSignal::WakeNotification), 0);
        assert_eq!(subscription.try_next(), None);
        assert_eq!(service.subscriber_count(), 0);
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let service = ChannelIdleService::new();
        let subscription = service.subscribe().unwrap();
        drop(subscription);
        assert_eq!(service.fire(IdleSignal::Active), 0);
        assert_eq!(service.subscriber_count(), 0);
    }

    #[test]
    fn test_refused_and_closed_subscriptions() {
        let service = ChannelIdleService::new();
        service.refuse_subscriptions(Some("no idle support".to_string()));
        assert_eq!(
            service.subscribe().unwrap_err(),
            IdleServiceError::Refused("no idle support".to_string())
        );

        service.refuse_subscriptions(None);
        assert!(service.subscribe().is_ok());

        service.close();
        assert_eq!(service.subscribe().unwrap_err(), IdleServiceError::Closed);
    }

    #[tokio::test]
    async fn test_recv_waits_for_signal() {
        let service = ChannelIdleService::new();
        let mut subscription = service.subscribe().unwrap();
        let firing = service.clone();
        tokio::spawn(async move {
            firing.fire(IdleSignal::Active);
        });
        assert_eq!(subscription.recv().await, Some(IdleSignal::Active));
    }
}
