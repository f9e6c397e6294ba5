//! Notification bus delivering events to every connected client.
//!
//! The bus is a thin layer over a [`tokio::sync::broadcast`] channel. Each
//! connection holds its own [`Subscription`]; the waiting call forms use a
//! short-lived subscription taken before the triggering call is issued.
//! Nothing is persisted: a subscriber only sees events published after it
//! subscribed.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::WaitError;
use crate::model::{DiscoveryPath, ServerHandle, ServerProcess, ServerState, ServerStateChange};
use crate::protocol::methods;

/// Broadcast channel capacity.
const CHANNEL_CAPACITY: usize = 256;

/// An event published to all clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A discovery path was registered.
    DiscoveryPathAdded(DiscoveryPath),
    /// A discovery path was unregistered.
    DiscoveryPathRemoved(DiscoveryPath),
    /// A server handle was created.
    ServerAdded(ServerHandle),
    /// A server handle was deleted.
    ServerRemoved(ServerHandle),
    /// A server entered a new state.
    ServerStateChange(ServerStateChange),
    /// A server process was spawned.
    ServerProcessCreated(ServerProcess),
    /// A server process went away.
    ServerProcessTerminated(ServerProcess),
}

impl Notification {
    /// Wire method name of the event.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::DiscoveryPathAdded(_) => methods::DISCOVERY_PATH_ADDED,
            Self::DiscoveryPathRemoved(_) => methods::DISCOVERY_PATH_REMOVED,
            Self::ServerAdded(_) => methods::SERVER_ADDED,
            Self::ServerRemoved(_) => methods::SERVER_REMOVED,
            Self::ServerStateChange(_) => methods::SERVER_STATE_CHANGE,
            Self::ServerProcessCreated(_) => methods::SERVER_PROCESS_CREATED,
            Self::ServerProcessTerminated(_) => methods::SERVER_PROCESS_TERMINATED,
        }
    }

    /// Wire parameters of the event.
    #[must_use]
    pub fn params(&self) -> Value {
        let encoded = match self {
            Self::DiscoveryPathAdded(path) | Self::DiscoveryPathRemoved(path) => {
                serde_json::to_value(path)
            }
            Self::ServerAdded(handle) | Self::ServerRemoved(handle) => serde_json::to_value(handle),
            Self::ServerStateChange(change) => serde_json::to_value(change),
            Self::ServerProcessCreated(process) | Self::ServerProcessTerminated(process) => {
                serde_json::to_value(process)
            }
        };
        encoded.unwrap_or_else(|e| {
            tracing::error!(error = %e, method = self.method(), "Failed to serialise notification");
            Value::Null
        })
    }

    /// Rebuilds an event from its wire form.
    ///
    /// Returns `Ok(None)` for methods that are not bus events.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters do not match the method.
    pub fn from_parts(method: &str, params: Value) -> Result<Option<Self>, serde_json::Error> {
        let event = match method {
            methods::DISCOVERY_PATH_ADDED => Self::DiscoveryPathAdded(serde_json::from_value(params)?),
            methods::DISCOVERY_PATH_REMOVED => {
                Self::DiscoveryPathRemoved(serde_json::from_value(params)?)
            }
            methods::SERVER_ADDED => Self::ServerAdded(serde_json::from_value(params)?),
            methods::SERVER_REMOVED => Self::ServerRemoved(serde_json::from_value(params)?),
            methods::SERVER_STATE_CHANGE => Self::ServerStateChange(serde_json::from_value(params)?),
            methods::SERVER_PROCESS_CREATED => {
                Self::ServerProcessCreated(serde_json::from_value(params)?)
            }
            methods::SERVER_PROCESS_TERMINATED => {
                Self::ServerProcessTerminated(serde_json::from_value(params)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// Id of the server the event concerns, if any.
    #[must_use]
    pub fn server_id(&self) -> Option<&str> {
        match self {
            Self::DiscoveryPathAdded(_) | Self::DiscoveryPathRemoved(_) => None,
            Self::ServerAdded(handle) | Self::ServerRemoved(handle) => Some(&handle.id),
            Self::ServerStateChange(change) => Some(&change.server.id),
            Self::ServerProcessCreated(process) | Self::ServerProcessTerminated(process) => {
                Some(&process.server.id)
            }
        }
    }
}

/// Multi-subscriber event channel.
#[derive(Debug, Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<Notification>,
}

impl NotificationBus {
    /// Creates a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publishes an event to every current subscriber.
    pub fn publish(&self, event: Notification) {
        if self.sender.receiver_count() > 0 {
            debug!(method = event.method(), server = ?event.server_id(), "Publishing notification");
            let _ = self.sender.send(event);
        }
    }

    /// Subscribes to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            lagged: None,
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's view of the bus.
///
/// A subscriber that falls more than the channel capacity behind has lost
/// events it can never get back, so the subscription ends there: `recv`
/// returns `None` from then on and [`Subscription::lagged`] reports how
/// many events were dropped.
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<Notification>,
    lagged: Option<u64>,
}

impl Subscription {
    /// Receives the next event.
    ///
    /// Returns `None` once the bus is gone or the subscriber lagged.
    pub async fn recv(&mut self) -> Option<Notification> {
        if self.lagged.is_some() {
            return None;
        }
        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => self.end_lagged(missed),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Returns an already-published event without waiting.
    pub fn try_recv(&mut self) -> Option<Notification> {
        if self.lagged.is_some() {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => self.end_lagged(missed),
            Err(_) => None,
        }
    }

    /// Number of events missed, once the subscription ended by lagging.
    #[must_use]
    pub const fn lagged(&self) -> Option<u64> {
        self.lagged
    }

    fn end_lagged(&mut self, missed: u64) -> Option<Notification> {
        warn!(missed, "Notification subscriber lagged behind, ending subscription");
        self.lagged = Some(missed);
        None
    }

    /// Waits for the first event `select` maps to a value.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Timeout`] if nothing matches within `timeout`,
    /// [`WaitError::Lagged`] if events were lost while waiting and
    /// [`WaitError::Closed`] if the bus goes away first.
    pub async fn wait_for<T, F>(&mut self, mut select: F, timeout: Duration) -> Result<T, WaitError>
    where
        F: FnMut(&Notification) -> Option<T>,
    {
        let wait = async {
            while let Some(event) = self.recv().await {
                if let Some(found) = select(&event) {
                    return Ok(found);
                }
            }
            Err(self.lagged.map_or(WaitError::Closed, WaitError::Lagged))
        };

        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or(Err(WaitError::Timeout(timeout)))
    }

    /// Waits until server `id` enters `target`.
    ///
    /// Entering `STOPPED` while waiting for another state ends the wait with
    /// [`WaitError::Interrupted`].
    ///
    /// # Errors
    ///
    /// See [`Subscription::wait_for`].
    pub async fn wait_for_state(
        &mut self,
        id: &str,
        target: ServerState,
        timeout: Duration,
    ) -> Result<ServerStateChange, WaitError> {
        self.wait_for(
            |event| match event {
                Notification::ServerStateChange(change) if change.server.id == id => {
                    if change.state == target {
                        Some(Ok(change.clone()))
                    } else if change.state == ServerState::Stopped {
                        Some(Err(WaitError::Interrupted(change.state)))
                    } else {
                        None
                    }
                }
                _ => None,
            },
            timeout,
        )
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServerType;

    fn handle(id: &str) -> ServerHandle {
        ServerHandle {
            id: id.to_string(),
            server_type: ServerType::new("wildfly", "WildFly", ""),
        }
    }

    fn state_change(id: &str, state: ServerState) -> Notification {
        Notification::ServerStateChange(ServerStateChange {
            server: handle(id),
            state,
        })
    }

    #[tokio::test]
    async fn every_subscriber_receives_event() {
        let bus = NotificationBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(Notification::DiscoveryPathAdded(DiscoveryPath::new("/opt")));

        assert_eq!(
            first.recv().await,
            Some(Notification::DiscoveryPathAdded(DiscoveryPath::new("/opt")))
        );
        assert_eq!(
            second.recv().await,
            Some(Notification::DiscoveryPathAdded(DiscoveryPath::new("/opt")))
        );
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let bus = NotificationBus::new();
        let _keep_alive = bus.subscribe();
        bus.publish(Notification::ServerAdded(handle("a")));

        let mut late = bus.subscribe();
        assert!(late.try_recv().is_none());
    }

    #[tokio::test]
    async fn wait_for_state_skips_other_servers() {
        let bus = NotificationBus::new();
        let mut sub = bus.subscribe();
        bus.publish(state_change("other", ServerState::Started));
        bus.publish(state_change("mine", ServerState::Starting));
        bus.publish(state_change("mine", ServerState::Started));

        let change = sub
            .wait_for_state("mine", ServerState::Started, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(change.server.id, "mine");
    }

    #[tokio::test]
    async fn wait_for_state_reports_interruption() {
        let bus = NotificationBus::new();
        let mut sub = bus.subscribe();
        bus.publish(state_change("mine", ServerState::Starting));
        bus.publish(state_change("mine", ServerState::Stopped));

        let err = sub
            .wait_for_state("mine", ServerState::Started, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, WaitError::Interrupted(ServerState::Stopped));
    }

    #[tokio::test]
    async fn wait_for_times_out() {
        let bus = NotificationBus::new();
        let mut sub = bus.subscribe();
        let err = sub
            .wait_for_state("mine", ServerState::Started, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, WaitError::Timeout(Duration::from_millis(20)));
    }

    #[test]
    fn wire_round_trip_of_state_change() {
        let event = state_change("wf", ServerState::Stopping);
        let rebuilt = Notification::from_parts(event.method(), event.params())
            .unwrap()
            .unwrap();
        assert_eq!(rebuilt, event);
        assert!(Notification::from_parts("client/unknown", Value::Null)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn lagging_subscriber_is_ended() {
        let bus = NotificationBus::new();
        let mut slow = bus.subscribe();
        for n in 0..CHANNEL_CAPACITY + 4 {
            bus.publish(Notification::ServerAdded(handle(&n.to_string())));
        }

        let err = slow
            .wait_for_state("mine", ServerState::Started, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, WaitError::Lagged(4));
        assert_eq!(slow.lagged(), Some(4));

        // Later events are not delivered either
        bus.publish(state_change("mine", ServerState::Started));
        assert!(slow.try_recv().is_none());
    }
}
