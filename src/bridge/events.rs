use crate::bridge::channels::{Channel, ChannelKind};
use crate::bridge::messages::HostEvent;
use crate::error::AppError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

/// Handle the registries use to publish events.
pub type EventSender = UnboundedSender<HostEvent>;
pub type ListenerId = u64;

struct Listener {
    id: ListenerId,
    names: Vec<Channel>,
    tx: UnboundedSender<HostEvent>,
}

/// Fans every published `HostEvent` out to the listeners registered for its
/// name. A single pump task drains the shared queue, so each listener sees
/// events in publication order.
pub struct EventHub {
    tx: EventSender,
    listeners: Arc<Mutex<Vec<Listener>>>,
    next_id: AtomicU64,
}

impl EventHub {
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let listeners = Arc::new(Mutex::new(Vec::new()));
        tokio::spawn(pump(rx, listeners.clone()));
        Self { tx, listeners, next_id: AtomicU64::new(1) }
    }

    pub fn sender(&self) -> EventSender {
        self.tx.clone()
    }

    pub fn on(&self, name: Channel) -> Result<(ListenerId, UnboundedReceiver<HostEvent>), AppError> {
        self.subscribe(&[name])
    }

    /// One receiver for several event names, keeping their relative order.
    pub fn subscribe(&self, names: &[Channel]) -> Result<(ListenerId, UnboundedReceiver<HostEvent>), AppError> {
        if let Some(bad) = names.iter().find(|c| c.kind() != ChannelKind::Event) {
            return Err(AppError::InvalidInputArgument(format!("{} is not an event channel", bad)));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Listener { id, names: names.to_vec(), tx });
        debug!(listener_id = id, names = ?names, "Event listener registered");
        Ok((id, rx))
    }

    /// Stops delivering `name` to listener `id`. Returns false if it was not registered for it.
    pub fn off(&self, name: Channel, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(pos) = listeners.iter().position(|l| l.id == id) else {
            return false;
        };
        let before = listeners[pos].names.len();
        listeners[pos].names.retain(|n| *n != name);
        let removed = listeners[pos].names.len() != before;
        if listeners[pos].names.is_empty() {
            listeners.remove(pos);
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

async fn pump(mut rx: UnboundedReceiver<HostEvent>, listeners: Arc<Mutex<Vec<Listener>>>) {
    while let Some(event) = rx.recv().await {
        let name = event.channel();
        let mut listeners = listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|l| !l.tx.is_closed());
        let mut delivered = 0usize;
        for listener in listeners.iter().filter(|l| l.names.contains(&name)) {
            if listener.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        trace!(event = %name, delivered, "Event dispatched");
    }
    debug!("Event hub pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next(rx: &mut UnboundedReceiver<HostEvent>) -> Option<HostEvent> {
        timeout(Duration::from_millis(500), rx.recv()).await.ok().flatten()
    }

    #[tokio::test]
    async fn delivers_only_subscribed_names() {
        let hub = EventHub::new();
        let (_, mut terminal_rx) = hub.on(Channel::TerminalData).unwrap();
        let (_, mut runner_rx) = hub.on(Channel::RunnerExit).unwrap();

        let tx = hub.sender();
        tx.send(HostEvent::TerminalData { session_id: 1, chunk: "hi".into() }).unwrap();
        tx.send(HostEvent::RunnerExit { pid: 42, exit_code: 0 }).unwrap();

        assert_eq!(
            next(&mut terminal_rx).await,
            Some(HostEvent::TerminalData { session_id: 1, chunk: "hi".into() })
        );
        assert_eq!(next(&mut runner_rx).await, Some(HostEvent::RunnerExit { pid: 42, exit_code: 0 }));
        assert!(timeout(Duration::from_millis(50), terminal_rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn multi_name_subscription_keeps_order() {
        let hub = EventHub::new();
        let (_, mut rx) = hub.subscribe(&Channel::EVENTS).unwrap();
        let tx = hub.sender();
        tx.send(HostEvent::TerminalData { session_id: 2, chunk: "a".into() }).unwrap();
        tx.send(HostEvent::TerminalData { session_id: 2, chunk: "b".into() }).unwrap();
        tx.send(HostEvent::TerminalExit { session_id: 2, exit_code: 0 }).unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(next(&mut rx).await.unwrap());
        }
        assert!(matches!(seen[2], HostEvent::TerminalExit { .. }));
        assert_eq!(seen[0], HostEvent::TerminalData { session_id: 2, chunk: "a".into() });
    }

    #[tokio::test]
    async fn off_and_dropped_receivers_are_removed() {
        let hub = EventHub::new();
        let (id, _rx) = hub.on(Channel::RunnerData).unwrap();
        let (_, dropped) = hub.on(Channel::RunnerData).unwrap();
        assert_eq!(hub.listener_count(), 2);

        assert!(hub.off(Channel::RunnerData, id));
        assert!(!hub.off(Channel::RunnerData, id));
        assert_eq!(hub.listener_count(), 1);

        drop(dropped);
        hub.sender().send(HostEvent::RunnerData { pid: 1, chunk: "x".into() }).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hub.listener_count(), 0);
    }

    #[tokio::test]
    async fn rejects_non_event_names() {
        let hub = EventHub::new();
        assert!(hub.on(Channel::ReadFile).is_err());
    }
}
