//! Lifecycle and data notifications for link consumers.
//!
//! Notifications run on whatever task produced them: `connected` on the
//! caller of `connect()`, `data` on the receive task. Handlers must return
//! quickly; anything slow belongs behind [`event_channel`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::structures::DisconnectReason;

pub trait LinkListener: Send + Sync {
    fn on_connected(&self) {}

    fn on_disconnected(&self, _reason: DisconnectReason) {}

    /// `data` is the link's receive buffer and is overwritten by the next
    /// read, so it is only lent for the duration of the call.
    fn on_data(&self, _data: &[u8]) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct Notifier {
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn LinkListener>)>>,
    next_id: AtomicU64,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn LinkListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn connected(&self) {
        for l in self.snapshot() {
            l.on_connected();
        }
    }

    pub fn disconnected(&self, reason: DisconnectReason) {
        for l in self.snapshot() {
            l.on_disconnected(reason);
        }
    }

    pub fn data(&self, data: &[u8]) {
        for l in self.snapshot() {
            l.on_data(data);
        }
    }

    // Handlers may (un)subscribe from inside a callback, so never dispatch under the lock
    fn snapshot(&self) -> Vec<Arc<dyn LinkListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| l.clone())
            .collect()
    }
}

/// Owned copy of a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected(DisconnectReason),
    Data(Vec<u8>),
}

/// Listener that copies every notification into an unbounded channel, so the
/// consumer can handle events on its own task without stalling the receive loop.
pub struct ChannelListener {
    tx: UnboundedSender<LinkEvent>,
}

impl LinkListener for ChannelListener {
    fn on_connected(&self) {
        let _ = self.tx.send(LinkEvent::Connected);
    }

    fn on_disconnected(&self, reason: DisconnectReason) {
        let _ = self.tx.send(LinkEvent::Disconnected(reason));
    }

    fn on_data(&self, data: &[u8]) {
        let _ = self.tx.send(LinkEvent::Data(data.to_vec()));
    }
}

pub fn event_channel() -> (Arc<ChannelListener>, UnboundedReceiver<LinkEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelListener { tx }), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl LinkListener for Recorder {
        fn on_connected(&self) {
            self.seen.lock().unwrap().push("connected".into());
        }
        fn on_disconnected(&self, reason: DisconnectReason) {
            self.seen.lock().unwrap().push(format!("disconnected:{reason}"));
        }
        fn on_data(&self, data: &[u8]) {
            self.seen.lock().unwrap().push(format!("data:{}", data.len()));
        }
    }

    #[test]
    fn every_listener_sees_events_in_order() {
        let n = Notifier::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        n.subscribe(a.clone());
        n.subscribe(b.clone());

        n.connected();
        n.data(&[1, 2, 3]);
        n.data(&[4]);
        n.disconnected(DisconnectReason::PeerReset);

        let expected = vec!["connected", "data:3", "data:1", "disconnected:peer_reset"];
        assert_eq!(*a.seen.lock().unwrap(), expected);
        assert_eq!(*b.seen.lock().unwrap(), expected);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let n = Notifier::new();
        let a = Arc::new(Recorder::default());
        let id = n.subscribe(a.clone());
        n.connected();
        assert!(n.unsubscribe(id));
        assert!(!n.unsubscribe(id));
        n.data(b"x");
        assert_eq!(*a.seen.lock().unwrap(), vec!["connected"]);
        assert_eq!(n.listener_count(), 0);
    }

    struct SelfRemoving {
        notifier: Arc<Notifier>,
        id: Mutex<Option<SubscriptionId>>,
    }

    impl LinkListener for SelfRemoving {
        fn on_connected(&self) {
            if let Some(id) = self.id.lock().unwrap().take() {
                self.notifier.unsubscribe(id);
            }
        }
    }

    #[test]
    fn listener_can_unsubscribe_inside_callback() {
        let n = Arc::new(Notifier::new());
        let l = Arc::new(SelfRemoving { notifier: n.clone(), id: Mutex::new(None) });
        let id = n.subscribe(l.clone());
        *l.id.lock().unwrap() = Some(id);
        n.connected();
        assert_eq!(n.listener_count(), 0);
    }

    #[tokio::test]
    async fn channel_listener_copies_payload() {
        let n = Notifier::new();
        let (listener, mut events) = event_channel();
        n.subscribe(listener);

        let mut buf = *b"abc";
        n.data(&buf);
        buf.copy_from_slice(b"zzz");

        assert_eq!(events.recv().await, Some(LinkEvent::Data(b"abc".to_vec())));
    }
}
