//! In-process publish/subscribe fabric keyed by message id.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use steamcm_proto::Packet;
use tokio::sync::{oneshot, Mutex};

use crate::error::Error;

/// A registered callback invoked inline on the emitting task.
pub type Callback = Arc<dyn Fn(&Packet) + Send + Sync>;

/// A predicate used to filter which packet satisfies a [`EventBus::wait_for`] call.
pub type Predicate = Arc<dyn Fn(&Packet) -> bool + Send + Sync>;

/// Opaque handle returned by [`EventBus::on`], passed back to [`EventBus::off`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

enum Kind {
    Sync(Callback),
    OneShot(Arc<StdMutex<Option<(oneshot::Sender<Packet>, Option<Predicate>)>>>),
}

impl Clone for Kind {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(cb) => Self::Sync(cb.clone()),
            Self::OneShot(state) => Self::OneShot(state.clone()),
        }
    }
}

#[derive(Clone)]
struct Entry {
    id: SubscriptionId,
    kind: Kind,
}

/// Topic = message id. Subscribers are invoked in registration order;
/// dispatch snapshots the subscriber list first so a callback may safely
/// remove itself (the common `wait_for` pattern).
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<u32, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self { subscribers: Mutex::new(HashMap::new()), next_id: AtomicU64::new(0) }
    }

    fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a callback invoked inline, on the caller's task, for every
    /// packet emitted on `topic`.
    pub async fn on(&self, topic: u32, callback: impl Fn(&Packet) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.allocate_id();
        let mut subscribers = self.subscribers.lock().await;
        subscribers.entry(topic).or_default().push(Entry { id, kind: Kind::Sync(Arc::new(callback)) });
        id
    }

    /// Best-effort removal. A missing id is a no-op.
    pub async fn off(&self, topic: u32, id: SubscriptionId) {
        let mut subscribers = self.subscribers.lock().await;
        if let Some(list) = subscribers.get_mut(&topic) {
            list.retain(|entry| entry.id != id);
        }
    }

    /// Invoke every subscriber registered on `topic` with `packet`, in
    /// registration order. A panicking synchronous subscriber is caught and
    /// logged; it does not prevent later subscribers from running.
    pub async fn emit(&self, topic: u32, packet: &Packet) {
        let snapshot = {
            let subscribers = self.subscribers.lock().await;
            subscribers.get(&topic).cloned().unwrap_or_default()
        };

        for entry in snapshot {
            match entry.kind {
                Kind::Sync(callback) => {
                    if std::panic::catch_unwind(AssertUnwindSafe(|| callback(packet))).is_err() {
                        tracing::error!(topic, "event bus subscriber panicked");
                    }
                }
                Kind::OneShot(state) => {
                    let mut guard = state.lock().expect("event bus state mutex is never poisoned");
                    if let Some((sender, predicate)) = guard.take() {
                        let matches = predicate.as_ref().map_or(true, |p| p(packet));
                        if matches {
                            let _ = sender.send(packet.clone());
                        } else {
                            *guard = Some((sender, predicate));
                        }
                    }
                }
            }
        }
    }

    /// Install a single-shot subscriber and await the first packet on
    /// `topic` that satisfies `predicate` (if any), or [`Error::Timeout`]
    /// after `timeout` elapses. Either way, the subscriber is removed
    /// before this call returns.
    pub async fn wait_for(&self, topic: u32, timeout: Duration, predicate: Option<Predicate>) -> Result<Packet, Error> {
        let id = self.allocate_id();
        let (tx, rx) = oneshot::channel();
        let state = Arc::new(StdMutex::new(Some((tx, predicate))));

        {
            let mut subscribers = self.subscribers.lock().await;
            subscribers.entry(topic).or_default().push(Entry { id, kind: Kind::OneShot(state) });
        }

        let result = tokio::time::timeout(timeout, rx).await;

        {
            let mut subscribers = self.subscribers.lock().await;
            if let Some(list) = subscribers.get_mut(&topic) {
                list.retain(|entry| entry.id != id);
            }
        }

        match result {
            Ok(Ok(packet)) => Ok(packet),
            Ok(Err(_)) | Err(_) => Err(Error::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use steamcm_proto::header::LegacyHeader;
    use steamcm_proto::packet::Header;

    fn sample_packet(message_id: u32) -> Packet {
        Packet {
            message_id,
            is_protobuf: false,
            header: Header::Legacy(LegacyHeader::new(message_id)),
            body: Vec::new(),
        }
    }

    #[tokio::test]
    async fn emits_to_subscribers_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(StdMutex::new(Vec::new()));

        let o1 = order.clone();
        bus.on(1, move |_| o1.lock().unwrap().push(1)).await;
        let o2 = order.clone();
        bus.on(1, move |_| o2.lock().unwrap().push(2)).await;

        bus.emit(1, &sample_packet(1)).await;
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn off_removes_a_subscriber() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let id = bus.on(1, move |_| { c.fetch_add(1, Ordering::SeqCst); }).await;

        bus.off(1, id).await;
        bus.emit(1, &sample_packet(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn off_on_missing_id_is_a_no_op() {
        let bus = EventBus::new();
        bus.off(42, SubscriptionId(999)).await;
    }

    #[tokio::test]
    async fn a_panicking_subscriber_does_not_prevent_later_ones() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        bus.on(1, |_| panic!("boom")).await;
        let c = calls.clone();
        bus.on(1, move |_| { c.fetch_add(1, Ordering::SeqCst); }).await;

        bus.emit(1, &sample_packet(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wait_for_resolves_on_matching_packet() {
        let bus = Arc::new(EventBus::new());
        let waiter = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.wait_for(7, Duration::from_secs(1), None).await })
        };
        tokio::task::yield_now().await;
        bus.emit(7, &sample_packet(7)).await;
        let packet = waiter.await.unwrap().unwrap();
        assert_eq!(packet.message_id, 7);
    }

    #[tokio::test]
    async fn wait_for_times_out_and_clears_the_subscriber_list() {
        let bus = EventBus::new();
        let result = bus.wait_for(99, Duration::from_millis(20), None).await;
        assert!(matches!(result, Err(Error::Timeout)));

        let subscribers = bus.subscribers.lock().await;
        assert!(subscribers.get(&99).map_or(true, |v| v.is_empty()));
    }
}
