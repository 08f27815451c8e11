use std::{
    collections::BTreeMap,
    hash::{Hash, Hasher},
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::sync::{
    Mutex,
    mpsc::{self, error::TrySendError},
};
use tracing::{debug, warn};

pub type ClientId = u64;

/// Writable endpoint of one connected client.
///
/// Cloning a handle does not clone the connection: every clone feeds the same
/// outbox, which the owning session drains into its socket. Two handles are
/// equal when they refer to the same client id.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ClientId,
    outbox: mpsc::Sender<String>,
}

impl ConnectionHandle {
    pub fn new(id: ClientId, outbox: mpsc::Sender<String>) -> Self {
        Self { id, outbox }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    fn enqueue(&self, line: &str) -> Result<(), TrySendError<String>> {
        self.outbox.try_send(line.to_owned())
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl Hash for ConnectionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Set of clients that currently receive broadcasts.
///
/// Every operation runs under one mutex, so a broadcast always sees either all
/// or none of a concurrent register/unregister. Delivery only enqueues into
/// each recipient's outbox and never awaits socket I/O while the lock is held.
pub struct Registry {
    connections: Mutex<BTreeMap<ClientId, ConnectionHandle>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Adds `handle` unless a handle with the same id is already present.
    /// Returns whether it was newly added.
    pub async fn register(&self, handle: ConnectionHandle) -> bool {
        let mut connections = self.connections.lock().await;
        if connections.contains_key(&handle.id) {
            return false;
        }
        connections.insert(handle.id, handle);
        true
    }

    /// Removes `handle` if present. Returns whether anything was removed.
    pub async fn unregister(&self, handle: &ConnectionHandle) -> bool {
        let mut connections = self.connections.lock().await;
        connections.remove(&handle.id).is_some()
    }

    /// Sends `text` to every registered client except `sender`.
    ///
    /// Returns the number of recipients whose outbox accepted the line. A
    /// failed recipient is skipped and stays registered; its own session
    /// notices its broken connection and unregisters itself.
    pub async fn broadcast(&self, sender: &ConnectionHandle, text: &str) -> usize {
        self.deliver_to_others(sender, text).await
    }

    /// Join notifications. Same delivery rules as [`Registry::broadcast`].
    pub async fn announce(&self, sender: &ConnectionHandle, event_text: &str) -> usize {
        self.deliver_to_others(sender, event_text).await
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    pub async fn contains(&self, id: ClientId) -> bool {
        self.connections.lock().await.contains_key(&id)
    }

    async fn deliver_to_others(&self, sender: &ConnectionHandle, line: &str) -> usize {
        let connections = self.connections.lock().await;
        let mut delivered = 0;

        for (id, recipient) in connections.iter() {
            if *id == sender.id {
                continue;
            }
            match recipient.enqueue(line) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(client = id, "outbox full, dropping line for slow client");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(client = id, "outbox closed, client is disconnecting");
                }
            }
        }

        delivered
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn handle(registry: &Registry, capacity: usize) -> (ConnectionHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ConnectionHandle::new(registry.next_id(), tx), rx)
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let registry = Registry::new();
        let (alice, _rx) = handle(&registry, 4);

        assert!(registry.register(alice.clone()).await);
        assert!(!registry.register(alice.clone()).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = Registry::new();
        let (alice, _alice_rx) = handle(&registry, 4);
        let (bob, _bob_rx) = handle(&registry, 4);
        let (never_registered, _rx) = handle(&registry, 4);

        registry.register(alice.clone()).await;
        registry.register(bob.clone()).await;

        assert!(registry.unregister(&alice).await);
        assert!(!registry.unregister(&alice).await);
        assert!(!registry.unregister(&never_registered).await);
        assert!(registry.contains(bob.id()).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn broadcast_skips_sender() {
        let registry = Registry::new();
        let (alice, mut alice_rx) = handle(&registry, 4);
        let (bob, mut bob_rx) = handle(&registry, 4);
        registry.register(alice.clone()).await;
        registry.register(bob.clone()).await;

        let delivered = registry.broadcast(&bob, "bob: hi").await;

        assert_eq!(delivered, 1);
        assert_eq!(alice_rx.try_recv().expect("alice line"), "bob: hi");
        assert!(alice_rx.try_recv().is_err());
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn announce_reaches_everyone_but_the_joiner() {
        let registry = Registry::new();
        let (alice, mut alice_rx) = handle(&registry, 4);
        let (bob, mut bob_rx) = handle(&registry, 4);
        let (carol, mut carol_rx) = handle(&registry, 4);
        for h in [&alice, &bob, &carol] {
            registry.register(h.clone()).await;
        }

        assert_eq!(registry.announce(&carol, "carol joined the chat").await, 2);

        assert_eq!(alice_rx.try_recv().expect("alice"), "carol joined the chat");
        assert_eq!(bob_rx.try_recv().expect("bob"), "carol joined the chat");
        assert!(carol_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_recipient_does_not_stop_delivery() {
        let registry = Registry::new();
        let (sender, _sender_rx) = handle(&registry, 4);
        let (gone, gone_rx) = handle(&registry, 4);
        let (slow, mut slow_rx) = handle(&registry, 1);
        let (healthy, mut healthy_rx) = handle(&registry, 4);
        for h in [&sender, &gone, &slow, &healthy] {
            registry.register(h.clone()).await;
        }
        drop(gone_rx);

        assert_eq!(registry.broadcast(&sender, "first").await, 2);
        assert_eq!(registry.broadcast(&sender, "second").await, 1);

        assert_eq!(slow_rx.try_recv().expect("slow first"), "first");
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(healthy_rx.try_recv().expect("healthy first"), "first");
        assert_eq!(healthy_rx.try_recv().expect("healthy second"), "second");
        // Failing recipients stay registered until their own session leaves.
        assert!(registry.contains(gone.id()).await);
        assert!(registry.contains(slow.id()).await);
    }

    #[tokio::test]
    async fn recipients_see_messages_in_broadcast_order() {
        let registry = Registry::new();
        let (alice, _alice_rx) = handle(&registry, 8);
        let (bob, _bob_rx) = handle(&registry, 8);
        let (carol, mut carol_rx) = handle(&registry, 8);
        for h in [&alice, &bob, &carol] {
            registry.register(h.clone()).await;
        }

        registry.broadcast(&alice, "alice: 1").await;
        registry.broadcast(&bob, "bob: 1").await;
        registry.broadcast(&alice, "alice: 2").await;

        let received: Vec<String> = std::iter::from_fn(|| carol_rx.try_recv().ok()).collect();
        assert_eq!(received, ["alice: 1", "bob: 1", "alice: 2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_are_all_kept() {
        let registry = Arc::new(Registry::new());
        let mut tasks = Vec::new();

        for _ in 0..64 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let (tx, rx) = mpsc::channel(1);
                let handle = ConnectionHandle::new(registry.next_id(), tx);
                assert!(registry.register(handle).await);
                rx
            }));
        }

        let mut receivers = Vec::new();
        for task in tasks {
            receivers.push(task.await.expect("registration task"));
        }

        assert_eq!(registry.len().await, 64);
    }
}
