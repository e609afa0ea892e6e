use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, RwLock, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use tether_types::events::GatewayEvent;
use tether_types::models::UserId;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

type Connections = HashMap<UserId, HashMap<Uuid, mpsc::Sender<GatewayEvent>>>;

/// Routes events to every live connection of a user.
///
/// Each connection owns a bounded queue. A connection that falls a full
/// queue behind is cut off: its sender is dropped, the stream ends after
/// draining, and the client has to resubscribe and refetch.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// user_id -> (conn_id -> queue)
    connections: RwLock<Connections>,
    queue_capacity: usize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl Dispatcher {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                connections: RwLock::new(HashMap::new()),
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    /// Register a new connection for `user_id`. Dropping the returned
    /// subscription unregisters it.
    pub fn subscribe(&self, user_id: UserId) -> Subscription {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);

        match self.inner.connections.write() {
            Ok(mut connections) => {
                connections.entry(user_id).or_default().insert(conn_id, tx);
            }
            Err(e) => warn!("Dispatcher lock poisoned, subscription for {} is inert: {}", user_id, e),
        }
        debug!("{} subscribed (conn {})", user_id, conn_id);

        Subscription {
            user_id,
            conn_id,
            rx,
            dispatcher: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every live connection of each recipient. Returns
    /// how many connections accepted it.
    pub fn publish<I>(&self, recipients: I, event: &GatewayEvent) -> usize
    where
        I: IntoIterator<Item = UserId>,
    {
        recipients
            .into_iter()
            .map(|user_id| self.send_to_user(user_id, event.clone()))
            .sum()
    }

    /// Deliver `event` to one user's connections.
    pub fn send_to_user(&self, user_id: UserId, event: GatewayEvent) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        {
            let Ok(connections) = self.inner.connections.read() else {
                return 0;
            };
            let Some(queues) = connections.get(&user_id) else {
                return 0;
            };
            for (conn_id, tx) in queues {
                match tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!("Queue full for {} (conn {}), dropping connection", user_id, conn_id);
                        dead.push(*conn_id);
                    }
                    Err(TrySendError::Closed(_)) => dead.push(*conn_id),
                }
            }
        }

        for conn_id in dead {
            self.inner.remove(user_id, conn_id);
        }
        delivered
    }

    pub fn connection_count(&self, user_id: UserId) -> usize {
        self.inner
            .connections
            .read()
            .map(|c| c.get(&user_id).map_or(0, HashMap::len))
            .unwrap_or(0)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.inner
            .connections
            .read()
            .map(|c| c.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl DispatcherInner {
    fn remove(&self, user_id: UserId, conn_id: Uuid) {
        let Ok(mut connections) = self.connections.write() else {
            return;
        };
        if let Some(queues) = connections.get_mut(&user_id) {
            queues.remove(&conn_id);
            if queues.is_empty() {
                connections.remove(&user_id);
            }
        }
    }
}

/// One live connection's event stream.
pub struct Subscription {
    user_id: UserId,
    conn_id: Uuid,
    rx: mpsc::Receiver<GatewayEvent>,
    dispatcher: Weak<DispatcherInner>,
}

impl Subscription {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }
}

impl Stream for Subscription {
    type Item = GatewayEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.dispatcher.upgrade() {
            inner.remove(self.user_id, self.conn_id);
            debug!("{} unsubscribed (conn {})", self.user_id, self.conn_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn created(conversation_id: Uuid) -> GatewayEvent {
        GatewayEvent::ConversationCreate { conversation_id }
    }

    #[tokio::test]
    async fn every_tab_of_a_user_receives_the_event() {
        let dispatcher = Dispatcher::default();
        let user = Uuid::new_v4();
        let mut tab_a = dispatcher.subscribe(user);
        let mut tab_b = dispatcher.subscribe(user);
        let event = created(Uuid::new_v4());

        assert_eq!(dispatcher.publish([user], &event), 2);
        assert_eq!(tab_a.next().await, Some(event.clone()));
        assert_eq!(tab_b.next().await, Some(event));
    }

    #[tokio::test]
    async fn publish_skips_users_without_connections() {
        let dispatcher = Dispatcher::default();
        let online = Uuid::new_v4();
        let _sub = dispatcher.subscribe(online);

        let delivered = dispatcher.publish([online, Uuid::new_v4()], &created(Uuid::new_v4()));
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn dropping_a_subscription_unregisters_it() {
        let dispatcher = Dispatcher::default();
        let user = Uuid::new_v4();

        let first = dispatcher.subscribe(user);
        let second = dispatcher.subscribe(user);
        assert_eq!(dispatcher.connection_count(user), 2);

        drop(first);
        assert_eq!(dispatcher.connection_count(user), 1);
        drop(second);
        assert!(dispatcher.online_users().is_empty());
    }

    #[tokio::test]
    async fn full_queue_drops_only_the_slow_connection() {
        let dispatcher = Dispatcher::new(2);
        let user = Uuid::new_v4();
        let mut slow = dispatcher.subscribe(user);
        let mut fast = dispatcher.subscribe(user);

        for _ in 0..2 {
            dispatcher.send_to_user(user, created(Uuid::new_v4()));
            fast.next().await;
        }
        // `slow` never read; this one overflows it.
        assert_eq!(dispatcher.send_to_user(user, created(Uuid::new_v4())), 1);
        assert_eq!(dispatcher.connection_count(user), 1);

        // Buffered events drain, then the stream ends.
        assert!(slow.next().await.is_some());
        assert!(slow.next().await.is_some());
        assert_eq!(slow.next().await, None);
        assert!(fast.next().await.is_some());
    }
}
