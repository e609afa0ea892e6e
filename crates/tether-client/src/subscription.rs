use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_types::models::{ConversationSummary, UserId};

use crate::conversation_list::{ApplyOutcome, ConversationList};
use crate::transport::{ConversationFetcher, EventSource};

/// Reconnect behaviour.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Delay before the first retry; doubles per consecutive failure.
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Consecutive failures after which the list is reported stale.
    /// Retrying continues regardless.
    pub max_attempts: u32,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl SubscriptionConfig {
    fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1 << exp).min(self.backoff_max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Not started, or stopped.
    Idle,
    Connecting,
    /// Connected and the list was refetched on this connection.
    Live,
    Reconnecting { attempt: u32 },
    /// Repeated failures; the list may be out of date.
    Stale { attempts: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("realtime channel failed: {0}")]
    Transient(String),

    #[error("conversation list may be stale after {attempts} failed attempts")]
    Stale { attempts: u32 },
}

struct Running {
    user_id: UserId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Keeps a user's conversation list in sync for the length of a session.
///
/// `start` is called at login and `stop` at logout. While running, every
/// (re)connect is followed by a full refetch so events missed while
/// disconnected cannot leave the list behind.
pub struct SubscriptionManager<S, F> {
    source: Arc<S>,
    fetcher: Arc<F>,
    config: SubscriptionConfig,
    list: Arc<RwLock<ConversationList>>,
    status_tx: Arc<watch::Sender<SyncStatus>>,
    running: Mutex<Option<Running>>,
}

impl<S, F> SubscriptionManager<S, F>
where
    S: EventSource,
    F: ConversationFetcher,
{
    pub fn new(source: S, fetcher: F, config: SubscriptionConfig) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::Idle);
        Self {
            source: Arc::new(source),
            fetcher: Arc::new(fetcher),
            config,
            list: Arc::new(RwLock::new(ConversationList::new(UserId::nil()))),
            status_tx: Arc::new(status_tx),
            running: Mutex::new(None),
        }
    }

    /// Begin syncing for `user_id`. A session already running for another
    /// user is stopped first; for the same user this is a no-op.
    pub async fn start(&self, user_id: UserId) {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            if current.user_id == user_id && !current.task.is_finished() {
                return;
            }
        }
        if let Some(previous) = running.take() {
            shutdown(previous).await;
        }

        *write_list(&self.list) = ConversationList::new(user_id);
        self.status_tx.send_replace(SyncStatus::Connecting);

        let cancel = CancellationToken::new();
        let worker = Worker {
            user_id,
            source: Arc::clone(&self.source),
            fetcher: Arc::clone(&self.fetcher),
            config: self.config.clone(),
            list: Arc::clone(&self.list),
            status_tx: Arc::clone(&self.status_tx),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run());

        info!("Subscription started for {}", user_id);
        *running = Some(Running { user_id, cancel, task });
    }

    /// Cancel the session and release its connection.
    pub async fn stop(&self) {
        let Some(previous) = self.running.lock().await.take() else {
            return;
        };
        let user_id = previous.user_id;
        shutdown(previous).await;

        *write_list(&self.list) = ConversationList::new(UserId::nil());
        self.status_tx.send_replace(SyncStatus::Idle);
        info!("Subscription stopped for {}", user_id);
    }

    pub fn status(&self) -> SyncStatus {
        self.status_tx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// `Err(Stale)` while the list cannot be trusted.
    pub fn health(&self) -> Result<(), SubscriptionError> {
        match self.status() {
            SyncStatus::Stale { attempts } => Err(SubscriptionError::Stale { attempts }),
            _ => Ok(()),
        }
    }

    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.list
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries()
            .to_vec()
    }
}

async fn shutdown(running: Running) {
    running.cancel.cancel();
    if let Err(e) = running.task.await {
        if !e.is_cancelled() {
            warn!("Subscription task for {} ended abnormally: {}", running.user_id, e);
        }
    }
}

fn write_list(list: &RwLock<ConversationList>) -> RwLockWriteGuard<'_, ConversationList> {
    list.write().unwrap_or_else(PoisonError::into_inner)
}

struct Worker<S, F> {
    user_id: UserId,
    source: Arc<S>,
    fetcher: Arc<F>,
    config: SubscriptionConfig,
    list: Arc<RwLock<ConversationList>>,
    status_tx: Arc<watch::Sender<SyncStatus>>,
    cancel: CancellationToken,
}

impl<S, F> Worker<S, F>
where
    S: EventSource,
    F: ConversationFetcher,
{
    async fn run(self) {
        let mut failures: u32 = 0;

        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.session() => result,
            };

            match result {
                // Was live, then lost the channel.
                Ok(()) => failures = 1,
                Err(e) => {
                    failures += 1;
                    warn!("Subscription for {} failed (attempt {}): {}", self.user_id, failures, e);
                }
            }

            let status = if failures >= self.config.max_attempts {
                SyncStatus::Stale { attempts: failures }
            } else {
                SyncStatus::Reconnecting { attempt: failures }
            };
            self.status_tx.send_replace(status);

            let delay = self.config.backoff(failures);
            debug!("Reconnecting {} in {:?}", self.user_id, delay);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }
    }

    /// One connection: open, refetch, apply events until the stream ends.
    async fn session(&self) -> Result<(), SubscriptionError> {
        let mut events = self
            .source
            .connect(self.user_id)
            .await
            .map_err(|e| SubscriptionError::Transient(format!("{:#}", e)))?;

        // Refetch after connecting so nothing published in between is missed.
        self.refetch().await?;
        self.status_tx.send_replace(SyncStatus::Live);

        while let Some(event) = events.next().await {
            let outcome = write_list(&self.list).apply(&event);
            if outcome == ApplyOutcome::NeedsRefetch {
                debug!("Unknown conversation in {:?}, refetching", event.conversation_id());
                self.refetch().await?;
            }
        }

        warn!("Event stream for {} ended", self.user_id);
        Ok(())
    }

    async fn refetch(&self) -> Result<(), SubscriptionError> {
        let fresh = self
            .fetcher
            .fetch_conversations(self.user_id)
            .await
            .map_err(|e| SubscriptionError::Transient(format!("refetch failed: {:#}", e)))?;
        write_list(&self.list).replace_all(fresh);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use chrono::Utc;
    use futures_util::stream::{self, BoxStream};
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use uuid::Uuid;

    use tether_types::events::GatewayEvent;

    use crate::testing::{message, summary};

    /// Hands out queued channels; connects fail once the queue is empty.
    #[derive(Default)]
    struct FakeSource {
        sessions: StdMutex<VecDeque<mpsc::UnboundedReceiver<GatewayEvent>>>,
        connects: AtomicUsize,
    }

    impl FakeSource {
        fn push_session(&self) -> mpsc::UnboundedSender<GatewayEvent> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.sessions.lock().unwrap().push_back(rx);
            tx
        }
    }

    impl EventSource for Arc<FakeSource> {
        async fn connect(&self, _user_id: UserId) -> anyhow::Result<BoxStream<'static, GatewayEvent>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let rx = self
                .sessions
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("connection refused"))?;
            Ok(stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|e| (e, rx)) }).boxed())
        }
    }

    #[derive(Default)]
    struct FakeFetcher {
        snapshot: StdMutex<Vec<ConversationSummary>>,
        calls: AtomicUsize,
    }

    impl ConversationFetcher for Arc<FakeFetcher> {
        async fn fetch_conversations(&self, _user_id: UserId) -> anyhow::Result<Vec<ConversationSummary>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.snapshot.lock().unwrap().clone())
        }
    }

    fn fast_config(max_attempts: u32) -> SubscriptionConfig {
        SubscriptionConfig {
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
            max_attempts,
        }
    }

    async fn wait_for(rx: &mut watch::Receiver<SyncStatus>, pred: impl FnMut(&SyncStatus) -> bool) {
        timeout(Duration::from_secs(5), rx.wait_for(pred))
            .await
            .expect("status not reached in time")
            .expect("status channel closed");
    }

    #[tokio::test]
    async fn refetches_on_every_reconnect() {
        let source = Arc::new(FakeSource::default());
        let fetcher = Arc::new(FakeFetcher::default());
        let first = source.push_session();
        let second = source.push_session();

        let manager = SubscriptionManager::new(source.clone(), fetcher.clone(), fast_config(5));
        let mut status = manager.watch_status();
        let me = Uuid::new_v4();
        manager.start(me).await;
        wait_for(&mut status, |s| *s == SyncStatus::Live).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        // A conversation appears server-side while the channel drops.
        let conv = summary(Utc::now());
        fetcher.snapshot.lock().unwrap().push(conv.clone());
        drop(first);

        wait_for(&mut status, |s| matches!(s, SyncStatus::Reconnecting { .. })).await;
        wait_for(&mut status, |s| *s == SyncStatus::Live).await;
        assert_eq!(source.connects.load(Ordering::SeqCst), 2);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.conversations(), vec![conv.clone()]);

        // Events on the new channel apply to the refetched list.
        let incoming = message(conv.conversation.id, Uuid::new_v4(), 1, Utc::now());
        second
            .send(GatewayEvent::MessageCreate { message: incoming.clone(), notify: true })
            .unwrap();
        timeout(Duration::from_secs(5), async {
            while manager.conversations()[0].last_message.as_ref() != Some(&incoming) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        manager.stop().await;
    }

    #[tokio::test]
    async fn unknown_conversation_triggers_refetch() {
        let source = Arc::new(FakeSource::default());
        let fetcher = Arc::new(FakeFetcher::default());
        let channel = source.push_session();

        let manager = SubscriptionManager::new(source.clone(), fetcher.clone(), fast_config(5));
        let mut status = manager.watch_status();
        manager.start(Uuid::new_v4()).await;
        wait_for(&mut status, |s| *s == SyncStatus::Live).await;

        let conv = summary(Utc::now());
        fetcher.snapshot.lock().unwrap().push(conv.clone());
        channel
            .send(GatewayEvent::ConversationCreate { conversation_id: conv.conversation.id })
            .unwrap();

        timeout(Duration::from_secs(5), async {
            while fetcher.calls.load(Ordering::SeqCst) < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(source.connects.load(Ordering::SeqCst), 1);

        manager.stop().await;
    }

    #[tokio::test]
    async fn repeated_failures_report_stale_and_keep_retrying() {
        let source = Arc::new(FakeSource::default());
        let fetcher = Arc::new(FakeFetcher::default());

        let manager = SubscriptionManager::new(source.clone(), fetcher.clone(), fast_config(3));
        let mut status = manager.watch_status();
        manager.start(Uuid::new_v4()).await;

        wait_for(&mut status, |s| matches!(s, SyncStatus::Stale { .. })).await;
        assert!(matches!(manager.health(), Err(SubscriptionError::Stale { attempts }) if attempts >= 3));

        // Once the server is reachable again the list recovers.
        let _channel = source.push_session();
        wait_for(&mut status, |s| *s == SyncStatus::Live).await;
        assert!(manager.health().is_ok());

        manager.stop().await;
    }

    #[tokio::test]
    async fn stop_releases_the_connection() {
        let source = Arc::new(FakeSource::default());
        let fetcher = Arc::new(FakeFetcher::default());
        let channel = source.push_session();

        let manager = SubscriptionManager::new(source.clone(), fetcher, fast_config(5));
        let mut status = manager.watch_status();
        manager.start(Uuid::new_v4()).await;
        wait_for(&mut status, |s| *s == SyncStatus::Live).await;

        manager.stop().await;
        assert_eq!(manager.status(), SyncStatus::Idle);
        assert!(channel.is_closed());
        assert!(manager.conversations().is_empty());
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let config = SubscriptionConfig {
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(1),
            max_attempts: 5,
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(4), Duration::from_millis(800));
        assert_eq!(config.backoff(5), Duration::from_secs(1));
        assert_eq!(config.backoff(40), Duration::from_secs(1));
    }
}
