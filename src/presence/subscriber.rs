//! Supervised presence feed.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::types::{PresenceEvent, PresenceStatus, SubscriberState, UserStatus};
use crate::config::PresenceConfig;
use crate::gateway::{PresenceStream, RpcGateway, UserId};
use crate::session::{self, SessionManager};

/// Identifies a registered presence listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Receiving end of a presence listener.
///
/// Yields events in arrival order. Ends once the listener is removed with
/// [`PresenceSubscriber::unlisten`] and every queued event was read.
#[derive(Debug)]
pub struct PresenceListener {
    id: ListenerId,
    receiver: mpsc::UnboundedReceiver<PresenceEvent>,
}

impl PresenceListener {
    /// Returns the id to pass to [`PresenceSubscriber::unlisten`].
    #[must_use]
    pub const fn id(&self) -> ListenerId {
        self.id
    }

    /// Waits for the next event.
    pub async fn recv(&mut self) -> Option<PresenceEvent> {
        self.receiver.recv().await
    }

    /// Returns a queued event without waiting.
    pub fn try_recv(&mut self) -> Option<PresenceEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for PresenceListener {
    type Item = PresenceEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Epoch and supervisor task of the current subscription.
///
/// The epoch is bumped by every `start` and `stop`. A supervisor only
/// writes state while its epoch is current.
#[derive(Default)]
struct Control {
    epoch: u64,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    senders: Vec<(ListenerId, mpsc::UnboundedSender<PresenceEvent>)>,
}

struct Inner {
    session: Arc<SessionManager>,
    gateway: Arc<dyn RpcGateway>,
    config: PresenceConfig,
    state: watch::Sender<SubscriberState>,
    control: Mutex<Control>,
    cache: RwLock<HashMap<UserId, PresenceStatus>>,
    listeners: Mutex<Listeners>,
}

/// Keeps one server-streamed presence feed open.
///
/// The feed is opened through the session's authenticated-call wrapper.
/// When it breaks, the subscriber waits for the next backoff delay and
/// reconnects on its own until [`stop`](Self::stop) is called.
///
/// ```text
/// Disconnected ──start──▶ Connecting ──open──▶ Streaming
///      ▲                    ▲    │                 │
///      │                    │    └─open failed─┐   │ broke / ended
///      │                    │                  ▼   ▼
///      └───────stop──────── └─────delay────── Backoff
/// ```
///
/// Dropping the subscriber stops it.
pub struct PresenceSubscriber {
    inner: Arc<Inner>,
}

impl PresenceSubscriber {
    /// Creates a stopped subscriber.
    #[must_use]
    pub fn new(
        session: Arc<SessionManager>,
        gateway: Arc<dyn RpcGateway>,
        config: PresenceConfig,
    ) -> Self {
        let (state, _) = watch::channel(SubscriberState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                session,
                gateway,
                config,
                state,
                control: Mutex::new(Control::default()),
                cache: RwLock::new(HashMap::new()),
                listeners: Mutex::new(Listeners::default()),
            }),
        }
    }

    /// Starts supervising the feed for `user_id`.
    ///
    /// Does nothing unless the subscriber is Disconnected. Failures are
    /// handled by the supervisor and never reported here.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, user_id: UserId) {
        let mut control = self.inner.lock_control();
        let current = *self.inner.state.borrow();
        if current.is_active() {
            debug!(state = ?current, "Presence subscriber already running");
            return;
        }

        control.epoch = control.epoch.wrapping_add(1);
        let epoch = control.epoch;
        self.inner.publish(SubscriberState::Connecting);

        if let Some(previous) = control.task.take() {
            previous.abort();
        }
        info!(%user_id, "Starting presence subscription");
        let inner = Arc::clone(&self.inner);
        control.task = Some(tokio::spawn(inner.supervise(epoch, user_id)));
    }

    /// Stops the subscription.
    ///
    /// Cancels a pending open or backoff timer. No state change made by
    /// the stopped supervisor can follow this call.
    pub fn stop(&self) {
        let mut control = self.inner.lock_control();
        control.epoch = control.epoch.wrapping_add(1);
        if let Some(task) = control.task.take() {
            task.abort();
            info!("Presence subscription stopped");
        }
        self.inner.publish(SubscriberState::Disconnected);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SubscriberState {
        *self.inner.state.borrow()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<SubscriberState> {
        self.inner.state.subscribe()
    }

    /// Registers a listener for presence events.
    pub fn listen(&self) -> PresenceListener {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut listeners = self.inner.lock_listeners();
        let id = ListenerId(listeners.next_id);
        listeners.next_id += 1;
        listeners.senders.push((id, sender));
        debug!(listener = %id, "Presence listener registered");
        PresenceListener { id, receiver }
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn unlisten(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.lock_listeners();
        let before = listeners.senders.len();
        listeners.senders.retain(|(listener, _)| *listener != id);
        before != listeners.senders.len()
    }

    /// Latest known status of a user.
    #[must_use]
    pub fn status_of(&self, user_id: &UserId) -> Option<PresenceStatus> {
        self.inner
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .copied()
    }

    /// Latest known status of every user seen on the feed.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<UserId, PresenceStatus> {
        self.inner
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forgets every cached status.
    pub fn clear_cache(&self) {
        self.inner
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Fetches a user's status from the backend and caches it.
    ///
    /// Seeds [`status_of`](Self::status_of) for users the feed has not
    /// reported yet. Listeners are not notified.
    ///
    /// # Errors
    ///
    /// Returns the failure of the authenticated call, e.g. a
    /// [`crate::gateway::RpcError::NotFound`] for an unknown user.
    pub async fn fetch_status(&self, user_id: &UserId) -> session::Result<UserStatus> {
        let gateway = &self.inner.gateway;
        let status = self
            .inner
            .session
            .call_authenticated(move |ctx| async move {
                gateway.user_status(ctx.access_token(), user_id).await
            })
            .await?;

        self.inner
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(status.user_id.clone(), status.status);
        debug!(%user_id, status = status.status.as_str(), "Fetched presence status");
        Ok(status)
    }

    /// Publishes a status for a user.
    ///
    /// # Errors
    ///
    /// Returns the failure of the authenticated call.
    pub async fn update_status(
        &self,
        user_id: &UserId,
        status: PresenceStatus,
    ) -> session::Result<()> {
        let gateway = &self.inner.gateway;
        self.inner
            .session
            .call_authenticated(move |ctx| async move {
                let event = PresenceEvent::new(user_id.clone(), status);
                gateway.update_presence(ctx.access_token(), event).await
            })
            .await?;
        debug!(%user_id, status = status.as_str(), "Presence status published");
        Ok(())
    }
}

impl Drop for PresenceSubscriber {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for PresenceSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceSubscriber")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn supervise(self: Arc<Self>, epoch: u64, user_id: UserId) {
        let mut backoff = Backoff::new(&self.config);

        loop {
            if !self.transition(epoch, SubscriberState::Connecting) {
                return;
            }

            match self.open(&user_id).await {
                Ok(stream) => {
                    backoff.reset();
                    if !self.transition(epoch, SubscriberState::Streaming) {
                        return;
                    }
                    info!(%user_id, "Presence feed open");
                    self.pump(epoch, stream).await;
                }
                Err(e) if e.requires_sign_in() => {
                    warn!(error = %e, "Presence feed needs a signed-in session, giving up");
                    self.transition(epoch, SubscriberState::Disconnected);
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to open presence feed");
                }
            }

            if !self.transition(epoch, SubscriberState::Backoff) {
                return;
            }
            let delay = backoff.next_delay();
            debug!(?delay, attempt = backoff.attempt(), "Reconnecting presence feed after delay");
            tokio::time::sleep(delay).await;
        }
    }

    async fn open(&self, user_id: &UserId) -> session::Result<PresenceStream> {
        let gateway = &self.gateway;
        self.session
            .call_authenticated(move |ctx| async move {
                gateway.subscribe_presence(ctx.access_token(), user_id).await
            })
            .await
    }

    /// Forwards events until the feed breaks or ends.
    async fn pump(&self, epoch: u64, mut stream: PresenceStream) {
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => {
                    if !self.deliver(epoch, event) {
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Presence feed broke");
                    return;
                }
            }
        }
        debug!("Presence feed closed by server");
    }

    /// Caches the event and hands it to every listener.
    fn deliver(&self, epoch: u64, event: PresenceEvent) -> bool {
        let control = self.lock_control();
        if control.epoch != epoch {
            return false;
        }

        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event.user_id.clone(), event.status);

        self.lock_listeners().senders.retain(|(id, sender)| {
            let alive = sender.send(event.clone()).is_ok();
            if !alive {
                debug!(listener = %id, "Pruning dropped presence listener");
            }
            alive
        });
        true
    }

    /// Moves to `next` if `epoch` is still current.
    fn transition(&self, epoch: u64, next: SubscriberState) -> bool {
        let control = self.lock_control();
        if control.epoch != epoch {
            return false;
        }
        self.publish(next);
        true
    }

    fn publish(&self, next: SubscriberState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                debug!(from = ?*state, to = ?next, "Presence subscriber state change");
                *state = next;
                true
            }
        });
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::gateway::mock::MockGateway;
    use crate::session::MemoryCredentialStore;
    use std::time::Duration;

    const PHONE: &str = "5550001";
    const PASSWORD: &str = "pw";

    async fn setup() -> (Arc<MockGateway>, Arc<SessionManager>, PresenceSubscriber, UserId) {
        let gateway = Arc::new(MockGateway::new());
        let profile = gateway.register("alice", PHONE, PASSWORD);
        let session = Arc::new(SessionManager::new(
            gateway.clone(),
            Arc::new(MemoryCredentialStore::new()),
            SessionConfig::default(),
        ));
        session.sign_in(PHONE, PASSWORD).await.unwrap();
        let config = PresenceConfig::default()
            .with_backoff(Duration::from_millis(100), Duration::from_secs(1))
            .with_jitter(0.0);
        let subscriber = PresenceSubscriber::new(session.clone(), gateway.clone(), config);
        (gateway, session, subscriber, profile.id)
    }

    async fn wait_for(subscriber: &PresenceSubscriber, target: SubscriberState) {
        let mut changes = subscriber.state_changes();
        tokio::time::timeout(Duration::from_secs(5), changes.wait_for(|s| *s == target))
            .await
            .expect("state not reached in time")
            .unwrap();
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let (_gateway, _session, subscriber, _me) = setup().await;
        assert_eq!(subscriber.state(), SubscriberState::Disconnected);
        assert!(subscriber.snapshot().is_empty());
    }

    #[tokio::test]
    async fn events_reach_listeners_in_order() {
        let (gateway, _session, subscriber, me) = setup().await;
        let mut listener = subscriber.listen();

        subscriber.start(me);
        wait_for(&subscriber, SubscriberState::Streaming).await;

        gateway.push_presence(PresenceEvent::new("2", PresenceStatus::Online));
        gateway.push_presence(PresenceEvent::new("2", PresenceStatus::Idle));

        assert_eq!(
            listener.recv().await,
            Some(PresenceEvent::new("2", PresenceStatus::Online))
        );
        assert_eq!(
            listener.recv().await,
            Some(PresenceEvent::new("2", PresenceStatus::Idle))
        );
        assert_eq!(
            subscriber.status_of(&UserId::new("2")),
            Some(PresenceStatus::Idle)
        );
    }

    #[tokio::test]
    async fn start_while_running_opens_no_second_feed() {
        let (gateway, _session, subscriber, me) = setup().await;

        subscriber.start(me.clone());
        wait_for(&subscriber, SubscriberState::Streaming).await;
        subscriber.start(me);

        assert_eq!(subscriber.state(), SubscriberState::Streaming);
        assert_eq!(gateway.presence_opens(), 1);
    }

    #[tokio::test]
    async fn unlisten_ends_listener() {
        let (gateway, _session, subscriber, me) = setup().await;
        let mut kept = subscriber.listen();
        let mut removed = subscriber.listen();

        assert!(subscriber.unlisten(removed.id()));
        assert!(!subscriber.unlisten(removed.id()));

        subscriber.start(me);
        wait_for(&subscriber, SubscriberState::Streaming).await;
        gateway.push_presence(PresenceEvent::new("2", PresenceStatus::Online));

        assert!(kept.recv().await.is_some());
        assert_eq!(removed.recv().await, None);
    }

    #[tokio::test]
    async fn dropped_listener_is_pruned() {
        let (gateway, _session, subscriber, me) = setup().await;
        let dropped = subscriber.listen();
        let dropped_id = dropped.id();
        drop(dropped);
        let mut kept = subscriber.listen();

        subscriber.start(me);
        wait_for(&subscriber, SubscriberState::Streaming).await;
        gateway.push_presence(PresenceEvent::new("2", PresenceStatus::Online));
        kept.recv().await.unwrap();

        assert!(!subscriber.unlisten(dropped_id));
    }

    #[tokio::test]
    async fn listener_is_a_stream() {
        let (gateway, _session, subscriber, me) = setup().await;
        let listener = subscriber.listen();

        subscriber.start(me);
        wait_for(&subscriber, SubscriberState::Streaming).await;
        gateway.push_presence(PresenceEvent::new("2", PresenceStatus::DoNotDisturb));

        let events: Vec<_> = listener.take(1).collect().await;
        assert_eq!(events[0].status, PresenceStatus::DoNotDisturb);
    }

    #[tokio::test]
    async fn logged_out_session_ends_in_disconnected() {
        let (gateway, session, subscriber, me) = setup().await;
        session.logout().unwrap();

        let mut changes = subscriber.state_changes();
        subscriber.start(me);
        assert_eq!(*changes.borrow_and_update(), SubscriberState::Connecting);
        tokio::time::timeout(
            Duration::from_secs(5),
            changes.wait_for(|s| *s == SubscriberState::Disconnected),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(gateway.presence_opens(), 0);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (_gateway, _session, subscriber, me) = setup().await;

        subscriber.stop();
        subscriber.start(me);
        wait_for(&subscriber, SubscriberState::Streaming).await;
        subscriber.stop();
        subscriber.stop();

        assert_eq!(subscriber.state(), SubscriberState::Disconnected);
    }

    #[tokio::test]
    async fn update_status_reaches_backend() {
        let (gateway, _session, subscriber, me) = setup().await;

        subscriber
            .update_status(&me, PresenceStatus::Idle)
            .await
            .unwrap();

        assert_eq!(gateway.presence_status(&me), Some(PresenceStatus::Idle));
    }

    #[tokio::test]
    async fn fetch_status_seeds_cache_without_feed() {
        let (gateway, _session, subscriber, me) = setup().await;
        let bob = gateway.register("bob", "5550002", PASSWORD).id;
        subscriber
            .update_status(&bob, PresenceStatus::DoNotDisturb)
            .await
            .unwrap();
        let mut listener = subscriber.listen();

        let status = subscriber.fetch_status(&bob).await.unwrap();

        assert_eq!(status.user_id, bob);
        assert_eq!(status.status, PresenceStatus::DoNotDisturb);
        assert!(status.last_seen.is_some());
        assert_eq!(subscriber.status_of(&bob), Some(PresenceStatus::DoNotDisturb));
        assert!(subscriber.status_of(&me).is_none());
        assert!(listener.try_recv().is_none());
        assert_eq!(gateway.presence_opens(), 0);
    }

    #[tokio::test]
    async fn fetch_status_of_silent_user_is_offline() {
        let (gateway, _session, subscriber, _me) = setup().await;
        let bob = gateway.register("bob", "5550002", PASSWORD).id;

        let status = subscriber.fetch_status(&bob).await.unwrap();

        assert_eq!(status.status, PresenceStatus::Offline);
        assert!(status.last_seen.is_none());
    }

    #[tokio::test]
    async fn fetch_status_of_unknown_user_fails() {
        let (_gateway, _session, subscriber, _me) = setup().await;
        let stranger = UserId::new("99");

        let err = subscriber.fetch_status(&stranger).await.unwrap_err();

        assert!(matches!(
            err,
            session::SessionError::Rpc(crate::gateway::RpcError::NotFound(_))
        ));
        assert!(subscriber.status_of(&stranger).is_none());
    }

    #[tokio::test]
    async fn clear_cache_forgets_statuses() {
        let (gateway, _session, subscriber, me) = setup().await;
        subscriber.start(me);
        wait_for(&subscriber, SubscriberState::Streaming).await;
        let mut listener = subscriber.listen();
        gateway.push_presence(PresenceEvent::new("2", PresenceStatus::Online));
        listener.recv().await.unwrap();

        subscriber.clear_cache();

        assert!(subscriber.status_of(&UserId::new("2")).is_none());
    }
}
