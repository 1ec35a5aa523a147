//! Notification dispatch and management.
//!
//! [`NotificationDispatcher`] takes notifications off the primary message and
//! call paths: callers hand them to a bounded queue drained by a small worker
//! pool. A worker persists the notification, pushes it to the recipient's
//! `user/{id}/notifications` channel and then refreshes
//! `user/{id}/unread-count`. Delivery is best effort; the persisted row is
//! the source of truth for clients that were offline.
//!
//! When the queue stays full past the enqueue timeout the notification is
//! persisted synchronously and its live delivery is skipped. It is never
//! dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info, warn};

use parley_shared::constants::{
    DEFAULT_NOTIFY_ENQUEUE_TIMEOUT_MS, DEFAULT_NOTIFY_QUEUE, DEFAULT_NOTIFY_WORKERS,
};
use parley_shared::protocol::{Destination, Envelope, EventType, UnreadCount};
use parley_shared::types::{NotificationId, UserId};
use parley_store::{NewNotification, Notification, Store, StoreError};

use crate::delivery::Fanout;
use crate::error::{CoreError, StoreResultExt};

#[derive(Debug, Clone, Copy)]
pub struct DispatcherSettings {
    pub workers: usize,
    pub queue: usize,
    pub enqueue_timeout: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_NOTIFY_WORKERS,
            queue: DEFAULT_NOTIFY_QUEUE,
            enqueue_timeout: Duration::from_millis(DEFAULT_NOTIFY_ENQUEUE_TIMEOUT_MS),
        }
    }
}

/// Persist-then-push, shared by the workers and the management service.
#[derive(Clone)]
struct Publisher {
    store: Arc<dyn Store>,
    fanout: Fanout,
}

impl Publisher {
    fn persist(&self, new: NewNotification) -> Result<Notification, StoreError> {
        let notification = new.into_notification(NotificationId::new(), Utc::now());
        self.store.insert_notification(&notification)?;
        Ok(notification)
    }

    fn push(&self, notification: &Notification) {
        let recipient = notification.recipient_id;
        let envelope = Envelope::new(
            Destination::UserNotifications(recipient),
            EventType::Notification,
            notification,
        );
        let reached = self.fanout.to_user(recipient, &envelope);
        debug!(
            user = %recipient,
            notification = %notification.id,
            kind = %notification.kind,
            sessions = reached,
            "Notification pushed"
        );
        self.push_unread_count(recipient);
    }

    fn push_unread_count(&self, user: UserId) {
        if !self.fanout.is_online(user) {
            return;
        }
        match self.store.unread_count(user) {
            Ok(count) => {
                let envelope = Envelope::new(
                    Destination::UserUnreadCount(user),
                    EventType::UnreadCount,
                    &UnreadCount { count },
                );
                self.fanout.to_user(user, &envelope);
            }
            Err(e) => warn!(user = %user, error = %e, "Unread count refresh failed"),
        }
    }
}

/// Counts notifications accepted but not yet persisted.
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn start(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<NewNotification>,
    publisher: Publisher,
    pending: Arc<Pending>,
    enqueue_timeout: Duration,
}

impl NotificationDispatcher {
    /// Spawn the worker pool. Must be called from within a tokio runtime.
    pub fn start(store: Arc<dyn Store>, fanout: Fanout, settings: DispatcherSettings) -> Self {
        let (tx, rx) = mpsc::channel::<NewNotification>(settings.queue.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let publisher = Publisher { store, fanout };
        let pending = Arc::new(Pending::default());

        for worker in 0..settings.workers.max(1) {
            let rx = rx.clone();
            let publisher = publisher.clone();
            let pending = pending.clone();
            tokio::spawn(async move {
                loop {
                    // Hold the receiver only while waiting, not while working.
                    let next = rx.lock().await.recv().await;
                    let Some(new) = next else { break };

                    let recipient = new.recipient_id;
                    match publisher.persist(new) {
                        Ok(notification) => publisher.push(&notification),
                        Err(e) => warn!(
                            worker,
                            user = %recipient,
                            error = %e,
                            "Notification dispatch failed"
                        ),
                    }
                    pending.finish();
                }
                debug!(worker, "Notification worker stopped");
            });
        }

        info!(
            workers = settings.workers.max(1),
            queue = settings.queue.max(1),
            "Notification dispatcher started"
        );

        Self {
            tx,
            publisher,
            pending,
            enqueue_timeout: settings.enqueue_timeout,
        }
    }

    /// Hand a notification to the worker pool. Waits at most the configured
    /// timeout for queue space; past that, persists inline and skips the live
    /// push. Never fails the caller.
    pub async fn enqueue(&self, new: NewNotification) {
        self.pending.start();
        let new = match self.tx.send_timeout(new, self.enqueue_timeout).await {
            Ok(()) => return,
            Err(SendTimeoutError::Timeout(new)) => {
                warn!(user = %new.recipient_id, "Notification queue saturated, persisting inline");
                new
            }
            Err(SendTimeoutError::Closed(new)) => {
                warn!(user = %new.recipient_id, "Notification workers gone, persisting inline");
                new
            }
        };

        let recipient = new.recipient_id;
        if let Err(e) = self.publisher.persist(new) {
            warn!(user = %recipient, error = %e, "Inline notification persist failed");
        }
        self.pending.finish();
    }

    /// A dispatcher with no workers, so tests can saturate the queue.
    #[cfg(test)]
    fn detached(
        store: Arc<dyn Store>,
        fanout: Fanout,
        queue: usize,
        enqueue_timeout: Duration,
    ) -> (Self, mpsc::Receiver<NewNotification>) {
        let (tx, rx) = mpsc::channel(queue);
        let dispatcher = Self {
            tx,
            publisher: Publisher { store, fanout },
            pending: Arc::new(Pending::default()),
            enqueue_timeout,
        };
        (dispatcher, rx)
    }

    /// Resolves once every notification enqueued so far has been persisted
    /// (and, for queued ones, pushed).
    pub async fn idle(&self) {
        loop {
            let notified = self.pending.idle.notified();
            if self.pending.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Management
// ---------------------------------------------------------------------------

/// Read and mutate a user's persisted notifications. Every mutation that can
/// change the unread count pushes a fresh count to the user's sessions.
#[derive(Clone)]
pub struct NotificationService {
    publisher: Publisher,
}

impl NotificationService {
    pub fn new(store: Arc<dyn Store>, fanout: Fanout) -> Self {
        Self {
            publisher: Publisher { store, fanout },
        }
    }

    fn store(&self) -> &dyn Store {
        self.publisher.store.as_ref()
    }

    pub fn unread(&self, user: UserId) -> Result<Vec<Notification>, CoreError> {
        Ok(self.store().unread_notifications(user)?)
    }

    pub fn unread_count(&self, user: UserId) -> Result<u64, CoreError> {
        Ok(self.store().unread_count(user)?)
    }

    pub fn list(&self, user: UserId, limit: u32, offset: u32) -> Result<Vec<Notification>, CoreError> {
        Ok(self.store().list_notifications(user, limit, offset)?)
    }

    /// Idempotent: marking an already-read notification succeeds.
    pub fn mark_read(&self, id: NotificationId, user: UserId) -> Result<(), CoreError> {
        if self.store().mark_notification_read(id, user, Utc::now())? {
            self.publisher.push_unread_count(user);
            return Ok(());
        }
        self.store()
            .get_notification(id, user)
            .or_not_found(|| format!("notification {id}"))?;
        Ok(())
    }

    pub fn mark_all_read(&self, user: UserId) -> Result<usize, CoreError> {
        let changed = self.store().mark_all_notifications_read(user, Utc::now())?;
        if changed > 0 {
            self.publisher.push_unread_count(user);
        }
        Ok(changed)
    }

    pub fn delete(&self, id: NotificationId, user: UserId) -> Result<(), CoreError> {
        if !self.store().soft_delete_notification(id, user)? {
            return Err(CoreError::NotFound(format!("notification {id}")));
        }
        self.publisher.push_unread_count(user);
        Ok(())
    }

    pub fn delete_all(&self, user: UserId) -> Result<usize, CoreError> {
        let removed = self.store().soft_delete_all_notifications(user)?;
        if removed > 0 {
            self.publisher.push_unread_count(user);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use parley_shared::types::NotificationType;
    use parley_store::SqliteStore;
    use serde_json::json;

    use super::*;
    use crate::delivery::SessionHandle;
    use crate::registry::ConnectionRegistry;

    fn setup() -> (Arc<dyn Store>, Fanout) {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        let fanout = Fanout::new(Arc::new(ConnectionRegistry::new()));
        (store, fanout)
    }

    fn new_message_for(user: UserId) -> NewNotification {
        NewNotification {
            recipient_id: user,
            sender_id: None,
            title: "New message".into(),
            body: "hi".into(),
            kind: NotificationType::NewMessage,
            data: json!({ "messageId": "m1" }),
        }
    }

    #[tokio::test]
    async fn online_recipient_gets_notification_then_count() {
        let (store, fanout) = setup();
        let user = UserId::new();
        let (handle, mut rx) = SessionHandle::channel(8);
        fanout.registry().register(user, handle);

        let dispatcher = NotificationDispatcher::start(store.clone(), fanout, DispatcherSettings::default());
        dispatcher.enqueue(new_message_for(user)).await;
        dispatcher.idle().await;

        let first = rx.try_recv().unwrap();
        assert_eq!(first.event_type, EventType::Notification);
        assert_eq!(first.destination, Destination::UserNotifications(user));
        let second = rx.try_recv().unwrap();
        assert_eq!(second.destination, Destination::UserUnreadCount(user));
        assert_eq!(second.payload, json!({ "count": 1 }));
        assert_eq!(store.unread_count(user).unwrap(), 1);
    }

    #[tokio::test]
    async fn offline_recipient_is_persisted_only() {
        let (store, fanout) = setup();
        let user = UserId::new();
        let dispatcher = NotificationDispatcher::start(store.clone(), fanout, DispatcherSettings::default());

        for _ in 0..3 {
            dispatcher.enqueue(new_message_for(user)).await;
        }
        dispatcher.idle().await;
        assert_eq!(store.unread_count(user).unwrap(), 3);
    }

    #[tokio::test]
    async fn saturated_queue_persists_inline() {
        let (store, fanout) = setup();
        let user = UserId::new();
        let (handle, mut rx) = SessionHandle::channel(8);
        fanout.registry().register(user, handle);

        let (dispatcher, _queue) =
            NotificationDispatcher::detached(store.clone(), fanout, 1, Duration::from_millis(5));
        dispatcher.enqueue(new_message_for(user)).await; // fills the queue
        dispatcher.enqueue(new_message_for(user)).await; // times out

        assert_eq!(store.unread_count(user).unwrap(), 1);
        // Delivery of the inline one is deferred to polling.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn management_operations() {
        let (store, fanout) = setup();
        let user = UserId::new();
        let dispatcher = NotificationDispatcher::start(store.clone(), fanout.clone(), DispatcherSettings::default());
        for _ in 0..3 {
            dispatcher.enqueue(new_message_for(user)).await;
        }
        dispatcher.idle().await;

        let service = NotificationService::new(store, fanout.clone());
        let unread = service.unread(user).unwrap();
        assert_eq!(unread.len(), 3);

        let (handle, mut rx) = SessionHandle::channel(8);
        fanout.registry().register(user, handle);

        service.mark_read(unread[0].id, user).unwrap();
        service.mark_read(unread[0].id, user).unwrap();
        assert_eq!(service.unread_count(user).unwrap(), 2);
        let pushed = rx.try_recv().unwrap();
        assert_eq!(pushed.payload, json!({ "count": 2 }));
        // The repeated mark changed nothing and pushed nothing.
        assert!(rx.try_recv().is_err());

        assert!(matches!(
            service.mark_read(unread[1].id, UserId::new()),
            Err(CoreError::NotFound(_))
        ));

        service.delete(unread[1].id, user).unwrap();
        assert!(matches!(service.delete(unread[1].id, user), Err(CoreError::NotFound(_))));
        assert_eq!(service.mark_all_read(user).unwrap(), 1);
        assert_eq!(service.unread_count(user).unwrap(), 0);
        assert_eq!(service.list(user, 10, 0).unwrap().len(), 2);
        assert_eq!(service.delete_all(user).unwrap(), 2);
        assert!(service.list(user, 10, 0).unwrap().is_empty());
    }
}
