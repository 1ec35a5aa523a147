//! Explicit wiring of the real-time core.
//!
//! The hub owns one instance of every component and routes decoded client
//! frames to them on behalf of an authenticated session. Transports (the
//! WebSocket gateway, the REST handlers, tests) only ever talk to the hub.

use std::sync::Arc;

use tracing::{debug, info, warn};

use parley_shared::call::CallScope;
use parley_shared::protocol::{ClientFrame, Destination, Envelope, ErrorEvent, EventType};
use parley_shared::types::{SessionId, UserId};
use parley_shared::AuthError;
use parley_store::Store;

use crate::calls::CallCoordinator;
use crate::delivery::{Fanout, SessionHandle};
use crate::error::CoreError;
use crate::identity::IdentityResolver;
use crate::notifications::{DispatcherSettings, NotificationDispatcher, NotificationService};
use crate::presence::PresenceManager;
use crate::receipts::ReceiptTracker;
use crate::registry::ConnectionRegistry;
use crate::relay::SignalRelay;
use crate::router::MessageRouter;

/// The authenticated principal behind a live session. Every operation a
/// frame triggers acts as `user_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: UserId,
    pub session_id: SessionId,
}

pub struct Hub {
    identity: Arc<dyn IdentityResolver>,
    fanout: Fanout,
    dispatcher: NotificationDispatcher,
    presence: PresenceManager,
    router: MessageRouter,
    receipts: ReceiptTracker,
    calls: CallCoordinator,
    relay: SignalRelay,
    notifications: NotificationService,
    session_buffer: usize,
}

impl Hub {
    /// Build every component over one store and one registry. Starts the
    /// notification workers, so it must run inside a tokio runtime.
    pub fn new(
        store: Arc<dyn Store>,
        identity: Arc<dyn IdentityResolver>,
        settings: DispatcherSettings,
        session_buffer: usize,
    ) -> Self {
        let fanout = Fanout::new(Arc::new(ConnectionRegistry::new()));
        let dispatcher = NotificationDispatcher::start(store.clone(), fanout.clone(), settings);

        Self {
            presence: PresenceManager::new(store.clone(), fanout.clone()),
            router: MessageRouter::new(store.clone(), fanout.clone(), dispatcher.clone()),
            receipts: ReceiptTracker::new(store.clone(), fanout.clone()),
            calls: CallCoordinator::new(store.clone(), fanout.clone(), dispatcher.clone()),
            relay: SignalRelay::new(store.clone(), fanout.clone()),
            notifications: NotificationService::new(store, fanout.clone()),
            identity,
            fanout,
            dispatcher,
            session_buffer: session_buffer.max(1),
        }
    }

    pub fn authenticate(&self, credential: &str) -> Result<UserId, AuthError> {
        self.identity.resolve(credential)
    }

    /// Register a new live session for an already-authenticated user. The
    /// returned receiver yields every event addressed to the session.
    pub async fn connect(&self, user: UserId) -> (SessionContext, tokio::sync::mpsc::Receiver<Envelope>) {
        let (handle, rx) = SessionHandle::channel(self.session_buffer);
        let session_id = self.presence.connect(user, handle).await;
        info!(user = %user, session = %session_id, "Session connected");
        (
            SessionContext {
                user_id: user,
                session_id,
            },
            rx,
        )
    }

    pub async fn disconnect(&self, ctx: &SessionContext) {
        self.presence.disconnect(ctx.session_id).await;
        info!(user = %ctx.user_id, session = %ctx.session_id, "Session disconnected");
    }

    /// Execute one client frame as the session's user.
    pub async fn handle_frame(&self, ctx: &SessionContext, frame: ClientFrame) -> Result<(), CoreError> {
        let user = ctx.user_id;
        match frame {
            ClientFrame::SendMessage {
                conversation_id,
                content,
                message_type,
            } => {
                self.router
                    .send(conversation_id, user, &content, message_type)
                    .await?;
            }
            ClientFrame::MarkRead { conversation_id } => {
                self.receipts.mark_read(conversation_id, user)?;
            }
            ClientFrame::MarkMessageRead { message_id } => {
                self.receipts.mark_single_read(message_id, user)?;
            }
            ClientFrame::React { message_id, emoji } => {
                self.router.react(message_id, user, &emoji).await?;
            }
            ClientFrame::StartCall {
                call_id,
                recipient_id,
                conversation_id,
                call_type,
            } => {
                let scope = CallScope::from_parts(recipient_id, conversation_id).ok_or_else(|| {
                    CoreError::InvalidRequest("call needs a recipient or a conversation".into())
                })?;
                self.calls.initiate(call_id, user, scope, call_type).await?;
            }
            ClientFrame::AnswerCall { call_id } => {
                self.calls.answer(&call_id, user).await?;
            }
            ClientFrame::RejectCall { call_id } => {
                self.calls.reject(&call_id, user).await?;
            }
            ClientFrame::EndCall { call_id } => {
                self.calls.end(&call_id, user).await?;
            }
            ClientFrame::PrivateSignal(signal) => {
                self.relay.relay_private(user, signal);
            }
            ClientFrame::GroupSignal(signal) => {
                self.relay.relay_group(user, signal);
            }
        }
        Ok(())
    }

    /// Report a failed operation to the session that issued it, and only
    /// that session.
    pub fn report_error(&self, ctx: &SessionContext, error: &CoreError) {
        warn!(
            user = %ctx.user_id,
            session = %ctx.session_id,
            code = error.code(),
            error = %error,
            "Operation rejected"
        );
        let envelope = Envelope::new(
            Destination::UserErrors(ctx.user_id),
            EventType::Error,
            &ErrorEvent {
                code: error.code().to_string(),
                message: error.client_message(),
            },
        );
        if !self.fanout.to_session(ctx.session_id, envelope) {
            debug!(session = %ctx.session_id, "Error report not delivered");
        }
    }

    /// `handle_frame` followed by `report_error` on failure. What the
    /// gateway calls for every decoded frame.
    pub async fn dispatch(&self, ctx: &SessionContext, frame: ClientFrame) {
        if let Err(e) = self.handle_frame(ctx, frame).await {
            self.report_error(ctx, &e);
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.fanout.registry()
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn receipts(&self) -> &ReceiptTracker {
        &self.receipts
    }

    pub fn calls(&self) -> &CallCoordinator {
        &self.calls
    }

    pub fn relay(&self) -> &SignalRelay {
        &self.relay
    }

    pub fn notifications(&self) -> &NotificationService {
        &self.notifications
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }
}
