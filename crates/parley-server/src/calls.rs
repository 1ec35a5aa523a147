//! Call lifecycle coordination.
//!
//! Every transition runs under a per-call lock, so simultaneous answer and
//! reject on one call are serialized and the state machine in
//! [`parley_shared::call`] never sees an interleaving. A transition is
//! persisted before anyone is told about it; if the write fails the caller
//! gets the error and nobody is notified.
//!
//! A user whose sessions are all closed counts as unreachable and gets a
//! persisted notification instead of the live event.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};

use parley_shared::call::{CallEvent, CallScope, CallStatus, CallType, Transition};
use parley_shared::protocol::{CallChannel, Destination, Envelope, EventType};
use parley_shared::types::{CallId, NotificationType, UserId};
use parley_store::{CallSession, NewNotification, Store, StoreError};

use crate::delivery::Fanout;
use crate::error::{CoreError, StoreResultExt};
use crate::locks::KeyedLocks;
use crate::notifications::NotificationDispatcher;

pub struct CallCoordinator {
    store: Arc<dyn Store>,
    fanout: Fanout,
    dispatcher: NotificationDispatcher,
    call_locks: KeyedLocks<CallId>,
}

impl CallCoordinator {
    pub fn new(store: Arc<dyn Store>, fanout: Fanout, dispatcher: NotificationDispatcher) -> Self {
        Self {
            store,
            fanout,
            dispatcher,
            call_locks: KeyedLocks::new(),
        }
    }

    // ------------------------------------------------------------------
    // Initiate
    // ------------------------------------------------------------------

    pub async fn initiate(
        &self,
        call_id: CallId,
        caller: UserId,
        scope: CallScope,
        call_type: CallType,
    ) -> Result<CallSession, CoreError> {
        if call_id.as_str().trim().is_empty() {
            return Err(CoreError::InvalidRequest("call id is empty".into()));
        }
        let _guard = self.call_locks.lock(call_id.clone()).await;

        match self.store.get_call(&call_id) {
            Ok(_) => {
                return Err(CoreError::InvalidRequest(format!("call {call_id} already exists")))
            }
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        if !self.store.user_exists(caller)? {
            return Err(CoreError::NotFound(format!("user {caller}")));
        }

        let callees = match scope {
            CallScope::Private { recipient } => {
                if recipient == caller {
                    return Err(CoreError::InvalidRequest("cannot call yourself".into()));
                }
                if !self.store.user_exists(recipient)? {
                    return Err(CoreError::NotFound(format!("user {recipient}")));
                }
                vec![recipient]
            }
            CallScope::Group { conversation } => {
                if !self.store.conversation_exists(conversation)? {
                    return Err(CoreError::NotFound(format!("conversation {conversation}")));
                }
                let members = self.store.participant_ids(conversation)?;
                if !members.contains(&caller) {
                    return Err(CoreError::not_participant(
                        caller,
                        format!("conversation {conversation}"),
                    ));
                }
                members.into_iter().filter(|m| *m != caller).collect()
            }
        };

        let mut call = CallSession {
            id: call_id,
            caller_id: caller,
            scope,
            call_type,
            status: CallStatus::Initiated,
            started_at: Utc::now(),
            ended_at: None,
            duration_secs: None,
        };
        if let Transition::Moved(next) = call.status.apply(CallEvent::Ring)? {
            call.status = next;
        }
        self.store.insert_call(&call)?;

        info!(
            call = %call.id,
            caller = %caller,
            callees = callees.len(),
            kind = %call.call_type.as_str(),
            "Call initiated"
        );

        let mut unreachable = Vec::new();
        for callee in &callees {
            let incoming = Envelope::new(
                Destination::UserCall(*callee, CallChannel::Incoming),
                EventType::CallIncoming,
                &call,
            );
            if self.fanout.deliver(*callee, &incoming).unreachable() {
                unreachable.push(*callee);
            }
        }
        if callees.is_empty() {
            debug!(call = %call.id, "No other participants to ring");
        }

        self.fanout.to_user(
            caller,
            &Envelope::new(
                Destination::UserCall(caller, CallChannel::Initiated),
                EventType::CallInitiated,
                &call,
            ),
        );

        for callee in unreachable {
            self.notify(
                callee,
                &call,
                NotificationType::CallIncoming,
                "Incoming call",
            )
            .await;
        }

        Ok(call)
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// RINGING -> ONGOING. Retransmitted answers on an ongoing or finished
    /// call return the call unchanged and notify nobody.
    pub async fn answer(&self, call_id: &CallId, user: UserId) -> Result<CallSession, CoreError> {
        let _guard = self.call_locks.lock(call_id.clone()).await;
        let mut call = self.load_authorized(call_id, user)?;

        let Transition::Moved(next) = call.status.apply(CallEvent::Answer)? else {
            debug!(call = %call.id, status = %call.status, "Answer ignored");
            return Ok(call);
        };
        call.status = next;
        self.store.update_call(&call)?;
        info!(call = %call.id, by = %user, "Call answered");

        let envelope = Envelope::new(
            Destination::UserCall(call.caller_id, CallChannel::Answered),
            EventType::CallAnswered,
            &call,
        );
        let mut targets = vec![call.caller_id];
        targets.push(call.scope.recipient().unwrap_or(user));
        self.send_each(&targets, &envelope, CallChannel::Answered);
        Ok(call)
    }

    /// RINGING -> REJECTED. Rejecting a rejected call is a no-op.
    pub async fn reject(&self, call_id: &CallId, user: UserId) -> Result<CallSession, CoreError> {
        let _guard = self.call_locks.lock(call_id.clone()).await;
        let mut call = self.load_authorized(call_id, user)?;

        let Transition::Moved(next) = call.status.apply(CallEvent::Reject)? else {
            debug!(call = %call.id, "Reject ignored");
            return Ok(call);
        };
        call.status = next;
        call.ended_at = Some(Utc::now());
        self.store.update_call(&call)?;
        info!(call = %call.id, by = %user, "Call rejected");

        let envelope = Envelope::new(
            Destination::UserCall(call.caller_id, CallChannel::Rejected),
            EventType::CallRejected,
            &call,
        );
        let mut targets = vec![call.caller_id];
        targets.push(call.scope.recipient().unwrap_or(user));
        self.send_each(&targets, &envelope, CallChannel::Rejected);
        Ok(call)
    }

    /// Any live state -> ENDED. Sets the end time and the duration exactly
    /// once; ending a finished call is a no-op.
    pub async fn end(&self, call_id: &CallId, user: UserId) -> Result<CallSession, CoreError> {
        let _guard = self.call_locks.lock(call_id.clone()).await;
        let mut call = self.load_authorized(call_id, user)?;

        let was_answered = call.status == CallStatus::Ongoing;
        let Transition::Moved(next) = call.status.apply(CallEvent::End)? else {
            debug!(call = %call.id, status = %call.status, "End ignored");
            return Ok(call);
        };
        // Resolved before the write so a lookup failure leaves the call live.
        let mut everyone = vec![call.caller_id];
        everyone.extend(self.callees(&call)?);

        let ended_at = Utc::now();
        call.status = next;
        call.ended_at = Some(ended_at);
        call.duration_secs = Some((ended_at - call.started_at).num_seconds());
        self.store.update_call(&call)?;
        info!(
            call = %call.id,
            by = %user,
            duration_secs = call.duration_secs.unwrap_or_default(),
            "Call ended"
        );

        let envelope = Envelope::new(
            Destination::UserCall(call.caller_id, CallChannel::Ended),
            EventType::CallEnded,
            &call,
        );
        let unreachable = self.send_each(&everyone, &envelope, CallChannel::Ended);

        let (kind, title) = if was_answered {
            (NotificationType::CallEnded, "Call ended")
        } else {
            (NotificationType::CallMissed, "Missed call")
        };
        for callee in unreachable.into_iter().filter(|u| *u != call.caller_id) {
            self.notify(callee, &call, kind, title).await;
        }

        Ok(call)
    }

    /// Fetch a call the user is allowed to see.
    pub fn get(&self, call_id: &CallId, user: UserId) -> Result<CallSession, CoreError> {
        self.load_authorized(call_id, user)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn load_authorized(&self, call_id: &CallId, user: UserId) -> Result<CallSession, CoreError> {
        let call = self
            .store
            .get_call(call_id)
            .or_not_found(|| format!("call {call_id}"))?;

        let allowed = call.caller_id == user
            || match call.scope {
                CallScope::Private { recipient } => recipient == user,
                CallScope::Group { conversation } => self.store.is_participant(conversation, user)?,
            };
        if !allowed {
            return Err(CoreError::not_participant(user, format!("call {call_id}")));
        }
        Ok(call)
    }

    /// Everyone a call rings, excluding the caller.
    fn callees(&self, call: &CallSession) -> Result<Vec<UserId>, CoreError> {
        Ok(match call.scope {
            CallScope::Private { recipient } => vec![recipient],
            CallScope::Group { conversation } => self
                .store
                .participant_ids(conversation)?
                .into_iter()
                .filter(|m| *m != call.caller_id)
                .collect(),
        })
    }

    /// Deliver to each distinct user on their own channel. Returns the users
    /// no open session could take the event.
    fn send_each(&self, users: &[UserId], envelope: &Envelope, channel: CallChannel) -> Vec<UserId> {
        let mut seen = Vec::with_capacity(users.len());
        let mut unreachable = Vec::new();
        for user in users {
            if seen.contains(user) {
                continue;
            }
            seen.push(*user);
            let outcome = self
                .fanout
                .deliver(*user, &envelope.readdressed(Destination::UserCall(*user, channel)));
            if outcome.unreachable() {
                unreachable.push(*user);
            }
        }
        unreachable
    }

    async fn notify(&self, recipient: UserId, call: &CallSession, kind: NotificationType, title: &str) {
        self.dispatcher
            .enqueue(NewNotification {
                recipient_id: recipient,
                sender_id: Some(call.caller_id),
                title: title.to_string(),
                body: format!("{} call", call.call_type.as_str().to_lowercase()),
                kind,
                data: json!({
                    "callId": call.id,
                    "callType": call.call_type,
                    "conversationId": call.scope.conversation(),
                }),
            })
            .await;
    }
}
