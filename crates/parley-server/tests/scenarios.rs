//! End-to-end behaviour of the real-time core, driven through the public
//! `Hub` API against a real in-memory store.

use std::sync::Arc;

use chrono::{Duration, Utc};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde_json::json;
use tokio::sync::mpsc::Receiver;

use parley_server::hub::{Hub, SessionContext};
use parley_server::identity::TokenResolver;
use parley_server::notifications::DispatcherSettings;
use parley_shared::call::{CallScope, CallStatus, CallType};
use parley_shared::protocol::{
    CallChannel, ClientFrame, Destination, Envelope, EventType, SignalFrame, SignalKind,
};
use parley_shared::token::AccessToken;
use parley_shared::types::{
    CallId, ConversationId, DeliveryStatus, MessageKind, NotificationType, UserId,
};
use parley_store::{
    CallRepository, ConversationKind, MessageRepository, NotificationRepository, SqliteStore,
    UserRepository,
};

struct World {
    hub: Arc<Hub>,
    store: SqliteStore,
    key: SigningKey,
    direct: ConversationId,
    group: ConversationId,
    a: UserId,
    b: UserId,
    c: UserId,
}

fn world() -> World {
    let key = SigningKey::generate(&mut OsRng);
    let store = SqliteStore::in_memory().unwrap();
    let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
    let (direct, group) = store
        .with_db(|db| {
            for (user, name) in [(a, "ana"), (b, "ben"), (c, "cy")] {
                db.insert_user(user, Some(name))?;
            }
            let direct = db.create_conversation(ConversationKind::Private, None, a, &[b])?;
            let group = db.create_conversation(ConversationKind::Group, Some("trio"), a, &[b, c])?;
            Ok((direct.id, group.id))
        })
        .unwrap();

    let users: Arc<dyn UserRepository> = Arc::new(store.clone());
    let identity = Arc::new(TokenResolver::new(key.verifying_key().to_bytes(), users));
    let hub = Arc::new(Hub::new(
        Arc::new(store.clone()),
        identity,
        DispatcherSettings::default(),
        64,
    ));
    World { hub, store, key, direct, group, a, b, c }
}

fn drain(rx: &mut Receiver<Envelope>) -> Vec<Envelope> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn of_type(events: &[Envelope], kind: EventType) -> Vec<&Envelope> {
    events.iter().filter(|e| e.event_type == kind).collect()
}

async fn online(w: &World, user: UserId) -> (SessionContext, Receiver<Envelope>) {
    let (ctx, mut rx) = w.hub.connect(user).await;
    drain(&mut rx);
    (ctx, rx)
}

#[tokio::test]
async fn handshake_resolves_only_valid_credentials() {
    let w = world();
    let token = AccessToken::issue(w.a, Utc::now() + Duration::minutes(5), &w.key);
    assert_eq!(w.hub.authenticate(&token.encode()).unwrap(), w.a);

    let expired = AccessToken::issue(w.a, Utc::now() - Duration::minutes(5), &w.key);
    assert!(w.hub.authenticate(&expired.encode()).is_err());

    let forged = AccessToken::issue(w.a, Utc::now() + Duration::minutes(5), &SigningKey::generate(&mut OsRng));
    assert!(w.hub.authenticate(&forged.encode()).is_err());
    assert_eq!(w.hub.registry().session_count(), 0);
}

#[tokio::test]
async fn message_to_offline_recipient_becomes_a_notification() {
    let w = world();
    let (_a_ctx, mut a_rx) = online(&w, w.a).await;

    let message = w
        .hub
        .router()
        .send(w.direct, w.a, "hi", MessageKind::Text)
        .await
        .unwrap();
    w.hub.dispatcher().idle().await;

    assert_eq!(message.status, DeliveryStatus::Sent);
    assert_eq!(w.store.get_message(message.id).unwrap().status, DeliveryStatus::Sent);

    // The sender's own device still sees the message.
    assert_eq!(of_type(&drain(&mut a_rx), EventType::NewMessage).len(), 1);

    let pending = w.store.unread_notifications(w.b).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind, NotificationType::NewMessage);
    assert_eq!(pending[0].data["messageId"], json!(message.id));
    assert!(w.store.unread_notifications(w.a).unwrap().is_empty());
}

#[tokio::test]
async fn message_to_online_recipient_is_delivered() {
    let w = world();
    let (a_ctx, _a_rx) = online(&w, w.a).await;
    let (_b_ctx, mut b_rx) = online(&w, w.b).await;

    w.hub
        .handle_frame(
            &a_ctx,
            ClientFrame::SendMessage {
                conversation_id: w.direct,
                content: "hello ben".into(),
                message_type: MessageKind::Text,
            },
        )
        .await
        .unwrap();
    w.hub.dispatcher().idle().await;

    let events = drain(&mut b_rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].destination, Destination::ConversationMessages(w.direct));
    assert_eq!(events[0].payload["content"], "hello ben");
    assert!(w.store.unread_notifications(w.b).unwrap().is_empty());
}

#[tokio::test]
async fn subscribers_see_messages_in_persist_order() {
    let w = world();
    let (_b_ctx, mut b_rx) = online(&w, w.b).await;

    let mut tasks = Vec::new();
    for sender in [w.a, w.c] {
        let hub = w.hub.clone();
        let group = w.group;
        tasks.push(tokio::spawn(async move {
            for i in 0..15 {
                hub.router()
                    .send(group, sender, &format!("{sender}-{i}"), MessageKind::Text)
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let seen: Vec<String> = drain(&mut b_rx)
        .into_iter()
        .filter(|e| e.event_type == EventType::NewMessage)
        .map(|e| e.payload["id"].as_str().unwrap().to_string())
        .collect();
    let mut stored: Vec<String> = w
        .store
        .with_db(|db| db.get_messages_for_conversation(w.group, 100, 0))
        .unwrap()
        .into_iter()
        .map(|m| m.id.to_string())
        .collect();
    stored.reverse();
    assert_eq!(seen.len(), 30);
    assert_eq!(seen, stored);
}

#[tokio::test]
async fn private_call_rings_then_answers_once() {
    let w = world();
    let (a_ctx, mut a_rx) = online(&w, w.a).await;
    let (b_ctx, mut b_rx) = online(&w, w.b).await;
    let call_id = CallId::from("c1");

    w.hub
        .handle_frame(
            &a_ctx,
            ClientFrame::StartCall {
                call_id: call_id.clone(),
                recipient_id: Some(w.b),
                conversation_id: None,
                call_type: CallType::Audio,
            },
        )
        .await
        .unwrap();
    assert_eq!(w.store.get_call(&call_id).unwrap().status, CallStatus::Ringing);

    let incoming = drain(&mut b_rx);
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].destination, Destination::UserCall(w.b, CallChannel::Incoming));
    assert_eq!(of_type(&drain(&mut a_rx), EventType::CallInitiated).len(), 1);

    let answer = ClientFrame::AnswerCall {
        call_id: call_id.clone(),
    };
    w.hub.handle_frame(&b_ctx, answer.clone()).await.unwrap();
    assert_eq!(w.store.get_call(&call_id).unwrap().status, CallStatus::Ongoing);

    let answered = drain(&mut a_rx);
    assert_eq!(answered.len(), 1);
    assert_eq!(answered[0].destination, Destination::UserCall(w.a, CallChannel::Answered));
    drain(&mut b_rx);

    // Answering again changes nothing and notifies nobody.
    w.hub.handle_frame(&b_ctx, answer).await.unwrap();
    assert_eq!(w.store.get_call(&call_id).unwrap().status, CallStatus::Ongoing);
    assert!(drain(&mut a_rx).is_empty());
    assert!(drain(&mut b_rx).is_empty());
}

#[tokio::test]
async fn ending_a_call_sets_duration_once() {
    let w = world();
    let (a_ctx, mut a_rx) = online(&w, w.a).await;
    let (b_ctx, mut b_rx) = online(&w, w.b).await;
    let call_id = CallId::from("c2");

    let calls = w.hub.calls();
    calls
        .initiate(call_id.clone(), w.a, CallScope::Private { recipient: w.b }, CallType::Video)
        .await
        .unwrap();
    calls.answer(&call_id, w.b).await.unwrap();
    w.hub
        .handle_frame(&a_ctx, ClientFrame::EndCall { call_id: call_id.clone() })
        .await
        .unwrap();

    let ended = w.store.get_call(&call_id).unwrap();
    assert_eq!(ended.status, CallStatus::Ended);
    assert!(ended.duration_secs.is_some());
    drain(&mut a_rx);
    drain(&mut b_rx);

    w.hub
        .handle_frame(&b_ctx, ClientFrame::EndCall { call_id: call_id.clone() })
        .await
        .unwrap();
    let again = w.store.get_call(&call_id).unwrap();
    assert_eq!(again.ended_at, ended.ended_at);
    assert_eq!(again.duration_secs, ended.duration_secs);
    assert!(drain(&mut a_rx).is_empty());
    assert!(drain(&mut b_rx).is_empty());
}

#[tokio::test]
async fn outsider_cannot_touch_a_call() {
    let w = world();
    let (c_ctx, mut c_rx) = online(&w, w.c).await;
    let call_id = CallId::from("c3");
    w.hub
        .calls()
        .initiate(call_id.clone(), w.a, CallScope::Private { recipient: w.b }, CallType::Audio)
        .await
        .unwrap();

    w.hub
        .dispatch(&c_ctx, ClientFrame::RejectCall { call_id: call_id.clone() })
        .await;

    assert_eq!(w.store.get_call(&call_id).unwrap().status, CallStatus::Ringing);
    let errors = drain(&mut c_rx);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].destination, Destination::UserErrors(w.c));
    assert_eq!(errors[0].payload["code"], "NOT_PARTICIPANT");
}

#[tokio::test]
async fn group_signal_without_conversation_is_dropped_silently() {
    let w = world();
    let (a_ctx, mut a_rx) = online(&w, w.a).await;
    let (_b_ctx, mut b_rx) = online(&w, w.b).await;
    let (_c_ctx, mut c_rx) = online(&w, w.c).await;
    for rx in [&mut a_rx, &mut b_rx] {
        drain(rx);
    }

    let stray = SignalFrame {
        call_id: CallId::from("g1"),
        signal_type: Some(SignalKind::Offer),
        recipient_id: None,
        conversation_id: None,
        payload: json!({ "sdp": "v=0" }),
    };
    w.hub.dispatch(&a_ctx, ClientFrame::GroupSignal(stray.clone())).await;

    assert!(drain(&mut a_rx).is_empty());
    assert!(drain(&mut b_rx).is_empty());
    assert!(drain(&mut c_rx).is_empty());

    let routed = SignalFrame {
        conversation_id: Some(w.group),
        ..stray
    };
    w.hub.dispatch(&a_ctx, ClientFrame::GroupSignal(routed)).await;
    assert!(drain(&mut a_rx).is_empty());
    let relayed = drain(&mut b_rx);
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0].destination, Destination::GroupCallSignals(w.group));
    assert_eq!(relayed[0].payload["senderId"], json!(w.a));
    assert_eq!(drain(&mut c_rx).len(), 1);
}

#[tokio::test]
async fn presence_fires_on_edges_only() {
    let w = world();
    let (_a_ctx, mut a_rx) = online(&w, w.a).await;

    let (first, _first_rx) = w.hub.connect(w.b).await;
    let (second, _second_rx) = w.hub.connect(w.b).await;

    // A shares two conversations with B, so one edge is two broadcasts.
    let events = drain(&mut a_rx);
    let online_events = of_type(&events, EventType::UserOnline);
    assert_eq!(online_events.len(), 2);
    assert!(online_events.iter().all(|e| e.payload["userId"] == json!(w.b)));
    assert!(of_type(&events, EventType::UserOffline).is_empty());
    assert_eq!(w.hub.registry().session_count_for(w.b), 2);

    w.hub.disconnect(&first).await;
    assert!(drain(&mut a_rx).is_empty());

    w.hub.disconnect(&second).await;
    let events = drain(&mut a_rx);
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.event_type == EventType::UserOffline));
    assert!(!w.hub.registry().is_online(w.b));
}

#[tokio::test]
async fn read_receipts_are_idempotent() {
    let w = world();
    let (_a_ctx, mut a_rx) = online(&w, w.a).await;

    let first = w.hub.router().send(w.direct, w.a, "one", MessageKind::Text).await.unwrap();
    let second = w.hub.router().send(w.direct, w.a, "two", MessageKind::Text).await.unwrap();
    drain(&mut a_rx);

    let (b_ctx, _b_rx) = online(&w, w.b).await;
    drain(&mut a_rx);

    let marked = w.hub.receipts().mark_read(w.direct, w.b).unwrap();
    assert_eq!(marked, vec![first.id, second.id]);
    let reads = drain(&mut a_rx);
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0].event_type, EventType::ConversationRead);

    w.hub
        .handle_frame(&b_ctx, ClientFrame::MarkRead { conversation_id: w.direct })
        .await
        .unwrap();
    assert!(drain(&mut a_rx).is_empty());
    assert!(!w.hub.receipts().mark_single_read(first.id, w.b).unwrap());
    assert!(!w.hub.receipts().mark_single_read(first.id, w.a).unwrap());
    assert_eq!(w.store.get_message(first.id).unwrap().status, DeliveryStatus::Seen);
}
