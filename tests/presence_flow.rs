//! End-to-end presence and fan-out scenarios over the in-process transport
//! Run with: cargo test --test presence_flow

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pinset_chat::application::errors::{StorageError, TransportError};
use pinset_chat::application::presence::{
    PresenceRegistry, PresenceSession, SessionContext, SessionExit,
};
use pinset_chat::application::services::{ConversationDirectory, DeliveryPolicy, FanoutCoordinator};
use pinset_chat::domain::entities::{ChatId, ChatMessage, MessageId, NewMessage, UserId, UserProfile};
use pinset_chat::domain::traits::MessageStore;
use pinset_chat::infrastructure::adapters::channel::{self, ChannelPeer};
use pinset_chat::infrastructure::storage::{MemoryIdentity, MemoryStore};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(100);

const ALICE: UserId = 1;
const BOB: UserId = 2;
const CAROL: UserId = 3;

/// Records every accepted CreateMessage and can be told to refuse writes
struct RecordingStore {
    inner: MemoryStore,
    refuse_writes: AtomicBool,
    created: Mutex<Vec<(UserId, ChatId, String)>>,
}

impl RecordingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            refuse_writes: AtomicBool::new(false),
            created: Mutex::new(Vec::new()),
        }
    }

    fn created(&self) -> Vec<(UserId, ChatId, String)> {
        self.created.lock().clone()
    }
}

#[async_trait]
impl MessageStore for RecordingStore {
    async fn create_message(&self, message: &NewMessage) -> Result<MessageId, StorageError> {
        if self.refuse_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("disk full".into()));
        }
        let id = self.inner.create_message(message).await?;
        self.created
            .lock()
            .push((message.sender_id, message.chat_id, message.content.clone()));
        Ok(id)
    }

    async fn get_chat_messages(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>, StorageError> {
        self.inner.get_chat_messages(chat_id).await
    }

    async fn get_chat_users(&self, chat_id: ChatId) -> Result<BTreeSet<UserId>, StorageError> {
        self.inner.get_chat_users(chat_id).await
    }

    async fn get_user_chats(&self, user_id: UserId) -> Result<Vec<ChatId>, StorageError> {
        self.inner.get_user_chats(user_id).await
    }

    async fn create_chat(&self) -> Result<ChatId, StorageError> {
        self.inner.create_chat().await
    }

    async fn add_user_to_chat(&self, chat_id: ChatId, user_id: UserId) -> Result<(), StorageError> {
        self.inner.add_user_to_chat(chat_id, user_id).await
    }

    async fn delete_chat(&self, chat_id: ChatId) -> Result<(), StorageError> {
        self.inner.delete_chat(chat_id).await
    }
}

struct Harness {
    ctx: SessionContext,
    store: Arc<RecordingStore>,
    directory: Arc<ConversationDirectory>,
}

impl Harness {
    fn new(policy: DeliveryPolicy) -> Self {
        let store = Arc::new(RecordingStore::new());
        let identity = Arc::new(
            MemoryIdentity::new()
                .with_user(UserProfile::new(ALICE, "alice"))
                .with_user(UserProfile::new(BOB, "bob"))
                .with_user(UserProfile::new(CAROL, "carol")),
        );
        let directory = Arc::new(ConversationDirectory::new(store.clone(), identity));
        let registry = Arc::new(PresenceRegistry::new());
        let coordinator = Arc::new(FanoutCoordinator::new(
            store.clone(),
            directory.clone(),
            registry.clone(),
            policy,
        ));
        Self {
            ctx: SessionContext {
                registry,
                coordinator,
                queue_capacity: 32,
                shutdown: CancellationToken::new(),
            },
            store,
            directory,
        }
    }

    async fn chat(&self, a: UserId, b: UserId) -> ChatId {
        self.directory.create_conversation(a, b).await.unwrap().chat_id
    }

    async fn connect(&self, user_id: UserId) -> (ChannelPeer, JoinHandle<SessionExit>) {
        let (transport, peer) = channel::pair();
        let session = PresenceSession::new(user_id, transport, self.ctx.clone());
        let task = tokio::spawn(session.run());

        let registry = self.ctx.registry.clone();
        tokio::time::timeout(WAIT, async move {
            while !registry.is_present(user_id) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("session never came online");
        (peer, task)
    }
}

async fn hang_up(mut peer: ChannelPeer, task: JoinHandle<SessionExit>) -> SessionExit {
    peer.disconnect();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap()
}

#[tokio::test]
async fn both_online_message_reaches_only_the_other_participant() {
    let h = Harness::new(DeliveryPolicy::Drop);
    let chat = h.chat(ALICE, BOB).await;
    let (mut alice, alice_task) = h.connect(ALICE).await;
    let (mut bob, bob_task) = h.connect(BOB).await;

    alice.send_json(json!({"chat_id": chat, "content": "hi"})).await;

    let event = bob.next_event(WAIT).await.expect("bob got nothing");
    assert_eq!(event["type"], "message");
    assert_eq!(event["data"]["sender_id"], ALICE);
    assert_eq!(event["data"]["chat_id"], chat);
    assert_eq!(event["data"]["content"], "hi");
    assert!(event["data"]["message_id"].is_u64());
    assert!(event["data"]["created_at"].is_string());

    assert!(alice.next_event(QUIET).await.is_none());
    assert_eq!(h.store.created(), vec![(ALICE, chat, "hi".to_string())]);

    hang_up(alice, alice_task).await;
    hang_up(bob, bob_task).await;
}

#[tokio::test]
async fn offline_participant_is_skipped_without_error() {
    let h = Harness::new(DeliveryPolicy::Drop);
    let chat = h.chat(ALICE, BOB).await;
    let (mut alice, alice_task) = h.connect(ALICE).await;

    alice.send_json(json!({"chat_id": chat, "content": "anyone?"})).await;

    assert!(alice.next_event(QUIET).await.is_none());
    assert_eq!(h.store.created(), vec![(ALICE, chat, "anyone?".to_string())]);

    // Bob reads it later through the history path
    let history = h.directory.chat_history(chat).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "anyone?");

    hang_up(alice, alice_task).await;
}

#[tokio::test]
async fn failed_persist_delivers_nothing() {
    let h = Harness::new(DeliveryPolicy::Drop);
    let chat = h.chat(ALICE, BOB).await;
    let (mut alice, alice_task) = h.connect(ALICE).await;
    let (mut bob, bob_task) = h.connect(BOB).await;

    h.store.refuse_writes.store(true, Ordering::SeqCst);
    alice.send_json(json!({"chat_id": chat, "content": "lost"})).await;

    let event = alice.next_event(WAIT).await.expect("alice got no error");
    assert_eq!(event["type"], "error");
    assert!(bob.next_event(QUIET).await.is_none());
    assert!(h.store.created().is_empty());

    hang_up(alice, alice_task).await;
    hang_up(bob, bob_task).await;
}

#[tokio::test]
async fn dropped_connection_is_cleaned_up_once() {
    let h = Harness::new(DeliveryPolicy::Drop);
    let (alice, alice_task) = h.connect(ALICE).await;

    alice.fail(TransportError::Reset("broken pipe".into())).await;
    let exit = tokio::time::timeout(WAIT, alice_task).await.unwrap().unwrap();

    assert!(matches!(exit, SessionExit::ReadFailed(_)));
    assert!(!h.ctx.registry.is_present(ALICE));
    assert_eq!(alice.close_count(), 1);

    // Removing again is harmless
    assert!(h.ctx.registry.remove(ALICE).is_none());
    assert!(!h.ctx.registry.is_present(ALICE));
}

#[tokio::test]
async fn frames_are_persisted_and_delivered_in_order() {
    for policy in [
        DeliveryPolicy::Drop,
        DeliveryPolicy::BoundedWait(Duration::from_millis(200)),
    ] {
        let h = Harness::new(policy);
        let chat = h.chat(ALICE, BOB).await;
        let (alice, alice_task) = h.connect(ALICE).await;
        let (mut bob, bob_task) = h.connect(BOB).await;

        for text in ["m1", "m2", "m3"] {
            alice.send_json(json!({"chat_id": chat, "content": text})).await;
        }

        let mut received = Vec::new();
        for _ in 0..3 {
            let event = bob.next_event(WAIT).await.expect("missing delivery");
            received.push(event["data"]["content"].as_str().unwrap().to_string());
        }
        assert_eq!(received, vec!["m1", "m2", "m3"]);

        let created: Vec<_> = h.store.created().into_iter().map(|(sender, _, text)| {
            assert_eq!(sender, ALICE);
            text
        }).collect();
        assert_eq!(created, vec!["m1", "m2", "m3"]);

        hang_up(alice, alice_task).await;
        hang_up(bob, bob_task).await;
    }
}

#[tokio::test]
async fn group_chat_fans_out_to_every_other_online_member() {
    let h = Harness::new(DeliveryPolicy::Drop);
    let chat = h.chat(ALICE, BOB).await;
    h.store.add_user_to_chat(chat, CAROL).await.unwrap();

    let (mut alice, alice_task) = h.connect(ALICE).await;
    let (mut bob, bob_task) = h.connect(BOB).await;
    let (mut carol, carol_task) = h.connect(CAROL).await;

    bob.send_json(json!({"chat_id": chat, "content": "all hands"})).await;

    assert_eq!(alice.next_event(WAIT).await.unwrap()["data"]["content"], "all hands");
    assert_eq!(carol.next_event(WAIT).await.unwrap()["data"]["content"], "all hands");
    assert!(bob.next_event(QUIET).await.is_none());

    hang_up(alice, alice_task).await;
    hang_up(bob, bob_task).await;
    hang_up(carol, carol_task).await;
}

#[tokio::test]
async fn reconnect_replaces_the_previous_connection() {
    let h = Harness::new(DeliveryPolicy::Drop);
    let chat = h.chat(ALICE, BOB).await;
    let (old_bob, old_task) = h.connect(BOB).await;
    let old_id = h.ctx.registry.get(BOB).unwrap().id();

    let (transport, mut new_bob) = channel::pair();
    let new_task = tokio::spawn(PresenceSession::new(BOB, transport, h.ctx.clone()).run());

    let exit = tokio::time::timeout(WAIT, old_task).await.unwrap().unwrap();
    assert_eq!(exit, SessionExit::Evicted);
    assert_eq!(old_bob.close_count(), 1);
    assert_ne!(h.ctx.registry.get(BOB).unwrap().id(), old_id);

    let (alice, alice_task) = h.connect(ALICE).await;
    alice.send_json(json!({"chat_id": chat, "content": "still there?"})).await;
    assert_eq!(new_bob.next_event(WAIT).await.unwrap()["data"]["content"], "still there?");

    hang_up(alice, alice_task).await;
    hang_up(new_bob, new_task).await;
}

#[tokio::test]
async fn sender_cannot_post_into_a_chat_they_are_not_in() {
    let h = Harness::new(DeliveryPolicy::Drop);
    let chat = h.chat(ALICE, BOB).await;
    let (mut carol, carol_task) = h.connect(CAROL).await;
    let (mut bob, bob_task) = h.connect(BOB).await;

    carol.send_json(json!({"chat_id": chat, "content": "let me in"})).await;

    let event = carol.next_event(WAIT).await.unwrap();
    assert_eq!(event, json!({"type": "error", "data": "failed to add message to chat"}));
    assert!(bob.next_event(QUIET).await.is_none());

    hang_up(carol, carol_task).await;
    hang_up(bob, bob_task).await;
}

#[tokio::test]
async fn server_shutdown_ends_every_session() {
    let h = Harness::new(DeliveryPolicy::Drop);
    let (alice, alice_task) = h.connect(ALICE).await;
    let (bob, bob_task) = h.connect(BOB).await;

    h.ctx.shutdown.cancel();

    assert_eq!(alice_task.await.unwrap(), SessionExit::Shutdown);
    assert_eq!(bob_task.await.unwrap(), SessionExit::Shutdown);
    assert_eq!(h.ctx.registry.count(), 0);
    assert_eq!(alice.close_count(), 1);
    assert_eq!(bob.close_count(), 1);
}
