//! Integration tests for the messaging sync layer.
//!
//! These wire the conversation view, friend manager, and sync engine against
//! a mock durable store and a recording channel sink, then drive them with
//! the same events the transport would deliver.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;

use studylink::client::cache::{CacheKey, CacheValue, QueryCache};
use studylink::client::conversation::{
    shared_view_state, ActiveTab, ConversationView, SharedViewState,
};
use studylink::client::friends::FriendManager;
use studylink::client::models::entities::{
    ChatMessage, Conversation, FriendRequest, FriendStatus, Group, NewGroup, NewMessage,
    RequestKind, User,
};
use studylink::client::models::events::{ChannelEvent, OutgoingEvent};
use studylink::client::notify::{Notifier, Toast, ToastLevel};
use studylink::client::services::api_client::{ApiError, ApiFetcher, DurableApi};
use studylink::client::services::socket_client::{ChannelError, ChannelSink};
use studylink::client::session::SessionIdentity;
use studylink::client::sync::SyncEngine;

fn user(id: &str) -> User {
    User {
        id: id.to_string(),
        username: format!("user-{}", id),
        full_name: None,
        avatar: None,
        is_active: true,
        last_login: None,
        bio: None,
        location: None,
    }
}

fn request(from: &str, kind: RequestKind) -> FriendRequest {
    FriendRequest {
        id: from.to_string(),
        username: format!("user-{}", from),
        full_name: None,
        avatar: None,
        request_type: kind,
        friend_status: FriendStatus::Pending,
    }
}

fn msg(id: &str, from: &str, to: &str, at: i64) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        sender_id: from.to_string(),
        receiver_id: Some(to.to_string()),
        group_id: None,
        content: format!("message {}", id),
        message_type: "text".to_string(),
        is_read: false,
        created_at: Utc.timestamp_opt(at, 0).unwrap(),
    }
}

/// Backing store shared by every session's mock API, standing in for the
/// server's database.
#[derive(Default)]
struct MockStore {
    friends: Vec<User>,
    /// (recipient user id, request as the recipient sees it)
    pending: Vec<(String, FriendRequest)>,
    /// (sender user id, request as the sender sees it)
    sent: Vec<(String, FriendRequest)>,
    conversations: Vec<Conversation>,
    messages: Vec<ChatMessage>,
    groups: Vec<Group>,
    next_id: usize,
}

/// Session-scoped mock of the durable-write API. Records every call so tests
/// can assert that no network traffic happened.
struct MockApi {
    me: String,
    store: Arc<Mutex<MockStore>>,
    calls: Mutex<Vec<String>>,
}

impl MockApi {
    fn new(me: &str, store: Arc<Mutex<MockStore>>) -> Arc<Self> {
        Arc::new(Self {
            me: me.to_string(),
            store,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn seed_pending(store: &Arc<Mutex<MockStore>>, to: &str, from: &str) {
    let mut s = store.lock().unwrap();
    s.pending
        .push((to.to_string(), request(from, RequestKind::Received)));
    s.sent
        .push((from.to_string(), request(to, RequestKind::Sent)));
}

fn seed_friend(store: &Arc<Mutex<MockStore>>, id: &str) {
    store.lock().unwrap().friends.push(user(id));
}

#[async_trait]
impl DurableApi for MockApi {
    async fn conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.record("conversations");
        let s = self.store.lock().unwrap();
        Ok(s.conversations
            .iter()
            .filter(|c| c.user.id != self.me)
            .cloned()
            .collect())
    }

    async fn direct_messages(&self, peer_id: &str) -> Result<Vec<ChatMessage>, ApiError> {
        self.record(format!("direct_messages:{}", peer_id));
        let s = self.store.lock().unwrap();
        Ok(s.messages
            .iter()
            .filter(|m| {
                (m.sender_id == self.me && m.receiver_id.as_deref() == Some(peer_id))
                    || (m.sender_id == peer_id && m.receiver_id.as_deref() == Some(&self.me))
            })
            .cloned()
            .collect())
    }

    async fn group_messages(&self, group_id: &str) -> Result<Vec<ChatMessage>, ApiError> {
        self.record(format!("group_messages:{}", group_id));
        Ok(Vec::new())
    }

    async fn friends(&self) -> Result<Vec<User>, ApiError> {
        self.record("friends");
        let s = self.store.lock().unwrap();
        Ok(s.friends
            .iter()
            .filter(|u| u.id != self.me)
            .cloned()
            .collect())
    }

    async fn pending_requests(&self) -> Result<Vec<FriendRequest>, ApiError> {
        self.record("pending_requests");
        let s = self.store.lock().unwrap();
        Ok(s.pending
            .iter()
            .filter(|(to, _)| *to == self.me)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn sent_requests(&self) -> Result<Vec<FriendRequest>, ApiError> {
        self.record("sent_requests");
        let s = self.store.lock().unwrap();
        Ok(s.sent
            .iter()
            .filter(|(from, _)| *from == self.me)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn all_requests(&self) -> Result<Vec<FriendRequest>, ApiError> {
        self.record("all_requests");
        let mut all = self.pending_requests().await?;
        all.extend(self.sent_requests().await?);
        Ok(all)
    }

    async fn groups(&self) -> Result<Vec<Group>, ApiError> {
        self.record("groups");
        Ok(self.store.lock().unwrap().groups.clone())
    }

    async fn send_message(&self, draft: &NewMessage) -> Result<ChatMessage, ApiError> {
        self.record("send_message");
        let mut s = self.store.lock().unwrap();
        s.next_id += 1;
        let canonical = ChatMessage {
            id: format!("srv-{}", s.next_id),
            sender_id: self.me.clone(),
            receiver_id: draft.receiver_id.clone(),
            group_id: draft.group_id.clone(),
            content: draft.content.clone(),
            message_type: draft.message_type.clone(),
            is_read: false,
            created_at: Utc::now(),
        };
        s.messages.push(canonical.clone());
        Ok(canonical)
    }

    async fn mark_read(&self, peer_id: &str) -> Result<(), ApiError> {
        self.record(format!("mark_read:{}", peer_id));
        Ok(())
    }

    async fn send_friend_request(&self, target_id: &str) -> Result<(), ApiError> {
        self.record(format!("send_friend_request:{}", target_id));
        let mut s = self.store.lock().unwrap();
        let exists = s
            .pending
            .iter()
            .any(|(to, r)| (*to == target_id && r.id == self.me) || (*to == self.me && r.id == target_id));
        if exists {
            return Err(ApiError::Conflict("request already exists".to_string()));
        }
        s.pending
            .push((target_id.to_string(), request(&self.me, RequestKind::Received)));
        s.sent
            .push((self.me.clone(), request(target_id, RequestKind::Sent)));
        Ok(())
    }

    async fn accept_friend_request(&self, requester_id: &str) -> Result<(), ApiError> {
        self.record(format!("accept_friend_request:{}", requester_id));
        let mut s = self.store.lock().unwrap();
        let before = s.pending.len();
        s.pending
            .retain(|(to, r)| !(*to == self.me && r.id == requester_id));
        if s.pending.len() == before {
            return Err(ApiError::Conflict("request already resolved".to_string()));
        }
        s.sent
            .retain(|(from, r)| !(*from == requester_id && r.id == self.me));
        for id in [requester_id, self.me.as_str()] {
            if !s.friends.iter().any(|u| u.id == id) {
                s.friends.push(user(id));
            }
            s.conversations.push(Conversation {
                user: user(id),
                last_message: None,
                unread_count: 0,
            });
        }
        Ok(())
    }

    async fn reject_friend_request(&self, requester_id: &str) -> Result<(), ApiError> {
        self.record(format!("reject_friend_request:{}", requester_id));
        let mut s = self.store.lock().unwrap();
        let before = s.pending.len();
        s.pending
            .retain(|(to, r)| !(*to == self.me && r.id == requester_id));
        if s.pending.len() == before {
            return Err(ApiError::Conflict("request already resolved".to_string()));
        }
        Ok(())
    }

    async fn delete_friend_request(&self, request_id: &str) -> Result<(), ApiError> {
        self.record(format!("delete_friend_request:{}", request_id));
        let mut s = self.store.lock().unwrap();
        let before = s.sent.len();
        s.sent
            .retain(|(from, r)| !(*from == self.me && r.id == request_id));
        if s.sent.len() == before {
            return Err(ApiError::NotFound("no such request".to_string()));
        }
        Ok(())
    }

    async fn create_group(&self, group: &NewGroup) -> Result<Group, ApiError> {
        self.record(format!("create_group:{}", group.member_ids.join(",")));
        let mut s = self.store.lock().unwrap();
        s.next_id += 1;
        let created = Group {
            id: format!("g-{}", s.next_id),
            name: group.name.clone(),
            description: group.description.clone(),
            avatar: None,
            member_count: group.member_ids.len() as u32 + 1,
            last_message: None,
            created_by: Some(self.me.clone()),
        };
        s.groups.push(created.clone());
        Ok(created)
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<OutgoingEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<OutgoingEvent> {
        self.events.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl ChannelSink for RecordingSink {
    fn emit(&self, event: OutgoingEvent) -> Result<(), ChannelError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

struct Harness {
    api: Arc<MockApi>,
    cache: QueryCache,
    view: Arc<ConversationView>,
    friends: FriendManager,
    engine: SyncEngine,
    sink: Arc<RecordingSink>,
    toasts: mpsc::UnboundedReceiver<Toast>,
    state: SharedViewState,
}

impl Harness {
    fn drain_toasts(&mut self) -> Vec<Toast> {
        let mut out = Vec::new();
        while let Ok(toast) = self.toasts.try_recv() {
            out.push(toast);
        }
        out
    }

    fn cached_messages(&self, peer: &str) -> Vec<ChatMessage> {
        match self.cache.get(&CacheKey::DirectMessages(peer.to_string())) {
            Some(CacheValue::Messages(msgs)) => msgs,
            _ => Vec::new(),
        }
    }

    fn cached_friend_ids(&self) -> Vec<String> {
        match self.cache.get(&CacheKey::Friends) {
            Some(CacheValue::Friends(users)) => users.into_iter().map(|u| u.id).collect(),
            _ => Vec::new(),
        }
    }

    fn cached_pending_ids(&self) -> Vec<String> {
        match self.cache.get(&CacheKey::PendingRequests) {
            Some(CacheValue::Requests(reqs)) => reqs.into_iter().map(|r| r.id).collect(),
            _ => Vec::new(),
        }
    }
}

fn harness(store: Arc<Mutex<MockStore>>, user_id: &str) -> Harness {
    let session = SessionIdentity::new(user_id, "test-token");
    let api = MockApi::new(user_id, store);
    let dyn_api: Arc<dyn DurableApi> = api.clone();
    let cache = QueryCache::new(Arc::new(ApiFetcher::new(dyn_api.clone())));
    let (notifier, toasts) = Notifier::new();
    let sink = Arc::new(RecordingSink::default());
    let state = shared_view_state();
    let view = Arc::new(ConversationView::new(
        session.clone(),
        cache.clone(),
        dyn_api.clone(),
        sink.clone(),
        notifier.clone(),
        state.clone(),
    ));
    let friends = FriendManager::new(
        session,
        cache.clone(),
        dyn_api,
        notifier.clone(),
        state.clone(),
    );
    let engine = SyncEngine::new(cache.clone(), notifier, view.clone(), state.clone());
    Harness {
        api,
        cache,
        view,
        friends,
        engine,
        sink,
        toasts,
        state,
    }
}

fn single_harness() -> Harness {
    harness(Arc::new(Mutex::new(MockStore::default())), "u1")
}

#[tokio::test]
async fn duplicate_delivery_displays_one_instance() {
    let h = single_harness();
    h.view.select_direct("u2").await;
    h.cache.wait_idle().await;

    let m = msg("m1", "u2", "u1", 100);
    h.engine.handle(ChannelEvent::NewMessage(m.clone()));
    h.engine.handle(ChannelEvent::NewMessage(m));
    h.cache.wait_idle().await;

    let msgs = h.cached_messages("u2");
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].id, "m1");
}

#[tokio::test]
async fn messages_for_other_peers_are_not_appended_to_active_thread() {
    let h = single_harness();
    h.view.select_direct("u2").await;
    h.cache.wait_idle().await;

    h.engine.handle(ChannelEvent::NewMessage(msg("m9", "u9", "u1", 100)));
    h.cache.wait_idle().await;

    assert!(h.cached_messages("u2").is_empty());
    // the conversations summary still refreshed, so the unread badge moves
    assert!(h.api.calls().iter().filter(|c| *c == "conversations").count() >= 1);
}

#[tokio::test]
async fn out_of_order_delivery_displays_in_timestamp_order() {
    let h = single_harness();
    h.view.select_direct("u2").await;
    h.cache.wait_idle().await;

    h.engine.handle(ChannelEvent::NewMessage(msg("m2", "u2", "u1", 200)));
    h.engine.handle(ChannelEvent::NewMessage(msg("m1", "u2", "u1", 100)));
    h.cache.wait_idle().await;

    let ids: Vec<_> = h.cached_messages("u2").iter().map(|m| m.id.clone()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
}

#[tokio::test]
async fn send_reconciles_optimistic_entry_with_canonical_id() {
    let mut h = single_harness();
    h.view.select_direct("u2").await;
    h.cache.wait_idle().await;

    h.view.draft_changed("hello there".to_string());
    h.view.send_draft().await;
    h.cache.wait_idle().await;

    let msgs = h.cached_messages("u2");
    assert_eq!(msgs.len(), 1);
    assert!(msgs[0].id.starts_with("srv-"), "expected canonical id, got {}", msgs[0].id);
    assert_eq!(h.view.draft(), "");
    assert!(h
        .sink
        .events()
        .iter()
        .any(|e| matches!(e, OutgoingEvent::SendMessage { .. })));
    assert!(h.drain_toasts().iter().all(|t| t.level != ToastLevel::Error));
}

#[tokio::test]
async fn whitespace_draft_triggers_no_network_call() {
    let h = single_harness();
    h.view.select_direct("u2").await;
    h.cache.wait_idle().await;

    let calls_before = h.api.calls().len();
    let events_before = h.sink.events().len();

    h.view.draft_changed("   \n  ".to_string());
    h.view.send_draft().await;

    assert_eq!(h.api.calls().len(), calls_before);
    assert_eq!(h.sink.events().len(), events_before);
    assert!(h.cached_messages("u2").is_empty());
}

#[tokio::test]
async fn shift_enter_inserts_newline_without_submitting() {
    let h = single_harness();
    h.view.select_direct("u2").await;
    h.cache.wait_idle().await;

    let calls_before = h.api.calls().len();
    h.view.draft_changed("first line".to_string());
    h.view.enter_pressed(true).await;

    assert_eq!(h.view.draft(), "first line\n");
    assert_eq!(h.api.calls().len(), calls_before);
}

#[tokio::test]
async fn typing_indicator_scoped_to_active_peer_and_cleared_on_switch() {
    let h = single_harness();
    h.view.select_direct("u2").await;
    h.cache.wait_idle().await;

    // events for non-active peers are ignored
    h.engine.handle(ChannelEvent::UserTyping {
        user_id: "u9".to_string(),
        is_typing: true,
    });
    assert!(h.view.typing_peers().is_empty());

    h.engine.handle(ChannelEvent::UserTyping {
        user_id: "u2".to_string(),
        is_typing: true,
    });
    assert!(h.view.typing_peers().contains("u2"));

    h.view.select_direct("u3").await;
    assert!(h.view.typing_peers().is_empty());
}

#[tokio::test]
async fn switching_threads_emits_stop_typing_to_previous_peer() {
    let h = single_harness();
    h.view.select_direct("u2").await;
    h.cache.wait_idle().await;

    h.view.draft_changed("half-written".to_string());
    h.sink.clear();

    h.view.select_direct("u3").await;
    assert!(h.sink.events().iter().any(|e| matches!(
        e,
        OutgoingEvent::Typing { peer_id, is_typing: false } if peer_id == "u2"
    )));

    // no start edge was ever sent to u3, so switching again owes it nothing
    h.sink.clear();
    h.view.select_direct("u4").await;
    assert!(!h
        .sink
        .events()
        .iter()
        .any(|e| matches!(e, OutgoingEvent::Typing { .. })));
}

#[tokio::test]
async fn opening_direct_thread_marks_messages_read_once() {
    let h = single_harness();
    h.view.select_direct("u2").await;
    h.cache.wait_idle().await;

    let reads = |h: &Harness| h.api.calls().iter().filter(|c| *c == "mark_read:u2").count();
    assert_eq!(reads(&h), 1);

    // idempotent re-selection is not a re-open
    h.view.select_direct("u2").await;
    h.cache.wait_idle().await;
    assert_eq!(reads(&h), 1);
}

#[tokio::test]
async fn accept_request_updates_friends_pending_and_conversations() {
    let store = Arc::new(Mutex::new(MockStore::default()));
    seed_pending(&store, "u1", "u2");
    let mut h = harness(store, "u1");
    h.cache.refresh(CacheKey::PendingRequests).await;
    assert_eq!(h.cached_pending_ids(), vec!["u2"]);

    h.friends.accept_request("u2").await;
    h.cache.wait_idle().await;

    assert!(h.cached_pending_ids().is_empty());
    assert!(h.cached_friend_ids().contains(&"u2".to_string()));
    match h.cache.get(&CacheKey::Conversations) {
        Some(CacheValue::Conversations(convs)) => {
            assert!(convs.iter().any(|c| c.user.id == "u2"));
        }
        other => panic!("conversations not refreshed: {:?}", other),
    }
    assert_eq!(h.state.lock().unwrap().tab, ActiveTab::Chats);
    assert!(h
        .drain_toasts()
        .iter()
        .any(|t| t.level == ToastLevel::Success));
}

#[tokio::test]
async fn double_reject_fails_gracefully_with_toast() {
    let store = Arc::new(Mutex::new(MockStore::default()));
    seed_pending(&store, "u1", "u2");
    let mut h = harness(store, "u1");

    h.friends.reject_request("u2").await;
    h.cache.wait_idle().await;
    h.drain_toasts();
    assert!(h.cached_pending_ids().is_empty());

    h.friends.reject_request("u2").await;
    h.cache.wait_idle().await;

    let toasts = h.drain_toasts();
    assert!(toasts.iter().any(|t| t.level == ToastLevel::Error));
    assert!(h.cached_pending_ids().is_empty());
}

#[tokio::test]
async fn self_friend_request_is_rejected_before_dispatch() {
    let mut h = single_harness();
    h.friends.send_request("u1").await;

    assert!(h.api.calls().is_empty());
    assert!(h.drain_toasts().iter().any(|t| t.level == ToastLevel::Error));
}

#[tokio::test]
async fn empty_group_name_is_rejected_before_dispatch() {
    let mut h = single_harness();
    h.friends.create_group("   ", None, vec!["u2".to_string()]).await;

    assert!(h.api.calls().is_empty());
    assert!(h.drain_toasts().iter().any(|t| t.level == ToastLevel::Error));
}

#[tokio::test]
async fn create_group_prefilters_non_friend_members() {
    let store = Arc::new(Mutex::new(MockStore::default()));
    seed_friend(&store, "u2");
    let h = harness(store, "u1");
    h.cache.refresh(CacheKey::Friends).await;

    h.friends
        .create_group(
            "study group",
            Some("exam prep".to_string()),
            vec!["u2".to_string(), "u9".to_string()],
        )
        .await;
    h.cache.wait_idle().await;

    assert!(h.api.calls().iter().any(|c| c == "create_group:u2"));
}

#[tokio::test]
async fn friend_request_received_event_refreshes_pending_and_toasts() {
    let store = Arc::new(Mutex::new(MockStore::default()));
    let mut h = harness(store.clone(), "u1");
    h.cache.refresh(CacheKey::PendingRequests).await;

    // the server push arrives together with the new durable state
    seed_pending(&store, "u1", "u2");
    h.engine.handle(ChannelEvent::FriendRequestReceived { from: user("u2") });
    h.cache.wait_idle().await;

    assert_eq!(h.cached_pending_ids(), vec!["u2"]);
    let toasts = h.drain_toasts();
    assert!(toasts
        .iter()
        .any(|t| t.level == ToastLevel::Info && t.message.contains("user-u2")));
}

#[tokio::test]
async fn reconnect_reissues_join_chat_for_active_peer() {
    let h = single_harness();
    h.view.select_direct("u2").await;
    h.cache.wait_idle().await;
    h.sink.clear();

    h.engine.handle(ChannelEvent::Disconnected);
    assert!(!h.engine.is_connected());

    h.engine.handle(ChannelEvent::Connected);
    assert!(h.engine.is_connected());
    assert!(h.sink.events().iter().any(|e| matches!(
        e,
        OutgoingEvent::JoinChat { peer_id, user_id } if peer_id == "u2" && user_id == "u1"
    )));
}

#[tokio::test]
async fn send_request_then_accept_converges_both_sides() {
    let store = Arc::new(Mutex::new(MockStore::default()));
    let mut a = harness(store.clone(), "uA");
    let b = harness(store.clone(), "uB");

    a.friends.send_request("uB").await;
    a.cache.wait_idle().await;

    // transport fans the request out to B
    b.engine.handle(ChannelEvent::FriendRequestReceived { from: user("uA") });
    b.cache.wait_idle().await;
    assert_eq!(b.cached_pending_ids(), vec!["uA"]);

    b.friends.accept_request("uA").await;
    b.cache.wait_idle().await;
    assert!(b.cached_friend_ids().contains(&"uA".to_string()));

    // and the acceptance back to A
    a.engine.handle(ChannelEvent::FriendRequestAccepted { by: user("uB") });
    a.cache.wait_idle().await;
    assert!(a.cached_friend_ids().contains(&"uB".to_string()));
    match a.cache.get(&CacheKey::Conversations) {
        Some(CacheValue::Conversations(convs)) => {
            assert!(convs.iter().any(|c| c.user.id == "uB"));
        }
        other => panic!("conversations not refreshed: {:?}", other),
    }
    assert!(a
        .drain_toasts()
        .iter()
        .any(|t| t.level == ToastLevel::Success && t.message.contains("user-uB")));
}

#[tokio::test]
async fn late_refetch_lands_in_peer_scoped_key_not_the_visible_thread() {
    let store = Arc::new(Mutex::new(MockStore::default()));
    store
        .lock()
        .unwrap()
        .messages
        .push(msg("m1", "u2", "u1", 100));
    let h = harness(store, "u1");

    h.view.select_direct("u2").await;
    // switch away before the refetch resolves
    h.view.select_direct("u3").await;
    h.cache.wait_idle().await;

    assert_eq!(h.cached_messages("u2").len(), 1);
    assert!(h.cached_messages("u3").is_empty());
}
