use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use crate::client::cache::{CacheKey, CacheValue, QueryCache};
use crate::client::models::entities::{ChatMessage, NewMessage};
use crate::client::models::events::OutgoingEvent;
use crate::client::notify::Notifier;
use crate::client::services::api_client::DurableApi;
use crate::client::services::socket_client::ChannelSink;
use crate::client::session::SessionIdentity;

/// Which thread the user is looking at, if any.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ActiveThread {
    #[default]
    None,
    Direct(String),
    Group(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveTab {
    #[default]
    Chats,
    Friends,
    Requests,
    Groups,
}

/// View-level state shared between the conversation view, the friend manager
/// (tab switching) and the sync engine (connection flag, rejoin).
#[derive(Debug, Default)]
pub struct ViewState {
    pub thread: ActiveThread,
    pub tab: ActiveTab,
    pub draft: String,
    pub sending: bool,
    /// Peers currently typing, scoped to the active direct thread only.
    pub typing_peers: HashSet<String>,
    /// Last typing edge emitted on the channel, to avoid repeat emissions.
    pub typing_sent: bool,
    /// Temp ids of optimistic sends awaiting durable confirmation.
    pub pending_sends: Vec<String>,
    pub connected: bool,
}

pub type SharedViewState = Arc<Mutex<ViewState>>;

pub fn shared_view_state() -> SharedViewState {
    Arc::new(Mutex::new(ViewState::default()))
}

/// Logic behind the active conversation thread.
///
/// Sends go out twice: a fire-and-forget `send_message` on the transport
/// channel for low-latency echo to the peer, and a durable write whose
/// response carries the canonical message. The optimistic entry is reconciled
/// against the canonical id, never duplicated.
pub struct ConversationView {
    session: SessionIdentity,
    cache: QueryCache,
    api: Arc<dyn DurableApi>,
    sink: Arc<dyn ChannelSink>,
    notifier: Notifier,
    state: SharedViewState,
}

impl ConversationView {
    pub fn new(
        session: SessionIdentity,
        cache: QueryCache,
        api: Arc<dyn DurableApi>,
        sink: Arc<dyn ChannelSink>,
        notifier: Notifier,
        state: SharedViewState,
    ) -> Self {
        Self {
            session,
            cache,
            api,
            sink,
            notifier,
            state,
        }
    }

    /// Open the direct thread with `peer_id`. Clears the typing set and the
    /// compose draft on a thread change; `join_chat` is idempotent and
    /// re-emitted on every selection.
    pub async fn select_direct(&self, peer_id: &str) {
        let (changed, stale_typing) = {
            let mut state = self.state.lock().unwrap();
            let target = ActiveThread::Direct(peer_id.to_string());
            let changed = state.thread != target;
            let mut stale_typing = None;
            if changed {
                stale_typing = Self::take_typing_peer(&mut state);
                state.thread = target;
                state.typing_peers.clear();
                state.draft.clear();
            }
            (changed, stale_typing)
        };
        if let Some(prev) = stale_typing {
            self.emit_stop_typing(prev);
        }
        self.emit_join(peer_id);

        // messages received while this thread was inactive never got appended,
        // so a (re)open always refetches; readers keep the stale list meanwhile
        let key = CacheKey::DirectMessages(peer_id.to_string());
        if changed || self.cache.get(&key).is_none() {
            self.cache.invalidate(key);
        }
        if changed {
            // opening a thread clears its unread count server-side
            if let Err(e) = self.api.mark_read(peer_id).await {
                log::warn!("[VIEW] mark_read failed for {}: {}", peer_id, e);
            }
            self.cache.invalidate(CacheKey::Conversations);
        }
    }

    /// Open a group thread. Same clearing rules as a direct selection.
    pub fn select_group(&self, group_id: &str) {
        let (changed, stale_typing) = {
            let mut state = self.state.lock().unwrap();
            let target = ActiveThread::Group(group_id.to_string());
            let changed = state.thread != target;
            let mut stale_typing = None;
            if changed {
                stale_typing = Self::take_typing_peer(&mut state);
                state.thread = target;
                state.typing_peers.clear();
                state.draft.clear();
            }
            (changed, stale_typing)
        };
        if let Some(prev) = stale_typing {
            self.emit_stop_typing(prev);
        }

        let key = CacheKey::GroupMessages(group_id.to_string());
        if changed || self.cache.get(&key).is_none() {
            self.cache.invalidate(key);
        }
    }

    pub fn clear_selection(&self) {
        let stale_typing = {
            let mut state = self.state.lock().unwrap();
            let stale_typing = Self::take_typing_peer(&mut state);
            state.thread = ActiveThread::None;
            state.typing_peers.clear();
            state.draft.clear();
            stale_typing
        };
        if let Some(prev) = stale_typing {
            self.emit_stop_typing(prev);
        }
    }

    /// Update the compose draft, emitting a typing start/stop edge to the
    /// active direct peer when the emptiness of the draft flips.
    pub fn draft_changed(&self, text: String) {
        let edge = {
            let mut state = self.state.lock().unwrap();
            state.draft = text;
            let is_typing = !state.draft.trim().is_empty();
            if state.typing_sent == is_typing {
                None
            } else if let ActiveThread::Direct(peer) = &state.thread {
                let peer_id = peer.clone();
                state.typing_sent = is_typing;
                Some(OutgoingEvent::Typing { peer_id, is_typing })
            } else {
                None
            }
        };
        if let Some(event) = edge {
            if let Err(e) = self.sink.emit(event) {
                log::debug!("[VIEW] typing event not sent: {}", e);
            }
        }
    }

    /// Enter submits; Shift+Enter inserts a literal newline and never submits.
    pub async fn enter_pressed(&self, shift: bool) {
        if shift {
            let mut state = self.state.lock().unwrap();
            state.draft.push('\n');
        } else {
            self.send_draft().await;
        }
    }

    /// Send the current draft to the active thread. No network traffic at all
    /// when the trimmed draft is empty or a send is already in flight.
    pub async fn send_draft(&self) {
        let (thread, content) = {
            let mut state = self.state.lock().unwrap();
            if state.sending {
                return;
            }
            let content = state.draft.trim().to_string();
            if content.is_empty() {
                return;
            }
            if state.thread == ActiveThread::None {
                return;
            }
            state.sending = true;
            (state.thread.clone(), content)
        };

        let (key, receiver_id, group_id) = match &thread {
            ActiveThread::Direct(peer) => (
                CacheKey::DirectMessages(peer.clone()),
                Some(peer.clone()),
                None,
            ),
            ActiveThread::Group(group) => (
                CacheKey::GroupMessages(group.clone()),
                None,
                Some(group.clone()),
            ),
            ActiveThread::None => return,
        };

        let temp = ChatMessage {
            id: Uuid::new_v4().to_string(),
            sender_id: self.session.user_id.clone(),
            receiver_id: receiver_id.clone(),
            group_id: group_id.clone(),
            content: content.clone(),
            message_type: "text".to_string(),
            is_read: false,
            created_at: Utc::now(),
        };
        let temp_id = temp.id.clone();
        {
            let mut state = self.state.lock().unwrap();
            state.pending_sends.push(temp_id.clone());
        }

        // optimistic append so the sender sees the message immediately
        let optimistic = temp.clone();
        self.cache
            .set_direct(key.clone(), move |prev| append_message(prev, optimistic));

        // low-latency echo to the peer; the durable write below is the system of record
        if let Err(e) = self.sink.emit(OutgoingEvent::SendMessage {
            message: temp.clone(),
        }) {
            log::debug!("[VIEW] channel echo skipped: {}", e);
        }

        let draft = NewMessage {
            receiver_id,
            group_id,
            content,
            message_type: "text".to_string(),
        };
        match self.api.send_message(&draft).await {
            Ok(canonical) => {
                let reconcile_id = temp_id.clone();
                self.cache.set_direct(key, move |prev| {
                    reconcile_message(prev, &reconcile_id, canonical)
                });
                {
                    let mut state = self.state.lock().unwrap();
                    state.pending_sends.retain(|id| id != &temp_id);
                    state.draft.clear();
                    state.sending = false;
                    state.typing_sent = false;
                }
                self.cache.invalidate(CacheKey::Conversations);
                if let ActiveThread::Direct(peer) = &thread {
                    self.emit_stop_typing(peer.clone());
                }
            }
            Err(e) => {
                // roll the optimistic entry back; the draft stays so the user
                // can retry manually
                let remove_id = temp_id.clone();
                self.cache
                    .set_direct(key, move |prev| remove_message(prev, &remove_id));
                {
                    let mut state = self.state.lock().unwrap();
                    state.pending_sends.retain(|id| id != &temp_id);
                    state.sending = false;
                }
                self.notifier.error(format!("Failed to send message: {}", e));
            }
        }
    }

    /// Inbound `new_message`: de-duplicate by id and append only when the
    /// sender (or group) matches the active thread. The conversations summary
    /// is invalidated unconditionally so unread counts and last-message
    /// previews refresh.
    pub fn apply_incoming(&self, msg: ChatMessage) {
        let key = {
            let state = self.state.lock().unwrap();
            match (&state.thread, &msg.group_id) {
                (ActiveThread::Group(open), Some(from)) if open == from => {
                    Some(CacheKey::GroupMessages(open.clone()))
                }
                (ActiveThread::Direct(peer), None) if *peer == msg.sender_id => {
                    Some(CacheKey::DirectMessages(peer.clone()))
                }
                _ => None,
            }
        };
        if let Some(key) = key {
            self.cache.set_direct(key, move |prev| append_message(prev, msg));
        }
        self.cache.invalidate(CacheKey::Conversations);
    }

    /// Inbound `user_typing`: tracked only for the active direct peer; events
    /// for other peers are ignored.
    pub fn apply_typing(&self, user_id: &str, is_typing: bool) {
        let mut state = self.state.lock().unwrap();
        if let ActiveThread::Direct(peer) = &state.thread {
            if peer == user_id {
                if is_typing {
                    state.typing_peers.insert(user_id.to_string());
                } else {
                    state.typing_peers.remove(user_id);
                }
            }
        }
    }

    /// Re-announce the active direct thread after a reconnect; join state does
    /// not survive the old connection.
    pub fn rejoin(&self) {
        let peer = {
            let state = self.state.lock().unwrap();
            match &state.thread {
                ActiveThread::Direct(peer) => Some(peer.clone()),
                _ => None,
            }
        };
        if let Some(peer) = peer {
            self.emit_join(&peer);
        }
    }

    /// On a thread change the previous peer may still be showing our typing
    /// indicator. Resets the typing edge and returns the peer owed a stop
    /// edge, to be emitted after the lock is released.
    fn take_typing_peer(state: &mut ViewState) -> Option<String> {
        if !state.typing_sent {
            return None;
        }
        state.typing_sent = false;
        match &state.thread {
            ActiveThread::Direct(peer) => Some(peer.clone()),
            _ => None,
        }
    }

    fn emit_stop_typing(&self, peer_id: String) {
        let event = OutgoingEvent::Typing {
            peer_id,
            is_typing: false,
        };
        if let Err(e) = self.sink.emit(event) {
            log::debug!("[VIEW] stop-typing edge not sent: {}", e);
        }
    }

    fn emit_join(&self, peer_id: &str) {
        let event = OutgoingEvent::JoinChat {
            peer_id: peer_id.to_string(),
            user_id: self.session.user_id.clone(),
        };
        if let Err(e) = self.sink.emit(event) {
            log::debug!("[VIEW] join_chat not sent: {}", e);
        }
    }

    pub fn thread(&self) -> ActiveThread {
        self.state.lock().unwrap().thread.clone()
    }

    pub fn draft(&self) -> String {
        self.state.lock().unwrap().draft.clone()
    }

    pub fn typing_peers(&self) -> HashSet<String> {
        self.state.lock().unwrap().typing_peers.clone()
    }
}

fn messages_of(prev: Option<CacheValue>) -> Vec<ChatMessage> {
    match prev {
        Some(CacheValue::Messages(msgs)) => msgs,
        _ => Vec::new(),
    }
}

/// Append-with-dedupe. Re-applying the same event twice is a no-op, and the
/// list stays ordered by server timestamp (stable sort, so equal timestamps
/// keep arrival order).
fn append_message(prev: Option<CacheValue>, msg: ChatMessage) -> CacheValue {
    let mut msgs = messages_of(prev);
    if !msgs.iter().any(|m| m.id == msg.id) {
        msgs.push(msg);
        msgs.sort_by_key(|m| m.created_at);
    }
    CacheValue::Messages(msgs)
}

/// Swap the optimistic entry for the canonical one. If the canonical id
/// already landed through another path, the temp entry is simply dropped.
fn reconcile_message(prev: Option<CacheValue>, temp_id: &str, canonical: ChatMessage) -> CacheValue {
    let mut msgs = messages_of(prev);
    msgs.retain(|m| m.id != temp_id);
    if !msgs.iter().any(|m| m.id == canonical.id) {
        msgs.push(canonical);
        msgs.sort_by_key(|m| m.created_at);
    }
    CacheValue::Messages(msgs)
}

fn remove_message(prev: Option<CacheValue>, id: &str) -> CacheValue {
    let mut msgs = messages_of(prev);
    msgs.retain(|m| m.id != id);
    CacheValue::Messages(msgs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(id: &str, at: i64) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            sender_id: "u2".to_string(),
            receiver_id: Some("u1".to_string()),
            group_id: None,
            content: format!("message {}", id),
            message_type: "text".to_string(),
            is_read: false,
            created_at: chrono::Utc.timestamp_opt(at, 0).unwrap(),
        }
    }

    #[test]
    fn append_dedupes_by_id() {
        let v = append_message(None, msg("a", 10));
        let v = append_message(Some(v), msg("a", 10));
        assert_eq!(v.as_messages().unwrap().len(), 1);
    }

    #[test]
    fn append_orders_by_created_at() {
        let v = append_message(None, msg("b", 20));
        let v = append_message(Some(v), msg("a", 10));
        let ids: Vec<_> = v.as_messages().unwrap().iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn reconcile_replaces_temp_with_canonical() {
        let v = append_message(None, msg("temp-1", 10));
        let v = reconcile_message(Some(v), "temp-1", msg("m-1", 10));
        let ids: Vec<_> = v.as_messages().unwrap().iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec!["m-1"]);
    }

    #[test]
    fn reconcile_drops_temp_when_canonical_already_present() {
        let v = append_message(None, msg("temp-1", 10));
        let v = append_message(Some(v), msg("m-1", 10));
        let v = reconcile_message(Some(v), "temp-1", msg("m-1", 10));
        let ids: Vec<_> = v.as_messages().unwrap().iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec!["m-1"]);
    }

    #[test]
    fn remove_is_noop_for_unknown_id() {
        let v = append_message(None, msg("a", 10));
        let v = remove_message(Some(v), "zzz");
        assert_eq!(v.as_messages().unwrap().len(), 1);
    }
}
