use std::sync::Arc;

use tokio::sync::mpsc;

use crate::client::cache::{CacheKey, QueryCache};
use crate::client::conversation::{ConversationView, SharedViewState};
use crate::client::friends::FRIEND_KEYS;
use crate::client::models::events::ChannelEvent;
use crate::client::notify::Notifier;

/// Inbound side of the sync layer: applies transport-channel events to the
/// cache and view state. Every handler is idempotent under at-least-once
/// redelivery; the transport gives no ordering guarantee.
pub struct SyncEngine {
    cache: QueryCache,
    notifier: Notifier,
    view: Arc<ConversationView>,
    state: SharedViewState,
}

impl SyncEngine {
    pub fn new(
        cache: QueryCache,
        notifier: Notifier,
        view: Arc<ConversationView>,
        state: SharedViewState,
    ) -> Self {
        Self {
            cache,
            notifier,
            view,
            state,
        }
    }

    /// Drive the engine until the channel closes.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        log::info!("[SYNC] event channel closed, engine stopping");
    }

    pub fn handle(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::NewMessage(msg) => {
                log::debug!("[SYNC] new_message {} from {}", msg.id, msg.sender_id);
                self.view.apply_incoming(msg);
            }
            ChannelEvent::UserTyping { user_id, is_typing } => {
                self.view.apply_typing(&user_id, is_typing);
            }
            ChannelEvent::FriendRequestReceived { from } => {
                log::debug!("[SYNC] friend request received from {}", from.username);
                self.cache.invalidate_all(&FRIEND_KEYS);
                self.notifier
                    .info(format!("{} sent you a friend request", from.username));
            }
            ChannelEvent::FriendRequestAccepted { by } => {
                log::debug!("[SYNC] friend request accepted by {}", by.username);
                self.cache.invalidate_all(&FRIEND_KEYS);
                self.cache.invalidate(CacheKey::Conversations);
                self.notifier
                    .success(format!("{} accepted your friend request", by.username));
            }
            ChannelEvent::Connected => {
                self.state.lock().unwrap().connected = true;
                // join state does not survive a reconnect
                self.view.rejoin();
            }
            ChannelEvent::Disconnected => {
                // surfaced only through the boolean indicator, no error toast
                self.state.lock().unwrap().connected = false;
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }
}
