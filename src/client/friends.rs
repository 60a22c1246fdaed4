use std::sync::Arc;

use crate::client::cache::{CacheKey, QueryCache};
use crate::client::conversation::{ActiveTab, SharedViewState};
use crate::client::models::entities::NewGroup;
use crate::client::notify::Notifier;
use crate::client::services::api_client::{ApiError, DurableApi};
use crate::client::session::SessionIdentity;

/// The four friend-related cache keys, invalidated together whenever the
/// friend graph may have changed.
pub const FRIEND_KEYS: [CacheKey; 4] = [
    CacheKey::PendingRequests,
    CacheKey::AllRequests,
    CacheKey::SentRequests,
    CacheKey::Friends,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendMutation {
    SendRequest,
    AcceptRequest,
    RejectRequest,
    DeleteRequest,
    CreateGroup,
}

/// Explicit mutation -> affected-keys table. Every friend-graph mutation
/// invalidates through this table, never an inline list at the call site, so
/// missing-invalidation bugs are auditable in one place.
pub fn affected_keys(mutation: FriendMutation) -> &'static [CacheKey] {
    match mutation {
        FriendMutation::SendRequest => &[CacheKey::SentRequests, CacheKey::AllRequests],
        // acceptance also makes a new conversation possible
        FriendMutation::AcceptRequest => &[
            CacheKey::PendingRequests,
            CacheKey::AllRequests,
            CacheKey::SentRequests,
            CacheKey::Friends,
            CacheKey::Conversations,
        ],
        FriendMutation::RejectRequest => &[CacheKey::PendingRequests, CacheKey::AllRequests],
        FriendMutation::DeleteRequest => &[
            CacheKey::PendingRequests,
            CacheKey::AllRequests,
            CacheKey::SentRequests,
        ],
        FriendMutation::CreateGroup => &[CacheKey::Groups, CacheKey::Conversations],
    }
}

/// Friend-graph and group mutations: durable write first, invalidate on
/// success. No optimistic cache writes here; these changes are infrequent and
/// consistency matters more than latency.
pub struct FriendManager {
    session: SessionIdentity,
    cache: QueryCache,
    api: Arc<dyn DurableApi>,
    notifier: Notifier,
    state: SharedViewState,
}

impl FriendManager {
    pub fn new(
        session: SessionIdentity,
        cache: QueryCache,
        api: Arc<dyn DurableApi>,
        notifier: Notifier,
        state: SharedViewState,
    ) -> Self {
        Self {
            session,
            cache,
            api,
            notifier,
            state,
        }
    }

    pub async fn send_request(&self, target_id: &str) {
        if target_id == self.session.user_id {
            self.notifier.error("You cannot send a friend request to yourself");
            return;
        }
        match self.api.send_friend_request(target_id).await {
            Ok(()) => {
                self.notifier.success("Friend request sent");
                self.cache.invalidate_all(affected_keys(FriendMutation::SendRequest));
            }
            Err(e) => self.handle_failure("send friend request", e, FriendMutation::SendRequest),
        }
    }

    /// Accept a received request. On success the active tab switches to Chats
    /// so the new conversation is in view; that is UX convenience, not a data
    /// invariant.
    pub async fn accept_request(&self, requester_id: &str) {
        match self.api.accept_friend_request(requester_id).await {
            Ok(()) => {
                self.notifier.success("Friend request accepted");
                self.cache.invalidate_all(affected_keys(FriendMutation::AcceptRequest));
                self.state.lock().unwrap().tab = ActiveTab::Chats;
            }
            Err(e) => self.handle_failure("accept friend request", e, FriendMutation::AcceptRequest),
        }
    }

    pub async fn reject_request(&self, requester_id: &str) {
        match self.api.reject_friend_request(requester_id).await {
            Ok(()) => {
                self.notifier.info("Friend request rejected");
                self.cache.invalidate_all(affected_keys(FriendMutation::RejectRequest));
            }
            Err(e) => self.handle_failure("reject friend request", e, FriendMutation::RejectRequest),
        }
    }

    pub async fn delete_request(&self, request_id: &str) {
        match self.api.delete_friend_request(request_id).await {
            Ok(()) => {
                self.notifier.info("Friend request deleted");
                self.cache.invalidate_all(affected_keys(FriendMutation::DeleteRequest));
            }
            Err(e) => self.handle_failure("delete friend request", e, FriendMutation::DeleteRequest),
        }
    }

    /// Create a group from the caller's friends. An empty name is rejected
    /// before dispatch; member ids are prefiltered against the cached friend
    /// list (the server stays authoritative).
    pub async fn create_group(
        &self,
        name: &str,
        description: Option<String>,
        member_ids: Vec<String>,
    ) {
        let name = name.trim();
        if name.is_empty() {
            self.notifier.error("Group name cannot be empty");
            return;
        }

        let member_ids = match self.cache.get(&CacheKey::Friends) {
            Some(value) => match value.as_friends() {
                Some(friends) => member_ids
                    .into_iter()
                    .filter(|id| friends.iter().any(|f| &f.id == id))
                    .collect(),
                None => member_ids,
            },
            None => member_ids,
        };

        let group = NewGroup {
            name: name.to_string(),
            description,
            member_ids,
        };
        match self.api.create_group(&group).await {
            Ok(created) => {
                self.notifier
                    .success(format!("Group \"{}\" created", created.name));
                self.cache.invalidate_all(affected_keys(FriendMutation::CreateGroup));
            }
            Err(e) => self.handle_failure("create group", e, FriendMutation::CreateGroup),
        }
    }

    /// All mutation errors become toasts. A conflict means our view was
    /// stale, so the mutation's keys get invalidated anyway.
    fn handle_failure(&self, action: &str, err: ApiError, mutation: FriendMutation) {
        log::warn!("[FRIENDS] {} failed: {}", action, err);
        self.notifier.error(format!("Could not {}: {}", action, err));
        if matches!(err, ApiError::Conflict(_)) {
            self.cache.invalidate_all(affected_keys(mutation));
        }
    }
}
