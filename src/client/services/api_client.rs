use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::client::cache::{CacheKey, CacheValue, Fetcher};
use crate::client::models::entities::{
    ChatMessage, Conversation, FriendRequest, Group, NewGroup, NewMessage, User,
};
use crate::client::session::SessionIdentity;

/// Error taxonomy for durable writes. Mutation callers convert every variant
/// into a user-visible toast; nothing propagates unhandled into the UI.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    Forbidden(String),
    #[error("unexpected response: {0}")]
    Unexpected(String),
}

/// Resource-oriented HTTP endpoints of the system of record. Fetches return
/// snapshots the cache installs verbatim; mutations return the created or
/// updated resource. Trait seam so tests can inject a mock store.
#[async_trait]
pub trait DurableApi: Send + Sync {
    async fn conversations(&self) -> Result<Vec<Conversation>, ApiError>;
    async fn direct_messages(&self, peer_id: &str) -> Result<Vec<ChatMessage>, ApiError>;
    async fn group_messages(&self, group_id: &str) -> Result<Vec<ChatMessage>, ApiError>;
    async fn friends(&self) -> Result<Vec<User>, ApiError>;
    async fn pending_requests(&self) -> Result<Vec<FriendRequest>, ApiError>;
    async fn sent_requests(&self) -> Result<Vec<FriendRequest>, ApiError>;
    async fn all_requests(&self) -> Result<Vec<FriendRequest>, ApiError>;
    async fn groups(&self) -> Result<Vec<Group>, ApiError>;

    async fn send_message(&self, draft: &NewMessage) -> Result<ChatMessage, ApiError>;
    async fn mark_read(&self, peer_id: &str) -> Result<(), ApiError>;
    async fn send_friend_request(&self, target_id: &str) -> Result<(), ApiError>;
    async fn accept_friend_request(&self, requester_id: &str) -> Result<(), ApiError>;
    async fn reject_friend_request(&self, requester_id: &str) -> Result<(), ApiError>;
    async fn delete_friend_request(&self, request_id: &str) -> Result<(), ApiError>;
    async fn create_group(&self, group: &NewGroup) -> Result<Group, ApiError>;
}

/// Routes cache refetches through the durable-write API.
pub struct ApiFetcher {
    api: Arc<dyn DurableApi>,
}

impl ApiFetcher {
    pub fn new(api: Arc<dyn DurableApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Fetcher for ApiFetcher {
    async fn fetch(&self, key: &CacheKey) -> anyhow::Result<CacheValue> {
        let value = match key {
            CacheKey::Conversations => CacheValue::Conversations(self.api.conversations().await?),
            CacheKey::DirectMessages(peer) => {
                CacheValue::Messages(self.api.direct_messages(peer).await?)
            }
            CacheKey::GroupMessages(group) => {
                CacheValue::Messages(self.api.group_messages(group).await?)
            }
            CacheKey::Friends => CacheValue::Friends(self.api.friends().await?),
            CacheKey::PendingRequests => CacheValue::Requests(self.api.pending_requests().await?),
            CacheKey::SentRequests => CacheValue::Requests(self.api.sent_requests().await?),
            CacheKey::AllRequests => CacheValue::Requests(self.api.all_requests().await?),
            CacheKey::Groups => CacheValue::Groups(self.api.groups().await?),
        };
        Ok(value)
    }
}

/// REST client for the durable-write API. Bearer token on every request.
pub struct ApiClient {
    base_url: String,
    session: SessionIdentity,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, session: SessionIdentity) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.session.token)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        decode(resp).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let resp = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.session.token)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        decode(resp).await
    }

    async fn post_empty(&self, path: &str) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.session.token)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        check_status(resp).await.map(|_| ())
    }

    async fn delete_empty(&self, path: &str) -> Result<(), ApiError> {
        let resp = self
            .http
            .delete(self.url(path))
            .bearer_auth(&self.session.token)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        check_status(resp).await.map(|_| ())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    // The API reports errors as {"detail": "..."}; fall back to the raw body.
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(String::from))
        .unwrap_or(body);
    Err(match status.as_u16() {
        400 | 422 => ApiError::Validation(message),
        401 | 403 => ApiError::Forbidden(message),
        404 => ApiError::NotFound(message),
        409 => ApiError::Conflict(message),
        _ => ApiError::Unexpected(format!("{}: {}", status, message)),
    })
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
    let resp = check_status(resp).await?;
    resp.json::<T>()
        .await
        .map_err(|e| ApiError::Unexpected(format!("malformed response body: {}", e)))
}

#[async_trait]
impl DurableApi for ApiClient {
    async fn conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.get_json("/messages/conversations").await
    }

    async fn direct_messages(&self, peer_id: &str) -> Result<Vec<ChatMessage>, ApiError> {
        self.get_json(&format!("/messages/{}", peer_id)).await
    }

    async fn group_messages(&self, group_id: &str) -> Result<Vec<ChatMessage>, ApiError> {
        self.get_json(&format!("/groups/{}/messages", group_id)).await
    }

    async fn friends(&self) -> Result<Vec<User>, ApiError> {
        self.get_json("/friends").await
    }

    async fn pending_requests(&self) -> Result<Vec<FriendRequest>, ApiError> {
        self.get_json("/friends/requests?type=pending").await
    }

    async fn sent_requests(&self) -> Result<Vec<FriendRequest>, ApiError> {
        self.get_json("/friends/requests?type=sent").await
    }

    async fn all_requests(&self) -> Result<Vec<FriendRequest>, ApiError> {
        self.get_json("/friends/requests?type=all").await
    }

    async fn groups(&self) -> Result<Vec<Group>, ApiError> {
        self.get_json("/groups").await
    }

    async fn send_message(&self, draft: &NewMessage) -> Result<ChatMessage, ApiError> {
        self.post_json("/messages", draft).await
    }

    async fn mark_read(&self, peer_id: &str) -> Result<(), ApiError> {
        self.post_empty(&format!("/messages/{}/read", peer_id)).await
    }

    async fn send_friend_request(&self, target_id: &str) -> Result<(), ApiError> {
        self.post_empty(&format!("/friends/requests/{}", target_id)).await
    }

    async fn accept_friend_request(&self, requester_id: &str) -> Result<(), ApiError> {
        self.post_empty(&format!("/friends/requests/{}/accept", requester_id))
            .await
    }

    async fn reject_friend_request(&self, requester_id: &str) -> Result<(), ApiError> {
        self.post_empty(&format!("/friends/requests/{}/reject", requester_id))
            .await
    }

    async fn delete_friend_request(&self, request_id: &str) -> Result<(), ApiError> {
        self.delete_empty(&format!("/friends/requests/{}", request_id))
            .await
    }

    async fn create_group(&self, group: &NewGroup) -> Result<Group, ApiError> {
        self.post_json("/groups", group).await
    }
}
