//! Client-side synchronization layer for StudyLink messaging.
//!
//! Keeps REST-fetched snapshots (conversations, friends, requests, groups,
//! messages) consistent with real-time push events from the transport
//! channel. The cache owns all server state; views read snapshots and write
//! only through invalidation or explicit optimistic updates.

pub mod client;

pub use client::cache::{CacheKey, CacheValue, QueryCache};
pub use client::conversation::{ActiveTab, ActiveThread, ConversationView};
pub use client::friends::FriendManager;
pub use client::models::entities::{ChatMessage, Conversation, FriendRequest, Group, User};
pub use client::models::events::{ChannelEvent, OutgoingEvent};
pub use client::notify::{Notifier, Toast, ToastLevel};
pub use client::session::SessionIdentity;
pub use client::sync::SyncEngine;
