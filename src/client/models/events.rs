use serde::{Deserialize, Serialize};

use crate::client::models::entities::{ChatMessage, User};

/// Events the client emits on the transport channel.
///
/// `join_chat` tells the server which direct thread is being viewed (safe to
/// re-send on every peer change and after every reconnect). `send_message` is
/// a fire-and-forget echo for low-latency delivery to the peer; the durable
/// write goes through the REST API separately. `typing` carries start/stop
/// edges for the active peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutgoingEvent {
    #[serde(rename_all = "camelCase")]
    JoinChat { peer_id: String, user_id: String },
    SendMessage { message: ChatMessage },
    #[serde(rename_all = "camelCase")]
    Typing { peer_id: String, is_typing: bool },
}

/// Events delivered to the sync engine. The first four are wire events with
/// fixed payload shapes validated at the channel boundary; `Connected` and
/// `Disconnected` are synthesized by the socket client around each
/// (re)connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    NewMessage(ChatMessage),
    UserTyping { user_id: String, is_typing: bool },
    FriendRequestReceived { from: User },
    FriendRequestAccepted { by: User },
    Connected,
    Disconnected,
}

#[derive(Debug, Deserialize)]
struct NewMessagePayload {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload {
    user_id: String,
    is_typing: bool,
}

#[derive(Debug, Deserialize)]
struct RequestReceivedPayload {
    from: User,
}

#[derive(Debug, Deserialize)]
struct RequestAcceptedPayload {
    by: User,
}

/// Parse and validate one inbound channel frame.
///
/// Unknown event names and malformed payloads are rejected here so nothing
/// duck-typed reaches the cache handlers.
pub fn parse_channel_event(text: &str) -> Result<ChannelEvent, String> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| format!("invalid JSON: {}", e))?;

    let event = value
        .get("event")
        .and_then(|v| v.as_str())
        .ok_or("missing event field")?;

    match event {
        "new_message" => {
            let payload: NewMessagePayload = serde_json::from_value(value.clone())
                .map_err(|e| format!("failed to parse new_message: {}", e))?;
            Ok(ChannelEvent::NewMessage(payload.message))
        }
        "user_typing" => {
            let payload: TypingPayload = serde_json::from_value(value.clone())
                .map_err(|e| format!("failed to parse user_typing: {}", e))?;
            Ok(ChannelEvent::UserTyping {
                user_id: payload.user_id,
                is_typing: payload.is_typing,
            })
        }
        "friend_request_received" => {
            let payload: RequestReceivedPayload = serde_json::from_value(value.clone())
                .map_err(|e| format!("failed to parse friend_request_received: {}", e))?;
            Ok(ChannelEvent::FriendRequestReceived { from: payload.from })
        }
        "friend_request_accepted" => {
            let payload: RequestAcceptedPayload = serde_json::from_value(value.clone())
                .map_err(|e| format!("failed to parse friend_request_accepted: {}", e))?;
            Ok(ChannelEvent::FriendRequestAccepted { by: payload.by })
        }
        other => Err(format!("unknown event type: {}", other)),
    }
}
