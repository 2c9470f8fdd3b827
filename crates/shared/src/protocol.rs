use serde::{Deserialize, Serialize};

use crate::domain::{GroupId, MessageId, MessageKind, UserId};

/// Frames emitted by the client over the realtime transport. Event names
/// match the wire contract exactly, including its mixed kebab/snake naming
/// (direct-chat events are kebab-case, group events snake_case).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientFrame {
    #[serde(rename = "join-room", rename_all = "camelCase")]
    JoinRoom { user_id: UserId },
    #[serde(rename = "leave-room", rename_all = "camelCase")]
    LeaveRoom { user_id: UserId },
    #[serde(rename = "send-message", rename_all = "camelCase")]
    SendMessage {
        sender_id: UserId,
        recipient_id: UserId,
        message: String,
        #[serde(rename = "type")]
        kind: MessageKind,
    },
    #[serde(rename = "join_group", rename_all = "camelCase")]
    JoinGroup { group_id: GroupId },
    #[serde(rename = "leave_group", rename_all = "camelCase")]
    LeaveGroup { group_id: GroupId },
    #[serde(rename = "group_message", rename_all = "camelCase")]
    GroupMessage {
        group_id: GroupId,
        content: String,
        #[serde(rename = "type")]
        kind: MessageKind,
    },
}

/// Frames delivered by the messaging server. Direct messages may carry a
/// server-assigned `id`; group messages always do, because group fan-out
/// echoes the server-confirmed record to every member including the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerFrame {
    #[serde(rename = "message", rename_all = "camelCase")]
    Message {
        sender_id: UserId,
        recipient_id: UserId,
        content: String,
        #[serde(rename = "type")]
        kind: MessageKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<MessageId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    #[serde(rename = "group_message", rename_all = "camelCase")]
    GroupMessage {
        group_id: GroupId,
        id: MessageId,
        sender_id: UserId,
        content: String,
        #[serde(rename = "type")]
        kind: MessageKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    #[serde(rename = "message-delivered", rename_all = "camelCase")]
    MessageDelivered {
        message_id: MessageId,
        conversation_id: String,
    },
    #[serde(rename = "message-read", rename_all = "camelCase")]
    MessageRead {
        message_id: MessageId,
        conversation_id: String,
    },
    #[serde(rename = "typing-start", rename_all = "camelCase")]
    TypingStart { sender_id: UserId },
    #[serde(rename = "typing-stop", rename_all = "camelCase")]
    TypingStop { sender_id: UserId },
    #[serde(rename = "auth_error")]
    AuthError { message: String },
}
