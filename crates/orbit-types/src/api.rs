use serde::{Deserialize, Serialize};

use crate::models::{ChannelSummary, Message, SessionToken, User};

// -- Auth --

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub user: User,
    pub session: SessionToken,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub success: bool,
}

// -- Users --

#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub success: bool,
    pub users: Vec<User>,
}

#[derive(Debug, Serialize)]
pub struct OnlineUsersResponse {
    pub success: bool,
    #[serde(rename = "onlineUsers")]
    pub online_users: Vec<User>,
}

// -- Channels --

#[derive(Debug, Clone, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub member_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InviteRequest {
    #[serde(rename = "userIds")]
    pub user_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ChannelsResponse {
    pub success: bool,
    pub channels: Vec<ChannelSummary>,
}

#[derive(Debug, Serialize)]
pub struct ChannelResponse {
    pub success: bool,
    pub channel: ChannelSummary,
}

#[derive(Debug, Serialize)]
pub struct LeaveResponse {
    pub success: bool,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelSummary>,
}

// -- Messages --

#[derive(Debug, Clone, Deserialize)]
pub struct PostMessageRequest {
    pub content: String,
    #[serde(default)]
    pub assets: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: Message,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub success: bool,
    pub messages: Vec<Message>,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub url: String,
}

// -- Errors --

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}
