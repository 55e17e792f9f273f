use serde::{Deserialize, Serialize};

/// Public view of a user. The password digest never leaves orbit-db.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
    pub created_at: i64,
}

/// The token handed to clients on login/registration. Echoed back on
/// every request via the `X-Session-Id` header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionToken {
    pub id: String,
    pub expires_at: i64,
}

/// A channel as seen by its members: metadata plus the full ordered
/// member id set and a count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub created_at: i64,
    pub member_count: i64,
    pub member_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub content: String,
    /// Ordered attachment URLs, embedded at post time.
    pub assets: Vec<String>,
    pub created_at: i64,
}
