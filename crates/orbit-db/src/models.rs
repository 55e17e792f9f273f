//! Database row types mapping directly to SQLite rows. Distinct
//! from the orbit-types API models to keep the store layer independent.

pub struct UserRow {
    pub id: String,
    pub email: String,
    /// Password digest; must never cross an actor boundary.
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
    pub created_at: i64,
}

pub struct SessionRow {
    pub id: String,
    pub user_id: String,
    pub created_at: i64,
    pub expires_at: i64,
}

/// A channel row annotated with membership, as produced by the
/// GROUP_CONCAT summary queries.
pub struct ChannelRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub created_at: i64,
    pub member_count: i64,
    pub member_ids: Vec<String>,
}

pub struct MessageRow {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub content: String,
    /// JSON-serialized list of asset URLs.
    pub assets: String,
    pub created_at: i64,
}
