use serde::{Deserialize, Serialize};

use crate::models::{ChannelSummary, Message};

/// Events pushed to clients over the presence socket. Delivery is
/// best-effort; a send failure prunes the target from the registry and
/// is never surfaced to the operation that triggered the broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayEvent {
    UserConnected {
        #[serde(rename = "userId")]
        user_id: String,
    },
    UserDisconnected {
        #[serde(rename = "userId")]
        user_id: String,
    },
    NewMessage {
        #[serde(rename = "channelId")]
        channel_id: String,
        message: Message,
    },
    NewChannel {
        channel: ChannelSummary,
    },
    ChannelUpdated {
        channel: ChannelSummary,
    },
    ChannelLeft {
        #[serde(rename = "channelId")]
        channel_id: String,
    },
}
