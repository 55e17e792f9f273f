use axum::Json;
use axum::extract::{Multipart, Path, Query, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use serde::Deserialize;
use tracing::warn;

use orbit_channel::Upload;
use orbit_directory::LeaveOutcome;
use orbit_types::api::{
    AuthResponse, ChannelResponse, ChannelsResponse, CreateChannelRequest, InviteRequest,
    LeaveResponse, LoginRequest, MessageResponse, MessagesResponse, OkResponse,
    OnlineUsersResponse, PostMessageRequest, RegisterRequest, UploadResponse, UsersResponse,
};
use orbit_types::error::Error;

use crate::error::ApiError;
use crate::router::ActorRouter;

const SESSION_HEADER: &str = "x-session-id";
const CHANNEL_HEADER: &str = "x-channel-id";

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

// -- Auth --

pub async fn register(
    State(router): State<ActorRouter>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let auth = router.directory().register(req).await?;
    Ok(Json(AuthResponse {
        success: true,
        user: auth.user,
        session: auth.session,
    }))
}

pub async fn login(
    State(router): State<ActorRouter>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let auth = router.directory().login(req).await?;
    Ok(Json(AuthResponse {
        success: true,
        user: auth.user,
        session: auth.session,
    }))
}

pub async fn logout(
    State(router): State<ActorRouter>,
    headers: HeaderMap,
) -> Result<Json<OkResponse>, ApiError> {
    router.directory().logout(session_id(&headers)).await?;
    Ok(Json(OkResponse { success: true }))
}

// -- Users --

pub async fn list_users(
    State(router): State<ActorRouter>,
) -> Result<Json<UsersResponse>, ApiError> {
    let users = router.directory().list_users().await?;
    Ok(Json(UsersResponse {
        success: true,
        users,
    }))
}

pub async fn list_online_users(
    State(router): State<ActorRouter>,
) -> Result<Json<OnlineUsersResponse>, ApiError> {
    let online_users = router.directory().list_online_users().await?;
    Ok(Json(OnlineUsersResponse {
        success: true,
        online_users,
    }))
}

// -- Channels --

pub async fn list_channels(
    State(router): State<ActorRouter>,
    headers: HeaderMap,
) -> Result<Json<ChannelsResponse>, ApiError> {
    let channels = router
        .directory()
        .list_channels(session_id(&headers))
        .await?;
    Ok(Json(ChannelsResponse {
        success: true,
        channels,
    }))
}

pub async fn create_channel(
    State(router): State<ActorRouter>,
    headers: HeaderMap,
    Json(req): Json<CreateChannelRequest>,
) -> Result<Json<ChannelResponse>, ApiError> {
    let channel = router
        .directory()
        .create_channel(session_id(&headers), req)
        .await?;
    Ok(Json(ChannelResponse {
        success: true,
        channel,
    }))
}

pub async fn invite(
    State(router): State<ActorRouter>,
    Path(channel_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<InviteRequest>,
) -> Result<Json<ChannelResponse>, ApiError> {
    let channel = router
        .directory()
        .invite_to_channel(session_id(&headers), channel_id, req.user_ids)
        .await?;
    Ok(Json(ChannelResponse {
        success: true,
        channel,
    }))
}

pub async fn leave(
    State(router): State<ActorRouter>,
    Path(channel_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<LeaveResponse>, ApiError> {
    let outcome = router
        .directory()
        .leave_channel(session_id(&headers), channel_id)
        .await?;
    let response = match outcome {
        LeaveOutcome::Deleted => LeaveResponse {
            success: true,
            deleted: true,
            channel: None,
        },
        LeaveOutcome::Remaining(channel) => LeaveResponse {
            success: true,
            deleted: false,
            channel: Some(channel),
        },
    };
    Ok(Json(response))
}

// -- Channel-scoped --

/// Request context established by the access gate: the caller holds a
/// valid session and is a member of the channel.
#[derive(Debug, Clone)]
pub struct ChannelContext {
    pub session_id: String,
    pub channel_id: String,
}

/// Gate for channel-scoped routes. Membership is checked against the
/// directory before the request reaches any channel actor.
pub async fn require_channel_access(
    State(router): State<ActorRouter>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = req.headers();
    let session_id = session_id(headers)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::unauthorized("Session ID is required"))?;
    let channel_id = headers
        .get(CHANNEL_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::invalid("Channel ID is required"))?;

    if !router
        .directory()
        .check_channel_access(Some(&session_id), &channel_id)
        .await
    {
        warn!("denied channel access to {channel_id}");
        return Err(Error::forbidden("Access denied").into());
    }

    req.extensions_mut().insert(ChannelContext {
        session_id,
        channel_id,
    });
    Ok(next.run(req).await)
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    pub before: Option<String>,
}

pub async fn list_messages(
    State(router): State<ActorRouter>,
    axum::Extension(ctx): axum::Extension<ChannelContext>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let page = router
        .channel(&ctx.channel_id)?
        .list_messages(query.limit, query.before)
        .await?;
    Ok(Json(MessagesResponse {
        success: true,
        messages: page.messages,
        has_more: page.has_more,
    }))
}

pub async fn post_message(
    State(router): State<ActorRouter>,
    axum::Extension(ctx): axum::Extension<ChannelContext>,
    Json(req): Json<PostMessageRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let message = router
        .channel(&ctx.channel_id)?
        .post_message(Some(ctx.session_id), req)
        .await?;
    Ok(Json(MessageResponse {
        success: true,
        message,
    }))
}

pub async fn upload_attachment(
    State(router): State<ActorRouter>,
    axum::Extension(ctx): axum::Extension<ChannelContext>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| Error::invalid("Malformed multipart body"))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|_| Error::invalid("Malformed multipart body"))?;
        upload = Some(Upload {
            filename,
            content_type,
            bytes: bytes.to_vec(),
        });
        break;
    }

    let upload = upload.ok_or_else(|| Error::invalid("No file provided"))?;
    let url = router
        .channel(&ctx.channel_id)?
        .upload(Some(ctx.session_id), upload)
        .await?;
    Ok(Json(UploadResponse { success: true, url }))
}
