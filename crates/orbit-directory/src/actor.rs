use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};
use uuid::Uuid;

use orbit_db::Database;
use orbit_db::models::{ChannelRow, UserRow};
use orbit_types::api::{CreateChannelRequest, LoginRequest, RegisterRequest};
use orbit_types::error::Error;
use orbit_types::events::GatewayEvent;
use orbit_types::models::{ChannelSummary, Message, SessionToken, User};

use crate::hasher::SecretHasher;
use crate::registry::{ConnectionRegistry, SocketFrame};

const SESSION_DURATION_DAYS: i64 = 30;

type Reply<T> = oneshot::Sender<Result<T, Error>>;

/// A freshly issued identity: the user plus a new session token.
#[derive(Debug)]
pub struct AuthPayload {
    pub user: User,
    pub session: SessionToken,
}

/// Result of the single authorization primitive. Never an error:
/// missing, unknown, and expired session ids all come back invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCheck {
    pub valid: bool,
    pub user_id: Option<String>,
}

impl SessionCheck {
    fn invalid() -> Self {
        Self {
            valid: false,
            user_id: None,
        }
    }
}

#[derive(Debug)]
pub enum LeaveOutcome {
    /// The caller was the last member; the channel is gone.
    Deleted,
    /// Other members remain; here is the updated channel.
    Remaining(ChannelSummary),
}

/// Returned to the socket handler on a successful connect.
#[derive(Debug)]
pub struct ConnectedClient {
    pub user_id: String,
    pub conn_id: Uuid,
}

enum Command {
    Register {
        req: RegisterRequest,
        reply: Reply<AuthPayload>,
    },
    Login {
        req: LoginRequest,
        reply: Reply<AuthPayload>,
    },
    Logout {
        session_id: Option<String>,
        reply: Reply<()>,
    },
    ValidateSession {
        session_id: Option<String>,
        reply: oneshot::Sender<SessionCheck>,
    },
    ListUsers {
        reply: Reply<Vec<User>>,
    },
    ListOnlineUsers {
        reply: Reply<Vec<User>>,
    },
    ListChannels {
        session_id: Option<String>,
        reply: Reply<Vec<ChannelSummary>>,
    },
    CreateChannel {
        session_id: Option<String>,
        req: CreateChannelRequest,
        reply: Reply<ChannelSummary>,
    },
    Invite {
        session_id: Option<String>,
        channel_id: String,
        user_ids: Vec<String>,
        reply: Reply<ChannelSummary>,
    },
    Leave {
        session_id: Option<String>,
        channel_id: String,
        reply: Reply<LeaveOutcome>,
    },
    CheckAccess {
        session_id: Option<String>,
        channel_id: String,
        reply: oneshot::Sender<bool>,
    },
    Notify {
        channel_id: String,
        message: Message,
        reply: Reply<()>,
    },
    Connect {
        session_id: Option<String>,
        frames: mpsc::UnboundedSender<SocketFrame>,
        reply: Reply<ConnectedClient>,
    },
    Disconnect {
        user_id: String,
        conn_id: Uuid,
    },
}

/// Handle to the singleton directory actor. Cloneable; every method is
/// an RPC into the actor's serialized loop.
#[derive(Clone)]
pub struct DirectoryHandle {
    tx: mpsc::Sender<Command>,
}

impl DirectoryHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| Error::Internal)?;
        rx.await.map_err(|_| Error::Internal)?
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<AuthPayload, Error> {
        self.request(|reply| Command::Register { req, reply }).await
    }

    pub async fn login(&self, req: LoginRequest) -> Result<AuthPayload, Error> {
        self.request(|reply| Command::Login { req, reply }).await
    }

    pub async fn logout(&self, session_id: Option<String>) -> Result<(), Error> {
        self.request(|reply| Command::Logout { session_id, reply })
            .await
    }

    /// The single authorization primitive. Infallible by contract: an
    /// unreachable actor reads as an invalid session.
    pub async fn validate_session(&self, session_id: Option<&str>) -> SessionCheck {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::ValidateSession {
            session_id: session_id.map(str::to_string),
            reply,
        };
        if self.tx.send(cmd).await.is_err() {
            return SessionCheck::invalid();
        }
        rx.await.unwrap_or_else(|_| SessionCheck::invalid())
    }

    pub async fn list_users(&self) -> Result<Vec<User>, Error> {
        self.request(|reply| Command::ListUsers { reply }).await
    }

    pub async fn list_online_users(&self) -> Result<Vec<User>, Error> {
        self.request(|reply| Command::ListOnlineUsers { reply }).await
    }

    pub async fn list_channels(
        &self,
        session_id: Option<String>,
    ) -> Result<Vec<ChannelSummary>, Error> {
        self.request(|reply| Command::ListChannels { session_id, reply })
            .await
    }

    pub async fn create_channel(
        &self,
        session_id: Option<String>,
        req: CreateChannelRequest,
    ) -> Result<ChannelSummary, Error> {
        self.request(|reply| Command::CreateChannel {
            session_id,
            req,
            reply,
        })
        .await
    }

    pub async fn invite_to_channel(
        &self,
        session_id: Option<String>,
        channel_id: String,
        user_ids: Vec<String>,
    ) -> Result<ChannelSummary, Error> {
        self.request(|reply| Command::Invite {
            session_id,
            channel_id,
            user_ids,
            reply,
        })
        .await
    }

    pub async fn leave_channel(
        &self,
        session_id: Option<String>,
        channel_id: String,
    ) -> Result<LeaveOutcome, Error> {
        self.request(|reply| Command::Leave {
            session_id,
            channel_id,
            reply,
        })
        .await
    }

    /// The router's gate for channel-scoped requests. Like
    /// `validate_session`, failure reads as denial.
    pub async fn check_channel_access(&self, session_id: Option<&str>, channel_id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::CheckAccess {
            session_id: session_id.map(str::to_string),
            channel_id: channel_id.to_string(),
            reply,
        };
        if self.tx.send(cmd).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Cross-actor fan-out, called by channel actors after a message
    /// commit.
    pub async fn notify(&self, channel_id: String, message: Message) -> Result<(), Error> {
        self.request(|reply| Command::Notify {
            channel_id,
            message,
            reply,
        })
        .await
    }

    /// Attach a socket writer for the session's user. On rejection the
    /// caller closes the socket with code 1008; nothing was registered.
    pub async fn connect(
        &self,
        session_id: Option<String>,
        frames: mpsc::UnboundedSender<SocketFrame>,
    ) -> Result<ConnectedClient, Error> {
        self.request(|reply| Command::Connect {
            session_id,
            frames,
            reply,
        })
        .await
    }

    /// Socket teardown. Fire-and-forget; ignored if a newer connection
    /// already replaced this one.
    pub async fn disconnect(&self, user_id: String, conn_id: Uuid) {
        let _ = self.tx.send(Command::Disconnect { user_id, conn_id }).await;
    }
}

/// The singleton actor owning users, sessions, channels, memberships,
/// and the live connection registry.
pub struct DirectoryActor {
    db: Database,
    hasher: Arc<dyn SecretHasher>,
    registry: ConnectionRegistry,
}

impl DirectoryActor {
    pub fn spawn(db: Database, hasher: Arc<dyn SecretHasher>) -> DirectoryHandle {
        let (tx, rx) = mpsc::channel(256);
        let actor = DirectoryActor {
            db,
            hasher,
            registry: ConnectionRegistry::default(),
        };
        tokio::spawn(actor.run(rx));
        DirectoryHandle { tx }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        info!("directory actor started");
        while let Some(cmd) = rx.recv().await {
            self.handle(cmd);
        }
        info!("directory actor stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Register { req, reply } => {
                let _ = reply.send(self.register(req));
            }
            Command::Login { req, reply } => {
                let _ = reply.send(self.login(req));
            }
            Command::Logout { session_id, reply } => {
                let _ = reply.send(self.logout(session_id));
            }
            Command::ValidateSession { session_id, reply } => {
                let _ = reply.send(self.validate_session(session_id.as_deref()));
            }
            Command::ListUsers { reply } => {
                let _ = reply.send(self.list_users());
            }
            Command::ListOnlineUsers { reply } => {
                let _ = reply.send(self.list_online_users());
            }
            Command::ListChannels { session_id, reply } => {
                let _ = reply.send(self.list_channels(session_id.as_deref()));
            }
            Command::CreateChannel {
                session_id,
                req,
                reply,
            } => {
                let _ = reply.send(self.create_channel(session_id.as_deref(), req));
            }
            Command::Invite {
                session_id,
                channel_id,
                user_ids,
                reply,
            } => {
                let _ = reply.send(self.invite(session_id.as_deref(), &channel_id, user_ids));
            }
            Command::Leave {
                session_id,
                channel_id,
                reply,
            } => {
                let _ = reply.send(self.leave(session_id.as_deref(), channel_id));
            }
            Command::CheckAccess {
                session_id,
                channel_id,
                reply,
            } => {
                let _ = reply.send(self.check_access(session_id.as_deref(), &channel_id));
            }
            Command::Notify {
                channel_id,
                message,
                reply,
            } => {
                let _ = reply.send(self.notify(channel_id, message));
            }
            Command::Connect {
                session_id,
                frames,
                reply,
            } => {
                let _ = reply.send(self.connect(session_id.as_deref(), frames));
            }
            Command::Disconnect { user_id, conn_id } => {
                self.disconnect(&user_id, conn_id);
            }
        }
    }

    // -- Identity --

    fn register(&mut self, req: RegisterRequest) -> Result<AuthPayload, Error> {
        let blank = |s: &str| s.trim().is_empty();
        if blank(&req.email) || req.password.is_empty() || blank(&req.first_name) || blank(&req.last_name)
        {
            return Err(Error::invalid(
                "Email, password, first name, and last name are required",
            ));
        }

        if self.db.email_exists(&req.email).map_err(internal)? {
            return Err(Error::conflict("Email already registered"));
        }

        let digest = self.hasher.hash(&req.password);
        let user_id = Uuid::new_v4().to_string();
        self.db
            .create_user(
                &user_id,
                &req.email,
                &digest,
                &req.first_name,
                &req.last_name,
                req.avatar.as_deref(),
            )
            .map_err(internal)?;

        let user = self
            .db
            .user_by_id(&user_id)
            .map_err(internal)?
            .ok_or(Error::Internal)?;
        let session = self.issue_session(&user_id)?;

        info!("registered user {user_id}");
        Ok(AuthPayload {
            user: public_user(user),
            session,
        })
    }

    fn login(&mut self, req: LoginRequest) -> Result<AuthPayload, Error> {
        if req.email.is_empty() || req.password.is_empty() {
            return Err(Error::invalid("Email and password are required"));
        }

        let digest = self.hasher.hash(&req.password);
        let user = self
            .db
            .user_by_credentials(&req.email, &digest)
            .map_err(internal)?
            .ok_or_else(|| Error::unauthorized("Invalid email or password"))?;

        // Prior sessions stay valid; multi-device login is supported
        let session = self.issue_session(&user.id)?;
        Ok(AuthPayload {
            user: public_user(user),
            session,
        })
    }

    fn logout(&mut self, session_id: Option<String>) -> Result<(), Error> {
        let session_id = session_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::invalid("Session ID is required"))?;

        self.db
            .expire_session(&session_id, Utc::now().timestamp())
            .map_err(internal)?;

        if let Some(user_id) = self.db.session_owner(&session_id).map_err(internal)? {
            if self.registry.close(&user_id, 1000, "Logged out") {
                self.broadcast_presence(&user_id, false);
            }
        }

        Ok(())
    }

    fn validate_session(&self, session_id: Option<&str>) -> SessionCheck {
        let Some(id) = session_id.filter(|id| !id.is_empty()) else {
            return SessionCheck::invalid();
        };

        match self.db.session_user(id, Utc::now().timestamp()) {
            Ok(Some(user_id)) => SessionCheck {
                valid: true,
                user_id: Some(user_id),
            },
            Ok(None) => SessionCheck::invalid(),
            Err(err) => {
                error!("session lookup failed: {err:#}");
                SessionCheck::invalid()
            }
        }
    }

    fn require_session(&self, session_id: Option<&str>) -> Result<String, Error> {
        self.validate_session(session_id)
            .user_id
            .ok_or_else(|| Error::unauthorized("Invalid session"))
    }

    fn issue_session(&self, user_id: &str) -> Result<SessionToken, Error> {
        let session_id = Uuid::new_v4().to_string();
        let expires_at = (Utc::now() + Duration::days(SESSION_DURATION_DAYS)).timestamp();
        self.db
            .create_session(&session_id, user_id, expires_at)
            .map_err(internal)?;
        Ok(SessionToken {
            id: session_id,
            expires_at,
        })
    }

    // -- Users --

    fn list_users(&self) -> Result<Vec<User>, Error> {
        let rows = self.db.list_users().map_err(internal)?;
        Ok(rows.into_iter().map(public_user).collect())
    }

    fn list_online_users(&self) -> Result<Vec<User>, Error> {
        // Nobody connected: skip the store entirely
        if self.registry.is_empty() {
            return Ok(vec![]);
        }

        let ids = self.registry.online_user_ids();
        let rows = self.db.users_by_ids(&ids).map_err(internal)?;
        Ok(rows.into_iter().map(public_user).collect())
    }

    // -- Channels --

    fn list_channels(&self, session_id: Option<&str>) -> Result<Vec<ChannelSummary>, Error> {
        let user_id = self.require_session(session_id)?;
        let rows = self.db.channels_for_user(&user_id).map_err(internal)?;
        Ok(rows.into_iter().map(channel_summary).collect())
    }

    fn create_channel(
        &mut self,
        session_id: Option<&str>,
        req: CreateChannelRequest,
    ) -> Result<ChannelSummary, Error> {
        let user_id = self.require_session(session_id)?;
        if req.name.trim().is_empty() {
            return Err(Error::invalid("Channel name is required"));
        }

        let channel_id = Uuid::new_v4().to_string();
        self.db
            .create_channel(&channel_id, &req.name, req.description.as_deref(), req.is_private)
            .map_err(internal)?;

        // Creator first, then the requested members deduplicated with
        // the creator excluded, in one batch
        let mut members = vec![(Uuid::new_v4().to_string(), user_id.clone())];
        let mut seen: HashSet<String> = HashSet::from([user_id]);
        for member_id in &req.member_ids {
            if seen.insert(member_id.clone()) {
                members.push((Uuid::new_v4().to_string(), member_id.clone()));
            }
        }
        self.db.add_members(&channel_id, &members).map_err(internal)?;

        let channel = self.summary(&channel_id)?;
        info!("created channel {channel_id} with {} members", channel.member_count);

        self.registry.send_to_users(
            channel.member_ids.iter().map(String::as_str).collect::<Vec<_>>(),
            &GatewayEvent::NewChannel {
                channel: channel.clone(),
            },
        );

        Ok(channel)
    }

    fn invite(
        &mut self,
        session_id: Option<&str>,
        channel_id: &str,
        user_ids: Vec<String>,
    ) -> Result<ChannelSummary, Error> {
        let user_id = self.require_session(session_id)?;

        // Only members may invite
        if !self.db.is_member(channel_id, &user_id).map_err(internal)? {
            return Err(Error::forbidden("Not a member of this channel"));
        }

        let members: Vec<(String, String)> = user_ids
            .into_iter()
            .map(|invitee| (Uuid::new_v4().to_string(), invitee))
            .collect();
        self.db.add_members(channel_id, &members).map_err(internal)?;

        let channel = self.summary(channel_id)?;

        // Old and new members alike hear about the update
        self.registry.send_to_users(
            channel.member_ids.iter().map(String::as_str).collect::<Vec<_>>(),
            &GatewayEvent::ChannelUpdated {
                channel: channel.clone(),
            },
        );

        Ok(channel)
    }

    fn leave(
        &mut self,
        session_id: Option<&str>,
        channel_id: String,
    ) -> Result<LeaveOutcome, Error> {
        let user_id = self.require_session(session_id)?;

        let deleted = self.db.remove_member(&channel_id, &user_id).map_err(internal)?;

        if deleted {
            // The channel actor's message store is retained on disk;
            // only the metadata is gone
            info!("channel {channel_id} deleted after last member left");
            self.registry.send_to_users(
                [user_id.as_str()],
                &GatewayEvent::ChannelLeft { channel_id },
            );
            return Ok(LeaveOutcome::Deleted);
        }

        let channel = self.summary(&channel_id)?;
        self.registry.send_to_users(
            channel.member_ids.iter().map(String::as_str).collect::<Vec<_>>(),
            &GatewayEvent::ChannelUpdated {
                channel: channel.clone(),
            },
        );
        self.registry.send_to_users(
            [user_id.as_str()],
            &GatewayEvent::ChannelLeft { channel_id },
        );

        Ok(LeaveOutcome::Remaining(channel))
    }

    fn check_access(&self, session_id: Option<&str>, channel_id: &str) -> bool {
        let Some(user_id) = self.validate_session(session_id).user_id else {
            return false;
        };
        self.db.is_member(channel_id, &user_id).unwrap_or_else(|err| {
            error!("membership lookup failed: {err:#}");
            false
        })
    }

    fn notify(&mut self, channel_id: String, message: Message) -> Result<(), Error> {
        let members = self.db.member_ids(&channel_id).map_err(internal)?;
        let event = GatewayEvent::NewMessage {
            channel_id,
            message,
        };
        self.registry
            .send_to_users(members.iter().map(String::as_str).collect::<Vec<_>>(), &event);
        Ok(())
    }

    // -- Connection lifecycle --

    fn connect(
        &mut self,
        session_id: Option<&str>,
        frames: mpsc::UnboundedSender<SocketFrame>,
    ) -> Result<ConnectedClient, Error> {
        let Some(user_id) = self.validate_session(session_id).user_id else {
            // Caller closes the socket with 1008; nothing registered
            return Err(Error::unauthorized("Invalid or expired session"));
        };

        let conn_id = self.registry.register(&user_id, frames);
        info!("user {user_id} connected");
        self.broadcast_presence(&user_id, true);

        Ok(ConnectedClient { user_id, conn_id })
    }

    fn disconnect(&mut self, user_id: &str, conn_id: Uuid) {
        if self.registry.remove(user_id, conn_id) {
            info!("user {user_id} disconnected");
            self.broadcast_presence(user_id, false);
        }
    }

    fn broadcast_presence(&mut self, user_id: &str, online: bool) {
        let event = if online {
            GatewayEvent::UserConnected {
                user_id: user_id.to_string(),
            }
        } else {
            GatewayEvent::UserDisconnected {
                user_id: user_id.to_string(),
            }
        };
        self.registry.broadcast_except(user_id, &event);
    }

    fn summary(&self, channel_id: &str) -> Result<ChannelSummary, Error> {
        self.db
            .channel_summary(channel_id)
            .map_err(internal)?
            .map(channel_summary)
            .ok_or(Error::Internal)
    }
}

fn internal(err: anyhow::Error) -> Error {
    error!("store failure: {err:#}");
    Error::Internal
}

fn public_user(row: UserRow) -> User {
    User {
        id: row.id,
        email: row.email,
        first_name: row.first_name,
        last_name: row.last_name,
        avatar: row.avatar,
        created_at: row.created_at,
    }
}

fn channel_summary(row: ChannelRow) -> ChannelSummary {
    ChannelSummary {
        id: row.id,
        name: row.name,
        description: row.description,
        is_private: row.is_private,
        created_at: row.created_at,
        member_count: row.member_count,
        member_ids: row.member_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::Sha256Hasher;
    use tempfile::TempDir;

    fn spawn_actor(dir: &TempDir) -> DirectoryHandle {
        let db = Database::open_directory(&dir.path().join("directory.db")).unwrap();
        DirectoryActor::spawn(db, Arc::new(Sha256Hasher))
    }

    fn register_req(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: "hunter2".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            avatar: None,
        }
    }

    async fn register(handle: &DirectoryHandle, email: &str) -> AuthPayload {
        handle.register(register_req(email)).await.unwrap()
    }

    async fn connect(
        handle: &DirectoryHandle,
        session_id: &str,
    ) -> (ConnectedClient, mpsc::UnboundedReceiver<SocketFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = handle.connect(Some(session_id.into()), tx).await.unwrap();
        (client, rx)
    }

    fn next_event(rx: &mut mpsc::UnboundedReceiver<SocketFrame>) -> GatewayEvent {
        match rx.try_recv().expect("expected a queued frame") {
            SocketFrame::Event(event) => event,
            SocketFrame::Close { code, reason } => {
                panic!("expected event, got close {code}: {reason}")
            }
        }
    }

    #[tokio::test]
    async fn register_then_login_resolve_to_same_user() {
        let dir = TempDir::new().unwrap();
        let handle = spawn_actor(&dir);

        let registered = register(&handle, "ada@example.com").await;
        let logged_in = handle
            .login(LoginRequest {
                email: "ada@example.com".into(),
                password: "hunter2".into(),
            })
            .await
            .unwrap();

        assert_ne!(registered.session.id, logged_in.session.id);

        let a = handle.validate_session(Some(&registered.session.id)).await;
        let b = handle.validate_session(Some(&logged_in.session.id)).await;
        assert!(a.valid && b.valid);
        assert_eq!(a.user_id, b.user_id);
        assert_eq!(a.user_id.as_deref(), Some(registered.user.id.as_str()));
    }

    #[tokio::test]
    async fn duplicate_email_conflicts_and_blank_fields_reject() {
        let dir = TempDir::new().unwrap();
        let handle = spawn_actor(&dir);

        register(&handle, "ada@example.com").await;
        let err = handle.register(register_req("ada@example.com")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let mut blank = register_req("grace@example.com");
        blank.first_name = "   ".into();
        let err = handle.register(blank).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let dir = TempDir::new().unwrap();
        let handle = spawn_actor(&dir);
        register(&handle, "ada@example.com").await;

        let err = handle
            .login(LoginRequest {
                email: "ada@example.com".into(),
                password: "wrong".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn logout_invalidates_session() {
        let dir = TempDir::new().unwrap();
        let handle = spawn_actor(&dir);
        let auth = register(&handle, "ada@example.com").await;

        handle.logout(Some(auth.session.id.clone())).await.unwrap();
        let check = handle.validate_session(Some(&auth.session.id)).await;
        assert!(!check.valid);

        // Idempotent
        handle.logout(Some(auth.session.id)).await.unwrap();

        let err = handle.logout(None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn validate_session_never_errors() {
        let dir = TempDir::new().unwrap();
        let handle = spawn_actor(&dir);

        assert!(!handle.validate_session(None).await.valid);
        assert!(!handle.validate_session(Some("")).await.valid);
        assert!(!handle.validate_session(Some("ghost")).await.valid);
    }

    #[tokio::test]
    async fn created_channel_is_visible_to_every_member() {
        let dir = TempDir::new().unwrap();
        let handle = spawn_actor(&dir);

        let a = register(&handle, "a@example.com").await;
        let b = register(&handle, "b@example.com").await;
        let c = register(&handle, "c@example.com").await;

        let channel = handle
            .create_channel(
                Some(a.session.id.clone()),
                CreateChannelRequest {
                    name: "general".into(),
                    description: None,
                    is_private: false,
                    // Creator repeated and one duplicate: both collapse
                    member_ids: vec![
                        a.user.id.clone(),
                        b.user.id.clone(),
                        b.user.id.clone(),
                        c.user.id.clone(),
                    ],
                },
            )
            .await
            .unwrap();

        assert_eq!(channel.member_count, 3);

        for session in [&b.session.id, &c.session.id] {
            let channels = handle.list_channels(Some(session.clone())).await.unwrap();
            assert_eq!(channels.len(), 1);
            let mut ids = channels[0].member_ids.clone();
            ids.sort();
            let mut expected = vec![a.user.id.clone(), b.user.id.clone(), c.user.id.clone()];
            expected.sort();
            assert_eq!(ids, expected);
        }
    }

    #[tokio::test]
    async fn access_flips_on_invite_and_leave_deletes_empty_channel() {
        let dir = TempDir::new().unwrap();
        let handle = spawn_actor(&dir);

        let a = register(&handle, "a@example.com").await;
        let b = register(&handle, "b@example.com").await;

        let channel = handle
            .create_channel(
                Some(a.session.id.clone()),
                CreateChannelRequest {
                    name: "private".into(),
                    description: None,
                    is_private: true,
                    member_ids: vec![],
                },
            )
            .await
            .unwrap();

        assert!(!handle.check_channel_access(Some(&b.session.id), &channel.id).await);

        // Outsiders cannot invite
        let err = handle
            .invite_to_channel(
                Some(b.session.id.clone()),
                channel.id.clone(),
                vec![b.user.id.clone()],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        let updated = handle
            .invite_to_channel(
                Some(a.session.id.clone()),
                channel.id.clone(),
                vec![b.user.id.clone()],
            )
            .await
            .unwrap();
        assert_eq!(updated.member_count, 2);
        assert!(handle.check_channel_access(Some(&b.session.id), &channel.id).await);

        let outcome = handle
            .leave_channel(Some(a.session.id.clone()), channel.id.clone())
            .await
            .unwrap();
        let LeaveOutcome::Remaining(remaining) = outcome else {
            panic!("channel still has a member");
        };
        assert_eq!(remaining.member_ids, vec![b.user.id.clone()]);

        let outcome = handle
            .leave_channel(Some(b.session.id.clone()), channel.id.clone())
            .await
            .unwrap();
        assert!(matches!(outcome, LeaveOutcome::Deleted));

        for session in [&a.session.id, &b.session.id] {
            assert!(handle.list_channels(Some(session.clone())).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn presence_broadcasts_skip_the_triggering_user() {
        let dir = TempDir::new().unwrap();
        let handle = spawn_actor(&dir);

        let a = register(&handle, "a@example.com").await;
        let b = register(&handle, "b@example.com").await;

        let (_a_client, mut a_rx) = connect(&handle, &a.session.id).await;
        let (b_client, _b_rx) = connect(&handle, &b.session.id).await;

        assert_eq!(
            next_event(&mut a_rx),
            GatewayEvent::UserConnected {
                user_id: b.user.id.clone()
            }
        );

        let online = handle.list_online_users().await.unwrap();
        assert_eq!(online.len(), 2);

        handle.disconnect(b_client.user_id, b_client.conn_id).await;
        // Drain through the actor: a follow-up RPC orders after Disconnect
        let online = handle.list_online_users().await.unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].id, a.user.id);

        assert_eq!(
            next_event(&mut a_rx),
            GatewayEvent::UserDisconnected {
                user_id: b.user.id.clone()
            }
        );
    }

    #[tokio::test]
    async fn rejected_connect_registers_nothing() {
        let dir = TempDir::new().unwrap();
        let handle = spawn_actor(&dir);

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = handle.connect(Some("ghost".into()), tx).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert!(handle.list_online_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_connection_replaces_and_closes_the_first() {
        let dir = TempDir::new().unwrap();
        let handle = spawn_actor(&dir);
        let a = register(&handle, "a@example.com").await;

        let (first, mut first_rx) = connect(&handle, &a.session.id).await;
        let (_second, _second_rx) = connect(&handle, &a.session.id).await;

        match first_rx.try_recv().unwrap() {
            SocketFrame::Close { code, .. } => assert_eq!(code, 1000),
            other => panic!("expected close, got {other:?}"),
        }

        // Stale teardown from the displaced socket changes nothing
        handle.disconnect(first.user_id, first.conn_id).await;
        let online = handle.list_online_users().await.unwrap();
        assert_eq!(online.len(), 1);
    }

    #[tokio::test]
    async fn logout_closes_the_live_socket() {
        let dir = TempDir::new().unwrap();
        let handle = spawn_actor(&dir);
        let a = register(&handle, "a@example.com").await;
        let b = register(&handle, "b@example.com").await;

        let (_a_client, mut a_rx) = connect(&handle, &a.session.id).await;
        let (_b_client, mut b_rx) = connect(&handle, &b.session.id).await;
        let _ = next_event(&mut a_rx); // b connecting

        handle.logout(Some(b.session.id.clone())).await.unwrap();

        match b_rx.try_recv().unwrap() {
            SocketFrame::Close { code, reason } => {
                assert_eq!(code, 1000);
                assert_eq!(reason, "Logged out");
            }
            other => panic!("expected close, got {other:?}"),
        }
        assert_eq!(
            next_event(&mut a_rx),
            GatewayEvent::UserDisconnected { user_id: b.user.id }
        );
    }

    #[tokio::test]
    async fn notify_reaches_online_members_only() {
        let dir = TempDir::new().unwrap();
        let handle = spawn_actor(&dir);

        let a = register(&handle, "a@example.com").await;
        let b = register(&handle, "b@example.com").await;
        let c = register(&handle, "c@example.com").await;

        let channel = handle
            .create_channel(
                Some(a.session.id.clone()),
                CreateChannelRequest {
                    name: "general".into(),
                    description: None,
                    is_private: false,
                    member_ids: vec![b.user.id.clone()],
                },
            )
            .await
            .unwrap();

        // a and b are members; only b and c are online
        let (_b_client, mut b_rx) = connect(&handle, &b.session.id).await;
        let (_c_client, mut c_rx) = connect(&handle, &c.session.id).await;
        let _ = next_event(&mut b_rx); // c connecting

        let message = Message {
            id: "m1".into(),
            channel_id: channel.id.clone(),
            user_id: a.user.id.clone(),
            content: "hello".into(),
            assets: vec![],
            created_at: 1,
        };
        handle.notify(channel.id.clone(), message.clone()).await.unwrap();

        assert_eq!(
            next_event(&mut b_rx),
            GatewayEvent::NewMessage {
                channel_id: channel.id,
                message
            }
        );
        // c is online but not a member
        assert!(c_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn channel_events_reach_member_sockets() {
        let dir = TempDir::new().unwrap();
        let handle = spawn_actor(&dir);

        let a = register(&handle, "a@example.com").await;
        let b = register(&handle, "b@example.com").await;

        let (_b_client, mut b_rx) = connect(&handle, &b.session.id).await;

        let channel = handle
            .create_channel(
                Some(a.session.id.clone()),
                CreateChannelRequest {
                    name: "general".into(),
                    description: None,
                    is_private: false,
                    member_ids: vec![b.user.id.clone()],
                },
            )
            .await
            .unwrap();

        match next_event(&mut b_rx) {
            GatewayEvent::NewChannel { channel: seen } => assert_eq!(seen.id, channel.id),
            other => panic!("expected NEW_CHANNEL, got {other:?}"),
        }

        handle
            .leave_channel(Some(a.session.id.clone()), channel.id.clone())
            .await
            .unwrap();
        match next_event(&mut b_rx) {
            GatewayEvent::ChannelUpdated { channel: seen } => {
                assert_eq!(seen.member_ids, vec![b.user.id.clone()]);
            }
            other => panic!("expected CHANNEL_UPDATED, got {other:?}"),
        }

        let outcome = handle
            .leave_channel(Some(b.session.id.clone()), channel.id.clone())
            .await
            .unwrap();
        assert!(matches!(outcome, LeaveOutcome::Deleted));
        match next_event(&mut b_rx) {
            GatewayEvent::ChannelLeft { channel_id } => assert_eq!(channel_id, channel.id),
            other => panic!("expected CHANNEL_LEFT, got {other:?}"),
        }
    }
}
