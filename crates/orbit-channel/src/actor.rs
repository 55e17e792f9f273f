use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use uuid::Uuid;

use orbit_db::Database;
use orbit_db::models::MessageRow;
use orbit_directory::DirectoryHandle;
use orbit_types::api::PostMessageRequest;
use orbit_types::error::Error;
use orbit_types::models::Message;

use crate::assets::{BlobStore, Upload};

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 200;

type Reply<T> = oneshot::Sender<Result<T, Error>>;

/// One page of history, newest first.
#[derive(Debug)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

enum Command {
    ListMessages {
        limit: Option<u32>,
        before: Option<String>,
        reply: Reply<MessagePage>,
    },
    PostMessage {
        session_id: Option<String>,
        req: PostMessageRequest,
        reply: Reply<Message>,
    },
    Upload {
        session_id: Option<String>,
        upload: Upload,
        reply: Reply<String>,
    },
}

/// Handle to one channel's actor. Cloneable; the router caches one per
/// channel and every request is an RPC into the actor's loop.
#[derive(Clone)]
pub struct ChannelHandle {
    tx: mpsc::Sender<Command>,
}

impl ChannelHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| Error::Internal)?;
        rx.await.map_err(|_| Error::Internal)?
    }

    pub async fn list_messages(
        &self,
        limit: Option<u32>,
        before: Option<String>,
    ) -> Result<MessagePage, Error> {
        self.request(|reply| Command::ListMessages {
            limit,
            before,
            reply,
        })
        .await
    }

    pub async fn post_message(
        &self,
        session_id: Option<String>,
        req: PostMessageRequest,
    ) -> Result<Message, Error> {
        self.request(|reply| Command::PostMessage {
            session_id,
            req,
            reply,
        })
        .await
    }

    pub async fn upload(&self, session_id: Option<String>, upload: Upload) -> Result<String, Error> {
        self.request(|reply| Command::Upload {
            session_id,
            upload,
            reply,
        })
        .await
    }
}

/// Actor owning one channel's message history. Authorization happened
/// at the router's access gate; mutations still resolve the author from
/// the session so the stored user id can never be spoofed.
pub struct ChannelActor {
    channel_id: String,
    db: Database,
    directory: DirectoryHandle,
    blobs: Arc<dyn BlobStore>,
}

impl ChannelActor {
    pub fn spawn(
        channel_id: String,
        db: Database,
        directory: DirectoryHandle,
        blobs: Arc<dyn BlobStore>,
    ) -> ChannelHandle {
        let (tx, rx) = mpsc::channel(256);
        let actor = ChannelActor {
            channel_id,
            db,
            directory,
            blobs,
        };
        tokio::spawn(actor.run(rx));
        ChannelHandle { tx }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        info!("channel actor started for {}", self.channel_id);
        while let Some(cmd) = rx.recv().await {
            self.handle(cmd).await;
        }
        info!("channel actor stopped for {}", self.channel_id);
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::ListMessages {
                limit,
                before,
                reply,
            } => {
                let _ = reply.send(self.list_messages(limit, before));
            }
            Command::PostMessage {
                session_id,
                req,
                reply,
            } => {
                let _ = reply.send(self.post_message(session_id.as_deref(), req).await);
            }
            Command::Upload {
                session_id,
                upload,
                reply,
            } => {
                let _ = reply.send(self.upload(session_id.as_deref(), upload).await);
            }
        }
    }

    fn list_messages(
        &self,
        limit: Option<u32>,
        before: Option<String>,
    ) -> Result<MessagePage, Error> {
        let limit = limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        let rows = self
            .db
            .list_messages(&self.channel_id, limit, before.as_deref())
            .map_err(internal)?;

        // A full page means there may be older messages behind it
        let has_more = rows.len() as u32 == limit;
        Ok(MessagePage {
            messages: rows.into_iter().map(row_to_message).collect(),
            has_more,
        })
    }

    async fn post_message(
        &mut self,
        session_id: Option<&str>,
        req: PostMessageRequest,
    ) -> Result<Message, Error> {
        let user_id = self.require_session(session_id).await?;

        if req.content.trim().is_empty() {
            return Err(Error::invalid("Message content is required"));
        }

        let message_id = Uuid::new_v4().to_string();
        let assets_json = serde_json::to_string(&req.assets).map_err(|err| {
            error!("serializing assets failed: {err}");
            Error::Internal
        })?;

        self.db
            .insert_message(&message_id, &self.channel_id, &user_id, &req.content, &assets_json)
            .map_err(internal)?;

        // Read back for the store-assigned timestamp
        let row = self
            .db
            .message_by_id(&message_id)
            .map_err(internal)?
            .ok_or(Error::Internal)?;
        let message = row_to_message(row);

        // Fan-out is best-effort; the message is already committed
        if let Err(err) = self
            .directory
            .notify(self.channel_id.clone(), message.clone())
            .await
        {
            warn!("notify failed for channel {}: {err}", self.channel_id);
        }

        Ok(message)
    }

    async fn upload(&mut self, session_id: Option<&str>, upload: Upload) -> Result<String, Error> {
        self.require_session(session_id).await?;

        if upload.bytes.is_empty() {
            return Err(Error::invalid("No file provided"));
        }

        let key = match extension(&upload.filename) {
            Some(ext) => format!("{}/{}.{ext}", self.channel_id, Uuid::new_v4()),
            None => format!("{}/{}", self.channel_id, Uuid::new_v4()),
        };

        let url = self
            .blobs
            .put(&key, upload.bytes, &upload.content_type)
            .await
            .map_err(internal)?;
        Ok(url)
    }

    async fn require_session(&self, session_id: Option<&str>) -> Result<String, Error> {
        self.directory
            .validate_session(session_id)
            .await
            .user_id
            .ok_or_else(|| Error::unauthorized("Invalid session"))
    }
}

/// File extension suitable for a storage key: short, ASCII
/// alphanumeric, taken from after the last dot.
fn extension(filename: &str) -> Option<&str> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 16 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext)
}

fn row_to_message(row: MessageRow) -> Message {
    let assets = serde_json::from_str(&row.assets).unwrap_or_else(|err| {
        warn!("unreadable assets column on message {}: {err}", row.id);
        Vec::new()
    });
    Message {
        id: row.id,
        channel_id: row.channel_id,
        user_id: row.user_id,
        content: row.content,
        assets,
        created_at: row.created_at,
    }
}

fn internal(err: anyhow::Error) -> Error {
    error!("channel operation failed: {err:#}");
    Error::Internal
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_directory::{DirectoryActor, Sha256Hasher, SocketFrame};
    use orbit_types::api::{CreateChannelRequest, RegisterRequest};
    use orbit_types::events::GatewayEvent;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        directory: DirectoryHandle,
        blobs: Arc<FsBlobStore>,
        root: std::path::PathBuf,
    }

    use crate::assets::FsBlobStore;

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let db = Database::open_directory(&root.join("directory.db")).unwrap();
        let directory = DirectoryActor::spawn(db, Arc::new(Sha256Hasher));
        let blobs = Arc::new(
            FsBlobStore::new(root.join("assets"), "/assets".into())
                .await
                .unwrap(),
        );
        Fixture {
            _dir: dir,
            directory,
            blobs,
            root,
        }
    }

    async fn register(fx: &Fixture, email: &str) -> (String, String) {
        let auth = fx
            .directory
            .register(RegisterRequest {
                email: email.into(),
                password: "hunter2".into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                avatar: None,
            })
            .await
            .unwrap();
        (auth.user.id, auth.session.id)
    }

    fn spawn_channel(fx: &Fixture, channel_id: &str) -> ChannelHandle {
        let db = Database::open_channel(&fx.root.join(format!("channel-{channel_id}.db"))).unwrap();
        ChannelActor::spawn(
            channel_id.into(),
            db,
            fx.directory.clone(),
            fx.blobs.clone(),
        )
    }

    fn post(content: &str, assets: Vec<String>) -> PostMessageRequest {
        PostMessageRequest {
            content: content.into(),
            assets,
        }
    }

    #[tokio::test]
    async fn post_requires_a_valid_session() {
        let fx = fixture().await;
        let channel = spawn_channel(&fx, "c1");

        let err = channel
            .post_message(Some("ghost".into()), post("hello", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));

        let err = channel
            .post_message(None, post("hello", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn blank_content_is_rejected() {
        let fx = fixture().await;
        let (_user, session) = register(&fx, "ada@example.com").await;
        let channel = spawn_channel(&fx, "c1");

        let err = channel
            .post_message(Some(session), post("   ", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn posted_message_is_stamped_and_listed() {
        let fx = fixture().await;
        let (user_id, session) = register(&fx, "ada@example.com").await;
        let channel = spawn_channel(&fx, "c1");

        let message = channel
            .post_message(
                Some(session),
                post("hello", vec!["/assets/c1/a.png".into()]),
            )
            .await
            .unwrap();
        assert_eq!(message.user_id, user_id);
        assert_eq!(message.channel_id, "c1");
        assert!(message.created_at > 0);

        let page = channel.list_messages(None, None).await.unwrap();
        assert_eq!(page.messages, vec![message]);
        assert!(!page.has_more);
        assert_eq!(page.messages[0].assets, vec!["/assets/c1/a.png"]);
    }

    #[tokio::test]
    async fn history_pages_newest_first() {
        let fx = fixture().await;
        let (_user, session) = register(&fx, "ada@example.com").await;
        let channel = spawn_channel(&fx, "c1");

        let mut ids = Vec::new();
        for i in 0..60 {
            let message = channel
                .post_message(Some(session.clone()), post(&format!("msg {i}"), vec![]))
                .await
                .unwrap();
            ids.push(message.id);
        }

        let first = channel.list_messages(None, None).await.unwrap();
        assert_eq!(first.messages.len(), 50);
        assert!(first.has_more);
        assert_eq!(first.messages[0].id, ids[59]);
        assert_eq!(first.messages[49].id, ids[10]);

        let cursor = first.messages.last().unwrap().id.clone();
        let rest = channel.list_messages(None, Some(cursor)).await.unwrap();
        assert_eq!(rest.messages.len(), 10);
        assert!(!rest.has_more);
        assert_eq!(rest.messages[9].id, ids[0]);

        let small = channel.list_messages(Some(2), None).await.unwrap();
        assert_eq!(small.messages.len(), 2);
        assert!(small.has_more);
    }

    #[tokio::test]
    async fn post_notifies_online_members() {
        let fx = fixture().await;
        let (_a_id, a_session) = register(&fx, "a@example.com").await;
        let (b_id, b_session) = register(&fx, "b@example.com").await;

        let summary = fx
            .directory
            .create_channel(
                Some(a_session.clone()),
                CreateChannelRequest {
                    name: "general".into(),
                    description: None,
                    is_private: false,
                    member_ids: vec![b_id],
                },
            )
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        fx.directory.connect(Some(b_session), tx).await.unwrap();

        let channel = spawn_channel(&fx, &summary.id);
        let posted = channel
            .post_message(Some(a_session), post("hello", vec![]))
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            SocketFrame::Event(GatewayEvent::NewMessage {
                channel_id,
                message,
            }) => {
                assert_eq!(channel_id, summary.id);
                assert_eq!(message, posted);
            }
            other => panic!("expected NEW_MESSAGE, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn upload_stores_bytes_under_the_channel_prefix() {
        let fx = fixture().await;
        let (_user, session) = register(&fx, "ada@example.com").await;
        let channel = spawn_channel(&fx, "c1");

        let url = channel
            .upload(
                Some(session.clone()),
                Upload {
                    filename: "photo.png".into(),
                    content_type: "image/png".into(),
                    bytes: b"png-bytes".to_vec(),
                },
            )
            .await
            .unwrap();

        assert!(url.starts_with("/assets/c1/"));
        assert!(url.ends_with(".png"));

        let key = url.strip_prefix("/assets/").unwrap();
        let on_disk = std::fs::read(fx.root.join("assets").join(key)).unwrap();
        assert_eq!(on_disk, b"png-bytes");

        let err = channel
            .upload(
                Some(session),
                Upload {
                    filename: "empty.bin".into(),
                    content_type: "application/octet-stream".into(),
                    bytes: vec![],
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn extension_rejects_suspicious_names() {
        assert_eq!(extension("photo.png"), Some("png"));
        assert_eq!(extension("archive.tar.gz"), Some("gz"));
        assert_eq!(extension("noext"), None);
        assert_eq!(extension("trailing."), None);
        assert_eq!(extension("weird.p/ng"), None);
    }
}
