use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{error, info};

use orbit_channel::{BlobStore, ChannelActor, ChannelHandle};
use orbit_db::Database;
use orbit_directory::DirectoryHandle;
use orbit_types::error::Error;

/// Routes requests to actors: the singleton directory plus one channel
/// actor per channel, spawned lazily on first use and cached under the
/// key `channel-<id>`. Cloning shares the table.
#[derive(Clone)]
pub struct ActorRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    directory: DirectoryHandle,
    blobs: Arc<dyn BlobStore>,
    data_dir: PathBuf,
    channels: Mutex<HashMap<String, ChannelHandle>>,
}

impl ActorRouter {
    pub fn new(directory: DirectoryHandle, blobs: Arc<dyn BlobStore>, data_dir: PathBuf) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                directory,
                blobs,
                data_dir,
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn directory(&self) -> &DirectoryHandle {
        &self.inner.directory
    }

    /// Handle for the channel's actor, spawning it if this is the first
    /// request since startup. Each actor opens its own store file.
    pub fn channel(&self, channel_id: &str) -> Result<ChannelHandle, Error> {
        let key = format!("channel-{channel_id}");

        let mut channels = self
            .inner
            .channels
            .lock()
            .map_err(|_| Error::Internal)?;
        if let Some(handle) = channels.get(&key) {
            return Ok(handle.clone());
        }

        let path = self.inner.data_dir.join(format!("{key}.db"));
        let db = Database::open_channel(&path).map_err(|err| {
            error!("opening channel store failed: {err:#}");
            Error::Internal
        })?;
        let handle = ChannelActor::spawn(
            channel_id.to_string(),
            db,
            self.inner.directory.clone(),
            self.inner.blobs.clone(),
        );
        info!("spawned channel actor {key}");

        channels.insert(key, handle.clone());
        Ok(handle)
    }
}
