pub mod actor;
pub mod assets;

pub use actor::{ChannelActor, ChannelHandle, MessagePage};
pub use assets::{BlobStore, FsBlobStore, Upload};
