pub mod actor;
pub mod hasher;
pub mod registry;

pub use actor::{
    AuthPayload, ConnectedClient, DirectoryActor, DirectoryHandle, LeaveOutcome, SessionCheck,
};
pub use hasher::{SecretHasher, Sha256Hasher};
pub use registry::SocketFrame;
