use sha2::{Digest, Sha256};

/// Collaborator contract for password digests: deterministic and
/// one-way, so login can match `(email, digest)` in a single query.
pub trait SecretHasher: Send + Sync {
    fn hash(&self, secret: &str) -> String;
}

/// SHA-256 hex digest.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Hasher;

impl SecretHasher for Sha256Hasher {
    fn hash(&self, secret: &str) -> String {
        hex::encode(Sha256::digest(secret.as_bytes()))
    }
}
