use thiserror::Error;

/// Error taxonomy shared by the actors and the router. Store failures
/// are logged where they happen and surface only as `Internal`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A required field is missing or blank
    #[error("{0}")]
    InvalidInput(String),
    /// Missing, invalid, or expired session
    #[error("{0}")]
    Unauthorized(String),
    /// Valid session, insufficient membership
    #[error("{0}")]
    Forbidden(String),
    /// Unique constraint violation, e.g. a duplicate email
    #[error("{0}")]
    Conflict(String),
    #[error("Internal server error")]
    Internal,
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// HTTP status code mirroring the taxonomy.
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::Conflict(_) => 409,
            Self::Internal => 500,
        }
    }
}
