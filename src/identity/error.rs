use thiserror::Error;

use crate::protocol::ErrorCode;

/// Identity resolution failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// No credential was presented at all.
    #[error("authentication required")]
    Required,
    /// A credential was presented but did not verify.
    #[error("credential rejected: {0}")]
    Invalid(String),
    /// The credential verified but has expired.
    #[error("credential expired")]
    Expired,
}

impl IdentityError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Required => ErrorCode::AuthRequired,
            Self::Invalid(_) | Self::Expired => ErrorCode::AuthInvalid,
        }
    }
}
