use thiserror::Error;

/// Failure to turn a bearer credential into a user id.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Credential expired")]
    Expired,

    #[error("Credential subject has no user record")]
    UnknownSubject,
}
