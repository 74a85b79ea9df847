//! Domain error taxonomy. Matched on at the dispatcher/handshake boundary
//! to decide a wire ERROR code or an HTTP refusal; `main.rs`'s own fallible
//! setup (config, bind, signal install) uses `anyhow` instead since it only
//! needs to log-and-exit, never match a variant.

use crate::codec::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("malformed frame")]
    MalformedFrame,
    #[error("duplicate username")]
    DuplicateName,
    #[error("invalid username")]
    InvalidUsername,
    #[error("user not found")]
    UserNotFound,
    #[error("invalid status transition")]
    InvalidStatus,
    #[error("message content is empty")]
    EmptyMessage,
}

impl GatewayError {
    /// The wire `ERROR` code this error maps to, if it is one that
    /// gets reported back to the requester rather than refused at the
    /// transport/handshake layer.
    pub fn wire_code(self) -> Option<ErrorCode> {
        match self {
            GatewayError::UserNotFound => Some(ErrorCode::UserNotFound),
            GatewayError::InvalidStatus => Some(ErrorCode::InvalidStatus),
            GatewayError::EmptyMessage => Some(ErrorCode::EmptyMessage),
            GatewayError::MalformedFrame
            | GatewayError::DuplicateName
            | GatewayError::InvalidUsername => None,
        }
    }
}
