use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Backend and engine error codes.
///
/// `AuthenticationFailed` and `RecipientUnauthenticated` are the two
/// *recoverable* verification failures: the session manager retries those
/// (bounded) before going permanently `Failed`. Everything else is surfaced
/// immediately and never retried by the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthenticationFailed,
    InAppRecipientUnauthenticated,
    TokenVerificationPending,
    InvalidCredentials,
    MissingParameter,
    /// No backend handle exists yet (session not established).
    ObjectNotFound,
    Transport,
    Unknown,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::InAppRecipientUnauthenticated => "IN_APP_RECIPIENT_UNAUTHENTICATED",
            Self::TokenVerificationPending => "TOKEN_VERIFICATION_PENDING",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::MissingParameter => "MISSING_PARAMETER",
            Self::ObjectNotFound => "OBJECT_NOT_FOUND",
            Self::Transport => "TRANSPORT_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ErrorCode {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AUTHENTICATION_FAILED" => Ok(Self::AuthenticationFailed),
            "IN_APP_RECIPIENT_UNAUTHENTICATED" => Ok(Self::InAppRecipientUnauthenticated),
            "TOKEN_VERIFICATION_PENDING" => Ok(Self::TokenVerificationPending),
            "INVALID_CREDENTIALS" => Ok(Self::InvalidCredentials),
            "MISSING_PARAMETER" => Ok(Self::MissingParameter),
            "OBJECT_NOT_FOUND" => Ok(Self::ObjectNotFound),
            "TRANSPORT_ERROR" => Ok(Self::Transport),
            _ => Err(anyhow::anyhow!("unknown error code: {}", s)),
        }
    }
}

/// Typed error resolved by every engine and backend operation. Nothing in
/// the engine throws past this; async calls resolve to data or `InboxError`.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct InboxError {
    pub code: ErrorCode,
    pub message: String,
}

impl InboxError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn missing_parameter() -> Self {
        Self::new(ErrorCode::MissingParameter, "Missing Parameter")
    }

    pub fn no_session() -> Self {
        Self::new(ErrorCode::ObjectNotFound, "No active session")
    }

    pub fn invalid_credentials() -> Self {
        Self::new(ErrorCode::InvalidCredentials, "Invalid credentials")
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Transport, message)
    }

    /// True exactly for the two auth failures the session manager retries.
    pub fn is_recoverable_auth(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::AuthenticationFailed | ErrorCode::InAppRecipientUnauthenticated
        )
    }
}

pub type ApiResult<T> = Result<T, InboxError>;
