use thiserror::Error;

use crate::session::Permission;
use crate::token_store::TokenStoreError;

/// Failure of the transport itself; no HTTP status was received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Other(String),
}

/// Typed code for UI branching on an [`AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorCode {
    NoToken,
    TokenExpired,
    Forbidden,
    NotFound,
    NetworkUnreachable,
    Server,
    Protocol,
    Store,
}

/// Authorization failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Nothing stored for the workspace; the user must rejoin
    #[error("no token for workspace {workspace_id}; join it via an invite link")]
    NoToken { workspace_id: String },
    /// Server answered 401; the local token has been discarded
    #[error("session for workspace {workspace_id} expired; rejoin via an invite link")]
    TokenExpired { workspace_id: String },
    /// Token is valid but insufficient; it is kept
    #[error("{required} permission required on workspace {workspace_id}")]
    Forbidden {
        workspace_id: String,
        required: Permission,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("server unreachable: {0}")]
    NetworkUnreachable(String),
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    #[error("unexpected server response: {0}")]
    Protocol(String),
    #[error("token store: {0}")]
    Store(String),
}

impl AuthError {
    pub fn code(&self) -> AuthErrorCode {
        match self {
            AuthError::NoToken { .. } => AuthErrorCode::NoToken,
            AuthError::TokenExpired { .. } => AuthErrorCode::TokenExpired,
            AuthError::Forbidden { .. } => AuthErrorCode::Forbidden,
            AuthError::NotFound(_) => AuthErrorCode::NotFound,
            AuthError::NetworkUnreachable(_) => AuthErrorCode::NetworkUnreachable,
            AuthError::Server { .. } => AuthErrorCode::Server,
            AuthError::Protocol(_) => AuthErrorCode::Protocol,
            AuthError::Store(_) => AuthErrorCode::Store,
        }
    }

    /// Whether the user has to obtain a new invite to continue.
    pub fn requires_rejoin(&self) -> bool {
        matches!(
            self.code(),
            AuthErrorCode::NoToken | AuthErrorCode::TokenExpired
        )
    }
}

impl From<TransportError> for AuthError {
    fn from(e: TransportError) -> Self {
        AuthError::NetworkUnreachable(e.to_string())
    }
}

impl From<TokenStoreError> for AuthError {
    fn from(e: TokenStoreError) -> Self {
        AuthError::Store(e.to_string())
    }
}
