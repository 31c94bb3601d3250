//! Error taxonomy for token lookup and refresh
//!
//! Storage-layer problems never surface here: a corrupt or foreign-machine
//! credential file degrades to "no session" inside the store. Everything in
//! this enum is something a caller (an auth guard) can act on.

use thiserror::Error;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No credential material at all; a first login is needed.
    AuthRequired,
    /// Credential material exists but the issuer rejected it.
    AuthExpired,
    /// Another refresh holds the single-flight guard.
    RefreshInProgress,
    Network,
    Timeout,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthRequired => "AUTH_REQUIRED",
            ErrorKind::AuthExpired => "AUTH_EXPIRED",
            ErrorKind::RefreshInProgress => "REFRESH_IN_PROGRESS",
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("Not authenticated: {0}. Run 'teams-session login'.")]
    AuthRequired(String),

    #[error("Session expired: {0}. Run 'teams-session login'.")]
    AuthExpired(String),

    #[error("A token refresh is already in progress; retry shortly.")]
    RefreshInProgress,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Unknown(String),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::AuthRequired(_) => ErrorKind::AuthRequired,
            AuthError::AuthExpired(_) => ErrorKind::AuthExpired,
            AuthError::RefreshInProgress => ErrorKind::RefreshInProgress,
            AuthError::Network(_) => ErrorKind::Network,
            AuthError::Timeout(_) => ErrorKind::Timeout,
            AuthError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Whether retrying the same request later may succeed without a login.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RefreshInProgress | ErrorKind::Network | ErrorKind::Timeout
        )
    }

    /// Whether the only way forward is an interactive login.
    pub fn requires_login(&self) -> bool {
        matches!(self.kind(), ErrorKind::AuthRequired | ErrorKind::AuthExpired)
    }

    /// Process exit status: 75 (EX_TEMPFAIL) for retryable errors, 2 when a
    /// login is needed, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.is_retryable() {
            75
        } else if self.requires_login() {
            2
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_progress_is_retryable_not_expired() {
        let err = AuthError::RefreshInProgress;
        assert_eq!(err.kind(), ErrorKind::RefreshInProgress);
        assert!(err.is_retryable());
        assert!(!err.requires_login());
    }

    #[test]
    fn test_terminal_errors_point_at_login() {
        let err = AuthError::AuthExpired("refresh token rejected".into());
        assert!(err.requires_login());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("teams-session login"));

        let err = AuthError::AuthRequired("no session".into());
        assert!(err.to_string().contains("teams-session login"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(AuthError::Network("dns failure".into()).exit_code(), 75);
        assert_eq!(AuthError::RefreshInProgress.exit_code(), 75);
        assert_eq!(AuthError::AuthExpired("rejected".into()).exit_code(), 2);
        assert_eq!(AuthError::AuthRequired("no session".into()).exit_code(), 2);
        assert_eq!(AuthError::Unknown("bad json".into()).exit_code(), 1);
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ErrorKind::AuthExpired.to_string(), "AUTH_EXPIRED");
        assert_eq!(AuthError::Timeout("x".into()).kind().as_str(), "TIMEOUT");
    }
}
