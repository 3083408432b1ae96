//! Errors raised while establishing or refreshing an archive session.

use thiserror::Error;

/// Session-level failures. Any of these is fatal for a run.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The login endpoint rejected the submitted credentials.
    #[error("login rejected by {url} (HTTP {status}): check username and password")]
    InvalidCredentials {
        /// URL that answered with 401/403.
        url: String,
        /// The rejecting status code.
        status: u16,
    },

    /// The login redirect chain looped or pointed nowhere.
    #[error("login redirect chain did not settle after {hops} hops (last: {url})")]
    UnexpectedRedirect {
        /// Last URL requested in the chain.
        url: String,
        /// Hops followed before giving up.
        hops: usize,
    },

    /// Connection-level failure talking to the login chain.
    #[error("network error during login at {url}: {source}")]
    Network {
        /// URL that could not be reached.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The chain ended in a status that is neither success nor a rejection.
    #[error("unexpected HTTP {status} during login at {url}")]
    UnexpectedStatus {
        /// URL that answered.
        url: String,
        /// The status code.
        status: u16,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl AuthError {
    /// Creates a network error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a rejected-credentials error.
    pub fn invalid_credentials(url: impl Into<String>, status: u16) -> Self {
        Self::InvalidCredentials {
            url: url.into(),
            status,
        }
    }

    /// Creates a redirect-chain error.
    pub fn unexpected_redirect(url: impl Into<String>, hops: usize) -> Self {
        Self::UnexpectedRedirect {
            url: url.into(),
            hops,
        }
    }

    /// Creates an unexpected-status error.
    pub fn unexpected_status(url: impl Into<String>, status: u16) -> Self {
        Self::UnexpectedStatus {
            url: url.into(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_credentials_display() {
        let error = AuthError::invalid_credentials("https://login.example.org/oauth", 401);
        let msg = error.to_string();
        assert!(msg.contains("401"), "got: {msg}");
        assert!(msg.contains("login.example.org"), "got: {msg}");
    }

    #[test]
    fn test_unexpected_redirect_display() {
        let error = AuthError::unexpected_redirect("https://a.example/loop", 10);
        assert!(error.to_string().contains("10 hops"));
    }

    #[test]
    fn test_unexpected_status_display() {
        let error = AuthError::unexpected_status("https://a.example/", 500);
        assert!(error.to_string().contains("HTTP 500"));
    }
}
