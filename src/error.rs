//! Error types for the OAuth client and credential store.

use reqwest::StatusCode;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Error, Debug)]
pub enum AuthError {
    /// Missing or invalid client configuration. Fatal at construction.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The token endpoint rejected an authorization-code or refresh grant.
    #[error("Token exchange failed with status {status}: {body}")]
    TokenExchange { status: StatusCode, body: String },

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("No valid access token available. Please authenticate first.")]
    NotAuthenticated,

    /// Provider backpressure. `retry_after` is in seconds.
    #[error("Rate limited. Retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    #[error("API request failed with status {status}: {body}")]
    Api { status: StatusCode, body: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AuthError {
    /// True when the only way forward is sending the user through the
    /// authorization URL again.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, AuthError::NoRefreshToken | AuthError::NotAuthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reauthorization_classification() {
        assert!(AuthError::NoRefreshToken.requires_reauthorization());
        assert!(AuthError::NotAuthenticated.requires_reauthorization());
        assert!(!AuthError::RateLimited { retry_after: 60 }.requires_reauthorization());
        assert!(!AuthError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: String::new(),
        }
        .requires_reauthorization());
    }

    #[test]
    fn test_error_messages_carry_details() {
        let err = AuthError::TokenExchange {
            status: StatusCode::BAD_REQUEST,
            body: r#"{"error":"invalid_grant"}"#.to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("400"));
        assert!(message.contains("invalid_grant"));

        let err = AuthError::RateLimited { retry_after: 120 };
        assert!(err.to_string().contains("120"));
    }
}
