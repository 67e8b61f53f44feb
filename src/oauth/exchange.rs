//! Token endpoint grants.
//!
//! Both grants go to the same `get_token` endpoint as a form POST, with the
//! client credentials sent twice: in the form and as HTTP Basic auth.

use super::provider::ProviderConfig;
use crate::error::{AuthError, AuthResult};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error};

/// Lifetime assumed when the provider omits `expires_in`
pub const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Grant sent to the token endpoint
#[derive(Clone, Copy, Debug)]
pub enum TokenGrant<'a> {
    AuthorizationCode(&'a str),
    RefreshToken(&'a str),
}

impl TokenGrant<'_> {
    fn grant_type(&self) -> &'static str {
        match self {
            TokenGrant::AuthorizationCode(_) => "authorization_code",
            TokenGrant::RefreshToken(_) => "refresh_token",
        }
    }
}

/// Token endpoint response (standard OAuth 2.0, extra Yahoo fields ignored)
#[derive(Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    pub fn expires_in_or_default(&self) -> i64 {
        self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN)
    }
}

/// POST a grant to the token endpoint.
///
/// # Returns
/// * `Err(AuthError::TokenExchange)` - Non-success status, with the body
/// * `Err(AuthError::Http)` - Transport failure or timeout
/// * `Err(AuthError::InvalidResponse)` - Success status but unusable JSON
pub async fn request_token(
    http: &Client,
    provider: &ProviderConfig,
    grant: TokenGrant<'_>,
) -> AuthResult<TokenResponse> {
    let mut form: Vec<(&str, &str)> = vec![
        ("client_id", provider.client_id.as_str()),
        ("client_secret", provider.client_secret.as_str()),
        ("redirect_uri", provider.redirect_uri.as_str()),
    ];
    match grant {
        TokenGrant::AuthorizationCode(code) => form.push(("code", code)),
        TokenGrant::RefreshToken(token) => form.push(("refresh_token", token)),
    }
    form.push(("grant_type", grant.grant_type()));

    let token_url = provider.token_url();
    debug!(grant_type = grant.grant_type(), token_url = %token_url, "Requesting token");

    let response = http
        .post(&token_url)
        .basic_auth(&provider.client_id, Some(&provider.client_secret))
        .header(ACCEPT, "application/json")
        .form(&form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());
        error!(
            grant_type = grant.grant_type(),
            status = %status,
            body = %body,
            "Token request rejected"
        );
        return Err(AuthError::TokenExchange { status, body });
    }

    let body = response.text().await?;
    let token: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| AuthError::InvalidResponse(format!("Failed to parse token response: {}", e)))?;

    debug!(
        grant_type = grant.grant_type(),
        has_refresh_token = token.refresh_token.is_some(),
        expires_in = ?token.expires_in,
        "Token request succeeded"
    );

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_deserialization() {
        let json = r#"{
            "access_token": "yahoo_access",
            "refresh_token": "yahoo_refresh",
            "expires_in": 3600,
            "token_type": "bearer",
            "xoauth_yahoo_guid": "ABCDEF"
        }"#;

        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token, "yahoo_access");
        assert_eq!(response.refresh_token.as_deref(), Some("yahoo_refresh"));
        assert_eq!(response.expires_in, Some(3600));
        assert_eq!(response.token_type.as_deref(), Some("bearer"));
    }

    #[test]
    fn test_token_response_minimal() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "token_12345"}"#).unwrap();
        assert_eq!(response.refresh_token, None);
        assert_eq!(response.expires_in_or_default(), DEFAULT_EXPIRES_IN);
    }

    #[test]
    fn test_grant_types() {
        assert_eq!(TokenGrant::AuthorizationCode("c").grant_type(), "authorization_code");
        assert_eq!(TokenGrant::RefreshToken("r").grant_type(), "refresh_token");
    }
}
