//! OAuth 2.0 authorization-code flow against Yahoo.
//!
//! 1. Caller builds the authorization URL (with its own CSRF `state`)
//! 2. User consents on Yahoo and is redirected back with a code
//! 3. [`OAuthClient::exchange_code`] trades the code for tokens and stores them
//! 4. [`OAuthClient::call`] resolves a token (cache → store → refresh) for
//!    each resource request, refreshing and retrying once on 401

mod client;
mod exchange;
mod provider;

pub use client::{AuthStatus, OAuthClient, CONNECTION_TEST_ENDPOINT, DEFAULT_RETRY_AFTER_SECS};
pub use exchange::{TokenGrant, TokenResponse, DEFAULT_EXPIRES_IN};
pub use provider::{ProviderConfig, LANGUAGE};

pub use reqwest::Method;
