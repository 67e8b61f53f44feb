//! OAuth client for Yahoo Fantasy Sports.

use super::exchange::{request_token, TokenGrant, TokenResponse};
use super::provider::ProviderConfig;
use crate::config::AuthConfig;
use crate::credentials::{
    expiry_from_now, is_stale, CredentialSet, CredentialStore, DEFAULT_TOKEN_TYPE,
};
use crate::error::{AuthError, AuthResult};
use chrono::{DateTime, Duration, Utc};
use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Cheap authenticated endpoint used as a liveness check
pub const CONNECTION_TEST_ENDPOINT: &str = "users;use_login=1/games";

/// Used when a 429 carries no parseable `Retry-After`
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Access token held in process memory between calls.
#[derive(Clone, Debug)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Authentication status as reported to the HTTP layer
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    pub expired: bool,
    pub has_refresh_token: bool,
    /// Only checked when a non-expired token is stored
    pub connection_valid: bool,
}

/// Drives the authorization-code and refresh-token grants and wraps
/// resource calls with refresh-on-401.
///
/// The store is the source of truth; the in-memory cache only saves a
/// store read while the cached token is outside the expiry buffer.
pub struct OAuthClient {
    provider: ProviderConfig,
    store: Arc<CredentialStore>,
    http: Client,
    cache: Mutex<Option<CachedToken>>,
}

impl OAuthClient {
    /// # Returns
    /// * `Err(AuthError::Configuration)` - If `client_id` or `client_secret` is empty
    pub fn new(provider: ProviderConfig, store: Arc<CredentialStore>) -> AuthResult<Self> {
        if provider.client_id.trim().is_empty() || provider.client_secret.trim().is_empty() {
            return Err(AuthError::Configuration(
                "Yahoo client_id and client_secret are required".to_string(),
            ));
        }

        let http = Client::builder()
            .timeout(provider.request_timeout)
            .build()
            .map_err(|e| AuthError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            redirect_uri = %provider.redirect_uri,
            store_mode = %store.mode(),
            "OAuth client initialized"
        );

        Ok(Self {
            provider,
            store,
            http,
            cache: Mutex::new(None),
        })
    }

    pub fn from_config(config: &AuthConfig, store: Arc<CredentialStore>) -> AuthResult<Self> {
        Self::new(ProviderConfig::from_config(config), store)
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn build_authorization_url(&self, state: Option<&str>) -> String {
        self.provider.build_authorization_url(state)
    }

    /// Exchange an authorization code, persist the result and cache the token.
    pub async fn exchange_code(&self, code: &str) -> AuthResult<CredentialSet> {
        let token = request_token(&self.http, &self.provider, TokenGrant::AuthorizationCode(code)).await?;
        let credentials = self.persist(token, None)?;

        info!(
            has_refresh_token = credentials.refresh_token.is_some(),
            "Successfully exchanged code for tokens"
        );
        Ok(credentials)
    }

    /// Refresh the access token.
    ///
    /// Without an argument the refresh token is loaded from the store. A
    /// response without a new refresh token keeps the one just used.
    pub async fn refresh(&self, refresh_token: Option<&str>) -> AuthResult<CredentialSet> {
        let refresh_token = match refresh_token.filter(|t| !t.is_empty()) {
            Some(token) => token.to_string(),
            None => self
                .store
                .get()
                .and_then(|credentials| credentials.refresh_token)
                .filter(|t| !t.is_empty())
                .ok_or(AuthError::NoRefreshToken)?,
        };

        let token = request_token(&self.http, &self.provider, TokenGrant::RefreshToken(&refresh_token)).await?;
        let credentials = self.persist(token, Some(refresh_token))?;

        info!("Successfully refreshed access token");
        Ok(credentials)
    }

    /// Resolve a usable access token: cache, then store, then refresh.
    ///
    /// Fails with `NotAuthenticated` when none of those yields a token; the
    /// user has to go through the authorization URL again.
    pub async fn get_access_token(&self) -> AuthResult<String> {
        if let Some(token) = self.cached_token(Utc::now()) {
            return Ok(token);
        }

        let Some(stored) = self.store.get() else {
            debug!("No stored credentials");
            return Err(AuthError::NotAuthenticated);
        };

        if !stored.is_expired() {
            self.set_cache(&stored.access_token, stored.expires_at);
            return Ok(stored.access_token);
        }

        match stored.refresh_token.as_deref() {
            Some(refresh_token) => {
                info!("Access token expired, refreshing");
                let credentials = self.refresh(Some(refresh_token)).await?;
                Ok(credentials.access_token)
            }
            None => {
                warn!("Stored access token expired and no refresh token is available");
                Err(AuthError::NotAuthenticated)
            }
        }
    }

    /// Authenticated request against the resource API, retrying once after
    /// a refresh if the provider answers 401.
    pub async fn call(
        &self,
        endpoint: &str,
        method: Method,
        query: Option<&[(&str, &str)]>,
        body: Option<&Value>,
    ) -> AuthResult<Value> {
        self.call_with_retry(endpoint, method, query, body, true).await
    }

    /// Like [`call`](Self::call), with the 401 retry made explicit.
    ///
    /// At most one refresh and one retried request happen per invocation.
    ///
    /// # Returns
    /// * `Err(AuthError::RateLimited)` - 429, never retried here
    /// * `Err(AuthError::Api)` - Any other non-success status
    pub async fn call_with_retry(
        &self,
        endpoint: &str,
        method: Method,
        query: Option<&[(&str, &str)]>,
        body: Option<&Value>,
        allow_retry: bool,
    ) -> AuthResult<Value> {
        let url = self.provider.api_url(endpoint);
        let mut allow_retry = allow_retry;
        // Set after a 401-triggered refresh; the retry uses it as-is even if
        // it is already inside the expiry buffer.
        let mut refreshed_token: Option<String> = None;

        loop {
            let access_token = match refreshed_token.take() {
                Some(token) => token,
                None => self.get_access_token().await?,
            };

            let mut request = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&access_token)
                .header(ACCEPT, "application/json");
            if let Some(query) = query {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED {
                // The provider no longer accepts this token
                self.clear_cache();

                if allow_retry {
                    if let Some(refresh_token) = self.store.get().and_then(|c| c.refresh_token) {
                        info!(endpoint = %endpoint, "Received 401, attempting token refresh");
                        let credentials = self.refresh(Some(refresh_token.as_str())).await?;
                        refreshed_token = Some(credentials.access_token);
                        allow_retry = false;
                        continue;
                    }
                }
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                warn!(endpoint = %endpoint, retry_after, "Rate limited by provider");
                return Err(AuthError::RateLimited { retry_after });
            }

            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<failed to read body>".to_string());
                warn!(endpoint = %endpoint, status = %status, "API request failed");
                return Err(AuthError::Api { status, body });
            }

            let text = response.text().await?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text).map_err(|e| {
                AuthError::InvalidResponse(format!("Failed to parse API response: {}", e))
            });
        }
    }

    /// Liveness check. Never propagates the underlying error.
    pub async fn test_connection(&self) -> bool {
        match self.call(CONNECTION_TEST_ENDPOINT, Method::GET, None, None).await {
            Ok(_) => {
                info!("OAuth connection test successful");
                true
            }
            Err(e) => {
                error!(error = %e, "OAuth connection test failed");
                false
            }
        }
    }

    pub async fn status(&self) -> AuthStatus {
        let stored = self.store.get();
        let has_refresh_token = stored
            .as_ref()
            .is_some_and(|credentials| credentials.refresh_token.is_some());
        let expired = stored
            .as_ref()
            .map_or(true, |credentials| credentials.is_expired());

        if stored.is_some() && !expired {
            AuthStatus {
                authenticated: true,
                expired: false,
                has_refresh_token,
                connection_valid: self.test_connection().await,
            }
        } else {
            AuthStatus {
                authenticated: false,
                expired,
                has_refresh_token,
                connection_valid: false,
            }
        }
    }

    /// Forget the stored credential set and the cached token.
    pub fn logout(&self) -> bool {
        let deleted = self.store.delete();
        self.clear_cache();
        info!(deleted, "Logged out");
        deleted
    }

    /// Save a token response and promote it into the cache.
    ///
    /// The returned set is what the store holds afterwards, so it carries a
    /// refresh token kept from an earlier save. A failed save is logged but
    /// does not fail the grant: the caller still gets a working token for
    /// this process.
    ///
    /// Fails with `InvalidResponse` if `expires_in` puts the expiry out of
    /// range.
    fn persist(
        &self,
        token: TokenResponse,
        previous_refresh_token: Option<String>,
    ) -> AuthResult<CredentialSet> {
        let expires_in = token.expires_in_or_default();
        let expires_at = expiry_from_now(Utc::now(), expires_in).ok_or_else(|| {
            AuthError::InvalidResponse(format!("expires_in out of range: {}", expires_in))
        })?;
        let refresh_token = token.refresh_token.or(previous_refresh_token);

        let saved = self.store.save(
            &token.access_token,
            refresh_token.as_deref(),
            expires_in,
            token.scope.as_deref(),
        );

        let credentials = match saved.then(|| self.store.get()).flatten() {
            Some(stored) => stored,
            None => {
                warn!("Tokens were not persisted, only the in-process cache holds them");
                CredentialSet {
                    access_token: token.access_token,
                    refresh_token,
                    expires_at,
                    scope: token.scope,
                    token_type: DEFAULT_TOKEN_TYPE.to_string(),
                }
            }
        };

        self.set_cache(&credentials.access_token, credentials.expires_at);
        Ok(credentials)
    }

    fn cached_token(&self, now: DateTime<Utc>) -> Option<String> {
        lock(&self.cache)
            .as_ref()
            .filter(|cached| !is_stale(cached.expires_at, now))
            .map(|cached| cached.access_token.clone())
    }

    fn set_cache(&self, access_token: &str, expires_at: DateTime<Utc>) {
        *lock(&self.cache) = Some(CachedToken {
            access_token: access_token.to_string(),
            expires_at,
        });
    }

    fn clear_cache(&self) {
        *lock(&self.cache) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

    fn make_client() -> OAuthClient {
        let store = CredentialStore::new(None, Some(&BASE64.encode([0u8; 32]))).unwrap();
        // Unroutable endpoints: these tests must never reach the network
        let provider = ProviderConfig::new("id", "secret", "http://localhost:5000/auth/callback")
            .with_base_urls("http://127.0.0.1:9", "http://127.0.0.1:9");
        OAuthClient::new(provider, Arc::new(store)).unwrap()
    }

    #[test]
    fn test_empty_credentials_rejected() {
        let store = Arc::new(CredentialStore::new(None, None).unwrap());

        let result = OAuthClient::new(ProviderConfig::new("", "secret", "cb"), Arc::clone(&store));
        assert!(matches!(result, Err(AuthError::Configuration(_))));

        let result = OAuthClient::new(ProviderConfig::new("id", "  ", "cb"), store);
        assert!(matches!(result, Err(AuthError::Configuration(_))));
    }

    #[test]
    fn test_cache_respects_expiry_buffer() {
        let client = make_client();
        let now = Utc::now();

        client.set_cache("cached", now + Duration::seconds(61));
        assert_eq!(client.cached_token(now).as_deref(), Some("cached"));

        client.set_cache("cached", now + Duration::seconds(60));
        assert_eq!(client.cached_token(now), None);
    }

    #[tokio::test]
    async fn test_cached_token_short_circuits_store() {
        let client = make_client();
        client.set_cache("from-cache", Utc::now() + Duration::hours(1));
        assert!(client.store.save("from-store", None, 3600, None));

        assert_eq!(client.get_access_token().await.unwrap(), "from-cache");
    }

    #[tokio::test]
    async fn test_fresh_stored_token_is_promoted_to_cache() {
        let client = make_client();
        assert!(client.store.save("from-store", None, 3600, None));

        assert_eq!(client.get_access_token().await.unwrap(), "from-store");
        assert_eq!(client.cached_token(Utc::now()).as_deref(), Some("from-store"));
    }

    #[tokio::test]
    async fn test_stale_cache_falls_back_to_store() {
        let client = make_client();
        client.set_cache("stale", Utc::now() - Duration::seconds(1));
        assert!(client.store.save("fresh", None, 3600, None));

        assert_eq!(client.get_access_token().await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn test_no_credentials_is_not_authenticated() {
        let client = make_client();
        let err = client.get_access_token().await.unwrap_err();
        assert!(matches!(err, AuthError::NotAuthenticated));
        assert!(err.requires_reauthorization());
    }

    #[tokio::test]
    async fn test_logout_clears_cache_and_store() {
        let client = make_client();
        assert!(client.store.save("A", Some("R"), 3600, None));
        client.get_access_token().await.unwrap();

        assert!(client.logout());
        assert!(client.store.get().is_none());
        assert_eq!(client.cached_token(Utc::now()), None);
        assert!(matches!(
            client.get_access_token().await,
            Err(AuthError::NotAuthenticated)
        ));
    }
}
