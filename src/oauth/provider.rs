//! Yahoo OAuth 2.0 endpoint configuration.

use crate::config::AuthConfig;
use std::time::Duration;

/// Locale sent with every authorization request
pub const LANGUAGE: &str = "en-us";

/// Resolved provider settings the client is constructed with.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub client_id: String,

    pub client_secret: String,

    /// Callback registered with the Yahoo application
    pub redirect_uri: String,

    /// Base of `request_auth` and `get_token`
    pub auth_base_url: String,

    /// Base of the Fantasy Sports resource API
    pub api_base_url: String,

    pub request_timeout: Duration,
}

impl ProviderConfig {
    /// Provider settings with Yahoo's public endpoints.
    pub fn new(client_id: &str, client_secret: &str, redirect_uri: &str) -> Self {
        Self::from_config(&AuthConfig::default()).with_credentials(
            client_id,
            client_secret,
            redirect_uri,
        )
    }

    /// Missing credentials become empty strings; the client rejects them.
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            client_id: config.yahoo.client_id.clone().unwrap_or_default(),
            client_secret: config.yahoo.client_secret.clone().unwrap_or_default(),
            redirect_uri: config.redirect_uri(),
            auth_base_url: config.yahoo.auth_base_url.clone(),
            api_base_url: config.yahoo.api_base_url.clone(),
            request_timeout: Duration::from_secs(config.yahoo.request_timeout_secs),
        }
    }

    fn with_credentials(mut self, client_id: &str, client_secret: &str, redirect_uri: &str) -> Self {
        self.client_id = client_id.to_string();
        self.client_secret = client_secret.to_string();
        self.redirect_uri = redirect_uri.to_string();
        self
    }

    /// Points both endpoints at another host (a mock server in tests).
    pub fn with_base_urls(mut self, auth_base_url: &str, api_base_url: &str) -> Self {
        self.auth_base_url = auth_base_url.trim_end_matches('/').to_string();
        self.api_base_url = api_base_url.trim_end_matches('/').to_string();
        self
    }

    /// Build the consent URL. `state` is echoed back unchanged when given.
    pub fn build_authorization_url(&self, state: Option<&str>) -> String {
        let mut url = format!(
            "{}/request_auth?client_id={}&redirect_uri={}&response_type=code&language={}",
            self.auth_base_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            LANGUAGE,
        );
        if let Some(state) = state {
            url.push_str("&state=");
            url.push_str(&urlencoding::encode(state));
        }
        url
    }

    pub fn token_url(&self) -> String {
        format!("{}/get_token", self.auth_base_url)
    }

    /// Resource URL for an endpoint path, with or without a leading slash.
    pub fn api_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.api_base_url, endpoint.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_provider() -> ProviderConfig {
        ProviderConfig::new(
            "test_client_id",
            "test_client_secret",
            "http://localhost:5000/auth/callback",
        )
    }

    fn query_pairs(url: &str) -> Vec<(String, String)> {
        let (_, query) = url.split_once('?').expect("URL has no query");
        serde_urlencoded::from_str(query).unwrap()
    }

    #[test]
    fn test_build_authorization_url() {
        let url = test_provider().build_authorization_url(Some("test_state"));

        assert!(url.starts_with("https://api.login.yahoo.com/oauth2/request_auth?"));
        assert_eq!(
            query_pairs(&url),
            vec![
                ("client_id".to_string(), "test_client_id".to_string()),
                (
                    "redirect_uri".to_string(),
                    "http://localhost:5000/auth/callback".to_string()
                ),
                ("response_type".to_string(), "code".to_string()),
                ("language".to_string(), "en-us".to_string()),
                ("state".to_string(), "test_state".to_string()),
            ]
        );
    }

    #[test]
    fn test_authorization_url_without_state() {
        let url = test_provider().build_authorization_url(None);
        assert!(!url.contains("state="));
        assert!(url.contains("response_type=code"));
    }

    #[test]
    fn test_state_round_trips_unchanged() {
        let state = "a b&c=d/é+~";
        let url = test_provider().build_authorization_url(Some(state));

        let echoed = query_pairs(&url)
            .into_iter()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v);
        assert_eq!(echoed.as_deref(), Some(state));
    }

    #[test]
    fn test_authorization_url_is_deterministic() {
        let provider = test_provider();
        assert_eq!(
            provider.build_authorization_url(Some("s")),
            provider.build_authorization_url(Some("s"))
        );
    }

    #[test]
    fn test_endpoint_urls() {
        let provider = test_provider().with_base_urls("http://127.0.0.1:1234/", "http://127.0.0.1:1234");
        assert_eq!(provider.token_url(), "http://127.0.0.1:1234/get_token");
        assert_eq!(
            provider.api_url("/users;use_login=1/games"),
            "http://127.0.0.1:1234/users;use_login=1/games"
        );
        assert_eq!(provider.api_url("league/1"), "http://127.0.0.1:1234/league/1");
    }
}
