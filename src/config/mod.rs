use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Deployment environment. Selects the default OAuth callback host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
    #[default]
    Development,
}

impl Environment {
    /// Parses an environment tag. Anything unrecognised is development.
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "production" => Environment::Production,
            "staging" => Environment::Staging,
            _ => Environment::Development,
        }
    }

    pub fn default_redirect_uri(self) -> &'static str {
        match self {
            Environment::Production => "https://goldenknightlounge.com/auth/callback",
            Environment::Staging => "https://staging.goldenknightlounge.com/auth/callback",
            Environment::Development => "http://localhost:5000/auth/callback",
        }
    }
}

/// Complete configuration for the OAuth client and token store
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub yahoo: YahooConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Yahoo application credentials and endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct YahooConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Overrides the environment's default callback
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default = "default_auth_base_url")]
    pub auth_base_url: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Bound on every outbound provider request (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_auth_base_url() -> String {
    "https://api.login.yahoo.com/oauth2".to_string()
}

fn default_api_base_url() -> String {
    "https://fantasysports.yahooapis.com/fantasy/v2".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for YahooConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: None,
            auth_base_url: default_auth_base_url(),
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Token store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path. Unset means in-memory storage.
    #[serde(default)]
    pub db_path: Option<String>,
    /// Base64-encoded 32-byte key. Unset means a key is generated per process.
    #[serde(default)]
    pub encryption_key: Option<String>,
    #[serde(default = "default_service")]
    pub service: String,
}

fn default_service() -> String {
    crate::credentials::DEFAULT_SERVICE.to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            encryption_key: None,
            service: default_service(),
        }
    }
}

impl AuthConfig {
    /// Build from env vars, falling back to defaults.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Overlays any set environment variables on top of this config.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Overlays values from `lookup`. Empty values count as unset.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("APP_ENV") {
            self.environment = Environment::parse(&v);
        }
        if let Some(v) = get("YAHOO_CLIENT_ID") {
            self.yahoo.client_id = Some(v);
        }
        if let Some(v) = get("YAHOO_CLIENT_SECRET") {
            self.yahoo.client_secret = Some(v);
        }
        if let Some(v) = get("YAHOO_REDIRECT_URI") {
            self.yahoo.redirect_uri = Some(v);
        }
        if let Some(v) = get("YAHOO_REQUEST_TIMEOUT_SECS") {
            if let Ok(n) = v.parse::<u64>() {
                self.yahoo.request_timeout_secs = n;
            }
        }
        if let Some(v) = get("TOKEN_DB_PATH") {
            self.store.db_path = Some(v);
        }
        if let Some(v) = get("TOKEN_ENCRYPTION_KEY") {
            self.store.encryption_key = Some(v);
        }

        self
    }

    /// Explicit `redirect_uri` if configured, else the environment default.
    pub fn redirect_uri(&self) -> String {
        self.yahoo
            .redirect_uri
            .clone()
            .unwrap_or_else(|| self.environment.default_redirect_uri().to_string())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<AuthConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: AuthConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AuthConfig::default();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.yahoo.auth_base_url, "https://api.login.yahoo.com/oauth2");
        assert_eq!(config.yahoo.request_timeout_secs, 30);
        assert_eq!(config.store.service, "yahoo");
        assert!(config.store.db_path.is_none());
        assert_eq!(config.redirect_uri(), "http://localhost:5000/auth/callback");
    }

    #[test]
    fn test_redirect_uri_per_environment() {
        assert!(Environment::parse("production")
            .default_redirect_uri()
            .starts_with("https://goldenknightlounge.com"));
        assert!(Environment::parse("staging")
            .default_redirect_uri()
            .contains("staging.goldenknightlounge.com"));
        assert!(Environment::parse("development")
            .default_redirect_uri()
            .contains("localhost"));
        assert_eq!(Environment::parse("something-else"), Environment::Development);
    }

    #[test]
    fn test_only_full_environment_names_recognised() {
        assert_eq!(Environment::parse(" Production "), Environment::Production);
        assert_eq!(Environment::parse("STAGING"), Environment::Staging);
        assert_eq!(Environment::parse("prod"), Environment::Development);
        assert_eq!(Environment::parse("stage"), Environment::Development);
        assert_eq!(Environment::parse(""), Environment::Development);
    }

    #[test]
    fn test_explicit_redirect_uri_wins() {
        let config = AuthConfig::default().with_overrides(lookup_from(&[
            ("APP_ENV", "production"),
            ("YAHOO_REDIRECT_URI", "https://example.ngrok.io/auth/callback"),
        ]));
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.redirect_uri(), "https://example.ngrok.io/auth/callback");
    }

    #[test]
    fn test_env_overrides() {
        let config = AuthConfig::default().with_overrides(lookup_from(&[
            ("YAHOO_CLIENT_ID", "env_client_id"),
            ("YAHOO_CLIENT_SECRET", "env_client_secret"),
            ("TOKEN_DB_PATH", "/tmp/tokens.db"),
            ("TOKEN_ENCRYPTION_KEY", ""),
            ("YAHOO_REQUEST_TIMEOUT_SECS", "not-a-number"),
        ]));
        assert_eq!(config.yahoo.client_id.as_deref(), Some("env_client_id"));
        assert_eq!(config.yahoo.client_secret.as_deref(), Some("env_client_secret"));
        assert_eq!(config.store.db_path.as_deref(), Some("/tmp/tokens.db"));
        // Empty values are ignored
        assert!(config.store.encryption_key.is_none());
        // Unparseable numbers keep the default
        assert_eq!(config.yahoo.request_timeout_secs, 30);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            environment = "staging"

            [yahoo]
            client_id = "toml_id"
            client_secret = "toml_secret"
            request_timeout_secs = 10

            [store]
            db_path = "tokens.db"
            service = "yahoo-test"
        "#;

        let config: AuthConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(config.yahoo.client_id.as_deref(), Some("toml_id"));
        assert_eq!(config.yahoo.request_timeout_secs, 10);
        assert_eq!(config.yahoo.api_base_url, "https://fantasysports.yahooapis.com/fantasy/v2");
        assert_eq!(config.store.db_path.as_deref(), Some("tokens.db"));
        assert_eq!(config.store.service, "yahoo-test");
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [yahoo]
            client_id = "only_id"
        "#;

        let config: AuthConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.yahoo.client_id.as_deref(), Some("only_id"));
        assert_eq!(config.environment, Environment::Development); // Default
        assert_eq!(config.store.service, "yahoo"); // Default
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config("/nonexistent/yahoo-oauth.toml").is_err());
    }
}
