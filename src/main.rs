use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::info;
use yahoo_oauth::config::{load_config, AuthConfig};
use yahoo_oauth::credentials::CredentialStore;
use yahoo_oauth::oauth::OAuthClient;

const USAGE: &str = "usage: yahoo-oauth <url [state] | exchange <code> | refresh | token | status | logout>";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yahoo_oauth=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(USAGE);
    };

    // File config first, environment on top
    let config = match std::env::var("YAHOO_OAUTH_CONFIG") {
        Ok(path) => load_config(&path)?.with_env_overrides(),
        Err(_) => AuthConfig::from_env(),
    };

    info!(
        environment = ?config.environment,
        db_path = ?config.store.db_path,
        "Configuration loaded"
    );

    let store = Arc::new(
        CredentialStore::with_service(
            config.store.db_path.as_deref(),
            config.store.encryption_key.as_deref(),
            &config.store.service,
        )
        .context("Failed to initialize credential store")?,
    );
    let client = OAuthClient::from_config(&config, Arc::clone(&store))
        .context("Failed to initialize OAuth client")?;

    match command.as_str() {
        "url" => {
            println!("{}", client.build_authorization_url(args.get(1).map(String::as_str)));
        }
        "exchange" => {
            let code = args.get(1).context("exchange requires an authorization code")?;
            let credentials = client.exchange_code(code).await?;
            println!("authenticated, token expires at {}", credentials.expires_at);
        }
        "refresh" => {
            let credentials = client.refresh(None).await?;
            println!("refreshed, token expires at {}", credentials.expires_at);
        }
        "token" => {
            let token = client.get_access_token().await?;
            println!("{}", token);
        }
        "status" => {
            let status = client.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        "logout" => {
            if !client.logout() {
                bail!("Failed to delete stored tokens");
            }
            println!("logged out");
        }
        _ => bail!(USAGE),
    }

    Ok(())
}
