// Configuration (TOML file and environment)
pub mod config;

// Encrypted single-slot token storage
pub mod credentials;

// Error taxonomy shared by the store and the client
pub mod error;

// Yahoo OAuth client
pub mod oauth;

pub use config::{AuthConfig, Environment};
pub use credentials::{CredentialSet, CredentialStore, StoreMode};
pub use error::{AuthError, AuthResult};
pub use oauth::{AuthStatus, OAuthClient, ProviderConfig};
