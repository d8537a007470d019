//! Client configuration.

use log::warn;
use std::env;
use std::path::PathBuf;

/// Environment variable overriding [`ClientConfig::server_url`].
pub const ENV_SERVER_URL: &str = "COGNOGRAPH_SERVER_URL";
/// Environment variable overriding [`ClientConfig::token_dir`].
pub const ENV_TOKEN_DIR: &str = "COGNOGRAPH_TOKEN_DIR";
/// Environment variable overriding [`ClientConfig::refresh_margin_ms`].
pub const ENV_REFRESH_MARGIN_MS: &str = "COGNOGRAPH_REFRESH_MARGIN_MS";
/// Set to `1` or `true` to honour `server=` in invite links.
pub const ENV_ALLOW_LINK_SERVER: &str = "COGNOGRAPH_ALLOW_LINK_SERVER";

/// Authorization client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL of the access-control server
    pub server_url: String,
    /// Directory for encrypted token files (None = in-memory only)
    pub token_dir: Option<PathBuf>,
    /// Refresh a token this long before it expires (default: 5 min)
    pub refresh_margin_ms: u64,
    /// Keychain service name for the token encryption key
    pub keyring_service: String,
    /// Let invite links pick the server (default: false)
    pub allow_link_server: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3001".to_string(),
            token_dir: None,
            refresh_margin_ms: 5 * 60 * 1000,
            keyring_service: "cognograph.tokens".to_string(),
            allow_link_server: false,
        }
    }
}

impl ClientConfig {
    /// Config for testing (local server, short refresh margin).
    pub fn for_testing() -> Self {
        Self {
            server_url: "http://127.0.0.1:3001".to_string(),
            token_dir: None,
            refresh_margin_ms: 1_000,
            keyring_service: "cognograph.tokens.test".to_string(),
            allow_link_server: false,
        }
    }

    /// Defaults overridden by `COGNOGRAPH_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = env::var(ENV_SERVER_URL) {
            config.server_url = url;
        }
        if let Ok(dir) = env::var(ENV_TOKEN_DIR) {
            config.token_dir = Some(PathBuf::from(dir));
        }
        if let Ok(raw) = env::var(ENV_REFRESH_MARGIN_MS) {
            match raw.parse() {
                Ok(margin) => config.refresh_margin_ms = margin,
                Err(_) => warn!("ignoring invalid {ENV_REFRESH_MARGIN_MS}={raw}"),
            }
        }
        if let Ok(raw) = env::var(ENV_ALLOW_LINK_SERVER) {
            config.allow_link_server = matches!(raw.trim(), "1" | "true");
        }
        config
    }

    /// Same server, as a [`LinkConfig`] for the invite parser.
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            server_url: self.server_url.clone(),
            allow_server_override: self.allow_link_server,
            ..LinkConfig::default()
        }
    }
}

/// Invite link parser configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// URI scheme, matched exactly
    pub scheme: String,
    /// REST base URL used when the link carries no `server` parameter
    pub server_url: String,
    /// Honour a `server` query parameter in the link (default: false)
    pub allow_server_override: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            scheme: "cognograph".to_string(),
            server_url: "http://localhost:3001".to_string(),
            allow_server_override: false,
        }
    }
}

impl LinkConfig {
    pub fn for_testing() -> Self {
        Self {
            server_url: "http://127.0.0.1:3001".to_string(),
            ..Self::default()
        }
    }
}
