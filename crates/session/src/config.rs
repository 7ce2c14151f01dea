// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

/// Configuration for the session manager.
#[derive(Debug, Clone, clap::Args)]
pub struct SessionConfig {
    /// Base URL of the authentication backend.
    #[arg(long, default_value = "http://127.0.0.1:9800", env = "BERTH_AUTH_URL")]
    pub auth_url: String,

    /// Seconds before token expiry at which a proactive refresh fires.
    #[arg(long, default_value_t = 300, env = "BERTH_REFRESH_MARGIN_SECS")]
    pub refresh_margin_secs: u64,

    /// HTTP request timeout in seconds for auth backend calls.
    #[arg(long, default_value_t = 30, env = "BERTH_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: u64,

    /// Path to the remember-me token file. Defaults to `<state_dir>/refresh_token.json`.
    #[arg(long, env = "BERTH_TOKEN_PATH")]
    pub token_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_url: "http://127.0.0.1:9800".to_owned(),
            refresh_margin_secs: 300,
            request_timeout_secs: 30,
            token_path: None,
        }
    }
}

impl SessionConfig {
    pub fn refresh_margin(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.refresh_margin_secs)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    /// Resolved path of the durable token file.
    pub fn token_path(&self) -> PathBuf {
        self.token_path.clone().unwrap_or_else(|| state_dir().join("refresh_token.json"))
    }
}

/// Resolve the state directory for berth session data.
///
/// Checks `BERTH_STATE_DIR`, then `$XDG_STATE_HOME/berth`,
/// then `$HOME/.local/state/berth`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("BERTH_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("berth");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/berth");
    }
    PathBuf::from(".berth")
}
