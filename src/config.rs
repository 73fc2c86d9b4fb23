//! Configuration for Switchboard
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::MIN_PASSWORD_LEN;
use crate::session::SessionConfig;
use crate::supervisor::SupervisorConfig;

/// Bridge endpoint used in development mode when none is configured
pub const DEV_BRIDGE_URL: &str = "ws://127.0.0.1:3100";

/// Switchboard - multi-tenant messaging gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "switchboard")]
#[command(about = "Multi-tenant REST gateway for per-tenant messaging sessions")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory stores when MongoDB is unreachable,
    /// admin API open when no admin credentials are configured)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "switchboard")]
    pub mongodb_db: String,

    /// WebSocket URL of the protocol bridge sidecar (required in production)
    #[arg(long, env = "BRIDGE_URL")]
    pub bridge_url: Option<String>,

    /// Directory holding per-tenant resume material
    #[arg(long, env = "AUTH_DIR", default_value = "./auth_info")]
    pub auth_dir: PathBuf,

    /// Passphrase for sealing resume material at rest (plaintext when unset)
    #[arg(long, env = "CREDENTIALS_KEY", hide_env_values = true)]
    pub credentials_key: Option<String>,

    /// Static bootstrap token for the admin API
    #[arg(long, env = "ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,

    /// Admin account created at startup if it does not exist yet
    #[arg(long, env = "ADMIN_USERNAME")]
    pub admin_username: Option<String>,

    /// Password for the seeded admin account
    #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Bridge request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Bound on one connect handshake, in seconds
    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value = "30")]
    pub connect_timeout_secs: u64,

    /// Pause before reconnecting after a retryable close, in seconds
    #[arg(long, env = "RECONNECT_DELAY_SECS", default_value = "3")]
    pub reconnect_delay_secs: u64,

    /// Interval between keepalive sweeps, in seconds
    #[arg(long, env = "KEEPALIVE_INTERVAL_SECS", default_value = "86400")]
    pub keepalive_interval_secs: u64,

    /// Bound on one tenant's work during startup and sweeps, in seconds
    #[arg(long, env = "TENANT_TIMEOUT_SECS", default_value = "30")]
    pub tenant_timeout_secs: u64,

    /// Delay before bringing up sessions at boot, in milliseconds
    #[arg(long, env = "STARTUP_DELAY_MS", default_value = "2000")]
    pub startup_delay_ms: u64,

    /// Tenants initialized concurrently during startup and sweeps
    #[arg(long, env = "TENANT_CONCURRENCY", default_value = "16")]
    pub tenant_concurrency: usize,

    /// Document download timeout, in seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value = "60")]
    pub fetch_timeout_secs: u64,

    /// Largest document accepted for a file send, in bytes
    #[arg(long, env = "MAX_DOCUMENT_BYTES", default_value = "16777216")]
    pub max_document_bytes: usize,

    /// Check that the recipient exists before sending a file
    #[arg(long, env = "VERIFY_BEFORE_FILE_SEND", default_value = "true", action = clap::ArgAction::Set)]
    pub verify_before_file_send: bool,

    /// Pause between recipients of a bulk send, in milliseconds
    #[arg(long, env = "BULK_DELAY_MS", default_value = "2000")]
    pub bulk_delay_ms: u64,
}

impl Args {
    /// Effective bridge URL (falls back to a local sidecar in dev mode)
    pub fn bridge_url(&self) -> Option<&str> {
        match self.bridge_url.as_deref() {
            Some(url) => Some(url),
            None if self.dev_mode => Some(DEV_BRIDGE_URL),
            None => None,
        }
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn bulk_delay(&self) -> Duration {
        Duration::from_millis(self.bulk_delay_ms)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            reconnect_backoff: Duration::from_secs(self.reconnect_delay_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            verify_before_file_send: self.verify_before_file_send,
            ..SessionConfig::default()
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            sweep_interval: Duration::from_secs(self.keepalive_interval_secs),
            per_tenant_timeout: Duration::from_secs(self.tenant_timeout_secs),
            startup_delay: Duration::from_millis(self.startup_delay_ms),
            concurrency: self.tenant_concurrency,
        }
    }

    /// Admin account to seed, when both halves are set
    pub fn admin_seed(&self) -> Option<(&str, &str)> {
        let username = self.admin_username.as_deref().map(str::trim)?;
        let password = self.admin_password.as_deref()?;
        (!username.is_empty() && !password.is_empty()).then_some((username, password))
    }

    fn has_admin_token(&self) -> bool {
        self.admin_token.as_deref().map_or(false, |t| !t.is_empty())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        let username_set = self.admin_username.as_deref().map_or(false, |u| !u.trim().is_empty());
        let password_set = self.admin_password.as_deref().map_or(false, |p| !p.is_empty());
        if username_set != password_set {
            return Err("ADMIN_USERNAME and ADMIN_PASSWORD must be set together".to_string());
        }
        if let Some((_, password)) = self.admin_seed() {
            if password.chars().count() < MIN_PASSWORD_LEN {
                return Err(format!(
                    "ADMIN_PASSWORD must be at least {} characters",
                    MIN_PASSWORD_LEN
                ));
            }
        }

        if !self.dev_mode {
            if !self.has_admin_token() && self.admin_seed().is_none() {
                return Err(
                    "ADMIN_TOKEN or ADMIN_USERNAME/ADMIN_PASSWORD is required in production mode"
                        .to_string(),
                );
            }
            if self.bridge_url.is_none() {
                return Err("BRIDGE_URL is required in production mode".to_string());
            }
        }

        if let Some(url) = self.bridge_url() {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err("BRIDGE_URL must be a ws:// or wss:// URL".to_string());
            }
        }

        let timeouts = [
            ("REQUEST_TIMEOUT_MS", self.request_timeout_ms),
            ("CONNECT_TIMEOUT_SECS", self.connect_timeout_secs),
            ("KEEPALIVE_INTERVAL_SECS", self.keepalive_interval_secs),
            ("TENANT_TIMEOUT_SECS", self.tenant_timeout_secs),
            ("FETCH_TIMEOUT_SECS", self.fetch_timeout_secs),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(format!("{} must be greater than zero", name));
            }
        }

        if self.tenant_concurrency == 0 {
            return Err("TENANT_CONCURRENCY must be at least 1".to_string());
        }

        if self.max_document_bytes == 0 {
            return Err("MAX_DOCUMENT_BYTES must be greater than zero".to_string());
        }

        if matches!(self.credentials_key.as_deref(), Some(key) if key.len() < 12) {
            return Err("CREDENTIALS_KEY must be at least 12 characters".to_string());
        }

        Ok(())
    }
}
