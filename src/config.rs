use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::loader::MAX_FILE_SIZE_MB;

/// Command-line and environment configuration for the web server
///
/// Every flag can also come from a `NOTICE_GRID_*` environment variable
/// (a `.env` file in the working directory is read first).
#[derive(Parser, Debug, Clone)]
#[command(name = "notice-grid", version, about = "Login-gated grid viewer for Excel/CSV notice exports")]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "NOTICE_GRID_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,

    /// Username accepted by the login page
    #[arg(long, env = "NOTICE_GRID_AUTH_USER", default_value = "admin")]
    pub auth_user: String,

    /// Password accepted by the login page
    #[arg(long, env = "NOTICE_GRID_AUTH_PASS", default_value = "admin", hide_env_values = true)]
    pub auth_pass: String,

    /// Dataset loaded once per session after login, before anything is uploaded
    #[arg(long, env = "NOTICE_GRID_DEFAULT_DATASET")]
    pub default_dataset: Option<PathBuf>,

    /// Largest accepted upload, in megabytes
    #[arg(long, env = "NOTICE_GRID_MAX_UPLOAD_MB", default_value_t = MAX_FILE_SIZE_MB)]
    pub max_upload_mb: u64,

    /// Session lifetime in seconds
    #[arg(long, env = "NOTICE_GRID_SESSION_TTL", default_value_t = 24 * 60 * 60)]
    pub session_ttl_secs: u64,

    /// Directory served under /static
    #[arg(long, env = "NOTICE_GRID_STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,
}

impl Config {
    /// Reads `.env` (if present), then the command line and environment
    pub fn load() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                log::warn!("ignoring .env: {}", e);
            }
        }
        Config::parse()
    }
}
