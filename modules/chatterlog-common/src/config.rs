use std::env;

/// Process configuration loaded from environment variables.
///
/// Runtime-tunable settings (tracked channels, polling cadence, chunk sizes)
/// live in the `config` table instead, so a cooperating process can change
/// them without a restart.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub database_path: String,

    /// Base URL of the upstream site the pollers scrape.
    pub upstream_base_url: String,

    /// Session cookie sent with every upstream request. The chat log and
    /// mailbox pages require an authenticated session.
    pub session_cookie: String,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "./chatlog.db".to_string()),
            upstream_base_url: env::var("UPSTREAM_BASE_URL")
                .unwrap_or_else(|_| "https://farmrpg.com/".to_string()),
            session_cookie: required_env("SESSION_COOKIE"),
        }
    }

    /// Log the non-secret parts of the config at startup.
    pub fn log_redacted(&self) {
        tracing::info!(
            database_path = self.database_path.as_str(),
            upstream_base_url = self.upstream_base_url.as_str(),
            "Config loaded (session cookie redacted)"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
