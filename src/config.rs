// Application configuration, loaded from environment variables and CLI flags.

use thiserror::Error;

const DEFAULT_DATABASE_URL: &str = "sqlite:tally.db?mode=rwc";
const DEFAULT_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("BOT_TOKEN is not set")]
    MissingToken,
    #[error("unknown update mode {0:?} (expected \"polling\" or \"webhook\")")]
    InvalidMode(String),
}

/// How updates reach the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Long polling with `getUpdates`.
    Polling,
    /// Telegram posts updates to `/telegram/webhook`.
    Webhook,
}

impl UpdateMode {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "polling" => Some(Self::Polling),
            "webhook" => Some(Self::Webhook),
            _ => None,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Bot API token.
    pub bot_token: String,
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    pub update_mode: UpdateMode,
    /// Expected value of the webhook secret header, if any.
    pub webhook_secret: Option<String>,
    /// Long-poll timeout in seconds.
    pub poll_timeout_secs: u64,
    /// Bot API base URL.
    pub api_url: String,
}

impl Config {
    /// Load configuration from the process environment and arguments.
    ///
    /// Environment variables:
    /// - `BOT_TOKEN` - Bot API token (required)
    /// - `DATABASE_URL` - SQLite connection string (default: `sqlite:tally.db?mode=rwc`)
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `UPDATE_MODE` - `polling` (default) or `webhook`
    /// - `WEBHOOK_SECRET` - Secret token expected on webhook requests
    /// - `POLL_TIMEOUT` - Long-poll timeout in seconds (default: 30)
    /// - `BOT_API_URL` - Bot API base URL (default: `https://api.telegram.org`)
    ///
    /// CLI flags:
    /// - `--webhook` - Receive updates by webhook (same as `UPDATE_MODE=webhook`)
    /// - `--port <PORT>` - Override the port
    pub fn load() -> Result<Self, ConfigError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_sources(&args, |key| std::env::var(key).ok())
    }

    /// Build a configuration from explicit arguments and an env lookup.
    pub fn from_sources(
        args: &[String],
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let bot_token = env("BOT_TOKEN")
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let database_url =
            env("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| env("PORT").and_then(|v| v.parse().ok()))
            .unwrap_or(3000);

        let update_mode = if args.iter().any(|a| a == "--webhook") {
            UpdateMode::Webhook
        } else {
            match env("UPDATE_MODE") {
                Some(mode) => {
                    UpdateMode::from_str_name(&mode).ok_or(ConfigError::InvalidMode(mode))?
                }
                None => UpdateMode::Polling,
            }
        };

        let webhook_secret = env("WEBHOOK_SECRET").filter(|s| !s.is_empty());

        let poll_timeout_secs = env("POLL_TIMEOUT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let api_url = env("BOT_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());

        Ok(Config {
            bot_token,
            database_url,
            port,
            update_mode,
            webhook_secret,
            poll_timeout_secs,
            api_url,
        })
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}
