use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SLACK_API_BASE_URL: &str = "https://slack.com/api";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub slack: SlackConfig,
    pub socket: SocketConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub app_token: SecretString,
    pub bot_token: SecretString,
    pub api_base_url: String,
    /// Log raw socket frames and Web API calls at debug level.
    pub debug: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocketConfig {
    /// `None` keeps reconnecting for as long as the process runs.
    pub max_retries: Option<u32>,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

/// The two Slack credentials the bot needs, each with its own prefix rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    AppLevel,
    Bot,
}

impl TokenKind {
    pub fn field(self) -> &'static str {
        match self {
            Self::AppLevel => "slack.app_token",
            Self::Bot => "slack.bot_token",
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Self::AppLevel => "xapp-",
            Self::Bot => "xoxb-",
        }
    }

    fn env_vars(self) -> [&'static str; 2] {
        match self {
            Self::AppLevel => ["REPLYBOT_SLACK_APP_TOKEN", "SLACK_APP_TOKEN"],
            Self::Bot => ["REPLYBOT_SLACK_BOT_TOKEN", "SLACK_BOT_TOKEN"],
        }
    }

    fn other(self) -> Self {
        match self {
            Self::AppLevel => Self::Bot,
            Self::Bot => Self::AppLevel,
        }
    }

    fn where_to_find(self) -> &'static str {
        match self {
            Self::AppLevel => "Basic Information > App-Level Tokens",
            Self::Bot => "OAuth & Permissions > Bot User OAuth Token",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub slack_app_token: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_api_base_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("{field} is required (set `{env_var}`). Get it from https://api.slack.com/apps > Your App > {location}")]
    MissingToken { field: &'static str, env_var: &'static str, location: &'static str },
    #[error("{field} must start with `{prefix}`{hint}. Get it from https://api.slack.com/apps")]
    MalformedToken { field: &'static str, prefix: &'static str, hint: &'static str },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            slack: SlackConfig {
                app_token: String::new().into(),
                bot_token: String::new().into(),
                api_base_url: DEFAULT_SLACK_API_BASE_URL.to_string(),
                debug: false,
            },
            socket: SocketConfig { max_retries: None, base_delay_ms: 1_000, max_delay_ms: 30_000 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Json },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl SlackConfig {
    pub fn token(&self, kind: TokenKind) -> &SecretString {
        match kind {
            TokenKind::AppLevel => &self.app_token,
            TokenKind::Bot => &self.bot_token,
        }
    }

    fn set_token(&mut self, kind: TokenKind, value: String) {
        match kind {
            TokenKind::AppLevel => self.app_token = value.into(),
            TokenKind::Bot => self.bot_token = value.into(),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = resolve_config_path(options.config_path.as_deref()) {
            config.apply_patch(read_patch(&path)?);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("replybot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(slack) = patch.slack {
            if let Some(value) = slack.app_token {
                self.slack.set_token(TokenKind::AppLevel, value);
            }
            if let Some(value) = slack.bot_token {
                self.slack.set_token(TokenKind::Bot, value);
            }
            if let Some(api_base_url) = slack.api_base_url {
                self.slack.api_base_url = api_base_url;
            }
            if let Some(debug) = slack.debug {
                self.slack.debug = debug;
            }
        }

        if let Some(socket) = patch.socket {
            if socket.max_retries.is_some() {
                self.socket.max_retries = socket.max_retries;
            }
            if let Some(base_delay_ms) = socket.base_delay_ms {
                self.socket.base_delay_ms = base_delay_ms;
            }
            if let Some(max_delay_ms) = socket.max_delay_ms {
                self.socket.max_delay_ms = max_delay_ms;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        for kind in [TokenKind::AppLevel, TokenKind::Bot] {
            if let Some(value) = kind.env_vars().into_iter().find_map(read_env) {
                self.slack.set_token(kind, value);
            }
        }
        if let Some(value) = read_env("REPLYBOT_SLACK_API_BASE_URL") {
            self.slack.api_base_url = value;
        }
        if let Some(value) = read_env("REPLYBOT_SLACK_DEBUG") {
            self.slack.debug = parse_env("REPLYBOT_SLACK_DEBUG", &value)?;
        }

        if let Some(value) = read_env("REPLYBOT_SOCKET_MAX_RETRIES") {
            self.socket.max_retries = Some(parse_env("REPLYBOT_SOCKET_MAX_RETRIES", &value)?);
        }
        if let Some(value) = read_env("REPLYBOT_SOCKET_BASE_DELAY_MS") {
            self.socket.base_delay_ms = parse_env("REPLYBOT_SOCKET_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("REPLYBOT_SOCKET_MAX_DELAY_MS") {
            self.socket.max_delay_ms = parse_env("REPLYBOT_SOCKET_MAX_DELAY_MS", &value)?;
        }

        let log_level =
            read_env("REPLYBOT_LOGGING_LEVEL").or_else(|| read_env("REPLYBOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("REPLYBOT_LOGGING_FORMAT").or_else(|| read_env("REPLYBOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(value) = overrides.slack_app_token {
            self.slack.set_token(TokenKind::AppLevel, value);
        }
        if let Some(value) = overrides.slack_bot_token {
            self.slack.set_token(TokenKind::Bot, value);
        }
        if let Some(api_base_url) = overrides.slack_api_base_url {
            self.slack.api_base_url = api_base_url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_token(&self.slack, TokenKind::AppLevel)?;
        validate_token(&self.slack, TokenKind::Bot)?;
        validate_api_base_url(&self.slack.api_base_url)?;
        validate_socket(&self.socket)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("replybot.toml"), PathBuf::from("config/replybot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let var = &after[..end];
        let value = env::var(var)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: var.to_string() })?;
        output.push_str(&value);
        rest = &after[end + 1..];
    }
    output.push_str(rest);

    Ok(output)
}

fn validate_token(slack: &SlackConfig, kind: TokenKind) -> Result<(), ConfigError> {
    let token = slack.token(kind).expose_secret();
    if token.is_empty() {
        return Err(ConfigError::MissingToken {
            field: kind.field(),
            env_var: kind.env_vars()[0],
            location: kind.where_to_find(),
        });
    }

    if !token.starts_with(kind.prefix()) {
        let hint = if token.starts_with(kind.other().prefix()) {
            match kind {
                TokenKind::AppLevel => {
                    " (hint: you may have used the bot token instead of the app token)"
                }
                TokenKind::Bot => {
                    " (hint: you may have used the app token instead of the bot token)"
                }
            }
        } else {
            ""
        };
        return Err(ConfigError::MalformedToken {
            field: kind.field(),
            prefix: kind.prefix(),
            hint,
        });
    }

    Ok(())
}

fn validate_api_base_url(api_base_url: &str) -> Result<(), ConfigError> {
    if !api_base_url.starts_with("http://") && !api_base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "slack.api_base_url must start with http:// or https://".to_string(),
        ));
    }
    Ok(())
}

fn validate_socket(socket: &SocketConfig) -> Result<(), ConfigError> {
    if socket.max_delay_ms < socket.base_delay_ms {
        return Err(ConfigError::Validation(
            "socket.max_delay_ms must be greater than or equal to socket.base_delay_ms".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    slack: Option<SlackPatch>,
    socket: Option<SocketPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    app_token: Option<String>,
    bot_token: Option<String>,
    api_base_url: Option<String>,
    debug: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct SocketPatch {
    max_retries: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
