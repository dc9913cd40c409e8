use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use codeclash_core::net::protocol::MAX_MESSAGE_SIZE;
use codeclash_core::question::{QuestionBank, QuestionBankError};
use codeclash_sandbox::SandboxLimits;

/// Top-level server configuration, loaded from `codeclash.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub web_root: String,
    /// TOML question bank; the built-in bank is used when unset.
    pub questions_path: Option<String>,
    pub game: GameConfig,
    pub sandbox: SandboxLimits,
    pub limits: LimitsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            web_root: "build-client".to_string(),
            questions_path: None,
            game: GameConfig::default(),
            sandbox: SandboxLimits::default(),
            limits: LimitsConfig::default(),
        }
    }
}

/// Session rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Roster size that starts the first round.
    pub max_players: usize,
    pub question_timeout_ms: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            max_players: 1,
            question_timeout_ms: 10_000,
        }
    }
}

impl GameConfig {
    pub fn question_timeout(&self) -> Duration {
        Duration::from_millis(self.question_timeout_ms)
    }
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    pub player_message_buffer: usize,
    /// Capacity of the session actor's command queue.
    pub command_buffer: usize,
    pub max_message_size: usize,
    pub ws_rate_limit_per_sec: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 200,
            player_message_buffer: 64,
            command_buffer: 1024,
            max_message_size: MAX_MESSAGE_SIZE,
            ws_rate_limit_per_sec: 20.0,
        }
    }
}

impl ServerConfig {
    /// Check the configuration, returning the first problem found.
    pub fn check(&self) -> Result<(), String> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(format!(
                "listen_addr {:?} is not a valid socket address",
                self.listen_addr
            ));
        }
        if self.game.max_players == 0 {
            return Err("game.max_players must be > 0".to_string());
        }
        if self.game.question_timeout_ms == 0 {
            return Err("game.question_timeout_ms must be > 0".to_string());
        }
        if self.sandbox.deadline_ms == 0 {
            return Err("sandbox.deadline_ms must be > 0".to_string());
        }
        if self.limits.max_ws_connections == 0 {
            return Err("limits.max_ws_connections must be > 0".to_string());
        }
        if self.limits.player_message_buffer == 0 {
            return Err("limits.player_message_buffer must be > 0".to_string());
        }
        if self.limits.command_buffer == 0 {
            return Err("limits.command_buffer must be > 0".to_string());
        }
        if self.limits.max_message_size == 0 {
            return Err("limits.max_message_size must be > 0".to_string());
        }
        if self.limits.ws_rate_limit_per_sec <= 0.0 {
            return Err("limits.ws_rate_limit_per_sec must be > 0".to_string());
        }
        Ok(())
    }

    /// Validate configuration, exiting the process on a fatal problem.
    pub fn validate(&self) {
        if let Err(problem) = self.check() {
            tracing::error!("{problem}");
            std::process::exit(1);
        }
        if self.sandbox.deadline_ms >= self.game.question_timeout_ms {
            tracing::warn!(
                deadline_ms = self.sandbox.deadline_ms,
                question_timeout_ms = self.game.question_timeout_ms,
                "Sandbox deadline is not shorter than the question timeout"
            );
        }
    }

    /// Load config from `codeclash.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("codeclash.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from codeclash.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse codeclash.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No codeclash.toml found, using defaults");
                ServerConfig::default()
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides from an environment lookup. Empty or unparsable
    /// values are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| var(key).filter(|v| !v.is_empty());

        if let Some(addr) = var("CODECLASH_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(port) = var("PORT").and_then(|p| p.parse::<u16>().ok()) {
            self.listen_addr = match self.listen_addr.parse::<SocketAddr>() {
                Ok(mut addr) => {
                    addr.set_port(port);
                    addr.to_string()
                },
                Err(_) => format!("0.0.0.0:{port}"),
            };
        }
        if let Some(root) = var("CODECLASH_WEB_ROOT") {
            self.web_root = root;
        }
        if let Some(path) = var("CODECLASH_QUESTIONS") {
            self.questions_path = Some(path);
        }
        if let Some(n) = var("CODECLASH_MAX_PLAYERS").and_then(|v| v.parse().ok()) {
            self.game.max_players = n;
        }
        if let Some(ms) = var("CODECLASH_QUESTION_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.game.question_timeout_ms = ms;
        }
        if let Some(ms) = var("CODECLASH_SANDBOX_DEADLINE_MS").and_then(|v| v.parse().ok()) {
            self.sandbox.deadline_ms = ms;
        }
    }

    /// The configured question bank, or the built-in one.
    pub fn load_questions(&self) -> Result<QuestionBank, QuestionBankError> {
        match &self.questions_path {
            Some(path) => QuestionBank::load(path),
            None => Ok(QuestionBank::builtin()),
        }
    }
}
