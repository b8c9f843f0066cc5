//! Loading captcha configuration (limits, message templates, challenge catalog) from TOML,
//! plus the service settings that come from environment variables.
//!
//! See `CaptchaConfig` for the expected schema:
//!
//! ```toml
//! [bot]
//! max_attempts = 3
//! captcha_timeout_ms = 180000
//! sensitive_case = false
//!
//! [messages]
//! welcome = "Hi $firstname! Type the text in the image. $attemptCount attempts."
//!
//! [[challenges]]
//! image = "captcha-01.png"
//! answer = "x7kq2"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, error};

use crate::domain::{Challenge, ExhaustionPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read {path}: {source}")]
  Read { path: String, source: std::io::Error },

  #[error("failed to parse {path}: {source}")]
  Parse { path: String, source: toml::de::Error },

  #[error("invalid setting: {0}")]
  Invalid(String),

  #[error("missing environment variable {0}")]
  MissingEnv(&'static str),
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct CaptchaConfig {
  #[serde(default)]
  pub bot: BotSettings,
  #[serde(default)]
  pub messages: Messages,
  #[serde(default)]
  pub challenges: Vec<Challenge>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BotSettings {
  pub max_attempts: u32,
  pub captcha_timeout_ms: u64,
  pub sensitive_case: bool,
  pub exhaustion_policy: ExhaustionPolicy,
}

impl Default for BotSettings {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      captcha_timeout_ms: 180_000,
      sensitive_case: false,
      exhaustion_policy: ExhaustionPolicy::BelowMax,
    }
  }
}

impl BotSettings {
  pub fn captcha_timeout(&self) -> Duration {
    Duration::from_millis(self.captcha_timeout_ms)
  }
}

/// Message templates. Each accepts `$firstname`, `$lastname`, `$username` and `$attemptCount`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Messages {
  pub welcome: String,
  pub timeout: String,
  pub attempt_fail: String,
  pub attempts_over: String,
  pub captcha_success: String,
}

impl Default for Messages {
  fn default() -> Self {
    Self {
      welcome: "Welcome $firstname $username! Type the characters shown in the image to stay in the group. You have $attemptCount attempts.".into(),
      timeout: "$firstname $username did not solve the captcha in time and was removed.".into(),
      attempt_fail: "Wrong answer, $firstname. $attemptCount attempts left.".into(),
      attempts_over: "$firstname $username ran out of attempts and was removed.".into(),
      captcha_success: "Thanks $firstname, you're in!".into(),
    }
  }
}

impl CaptchaConfig {
  pub fn from_toml_str(s: &str, path: &str) -> Result<Self, ConfigError> {
    let cfg: CaptchaConfig = toml::from_str(s).map_err(|source| ConfigError::Parse { path: path.to_string(), source })?;
    cfg.validate()?;
    Ok(cfg)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if self.bot.max_attempts == 0 {
      return Err(ConfigError::Invalid("bot.max_attempts must be at least 1".into()));
    }
    if let Some(c) = self.challenges.iter().find(|c| c.answer.is_empty() || c.image.is_empty()) {
      return Err(ConfigError::Invalid(format!("challenge entry with empty image or answer: {:?}", c)));
    }
    Ok(())
  }
}

/// Load `CaptchaConfig` from CAPTCHA_CONFIG_PATH. Unset means defaults; a broken file is an error.
pub fn load_captcha_config_from_env() -> Result<CaptchaConfig, ConfigError> {
  let Ok(path) = std::env::var("CAPTCHA_CONFIG_PATH") else {
    info!(target: "captcha_gate", "CAPTCHA_CONFIG_PATH not set; using default settings");
    return Ok(CaptchaConfig::default());
  };
  let s = std::fs::read_to_string(&path).map_err(|source| {
    error!(target: "captcha_gate", %path, error = %source, "Failed to read TOML config file");
    ConfigError::Read { path: path.clone(), source }
  })?;
  let cfg = CaptchaConfig::from_toml_str(&s, &path).map_err(|e| {
    error!(target: "captcha_gate", %path, error = %e, "Failed to load TOML config");
    e
  })?;
  info!(target: "captcha_gate", %path, challenges = cfg.challenges.len(), "Loaded captcha config (TOML)");
  Ok(cfg)
}

/// How updates reach the bot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateMode {
  Webhook,
  Polling,
}

/// Service settings read from the environment.
#[derive(Clone, Debug)]
pub struct ServiceEnv {
  pub token: String,
  pub bot_username: Option<String>,
  pub api_url: String,
  pub mode: UpdateMode,
  pub port: u16,
  pub webhook_secret: Option<String>,
  pub image_dir: PathBuf,
}

impl ServiceEnv {
  pub fn from_env() -> Result<Self, ConfigError> {
    let token = std::env::var("BOT_TOKEN").map_err(|_| ConfigError::MissingEnv("BOT_TOKEN"))?;
    let mode = match std::env::var("BOT_MODE").as_deref() {
      Ok("polling") => UpdateMode::Polling,
      Ok("webhook") | Err(_) => UpdateMode::Webhook,
      Ok(other) => return Err(ConfigError::Invalid(format!("BOT_MODE must be 'webhook' or 'polling', got '{}'", other))),
    };
    Ok(Self {
      token,
      bot_username: std::env::var("BOT_USERNAME").ok().filter(|s| !s.is_empty()),
      api_url: std::env::var("TELEGRAM_API_URL").unwrap_or_else(|_| "https://api.telegram.org".into()),
      mode,
      port: std::env::var("PORT").ok().and_then(|p| p.parse::<u16>().ok()).unwrap_or(3000),
      webhook_secret: std::env::var("WEBHOOK_SECRET").ok().filter(|s| !s.is_empty()),
      image_dir: std::env::var("CAPTCHA_IMAGE_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./captcha/images")),
    })
  }
}
