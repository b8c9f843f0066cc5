//! captcha-gate · Telegram join captcha
//!
//! New group members get an image captcha; they must type its text within a time
//! limit and a bounded number of attempts, or they are removed.
//!
//! Important env variables:
//!   BOT_TOKEN           : Telegram bot token (required)
//!   BOT_USERNAME        : bot's own username; resolved via getMe if unset
//!   BOT_MODE            : "webhook" (default) or "polling"
//!   PORT                : u16 (default 3000), webhook mode only
//!   WEBHOOK_SECRET      : expected X-Telegram-Bot-Api-Secret-Token, if set
//!   TELEGRAM_API_URL    : default "https://api.telegram.org"
//!   CAPTCHA_CONFIG_PATH : TOML config (limits, messages, challenge catalog)
//!   CAPTCHA_IMAGE_DIR   : directory holding challenge images (default ./captcha/images)
//!   LOG_LEVEL           : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT          : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod config;
mod seeds;
mod catalog;
mod store;
mod gateway;
mod lifecycle;
mod protocol;
mod telegram;
mod state;
mod polling;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::{load_captcha_config_from_env, ServiceEnv, UpdateMode};
use crate::routes::build_router;
use crate::state::AppState;
use crate::telegram::TelegramClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let env = ServiceEnv::from_env()?;
  let cfg = load_captcha_config_from_env()?;
  let client = TelegramClient::from_env(&env)?;

  // Our own username keeps the bot from challenging itself when added to a group.
  let bot_username = match env.bot_username.clone() {
    Some(u) => Some(u),
    None => match client.get_me().await {
      Ok(me) => me.username,
      Err(e) => {
        warn!(target: "captcha_gate", error = %e, "getMe failed; own joins will not be recognized");
        None
      }
    },
  };
  info!(target: "captcha_gate", bot = ?bot_username, mode = ?env.mode, "Starting");

  let state = AppState::new(
    cfg,
    &env.image_dir,
    Arc::new(client.clone()),
    bot_username,
    env.webhook_secret.clone(),
  )?;

  match env.mode {
    UpdateMode::Polling => polling::run_polling(client, state).await,
    UpdateMode::Webhook => {
      let app = build_router(Arc::new(state));
      let addr = SocketAddr::from(([0, 0, 0, 0], env.port));
      let listener = TcpListener::bind(addr).await?;
      info!(target: "captcha_gate", %addr, "Webhook server listening");
      axum::serve(listener, app).await?;
    }
  }
  Ok(())
}
