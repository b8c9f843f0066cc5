//! Minimal Telegram Bot API client: the production `Gateway`, plus `getMe` and
//! `getUpdates` for startup and polling mode.
//!
//! NOTE: the request URL embeds the bot token, so URLs are never logged.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::multipart::{Form, Part};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, instrument};

use crate::config::ServiceEnv;
use crate::domain::{ChatId, MessageId, ParticipantId};
use crate::gateway::{Gateway, GatewayError, GatewayResult};
use crate::protocol::{
  ApiResponse, BanChatMemberReq, DeleteMessageReq, GetUpdatesReq, Message, SendMessageReq, Update, User,
};

const UA: &str = "captcha-gate/0.1";

#[derive(Clone)]
pub struct TelegramClient {
  client: reqwest::Client,
  bot_url: String,
  image_dir: PathBuf,
}

impl TelegramClient {
  pub fn from_env(env: &ServiceEnv) -> GatewayResult<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(20))
      .build()
      .map_err(|e| GatewayError::Transport(e.to_string()))?;
    Ok(Self {
      client,
      bot_url: format!("{}/bot{}", env.api_url.trim_end_matches('/'), env.token),
      image_dir: env.image_dir.clone(),
    })
  }

  fn url(&self, method: &str) -> String {
    format!("{}/{}", self.bot_url, method)
  }

  /// JSON-body call. Generic over the `result` type.
  #[instrument(level = "debug", skip(self, body))]
  async fn call_json<B: Serialize, T: DeserializeOwned>(
    &self,
    method: &'static str,
    body: &B,
    timeout: Option<Duration>,
  ) -> GatewayResult<T> {
    let mut req = self.client.post(self.url(method)).header(USER_AGENT, UA).json(body);
    if let Some(t) = timeout {
      req = req.timeout(t);
    }
    let res = req.send().await.map_err(|e| GatewayError::Transport(e.without_url().to_string()))?;
    Self::read_envelope(method, res).await
  }

  #[instrument(level = "debug", skip(self, form))]
  async fn call_multipart<T: DeserializeOwned>(&self, method: &'static str, form: Form) -> GatewayResult<T> {
    let res = self.client.post(self.url(method))
      .header(USER_AGENT, UA)
      .multipart(form)
      .send().await
      .map_err(|e| GatewayError::Transport(e.without_url().to_string()))?;
    Self::read_envelope(method, res).await
  }

  /// The Bot API answers with an `{ ok, result, description }` envelope even on HTTP errors.
  async fn read_envelope<T: DeserializeOwned>(method: &'static str, res: reqwest::Response) -> GatewayResult<T> {
    let status = res.status();
    let body: ApiResponse<T> = res
      .json()
      .await
      .map_err(|e| GatewayError::Transport(format!("HTTP {} from {}: {}", status, method, e.without_url())))?;
    debug!(target: "captcha_gate", method, %status, ok = body.ok, "Bot API response");
    match (body.ok, body.result) {
      (true, Some(result)) => Ok(result),
      _ => Err(GatewayError::Api {
        method,
        description: body.description.unwrap_or_else(|| format!("HTTP {}", status)),
      }),
    }
  }

  pub async fn get_me(&self) -> GatewayResult<User> {
    self.call_json("getMe", &serde_json::json!({}), None).await
  }

  /// Long-poll for updates after `offset`.
  pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> GatewayResult<Vec<Update>> {
    let req = GetUpdatesReq { offset, timeout: timeout_secs, allowed_updates: &["message"] };
    self.call_json("getUpdates", &req, Some(Duration::from_secs(timeout_secs + 10))).await
  }
}

#[async_trait]
impl Gateway for TelegramClient {
  async fn send_photo(&self, chat_id: ChatId, image: &str, caption: &str) -> GatewayResult<MessageId> {
    let path = self.image_dir.join(image);
    let bytes = tokio::fs::read(&path)
      .await
      .map_err(|e| GatewayError::Image(format!("{}: {}", path.display(), e)))?;
    let form = Form::new()
      .text("chat_id", chat_id.to_string())
      .text("caption", caption.to_string())
      .part("photo", Part::bytes(bytes).file_name(image.to_string()));
    let msg: Message = self.call_multipart("sendPhoto", form).await?;
    Ok(msg.message_id)
  }

  async fn send_text(&self, chat_id: ChatId, text: &str) -> GatewayResult<MessageId> {
    let msg: Message = self.call_json("sendMessage", &SendMessageReq { chat_id, text }, None).await?;
    Ok(msg.message_id)
  }

  async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> GatewayResult<()> {
    let _: bool = self.call_json("deleteMessage", &DeleteMessageReq { chat_id, message_id }, None).await?;
    Ok(())
  }

  async fn remove_member(&self, chat_id: ChatId, participant_id: ParticipantId) -> GatewayResult<()> {
    let _: bool = self.call_json("banChatMember", &BanChatMemberReq { chat_id, user_id: participant_id }, None).await?;
    Ok(())
  }
}
