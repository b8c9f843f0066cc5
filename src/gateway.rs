//! The chat-platform seam. The lifecycle only talks to the platform through this trait.

use async_trait::async_trait;

use crate::domain::{ChatId, MessageId, ParticipantId};

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
  #[error("transport error: {0}")]
  Transport(String),

  #[error("{method} rejected: {description}")]
  Api { method: &'static str, description: String },

  #[error("image unavailable: {0}")]
  Image(String),
}

#[async_trait]
pub trait Gateway: Send + Sync {
  /// Send an image with a caption. `image` is a catalog image reference.
  async fn send_photo(&self, chat_id: ChatId, image: &str, caption: &str) -> GatewayResult<MessageId>;

  async fn send_text(&self, chat_id: ChatId, text: &str) -> GatewayResult<MessageId>;

  async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> GatewayResult<()>;

  async fn remove_member(&self, chat_id: ChatId, participant_id: ParticipantId) -> GatewayResult<()>;
}
