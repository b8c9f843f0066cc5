//! Domain models: participants, catalog challenges and the pending-challenge record.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ParticipantId = i64;
pub type ChatId = i64;
pub type MessageId = i64;

/// Someone who joined (or wrote in) the group. Only the id is used as a key;
/// the name fields feed message templates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
  pub id: ParticipantId,
  pub first_name: String,
  #[serde(default)] pub last_name: Option<String>,
  #[serde(default)] pub username: Option<String>,
}

/// One catalog entry: an image shown to the participant and the text they must type back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
  pub image: String,
  pub answer: String,
}

/// How a wrong answer decides whether the participant is out of attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
  /// Exhausted once remaining attempts drop below the configured maximum.
  /// This is true after the first wrong answer.
  #[default]
  BelowMax,
  /// Exhausted only once remaining attempts reach zero.
  Depleted,
}

impl ExhaustionPolicy {
  pub fn is_exhausted(self, remaining: u32, max_attempts: u32) -> bool {
    match self {
      ExhaustionPolicy::BelowMax => remaining < max_attempts,
      ExhaustionPolicy::Depleted => remaining == 0,
    }
  }
}

/// Unresolved challenge for a single participant. At most one lives per participant id.
#[derive(Clone, Debug)]
pub struct PendingChallenge {
  /// Distinguishes this record from earlier or later records of the same participant.
  pub token: Uuid,
  pub participant: Participant,
  pub chat_id: ChatId,
  pub challenge: Challenge,
  pub remaining_attempts: u32,
  pub tracked_messages: Vec<MessageId>,
  pub created_at: Instant,
}

impl PendingChallenge {
  pub fn new(
    participant: Participant,
    chat_id: ChatId,
    challenge: Challenge,
    max_attempts: u32,
    welcome_message: MessageId,
  ) -> Self {
    Self {
      token: Uuid::new_v4(),
      participant,
      chat_id,
      challenge,
      remaining_attempts: max_attempts,
      tracked_messages: vec![welcome_message],
      created_at: Instant::now(),
    }
  }
}

/// A participant appeared in a group.
#[derive(Clone, Debug)]
pub struct JoinEvent {
  pub chat_id: ChatId,
  pub participant: Participant,
}

/// A participant wrote a text message in a group. Service messages, stickers,
/// photos and other non-text messages never become events.
#[derive(Clone, Debug)]
pub struct MessageEvent {
  pub chat_id: ChatId,
  pub from: Participant,
  pub message_id: MessageId,
  pub text: String,
}
