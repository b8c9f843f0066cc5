//! Telegram Bot API wire structs (serde ready) and their mapping to lifecycle events.
//! Only the fields this bot reads are modeled; unknown fields are ignored.

use serde::{Deserialize, Serialize};

use crate::domain::{JoinEvent, MessageEvent, Participant};

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub new_chat_members: Option<Vec<User>>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
    #[allow(dead_code)]
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Outgoing `sendMessage` body.
#[derive(Debug, Serialize)]
pub struct SendMessageReq<'a> {
    pub chat_id: i64,
    pub text: &'a str,
}

#[derive(Debug, Serialize)]
pub struct DeleteMessageReq {
    pub chat_id: i64,
    pub message_id: i64,
}

#[derive(Debug, Serialize)]
pub struct BanChatMemberReq {
    pub chat_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Serialize)]
pub struct GetUpdatesReq<'a> {
    pub offset: i64,
    pub timeout: u64,
    pub allowed_updates: &'a [&'a str],
}

/// Health endpoint output.
#[derive(Debug, Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub pending: usize,
}

impl From<User> for Participant {
    fn from(u: User) -> Self {
        Participant {
            id: u.id,
            first_name: u.first_name,
            last_name: u.last_name,
            username: u.username,
        }
    }
}

/// What one update means for the lifecycle.
#[derive(Debug)]
pub enum Inbound {
    Joins(Vec<JoinEvent>),
    Message(MessageEvent),
    Ignored,
}

impl Update {
    pub fn into_inbound(self) -> Inbound {
        let Some(msg) = self.message else {
            return Inbound::Ignored;
        };
        let chat_id = msg.chat.id;
        if let Some(members) = msg.new_chat_members {
            return Inbound::Joins(
                members
                    .into_iter()
                    .map(|u| JoinEvent { chat_id, participant: u.into() })
                    .collect(),
            );
        }
        // Only text can answer a captcha; service messages (left_chat_member,
        // pinned_message, ...) and media carry no `text`.
        match (msg.from, msg.text) {
            (Some(from), Some(text)) => Inbound::Message(MessageEvent {
                chat_id,
                from: from.into(),
                message_id: msg.message_id,
                text,
            }),
            _ => Inbound::Ignored,
        }
    }
}
