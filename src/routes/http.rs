//! HTTP endpoint handlers. Thin wrappers that forward to `AppState`.

use std::sync::Arc;
use axum::{extract::State, http::{HeaderMap, StatusCode}, Json, response::IntoResponse};
use tracing::{instrument, warn};

use crate::protocol::{HealthOut, Update};
use crate::state::AppState;

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[instrument(level = "debug", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  let pending = state.lifecycle.store().len().await;
  Json(HealthOut { ok: true, pending })
}

/// Telegram delivers one update per request. Processing happens on spawned tasks,
/// so we answer 200 right away and Telegram does not redeliver.
#[instrument(level = "info", skip_all)]
pub async fn http_post_webhook(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Json(update): Json<Update>,
) -> StatusCode {
  if let Some(secret) = &state.webhook_secret {
    let given = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
    if given != Some(secret.as_str()) {
      warn!(target: "captcha_gate", "Webhook call with missing or wrong secret token");
      return StatusCode::UNAUTHORIZED;
    }
  }
  state.dispatch(update);
  StatusCode::OK
}
