//! Long-polling intake for development: `getUpdates` in a loop with offset tracking.

use std::time::Duration;

use tracing::{error, info, instrument};

use crate::state::AppState;
use crate::telegram::TelegramClient;

const POLL_TIMEOUT_SECS: u64 = 30;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[instrument(level = "info", skip_all)]
pub async fn run_polling(client: TelegramClient, state: AppState) {
  info!(target: "captcha_gate", "Polling for updates");
  let mut offset = 0i64;
  let mut backoff = Duration::from_secs(1);
  loop {
    match client.get_updates(offset, POLL_TIMEOUT_SECS).await {
      Ok(updates) => {
        backoff = Duration::from_secs(1);
        for update in updates {
          offset = offset.max(update.update_id + 1);
          state.dispatch(update);
        }
      }
      Err(e) => {
        error!(target: "captcha_gate", error = %e, retry_in = ?backoff, "getUpdates failed");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
      }
    }
  }
}
