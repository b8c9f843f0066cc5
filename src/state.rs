//! Application state: the lifecycle (with its store, catalog and gateway) and update dispatch.
//!
//! Both intake modes (webhook and polling) hand raw updates to `AppState::dispatch`.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::catalog::{random_picker, ChallengeCatalog, CatalogError};
use crate::config::CaptchaConfig;
use crate::gateway::Gateway;
use crate::lifecycle::ChallengeLifecycle;
use crate::protocol::{Inbound, Update};
use crate::seeds::seed_challenges;
use crate::store::ChallengeStore;

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<ChallengeLifecycle>,
    pub webhook_secret: Option<String>,
}

impl AppState {
    /// Build state from config: catalog (configured or built-in), empty store, lifecycle.
    #[instrument(level = "info", skip_all)]
    pub fn new(
        cfg: CaptchaConfig,
        catalog_dir: &std::path::Path,
        gateway: Arc<dyn Gateway>,
        bot_username: Option<String>,
        webhook_secret: Option<String>,
    ) -> Result<Self, CatalogError> {
        let entries = if cfg.challenges.is_empty() {
            info!(target: "captcha_gate", "No challenges configured; using built-in catalog");
            seed_challenges()
        } else {
            cfg.challenges
        };
        let catalog = ChallengeCatalog::with_image_dir(entries, catalog_dir, random_picker())?;

        info!(
            target: "captcha_gate",
            max_attempts = cfg.bot.max_attempts,
            timeout_ms = cfg.bot.captcha_timeout_ms,
            sensitive_case = cfg.bot.sensitive_case,
            policy = ?cfg.bot.exhaustion_policy,
            "Captcha settings"
        );

        let lifecycle = ChallengeLifecycle::new(
            ChallengeStore::new(),
            catalog,
            gateway,
            cfg.bot,
            cfg.messages,
            bot_username,
        );
        Ok(Self { lifecycle: Arc::new(lifecycle), webhook_secret })
    }

    /// Route one update to the lifecycle. Each event runs on its own task so a slow
    /// gateway call never holds up the next update.
    #[instrument(level = "debug", skip(self, update), fields(update_id = update.update_id))]
    pub fn dispatch(&self, update: Update) {
        match update.into_inbound() {
            Inbound::Joins(joins) => {
                for ev in joins {
                    let lifecycle = Arc::clone(&self.lifecycle);
                    tokio::spawn(async move {
                        lifecycle.on_join(ev).await;
                    });
                }
            }
            Inbound::Message(ev) => {
                let lifecycle = Arc::clone(&self.lifecycle);
                tokio::spawn(async move {
                    let outcome = lifecycle.on_message(ev).await;
                    debug!(target: "captcha", ?outcome, "Message handled");
                });
            }
            Inbound::Ignored => {}
        }
    }
}
