//! Captcha lifecycle: join → pending challenge → solved / exhausted / timed out.
//!
//! Every resolution path starts by taking the record out of the store. Whoever
//! gets it back performs the visible effects; a path that finds it gone (the
//! timer fired first, or an answer beat the timer) does nothing further.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::catalog::ChallengeCatalog;
use crate::config::{BotSettings, Messages};
use crate::domain::{ChatId, JoinEvent, MessageEvent, MessageId, Participant, ParticipantId, PendingChallenge};
use crate::gateway::Gateway;
use crate::store::{ChallengeStore, StoreError};
use crate::util::{answer_matches, render_template, trunc_for_log, Bindings};

/// What an incoming message did to its sender's challenge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnswerOutcome {
  /// Sender has no pending challenge; ordinary group traffic.
  NotChallenged,
  /// Correct answer. Record removed, tracked messages deleted.
  Solved,
  /// Wrong answer with attempts left; a retry notice was posted.
  Retry { remaining: u32 },
  /// Wrong answer with no attempts left. Participant removed.
  Exhausted,
  /// The record was resolved by another path while this one was in flight.
  AlreadyResolved,
}

pub struct ChallengeLifecycle {
  store: ChallengeStore,
  catalog: ChallengeCatalog,
  gateway: Arc<dyn Gateway>,
  settings: BotSettings,
  messages: Messages,
  bot_username: Option<String>,
}

impl ChallengeLifecycle {
  pub fn new(
    store: ChallengeStore,
    catalog: ChallengeCatalog,
    gateway: Arc<dyn Gateway>,
    settings: BotSettings,
    messages: Messages,
    bot_username: Option<String>,
  ) -> Self {
    Self { store, catalog, gateway, settings, messages, bot_username }
  }

  pub fn store(&self) -> &ChallengeStore {
    &self.store
  }

  fn is_self(&self, p: &Participant) -> bool {
    match (&self.bot_username, &p.username) {
      (Some(bot), Some(user)) => bot.eq_ignore_ascii_case(user),
      _ => false,
    }
  }

  fn render(&self, tpl: &str, p: &Participant, attempts: u32) -> String {
    render_template(tpl, &Bindings::for_participant(p, attempts))
  }

  /// Challenge a newly joined participant and arm their timeout.
  /// Returns the timer task, or `None` when no challenge was created.
  #[instrument(level = "info", skip(self, ev), fields(chat = ev.chat_id, participant = ev.participant.id))]
  pub async fn on_join(self: &Arc<Self>, ev: JoinEvent) -> Option<JoinHandle<()>> {
    let JoinEvent { chat_id, participant } = ev;
    if self.is_self(&participant) {
      debug!(target: "captcha", "Ignoring our own join");
      return None;
    }
    let id = participant.id;
    if self.store.get(id).await.is_some() {
      error!(target: "captcha", participant = id, error = %StoreError::DuplicateChallenge(id), "Join for participant with a live challenge; ignoring");
      return None;
    }

    let challenge = self.catalog.pick_random();
    let caption = self.render(&self.messages.welcome, &participant, self.settings.max_attempts);
    let welcome_id = match self.gateway.send_photo(chat_id, &challenge.image, &caption).await {
      Ok(mid) => mid,
      Err(e) => {
        error!(target: "captcha", participant = id, image = %challenge.image, error = %e, "Failed to send captcha; participant not challenged");
        return None;
      }
    };

    let record = PendingChallenge::new(participant, chat_id, challenge, self.settings.max_attempts, welcome_id);
    let token = record.token;
    if let Err(e) = self.store.create(record).await {
      // Another join for the same id won while we were sending the photo.
      error!(target: "captcha", participant = id, error = %e, "Challenge created concurrently; discarding ours");
      self.delete_tracked(chat_id, &[welcome_id]).await;
      return None;
    }
    info!(target: "captcha", participant = id, timeout_ms = self.settings.captcha_timeout_ms, "Captcha issued");

    Some(self.arm_timeout(id, token))
  }

  fn arm_timeout(self: &Arc<Self>, id: ParticipantId, token: Uuid) -> JoinHandle<()> {
    let lifecycle = Arc::clone(self);
    let after = self.settings.captcha_timeout();
    tokio::spawn(async move {
      tokio::time::sleep(after).await;
      lifecycle.expire(id, token).await;
    })
  }

  /// Evaluate a message from a participant, if they have a pending challenge.
  #[instrument(level = "info", skip(self, ev), fields(chat = ev.chat_id, participant = ev.from.id, message = ev.message_id))]
  pub async fn on_message(&self, ev: MessageEvent) -> AnswerOutcome {
    let Some(record) = self.store.get(ev.from.id).await else {
      return AnswerOutcome::NotChallenged;
    };
    if answer_matches(&ev.text, &record.challenge.answer, self.settings.sensitive_case) {
      self.solve(record, ev.message_id).await
    } else {
      debug!(target: "captcha", answer = %trunc_for_log(&ev.text, 32), "Wrong answer");
      self.wrong_answer(record, ev.message_id).await
    }
  }

  async fn solve(&self, record: PendingChallenge, message_id: MessageId) -> AnswerOutcome {
    let id = record.participant.id;
    if self.store.append_messages(id, &[message_id]).await.is_err() {
      return AnswerOutcome::AlreadyResolved;
    }
    let Some(record) = self.store.remove(id).await else {
      return AnswerOutcome::AlreadyResolved;
    };

    let text = self.render(&self.messages.captcha_success, &record.participant, record.remaining_attempts);
    if let Err(e) = self.gateway.send_text(record.chat_id, &text).await {
      warn!(target: "captcha", participant = id, error = %e, "Failed to send success message");
    }
    self.delete_tracked(record.chat_id, &record.tracked_messages).await;
    info!(target: "captcha", participant = id, remaining = record.remaining_attempts, took = ?record.created_at.elapsed(), "Captcha solved");
    AnswerOutcome::Solved
  }

  async fn wrong_answer(&self, record: PendingChallenge, message_id: MessageId) -> AnswerOutcome {
    let id = record.participant.id;
    // Decrement before any gateway call so concurrent wrong answers each cost one attempt.
    let Ok(remaining) = self.store.decrement_attempts(id).await else {
      return AnswerOutcome::AlreadyResolved;
    };

    if self.settings.exhaustion_policy.is_exhausted(remaining, self.settings.max_attempts) {
      if self.store.append_messages(id, &[message_id]).await.is_err() {
        return AnswerOutcome::AlreadyResolved;
      }
      let Some(record) = self.store.remove(id).await else {
        return AnswerOutcome::AlreadyResolved;
      };
      let text = self.render(&self.messages.attempts_over, &record.participant, remaining);
      self.reject(&record, &text).await;
      info!(target: "captcha", participant = id, "Captcha attempts exhausted");
      return AnswerOutcome::Exhausted;
    }

    let notice = self.render(&self.messages.attempt_fail, &record.participant, remaining);
    let mut ids = vec![message_id];
    match self.gateway.send_text(record.chat_id, &notice).await {
      Ok(notice_id) => ids.push(notice_id),
      Err(e) => warn!(target: "captcha", participant = id, error = %e, "Failed to send retry notice"),
    }

    if self.store.append_messages(id, &ids).await.is_err() {
      // Resolved (most likely timed out) while the notice was in flight.
      self.delete_tracked(record.chat_id, &ids).await;
      return AnswerOutcome::AlreadyResolved;
    }
    info!(target: "captcha", participant = id, remaining, "Captcha retry");
    AnswerOutcome::Retry { remaining }
  }

  /// Timer callback: resolve the record created with `token`, if it is still pending.
  #[instrument(level = "info", skip(self))]
  pub async fn expire(&self, id: ParticipantId, token: Uuid) -> bool {
    let Some(record) = self.store.remove_if_token(id, token).await else {
      debug!(target: "captcha", participant = id, "Timer fired after resolution; nothing to do");
      return false;
    };
    let text = self.render(&self.messages.timeout, &record.participant, record.remaining_attempts);
    self.reject(&record, &text).await;
    info!(target: "captcha", participant = id, age = ?record.created_at.elapsed(), "Captcha timed out");
    true
  }

  async fn reject(&self, record: &PendingChallenge, text: &str) {
    let id = record.participant.id;
    self.delete_tracked(record.chat_id, &record.tracked_messages).await;
    if let Err(e) = self.gateway.remove_member(record.chat_id, id).await {
      warn!(target: "captcha", participant = id, error = %e, "Failed to remove participant");
    }
    if let Err(e) = self.gateway.send_text(record.chat_id, text).await {
      warn!(target: "captcha", participant = id, error = %e, "Failed to send rejection message");
    }
  }

  /// Best-effort cleanup; failures are logged and skipped.
  async fn delete_tracked(&self, chat_id: ChatId, ids: &[MessageId]) {
    for &mid in ids {
      if let Err(e) = self.gateway.delete_message(chat_id, mid).await {
        warn!(target: "captcha", chat = chat_id, message = mid, error = %e, "Failed to delete message");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::catalog::ChallengeCatalog;
  use crate::domain::{Challenge, ExhaustionPolicy};
  use crate::gateway::fake::{Call, RecordingGateway};

  const CHAT: ChatId = -100_200;

  fn catalog() -> ChallengeCatalog {
    let entries = vec![
      Challenge { image: "one.png".into(), answer: "AbC".into() },
      Challenge { image: "two.png".into(), answer: "xyz".into() },
    ];
    let next = std::sync::atomic::AtomicUsize::new(0);
    ChallengeCatalog::new(entries, Box::new(move |len| next.fetch_add(1, std::sync::atomic::Ordering::SeqCst) % len)).unwrap()
  }

  fn messages() -> Messages {
    Messages {
      welcome: "welcome $firstname $username $attemptCount".into(),
      timeout: "timeout $firstname".into(),
      attempt_fail: "fail $attemptCount".into(),
      attempts_over: "over $firstname".into(),
      captcha_success: "ok $firstname".into(),
    }
  }

  fn setup_with(gateway: RecordingGateway, settings: BotSettings) -> (Arc<ChallengeLifecycle>, Arc<RecordingGateway>) {
    let gw = Arc::new(gateway);
    let lc = ChallengeLifecycle::new(
      ChallengeStore::new(),
      catalog(),
      gw.clone(),
      settings,
      messages(),
      Some("gate_bot".into()),
    );
    (Arc::new(lc), gw)
  }

  fn setup(settings: BotSettings) -> (Arc<ChallengeLifecycle>, Arc<RecordingGateway>) {
    setup_with(RecordingGateway::new(), settings)
  }

  fn ana() -> Participant {
    Participant { id: 42, first_name: "Ana".into(), last_name: None, username: Some("ana99".into()) }
  }

  fn join() -> JoinEvent {
    JoinEvent { chat_id: CHAT, participant: ana() }
  }

  fn say(message_id: MessageId, text: &str) -> MessageEvent {
    MessageEvent { chat_id: CHAT, from: ana(), message_id, text: text.into() }
  }

  fn depleted() -> BotSettings {
    BotSettings { exhaustion_policy: ExhaustionPolicy::Depleted, ..BotSettings::default() }
  }

  #[tokio::test(start_paused = true)]
  async fn join_sends_photo_and_creates_record() {
    let (lc, gw) = setup(BotSettings::default());
    lc.on_join(join()).await.expect("timer armed");

    assert_eq!(gw.calls(), vec![Call::Photo { chat_id: CHAT, image: "one.png".into(), caption: "welcome Ana @ana99 3".into() }]);
    let record = lc.store().get(42).await.unwrap();
    assert_eq!(record.remaining_attempts, 3);
    assert_eq!(record.tracked_messages, vec![1000]);
    assert_eq!(record.challenge.answer, "AbC");
  }

  #[tokio::test(start_paused = true)]
  async fn own_join_is_ignored() {
    let (lc, gw) = setup(BotSettings::default());
    let bot = Participant { id: 1, first_name: "Gate".into(), last_name: None, username: Some("Gate_Bot".into()) };
    assert!(lc.on_join(JoinEvent { chat_id: CHAT, participant: bot }).await.is_none());
    assert!(gw.calls().is_empty());
    assert_eq!(lc.store().len().await, 0);
  }

  #[tokio::test(start_paused = true)]
  async fn duplicate_join_keeps_existing_record() {
    let (lc, gw) = setup(depleted());
    lc.on_join(join()).await.unwrap();
    lc.on_message(say(5, "nope")).await;
    gw.clear();

    assert!(lc.on_join(join()).await.is_none());
    assert!(gw.calls().is_empty());
    assert_eq!(lc.store().get(42).await.unwrap().remaining_attempts, 2);
  }

  #[tokio::test(start_paused = true)]
  async fn failed_photo_creates_nothing() {
    let mut gateway = RecordingGateway::new();
    gateway.fail_photos = true;
    let (lc, _gw) = setup_with(gateway, BotSettings::default());
    assert!(lc.on_join(join()).await.is_none());
    assert!(lc.store().get(42).await.is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn correct_answer_ignoring_case_solves() {
    let (lc, gw) = setup(BotSettings::default());
    lc.on_join(join()).await.unwrap();

    assert_eq!(lc.on_message(say(7, "abc")).await, AnswerOutcome::Solved);
    assert!(lc.store().get(42).await.is_none());
    assert_eq!(gw.texts(), vec!["ok Ana".to_string()]);
    assert_eq!(gw.deleted(), vec![1000, 7]);
    assert!(gw.removed().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn case_sensitive_rejects_wrong_case() {
    let settings = BotSettings { sensitive_case: true, ..depleted() };
    let (lc, _gw) = setup(settings);
    lc.on_join(join()).await.unwrap();

    assert_eq!(lc.on_message(say(7, "abc")).await, AnswerOutcome::Retry { remaining: 2 });
    assert_eq!(lc.on_message(say(8, "AbC")).await, AnswerOutcome::Solved);
  }

  #[tokio::test(start_paused = true)]
  async fn first_wrong_answer_exhausts_under_default_policy() {
    let (lc, gw) = setup(BotSettings::default());
    lc.on_join(join()).await.unwrap();

    assert_eq!(lc.on_message(say(7, "wrong")).await, AnswerOutcome::Exhausted);
    assert!(lc.store().get(42).await.is_none());
    assert_eq!(gw.deleted(), vec![1000, 7]);
    assert_eq!(gw.removed(), vec![42]);
    assert_eq!(gw.texts(), vec!["over Ana".to_string()]);
  }

  #[tokio::test(start_paused = true)]
  async fn depleted_policy_counts_down_to_zero() {
    let (lc, gw) = setup(depleted());
    lc.on_join(join()).await.unwrap();

    assert_eq!(lc.on_message(say(7, "a")).await, AnswerOutcome::Retry { remaining: 2 });
    assert_eq!(lc.store().get(42).await.unwrap().remaining_attempts, 2);
    assert_eq!(lc.on_message(say(9, "b")).await, AnswerOutcome::Retry { remaining: 1 });
    assert_eq!(lc.store().get(42).await.unwrap().tracked_messages, vec![1000, 7, 1001, 9, 1002]);
    assert_eq!(lc.on_message(say(11, "c")).await, AnswerOutcome::Exhausted);

    assert_eq!(gw.texts(), vec!["fail 2".to_string(), "fail 1".into(), "over Ana".into()]);
    assert_eq!(gw.deleted(), vec![1000, 7, 1001, 9, 1002, 11]);
    assert_eq!(gw.removed(), vec![42]);
  }

  #[tokio::test(start_paused = true)]
  async fn correct_answer_after_retries_deletes_everything() {
    let (lc, gw) = setup(depleted());
    lc.on_join(join()).await.unwrap();
    lc.on_message(say(7, "a")).await;

    assert_eq!(lc.on_message(say(8, "ABC")).await, AnswerOutcome::Solved);
    assert_eq!(gw.deleted(), vec![1000, 7, 1001, 8]);
  }

  #[tokio::test(start_paused = true)]
  async fn strangers_are_not_challenged() {
    let (lc, gw) = setup(BotSettings::default());
    assert_eq!(lc.on_message(say(7, "hello")).await, AnswerOutcome::NotChallenged);
    assert!(gw.calls().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn timeout_removes_unresolved_participant() {
    let (lc, gw) = setup(depleted());
    let timer = lc.on_join(join()).await.unwrap();
    lc.on_message(say(7, "a")).await;
    gw.clear();

    timer.await.unwrap();
    assert!(lc.store().get(42).await.is_none());
    assert_eq!(gw.deleted(), vec![1000, 7, 1001]);
    assert_eq!(gw.removed(), vec![42]);
    assert_eq!(gw.texts(), vec!["timeout Ana".to_string()]);
  }

  #[tokio::test(start_paused = true)]
  async fn timer_does_not_fire_early() {
    let (lc, gw) = setup(BotSettings::default());
    lc.on_join(join()).await.unwrap();
    gw.clear();

    tokio::time::sleep(Duration::from_millis(179_000)).await;
    assert!(lc.store().get(42).await.is_some());
    assert!(gw.calls().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn timer_after_resolution_is_a_no_op() {
    let (lc, gw) = setup(BotSettings::default());
    let timer = lc.on_join(join()).await.unwrap();
    lc.on_message(say(7, "abc")).await;
    gw.clear();

    timer.await.unwrap();
    assert!(gw.calls().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn rejoin_gets_fresh_record_untouched_by_stale_timer() {
    let (lc, gw) = setup(depleted());
    let first_timer = lc.on_join(join()).await.unwrap();
    lc.on_message(say(7, "a")).await;
    lc.on_message(say(8, "abc")).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    let _second_timer = lc.on_join(join()).await.unwrap();
    let record = lc.store().get(42).await.unwrap();
    assert_eq!(record.remaining_attempts, 3);
    assert_eq!(record.challenge.answer, "xyz");
    gw.clear();

    first_timer.await.unwrap();
    assert!(lc.store().get(42).await.is_some());
    assert!(gw.calls().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn delete_failures_do_not_block_resolution() {
    let mut gateway = RecordingGateway::new();
    gateway.fail_deletes = true;
    let (lc, gw) = setup_with(gateway, BotSettings::default());
    lc.on_join(join()).await.unwrap();

    assert_eq!(lc.on_message(say(7, "wrong")).await, AnswerOutcome::Exhausted);
    assert_eq!(gw.removed(), vec![42]);
    assert_eq!(gw.texts(), vec!["over Ana".to_string()]);
  }

  #[tokio::test(start_paused = true)]
  async fn expire_with_unknown_token_does_nothing() {
    let (lc, gw) = setup(BotSettings::default());
    lc.on_join(join()).await.unwrap();
    gw.clear();
    assert!(!lc.expire(42, Uuid::new_v4()).await);
    assert!(gw.calls().is_empty());
    assert!(lc.store().get(42).await.is_some());
  }

  fn slow_texts() -> RecordingGateway {
    let mut gateway = RecordingGateway::new();
    gateway.text_delay = Some(Duration::from_millis(10));
    gateway
  }

  #[tokio::test(start_paused = true)]
  async fn concurrent_wrong_answers_each_cost_one_attempt() {
    let (lc, gw) = setup_with(slow_texts(), depleted());
    lc.on_join(join()).await.unwrap();

    let first = tokio::spawn({
      let lc = lc.clone();
      async move { lc.on_message(say(7, "a")).await }
    });
    let second = tokio::spawn({
      let lc = lc.clone();
      async move { lc.on_message(say(8, "b")).await }
    });
    let mut outcomes = vec![first.await.unwrap(), second.await.unwrap()];
    outcomes.sort_by_key(|o| match o {
      AnswerOutcome::Retry { remaining } => *remaining,
      _ => u32::MAX,
    });

    assert_eq!(outcomes, vec![AnswerOutcome::Retry { remaining: 1 }, AnswerOutcome::Retry { remaining: 2 }]);
    assert_eq!(lc.store().get(42).await.unwrap().remaining_attempts, 1);
    assert_eq!(gw.texts().len(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn timeout_during_retry_notice_wins_and_notice_is_cleaned_up() {
    let (lc, gw) = setup_with(slow_texts(), depleted());
    lc.on_join(join()).await.unwrap();
    let token = lc.store().get(42).await.unwrap().token;

    let answer = tokio::spawn({
      let lc = lc.clone();
      async move { lc.on_message(say(7, "a")).await }
    });
    // Let the answer reach its retry notice before the timer resolves the record.
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(lc.expire(42, token).await);

    assert_eq!(answer.await.unwrap(), AnswerOutcome::AlreadyResolved);
    assert!(lc.store().get(42).await.is_none());
    assert_eq!(gw.removed(), vec![42]);
    assert_eq!(gw.deleted(), vec![1000, 7, 1001]);
    assert_eq!(gw.texts(), vec!["fail 2".to_string(), "timeout Ana".into()]);
  }

  #[tokio::test(start_paused = true)]
  async fn answer_after_timeout_took_the_record_does_nothing() {
    let (lc, gw) = setup(BotSettings::default());
    lc.on_join(join()).await.unwrap();
    let stale = lc.store().get(42).await.unwrap();
    assert!(lc.expire(42, stale.token).await);
    gw.clear();

    assert_eq!(lc.solve(stale.clone(), 7).await, AnswerOutcome::AlreadyResolved);
    assert_eq!(lc.wrong_answer(stale, 8).await, AnswerOutcome::AlreadyResolved);
    assert!(gw.calls().is_empty());
  }
}
