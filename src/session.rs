//! Conversation Session Manager.
//!
//! [`Tutor`] owns the live conversation. Generation is split in two so the
//! host's event loop never blocks on the network: an operation such as
//! [`Tutor::submit_message`] mutates state synchronously and hands back a
//! [`PendingReply`]; the host resolves it (usually in a spawned task) and
//! feeds the [`ReplyOutcome`] back through [`Tutor::complete_reply`].
//!
//! Every reply carries the epoch of the session it was issued against. An
//! outcome whose epoch no longer matches (the student started a new chat or
//! loaded another session meanwhile) is dropped.

use crate::completion::CompletionTracker;
use crate::error::TutorError;
use crate::gateway::{FIRST_STEP_PROMPT, GatewayError, TutorGateway, practice_seed_text};
use crate::practice::PracticeProblem;
use crate::registry::{SavedSession, SessionRegistry};
use crate::store::{AUTOSAVE_KEY, KeyValueStore, StoreError, read_document, write_document};
use crate::types::{ChatTurn, ImageData, ReasoningMode, View};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long transient messages stay up.
pub const NOTICE_TTL: Duration = Duration::from_secs(3);

/// A generation call issued against one session epoch, not yet resolved.
#[must_use = "a pending reply does nothing until resolved and completed"]
pub struct PendingReply {
    epoch: u64,
    prompt: String,
    history: Vec<ChatTurn>,
    mode: ReasoningMode,
    gateway: Arc<dyn TutorGateway>,
}

impl PendingReply {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn mode(&self) -> ReasoningMode {
        self.mode
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    /// Calls the gateway once. Never retries.
    pub async fn resolve(self) -> ReplyOutcome {
        let result = self
            .gateway
            .generate_tutor_reply(&self.prompt, &self.history, self.mode)
            .await;
        ReplyOutcome {
            epoch: self.epoch,
            mode: self.mode,
            result,
        }
    }
}

/// Result of a resolved [`PendingReply`].
#[derive(Debug, Clone)]
pub struct ReplyOutcome {
    pub epoch: u64,
    pub mode: ReasoningMode,
    pub result: Result<String, GatewayError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorNotice {
    pub error: TutorError,
    pub raised_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeKind {
    SessionSaved { name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub raised_at: Instant,
}

pub struct Tutor {
    gateway: Arc<dyn TutorGateway>,
    store: Arc<dyn KeyValueStore>,
    registry: SessionRegistry,
    completions: CompletionTracker,
    turns: Vec<ChatTurn>,
    lead_image: Option<ImageData>,
    view: View,
    pending: bool,
    epoch: u64,
    extended_reasoning: bool,
    last_error: Option<ErrorNotice>,
    notice: Option<Notice>,
}

impl Tutor {
    /// Builds the manager and resumes an autosaved conversation if one exists.
    pub fn new(gateway: Arc<dyn TutorGateway>, store: Arc<dyn KeyValueStore>) -> Self {
        let registry = SessionRegistry::load(store.clone());
        let completions = CompletionTracker::load(store.clone());
        let mut tutor = Self {
            gateway,
            store,
            registry,
            completions,
            turns: Vec::new(),
            lead_image: None,
            view: View::Welcome,
            pending: false,
            epoch: 0,
            extended_reasoning: true,
            last_error: None,
            notice: None,
        };
        tutor.resume_autosave();
        tutor
    }

    pub fn with_extended_reasoning(mut self, enabled: bool) -> Self {
        self.extended_reasoning = enabled;
        self
    }

    fn resume_autosave(&mut self) {
        match read_document::<Vec<ChatTurn>>(self.store.as_ref(), AUTOSAVE_KEY) {
            Ok(Some(turns)) if turns.iter().all(ChatTurn::is_well_formed) => {
                if !turns.is_empty() {
                    tracing::info!(turns = turns.len(), "resuming autosaved conversation");
                    self.lead_image = turns.first().and_then(|turn| turn.image().cloned());
                    self.turns = turns;
                    self.view = View::Chat;
                }
            }
            Ok(Some(_)) => {
                tracing::warn!("autosaved conversation has malformed turns; discarding");
                self.discard_autosave();
            }
            Ok(None) => {}
            Err(StoreError::Corrupt { detail, .. }) => {
                tracing::warn!(%detail, "autosaved conversation is corrupt; discarding");
                self.discard_autosave();
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not read autosaved conversation");
                return;
            }
        }
        self.persist_autosave();
    }

    fn discard_autosave(&self) {
        if let Err(err) = self.store.remove(AUTOSAVE_KEY) {
            tracing::warn!(error = %err, "failed to remove autosave");
        }
    }

    // ============================================
    // Accessors
    // ============================================

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn lead_image(&self) -> Option<&ImageData> {
        self.lead_image.as_ref()
    }

    pub fn extended_reasoning_enabled(&self) -> bool {
        self.extended_reasoning
    }

    pub fn last_error(&self) -> Option<&TutorError> {
        self.last_error.as_ref().map(|notice| &notice.error)
    }

    pub fn error_notice(&self) -> Option<&ErrorNotice> {
        self.last_error.as_ref()
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn completions(&self) -> &CompletionTracker {
        &self.completions
    }

    pub fn gateway(&self) -> Arc<dyn TutorGateway> {
        self.gateway.clone()
    }

    // ============================================
    // Conversation Operations
    // ============================================

    /// Starts a session from a photographed problem.
    ///
    /// Returns `None` when a reply is already pending or a conversation is
    /// already open.
    pub fn begin_from_image(&mut self, image: ImageData) -> Option<PendingReply> {
        if !self.can_begin() {
            return None;
        }
        self.lead_image = Some(image.clone());
        Some(self.begin_with_seed(ChatTurn::user_image(image)))
    }

    /// Starts a session from a practice problem and records it as attempted.
    pub fn begin_from_practice_problem(
        &mut self,
        problem_id: &str,
        problem_text: &str,
    ) -> Option<PendingReply> {
        if !self.can_begin() {
            return None;
        }
        self.completions.mark_complete(problem_id);
        self.lead_image = None;
        Some(self.begin_with_seed(ChatTurn::user(practice_seed_text(problem_text))))
    }

    pub fn begin_practice(&mut self, problem: &PracticeProblem) -> Option<PendingReply> {
        self.begin_from_practice_problem(problem.id, problem.problem)
    }

    fn can_begin(&self) -> bool {
        if self.pending || !self.turns.is_empty() {
            tracing::debug!(pending = self.pending, "ignoring begin on an active session");
            return false;
        }
        true
    }

    fn begin_with_seed(&mut self, seed: ChatTurn) -> PendingReply {
        self.epoch += 1;
        self.turns = vec![seed];
        self.view = View::Chat;
        self.last_error = None;
        self.pending = true;
        self.persist_autosave();
        tracing::debug!(epoch = self.epoch, "session started");
        self.issue(FIRST_STEP_PROMPT.to_string(), self.turns.clone())
    }

    /// Appends a student message and issues the follow-up generation.
    ///
    /// Blank text and submissions while a reply is pending are ignored.
    pub fn submit_message(&mut self, text: &str) -> Option<PendingReply> {
        if text.trim().is_empty() {
            return None;
        }
        if self.pending {
            tracing::debug!("ignoring submission while a reply is pending");
            return None;
        }

        let history = self.turns.clone();
        self.turns.push(ChatTurn::user(text));
        self.view = View::Chat;
        self.last_error = None;
        self.pending = true;
        self.persist_autosave();
        Some(self.issue(text.to_string(), history))
    }

    fn issue(&self, prompt: String, history: Vec<ChatTurn>) -> PendingReply {
        PendingReply {
            epoch: self.epoch,
            prompt,
            history,
            mode: ReasoningMode::from_toggle(self.extended_reasoning),
            gateway: self.gateway.clone(),
        }
    }

    /// Applies a resolved reply. Returns `false` if it belonged to an
    /// abandoned session and was dropped.
    pub fn complete_reply(&mut self, outcome: ReplyOutcome) -> bool {
        if outcome.epoch != self.epoch {
            tracing::debug!(
                reply_epoch = outcome.epoch,
                current_epoch = self.epoch,
                "dropping reply for an abandoned session"
            );
            return false;
        }

        self.pending = false;
        match outcome.result {
            Ok(text) => {
                self.turns
                    .push(ChatTurn::tutor(text, outcome.mode.is_extended()));
                self.last_error = None;
            }
            Err(err) => {
                tracing::warn!(error = %err, "tutor reply failed");
                self.raise(err.into());
            }
        }
        self.persist_autosave();
        true
    }

    /// Resolves `pending` in place and applies it.
    pub async fn run_to_completion(&mut self, pending: PendingReply) -> bool {
        let outcome = pending.resolve().await;
        self.complete_reply(outcome)
    }

    /// Submits `text` and waits for the reply. Returns `false` if the
    /// submission was ignored.
    pub async fn send(&mut self, text: &str) -> bool {
        match self.submit_message(text) {
            Some(pending) => self.run_to_completion(pending).await,
            None => false,
        }
    }

    /// Resets to an empty welcome screen. A non-empty conversation is only
    /// discarded when `confirm` returns `true`.
    pub fn start_new_session<F>(&mut self, confirm: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        if !self.turns.is_empty() && !confirm() {
            return false;
        }

        self.epoch += 1;
        self.turns.clear();
        self.lead_image = None;
        self.last_error = None;
        self.pending = false;
        self.view = View::Welcome;
        self.persist_autosave();
        tracing::debug!(epoch = self.epoch, "new session");
        true
    }

    /// Flips the generation mode used by the next call. Returns the new value.
    pub fn toggle_extended_reasoning(&mut self) -> bool {
        self.extended_reasoning = !self.extended_reasoning;
        self.extended_reasoning
    }

    pub fn open_practice_browser(&mut self) -> bool {
        if self.view != View::Welcome || self.pending {
            return false;
        }
        self.view = View::PracticeBrowser;
        self.persist_autosave();
        true
    }

    pub fn back_to_welcome(&mut self) -> bool {
        if self.view != View::PracticeBrowser {
            return false;
        }
        self.view = View::Welcome;
        self.persist_autosave();
        true
    }

    // ============================================
    // Saved Sessions
    // ============================================

    pub fn save_session(&mut self) -> Result<SavedSession, TutorError> {
        match self.registry.save(&self.turns, self.lead_image.as_ref()) {
            Ok(saved) => {
                self.last_error = None;
                self.notice = Some(Notice {
                    kind: NoticeKind::SessionSaved {
                        name: saved.name().to_string(),
                    },
                    raised_at: Instant::now(),
                });
                Ok(saved)
            }
            Err(err) => {
                let err = TutorError::from(err);
                self.raise(err.clone());
                Err(err)
            }
        }
    }

    /// Replaces the live conversation with a saved snapshot.
    pub fn load_session(&mut self, id: &str) -> Result<(), TutorError> {
        let snapshot = match self.registry.load_snapshot(id) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let err = TutorError::from(err);
                self.raise(err.clone());
                return Err(err);
            }
        };

        self.epoch += 1;
        self.turns = snapshot.turns;
        self.lead_image = snapshot.image;
        self.pending = false;
        self.last_error = None;
        self.view = View::Chat;
        self.persist_autosave();
        tracing::info!(id, epoch = self.epoch, "loaded saved session");
        Ok(())
    }

    pub fn delete_session<F>(&mut self, id: &str, confirm: F) -> Result<bool, TutorError>
    where
        F: FnOnce(&SavedSession) -> bool,
    {
        self.registry.delete(id, confirm).map_err(|err| {
            let err = TutorError::from(err);
            self.raise(err.clone());
            err
        })
    }

    // ============================================
    // Notices
    // ============================================

    /// Records an error raised outside the manager, e.g. by speech playback.
    pub fn raise(&mut self, error: TutorError) {
        self.last_error = Some(ErrorNotice {
            error,
            raised_at: Instant::now(),
        });
    }

    pub fn dismiss_error(&mut self) {
        self.last_error = None;
    }

    /// Drops transient messages older than [`NOTICE_TTL`].
    pub fn expire_notices(&mut self, now: Instant) {
        if let Some(notice) = &self.last_error
            && notice.error.is_transient()
            && now.duration_since(notice.raised_at) >= NOTICE_TTL
        {
            self.last_error = None;
        }
        if let Some(notice) = &self.notice
            && now.duration_since(notice.raised_at) >= NOTICE_TTL
        {
            self.notice = None;
        }
    }

    fn persist_autosave(&self) {
        let result = if self.view == View::Chat && !self.turns.is_empty() {
            write_document(self.store.as_ref(), AUTOSAVE_KEY, &self.turns)
        } else {
            self.store.remove(AUTOSAVE_KEY)
        };
        if let Err(err) = result {
            tracing::warn!(error = %err, "failed to autosave conversation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayResult;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct EchoGateway;

    #[async_trait]
    impl TutorGateway for EchoGateway {
        async fn generate_tutor_reply(
            &self,
            prompt: &str,
            _history: &[ChatTurn],
            _mode: ReasoningMode,
        ) -> GatewayResult<String> {
            Ok(format!("echo: {prompt}"))
        }

        async fn synthesize_speech(&self, _text: &str) -> GatewayResult<Vec<u8>> {
            Err(GatewayError::NoAudio)
        }
    }

    fn tutor() -> Tutor {
        Tutor::new(Arc::new(EchoGateway), Arc::new(MemoryStore::new()))
    }

    #[test]
    fn transient_errors_expire_after_ttl() {
        let mut tutor = tutor();
        assert!(tutor.save_session().is_err());
        let raised = tutor.error_notice().unwrap().raised_at;

        tutor.expire_notices(raised + Duration::from_millis(100));
        assert_eq!(tutor.last_error(), Some(&TutorError::EmptySubmission));

        tutor.expire_notices(raised + NOTICE_TTL);
        assert!(tutor.last_error().is_none());
    }

    #[test]
    fn gateway_errors_do_not_expire() {
        let mut tutor = tutor();
        tutor.raise(TutorError::GatewayUnavailable);
        let raised = tutor.error_notice().unwrap().raised_at;
        tutor.expire_notices(raised + NOTICE_TTL * 10);
        assert_eq!(tutor.last_error(), Some(&TutorError::GatewayUnavailable));
        tutor.dismiss_error();
        assert!(tutor.last_error().is_none());
    }

    #[test]
    fn practice_navigation_only_from_welcome() {
        let mut tutor = tutor();
        assert!(!tutor.back_to_welcome());
        assert!(tutor.open_practice_browser());
        assert_eq!(tutor.view(), View::PracticeBrowser);
        assert!(!tutor.open_practice_browser());
        assert!(tutor.back_to_welcome());
        assert_eq!(tutor.view(), View::Welcome);
    }

    #[tokio::test]
    async fn begin_is_refused_on_an_open_conversation() {
        let mut tutor = tutor();
        assert!(tutor.send("hello").await);
        let image = ImageData::from_bytes("image/png", b"img");
        assert!(tutor.begin_from_image(image).is_none());
        assert!(tutor.begin_from_practice_problem("deriv-1", "x").is_none());
        assert!(!tutor.completions().is_complete("deriv-1"));
    }

    #[tokio::test]
    async fn save_raises_a_transient_notice() {
        let mut tutor = tutor();
        assert!(tutor.send("hello").await);
        let saved = tutor.save_session().unwrap();
        match &tutor.notice().unwrap().kind {
            NoticeKind::SessionSaved { name } => assert_eq!(name, saved.name()),
        }
        let raised = tutor.notice().unwrap().raised_at;
        tutor.expire_notices(raised + NOTICE_TTL);
        assert!(tutor.notice().is_none());
    }

    #[tokio::test]
    async fn successful_save_clears_the_previous_error() {
        let mut tutor = tutor();
        assert!(tutor.send("hello").await);
        tutor.raise(TutorError::GatewayUnavailable);

        tutor.save_session().unwrap();
        assert!(tutor.last_error().is_none());
        assert!(tutor.error_notice().is_none());
    }
}
