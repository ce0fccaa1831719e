//! The exam session controller.
//!
//! `ExamSessionController` owns one attempt from load through submission.
//! It drives section and question navigation over a [`NavigationPlan`],
//! keeps the resume record current through the [`PositionCheckpoint`],
//! and delegates to [`SectionTimer`], [`AnswerCache`] and
//! [`AudioOrchestrator`]. All operations take `&mut self`, so navigation
//! steps and their write-through checkpoints are serialized by ownership.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

use crate::answers::{AnswerCache, AnswerValue, ChoiceToggle};
use crate::audio::{AudioOrchestrator, AudioScope, ChannelState, PlaybackEvent};
use crate::error::{AudioError, BackendError, ExamError, Result};
use crate::model::{
    Attempt, AttemptId, AttemptStatus, ChoiceId, ExamId, PersistedPosition, Question, QuestionId,
    Section, SectionId, SectionType, UserId, DEFAULT_EXAM_TITLE,
};
use crate::navigation::NavigationPlan;
use crate::store::PositionCheckpoint;
use crate::timer::SectionTimer;
use crate::traits::{AudioDevice, ExamBackend, SessionStore};

/// Session tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Quiet period before a typed answer is written.
    pub answer_debounce: Duration,
    /// Timer ticks between position checkpoints.
    pub checkpoint_every_ticks: u32,
    /// Pause between releasing one sound and loading the next.
    pub audio_release_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            answer_debounce: Duration::from_secs(2),
            checkpoint_every_ticks: 5,
            audio_release_grace: Duration::from_millis(100),
        }
    }
}

/// How an attempt reached `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    Submitted,
    /// The section clock ran out and the attempt was submitted automatically.
    TimeExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Loading the attempt or a section failed; go back to the exam list.
    Load,
    /// Submission failed; the attempt is still in progress and can be resubmitted.
    Submit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Loading,
    Answering,
    SectionTransition,
    Submitting,
    Done(CompletionReason),
    Error(FailureKind),
}

impl SessionState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Loading, Answering | Done(_) | Error(FailureKind::Load))
                | (Answering, SectionTransition | Submitting | Error(FailureKind::Load))
                | (SectionTransition, Answering | Submitting | Error(FailureKind::Load))
                | (Submitting, Done(_) | Error(FailureKind::Submit))
                | (Error(FailureKind::Submit), Submitting)
                | (Error(FailureKind::Load), Loading)
        )
    }

    pub fn is_done(self) -> bool {
        matches!(self, SessionState::Done(_))
    }
}

/// Confirmation token for leaving the current section.
///
/// Obtained from [`ExamSessionController::prepare_advance`] and consumed by
/// [`ExamSessionController::advance_section`]; a token issued for an earlier
/// section is rejected.
#[derive(Debug, PartialEq, Eq)]
pub struct AdvancePrompt {
    section_index: usize,
    next_section: Option<SectionType>,
    unanswered: usize,
}

impl AdvancePrompt {
    /// True if confirming submits the attempt instead of opening a section.
    pub fn is_final(&self) -> bool {
        self.next_section.is_none()
    }

    pub fn next_section(&self) -> Option<SectionType> {
        self.next_section
    }

    /// Questions in the current section without an answer.
    pub fn unanswered(&self) -> usize {
        self.unanswered
    }
}

/// One cell of the question navigator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigatorEntry {
    pub question_number: u32,
    pub question_id: QuestionId,
    pub answered: bool,
    /// The question is on screen (part of the current unit).
    pub current: bool,
}

pub struct ExamSessionController {
    backend: Arc<dyn ExamBackend>,
    checkpoint: Arc<PositionCheckpoint>,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    attempt: Option<Attempt>,
    sections: Vec<Section>,
    section_index: usize,
    questions: Vec<Question>,
    plan: NavigationPlan,
    question_index: usize,
    answers: Option<AnswerCache>,
    timer: SectionTimer,
    audio: AudioOrchestrator,
    expiry_tx: mpsc::UnboundedSender<u64>,
    expiry_rx: mpsc::UnboundedReceiver<u64>,
    timer_generation: u64,
    time_expired: bool,
}

impl ExamSessionController {
    pub fn new(
        backend: Arc<dyn ExamBackend>,
        store: Arc<dyn SessionStore>,
        audio: Arc<dyn AudioDevice>,
        config: SessionConfig,
    ) -> Self {
        let checkpoint = Arc::new(PositionCheckpoint::new(store));
        let (state, _) = watch::channel(SessionState::Loading);
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            timer: SectionTimer::new(Arc::clone(&checkpoint), config.checkpoint_every_ticks),
            audio: AudioOrchestrator::new(audio, config.audio_release_grace),
            checkpoint,
            config,
            state,
            attempt: None,
            sections: Vec::new(),
            section_index: 0,
            questions: Vec::new(),
            plan: NavigationPlan::default(),
            question_index: 0,
            answers: None,
            expiry_tx,
            expiry_rx,
            timer_generation: 0,
            time_expired: false,
        }
    }

    // -- lifecycle ---------------------------------------------------------

    /// Load an attempt and enter its current section.
    ///
    /// A stored position for the same attempt is resumed (section, question
    /// and, for that section, remaining time); any other stored record is
    /// ignored and replaced. An attempt that is already completed goes
    /// straight to `Done`.
    #[instrument(skip_all, fields(%attempt_id))]
    pub async fn load_attempt(&mut self, attempt_id: AttemptId) -> Result<()> {
        self.require("load an attempt", |s| {
            matches!(s, SessionState::Loading | SessionState::Error(FailureKind::Load))
        })?;
        self.set_state(SessionState::Loading);
        match self.try_load(attempt_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(%attempt_id, "failed to load attempt: {e}");
                self.set_state(SessionState::Error(FailureKind::Load));
                Err(e)
            }
        }
    }

    async fn try_load(&mut self, attempt_id: AttemptId) -> Result<()> {
        let attempt = self
            .backend
            .get_attempt(attempt_id)
            .await
            .map_err(|e| match e {
                BackendError::NotFound(_) => ExamError::NotFound(attempt_id),
                other => other.into(),
            })?;

        let stored = match self.checkpoint.store().load().await {
            Ok(record) => record,
            Err(e) => {
                warn!("ignoring unreadable session record: {e}");
                None
            }
        };
        let resumed = stored.filter(|p| p.attempt_id == attempt_id);

        if attempt.status == AttemptStatus::Completed {
            if resumed.is_some() {
                if let Err(e) = self.checkpoint.store().clear().await {
                    warn!("failed to clear record of completed attempt: {e}");
                }
            }
            info!(%attempt_id, "attempt already completed");
            self.attempt = Some(attempt);
            self.set_state(SessionState::Done(CompletionReason::Submitted));
            return Ok(());
        }

        let mut sections = self.backend.get_sections(attempt.exam_id).await?;
        if sections.is_empty() {
            return Err(ExamError::NoSections);
        }
        sections.sort_by_key(|s| s.section_order);

        let saved = self.backend.get_answers(attempt_id).await?;
        let answers = match self.answers.take() {
            // Reloading after a failure: unsaved local answers survive.
            Some(mut answers) if answers.attempt_id() == attempt_id => {
                answers.hydrate(saved);
                answers.flush_all().await;
                answers
            }
            _ => {
                let mut answers = AnswerCache::new(
                    attempt_id,
                    Arc::clone(&self.backend),
                    self.config.answer_debounce,
                );
                answers.hydrate(saved);
                answers
            }
        };

        let last = sections.len() - 1;
        let (position, section_index, question_index, time_left) = match resumed {
            Some(position) if position.current_section_index <= last => {
                let s = position.current_section_index;
                let q = position.current_question_index;
                let t = position.time_left_seconds;
                (position, s, q, t)
            }
            Some(mut position) => {
                warn!(
                    stored = position.current_section_index,
                    last, "stored section out of range, clamping"
                );
                position.current_section_index = last;
                (position, last, 0, None)
            }
            None => {
                let title = attempt
                    .exam_title
                    .clone()
                    .unwrap_or_else(|| DEFAULT_EXAM_TITLE.to_string());
                (PersistedPosition::fresh(attempt_id, title), 0, 0, None)
            }
        };
        info!(
            %attempt_id,
            section = section_index,
            question = question_index,
            resumed = time_left.is_some(),
            "attempt loaded"
        );

        self.checkpoint.install(position);
        self.attempt = Some(attempt);
        self.sections = sections;
        self.answers = Some(answers);
        self.section_index = section_index;
        self.time_expired = false;
        self.enter_section(question_index, time_left).await
    }

    /// Fetch the active section's questions sorted by question number and
    /// move to its first question.
    pub async fn load_questions_for_section(&mut self, section_id: SectionId) -> Result<&[Question]> {
        self.require("load questions", |s| {
            matches!(s, SessionState::Answering | SessionState::SectionTransition)
        })?;
        if self.current_section().map(|s| s.section_id) != Some(section_id) {
            return Err(ExamError::SectionMismatch(section_id));
        }
        self.flush_answers().await;
        self.audio.stop_question().await;
        self.audio.reset_unit_autoplay();
        if let Err(e) = self.fetch_questions(section_id).await {
            error!(%section_id, "failed to load questions: {e}");
            self.set_state(SessionState::Error(FailureKind::Load));
            return Err(e);
        }
        self.checkpoint.set_position(self.section_index, 0);
        self.persist_position().await;
        self.autoplay_question().await;
        Ok(&self.questions)
    }

    /// Exit keeping the resume record: stop timer and audio, flush answers
    /// and write the current position.
    pub async fn close(mut self) -> Result<()> {
        self.teardown().await;
        self.checkpoint.flush().await?;
        debug!("session closed");
        Ok(())
    }

    /// Exit without resume: as [`close`](Self::close) but deletes the record.
    pub async fn abandon(mut self) -> Result<()> {
        self.teardown().await;
        self.checkpoint.clear().await?;
        info!(attempt_id = ?self.attempt.as_ref().map(|a| a.attempt_id), "attempt abandoned");
        Ok(())
    }

    async fn teardown(&mut self) {
        self.stop_timer();
        self.audio.stop_all().await;
        self.flush_answers().await;
    }

    // -- question navigation -----------------------------------------------

    /// Move to the next navigable unit. Returns `false` at the last unit.
    pub async fn advance_question(&mut self) -> Result<bool> {
        self.require("advance question", |s| s == SessionState::Answering)?;
        match self.plan.next(self.question_index) {
            Some(next) => {
                self.move_to(next).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Move to the first question of the previous unit. Returns `false` at the first unit.
    pub async fn retreat_question(&mut self) -> Result<bool> {
        self.require("retreat question", |s| s == SessionState::Answering)?;
        match self.plan.prev(self.question_index) {
            Some(prev) => {
                self.move_to(prev).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Move to the unit containing `question_number` in the current section.
    ///
    /// Returns `false` if no such question exists or it is already on screen.
    pub async fn jump_to_question(&mut self, question_number: u32) -> Result<bool> {
        self.require("jump to question", |s| s == SessionState::Answering)?;
        let Some(idx) = self
            .questions
            .iter()
            .position(|q| q.question_number == question_number)
        else {
            return Ok(false);
        };
        let target = self.plan.normalize(idx);
        if target == self.question_index {
            return Ok(false);
        }
        self.move_to(target).await;
        Ok(true)
    }

    async fn move_to(&mut self, index: usize) {
        // Leaving a unit writes its typed text and retries earlier failures.
        self.flush_answers().await;
        self.audio.stop_question().await;
        self.question_index = index;
        self.checkpoint.set_position(self.section_index, index);
        self.persist_position().await;
        self.autoplay_question().await;
    }

    /// One entry per distinct question number of the current section.
    pub fn navigator(&self) -> Vec<NavigatorEntry> {
        let visible = self.plan.visible_range(self.question_index);
        let mut entries: Vec<NavigatorEntry> = Vec::new();
        for (idx, q) in self.questions.iter().enumerate() {
            if entries
                .last()
                .is_some_and(|e| e.question_number == q.question_number)
            {
                continue;
            }
            entries.push(NavigatorEntry {
                question_number: q.question_number,
                question_id: q.question_id,
                answered: self.has_answer(q.question_id),
                current: visible.contains(&idx),
            });
        }
        entries
    }

    /// Fraction of the section's distinct questions up to the current one.
    pub fn progress(&self) -> f64 {
        let mut numbers: Vec<u32> = self.questions.iter().map(|q| q.question_number).collect();
        numbers.dedup();
        let Some(current) = self.current_question() else {
            return 0.0;
        };
        if numbers.is_empty() {
            return 0.0;
        }
        let ordinal = numbers
            .iter()
            .filter(|n| **n <= current.question_number)
            .count();
        ordinal as f64 / numbers.len() as f64
    }

    // -- section transition ------------------------------------------------

    /// Ask to leave the current section. Only legal from its last unit.
    pub fn prepare_advance(&self) -> Result<AdvancePrompt> {
        self.require("advance section", |s| s == SessionState::Answering)?;
        if !self.plan.is_last_unit(self.question_index) {
            return Err(ExamError::NotAtSectionEnd);
        }
        let unanswered = self
            .questions
            .iter()
            .filter(|q| !self.has_answer(q.question_id))
            .count();
        Ok(AdvancePrompt {
            section_index: self.section_index,
            next_section: self
                .sections
                .get(self.section_index + 1)
                .map(|s| s.section_type),
            unanswered,
        })
    }

    /// Leave the current section for good; submits if it was the last one.
    #[instrument(skip_all, fields(section = self.section_index))]
    pub async fn advance_section(&mut self, prompt: AdvancePrompt) -> Result<SessionState> {
        self.require("advance section", |s| s == SessionState::Answering)?;
        if prompt.section_index != self.section_index {
            return Err(ExamError::StalePrompt);
        }
        if !self.plan.is_last_unit(self.question_index) {
            return Err(ExamError::NotAtSectionEnd);
        }

        self.set_state(SessionState::SectionTransition);
        self.flush_answers().await;
        self.stop_timer();
        self.audio.stop_all().await;

        if self.section_index + 1 >= self.sections.len() {
            self.finish(CompletionReason::Submitted).await?;
            return Ok(self.state());
        }

        self.section_index += 1;
        info!(section = self.section_index, "entering next section");
        // Recorded before fetching so a crash or failed load cannot send
        // the user back into the section just left.
        self.checkpoint.enter_section(self.section_index);
        self.persist_position().await;

        if let Err(e) = self.enter_section(0, None).await {
            error!(section = self.section_index, "failed to enter section: {e}");
            self.set_state(SessionState::Error(FailureKind::Load));
            return Err(e);
        }
        Ok(self.state())
    }

    async fn enter_section(&mut self, resume_question: usize, time_left: Option<u64>) -> Result<()> {
        self.stop_timer();
        self.audio.stop_all().await;
        self.audio.begin_section_entry();

        let section = self
            .sections
            .get(self.section_index)
            .cloned()
            .ok_or(ExamError::NoSections)?;
        self.fetch_questions(section.section_id).await?;

        self.question_index = self.plan.normalize(resume_question);
        self.checkpoint
            .set_position(self.section_index, self.question_index);
        self.start_timer(time_left.unwrap_or_else(|| section.duration_secs()));
        self.persist_position().await;
        self.set_state(SessionState::Answering);

        if section.section_type == SectionType::Listening {
            if let Some(url) = &section.audio_url {
                if let Err(e) = self.audio.autoplay_section(url).await {
                    debug!("section autoplay failed: {e}");
                }
            }
        } else {
            self.autoplay_question().await;
        }
        Ok(())
    }

    async fn fetch_questions(&mut self, section_id: SectionId) -> Result<()> {
        let mut questions = self.backend.get_questions(section_id).await?;
        questions.sort_by_key(|q| q.question_number);
        self.plan = NavigationPlan::build(&questions);
        debug!(
            %section_id,
            questions = questions.len(),
            units = self.plan.unit_count(),
            "questions loaded"
        );
        self.questions = questions;
        self.question_index = 0;
        Ok(())
    }

    // -- submission --------------------------------------------------------

    /// Submit the attempt. Also used to retry after a failed submission.
    pub async fn submit(&mut self) -> Result<()> {
        self.require("submit", |s| {
            matches!(s, SessionState::Answering | SessionState::Error(FailureKind::Submit))
        })?;
        self.finish(CompletionReason::Submitted).await
    }

    /// Submit because the section clock ran out.
    ///
    /// A no-op once submission has started or finished.
    pub async fn auto_submit_on_timeout(&mut self) -> Result<()> {
        match self.state() {
            SessionState::Submitting | SessionState::Done(_) => {
                debug!("timer expiry after submission ignored");
                Ok(())
            }
            SessionState::Answering | SessionState::Error(FailureKind::Submit) => {
                info!("section time expired, submitting attempt");
                self.time_expired = true;
                self.finish(CompletionReason::TimeExpired).await
            }
            state => Err(ExamError::InvalidState {
                op: "auto-submit",
                state,
            }),
        }
    }

    /// Wait until the active section's countdown expires.
    ///
    /// Cancel-safe, so it can sit in a `select!` next to UI events. Expiries
    /// of countdowns that were already stopped are skipped.
    pub async fn timer_expired(&mut self) {
        while let Some(generation) = self.expiry_rx.recv().await {
            if generation == self.timer_generation {
                return;
            }
        }
    }

    /// Auto-submit if the countdown has expired since the last check.
    pub async fn process_timeout(&mut self) -> Result<bool> {
        let mut expired = false;
        while let Ok(generation) = self.expiry_rx.try_recv() {
            expired |= generation == self.timer_generation;
        }
        if !expired {
            return Ok(false);
        }
        self.auto_submit_on_timeout().await?;
        Ok(true)
    }

    async fn finish(&mut self, reason: CompletionReason) -> Result<()> {
        let attempt_id = self.attempt_id()?;
        let reason = if self.time_expired {
            CompletionReason::TimeExpired
        } else {
            reason
        };

        self.set_state(SessionState::Submitting);
        self.flush_answers().await;
        self.stop_timer();
        self.audio.stop_all().await;

        match self.backend.submit(attempt_id).await {
            Ok(()) => {
                if let Err(e) = self.checkpoint.clear().await {
                    warn!("failed to clear session record: {e}");
                }
                if let Some(attempt) = self.attempt.as_mut() {
                    attempt.status = AttemptStatus::Completed;
                }
                info!(%attempt_id, ?reason, "attempt submitted");
                self.set_state(SessionState::Done(reason));
                Ok(())
            }
            Err(e) => {
                error!(%attempt_id, "submission failed: {e}");
                self.set_state(SessionState::Error(FailureKind::Submit));
                Err(e.into())
            }
        }
    }

    // -- answers -----------------------------------------------------------

    pub async fn set_choice_answer(
        &mut self,
        question_id: QuestionId,
        choice_id: ChoiceId,
    ) -> Result<ChoiceToggle> {
        self.require("answer", |s| s == SessionState::Answering)?;
        let answers = self.answers_mut()?;
        Ok(answers.set_choice_answer(question_id, choice_id).await)
    }

    pub fn set_text_answer(&mut self, question_id: QuestionId, text: impl Into<String>) -> Result<()> {
        self.require("answer", |s| s == SessionState::Answering)?;
        self.answers_mut()?.set_text_answer(question_id, text);
        Ok(())
    }

    /// Write a question's pending text now, e.g. when its input loses focus.
    pub async fn flush_answer(&mut self, question_id: QuestionId) -> Result<()> {
        self.answers_mut()?.flush(question_id).await;
        Ok(())
    }

    pub fn has_answer(&self, question_id: QuestionId) -> bool {
        self.answers
            .as_ref()
            .is_some_and(|a| a.has_answer(question_id))
    }

    pub fn is_saving(&self, question_id: QuestionId) -> bool {
        self.answers
            .as_ref()
            .is_some_and(|a| a.is_saving(question_id))
    }

    pub fn answers(&self) -> Option<&AnswerCache> {
        self.answers.as_ref()
    }

    /// Current answer of one question, if any.
    pub fn answer(&self, question_id: QuestionId) -> Option<AnswerValue> {
        self.answers
            .as_ref()
            .and_then(|a| a.value(question_id))
            .filter(AnswerValue::is_answered)
    }

    fn answers_mut(&mut self) -> Result<&mut AnswerCache> {
        let state = self.state();
        self.answers.as_mut().ok_or(ExamError::InvalidState {
            op: "answer",
            state,
        })
    }

    async fn flush_answers(&mut self) {
        if let Some(answers) = self.answers.as_mut() {
            answers.flush_all().await;
        }
    }

    // -- audio -------------------------------------------------------------

    /// Play (or replay) the current section's track.
    pub async fn play_section_audio(&mut self) -> Result<()> {
        self.require("play audio", |s| s == SessionState::Answering)?;
        let url = self
            .current_section()
            .and_then(|s| s.audio_url.clone())
            .ok_or(ExamError::NoAudio)?;
        self.audio.play_section(&url).await?;
        Ok(())
    }

    /// Play (or replay) the clip of the unit on screen.
    pub async fn play_question_audio(&mut self) -> Result<()> {
        self.require("play audio", |s| s == SessionState::Answering)?;
        let url = self.unit_audio_url().ok_or(ExamError::NoAudio)?;
        self.audio.play_question(&url).await?;
        Ok(())
    }

    pub async fn stop_section_audio(&mut self) {
        self.audio.stop_section().await;
    }

    pub async fn stop_question_audio(&mut self) {
        self.audio.stop_question().await;
    }

    /// Forward a status update from the platform player.
    pub async fn on_playback_event(&mut self, scope: AudioScope, event: PlaybackEvent) {
        self.audio.on_playback_event(scope, event).await;
    }

    pub fn audio_state(&self, scope: AudioScope) -> &ChannelState {
        self.audio.state(scope)
    }

    pub fn is_audio_playing(&self, scope: AudioScope) -> bool {
        self.audio.is_playing(scope)
    }

    /// Dismissible notice from the last audio failure.
    pub fn take_audio_notice(&mut self) -> Option<AudioError> {
        self.audio.take_notice()
    }

    /// Auto-play the current unit's clip once per section entry.
    /// Listening sections rely on their section track instead.
    async fn autoplay_question(&mut self) {
        if self.current_section().map(|s| s.section_type) == Some(SectionType::Listening) {
            return;
        }
        let Some(key) = self
            .plan
            .unit_of(self.question_index)
            .and_then(|u| self.plan.key(u))
        else {
            return;
        };
        let Some(url) = self.unit_audio_url() else {
            return;
        };
        if let Err(e) = self.audio.autoplay_question(key, &url).await {
            debug!("question autoplay failed: {e}");
        }
    }

    fn unit_audio_url(&self) -> Option<String> {
        let range = self.plan.visible_range(self.question_index);
        self.questions[range]
            .iter()
            .find_map(|q| q.audio_url.clone())
    }

    // -- timer -------------------------------------------------------------

    fn start_timer(&mut self, seconds: u64) {
        self.timer_generation += 1;
        let generation = self.timer_generation;
        let tx = self.expiry_tx.clone();
        self.timer.start(seconds, move || {
            // The receiver lives as long as the controller.
            let _ = tx.send(generation);
        });
    }

    fn stop_timer(&mut self) {
        self.timer.stop();
        self.timer_generation += 1;
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.timer.remaining()
    }

    pub fn subscribe_remaining(&self) -> watch::Receiver<u64> {
        self.timer.subscribe()
    }

    // -- state and accessors -----------------------------------------------

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn attempt(&self) -> Option<&Attempt> {
        self.attempt.as_ref()
    }

    pub fn exam_title(&self) -> Option<String> {
        self.checkpoint.snapshot().map(|p| p.exam_title)
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section_index(&self) -> usize {
        self.section_index
    }

    pub fn current_section(&self) -> Option<&Section> {
        self.sections.get(self.section_index)
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn question_index(&self) -> usize {
        self.question_index
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.question_index)
    }

    /// Questions displayed together with the current one.
    pub fn visible_questions(&self) -> &[Question] {
        &self.questions[self.plan.visible_range(self.question_index)]
    }

    pub fn is_last_unit(&self) -> bool {
        self.plan.is_last_unit(self.question_index)
    }

    fn attempt_id(&self) -> Result<AttemptId> {
        self.attempt
            .as_ref()
            .map(|a| a.attempt_id)
            .ok_or(ExamError::InvalidState {
                op: "submit",
                state: self.state(),
            })
    }

    fn require(&self, op: &'static str, allowed: fn(SessionState) -> bool) -> Result<()> {
        let state = self.state();
        if allowed(state) {
            Ok(())
        } else {
            Err(ExamError::InvalidState { op, state })
        }
    }

    fn set_state(&self, next: SessionState) {
        let current = self.state();
        if current == next {
            return;
        }
        debug_assert!(
            current.can_transition_to(next),
            "illegal session transition {current:?} -> {next:?}"
        );
        debug!(from = ?current, to = ?next, "session state changed");
        self.state.send_replace(next);
    }

    async fn persist_position(&self) {
        if let Err(e) = self.checkpoint.flush().await {
            warn!("position checkpoint failed, will retry: {e}");
        }
    }
}

/// Create an attempt on the backend and record it as the in-progress exam.
///
/// The single stored record is overwritten, so a previously unfinished
/// attempt can no longer be resumed locally.
#[instrument(skip(backend, store, exam_title))]
pub async fn start_attempt(
    backend: &dyn ExamBackend,
    store: &dyn SessionStore,
    exam_id: ExamId,
    user_id: UserId,
    exam_title: &str,
) -> Result<Attempt> {
    let attempt = backend.start_exam(exam_id, user_id).await?;
    store
        .save(&PersistedPosition::fresh(attempt.attempt_id, exam_title))
        .await?;
    info!(attempt_id = %attempt.attempt_id, %exam_id, "exam started");
    Ok(attempt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn happy_path_transitions_are_legal() {
        let path = [
            Loading,
            Answering,
            SectionTransition,
            Answering,
            Submitting,
            Done(CompletionReason::Submitted),
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{pair:?}");
        }
    }

    #[test]
    fn submit_failure_can_be_retried() {
        assert!(Submitting.can_transition_to(Error(FailureKind::Submit)));
        assert!(Error(FailureKind::Submit).can_transition_to(Submitting));
        assert!(!Error(FailureKind::Submit).can_transition_to(Answering));
    }

    #[test]
    fn done_is_terminal() {
        let done = Done(CompletionReason::TimeExpired);
        for next in [Loading, Answering, SectionTransition, Submitting] {
            assert!(!done.can_transition_to(next));
        }
        assert!(done.is_done());
    }

    #[test]
    fn no_way_back_into_answering_from_submission() {
        assert!(!Submitting.can_transition_to(Answering));
        assert!(!Loading.can_transition_to(Submitting));
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = SessionConfig::default();
        assert_eq!(config.answer_debounce, Duration::from_secs(2));
        assert_eq!(config.checkpoint_every_ticks, 5);
        assert_eq!(config.audio_release_grace, Duration::from_millis(100));
    }
}
