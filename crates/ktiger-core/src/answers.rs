//! Working set of answers for the active attempt.
//!
//! Local state is authoritative: every edit lands in the cache immediately
//! and is mirrored to the backend afterwards. Choice writes go out at once;
//! text writes are debounced per question. Each entry carries a revision so
//! a write only marks the entry synced if nothing newer was typed while it
//! was in flight, and anything left unsynced is retried on the next flush.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::model::{AnswerPayload, AttemptId, ChoiceId, QuestionId, SaveAnswerRequest, SavedAnswer};
use crate::traits::ExamBackend;

/// Local value of one answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerValue {
    Choice(ChoiceId),
    Text(String),
    /// A deselected choice; the backend still needs an explicit unset.
    Cleared,
}

impl AnswerValue {
    pub fn is_answered(&self) -> bool {
        match self {
            AnswerValue::Choice(_) => true,
            AnswerValue::Text(t) => !t.trim().is_empty(),
            AnswerValue::Cleared => false,
        }
    }

    /// Backend payload, or `None` for blank text which is never written.
    fn payload(&self) -> Option<AnswerPayload> {
        match self {
            AnswerValue::Choice(c) => Some(AnswerPayload::Choice { choice_id: Some(*c) }),
            AnswerValue::Cleared => Some(AnswerPayload::Choice { choice_id: None }),
            AnswerValue::Text(t) if t.trim().is_empty() => None,
            AnswerValue::Text(t) => Some(AnswerPayload::Text {
                answer_text: t.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: AnswerValue,
    revision: u64,
    synced: u64,
}

#[derive(Default)]
struct Shared {
    entries: HashMap<QuestionId, Entry>,
    saving: HashSet<QuestionId>,
}

/// Outcome of toggling a choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceToggle {
    Selected(ChoiceId),
    Deselected,
}

pub struct AnswerCache {
    attempt_id: AttemptId,
    backend: Arc<dyn ExamBackend>,
    shared: Arc<Mutex<Shared>>,
    pending: HashMap<QuestionId, JoinHandle<()>>,
    debounce: Duration,
}

impl AnswerCache {
    pub fn new(attempt_id: AttemptId, backend: Arc<dyn ExamBackend>, debounce: Duration) -> Self {
        Self {
            attempt_id,
            backend,
            shared: Arc::new(Mutex::new(Shared::default())),
            pending: HashMap::new(),
            debounce,
        }
    }

    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    /// Seed the cache from answers already stored server-side.
    ///
    /// Entries with local edits the backend has not confirmed yet are kept;
    /// local state wins until it has been written.
    pub fn hydrate(&mut self, saved: Vec<SavedAnswer>) {
        let mut shared = lock(&self.shared);
        for answer in saved {
            if shared
                .entries
                .get(&answer.question_id)
                .is_some_and(|e| e.synced < e.revision)
            {
                continue;
            }
            let value = match (answer.choice_id, answer.answer_text) {
                (Some(choice), _) => AnswerValue::Choice(choice),
                (None, Some(text)) => AnswerValue::Text(text),
                (None, None) => continue,
            };
            shared.entries.insert(
                answer.question_id,
                Entry {
                    value,
                    revision: 0,
                    synced: 0,
                },
            );
        }
        debug!(count = shared.entries.len(), "answer cache hydrated");
    }

    /// Toggle `choice_id` for a CHOICE question and write it through.
    ///
    /// Selecting the already-selected choice clears the answer. Backend
    /// failures are logged and left for the next flush to retry.
    pub async fn set_choice_answer(
        &mut self,
        question_id: QuestionId,
        choice_id: ChoiceId,
    ) -> ChoiceToggle {
        let (value, revision) = {
            let mut shared = lock(&self.shared);
            let already = matches!(
                shared.entries.get(&question_id).map(|e| &e.value),
                Some(AnswerValue::Choice(c)) if *c == choice_id
            );
            let value = if already {
                AnswerValue::Cleared
            } else {
                AnswerValue::Choice(choice_id)
            };
            let revision = bump(&mut shared, question_id, value.clone());
            (value, revision)
        };

        write_through(
            Arc::clone(&self.backend),
            Arc::clone(&self.shared),
            self.attempt_id,
            question_id,
            value.clone(),
            revision,
        )
        .await;

        match value {
            AnswerValue::Choice(c) => ChoiceToggle::Selected(c),
            _ => ChoiceToggle::Deselected,
        }
    }

    /// Record typed text and (re)schedule its debounced write.
    pub fn set_text_answer(&mut self, question_id: QuestionId, text: impl Into<String>) {
        {
            let mut shared = lock(&self.shared);
            bump(&mut shared, question_id, AnswerValue::Text(text.into()));
        }

        if let Some(previous) = self.pending.remove(&question_id) {
            previous.abort();
        }

        let backend = Arc::clone(&self.backend);
        let shared = Arc::clone(&self.shared);
        let attempt_id = self.attempt_id;
        let debounce = self.debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let latest = lock(&shared)
                .entries
                .get(&question_id)
                .map(|e| (e.value.clone(), e.revision));
            if let Some((value, revision)) = latest {
                write_through(backend, shared, attempt_id, question_id, value, revision).await;
            }
        });
        self.pending.insert(question_id, handle);
    }

    /// Write `question_id` now if it has unsynced local state (flush-on-blur).
    pub async fn flush(&mut self, question_id: QuestionId) {
        if let Some(handle) = self.pending.remove(&question_id) {
            handle.abort();
        }
        let unsynced = lock(&self.shared)
            .entries
            .get(&question_id)
            .filter(|e| e.synced < e.revision)
            .map(|e| (e.value.clone(), e.revision));
        if let Some((value, revision)) = unsynced {
            write_through(
                Arc::clone(&self.backend),
                Arc::clone(&self.shared),
                self.attempt_id,
                question_id,
                value,
                revision,
            )
            .await;
        }
    }

    /// Write every pending or previously failed answer now.
    pub async fn flush_all(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
        let unsynced: Vec<(QuestionId, AnswerValue, u64)> = lock(&self.shared)
            .entries
            .iter()
            .filter(|(_, e)| e.synced < e.revision)
            .map(|(q, e)| (*q, e.value.clone(), e.revision))
            .collect();
        if unsynced.is_empty() {
            return;
        }
        debug!(count = unsynced.len(), "flushing unsynced answers");
        join_all(unsynced.into_iter().map(|(q, value, revision)| {
            write_through(
                Arc::clone(&self.backend),
                Arc::clone(&self.shared),
                self.attempt_id,
                q,
                value,
                revision,
            )
        }))
        .await;
    }

    /// Drop scheduled writes without sending them.
    pub fn cancel_pending(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }

    /// True if a non-null choice or non-blank text exists for the question.
    pub fn has_answer(&self, question_id: QuestionId) -> bool {
        lock(&self.shared)
            .entries
            .get(&question_id)
            .is_some_and(|e| e.value.is_answered())
    }

    pub fn selected_choice(&self, question_id: QuestionId) -> Option<ChoiceId> {
        match lock(&self.shared).entries.get(&question_id).map(|e| &e.value) {
            Some(AnswerValue::Choice(c)) => Some(*c),
            _ => None,
        }
    }

    pub fn text(&self, question_id: QuestionId) -> Option<String> {
        match lock(&self.shared).entries.get(&question_id).map(|e| &e.value) {
            Some(AnswerValue::Text(t)) => Some(t.clone()),
            _ => None,
        }
    }

    /// Local value of one question, answered or not.
    pub fn value(&self, question_id: QuestionId) -> Option<AnswerValue> {
        lock(&self.shared)
            .entries
            .get(&question_id)
            .map(|e| e.value.clone())
    }

    /// Answered questions and their current values.
    pub fn answers(&self) -> HashMap<QuestionId, AnswerValue> {
        lock(&self.shared)
            .entries
            .iter()
            .filter(|(_, e)| e.value.is_answered())
            .map(|(q, e)| (*q, e.value.clone()))
            .collect()
    }

    pub fn answered_count(&self) -> usize {
        lock(&self.shared)
            .entries
            .values()
            .filter(|e| e.value.is_answered())
            .count()
    }

    /// True while a write for the question is in flight.
    pub fn is_saving(&self, question_id: QuestionId) -> bool {
        lock(&self.shared).saving.contains(&question_id)
    }

    /// Questions whose local value has not been confirmed by the backend.
    pub fn unsynced(&self) -> Vec<QuestionId> {
        let mut ids: Vec<QuestionId> = lock(&self.shared)
            .entries
            .iter()
            .filter(|(_, e)| e.synced < e.revision)
            .map(|(q, _)| *q)
            .collect();
        ids.sort();
        ids
    }
}

impl Drop for AnswerCache {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn bump(shared: &mut Shared, question_id: QuestionId, value: AnswerValue) -> u64 {
    let entry = shared.entries.entry(question_id).or_insert(Entry {
        value: AnswerValue::Cleared,
        revision: 0,
        synced: 0,
    });
    entry.value = value;
    entry.revision += 1;
    entry.revision
}

fn mark_synced(shared: &Mutex<Shared>, question_id: QuestionId, revision: u64) {
    if let Some(entry) = lock(shared).entries.get_mut(&question_id) {
        entry.synced = entry.synced.max(revision);
    }
}

/// Marks a question as saving for the lifetime of the guard, including when
/// the write is aborted mid-flight.
struct SavingGuard<'a> {
    shared: &'a Mutex<Shared>,
    question_id: QuestionId,
}

impl<'a> SavingGuard<'a> {
    fn enter(shared: &'a Mutex<Shared>, question_id: QuestionId) -> Self {
        lock(shared).saving.insert(question_id);
        Self {
            shared,
            question_id,
        }
    }
}

impl Drop for SavingGuard<'_> {
    fn drop(&mut self) {
        lock(self.shared).saving.remove(&self.question_id);
    }
}

async fn write_through(
    backend: Arc<dyn ExamBackend>,
    shared: Arc<Mutex<Shared>>,
    attempt_id: AttemptId,
    question_id: QuestionId,
    value: AnswerValue,
    revision: u64,
) {
    let Some(payload) = value.payload() else {
        mark_synced(&shared, question_id, revision);
        return;
    };
    let request = SaveAnswerRequest {
        attempt_id,
        question_id,
        value: payload,
    };

    let result = {
        let _saving = SavingGuard::enter(&shared, question_id);
        backend.save_answer(&request).await
    };

    match result {
        Ok(()) => {
            mark_synced(&shared, question_id, revision);
            debug!(%question_id, revision, "answer saved");
        }
        Err(e) => warn!(%question_id, "answer save failed, will retry: {e}"),
    }
}
