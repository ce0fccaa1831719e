//! In-memory backend, session store and audio device for tests and offline
//! embedding.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AudioError, BackendError, StoreError};
use crate::model::{
    AnswerPayload, Attempt, AttemptId, AttemptStatus, ExamId, ExamResult, ExamSummary,
    PersistedPosition, Question, QuestionId, SaveAnswerRequest, SavedAnswer, Section, SectionId,
    UserId,
};
use crate::store::MemorySessionStore;
use crate::traits::{AudioDevice, ExamBackend, SessionStore, SoundHandle};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BackendData {
    exams: Vec<ExamSummary>,
    attempts: HashMap<AttemptId, Attempt>,
    sections: HashMap<ExamId, Vec<Section>>,
    questions: HashMap<SectionId, Vec<Question>>,
    answers: HashMap<(AttemptId, QuestionId), SavedAnswer>,
    results: HashMap<AttemptId, ExamResult>,
    saved_requests: Vec<SaveAnswerRequest>,
    submissions: Vec<AttemptId>,
    question_fetches: Vec<SectionId>,
}

/// A mock exam backend holding all content in memory.
///
/// Saved answers are stored so they can be read back with `get_answers`;
/// submissions mark the attempt COMPLETED.
#[derive(Default)]
pub struct MockBackend {
    data: Mutex<BackendData>,
    next_attempt: AtomicU64,
    fail_saves: AtomicBool,
    fail_submit: AtomicBool,
    fail_questions: AtomicBool,
    fail_answers: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            next_attempt: AtomicU64::new(1000),
            ..Self::default()
        }
    }

    pub fn add_exam(&self, exam: ExamSummary) -> &Self {
        lock(&self.data).exams.push(exam);
        self
    }

    pub fn add_attempt(&self, attempt: Attempt) -> &Self {
        lock(&self.data).attempts.insert(attempt.attempt_id, attempt);
        self
    }

    pub fn set_sections(&self, exam_id: ExamId, sections: Vec<Section>) -> &Self {
        lock(&self.data).sections.insert(exam_id, sections);
        self
    }

    pub fn set_questions(&self, section_id: SectionId, questions: Vec<Question>) -> &Self {
        lock(&self.data).questions.insert(section_id, questions);
        self
    }

    pub fn set_result(&self, attempt_id: AttemptId, result: ExamResult) -> &Self {
        lock(&self.data).results.insert(attempt_id, result);
        self
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn fail_submit(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub fn fail_questions(&self, fail: bool) {
        self.fail_questions.store(fail, Ordering::SeqCst);
    }

    pub fn fail_answers(&self, fail: bool) {
        self.fail_answers.store(fail, Ordering::SeqCst);
    }

    /// Every `save_answer` request that succeeded, in order.
    pub fn saved_requests(&self) -> Vec<SaveAnswerRequest> {
        lock(&self.data).saved_requests.clone()
    }

    pub fn submissions(&self) -> Vec<AttemptId> {
        lock(&self.data).submissions.clone()
    }

    pub fn question_fetches(&self) -> Vec<SectionId> {
        lock(&self.data).question_fetches.clone()
    }

    pub fn attempt_status(&self, attempt_id: AttemptId) -> Option<AttemptStatus> {
        lock(&self.data).attempts.get(&attempt_id).map(|a| a.status)
    }
}

fn network_down() -> BackendError {
    BackendError::Network("connection refused".into())
}

#[async_trait]
impl ExamBackend for MockBackend {
    async fn get_attempt(&self, attempt_id: AttemptId) -> Result<Attempt, BackendError> {
        lock(&self.data)
            .attempts
            .get(&attempt_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("/exam-attempts/{attempt_id}")))
    }

    async fn get_sections(&self, exam_id: ExamId) -> Result<Vec<Section>, BackendError> {
        Ok(lock(&self.data)
            .sections
            .get(&exam_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_questions(&self, section_id: SectionId) -> Result<Vec<Question>, BackendError> {
        if self.fail_questions.load(Ordering::SeqCst) {
            return Err(network_down());
        }
        let mut data = lock(&self.data);
        data.question_fetches.push(section_id);
        Ok(data.questions.get(&section_id).cloned().unwrap_or_default())
    }

    async fn get_answers(&self, attempt_id: AttemptId) -> Result<Vec<SavedAnswer>, BackendError> {
        if self.fail_answers.load(Ordering::SeqCst) {
            return Err(network_down());
        }
        let mut answers: Vec<SavedAnswer> = lock(&self.data)
            .answers
            .iter()
            .filter(|((a, _), _)| *a == attempt_id)
            .map(|(_, v)| v.clone())
            .collect();
        answers.sort_by_key(|a| a.question_id);
        Ok(answers)
    }

    async fn save_answer(&self, request: &SaveAnswerRequest) -> Result<(), BackendError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(network_down());
        }
        let mut data = lock(&self.data);
        let key = (request.attempt_id, request.question_id);
        match &request.value {
            AnswerPayload::Choice { choice_id: None } => {
                data.answers.remove(&key);
            }
            AnswerPayload::Choice {
                choice_id: Some(choice),
            } => {
                data.answers.insert(
                    key,
                    SavedAnswer {
                        question_id: request.question_id,
                        choice_id: Some(*choice),
                        answer_text: None,
                    },
                );
            }
            AnswerPayload::Text { answer_text } => {
                data.answers.insert(
                    key,
                    SavedAnswer {
                        question_id: request.question_id,
                        choice_id: None,
                        answer_text: Some(answer_text.clone()),
                    },
                );
            }
        }
        data.saved_requests.push(request.clone());
        Ok(())
    }

    async fn submit(&self, attempt_id: AttemptId) -> Result<(), BackendError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(BackendError::Api {
                status: 500,
                message: "scoring unavailable".into(),
            });
        }
        let mut data = lock(&self.data);
        let attempt = data
            .attempts
            .get_mut(&attempt_id)
            .ok_or_else(|| BackendError::NotFound(format!("/exam-attempts/{attempt_id}")))?;
        attempt.status = AttemptStatus::Completed;
        data.submissions.push(attempt_id);
        Ok(())
    }

    async fn get_result(&self, attempt_id: AttemptId) -> Result<ExamResult, BackendError> {
        lock(&self.data)
            .results
            .get(&attempt_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("/exam-attempts/{attempt_id}/result")))
    }

    async fn list_active_exams(&self) -> Result<Vec<ExamSummary>, BackendError> {
        Ok(lock(&self.data).exams.clone())
    }

    async fn get_exam(&self, exam_id: ExamId) -> Result<ExamSummary, BackendError> {
        lock(&self.data)
            .exams
            .iter()
            .find(|e| e.exam_id == exam_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("/exams/{exam_id}")))
    }

    async fn start_exam(&self, exam_id: ExamId, user_id: UserId) -> Result<Attempt, BackendError> {
        let mut data = lock(&self.data);
        let title = data
            .exams
            .iter()
            .find(|e| e.exam_id == exam_id)
            .map(|e| e.title.clone())
            .ok_or_else(|| BackendError::NotFound(format!("/exams/{exam_id}")))?;
        let attempt = Attempt {
            attempt_id: AttemptId::new(self.next_attempt.fetch_add(1, Ordering::SeqCst)),
            exam_id,
            user_id: Some(user_id),
            status: AttemptStatus::InProgress,
            started_at: None,
            exam_title: Some(title),
        };
        data.attempts.insert(attempt.attempt_id, attempt.clone());
        Ok(attempt)
    }

    async fn attempts_by_user(&self, user_id: UserId) -> Result<Vec<Attempt>, BackendError> {
        let mut attempts: Vec<Attempt> = lock(&self.data)
            .attempts
            .values()
            .filter(|a| a.user_id == Some(user_id))
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.attempt_id);
        Ok(attempts)
    }
}

// ---------------------------------------------------------------------------
// Session store
// ---------------------------------------------------------------------------

/// Memory store whose saves take `delay` and, like a blocking file write,
/// keep running to completion when the caller is dropped.
pub struct SlowSessionStore {
    inner: Arc<MemorySessionStore>,
    delay: Duration,
}

impl SlowSessionStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: Arc::new(MemorySessionStore::new()),
            delay,
        }
    }

    /// The backing memory store, for inspecting what actually landed.
    pub fn inner(&self) -> &MemorySessionStore {
        &self.inner
    }
}

#[async_trait]
impl SessionStore for SlowSessionStore {
    async fn load(&self) -> Result<Option<PersistedPosition>, StoreError> {
        self.inner.load().await
    }

    async fn save(&self, position: &PersistedPosition) -> Result<(), StoreError> {
        let inner = Arc::clone(&self.inner);
        let position = position.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.save(&position).await
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.inner.clear().await
    }
}

// ---------------------------------------------------------------------------
// Audio device
// ---------------------------------------------------------------------------

#[derive(Default)]
struct AudioData {
    loaded: HashMap<SoundHandle, String>,
    playing: HashSet<SoundHandle>,
    loads: Vec<String>,
    failing: HashSet<String>,
}

/// Audio device that tracks loaded and playing sounds without producing output.
#[derive(Default)]
pub struct MockAudioDevice {
    data: Mutex<AudioData>,
    next_handle: AtomicU64,
}

impl MockAudioDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future load of `url` fail.
    pub fn fail_url(&self, url: &str) {
        lock(&self.data).failing.insert(url.to_string());
    }

    /// URLs of sounds loaded and not yet unloaded.
    pub fn loaded_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = lock(&self.data).loaded.values().cloned().collect();
        urls.sort();
        urls
    }

    pub fn playing_urls(&self) -> Vec<String> {
        let data = lock(&self.data);
        let mut urls: Vec<String> = data
            .playing
            .iter()
            .filter_map(|h| data.loaded.get(h).cloned())
            .collect();
        urls.sort();
        urls
    }

    /// Every URL passed to `load_and_play`, in order.
    pub fn load_history(&self) -> Vec<String> {
        lock(&self.data).loads.clone()
    }
}

#[async_trait]
impl AudioDevice for MockAudioDevice {
    async fn load_and_play(&self, url: &str) -> Result<SoundHandle, AudioError> {
        let mut data = lock(&self.data);
        data.loads.push(url.to_string());
        if data.failing.contains(url) {
            return Err(AudioError::Load {
                url: url.to_string(),
                message: "unsupported codec".into(),
            });
        }
        let handle = SoundHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        data.loaded.insert(handle, url.to_string());
        data.playing.insert(handle);
        Ok(handle)
    }

    async fn stop(&self, handle: SoundHandle) -> Result<(), AudioError> {
        lock(&self.data).playing.remove(&handle);
        Ok(())
    }

    async fn unload(&self, handle: SoundHandle) -> Result<(), AudioError> {
        let mut data = lock(&self.data);
        data.playing.remove(&handle);
        data.loaded.remove(&handle);
        Ok(())
    }
}
