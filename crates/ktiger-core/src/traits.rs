//! Core trait definitions for the collaborators of the session controller.
//!
//! `ExamBackend` is implemented over HTTP by `ktiger-client`; `SessionStore`
//! and `AudioDevice` are implemented by the embedding platform (see
//! [`crate::store`] and [`crate::mock`] for the bundled implementations).

use async_trait::async_trait;

use crate::error::{AudioError, BackendError, StoreError};
use crate::model::{
    Attempt, AttemptId, ExamId, ExamResult, ExamSummary, PersistedPosition, Question,
    SaveAnswerRequest, SavedAnswer, Section, SectionId, UserId,
};

// ---------------------------------------------------------------------------
// Exam backend
// ---------------------------------------------------------------------------

/// Remote exam service. Grading, scoring and content all live behind it.
#[async_trait]
pub trait ExamBackend: Send + Sync {
    /// `GET /exam-attempts/{attemptId}`
    async fn get_attempt(&self, attempt_id: AttemptId) -> Result<Attempt, BackendError>;

    /// `GET /exam-sections/exam/{examId}`, in backend order.
    async fn get_sections(&self, exam_id: ExamId) -> Result<Vec<Section>, BackendError>;

    /// `GET /questions/section/{sectionId}`, in backend order.
    async fn get_questions(&self, section_id: SectionId) -> Result<Vec<Question>, BackendError>;

    /// `GET /user-answers/attempt/{attemptId}`
    async fn get_answers(&self, attempt_id: AttemptId) -> Result<Vec<SavedAnswer>, BackendError>;

    /// `POST /user-answers`
    async fn save_answer(&self, request: &SaveAnswerRequest) -> Result<(), BackendError>;

    /// `POST /exam-attempts/{attemptId}/submit`; triggers server-side scoring.
    async fn submit(&self, attempt_id: AttemptId) -> Result<(), BackendError>;

    /// `GET /exam-attempts/{attemptId}/result`
    async fn get_result(&self, attempt_id: AttemptId) -> Result<ExamResult, BackendError>;

    /// `GET /exams/active`
    async fn list_active_exams(&self) -> Result<Vec<ExamSummary>, BackendError>;

    /// `GET /exams/{examId}`
    async fn get_exam(&self, exam_id: ExamId) -> Result<ExamSummary, BackendError>;

    /// `POST /exam-attempts/start`
    async fn start_exam(&self, exam_id: ExamId, user_id: UserId) -> Result<Attempt, BackendError>;

    /// `GET /exam-attempts/user/{userId}`
    async fn attempts_by_user(&self, user_id: UserId) -> Result<Vec<Attempt>, BackendError>;
}

// ---------------------------------------------------------------------------
// Session store
// ---------------------------------------------------------------------------

/// Well-known key of the single in-progress record.
pub const IN_PROGRESS_KEY: &str = "topik_in_progress";

/// Local persistence of the single in-progress attempt's position.
///
/// Only one record exists system-wide: starting a second exam while one is
/// in progress overwrites it. This is a known limitation of the model.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<Option<PersistedPosition>, StoreError>;

    /// Replace the record wholesale.
    async fn save(&self, position: &PersistedPosition) -> Result<(), StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Audio device
// ---------------------------------------------------------------------------

/// Opaque handle of one loaded platform sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundHandle(pub u64);

/// Platform audio playback.
///
/// Every handle returned by `load_and_play` must eventually be passed to
/// `unload`; the orchestrator guarantees this.
#[async_trait]
pub trait AudioDevice: Send + Sync {
    /// Load `url` and start playing it.
    async fn load_and_play(&self, url: &str) -> Result<SoundHandle, AudioError>;

    async fn stop(&self, handle: SoundHandle) -> Result<(), AudioError>;

    /// Release the underlying resource.
    async fn unload(&self, handle: SoundHandle) -> Result<(), AudioError>;
}
