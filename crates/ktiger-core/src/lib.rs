//! ktiger-core — Timed multi-section exam session controller.
//!
//! This crate holds the exam data model, the collaborator traits (backend,
//! session store, audio device) and the session machinery built on them:
//! navigation over grouped questions, the section countdown, debounced
//! answer autosave, audio channel management and the controller that ties
//! them together.

pub mod answers;
pub mod audio;
pub mod error;
pub mod mock;
pub mod model;
pub mod navigation;
pub mod session;
pub mod store;
pub mod timer;
pub mod traits;

pub use error::{AudioError, BackendError, ExamError, StoreError};
pub use session::{
    start_attempt, AdvancePrompt, CompletionReason, ExamSessionController, FailureKind,
    NavigatorEntry, SessionConfig, SessionState,
};
