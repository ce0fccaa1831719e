//! ktiger-client — HTTP exam backend and configuration.
//!
//! Implements the `ExamBackend` trait from `ktiger-core` over the exam
//! service's REST API, and loads the `ktiger.toml` configuration that wires
//! the backend, the session store and the session tunables together.

pub mod config;
pub mod http;

pub use config::{create_backend, load_config, load_config_from, KtigerConfig};
pub use http::HttpExamBackend;
