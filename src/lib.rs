//! Café Virtuel — deterministic orchestration engine for multi-party
//! AI + human conversations.
//!
//! The engine parses the bracketed French text envelope each participant
//! wraps its replies in, detects questions and epistemic states, and
//! decides (or advises on) who speaks next. Sessions, their message logs,
//! and counters persist in libSQL; a thin axum API exposes the whole
//! thing as JSON routes.

pub mod api;
pub mod config;
pub mod error;
pub mod export;
pub mod orchestration;
pub mod session;
pub mod store;

pub use config::OrchestratorConfig;
pub use error::{Error, Result};
