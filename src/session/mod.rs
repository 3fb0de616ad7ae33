//! Session domain: data model and lifecycle service.

pub mod model;
pub mod service;

pub use model::{
    ADDRESSEE_ALL, CafeType, Envelope, EpistemicState, Message, OrchestrationMode, Participant,
    Session, SessionConfig, SessionStats, SessionStatus, StopCondition,
};
pub use service::{SessionService, SessionStatistics};
