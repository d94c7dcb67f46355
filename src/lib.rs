//! Socratic math tutor core.
//!
//! The crate owns the live conversation state machine ([`session::Tutor`]),
//! the saved-session registry, practice-problem completion tracking and the
//! speech playback controller. The language-model service and the durable
//! key-value store are injected through the [`gateway::TutorGateway`] and
//! [`store::KeyValueStore`] traits so hosts and tests can substitute their own.

pub mod audio;
pub mod completion;
pub mod config;
pub mod error;
pub mod gateway;
pub mod practice;
pub mod registry;
pub mod render;
pub mod session;
pub mod share;
pub mod store;
pub mod types;

pub use error::TutorError;
pub use session::{PendingReply, ReplyOutcome, Tutor};
pub use types::{ChatTurn, ImageData, ReasoningMode, Speaker, View};
