//! Services - safety logic and state management
//!
//! This module contains the core safety services:
//! - `engine` - Central event loop owning every state machine
//! - `deviation` - Distance check against the destination with cooldown
//! - `escalation` - Response-window state machine for raised deviations
//! - `voice_trigger` - Trigger phrase matching and evidence capture cycle
//! - `dispatcher` - Alert message template and batched delivery

pub mod deviation;
pub mod dispatcher;
pub mod engine;
pub mod escalation;
pub mod voice_trigger;

// Re-export commonly used types
pub use dispatcher::{AlertDispatcher, AlertMessage, DispatchOutcome, DispatchReport};
pub use engine::{Collaborators, Engine, EngineStatus};
