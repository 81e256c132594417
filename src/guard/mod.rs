//! Cooldown and echo suppression for the automated reply path.

pub mod cooldown;
pub mod pipeline;

pub use cooldown::{AutomatedReply, CooldownGuard, CooldownState, Screening};
pub use pipeline::{GuardedProcessor, Reply};
