//! Coalescer library root.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod guard;
pub mod logging;
pub mod processor;
pub mod store;
pub mod web;

pub use cli::Commands;
pub use config::{load_settings, Settings};
pub use core::{Consumer, ConversationKey, Ingestor, QueuedEvent, SenderRole};
pub use error::{Error, Result};
pub use guard::{CooldownGuard, GuardedProcessor};
pub use processor::{Processor, Responder};
pub use store::{EventStore, SqliteEventStore};
