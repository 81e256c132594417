//! Core module - debounced conversation queue.
//!
//! Events are buffered per conversation and handed to a processor once the
//! conversation has been quiet for the debounce window. At most one task
//! runs per conversation, and a conversation that keeps failing is evicted.

pub mod clock;
pub mod consumer;
pub mod event;
pub mod ingest;
pub mod pool;
pub mod retry;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use consumer::{Consumer, CycleReport};
pub use event::{ConversationGroup, ConversationKey, EntryId, QueuedEvent, SenderRole, StoredEvent};
pub use ingest::{Admission, InboundEvent, Ingestor};
pub use pool::{Admit, Completion, DispatchPool};
pub use retry::RetryTracker;
pub use scheduler::{DebounceScheduler, ScanPlan};
