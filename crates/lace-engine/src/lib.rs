//! The agent turn engine (spec §4.2-§4.10): thread management, the event
//! bus, cancellation, token accounting, the turn state machine, the input
//! queue, and delegation. Everything above this crate talks to a thread
//! only through a `String` ID; everything below it is `lace-store`,
//! `lace-providers`, and `lace-tools`.

pub mod approval;
pub mod bus;
pub mod cancel;
pub mod delegate;
pub mod error;
pub mod queue;
pub mod thread_manager;
pub mod tokens;
pub mod turn;

pub use approval::InteractiveGate;
pub use bus::{BusEvent, EventBus, TurnProgress};
pub use cancel::{CancelMap, CancelToken};
pub use delegate::{DelegateTool, DelegationCoordinator};
pub use error::{Error, Result};
pub use queue::{InputQueue, QueueStats, QueuedMessage};
pub use thread_manager::{SharedThreadManager, ThreadManager};
pub use tokens::CurrentTurnMetrics;
pub use turn::{RetryConfig, TurnEngine, TurnEngineConfig, TurnOutcome};
