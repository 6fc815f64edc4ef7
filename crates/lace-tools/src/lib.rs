//! Tool registry, approval gate, and executor (spec §4.4, §4.5).

pub mod approval;
pub mod builtin;
pub mod error;
pub mod executor;
pub mod registry;
pub mod tool;

pub use approval::{ApprovalGate, RiskHint, StaticGate};
pub use error::{Error, Result};
pub use executor::{ToolExecutor, ToolExecutorConfig};
pub use registry::ToolRegistry;
pub use tool::Tool;
