//! Shared data model for the `lace` workspace: identifiers, the event log's
//! entity shapes, tool/session/provider types, configuration, and the
//! cross-crate error taxonomy. No I/O lives here.

pub mod cancel;
pub mod capability;
pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod session;
pub mod stream;
pub mod thread;
pub mod tool;

pub use cancel::{CancelMap, CancelToken};
pub use capability::ProviderCapabilities;
pub use config::{Config, ConfigIssue, ConfigSeverity, ProviderConfig};
pub use error::{Error, Result};
pub use event::{Event, EventType};
pub use ids::{mint_thread_id, is_valid_thread_id, EventId};
pub use session::{ApprovalDecision, SessionPolicy, ToolPolicy};
pub use stream::{BoxStream, ProviderErrorKind, StreamEvent, Usage};
pub use thread::Thread;
pub use tool::{
    ContentBlock, Message, MessageContent, MessagePart, Role, ToolAnnotations, ToolCall,
    ToolDefinition, ToolResult,
};
