//! The shared error taxonomy (spec §7), used across every crate in the
//! workspace. Lower-level errors (`io::Error`, `serde_json::Error`, ...)
//! compose in via `#[from]` rather than each crate inventing its own kind.

/// Error kinds visible across crate boundaries, mirroring spec §7 exactly.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// C2: the event store's backing file is unwritable. The engine may
    /// elect to continue in-memory-only (spec §4.1).
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// C4: a provider error the engine should retry with backoff (spec §4.6).
    #[error("provider transient: {0}")]
    ProviderTransient(String),

    /// C4: a provider error that ends the turn (spec §4.6).
    #[error("provider fatal: {0}")]
    ProviderFatal(String),

    /// C5: no tool registered under this name.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// C5: arguments failed schema validation.
    #[error("invalid arguments for tool {tool}: {message}")]
    ToolInvalidArgs { tool: String, message: String },

    /// C5: the tool did not complete within its configured timeout.
    #[error("tool {0} timed out")]
    ToolTimeout(String),

    /// C5: the tool process/task ended abnormally.
    #[error("tool {tool} crashed: {message}")]
    ToolCrashed { tool: String, message: String },

    /// C6: the approval gate denied this call.
    #[error("approval denied for tool {0}")]
    ApprovalDenied(String),

    /// C8: the input queue rejected admission (e.g. over capacity).
    #[error("busy: {0}")]
    BusyRejected(String),

    /// C3: a thread ID failed `is_valid_thread_id` or refers to nothing
    /// the store knows about. Soft: callers map this to "create a new
    /// thread" rather than hard-failing (spec §4.2).
    #[error("invalid thread id: {0}")]
    InvalidThreadId(String),

    #[error("config: {0}")]
    Config(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the engine's retry loop (spec §4.6) should retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ProviderTransient(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
