//! `lace-tools`'s own error type, composing into [`lace_types::Error`] at
//! the crate boundary (SPEC_FULL.md Ambient stack / Error handling).

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("tool {name} not in allowed_tools for this session")]
    NotAllowed { name: String },

    #[error("denied by approval policy")]
    Denied,

    #[error("approval required but no gate configured")]
    NoGateConfigured,

    #[error("invalid arguments for tool {tool}: {message}")]
    InvalidArgs { tool: String, message: String },

    #[error("tool {0} timed out")]
    Timeout(String),

    #[error("tool {tool} crashed: {message}")]
    Crashed { tool: String, message: String },

    #[error("schema compile error for tool {tool}: {message}")]
    BadSchema { tool: String, message: String },
}

impl From<Error> for lace_types::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound(name) => lace_types::Error::ToolNotFound(name),
            Error::NotAllowed { name } => lace_types::Error::ToolNotFound(name),
            Error::Denied => lace_types::Error::ApprovalDenied("denied by approval policy".into()),
            Error::NoGateConfigured => {
                lace_types::Error::ApprovalDenied("approval required but no gate configured".into())
            }
            Error::InvalidArgs { tool, message } => lace_types::Error::ToolInvalidArgs { tool, message },
            Error::Timeout(name) => lace_types::Error::ToolTimeout(name),
            Error::Crashed { tool, message } => lace_types::Error::ToolCrashed { tool, message },
            Error::BadSchema { tool, message } => {
                lace_types::Error::ToolCrashed { tool, message: format!("bad schema: {message}") }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
