//! `lace-engine`'s own error type, composing into [`lace_types::Error`] at
//! the crate boundary (SPEC_FULL.md Ambient stack / Error handling).

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("busy: {0}")]
    BusyRejected(String),

    #[error("invalid thread id: {0}")]
    InvalidThreadId(String),

    #[error("provider transient: {0}")]
    ProviderTransient(String),

    #[error("provider fatal: {0}")]
    ProviderFatal(String),

    #[error("delegation depth limit exceeded (max {max})")]
    DelegationDepthExceeded { max: u32 },

    #[error(transparent)]
    Store(#[from] lace_store::Error),

    #[error(transparent)]
    Tools(#[from] lace_tools::Error),
}

impl From<Error> for lace_types::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::BusyRejected(msg) => lace_types::Error::BusyRejected(msg),
            Error::InvalidThreadId(id) => lace_types::Error::InvalidThreadId(id),
            Error::ProviderTransient(msg) => lace_types::Error::ProviderTransient(msg),
            Error::ProviderFatal(msg) => lace_types::Error::ProviderFatal(msg),
            Error::DelegationDepthExceeded { max } => {
                lace_types::Error::Other(format!("delegation depth limit exceeded (max {max})"))
            }
            Error::Store(e) => e.into(),
            Error::Tools(e) => e.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
