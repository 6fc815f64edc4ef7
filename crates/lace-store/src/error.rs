//! `lace-store`'s own error type, composing into [`lace_types::Error`] at
//! the crate boundary (SPEC_FULL.md Ambient stack / Error handling).

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid thread id: {0}")]
    InvalidThreadId(String),

    #[error("thread not found: {0}")]
    ThreadNotFound(String),

    #[error("event type {0} is not persistable")]
    NotPersistable(&'static str),

    #[error("internal: {0}")]
    Internal(String),
}

impl From<Error> for lace_types::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Sqlite(e) => lace_types::Error::StoreUnavailable(e.to_string()),
            Error::Serialization(e) => lace_types::Error::StoreUnavailable(e.to_string()),
            Error::InvalidThreadId(id) => lace_types::Error::InvalidThreadId(id),
            Error::ThreadNotFound(id) => lace_types::Error::InvalidThreadId(id),
            Error::NotPersistable(tag) => lace_types::Error::Other(format!(
                "event type {tag} is not persistable"
            )),
            Error::Internal(msg) => lace_types::Error::StoreUnavailable(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
