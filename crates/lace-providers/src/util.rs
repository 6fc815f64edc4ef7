//! Shared utility functions for provider adapters.

use lace_types::Error;

/// Convert a [`reqwest::Error`] into the workspace [`Error`] taxonomy (spec §7).
///
/// Timeouts and connect errors are transient (the engine's retry loop may
/// retry them); anything else — a malformed request the client built, a
/// body that failed to serialize — is fatal.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() {
        Error::ProviderTransient(e.to_string())
    } else {
        Error::ProviderFatal(e.to_string())
    }
}
