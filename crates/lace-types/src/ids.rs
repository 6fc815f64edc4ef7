//! Thread and event identifiers (spec §3.1, §6.1).
//!
//! Thread IDs are opaque sortable strings: a literal prefix, a UTC date
//! (`YYYYMMDD`), and a 6-character base-36 random suffix. Event IDs are
//! monotonically increasing integers, unique within a thread — minted by
//! the event store, not here.

use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;

/// Per-event ID: monotonically increasing within a thread, assigned by the store.
pub type EventId = i64;

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const SUFFIX_LEN: usize = 6;

fn thread_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^lace_\d{8}_[a-z0-9]{6}$").expect("valid regex"))
}

/// Mint a fresh thread ID: `lace_<YYYYMMDD>_<6 random base-36 chars>`.
///
/// Collision resistance is ~36^6 (~2.2×10^9) per day; callers that detect a
/// collision against the store (vanishingly unlikely) should simply call
/// this again.
pub fn mint_thread_id() -> String {
    let date = Utc::now().format("%Y%m%d");
    // uuid::new_v4 is our source of randomness (already a workspace dep); we
    // fold its bytes down to the 6-char base-36-ish alphabet the spec wants.
    let raw = uuid::Uuid::new_v4();
    let mut suffix = String::with_capacity(SUFFIX_LEN);
    for byte in raw.as_bytes().iter().take(SUFFIX_LEN) {
        let idx = (*byte as usize) % SUFFIX_ALPHABET.len();
        suffix.push(SUFFIX_ALPHABET[idx] as char);
    }
    format!("lace_{date}_{suffix}")
}

/// Validate a thread ID against the normative regex in spec §3.1/§6.1.
pub fn is_valid_thread_id(id: &str) -> bool {
    thread_id_regex().is_match(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_are_valid() {
        for _ in 0..1000 {
            let id = mint_thread_id();
            assert!(is_valid_thread_id(&id), "invalid id: {id}");
        }
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(!is_valid_thread_id("lace_2026072_abcdef"));
        assert!(!is_valid_thread_id("lace_20260726_ABCDEF"));
        assert!(!is_valid_thread_id("notlace_20260726_abcdef"));
        assert!(!is_valid_thread_id("lace_20260726_abcde"));
    }

    #[test]
    fn minted_ids_are_distinct() {
        let a = mint_thread_id();
        let b = mint_thread_id();
        assert_ne!(a, b);
    }
}
