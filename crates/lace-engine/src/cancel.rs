//! Re-exports [`lace_types::cancel`]. The cancellation primitives live in
//! `lace-types` (no I/O, shared by both `lace-engine` and `lace-tools`) so
//! that tool execution can race against the same token the engine cancels
//! (spec §4.4) without `lace-tools` depending on `lace-engine`.

pub use lace_types::cancel::{CancelMap, CancelToken};
