//! Testing infrastructure shared by the `lace` workspace's integration
//! tests: a scripted LLM provider, a stub tool, and fixture builders for
//! the event store and engine plumbing.

pub mod fixtures;
pub mod provider;
pub mod tool;

pub use provider::{ScriptedProvider, ScriptedTurn};
pub use tool::StubTool;
