//! Built-in tool implementations, registered by `lace-cli` at startup.

pub mod exec;
pub mod file_read;

pub use exec::ExecTool;
pub use file_read::FileReadTool;
