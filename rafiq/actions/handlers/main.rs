//! Builtin operation handlers shipped with the production registry.

/// Shell command execution.
pub mod shell;

/// Filesystem create/read/append/delete/list operations.
pub mod files;

/// Host resource and date/time queries.
pub mod system;

/// Arithmetic expression evaluation.
pub mod calc;

/// Echo passthrough.
pub mod echo;

pub use calc::CalculatorHandler;
pub use echo::EchoHandler;
pub use files::{
    FileAppendHandler, FileDeleteHandler, FileListHandler, FileReadHandler, FileWriteHandler,
};
pub use shell::ShellCommandHandler;
pub use system::{ClockHandler, SystemInfoHandler};
