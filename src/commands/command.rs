//! Command trait definition for CLI commands.

use anyhow::Result;
use enum_dispatch::enum_dispatch;

/// Trait implemented by all proactor CLI commands.
///
/// `command_line` is the full invocation, logged by commands that record how they
/// were run.
#[enum_dispatch]
pub trait Command {
    #[allow(clippy::missing_errors_doc)]
    fn execute(&self, command_line: &str) -> Result<()>;
}
