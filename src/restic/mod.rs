//! restic integration: child environment, argument contracts, output
//! classification and the operation runner.

pub mod classify;
pub mod command;
pub mod env;
pub mod process;
pub mod runner;

pub use classify::{LockAge, OutputClassifier};
pub use command::{CommandBuilder, Invocation, RetentionPolicy, resolve_binary};
pub use process::{OperationLauncher, ProcessEvent, ProcessExit, ProcessLauncher, StreamKind};
pub use runner::{Launch, OperationRunner};

use regex::Regex;

/// Compile a hardcoded pattern. An invalid pattern is logged and then
/// matches nothing.
pub(crate) fn compile_regex(pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .inspect_err(|e| tracing::error!("invalid built-in pattern {pattern:?}: {e}"))
        .ok()
}

pub(crate) fn is_match(regex: &Option<Regex>, text: &str) -> bool {
    regex.as_ref().is_some_and(|regex| regex.is_match(text))
}
