//! Error accumulation for structural walks
//!
//! Parsing a damaged image should characterize every problem rather than
//! stop at the first one, so walkers record messages here and keep going
//! whenever it is still safe to do so. Callers decide afterwards whether any
//! recorded error is fatal for them.

use machscope_core::config::DiagnosticsConfig;
use std::collections::BTreeSet;
use tracing::warn;

/// Accumulator of distinct error messages, scoped to one logical operation
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    prefix: Option<String>,
    errors: BTreeSet<String>,
    verbose: bool,
}

impl Diagnostics {
    /// Quiet accumulator with no prefix
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulator that echoes every new error, tagged with `prefix`
    pub fn with_prefix(prefix: impl Into<String>, verbose: bool) -> Self {
        Self {
            prefix: Some(prefix.into()),
            errors: BTreeSet::new(),
            verbose,
        }
    }

    pub fn from_config(config: &DiagnosticsConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            errors: BTreeSet::new(),
            verbose: config.verbose,
        }
    }

    /// Record an error. Repeats of an already recorded message are dropped.
    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.verbose {
            match &self.prefix {
                Some(prefix) => warn!("[{}] {}", prefix, message),
                None => warn!("{}", message),
            }
        }
        self.errors.insert(message);
    }

    pub fn has_error(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn no_error(&self) -> bool {
        !self.has_error()
    }

    /// Debug-build check for walks over input already known to be well formed
    pub fn assert_no_error(&self) {
        debug_assert!(self.no_error(), "unexpected diagnostics: {}", self.error_message());
    }

    /// Take over the errors of a scoped sub-operation
    pub fn absorb(&mut self, other: Diagnostics) {
        for message in other.errors {
            self.error(message);
        }
    }

    pub fn clear_error(&mut self) {
        self.errors.clear();
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(String::as_str)
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.errors.iter().any(|e| e.contains(needle))
    }

    /// All recorded errors, one per line
    pub fn error_message(&self) -> String {
        let mut message = String::new();
        for error in &self.errors {
            message.push_str(error);
            message.push('\n');
        }
        message
    }
}
