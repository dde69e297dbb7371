//! Per-container configuration and diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ResolutionWarning;

/// Prefix that marks a lookup as a request for a container method.
pub const DEFAULT_METHOD_PREFIX: &str = "$";

/// Container configuration.
///
/// Missing fields take their defaults when deserialized, so `{}` is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservableConfig {
    /// Names starting with this prefix resolve to container methods. Empty
    /// disables method lookup.
    pub method_prefix: String,
    /// Turn resolution warnings into errors.
    pub strict_debug: bool,
}

impl Default for ObservableConfig {
    fn default() -> Self {
        Self {
            method_prefix: DEFAULT_METHOD_PREFIX.to_string(),
            strict_debug: false,
        }
    }
}

impl ObservableConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn method_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.method_prefix = prefix.into();
        self
    }

    #[must_use]
    pub const fn strict_debug(mut self, strict: bool) -> Self {
        self.strict_debug = strict;
        self
    }
}

/// Receives resolution warnings from a non-strict container.
pub trait DiagnosticSink {
    /// Report a warning. Must not panic.
    fn warn(&self, warning: &ResolutionWarning);
}

/// Writes warnings through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn warn(&self, warning: &ResolutionWarning) {
        warn!(error = %warning.0, "field resolution failed");
    }
}

/// Discards warnings.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl DiagnosticSink for NoopSink {
    fn warn(&self, _warning: &ResolutionWarning) {}
}

pub(crate) struct SinkDebug<'a>(pub &'a dyn DiagnosticSink);

impl fmt::Debug for SinkDebug<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DiagnosticSink")
    }
}
