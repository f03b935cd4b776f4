//! Context Configuration
//!
//! Policies a [`Context`](crate::Context) applies to every primitive created
//! inside it. Options can be built in code or loaded from JSON, which is how
//! server hosts usually ship them:
//!
//! ```rust
//! use pulse_core::{ContextOptions, Equality, RenderMode};
//!
//! let opts = ContextOptions::from_json(r#"{ "mode": "server", "label": "req-42" }"#).unwrap();
//! assert_eq!(opts.mode, RenderMode::Server);
//! assert_eq!(opts.equality, Equality::SkipUnchanged);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default cap on reader runs within one flush.
pub const DEFAULT_MAX_FLUSH_ITERATIONS: usize = 10_000;

/// What a write does when the new value equals the old one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Equality {
    /// Drop writes that compare equal (`PartialEq`) to the current value.
    #[default]
    SkipUnchanged,
    /// Notify subscribers on every write.
    AlwaysNotify,
}

impl Equality {
    /// Whether replacing `old` with `new` must notify subscribers.
    pub fn changed<T: PartialEq>(self, old: &T, new: &T) -> bool {
        match self {
            Equality::SkipUnchanged => old != new,
            Equality::AlwaysNotify => true,
        }
    }
}

/// When pending effects run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Run affected effects synchronously: right after an unbatched write, or
    /// when the outermost batch exits.
    #[default]
    Sync,
    /// Queue affected effects until `flush()` is called. The context's
    /// schedule hook fires when the queue becomes non-empty.
    Manual,
}

/// How effects behave in this context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Effects subscribe to what they read and re-run on changes.
    #[default]
    Client,
    /// One-shot render: effects run exactly once and keep no subscriptions.
    Server,
}

/// Options for a reactive context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    /// Default equality policy for pulses and computeds.
    pub equality: Equality,
    /// When pending effects run.
    pub flush: FlushPolicy,
    /// Client (live) or server (one-shot) effects.
    pub mode: RenderMode,
    /// Name shown in logs and devtools snapshots.
    pub label: Option<String>,
    /// Reader runs allowed in a single flush before it is aborted.
    pub max_flush_iterations: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            equality: Equality::default(),
            flush: FlushPolicy::default(),
            mode: RenderMode::default(),
            label: None,
            max_flush_iterations: DEFAULT_MAX_FLUSH_ITERATIONS,
        }
    }
}

impl ContextOptions {
    /// Options for a one-shot server render.
    pub fn server() -> Self {
        Self {
            mode: RenderMode::Server,
            ..Self::default()
        }
    }

    /// Parse options from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_equality(mut self, equality: Equality) -> Self {
        self.equality = equality;
        self
    }

    pub fn with_flush(mut self, flush: FlushPolicy) -> Self {
        self.flush = flush;
        self
    }

    pub fn with_mode(mut self, mode: RenderMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_max_flush_iterations(mut self, limit: usize) -> Self {
        self.max_flush_iterations = limit.max(1);
        self
    }

    /// Whether effects keep live subscriptions.
    pub fn is_server(&self) -> bool {
        self.mode == RenderMode::Server
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReactiveError;

    #[test]
    fn defaults_are_client_sync_skip_unchanged() {
        let opts = ContextOptions::default();
        assert_eq!(opts.equality, Equality::SkipUnchanged);
        assert_eq!(opts.flush, FlushPolicy::Sync);
        assert_eq!(opts.mode, RenderMode::Client);
        assert_eq!(opts.max_flush_iterations, DEFAULT_MAX_FLUSH_ITERATIONS);
        assert!(!opts.is_server());
    }

    #[test]
    fn from_json_fills_missing_fields() {
        let opts =
            ContextOptions::from_json(r#"{"flush": "manual", "equality": "always_notify"}"#)
                .unwrap();
        assert_eq!(opts.flush, FlushPolicy::Manual);
        assert_eq!(opts.equality, Equality::AlwaysNotify);
        assert_eq!(opts.mode, RenderMode::Client);
        assert_eq!(opts.label, None);
    }

    #[test]
    fn from_json_rejects_unknown_modes() {
        let err = ContextOptions::from_json(r#"{"mode": "hybrid"}"#).unwrap_err();
        assert!(matches!(err, ReactiveError::Json(_)));
    }

    #[test]
    fn builder_methods_compose() {
        let opts = ContextOptions::server()
            .with_label("render")
            .with_max_flush_iterations(0);
        assert!(opts.is_server());
        assert_eq!(opts.label.as_deref(), Some("render"));
        assert_eq!(opts.max_flush_iterations, 1);
    }

    #[test]
    fn equality_policies() {
        assert!(!Equality::SkipUnchanged.changed(&1, &1));
        assert!(Equality::SkipUnchanged.changed(&1, &2));
        assert!(Equality::AlwaysNotify.changed(&1, &1));
    }
}
