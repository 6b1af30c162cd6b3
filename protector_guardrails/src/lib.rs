//! Guardrail providers: pluggable scanners for downstream tool responses.
//!
//! A provider looks at one tool response (plus the request arguments that
//! produced it) and returns a [`Verdict`]. The wrapper quarantines anything
//! a provider flags; providers never see or influence requests. Providers
//! register in a [`ProviderRegistry`] at process start and are selected by
//! name via `--guardrail-provider`.

mod pattern;

pub use pattern::PatternGuardrail;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Result of scanning one tool response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "lowercase")]
pub enum Verdict {
    /// Nothing objectionable found; the response may go to the host.
    Clean,
    /// The response looks like a prompt-injection attempt and must be
    /// quarantined.
    Suspicious {
        /// Short machine-readable reason, e.g. `"pattern_match"` or
        /// `"guardrail_timeout"`.
        reason: String,
        /// Human-readable evidence for the reviewer (matched text, rule
        /// name, provider diagnostics).
        evidence: String,
    },
}

impl Verdict {
    pub fn suspicious(reason: impl Into<String>, evidence: impl Into<String>) -> Self {
        Verdict::Suspicious {
            reason: reason.into(),
            evidence: evidence.into(),
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, Verdict::Clean)
    }
}

/// Errors a provider may raise while scanning.
///
/// The pipeline treats any provider error as `Suspicious`; a scanner that
/// cannot run is not allowed to fail open.
#[derive(Debug, Error)]
pub enum GuardrailError {
    #[error("guardrail provider failed: {0}")]
    Provider(String),
}

/// A registered response scanner.
#[async_trait]
pub trait GuardrailProvider: Send + Sync {
    /// Stable name used for `--guardrail-provider` selection.
    fn name(&self) -> &str;

    /// Scans one response. `request_args` is the arguments object of the
    /// originating `tools/call`; `response_text` is the concatenated text
    /// content of the downstream result.
    async fn scan(
        &self,
        request_args: &serde_json::Value,
        response_text: &str,
    ) -> Result<Verdict, GuardrailError>;
}

/// Name-keyed set of providers, assembled once at startup.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn GuardrailProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every built-in provider.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PatternGuardrail::new()));
        registry
    }

    /// Registers a provider under its own name. A later registration with
    /// the same name replaces the earlier one.
    pub fn register(&mut self, provider: Arc<dyn GuardrailProvider>) {
        let name = provider.name().to_string();
        if self.providers.insert(name.clone(), provider).is_some() {
            tracing::warn!(provider = %name, "guardrail provider re-registered");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GuardrailProvider>> {
        self.providers.get(name).cloned()
    }

    /// Provider names in stable (sorted) order.
    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}
