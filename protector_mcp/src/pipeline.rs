//! Response pipeline: sanitize, scan, quarantine.
//!
//! Every downstream tool result passes through here before it reaches the
//! host. Text content is ANSI-sanitized first; then, if a guardrail
//! provider is configured, the sanitized text is scanned. A suspicious
//! verdict swaps the payload for a quarantine reference — the original
//! response is persisted and only retrievable through the
//! `quarantine_release` built-in after out-of-band review.
//!
//! Fail-closed rules: a provider error or scan timeout counts as
//! suspicious, and a quarantine store that cannot persist the entry turns
//! into an error for the host rather than a delivered payload.

use protector_core::{sanitize, AnsiMode, QuarantineEntry, QuarantineStore, ServerIdentity};
use protector_guardrails::{GuardrailProvider, Verdict};
use rmcp::model::{CallToolResult, Content, ErrorData as McpError};
use std::sync::Arc;
use std::time::Duration;

/// Default bound on one guardrail scan.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-session response pipeline.
pub struct ResponsePipeline {
    identity: ServerIdentity,
    provider: Option<Arc<dyn GuardrailProvider>>,
    quarantine: Arc<dyn QuarantineStore>,
    ansi_mode: AnsiMode,
    scan_timeout: Duration,
}

impl ResponsePipeline {
    pub fn new(
        identity: ServerIdentity,
        provider: Option<Arc<dyn GuardrailProvider>>,
        quarantine: Arc<dyn QuarantineStore>,
        ansi_mode: AnsiMode,
        scan_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            provider,
            quarantine,
            ansi_mode,
            scan_timeout,
        }
    }

    /// Runs one tool result through sanitization and the configured
    /// guardrail. Returns what the host is allowed to see.
    pub async fn process(
        &self,
        tool_name: &str,
        request_args: Option<&serde_json::Map<String, serde_json::Value>>,
        result: CallToolResult,
    ) -> Result<CallToolResult, McpError> {
        let sanitized = self.sanitize_result(result);

        let Some(provider) = &self.provider else {
            return Ok(sanitized);
        };

        let args_value = request_args
            .map(|map| serde_json::Value::Object(map.clone()))
            .unwrap_or(serde_json::Value::Null);
        let text = collect_text(&sanitized);

        let verdict =
            match tokio::time::timeout(self.scan_timeout, provider.scan(&args_value, &text)).await
            {
                Ok(Ok(verdict)) => verdict,
                Ok(Err(error)) => {
                    tracing::warn!(provider = provider.name(), %error, "guardrail scan failed");
                    Verdict::suspicious("guardrail_error", error.to_string())
                }
                Err(_) => {
                    tracing::warn!(provider = provider.name(), "guardrail scan timed out");
                    Verdict::suspicious(
                        "guardrail_timeout",
                        format!("scan exceeded {:?}", self.scan_timeout),
                    )
                }
            };

        match verdict {
            Verdict::Clean => Ok(sanitized),
            Verdict::Suspicious { reason, evidence } => {
                self.quarantine_response(tool_name, args_value, sanitized, &reason, &evidence)
                    .await
            }
        }
    }

    async fn quarantine_response(
        &self,
        tool_name: &str,
        request_args: serde_json::Value,
        result: CallToolResult,
        reason: &str,
        evidence: &str,
    ) -> Result<CallToolResult, McpError> {
        let response = serde_json::to_value(&result).map_err(|error| {
            McpError::internal_error(format!("failed to serialize response: {}", error), None)
        })?;
        let verdict = serde_json::json!({
            "verdict": "suspicious",
            "reason": reason,
            "evidence": evidence,
        });

        let entry = QuarantineEntry::new(
            self.identity.clone(),
            tool_name,
            request_args,
            response,
            verdict,
        );
        let id = entry.id.clone();

        if let Err(error) = self.quarantine.append(entry).await {
            tracing::error!(%error, "failed to persist quarantine entry");
            return Err(McpError::internal_error(
                "response was flagged but could not be quarantined".to_string(),
                None,
            ));
        }

        tracing::warn!(
            tool = tool_name,
            quarantine_id = %id,
            reason = reason,
            "tool response quarantined"
        );

        Ok(CallToolResult::success(vec![Content::text(format!(
            "[quarantined: id={}, reason={}]",
            id, reason
        ))]))
    }

    fn sanitize_result(&self, mut result: CallToolResult) -> CallToolResult {
        result.content = result
            .content
            .iter()
            .map(|content| match content.as_text() {
                Some(text) => Content::text(sanitize(&text.text, self.ansi_mode)),
                None => content.clone(),
            })
            .collect();
        result
    }
}

fn collect_text(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|content| content.as_text().map(|text| text.text.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::result_text;
    use async_trait::async_trait;
    use protector_core::MemoryQuarantineStore;
    use protector_guardrails::GuardrailError;

    /// Flags any response containing `SECRET`.
    struct SecretScanner;

    #[async_trait]
    impl GuardrailProvider for SecretScanner {
        fn name(&self) -> &str {
            "secret-scanner"
        }

        async fn scan(
            &self,
            _request_args: &serde_json::Value,
            response_text: &str,
        ) -> Result<Verdict, GuardrailError> {
            if response_text.contains("SECRET") {
                Ok(Verdict::suspicious("stub_match", "found SECRET"))
            } else {
                Ok(Verdict::Clean)
            }
        }
    }

    /// Never finishes scanning.
    struct HangingScanner;

    #[async_trait]
    impl GuardrailProvider for HangingScanner {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn scan(
            &self,
            _request_args: &serde_json::Value,
            _response_text: &str,
        ) -> Result<Verdict, GuardrailError> {
            std::future::pending().await
        }
    }

    struct FailingScanner;

    #[async_trait]
    impl GuardrailProvider for FailingScanner {
        fn name(&self) -> &str {
            "failing"
        }

        async fn scan(
            &self,
            _request_args: &serde_json::Value,
            _response_text: &str,
        ) -> Result<Verdict, GuardrailError> {
            Err(GuardrailError::Provider("boom".to_string()))
        }
    }

    fn pipeline(
        provider: Option<Arc<dyn GuardrailProvider>>,
        quarantine: Arc<dyn QuarantineStore>,
        timeout: Duration,
    ) -> ResponsePipeline {
        ResponsePipeline::new(
            ServerIdentity::stdio("stub"),
            provider,
            quarantine,
            AnsiMode::Strip,
            timeout,
        )
    }

    fn text_result(text: &str) -> CallToolResult {
        CallToolResult::success(vec![Content::text(text.to_string())])
    }

    #[tokio::test]
    async fn no_provider_only_sanitizes() {
        let pipeline = pipeline(
            None,
            Arc::new(MemoryQuarantineStore::new()),
            DEFAULT_SCAN_TIMEOUT,
        );
        let out = pipeline
            .process("echo", None, text_result("\u{1b}[31mred\u{1b}[0m"))
            .await
            .unwrap();
        assert_eq!(result_text(&out), "red");
    }

    #[tokio::test]
    async fn clean_verdict_passes_response_through() {
        let pipeline = pipeline(
            Some(Arc::new(SecretScanner)),
            Arc::new(MemoryQuarantineStore::new()),
            DEFAULT_SCAN_TIMEOUT,
        );
        let out = pipeline
            .process("echo", None, text_result("all good"))
            .await
            .unwrap();
        assert_eq!(result_text(&out), "all good");
    }

    #[tokio::test]
    async fn suspicious_response_is_quarantined_and_referenced() {
        let quarantine = Arc::new(MemoryQuarantineStore::new());
        let pipeline = pipeline(
            Some(Arc::new(SecretScanner)),
            quarantine.clone(),
            DEFAULT_SCAN_TIMEOUT,
        );

        let args: serde_json::Map<String, serde_json::Value> =
            serde_json::json!({"x": 1}).as_object().unwrap().clone();
        let out = pipeline
            .process("echo", Some(&args), text_result("SECRET payload"))
            .await
            .unwrap();

        let text = result_text(&out);
        assert!(text.starts_with("[quarantined: id="));
        assert!(text.contains("reason=stub_match"));
        assert!(!text.contains("SECRET"));

        // The original payload is in the store, unreleased.
        let entries = quarantine.list(true).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tool_name, "echo");
        assert_eq!(entries[0].request_args, serde_json::json!({"x": 1}));
        assert!(entries[0].response.to_string().contains("SECRET payload"));
        assert!(!entries[0].released);
    }

    #[tokio::test]
    async fn scan_timeout_is_treated_as_suspicious() {
        let quarantine = Arc::new(MemoryQuarantineStore::new());
        let pipeline = pipeline(
            Some(Arc::new(HangingScanner)),
            quarantine.clone(),
            Duration::from_millis(50),
        );

        let out = pipeline
            .process("echo", None, text_result("whatever"))
            .await
            .unwrap();
        assert!(result_text(&out).contains("reason=guardrail_timeout"));
        assert_eq!(quarantine.list(true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn provider_error_is_treated_as_suspicious() {
        let quarantine = Arc::new(MemoryQuarantineStore::new());
        let pipeline = pipeline(
            Some(Arc::new(FailingScanner)),
            quarantine.clone(),
            DEFAULT_SCAN_TIMEOUT,
        );

        let out = pipeline
            .process("echo", None, text_result("whatever"))
            .await
            .unwrap();
        assert!(result_text(&out).contains("reason=guardrail_error"));
    }
}
