//! Built-in pattern-matching guardrail.
//!
//! A deterministic regex scanner for the well-known families of prompt
//! injection that show up in tool responses: instruction-override phrasing,
//! role hijacking, system-prompt extraction, and exfiltration directives.
//! Structural matching keeps the provider explainable and dependency-free;
//! anything smarter plugs in as its own provider.

use crate::{GuardrailError, GuardrailProvider, Verdict};
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};

struct InjectionPattern {
    pattern: Regex,
    /// Rule name reported as evidence to the reviewer.
    rule: &'static str,
}

fn pattern(rule: &'static str, expression: &str) -> InjectionPattern {
    InjectionPattern {
        pattern: RegexBuilder::new(expression)
            .case_insensitive(true)
            .build()
            .expect("built-in pattern must compile"),
        rule,
    }
}

/// Regex-based injection scanner, registered as `pattern`.
pub struct PatternGuardrail {
    patterns: Vec<InjectionPattern>,
}

impl PatternGuardrail {
    pub fn new() -> Self {
        Self {
            patterns: vec![
                pattern(
                    "instruction-override",
                    r"(ignore|disregard|forget)\s+(all\s+|any\s+)?(previous|prior|above|earlier)\s+(instructions|prompts|rules|directions)",
                ),
                pattern(
                    "instruction-override",
                    r"new\s+(instructions|system\s+prompt)\s*:",
                ),
                pattern(
                    "role-hijack",
                    r"you\s+are\s+(now|no\s+longer)\s+(a|an|in)\b",
                ),
                pattern("role-hijack", r"\bdo\s+anything\s+now\b|\bDAN\s+mode\b"),
                pattern(
                    "prompt-extraction",
                    r"(show|reveal|print|repeat)\s+(me\s+)?(your|the)\s+(system\s+)?(prompt|instructions)",
                ),
                pattern(
                    "exfiltration",
                    r"(send|post|upload|forward)\s+(this|the|all)\s+(data|conversation|contents?|results?)\s+to\b",
                ),
                pattern(
                    "tool-steering",
                    r"(always|must)\s+(call|use|invoke)\s+the\s+\S+\s+tool\s+(first|before)",
                ),
            ],
        }
    }
}

impl Default for PatternGuardrail {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GuardrailProvider for PatternGuardrail {
    fn name(&self) -> &str {
        "pattern"
    }

    async fn scan(
        &self,
        _request_args: &serde_json::Value,
        response_text: &str,
    ) -> Result<Verdict, GuardrailError> {
        for entry in &self.patterns {
            if let Some(found) = entry.pattern.find(response_text) {
                return Ok(Verdict::suspicious(
                    "pattern_match",
                    format!("rule '{}' matched: {:?}", entry.rule, found.as_str()),
                ));
            }
        }
        Ok(Verdict::Clean)
    }
}
