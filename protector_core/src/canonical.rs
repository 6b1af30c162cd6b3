//! Canonical serialization and hashing of configuration snapshots.
//!
//! Semantically identical tool schemas must hash identically, or a
//! downstream server could dodge drift detection by re-ordering object keys
//! or shuffling its `required` list. Canonicalization makes the hash input
//! deterministic:
//!
//! - object keys are sorted lexicographically at every depth;
//! - `required` arrays of strings are sorted and deduplicated (the member
//!   list is a set, the declared order carries no meaning);
//! - all other arrays keep their declared order (`enum`, `oneOf`, `anyOf`
//!   and friends are order-significant in JSON Schema);
//! - numeric literals keep their parsed form, so `1` and `1.0` stay
//!   distinct;
//! - no insignificant whitespace.
//!
//! Hashing always runs on the raw, unsanitized bytes. ANSI stripping happens
//! on the host-bound copy only, so escape-sequence games cannot produce a
//! stable hash for changing content.

use crate::error::{ProtectorError, Result};
use crate::model::{ServerConfig, ToolSpec};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hash value stored for a server whose snapshot carries no instructions.
///
/// Deliberately not a hex digest so it can never collide with the hash of
/// any actual instructions text, including the empty string.
pub const ABSENT_INSTRUCTIONS: &str = "absent";

/// Strips at most one trailing newline. Instructions and descriptions are
/// compared after this normalization; everything else is byte-exact.
pub fn strip_trailing_newline(text: &str) -> &str {
    text.strip_suffix('\n').unwrap_or(text)
}

/// Renders a JSON value in canonical form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, false, &mut out);
    out
}

/// Canonical form of a tool input schema.
///
/// Returns an error if the schema is not a JSON object; a downstream that
/// sends a malformed schema is handled by the caller as drift, never as a
/// crash.
pub fn canonical_schema(schema: &Value) -> Result<String> {
    match schema {
        Value::Object(_) => Ok(canonical_json(schema)),
        _ => Err(ProtectorError::MalformedSchema(String::new())),
    }
}

/// SHA-256 of the canonical `[name, description, schema]` triple, as
/// lowercase hex.
pub fn hash_tool(tool: &ToolSpec) -> Result<String> {
    if !tool.input_schema.is_object() {
        return Err(ProtectorError::MalformedSchema(tool.name.clone()));
    }
    let triple = Value::Array(vec![
        Value::String(tool.name.clone()),
        Value::String(strip_trailing_newline(&tool.description).to_string()),
        tool.input_schema.clone(),
    ]);
    Ok(hex_digest(canonical_json(&triple).as_bytes()))
}

/// Hash of a server's instructions, or [`ABSENT_INSTRUCTIONS`] when the
/// server declared none.
pub fn hash_instructions(instructions: Option<&str>) -> String {
    match instructions {
        Some(text) => hex_digest(strip_trailing_newline(text).as_bytes()),
        None => ABSENT_INSTRUCTIONS.to_string(),
    }
}

/// Hash of a full snapshot's instructions, convenience over
/// [`hash_instructions`].
pub fn hash_snapshot_instructions(snapshot: &ServerConfig) -> String {
    hash_instructions(snapshot.instructions.as_deref())
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

fn is_string_array(value: &Value) -> bool {
    value
        .as_array()
        .is_some_and(|items| items.iter().all(Value::is_string))
}

/// Serializes a value canonically. `as_required_set` is true only for the
/// direct `required` member of an object when it holds nothing but strings;
/// that one array is emitted as a sorted, deduplicated set.
fn write_canonical(value: &Value, as_required_set: bool, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        // `serde_json::Number` keeps integer and float representations
        // apart, which preserves the literal-form distinction (`1` vs
        // `1.0`) the comparator depends on.
        Value::Number(number) => out.push_str(&number.to_string()),
        Value::String(text) => write_json_string(text, out),
        Value::Array(items) => {
            out.push('[');
            if as_required_set {
                let mut members: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                members.sort_unstable();
                members.dedup();
                for (index, member) in members.iter().enumerate() {
                    if index > 0 {
                        out.push(',');
                    }
                    write_json_string(member, out);
                }
            } else {
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        out.push(',');
                    }
                    write_canonical(item, false, out);
                }
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (index, (key, child)) in entries.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_json_string(key, out);
                out.push(':');
                write_canonical(child, *key == "required" && is_string_array(child), out);
            }
            out.push('}');
        }
    }
}

fn write_json_string(text: &str, out: &mut String) {
    // serde_json's escaping is deterministic and minimal; reuse it rather
    // than maintaining a second escaper.
    out.push_str(&serde_json::to_string(text).expect("string serialization cannot fail"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_keys_sort_at_every_depth() {
        let value = json!({"z": 1, "a": {"y": 2, "b": 3}});
        assert_eq!(canonical_json(&value), r#"{"a":{"b":3,"y":2},"z":1}"#);
    }

    #[test]
    fn required_is_a_sorted_deduplicated_set() {
        let a = json!({"type": "object", "required": ["b", "a", "b"]});
        let b = json!({"type": "object", "required": ["a", "b"]});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn enum_order_is_preserved() {
        let a = json!({"enum": ["b", "a"]});
        let b = json!({"enum": ["a", "b"]});
        assert_ne!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn required_named_property_is_not_treated_as_a_set() {
        // A property that happens to be called "required" holds a schema,
        // not a member list.
        let value = json!({"properties": {"required": {"enum": ["b", "a"]}}});
        assert!(canonical_json(&value).contains(r#"["b","a"]"#));
    }

    #[test]
    fn numeric_literal_form_is_preserved() {
        let int_form: Value = serde_json::from_str(r#"{"minimum": 1}"#).unwrap();
        let float_form: Value = serde_json::from_str(r#"{"minimum": 1.0}"#).unwrap();
        assert_ne!(canonical_json(&int_form), canonical_json(&float_form));
    }

    #[test]
    fn tool_hash_is_order_insensitive() {
        let a = ToolSpec::new(
            "echo",
            "Echo input",
            json!({"type": "object", "properties": {"x": {"type": "string"}}, "required": ["x"]}),
        );
        let b = ToolSpec::new(
            "echo",
            "Echo input",
            json!({"required": ["x"], "properties": {"x": {"type": "string"}}, "type": "object"}),
        );
        assert_eq!(hash_tool(&a).unwrap(), hash_tool(&b).unwrap());
    }

    #[test]
    fn tool_hash_sees_description_bytes() {
        let clean = ToolSpec::new("echo", "Echo input", json!({"type": "object"}));
        let ansi = ToolSpec::new("echo", "Echo input\u{1b}[31m", json!({"type": "object"}));
        assert_ne!(hash_tool(&clean).unwrap(), hash_tool(&ansi).unwrap());
    }

    #[test]
    fn trailing_newline_is_insignificant() {
        let plain = ToolSpec::new("echo", "Echo input", json!({"type": "object"}));
        let newline = ToolSpec::new("echo", "Echo input\n", json!({"type": "object"}));
        assert_eq!(hash_tool(&plain).unwrap(), hash_tool(&newline).unwrap());
    }

    #[test]
    fn malformed_schema_is_an_error_not_a_panic() {
        let bad = ToolSpec::new("broken", "Bad schema", json!("not-an-object"));
        assert!(matches!(
            hash_tool(&bad),
            Err(ProtectorError::MalformedSchema(name)) if name == "broken"
        ));
    }

    #[test]
    fn instructions_hashes_distinguish_absent_and_empty() {
        assert_eq!(hash_instructions(None), ABSENT_INSTRUCTIONS);
        assert_ne!(hash_instructions(Some("")), ABSENT_INSTRUCTIONS);
        assert_ne!(hash_instructions(Some("a")), hash_instructions(Some("b")));
        assert_eq!(hash_instructions(Some("a\n")), hash_instructions(Some("a")));
    }
}
