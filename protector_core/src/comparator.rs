//! Snapshot comparison for human review.
//!
//! The comparator diffs two [`ServerConfig`] snapshots and reports what a
//! reviewer needs to see before re-approving: which tools appeared, which
//! disappeared, and field-level annotations for the ones that changed. It is
//! a pure function of the two snapshots; the approval decision itself lives
//! in [`crate::evaluation`].

use crate::canonical::{canonical_schema, strip_trailing_newline};
use crate::model::{ServerConfig, ToolSpec};
use serde::Serialize;
use serde_json::Value;

/// Difference between two snapshots of the same server.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigDiff {
    /// Tools present only in the newer snapshot.
    pub added_tools: Vec<String>,
    /// Tools present only in the older snapshot.
    pub removed_tools: Vec<String>,
    /// Tools present in both whose configuration changed.
    pub modified_tools: Vec<ToolModification>,
    /// True when the instructions text changed, including appearing or
    /// disappearing entirely.
    pub instructions_change: bool,
}

impl ConfigDiff {
    pub fn is_empty(&self) -> bool {
        self.added_tools.is_empty()
            && self.removed_tools.is_empty()
            && self.modified_tools.is_empty()
            && !self.instructions_change
    }
}

/// Field-level annotations for one modified tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolModification {
    pub name: String,
    /// Human-readable descriptions of each detected change.
    pub changes: Vec<String>,
}

/// Diffs `old` against `new`. Tool ordering never influences the result;
/// both snapshots are name-keyed maps.
pub fn diff_configs(old: &ServerConfig, new: &ServerConfig) -> ConfigDiff {
    let mut diff = ConfigDiff {
        instructions_change: !instructions_equal(
            old.instructions.as_deref(),
            new.instructions.as_deref(),
        ),
        ..ConfigDiff::default()
    };

    for name in new.tools.keys() {
        if !old.tools.contains_key(name) {
            diff.added_tools.push(name.clone());
        }
    }
    for name in old.tools.keys() {
        if !new.tools.contains_key(name) {
            diff.removed_tools.push(name.clone());
        }
    }
    for (name, old_tool) in &old.tools {
        if let Some(new_tool) = new.tools.get(name) {
            let changes = diff_tool(old_tool, new_tool);
            if !changes.is_empty() {
                diff.modified_tools.push(ToolModification {
                    name: name.clone(),
                    changes,
                });
            }
        }
    }

    diff
}

fn instructions_equal(old: Option<&str>, new: Option<&str>) -> bool {
    match (old, new) {
        (None, None) => true,
        (Some(a), Some(b)) => strip_trailing_newline(a) == strip_trailing_newline(b),
        _ => false,
    }
}

/// Field-level comparison of one tool. Names are equal by construction.
fn diff_tool(old: &ToolSpec, new: &ToolSpec) -> Vec<String> {
    let mut changes = Vec::new();

    if strip_trailing_newline(&old.description) != strip_trailing_newline(&new.description) {
        changes.push("description changed".to_string());
    }

    match (canonical_schema(&old.input_schema), canonical_schema(&new.input_schema)) {
        (Ok(old_canon), Ok(new_canon)) if old_canon == new_canon => {}
        (Ok(_), Ok(_)) => changes.extend(diff_schema(&old.input_schema, &new.input_schema)),
        (Ok(_), Err(_)) => changes.push("input schema became malformed".to_string()),
        (Err(_), Ok(_)) => changes.push("input schema is no longer malformed".to_string()),
        (Err(_), Err(_)) => {}
    }

    changes
}

/// Property-level annotations for two structurally different schemas.
fn diff_schema(old: &Value, new: &Value) -> Vec<String> {
    let mut changes = Vec::new();

    let old_props = schema_properties(old);
    let new_props = schema_properties(new);
    let old_required = schema_required(old);
    let new_required = schema_required(new);

    for (key, old_prop) in &old_props {
        match new_props.get(key) {
            None => changes.push(format!("schema property '{}' removed", key)),
            Some(new_prop) if canonical_values_differ(old_prop, new_prop) => {
                changes.push(format!("schema property '{}' modified", key));
            }
            Some(_) => {}
        }
    }
    for key in new_props.keys() {
        if !old_props.contains_key(key) {
            changes.push(format!("schema property '{}' added", key));
        }
    }

    for key in &old_required {
        if !new_required.contains(key) {
            changes.push(format!("schema property '{}' no longer required", key));
        }
    }
    for key in &new_required {
        if !old_required.contains(key) {
            changes.push(format!("schema property '{}' now required", key));
        }
    }

    // Schemas can differ outside `properties`/`required` (type, enum,
    // additionalProperties, ...). Report a generic change rather than
    // swallowing it.
    if changes.is_empty() {
        changes.push("schema modified".to_string());
    }

    changes
}

fn canonical_values_differ(old: &Value, new: &Value) -> bool {
    crate::canonical::canonical_json(old) != crate::canonical::canonical_json(new)
}

fn schema_properties(schema: &Value) -> std::collections::BTreeMap<String, Value> {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn schema_required(schema: &Value) -> std::collections::BTreeSet<String> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
