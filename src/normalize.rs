//! Reconciles the loosely shaped webhook response into `AnalysisResult`.
//!
//! Required fields are checked with the same truthiness the upstream
//! contract was written against: `null`, `false`, `0`, and `""` count as
//! missing while an empty array does not.  Individual findings are not
//! validated and pass through untouched.

use serde_json::{Map, Value};

use crate::error::RelayError;
use crate::{AnalysisResult, Decision, FindingEntry};

/// Human-readable spelling some webhook flows emit for `needs_more_info`.
const NEEDS_MORE_INFO_SPACED: &str = "needs more info";

const REQUIRED_FIELDS: [&str; 3] = ["decision", "summary", "findings"];

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Canonical decision for an upstream spelling.  Only the spaced form of
/// `needs_more_info` is rewritten; everything else must already match.
pub fn canonical_decision(raw: &str) -> Option<Decision> {
    let raw = if raw == NEEDS_MORE_INFO_SPACED {
        "needs_more_info"
    } else {
        raw
    };
    match raw {
        "approve" => Some(Decision::Approve),
        "reject" => Some(Decision::Reject),
        "needs_more_info" => Some(Decision::NeedsMoreInfo),
        _ => None,
    }
}

/// Turn the parsed webhook payload into an `AnalysisResult` or explain what
/// is wrong with it.
pub fn normalize(value: Value) -> Result<AnalysisResult, RelayError> {
    let mut obj: Map<String, Value> = match value {
        Value::Object(map) => map,
        _ => return Err(RelayError::Schema("response is not a JSON object".into())),
    };

    let missing: Vec<&str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|f| !obj.get(*f).map(is_truthy).unwrap_or(false))
        .collect();
    if !missing.is_empty() {
        return Err(RelayError::Schema(format!(
            "missing required field(s): {}",
            missing.join(", ")
        )));
    }

    let decision = match obj.get("decision") {
        Some(Value::String(s)) => canonical_decision(s)
            .ok_or_else(|| RelayError::Schema(format!("unrecognized decision '{}'", s)))?,
        _ => return Err(RelayError::Schema("decision must be a string".into())),
    };
    let summary = match obj.remove("summary") {
        Some(Value::String(s)) => s,
        _ => return Err(RelayError::Schema("summary must be a string".into())),
    };
    let findings = match obj.remove("findings") {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(FindingEntry::from_value)
            .collect::<Vec<_>>(),
        _ => return Err(RelayError::Schema("findings must be an array".into())),
    };

    Ok(AnalysisResult {
        decision,
        summary,
        findings,
    })
}
