//! Schema-on-read for stored cache blobs
//!
//! Stored `cacheData` is never trusted: the validator walks the blob one
//! step and one assertion at a time, so a single malformed assertion only
//! invalidates itself instead of failing the whole entry.

use crate::error::CacheError;
use crate::model::{
    AssertionCacheEntry, AssertionIndex, StepCacheEntry, StepConclusion, StepIndex,
};
use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde_json::Value;

static ASSERTION_SCHEMA: Lazy<Result<JSONSchema, String>> = Lazy::new(|| {
    let schema = serde_json::to_value(schemars::schema_for!(AssertionCacheEntry))
        .map_err(|e| e.to_string())?;
    JSONSchema::compile(&schema).map_err(|e| e.to_string())
});

/// A step as found in storage, assertions still undecoded
#[derive(Debug, Clone)]
pub(crate) struct StoredStep<'a> {
    pub(crate) conclusion: StepConclusion,
    pub(crate) step_id: Option<String>,
    pub(crate) assertions: Vec<(AssertionIndex, &'a Value)>,
}

/// Split a stored blob into its steps, in numeric index order
///
/// # Errors
/// Fails when the blob has no `steps` object or a key is not an index;
/// nothing in such a blob can be attributed to a step.
pub(crate) fn stored_steps(data: &Value) -> Result<Vec<(StepIndex, &Value)>, CacheError> {
    let steps = data
        .get("steps")
        .and_then(Value::as_object)
        .ok_or_else(|| CacheError::InvalidData("missing steps object".to_string()))?;

    let mut out = steps
        .iter()
        .map(|(key, payload)| {
            key.parse::<StepIndex>()
                .map(|index| (index, payload))
                .map_err(|_| CacheError::InvalidData(format!("step key '{key}' is not an index")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    out.sort_by_key(|(index, _)| *index);
    Ok(out)
}

/// Read one step's envelope
///
/// # Errors
/// Fails when the conclusion is missing or non-terminal, or the assertions
/// map is malformed.
pub(crate) fn stored_step(payload: &Value) -> Result<StoredStep<'_>, CacheError> {
    let obj = payload
        .as_object()
        .ok_or_else(|| CacheError::InvalidData("step is not an object".to_string()))?;

    let conclusion = obj
        .get("conclusion")
        .and_then(Value::as_str)
        .and_then(StepConclusion::from_terminal)
        .ok_or_else(|| CacheError::InvalidData("step has no terminal conclusion".to_string()))?;

    let step_id = match obj.get("stepId") {
        None | Some(Value::Null) => None,
        Some(Value::String(id)) => Some(id.clone()),
        Some(_) => return Err(CacheError::InvalidData("stepId is not a string".to_string())),
    };

    let mut assertions = match obj.get("assertions") {
        None => Vec::new(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, value)| {
                key.parse::<AssertionIndex>()
                    .map(|index| (index, value))
                    .map_err(|_| {
                        CacheError::InvalidData(format!("assertion key '{key}' is not an index"))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(CacheError::InvalidData(
                "assertions is not an object".to_string(),
            ))
        }
    };
    assertions.sort_by_key(|(index, _)| *index);

    Ok(StoredStep {
        conclusion,
        step_id,
        assertions,
    })
}

/// Validate and decode one stored assertion
///
/// # Errors
/// Fails when the payload violates the assertion schema or carries neither
/// evidence nor reason.
pub(crate) fn decode_assertion(payload: &Value) -> Result<AssertionCacheEntry, CacheError> {
    let schema = ASSERTION_SCHEMA
        .as_ref()
        .map_err(|e| CacheError::InvalidData(format!("assertion schema unavailable: {e}")))?;

    if !schema.is_valid(payload) {
        return Err(CacheError::InvalidData(
            "assertion does not match schema".to_string(),
        ));
    }

    let entry: AssertionCacheEntry = serde::Deserialize::deserialize(payload)?;
    if !entry.is_persistable() {
        return Err(CacheError::InvalidData(
            "assertion has neither evidence nor reason".to_string(),
        ));
    }
    Ok(entry)
}

/// Decode one stored step, all of its assertions included
///
/// # Errors
/// Fails if the envelope or any assertion is malformed.
pub(crate) fn decode_step(payload: &Value) -> Result<StepCacheEntry, CacheError> {
    let step = stored_step(payload)?;
    let assertions = step
        .assertions
        .into_iter()
        .map(|(index, assertion)| decode_assertion(assertion).map(|a| (index, a)))
        .collect::<Result<_, _>>()?;
    Ok(StepCacheEntry {
        conclusion: step.conclusion,
        step_id: step.step_id,
        assertions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sva_evidence::ContentHash;

    fn hash_hex(content: &[u8]) -> String {
        ContentHash::compute(content).to_string()
    }

    #[test]
    fn steps_come_back_in_numeric_order() {
        let data = json!({"steps": {"10": {}, "9": {}, "0": {}}});
        let steps = stored_steps(&data).unwrap();
        assert_eq!(steps.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 9, 10]);
    }

    #[test]
    fn blob_without_steps_is_rejected() {
        assert!(stored_steps(&json!({"step": {}})).is_err());
        assert!(stored_steps(&json!("garbage")).is_err());
        assert!(stored_steps(&json!({"steps": {"first": {}}})).is_err());
    }

    #[test]
    fn step_envelope_is_read() {
        let payload = json!({
            "conclusion": "pass",
            "stepId": "open-reset-form",
            "assertions": {"1": {"reason": "b"}, "0": {"reason": "a"}}
        });
        let step = stored_step(&payload).unwrap();
        assert_eq!(step.conclusion, StepConclusion::Pass);
        assert_eq!(step.step_id.as_deref(), Some("open-reset-form"));
        assert_eq!(step.assertions[0].0, 0);
        assert_eq!(step.assertions[1].0, 1);
    }

    #[test]
    fn step_without_terminal_conclusion_is_rejected() {
        assert!(stored_step(&json!({"conclusion": "blocked", "assertions": {}})).is_err());
        assert!(stored_step(&json!({"assertions": {}})).is_err());
    }

    #[test]
    fn one_bad_assertion_spoils_the_step() {
        let good = json!({"conclusion": "fail", "assertions": {"0": {"reason": "missing"}}});
        let bad = json!({"conclusion": "fail", "assertions": {"0": {"reason": "ok"}, "1": {}}});
        assert_eq!(decode_step(&good).unwrap().assertions.len(), 1);
        assert!(decode_step(&bad).is_err());
    }

    #[test]
    fn valid_assertion_decodes() {
        let payload = json!({
            "evidence": {"src/auth/reset.ts": {"hash": hash_hex(b"x"), "lineRanges": ["10-40"]}},
            "reason": "token is generated"
        });
        let entry = decode_assertion(&payload).unwrap();
        assert!(entry.has_evidence());
    }

    #[test]
    fn reason_only_assertion_decodes() {
        let entry = decode_assertion(&json!({"reason": "no code needed"})).unwrap();
        assert!(entry.evidence.is_none());
    }

    #[test]
    fn malformed_assertions_are_rejected() {
        // wrong type
        assert!(decode_assertion(&json!({"reason": 42})).is_err());
        // unknown field
        assert!(decode_assertion(&json!({"reason": "x", "extra": true})).is_err());
        // missing lineRanges
        assert!(decode_assertion(&json!({"evidence": {"a.ts": {"hash": hash_hex(b"x")}}})).is_err());
        // hash that is not hex
        assert!(decode_assertion(&json!({"evidence": {"a.ts": {"hash": "zz", "lineRanges": []}}})).is_err());
        // nothing at all
        assert!(decode_assertion(&json!({})).is_err());
    }
}
