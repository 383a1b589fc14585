use serde_json::Value;

use crate::model::{
    AnalysisResult, ExtractionDiagnostic, ExtractionOutcome, ScalarRecord, ScalarValue, SkipReason,
};

/// Reduce a raw analysis result to its scalar metrics.
///
/// Zero-dimensional values are kept as-is, one-element arrays are unwrapped,
/// everything else is skipped with a recorded reason. A bad entry never
/// fails the record.
pub fn extract_scalars(result: &AnalysisResult) -> ScalarRecord {
    let mut record = ScalarRecord::default();

    for (name, value) in result.entries() {
        let outcome = match reduce(value) {
            Ok(scalar) => {
                record.values.insert(name.clone(), scalar);
                ExtractionOutcome::Kept
            }
            Err(reason) => ExtractionOutcome::Skipped { reason },
        };
        record.diagnostics.push(ExtractionDiagnostic {
            metric: name.clone(),
            outcome,
        });
    }

    record
}

fn reduce(value: &Value) -> Result<ScalarValue, SkipReason> {
    let shape = shape_of(value)?;
    match (shape.as_slice(), value) {
        ([], _) => to_scalar(value),
        ([1], Value::Array(items)) => to_scalar(&items[0]),
        ([0], _) => Err(SkipReason::EmptyArray),
        ([len], _) => Err(SkipReason::MultiElement { len: *len }),
        _ => Err(SkipReason::MultiDimensional {
            shape: shape.clone(),
        }),
    }
}

/// Shape of the n-dimensional view of `value`; arrays must be rectangular.
fn shape_of(value: &Value) -> Result<Vec<usize>, SkipReason> {
    match value {
        Value::Null => Err(SkipReason::Null),
        Value::Object(_) => Err(SkipReason::NestedMapping),
        Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(Vec::new()),
        Value::Array(items) => {
            let Some(first) = items.first() else {
                return Ok(vec![0]);
            };
            let inner = shape_of(first)?;
            for item in &items[1..] {
                if shape_of(item)? != inner {
                    return Err(SkipReason::Ragged);
                }
            }
            let mut shape = Vec::with_capacity(inner.len() + 1);
            shape.push(items.len());
            shape.extend(inner);
            Ok(shape)
        }
    }
}

fn to_scalar(value: &Value) -> Result<ScalarValue, SkipReason> {
    match value {
        Value::Bool(b) => Ok(ScalarValue::Bool(*b)),
        Value::String(s) => Ok(ScalarValue::Text(s.clone())),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(ScalarValue::Int(i)),
            None => n.as_f64().map(ScalarValue::Float).ok_or(SkipReason::Null),
        },
        Value::Null => Err(SkipReason::Null),
        Value::Object(_) => Err(SkipReason::NestedMapping),
        Value::Array(_) => Err(SkipReason::MultiDimensional { shape: Vec::new() }),
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn analysis(v: Value) -> AnalysisResult {
        match v {
            Value::Object(map) => AnalysisResult::new(map),
            _ => panic!("fixture must be an object"),
        }
    }

    fn reason(record: &ScalarRecord, metric: &str) -> Option<SkipReason> {
        record
            .skipped()
            .find(|(m, _)| *m == metric)
            .map(|(_, r)| r.clone())
    }

    #[test]
    fn keeps_scalars_and_unwraps_singletons() {
        let record = extract_scalars(&analysis(json!({
            "sarcomere_length_mean": 1.82,
            "n_cells": 14,
            "channel": "w3",
            "z_bands_detected": true,
            "domain_area": [35.5]
        })));

        assert_eq!(record.values.len(), 5);
        assert_eq!(record.values["sarcomere_length_mean"], ScalarValue::Float(1.82));
        assert_eq!(record.values["n_cells"], ScalarValue::Int(14));
        assert_eq!(record.values["channel"], ScalarValue::Text("w3".into()));
        assert_eq!(record.values["z_bands_detected"], ScalarValue::Bool(true));
        assert_eq!(record.values["domain_area"], ScalarValue::Float(35.5));
        assert_eq!(record.skipped_count(), 0);
    }

    #[test]
    fn drops_everything_that_is_not_a_scalar() {
        let record = extract_scalars(&analysis(json!({
            "lengths": [1.0, 2.0, 3.0],
            "image": [[1, 2], [3, 4]],
            "boxed": [[7]],
            "ragged": [[1, 2], [3]],
            "none": [],
            "missing": null,
            "params": { "sigma": 2 },
            "kept": 3
        })));

        assert_eq!(record.values.keys().collect::<Vec<_>>(), vec!["kept"]);
        assert_eq!(reason(&record, "lengths"), Some(SkipReason::MultiElement { len: 3 }));
        assert_eq!(
            reason(&record, "image"),
            Some(SkipReason::MultiDimensional { shape: vec![2, 2] })
        );
        assert_eq!(
            reason(&record, "boxed"),
            Some(SkipReason::MultiDimensional { shape: vec![1, 1] })
        );
        assert_eq!(reason(&record, "ragged"), Some(SkipReason::Ragged));
        assert_eq!(reason(&record, "none"), Some(SkipReason::EmptyArray));
        assert_eq!(reason(&record, "missing"), Some(SkipReason::Null));
        assert_eq!(reason(&record, "params"), Some(SkipReason::NestedMapping));
    }

    #[test]
    fn output_is_a_subset_with_one_diagnostic_per_input() {
        let input = analysis(json!({
            "a": 1, "b": [2], "c": [3, 4], "d": [[5, 6]], "e": "x", "f": [null]
        }));
        let record = extract_scalars(&input);

        assert_eq!(record.diagnostics.len(), input.len());
        for key in record.values.keys() {
            assert!(input.entries().any(|(k, _)| k == key));
        }
        assert_eq!(record.values.len() + record.skipped_count(), input.len());
        assert!(!record.values.contains_key("c"));
        assert!(!record.values.contains_key("d"));
        assert!(!record.values.contains_key("f"));
    }

    #[test]
    fn large_unsigned_becomes_float() {
        let record = extract_scalars(&analysis(json!({ "big": u64::MAX })));
        assert_eq!(record.values["big"], ScalarValue::Float(u64::MAX as f64));
    }
}
