use std::collections::BTreeMap;

use serde::Serialize;

use crate::features::EncodedRow;
use crate::model::{Classifier, LabelRegistry};

/// Label used for predicted ids the label registry cannot resolve.
pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub class_id: i64,
    pub probabilities: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassificationSummary {
    #[serde(skip)]
    pub total: usize,
    pub counts: BTreeMap<String, usize>,
    pub attack_types: BTreeMap<String, usize>,
    pub avg_confidence_pct: f64,
}

pub fn classify(classifier: &dyn Classifier, rows: &[EncodedRow]) -> Vec<ClassificationResult> {
    if rows.is_empty() {
        return Vec::new();
    }
    let ids = classifier.predict(rows);
    let probabilities = classifier.predict_proba(rows);
    ids.into_iter()
        .zip(probabilities)
        .map(|(class_id, probabilities)| ClassificationResult {
            class_id,
            probabilities,
        })
        .collect()
}

pub fn summarize(
    classifier: &dyn Classifier,
    labels: &LabelRegistry,
    rows: &[EncodedRow],
) -> ClassificationSummary {
    tally(&classify(classifier, rows), labels)
}

/// Groups results by resolved label and averages the top-1 probability.
pub fn tally(results: &[ClassificationResult], labels: &LabelRegistry) -> ClassificationSummary {
    let mut summary = ClassificationSummary {
        total: results.len(),
        ..ClassificationSummary::default()
    };
    if results.is_empty() {
        return summary;
    }

    for result in results {
        let label = labels.label(result.class_id).unwrap_or(UNKNOWN_LABEL);
        *summary.counts.entry(label.to_string()).or_insert(0) += 1;
    }
    summary.attack_types = summary
        .counts
        .iter()
        .filter(|(label, _)| !label.eq_ignore_ascii_case("normal"))
        .map(|(label, count)| (label.clone(), *count))
        .collect();

    let confidence: f64 = results
        .iter()
        .map(|r| r.probabilities.iter().copied().fold(0.0, f64::max))
        .sum::<f64>()
        / results.len() as f64;
    summary.avg_confidence_pct = round2(confidence * 100.0);

    summary
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
