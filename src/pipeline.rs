//! Batch and live classification over the shared artifacts.

use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::encoder::{EncoderRegistry, UnkPolicy};
use crate::error::Result;
use crate::features::{ColumnMap, EncodedRow, FeatureVector, TRAIN_FEATURE_COLUMNS};
use crate::flow::FlowTable;
use crate::model::{Classifier, LabelRegistry, RandomForest};
use crate::sniff::{CaptureLimits, PacketSource};
use crate::summary::{summarize, ClassificationSummary};

pub const FOREST_FILE: &str = "forest.json";
pub const ENCODERS_FILE: &str = "encoders.json";
pub const LABELS_FILE: &str = "labels.json";

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub total_records: usize,
    #[serde(flatten)]
    pub summary: ClassificationSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveReport {
    pub timestamp: String,
    #[serde(skip)]
    pub total_packets: usize,
    pub total_flows: usize,
    #[serde(flatten)]
    pub summary: ClassificationSummary,
}

pub struct Detector {
    classifier: Box<dyn Classifier>,
    labels: LabelRegistry,
    encoders: EncoderRegistry,
    debug_dump: Option<PathBuf>,
}

impl Detector {
    pub fn new(
        classifier: Box<dyn Classifier>,
        labels: LabelRegistry,
        encoders: EncoderRegistry,
    ) -> Self {
        Detector {
            classifier,
            labels,
            encoders,
            debug_dump: None,
        }
    }

    /// Loads `forest.json`, `encoders.json` and `labels.json` from `dir`.
    pub fn from_artifacts(dir: &Path, policy: UnkPolicy) -> Result<Self> {
        let classifier = RandomForest::load(&dir.join(FOREST_FILE))?;
        let encoders = EncoderRegistry::load(&dir.join(ENCODERS_FILE), policy)?;
        let labels = LabelRegistry::load(&dir.join(LABELS_FILE))?;
        Ok(Detector::new(Box::new(classifier), labels, encoders))
    }

    pub fn with_debug_dump(mut self, path: Option<PathBuf>) -> Self {
        self.debug_dump = path;
        self
    }

    pub fn encoders(&self) -> &EncoderRegistry {
        &self.encoders
    }

    pub fn labels(&self) -> &LabelRegistry {
        &self.labels
    }

    /// Classifies uploaded CSV rows after aligning them to the training schema.
    pub fn classify_csv<R: Read>(&self, reader: R) -> Result<BatchReport> {
        let mut csv = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let columns = ColumnMap::new(csv.headers()?);
        let missing: Vec<_> = columns.missing_columns().collect();
        if !missing.is_empty() {
            debug!(?missing, "defaulting columns absent from upload");
        }

        let mut rows = Vec::new();
        for record in csv.records() {
            let vector = columns.build(&record?);
            rows.push(vector.encode(&self.encoders));
        }

        let summary = summarize(self.classifier.as_ref(), &self.labels, &rows);
        info!(records = summary.total, "classified batch");
        Ok(BatchReport {
            total_records: summary.total,
            summary,
        })
    }

    /// Captures one window from `source` and classifies its flows.
    pub fn classify_live(&self, source: &dyn PacketSource, limits: CaptureLimits) -> Result<LiveReport> {
        let packets = source.capture(limits)?;
        let flows = FlowTable::aggregate(&packets).into_flows();
        info!(packets = packets.len(), flows = flows.len(), "capture window aggregated");

        let rows: Vec<EncodedRow> = flows
            .iter()
            .map(|flow| FeatureVector::from_flow(flow).encode(&self.encoders))
            .collect();
        if let Some(path) = &self.debug_dump {
            if let Err(e) = dump_rows(path, &rows) {
                warn!(path = %path.display(), error = %e, "failed to write debug dump");
            }
        }

        let summary = summarize(self.classifier.as_ref(), &self.labels, &rows);
        Ok(LiveReport {
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            total_packets: packets.len(),
            total_flows: summary.total,
            summary,
        })
    }
}

fn dump_rows(path: &Path, rows: &[EncodedRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(TRAIN_FEATURE_COLUMNS)?;
    for row in rows {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    debug!(path = %path.display(), rows = rows.len(), "wrote debug dump");
    Ok(())
}
