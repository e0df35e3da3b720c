//! Fixed NSL-KDD feature schema and the two ways of filling it.
//!
//! The live builder ([`FeatureVector::from_flow`]) is a best-effort,
//! schema-compatible approximation: statistics that need more than one
//! capture window are emitted as constants, so live vectors do not carry the
//! statistical meaning of the training features. The batch builder
//! ([`ColumnMap`]) aligns uploaded rows to the exact training columns.

use std::collections::HashMap;

use csv::StringRecord;
use serde::Serialize;

use crate::encoder::{CategoricalColumn, EncoderRegistry};
use crate::flow::FlowEntry;

pub const FEATURE_COUNT: usize = 41;

/// Training column order. Must match the classifier artifact exactly.
pub const TRAIN_FEATURE_COLUMNS: [&str; FEATURE_COUNT] = [
    "duration",
    "protocol_type",
    "service",
    "flag",
    "src_bytes",
    "dst_bytes",
    "land",
    "wrong_fragment",
    "urgent",
    "hot",
    "num_failed_logins",
    "logged_in",
    "num_compromised",
    "root_shell",
    "su_attempted",
    "num_root",
    "num_file_creations",
    "num_shells",
    "num_access_files",
    "num_outbound_cmds",
    "is_host_login",
    "is_guest_login",
    "count",
    "srv_count",
    "serror_rate",
    "srv_serror_rate",
    "rerror_rate",
    "srv_rerror_rate",
    "same_srv_rate",
    "diff_srv_rate",
    "srv_diff_host_rate",
    "dst_host_count",
    "dst_host_srv_count",
    "dst_host_same_srv_rate",
    "dst_host_diff_srv_rate",
    "dst_host_same_src_port_rate",
    "dst_host_srv_diff_host_rate",
    "dst_host_serror_rate",
    "dst_host_srv_serror_rate",
    "dst_host_rerror_rate",
    "dst_host_srv_rerror_rate",
];

pub const CATEGORICAL_COLUMNS: [&str; 3] = ["protocol_type", "service", "flag"];

/// Value given to a categorical column the input does not provide.
pub const DEFAULT_CATEGORY: &str = "other";

pub type EncodedRow = [f64; FEATURE_COUNT];

pub fn column_index(name: &str) -> Option<usize> {
    TRAIN_FEATURE_COLUMNS.iter().position(|&c| c == name)
}

pub fn is_categorical(name: &str) -> bool {
    CATEGORICAL_COLUMNS.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Category(String),
}

impl FeatureValue {
    fn default_for(column: &str) -> Self {
        if is_categorical(column) {
            FeatureValue::Category(DEFAULT_CATEGORY.to_string())
        } else {
            FeatureValue::Number(0.0)
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(n) => Some(*n),
            FeatureValue::Category(_) => None,
        }
    }

    pub fn as_category(&self) -> Option<&str> {
        match self {
            FeatureValue::Category(c) => Some(c),
            FeatureValue::Number(_) => None,
        }
    }
}

/// One row in training column order, before categorical encoding.
///
/// Always holds exactly [`FEATURE_COUNT`] values; categorical positions hold
/// [`FeatureValue::Category`] and every other position a number.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<FeatureValue>,
}

impl Default for FeatureVector {
    fn default() -> Self {
        FeatureVector {
            values: TRAIN_FEATURE_COLUMNS
                .iter()
                .map(|c| FeatureValue::default_for(c))
                .collect(),
        }
    }
}

impl FeatureVector {
    /// Approximates the training features from a single flow.
    pub fn from_flow(flow: &FlowEntry) -> Self {
        let mut vector = FeatureVector::default();
        let packets = flow.packet_count as f64;

        vector.set_number("duration", flow.duration());
        vector.set_category("protocol_type", flow.key.protocol.as_str());
        vector.set_category("service", flow.service);
        vector.set_category("flag", &flow.mean_tcp_flags().to_string());
        vector.set_number("src_bytes", flow.src_bytes as f64);
        vector.set_number("dst_bytes", flow.dst_bytes as f64);
        vector.set_number("land", if flow.is_land() { 1.0 } else { 0.0 });
        vector.set_number("count", packets);
        vector.set_number("srv_count", packets);
        vector.set_number("same_srv_rate", 1.0);
        vector
    }

    pub fn get(&self, column: &str) -> Option<&FeatureValue> {
        column_index(column).map(|i| &self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FeatureValue)> {
        TRAIN_FEATURE_COLUMNS.iter().copied().zip(self.values.iter())
    }

    fn set_number(&mut self, column: &str, value: f64) {
        if let Some(i) = column_index(column) {
            self.values[i] = FeatureValue::Number(value);
        }
    }

    fn set_category(&mut self, column: &str, value: &str) {
        if let Some(i) = column_index(column) {
            self.values[i] = FeatureValue::Category(value.to_string());
        }
    }

    /// Replaces categorical values with their registry codes.
    pub fn encode(&self, encoders: &EncoderRegistry) -> EncodedRow {
        let mut row = [0.0; FEATURE_COUNT];
        for (i, (column, value)) in self.iter().enumerate() {
            row[i] = match value {
                FeatureValue::Number(n) => *n,
                FeatureValue::Category(c) => match CategoricalColumn::from_name(column) {
                    Some(col) => f64::from(encoders.encode(col, c)),
                    None => 0.0,
                },
            };
        }
        row
    }
}

/// Maps an uploaded header onto the training columns.
///
/// Unknown source columns are dropped; training columns the header lacks
/// are defaulted. On duplicate headers the first occurrence wins.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    sources: [Option<usize>; FEATURE_COUNT],
}

impl ColumnMap {
    pub fn new(header: &StringRecord) -> Self {
        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (pos, name) in header.iter().enumerate() {
            positions.entry(name.trim()).or_insert(pos);
        }

        let mut sources = [None; FEATURE_COUNT];
        for (i, column) in TRAIN_FEATURE_COLUMNS.iter().enumerate() {
            sources[i] = positions.get(column).copied();
        }
        ColumnMap { sources }
    }

    pub fn missing_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        TRAIN_FEATURE_COLUMNS
            .iter()
            .zip(self.sources.iter())
            .filter(|(_, src)| src.is_none())
            .map(|(c, _)| *c)
    }

    pub fn build(&self, row: &StringRecord) -> FeatureVector {
        let mut vector = FeatureVector::default();
        for (i, column) in TRAIN_FEATURE_COLUMNS.iter().enumerate() {
            let Some(pos) = self.sources[i] else {
                continue;
            };
            // Ragged rows read as empty cells.
            let cell = row.get(pos).unwrap_or("");
            vector.values[i] = if is_categorical(column) {
                FeatureValue::Category(cell.to_string())
            } else {
                FeatureValue::Number(coerce_number(cell))
            };
        }
        vector
    }
}

/// Numeric coercion for uploaded cells: anything unparseable becomes `0`.
pub fn coerce_number(cell: &str) -> f64 {
    let cell = cell.trim();
    match cell {
        "True" | "TRUE" | "true" => return 1.0,
        "False" | "FALSE" | "false" => return 0.0,
        _ => {}
    }
    match cell.parse::<f64>() {
        Ok(n) if !n.is_nan() => n,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowTable;
    use crate::sniff::{PacketRecord, Protocol};
    use proptest::prelude::*;

    fn header(names: &[&str]) -> StringRecord {
        StringRecord::from(names.to_vec())
    }

    #[test]
    fn schema_shape() {
        assert_eq!(TRAIN_FEATURE_COLUMNS.len(), 41);
        assert_eq!(column_index("protocol_type"), Some(1));
        assert_eq!(column_index("dst_host_srv_rerror_rate"), Some(40));
        for c in CATEGORICAL_COLUMNS {
            assert!(column_index(c).is_some());
        }
    }

    #[test]
    fn default_vector_uses_type_defaults() {
        let vector = FeatureVector::default();
        assert_eq!(vector.iter().count(), FEATURE_COUNT);
        assert_eq!(vector.get("service").and_then(|v| v.as_category()), Some("other"));
        assert_eq!(vector.get("src_bytes").and_then(|v| v.as_number()), Some(0.0));
    }

    #[test]
    fn batch_row_is_aligned_and_defaulted() {
        let map = ColumnMap::new(&header(&["src_bytes", "junk", "protocol_type", "duration"]));
        let vector = map.build(&header(&["491", "zzz", "tcp", "2"]));

        let names: Vec<_> = vector.iter().map(|(c, _)| c).collect();
        assert_eq!(names, TRAIN_FEATURE_COLUMNS.to_vec());
        assert_eq!(vector.get("duration"), Some(&FeatureValue::Number(2.0)));
        assert_eq!(vector.get("src_bytes"), Some(&FeatureValue::Number(491.0)));
        assert_eq!(vector.get("protocol_type"), Some(&FeatureValue::Category("tcp".into())));
        assert_eq!(vector.get("flag"), Some(&FeatureValue::Category("other".into())));
        assert_eq!(vector.get("dst_bytes"), Some(&FeatureValue::Number(0.0)));
        assert!(vector.get("junk").is_none());
        assert_eq!(map.missing_columns().count(), FEATURE_COUNT - 3);
    }

    #[test]
    fn first_duplicate_header_wins() {
        let map = ColumnMap::new(&header(&["src_bytes", " src_bytes "]));
        let vector = map.build(&header(&["1", "2"]));
        assert_eq!(vector.get("src_bytes"), Some(&FeatureValue::Number(1.0)));
    }

    #[test]
    fn ragged_row_reads_empty_cells() {
        let map = ColumnMap::new(&header(&["duration", "service", "src_bytes"]));
        let vector = map.build(&header(&["3"]));
        assert_eq!(vector.get("service"), Some(&FeatureValue::Category(String::new())));
        assert_eq!(vector.get("src_bytes"), Some(&FeatureValue::Number(0.0)));
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(coerce_number("12"), 12.0);
        assert_eq!(coerce_number(" 0.5 "), 0.5);
        assert_eq!(coerce_number("1e3"), 1000.0);
        assert_eq!(coerce_number("abc"), 0.0);
        assert_eq!(coerce_number(""), 0.0);
        assert_eq!(coerce_number("NaN"), 0.0);
        assert_eq!(coerce_number("True"), 1.0);
        assert_eq!(coerce_number("False"), 0.0);
    }

    #[test]
    fn live_vector_from_flow() {
        let pkt = |ts: f64, flags: u16| PacketRecord {
            timestamp: ts,
            src_addr: "10.0.0.1".parse().unwrap(),
            dst_addr: "10.0.0.2".parse().unwrap(),
            src_port: 5000,
            dst_port: 443,
            protocol: Protocol::Tcp,
            length: 100,
            tcp_flags: Some(flags),
        };
        let flows = FlowTable::aggregate(&[pkt(1.0, 2), pkt(3.0, 18)]).into_flows();
        let vector = FeatureVector::from_flow(&flows[0]);

        assert_eq!(vector.get("duration"), Some(&FeatureValue::Number(2.0)));
        assert_eq!(vector.get("protocol_type"), Some(&FeatureValue::Category("tcp".into())));
        assert_eq!(vector.get("service"), Some(&FeatureValue::Category("http".into())));
        assert_eq!(vector.get("flag"), Some(&FeatureValue::Category("10".into())));
        assert_eq!(vector.get("src_bytes"), Some(&FeatureValue::Number(200.0)));
        assert_eq!(vector.get("land"), Some(&FeatureValue::Number(0.0)));
        assert_eq!(vector.get("count"), Some(&FeatureValue::Number(2.0)));
        assert_eq!(vector.get("srv_count"), Some(&FeatureValue::Number(2.0)));
        assert_eq!(vector.get("same_srv_rate"), Some(&FeatureValue::Number(1.0)));
        assert_eq!(vector.get("serror_rate"), Some(&FeatureValue::Number(0.0)));
    }

    #[test]
    fn flow_without_tcp_flags_has_zero_flag() {
        let mut pkt = PacketRecord::placeholder(0.0, 10);
        pkt.protocol = Protocol::Udp;
        let flows = FlowTable::aggregate([&pkt]).into_flows();
        let vector = FeatureVector::from_flow(&flows[0]);

        assert_eq!(vector.get("flag"), Some(&FeatureValue::Category("0".into())));
        assert_eq!(vector.get("protocol_type"), Some(&FeatureValue::Category("udp".into())));
        assert_eq!(vector.get("land"), Some(&FeatureValue::Number(1.0)));
    }

    proptest! {
        #[test]
        fn any_header_yields_training_schema(
            picks in proptest::collection::vec(0usize..FEATURE_COUNT, 0..FEATURE_COUNT),
            extras in proptest::collection::vec("[a-z]{3,8}_x", 0..4),
        ) {
            let mut names: Vec<String> = picks.iter().map(|&i| TRAIN_FEATURE_COLUMNS[i].to_string()).collect();
            names.extend(extras);
            names.reverse();
            let header = StringRecord::from(names.clone());
            let row = StringRecord::from(vec!["7"; names.len()]);

            let vector = ColumnMap::new(&header).build(&row);
            let columns: Vec<_> = vector.iter().map(|(c, _)| c).collect();
            prop_assert_eq!(columns, TRAIN_FEATURE_COLUMNS.to_vec());

            for (column, value) in vector.iter() {
                let present = names.iter().any(|n| n == column);
                let expected = match (present, is_categorical(column)) {
                    (true, true) => FeatureValue::Category("7".into()),
                    (true, false) => FeatureValue::Number(7.0),
                    (false, true) => FeatureValue::Category("other".into()),
                    (false, false) => FeatureValue::Number(0.0),
                };
                prop_assert_eq!(value, &expected);
            }
        }
    }
}
