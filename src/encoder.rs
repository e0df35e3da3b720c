//! Categorical vocabularies shared by every request.
//!
//! Each categorical column maps its training-time vocabulary to integer codes
//! (position in the vocabulary). Values outside the vocabulary encode as the
//! reserved `UNK` token; only `UNK` itself is ever added to a vocabulary.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const UNK: &str = "UNK";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CategoricalColumn {
    ProtocolType,
    Service,
    Flag,
}

impl CategoricalColumn {
    pub const ALL: [CategoricalColumn; 3] = [
        CategoricalColumn::ProtocolType,
        CategoricalColumn::Service,
        CategoricalColumn::Flag,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CategoricalColumn::ProtocolType => "protocol_type",
            CategoricalColumn::Service => "service",
            CategoricalColumn::Flag => "flag",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    fn slot(&self) -> usize {
        *self as usize
    }
}

/// When `UNK` joins the vocabularies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum UnkPolicy {
    /// Registered for every column at load time; encoding never mutates.
    #[default]
    Sealed,
    /// Appended the first time a column meets an unknown value.
    Lazy,
}

#[derive(Debug, Clone, Default)]
struct Vocabulary {
    classes: Vec<String>,
    codes: HashMap<String, u32>,
}

impl Vocabulary {
    fn new(classes: Vec<String>) -> Self {
        let mut vocab = Vocabulary::default();
        for class in classes {
            vocab.register(&class);
        }
        vocab
    }

    fn code(&self, value: &str) -> Option<u32> {
        self.codes.get(value).copied()
    }

    /// Appends `value` unless present; returns its code either way.
    fn register(&mut self, value: &str) -> u32 {
        if let Some(code) = self.code(value) {
            return code;
        }
        let code = self.classes.len() as u32;
        self.classes.push(value.to_string());
        self.codes.insert(value.to_string(), code);
        code
    }
}

/// One ordered vocabulary per categorical column.
#[derive(Debug, Clone)]
pub struct EncoderArtifact {
    pub protocol_type: Vec<String>,
    pub service: Vec<String>,
    pub flag: Vec<String>,
}

impl EncoderArtifact {
    /// Picks the three vocabularies out of the on-disk `{column: [classes]}`
    /// map; extra columns are ignored.
    fn from_columns(mut columns: HashMap<String, Vec<String>>) -> Result<Self> {
        let mut take = |column: CategoricalColumn| {
            columns.remove(column.name()).ok_or_else(|| {
                Error::InvalidModel(format!("no encoder for column {}", column.name()))
            })
        };
        Ok(EncoderArtifact {
            protocol_type: take(CategoricalColumn::ProtocolType)?,
            service: take(CategoricalColumn::Service)?,
            flag: take(CategoricalColumn::Flag)?,
        })
    }
}

/// Process-wide encoder state. Lookups take a read lock; registering `UNK`
/// takes the write lock and re-checks, so concurrent first sightings of an
/// unknown value register it exactly once.
#[derive(Debug)]
pub struct EncoderRegistry {
    columns: [RwLock<Vocabulary>; 3],
    policy: UnkPolicy,
}

impl EncoderRegistry {
    pub fn new(artifact: EncoderArtifact, policy: UnkPolicy) -> Self {
        let registry = EncoderRegistry {
            columns: [
                RwLock::new(Vocabulary::new(artifact.protocol_type)),
                RwLock::new(Vocabulary::new(artifact.service)),
                RwLock::new(Vocabulary::new(artifact.flag)),
            ],
            policy,
        };

        if policy == UnkPolicy::Sealed {
            for column in CategoricalColumn::ALL {
                let code = registry.columns[column.slot()].write().register(UNK);
                debug!(column = column.name(), code, "sealed vocabulary");
            }
        }
        registry
    }

    pub fn load(path: &Path, policy: UnkPolicy) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::artifact(path, e))?;
        let columns: HashMap<String, Vec<String>> =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| Error::artifact(path, e))?;
        let artifact = EncoderArtifact::from_columns(columns)?;

        let registry = EncoderRegistry::new(artifact, policy);
        info!(
            path = %path.display(),
            policy = ?policy,
            protocol_types = registry.len(CategoricalColumn::ProtocolType),
            services = registry.len(CategoricalColumn::Service),
            flags = registry.len(CategoricalColumn::Flag),
            "loaded categorical encoders"
        );
        Ok(registry)
    }

    pub fn policy(&self) -> UnkPolicy {
        self.policy
    }

    /// Code for `value`, degrading to the `UNK` code for anything unseen.
    pub fn encode(&self, column: CategoricalColumn, value: &str) -> u32 {
        let slot = &self.columns[column.slot()];
        {
            let vocab = slot.read();
            if let Some(code) = vocab.code(value).or_else(|| vocab.code(UNK)) {
                return code;
            }
        }

        let mut vocab = slot.write();
        match vocab.code(value) {
            Some(code) => code,
            None => {
                let code = vocab.register(UNK);
                info!(column = column.name(), code, "registered UNK");
                code
            }
        }
    }

    pub fn decode(&self, column: CategoricalColumn, code: u32) -> Option<String> {
        self.columns[column.slot()]
            .read()
            .classes
            .get(code as usize)
            .cloned()
    }

    /// Whether `value` is part of the vocabulary in its own right.
    pub fn is_known(&self, column: CategoricalColumn, value: &str) -> bool {
        self.columns[column.slot()].read().code(value).is_some()
    }

    pub fn unk_code(&self, column: CategoricalColumn) -> Option<u32> {
        self.columns[column.slot()].read().code(UNK)
    }

    pub fn len(&self, column: CategoricalColumn) -> usize {
        self.columns[column.slot()].read().classes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn artifact() -> EncoderArtifact {
        EncoderArtifact {
            protocol_type: vec!["tcp".into(), "udp".into()],
            service: vec!["ftp".into(), "http".into(), "other".into()],
            flag: vec!["REJ".into(), "S0".into(), "SF".into()],
        }
    }

    #[test]
    fn known_values_round_trip() {
        let registry = EncoderRegistry::new(artifact(), UnkPolicy::Lazy);
        let code = registry.encode(CategoricalColumn::Service, "http");
        assert_eq!(code, 1);
        assert_eq!(registry.decode(CategoricalColumn::Service, code).as_deref(), Some("http"));
        assert_eq!(registry.unk_code(CategoricalColumn::Service), None);
    }

    #[test]
    fn lazy_policy_registers_unk_once() {
        let registry = EncoderRegistry::new(artifact(), UnkPolicy::Lazy);
        assert_eq!(registry.len(CategoricalColumn::ProtocolType), 2);

        let first = registry.encode(CategoricalColumn::ProtocolType, "icmp");
        let second = registry.encode(CategoricalColumn::ProtocolType, "icmp");
        let other = registry.encode(CategoricalColumn::ProtocolType, "sctp");

        assert_eq!(first, 2);
        assert_eq!(second, first);
        assert_eq!(other, first);
        assert_eq!(registry.len(CategoricalColumn::ProtocolType), 3);
        assert_eq!(registry.decode(CategoricalColumn::ProtocolType, first).as_deref(), Some(UNK));
        assert!(!registry.is_known(CategoricalColumn::ProtocolType, "icmp"));
        // other columns are untouched
        assert_eq!(registry.unk_code(CategoricalColumn::Flag), None);
    }

    #[test]
    fn sealed_policy_registers_unk_up_front() {
        let registry = EncoderRegistry::new(artifact(), UnkPolicy::Sealed);
        for column in CategoricalColumn::ALL {
            assert!(registry.unk_code(column).is_some());
        }
        let before = registry.len(CategoricalColumn::Flag);
        let code = registry.encode(CategoricalColumn::Flag, "18");
        assert_eq!(Some(code), registry.unk_code(CategoricalColumn::Flag));
        assert_eq!(registry.len(CategoricalColumn::Flag), before);
    }

    #[test]
    fn vocabulary_already_holding_unk_is_not_extended() {
        let mut artifact = artifact();
        artifact.service.push(UNK.into());
        let registry = EncoderRegistry::new(artifact, UnkPolicy::Lazy);

        assert_eq!(registry.encode(CategoricalColumn::Service, "gopher"), 3);
        assert_eq!(registry.len(CategoricalColumn::Service), 4);
    }

    #[test]
    fn concurrent_unknowns_share_one_code() {
        let registry = Arc::new(EncoderRegistry::new(artifact(), UnkPolicy::Lazy));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || registry.encode(CategoricalColumn::Service, &format!("svc{i}")))
            })
            .collect();

        let codes: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(codes.iter().all(|&c| c == codes[0]));
        assert_eq!(registry.len(CategoricalColumn::Service), 4);
    }

    #[test]
    fn column_names() {
        for column in CategoricalColumn::ALL {
            assert_eq!(CategoricalColumn::from_name(column.name()), Some(column));
        }
        assert_eq!(CategoricalColumn::from_name("duration"), None);
    }

    #[test]
    fn load_reads_json_vocabularies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encoders.json");
        std::fs::write(
            &path,
            r#"{"protocol_type":["icmp","tcp","udp"],"service":["http"],"flag":["SF"]}"#,
        )
        .unwrap();

        let registry = EncoderRegistry::load(&path, UnkPolicy::Sealed).unwrap();
        assert_eq!(registry.encode(CategoricalColumn::ProtocolType, "udp"), 2);
        assert_eq!(registry.len(CategoricalColumn::ProtocolType), 4);
    }

    #[test]
    fn load_rejects_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encoders.json");
        std::fs::write(&path, r#"{"protocol_type":["tcp"],"service":["http"]}"#).unwrap();

        let err = EncoderRegistry::load(&path, UnkPolicy::Sealed).unwrap_err();
        assert!(matches!(err, Error::InvalidModel(ref msg) if msg.contains("flag")));
    }

    #[test]
    fn load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encoders.json");
        std::fs::write(&path, r#"{"protocol_type":"tcp"}"#).unwrap();

        let err = EncoderRegistry::load(&path, UnkPolicy::Sealed).unwrap_err();
        assert!(matches!(err, Error::Artifact { .. }));
    }
}
