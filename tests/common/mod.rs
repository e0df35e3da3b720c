#![allow(dead_code)]

use std::net::IpAddr;
use std::path::Path;

use kddsniff::encoder::UnkPolicy;
use kddsniff::features::TRAIN_FEATURE_COLUMNS;
use kddsniff::sniff::{CaptureLimits, PacketRecord, PacketSource, Protocol};
use kddsniff::{Detector, Error};
use serde_json::json;
use tempfile::TempDir;

/// Writes a small but complete artifact set: a one-tree forest splitting on
/// `src_bytes <= 150` (normal at 75%, otherwise neptune at 100%).
pub fn write_artifacts(dir: &Path) {
    let forest = json!({
        "features": TRAIN_FEATURE_COLUMNS.to_vec(),
        "classes": [0, 1, 2],
        "trees": [{"nodes": [
            {"feature": 4, "threshold": 150.0, "left": 1, "right": 2},
            {"value": [1.0, 3.0, 0.0]},
            {"value": [4.0, 0.0, 0.0]},
        ]}],
    });
    let encoders = json!({
        "protocol_type": ["tcp", "udp"],
        "service": ["domain_u", "ftp", "http", "other", "smtp"],
        "flag": ["REJ", "S0", "SF"],
    });
    let labels = json!(["neptune", "normal", "smurf"]);

    std::fs::write(dir.join("forest.json"), forest.to_string()).unwrap();
    std::fs::write(dir.join("encoders.json"), encoders.to_string()).unwrap();
    std::fs::write(dir.join("labels.json"), labels.to_string()).unwrap();
}

pub fn artifacts() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_artifacts(dir.path());
    dir
}

pub fn detector(policy: UnkPolicy) -> Detector {
    let dir = artifacts();
    Detector::from_artifacts(dir.path(), policy).unwrap()
}

pub fn tcp_packet(src: &str, dst: &str, sport: u16, dport: u16, len: u32, ts: f64) -> PacketRecord {
    PacketRecord {
        timestamp: ts,
        src_addr: src.parse::<IpAddr>().unwrap(),
        dst_addr: dst.parse::<IpAddr>().unwrap(),
        src_port: sport,
        dst_port: dport,
        protocol: Protocol::Tcp,
        length: len,
        tcp_flags: Some(0x02),
    }
}

/// A→B request and B→A reply captured in the same window.
pub fn conversation() -> Vec<PacketRecord> {
    vec![
        tcp_packet("10.0.0.1", "10.0.0.2", 5000, 80, 100, 1.0),
        tcp_packet("10.0.0.2", "10.0.0.1", 80, 5000, 200, 1.2),
    ]
}

pub struct UnavailableSource;

impl PacketSource for UnavailableSource {
    fn capture(&self, _limits: CaptureLimits) -> kddsniff::Result<Vec<PacketRecord>> {
        Err(Error::CaptureUnavailable {
            reason: "permission denied".into(),
        })
    }
}
