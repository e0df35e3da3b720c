//! Groups captured packets into per-window flows keyed by their 5-tuple.
//!
//! Flows are not canonicalized: `A:x -> B:y` and `B:y -> A:x` are two
//! different entries. Nothing is evicted before the window closes.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::Serialize;

use crate::sniff::{PacketRecord, Protocol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FlowKey {
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: Protocol,
}

impl FlowKey {
    pub fn from_packet(pkt: &PacketRecord) -> Self {
        FlowKey {
            src_addr: pkt.src_addr,
            dst_addr: pkt.dst_addr,
            src_port: pkt.src_port,
            dst_port: pkt.dst_port,
            protocol: pkt.protocol,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowEntry {
    pub key: FlowKey,
    pub first_ts: f64,
    pub last_ts: f64,
    pub packet_count: u64,
    pub src_bytes: u64,
    pub dst_bytes: u64,
    pub tcp_flags: Vec<u16>,
    pub service: &'static str,
}

impl FlowEntry {
    fn new(key: FlowKey, ts: f64) -> Self {
        FlowEntry {
            key,
            first_ts: ts,
            last_ts: ts,
            packet_count: 0,
            src_bytes: 0,
            dst_bytes: 0,
            tcp_flags: Vec::new(),
            service: "other",
        }
    }

    fn update(&mut self, pkt: &PacketRecord) {
        self.packet_count += 1;
        self.last_ts = self.last_ts.max(pkt.timestamp);

        // Attribution compares raw addresses against the flow's recorded
        // source, not the packet's direction within a conversation.
        if pkt.src_addr == self.key.src_addr {
            self.src_bytes += u64::from(pkt.length);
        } else {
            self.dst_bytes += u64::from(pkt.length);
        }

        if pkt.protocol == Protocol::Tcp {
            self.tcp_flags.push(pkt.tcp_flags.unwrap_or(0));
        }

        // Re-evaluated for every packet; the last match wins.
        if let Some(service) = service_for_port(pkt.dst_port) {
            self.service = service;
        }
    }

    pub fn duration(&self) -> f64 {
        (self.last_ts - self.first_ts).max(0.0)
    }

    /// Truncated mean of the observed TCP flag values, `0` when none were seen.
    pub fn mean_tcp_flags(&self) -> u64 {
        if self.tcp_flags.is_empty() {
            return 0;
        }
        let sum: u64 = self.tcp_flags.iter().map(|&f| u64::from(f)).sum();
        sum / self.tcp_flags.len() as u64
    }

    pub fn is_land(&self) -> bool {
        self.key.src_addr == self.key.dst_addr
    }
}

/// Static destination-port lookup used to approximate the NSL-KDD `service`.
pub fn service_for_port(port: u16) -> Option<&'static str> {
    match port {
        80 | 443 | 8000 | 8080 => Some("http"),
        20 | 21 | 22 => Some("ftp"),
        53 => Some("domain_u"),
        25 | 587 => Some("smtp"),
        123 => Some("ntp_u"),
        _ => None,
    }
}

/// Flows of one capture window, kept in first-seen order.
#[derive(Debug, Default)]
pub struct FlowTable {
    index: HashMap<FlowKey, usize>,
    entries: Vec<FlowEntry>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aggregate<'a>(packets: impl IntoIterator<Item = &'a PacketRecord>) -> Self {
        let mut table = FlowTable::new();
        for pkt in packets {
            table.add(pkt);
        }
        table
    }

    pub fn add(&mut self, pkt: &PacketRecord) {
        let key = FlowKey::from_packet(pkt);
        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => {
                self.entries.push(FlowEntry::new(key, pkt.timestamp));
                self.index.insert(key, self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        self.entries[slot].update(pkt);
    }

    pub fn get(&self, key: &FlowKey) -> Option<&FlowEntry> {
        self.index.get(key).map(|&slot| &self.entries[slot])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlowEntry> {
        self.entries.iter()
    }

    /// Closes the window, handing out the finished flows.
    pub fn into_flows(self) -> Vec<FlowEntry> {
        self.entries
    }
}
