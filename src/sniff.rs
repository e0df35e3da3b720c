// src/sniff.rs
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender};
use etherparse::{NetSlice, SlicedPacket, TcpSlice, TransportSlice};
use pcap::{Active, Capture, Device, Offline, PacketHeader};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

const SNAPLEN: i32 = 65535;
const READ_TIMEOUT_MS: i32 = 100;

// pcap link-layer header types
const LINKTYPE_ETHERNET: i32 = 1;
const LINKTYPE_RAW: i32 = 101;
const LINKTYPE_IPV4: i32 = 228;
const LINKTYPE_IPV6: i32 = 229;

pub const TCP_FIN: u16 = 0x001;
pub const TCP_SYN: u16 = 0x002;
pub const TCP_RST: u16 = 0x004;
pub const TCP_PSH: u16 = 0x008;
pub const TCP_ACK: u16 = 0x010;
pub const TCP_URG: u16 = 0x020;
pub const TCP_ECE: u16 = 0x040;
pub const TCP_CWR: u16 = 0x080;
pub const TCP_NS: u16 = 0x100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Other,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Other => "other",
        }
    }
}

/// One parsed packet. Fields a frame does not carry keep their placeholder
/// values: `0.0.0.0`, port 0, protocol `other`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PacketRecord {
    pub timestamp: f64,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: Protocol,
    pub length: u32,
    pub tcp_flags: Option<u16>,
}

impl PacketRecord {
    pub fn placeholder(timestamp: f64, length: u32) -> Self {
        PacketRecord {
            timestamp,
            src_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dst_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            src_port: 0,
            dst_port: 0,
            protocol: Protocol::Other,
            length,
            tcp_flags: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureLimits {
    pub max_packets: usize,
    pub max_duration: Duration,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        CaptureLimits {
            max_packets: 200,
            max_duration: Duration::from_secs(6),
        }
    }
}

/// Fallback window when `max_duration` overflows the clock.
const FAR_DEADLINE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

impl CaptureLimits {
    /// Instant at which the window closes, starting now.
    pub fn deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.max_duration)
            .unwrap_or_else(|| now + FAR_DEADLINE)
    }
}

/// A bounded, time-windowed supply of parsed packets.
///
/// Each call is an independent capture window. An empty result is not an
/// error; only failing to start the capture is.
pub trait PacketSource: Send + Sync {
    fn capture(&self, limits: CaptureLimits) -> Result<Vec<PacketRecord>>;
}

#[derive(Debug, Clone)]
pub enum CaptureTarget {
    /// A named interface, or pcap's default device.
    Device(Option<String>),
    /// A saved capture replayed through the live pipeline.
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct PcapSource {
    target: CaptureTarget,
    filter: Option<String>,
}

impl PcapSource {
    pub fn device(interface: Option<String>) -> Self {
        PcapSource {
            target: CaptureTarget::Device(interface),
            filter: None,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        PcapSource {
            target: CaptureTarget::File(path.into()),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }
}

impl PacketSource for PcapSource {
    fn capture(&self, limits: CaptureLimits) -> Result<Vec<PacketRecord>> {
        match &self.target {
            CaptureTarget::Device(interface) => {
                let mut cap = create_capture(interface.as_deref())?;
                if let Some(filter) = &self.filter {
                    cap.filter(filter, true).map_err(Error::capture)?;
                }
                Ok(capture_live(cap, limits))
            }
            CaptureTarget::File(path) => {
                let mut cap = Capture::from_file(path).map_err(Error::capture)?;
                if let Some(filter) = &self.filter {
                    cap.filter(filter, true).map_err(Error::capture)?;
                }
                Ok(read_offline(&mut cap, limits))
            }
        }
    }
}

/// Hands out a fixed set of records, truncated to the packet limit.
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    packets: Vec<PacketRecord>,
}

impl ReplaySource {
    pub fn new(packets: Vec<PacketRecord>) -> Self {
        ReplaySource { packets }
    }
}

impl PacketSource for ReplaySource {
    fn capture(&self, limits: CaptureLimits) -> Result<Vec<PacketRecord>> {
        Ok(self
            .packets
            .iter()
            .take(limits.max_packets)
            .cloned()
            .collect())
    }
}

fn create_capture(interface: Option<&str>) -> Result<Capture<Active>> {
    let device = match interface {
        Some(name) => Device::from(name),
        None => Device::lookup().map_err(Error::capture)?,
    };
    info!(device = %device.name, "opening capture device");

    Capture::from_device(device)
        .map_err(Error::capture)?
        .promisc(false)
        .snaplen(SNAPLEN)
        .timeout(READ_TIMEOUT_MS)
        .immediate_mode(true)
        .open()
        .map_err(Error::capture)
}

/// Reads on a dedicated thread and collects from the channel until the
/// packet limit or the deadline, whichever comes first.
fn capture_live(cap: Capture<Active>, limits: CaptureLimits) -> Vec<PacketRecord> {
    let kind = FrameKind::from_linktype(cap.get_datalink().0);
    let (tx, rx) = unbounded();
    let running = Arc::new(AtomicBool::new(true));

    let running_clone = running.clone();
    thread::spawn(move || process_packets(cap, kind, tx, running_clone));

    let deadline = limits.deadline();
    let mut records = Vec::new();
    while records.len() < limits.max_packets {
        match rx.recv_deadline(deadline) {
            Ok(record) => records.push(record),
            Err(_) => break,
        }
    }
    running.store(false, Ordering::SeqCst);

    debug!(packets = records.len(), "capture window closed");
    records
}

fn process_packets(
    mut cap: Capture<Active>,
    kind: FrameKind,
    sender: Sender<PacketRecord>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match cap.next() {
            Ok(packet) => {
                let record = parse_frame(
                    kind,
                    packet.data,
                    timestamp_of(packet.header),
                    packet.header.len,
                );
                if sender.send(record).is_err() {
                    break;
                }
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(e) => {
                warn!(error = %e, "packet capture stopped");
                break;
            }
        }
    }
}

fn read_offline(cap: &mut Capture<Offline>, limits: CaptureLimits) -> Vec<PacketRecord> {
    let kind = FrameKind::from_linktype(cap.get_datalink().0);
    let deadline = limits.deadline();
    let mut records = Vec::new();

    while records.len() < limits.max_packets && Instant::now() < deadline {
        match cap.next() {
            Ok(packet) => {
                records.push(parse_frame(
                    kind,
                    packet.data,
                    timestamp_of(packet.header),
                    packet.header.len,
                ));
            }
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => {
                warn!(error = %e, "stopped reading capture file");
                break;
            }
        }
    }
    records
}

fn timestamp_of(header: &PacketHeader) -> f64 {
    header.ts.tv_sec as f64 + header.ts.tv_usec as f64 / 1_000_000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Ethernet,
    RawIp,
    Unsupported,
}

impl FrameKind {
    pub fn from_linktype(linktype: i32) -> Self {
        match linktype {
            LINKTYPE_ETHERNET => FrameKind::Ethernet,
            LINKTYPE_RAW | LINKTYPE_IPV4 | LINKTYPE_IPV6 => FrameKind::RawIp,
            _ => FrameKind::Unsupported,
        }
    }
}

/// Best-effort extraction of the layer fields a frame carries. Never fails;
/// whatever cannot be parsed stays at its placeholder value.
pub fn parse_frame(kind: FrameKind, data: &[u8], timestamp: f64, length: u32) -> PacketRecord {
    let mut record = PacketRecord::placeholder(timestamp, length);

    let sliced = match kind {
        FrameKind::Ethernet => SlicedPacket::from_ethernet(data).ok(),
        FrameKind::RawIp => SlicedPacket::from_ip(data).ok(),
        FrameKind::Unsupported => None,
    };
    let Some(sliced) = sliced else {
        return record;
    };

    match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => {
            record.src_addr = IpAddr::V4(ipv4.header().source_addr());
            record.dst_addr = IpAddr::V4(ipv4.header().destination_addr());
        }
        Some(NetSlice::Ipv6(ipv6)) => {
            record.src_addr = IpAddr::V6(ipv6.header().source_addr());
            record.dst_addr = IpAddr::V6(ipv6.header().destination_addr());
        }
        _ => {}
    }

    match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => {
            record.protocol = Protocol::Tcp;
            record.src_port = tcp.source_port();
            record.dst_port = tcp.destination_port();
            record.tcp_flags = Some(flag_bits(tcp));
        }
        Some(TransportSlice::Udp(udp)) => {
            record.protocol = Protocol::Udp;
            record.src_port = udp.source_port();
            record.dst_port = udp.destination_port();
        }
        _ => {}
    }

    record
}

fn flag_bits(tcp: &TcpSlice) -> u16 {
    [
        (tcp.fin(), TCP_FIN),
        (tcp.syn(), TCP_SYN),
        (tcp.rst(), TCP_RST),
        (tcp.psh(), TCP_PSH),
        (tcp.ack(), TCP_ACK),
        (tcp.urg(), TCP_URG),
        (tcp.ece(), TCP_ECE),
        (tcp.cwr(), TCP_CWR),
        (tcp.ns(), TCP_NS),
    ]
    .iter()
    .filter(|(set, _)| *set)
    .fold(0, |bits, (_, bit)| bits | bit)
}
