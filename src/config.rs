use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::encoder::UnkPolicy;
use crate::sniff::{CaptureLimits, PcapSource};

#[derive(Debug, Parser)]
#[command(
    name = "kddsniff",
    version,
    about = "Classify network traffic against the NSL-KDD feature schema"
)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Directory holding forest.json, encoders.json and labels.json
    #[arg(long, env = "KDDSNIFF_MODEL_DIR", default_value = "model")]
    pub model_dir: PathBuf,

    /// Capture interface (pcap's default device when omitted)
    #[arg(long, env = "KDDSNIFF_INTERFACE")]
    pub interface: Option<String>,

    /// BPF filter applied to live captures
    #[arg(long, env = "KDDSNIFF_FILTER")]
    pub filter: Option<String>,

    /// Packets per capture window
    #[arg(long, env = "KDDSNIFF_CAPTURE_COUNT", default_value_t = 200)]
    pub capture_count: usize,

    /// Capture window length in seconds
    #[arg(long, env = "KDDSNIFF_CAPTURE_TIMEOUT", default_value_t = 6)]
    pub capture_timeout: u64,

    /// When the UNK code joins the categorical vocabularies
    #[arg(long, env = "KDDSNIFF_UNK_POLICY", value_enum, default_value_t = UnkPolicy::Sealed)]
    pub unk_policy: UnkPolicy,

    /// Largest accepted `/predict` upload, in megabytes
    #[arg(long, env = "KDDSNIFF_MAX_UPLOAD_MB", default_value_t = 512)]
    pub max_upload_mb: usize,

    /// Write each encoded live frame to this CSV file
    #[arg(long, env = "KDDSNIFF_DEBUG_DUMP")]
    pub debug_dump: Option<PathBuf>,
}

impl Settings {
    pub fn limits(&self) -> CaptureLimits {
        CaptureLimits {
            max_packets: self.capture_count,
            max_duration: Duration::from_secs(self.capture_timeout),
        }
    }

    pub fn upload_limit(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    /// Live device capture, or replay of `pcap` when given.
    pub fn source(&self, pcap: Option<PathBuf>) -> PcapSource {
        let source = match pcap {
            Some(path) => PcapSource::file(path),
            None => PcapSource::device(self.interface.clone()),
        };
        source.with_filter(self.filter.clone())
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the HTTP API
    Serve {
        #[arg(long, env = "KDDSNIFF_BIND", default_value = "127.0.0.1:5000")]
        bind: SocketAddr,
    },
    /// Classify a CSV of NSL-KDD feature rows
    Predict { file: PathBuf },
    /// Capture one window and classify its flows
    Live {
        /// Read packets from a capture file instead of an interface
        #[arg(long)]
        pcap: Option<PathBuf>,
    },
}
