//! Network traffic classification against the NSL-KDD feature schema.
//!
//! Packets from a [`sniff::PacketSource`] are grouped into flows
//! ([`flow::FlowTable`]), turned into 41-column feature vectors
//! ([`features::FeatureVector`]), encoded through the shared
//! [`encoder::EncoderRegistry`] and scored by a pre-trained
//! [`model::Classifier`]. Uploaded CSV rows take the same path from the
//! feature-vector stage on.

pub mod api;
pub mod config;
pub mod encoder;
pub mod error;
pub mod features;
pub mod flow;
pub mod model;
pub mod pipeline;
pub mod sniff;
pub mod summary;

pub use error::{Error, Result};
pub use pipeline::{BatchReport, Detector, LiveReport};
