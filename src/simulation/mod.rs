//! Wave propagation and flood protocol core.
//!
//! The simulation is single-threaded and tick-driven: the host calls
//! [`SimulationState::tick`] once per frame and every wave advance, obstacle
//! attenuation, reception test and protocol reaction happens inside that call.
//!
//! ## Module Organization
//!
//! - `types`: Points, materials, obstacles, nodes, payloads and events
//! - `geometry`: Distance and disc/shape intersection helpers
//! - `signal_calculations`: LoRa link budget and simplified-mode range
//! - `spatial_index`: Bounding-box index used for candidate queries
//! - `wave`: Expanding wavefronts with per-sector attenuation
//! - `protocol`: Flood-with-acknowledgement reactions to receptions
//! - `statistics`: Protocol counters
//! - `network`: The simulation state and its tick
//! - `ingest`: Batched entity ingestion from an out-of-band producer

pub mod geometry;
pub mod ingest;
pub mod network;
pub mod protocol;
pub mod signal_calculations;
pub mod spatial_index;
pub mod statistics;
pub mod types;
pub mod wave;

pub use network::SimulationState;
pub use statistics::Statistics;
pub use types::{SimulationEvent, WaveKind};
