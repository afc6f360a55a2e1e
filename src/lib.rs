//! LoRa hive mesh simulator.
//!
//! Hives report sensor readings to a central server by flooding DATA packets
//! over a LoRa mesh; the server answers with an ACK that floods back to the
//! originating hive. Radio transmissions are modelled as expanding wavefronts
//! attenuated by material obstacles.

pub mod common;
pub mod simulation;
