//! Core planning pipeline: request parsing through instruction generation.

pub mod codegen;
pub mod deck;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod inputs;
pub mod labware;
pub mod layout;
pub mod lp;
pub mod manifest;
pub mod orchestrator;
pub mod parser;
pub mod planner;
pub mod sequencer;
pub mod solutions;
pub mod state;
pub mod types;
pub mod volumes;
