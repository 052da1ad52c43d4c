//! liquidplan: execution planning for robotic liquid handlers.
//!
//! Turns an unordered set of mix, split and prompt operations into an
//! ordered, resource-bound instruction list plus a manifest of the source
//! liquids that must be on the deck before the run starts.

pub mod cli;
pub mod core;
pub mod driver;
pub mod instructions;
