//! Schema module - Configuration types for the fluid simulation.

mod config;

pub use config::*;
