//! Lattice Core Components
//!
//! This crate wires the indexer pieces into a single [`Engine`] context
//! object and provides its configuration.

mod config;
mod engine;
mod error;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::CoreError;
