// Core modules
pub mod backtest;
pub mod collections;
pub mod config;
pub mod context;
pub mod execution;
pub mod models;

// Re-export commonly used types
pub use collections::{Action, EventCollection, NamedCollection, Observable};
pub use context::Context;
pub use execution::{Replay, SimulationGateway};
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
