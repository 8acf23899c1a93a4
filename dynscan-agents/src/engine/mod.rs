//! Exploration Engine
//!
//! Runs one analysis: prepare the device, identify the app, explore it
//! under a wall-clock and error budget, then aggregate every step record
//! into a final verdict.

pub mod budget;
pub mod config;
pub mod explorer;
pub mod memory;
pub mod state;

pub use budget::ErrorBudget;
pub use config::{ConfigError, EngineConfig};
pub use explorer::{agents as record_agents, CancelHandle, ExplorationEngine};
pub use memory::Memory;
pub use state::{InvalidTransition, RunState};
