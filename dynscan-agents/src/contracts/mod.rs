//! Contracts Module
//!
//! Schemas shared by the device controller, the oracle client and the
//! exploration engine. Every record that leaves the engine is one of these
//! types.

pub mod action;
pub mod common;
pub mod emulator;
pub mod step_record;
pub mod verdict;

pub use action::*;
pub use common::*;
pub use step_record::*;
pub use verdict::*;
