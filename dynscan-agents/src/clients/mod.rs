//! External Service Clients
//!
//! HTTP clients for services the engine drives remotely.

pub mod device;

pub use device::*;
