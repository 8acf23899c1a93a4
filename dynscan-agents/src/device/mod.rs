//! Device Controller
//!
//! Virtual-device lifecycle and UI control: endpoint leasing, artifact
//! upload, install with package discovery, launch, UI actions, screenshots
//! and remote-view lookup.
//!
//! - [`DeviceController`]: in-process controller over a [`DeviceBackend`]
//! - [`DeviceOps`]: the surface the exploration engine drives
//! - [`SessionManager`]: lease/release of device sessions

pub mod backend;
pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod ops;
pub mod packages;
pub mod session;

pub use backend::{AdbBackend, CommandOutput, DeviceBackend};
pub use config::DeviceConfig;
pub use controller::DeviceController;
pub use error::DeviceError;
pub use ops::{AppLaunch, DeviceOps, UploadOutcome};
pub use session::{DeviceSession, RunHandle, SessionId, SessionManager, TaskId};
