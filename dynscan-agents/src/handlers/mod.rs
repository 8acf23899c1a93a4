//! HTTP Handlers
//!
//! Transport-independent request handlers shared by the service and the CLI.
//!
//! - `AnalyzeHandler`: runs one app analysis to a verdict

pub mod analyze;

pub use analyze::*;
