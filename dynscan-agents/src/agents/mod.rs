//! Analysis Agents
//!
//! - `AppAnalysisAgent`: dynamic behavior analysis of one app

pub mod analysis;
pub mod traits;

pub use analysis::*;
pub use traits::*;
