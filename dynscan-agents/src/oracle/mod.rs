//! Oracle Client
//!
//! Typed adapter around the external decision service: vision decisions,
//! reflection on actions, and final aggregation. All three share one
//! strict-then-fallback JSON parser.

pub mod client;
pub mod parse;
pub mod prompts;
pub mod types;

pub use client::{HttpOracle, Oracle, OracleClient, OracleConfig, OracleError};
pub use parse::{parse_oracle_json, OracleParseError, ParseTier};
pub use types::{AggregationVerdict, ReflectionStatus, ReflectionVerdict, VisionDecision};
