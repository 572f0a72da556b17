//! # turnstile-runtime
//!
//! Test runtime for turnstile.
//!
//! This crate provides:
//! - Layered configuration (defaults, YAML file, environment)
//! - A runtime hosting machines and monitors for one test run
//! - A deterministic round-robin driver with liveness checking
//! - Bug reports and state/event coverage

pub mod config;
pub mod coverage;
pub mod driver;
pub mod error;
pub mod runtime;

pub use config::{Config, ConfigError, CoverageConfig, MailboxConfig, TestingConfig};
pub use coverage::{CoverageReport, CoverageTracker, TypeCoverage};
pub use driver::{Driver, RunSummary, StopReason};
pub use error::RuntimeError;
pub use runtime::{BugReport, Runtime};
