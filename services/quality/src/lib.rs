//! Post-load data quality checks
//!
//! A [`Snapshot`] of the warehouse is taken once; the ten checks in
//! [`checks::CHECKS`] run against it independently and the outcomes are collected
//! into a [`QualityReport`].

pub mod checks;
pub mod error;
pub mod report;
pub mod snapshot;

pub use error::{CheckFailure, ReportError};
pub use report::{quick_validation, run_checks, CheckStatus, QualityReport};
pub use snapshot::Snapshot;
