//! # Rotation
//!
//! Lifecycle classification and replacement of service bundles before they
//! expire.

pub mod manager;
pub mod schedule;

pub use manager::{
    RotationManager, RotationOptions, RotationOutcome, RotationReason, RotationReport, SweepSummary,
};
pub use schedule::{LifecycleState, RotationSchedule};
