//! The Drift Detector (§4.5): compares a Lab Snapshot against its Lab Intent.

pub mod detector;

pub use detector::DriftDetector;
