//! # Motion Core Simulator
//!
//! Runs a [`motion::StepperCore`] under a deterministic virtual clock and
//! records every emitted step edge as a trace. Integration tests use the
//! trace to check edge counts and timing against planned motion; the
//! trace can also be dumped as JSON for offline inspection.

pub mod plotter;

pub use plotter::{SimPlotter, TraceEntry};
