//! # EBB Host
//!
//! The command front-end of the plotter motion controller: it parses
//! command lines, applies the range checks, invokes the motion planners,
//! feeds the command FIFO, and formats the wire responses. The
//! [`machine`] module owns the shared [`motion::StepperCore`] and the tick
//! clock; [`dispatch`] is the per-command logic; [`drivers`] models the
//! motor-driver and RC-servo side effects; [`config`] loads the INI
//! configuration.

pub mod config;
pub mod dispatch;
pub mod drivers;
pub mod machine;

pub use config::ControllerConfig;
pub use dispatch::Dispatcher;
pub use machine::{ClockMode, Machine};
