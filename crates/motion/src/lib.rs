#![deny(clippy::all)]
#![deny(warnings)]
#![cfg_attr(not(feature = "std"), no_std)]

//! # Motion Control Crate
//!
//! The motion core of an EBB-class plotter controller, usable on both host
//! and MCU (`no_std`-friendly).
//!
//! Provides the core motion primitives:
//! - Prepared motion entries and the bounded command FIFO
//! - Constant-velocity, accelerated, low-level and homing planners
//! - The tick-driven step generator (the interrupt body)
//! - Global step position tracking and emergency stop

pub mod entry;
pub mod errors;
pub mod fifo;
pub mod fixed;
pub mod planner;
pub mod stepper;

// Re-export core types for easier access
pub use entry::{dir_bit, MotionEntry, MoveCommand, AXIS_COUNT};
pub use errors::PlannerError;
pub use fifo::{CommandFifo, FifoFull, FIFO_DEPTH};
pub use fixed::{MAX_STEP_ADD, STEP_PHASE_ONE};
pub use planner::{
    corexy, plan_accel, plan_home_legs, plan_low_level, plan_timed, HomePlan, Malfunction,
    PlannedMove, RawAxisMove, TimedMove,
};
pub use stepper::{EStopReport, MotorQuery, StepPulse, StepperCore};

/// Rate of the step-generating tick interrupt, in Hz.
pub const TICK_HZ: u32 = 25_000;

/// Ticks per millisecond of wall time.
pub const TICKS_PER_MS: u32 = TICK_HZ / 1000;

/// Slowest representable step period in milliseconds (= 1311 at 25 kHz).
///
/// The 15-bit integer rate floor of [`entry::MotionEntry::step_add`] makes
/// one step per `0x8000 / TICK_HZ` seconds the slowest motion an entry can
/// carry; command validation uses this to reject under-floor requests.
pub const MIN_STEP_PERIOD_MS: u32 = (1000 * 0x8000_u32).div_ceil(TICK_HZ);

/// Largest step count or duration a single command may carry (24-bit).
pub const MAX_MOVE_STEPS: u32 = 0xFF_FFFF;
