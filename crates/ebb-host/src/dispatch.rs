//! Command dispatcher.
//!
//! Takes one command line at a time, parses it, applies the range checks,
//! invokes the planners and feeds the command FIFO, and returns the full
//! response text for the wire. Responses follow the controller's line
//! protocol: `OK\n\r` on success (suppressible by the ack flag),
//! `!0 Err: <message>\n\r` on rejection, and data lines for the query
//! commands.

use crate::{config::ControllerConfig, drivers::DriverState, machine::Machine};
use parking_lot::MutexGuard;

use ebb_proto::{
    commands::{Command, LowLevelAxis},
    parse_line, ParseError,
};
use motion::{
    corexy, plan_accel, plan_home_legs, plan_low_level, plan_timed, Malfunction, MotionEntry,
    MoveCommand, PlannerError, RawAxisMove, TimedMove, MAX_MOVE_STEPS, MIN_STEP_PERIOD_MS,
    TICKS_PER_MS, TICK_HZ,
};
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{debug, warn};

/// The controller's line terminator.
pub const LINE_END: &str = "\n\r";

/// Highest velocity an `AM` command accepts, in steps per second.
const MAX_ACCEL_RATE: u32 = TICK_HZ;
/// Lowest velocity an `AM` command accepts.
const MIN_ACCEL_RATE: u32 = 4;
/// Highest `EM` enable value (full-step mode).
const MAX_ENABLE_VALUE: u8 = 5;

/// A command rejection, formatted on the wire as `!0 Err: <message>`.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CommandError {
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("parameter outside limit")]
    ParameterOutsideLimit,
    #[error("<move_duration> larger than 16777215 ms.")]
    DurationTooLarge,
    #[error("<axis{0}> larger than 16777215 steps.")]
    StepsTooLarge(usize),
    #[error("<axis{0}> step rate > 25K steps/second.")]
    RateTooHigh(usize),
    #[error("<axis{0}> step rate < 1.31Hz.")]
    RateTooLow(usize),
    #[error("<velocity_initial> larger than 25000.")]
    VelocityInitialTooHigh,
    #[error("<velocity_final> larger than 25000.")]
    VelocityFinalTooHigh,
    #[error("<velocity_initial> less than 4.")]
    VelocityInitialTooLow,
    #[error("<velocity_final> less than 4.")]
    VelocityFinalTooLow,
    #[error("<axis{0}> acceleration value is 0.")]
    AccelerationZero(usize),
    #[error("move produces no motion.")]
    NoMotion,
    #[error("steps to home larger than 16,777,215 on at least one axis.")]
    HomeStepsTooLarge,
    #[error("HM step rate > 25K steps/second.")]
    HomeRateTooHigh,
}

impl From<PlannerError> for CommandError {
    fn from(err: PlannerError) -> Self {
        match err {
            PlannerError::InvalidMove => Self::NoMotion,
            PlannerError::AccelerationZero { axis } => Self::AccelerationZero(axis + 1),
            PlannerError::HomeStepsTooLarge => Self::HomeStepsTooLarge,
            PlannerError::HomeRateTooHigh => Self::HomeRateTooHigh,
            PlannerError::HomeRateZero => Self::ParameterOutsideLimit,
        }
    }
}

/// Parses, validates and executes command lines against a [`Machine`].
pub struct Dispatcher {
    machine: Machine,
    ack_enable: bool,
    limit_checks: bool,
}

impl Dispatcher {
    pub fn new(machine: Machine, config: &ControllerConfig) -> Self {
        Self {
            machine,
            ack_enable: config.protocol.ack_enable,
            limit_checks: config.protocol.limit_checks,
        }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn drivers(&self) -> MutexGuard<'_, DriverState> {
        self.machine.drivers()
    }

    /// Handles one command line and returns the complete response text.
    pub fn handle_line(&mut self, line: &str) -> String {
        match self.execute(line) {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, line, "command rejected");
                format!("!0 Err: {err}{LINE_END}")
            }
        }
    }

    fn execute(&mut self, line: &str) -> Result<String, CommandError> {
        let command = parse_line(line)?;
        debug!(code = command.code(), ?command, "dispatching");
        match command {
            Command::EnableMotors { axis1, axis2 } => {
                if axis1 > MAX_ENABLE_VALUE || axis2.is_some_and(|v| v > MAX_ENABLE_VALUE) {
                    return Err(CommandError::ParameterOutsideLimit);
                }
                self.machine.drivers().apply_enable(axis1, axis2);
                // Enable or resolution changes invalidate the step positions.
                self.machine.with_core(|core| core.clear_positions());
                Ok(self.ack())
            }
            Command::Move { duration_ms, steps } => {
                if self.limit_checks {
                    validate_timed(duration_ms, &steps)?;
                }
                let diagnostics = self.submit_timed(TimedMove { duration_ms, steps });
                Ok(diagnostics + &self.ack())
            }
            Command::MixedMove {
                duration_ms,
                steps_a,
                steps_b,
            } => {
                let (s1, s2) = corexy(steps_a, steps_b);
                let steps = [s1, s2, 0];
                // Mixed-axis moves are validated regardless of the limit
                // check flag, on the transformed motor steps.
                validate_timed(duration_ms, &steps)?;
                let diagnostics = self.submit_timed(TimedMove { duration_ms, steps });
                Ok(diagnostics + &self.ack())
            }
            Command::AccelMove {
                initial_rate,
                final_rate,
                steps1,
                steps2,
            } => {
                validate_accel(initial_rate, final_rate, steps1, steps2)?;
                let entry = plan_accel(initial_rate, final_rate, steps1, steps2)?;
                self.submit_entry(entry);
                Ok(self.ack())
            }
            Command::LowLevelMove { axis1, axis2 } => {
                let entry = plan_low_level(raw_axis(axis1), raw_axis(axis2))?;
                self.submit_entry(entry);
                Ok(self.ack())
            }
            Command::Home { step_rate } => {
                // Homing measures distance from a settled machine: drain
                // the FIFO and the generator before sampling positions.
                self.machine.wait_for_idle();
                let deltas = self
                    .machine
                    .with_core(|core| core.positions())
                    .map(i32::wrapping_neg);
                let legs = plan_home_legs(step_rate, deltas)?;
                let mut diagnostics = String::new();
                for leg in legs {
                    diagnostics.push_str(&self.submit_timed(leg));
                }
                Ok(diagnostics + &self.ack())
            }
            Command::EmergencyStop => {
                let report = self.machine.with_core(|core| core.emergency_stop());
                self.machine.drivers().halt_servo();
                let mut out = format!(
                    "{},{},{},{},{}{LINE_END}",
                    u8::from(report.command_interrupted),
                    report.fifo_steps[0],
                    report.fifo_steps[1],
                    report.remaining_steps[0],
                    report.remaining_steps[1],
                );
                out.push_str(&self.ack());
                Ok(out)
            }
            Command::QueryMotors => {
                let query = self.machine.with_core(|core| core.query_motors());
                Ok(format!(
                    "QM,{},{},{},{}{LINE_END}",
                    u8::from(query.command_executing),
                    u8::from(query.motor1_moving),
                    u8::from(query.motor2_moving),
                    u8::from(query.fifo_pending),
                ))
            }
            Command::QuerySteps => {
                let positions = self.machine.with_core(|core| core.positions());
                let mut out = format!("{},{}{LINE_END}", positions[0], positions[1]);
                out.push_str(&self.ack());
                Ok(out)
            }
            Command::ClearSteps => {
                self.machine.with_core(|core| core.clear_positions());
                Ok(self.ack())
            }
        }
    }

    /// Plans a timed move, publishes it, and renders any planner
    /// self-corrections as diagnostic lines ahead of the acknowledgment.
    fn submit_timed(&mut self, request: TimedMove) -> String {
        let planned = plan_timed(request);
        let mut diagnostics = String::new();
        for malfunction in &planned.malfunctions {
            warn!(?malfunction, "planner self-corrected");
            match malfunction {
                Malfunction::RateTooHigh { axis, computed } => {
                    let _ = write!(
                        diagnostics,
                        "Major malfunction Axis{} StepCounter too high : {computed}{LINE_END}",
                        axis + 1,
                    );
                }
                Malfunction::RateZero { axis } => {
                    let _ = write!(
                        diagnostics,
                        "Major malfunction Axis{} StepCounter zero{LINE_END}",
                        axis + 1,
                    );
                }
            }
        }
        self.submit_entry(planned.entry);
        diagnostics
    }

    /// Publishes a prepared entry, enabling the drivers for motor moves
    /// and blocking until the FIFO has room.
    fn submit_entry(&mut self, entry: MotionEntry) {
        if entry.command == MoveCommand::MotorMove {
            self.machine.drivers().enable_for_motion();
        }
        loop {
            self.machine.wait_for_fifo_room();
            // The dispatcher is the only producer, so the free slot seen
            // by the wait cannot be taken by anyone else; the retry is for
            // form.
            if self
                .machine
                .with_core(|core| core.enqueue(entry).is_ok())
            {
                return;
            }
        }
    }

    fn ack(&self) -> String {
        if self.ack_enable {
            format!("OK{LINE_END}")
        } else {
            String::new()
        }
    }
}

fn raw_axis(axis: LowLevelAxis) -> RawAxisMove {
    RawAxisMove {
        step_add: axis.step_add,
        steps: axis.steps,
        step_add_inc: axis.step_add_inc,
    }
}

/// Range checks for `SM`/`XM`: 24-bit duration and step budgets, and a
/// per-axis rate between the floor the accumulator can represent and one
/// step per tick. The divisions are integer on purpose, matching the
/// boundary behavior the protocol documents.
fn validate_timed(duration_ms: u32, steps: &[i32; 3]) -> Result<(), CommandError> {
    if duration_ms == 0 {
        return Err(CommandError::ParameterOutsideLimit);
    }
    if duration_ms > MAX_MOVE_STEPS {
        return Err(CommandError::DurationTooLarge);
    }
    for (axis, &s) in steps.iter().enumerate() {
        let steps_abs = s.unsigned_abs();
        if steps_abs > MAX_MOVE_STEPS {
            return Err(CommandError::StepsTooLarge(axis + 1));
        }
        if steps_abs / duration_ms > TICKS_PER_MS {
            return Err(CommandError::RateTooHigh(axis + 1));
        }
        if duration_ms / MIN_STEP_PERIOD_MS >= steps_abs && steps_abs != 0 {
            return Err(CommandError::RateTooLow(axis + 1));
        }
    }
    Ok(())
}

/// Range checks for `AM`: tip velocities within `[4, 25000]` steps per
/// second and 24-bit step budgets. Always applied; the acceleration
/// planner has no self-correction path.
fn validate_accel(
    initial_rate: u32,
    final_rate: u32,
    steps1: i32,
    steps2: i32,
) -> Result<(), CommandError> {
    if initial_rate > MAX_ACCEL_RATE {
        return Err(CommandError::VelocityInitialTooHigh);
    }
    if final_rate > MAX_ACCEL_RATE {
        return Err(CommandError::VelocityFinalTooHigh);
    }
    if initial_rate < MIN_ACCEL_RATE {
        return Err(CommandError::VelocityInitialTooLow);
    }
    if final_rate < MIN_ACCEL_RATE {
        return Err(CommandError::VelocityFinalTooLow);
    }
    for (axis, s) in [steps1, steps2].into_iter().enumerate() {
        if s.unsigned_abs() > MAX_MOVE_STEPS {
            return Err(CommandError::StepsTooLarge(axis + 1));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_validation_boundaries() {
        assert_eq!(
            validate_timed(0, &[10, 0, 0]),
            Err(CommandError::ParameterOutsideLimit)
        );
        assert_eq!(
            validate_timed(0x100_0000, &[10, 0, 0]),
            Err(CommandError::DurationTooLarge)
        );
        assert_eq!(
            validate_timed(1000, &[0x100_0000, 0, 0]),
            Err(CommandError::StepsTooLarge(1))
        );
        // 26 steps per millisecond is over the tick rate.
        assert_eq!(
            validate_timed(1, &[0, 26, 0]),
            Err(CommandError::RateTooHigh(2))
        );
        // 25999 steps over 1000 ms floors to 25/ms in the integer check.
        assert_eq!(validate_timed(1000, &[25_999, 0, 0]), Ok(()));
        // One step in 1311 ms is exactly the floor; at 1 step per 1312 ms
        // the axis is too slow.
        assert_eq!(validate_timed(1310, &[1, 0, 0]), Ok(()));
        assert_eq!(
            validate_timed(1311, &[1, 0, 0]),
            Err(CommandError::RateTooLow(1))
        );
        // Zero-step axes are exempt from the rate floor.
        assert_eq!(validate_timed(100_000, &[0, 0, 0]), Ok(()));
    }

    #[test]
    fn accel_validation_boundaries() {
        assert_eq!(
            validate_accel(25_001, 100, 1, 1),
            Err(CommandError::VelocityInitialTooHigh)
        );
        assert_eq!(
            validate_accel(100, 3, 1, 1),
            Err(CommandError::VelocityFinalTooLow)
        );
        assert_eq!(
            validate_accel(100, 200, 1, -0x100_0000),
            Err(CommandError::StepsTooLarge(2))
        );
        assert_eq!(validate_accel(4, 25_000, 600, -600), Ok(()));
    }
}
