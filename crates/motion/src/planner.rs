//! # Motion Planner
//!
//! Translates validated user requests into prepared [`MotionEntry`] values
//! for the command FIFO. Four production forms:
//!
//! 1. [`plan_timed`] — a `(duration, steps)` request at constant velocity;
//!    an all-zero request degenerates into a pure delay.
//! 2. [`plan_accel`] — a `(v_initial, v_final, steps)` request; the
//!    velocities describe the combined pen tip, distributed across both
//!    axes and realized through a per-tick rate delta.
//! 3. [`plan_low_level`] — raw accumulator parameters straight from the
//!    host, validated only against "no motion at all".
//! 4. [`plan_home_legs`] — a return-to-origin request, possibly split into
//!    several legs so no axis falls below the representable rate floor.
//!
//! ## Rate computation regimes
//!
//! The constant-velocity planner picks between two integer paths for the
//! per-tick rate `steps / (TICKS_PER_MS * duration)`:
//!
//! - **Small step counts** (`< 0x2_0000`) use a 15-bit scaled divide, plus
//!   a 16-bit fractional refinement when the move is longer than 30 ms.
//!   The refinement costs a second divide, which short moves cannot afford
//!   between ticks; skipping it there keeps the minimum move time down.
//! - **Large step counts** divide first and scale after, trading precision
//!   for range.
//!
//! Out-of-range results are never returned as errors from this layer: the
//! rate is clamped to one step per tick, a zero rate with outstanding
//! steps is bumped to the minimum, and each correction is reported as a
//! [`Malfunction`] so the front-end can log it. Rejecting here would leave
//! a half-validated command wedged between parser and interrupt; clamping
//! keeps the step generator fed with something executable.

use heapless::Vec;

use crate::{
    entry::{dir_bit, MotionEntry, MoveCommand, AXIS_COUNT},
    errors::PlannerError,
    fixed::{MAX_STEP_ADD, STEP_PHASE_ONE},
    MAX_MOVE_STEPS, MIN_STEP_PERIOD_MS, TICKS_PER_MS, TICK_HZ,
};

#[cfg(not(feature = "std"))]
use libm::{round, sqrt};

#[cfg(feature = "std")]
#[inline]
fn sqrt(v: f64) -> f64 {
    v.sqrt()
}

#[cfg(feature = "std")]
#[inline]
fn round(v: f64) -> f64 {
    v.round()
}

/// Step counts below this use the precise small-step rate path.
const SMALL_STEP_LIMIT: u32 = 0x2_0000;

/// Moves at or below this duration skip the fractional rate refinement.
const REFINE_MIN_MS: u32 = 30;

/// Shortest homing leg the planner will emit.
const MIN_HOME_LEG_MS: u32 = 10;

/// A `(duration, signed steps)` request in planner units: the body of an
/// `SM`/`XM` command or one homing leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedMove {
    pub duration_ms: u32,
    pub steps: [i32; AXIS_COUNT],
}

/// Raw per-axis parameters of a low-level move, as supplied on the wire.
/// The sign of `steps` selects the direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawAxisMove {
    pub step_add: u32,
    pub steps: i32,
    pub step_add_inc: i32,
}

/// A self-corrected planner fault. The entry is still valid and executable;
/// the front-end reports the correction to the host as a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malfunction {
    /// The computed integer rate exceeded one step per tick and was clamped.
    RateTooHigh { axis: usize, computed: u64 },
    /// The computed rate was zero for an axis with steps outstanding and
    /// was bumped to the minimum nonzero rate.
    RateZero { axis: usize },
}

/// A planned entry plus any self-corrections applied while computing it.
#[derive(Debug, Clone)]
pub struct PlannedMove {
    pub entry: MotionEntry,
    pub malfunctions: Vec<Malfunction, AXIS_COUNT>,
}

/// Up to one constant-velocity leg per axis realizing a homing request.
pub type HomePlan = Vec<TimedMove, AXIS_COUNT>;

/// Plans a constant-velocity move (`SM`, and `XM`/`HM` after their own
/// transforms).
///
/// An all-zero step request becomes a pure delay of the full duration.
/// Otherwise each axis gets a rate equal to `|steps| / (TICKS_PER_MS *
/// duration)` steps per tick, a zero rate delta and its absolute step
/// budget. Out-of-range rates are self-corrected, never rejected; see the
/// module docs.
pub fn plan_timed(request: TimedMove) -> PlannedMove {
    let TimedMove { duration_ms, steps } = request;

    if steps.iter().all(|&s| s == 0) {
        return PlannedMove {
            entry: MotionEntry::delay(TICKS_PER_MS.saturating_mul(duration_ms)),
            malfunctions: Vec::new(),
        };
    }

    // Validation upstream keeps the duration in range; when the host has
    // limit checks disabled, clamp instead of dividing by zero.
    let duration_ms = duration_ms.clamp(1, MAX_MOVE_STEPS);
    let ticks = TICKS_PER_MS * duration_ms;

    let mut entry = MotionEntry {
        command: MoveCommand::MotorMove,
        ..MotionEntry::IDLE
    };
    let mut malfunctions = Vec::new();

    for axis in 0..AXIS_COUNT {
        if steps[axis] < 0 {
            entry.dir_bits |= dir_bit(axis);
        }
        let steps_abs = steps[axis].unsigned_abs();

        let (mut rate, refinement) = if steps_abs < SMALL_STEP_LIMIT {
            let scaled = (steps_abs << 15) as u64;
            let rate = scaled / ticks as u64;
            let refinement = if duration_ms > REFINE_MIN_MS {
                ((scaled % ticks as u64) << 16) / ticks as u64
            } else {
                0
            };
            (rate, refinement as u32)
        } else {
            let rate = (steps_abs / duration_ms) as u64 * 0x8000 / TICKS_PER_MS as u64;
            (rate, 0)
        };

        if rate > 0x8000 {
            let _ = malfunctions.push(Malfunction::RateTooHigh {
                axis,
                computed: rate,
            });
            rate = 0x8000;
        }
        if rate == 0 && steps_abs != 0 {
            let _ = malfunctions.push(Malfunction::RateZero { axis });
            rate = 1;
        }

        entry.step_add[axis] = ((rate as u32) << 16) | refinement;
        entry.steps_remaining[axis] = steps_abs;
    }

    PlannedMove {
        entry,
        malfunctions,
    }
}

/// Plans an accelerated two-axis move (`AM`).
///
/// `initial_rate` and `final_rate` are combined-tip velocities in steps
/// per second. Each axis starts at its share of the initial velocity and
/// ramps linearly (in rate per tick) toward its share of the final one.
/// Float math is confined to this planning step; the produced entry is
/// integer-only.
pub fn plan_accel(
    initial_rate: u32,
    final_rate: u32,
    steps1: i32,
    steps2: i32,
) -> Result<MotionEntry, PlannerError> {
    let steps = [steps1, steps2];

    let mut entry = MotionEntry {
        command: MoveCommand::MotorMove,
        ..MotionEntry::IDLE
    };

    let abs1 = steps1.unsigned_abs() as f64;
    let abs2 = steps2.unsigned_abs() as f64;
    let distance = round(sqrt(abs1 * abs1 + abs2 * abs2));
    if distance == 0.0 {
        return Err(PlannerError::InvalidMove);
    }

    // Initial phase rate of the combined tip, to be scaled by each axis'
    // share of the path.
    let rate_per_step = initial_rate as f64 * STEP_PHASE_ONE as f64 / TICK_HZ as f64 / distance;
    // Tip acceleration over the path, rescaled into phase units per tick².
    let accel = (final_rate as f64 * final_rate as f64
        - initial_rate as f64 * initial_rate as f64)
        / (2.0 * distance * distance);
    let accel_per_step = accel * STEP_PHASE_ONE as f64 / (TICK_HZ as f64 * TICK_HZ as f64);

    for (axis, &s) in steps.iter().enumerate() {
        if s < 0 {
            entry.dir_bits |= dir_bit(axis);
        }
        let steps_abs = s.unsigned_abs();
        entry.step_add[axis] = (steps_abs as f64 * rate_per_step).min(MAX_STEP_ADD as f64) as u32;
        entry.step_add_inc[axis] = (steps_abs as f64 * accel_per_step) as i32;
        entry.steps_remaining[axis] = steps_abs;

        if initial_rate != final_rate && entry.step_add_inc[axis] == 0 && steps_abs > 0 {
            return Err(PlannerError::AccelerationZero { axis });
        }
    }

    Ok(entry)
}

/// Plans a low-level move (`LM`) from raw accumulator parameters.
///
/// Rejects only parameter combinations that can produce no motion at all:
/// for every axis, either no steps are budgeted or both the rate and the
/// rate delta are zero. Caller-supplied rates above one step per tick are
/// capped to keep the enqueue invariant.
pub fn plan_low_level(
    axis1: RawAxisMove,
    axis2: RawAxisMove,
) -> Result<MotionEntry, PlannerError> {
    let axes = [axis1, axis2];

    let idle =
        |m: &RawAxisMove| m.steps == 0 || (m.step_add == 0 && m.step_add_inc == 0);
    if axes.iter().all(idle) {
        return Err(PlannerError::InvalidMove);
    }

    let mut entry = MotionEntry {
        command: MoveCommand::MotorMove,
        ..MotionEntry::IDLE
    };
    for (axis, m) in axes.iter().enumerate() {
        if m.steps < 0 {
            entry.dir_bits |= dir_bit(axis);
        }
        entry.step_add[axis] = m.step_add.min(MAX_STEP_ADD);
        entry.step_add_inc[axis] = m.step_add_inc;
        entry.steps_remaining[axis] = m.steps.unsigned_abs();
    }

    Ok(entry)
}

/// Mixed-axis transform for H-bot / CoreXY style geometries (`XM`): the
/// motor step counts are the sum and difference of the cartesian request.
/// Saturating so a hostile request cannot wrap; the front-end's 24-bit
/// range check rejects saturated values anyway.
pub const fn corexy(a: i32, b: i32) -> (i32, i32) {
    (a.saturating_add(b), a.saturating_sub(b))
}

/// Plans a homing move (`HM`): up to [`AXIS_COUNT`] constant-velocity legs
/// that drive every axis back to step position zero.
///
/// `deltas` is the signed distance each axis must travel (the negated
/// global step counters). The primary axis is the one with the largest
/// distance; `step_rate` applies to it, and the other axes ride along.
/// Any secondary axis that would fall below the representable rate floor
/// in the combined move instead gets its own earlier diagonal leg: the
/// secondary runs at the floor-safe duration for its own distance while
/// the primary makes equal progress in its travel direction, and the final
/// leg finishes the primary's remainder.
pub fn plan_home_legs(
    step_rate: u32,
    deltas: [i32; AXIS_COUNT],
) -> Result<HomePlan, PlannerError> {
    if step_rate == 0 {
        return Err(PlannerError::HomeRateZero);
    }
    let abs = deltas.map(i32::unsigned_abs);
    if abs.iter().any(|&a| a > MAX_MOVE_STEPS) {
        return Err(PlannerError::HomeStepsTooLarge);
    }
    if step_rate / 1000 > TICKS_PER_MS {
        return Err(PlannerError::HomeRateTooHigh);
    }

    // Primary axis: largest distance to origin; later axis wins ties.
    let mut primary = 0;
    for axis in 1..AXIS_COUNT {
        if abs[axis] >= abs[primary] {
            primary = axis;
        }
    }

    // Saturating: 24-bit step counts at single-digit rates overflow a
    // 32-bit millisecond count; the timed planner clamps durations anyway.
    let leg_duration =
        |steps: u32| (steps as u64 * 1000 / step_rate as u64).min(u32::MAX as u64) as u32;
    let final_duration = leg_duration(abs[primary]);

    let mut legs: HomePlan = Vec::new();
    let mut remaining_primary = deltas[primary];
    let mut final_steps = [0i32; AXIS_COUNT];

    for axis in 0..AXIS_COUNT {
        if axis == primary {
            continue;
        }
        if abs[axis] != 0 && final_duration / MIN_STEP_PERIOD_MS >= abs[axis] {
            // Too slow in the combined move: dog-leg this axis to zero
            // first, with the primary advancing the same distance.
            let primary_share = if deltas[primary] >= 0 {
                abs[axis] as i32
            } else {
                -(abs[axis] as i32)
            };
            let mut steps = [0i32; AXIS_COUNT];
            steps[axis] = deltas[axis];
            steps[primary] = primary_share;
            let _ = legs.push(TimedMove {
                duration_ms: leg_duration(abs[axis]).max(MIN_HOME_LEG_MS),
                steps,
            });
            remaining_primary -= primary_share;
        } else {
            final_steps[axis] = deltas[axis];
        }
    }

    final_steps[primary] = remaining_primary;
    let _ = legs.push(TimedMove {
        duration_ms: final_duration.max(MIN_HOME_LEG_MS),
        steps: final_steps,
    });

    Ok(legs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_zero_steps_become_a_delay() {
        let planned = plan_timed(TimedMove {
            duration_ms: 1000,
            steps: [0, 0, 0],
        });
        assert_eq!(planned.entry.command, MoveCommand::Delay);
        assert_eq!(planned.entry.delay_ticks, 25_000);
        assert!(planned.malfunctions.is_empty());
    }

    #[test]
    fn one_step_per_second_uses_the_refined_small_path() {
        // 1 step over 1000 ms: rate 1 in the upper bits plus a fractional
        // refinement of (32768 % 25000) << 16 / 25000.
        let planned = plan_timed(TimedMove {
            duration_ms: 1000,
            steps: [1, 0, 0],
        });
        assert_eq!(planned.entry.step_add[0], 0x1_4F8B);
        assert_eq!(planned.entry.steps_remaining, [1, 0, 0]);
        assert!(planned.malfunctions.is_empty());
    }

    #[test]
    fn short_moves_skip_the_refinement() {
        // 25 steps over 25 ms is exactly 1/25 step per tick; at <= 30 ms
        // only the coarse 15-bit rate is kept.
        let planned = plan_timed(TimedMove {
            duration_ms: 25,
            steps: [25, 0, 0],
        });
        let expected = ((25u32 << 15) / (25 * 25)) << 16;
        assert_eq!(planned.entry.step_add[0], expected);
    }

    #[test]
    fn over_fast_requests_clamp_to_one_step_per_tick() {
        // 1000 steps in 1 ms asks for 40x the tick rate; the planner clamps
        // to one step per tick and flags the correction.
        let planned = plan_timed(TimedMove {
            duration_ms: 1,
            steps: [1000, 0, 0],
        });
        assert_eq!(planned.entry.step_add[0], MAX_STEP_ADD);
        assert!(matches!(
            planned.malfunctions[0],
            Malfunction::RateTooHigh { axis: 0, .. }
        ));
    }

    #[test]
    fn zero_rate_with_steps_is_bumped_to_minimum() {
        // 1 step over 4 hours computes a zero 15-bit rate; the planner must
        // keep the axis progressing.
        let planned = plan_timed(TimedMove {
            duration_ms: 14_400_000,
            steps: [0, 1, 0],
        });
        assert_eq!(planned.entry.step_add[1] >> 16, 1);
        assert!(planned
            .malfunctions
            .iter()
            .any(|m| matches!(m, Malfunction::RateZero { axis: 1 })));
    }

    #[test]
    fn large_step_path_matches_coarse_formula() {
        let steps = 0x20_0000;
        let duration = 600_000;
        let planned = plan_timed(TimedMove {
            duration_ms: duration,
            steps: [steps, 0, 0],
        });
        let expected = ((steps as u32 / duration) as u64 * 0x8000 / 25) as u32;
        assert_eq!(planned.entry.step_add[0] >> 16, expected);
    }

    #[test]
    fn negative_steps_set_direction_bits() {
        let planned = plan_timed(TimedMove {
            duration_ms: 100,
            steps: [-100, 200, -300],
        });
        assert_eq!(planned.entry.dir_bits, dir_bit(0) | dir_bit(2));
        assert_eq!(planned.entry.steps_remaining, [100, 200, 300]);
    }

    #[test]
    fn accel_initial_rate_matches_request() {
        // 600 steps on axis 1, none on axis 2: the tip distance equals the
        // axis distance, so the initial rate is the tip rate.
        let entry = plan_accel(100, 500, 600, 0).unwrap();
        let expected = (100.0 * STEP_PHASE_ONE as f64 / 25_000.0) as u32;
        assert!(entry.step_add[0].abs_diff(expected) <= 1);
        assert!(entry.step_add_inc[0] > 0);
        assert_eq!(entry.steps_remaining, [600, 0, 0]);
        // The zero-step axis never advances.
        assert_eq!(entry.step_add_inc[1], 0);
    }

    #[test]
    fn equal_velocities_have_zero_rate_delta() {
        let entry = plan_accel(400, 400, 300, 400).unwrap();
        assert_eq!(entry.step_add_inc, [0, 0, 0]);
        assert_eq!(entry.steps_remaining, [300, 400, 0]);
    }

    #[test]
    fn deceleration_has_negative_rate_delta() {
        let entry = plan_accel(500, 100, 600, 0).unwrap();
        assert!(entry.step_add_inc[0] < 0);
    }

    #[test]
    fn accel_rejects_zero_length_moves() {
        assert_eq!(plan_accel(100, 500, 0, 0), Err(PlannerError::InvalidMove));
    }

    #[test]
    fn accel_rejects_a_vanishing_rate_delta() {
        // A huge path with a tiny velocity change truncates the per-tick
        // delta to zero; the move would never reach its final velocity.
        assert_eq!(
            plan_accel(24_999, 25_000, 0xFF_FFFF, 0xFF_FFFF),
            Err(PlannerError::AccelerationZero { axis: 0 })
        );
    }

    #[test]
    fn low_level_rejects_moves_with_no_motion() {
        let idle = RawAxisMove {
            step_add: 0,
            steps: 0,
            step_add_inc: 0,
        };
        assert_eq!(plan_low_level(idle, idle), Err(PlannerError::InvalidMove));

        // Steps budgeted but no rate and no ramp on one axis, nothing on
        // the other.
        let stuck = RawAxisMove {
            step_add: 0,
            steps: 1000,
            step_add_inc: 0,
        };
        assert_eq!(plan_low_level(stuck, idle), Err(PlannerError::InvalidMove));
    }

    #[test]
    fn low_level_passes_parameters_through() {
        let m1 = RawAxisMove {
            step_add: 0x1_0000,
            steps: -500,
            step_add_inc: 16,
        };
        let m2 = RawAxisMove {
            step_add: 0x2_0000,
            steps: 250,
            step_add_inc: 0,
        };
        let entry = plan_low_level(m1, m2).unwrap();
        assert_eq!(entry.command, MoveCommand::MotorMove);
        assert_eq!(entry.dir_bits, dir_bit(0));
        assert_eq!(entry.step_add[0], 0x1_0000);
        assert_eq!(entry.step_add_inc[0], 16);
        assert_eq!(entry.steps_remaining, [500, 250, 0]);
    }

    #[test]
    fn low_level_caps_the_rate_at_one_step_per_tick() {
        let hot = RawAxisMove {
            step_add: u32::MAX,
            steps: 10,
            step_add_inc: 0,
        };
        let idle = RawAxisMove {
            step_add: 0,
            steps: 0,
            step_add_inc: 0,
        };
        let entry = plan_low_level(hot, idle).unwrap();
        assert_eq!(entry.step_add[0], MAX_STEP_ADD);
    }

    #[test]
    fn corexy_mixes_sum_and_difference() {
        assert_eq!(corexy(100, 30), (130, 70));
        assert_eq!(corexy(-100, 30), (-70, -130));
    }

    #[test]
    fn home_single_leg_when_rates_are_balanced() {
        // Both axes close in distance: one combined move suffices.
        let legs = plan_home_legs(1000, [-4000, 3000, 0]).unwrap();
        assert_eq!(legs.len(), 1);
        assert_eq!(legs[0].steps, [-4000, 3000, 0]);
        assert_eq!(legs[0].duration_ms, 4000);
    }

    #[test]
    fn home_splits_when_the_secondary_would_stall() {
        // Axis 1 needs 100000 steps, axis 2 only 50: at 1000 steps/s the
        // combined move would run 100 s, far below the floor for axis 2.
        let legs = plan_home_legs(1000, [-100_000, 50, 0]).unwrap();
        assert_eq!(legs.len(), 2);
        // Leg 1: axis 2 to zero, axis 1 riding along in its direction.
        assert_eq!(legs[0].steps, [-50, 50, 0]);
        assert_eq!(legs[0].duration_ms, 50);
        // Leg 2: the primary finishes alone.
        assert_eq!(legs[1].steps, [-99_950, 0, 0]);
        assert_eq!(legs[1].duration_ms, 100_000);
    }

    #[test]
    fn home_quadrants_put_the_primary_share_on_its_own_sign() {
        for (d1, d2) in [
            (100_000, 50),
            (-100_000, 50),
            (100_000, -50),
            (-100_000, -50),
        ] {
            let legs = plan_home_legs(1000, [d1, d2, 0]).unwrap();
            assert_eq!(legs.len(), 2);
            let share = legs[0].steps[0];
            assert_eq!(share.unsigned_abs(), 50);
            assert_eq!(share.signum(), d1.signum());
            assert_eq!(legs[0].steps[1], d2);
            assert_eq!(legs[0].steps[0] + legs[1].steps[0], d1);
            assert_eq!(legs[1].steps[1], 0);
        }
    }

    #[test]
    fn home_third_axis_is_split_like_the_others() {
        let legs = plan_home_legs(1000, [-100_000, 0, 40]).unwrap();
        assert_eq!(legs.len(), 2);
        assert_eq!(legs[0].steps, [-40, 0, 40]);
        assert_eq!(legs[1].steps, [-99_960, 0, 0]);
    }

    #[test]
    fn home_third_axis_can_be_primary() {
        let legs = plan_home_legs(1000, [10, 0, -100_000]).unwrap();
        assert_eq!(legs.len(), 2);
        assert_eq!(legs[0].steps, [10, 0, -10]);
        assert_eq!(legs[1].steps, [0, 0, -99_990]);
    }

    #[test]
    fn home_at_origin_is_a_short_pause() {
        let legs = plan_home_legs(1000, [0, 0, 0]).unwrap();
        assert_eq!(legs.len(), 1);
        assert_eq!(legs[0].steps, [0, 0, 0]);
        assert_eq!(legs[0].duration_ms, MIN_HOME_LEG_MS);
    }

    #[test]
    fn home_rejects_out_of_range_requests() {
        assert_eq!(
            plan_home_legs(0, [100, 0, 0]),
            Err(PlannerError::HomeRateZero)
        );
        assert_eq!(
            plan_home_legs(26_000, [100, 0, 0]),
            Err(PlannerError::HomeRateTooHigh)
        );
        assert_eq!(
            plan_home_legs(1000, [0x100_0000, 0, 0]),
            Err(PlannerError::HomeStepsTooLarge)
        );
        // 25999 floors to 25 in the integer check and squeaks through.
        assert!(plan_home_legs(25_999, [100, 0, 0]).is_ok());
    }
}
