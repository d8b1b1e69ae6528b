//! # Step Generator
//!
//! [`StepperCore`] owns the command FIFO, the entry currently being
//! executed, and the global step counters. [`StepperCore::tick`] is the
//! interrupt body: the platform invokes it once per tick at
//! [`crate::TICK_HZ`] and routes the returned [`StepPulse`] to the step
//! pins (or a simulator trace).
//!
//! ## Exclusion contract
//!
//! The core performs no locking of its own. The platform must keep the
//! producer-side methods and `tick` from running concurrently: on an MCU
//! that means masking the tick interrupt around producer calls, on a host
//! a mutex around the whole core. Under that exclusion every producer
//! observation of the global step counters and of entry state is an atomic
//! snapshot, which is all the command front-end requires.
//!
//! Entries execute strictly in enqueue order. Within one entry the axes
//! interleave tick by tick, but each axis individually sees a monotonic
//! phase progression.

use crate::{
    entry::{dir_bit, MotionEntry, MoveCommand, AXIS_COUNT},
    fifo::{CommandFifo, FifoFull},
    fixed::{apply_rate_delta, STEP_PHASE_FRACTION_MASK, STEP_PHASE_ONE},
};

/// Step edges emitted by one tick, one bit per axis, plus the direction
/// bits that were in force when they were emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize))]
pub struct StepPulse {
    pub step_bits: u8,
    pub dir_bits: u8,
}

impl StepPulse {
    /// True when the tick emitted no edge on any axis.
    pub fn is_empty(&self) -> bool {
        self.step_bits == 0
    }

    /// True when the tick emitted an edge on the given axis.
    pub fn stepped(&self, axis: usize) -> bool {
        self.step_bits & dir_bit(axis) != 0
    }
}

/// Snapshot answered to a motor status query (`QM`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize))]
pub struct MotorQuery {
    /// An entry is adopted or queued.
    pub command_executing: bool,
    pub motor1_moving: bool,
    pub motor2_moving: bool,
    /// At least one entry is queued behind the executing one.
    pub fifo_pending: bool,
}

/// Outcome of an emergency stop (`ES`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize))]
pub struct EStopReport {
    /// A motor move was active or queued when the stop landed.
    pub command_interrupted: bool,
    /// Axis 1/2 step budgets of the queued move that was discarded.
    pub fifo_steps: [u32; 2],
    /// Axis 1/2 steps left in the move that was executing.
    pub remaining_steps: [u32; 2],
}

/// The motion state shared between the command front-end and the tick
/// interrupt. The queue depth defaults to [`crate::fifo::FIFO_DEPTH`].
#[derive(Debug)]
pub struct StepperCore<const DEPTH: usize = 1> {
    fifo: CommandFifo<DEPTH>,
    /// Entry under execution; `MoveCommand::None` when idle.
    current: MotionEntry,
    /// Per-axis 31-bit phase accumulators, reset when an entry is adopted.
    phase: [u32; AXIS_COUNT],
    /// Global signed step position per axis; zero is "home".
    gsc: [i32; AXIS_COUNT],
}

impl<const DEPTH: usize> StepperCore<DEPTH> {
    pub const fn new() -> Self {
        Self {
            fifo: CommandFifo::new(),
            current: MotionEntry::IDLE,
            phase: [0; AXIS_COUNT],
            gsc: [0; AXIS_COUNT],
        }
    }

    // --- consumer side: the tick interrupt ---

    /// One tick of the step generator. Adopts the FIFO head when idle,
    /// counts delays down, advances the phase accumulators and emits step
    /// edges, and retires finished entries.
    pub fn tick(&mut self) -> StepPulse {
        if self.current.command == MoveCommand::None {
            match self.fifo.pop() {
                Some(entry) => {
                    self.current = entry;
                    self.phase = [0; AXIS_COUNT];
                }
                None => return StepPulse::default(),
            }
        }

        match self.current.command {
            // A neutralized entry flushes through in one tick.
            MoveCommand::None => StepPulse::default(),
            MoveCommand::Delay => {
                if self.current.delay_ticks > 0 {
                    self.current.delay_ticks -= 1;
                }
                if self.current.delay_ticks == 0 {
                    self.current = MotionEntry::IDLE;
                }
                StepPulse::default()
            }
            MoveCommand::MotorMove => {
                let mut pulse = StepPulse {
                    step_bits: 0,
                    dir_bits: self.current.dir_bits,
                };
                for axis in 0..AXIS_COUNT {
                    if self.current.steps_remaining[axis] == 0 {
                        continue;
                    }
                    // Cannot wrap while the enqueue invariant
                    // (step_add <= one step per tick) holds.
                    self.phase[axis] = self.phase[axis].wrapping_add(self.current.step_add[axis]);
                    if self.phase[axis] >= STEP_PHASE_ONE {
                        self.phase[axis] &= STEP_PHASE_FRACTION_MASK;
                        pulse.step_bits |= dir_bit(axis);
                        self.current.steps_remaining[axis] -= 1;
                        let delta = if self.current.dir_bits & dir_bit(axis) != 0 {
                            -1
                        } else {
                            1
                        };
                        self.gsc[axis] = self.gsc[axis].wrapping_add(delta);
                    }
                    self.current.step_add[axis] = apply_rate_delta(
                        self.current.step_add[axis],
                        self.current.step_add_inc[axis],
                    );
                }
                if self.current.axes_done() {
                    self.current = MotionEntry::IDLE;
                }
                pulse
            }
        }
    }

    /// Runs `n` ticks, discarding the pulses. Convenience for hosts that
    /// batch the tick interrupt.
    pub fn run_ticks(&mut self, n: u32) {
        for _ in 0..n {
            self.tick();
        }
    }

    // --- producer side: the command front-end ---

    /// True when the FIFO can accept another entry.
    pub fn fifo_has_room(&self) -> bool {
        self.fifo.has_room()
    }

    /// Publishes a fully constructed entry to the step generator.
    pub fn enqueue(&mut self, entry: MotionEntry) -> Result<(), FifoFull> {
        self.fifo.push(entry)
    }

    /// Entries queued plus the entry under execution.
    pub fn depth(&self) -> usize {
        self.fifo.len() + usize::from(self.current.command != MoveCommand::None)
    }

    /// True when the FIFO is empty and no entry is executing.
    pub fn is_idle(&self) -> bool {
        self.depth() == 0
    }

    /// Snapshot of the global step counters.
    pub fn positions(&self) -> [i32; AXIS_COUNT] {
        self.gsc
    }

    /// Zeroes the global step counters (`CS`, and motor enable changes).
    pub fn clear_positions(&mut self) {
        self.gsc = [0; AXIS_COUNT];
    }

    /// Answers a `QM` query. A motor is "moving" when some entry is
    /// executing and the entry in (or next in) the generator still has
    /// steps budgeted for that motor.
    pub fn query_motors(&self) -> MotorQuery {
        let executing = self.depth() > 0;
        let entry = if self.current.command != MoveCommand::None {
            Some(&self.current)
        } else {
            self.fifo.head()
        };
        let moving =
            |axis: usize| executing && entry.is_some_and(|e| e.steps_remaining[axis] > 0);
        MotorQuery {
            command_executing: executing,
            motor1_moving: moving(0),
            motor2_moving: moving(1),
            fifo_pending: self.depth() > 1,
        }
    }

    /// Emergency stop: neutralizes the queued and executing motor moves so
    /// the generator stops emitting edges at the very next tick, and
    /// reports what was interrupted. Delay entries keep counting; the stop
    /// halts motors, not time.
    pub fn emergency_stop(&mut self) -> EStopReport {
        let mut report = EStopReport::default();

        let mut first_queued = true;
        self.fifo.for_each_queued(|entry| {
            if entry.command == MoveCommand::MotorMove {
                if first_queued {
                    report.fifo_steps = [entry.steps_remaining[0], entry.steps_remaining[1]];
                    first_queued = false;
                }
                report.command_interrupted = true;
                entry.neutralize();
            }
        });

        if self.current.command == MoveCommand::MotorMove {
            report.command_interrupted = true;
            report.remaining_steps = [
                self.current.steps_remaining[0],
                self.current.steps_remaining[1],
            ];
            self.current.neutralize();
        }

        report
    }
}

impl<const DEPTH: usize> Default for StepperCore<DEPTH> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::MAX_STEP_ADD;

    fn motor_move(step_add: [u32; 3], steps: [u32; 3], dir_bits: u8) -> MotionEntry {
        MotionEntry {
            command: MoveCommand::MotorMove,
            dir_bits,
            step_add,
            steps_remaining: steps,
            ..MotionEntry::IDLE
        }
    }

    #[test]
    fn idle_core_emits_nothing() {
        let mut core: StepperCore<1> = StepperCore::new();
        for _ in 0..100 {
            assert!(core.tick().is_empty());
        }
        assert!(core.is_idle());
        assert_eq!(core.positions(), [0, 0, 0]);
    }

    #[test]
    fn delay_counts_exact_ticks() {
        let mut core: StepperCore<1> = StepperCore::new();
        core.enqueue(MotionEntry::delay(10)).unwrap();
        for _ in 0..9 {
            core.tick();
            assert!(!core.is_idle());
        }
        core.tick();
        assert!(core.is_idle());
    }

    #[test]
    fn full_rate_steps_every_tick() {
        let mut core: StepperCore<1> = StepperCore::new();
        core.enqueue(motor_move([MAX_STEP_ADD, 0, 0], [5, 0, 0], 0))
            .unwrap();
        for _ in 0..5 {
            let pulse = core.tick();
            assert!(pulse.stepped(0));
            assert!(!pulse.stepped(1));
        }
        assert!(core.is_idle());
        assert_eq!(core.positions(), [5, 0, 0]);
    }

    #[test]
    fn half_rate_steps_every_other_tick() {
        let mut core: StepperCore<1> = StepperCore::new();
        core.enqueue(motor_move([STEP_PHASE_ONE / 2, 0, 0], [3, 0, 0], 0))
            .unwrap();
        let mut edges = Vec::new();
        for t in 0..6 {
            if core.tick().stepped(0) {
                edges.push(t);
            }
        }
        assert_eq!(edges, vec![1, 3, 5]);
        assert!(core.is_idle());
    }

    #[test]
    fn direction_bit_steps_negative() {
        let mut core: StepperCore<1> = StepperCore::new();
        core.enqueue(motor_move(
            [MAX_STEP_ADD, MAX_STEP_ADD, 0],
            [4, 6, 0],
            dir_bit(1),
        ))
        .unwrap();
        core.run_ticks(6);
        assert_eq!(core.positions(), [4, -6, 0]);
    }

    #[test]
    fn acceleration_reshapes_the_rate_each_tick() {
        let mut core: StepperCore<1> = StepperCore::new();
        let mut entry = motor_move([0, 0, 0], [1000, 0, 0], 0);
        entry.step_add[0] = 0x10_0000;
        entry.step_add_inc[0] = 0x10_0000;
        core.enqueue(entry).unwrap();

        // Rate ramps linearly, so edges arrive ever faster: with add(n) =
        // (n+1) * 0x10_0000 the accumulated phase after n ticks is
        // n(n+1)/2 * 0x10_0000, crossing one step at tick 63 and two by
        // tick 90.
        let mut total = 0u32;
        let mut first_edge = None;
        for t in 0..91 {
            if core.tick().stepped(0) {
                total += 1;
                first_edge.get_or_insert(t);
            }
        }
        assert_eq!(first_edge, Some(63));
        assert_eq!(total, 2);
    }

    #[test]
    fn rate_saturates_instead_of_overrunning() {
        let mut core: StepperCore<1> = StepperCore::new();
        let mut entry = motor_move([MAX_STEP_ADD, 0, 0], [10, 0, 0], 0);
        entry.step_add_inc[0] = i32::MAX;
        core.enqueue(entry).unwrap();
        // Even with a runaway positive delta the axis never emits more than
        // one edge per tick.
        for _ in 0..10 {
            let pulse = core.tick();
            assert!(pulse.stepped(0));
        }
        assert!(core.is_idle());
        assert_eq!(core.positions(), [10, 0, 0]);
    }

    #[test]
    fn entries_execute_in_enqueue_order() {
        let mut core: StepperCore<2> = StepperCore::new();
        core.enqueue(motor_move([MAX_STEP_ADD, 0, 0], [2, 0, 0], 0))
            .unwrap();
        core.enqueue(motor_move([0, MAX_STEP_ADD, 0], [0, 2, 0], dir_bit(1)))
            .unwrap();
        assert_eq!(core.depth(), 2);
        core.run_ticks(2);
        assert_eq!(core.positions(), [2, 0, 0]);
        core.run_ticks(2);
        assert_eq!(core.positions(), [2, -2, 0]);
        assert!(core.is_idle());
    }

    #[test]
    fn query_reports_moving_axes() {
        let mut core: StepperCore<2> = StepperCore::new();
        assert_eq!(core.query_motors(), MotorQuery::default());

        core.enqueue(motor_move([0x1_0000, 0, 0], [10, 0, 0], 0))
            .unwrap();
        let q = core.query_motors();
        assert!(q.command_executing);
        assert!(q.motor1_moving);
        assert!(!q.motor2_moving);
        // A single entry executes without anything waiting behind it.
        assert!(!q.fifo_pending);

        core.enqueue(MotionEntry::delay(100)).unwrap();
        assert!(core.query_motors().fifo_pending);

        core.tick();
        let q = core.query_motors();
        assert!(q.command_executing);
        assert!(q.motor1_moving);
        assert!(q.fifo_pending);
    }

    #[test]
    fn estop_interrupts_active_and_queued_moves() {
        let mut core: StepperCore<2> = StepperCore::new();
        core.enqueue(motor_move([MAX_STEP_ADD, 0, 0], [100, 0, 0], 0))
            .unwrap();
        core.enqueue(motor_move([0, MAX_STEP_ADD, 0], [0, 40, 0], 0))
            .unwrap();
        core.run_ticks(10); // 10 steps into the first move

        let report = core.emergency_stop();
        assert!(report.command_interrupted);
        assert_eq!(report.remaining_steps, [90, 0]);
        assert_eq!(report.fifo_steps, [0, 40]);

        // No further edges, ever.
        for _ in 0..200 {
            assert!(core.tick().is_empty());
        }
        assert_eq!(core.positions(), [10, 0, 0]);
        assert!(core.is_idle());
    }

    #[test]
    fn estop_with_nothing_running_reports_clean() {
        let mut core: StepperCore<1> = StepperCore::new();
        let report = core.emergency_stop();
        assert_eq!(report, EStopReport::default());
    }

    #[test]
    fn estop_leaves_delays_running() {
        let mut core: StepperCore<1> = StepperCore::new();
        core.enqueue(MotionEntry::delay(50)).unwrap();
        core.tick();
        let report = core.emergency_stop();
        assert!(!report.command_interrupted);
        assert!(!core.is_idle());
        core.run_ticks(49);
        assert!(core.is_idle());
    }

    #[test]
    fn clear_positions_zeroes_all_axes() {
        let mut core: StepperCore<1> = StepperCore::new();
        core.enqueue(motor_move([MAX_STEP_ADD, 0, MAX_STEP_ADD], [3, 0, 7], 0))
            .unwrap();
        core.run_ticks(10);
        assert_eq!(core.positions(), [3, 0, 7]);
        core.clear_positions();
        assert_eq!(core.positions(), [0, 0, 0]);
    }
}
