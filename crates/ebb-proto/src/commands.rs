//! Typed command structs & enums.
//!
//! These structures represent the parsed form of the motion command
//! surface. Field types match the wire ranges the firmware accepts; the
//! front-end applies the semantic limit checks.

/// Raw per-axis parameters of a low-level move (`LM`), straight off the
/// wire. The sign of `steps` selects the motor direction.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct LowLevelAxis {
    pub step_add: u32,
    pub steps: i32,
    pub step_add_inc: i32,
}

/// Commands sent from the host to the motion controller.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Command {
    /// `EM,e1[,e2]` — enable/disable the motor drivers and select the
    /// microstep mode. Clears the global step counters.
    EnableMotors { axis1: u8, axis2: Option<u8> },
    /// `SM,dur,s1[,s2[,s3]]` — timed constant-velocity move.
    Move {
        duration_ms: u32,
        steps: [i32; 3],
    },
    /// `AM,vi,vf,s1,s2` — accelerated move; velocities are of the combined
    /// pen tip in steps per second.
    AccelMove {
        initial_rate: u32,
        final_rate: u32,
        steps1: i32,
        steps2: i32,
    },
    /// `LM,sa1,sc1,si1,sa2,sc2,si2` — low-level move from raw accumulator
    /// parameters.
    LowLevelMove {
        axis1: LowLevelAxis,
        axis2: LowLevelAxis,
    },
    /// `XM,dur,a,b` — mixed-axis (CoreXY / H-bot) move.
    MixedMove {
        duration_ms: u32,
        steps_a: i32,
        steps_b: i32,
    },
    /// `HM,rate` — home every axis back to step position zero.
    Home { step_rate: u32 },
    /// `ES` — emergency stop.
    EmergencyStop,
    /// `QM` — query motor status.
    QueryMotors,
    /// `QS` — query global step positions.
    QuerySteps,
    /// `CS` — clear global step positions.
    ClearSteps,
}

impl Command {
    /// The two-letter wire code of this command.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EnableMotors { .. } => "EM",
            Self::Move { .. } => "SM",
            Self::AccelMove { .. } => "AM",
            Self::LowLevelMove { .. } => "LM",
            Self::MixedMove { .. } => "XM",
            Self::Home { .. } => "HM",
            Self::EmergencyStop => "ES",
            Self::QueryMotors => "QM",
            Self::QuerySteps => "QS",
            Self::ClearSteps => "CS",
        }
    }
}
