//! Motor driver and RC-servo power state.
//!
//! The front-end decides enable, microstep and servo-power state as side
//! effects of the motion commands; the board layer mirrors this state onto
//! the actual driver pins. Keeping it as plain state here lets the command
//! logic and its tests run without any GPIO.

use tracing::{debug, info};

/// Microstep resolution selected by the `EM` command. One mode is shared
/// by both drivers on boards with the newer driver chips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicrostepMode {
    Sixteenth,
    Eighth,
    Quarter,
    Half,
    Full,
}

impl MicrostepMode {
    /// Decodes an `EM` enable value. `1..=5` select a mode (finest first);
    /// `0` disables the driver and keeps the previous mode.
    fn from_enable_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Sixteenth),
            2 => Some(Self::Eighth),
            3 => Some(Self::Quarter),
            4 => Some(Self::Half),
            5 => Some(Self::Full),
            _ => None,
        }
    }
}

/// Driver-chip and servo-power state owned by the command front-end.
/// The tick source calls [`DriverState::tick_ms`] so the servo power-off
/// countdown runs against elapsed time, not command traffic.
#[derive(Debug)]
pub struct DriverState {
    motor1_enabled: bool,
    motor2_enabled: bool,
    microstep: MicrostepMode,
    servo_poweroff_reload_ms: u32,
    servo_poweroff_deadline_ms: u32,
    servo_power_on: bool,
    servo_halted: bool,
}

impl DriverState {
    pub fn new(servo_poweroff_ms: u32) -> Self {
        Self {
            motor1_enabled: true,
            motor2_enabled: true,
            microstep: MicrostepMode::Sixteenth,
            servo_poweroff_reload_ms: servo_poweroff_ms,
            servo_poweroff_deadline_ms: servo_poweroff_ms,
            servo_power_on: true,
            servo_halted: false,
        }
    }

    /// Advances the RC-servo power-off countdown by elapsed wall time.
    /// When the deadline expires the servo supply is dropped and any
    /// in-flight pen motion halts; the next motion command powers it back
    /// up through [`DriverState::refresh_servo_power`].
    pub fn tick_ms(&mut self, ms: u32) {
        if self.servo_poweroff_deadline_ms == 0 {
            return;
        }
        self.servo_poweroff_deadline_ms = self.servo_poweroff_deadline_ms.saturating_sub(ms);
        if self.servo_poweroff_deadline_ms == 0 {
            self.servo_power_on = false;
            info!("servo power-off deadline expired");
            self.halt_servo();
        }
    }

    /// Applies an `EM` command: `0` disables a driver, `1..=5` enable it,
    /// with the first value also selecting the shared microstep mode.
    pub fn apply_enable(&mut self, axis1: u8, axis2: Option<u8>) {
        match MicrostepMode::from_enable_value(axis1) {
            Some(mode) => {
                self.microstep = mode;
                self.motor1_enabled = true;
                self.refresh_servo_power();
            }
            None => self.motor1_enabled = false,
        }
        if let Some(value) = axis2 {
            self.motor2_enabled = value > 0;
            if self.motor2_enabled {
                self.refresh_servo_power();
            }
        }
        debug!(
            motor1 = self.motor1_enabled,
            motor2 = self.motor2_enabled,
            microstep = ?self.microstep,
            "driver enable applied"
        );
    }

    /// Turns both drivers on ahead of an enqueued move and refreshes the
    /// servo power deadline.
    pub fn enable_for_motion(&mut self) {
        self.motor1_enabled = true;
        self.motor2_enabled = true;
        self.refresh_servo_power();
    }

    /// Powers the RC servo and restarts its power-off countdown.
    pub fn refresh_servo_power(&mut self) {
        self.servo_poweroff_deadline_ms = self.servo_poweroff_reload_ms;
        self.servo_power_on = true;
        self.servo_halted = false;
    }

    /// Emergency-stop hook for the servo collaborator: any in-flight pen
    /// motion is abandoned.
    pub fn halt_servo(&mut self) {
        self.servo_halted = true;
        info!("servo motion halted");
    }

    pub fn motor1_enabled(&self) -> bool {
        self.motor1_enabled
    }

    pub fn motor2_enabled(&self) -> bool {
        self.motor2_enabled
    }

    pub fn microstep(&self) -> MicrostepMode {
        self.microstep
    }

    pub fn servo_poweroff_deadline_ms(&self) -> u32 {
        self.servo_poweroff_deadline_ms
    }

    pub fn servo_power_on(&self) -> bool {
        self.servo_power_on
    }

    pub fn servo_halted(&self) -> bool {
        self.servo_halted
    }
}
