//! Shared motion core and tick clock.
//!
//! The [`motion::StepperCore`] and the [`DriverState`] are shared between
//! the command front-end and the tick source behind mutexes; holding a
//! lock is the host-side equivalent of masking the tick interrupt, so
//! every front-end access is an atomic snapshot as the concurrency
//! contract requires. Whatever advances the clock also runs the
//! millisecond work: the RC-servo power-off countdown
//! ([`DriverState::tick_ms`]).
//!
//! Two clock modes exist. Under [`ClockMode::Realtime`] a background
//! thread delivers ticks in 1 ms batches (an OS timer cannot pace 40 us
//! ticks, and the producer contract only needs tick progress, not per-tick
//! pacing). Under [`ClockMode::Virtual`] time advances only while a
//! producer wait loop spins or a test calls [`Machine::advance_ms`],
//! making runs deterministic.

use crate::drivers::DriverState;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use motion::{StepperCore, TICKS_PER_MS};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

pub type SharedCore = Arc<Mutex<StepperCore>>;
pub type SharedDrivers = Arc<Mutex<DriverState>>;

/// How tick time advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// A background thread ticks the core in 1 ms batches of real time.
    Realtime,
    /// Producer wait loops and tests drive the clock.
    Virtual,
}

struct Ticker {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

/// The shared motion core and driver state, plus their tick source.
pub struct Machine {
    core: SharedCore,
    drivers: SharedDrivers,
    mode: ClockMode,
    ticker: Option<Ticker>,
}

impl Machine {
    pub fn new(mode: ClockMode, servo_poweroff_ms: u32) -> Self {
        let core: SharedCore = Arc::new(Mutex::new(StepperCore::new()));
        let drivers: SharedDrivers = Arc::new(Mutex::new(DriverState::new(servo_poweroff_ms)));
        let ticker = match mode {
            ClockMode::Realtime => Some(start_ticker(core.clone(), drivers.clone())),
            ClockMode::Virtual => None,
        };
        Self {
            core,
            drivers,
            mode,
            ticker,
        }
    }

    /// Runs `f` with the core locked.
    pub fn with_core<R>(&self, f: impl FnOnce(&mut StepperCore) -> R) -> R {
        let mut core = self.core.lock();
        f(&mut core)
    }

    /// The driver and servo state, behind its lock.
    pub fn drivers(&self) -> MutexGuard<'_, DriverState> {
        self.drivers.lock()
    }

    /// Spins until the FIFO can take another entry.
    pub fn wait_for_fifo_room(&self) {
        while !self.with_core(|core| core.fifo_has_room()) {
            self.pump();
        }
    }

    /// Spins until the FIFO is empty and the step generator is idle.
    pub fn wait_for_idle(&self) {
        while !self.with_core(|core| core.is_idle()) {
            self.pump();
        }
    }

    /// Advances virtual time by the given wall duration. No-op under real
    /// time, where the ticker thread owns the clock.
    pub fn advance_ms(&self, ms: u32) {
        if self.mode == ClockMode::Virtual {
            self.with_core(|core| core.run_ticks(ms.saturating_mul(TICKS_PER_MS)));
            self.drivers.lock().tick_ms(ms);
        }
    }

    /// One wait-loop iteration: under virtual time the producer itself
    /// advances the clock by a millisecond; under real time the ticker
    /// thread does and the producer only yields.
    fn pump(&self) {
        match self.mode {
            ClockMode::Virtual => {
                self.with_core(|core| core.run_ticks(TICKS_PER_MS));
                self.drivers.lock().tick_ms(1);
            }
            ClockMode::Realtime => std::thread::yield_now(),
        }
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.shutdown.send(());
            let _ = ticker.handle.join();
        }
    }
}

fn start_ticker(core: SharedCore, drivers: SharedDrivers) -> Ticker {
    let (shutdown, rx) = bounded::<()>(1);
    let handle = std::thread::spawn(move || {
        debug!("tick thread running");
        loop {
            match rx.recv_timeout(Duration::from_millis(1)) {
                Err(RecvTimeoutError::Timeout) => {
                    core.lock().run_ticks(TICKS_PER_MS);
                    drivers.lock().tick_ms(1);
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("tick thread stopped");
    });
    Ticker { shutdown, handle }
}
