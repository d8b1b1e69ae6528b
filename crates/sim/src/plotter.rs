//! Simulated plotter: a motion core, a tick counter, and a step trace.

use anyhow::Result;
use motion::{MotionEntry, StepPulse, StepperCore, AXIS_COUNT};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// One recorded step event: the tick it happened on and the pulse that
/// was emitted.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TraceEntry {
    pub tick: u64,
    pub pulse: StepPulse,
}

/// A motion core under a virtual clock, with every step edge recorded.
pub struct SimPlotter {
    core: StepperCore,
    tick: u64,
    trace: Vec<TraceEntry>,
}

impl SimPlotter {
    pub fn new() -> Self {
        Self {
            core: StepperCore::new(),
            tick: 0,
            trace: Vec::new(),
        }
    }

    /// Direct access to the core, for enqueuing entries and issuing
    /// queries between runs.
    pub fn core(&mut self) -> &mut StepperCore {
        &mut self.core
    }

    /// The current virtual time in ticks.
    pub fn now(&self) -> u64 {
        self.tick
    }

    /// Runs exactly `n` ticks, recording emitted edges.
    pub fn run_ticks(&mut self, n: u64) {
        for _ in 0..n {
            self.step_once();
        }
    }

    /// Runs until the core goes idle, up to `limit` ticks. Returns the
    /// number of ticks consumed.
    pub fn run_until_idle(&mut self, limit: u64) -> Result<u64> {
        let start = self.tick;
        while !self.core.is_idle() {
            if self.tick - start >= limit {
                anyhow::bail!("motion still active after {limit} ticks");
            }
            self.step_once();
        }
        Ok(self.tick - start)
    }

    /// Enqueues an entry, ticking the clock while the FIFO is full.
    pub fn submit(&mut self, entry: MotionEntry) {
        while !self.core.fifo_has_room() {
            self.step_once();
        }
        // Sole producer: the slot observed free stays free.
        let _ = self.core.enqueue(entry);
    }

    /// Edges recorded so far on the given axis.
    pub fn edge_count(&self, axis: usize) -> u64 {
        self.trace
            .iter()
            .filter(|entry| entry.pulse.stepped(axis))
            .count() as u64
    }

    /// Ticks at which the given axis stepped.
    pub fn edge_ticks(&self, axis: usize) -> Vec<u64> {
        self.trace
            .iter()
            .filter(|entry| entry.pulse.stepped(axis))
            .map(|entry| entry.tick)
            .collect()
    }

    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    pub fn positions(&self) -> [i32; AXIS_COUNT] {
        self.core.positions()
    }

    /// Dumps the recorded trace to a JSON file.
    pub fn dump_trace(&self, path: &Path) -> Result<()> {
        info!(path = %path.display(), entries = self.trace.len(), "dumping trace");
        let mut file = File::create(path)?;
        let json = serde_json::to_string_pretty(&self.trace)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    fn step_once(&mut self) {
        let pulse = self.core.tick();
        self.tick += 1;
        if !pulse.is_empty() {
            self.trace.push(TraceEntry {
                tick: self.tick,
                pulse,
            });
        }
    }
}

impl Default for SimPlotter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion::{plan_timed, TimedMove};

    #[test]
    fn trace_records_every_edge_once() {
        let mut plotter = SimPlotter::new();
        let entry = plan_timed(TimedMove {
            duration_ms: 40,
            steps: [10, -10, 0],
        })
        .entry;
        plotter.submit(entry);
        plotter.run_until_idle(10_000).unwrap();

        assert_eq!(plotter.edge_count(0), 10);
        assert_eq!(plotter.edge_count(1), 10);
        assert_eq!(plotter.edge_count(2), 0);
        assert_eq!(plotter.positions(), [10, -10, 0]);
    }

    #[test]
    fn trace_dump_writes_json() {
        let mut plotter = SimPlotter::new();
        plotter.submit(
            plan_timed(TimedMove {
                duration_ms: 40,
                steps: [3, 0, 0],
            })
            .entry,
        );
        plotter.run_until_idle(10_000).unwrap();

        let mut path = std::env::temp_dir();
        path.push(format!("sim-trace-{}.json", std::process::id()));
        plotter.dump_trace(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 3);
    }
}
