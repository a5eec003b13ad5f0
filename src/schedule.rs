//! Phase-ordered system scheduler with per-system timing.
//!
//! Systems declare a phase and an order; each tick runs them serially in
//! `(phase, order, insertion index)` order. The resolved order is rebuilt
//! lazily after registration.

use std::time::{Duration, Instant};

use crate::error::Result;
use crate::world::World;

/// Coarse scheduling bucket. Ordinal order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    PreUpdate,
    Update,
    PostUpdate,
    Presentation,
    Render,
}

/// A unit of frame logic.
///
/// Systems are stateless with respect to frame data: anything they need is
/// derived from the world on each invocation.
pub trait System: Send + Sync {
    fn name(&self) -> &'static str;

    fn phase(&self) -> Phase {
        Phase::Update
    }

    fn order(&self) -> i32 {
        0
    }

    fn update(&mut self, world: &mut World, delta_time: f32) -> Result<()>;
}

/// Boxed system
pub type BoxedSystem = Box<dyn System>;

const TIMING_WINDOW: usize = 30;

/// Wall-clock timing for one system: last invocation, rolling average over
/// the last 30 invocations, peak, and invocation count.
#[derive(Debug, Clone)]
pub struct SystemTiming {
    current: Duration,
    samples: [Duration; TIMING_WINDOW],
    sample_count: usize,
    cursor: usize,
    peak: Duration,
    frame_count: u64,
}

impl SystemTiming {
    fn new() -> Self {
        Self {
            current: Duration::ZERO,
            samples: [Duration::ZERO; TIMING_WINDOW],
            sample_count: 0,
            cursor: 0,
            peak: Duration::ZERO,
            frame_count: 0,
        }
    }

    fn record(&mut self, elapsed: Duration) {
        self.current = elapsed;
        self.samples[self.cursor] = elapsed;
        self.cursor = (self.cursor + 1) % TIMING_WINDOW;
        self.sample_count = (self.sample_count + 1).min(TIMING_WINDOW);
        if elapsed > self.peak {
            self.peak = elapsed;
        }
        self.frame_count += 1;
    }

    /// Duration of the most recent invocation.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Rolling average over the last 30 invocations.
    pub fn average(&self) -> Duration {
        if self.sample_count == 0 {
            return Duration::ZERO;
        }
        self.samples[..self.sample_count]
            .iter()
            .sum::<Duration>()
            / self.sample_count as u32
    }

    pub fn peak(&self) -> Duration {
        self.peak
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Zero the peak, preserving current and average.
    pub fn reset_peak(&mut self) {
        self.peak = Duration::ZERO;
    }
}

struct Entry {
    system: BoxedSystem,
    insertion: usize,
    timing: SystemTiming,
}

/// Serial scheduler over registered systems.
#[derive(Default)]
pub struct Scheduler {
    entries: Vec<Entry>,
    execution_order: Vec<usize>,
    dirty: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            execution_order: Vec::new(),
            dirty: false,
        }
    }

    /// Append a system. Registration order only matters as the final
    /// tie-break within equal `(phase, order)`.
    pub fn add_system(&mut self, system: BoxedSystem) {
        let insertion = self.entries.len();
        self.entries.push(Entry {
            system,
            insertion,
            timing: SystemTiming::new(),
        });
        self.dirty = true;
    }

    pub fn system_count(&self) -> usize {
        self.entries.len()
    }

    fn ensure_order(&mut self) {
        if !self.dirty && self.execution_order.len() == self.entries.len() {
            return;
        }
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by_key(|&i| {
            let entry = &self.entries[i];
            (entry.system.phase(), entry.system.order(), entry.insertion)
        });
        self.execution_order = order;
        self.dirty = false;
    }

    /// Run every system once, in resolved order.
    ///
    /// A failing system is logged and skipped; the frame continues so the
    /// boundary cleanup that follows always runs.
    pub fn run(&mut self, world: &mut World, delta_time: f32) {
        self.ensure_order();
        // Indices are resolved up front so entries can be borrowed one at a time.
        let order = std::mem::take(&mut self.execution_order);
        for &index in &order {
            let entry = &mut self.entries[index];
            let start = Instant::now();
            if let Err(err) = entry.system.update(world, delta_time) {
                tracing::warn!(
                    system = entry.system.name(),
                    error = %err,
                    "system update failed; continuing frame"
                );
            }
            entry.timing.record(start.elapsed());
        }
        self.execution_order = order;
    }

    /// Resolved execution order, by system name. Rebuilds if stale.
    pub fn execution_order(&mut self) -> Vec<&'static str> {
        self.ensure_order();
        self.execution_order
            .iter()
            .map(|&i| self.entries[i].system.name())
            .collect()
    }

    /// Timing for a system, by name.
    pub fn timing(&self, name: &str) -> Option<&SystemTiming> {
        self.entries
            .iter()
            .find(|e| e.system.name() == name)
            .map(|e| &e.timing)
    }

    /// All timings, in registration order.
    pub fn timings(&self) -> impl Iterator<Item = (&'static str, &SystemTiming)> + '_ {
        self.entries.iter().map(|e| (e.system.name(), &e.timing))
    }

    /// Zero every system's peak, preserving currents and averages.
    pub fn reset_peaks(&mut self) {
        for entry in &mut self.entries {
            entry.timing.reset_peak();
        }
    }

    /// Fold another scheduler's systems in after ours (used when systems
    /// were registered while a frame was running).
    pub(crate) fn absorb(&mut self, other: Scheduler) {
        for entry in other.entries {
            self.add_system(entry.system);
        }
    }
}
