//! Wall-clock accounting for a run: time spent assembling and solving the
//! per-equation systems, and how many step attempts were made. Collected
//! only with the `timing` feature; otherwise every hook is a no-op.

#![allow(unused)]

use std::cell::RefCell;
use std::time::Duration;

/// Which part of a sweep a measurement belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Assembly,
    LinearSolve,
}

#[derive(Debug, Default, Clone)]
pub struct StageTimes {
    pub count: usize,
    pub total: Duration,
    pub longest: Duration,
}

impl StageTimes {
    fn add(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total += elapsed;
        self.longest = self.longest.max(elapsed);
    }

    fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            ms(self.total) / self.count as f64
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct TimingStats {
    pub assembly: StageTimes,
    pub linear_solve: StageTimes,
    pub accepted_steps: usize,
    pub rejected_attempts: usize,
    pub wall_time: Duration,
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1e3
}

impl TimingStats {
    fn stage(&mut self, stage: Stage) -> &mut StageTimes {
        match stage {
            Stage::Assembly => &mut self.assembly,
            Stage::LinearSolve => &mut self.linear_solve,
        }
    }

    #[cfg(feature = "timing")]
    pub fn print_summary(&self) {
        if self.assembly.count == 0 {
            return;
        }
        let measured = self.assembly.total + self.linear_solve.total;
        let other = self.wall_time.saturating_sub(measured);

        println!("\n{}", "=".repeat(60));
        println!("{:^60}", "RUN TIMING");
        println!("{}", "=".repeat(60));
        println!(
            "Wall time:        {:>10.3} s  ({} steps, {} rejected attempts)",
            self.wall_time.as_secs_f64(),
            self.accepted_steps,
            self.rejected_attempts
        );
        println!("{}", "-".repeat(60));
        for (name, times) in [("Assembly", &self.assembly), ("Linear solve", &self.linear_solve)] {
            println!(
                "  {name:<14} {:>10.3} ms  n = {:<7} mean {:>8.4} ms  max {:>8.4} ms",
                ms(times.total),
                times.count,
                times.mean_ms(),
                ms(times.longest)
            );
        }
        println!("  {:<14} {:>10.3} ms", "Other", ms(other));
        println!("{}\n", "=".repeat(60));
    }

    #[cfg(not(feature = "timing"))]
    pub fn print_summary(&self) {}
}

#[cfg(feature = "timing")]
thread_local! {
    static STATS: RefCell<TimingStats> = RefCell::new(TimingStats::default());
}

#[cfg(feature = "timing")]
pub fn reset_timing() {
    STATS.with(|s| *s.borrow_mut() = TimingStats::default());
}

#[cfg(not(feature = "timing"))]
pub fn reset_timing() {}

/// Count an accepted step and the attempts rejected before it.
#[cfg(feature = "timing")]
pub fn record_step(rejected: usize) {
    STATS.with(|s| {
        let mut s = s.borrow_mut();
        s.accepted_steps += 1;
        s.rejected_attempts += rejected;
    });
}

#[cfg(not(feature = "timing"))]
pub fn record_step(_rejected: usize) {}

/// Run `f`, charging its wall time to `stage`.
#[cfg(feature = "timing")]
pub fn timed<F, R>(stage: Stage, f: F) -> R
where
    F: FnOnce() -> R,
{
    let start = std::time::Instant::now();
    let result = f();
    let elapsed = start.elapsed();
    STATS.with(|s| s.borrow_mut().stage(stage).add(elapsed));
    result
}

#[cfg(not(feature = "timing"))]
pub fn timed<F, R>(_stage: Stage, f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

#[cfg(feature = "timing")]
pub fn finalize_timing(wall_time: Duration) -> TimingStats {
    STATS.with(|s| {
        let mut s = s.borrow_mut();
        s.wall_time = wall_time;
        s.clone()
    })
}

#[cfg(not(feature = "timing"))]
pub fn finalize_timing(wall_time: Duration) -> TimingStats {
    TimingStats {
        wall_time,
        ..TimingStats::default()
    }
}

pub fn finalize_and_print(wall_time: Duration) {
    finalize_timing(wall_time).print_summary();
}
