//! Named-phase wall-clock profiler.
//!
//! Phases are opened with [`tic`](Profiler::tic) and closed with
//! [`toc`](Profiler::toc); repeated phases accumulate. The report is printed
//! on the coordinating rank only, after the run.

use std::fmt;
use std::time::{Duration, Instant};

pub struct Profiler {
    name: String,
    start: Instant,
    order: Vec<String>,
    spent: Vec<Duration>,
    open: Vec<(usize, Instant)>,
}

impl Profiler {
    pub fn new(name: &str) -> Self {
        Profiler {
            name: name.to_string(),
            start: Instant::now(),
            order: Vec::new(),
            spent: Vec::new(),
            open: Vec::new(),
        }
    }

    fn slot(&mut self, phase: &str) -> usize {
        match self.order.iter().position(|p| p == phase) {
            Some(i) => i,
            None => {
                self.order.push(phase.to_string());
                self.spent.push(Duration::ZERO);
                self.order.len() - 1
            }
        }
    }

    pub fn tic(&mut self, phase: &str) {
        let slot = self.slot(phase);
        self.open.push((slot, Instant::now()));
    }

    /// Close the most recent open phase; `phase` must match its name.
    pub fn toc(&mut self, phase: &str) {
        let (slot, began) = self.open.pop().expect("toc without a matching tic");
        debug_assert_eq!(self.order[slot], phase);
        self.spent[slot] += began.elapsed();
    }

    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }
}

impl fmt::Display for Profiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.total().as_secs_f64();
        let width = self.order.iter().map(String::len).max().unwrap_or(0).max(4);
        writeln!(f, "[{}: {:>10.3} s]", self.name, total)?;
        let mut accounted = 0.0;
        for (phase, spent) in self.order.iter().zip(&self.spent) {
            let s = spent.as_secs_f64();
            accounted += s;
            writeln!(f, "  {phase:<width$}  {s:>10.3} s  ({:>5.1}%)", 100.0 * s / total)?;
        }
        let rest = total - accounted;
        if rest > 0.0 {
            writeln!(f, "  {:<width$}  {rest:>10.3} s  ({:>5.1}%)", "self", 100.0 * rest / total)?;
        }
        Ok(())
    }
}
