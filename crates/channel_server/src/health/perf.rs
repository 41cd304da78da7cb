//! Step timing for the tick.

use super::metrics::MetricsCollector;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Times consecutive named steps of one operation.
///
/// Each [`step`](PerformanceTimer::step) records the time since the previous
/// step (or since creation). [`finish`](PerformanceTimer::finish) logs every
/// step at `trace`, any step slower than the threshold at `warn`, and feeds
/// the durations into the metrics collector.
#[derive(Debug)]
pub struct PerformanceTimer {
    operation: &'static str,
    started: Instant,
    last: Instant,
    slow_step: Duration,
    steps: Vec<(&'static str, Duration)>,
}

impl PerformanceTimer {
    pub fn start(operation: &'static str, slow_step: Duration) -> Self {
        let now = Instant::now();
        Self {
            operation,
            started: now,
            last: now,
            slow_step,
            steps: Vec::new(),
        }
    }

    /// Closes the current step under `name`.
    pub fn step(&mut self, name: &'static str) -> Duration {
        let now = Instant::now();
        let elapsed = now - self.last;
        self.last = now;
        self.steps.push((name, elapsed));
        elapsed
    }

    pub fn steps(&self) -> &[(&'static str, Duration)] {
        &self.steps
    }

    /// Logs and records the steps, then hands them back.
    pub fn finish(self, metrics: Option<&MetricsCollector>) -> Vec<(&'static str, Duration)> {
        let total = self.started.elapsed();
        for (name, elapsed) in &self.steps {
            if *elapsed > self.slow_step {
                warn!(
                    "🐢 {} step '{}' took {}us (threshold {}us)",
                    self.operation,
                    name,
                    elapsed.as_micros(),
                    self.slow_step.as_micros()
                );
            } else {
                trace!("⏱️ {} step '{}' took {}us", self.operation, name, elapsed.as_micros());
            }
            if let Some(metrics) = metrics {
                metrics.record_duration(&format!("{}_{}_seconds", self.operation, name), *elapsed);
            }
        }
        if let Some(metrics) = metrics {
            metrics.record_duration(&format!("{}_seconds", self.operation), total);
        }
        self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_are_recorded_in_order() {
        let metrics = MetricsCollector::new();
        let mut timer = PerformanceTimer::start("tick", Duration::from_secs(1));
        timer.step("first");
        std::thread::sleep(Duration::from_millis(2));
        let second = timer.step("second");
        assert!(second >= Duration::from_millis(2));

        let steps = timer.finish(Some(&metrics));
        assert_eq!(steps.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec!["first", "second"]);
        assert_eq!(metrics.get_histogram("tick_second_seconds").unwrap().count, 1);
        assert_eq!(metrics.get_histogram("tick_seconds").unwrap().count, 1);
    }
}
