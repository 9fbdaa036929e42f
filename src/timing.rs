//! Stage timing.

use std::time::{Duration, Instant};

/// Measures one pipeline stage and reports it when finished.
pub struct Timer {
    stage: &'static str,
    start: Instant,
}

impl Timer {
    pub fn start(stage: &'static str) -> Self {
        Self {
            stage,
            start: Instant::now(),
        }
    }

    /// Print the elapsed time and return it.
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        println!("  [{}] {}", format_duration(elapsed), self.stage);
        tracing::debug!(stage = self.stage, elapsed_ms = elapsed.as_millis() as u64, "stage done");
        elapsed
    }
}

/// Seconds below a minute, fractional minutes above.
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs >= 60.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}s", secs)
    }
}
