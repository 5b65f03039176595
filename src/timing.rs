//! Stage timing.

use std::time::{Duration, Instant};
use tracing::info;

/// Measures one build phase and logs how long it took.
pub struct Timer {
    name: String,
    start: Instant,
}

impl Timer {
    /// Start a new timer with the given phase name.
    pub fn start(name: &str) -> Self {
        info!("==> {}", name);
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    /// Log the elapsed time and return it.
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        info!("    [{}] {}", format_duration(elapsed), self.name);
        elapsed
    }
}

/// `12.3s` under a minute, `4.5m` above.
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs >= 60.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}s", secs)
    }
}
