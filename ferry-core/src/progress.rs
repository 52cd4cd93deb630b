use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::manifest::Stage;

/// Outcome of one state transition.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct StepReport {
    pub progress: u8,
    pub message: String,
    /// The stage the caller should invoke next; `None` means the transfer is over.
    pub next_step: Option<Stage>,
}

impl StepReport {
    pub fn new(progress: u8, message: impl Into<String>, next_step: Option<Stage>) -> Self {
        Self { progress, message: message.into(), next_step }
    }

    pub fn is_terminal(&self) -> bool {
        self.next_step.is_none()
    }
}

/// Integer percentage, clamped to 0..=100. An empty transfer is 100% done.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) as u128 * 100) / total as u128) as u8
}

/// Rate-limited progress logging for the batch loop.
pub struct Progress {
    stage: Option<Stage>,
    interval: Duration,
    t0: Instant,
    last: Option<Instant>,
}

impl Progress {
    pub fn new(interval: Duration) -> Self {
        Self { stage: None, interval, t0: Instant::now(), last: None }
    }

    /// Logs `report` if the stage changed or `interval` has passed.
    pub fn observe(&mut self, stage: Stage, report: &StepReport) {
        let now = Instant::now();
        let due = self.last.map_or(true, |t| now.duration_since(t) >= self.interval);
        if self.stage != Some(stage) || due || report.is_terminal() {
            info!(
                elapsed_s = self.t0.elapsed().as_secs(),
                stage = %stage,
                progress = report.progress,
                "{}",
                report.message
            );
            self.stage = Some(stage);
            self.last = Some(now);
        }
    }
}
