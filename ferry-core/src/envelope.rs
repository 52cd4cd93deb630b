//! Request/response envelope for driving a transfer one step per call.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::TransferEngine;
use crate::error::TransferError;
use crate::manifest::Stage;
use crate::progress::StepReport;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StepRequest {
    pub step: String,
    #[serde(default)]
    pub auth_token: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StepResponse {
    pub progress: u8,
    pub message: String,
    /// `None` is the only terminal signal.
    pub next_step: Option<String>,
}

impl From<StepReport> for StepResponse {
    fn from(r: StepReport) -> Self {
        Self {
            progress: r.progress,
            message: r.message,
            next_step: r.next_step.map(|s| s.as_str().to_string()),
        }
    }
}

/// Authenticates step requests and runs them against an engine.
pub struct StepHandler<'a> {
    engine: &'a mut TransferEngine,
    token: Option<&'a str>,
}

impl<'a> StepHandler<'a> {
    /// With `token = None` every request is accepted.
    pub fn new(engine: &'a mut TransferEngine, token: Option<&'a str>) -> Self {
        Self { engine, token }
    }

    /// Runs the requested step if it is the one the transfer is waiting for.
    /// Duplicate or out-of-order requests execute nothing and are pointed at
    /// the right step. Failures become responses naming the step to retry.
    ///
    /// Without a manifest only `init` starts work: any other step is a late
    /// or repeated call for a transfer that already finished, so the answer
    /// is terminal instead of pointing back at `init`.
    pub fn handle(&mut self, req: &StepRequest) -> StepResponse {
        let requested = Stage::parse(&req.step);
        if let Some(expected) = self.token {
            if !constant_time_eq(expected.as_bytes(), req.auth_token.as_bytes()) {
                warn!(step = %req.step, "rejected step request with bad token");
                // Echo the requested step; the transfer state stays hidden.
                return error_response(&TransferError::Unauthorized, requested, 0);
            }
        }

        let (current, progress) = match self.engine.manifest() {
            Ok(Some(m)) => (m.stage, m.percent_complete()),
            Ok(None) if requested == Some(Stage::Init) => (Stage::Init, 0),
            Ok(None) => {
                debug!(requested = %req.step, "step request without a transfer in progress");
                return StepResponse {
                    progress: 100,
                    message: "no transfer in progress (already complete or never started)".into(),
                    next_step: None,
                };
            }
            Err(e) => {
                let retry = requested.and_then(|stage| recovery_stage(&e, stage));
                return error_response(&e, retry, 0);
            }
        };

        if requested != Some(current) {
            debug!(requested = %req.step, current = %current, "step request out of order");
            return StepResponse {
                progress,
                message: format!("transfer is at step '{current}', not '{}'", req.step),
                next_step: Some(current.as_str().to_string()),
            };
        }

        match self.engine.step() {
            Ok(report) => report.into(),
            Err(e) => error_response(&e, recovery_stage(&e, current), progress),
        }
    }
}

/// Step a caller should retry after `err` was raised while running `current`.
/// `None` when retrying cannot help without operator action.
pub fn recovery_stage(err: &TransferError, current: Stage) -> Option<Stage> {
    match err {
        TransferError::RetryExhausted { .. } | TransferError::IncompleteTransfer(_) => {
            Some(Stage::Sending)
        }
        e if e.is_retryable() => Some(current),
        _ => None,
    }
}

fn error_response(err: &TransferError, next: Option<Stage>, progress: u8) -> StepResponse {
    StepResponse {
        progress,
        message: format!("error: {err}"),
        next_step: next.map(|s| s.as_str().to_string()),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
