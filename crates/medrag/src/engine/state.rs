//! Per-request lifecycle
//!
//! ```text
//! Received -> Retrieving -> Assembling -> Generating -> Succeeded
//!    |            |             |             |------> DegradedNoGeneration
//!    |            |             |             '------> Failed
//!    '------------+-------------+--------------------> Failed
//! Received -> Succeeded  (answer cache hit)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Where a query is in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Received,
    Retrieving,
    Assembling,
    Generating,
    /// Answer generated with validated citations
    Succeeded,
    /// Generation failed; the response carries evidence only
    DegradedNoGeneration,
    Failed,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Succeeded | RequestState::DegradedNoGeneration | RequestState::Failed
        )
    }

    /// Whether the pipeline may move from `self` to `next`
    pub fn can_transition_to(self, next: RequestState) -> bool {
        use RequestState::*;

        match (self, next) {
            (Received, Retrieving) | (Received, Succeeded) => true,
            (Retrieving, Assembling) => true,
            (Assembling, Generating) => true,
            (Generating, Succeeded) | (Generating, DegradedNoGeneration) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Received => "received",
            RequestState::Retrieving => "retrieving",
            RequestState::Assembling => "assembling",
            RequestState::Generating => "generating",
            RequestState::Succeeded => "succeeded",
            RequestState::DegradedNoGeneration => "degraded_no_generation",
            RequestState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks one request through [`RequestState`]
#[derive(Debug)]
pub struct RequestTracker {
    id: Uuid,
    state: RequestState,
    started: Instant,
    entered: Instant,
}

impl RequestTracker {
    pub fn new(id: Uuid) -> Self {
        let now = Instant::now();
        tracing::debug!("[{}] received", id);
        Self {
            id,
            state: RequestState::Received,
            started: now,
            entered: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Time since the request was received
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Move to `next`, rejecting transitions the pipeline does not allow
    pub fn advance(&mut self, next: RequestState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            tracing::error!("[{}] invalid transition {} -> {}", self.id, self.state, next);
            return Err(Error::internal(format!(
                "invalid request transition {} -> {}",
                self.state, next
            )));
        }

        tracing::debug!(
            "[{}] {} -> {} ({}ms in {})",
            self.id,
            self.state,
            next,
            self.entered.elapsed().as_millis(),
            self.state
        );
        self.state = next;
        self.entered = Instant::now();
        Ok(())
    }

    /// Record a failure from whatever stage is current
    pub fn fail(&mut self, error: &Error) {
        if self.state.is_terminal() {
            return;
        }
        tracing::error!(
            "[{}] failed while {} after {}ms: {}",
            self.id,
            self.state,
            self.elapsed().as_millis(),
            error
        );
        self.state = RequestState::Failed;
    }
}
