use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::client::ApiError;

/// Where the coordinator is in its cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    /// Waiting for the next trigger.
    #[default]
    Idle,
    /// API call in flight.
    Polling,
    /// Normalizing, merging and publishing a poll result.
    Merging,
    /// The last cycle failed; cleared when the next cycle starts.
    Failed,
    /// `stop` was called; no further cycles run.
    Stopped,
}

/// Health of the polling loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinatorStatus {
    pub state: CoordinatorState,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Failed cycles since the last success.
    pub consecutive_failures: u32,
    /// Failure of the most recent cycle, cleared on success.
    pub last_error: Option<ApiError>,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
}

impl CoordinatorStatus {
    /// Time since the last successful poll, or `None` if there never was one.
    pub fn staleness(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_success_at.map(|at| now - at)
    }

    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures == 0 && self.last_success_at.is_some()
    }

    pub(super) fn begin(&mut self, now: DateTime<Utc>) {
        self.state = CoordinatorState::Polling;
        self.last_attempt_at = Some(now);
    }

    pub(super) fn succeed(&mut self, now: DateTime<Utc>) {
        self.state = CoordinatorState::Idle;
        self.last_success_at = Some(now);
        self.consecutive_failures = 0;
        self.last_error = None;
        self.cycles_completed += 1;
    }

    pub(super) fn fail(&mut self, error: &ApiError) {
        self.state = CoordinatorState::Failed;
        self.consecutive_failures += 1;
        self.last_error = Some(error.clone());
        self.cycles_failed += 1;
    }
}
