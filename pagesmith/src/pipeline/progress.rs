//! Live progress and cancellation registry, keyed by pipeline id.

use crate::cancellation::CancellationToken;
use crate::core::{RunState, RunStatus};
use crate::errors::PipelineError;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What happens to a run's record once its result is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressRetention {
    /// Terminal snapshots stay readable until evicted or replaced.
    #[default]
    KeepTerminal,
    /// The record is removed as soon as the run returns.
    EvictOnCompletion,
}

/// A point-in-time view of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Run identifier.
    pub pipeline_id: String,
    /// Externally visible status.
    pub status: RunStatus,
    /// Internal state machine position.
    pub state: RunState,
    /// Phase currently running, or the last one that ran.
    pub current_phase: Option<String>,
    /// Index of `current_phase` in the configured phase list.
    pub current_index: Option<usize>,
    /// Phases enabled for this run.
    pub total_phases: usize,
    /// Phases that finished, degraded ones included.
    pub completed_phases: usize,
    /// Attempt number of the current phase.
    pub attempt: u32,
    /// Set once `cancel` succeeded.
    pub cancel_requested: bool,
    /// When the run was registered.
    pub started_at: DateTime<Utc>,
    /// Last mutation.
    pub updated_at: DateTime<Utc>,
    /// Time since registration, frozen once the run is terminal.
    pub elapsed: Duration,
    /// Failure message of a failed or cancelled run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressSnapshot {
    /// Share of enabled phases that finished, 0..=100.
    #[must_use]
    pub fn percent_complete(&self) -> f64 {
        if self.status == RunStatus::Completed {
            return 100.0;
        }
        if self.total_phases == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let pct = self.completed_phases as f64 / self.total_phases as f64 * 100.0;
        pct.min(100.0)
    }

    /// Returns true once the run reached a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

struct RunEntry {
    snapshot: ProgressSnapshot,
    token: Arc<CancellationToken>,
    started: Instant,
    finished: Option<Instant>,
}

impl RunEntry {
    fn view(&self) -> ProgressSnapshot {
        let mut snapshot = self.snapshot.clone();
        snapshot.elapsed = self
            .finished
            .map_or_else(|| self.started.elapsed(), |end| end - self.started);
        snapshot
    }

    fn transition(&mut self, next: RunState) -> bool {
        if !self.snapshot.state.can_transition_to(&next) {
            tracing::warn!(
                pipeline_id = %self.snapshot.pipeline_id,
                from = ?self.snapshot.state,
                to = ?next,
                "Ignoring illegal run state transition"
            );
            return false;
        }
        self.snapshot.status = next.status();
        if next.is_terminal() {
            self.finished = Some(Instant::now());
        }
        self.snapshot.state = next;
        self.snapshot.updated_at = Utc::now();
        true
    }
}

/// Concurrent registry of run progress and cancellation tokens.
///
/// All mutations take the entry's shard lock for the duration of a field
/// update only, never across a phase call.
#[derive(Default)]
pub struct ProgressTracker {
    runs: DashMap<String, RunEntry>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("runs", &self.runs.len())
            .finish()
    }
}

impl ProgressTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a run and returns its cancellation token.
    ///
    /// A terminal record with the same id is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RequestValidation`] if a run with this id is
    /// still running.
    pub fn register(
        &self,
        pipeline_id: &str,
        total_phases: usize,
        first_phase: Option<(usize, &str)>,
    ) -> Result<Arc<CancellationToken>, PipelineError> {
        let now = Utc::now();
        let token = Arc::new(CancellationToken::new());
        let entry = RunEntry {
            snapshot: ProgressSnapshot {
                pipeline_id: pipeline_id.to_string(),
                status: RunStatus::Running,
                state: RunState::Created,
                current_phase: first_phase.map(|(_, name)| name.to_string()),
                current_index: first_phase.map(|(index, _)| index),
                total_phases,
                completed_phases: 0,
                attempt: 0,
                cancel_requested: false,
                started_at: now,
                updated_at: now,
                elapsed: Duration::ZERO,
                error: None,
            },
            token: Arc::clone(&token),
            started: Instant::now(),
            finished: None,
        };

        match self.runs.entry(pipeline_id.to_string()) {
            Entry::Occupied(mut existing) => {
                if !existing.get().snapshot.is_terminal() {
                    return Err(PipelineError::request(format!(
                        "pipeline '{pipeline_id}' is already running"
                    )));
                }
                existing.insert(entry);
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
        Ok(token)
    }

    /// Moves a run to a new state. Illegal transitions are logged and ignored.
    ///
    /// Returns true if the state changed.
    pub fn transition(&self, pipeline_id: &str, next: RunState) -> bool {
        self.runs
            .get_mut(pipeline_id)
            .is_some_and(|mut entry| entry.transition(next))
    }

    /// Records that phase `index` started its first attempt.
    pub fn start_phase(&self, pipeline_id: &str, index: usize, phase: &str) {
        if let Some(mut entry) = self.runs.get_mut(pipeline_id) {
            if !entry.transition(RunState::Running { index }) {
                return;
            }
            entry.snapshot.current_phase = Some(phase.to_string());
            entry.snapshot.current_index = Some(index);
            entry.snapshot.attempt = 1;
        }
    }

    /// Records the attempt number of the current phase.
    pub fn record_attempt(&self, pipeline_id: &str, attempt: u32) {
        if let Some(mut entry) = self.runs.get_mut(pipeline_id) {
            entry.snapshot.attempt = attempt;
            entry.snapshot.updated_at = Utc::now();
        }
    }

    /// Records that the current phase finished, through its fallback if `degraded`.
    pub fn finish_phase(&self, pipeline_id: &str, degraded: bool) {
        if let Some(mut entry) = self.runs.get_mut(pipeline_id) {
            if let Some(index) = entry.snapshot.current_index.filter(|_| degraded) {
                entry.transition(RunState::Degraded { index });
            }
            entry.snapshot.completed_phases += 1;
            entry.snapshot.updated_at = Utc::now();
        }
    }

    /// Marks a run completed.
    pub fn complete(&self, pipeline_id: &str) -> bool {
        self.transition(pipeline_id, RunState::Completed)
    }

    /// Marks a run failed, at phase `index` if one was running.
    ///
    /// The error is recorded only if the transition is legal.
    pub fn fail(&self, pipeline_id: &str, index: Option<usize>, error: &PipelineError) -> bool {
        self.finish_with_error(pipeline_id, RunState::Failed { index }, error)
    }

    /// Marks a run cancelled.
    pub fn mark_cancelled(&self, pipeline_id: &str, error: &PipelineError) -> bool {
        self.finish_with_error(pipeline_id, RunState::Cancelled, error)
    }

    fn finish_with_error(&self, pipeline_id: &str, next: RunState, error: &PipelineError) -> bool {
        let Some(mut entry) = self.runs.get_mut(pipeline_id) else {
            return false;
        };
        if !entry.transition(next) {
            return false;
        }
        entry.snapshot.error = Some(error.to_string());
        true
    }

    /// Requests cancellation of a running pipeline.
    ///
    /// Returns true exactly once per run, and only while it is running.
    pub fn cancel(&self, pipeline_id: &str, reason: &str) -> bool {
        let token = {
            let Some(mut entry) = self.runs.get_mut(pipeline_id) else {
                return false;
            };
            if entry.snapshot.is_terminal() || entry.snapshot.cancel_requested {
                return false;
            }
            entry.snapshot.cancel_requested = true;
            entry.snapshot.updated_at = Utc::now();
            Arc::clone(&entry.token)
        };
        // Callbacks on the token may read the tracker, so the shard lock is released first.
        token.cancel(reason);
        tracing::info!(pipeline_id = %pipeline_id, reason = %reason, "Cancellation requested");
        true
    }

    /// Returns a snapshot of a run, or `None` if unknown or evicted.
    #[must_use]
    pub fn get(&self, pipeline_id: &str) -> Option<ProgressSnapshot> {
        self.runs.get(pipeline_id).map(|entry| entry.view())
    }

    /// Returns the token of a run.
    #[must_use]
    pub fn token(&self, pipeline_id: &str) -> Option<Arc<CancellationToken>> {
        self.runs.get(pipeline_id).map(|entry| Arc::clone(&entry.token))
    }

    /// Ids of runs that are still running, sorted.
    #[must_use]
    pub fn active_runs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .runs
            .iter()
            .filter(|entry| !entry.snapshot.is_terminal())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Drops terminal records that finished more than `max_age` ago. Returns how many.
    pub fn evict_terminal(&self, max_age: Duration) -> usize {
        let before = self.runs.len();
        self.runs
            .retain(|_, entry| entry.finished.map_or(true, |end| end.elapsed() < max_age));
        before.saturating_sub(self.runs.len())
    }

    /// Removes a record regardless of its state.
    pub fn remove(&self, pipeline_id: &str) -> Option<ProgressSnapshot> {
        self.runs.remove(pipeline_id).map(|(_, entry)| entry.view())
    }

    /// Removes the record of the run that owns `token`.
    ///
    /// A newer run registered under the same id is left alone.
    pub fn remove_run(
        &self,
        pipeline_id: &str,
        token: &Arc<CancellationToken>,
    ) -> Option<ProgressSnapshot> {
        self.runs
            .remove_if(pipeline_id, |_, entry| Arc::ptr_eq(&entry.token, token))
            .map(|(_, entry)| entry.view())
    }

    /// Number of tracked runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Returns true if no run is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
