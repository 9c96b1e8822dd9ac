use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dispatch::{FetchOptions, JobApi, JobHandle, JobState, JobStatusSnapshot};
use crate::error::BridgeError;

/// Pause between iterations after a non-failed observation.
pub const STANDARD_PAUSE: Duration = Duration::from_secs(5);

/// Longer pause after upstream reports `failed`, so a struggling upstream
/// is not hammered.
pub const FAILED_PAUSE: Duration = Duration::from_secs(10);

/// Upstream wait hint per status call in unrestricted and streaming modes.
pub const WAIT_HINT: Duration = Duration::from_secs(30);

/// Upstream wait hint for the single-shot check.
pub const SINGLE_SHOT_WAIT_HINT: Duration = Duration::from_secs(20);

/// Poll timing. There is deliberately no backoff and no attempt ceiling:
/// the only optional bound is the operator's wall-clock `session_ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub standard_pause: Duration,
    pub failed_pause: Duration,
    pub wait_hint: Duration,
    pub single_shot_wait_hint: Duration,
    pub session_ceiling: Option<Duration>,
}

impl Default for Cadence {
    fn default() -> Self {
        Self {
            standard_pause: STANDARD_PAUSE,
            failed_pause: FAILED_PAUSE,
            wait_hint: WAIT_HINT,
            single_shot_wait_hint: SINGLE_SHOT_WAIT_HINT,
            session_ceiling: None,
        }
    }
}

impl Cadence {
    pub fn unrestricted_options(&self) -> FetchOptions {
        FetchOptions {
            wait_hint: self.wait_hint,
            realtime: false,
            include_file_content: true,
        }
    }

    pub fn streaming_options(&self) -> FetchOptions {
        FetchOptions {
            wait_hint: self.wait_hint,
            realtime: true,
            include_file_content: true,
        }
    }

    pub fn single_shot_options(&self) -> FetchOptions {
        FetchOptions {
            wait_hint: self.single_shot_wait_hint,
            realtime: false,
            include_file_content: true,
        }
    }
}

/// Lifecycle of one poll session.
///
/// `Submitting -> Polling -> {Polling | FailedRecoverable}* -> Completed`,
/// with `Terminated` reachable from any non-final phase (submit failure,
/// disconnect, shutdown, ceiling).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Submitting,
    Polling,
    FailedRecoverable,
    Completed,
    Terminated,
}

/// What one iteration saw.
#[derive(Debug, Clone)]
pub enum Observation {
    Snapshot(JobStatusSnapshot),
    /// The status call itself failed. Absorbed; polling continues.
    TransportError(String),
}

#[derive(Debug, Clone)]
pub struct Step {
    pub attempt: u32,
    pub observation: Observation,
}

impl Step {
    pub fn is_final(&self) -> bool {
        matches!(&self.observation, Observation::Snapshot(s) if s.is_final())
    }

    pub fn state(&self) -> Option<JobState> {
        match &self.observation {
            Observation::Snapshot(s) => Some(s.state),
            Observation::TransportError(_) => None,
        }
    }

    /// How long to wait before the next iteration.
    pub fn pause(&self, cadence: &Cadence) -> Duration {
        match self.state() {
            Some(JobState::Failed) => cadence.failed_pause,
            _ => cadence.standard_pause,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The operator's session ceiling elapsed.
    Ceiling,
    /// The process is shutting down.
    Shutdown,
    /// The streaming consumer went away.
    Disconnected,
}

#[derive(Debug, Clone)]
pub enum PollOutcome {
    Completed(JobStatusSnapshot),
    Terminated {
        last: Option<JobStatusSnapshot>,
        reason: TerminationReason,
    },
}

/// Runtime state of one bridge operation. Owned by exactly one request;
/// iterations are strictly sequential.
#[derive(Debug)]
pub struct PollSession {
    id: Uuid,
    handle: JobHandle,
    attempt_count: u32,
    started_at: Instant,
    last_snapshot: Option<JobStatusSnapshot>,
    cancelled: bool,
    phase: SessionPhase,
}

impl PollSession {
    /// A session that only polls an existing job.
    pub fn new(handle: JobHandle) -> Self {
        Self::with_phase(handle, SessionPhase::Polling)
    }

    /// A session that must submit a follow-up before polling.
    pub fn for_follow_up(handle: JobHandle) -> Self {
        Self::with_phase(handle, SessionPhase::Submitting)
    }

    fn with_phase(handle: JobHandle, phase: SessionPhase) -> Self {
        Self {
            id: Uuid::new_v4(),
            handle,
            attempt_count: 0,
            started_at: Instant::now(),
            last_snapshot: None,
            cancelled: false,
            phase,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn handle(&self) -> &JobHandle {
        &self.handle
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn last_snapshot(&self) -> Option<&JobStatusSnapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Submit the follow-up prompt. Only valid once, from `Submitting`;
    /// a second call is rejected without touching upstream.
    pub async fn submit<A: JobApi>(&mut self, api: &A, prompt: &str) -> Result<(), BridgeError> {
        if self.phase != SessionPhase::Submitting {
            return Err(BridgeError::Other(format!(
                "session {} already submitted",
                self.id
            )));
        }
        match api.submit(&self.handle, prompt).await {
            Ok(()) => {
                self.phase = SessionPhase::Polling;
                Ok(())
            }
            Err(e) => {
                self.phase = SessionPhase::Terminated;
                Err(e)
            }
        }
    }

    /// Run one iteration: a single status call, classified.
    pub async fn step<A: JobApi>(&mut self, api: &A, options: &FetchOptions) -> Step {
        self.attempt_count += 1;
        let attempt = self.attempt_count;
        let elapsed_ms = self.elapsed().as_millis() as u64;

        let observation = match api.fetch_status(&self.handle, options).await {
            Ok(snapshot) => {
                self.phase = if snapshot.is_final() {
                    tracing::info!(
                        session_id = %self.id,
                        thread_id = self.handle.thread_id,
                        attempt,
                        elapsed_ms,
                        "upstream job completed"
                    );
                    SessionPhase::Completed
                } else if snapshot.state == JobState::Failed {
                    tracing::warn!(
                        session_id = %self.id,
                        thread_id = self.handle.thread_id,
                        attempt,
                        "upstream reported failed, continuing to poll"
                    );
                    SessionPhase::FailedRecoverable
                } else {
                    tracing::debug!(
                        session_id = %self.id,
                        thread_id = self.handle.thread_id,
                        attempt,
                        state = snapshot.state.as_str(),
                        waited_seconds = snapshot.waited_seconds,
                        elapsed_ms,
                        "job not finished"
                    );
                    SessionPhase::Polling
                };
                self.last_snapshot = Some(snapshot.clone());
                Observation::Snapshot(snapshot)
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %self.id,
                    thread_id = self.handle.thread_id,
                    attempt,
                    transient = e.is_transient(),
                    "status check failed: {e}"
                );
                self.phase = SessionPhase::Polling;
                Observation::TransportError(e.user_message())
            }
        };

        Step {
            attempt,
            observation,
        }
    }

    /// End the session early, keeping the last snapshot for the caller.
    pub fn terminate(&mut self, reason: TerminationReason) -> PollOutcome {
        if reason == TerminationReason::Disconnected {
            self.cancelled = true;
        }
        self.phase = SessionPhase::Terminated;
        tracing::info!(
            session_id = %self.id,
            thread_id = self.handle.thread_id,
            attempts = self.attempt_count,
            elapsed_ms = self.elapsed().as_millis() as u64,
            reason = ?reason,
            "poll session terminated before completion"
        );
        PollOutcome::Terminated {
            last: self.last_snapshot.clone(),
            reason,
        }
    }
}

/// Unrestricted profile: poll until a final snapshot appears. `failed`,
/// `unknown` and transport errors never end the loop. Only process shutdown
/// or the operator's ceiling (if configured) stop it early.
pub async fn poll_until_complete<A: JobApi>(
    api: &A,
    session: &mut PollSession,
    cadence: &Cadence,
    shutdown: &CancellationToken,
) -> PollOutcome {
    let options = cadence.unrestricted_options();
    let deadline = cadence.session_ceiling.map(|c| session.started_at() + c);

    tracing::info!(
        session_id = %session.id(),
        thread_id = session.handle().thread_id,
        project_id = session.handle().project_id,
        "poll session started"
    );

    loop {
        let step = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return session.terminate(TerminationReason::Shutdown),
            _ = ceiling(deadline) => return session.terminate(TerminationReason::Ceiling),
            step = session.step(api, &options) => step,
        };

        let pause = step.pause(cadence);
        if let Observation::Snapshot(snapshot) = step.observation
            && snapshot.is_final()
        {
            return PollOutcome::Completed(snapshot);
        }

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return session.terminate(TerminationReason::Shutdown),
            _ = ceiling(deadline) => return session.terminate(TerminationReason::Ceiling),
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

/// Single-shot profile: exactly one status call, whatever it returns.
pub async fn check_once<A: JobApi>(
    api: &A,
    handle: &JobHandle,
    cadence: &Cadence,
) -> Result<JobStatusSnapshot, BridgeError> {
    let snapshot = api
        .fetch_status(handle, &cadence.single_shot_options())
        .await?;
    tracing::debug!(
        thread_id = handle.thread_id,
        state = snapshot.state.as_str(),
        "single-shot status check"
    );
    Ok(snapshot)
}

async fn ceiling(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
