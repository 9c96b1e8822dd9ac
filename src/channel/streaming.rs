use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::dispatch::async_poll::{
    Cadence, Observation, PollOutcome, PollSession, Step, TerminationReason,
};
use crate::dispatch::{JobApi, JobHandle, JobState, JobStatusSnapshot};
use crate::parsers;
use crate::response::StreamEvent;

/// Events buffered between the poll task and the HTTP body.
pub const STREAM_BUFFER: usize = 64;

/// `Connecting -> Polling -> {Polling | Completed -> Closed}`; cancellation
/// goes straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Connecting,
    Polling,
    Completed,
    Closed,
}

/// Open the SSE channel for one job. Polling runs in its own task and stops
/// as soon as the HTTP body is dropped.
pub fn sse_response<A: JobApi + 'static>(
    api: Arc<A>,
    handle: JobHandle,
    cadence: Cadence,
    shutdown: CancellationToken,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<StreamEvent>(STREAM_BUFFER);
    tokio::spawn(async move {
        run_stream(api.as_ref(), handle, cadence, shutdown, tx).await;
    });

    let stream = ReceiverStream::new(rx).map(|event| Ok(Event::default().data(event.to_json())));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Drive one streaming session, sending events to `tx` in the order they
/// were observed. Returns when the job completes, the receiver is dropped,
/// or `shutdown` fires.
pub async fn run_stream<A: JobApi>(
    api: &A,
    handle: JobHandle,
    cadence: Cadence,
    shutdown: CancellationToken,
    tx: mpsc::Sender<StreamEvent>,
) -> PollOutcome {
    let options = cadence.streaming_options();
    let mut session = PollSession::new(handle);
    let mut phase = StreamPhase::Connecting;

    tracing::info!(
        session_id = %session.id(),
        thread_id = session.handle().thread_id,
        project_id = session.handle().project_id,
        "stream opened"
    );

    let connecting = StreamEvent::Status {
        message: "Connecting to AI service".to_string(),
        thread_id: session.handle().thread_id.clone(),
    };
    if tx.send(connecting).await.is_err() {
        return close(&mut session, &mut phase, TerminationReason::Disconnected);
    }
    phase = StreamPhase::Polling;

    loop {
        let attempt = session.attempt_count() + 1;
        let progress = StreamEvent::Progress {
            message: format!("Checking job status (attempt {attempt})"),
            attempt,
        };
        if tx.send(progress).await.is_err() {
            return close(&mut session, &mut phase, TerminationReason::Disconnected);
        }

        let step = tokio::select! {
            biased;
            _ = tx.closed() => {
                return close(&mut session, &mut phase, TerminationReason::Disconnected);
            }
            _ = shutdown.cancelled() => {
                let _ = tx.send(shutdown_event()).await;
                return close(&mut session, &mut phase, TerminationReason::Shutdown);
            }
            step = session.step(api, &options) => step,
        };

        let pause = step.pause(&cadence);
        for event in iteration_events(&step, &session) {
            if tx.send(event).await.is_err() {
                return close(&mut session, &mut phase, TerminationReason::Disconnected);
            }
        }

        if let Observation::Snapshot(snapshot) = step.observation
            && snapshot.is_final()
        {
            phase = StreamPhase::Completed;
            tracing::debug!(session_id = %session.id(), phase = ?phase, "sending final events");
            for event in completion_events(&snapshot) {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            phase = StreamPhase::Closed;
            tracing::info!(
                session_id = %session.id(),
                attempts = session.attempt_count(),
                elapsed_ms = session.elapsed().as_millis() as u64,
                phase = ?phase,
                "stream completed"
            );
            return PollOutcome::Completed(snapshot);
        }

        tokio::select! {
            biased;
            _ = tx.closed() => {
                return close(&mut session, &mut phase, TerminationReason::Disconnected);
            }
            _ = shutdown.cancelled() => {
                let _ = tx.send(shutdown_event()).await;
                return close(&mut session, &mut phase, TerminationReason::Shutdown);
            }
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

fn close(
    session: &mut PollSession,
    phase: &mut StreamPhase,
    reason: TerminationReason,
) -> PollOutcome {
    tracing::debug!(session_id = %session.id(), from = ?phase, "closing stream");
    *phase = StreamPhase::Closed;
    session.terminate(reason)
}

fn shutdown_event() -> StreamEvent {
    StreamEvent::Done {
        message: "Server shutting down; reconnect to resume".to_string(),
    }
}

/// Events describing one non-final observation (or the status part of the
/// final one).
fn iteration_events(step: &Step, session: &PollSession) -> Vec<StreamEvent> {
    let snapshot = match &step.observation {
        Observation::TransportError(message) => {
            return vec![StreamEvent::Error {
                message: format!("{message}; retrying"),
                attempt: step.attempt,
                recoverable: true,
            }];
        }
        Observation::Snapshot(snapshot) => snapshot,
    };

    let mut events = vec![StreamEvent::ApiResponse {
        message: format!("AI service reported status: {}", snapshot.state.as_str()),
        status: snapshot.state,
        waited_seconds: snapshot.waited_seconds,
    }];

    if snapshot.is_final() {
        return events;
    }

    events.push(match snapshot.state {
        JobState::Failed => StreamEvent::Warning {
            message: "AI service reported a failure; still waiting for a result".to_string(),
            attempt: step.attempt,
        },
        JobState::Unknown => StreamEvent::Info {
            message: "Could not read job status; retrying".to_string(),
            attempt: step.attempt,
        },
        JobState::Running | JobState::Completed => {
            let elapsed = session.elapsed().as_secs();
            StreamEvent::Running {
                message: format!("Job still running ({elapsed}s elapsed)"),
                elapsed_seconds: elapsed,
                waited_seconds: snapshot.waited_seconds,
            }
        }
    });
    events
}

/// Terminal events: content, optional files and code blocks, then
/// `complete` and the `done` end marker.
fn completion_events(snapshot: &JobStatusSnapshot) -> Vec<StreamEvent> {
    let content = snapshot.content.clone().unwrap_or_default();
    let mut events = vec![StreamEvent::Content {
        message: "Response received".to_string(),
        content: content.clone(),
    }];

    if !snapshot.attachments.is_empty() {
        events.push(StreamEvent::Files {
            message: format!("{} file(s) attached", snapshot.attachments.len()),
            files: snapshot.attachments.clone(),
        });
    }

    let blocks = parsers::extract_code_blocks(&content);
    if !blocks.is_empty() {
        events.push(StreamEvent::Code {
            message: format!("{} code block(s)", blocks.len()),
            blocks,
        });
    }

    events.push(StreamEvent::Complete {
        message: "Job completed".to_string(),
        content,
        attachments: snapshot.attachments.clone(),
    });
    events.push(StreamEvent::Done {
        message: "Stream finished".to_string(),
    });
    events
}
