use tokio_util::sync::CancellationToken;

use crate::dispatch::async_poll::{self, Cadence, PollOutcome, PollSession};
use crate::dispatch::{JobApi, JobHandle};
use crate::error::BridgeError;
use crate::response::{BufferedResponse, StatusResponse};

/// Poll the session to completion (or forced termination) and translate the
/// outcome. The outcome is returned too so callers can persist the snapshot.
pub async fn poll_to_response<A: JobApi>(
    api: &A,
    session: &mut PollSession,
    cadence: &Cadence,
    shutdown: &CancellationToken,
) -> (PollOutcome, BufferedResponse) {
    let outcome = async_poll::poll_until_complete(api, session, cadence, shutdown).await;
    let response = BufferedResponse::from_outcome(&outcome);
    (outcome, response)
}

/// One upstream status check, returned as the normalized payload. Only a
/// failed status call is an error; an unfinished job is a normal reply.
pub async fn single_shot<A: JobApi>(
    api: &A,
    handle: &JobHandle,
    cadence: &Cadence,
) -> Result<StatusResponse, BridgeError> {
    let snapshot = async_poll::check_once(api, handle, cadence).await?;
    Ok(StatusResponse::from(snapshot))
}
