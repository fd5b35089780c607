//! WebSocket progress streaming.
//!
//! A client joins one job's stream. The first message is a snapshot of the
//! job's current state, followed by live `ProgressEvent` records until the
//! terminal event, after which the server closes the socket. Events buffered
//! before the snapshot was taken are not replayed.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use chrono::{DateTime, Utc};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::time::interval;
use tracing::{debug, info, warn};

use sclip_models::{JobId, ProgressEvent};
use sclip_queue::Subscription;

use crate::error::ApiResult;
use crate::metrics;
use crate::state::AppState;

const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Upgrade to a progress stream for one job. Unknown jobs get 404 before the upgrade.
pub async fn ws_job(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let job_id = JobId::from_string(job_id);
    state.registry().get(&job_id).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, job_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, job_id: JobId) {
    metrics::record_ws_connected();
    info!(job_id = %job_id, "Progress WebSocket connected");

    // Subscribe before reading the snapshot so no event falls in between.
    let subscription = state.broadcaster().subscribe(&job_id);
    if let Err(e) = stream_job(socket, &state, &job_id, subscription).await {
        debug!(job_id = %job_id, error = %e, "Progress WebSocket closed with error");
    }

    metrics::record_ws_disconnected();
    info!(job_id = %job_id, "Progress WebSocket disconnected");
}

async fn stream_job(
    socket: WebSocket,
    state: &AppState,
    job_id: &JobId,
    mut subscription: Subscription,
) -> Result<(), axum::Error> {
    let (mut sender, mut receiver) = socket.split();

    let snapshot = match state.registry().get(job_id).await {
        Ok(job) => ProgressEvent::snapshot(&job),
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "Job vanished before snapshot");
            return sender.close().await;
        }
    };
    let done = snapshot.is_terminal();
    let snapshot_at = snapshot.timestamp;
    send_event(&mut sender, &snapshot).await?;
    if done {
        return sender.close().await;
    }

    let mut heartbeat = interval(WS_HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            event = subscription.recv() => match event {
                Some(event) if is_stale(&event, snapshot_at) => {
                    debug!(job_id = %job_id, status = %event.status(), "Skipping event older than snapshot");
                }
                Some(event) => {
                    let terminal = event.is_terminal();
                    send_event(&mut sender, &event).await?;
                    if terminal {
                        break;
                    }
                }
                // Channel closed without us seeing the terminal event (lagged or forgotten)
                None => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e),
            },
            _ = heartbeat.tick() => {
                sender.send(Message::Ping(Vec::new())).await?;
            }
        }
    }

    sender.close().await
}

/// Whether the snapshot already covers `event`. Terminal events always go out.
fn is_stale(event: &ProgressEvent, snapshot_at: DateTime<Utc>) -> bool {
    !event.is_terminal() && event.timestamp <= snapshot_at
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &ProgressEvent) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!(job_id = %event.job_id, error = %e, "Failed to serialize progress event");
            return Ok(());
        }
    };
    sender.send(Message::Text(json)).await?;
    metrics::record_ws_message_sent(event.status().as_str());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use sclip_models::{ErrorKind, StageUpdate};

    fn event(update: StageUpdate, at: DateTime<Utc>) -> ProgressEvent {
        ProgressEvent::new(JobId::from_string("job-1"), update, 0.5, "msg").at(at)
    }

    #[test]
    fn test_events_up_to_snapshot_are_stale() {
        let snapshot_at = Utc::now();
        let before = event(StageUpdate::Transcribing, snapshot_at - ChronoDuration::seconds(1));
        let same = event(StageUpdate::Analyzing { cache_hit: false }, snapshot_at);
        let after = event(
            StageUpdate::Cutting {
                clips_done: 1,
                clips_total: 3,
            },
            snapshot_at + ChronoDuration::milliseconds(5),
        );

        assert!(is_stale(&before, snapshot_at));
        assert!(is_stale(&same, snapshot_at));
        assert!(!is_stale(&after, snapshot_at));
    }

    #[test]
    fn test_terminal_event_is_never_stale() {
        let snapshot_at = Utc::now();
        let failed = event(
            StageUpdate::Error {
                kind: ErrorKind::Cancelled,
            },
            snapshot_at - ChronoDuration::seconds(1),
        );
        assert!(!is_stale(&failed, snapshot_at));
    }
}
