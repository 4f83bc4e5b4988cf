//! The session keep-alive loop.
//!
//! Every `keep_alive_interval` the loop sends one beacon carrying the
//! session's delivered-response and consumed-event high-water marks. At
//! most one beacon is in flight: the loop awaits each round-trip, so a
//! slow cluster coalesces beacons instead of stacking them.
//!
//! A successful beacon records a local ack time and clears a `Suspended`
//! status. When `session_timeout` passes without an ack — or the cluster
//! answers `UnknownSession` — the session is expired locally: every
//! pending operation fails and the status watch flips to `Expired`.

use std::time::Instant;

use backon::Retryable;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::Error;
use crate::protocol::{KeepAliveRequest, ResponseStatus};

use super::retry;
use super::submitter::Submitter;

/// Handle to a running keep-alive loop.
pub struct KeepAliveLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl KeepAliveLoop {
    /// Spawn the loop for a session.
    pub fn spawn(submitter: Submitter) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(submitter, shutdown_rx));
        Self { shutdown, handle }
    }

    /// Signal the loop to stop after the in-flight beacon, if any.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.handle.await;
    }
}

async fn run(submitter: Submitter, mut shutdown: watch::Receiver<bool>) {
    let session_id = submitter.session_id();
    let session_timeout = submitter.config().session_timeout;
    let mut interval = tokio::time::interval(submitter.config().keep_alive_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_ack = Instant::now();

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(session_id = %session_id, "Keep-alive loop stopping");
                    return;
                }
                continue;
            }
        }
        if submitter.status().is_terminal() {
            return;
        }

        let state = submitter.state();
        let request = KeepAliveRequest {
            session_id,
            command_sequence: state.command_response(),
            event_index: state.event_index(),
        };

        let result = {
            let transport = submitter.transport().clone();
            (move || {
                let transport = transport.clone();
                async move {
                    let response = transport.keep_alive(request).await?;
                    if let ResponseStatus::Error {
                        code: crate::error::ErrorCode::NoLeader,
                        ..
                    } = &response.status
                    {
                        transport.rebind(response.leader_hint.clone()).await;
                        return Err(Error::NoLeader);
                    }
                    Ok(response)
                }
            })
            .retry(retry::keep_alive_policy())
            .when(|e: &Error| e.is_retriable())
            .await
        };

        let missed = match result {
            Ok(response) => match response.status.to_error(session_id) {
                None => {
                    last_ack = Instant::now();
                    submitter.state().set_response_index(response.index);
                    submitter.mark_open();
                    false
                }
                Some(err) if err.is_session_fatal() => {
                    // A keep-alive racing a server-side expiry lands
                    // here; surface it as session loss.
                    submitter.expire_session(err);
                    return;
                }
                Some(err) => {
                    debug!(session_id = %session_id, error = %err, "Keep-alive rejected");
                    true
                }
            },
            Err(err) if err.is_session_fatal() => {
                submitter.expire_session(err);
                return;
            }
            Err(err) => {
                debug!(session_id = %session_id, error = %err, "Keep-alive failed");
                true
            }
        };

        if missed {
            if last_ack.elapsed() >= session_timeout {
                warn!(
                    session_id = %session_id,
                    elapsed_ms = last_ack.elapsed().as_millis() as u64,
                    "Session timeout elapsed without a keep-alive ack"
                );
                submitter.expire_session(Error::SessionExpired(session_id));
                return;
            }
            submitter.mark_suspended();
        }
    }
}
