//! Per-client push-stream sessions.
//!
//! A session owns one snapshot source and one repeating timer. Its record is
//! shared between the timer task, the event producer handed to the HTTP
//! layer and any [`SessionHandle`]. The `closed` flag is the single source of
//! truth: it is checked when a tick starts and again right before the event
//! is emitted, so nothing is emitted after a close.

use crate::error::{Result, SystemError};
use crate::metrics::SnapshotSource;
use crate::web::event::{StreamEvent, SAMPLE_FAILED_MESSAGE};
use futures_util::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit};
use tokio::time::{self, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

const EVENT_BUFFER: usize = 8;

struct SessionState {
    id: Uuid,
    closed: AtomicBool,
    shutdown: Notify,
}

impl SessionState {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns `true` for the call that actually closed the session.
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shutdown.notify_one();
        true
    }
}

/// Cancels a session from outside the event stream.
#[derive(Clone)]
pub struct SessionHandle {
    state: Arc<SessionState>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.state.id
    }

    /// Close the session. Idempotent.
    pub fn cancel(&self) {
        if self.state.close() {
            debug!(session_id = %self.state.id, "session cancelled");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}

/// The ordered event stream of one session.
///
/// Dropping it (the client went away) closes the session. Once closed it
/// yields nothing more, even if an event was already buffered.
pub struct SessionEvents {
    state: Arc<SessionState>,
    events: ReceiverStream<StreamEvent>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl SessionEvents {
    /// Tie a server-wide connection slot to the lifetime of this session.
    pub fn with_permit(mut self, permit: OwnedSemaphorePermit) -> Self {
        self._permit = Some(permit);
        self
    }

    pub fn id(&self) -> Uuid {
        self.state.id
    }
}

impl Stream for SessionEvents {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.state.is_closed() {
            return Poll::Ready(None);
        }
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for SessionEvents {
    fn drop(&mut self) {
        if self.state.close() {
            debug!(session_id = %self.state.id, "client disconnected");
        }
    }
}

/// Open a session that samples `source` immediately and then every `cadence`.
///
/// Must be called inside a tokio runtime; the timer runs on its own task so
/// a slow sample never delays other sessions.
pub fn open_session(
    source: Box<dyn SnapshotSource>,
    cadence: Duration,
) -> Result<(SessionEvents, SessionHandle)> {
    if cadence.is_zero() {
        return Err(SystemError::config_error("stream cadence must be greater than zero"));
    }

    let state = Arc::new(SessionState::new());
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    let span = info_span!("session", session_id = %state.id);
    tokio::spawn(run_session(state.clone(), source, cadence, tx).instrument(span));

    let events = SessionEvents {
        state: state.clone(),
        events: ReceiverStream::new(rx),
        _permit: None,
    };
    Ok((events, SessionHandle { state }))
}

async fn run_session(
    state: Arc<SessionState>,
    mut source: Box<dyn SnapshotSource>,
    cadence: Duration,
    tx: mpsc::Sender<StreamEvent>,
) {
    info!(cadence_ms = cadence.as_millis() as u64, "stream session opened");

    // The first tick completes immediately, giving the cold-start event.
    let mut ticker = time::interval(cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = state.shutdown.notified() => break,
            _ = ticker.tick() => {}
        }
        if state.is_closed() {
            break;
        }
        ticks += 1;

        let event = tokio::select! {
            biased;
            _ = state.shutdown.notified() => break,
            result = source.sample() => match result {
                Ok(snapshot) => StreamEvent::update(snapshot),
                Err(e) => {
                    warn!(tick = ticks, error = %e, "sample failed");
                    StreamEvent::error(SAMPLE_FAILED_MESSAGE)
                }
            },
        };

        if state.is_closed() {
            debug!(tick = ticks, "session closed during tick, discarding event");
            break;
        }

        tokio::select! {
            biased;
            _ = state.shutdown.notified() => break,
            sent = tx.send(event) => {
                if sent.is_err() {
                    state.close();
                    break;
                }
            }
        }
    }

    state.close();
    info!(ticks, "stream session closed");
}
