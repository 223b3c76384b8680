//! Reconnecting stream client.
//!
//! [`StreamController`] is the state machine
//! `CONNECTING -> OPEN -> RECONNECT_WAIT -> CONNECTING -> ...`, with `CLOSED`
//! reached only on teardown. [`spawn_controller`] drives it from a transport
//! and a single reconnect timer, publishing a flat [`StreamView`] after every
//! transition. A failed or dropped connection is always retried after the
//! fixed delay; the controller never gives up on its own.

use crate::client::config::ControllerConfig;
use crate::client::sse::Frame;
use crate::client::transport::Transport;
use crate::metrics::Snapshot;
use crate::web::event::StreamEvent;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

/// Shown while the controller waits to reconnect.
pub const CONNECTION_LOST_MESSAGE: &str = "Connection lost. Attempting to reconnect...";

/// Shown when an inbound payload is not a valid stream event.
pub const PARSE_FAILED_MESSAGE: &str = "Failed to parse system data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerState {
    Connecting,
    Open,
    ReconnectWait,
    Closed,
}

/// Externally observable connection health.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHealth {
    pub is_connected: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Everything the presentation layer needs; always valid.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamView {
    pub state: ControllerState,
    pub health: ConnectionHealth,
    /// Last good snapshot, kept across error events and reconnects
    pub data: Option<Snapshot>,
    /// Connection failures seen so far
    pub reconnect_attempts: u64,
}

impl Default for StreamView {
    fn default() -> Self {
        Self {
            state: ControllerState::Connecting,
            health: ConnectionHealth::default(),
            data: None,
            reconnect_attempts: 0,
        }
    }
}

/// The client state machine, free of I/O and timers.
#[derive(Debug, Default)]
pub struct StreamController {
    view: StreamView,
}

impl StreamController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> &StreamView {
        &self.view
    }

    pub fn state(&self) -> ControllerState {
        self.view.state
    }

    fn is_closed(&self) -> bool {
        self.view.state == ControllerState::Closed
    }

    /// A new connection attempt starts.
    pub fn begin_connect(&mut self) {
        if self.is_closed() {
            return;
        }
        self.view.state = ControllerState::Connecting;
        self.view.health.is_connected = false;
    }

    /// The transport reported the stream as accepted.
    pub fn on_open(&mut self) {
        if self.is_closed() {
            return;
        }
        self.view.state = ControllerState::Open;
        self.view.health.is_connected = true;
        self.view.health.last_error = None;
    }

    /// Apply one inbound payload.
    ///
    /// Updates replace the snapshot; error events and malformed payloads
    /// only set `last_error` and keep the prior snapshot and connection.
    pub fn on_message(&mut self, payload: &str) {
        if self.is_closed() {
            return;
        }
        match StreamEvent::from_json(payload) {
            Ok(StreamEvent::SystemUpdate { data, .. }) => {
                self.view.data = Some(*data);
                self.view.health.last_update = Some(Utc::now());
                self.view.health.last_error = None;
            }
            Ok(StreamEvent::Error { message, .. }) => {
                self.view.health.last_error = Some(message);
            }
            Err(e) => {
                debug!(error = %e, "discarding malformed stream payload");
                self.view.health.last_error = Some(PARSE_FAILED_MESSAGE.to_string());
            }
        }
    }

    /// The connection failed or dropped; a reconnect will be scheduled.
    pub fn on_transport_error(&mut self) {
        if self.is_closed() {
            return;
        }
        self.view.state = ControllerState::ReconnectWait;
        self.view.health.is_connected = false;
        self.view.health.last_error = Some(CONNECTION_LOST_MESSAGE.to_string());
        self.view.reconnect_attempts += 1;
    }

    /// Tear down. Terminal.
    pub fn close(&mut self) {
        self.view.state = ControllerState::Closed;
        self.view.health.is_connected = false;
    }
}

/// Owner of a running controller.
///
/// Dropping the handle tears the controller down just like [`close`](Self::close).
pub struct ControllerHandle {
    view: watch::Receiver<StreamView>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ControllerHandle {
    /// Subscribe to view changes.
    pub fn subscribe(&self) -> watch::Receiver<StreamView> {
        self.view.clone()
    }

    /// The latest view.
    pub fn current(&self) -> StreamView {
        self.view.borrow().clone()
    }

    /// Cancel any pending reconnect, release the transport and wait for the
    /// controller to reach `CLOSED`.
    pub async fn close(self) -> StreamView {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "stream controller task failed");
        }
        let view = self.view.borrow().clone();
        view
    }
}

/// Start a controller that connects through `transport`.
///
/// Uses the reconnect delay and idle timeout from `config`.
pub fn spawn_controller(transport: Arc<dyn Transport>, config: &ControllerConfig) -> ControllerHandle {
    let (view_tx, view_rx) = watch::channel(StreamView::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let timing = Timing {
        reconnect_delay: config.reconnect_delay(),
        idle_timeout: config.idle_timeout(),
    };
    let task = tokio::spawn(drive(transport, timing, view_tx, shutdown_rx));

    ControllerHandle {
        view: view_rx,
        shutdown: shutdown_tx,
        task,
    }
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    reconnect_delay: Duration,
    idle_timeout: Duration,
}

async fn drive(
    transport: Arc<dyn Transport>,
    timing: Timing,
    view: watch::Sender<StreamView>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut machine = StreamController::new();
    let publish = |machine: &StreamController| {
        view.send_replace(machine.view().clone());
    };

    'session: loop {
        machine.begin_connect();
        publish(&machine);

        let connected = tokio::select! {
            biased;
            _ = shutdown.changed() => break 'session,
            result = transport.connect() => result,
        };

        match connected {
            Ok(mut messages) => {
                machine.on_open();
                publish(&machine);
                info!("stream connected");

                let lost = loop {
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break None,
                        item = time::timeout(timing.idle_timeout, messages.next()) => match item {
                            Ok(Some(Ok(Frame::Event(payload)))) => {
                                machine.on_message(&payload);
                                publish(&machine);
                            }
                            Ok(Some(Ok(Frame::KeepAlive))) => debug!("keep-alive"),
                            Ok(Some(Err(e))) => break Some(e.to_string()),
                            Ok(None) => break Some("stream ended".to_string()),
                            Err(_) => {
                                break Some(format!("no data for {}ms", timing.idle_timeout.as_millis()))
                            }
                        },
                    }
                };
                // The dead transport is released before any new attempt.
                drop(messages);

                match lost {
                    None => break 'session,
                    Some(reason) => warn!(reason = %reason, "stream connection lost"),
                }
            }
            Err(e) => warn!(error = %e, "stream connection failed"),
        }

        machine.on_transport_error();
        publish(&machine);

        tokio::select! {
            biased;
            _ = shutdown.changed() => break 'session,
            _ = time::sleep(timing.reconnect_delay) => {}
        }
        info!(attempt = machine.view().reconnect_attempts, "reconnecting");
    }

    machine.close();
    publish(&machine);
    info!("stream controller closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::MessageStream;
    use crate::error::{Result, SystemError};
    use crate::metrics::data::fixture_snapshot;
    use async_trait::async_trait;
    use futures_util::stream;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    fn update(seed: f64) -> String {
        StreamEvent::update(fixture_snapshot(seed)).to_json().unwrap()
    }

    fn error_event(message: &str) -> String {
        StreamEvent::error(message).to_json().unwrap()
    }

    enum Attempt {
        /// Fail to connect
        Refuse,
        /// Deliver the payloads, then drop the connection
        Deliver(Vec<String>),
        /// Deliver the payloads, then stay open and silent
        Hold(Vec<String>),
        /// Stay open, sending only keep-alives at this period
        Heartbeat(Duration),
    }

    /// Scripted transport; once the script runs out it keeps refusing.
    struct FakeTransport {
        script: Mutex<VecDeque<Attempt>>,
        opens: mpsc::UnboundedSender<Instant>,
        live: Arc<AtomicUsize>,
        max_live: Arc<AtomicUsize>,
    }

    struct LiveGuard(Arc<AtomicUsize>);

    impl Drop for LiveGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl FakeTransport {
        fn new(script: Vec<Attempt>) -> (Arc<Self>, mpsc::UnboundedReceiver<Instant>) {
            let (opens, rx) = mpsc::unbounded_channel();
            let transport = Arc::new(Self {
                script: Mutex::new(script.into()),
                opens,
                live: Arc::new(AtomicUsize::new(0)),
                max_live: Arc::new(AtomicUsize::new(0)),
            });
            (transport, rx)
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn connect(&self) -> Result<MessageStream> {
            let _ = self.opens.send(Instant::now());
            let attempt = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Attempt::Refuse);

            let events = |payloads: Vec<String>| {
                stream::iter(payloads.into_iter().map(|payload| Ok(Frame::Event(payload))))
            };
            let messages: MessageStream = match attempt {
                Attempt::Refuse => return Err(SystemError::network_error("connection refused")),
                Attempt::Deliver(payloads) => events(payloads).boxed(),
                Attempt::Hold(payloads) => events(payloads).chain(stream::pending()).boxed(),
                Attempt::Heartbeat(period) => stream::unfold((), move |()| async move {
                    time::sleep(period).await;
                    Some((Ok(Frame::KeepAlive), ()))
                })
                .boxed(),
            };

            let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_live.fetch_max(live, Ordering::SeqCst);
            let guard = LiveGuard(self.live.clone());

            Ok(messages
                .map(move |item| {
                    let _held = &guard;
                    item
                })
                .boxed())
        }
    }

    async fn wait_for(
        view: &mut watch::Receiver<StreamView>,
        predicate: impl Fn(&StreamView) -> bool,
    ) -> StreamView {
        let seen = view.wait_for(|v| predicate(v)).await.unwrap();
        StreamView::clone(&seen)
    }

    #[test]
    fn test_initial_state() {
        let machine = StreamController::new();
        assert_eq!(machine.state(), ControllerState::Connecting);
        assert!(!machine.view().health.is_connected);
        assert!(machine.view().data.is_none());
    }

    #[test]
    fn test_open_clears_error() {
        let mut machine = StreamController::new();
        machine.on_transport_error();
        machine.begin_connect();
        machine.on_open();
        assert_eq!(machine.state(), ControllerState::Open);
        assert!(machine.view().health.is_connected);
        assert_eq!(machine.view().health.last_error, None);
    }

    #[test]
    fn test_update_replaces_snapshot() {
        let mut machine = StreamController::new();
        machine.on_open();
        machine.on_message(&update(1.0));
        machine.on_message(&update(2.0));

        let view = machine.view();
        assert_eq!(view.data.as_ref().unwrap().cpu_temperature_c, 42.0);
        assert!(view.health.last_update.is_some());
        assert_eq!(view.health.last_error, None);
    }

    #[test]
    fn test_error_event_keeps_prior_snapshot() {
        let mut machine = StreamController::new();
        machine.on_open();
        machine.on_message(&update(1.0));
        machine.on_message(&error_event("Failed to fetch system data"));

        let view = machine.view();
        assert_eq!(view.data.as_ref().unwrap().cpu_temperature_c, 41.0);
        assert_eq!(view.health.last_error.as_deref(), Some("Failed to fetch system data"));
        assert!(view.health.is_connected);

        machine.on_message(&update(3.0));
        assert_eq!(machine.view().health.last_error, None);
    }

    #[test]
    fn test_malformed_payload_keeps_connection() {
        let mut machine = StreamController::new();
        machine.on_open();
        machine.on_message("{not json");
        assert_eq!(machine.state(), ControllerState::Open);
        assert_eq!(machine.view().health.last_error.as_deref(), Some(PARSE_FAILED_MESSAGE));
    }

    #[test]
    fn test_transport_error_keeps_data() {
        let mut machine = StreamController::new();
        machine.on_open();
        machine.on_message(&update(1.0));
        machine.on_transport_error();

        let view = machine.view();
        assert_eq!(view.state, ControllerState::ReconnectWait);
        assert!(!view.health.is_connected);
        assert_eq!(view.health.last_error.as_deref(), Some(CONNECTION_LOST_MESSAGE));
        assert!(view.data.is_some());
        assert_eq!(view.reconnect_attempts, 1);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut machine = StreamController::new();
        machine.close();
        machine.begin_connect();
        machine.on_open();
        machine.on_message(&update(1.0));
        machine.on_transport_error();

        assert_eq!(machine.state(), ControllerState::Closed);
        assert!(machine.view().data.is_none());
        assert_eq!(machine.view().reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_stream_reconnects_after_fixed_delay() {
        let script = (0..4).map(|i| Attempt::Deliver(vec![update(i as f64)])).collect();
        let (transport, mut opens) = FakeTransport::new(script);
        let handle = spawn_controller(transport.clone(), &ControllerConfig::default());

        let mut times = Vec::new();
        for _ in 0..4 {
            times.push(opens.recv().await.unwrap());
        }
        for pair in times.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_millis(3000));
        }

        let view = handle.close().await;
        assert_eq!(view.state, ControllerState::Closed);
        assert!(view.reconnect_attempts >= 3);
        assert!(view.data.is_some());
        assert_eq!(transport.max_live.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connections_retry_forever() {
        let (transport, mut opens) = FakeTransport::new(Vec::new());
        let handle = spawn_controller(transport, &ControllerConfig::default());
        let mut view = handle.subscribe();

        let first = opens.recv().await.unwrap();
        for cycle in 1..=3u32 {
            let next = opens.recv().await.unwrap();
            assert_eq!(next - first, Duration::from_millis(3000) * cycle);
        }

        let seen = wait_for(&mut view, |v| v.reconnect_attempts >= 3).await;
        assert!(!seen.health.is_connected);
        assert_eq!(seen.health.last_error.as_deref(), Some(CONNECTION_LOST_MESSAGE));
        handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_reconnect() {
        let (transport, mut opens) = FakeTransport::new(vec![Attempt::Refuse]);
        let handle = spawn_controller(transport, &ControllerConfig::default());
        let mut view = handle.subscribe();

        opens.recv().await.unwrap();
        wait_for(&mut view, |v| v.state == ControllerState::ReconnectWait).await;

        let closed = handle.close().await;
        assert_eq!(closed.state, ControllerState::Closed);

        time::sleep(Duration::from_secs(10)).await;
        assert!(opens.try_recv().is_err(), "reconnected after close");
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_releases_open_transport() {
        let (transport, mut opens) = FakeTransport::new(vec![Attempt::Hold(vec![update(1.0)])]);
        let handle = spawn_controller(transport.clone(), &ControllerConfig::default());
        let mut view = handle.subscribe();

        opens.recv().await.unwrap();
        let open = wait_for(&mut view, |v| v.data.is_some()).await;
        assert_eq!(open.state, ControllerState::Open);
        assert_eq!(transport.live.load(Ordering::SeqCst), 1);

        handle.close().await;
        assert_eq!(transport.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_event_then_reconnect_keeps_data() {
        let script = vec![
            Attempt::Deliver(vec![update(1.0), error_event("Failed to fetch system data")]),
            Attempt::Hold(vec![update(2.0)]),
        ];
        let (transport, _opens) = FakeTransport::new(script);
        let handle = spawn_controller(transport, &ControllerConfig::default());
        let mut view = handle.subscribe();

        let waiting = wait_for(&mut view, |v| v.state == ControllerState::ReconnectWait).await;
        assert_eq!(waiting.data.as_ref().unwrap().cpu_temperature_c, 41.0);

        let recovered = wait_for(&mut view, |v| {
            v.data.as_ref().map(|d| d.cpu_temperature_c) == Some(42.0)
        })
        .await;
        assert!(recovered.health.is_connected);
        assert_eq!(recovered.health.last_error, None);
        handle.close().await;
    }

    #[tokio::test]
    async fn test_last_update_strictly_increases() {
        struct Trickle;

        #[async_trait]
        impl Transport for Trickle {
            async fn connect(&self) -> Result<MessageStream> {
                let payloads: Vec<String> = (0..4).map(|i| update(i as f64)).collect();
                Ok(stream::iter(payloads)
                    .then(|payload| async move {
                        time::sleep(Duration::from_millis(20)).await;
                        Ok(Frame::Event(payload))
                    })
                    .chain(stream::pending())
                    .boxed())
            }
        }

        let handle = spawn_controller(Arc::new(Trickle), &ControllerConfig::default());
        let mut view = handle.subscribe();

        let mut seen: Vec<DateTime<Utc>> = Vec::new();
        while seen.len() < 3 {
            view.changed().await.unwrap();
            let last_update = view.borrow_and_update().health.last_update;
            if let Some(at) = last_update {
                if seen.last() != Some(&at) {
                    seen.push(at);
                }
            }
        }
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_tears_down() {
        let (transport, mut opens) = FakeTransport::new(Vec::new());
        let handle = spawn_controller(transport, &ControllerConfig::default());
        opens.recv().await.unwrap();
        drop(handle);

        time::sleep(Duration::from_secs(10)).await;
        assert!(opens.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_stream_times_out() {
        let (transport, mut opens) = FakeTransport::new(vec![Attempt::Hold(vec![update(1.0)])]);
        let config = ControllerConfig::default().with_idle_timeout_ms(30_000);
        let handle = spawn_controller(transport.clone(), &config);
        let mut view = handle.subscribe();

        let opened = opens.recv().await.unwrap();
        wait_for(&mut view, |v| v.data.is_some()).await;

        let lost = wait_for(&mut view, |v| v.state == ControllerState::ReconnectWait).await;
        assert_eq!(Instant::now() - opened, Duration::from_millis(30_000));
        assert!(!lost.health.is_connected);
        assert_eq!(lost.health.last_error.as_deref(), Some(CONNECTION_LOST_MESSAGE));
        assert_eq!(lost.data.as_ref().unwrap().cpu_temperature_c, 41.0);
        assert_eq!(transport.live.load(Ordering::SeqCst), 0);

        // Back on the normal reconnect path.
        let retried = opens.recv().await.unwrap();
        assert_eq!(retried - opened, Duration::from_millis(33_000));
        handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alives_hold_stream_open() {
        let (transport, mut opens) =
            FakeTransport::new(vec![Attempt::Heartbeat(Duration::from_secs(15))]);
        let config = ControllerConfig::default().with_idle_timeout_ms(30_000);
        let handle = spawn_controller(transport, &config);

        opens.recv().await.unwrap();
        time::sleep(Duration::from_secs(120)).await;

        let view = handle.current();
        assert_eq!(view.state, ControllerState::Open);
        assert!(view.health.is_connected);
        assert_eq!(view.reconnect_attempts, 0);
        assert!(opens.try_recv().is_err());
        handle.close().await;
    }
}
