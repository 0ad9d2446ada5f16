//! Session lifecycle: the single WhatsApp connection, its state machine and
//! the reconnect policy.
//!
//! Only the event loop in this module mutates session state; every other
//! component reads `snapshot()` and calls `send()`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{OutboundAction, RawInbound};
use crate::errors::{GatewayError, GatewayResult};
use crate::transport::{Transport, TransportEvent};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const INBOUND_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl SessionState {
    pub fn label(self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        }
    }
}

/// Read-only view of the session, safe to hand to any component.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub user: Option<String>,
    pub qr: Option<String>,
    /// True after an explicit logout/deauthorization: auto-reconnect stops
    /// and an operator must re-pair the device.
    pub needs_pairing: bool,
}

impl SessionSnapshot {
    pub fn status_label(&self) -> &'static str {
        if self.needs_pairing && self.state == SessionState::Disconnected {
            "logged_out"
        } else {
            self.state.label()
        }
    }
}

/// Reconnect cadence: exponential backoff from `base_delay` up to
/// `max_delay`, attempt counter reset on every successful open.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Pause between an operator-forced teardown and the fresh connect.
    pub resume_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            resume_delay: Duration::from_secs(2),
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

struct Shared {
    state: SessionState,
    user: Option<String>,
    qr: Option<String>,
    needs_pairing: bool,
    attempt: u32,
    /// At most one scheduled reconnect exists; scheduling a new one aborts
    /// the previous timer.
    reconnect_timer: Option<JoinHandle<()>>,
}

pub struct SessionManager {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    event_tx: mpsc::Sender<TransportEvent>,
    inbound_tx: mpsc::Sender<RawInbound>,
    shared: Mutex<Shared>,
    started_at: Instant,
    /// Self-handle for the timer tasks this manager spawns.
    weak: std::sync::Weak<SessionManager>,
}

impl SessionManager {
    /// Create the manager and start its event loop. The returned receiver
    /// carries raw inbound messages for the router pipeline.
    pub fn new(
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
    ) -> (Arc<Self>, mpsc::Receiver<RawInbound>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);

        let manager = Arc::new_cyclic(|weak| Self {
            transport,
            policy,
            event_tx,
            inbound_tx,
            shared: Mutex::new(Shared {
                state: SessionState::Disconnected,
                user: None,
                qr: None,
                needs_pairing: false,
                attempt: 0,
                reconnect_timer: None,
            }),
            started_at: Instant::now(),
            weak: weak.clone(),
        });

        let looper = manager.clone();
        tokio::spawn(async move { looper.event_loop(event_rx).await });

        (manager, inbound_rx)
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let s = self.lock();
        SessionSnapshot {
            state: s.state,
            user: s.user.clone(),
            qr: s.qr.clone(),
            needs_pairing: s.needs_pairing,
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Open the transport. Resolution arrives as `Opened`/`Closed` events.
    pub async fn connect(&self) -> GatewayResult<()> {
        self.lock().state = SessionState::Connecting;
        if let Err(e) = self.transport.connect(self.event_tx.clone()).await {
            self.lock().state = SessionState::Disconnected;
            return Err(GatewayError::Transport(e.to_string()));
        }
        Ok(())
    }

    /// Submit one outbound action. Fails fast when the session is not
    /// connected; the transport is never touched in that case.
    pub async fn send(&self, chat: &str, action: &OutboundAction) -> GatewayResult<()> {
        if self.lock().state != SessionState::Connected {
            return Err(GatewayError::NotConnected);
        }
        debug!("sending {} action to {}", action.kind(), chat);
        self.transport
            .deliver(chat, action)
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }

    /// Operator-triggered recovery: tear down the live connection, clear
    /// in-memory pairing state and reconnect after a short delay. Supersedes
    /// any pending reconnect timer.
    pub async fn force_reconnect(&self) {
        {
            let mut s = self.lock();
            if let Some(timer) = s.reconnect_timer.take() {
                timer.abort();
            }
            s.state = SessionState::Disconnected;
            s.qr = None;
            s.user = None;
            s.attempt = 0;
            s.needs_pairing = false;
        }
        self.transport.disconnect().await;
        info!(
            "forced reconnect: transport torn down, reconnecting in {:?}",
            self.policy.resume_delay
        );

        let Some(manager) = self.weak.upgrade() else {
            return;
        };
        let handle = tokio::spawn(async move {
            tokio::time::sleep(manager.policy.resume_delay).await;
            if let Err(e) = manager.connect().await {
                warn!("reconnect after forced teardown failed: {}", e);
                manager.schedule_reconnect();
            }
        });
        self.lock().reconnect_timer = Some(handle);
    }

    async fn event_loop(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::QrAvailable(qr) => {
                    let mut s = self.lock();
                    debug!("pairing QR payload updated");
                    s.qr = Some(qr);
                    if s.state == SessionState::Disconnected {
                        s.state = SessionState::Connecting;
                    }
                }
                TransportEvent::Opened { user } => {
                    let mut s = self.lock();
                    s.state = SessionState::Connected;
                    s.qr = None;
                    s.user = user;
                    s.attempt = 0;
                    s.needs_pairing = false;
                    if let Some(timer) = s.reconnect_timer.take() {
                        timer.abort();
                    }
                    info!("session connected");
                }
                TransportEvent::Closed {
                    reason,
                    recoverable,
                } => {
                    {
                        let mut s = self.lock();
                        s.state = SessionState::Disconnected;
                        s.user = None;
                    }
                    if recoverable {
                        warn!("session closed ({}), scheduling reconnect", reason);
                        self.schedule_reconnect();
                    } else {
                        let mut s = self.lock();
                        if let Some(timer) = s.reconnect_timer.take() {
                            timer.abort();
                        }
                        s.needs_pairing = true;
                        s.qr = None;
                        warn!(
                            "session closed permanently ({}); fresh pairing required",
                            reason
                        );
                    }
                }
                TransportEvent::Message(raw) => {
                    if let Err(e) = self.inbound_tx.send(raw).await {
                        error!("inbound pipeline unavailable: {}", e);
                    }
                }
            }
        }
        debug!("transport event channel closed");
    }

    /// Schedule exactly one reconnect; a prior pending timer is aborted so
    /// reconnect chains never overlap.
    fn schedule_reconnect(&self) {
        let Some(manager) = self.weak.upgrade() else {
            return;
        };
        let mut s = self.lock();
        if let Some(timer) = s.reconnect_timer.take() {
            timer.abort();
        }
        let delay = self.policy.delay_for(s.attempt);
        s.attempt = s.attempt.saturating_add(1);
        let attempt = s.attempt;

        s.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!("reconnect attempt {}", attempt);
            if let Err(e) = manager.connect().await {
                warn!("reconnect attempt {} failed: {}", attempt, e);
                manager.schedule_reconnect();
            }
        }));
        info!("reconnect scheduled in {:?} (attempt {})", delay, attempt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct StubTransport {
        connects: AtomicUsize,
        delivered: Mutex<Vec<(String, OutboundAction)>>,
        events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
        fail_connect: AtomicBool,
    }

    impl StubTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                connects: AtomicUsize::new(0),
                delivered: Mutex::new(Vec::new()),
                events: Mutex::new(None),
                fail_connect: AtomicBool::new(false),
            })
        }

        fn connect_count(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        fn deliver_count(&self) -> usize {
            self.delivered.lock().unwrap().len()
        }

        async fn emit(&self, event: TransportEvent) {
            let tx = self
                .events
                .lock()
                .unwrap()
                .clone()
                .expect("transport not connected");
            tx.send(event).await.unwrap();
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn connect(&self, events: mpsc::Sender<TransportEvent>) -> anyhow::Result<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect.load(Ordering::SeqCst) {
                anyhow::bail!("stub connect failure");
            }
            *self.events.lock().unwrap() = Some(events);
            Ok(())
        }

        async fn disconnect(&self) {}

        async fn deliver(&self, chat: &str, action: &OutboundAction) -> anyhow::Result<()> {
            self.delivered
                .lock()
                .unwrap()
                .push((chat.to_string(), action.clone()));
            Ok(())
        }
    }

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(30),
            max_delay: Duration::from_millis(200),
            resume_delay: Duration::from_millis(10),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn send_while_disconnected_never_touches_transport() {
        let transport = StubTransport::new();
        let (manager, _inbound) = SessionManager::new(transport.clone(), fast_policy());

        let result = manager
            .send("34600000000", &OutboundAction::Text { body: "hola".into() })
            .await;

        assert!(matches!(result, Err(GatewayError::NotConnected)));
        assert_eq!(transport.deliver_count(), 0);
    }

    #[tokio::test]
    async fn opened_event_connects_and_clears_qr() {
        let transport = StubTransport::new();
        let (manager, _inbound) = SessionManager::new(transport.clone(), fast_policy());
        manager.connect().await.unwrap();

        transport
            .emit(TransportEvent::QrAvailable("qr-payload".into()))
            .await;
        settle().await;
        assert_eq!(manager.snapshot().qr.as_deref(), Some("qr-payload"));

        transport
            .emit(TransportEvent::Opened {
                user: Some("34911222333".into()),
            })
            .await;
        settle().await;

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.state, SessionState::Connected);
        assert!(snapshot.qr.is_none());
        assert_eq!(snapshot.user.as_deref(), Some("34911222333"));
        assert_eq!(snapshot.status_label(), "connected");
    }

    #[tokio::test]
    async fn send_while_connected_reaches_transport() {
        let transport = StubTransport::new();
        let (manager, _inbound) = SessionManager::new(transport.clone(), fast_policy());
        manager.connect().await.unwrap();
        transport.emit(TransportEvent::Opened { user: None }).await;
        settle().await;

        manager
            .send("34600000000", &OutboundAction::Text { body: "hola".into() })
            .await
            .unwrap();
        assert_eq!(transport.deliver_count(), 1);
    }

    #[tokio::test]
    async fn recoverable_close_schedules_exactly_one_reconnect() {
        let transport = StubTransport::new();
        let (manager, _inbound) = SessionManager::new(transport.clone(), fast_policy());
        manager.connect().await.unwrap();
        transport.emit(TransportEvent::Opened { user: None }).await;
        settle().await;
        assert_eq!(transport.connect_count(), 1);

        transport
            .emit(TransportEvent::Closed {
                reason: "stream error".into(),
                recoverable: true,
            })
            .await;
        settle().await;
        assert_eq!(manager.snapshot().state, SessionState::Disconnected);

        // After the base delay the scheduled (single) reconnect fires.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(transport.connect_count(), 2);
        assert_eq!(manager.snapshot().state, SessionState::Connecting);
    }

    #[tokio::test]
    async fn unrecoverable_close_stops_auto_retry() {
        let transport = StubTransport::new();
        let (manager, _inbound) = SessionManager::new(transport.clone(), fast_policy());
        manager.connect().await.unwrap();
        transport.emit(TransportEvent::Opened { user: None }).await;
        settle().await;

        transport
            .emit(TransportEvent::Closed {
                reason: "logged out".into(),
                recoverable: false,
            })
            .await;
        tokio::time::sleep(Duration::from_millis(120)).await;

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.state, SessionState::Disconnected);
        assert!(snapshot.needs_pairing);
        assert_eq!(snapshot.status_label(), "logged_out");
        // No reconnect was attempted beyond the initial connect.
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn force_reconnect_supersedes_pending_timer() {
        let transport = StubTransport::new();
        let (manager, _inbound) = SessionManager::new(transport.clone(), fast_policy());
        manager.connect().await.unwrap();
        transport.emit(TransportEvent::Opened { user: None }).await;
        settle().await;

        // A close schedules a reconnect; the forced one replaces it.
        transport
            .emit(TransportEvent::Closed {
                reason: "stream error".into(),
                recoverable: true,
            })
            .await;
        settle().await;
        manager.force_reconnect().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Initial connect + exactly one reconnect from the forced path.
        assert_eq!(transport.connect_count(), 2);
    }

    #[tokio::test]
    async fn failed_reconnect_keeps_retrying_with_backoff() {
        let transport = StubTransport::new();
        let (manager, _inbound) = SessionManager::new(transport.clone(), fast_policy());
        manager.connect().await.unwrap();
        transport.emit(TransportEvent::Opened { user: None }).await;
        settle().await;

        transport.fail_connect.store(true, Ordering::SeqCst);
        transport
            .emit(TransportEvent::Closed {
                reason: "stream error".into(),
                recoverable: true,
            })
            .await;

        // base 30ms, then 60ms: two failed attempts land within ~200ms.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(transport.connect_count() >= 3);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            resume_delay: Duration::from_secs(2),
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(5));
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(3), Duration::from_secs(40));
        assert_eq!(policy.delay_for(4), Duration::from_secs(60));
        assert_eq!(policy.delay_for(30), Duration::from_secs(60));
    }
}
