//! Connection lifecycle to one device.
//!
//! A [`Link`] owns at most one live connection (a "session"). Sessions are
//! numbered; whoever removes the current session from the slot (an explicit
//! `disconnect()` or the receive task seeing the peer go away) is the only
//! one allowed to close it and raise `Disconnected`, so racing closers
//! cannot double-close or double-notify.
//!
//! Both halves of a session stay in the slot behind async mutexes. Readers
//! and writers lock them for the duration of one operation, so dropping any
//! `Link` future mid-flight releases what it held.

pub mod notify;
pub mod receive;
pub mod transport;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::logging::{events, short_uuid};
use crate::structures::{DisconnectReason, LinkConfig, LinkError, LinkMetrics, LinkState, LinkStats, TResult};

use notify::{LinkListener, Notifier, SubscriptionId};
use receive::{run_receive, ReceiveExit};
use transport::{connect_tcp, TransportMeta, TransportRx, TransportTx};

const NO_ERROR: &str = "no error";

// Upper bound on waiting for the write half during a local disconnect
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

type SharedRx = Arc<AsyncMutex<Box<dyn TransportRx>>>;
type SharedTx = Arc<AsyncMutex<Box<dyn TransportTx>>>;

struct Session {
    id: u64,
    tx: SharedTx,
    rx: SharedRx,
    cancel: CancellationToken,
    receiving: bool,
}

enum Slot {
    Idle,
    Connecting,
    Live(Session),
}

struct Shared {
    link_id: String,
    config: LinkConfig,
    slot: Mutex<Slot>,
    next_session: AtomicU64,
    notifier: Notifier,
    metrics: LinkMetrics,
    last_error: Mutex<Option<String>>,
}

// Puts a pending connect back to Idle when its future is dropped or fails
struct ConnectAttempt<'a> {
    shared: &'a Shared,
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        let mut slot = self.shared.slot();
        if matches!(*slot, Slot::Connecting) {
            *slot = Slot::Idle;
        }
    }
}

pub struct Link {
    shared: Arc<Shared>,
}

/// Result of a finished continuous receive, with the caller's buffer.
#[derive(Debug)]
pub struct ReceiveOutcome {
    pub exit: TResult<ReceiveExit>,
    pub buffer: Vec<u8>,
}

/// Handle on an armed continuous receive.
pub struct ReceiveHandle {
    task: JoinHandle<ReceiveOutcome>,
    stop: CancellationToken,
}

impl ReceiveHandle {
    /// Ends the receive cycle but keeps the connection up.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Waits for the cycle to end. Faults other than a peer reset come back
    /// here as `Err` in [`ReceiveOutcome::exit`].
    pub async fn join(self) -> ReceiveOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => ReceiveOutcome { exit: Err(LinkError::Closed), buffer: Vec::new() },
        }
    }
}

impl Link {
    pub fn new(config: LinkConfig) -> Self {
        let link_id = short_uuid();
        let metrics = LinkMetrics::new(&link_id);
        Self {
            shared: Arc::new(Shared {
                link_id,
                config,
                slot: Mutex::new(Slot::Idle),
                next_session: AtomicU64::new(0),
                notifier: Notifier::new(),
                metrics,
                last_error: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.link_id
    }

    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    pub fn metrics(&self) -> &LinkMetrics {
        &self.shared.metrics
    }

    pub fn subscribe(&self, listener: Arc<dyn LinkListener>) -> SubscriptionId {
        self.shared.notifier.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.notifier.unsubscribe(id)
    }

    pub fn state(&self) -> LinkState {
        match &*self.shared.slot() {
            Slot::Idle => LinkState::Disconnected,
            Slot::Connecting => LinkState::Connecting,
            Slot::Live(s) if s.receiving => LinkState::Receiving,
            Slot::Live(_) => LinkState::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Opens the connection. On failure nothing is notified and the link
    /// stays disconnected; on success `Connected` fires before returning.
    pub async fn connect(&self) -> TResult<()> {
        let shared = &self.shared;
        {
            let mut slot = shared.slot();
            match *slot {
                Slot::Idle => *slot = Slot::Connecting,
                Slot::Connecting | Slot::Live(_) => return Err(LinkError::AlreadyConnected),
            }
        }
        let attempt = ConnectAttempt { shared };

        let endpoint = shared.config.endpoint;
        match connect_tcp(&shared.config).await {
            Ok((rx, tx)) => {
                let peer = rx.describe();
                let id = shared.install(Box::new(rx), Box::new(tx));
                drop(attempt);
                info!(event = events::LINK_CONNECT, link_id = %shared.link_id, peer = %peer, session = id, msg = "Connected");
                shared.notifier.connected();
                Ok(())
            }
            Err(e) => {
                drop(attempt);
                shared.metrics.connect_failures.inc();
                shared.record_error(&e);
                warn!(event = events::LINK_CONNECT_FAILED, link_id = %shared.link_id, endpoint = %endpoint, error = %e, msg = "Connect failed");
                Err(e)
            }
        }
    }

    /// Closes the connection and raises `Disconnected`. In-flight sends and
    /// reads are interrupted with `Err(Closed)`.
    /// Returns false (and does nothing) when there was no connection.
    pub async fn disconnect(&self) -> bool {
        match self.shared.take_session(None) {
            Some(session) => {
                self.shared.end_session(session, DisconnectReason::Local).await;
                true
            }
            None => {
                debug!(link_id = %self.shared.link_id, msg = "Disconnect without connection");
                false
            }
        }
    }

    /// Writes the whole of `data`. `Err(NotConnected)` is a plain refusal:
    /// the link state is untouched.
    pub async fn send(&self, data: &[u8]) -> TResult<usize> {
        let shared = &self.shared;
        let (tx, cancel) = match &*shared.slot() {
            Slot::Live(s) => (s.tx.clone(), s.cancel.clone()),
            _ => return Err(LinkError::NotConnected),
        };

        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LinkError::Closed),
            r = async { tx.lock().await.send(data).await } => r,
        };
        match res {
            Ok(n) => {
                shared.metrics.bytes_out.inc_by(n as u64);
                debug!(event = events::SEND, link_id = %shared.link_id, bytes = n, msg = "Sent");
                Ok(n)
            }
            Err(e) => {
                shared.record_error(&e);
                warn!(event = events::SEND_ERROR, link_id = %shared.link_id, error = %e, msg = "Send failed");
                Err(e)
            }
        }
    }

    /// One blocking read. Guarded like `send`; `Err(ReceiverBusy)` while
    /// another receive holds the read side. A concurrent `disconnect()`
    /// interrupts the read with `Err(Closed)`.
    pub async fn receive(&self, buf: &mut [u8]) -> TResult<usize> {
        let shared = &self.shared;
        let (mut rx, cancel) = {
            let slot = shared.slot();
            match &*slot {
                Slot::Live(s) => match s.rx.clone().try_lock_owned() {
                    Ok(rx) => (rx, s.cancel.clone()),
                    Err(_) => return Err(LinkError::ReceiverBusy),
                },
                _ => return Err(LinkError::NotConnected),
            }
        };

        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LinkError::Closed),
            r = rx.recv(buf) => r,
        };
        drop(rx);

        match res {
            Ok(n) => {
                shared.metrics.bytes_in.inc_by(n as u64);
                Ok(n)
            }
            Err(e) => {
                shared.record_error(&e);
                Err(e)
            }
        }
    }

    /// Arms a standing receive on its own task, reusing `buffer` for every
    /// read (an empty buffer is grown to `recv_buffer_size`). Each read is
    /// handed to listeners' `on_data` before the next one starts.
    ///
    /// Returns `None` without arming anything when the link is not
    /// connected or a receive already holds the read side.
    pub fn start_continuous_receive(&self, mut buffer: Vec<u8>) -> Option<ReceiveHandle> {
        let shared = &self.shared;
        let (id, rx, stop) = {
            let mut slot = shared.slot();
            match &mut *slot {
                Slot::Live(s) if !s.receiving => {
                    let rx = s.rx.clone().try_lock_owned().ok()?;
                    s.receiving = true;
                    (s.id, rx, s.cancel.child_token())
                }
                Slot::Live(_) => {
                    warn!(link_id = %shared.link_id, msg = "Continuous receive already armed");
                    return None;
                }
                _ => return None,
            }
        };

        if buffer.is_empty() {
            buffer.resize(shared.config.recv_buffer_size, 0);
        }
        info!(event = events::RECEIVE_START, link_id = %shared.link_id, session = id, capacity = buffer.len(), msg = "Continuous receive armed");

        let task = tokio::spawn(shared.clone().receive_task(id, rx, buffer, stop.clone()));
        Some(ReceiveHandle { task, stop })
    }

    /// Description of the most recent failure; never empty.
    pub fn error_string(&self) -> String {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| NO_ERROR.to_string())
    }

    pub fn stats(&self) -> LinkStats {
        let m = &self.shared.metrics;
        LinkStats {
            link_id: self.shared.link_id.clone(),
            endpoint: self.shared.config.endpoint.to_string(),
            state: self.state(),
            bytes_in: m.bytes_in.get(),
            bytes_out: m.bytes_out.get(),
            data_events: m.data_events.get(),
            connects: m.connects.get(),
            connect_failures: m.connect_failures.get(),
            last_error: self.error_string(),
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        // Dropping the session closes the socket; the receive task sees the
        // cancellation and exits on its own.
        if let Some(session) = self.shared.take_session(None) {
            session.cancel.cancel();
            self.shared.metrics.connected.set(0);
            debug!(link_id = %self.shared.link_id, session = session.id, msg = "Link dropped while connected");
        }
    }
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_error(&self, err: &LinkError) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
    }

    // Makes a freshly opened connection the live session
    fn install(&self, rx: Box<dyn TransportRx>, tx: Box<dyn TransportTx>) -> u64 {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        *self.slot() = Slot::Live(Session {
            id,
            tx: Arc::new(AsyncMutex::new(tx)),
            rx: Arc::new(AsyncMutex::new(rx)),
            cancel: CancellationToken::new(),
            receiving: false,
        });
        self.metrics.connects.inc();
        self.metrics.connected.set(1);
        id
    }

    // Removes the live session, optionally only if it is still `id`
    fn take_session(&self, id: Option<u64>) -> Option<Session> {
        let mut slot = self.slot();
        match &*slot {
            Slot::Live(s) if id.is_none_or(|id| id == s.id) => {}
            _ => return None,
        }
        match std::mem::replace(&mut *slot, Slot::Idle) {
            Slot::Live(s) => Some(s),
            _ => None,
        }
    }

    fn finish_receiving(&self, id: u64) {
        if let Slot::Live(s) = &mut *self.slot() {
            if s.id == id {
                s.receiving = false;
            }
        }
    }

    async fn end_session(&self, session: Session, reason: DisconnectReason) {
        // Cancelling first makes any send holding the write half let go
        session.cancel.cancel();
        if reason == DisconnectReason::Local {
            match timeout(SHUTDOWN_GRACE, async { session.tx.lock().await.shutdown().await }).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(link_id = %self.link_id, error = %e, msg = "Shutdown failed"),
                Err(_) => debug!(link_id = %self.link_id, msg = "Write half still busy, closing without shutdown"),
            }
        }
        drop(session);

        self.metrics.connected.set(0);
        self.metrics.disconnects.with_label_values(&[reason.as_str()]).inc();
        info!(event = events::LINK_DISCONNECT, link_id = %self.link_id, reason = %reason, msg = "Disconnected");
        self.notifier.disconnected(reason);
    }

    async fn receive_task(
        self: Arc<Self>,
        id: u64,
        mut rx: OwnedMutexGuard<Box<dyn TransportRx>>,
        mut buffer: Vec<u8>,
        stop: CancellationToken,
    ) -> ReceiveOutcome {
        let exit = run_receive(&mut **rx, &mut buffer, &stop, |data| {
            self.metrics.bytes_in.inc_by(data.len() as u64);
            self.metrics.data_events.inc();
            debug!(event = events::RECEIVE_DATA, link_id = %self.link_id, bytes = data.len(), msg = "Data arrived");
            self.notifier.data(data);
        })
        .await;
        drop(rx);

        let reason = match &exit {
            Ok(ReceiveExit::Cancelled) => None,
            Ok(ReceiveExit::PeerClosed) => {
                info!(event = events::PEER_CLOSED, link_id = %self.link_id, session = id, msg = "Peer closed connection");
                Some(DisconnectReason::PeerClosed)
            }
            Ok(ReceiveExit::PeerReset) => {
                info!(event = events::PEER_RESET, link_id = %self.link_id, session = id, msg = "Connection reset by peer");
                Some(DisconnectReason::PeerReset)
            }
            Err(e) => {
                self.record_error(e);
                error!(event = events::RECEIVE_ERROR, link_id = %self.link_id, session = id, error = %e, msg = "Receive failed");
                Some(DisconnectReason::Fault)
            }
        };

        match reason {
            None => {
                self.finish_receiving(id);
                info!(event = events::RECEIVE_STOP, link_id = %self.link_id, session = id, msg = "Continuous receive stopped");
            }
            Some(reason) => {
                if let Some(session) = self.take_session(Some(id)) {
                    self.end_session(session, reason).await;
                }
            }
        }
        ReceiveOutcome { exit, buffer }
    }
}
