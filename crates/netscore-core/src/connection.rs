//! # Scorer Connection Manager
//!
//! Owns zero or one link to the active scorer's recommendation endpoint.
//!
//! ```text
//! Unbound ──connect(ep)──▶ Binding ──Connected──▶ Connected
//!    ▲                        ▲                       │
//!    │                        └─────Disconnected──────┘
//!    └──────────── disconnect() from Binding or Connected
//! ```
//!
//! Binding is fire-and-forget: [`ServiceBinder::bind`] only issues the
//! request. Confirmation arrives later as a message on the manager's event
//! channel, sent through the [`ConnectionNotifier`] handed to the binder,
//! and is applied by a background worker thread.
//!
//! Every bind attempt gets a session number. Events carrying an older
//! session are stale (the binding they describe has been torn down) and are
//! dropped.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};
use netscore_common::models::EndpointId;

use crate::error::ScoreError;

/// Issues bind/unbind requests against recommendation service endpoints.
pub trait ServiceBinder: Send + Sync {
    /// Request a binding to `endpoint`. Must not block waiting for the
    /// service; report progress through `notifier`.
    fn bind(&self, endpoint: &EndpointId, notifier: ConnectionNotifier) -> anyhow::Result<()>;
    /// Release the binding to `endpoint`.
    fn unbind(&self, endpoint: &EndpointId) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Unbound,
    Binding {
        endpoint: EndpointId,
    },
    Connected {
        endpoint: EndpointId,
    },
}

impl ConnectionState {
    pub fn endpoint(&self) -> Option<&EndpointId> {
        match self {
            ConnectionState::Unbound => None,
            ConnectionState::Binding { endpoint } | ConnectionState::Connected { endpoint } => {
                Some(endpoint)
            }
        }
    }

    pub fn is_bound(&self) -> bool {
        !matches!(self, ConnectionState::Unbound)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Unbound => "unbound",
            ConnectionState::Binding { .. } => "binding",
            ConnectionState::Connected { .. } => "connected",
        }
    }
}

/// Asynchronous notifications from the binder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

enum WorkerMessage {
    Event { session: u64, event: ConnectionEvent },
    Shutdown,
}

/// Handle a [`ServiceBinder`] uses to report on one bind attempt.
#[derive(Clone)]
pub struct ConnectionNotifier {
    session: u64,
    tx: Sender<WorkerMessage>,
}

impl ConnectionNotifier {
    /// The service came up. Returns `false` if the manager is gone.
    pub fn connected(&self) -> bool {
        self.send(ConnectionEvent::Connected)
    }

    /// The service went away; the binding is still wanted.
    pub fn disconnected(&self) -> bool {
        self.send(ConnectionEvent::Disconnected)
    }

    fn send(&self, event: ConnectionEvent) -> bool {
        self.tx
            .send(WorkerMessage::Event {
                session: self.session,
                event,
            })
            .is_ok()
    }
}

/// Result of a [`ConnectionManager::connect`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new bind request was issued.
    BindRequested,
    /// Already binding or connected to the same endpoint.
    AlreadyBound,
}

struct Shared {
    state: ConnectionState,
    session: u64,
}

/// Thread-safe owner of the single scorer connection.
///
/// Dropping the manager unbinds and stops the event worker.
pub struct ConnectionManager {
    binder: Arc<dyn ServiceBinder>,
    shared: Arc<Mutex<Shared>>,
    events_tx: Sender<WorkerMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(binder: Arc<dyn ServiceBinder>) -> Self {
        let (events_tx, events_rx) = unbounded();
        let shared = Arc::new(Mutex::new(Shared {
            state: ConnectionState::Unbound,
            session: 0,
        }));
        let worker_shared = shared.clone();

        let handle = thread::Builder::new()
            .name("netscore-conn".into())
            .spawn(move || connection_worker(events_rx, worker_shared))
            .expect("failed to spawn connection event worker");

        Self {
            binder,
            shared,
            events_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ensure a binding to `endpoint` exists.
    ///
    /// A binding to any other endpoint is torn down first. If the bind
    /// request cannot be issued the state stays `Unbound`; no retry is
    /// scheduled.
    pub fn connect(&self, endpoint: &EndpointId) -> Result<ConnectOutcome, ScoreError> {
        let mut shared = self.lock();

        if let Some(current) = shared.state.endpoint() {
            if current == endpoint {
                return Ok(ConnectOutcome::AlreadyBound);
            }
            tracing::info!(from = %current, to = %endpoint, "switching scorer endpoint");
            self.teardown(&mut shared);
        }

        shared.session += 1;
        let notifier = ConnectionNotifier {
            session: shared.session,
            tx: self.events_tx.clone(),
        };

        match self.binder.bind(endpoint, notifier) {
            Ok(()) => {
                shared.state = ConnectionState::Binding {
                    endpoint: endpoint.clone(),
                };
                tracing::debug!(%endpoint, session = shared.session, "bind requested");
                Ok(ConnectOutcome::BindRequested)
            }
            Err(source) => {
                tracing::warn!(%endpoint, error = %source, "bind request failed");
                Err(ScoreError::BindFailed {
                    endpoint: endpoint.clone(),
                    source,
                })
            }
        }
    }

    /// Drop the current binding, if any. Idempotent.
    ///
    /// Returns `true` if a binding was torn down.
    pub fn disconnect(&self) -> bool {
        let mut shared = self.lock();
        self.teardown(&mut shared)
    }

    fn teardown(&self, shared: &mut Shared) -> bool {
        let Some(endpoint) = shared.state.endpoint().cloned() else {
            return false;
        };
        if let Err(e) = self.binder.unbind(&endpoint) {
            tracing::error!(%endpoint, error = %e, "unbind failed");
        }
        shared.state = ConnectionState::Unbound;
        // Invalidate events still queued for the old binding.
        shared.session += 1;
        tracing::debug!(%endpoint, "scorer connection unbound");
        true
    }

    /// Copy of the current state.
    pub fn state(&self) -> ConnectionState {
        self.lock().state.clone()
    }

    /// Write a one-line description of the connection.
    pub fn dump(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
        let state = self.state();
        match state.endpoint() {
            Some(endpoint) => writeln!(
                out,
                "ScorerConnection: {endpoint}, bound: true, connected: {}",
                state.is_connected()
            ),
            None => writeln!(out, "ScorerConnection: none"),
        }
    }

    /// Unbind and stop the event worker. Idempotent.
    pub fn shutdown(&self) {
        self.disconnect();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = self.events_tx.send(WorkerMessage::Shutdown);
            let _ = handle.join();
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn connection_worker(events_rx: Receiver<WorkerMessage>, shared: Arc<Mutex<Shared>>) {
    while let Ok(message) = events_rx.recv() {
        let (session, event) = match message {
            WorkerMessage::Event { session, event } => (session, event),
            WorkerMessage::Shutdown => break,
        };

        let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
        if session != guard.session {
            tracing::debug!(
                session,
                current = guard.session,
                ?event,
                "dropping stale connection event"
            );
            continue;
        }

        let next = match (&guard.state, event) {
            (ConnectionState::Binding { endpoint }, ConnectionEvent::Connected) => {
                tracing::info!(%endpoint, "scorer service connected");
                ConnectionState::Connected {
                    endpoint: endpoint.clone(),
                }
            }
            (ConnectionState::Connected { endpoint }, ConnectionEvent::Disconnected) => {
                tracing::info!(%endpoint, "scorer service disconnected, awaiting rebind");
                ConnectionState::Binding {
                    endpoint: endpoint.clone(),
                }
            }
            _ => continue,
        };
        guard.state = next;
    }
}
