//! Notification hub for connected clients.
//!
//! Tracks connections and session subscriptions and fans router output out
//! to them. General-channel outbounds go to every connection; chat outbounds
//! go to connections subscribed to the session.
//!
//! Each connection has an unbounded queue so dispatch never blocks the
//! router. A queued-frame counter tells slow consumers apart: droppable
//! outbounds (deltas) are discarded for them, everything else is queued so
//! tool markers and terminal notifications are never lost and order is kept.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::config::HubConfig;
use crate::router::Outbound;

/// Identifier of a registered connection.
pub type ConnectionId = u64;

struct Connection {
    tx: mpsc::UnboundedSender<Outbound>,
    queued: Arc<AtomicUsize>,
    dropped: AtomicU64,
}

/// Receiving end of a connection.
pub struct ConnectionReceiver {
    id: ConnectionId,
    rx: mpsc::UnboundedReceiver<Outbound>,
    queued: Arc<AtomicUsize>,
}

impl ConnectionReceiver {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Wait for the next outbound.
    pub async fn recv(&mut self) -> Option<Outbound> {
        let frame = self.rx.recv().await;
        if frame.is_some() {
            self.queued.fetch_sub(1, Ordering::AcqRel);
        }
        frame
    }

    /// Take the next outbound if one is queued.
    pub fn try_recv(&mut self) -> Option<Outbound> {
        let frame = self.rx.try_recv().ok();
        if frame.is_some() {
            self.queued.fetch_sub(1, Ordering::AcqRel);
        }
        frame
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<Outbound> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Frames queued and not yet received.
    pub fn pending(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }
}

/// Result of dispatching one outbound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Hub managing client connections and session subscriptions.
pub struct ChatHub {
    slow_consumer_threshold: usize,
    next_id: AtomicU64,

    /// Connection ID -> sender state
    connections: DashMap<ConnectionId, Connection>,

    /// Session key -> subscribed connection IDs
    session_subscribers: DashMap<String, HashSet<ConnectionId>>,
}

impl ChatHub {
    pub fn new(config: &HubConfig) -> Self {
        Self {
            slow_consumer_threshold: config.slow_consumer_threshold.max(1),
            next_id: AtomicU64::new(1),
            connections: DashMap::new(),
            session_subscribers: DashMap::new(),
        }
    }

    /// Register a new connection.
    pub fn register_connection(&self) -> ConnectionReceiver {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        self.connections.insert(
            id,
            Connection {
                tx,
                queued: queued.clone(),
                dropped: AtomicU64::new(0),
            },
        );
        info!("Registered connection {}", id);
        ConnectionReceiver { id, rx, queued }
    }

    /// Unregister a connection and all of its subscriptions.
    pub fn unregister_connection(&self, id: ConnectionId) {
        if self.connections.remove(&id).is_some() {
            info!("Unregistered connection {}", id);
        }
        self.session_subscribers.retain(|_, subscribers| {
            subscribers.remove(&id);
            !subscribers.is_empty()
        });
    }

    /// Subscribe a connection to a session's chat notifications.
    pub fn subscribe_session(&self, id: ConnectionId, session_key: &str) {
        self.session_subscribers
            .entry(session_key.to_string())
            .or_default()
            .insert(id);
        debug!("Connection {} subscribed to session {}", id, session_key);
    }

    /// Unsubscribe a connection from a session.
    pub fn unsubscribe_session(&self, id: ConnectionId, session_key: &str) {
        if let Some(mut subscribers) = self.session_subscribers.get_mut(session_key) {
            subscribers.remove(&id);
        }

        // Clean up empty entries
        self.session_subscribers
            .remove_if(session_key, |_, subscribers| subscribers.is_empty());
    }

    /// Connections subscribed to a session.
    pub fn session_subscribers(&self, session_key: &str) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .session_subscribers
            .get(session_key)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Deliver one outbound to every connection that should see it.
    pub fn dispatch(&self, outbound: &Outbound) -> DispatchReport {
        let targets: Vec<ConnectionId> = if outbound.is_general() {
            self.connections.iter().map(|entry| *entry.key()).collect()
        } else {
            match outbound.session_key() {
                Some(session_key) => self.session_subscribers(session_key),
                None => Vec::new(),
            }
        };

        let mut report = DispatchReport::default();
        let mut closed = Vec::new();
        for id in targets {
            let Some(conn) = self.connections.get(&id) else {
                continue;
            };

            if outbound.is_droppable()
                && conn.queued.load(Ordering::Acquire) >= self.slow_consumer_threshold
            {
                conn.dropped.fetch_add(1, Ordering::Relaxed);
                report.dropped += 1;
                debug!("Dropped delta for slow connection {}", id);
                continue;
            }

            conn.queued.fetch_add(1, Ordering::AcqRel);
            if conn.tx.send(outbound.clone()).is_err() {
                conn.queued.fetch_sub(1, Ordering::AcqRel);
                warn!("Failed to send to connection {}, receiver closed", id);
                closed.push(id);
            } else {
                report.delivered += 1;
            }
        }

        for id in closed {
            self.unregister_connection(id);
        }
        report
    }

    /// Deliver a batch of outbounds in order.
    pub fn dispatch_all<'a>(&self, outbounds: impl IntoIterator<Item = &'a Outbound>) {
        for outbound in outbounds {
            self.dispatch(outbound);
        }
    }

    /// Deltas dropped so far for a connection.
    pub fn dropped_count(&self, id: ConnectionId) -> u64 {
        self.connections
            .get(&id)
            .map(|c| c.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for ChatHub {
    fn default() -> Self {
        Self::new(&HubConfig::default())
    }
}
