//! A single provider agent connection as seen by the core.
//!
//! Outbound frames go through a bounded queue drained by the transport's
//! writer task; the core never blocks on a slow agent. Each connection owns
//! its own [`ResponseCorrelator`], so waiters are never shared across
//! connections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc;

use pinswarm_protocol::{Frame, PeerId};

use crate::correlator::ResponseCorrelator;
use crate::NetworkError;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of a transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

pub type ConnectionHandle = Arc<Connection>;

pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::Sender<String>,
    correlator: ResponseCorrelator,
    /// Set once by the first accepted `id|` frame.
    peer_id: OnceLock<PeerId>,
}

impl Connection {
    pub fn new(outbound: mpsc::Sender<String>) -> ConnectionHandle {
        Arc::new(Self {
            id: ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
            outbound,
            correlator: ResponseCorrelator::default(),
            peer_id: OnceLock::new(),
        })
    }

    /// Create a connection together with the receiving end of its outbound
    /// queue. The transport (or a test agent) drains the receiver.
    pub fn channel(capacity: usize) -> (ConnectionHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_id(&self) -> Option<&PeerId> {
        self.peer_id.get()
    }

    pub fn correlator(&self) -> &ResponseCorrelator {
        &self.correlator
    }

    /// True once the transport has stopped draining the outbound queue.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Queue a frame for the agent. A full queue counts as a send failure.
    pub fn send(&self, frame: &Frame) -> Result<(), NetworkError> {
        self.outbound
            .try_send(frame.to_string())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    NetworkError::SendFailed(format!("outbound queue of {} is full", self.id))
                }
                mpsc::error::TrySendError::Closed(_) => NetworkError::ConnectionClosed,
            })
    }

    /// Returns false if the connection already carries an identity.
    pub(crate) fn bind_peer(&self, peer_id: PeerId) -> bool {
        self.peer_id.set(peer_id).is_ok()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_id", &self.peer_id.get())
            .field("closed", &self.is_closed())
            .finish()
    }
}
