//! Predicate-based request/response correlation.
//!
//! Most frames carry no request id, so replies are matched structurally.
//! Each connection keeps an ordered queue of waiters; an inbound frame is
//! offered to the waiters in insertion order and the first whose predicate
//! accepts it claims it. When two outstanding requests could both match the
//! same reply shape (for example two pins answered with the legacy
//! `Success:` marker) the older request claims the reply. This follows from
//! the coarse framing of the protocol and is the expected behaviour.
//!
//! A timeout removes the waiter and leaves the connection open; a late reply
//! then finds no waiter and is dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};

use pinswarm_protocol::Frame;

use crate::connection::Connection;
use crate::NetworkError;

type MatchFn = Box<dyn Fn(&Frame) -> bool + Send + Sync>;

struct Waiter {
    id: u64,
    matches: MatchFn,
    reply: oneshot::Sender<Frame>,
}

/// Outstanding requests of one connection.
#[derive(Default)]
pub struct ResponseCorrelator {
    next_id: AtomicU64,
    waiters: Mutex<VecDeque<Waiter>>,
}

impl ResponseCorrelator {
    async fn enqueue(&self, matches: MatchFn) -> (u64, oneshot::Receiver<Frame>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        self.waiters.lock().await.push_back(Waiter { id, matches, reply });
        (id, rx)
    }

    /// Remove a waiter. Returns false if it was already resolved.
    async fn cancel(&self, id: u64) -> bool {
        let mut waiters = self.waiters.lock().await;
        match waiters.iter().position(|w| w.id == id) {
            Some(idx) => {
                waiters.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Offer an inbound frame to the waiters in insertion order.
    ///
    /// Returns the frame back if no live waiter claimed it. Waiters whose
    /// caller has gone away are discarded on the way.
    pub async fn deliver(&self, frame: Frame) -> Option<Frame> {
        let mut waiters = self.waiters.lock().await;
        let mut frame = frame;
        let mut idx = 0;
        while idx < waiters.len() {
            if waiters[idx].reply.is_closed() {
                waiters.remove(idx);
                continue;
            }
            if !(waiters[idx].matches)(&frame) {
                idx += 1;
                continue;
            }
            let Some(waiter) = waiters.remove(idx) else {
                break;
            };
            match waiter.reply.send(frame) {
                Ok(()) => return None,
                Err(returned) => frame = returned,
            }
        }
        Some(frame)
    }

    /// Number of outstanding waiters.
    pub async fn pending(&self) -> usize {
        self.waiters.lock().await.len()
    }
}

/// Send `frame` on `conn` and wait for the first inbound frame accepted by
/// `matches`, up to `timeout`.
///
/// The waiter is registered before the frame is sent, so a fast reply can
/// never overtake it.
pub async fn send_and_wait<F>(
    conn: &Connection,
    frame: Frame,
    matches: F,
    timeout: Duration,
) -> Result<Frame, NetworkError>
where
    F: Fn(&Frame) -> bool + Send + Sync + 'static,
{
    let correlator = conn.correlator();
    let (id, mut rx) = correlator.enqueue(Box::new(matches)).await;

    if let Err(e) = conn.send(&frame) {
        correlator.cancel(id).await;
        return Err(e);
    }

    match tokio::time::timeout(timeout, &mut rx).await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(_)) => Err(NetworkError::ConnectionClosed),
        Err(_) => {
            if correlator.cancel(id).await {
                tracing::debug!(
                    connection = %conn.id(),
                    frame = frame.kind_name(),
                    ?timeout,
                    "Provider response timed out"
                );
                Err(NetworkError::ResponseTimeout(timeout))
            } else {
                // Resolved between the deadline and the cancel.
                rx.try_recv().map_err(|_| NetworkError::ResponseTimeout(timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinswarm_protocol::Cid;

    #[tokio::test]
    async fn test_unmatched_frame_is_returned() {
        let correlator = ResponseCorrelator::default();
        let frame = Frame::Heartbeat("x".into());
        assert_eq!(correlator.deliver(frame.clone()).await, Some(frame));
    }

    #[tokio::test]
    async fn test_dropped_waiter_is_skipped() {
        let correlator = ResponseCorrelator::default();
        let (_, rx_old) = correlator.enqueue(Box::new(|_| true)).await;
        let (_, mut rx_new) = correlator.enqueue(Box::new(|_| true)).await;
        drop(rx_old);

        let frame = Frame::Pin(Cid::new("QmA"));
        assert_eq!(correlator.deliver(frame.clone()).await, None);
        assert_eq!(rx_new.try_recv().unwrap(), frame);
        assert_eq!(correlator.pending().await, 0);
    }
}
