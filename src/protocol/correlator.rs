//! # Request/Response Correlator
//!
//! Matches inbound packets carrying a correlation id against requests this
//! side has sent and is still waiting on.
//!
//! A waiter is registered *before* its request is written so a fast reply can
//! never race past it. Each entry is removed exactly once: by the matching
//! reply, by the waiter giving up (timeout, cancellation, send failure), by
//! [`Correlator::cancel_all`] on connection teardown, or by the periodic
//! [`Correlator::sweep_expired`], which only collects entries whose waiter
//! no longer exists.
//!
//! The pending table is sharded (`DashMap`), so unrelated requests never
//! contend on one lock.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{ProtocolError, Result};
use crate::protocol::message::{Packet, PacketType};

struct PendingRequest {
    completion: oneshot::Sender<Packet>,
    expected: Option<PacketType>,
    issued_at: Instant,
    ticket: u64,
}

impl PendingRequest {
    fn accepts(&self, packet_type: PacketType) -> bool {
        accepts(self.expected, packet_type)
    }
}

/// Error responses always answer a request; otherwise the type must match.
fn accepts(expected: Option<PacketType>, packet_type: PacketType) -> bool {
    packet_type == PacketType::ErrorResponse
        || expected.map_or(true, |expected| expected == packet_type)
}

/// How a correlated wait ended, short of caller cancellation.
#[derive(Debug)]
pub enum RequestOutcome {
    Completed(Packet),
    TimedOut,
    ConnectionLost,
}

impl RequestOutcome {
    pub fn into_packet(self) -> Option<Packet> {
        match self {
            RequestOutcome::Completed(packet) => Some(packet),
            RequestOutcome::TimedOut | RequestOutcome::ConnectionLost => None,
        }
    }
}

#[derive(Default)]
pub struct Correlator {
    pending: DashMap<u32, PendingRequest>,
    next_id: AtomicU32,
    next_ticket: AtomicU64,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            next_id: AtomicU32::new(1),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Next correlation id for this side. Never returns `0`.
    pub fn next_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Register a waiter for `id`.
    ///
    /// # Errors
    /// `MissingCorrelationId` for `0`, `DuplicateCorrelationId` if `id` is
    /// already outstanding.
    pub fn register(&self, id: u32, expected: Option<PacketType>) -> Result<PendingGuard<'_>> {
        if id == 0 {
            return Err(ProtocolError::MissingCorrelationId);
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        match self.pending.entry(id) {
            Entry::Occupied(_) => return Err(ProtocolError::DuplicateCorrelationId(id)),
            Entry::Vacant(slot) => {
                slot.insert(PendingRequest {
                    completion: tx,
                    expected,
                    issued_at: Instant::now(),
                    ticket,
                });
            }
        }

        trace!(correlation_id = id, pending = self.pending.len(), "Registered pending request");

        Ok(PendingGuard {
            correlator: self,
            id,
            ticket,
            expected,
            receiver: Some(rx),
        })
    }

    /// Hand `packet` to its waiter if one is pending for its correlation id.
    ///
    /// Returns `None` when the packet was consumed, or the packet itself when
    /// it is unsolicited and belongs to the general inbound path.
    pub fn try_complete(&self, packet: Packet) -> Option<Packet> {
        let Some(id) = packet.correlation_id() else {
            return Some(packet);
        };

        match self.pending.remove(&id) {
            Some((_, pending)) => {
                if !pending.accepts(packet.packet_type()) {
                    debug!(
                        correlation_id = id,
                        expected = ?pending.expected,
                        received = %packet.packet_type(),
                        "Correlated reply has an unexpected type"
                    );
                }
                if pending.completion.send(packet).is_err() {
                    debug!(correlation_id = id, "Waiter went away before its reply arrived");
                }
                None
            }
            None => Some(packet),
        }
    }

    /// Release every waiter; they observe [`RequestOutcome::ConnectionLost`].
    pub fn cancel_all(&self) -> usize {
        let released = self.pending.len();
        self.pending.clear();
        if released > 0 {
            debug!(released, "Released pending requests");
        }
        released
    }

    /// Drop entries older than `max_age` whose waiters are gone.
    ///
    /// An entry whose receiver is still alive is never swept, whatever its
    /// age: its caller bounds the wait with its own timeout.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, pending| {
            !pending.completion.is_closed() || pending.issued_at.elapsed() < max_age
        });
        let removed = before.saturating_sub(self.pending.len());
        if removed > 0 {
            debug!(removed, "Swept stale pending requests");
        }
        removed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: u32) -> bool {
        self.pending.contains_key(&id)
    }

    fn release(&self, id: u32, ticket: u64) {
        self.pending.remove_if(&id, |_, pending| pending.ticket == ticket);
    }
}

/// An outstanding registration. Dropping it removes the entry if it is still
/// the one this guard created.
pub struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: u32,
    ticket: u64,
    expected: Option<PacketType>,
    receiver: Option<oneshot::Receiver<Packet>>,
}

impl PendingGuard<'_> {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Wait for the reply under one combined cancellation: the caller's
    /// token, the timeout and the connection's lifetime token.
    ///
    /// # Errors
    /// `Cancelled` when the caller gave up, `UnexpectedMessage` when the reply
    /// is neither the expected type nor an error response. Timeouts and lost
    /// connections are outcomes, not errors.
    pub async fn wait(
        mut self,
        timeout: Duration,
        caller: &CancellationToken,
        lifetime: &CancellationToken,
    ) -> Result<RequestOutcome> {
        let Some(receiver) = self.receiver.take() else {
            return Ok(RequestOutcome::ConnectionLost);
        };

        let outcome = tokio::select! {
            biased;
            reply = receiver => match reply {
                Ok(packet) if accepts(self.expected, packet.packet_type()) => {
                    Ok(RequestOutcome::Completed(packet))
                }
                Ok(_) => Err(ProtocolError::UnexpectedMessage),
                // Sender dropped without the lifetime token firing.
                Err(_) if lifetime.is_cancelled() => Ok(RequestOutcome::ConnectionLost),
                Err(_) => Ok(RequestOutcome::TimedOut),
            },
            _ = caller.cancelled() => Err(ProtocolError::Cancelled),
            _ = lifetime.cancelled() => Ok(RequestOutcome::ConnectionLost),
            _ = tokio::time::sleep(timeout) => Ok(RequestOutcome::TimedOut),
        };

        if let Ok(RequestOutcome::TimedOut) = &outcome {
            debug!(correlation_id = self.id, timeout_ms = timeout.as_millis() as u64, "Request timed out");
        }
        outcome
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.release(self.id, self.ticket);
    }
}
