//! Reliable at-least-once delivery of unicast commands.
//!
//! Every ACK-requested send lands in its destination's bounded FIFO. The
//! sender never transmits: a ~50 ms ticker owns all transmission, keeping
//! exactly one packet per destination in flight, which is what makes
//! per-destination ordering hold on a half-duplex medium.
//!
//! Capacity is enforced with semaphore permits: a full queue suspends the
//! caller of [`DeliveryQueue::send`] until the head of line reaches a
//! terminal state. This bounds memory under an unreachable peer without
//! busy-waiting.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cartlink_core::{AckState, NetAddress, Packet};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::transport::Transmitter;

/// Bookkeeping wrapped around one pending wire packet while the queue owns
/// it. Dropped as soon as the packet reaches a terminal [`AckState`].
#[derive(Debug)]
struct PendingPacket {
    packet: Packet,
    state: AckState,
    sent_at: Option<Instant>,
    send_count: u32,
    ack_payload: Option<Vec<u8>>,
}

struct DestinationQueue {
    /// Free slots; acquired (and forgotten) on enqueue, replenished when a
    /// packet leaves the queue in a terminal state.
    slots: Semaphore,
    pending: Mutex<VecDeque<PendingPacket>>,
}

pub(crate) struct DeliveryQueue {
    transmitter: Arc<Transmitter>,
    ack_timeout: Duration,
    max_retries: u32,
    queue_depth: usize,
    queues: Mutex<HashMap<NetAddress, Arc<DestinationQueue>>>,
    ack_counter: AtomicU8,
}

impl DeliveryQueue {
    pub(crate) fn new(
        transmitter: Arc<Transmitter>,
        ack_timeout: Duration,
        max_retries: u32,
        queue_depth: usize,
    ) -> Self {
        DeliveryQueue {
            transmitter,
            ack_timeout,
            max_retries,
            queue_depth,
            queues: Mutex::new(HashMap::new()),
            ack_counter: AtomicU8::new(0),
        }
    }

    /// Next nonzero rolling ack id. Zero on the wire means "no ACK
    /// requested", so the counter skips it on wraparound.
    fn next_ack_id(&self) -> u8 {
        loop {
            let id = self.ack_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if id != 0 {
                return id;
            }
        }
    }

    fn destination(&self, address: NetAddress) -> Arc<DestinationQueue> {
        let mut queues = self.queues.lock().unwrap();
        queues
            .entry(address)
            .or_insert_with(|| {
                Arc::new(DestinationQueue {
                    slots: Semaphore::new(self.queue_depth),
                    pending: Mutex::new(VecDeque::new()),
                })
            })
            .clone()
    }

    /// Send one packet. Fire-and-forget packets transmit immediately on
    /// every gateway; ACK-requested unicasts are enqueued for the ticker.
    /// Suspends when the destination queue is full.
    pub(crate) async fn send(&self, mut packet: Packet) {
        if packet.ack_requested && packet.is_broadcast() {
            // Invariant: an ACK can only be matched to a single responder.
            log::error!(
                "delivery: dropping ACK-requested broadcast {} packet to {}",
                packet.command.kind(),
                packet.dst
            );
            return;
        }

        if !packet.ack_requested {
            self.transmitter.transmit(&packet).await;
            return;
        }

        packet.ack_id = self.next_ack_id();
        let dst = packet.dst;
        let queue = self.destination(dst);

        // Backpressure: wait for a free slot, then hand the slot's permit
        // to the queued packet. The semaphore is never closed.
        match queue.slots.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return,
        }

        log::trace!(
            "delivery: queued {} packet to {} ack_id {}",
            packet.command.kind(),
            dst,
            packet.ack_id
        );
        queue.pending.lock().unwrap().push_back(PendingPacket {
            packet,
            state: AckState::Pending,
            sent_at: None,
            send_count: 0,
            ack_payload: None,
        });
    }

    /// One ticker pass: peek every destination's head packet and transmit
    /// or expire it as its deadline dictates.
    pub(crate) async fn tick(&self) {
        let queues: Vec<(NetAddress, Arc<DestinationQueue>)> = self
            .queues
            .lock()
            .unwrap()
            .iter()
            .map(|(addr, q)| (*addr, q.clone()))
            .collect();

        let now = Instant::now();
        for (dst, queue) in queues {
            // Decide under the lock, transmit outside it.
            let to_send = {
                let mut pending = queue.pending.lock().unwrap();
                let Some(head) = pending.front_mut() else {
                    continue;
                };
                let due = match head.sent_at {
                    None => true,
                    Some(at) => now.duration_since(at) >= self.ack_timeout,
                };
                if !due {
                    continue;
                }
                if head.send_count >= self.max_retries {
                    head.state = AckState::NoResponse;
                    let expired = pending.pop_front();
                    queue.slots.add_permits(1);
                    log::warn!(
                        "delivery: no response from {} after {} transmissions, dropping ack_id {}",
                        dst,
                        self.max_retries,
                        expired.map(|p| p.packet.ack_id).unwrap_or(0)
                    );
                    continue;
                }
                head.send_count += 1;
                head.sent_at = Some(now);
                if head.send_count > 1 {
                    log::debug!(
                        "delivery: retransmit {} to {} ack_id {} (attempt {})",
                        head.packet.command.kind(),
                        dst,
                        head.packet.ack_id,
                        head.send_count
                    );
                }
                head.packet.clone()
            };
            self.transmitter.transmit(&to_send).await;
        }
    }

    /// Inbound ACK from `src`: resolve the matching pending packet, if
    /// any. An ACK for an already-removed packet is a no-op.
    pub(crate) fn handle_ack(&self, src: NetAddress, ack_id: u8, payload: &[u8]) {
        let queue = match self.queues.lock().unwrap().get(&src) {
            Some(q) => q.clone(),
            None => {
                log::debug!("delivery: stray ACK {} from {} (no queue)", ack_id, src);
                return;
            }
        };

        let mut pending = queue.pending.lock().unwrap();
        let Some(pos) = pending
            .iter()
            .position(|p| p.packet.ack_id == ack_id && p.state == AckState::Pending)
        else {
            log::debug!("delivery: stray ACK {} from {} (no match)", ack_id, src);
            return;
        };

        if let Some(mut resolved) = pending.remove(pos) {
            resolved.state = AckState::Succeeded;
            if !payload.is_empty() {
                resolved.ack_payload = Some(payload.to_vec());
            }
            queue.slots.add_permits(1);
            log::trace!(
                "delivery: ACK {} from {} after {} transmission(s), {} payload byte(s)",
                ack_id,
                src,
                resolved.send_count,
                resolved.ack_payload.as_ref().map(Vec::len).unwrap_or(0)
            );
        }
    }

    /// Retry ticker: owns all transmission of queued packets.
    pub(crate) async fn run_ticker(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("delivery: ticker stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self, dst: NetAddress) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(&dst)
            .map(|q| q.pending.lock().unwrap().len())
            .unwrap_or(0)
    }
}
