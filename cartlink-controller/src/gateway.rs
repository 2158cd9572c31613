//! Transport seam between the controller and its gateway bridges.
//!
//! A gateway is the serial/USB/TCP dongle that puts packets on the radio
//! medium. The controller never opens sockets or serial ports itself; it
//! talks to one or more `GatewayInterface` implementations, fanning writes
//! out to all of them and running one receiver task per instance. Redundant
//! gateways therefore ride out a single transport flap.
//!
//! The interface is deliberately poll-based: `receive_packet` returns
//! immediately with `None` when nothing is pending, and the receiver task
//! owns its own pacing. This keeps implementations trivial for both real
//! serial bridges and in-memory test doubles.

use std::io;

use async_trait::async_trait;
use cartlink_core::{NetworkId, Packet};

#[async_trait]
pub trait GatewayInterface: Send + Sync {
    /// Whether the underlying transport is up and packets can flow.
    fn is_started(&self) -> bool;

    /// Bring the transport up. Idempotent.
    async fn start(&self) -> io::Result<()>;

    /// Take the transport down. Idempotent.
    async fn stop(&self) -> io::Result<()>;

    /// Transmit one packet. Errors are reported to the caller, which logs
    /// and carries on; a failed send on one gateway must not affect others.
    async fn send_packet(&self, packet: &Packet) -> io::Result<()>;

    /// Poll for one inbound packet addressed to `network` (or broadcast).
    /// Returns `None` when nothing is pending.
    async fn receive_packet(&self, network: NetworkId) -> io::Result<Option<Packet>>;
}
