//! Inbound packet dispatch: one receiver task per gateway interface.
//!
//! Redundant gateways run their receivers concurrently; each loop polls
//! its own interface, classifies the packet by top-level command kind and
//! routes it. Nothing a peer can put on the air terminates a receiver: a
//! malformed or unroutable packet is logged and the loop continues.

use std::sync::Arc;
use std::time::Duration;

use cartlink_core::{Command, NetworkId, Packet};
use tokio_util::sync::CancellationToken;

use crate::association::AssociationManager;
use crate::channel::ChannelSelector;
use crate::delivery::DeliveryQueue;
use crate::directory::DeviceDirectory;
use crate::gateway::GatewayInterface;

/// Poll pacing when the interface has nothing pending.
const IDLE_POLL: Duration = Duration::from_millis(5);

/// Backoff while the interface is down or erroring.
const TRANSPORT_BACKOFF: Duration = Duration::from_millis(1000);

pub(crate) struct Dispatcher {
    network: NetworkId,
    delivery: Arc<DeliveryQueue>,
    association: Arc<AssociationManager>,
    channel: Arc<ChannelSelector>,
    directory: Arc<DeviceDirectory>,
}

impl Dispatcher {
    pub(crate) fn new(
        network: NetworkId,
        delivery: Arc<DeliveryQueue>,
        association: Arc<AssociationManager>,
        channel: Arc<ChannelSelector>,
        directory: Arc<DeviceDirectory>,
    ) -> Self {
        Dispatcher {
            network,
            delivery,
            association,
            channel,
            directory,
        }
    }

    /// Receiver loop for one gateway interface.
    pub(crate) async fn run(
        self: Arc<Self>,
        index: usize,
        gateway: Arc<dyn GatewayInterface>,
        cancel: CancellationToken,
    ) {
        log::debug!("dispatch {}: receiver starting", index);
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if !gateway.is_started() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(TRANSPORT_BACKOFF) => continue,
                }
            }
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                r = gateway.receive_packet(self.network) => r,
            };
            match received {
                Ok(Some(packet)) => self.process(index, packet).await,
                Ok(None) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(IDLE_POLL) => {}
                    }
                }
                Err(e) => {
                    log::warn!("dispatch {}: receive failed: {}", index, e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(TRANSPORT_BACKOFF) => {}
                    }
                }
            }
        }
        log::debug!("dispatch {}: receiver stopped", index);
    }

    /// Classify and route one inbound packet.
    pub(crate) async fn process(&self, index: usize, packet: Packet) {
        if !packet.targets_network(self.network) {
            log::trace!(
                "dispatch {}: dropping {} packet for foreign {}",
                index,
                packet.command.kind(),
                packet.dst_network
            );
            return;
        }

        log::trace!(
            "dispatch {}: {} packet from {} to {}",
            index,
            packet.command.kind(),
            packet.src,
            packet.dst
        );

        match packet.command {
            Command::Ack(payload) => {
                self.delivery.handle_ack(packet.src, packet.ack_id, &payload);
            }
            // NETMGMT flows even before the channel is committed, so this
            // controller keeps answering peers' scans.
            Command::NetMgmt(msg) => {
                self.channel.handle_netmgmt(packet.src, msg).await;
            }
            Command::Assoc(msg) => {
                if !self.channel.is_committed() {
                    log::debug!(
                        "dispatch {}: assoc from {} before channel commit, dropped",
                        index,
                        packet.src
                    );
                    return;
                }
                self.association.handle(packet.src, msg).await;
            }
            Command::Control(payload) => {
                if !self.channel.is_committed() {
                    log::debug!(
                        "dispatch {}: control from {} before channel commit, dropped",
                        index,
                        packet.src
                    );
                    return;
                }
                match self.directory.by_address(packet.src) {
                    Some(device) => device.handle_control(&payload).await,
                    None => {
                        log::warn!(
                            "dispatch {}: control from unknown address {}",
                            index,
                            packet.src
                        );
                    }
                }
            }
        }
    }
}
