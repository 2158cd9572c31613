//! Write-side fan-out over the configured gateway interfaces.

use std::sync::Arc;

use cartlink_core::Packet;

use crate::gateway::GatewayInterface;

/// Fans every transmit out to all configured gateways so a single
/// transport flap does not lose the fleet. Per-gateway send failures are
/// logged and do not stop the remaining gateways from transmitting.
pub(crate) struct Transmitter {
    gateways: Vec<Arc<dyn GatewayInterface>>,
}

impl Transmitter {
    pub(crate) fn new(gateways: Vec<Arc<dyn GatewayInterface>>) -> Self {
        Transmitter { gateways }
    }

    pub(crate) async fn transmit(&self, packet: &Packet) {
        for (index, gateway) in self.gateways.iter().enumerate() {
            if !gateway.is_started() {
                log::trace!("gateway {}: not started, skipping transmit", index);
                continue;
            }
            if let Err(e) = gateway.send_packet(packet).await {
                log::warn!(
                    "gateway {}: send failed for {} packet to {}: {}",
                    index,
                    packet.command.kind(),
                    packet.dst,
                    e
                );
            }
        }
    }
}
