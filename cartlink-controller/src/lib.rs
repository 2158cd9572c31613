//! Warehouse radio network controller.
//!
//! Operates an embedded device fleet (cart controllers, aisle/LED
//! controllers) over a shared-spectrum radio link bridged through one or
//! more serial/TCP gateways. The controller arbitrates a channel among
//! co-located controllers, runs the device-association handshake and
//! provides ordered, at-least-once delivery of unicast commands over a
//! lossy half-duplex medium.
//!
//! What commands *mean* is not this crate's business: application payloads
//! are opaque bytes routed between the workflow layer and the addressed
//! device. Persistence, websocket bridges and the concrete transports stay
//! outside, behind the [`GatewayInterface`] and [`NetworkDevice`] traits.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cartlink_controller::{ControllerConfig, NetworkController};
//!
//! let controller = Arc::new(NetworkController::new(
//!     ControllerConfig::default(),
//!     vec![serial_gateway, tcp_gateway],
//! ));
//! controller.add_listener(admission_policy);
//! controller.add_device(cart_17)?;
//! controller.start(cartlink_core::NO_PREFERRED_CHANNEL).await?;
//!
//! // ... workflow layer drives the fleet ...
//! controller.send_command(pick_lamp_on, addr, true).await?;
//!
//! controller.stop().await?;
//! ```
//!
//! The public API never fails during normal operation: transport flaps,
//! malformed packets and exhausted retries are absorbed and logged,
//! because one bad packet must never halt the fleet.

mod association;
mod channel;
mod delivery;
mod device;
mod directory;
mod dispatch;
mod error;
mod gateway;
mod transport;

#[cfg(test)]
pub(crate) mod testutil;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cartlink_core::{Command, NetAddress, NetGuid, NetworkId, Packet};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use association::AssociationManager;
use channel::ChannelSelector;
use delivery::DeliveryQueue;
use directory::DeviceDirectory;
use dispatch::Dispatcher;
use transport::Transmitter;

pub use device::{EventListener, NetworkDevice};
pub use error::ControllerError;
pub use gateway::GatewayInterface;

/// Controller tuning knobs. The defaults are the production constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Logical network this controller manages.
    pub network: NetworkId,
    /// Identity used when answering peers' channel scans.
    pub controller_guid: NetGuid,
    /// How long a transmitted packet may wait for its ACK.
    pub ack_timeout: Duration,
    /// Total transmissions before a packet is marked no-response.
    pub max_retries: u32,
    /// Per-destination pending-queue capacity; a full queue suspends the
    /// sender.
    pub queue_depth: usize,
    /// Window to collect responses after each channel probe.
    pub probe_delay: Duration,
    /// Retry ticker period.
    pub tick_period: Duration,
    /// Settle pause between assigning an address and activating a device.
    pub activation_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            network: NetworkId(1),
            controller_guid: NetGuid::new("cartlink:controller"),
            ack_timeout: Duration::from_millis(500),
            max_retries: 3,
            queue_depth: 8,
            probe_delay: Duration::from_millis(250),
            tick_period: Duration::from_millis(50),
            activation_delay: Duration::from_millis(100),
        }
    }
}

/// The radio network controller.
///
/// All mutable state hangs off this instance, so independent controllers
/// coexist in one process (and in tests). Construction wires the
/// components; [`start`](Self::start) spawns the worker tasks and
/// [`stop`](Self::stop) shuts them down cooperatively.
pub struct NetworkController {
    config: ControllerConfig,
    gateways: Vec<Arc<dyn GatewayInterface>>,
    directory: Arc<DeviceDirectory>,
    delivery: Arc<DeliveryQueue>,
    association: Arc<AssociationManager>,
    channel: Arc<ChannelSelector>,
    dispatcher: Arc<Dispatcher>,
    cancel: Mutex<Option<CancellationToken>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NetworkController {
    pub fn new(config: ControllerConfig, gateways: Vec<Arc<dyn GatewayInterface>>) -> Self {
        let transmitter = Arc::new(Transmitter::new(gateways.clone()));
        let directory = Arc::new(DeviceDirectory::new());
        let delivery = Arc::new(DeliveryQueue::new(
            transmitter.clone(),
            config.ack_timeout,
            config.max_retries,
            config.queue_depth,
        ));
        let channel = Arc::new(ChannelSelector::new(
            config.network,
            config.controller_guid.clone(),
            config.probe_delay,
            transmitter.clone(),
        ));
        let association = Arc::new(AssociationManager::new(
            config.network,
            config.activation_delay,
            transmitter,
            directory.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            config.network,
            delivery.clone(),
            association.clone(),
            channel.clone(),
            directory.clone(),
        ));
        NetworkController {
            config,
            gateways,
            directory,
            delivery,
            association,
            channel,
            dispatcher,
            cancel: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Launch the controller: start the gateways, spawn one receiver per
    /// gateway and the retry ticker, wait for a transport to come up, then
    /// run channel selection.
    ///
    /// An out-of-range `preferred_channel` is rejected here, before any
    /// state changes. `cartlink_core::NO_PREFERRED_CHANNEL` requests a
    /// scan.
    pub async fn start(&self, preferred_channel: u8) -> Result<(), ControllerError> {
        ChannelSelector::validate_preferred(preferred_channel)?;

        {
            let mut cancel = self.cancel.lock().unwrap();
            if cancel.is_some() {
                log::warn!("controller: start() while already running");
                return Ok(());
            }
            *cancel = Some(CancellationToken::new());
        }
        let token = self.cancel.lock().unwrap().as_ref().unwrap().clone();
        log::info!(
            "controller: starting on {} with {} gateway(s)",
            self.config.network,
            self.gateways.len()
        );

        for (index, gateway) in self.gateways.iter().enumerate() {
            if let Err(e) = gateway.start().await {
                log::warn!("controller: gateway {} failed to start: {}", index, e);
            }
        }

        let mut tasks = Vec::new();
        for (index, gateway) in self.gateways.iter().enumerate() {
            tasks.push(tokio::spawn(self.dispatcher.clone().run(
                index,
                gateway.clone(),
                token.clone(),
            )));
        }
        tasks.push(tokio::spawn(self.delivery.clone().run_ticker(
            self.config.tick_period,
            token.clone(),
        )));

        // Controller task: wait for a transport, select a channel, done.
        // The receivers and the ticker keep running.
        let gateways = self.gateways.clone();
        let channel = self.channel.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                if token.is_cancelled() {
                    return;
                }
                if gateways.iter().any(|g| g.is_started()) {
                    break;
                }
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                }
            }
            // Range was validated synchronously in start().
            if let Err(e) = channel.select(preferred_channel).await {
                log::error!("controller: channel selection failed: {}", e);
            }
        }));

        self.tasks.lock().unwrap().extend(tasks);
        Ok(())
    }

    /// Cooperative shutdown: cancel the worker tasks, wait for them to
    /// observe it, then stop the gateways.
    pub async fn stop(&self) -> Result<(), ControllerError> {
        let Some(token) = self.cancel.lock().unwrap().take() else {
            return Ok(());
        };
        log::info!("controller: stopping");
        token.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                log::warn!("controller: worker task panicked: {}", e);
            }
        }

        for (index, gateway) in self.gateways.iter().enumerate() {
            if let Err(e) = gateway.stop().await {
                log::warn!("controller: gateway {} failed to stop: {}", index, e);
            }
        }
        Ok(())
    }

    /// Send one command to `address`.
    ///
    /// Without `ack_requested` the packet is transmitted immediately on
    /// every gateway (broadcast addresses allowed). With it, the packet
    /// joins the destination's bounded FIFO and is delivered at least once
    /// in order; the call suspends while that queue is full. Delivery
    /// failure after retries is logged, not reported here.
    ///
    /// Fails only when the controller is not running: without the ticker,
    /// an enqueued packet would never transmit.
    pub async fn send_command(
        &self,
        command: Command,
        address: NetAddress,
        ack_requested: bool,
    ) -> Result<(), ControllerError> {
        if self.cancel.lock().unwrap().is_none() {
            return Err(ControllerError::Shutdown);
        }
        let mut packet = if address.is_broadcast() {
            Packet::broadcast(command, NetAddress::CONTROLLER, self.config.network)
        } else {
            Packet::unicast(
                command,
                NetAddress::CONTROLLER,
                address,
                self.config.network,
            )
        };
        packet.ack_requested = ack_requested;
        self.delivery.send(packet).await;
        Ok(())
    }

    /// Register a device, allocating its address on first registration.
    pub fn add_device(&self, device: Arc<dyn NetworkDevice>) -> Result<(), ControllerError> {
        self.directory.add_device(device)
    }

    /// Remove a device from both directory indices. Its address is
    /// retired, not recycled.
    pub fn remove_device(&self, device: &dyn NetworkDevice) {
        self.directory.remove_device(device)
    }

    pub fn device(&self, guid: &NetGuid) -> Option<Arc<dyn NetworkDevice>> {
        self.directory.by_guid(guid)
    }

    /// Register an association listener. Admission is granted when any
    /// listener accepts the GUID.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.association.add_listener(listener);
    }

    /// The committed radio channel, once selection has run.
    pub fn committed_channel(&self) -> Option<u8> {
        self.channel.committed_channel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{AdmitAll, MockGateway, TestDevice};
    use cartlink_core::{Assoc, DeviceState, NO_PREFERRED_CHANNEL};

    fn controller_with(gateways: Vec<Arc<MockGateway>>) -> NetworkController {
        let config = ControllerConfig {
            probe_delay: Duration::from_millis(20),
            activation_delay: Duration::from_millis(10),
            ..ControllerConfig::default()
        };
        NetworkController::new(
            config,
            gateways
                .into_iter()
                .map(|g| g as Arc<dyn GatewayInterface>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn start_rejects_out_of_range_channel_without_state_change() {
        let gateway = Arc::new(MockGateway::default());
        let controller = controller_with(vec![gateway.clone()]);
        let err = controller.start(42).await.unwrap_err();
        assert!(matches!(err, ControllerError::ChannelOutOfRange(42, _)));
        // Nothing launched, nothing transmitted, gateways untouched.
        assert!(!gateway.is_started());
        assert!(controller.tasks.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn preferred_channel_commits_without_probes() {
        let gateway = Arc::new(MockGateway::default());
        let controller = controller_with(vec![gateway.clone()]);
        controller.start(5).await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(controller.committed_channel(), Some(5));
        assert_eq!(gateway.sent().len(), 1);
        controller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn full_association_over_the_wire() {
        let gateway = Arc::new(MockGateway::default());
        let controller = controller_with(vec![gateway.clone()]);
        controller.add_listener(Arc::new(AdmitAll));
        let device = TestDevice::registered("cart-g1");
        controller.add_device(device.clone()).unwrap();

        controller.start(NO_PREFERRED_CHANNEL).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(controller.committed_channel().is_some());

        gateway.inject(Packet::broadcast(
            Command::Assoc(Assoc::Request {
                guid: NetGuid::new("cart-g1"),
            }),
            NetAddress::CONTROLLER,
            NetworkId(1),
        ));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(device.state(), DeviceState::Started);
        assert!(device.was_started());
        controller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn redundant_gateways_both_receive_fanout() {
        let g1 = Arc::new(MockGateway::default());
        let g2 = Arc::new(MockGateway::default());
        let controller = controller_with(vec![g1.clone(), g2.clone()]);
        controller.start(5).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        controller
            .send_command(Command::Control(vec![1]), NetAddress::BROADCAST, false)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Channel setup plus the broadcast, on both gateways.
        assert_eq!(g1.sent().len(), 2);
        assert_eq!(g2.sent().len(), 2);
        controller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_send_after_stop_fails() {
        let gateway = Arc::new(MockGateway::default());
        let controller = controller_with(vec![gateway.clone()]);
        controller.start(5).await.unwrap();
        controller.stop().await.unwrap();
        controller.stop().await.unwrap();
        assert!(!gateway.is_started());

        let err = controller
            .send_command(Command::Control(vec![1]), NetAddress(3), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Shutdown));
    }
}
