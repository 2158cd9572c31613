//! Device association: the REQ/RESP/CHECK/ACK handshake.
//!
//! Devices initiate everything. A REQ announces the GUID and asks to join;
//! admission is decided by the registered listeners, and an admitted,
//! pre-registered device is walked `Setup → AssignSent → Started` with a
//! short settle pause before activation. CHECK is the device-initiated
//! heartbeat; the controller never pings. A CHECK whose GUID does not
//! match the device holding that address is answered NOT_ASSOCIATED — a
//! protocol-safety check against address collisions, not a normal path.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cartlink_core::{Assoc, Command, DeviceState, NetAddress, NetworkId, Packet};

use crate::device::EventListener;
use crate::directory::DeviceDirectory;
use crate::transport::Transmitter;

pub(crate) struct AssociationManager {
    network: NetworkId,
    activation_delay: Duration,
    transmitter: Arc<Transmitter>,
    directory: Arc<DeviceDirectory>,
    listeners: Mutex<Vec<Arc<dyn EventListener>>>,
}

impl AssociationManager {
    pub(crate) fn new(
        network: NetworkId,
        activation_delay: Duration,
        transmitter: Arc<Transmitter>,
        directory: Arc<DeviceDirectory>,
    ) -> Self {
        AssociationManager {
            network,
            activation_delay,
            transmitter,
            directory,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    /// Dispatcher entry point for all ASSOC traffic.
    pub(crate) async fn handle(&self, src: NetAddress, msg: Assoc) {
        match msg {
            Assoc::Request { guid } => {
                // Admission: any listener may say yes.
                let admitted = self
                    .listeners
                    .lock()
                    .unwrap()
                    .iter()
                    .any(|l| l.can_associate(&guid));
                if !admitted {
                    log::debug!("assoc: {} not admitted", guid);
                    return;
                }

                let Some(device) = self.directory.by_guid(&guid) else {
                    log::warn!("assoc: admitted {} but no registered device", guid);
                    return;
                };

                device.set_state(DeviceState::Setup);
                self.transmitter
                    .transmit(&Packet::broadcast(
                        Command::Assoc(Assoc::Response {
                            address: device.address(),
                            network: self.network,
                        }),
                        NetAddress::CONTROLLER,
                        self.network,
                    ))
                    .await;
                device.set_state(DeviceState::AssignSent);

                // Give the remote time to switch to its assigned address
                // before we start commanding it.
                tokio::time::sleep(self.activation_delay).await;

                device.set_state(DeviceState::Started);
                device.start().await;
                log::info!("assoc: {} associated as {}", guid, device.address());
            }

            Assoc::Check { guid, battery } => {
                if let Some(device) = self.directory.by_guid(&guid) {
                    if device.last_battery() != battery {
                        device.set_last_battery(battery);
                        log::trace!("assoc: {} battery now {}", guid, battery);
                    }
                }

                let holder = self.directory.by_address(src);
                let associated = holder
                    .as_ref()
                    .map(|d| d.state() == DeviceState::Started && d.guid() == guid)
                    .unwrap_or(false);

                if !associated {
                    log::warn!(
                        "assoc: CHECK from {} at {} not associated (holder: {})",
                        guid,
                        src,
                        holder.map(|d| d.guid().to_string()).unwrap_or_default()
                    );
                    if let Some(lost) = self.directory.by_guid(&guid) {
                        lost.set_state(DeviceState::Invalid);
                        for listener in self.listeners.lock().unwrap().iter() {
                            listener.on_device_lost(&lost);
                        }
                    }
                }

                self.transmitter
                    .transmit(&Packet::unicast(
                        Command::Assoc(Assoc::CheckAck { associated }),
                        NetAddress::CONTROLLER,
                        src,
                        self.network,
                    ))
                    .await;
            }

            // Controller-to-device messages; seeing one means another
            // controller broadcast on our network. Not ours to act on.
            Assoc::Response { .. } | Assoc::CheckAck { .. } => {
                log::trace!("assoc: ignoring controller-bound message from {}", src);
            }
        }
    }
}
