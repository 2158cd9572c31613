//! Channel arbitration among co-located controllers.
//!
//! Before any device traffic flows, the controller either commits an
//! operator-preferred channel outright or probes every channel: broadcast a
//! check request, collect asynchronous responses for a fixed inter-probe
//! delay, then commit the channel with the fewest co-located controllers
//! (ties broken by lowest measured energy).
//!
//! ASSOC/CONTROL dispatch is gated on the committed flag; NETMGMT is
//! always processed so this controller keeps answering peers' scans even
//! mid-selection.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cartlink_core::{
    ChannelInfo, Command, NetAddress, NetGuid, NetMgmt, NetworkId, Packet, CHANNEL_COUNT,
    GATEWAY_PROBE_GUID, NO_PREFERRED_CHANNEL,
};
use tokio::sync::watch;

use crate::error::ControllerError;
use crate::transport::Transmitter;

pub(crate) struct ChannelSelector {
    network: NetworkId,
    controller_guid: NetGuid,
    probe_delay: Duration,
    transmitter: Arc<Transmitter>,
    scan: Mutex<[ChannelInfo; CHANNEL_COUNT]>,
    committed_tx: watch::Sender<Option<u8>>,
    committed_rx: watch::Receiver<Option<u8>>,
}

impl ChannelSelector {
    pub(crate) fn new(
        network: NetworkId,
        controller_guid: NetGuid,
        probe_delay: Duration,
        transmitter: Arc<Transmitter>,
    ) -> Self {
        let (committed_tx, committed_rx) = watch::channel(None);
        ChannelSelector {
            network,
            controller_guid,
            probe_delay,
            transmitter,
            scan: Mutex::new([ChannelInfo::default(); CHANNEL_COUNT]),
            committed_tx,
            committed_rx,
        }
    }

    /// Whether ASSOC/CONTROL traffic may flow yet.
    pub(crate) fn is_committed(&self) -> bool {
        self.committed_rx.borrow().is_some()
    }

    pub(crate) fn committed_channel(&self) -> Option<u8> {
        *self.committed_rx.borrow()
    }

    /// Validate a preferred-channel configuration value without touching
    /// any state. `NO_PREFERRED_CHANNEL` is always acceptable.
    pub(crate) fn validate_preferred(preferred: u8) -> Result<(), ControllerError> {
        if preferred != NO_PREFERRED_CHANNEL && preferred as usize >= CHANNEL_COUNT {
            return Err(ControllerError::ChannelOutOfRange(preferred, CHANNEL_COUNT));
        }
        Ok(())
    }

    /// Run selection and commit a channel. With an operator preference the
    /// scan is skipped entirely.
    pub(crate) async fn select(&self, preferred: u8) -> Result<u8, ControllerError> {
        Self::validate_preferred(preferred)?;
        if preferred != NO_PREFERRED_CHANNEL {
            log::info!("channel: operator preference {}, skipping scan", preferred);
            self.commit(preferred).await;
            return Ok(preferred);
        }

        for channel in 0..CHANNEL_COUNT as u8 {
            self.scan.lock().unwrap()[channel as usize] = ChannelInfo::default();
            self.transmitter
                .transmit(&Packet::broadcast(
                    Command::NetMgmt(NetMgmt::ChannelCheckRequest { channel }),
                    NetAddress::CONTROLLER,
                    self.network,
                ))
                .await;
            // Responses arrive asynchronously via the dispatcher while we
            // wait out the probe window.
            tokio::time::sleep(self.probe_delay).await;
        }

        let channel = self.pick();
        self.commit(channel).await;
        Ok(channel)
    }

    /// Minimum controller count, ties broken by minimum energy, further
    /// ties by lowest index.
    fn pick(&self) -> u8 {
        let scan = self.scan.lock().unwrap();
        let mut best = 0usize;
        for (index, info) in scan.iter().enumerate().skip(1) {
            let current = &scan[best];
            if (info.controller_count, info.energy) < (current.controller_count, current.energy) {
                best = index;
            }
        }
        log::debug!(
            "channel: scan result {:?}, picked {}",
            scan.iter()
                .map(|i| (i.controller_count, i.energy))
                .collect::<Vec<_>>(),
            best
        );
        best as u8
    }

    async fn commit(&self, channel: u8) {
        self.transmitter
            .transmit(&Packet::broadcast(
                Command::NetMgmt(NetMgmt::ChannelSetup { channel }),
                NetAddress::CONTROLLER,
                self.network,
            ))
            .await;
        self.committed_tx.send_replace(Some(channel));
        log::info!("channel: committed channel {}", channel);
    }

    /// Dispatcher entry point for all NETMGMT traffic.
    pub(crate) async fn handle_netmgmt(&self, src: NetAddress, msg: NetMgmt) {
        match msg {
            NetMgmt::ChannelCheckRequest { channel } => {
                // Answer the peer's scan so it counts us on this channel.
                // Energy is only meaningful from the gateway probe; peers
                // report zero and are counted by GUID instead.
                self.transmitter
                    .transmit(&Packet::broadcast(
                        Command::NetMgmt(NetMgmt::ChannelCheckResponse {
                            channel,
                            guid: self.controller_guid.clone(),
                            energy: 0,
                        }),
                        NetAddress::CONTROLLER,
                        self.network,
                    ))
                    .await;
            }
            NetMgmt::ChannelCheckResponse {
                channel,
                guid,
                energy,
            } => {
                let Some(info) = self
                    .scan
                    .lock()
                    .unwrap()
                    .get_mut(channel as usize)
                    .map(|i| {
                        if guid.as_str() == GATEWAY_PROBE_GUID {
                            i.energy = energy;
                        } else {
                            i.controller_count += 1;
                        }
                        *i
                    })
                else {
                    log::warn!("channel: check response for bad channel {}", channel);
                    return;
                };
                log::trace!(
                    "channel: {} now count {} energy {} after response from {}",
                    channel,
                    info.controller_count,
                    info.energy,
                    guid
                );
            }
            NetMgmt::ChannelSetup { channel } => {
                log::debug!("channel: peer at {} committed channel {}", src, channel);
            }
            NetMgmt::InterfaceTestRequest => {
                self.transmitter
                    .transmit(&Packet::unicast(
                        Command::NetMgmt(NetMgmt::InterfaceTestResponse),
                        NetAddress::CONTROLLER,
                        src,
                        self.network,
                    ))
                    .await;
            }
            NetMgmt::InterfaceTestResponse => {
                log::trace!("channel: interface test response from {}", src);
            }
        }
    }
}
