//! Packet model and wire codec.
//!
//! A [`Packet`] is one transmission on the radio medium. The gateway frames
//! packets on the serial/TCP side; within a frame the packet is a bincode
//! encoding of this struct, so both sides of the bridge share one codec.
//!
//! `ack_id` is a rolling nonzero counter: `0` on the wire means "no ACK
//! requested", so senders must never allocate it for a pending packet.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{NetAddress, NetGuid, NetworkId};

#[derive(Error, Debug)]
pub enum WireError {
    #[error("packet too large for gateway frame ({0} bytes)")]
    Oversize(usize),
    #[error("malformed packet: {0}")]
    Malformed(String),
}

/// Largest encoded packet the gateway will frame.
pub const MAX_PACKET_LEN: usize = 512;

/// Network-management sub-commands, always processed regardless of channel
/// commit state so co-located controllers can arbitrate channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetMgmt {
    /// Probe: "who is on channel `channel`, and how noisy is it?"
    ChannelCheckRequest { channel: u8 },
    /// Scan reply. The gateway probe answers with [`crate::GATEWAY_PROBE_GUID`]
    /// and an energy estimate; peer controllers answer with their own GUID.
    ChannelCheckResponse {
        channel: u8,
        guid: NetGuid,
        energy: u16,
    },
    /// Commit the network to `channel`.
    ChannelSetup { channel: u8 },
    /// Link sanity check between controller and gateway.
    InterfaceTestRequest,
    InterfaceTestResponse,
}

/// Association handshake messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Assoc {
    /// Device announces itself by GUID and asks to join.
    Request { guid: NetGuid },
    /// Controller assigns a short address on its network.
    Response {
        address: NetAddress,
        network: NetworkId,
    },
    /// Periodic device heartbeat carrying the battery level.
    Check { guid: NetGuid, battery: u8 },
    /// Controller's verdict on a heartbeat.
    CheckAck { associated: bool },
}

/// Top-level payload taxonomy, the dispatcher's routing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    NetMgmt(NetMgmt),
    Assoc(Assoc),
    /// Opaque application payload for the addressed device. Semantics are
    /// owned by the workflow layer, not by the network controller.
    Control(Vec<u8>),
    /// Delivery acknowledgement for the packet whose `ack_id` matches;
    /// carries an optional reply payload.
    Ack(Vec<u8>),
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::NetMgmt(_) => "netmgmt",
            Command::Assoc(_) => "assoc",
            Command::Control(_) => "control",
            Command::Ack(_) => "ack",
        }
    }
}

/// One wire transmission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub command: Command,
    pub src: NetAddress,
    pub dst: NetAddress,
    pub src_network: NetworkId,
    pub dst_network: NetworkId,
    /// Whether the sender expects an [`Command::Ack`] carrying `ack_id`.
    pub ack_requested: bool,
    /// Nonzero while an ACK is requested or being answered, else 0.
    pub ack_id: u8,
}

impl Packet {
    /// Broadcast packet on the given network, no ACK.
    pub fn broadcast(command: Command, src: NetAddress, network: NetworkId) -> Self {
        Packet {
            command,
            src,
            dst: NetAddress::BROADCAST,
            src_network: network,
            dst_network: NetworkId::BROADCAST,
            ack_requested: false,
            ack_id: 0,
        }
    }

    /// Unicast packet within one network, no ACK.
    pub fn unicast(command: Command, src: NetAddress, dst: NetAddress, network: NetworkId) -> Self {
        Packet {
            command,
            src,
            dst,
            src_network: network,
            dst_network: network,
            ack_requested: false,
            ack_id: 0,
        }
    }

    /// True when either the destination network or address is the broadcast
    /// sentinel. Broadcasts must never request an ACK.
    pub fn is_broadcast(&self) -> bool {
        self.dst_network.is_broadcast() || self.dst.is_broadcast()
    }

    /// Whether a controller on `network` should process this packet.
    pub fn targets_network(&self, network: NetworkId) -> bool {
        self.dst_network == network || self.dst_network.is_broadcast()
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let bytes =
            bincode::serialize(self).map_err(|e| WireError::Malformed(e.to_string()))?;
        if bytes.len() > MAX_PACKET_LEN {
            return Err(WireError::Oversize(bytes.len()));
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() > MAX_PACKET_LEN {
            return Err(WireError::Oversize(bytes.len()));
        }
        bincode::deserialize(bytes).map_err(|e| WireError::Malformed(e.to_string()))
    }
}
