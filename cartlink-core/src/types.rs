//! Addressing and lifecycle types shared by the whole protocol stack.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical radio network identifier.
///
/// Several independent networks can share one warehouse; a controller only
/// processes packets tagged with its own network id or the broadcast
/// sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkId(pub u8);

impl NetworkId {
    pub const BROADCAST: NetworkId = NetworkId(0xFF);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "net:{:02X}", self.0)
    }
}

/// Short controller-assigned device address.
///
/// `0x00` is reserved for the controller/gateway itself and doubles as the
/// "not yet assigned" placeholder on freshly created devices; `0xFF` is the
/// broadcast address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetAddress(pub u8);

impl NetAddress {
    pub const CONTROLLER: NetAddress = NetAddress(0x00);
    pub const BROADCAST: NetAddress = NetAddress(0xFF);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// True while the device still carries the controller placeholder and
    /// needs an address allocated on registration.
    pub fn is_unassigned(&self) -> bool {
        *self == Self::CONTROLLER
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "addr:{:02X}", self.0)
    }
}

/// Permanent hardware identity of a remote device, distinct from its
/// assigned [`NetAddress`]. Fixed for the device's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetGuid(pub String);

impl NetGuid {
    pub fn new(guid: impl Into<String>) -> Self {
        NetGuid(guid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetGuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Association lifecycle of a remote device.
///
/// Forward progress is strictly `Invalid → Setup → AssignSent → Started`;
/// the lost transition back to `Invalid` is reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Invalid,
    Setup,
    AssignSent,
    Started,
}

impl Default for DeviceState {
    fn default() -> Self {
        DeviceState::Invalid
    }
}

impl DeviceState {
    /// Whether `next` is a legal transition out of `self`.
    pub fn can_advance_to(&self, next: DeviceState) -> bool {
        use DeviceState::*;
        match (self, next) {
            // Lost signal is reachable from everywhere.
            (_, Invalid) => true,
            (Invalid, Setup) => true,
            (Setup, AssignSent) => true,
            (AssignSent, Started) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            DeviceState::Invalid => "invalid",
            DeviceState::Setup => "setup",
            DeviceState::AssignSent => "assign-sent",
            DeviceState::Started => "started",
        };
        write!(f, "{}", s)
    }
}

/// Delivery state of an ACK-requested packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckState {
    /// Queued or in flight, waiting for the peer's acknowledgement.
    Pending,
    /// Acknowledged by the peer.
    Succeeded,
    /// Retries exhausted without an acknowledgement.
    NoResponse,
}

/// One channel's scan result during selection.
///
/// Recreated per selection pass; only the controller task and the
/// dispatcher's NETMGMT handler touch it, and only while that channel is
/// being probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Energy estimate reported by the gateway probe. Lower is quieter.
    pub energy: u16,
    /// Number of distinct co-located controllers heard on this channel.
    pub controller_count: u32,
}

impl Default for ChannelInfo {
    fn default() -> Self {
        ChannelInfo {
            energy: u16::MAX,
            controller_count: 0,
        }
    }
}
