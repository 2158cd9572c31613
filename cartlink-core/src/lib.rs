//! Platform-independent protocol library for Cartlink warehouse radio
//! networks.
//!
//! This crate defines the addressing model, packet layout and wire codec
//! shared by the network controller and by tooling. It contains no I/O and
//! no async code: everything here is pure data and parsing, usable from the
//! tokio controller as well as from host-side simulators.
//!
//! # Layers
//!
//! - [`types`]: network/address/GUID newtypes, the device association state
//!   machine and per-channel scan results.
//! - [`packet`]: the [`Packet`](packet::Packet) wire unit, its command
//!   taxonomy and the bincode codec used across the serial/TCP gateway.

pub mod packet;
pub mod types;

pub use packet::{Assoc, Command, NetMgmt, Packet, WireError};
pub use types::{AckState, ChannelInfo, DeviceState, NetAddress, NetGuid, NetworkId};

/// Number of selectable radio channels.
pub const CHANNEL_COUNT: usize = 16;

/// Preferred-channel sentinel meaning "no operator preference, scan".
pub const NO_PREFERRED_CHANNEL: u8 = 0xFF;

/// GUID the gateway dongle uses when reporting channel energy during a
/// scan. Responses carrying this GUID update the energy estimate; any other
/// responder is counted as a co-located controller.
pub const GATEWAY_PROBE_GUID: &str = "cartlink:gateway-probe";
