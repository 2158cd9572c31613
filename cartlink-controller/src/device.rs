//! Device and listener seams.
//!
//! The controller owns addressing, association and delivery; everything a
//! device *does* with a command belongs to the workflow layer behind these
//! traits. Implementations keep their own interior mutability: the
//! controller calls setters from receiver tasks and the controller task
//! concurrently.

use std::sync::Arc;

use async_trait::async_trait;
use cartlink_core::{DeviceState, NetAddress, NetGuid};

/// An addressable remote endpoint (cart controller, aisle/LED controller).
///
/// Created by the application and registered with
/// [`NetworkController::add_device`](crate::NetworkController::add_device);
/// the directory owns the GUID/address indices while the device stays
/// registered.
#[async_trait]
pub trait NetworkDevice: Send + Sync {
    /// Permanent hardware identity. Immutable for the device's lifetime.
    fn guid(&self) -> NetGuid;

    fn address(&self) -> NetAddress;
    fn set_address(&self, address: NetAddress);

    fn state(&self) -> DeviceState;
    fn set_state(&self, state: DeviceState);

    fn last_battery(&self) -> u8;
    fn set_last_battery(&self, level: u8);

    /// Invoked once when association completes and the device reaches
    /// [`DeviceState::Started`].
    async fn start(&self);

    /// Application payload addressed to this device. Semantics belong to
    /// the workflow layer.
    async fn handle_control(&self, payload: &[u8]);
}

/// Observer of association-level events.
///
/// Admission is a composed predicate: a device is admitted when *any*
/// registered listener returns true from `can_associate`.
pub trait EventListener: Send + Sync {
    fn can_associate(&self, guid: &NetGuid) -> bool;

    /// A registered device fell out of association (GUID mismatch on its
    /// address, or a heartbeat from a non-started state).
    fn on_device_lost(&self, device: &Arc<dyn NetworkDevice>);
}
