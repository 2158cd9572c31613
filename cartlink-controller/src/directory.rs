//! Device directory: GUID ↔ address ↔ device mapping and address
//! allocation.
//!
//! The GUID map is primary; the address index is derived from it, so the
//! "both maps agree" invariant is structural. Addresses are allocated
//! sequentially from 1 and never reused after removal (an 8-bit space
//! outlives any single controller run; see DESIGN.md).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cartlink_core::{NetAddress, NetGuid};

use crate::device::NetworkDevice;
use crate::error::ControllerError;

#[derive(Default)]
struct Indices {
    by_guid: HashMap<NetGuid, Arc<dyn NetworkDevice>>,
    by_address: HashMap<NetAddress, NetGuid>,
    next_address: u8,
}

pub struct DeviceDirectory {
    inner: Mutex<Indices>,
}

impl DeviceDirectory {
    pub fn new() -> Self {
        DeviceDirectory {
            inner: Mutex::new(Indices {
                by_guid: HashMap::new(),
                by_address: HashMap::new(),
                next_address: 1,
            }),
        }
    }

    /// Register a device, allocating the next sequential address if it
    /// still carries the controller placeholder. Re-registering a GUID
    /// keeps its existing address.
    pub fn add_device(&self, device: Arc<dyn NetworkDevice>) -> Result<(), ControllerError> {
        let mut inner = self.inner.lock().unwrap();

        if device.address().is_unassigned() {
            if inner.next_address >= NetAddress::BROADCAST.0 {
                log::error!(
                    "directory: cannot register {}: address space exhausted",
                    device.guid()
                );
                return Err(ControllerError::AddressSpaceExhausted);
            }
            let address = NetAddress(inner.next_address);
            inner.next_address += 1;
            device.set_address(address);
            log::debug!("directory: {} allocated {}", device.guid(), address);
        }

        let guid = device.guid();
        let address = device.address();
        inner.by_address.insert(address, guid.clone());
        inner.by_guid.insert(guid, device);
        Ok(())
    }

    /// Erase both indices for the device. The address is not reclaimed.
    pub fn remove_device(&self, device: &dyn NetworkDevice) {
        let mut inner = self.inner.lock().unwrap();
        let guid = device.guid();
        if inner.by_guid.remove(&guid).is_some() {
            inner.by_address.retain(|_, g| *g != guid);
            log::debug!("directory: removed {}", guid);
        }
    }

    pub fn by_guid(&self, guid: &NetGuid) -> Option<Arc<dyn NetworkDevice>> {
        self.inner.lock().unwrap().by_guid.get(guid).cloned()
    }

    pub fn by_address(&self, address: NetAddress) -> Option<Arc<dyn NetworkDevice>> {
        let inner = self.inner.lock().unwrap();
        let guid = inner.by_address.get(&address)?;
        inner.by_guid.get(guid).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestDevice;
    use cartlink_core::NetAddress;

    #[test]
    fn sequential_allocation_from_one() {
        let dir = DeviceDirectory::new();
        let a = TestDevice::registered("cart-a");
        let b = TestDevice::registered("cart-b");
        dir.add_device(a.clone()).unwrap();
        dir.add_device(b.clone()).unwrap();
        assert_eq!(a.address(), NetAddress(1));
        assert_eq!(b.address(), NetAddress(2));
    }

    #[test]
    fn address_unique_and_not_reused() {
        let dir = DeviceDirectory::new();
        let a = TestDevice::registered("cart-a");
        dir.add_device(a.clone()).unwrap();
        dir.remove_device(&*a);
        assert!(dir.by_address(NetAddress(1)).is_none());

        let b = TestDevice::registered("cart-b");
        dir.add_device(b.clone()).unwrap();
        // Address 1 stays retired.
        assert_eq!(b.address(), NetAddress(2));
    }

    #[test]
    fn reregistering_keeps_address() {
        let dir = DeviceDirectory::new();
        let a = TestDevice::registered("cart-a");
        dir.add_device(a.clone()).unwrap();
        dir.add_device(a.clone()).unwrap();
        assert_eq!(a.address(), NetAddress(1));
        assert!(dir.by_address(NetAddress(1)).is_some());
        assert!(dir.by_address(NetAddress(2)).is_none());
    }

    #[test]
    fn lookups_agree() {
        let dir = DeviceDirectory::new();
        let a = TestDevice::registered("cart-a");
        dir.add_device(a.clone()).unwrap();
        let by_guid = dir.by_guid(&a.guid()).unwrap();
        let by_addr = dir.by_address(a.address()).unwrap();
        assert_eq!(by_guid.guid(), by_addr.guid());
    }
}
