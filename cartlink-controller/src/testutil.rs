//! In-memory test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cartlink_core::{DeviceState, NetAddress, NetGuid, NetworkId, Packet};

use crate::device::{EventListener, NetworkDevice};
use crate::gateway::GatewayInterface;

/// Scriptable gateway: tests inject inbound packets and inspect what the
/// controller transmitted.
#[derive(Default)]
pub(crate) struct MockGateway {
    started: AtomicBool,
    inbox: Mutex<VecDeque<Packet>>,
    sent: Mutex<Vec<Packet>>,
}

impl MockGateway {
    pub(crate) fn started() -> Self {
        let gw = MockGateway::default();
        gw.started.store(true, Ordering::SeqCst);
        gw
    }

    pub(crate) fn inject(&self, packet: Packet) {
        self.inbox.lock().unwrap().push_back(packet);
    }

    pub(crate) fn sent(&self) -> Vec<Packet> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl GatewayInterface for MockGateway {
    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    async fn start(&self) -> io::Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> io::Result<()> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send_packet(&self, packet: &Packet) -> io::Result<()> {
        self.sent.lock().unwrap().push(packet.clone());
        Ok(())
    }

    async fn receive_packet(&self, _network: NetworkId) -> io::Result<Option<Packet>> {
        Ok(self.inbox.lock().unwrap().pop_front())
    }
}

/// Interior-mutability device with recorded activations and payloads.
pub(crate) struct TestDevice {
    guid: NetGuid,
    address: Mutex<NetAddress>,
    state: Mutex<DeviceState>,
    battery: Mutex<u8>,
    started: AtomicBool,
    control: Mutex<Vec<Vec<u8>>>,
}

impl TestDevice {
    /// Fresh device still carrying the unassigned placeholder address.
    pub(crate) fn registered(guid: &str) -> Arc<TestDevice> {
        Arc::new(TestDevice {
            guid: NetGuid::new(guid),
            address: Mutex::new(NetAddress::CONTROLLER),
            state: Mutex::new(DeviceState::Invalid),
            battery: Mutex::new(0),
            started: AtomicBool::new(false),
            control: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn was_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn control_payloads(&self) -> Vec<Vec<u8>> {
        self.control.lock().unwrap().clone()
    }
}

#[async_trait]
impl NetworkDevice for TestDevice {
    fn guid(&self) -> NetGuid {
        self.guid.clone()
    }

    fn address(&self) -> NetAddress {
        *self.address.lock().unwrap()
    }

    fn set_address(&self, address: NetAddress) {
        *self.address.lock().unwrap() = address;
    }

    fn state(&self) -> DeviceState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: DeviceState) {
        *self.state.lock().unwrap() = state;
    }

    fn last_battery(&self) -> u8 {
        *self.battery.lock().unwrap()
    }

    fn set_last_battery(&self, level: u8) {
        *self.battery.lock().unwrap() = level;
    }

    async fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    async fn handle_control(&self, payload: &[u8]) {
        self.control.lock().unwrap().push(payload.to_vec());
    }
}

/// Listener admitting every GUID.
pub(crate) struct AdmitAll;

impl EventListener for AdmitAll {
    fn can_associate(&self, _guid: &NetGuid) -> bool {
        true
    }

    fn on_device_lost(&self, _device: &Arc<dyn NetworkDevice>) {}
}

/// Admits everything and records which devices were reported lost.
#[derive(Default)]
pub(crate) struct RecordingListener {
    lost: Mutex<Vec<NetGuid>>,
}

impl RecordingListener {
    pub(crate) fn lost(&self) -> Vec<NetGuid> {
        self.lost.lock().unwrap().clone()
    }
}

impl EventListener for RecordingListener {
    fn can_associate(&self, _guid: &NetGuid) -> bool {
        true
    }

    fn on_device_lost(&self, device: &Arc<dyn NetworkDevice>) {
        self.lost.lock().unwrap().push(device.guid());
    }
}
