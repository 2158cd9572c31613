//! Shared harness for the end-to-end controller tests: an in-memory
//! gateway the tests script, plus a minimal device implementation.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cartlink_core::{DeviceState, NetAddress, NetGuid, NetworkId, Packet};
use cartlink_controller::{EventListener, GatewayInterface, NetworkDevice};

/// In-memory gateway: tests inject inbound packets and inspect the
/// controller's transmissions.
#[derive(Default)]
pub struct SimGateway {
    started: AtomicBool,
    inbox: Mutex<VecDeque<Packet>>,
    sent: Mutex<Vec<Packet>>,
}

impl SimGateway {
    pub fn new() -> Arc<SimGateway> {
        Arc::new(SimGateway::default())
    }

    pub fn inject(&self, packet: Packet) {
        self.inbox.lock().unwrap().push_back(packet);
    }

    pub fn sent(&self) -> Vec<Packet> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl GatewayInterface for SimGateway {
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

pub struct SimDevice {
    guid: NetGuid,
    address: Mutex<NetAddress>,
    state: Mutex<DeviceState>,
    battery: Mutex<u8>,
    started: AtomicBool,
    control: Mutex<Vec<Vec<u8>>>,
}

impl SimDevice {
    pub fn new(guid: &str) -> Arc<SimDevice> {
        Arc::new(SimDevice {
            guid: NetGuid::new(guid),
            address: Mutex::new(NetAddress::CONTROLLER),
            state: Mutex::new(DeviceState::Invalid),
            battery: Mutex::new(0),
            started: AtomicBool::new(false),
            control: Mutex::new(Vec::new()),
        })
    }

    pub fn was_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn control_payloads(&self) -> Vec<Vec<u8>> {
        self.control.lock().unwrap().clone()
    }
}

#[async_trait]
impl NetworkDevice for SimDevice {
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

/// Admission policy accepting every GUID.
pub struct AdmitAll;

impl EventListener for AdmitAll {
    fn can_associate(&self, _guid: &NetGuid) -> bool {
        true
    }

    fn on_device_lost(&self, _device: &Arc<dyn NetworkDevice>) {}
}

/// Route controller logs to the test harness when `RUST_LOG` is set.
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `predicate` until it holds or `deadline` of simulated time passes.
pub async fn wait_for<F: Fn() -> bool>(deadline: Duration, predicate: F) -> bool {
    let step = Duration::from_millis(10);
    let mut elapsed = Duration::ZERO;
    while elapsed < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(step).await;
        elapsed += step;
    }
    predicate()
}
