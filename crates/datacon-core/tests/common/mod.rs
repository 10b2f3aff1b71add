//! Shared test doubles: a scripted radio service, a mutable service-state
//! monitor and a recording connectivity sink.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use datacon_core::{
    ApnSetting, ApnTypes, Cid, ConnectivitySink, DataCallResponse, DataService, DetailedState,
    FailCause, KeepaliveEventStatus, KeepalivePacket, KeepaliveStatus, KeepaliveStatusCode,
    LinkAddress, LinkProperties, NetworkCapabilities, NetworkInfo, RadioTech, RequestReason,
    ResultCode, ServiceMonitor, ServiceState, SetupDataCallRequest,
};

// ===== Radio service double =====

pub struct MockDataService {
    setup_responses: Mutex<VecDeque<(ResultCode, Option<DataCallResponse>)>>,
    pub setup_requests: Mutex<Vec<SetupDataCallRequest>>,
    pub deactivate_calls: Mutex<Vec<(Cid, RequestReason)>>,
    pub keepalive_starts: Mutex<Vec<(Cid, Duration)>>,
    pub keepalive_stops: Mutex<Vec<i32>>,
    setup_delay: Mutex<Duration>,
    next_keepalive_handle: AtomicI32,
}

impl Default for MockDataService {
    fn default() -> Self {
        MockDataService {
            setup_responses: Mutex::new(VecDeque::new()),
            setup_requests: Mutex::new(Vec::new()),
            deactivate_calls: Mutex::new(Vec::new()),
            keepalive_starts: Mutex::new(Vec::new()),
            keepalive_stops: Mutex::new(Vec::new()),
            setup_delay: Mutex::new(Duration::ZERO),
            next_keepalive_handle: AtomicI32::new(100),
        }
    }
}

impl MockDataService {
    pub fn push_setup_response(&self, result: ResultCode, response: Option<DataCallResponse>) {
        self.setup_responses.lock().unwrap().push_back((result, response));
    }

    /// Delay every setup reply, for staleness tests.
    pub fn set_setup_delay(&self, delay: Duration) {
        *self.setup_delay.lock().unwrap() = delay;
    }

    pub fn setup_request_count(&self) -> usize {
        self.setup_requests.lock().unwrap().len()
    }

    pub fn last_setup_request(&self) -> Option<SetupDataCallRequest> {
        self.setup_requests.lock().unwrap().last().cloned()
    }

    pub fn deactivate_count(&self) -> usize {
        self.deactivate_calls.lock().unwrap().len()
    }

    pub fn last_deactivate(&self) -> Option<(Cid, RequestReason)> {
        self.deactivate_calls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl DataService for MockDataService {
    async fn setup_data_call(
        &self,
        request: SetupDataCallRequest,
    ) -> (ResultCode, Option<DataCallResponse>) {
        self.setup_requests.lock().unwrap().push(request);
        let delay = *self.setup_delay.lock().unwrap();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
        self.setup_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((ResultCode::ErrorIllegalState, None))
    }

    async fn deactivate_data_call(&self, cid: Cid, reason: RequestReason) -> ResultCode {
        self.deactivate_calls.lock().unwrap().push((cid, reason));
        ResultCode::Success
    }

    async fn start_natt_keepalive(
        &self,
        cid: Cid,
        _packet: KeepalivePacket,
        interval: Duration,
    ) -> Result<KeepaliveStatus, String> {
        self.keepalive_starts.lock().unwrap().push((cid, interval));
        Ok(KeepaliveStatus {
            handle: self.next_keepalive_handle.fetch_add(1, Ordering::Relaxed),
            code: KeepaliveStatusCode::Active,
        })
    }

    async fn stop_natt_keepalive(&self, handle: i32) -> Result<(), String> {
        self.keepalive_stops.lock().unwrap().push(handle);
        Ok(())
    }
}

// ===== Service monitor double =====

pub struct FakeServiceMonitor {
    state: RwLock<ServiceState>,
    pub concurrent_voice_and_data: AtomicBool,
    pub voice_call_idle: AtomicBool,
    pub data_enabled: AtomicBool,
    pub data_roaming_enabled: AtomicBool,
}

impl FakeServiceMonitor {
    pub fn new(rat: RadioTech) -> Self {
        let state = ServiceState {
            rat,
            ..ServiceState::default()
        };
        FakeServiceMonitor {
            state: RwLock::new(state),
            concurrent_voice_and_data: AtomicBool::new(true),
            voice_call_idle: AtomicBool::new(true),
            data_enabled: AtomicBool::new(true),
            data_roaming_enabled: AtomicBool::new(false),
        }
    }

    pub fn update_state(&self, update: impl FnOnce(&mut ServiceState)) {
        update(&mut self.state.write().unwrap());
    }
}

impl ServiceMonitor for FakeServiceMonitor {
    fn service_state(&self) -> ServiceState {
        self.state.read().unwrap().clone()
    }

    fn is_concurrent_voice_and_data_allowed(&self) -> bool {
        self.concurrent_voice_and_data.load(Ordering::Relaxed)
    }

    fn is_voice_call_idle(&self) -> bool {
        self.voice_call_idle.load(Ordering::Relaxed)
    }

    fn is_data_enabled(&self) -> bool {
        self.data_enabled.load(Ordering::Relaxed)
    }

    fn is_data_roaming_enabled(&self) -> bool {
        self.data_roaming_enabled.load(Ordering::Relaxed)
    }
}

// ===== Connectivity sink double =====

#[derive(Debug, Clone)]
pub enum SinkEvent {
    Lp(String, LinkProperties),
    Caps(String, NetworkCapabilities),
    Info(String, NetworkInfo),
    Score(String, i32),
    Keepalive(String, i32, KeepaliveEventStatus),
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn last_capabilities(&self) -> Option<NetworkCapabilities> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|event| match event {
                SinkEvent::Caps(_, nc) => Some(nc.clone()),
                _ => None,
            })
    }

    pub fn last_link_properties(&self) -> Option<LinkProperties> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|event| match event {
                SinkEvent::Lp(_, lp) => Some(lp.clone()),
                _ => None,
            })
    }

    pub fn scores(&self) -> Vec<i32> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Score(_, score) => Some(*score),
                _ => None,
            })
            .collect()
    }

    pub fn keepalive_events(&self) -> Vec<(i32, KeepaliveEventStatus)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Keepalive(_, slot, status) => Some((*slot, *status)),
                _ => None,
            })
            .collect()
    }

    pub fn last_network_info(&self) -> Option<NetworkInfo> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|event| match event {
                SinkEvent::Info(_, ni) => Some(ni.clone()),
                _ => None,
            })
    }

    pub fn saw_suspended_info(&self) -> bool {
        self.events.lock().unwrap().iter().any(|event| {
            matches!(event, SinkEvent::Info(_, ni) if ni.detailed_state == DetailedState::Suspended)
        })
    }

    pub fn saw_disconnected_info(&self) -> bool {
        self.events.lock().unwrap().iter().any(|event| {
            matches!(event, SinkEvent::Info(_, ni) if ni.detailed_state == DetailedState::Disconnected)
        })
    }
}

impl ConnectivitySink for RecordingSink {
    fn send_link_properties(&self, agent: &str, lp: &LinkProperties) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Lp(agent.to_string(), lp.clone()));
    }

    fn send_network_capabilities(&self, agent: &str, nc: &NetworkCapabilities) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Caps(agent.to_string(), nc.clone()));
    }

    fn send_network_info(&self, agent: &str, ni: &NetworkInfo) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Info(agent.to_string(), ni.clone()));
    }

    fn send_network_score(&self, agent: &str, score: i32) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Score(agent.to_string(), score));
    }

    fn on_socket_keepalive_event(&self, agent: &str, slot: i32, status: KeepaliveEventStatus) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Keepalive(agent.to_string(), slot, status));
    }
}

// ===== Helpers =====

/// Install a fmt subscriber for test output. Honors `RUST_LOG`; repeated
/// calls across tests in one binary are fine.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A successful call setup response with one IPv4 address.
pub fn default_response(cid: Cid) -> DataCallResponse {
    DataCallResponse {
        cause: FailCause::None,
        suggested_retry_time: -1,
        cid,
        interface_name: "rmnet0".to_string(),
        addresses: vec![LinkAddress::new("10.0.0.2".parse().unwrap(), 24)],
        dns_addresses: vec!["8.8.8.8".parse::<IpAddr>().unwrap()],
        pcscf_addresses: Vec::new(),
        gateway_addresses: vec!["10.0.0.1".parse::<IpAddr>().unwrap()],
        mtu: 1500,
        protocol: None,
    }
}

pub fn apn_setting(types: ApnTypes) -> ApnSetting {
    ApnSetting::new("test-carrier", "internet.test", types)
}

pub fn keepalive_packet() -> KeepalivePacket {
    KeepalivePacket {
        source_address: "10.0.0.2".parse().unwrap(),
        source_port: 4500,
        destination_address: "203.0.113.7".parse().unwrap(),
        destination_port: 4500,
        payload: vec![0xff],
    }
}

/// Poll until `predicate` holds, panicking after five seconds.
pub async fn wait_until(what: &str, predicate: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
