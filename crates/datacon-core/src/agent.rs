//! The upstream network agent surface
//!
//! A [`NetworkAgent`] fronts one network towards the connectivity layer. It
//! is owned by exactly one bearer at a time; during handover the destination
//! holds a non-owning reference until it atomically acquires ownership.
//! Pushes from a non-owner are dropped, which is what keeps the upstream
//! layer blind to the transfer.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capabilities::NetworkCapabilities;
use crate::link_properties::LinkProperties;
use crate::radio::{KeepaliveStatus, KeepaliveStatusCode};
use crate::types::{DcId, KeepaliveHandle, RadioTech, Transport};

static AGENT_INSTANCE: AtomicU32 = AtomicU32::new(0);

/// Detailed connection state reported through network info.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum DetailedState {
    Idle,
    Connected,
    Suspended,
    Disconnected,
}

/// The network info block pushed to the connectivity layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub detailed_state: DetailedState,
    pub reason: Option<String>,
    /// The APN name while connected.
    pub extra_info: Option<String>,
    pub subtype: RadioTech,
    pub roaming: bool,
}

impl NetworkInfo {
    pub fn new(subtype: RadioTech, roaming: bool) -> Self {
        NetworkInfo {
            detailed_state: DetailedState::Idle,
            reason: None,
            extra_info: None,
            subtype,
            roaming,
        }
    }

    pub fn set_detailed_state(&mut self, state: DetailedState, reason: Option<String>) {
        self.detailed_state = state;
        self.reason = reason;
    }
}

/// Keepalive event status codes reported upstream.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum KeepaliveEventStatus {
    Success,
    ErrorInvalidNetwork,
    ErrorHardware,
    ErrorNoSuchSlot,
}

/// The connectivity layer's receiving surface.
pub trait ConnectivitySink: Send + Sync {
    fn send_link_properties(&self, agent: &str, lp: &LinkProperties);
    fn send_network_capabilities(&self, agent: &str, nc: &NetworkCapabilities);
    fn send_network_info(&self, agent: &str, ni: &NetworkInfo);
    fn send_network_score(&self, agent: &str, score: i32);
    fn on_socket_keepalive_event(&self, agent: &str, slot: i32, status: KeepaliveEventStatus);
}

/// Slot-to-handle bookkeeping for modem-offloaded keepalives.
#[derive(Default)]
pub struct KeepaliveTracker {
    by_slot: Mutex<HashMap<i32, KeepaliveHandle>>,
}

impl KeepaliveTracker {
    pub fn handle_for_slot(&self, slot: i32) -> Option<KeepaliveHandle> {
        self.by_slot.lock().unwrap().get(&slot).copied()
    }

    fn slot_for_handle(&self, handle: KeepaliveHandle) -> Option<i32> {
        self.by_slot
            .lock()
            .unwrap()
            .iter()
            .find(|(_, h)| **h == handle)
            .map(|(slot, _)| *slot)
    }

    fn record(&self, slot: i32, handle: KeepaliveHandle) {
        self.by_slot.lock().unwrap().insert(slot, handle);
    }

    fn remove(&self, slot: i32) {
        self.by_slot.lock().unwrap().remove(&slot);
    }
}

/// The agent handed to the connectivity layer for one network.
pub struct NetworkAgent {
    name: String,
    sink: Arc<dyn ConnectivitySink>,
    owner: Mutex<Option<(DcId, Transport)>>,
    pub keepalive_tracker: KeepaliveTracker,
}

impl NetworkAgent {
    pub fn new(sink: Arc<dyn ConnectivitySink>, owner: DcId, transport: Transport) -> Arc<Self> {
        let name = format!("NetworkAgent-{}", AGENT_INSTANCE.fetch_add(1, Ordering::Relaxed) + 1);
        info!("{} created, owner={}", name, owner);
        Arc::new(NetworkAgent {
            name,
            sink,
            owner: Mutex::new(Some((owner, transport))),
            keepalive_tracker: KeepaliveTracker::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bearer currently owning this agent, if any.
    pub fn owner(&self) -> Option<DcId> {
        self.owner.lock().unwrap().map(|(id, _)| id)
    }

    /// Transfer ownership to `dc`. Atomic with respect to the event loop;
    /// the previous owner loses the agent in the same step.
    pub fn acquire_ownership(&self, dc: DcId, transport: Transport) {
        let mut owner = self.owner.lock().unwrap();
        info!(
            "{}: ownership {} -> {}",
            self.name,
            owner.map(|(id, _)| id.to_string()).unwrap_or_else(|| "none".to_string()),
            dc
        );
        *owner = Some((dc, transport));
    }

    /// Release ownership. Ignored when `dc` is not the current owner, which
    /// is the normal case after a completed handover.
    pub fn release_ownership(&self, dc: DcId) {
        let mut owner = self.owner.lock().unwrap();
        match *owner {
            Some((current, _)) if current == dc => {
                info!("{}: released by {}", self.name, dc);
                *owner = None;
            }
            _ => {
                debug!("{}: release from non-owner {} ignored", self.name, dc);
            }
        }
    }

    fn is_owner(&self, dc: DcId) -> bool {
        self.owner.lock().unwrap().map(|(id, _)| id) == Some(dc)
    }

    pub fn send_link_properties(&self, from: DcId, lp: &LinkProperties) {
        if !self.is_owner(from) {
            warn!("{}: link properties push from non-owner {} dropped", self.name, from);
            return;
        }
        self.sink.send_link_properties(&self.name, lp);
    }

    pub fn send_network_capabilities(&self, from: DcId, nc: &NetworkCapabilities) {
        if !self.is_owner(from) {
            warn!("{}: capabilities push from non-owner {} dropped", self.name, from);
            return;
        }
        self.sink.send_network_capabilities(&self.name, nc);
    }

    pub fn send_network_info(&self, from: DcId, ni: &NetworkInfo) {
        if !self.is_owner(from) {
            warn!("{}: network info push from non-owner {} dropped", self.name, from);
            return;
        }
        self.sink.send_network_info(&self.name, ni);
    }

    pub fn send_network_score(&self, from: DcId, score: i32) {
        if !self.is_owner(from) {
            warn!("{}: score push from non-owner {} dropped", self.name, from);
            return;
        }
        self.sink.send_network_score(&self.name, score);
    }

    pub fn on_socket_keepalive_event(&self, slot: i32, status: KeepaliveEventStatus) {
        self.sink.on_socket_keepalive_event(&self.name, slot, status);
    }

    /// Record the outcome of a keepalive start request for `slot`.
    pub fn handle_keepalive_started(&self, slot: i32, status: KeepaliveStatus) {
        match status.code {
            KeepaliveStatusCode::Active => {
                self.keepalive_tracker.record(slot, status.handle);
                self.on_socket_keepalive_event(slot, KeepaliveEventStatus::Success);
            }
            KeepaliveStatusCode::Pending => {
                self.keepalive_tracker.record(slot, status.handle);
            }
            KeepaliveStatusCode::Inactive => {
                self.on_socket_keepalive_event(slot, KeepaliveEventStatus::ErrorHardware);
            }
        }
    }

    /// Apply a keepalive status report from the modem.
    pub fn handle_keepalive_status(&self, status: KeepaliveStatus) {
        let Some(slot) = self.keepalive_tracker.slot_for_handle(status.handle) else {
            warn!("{}: keepalive status for unknown handle {}", self.name, status.handle);
            return;
        };
        match status.code {
            KeepaliveStatusCode::Active => {
                self.on_socket_keepalive_event(slot, KeepaliveEventStatus::Success);
            }
            KeepaliveStatusCode::Inactive => {
                self.keepalive_tracker.remove(slot);
                self.on_socket_keepalive_event(slot, KeepaliveEventStatus::Success);
            }
            KeepaliveStatusCode::Pending => {}
        }
    }
}

impl fmt::Debug for NetworkAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkAgent")
            .field("name", &self.name)
            .field("owner", &self.owner())
            .finish()
    }
}
