//! Read-side snapshot store
//!
//! The event loop owns the live bearers; observers read published snapshots
//! instead of synchronizing with the loop. A snapshot is refreshed after
//! every processed event.

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;

use crate::apn::{ApnContext, ApnSetting};
use crate::bearer::ConnectionState;
use crate::capabilities::NetworkCapabilities;
use crate::link_properties::LinkProperties;
use crate::types::{Cid, DcId, HandoverState, Transport};

/// Published view of one bearer.
#[derive(Debug, Clone)]
pub struct BearerSnapshot {
    pub id: DcId,
    pub name: String,
    pub transport: Transport,
    pub state: ConnectionState,
    pub cid: Cid,
    pub sub_id: i32,
    pub apn_setting: Option<ApnSetting>,
    pub apn_contexts: Vec<ApnContext>,
    pub link_properties: LinkProperties,
    pub network_capabilities: NetworkCapabilities,
    pub pcscf_addresses: Vec<IpAddr>,
    pub handover_state: HandoverState,
    pub score: i32,
}

/// Snapshot store shared between the controller loop and its handles.
#[derive(Default)]
pub struct BearerStore {
    snapshots: DashMap<DcId, BearerSnapshot>,
    active_by_cid: DashMap<Cid, DcId>,
}

impl BearerStore {
    pub fn new() -> Arc<Self> {
        Arc::new(BearerStore::default())
    }

    pub fn publish(&self, snapshot: BearerSnapshot) {
        self.snapshots.insert(snapshot.id, snapshot);
    }

    pub fn get(&self, id: DcId) -> Option<BearerSnapshot> {
        self.snapshots.get(&id).map(|entry| entry.clone())
    }

    pub fn remove(&self, id: DcId) {
        self.snapshots.remove(&id);
    }

    /// Register an active bearer under its modem-assigned cid.
    pub fn insert_active_cid(&self, cid: Cid, id: DcId) {
        self.active_by_cid.insert(cid, id);
    }

    /// Drop the cid registration when it still points at `id`.
    pub fn remove_active_cid(&self, cid: Cid, id: DcId) {
        self.active_by_cid.remove_if(&cid, |_, owner| *owner == id);
    }

    pub fn active_by_cid(&self, cid: Cid) -> Option<DcId> {
        self.active_by_cid.get(&cid).map(|entry| *entry)
    }
}
