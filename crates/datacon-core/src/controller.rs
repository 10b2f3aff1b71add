//! The shared controller and its per-bearer handles
//!
//! One [`DcController`] owns every bearer of one modem and drains a single
//! FIFO event channel, so all bearer work is cooperatively single-threaded.
//! [`DataConnectionHandle`]s post events from the outside and observe
//! published snapshots without ever touching the loop.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::agent::ConnectivitySink;
use crate::apn::ApnContext;
use crate::bearer::{ConnectionState, DataConnection, DcContext};
use crate::capabilities::NetworkCapabilities;
use crate::config::DataConfig;
use crate::errors::{DataConnectionError, Result};
use crate::events::{
    Completion, ConnectionCompleted, ConnectionEvent, ConnectionParams, DisconnectParams,
    TrackerEvent,
};
use crate::link_properties::LinkProperties;
use crate::radio::{DataService, ServiceMonitor};
use crate::store::{BearerSnapshot, BearerStore};
use crate::types::{
    Cid, DcId, HandoverState, RadioTech, ReleaseType, RequestType, Transport, INVALID_CID,
};

/// Capacity of the controller event channel.
const EVENT_CHANNEL_SIZE: usize = 256;

/// Messages drained by the controller loop.
#[derive(Debug)]
pub enum DcMessage {
    Event(DcId, ConnectionEvent),
    /// Remove a bearer from the controller and drop its published state.
    Dispose(DcId, oneshot::Sender<Result<()>>),
    /// Acknowledged once every previously posted event was processed.
    Flush(oneshot::Sender<()>),
}

/// The per-modem controller owning all bearers.
pub struct DcController {
    connections: HashMap<DcId, DataConnection>,
    store: Arc<BearerStore>,
    rx: mpsc::Receiver<DcMessage>,
    tx: mpsc::Sender<DcMessage>,
    tracker_tx: mpsc::UnboundedSender<TrackerEvent>,
    sink: Arc<dyn ConnectivitySink>,
    config: Arc<DataConfig>,
    next_id: u32,
    instance_number: u32,
}

impl DcController {
    /// Create a controller. The returned receiver carries the broadcast
    /// notifications for the outer tracker.
    pub fn new(
        config: DataConfig,
        sink: Arc<dyn ConnectivitySink>,
    ) -> (Self, mpsc::UnboundedReceiver<TrackerEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (tracker_tx, tracker_rx) = mpsc::unbounded_channel();
        (
            DcController {
                connections: HashMap::new(),
                store: BearerStore::new(),
                rx,
                tx,
                tracker_tx,
                sink,
                config: Arc::new(config),
                next_id: 0,
                instance_number: 0,
            },
            tracker_rx,
        )
    }

    pub fn store(&self) -> Arc<BearerStore> {
        self.store.clone()
    }

    /// Create a bearer on `transport` and return its handle.
    pub fn add_data_connection(
        &mut self,
        transport: Transport,
        data_service: Arc<dyn DataService>,
        monitor: Arc<dyn ServiceMonitor>,
    ) -> DataConnectionHandle {
        self.next_id += 1;
        self.instance_number += 1;
        let id = DcId(self.next_id);
        let mut dc = DataConnection::new(
            id,
            self.instance_number,
            transport,
            data_service,
            monitor,
            self.sink.clone(),
            self.config.clone(),
            self.tx.clone(),
            self.tracker_tx.clone(),
        );
        {
            let mut ctx = DcContext {
                connections: &mut self.connections,
                store: &self.store,
            };
            dc.start(&mut ctx);
        }
        let name = dc.name.clone();
        self.store.publish(dc.snapshot());
        self.connections.insert(id, dc);
        DataConnectionHandle {
            id,
            name,
            transport,
            tx: self.tx.clone(),
            store: self.store.clone(),
        }
    }

    /// Drain events until every sender is gone.
    pub async fn run(mut self) {
        info!("DcController: running with {} bearers", self.connections.len());
        while let Some(message) = self.rx.recv().await {
            match message {
                DcMessage::Event(id, event) => self.dispatch(id, event),
                DcMessage::Dispose(id, ack) => {
                    let _ = ack.send(self.dispose(id));
                }
                DcMessage::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        info!("DcController: stopped");
    }

    /// Drop a bearer and every trace of it in the snapshot store.
    fn dispose(&mut self, id: DcId) -> Result<()> {
        let Some(dc) = self.connections.remove(&id) else {
            return Err(DataConnectionError::ConnectionNotFound(id));
        };
        info!("DcController: disposing {}", dc.name);
        self.store.remove_active_cid(dc.cid, dc.id);
        self.store.remove(id);
        Ok(())
    }

    fn dispatch(&mut self, id: DcId, event: ConnectionEvent) {
        let Some(mut dc) = self.connections.remove(&id) else {
            warn!("DcController: {} dropped for unknown {}", event.name(), id);
            return;
        };
        {
            let mut ctx = DcContext {
                connections: &mut self.connections,
                store: &self.store,
            };
            dc.process_event(event, &mut ctx);
        }
        self.connections.insert(id, dc);

        // Handover can touch a sibling bearer, so refresh every snapshot.
        for dc in self.connections.values() {
            self.store.publish(dc.snapshot());
        }
    }
}

/// Posting and observing surface for one bearer.
#[derive(Clone)]
pub struct DataConnectionHandle {
    id: DcId,
    name: String,
    transport: Transport,
    tx: mpsc::Sender<DcMessage>,
    store: Arc<BearerStore>,
}

impl DataConnectionHandle {
    pub fn id(&self) -> DcId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Post a raw event to this bearer.
    pub async fn send_event(&self, event: ConnectionEvent) -> Result<()> {
        self.tx
            .send(DcMessage::Event(self.id, event))
            .await
            .map_err(|_| DataConnectionError::ControllerClosed)
    }

    /// Remove the bearer from the controller and drop its published
    /// snapshot. Meant for an Inactive bearer; a live call is not
    /// deactivated by disposal.
    pub async fn dispose(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(DcMessage::Dispose(self.id, ack_tx))
            .await
            .map_err(|_| DataConnectionError::ControllerClosed)?;
        ack_rx
            .await
            .map_err(|_| DataConnectionError::ControllerClosed)?
    }

    /// Resolves once every event posted before this call was processed.
    pub async fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(DcMessage::Flush(ack_tx))
            .await
            .map_err(|_| DataConnectionError::ControllerClosed)?;
        ack_rx.await.map_err(|_| DataConnectionError::ControllerClosed)
    }

    // ===== Operations =====

    /// Bring up a connection for the APN context. The returned receiver
    /// resolves with the outcome of this request.
    #[allow(clippy::too_many_arguments)]
    pub async fn bring_up(
        &self,
        apn_context: &ApnContext,
        profile_id: i32,
        rat: RadioTech,
        generation: u32,
        request_type: RequestType,
        sub_id: i32,
        apn_preferred: bool,
    ) -> Result<oneshot::Receiver<ConnectionCompleted>> {
        let (on_completed, receiver) = Completion::new();
        let params = ConnectionParams {
            tag: 0,
            apn_context: apn_context.clone(),
            profile_id,
            rat,
            on_completed,
            generation,
            request_type,
            sub_id,
            apn_preferred,
        };
        self.send_event(ConnectionEvent::Connect(params)).await?;
        Ok(receiver)
    }

    /// Tear down the attachment of one APN context.
    pub async fn tear_down(
        &self,
        apn_context: &ApnContext,
        reason: &str,
    ) -> Result<oneshot::Receiver<()>> {
        let (on_completed, receiver) = Completion::new();
        let params = DisconnectParams {
            tag: 0,
            apn_context: Some(apn_context.clone()),
            reason: reason.to_string(),
            release_type: ReleaseType::Detach,
            on_completed,
        };
        self.send_event(ConnectionEvent::Disconnect(params)).await?;
        Ok(receiver)
    }

    /// Tear down everything on this bearer regardless of reference count.
    pub async fn tear_down_all(
        &self,
        reason: &str,
        release_type: ReleaseType,
    ) -> Result<oneshot::Receiver<()>> {
        let (on_completed, receiver) = Completion::new();
        let params = DisconnectParams {
            tag: 0,
            apn_context: None,
            reason: reason.to_string(),
            release_type,
            on_completed,
        };
        self.send_event(ConnectionEvent::DisconnectAll(params)).await?;
        Ok(receiver)
    }

    /// Request deactivation without waiting for a reply.
    pub async fn tear_down_now(&self) -> Result<()> {
        self.send_event(ConnectionEvent::TearDownNow).await
    }

    /// Force the bearer back to Inactive.
    pub async fn reset(&self) -> Result<()> {
        self.send_event(ConnectionEvent::Reset).await
    }

    /// Release the restricted override when it is no longer needed.
    pub async fn reevaluate_restricted_state(&self) -> Result<()> {
        self.send_event(ConnectionEvent::ReevaluateRestrictedState).await
    }

    /// Recompute derived properties such as the score.
    pub async fn reevaluate_data_connection_properties(&self) -> Result<()> {
        self.send_event(ConnectionEvent::ReevaluateDataConnectionProperties)
            .await
    }

    // ===== Observers =====

    pub fn snapshot(&self) -> Option<BearerSnapshot> {
        self.store.get(self.id)
    }

    fn state(&self) -> Option<ConnectionState> {
        self.snapshot().map(|snapshot| snapshot.state)
    }

    pub fn is_inactive(&self) -> bool {
        self.state() == Some(ConnectionState::Inactive)
    }

    pub fn is_activating(&self) -> bool {
        self.state() == Some(ConnectionState::Activating)
    }

    pub fn is_active(&self) -> bool {
        self.state() == Some(ConnectionState::Active)
    }

    pub fn is_disconnecting(&self) -> bool {
        self.state() == Some(ConnectionState::Disconnecting)
    }

    pub fn link_properties(&self) -> LinkProperties {
        self.snapshot()
            .map(|snapshot| snapshot.link_properties)
            .unwrap_or_default()
    }

    pub fn network_capabilities(&self) -> NetworkCapabilities {
        self.snapshot()
            .map(|snapshot| snapshot.network_capabilities)
            .unwrap_or_default()
    }

    pub fn apn_contexts(&self) -> Vec<ApnContext> {
        self.snapshot()
            .map(|snapshot| snapshot.apn_contexts)
            .unwrap_or_default()
    }

    pub fn cid(&self) -> Cid {
        self.snapshot()
            .map(|snapshot| snapshot.cid)
            .unwrap_or(INVALID_CID)
    }

    pub fn pcscf_addresses(&self) -> Vec<IpAddr> {
        self.snapshot()
            .map(|snapshot| snapshot.pcscf_addresses)
            .unwrap_or_default()
    }

    pub fn score(&self) -> i32 {
        self.snapshot().map(|snapshot| snapshot.score).unwrap_or(0)
    }

    pub fn handover_state(&self) -> HandoverState {
        self.snapshot()
            .map(|snapshot| snapshot.handover_state)
            .unwrap_or(HandoverState::Idle)
    }

    pub fn has_been_transferred(&self) -> bool {
        self.handover_state() == HandoverState::Completed
    }

    pub fn is_being_transferred(&self) -> bool {
        self.handover_state() == HandoverState::BeingTransferred
    }
}
