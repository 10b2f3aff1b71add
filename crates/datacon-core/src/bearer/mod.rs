//! The per-session data connection record
//!
//! One [`DataConnection`] represents a single packet-data bearer on one
//! transport. All instances of one controller run on the same event loop,
//! so nothing in here needs locking; async radio work is dispatched to
//! spawned tasks whose completions come back as tagged events.

mod handlers;
mod states;

pub use states::ConnectionState;

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::agent::{ConnectivitySink, DetailedState, NetworkAgent, NetworkInfo};
use crate::apn::{ApnContextId, ApnSetting};
use crate::capabilities::{synthesize_capabilities, CapabilityInputs, NetCapability, NetworkCapabilities};
use crate::config::DataConfig;
use crate::controller::DcMessage;
use crate::events::{
    ConnectionCompleted, ConnectionEvent, ConnectionParams, DisconnectParams, TrackerEvent,
};
use crate::link_properties::{set_link_properties, LinkProperties};
use crate::radio::{
    DataCallResponse, DataProfile, DataService, RequestReason, ServiceMonitor,
    SetupDataCallRequest,
};
use crate::store::{BearerSnapshot, BearerStore};
use crate::tcp_buffers::tcp_buffer_sizes_for;
use crate::types::{
    decode_suggested_retry, ApnTypes, Cid, DataRegState, DcId, FailCause, HandoverState,
    NrFrequencyRange, NrState, RadioTech, ReleaseType, RequestType, SetupResult, Transport,
    INVALID_CID, INVALID_SUBSCRIPTION_ID, REASON_PDP_RESET, REASON_RADIO_TURNED_OFF,
};

/// The bearer providing the default Internet connection gets a higher score
/// so temporary connections cannot displace it upstream.
pub const DEFAULT_INTERNET_CONNECTION_SCORE: i32 = 50;
pub const OTHER_CONNECTION_SCORE: i32 = 45;

/// Cross-bearer access during one dispatched event. The bearer being
/// dispatched is removed from the map, so sibling lookups never alias it.
pub(crate) struct DcContext<'a> {
    pub connections: &'a mut HashMap<DcId, DataConnection>,
    pub store: &'a BearerStore,
}

impl DcContext<'_> {
    pub fn get_mut(&mut self, id: DcId) -> Option<&mut DataConnection> {
        self.connections.get_mut(&id)
    }

    /// The active bearer on `transport` whose profile covers `apn_type`.
    pub fn find_active_by_apn_type(
        &mut self,
        transport: Transport,
        apn_type: ApnTypes,
    ) -> Option<&mut DataConnection> {
        self.connections.values_mut().find(|dc| {
            dc.transport == transport
                && dc.state == ConnectionState::Active
                && dc
                    .apn_setting
                    .as_ref()
                    .map(|apn| apn.can_handle_type(apn_type))
                    .unwrap_or(false)
        })
    }
}

/// Internal broadcast kinds for [`DataConnection::notify_all_with_event`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum NotifyKind {
    SetupComplete,
    SetupError,
    DisconnectDone,
}

/// One data connection (bearer).
pub(crate) struct DataConnection {
    pub id: DcId,
    pub name: String,
    pub transport: Transport,

    data_service: Arc<dyn DataService>,
    monitor: Arc<dyn ServiceMonitor>,
    sink: Arc<dyn ConnectivitySink>,
    config: Arc<DataConfig>,
    events_tx: mpsc::Sender<DcMessage>,
    tracker_tx: mpsc::UnboundedSender<TrackerEvent>,

    pub state: ConnectionState,
    /// Bumped on every init and Inactive entry; stale replies carry an old
    /// value and are dropped.
    pub tag: u32,
    pub cid: Cid,
    pub sub_id: i32,
    pub rat: RadioTech,
    data_reg_state: DataRegState,

    pub apn_setting: Option<ApnSetting>,
    pub connection_params: Option<ConnectionParams>,
    pub disconnect_params: Option<DisconnectParams>,
    fail_cause: FailCause,
    pub consumers: HashMap<ApnContextId, ConnectionParams>,

    pub link_properties: LinkProperties,
    pcscf_addresses: Vec<IpAddr>,
    network_info: NetworkInfo,
    pub network_agent: Option<Arc<NetworkAgent>>,
    pub handover_source_agent: Option<Arc<NetworkAgent>>,
    pub handover_state: HandoverState,
    pub score: i32,

    subscription_override: u32,
    unmetered_override: bool,
    restricted_override: bool,
    unmetered_use_only: bool,
    disabled_apn_types: ApnTypes,

    create_time: Option<SystemTime>,
    last_fail_time: Option<SystemTime>,
    last_fail_cause: FailCause,

    deferred: VecDeque<ConnectionEvent>,
}

impl DataConnection {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: DcId,
        instance: u32,
        transport: Transport,
        data_service: Arc<dyn DataService>,
        monitor: Arc<dyn ServiceMonitor>,
        sink: Arc<dyn ConnectivitySink>,
        config: Arc<DataConfig>,
        events_tx: mpsc::Sender<DcMessage>,
        tracker_tx: mpsc::UnboundedSender<TrackerEvent>,
    ) -> Self {
        let name = format!("DC-{}-{}", transport.tag(), instance);
        let ss = monitor.service_state();
        let network_info = NetworkInfo::new(ss.rat, ss.data_roaming);
        let dc = DataConnection {
            id,
            name,
            transport,
            data_service,
            monitor,
            sink,
            config,
            events_tx,
            tracker_tx,
            state: ConnectionState::Inactive,
            tag: 0,
            cid: INVALID_CID,
            sub_id: INVALID_SUBSCRIPTION_ID,
            rat: ss.rat,
            data_reg_state: ss.data_reg_state,
            apn_setting: None,
            connection_params: None,
            disconnect_params: None,
            fail_cause: FailCause::None,
            consumers: HashMap::new(),
            link_properties: LinkProperties::default(),
            pcscf_addresses: Vec::new(),
            network_info,
            network_agent: None,
            handover_source_agent: None,
            handover_state: HandoverState::Idle,
            score: OTHER_CONNECTION_SCORE,
            subscription_override: 0,
            unmetered_override: false,
            restricted_override: false,
            unmetered_use_only: false,
            disabled_apn_types: ApnTypes::NONE,
            create_time: None,
            last_fail_time: None,
            last_fail_cause: FailCause::None,
            deferred: VecDeque::new(),
        };
        info!("Made {}", dc.name);
        dc
    }

    /// Run the initial Inactive entry. Called once when the controller
    /// registers the bearer.
    pub fn start(&mut self, ctx: &mut DcContext<'_>) {
        self.enter_state(ConnectionState::Inactive, ctx);
    }

    // ===== Initialization and setup =====

    /// Attach a consumer and stamp its tag. Returns the stamped parameters,
    /// or `None` when the profile cannot serve the requested APN type.
    fn init_connection(&mut self, cp: &ConnectionParams) -> Option<ConnectionParams> {
        if self.apn_setting.is_none() {
            // Only adopt a profile when none is set, which can only be the
            // case while Inactive.
            self.apn_setting = cp.apn_context.apn_setting();
        }
        let compatible = self
            .apn_setting
            .as_ref()
            .map(|apn| apn.can_handle_type(cp.apn_context.apn_type()))
            .unwrap_or(false);
        if !compatible {
            debug!("{}: init_connection: incompatible profile for {}", self.name, cp.apn_context);
            return None;
        }

        self.tag += 1;
        let mut cp = cp.clone();
        cp.tag = self.tag;
        self.connection_params = Some(cp.clone());
        self.consumers.insert(cp.apn_context.id(), cp.clone());

        debug!(
            "{}: init_connection: ref_count={} tag={}",
            self.name,
            self.consumers.len(),
            self.tag
        );
        Some(cp)
    }

    /// Ask the radio service to set up the call. The reply arrives as a
    /// tagged `SetupDataCallDone` event.
    fn connect(&mut self, cp: &ConnectionParams, ctx: &mut DcContext<'_>) -> FailCause {
        let Some(apn) = self.apn_setting.clone() else {
            warn!("{}: connect without an APN profile", self.name);
            return FailCause::Unknown;
        };
        info!(
            "{}: connect: carrier='{}' APN='{}' proxy='{:?}' port='{:?}'",
            self.name, apn.entry_name, apn.apn_name, apn.proxy_address, apn.proxy_port
        );

        self.create_time = None;
        self.last_fail_time = None;
        self.last_fail_cause = FailCause::None;

        let profile = DataProfile::from_apn_setting(&apn, cp.profile_id, cp.apn_preferred);
        let ss = self.monitor.service_state();
        // The modem's own roaming view decides the protocol; the setup is
        // allowed when the user enabled data roaming or when the framework
        // overrides a modem-visible roaming state.
        let is_modem_roaming = ss.modem_roaming;
        let allow_roaming = self.monitor.is_data_roaming_enabled()
            || (is_modem_roaming && !ss.data_roaming);

        let mut reason = RequestReason::Normal;
        let mut link_properties = None;
        if cp.request_type == RequestType::Handover {
            let source_transport = self.transport.opposite();
            let apn_type = cp.apn_context.apn_type();
            let Some(source) = ctx.find_active_by_apn_type(source_transport, apn_type) else {
                warn!("{}: connect: no handover source for {}", self.name, apn_type);
                return FailCause::HandoverFailed;
            };
            // Preserve the source agent; ownership is not transferred yet.
            self.handover_source_agent = source.network_agent.clone();
            info!(
                "{}: handover started from {}, preserved agent {:?}",
                self.name,
                source.name,
                self.handover_source_agent.as_ref().map(|a| a.name().to_string())
            );
            source.set_handover_state(HandoverState::BeingTransferred);
            let source_lp = source.link_properties.clone();
            if source_lp.is_empty() {
                warn!("{}: connect: handover source has no link properties", self.name);
                return FailCause::HandoverFailed;
            }
            link_properties = Some(source_lp);
            reason = RequestReason::Handover;
        }

        let request = SetupDataCallRequest {
            access_network: cp.rat,
            profile,
            is_modem_roaming,
            allow_roaming,
            reason,
            link_properties,
        };

        let service = self.data_service.clone();
        let tx = self.events_tx.clone();
        let id = self.id;
        let tag = cp.tag;
        tokio::spawn(async move {
            let (result, response) = service.setup_data_call(request).await;
            let _ = tx
                .send(DcMessage::Event(
                    id,
                    ConnectionEvent::SetupDataCallDone {
                        tag,
                        result,
                        response,
                    },
                ))
                .await;
        });
        FailCause::None
    }

    /// Classify a setup completion; on success the cid, PCSCF list and link
    /// properties are applied.
    fn on_setup_connection_completed(
        &mut self,
        tag: u32,
        result: crate::radio::ResultCode,
        response: Option<&DataCallResponse>,
    ) -> SetupResult {
        if tag != self.tag {
            debug!("{}: stale setup reply tag={} mtag={}", self.name, tag, self.tag);
            return SetupResult::ErrorStale;
        }
        if result == crate::radio::ResultCode::ErrorIllegalState {
            return SetupResult::ErrorRadioNotAvailable;
        }
        let Some(response) = response else {
            return SetupResult::ErrorInvalidArg;
        };
        match response.cause {
            FailCause::None => {
                self.cid = response.cid;
                self.pcscf_addresses = response.pcscf_addresses.clone();
                self.update_link_property(response)
            }
            FailCause::RadioNotAvailable => SetupResult::ErrorRadioNotAvailable,
            cause => SetupResult::ErrorDataServiceSpecific(cause),
        }
    }

    /// Rebuild link properties from a call response and push the change.
    fn update_link_property(&mut self, response: &DataCallResponse) -> SetupResult {
        let mut new_lp = LinkProperties::default();
        let result =
            set_link_properties(response, self.apn_setting.as_ref(), &self.config, &mut new_lp);
        if result != SetupResult::Success {
            debug!("{}: update_link_property failed: {:?}", self.name, result);
            return result;
        }
        // The HTTP proxy is not part of the call response.
        new_lp.http_proxy = self.link_properties.http_proxy.clone();

        let changed = new_lp != self.link_properties;
        self.link_properties = new_lp;
        self.update_tcp_buffer_sizes();

        if changed {
            self.push_link_properties();
        }
        SetupResult::Success
    }

    /// Ask the radio service to deactivate the call. The reply arrives as a
    /// tagged `DeactivateDone` event.
    fn tear_down_data(&mut self, params: Option<&DisconnectParams>) {
        let reason = match params {
            Some(dp)
                if dp.reason == REASON_RADIO_TURNED_OFF || dp.reason == REASON_PDP_RESET =>
            {
                RequestReason::Shutdown
            }
            Some(dp) if dp.release_type == ReleaseType::Handover => RequestReason::Handover,
            _ => RequestReason::Normal,
        };
        info!("{}: tear_down_data cid={} reason={:?}", self.name, self.cid, reason);

        let service = self.data_service.clone();
        let tx = self.events_tx.clone();
        let id = self.id;
        let tag = self.tag;
        let cid = self.cid;
        tokio::spawn(async move {
            let _ = service.deactivate_data_call(cid, reason).await;
            let _ = tx
                .send(DcMessage::Event(id, ConnectionEvent::DeactivateDone { tag }))
                .await;
        });
    }

    /// Fire-and-forget deactivation with no reply expected.
    fn tear_down_now(&self) {
        info!("{}: tear_down_now cid={}", self.name, self.cid);
        let service = self.data_service.clone();
        let cid = self.cid;
        tokio::spawn(async move {
            let _ = service.deactivate_data_call(cid, RequestReason::Normal).await;
        });
    }

    // ===== Notifications =====

    fn notify_connect_completed(
        &mut self,
        cp: &ConnectionParams,
        cause: FailCause,
        send_all: bool,
    ) {
        let now = SystemTime::now();
        let delivered = cp.on_completed.complete(ConnectionCompleted {
            cause,
            cid: self.cid,
            request_type: cp.request_type,
        });
        if cause == FailCause::None {
            self.create_time = Some(now);
        } else {
            self.last_fail_cause = cause;
            self.last_fail_time = Some(now);
        }
        debug!(
            "{}: notify_connect_completed cause={} delivered={}",
            self.name, cause, delivered
        );

        if send_all && !(self.config.pdp_reject_retention && cause.is_pdp_reject()) {
            self.notify_all_with_event(
                Some(cp.apn_context.id()),
                NotifyKind::SetupError,
                &cause.to_string(),
            );
        }
    }

    fn notify_disconnect_completed(&mut self, dp: &DisconnectParams, send_all: bool) {
        dp.on_completed.complete(());
        if send_all {
            let reason = if dp.reason.is_empty() {
                FailCause::Unknown.to_string()
            } else {
                dp.reason.clone()
            };
            let already_sent = dp.apn_context.as_ref().map(|apn_context| apn_context.id());
            self.notify_all_with_event(already_sent, NotifyKind::DisconnectDone, &reason);
        }
        debug!("{}: notify_disconnect_completed reason={}", self.name, dp.reason);
    }

    /// Broadcast to every attached consumer except `already_sent`.
    fn notify_all_with_event(
        &mut self,
        already_sent: Option<ApnContextId>,
        kind: NotifyKind,
        reason: &str,
    ) {
        self.network_info.reason = Some(reason.to_string());
        for cp in self.consumers.values() {
            if Some(cp.apn_context.id()) == already_sent {
                continue;
            }
            cp.apn_context.set_reason(reason);
            let event = match kind {
                NotifyKind::SetupComplete => TrackerEvent::DataSetupComplete {
                    apn_context: cp.apn_context.clone(),
                    generation: cp.generation,
                    request_type: cp.request_type,
                    cid: self.cid,
                    reason: reason.to_string(),
                },
                NotifyKind::SetupError => TrackerEvent::DataSetupError {
                    apn_context: cp.apn_context.clone(),
                    generation: cp.generation,
                    request_type: cp.request_type,
                    cid: self.cid,
                    reason: reason.to_string(),
                },
                NotifyKind::DisconnectDone => TrackerEvent::DisconnectDone {
                    apn_context: cp.apn_context.clone(),
                    generation: cp.generation,
                    request_type: cp.request_type,
                    cid: self.cid,
                    reason: reason.to_string(),
                },
            };
            let _ = self.tracker_tx.send(event);
        }
    }

    // ===== Derived state =====

    /// Synthesize the currently exposed capability set.
    pub fn network_capabilities(&self) -> NetworkCapabilities {
        let ss = self.monitor.service_state();
        synthesize_capabilities(&CapabilityInputs {
            apn_setting: self.apn_setting.as_ref(),
            disabled_apn_types: self.disabled_apn_types,
            restricted_override: self.restricted_override,
            unmetered_use_only: self.unmetered_use_only,
            unmetered_override: self.unmetered_override,
            subscription_override: self.subscription_override,
            data_roaming: ss.data_roaming,
            sub_id: self.sub_id,
            rat: self.rat,
            nr_connected: ss.nr_state == NrState::Connected,
            nr_mmwave: ss.nr_frequency == NrFrequencyRange::Mmwave,
            config: &self.config,
        })
    }

    /// A bearer needs restriction when a restricted request rides a metered
    /// profile while data is disabled or roaming is not permitted.
    fn should_restrict_network(&self) -> bool {
        let any_restricted = self
            .consumers
            .values()
            .any(|cp| cp.apn_context.has_restricted_requests(true));
        if !any_restricted {
            return false;
        }
        let metered = self
            .apn_setting
            .as_ref()
            .map(|apn| apn.is_metered(&self.config))
            .unwrap_or(false);
        if !metered {
            return false;
        }
        if !self.monitor.is_data_enabled() {
            return true;
        }
        if !self.monitor.is_data_roaming_enabled() && self.monitor.service_state().data_roaming {
            return true;
        }
        false
    }

    /// An unmetered-use-only bearer exists to serve unmetered consumers
    /// while general data is unavailable.
    fn is_unmetered_use_only(&self) -> bool {
        if self.transport == Transport::Wlan {
            return false;
        }
        if self.monitor.is_data_enabled() {
            return false;
        }
        if self.monitor.is_data_roaming_enabled() && self.monitor.service_state().data_roaming {
            return false;
        }
        self.consumers
            .values()
            .all(|cp| !self.config.is_metered_apn_type(cp.apn_context.apn_type()))
    }

    fn calculate_score(&self) -> i32 {
        let serves_default_internet = self.consumers.values().any(|cp| {
            cp.apn_context.network_requests().iter().any(|request| {
                request.has_capability(NetCapability::Internet)
                    && request.network_specifier.is_none()
            })
        });
        if serves_default_internet {
            DEFAULT_INTERNET_CONNECTION_SCORE
        } else {
            OTHER_CONNECTION_SCORE
        }
    }

    /// Recompute the score and push it when it changed.
    fn update_score(&mut self) {
        let old = self.score;
        self.score = self.calculate_score();
        if old != self.score {
            info!("{}: score {} -> {}", self.name, old, self.score);
            if let Some(agent) = &self.network_agent {
                agent.send_network_score(self.id, self.score);
            }
        }
    }

    fn update_network_info(&mut self) {
        let ss = self.monitor.service_state();
        self.network_info.subtype = ss.rat;
        self.network_info.roaming = ss.data_roaming;
    }

    /// Decide between CONNECTED and SUSPENDED for the exposed detail state.
    fn update_suspend_state(&mut self) {
        if self.network_agent.is_none() {
            debug!("{}: computing suspend state without an agent", self.name);
        }
        let suspended = self.data_reg_state != DataRegState::InService
            || (!self.monitor.is_concurrent_voice_and_data_allowed()
                && !self.monitor.is_voice_call_idle());
        let state = if suspended {
            DetailedState::Suspended
        } else {
            DetailedState::Connected
        };
        self.network_info.set_detailed_state(state, None);
    }

    fn update_tcp_buffer_sizes(&mut self) {
        let ss = self.monitor.service_state();
        let nr_nsa = self.transport == Transport::Wwan
            && self.rat.is_lte()
            && ss.nr_state == NrState::Connected
            && ss.nr_context_ids.contains(&self.cid);
        self.link_properties.tcp_buffer_sizes = tcp_buffer_sizes_for(
            self.rat,
            ss.carrier_aggregation,
            nr_nsa,
            &self.config.tcp_buffer_overrides,
        );
    }

    pub fn set_handover_state(&mut self, state: HandoverState) {
        info!(
            "{}: handover state {} -> {}",
            self.name,
            self.handover_state.name(),
            state.name()
        );
        self.handover_state = state;
    }

    // ===== Agent pushes =====

    fn push_link_properties(&self) {
        if let Some(agent) = &self.network_agent {
            agent.send_link_properties(self.id, &self.link_properties);
        }
    }

    fn push_capabilities(&self) {
        if let Some(agent) = &self.network_agent {
            agent.send_network_capabilities(self.id, &self.network_capabilities());
        }
    }

    fn push_network_info(&self) {
        if let Some(agent) = &self.network_agent {
            agent.send_network_info(self.id, &self.network_info);
        }
    }

    // ===== State entry/exit =====

    fn transition_to(&mut self, next: ConnectionState, ctx: &mut DcContext<'_>) {
        debug!("{}: {} -> {}", self.name, self.state, next);
        self.exit_state(self.state, ctx);
        self.state = next;
        self.enter_state(next, ctx);

        // Re-present deferred events in their original order.
        let deferred: Vec<ConnectionEvent> = self.deferred.drain(..).collect();
        for event in deferred {
            self.process_event(event, ctx);
        }
    }

    fn enter_state(&mut self, state: ConnectionState, ctx: &mut DcContext<'_>) {
        match state {
            ConnectionState::Inactive => self.enter_inactive(ctx),
            ConnectionState::Activating => self.enter_activating(),
            ConnectionState::Active => self.enter_active(ctx),
            ConnectionState::Disconnecting
            | ConnectionState::DisconnectingErrorCreatingConnection => {}
        }
    }

    fn exit_state(&mut self, state: ConnectionState, _ctx: &mut DcContext<'_>) {
        if state == ConnectionState::Active {
            self.exit_active();
        }
    }

    fn enter_inactive(&mut self, ctx: &mut DcContext<'_>) {
        self.tag += 1;
        debug!("{}: enter Inactive tag={}", self.name, self.tag);

        if self.handover_state == HandoverState::BeingTransferred {
            self.set_handover_state(HandoverState::Completed);
        }

        // A preserved source agent still present here means the handover
        // failed before the destination adopted it.
        if let Some(agent) = self.handover_source_agent.take() {
            if let Some(owner) = agent.owner() {
                // The source still owns the agent; roll its state back.
                info!("{}: handover failed, resetting source {} to idle", self.name, owner);
                if let Some(source) = ctx.get_mut(owner) {
                    source.set_handover_state(HandoverState::Idle);
                }
            } else {
                // Nobody owns the agent anymore. Adopt it just long enough
                // to tell the upstream layer the network is gone.
                info!("{}: handover failed with dangling agent {}", self.name, agent.name());
                agent.acquire_ownership(self.id, self.transport);
                let mut info = self.network_info.clone();
                info.set_detailed_state(DetailedState::Disconnected, Some(self.fail_cause.to_string()));
                agent.send_network_info(self.id, &info);
                agent.release_ownership(self.id);
            }
        }

        if let Some(cp) = self.connection_params.clone() {
            debug!(
                "{}: enter Inactive, notify connect completed cause={}",
                self.name, self.fail_cause
            );
            let cause = self.fail_cause;
            self.notify_connect_completed(&cp, cause, true);
        }
        if let Some(dp) = self.disconnect_params.clone() {
            debug!("{}: enter Inactive, notify disconnect completed", self.name);
            self.notify_disconnect_completed(&dp, true);
        }
        if self.disconnect_params.is_none()
            && self.connection_params.is_none()
            && self.fail_cause.is_failure()
        {
            let reason = self.fail_cause.to_string();
            debug!("{}: enter Inactive, notify all disconnect, cause={}", self.name, reason);
            self.notify_all_with_event(None, NotifyKind::DisconnectDone, &reason);
        }

        ctx.store.remove_active_cid(self.cid, self.id);

        if !(self.config.pdp_reject_retention && self.fail_cause.is_pdp_reject()) {
            self.clear_settings();
        }
    }

    fn enter_activating(&mut self) {
        self.set_handover_state(HandoverState::Idle);
        // The restricted evaluation must happen before the agent exists:
        // restriction can be released later but never applied to a live
        // agent, so a request released during the connecting window must be
        // accounted for now.
        self.restricted_override = self.should_restrict_network();
    }

    fn enter_active(&mut self, ctx: &mut DcContext<'_>) {
        info!("{}: enter Active cid={}", self.name, self.cid);
        self.update_network_info();

        // The triggering request resolves exactly once; every other attached
        // consumer learns about the setup through the broadcast path. With
        // retries there may be more than one waiting consumer.
        match self.connection_params.clone() {
            Some(cp) => {
                self.notify_connect_completed(&cp, FailCause::None, false);
                self.notify_all_with_event(
                    Some(cp.apn_context.id()),
                    NotifyKind::SetupComplete,
                    crate::types::REASON_CONNECTED,
                );
            }
            None => {
                self.notify_all_with_event(
                    None,
                    NotifyKind::SetupComplete,
                    crate::types::REASON_CONNECTED,
                );
            }
        }

        ctx.store.insert_active_cid(self.cid, self.id);

        let reason = self.network_info.reason.clone();
        self.network_info
            .set_detailed_state(DetailedState::Connected, reason);
        self.network_info.extra_info = self.apn_setting.as_ref().map(|apn| apn.apn_name.clone());
        self.update_tcp_buffer_sizes();

        self.unmetered_use_only = self.is_unmetered_use_only();
        debug!(
            "{}: restricted_override={} unmetered_use_only={}",
            self.name, self.restricted_override, self.unmetered_use_only
        );

        let is_handover = self
            .connection_params
            .as_ref()
            .map(|cp| cp.request_type == RequestType::Handover)
            .unwrap_or(false);
        if is_handover {
            if let Some(agent) = self.handover_source_agent.take() {
                // Reuse the source agent so the transfer is invisible
                // upstream. The source's handover state is not completed yet;
                // it still has to deactivate its own call.
                info!("{}: transferred agent {} successfully", self.name, agent.name());
                agent.acquire_ownership(self.id, self.transport);
                self.network_agent = Some(agent);
                self.push_capabilities();
                self.push_link_properties();
            } else {
                let apn_type = self
                    .connection_params
                    .as_ref()
                    .map(|cp| cp.apn_context.apn_type())
                    .unwrap_or(ApnTypes::NONE);
                let source_exists = ctx
                    .find_active_by_apn_type(self.transport.opposite(), apn_type)
                    .is_some();
                if source_exists {
                    info!("{}: source did not create an agent, creating one", self.name);
                    self.create_network_agent();
                } else {
                    warn!(
                        "{}: failed to get the network agent from the source connection",
                        self.name
                    );
                    return;
                }
            }
        } else {
            self.create_network_agent();
        }
    }

    fn create_network_agent(&mut self) {
        self.score = self.calculate_score();
        self.disabled_apn_types = self
            .disabled_apn_types
            .union(self.config.disallowed_apn_types(self.transport));
        let agent = NetworkAgent::new(self.sink.clone(), self.id, self.transport);
        // Registration exposes the full initial state upstream.
        agent.send_network_info(self.id, &self.network_info);
        agent.send_network_capabilities(self.id, &self.network_capabilities());
        agent.send_link_properties(self.id, &self.link_properties);
        agent.send_network_score(self.id, self.score);
        self.network_agent = Some(agent);
    }

    fn exit_active(&mut self) {
        let reason = self
            .disconnect_params
            .as_ref()
            .filter(|dp| !dp.reason.is_empty())
            .map(|dp| dp.reason.clone())
            .unwrap_or_else(|| self.fail_cause.to_string());
        debug!("{}: exit Active reason={}", self.name, reason);

        // When the session moved to the other transport the upstream layer
        // must not see a disconnect.
        if self.handover_state != HandoverState::BeingTransferred {
            self.network_info
                .set_detailed_state(DetailedState::Disconnected, Some(reason));
        }

        if let Some(agent) = self.network_agent.take() {
            // Both calls are no-ops when ownership already moved to the
            // handover destination.
            agent.send_network_info(self.id, &self.network_info);
            agent.release_ownership(self.id);
        }
    }

    /// Reset every per-call field. Called on Inactive entry unless the PDP
    /// reject retention policy applies.
    fn clear_settings(&mut self) {
        debug!("{}: clear_settings", self.name);
        self.create_time = None;
        self.last_fail_time = None;
        self.last_fail_cause = FailCause::None;
        self.cid = INVALID_CID;
        self.pcscf_addresses.clear();
        self.link_properties.clear();
        self.consumers.clear();
        self.apn_setting = None;
        self.unmetered_use_only = false;
        self.restricted_override = false;
        self.fail_cause = FailCause::None;
        self.disabled_apn_types = ApnTypes::NONE;
        self.sub_id = INVALID_SUBSCRIPTION_ID;
        self.subscription_override = 0;
        self.unmetered_override = false;
    }

    fn defer(&mut self, event: ConnectionEvent) {
        debug!("{}: deferring {} in {}", self.name, event.name(), self.state);
        self.deferred.push_back(event);
    }

    /// Published read-side view.
    pub fn snapshot(&self) -> BearerSnapshot {
        BearerSnapshot {
            id: self.id,
            name: self.name.clone(),
            transport: self.transport,
            state: self.state,
            cid: self.cid,
            sub_id: self.sub_id,
            apn_setting: self.apn_setting.clone(),
            apn_contexts: self
                .consumers
                .values()
                .map(|cp| cp.apn_context.clone())
                .collect(),
            link_properties: self.link_properties.clone(),
            network_capabilities: self.network_capabilities(),
            pcscf_addresses: self.pcscf_addresses.clone(),
            handover_state: self.handover_state,
            score: self.score,
        }
    }

    fn decode_retry(&self, response: Option<&DataCallResponse>) -> crate::types::RetryAdvice {
        response
            .map(|r| decode_suggested_retry(r.suggested_retry_time))
            .unwrap_or(crate::types::RetryAdvice::NoSuggestion)
    }
}
