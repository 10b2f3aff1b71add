//! Per-state event handling
//!
//! Dispatch walks from the current state's handler to the Default parent
//! when the event was not consumed. Handlers return the event back when they
//! do not handle it, which is the "not handled" signal of the hierarchy.

use tracing::{debug, info, warn};

use super::{ConnectionState, DataConnection, DcContext};
use crate::agent::KeepaliveEventStatus;
use crate::config::BandwidthSource;
use crate::events::ConnectionEvent;
use crate::radio::{KeepaliveStatus, KeepaliveStatusCode};
use crate::types::{FailCause, SetupResult, Transport, INVALID_SUBSCRIPTION_ID};

impl DataConnection {
    /// Process one event against the hierarchical state machine.
    pub fn process_event(&mut self, event: ConnectionEvent, ctx: &mut DcContext<'_>) {
        debug!(
            "{}: {} in {} ref_count={}",
            self.name,
            event.name(),
            self.state,
            self.consumers.len()
        );
        let leftover = match self.state {
            ConnectionState::Inactive => self.on_inactive_event(event, ctx),
            ConnectionState::Activating => self.on_activating_event(event, ctx),
            ConnectionState::Active => self.on_active_event(event, ctx),
            ConnectionState::Disconnecting => self.on_disconnecting_event(event, ctx),
            ConnectionState::DisconnectingErrorCreatingConnection => {
                self.on_disconnecting_error_event(event, ctx)
            }
        };
        if let Some(event) = leftover {
            self.on_default_event(event, ctx);
        }
    }

    // ===== Default (parent) =====

    fn on_default_event(&mut self, event: ConnectionEvent, ctx: &mut DcContext<'_>) {
        match event {
            ConnectionEvent::Reset => {
                debug!("{}: default RESET", self.name);
                self.transition_to(ConnectionState::Inactive, ctx);
            }
            ConnectionEvent::Connect(cp) => {
                // A connect that reaches the parent is unexpected; fail it.
                warn!("{}: CONNECT in {} not expected", self.name, self.state);
                self.notify_connect_completed(&cp, FailCause::Unknown, false);
            }
            ConnectionEvent::Disconnect(_)
            | ConnectionEvent::DisconnectAll(_)
            | ConnectionEvent::ReevaluateRestrictedState => {
                self.defer(event);
            }
            ConnectionEvent::TearDownNow => {
                self.tear_down_now();
            }
            ConnectionEvent::LostConnection => {
                debug!("{}: ignoring LOST_CONNECTION, no active call", self.name);
            }
            ConnectionEvent::DrsOrRatChanged => {
                let ss = self.monitor.service_state();
                self.data_reg_state = ss.data_reg_state;
                self.rat = ss.rat;
                debug!(
                    "{}: DRS_OR_RAT_CHANGED drs={:?} rat={}",
                    self.name, self.data_reg_state, self.rat
                );
                self.update_tcp_buffer_sizes();
                self.update_network_info();
                self.update_suspend_state();
                self.push_capabilities();
                self.push_network_info();
                self.push_link_properties();
            }
            ConnectionEvent::MeterednessChanged(unmetered) => {
                if unmetered == self.unmetered_override {
                    return;
                }
                self.unmetered_override = unmetered;
                self.update_network_info();
                self.push_capabilities();
                self.push_network_info();
            }
            ConnectionEvent::SubscriptionOverrideChanged { mask, value } => {
                self.subscription_override =
                    (self.subscription_override & !mask) | (value & mask);
                self.update_network_info();
                self.push_capabilities();
                self.push_network_info();
            }
            ConnectionEvent::RoamOn
            | ConnectionEvent::RoamOff
            | ConnectionEvent::NrFrequencyChanged => {
                self.update_network_info();
                self.push_capabilities();
                self.push_network_info();
            }
            ConnectionEvent::KeepaliveStartRequest { slot, .. }
            | ConnectionEvent::KeepaliveStopRequest { slot } => {
                // No active network to run a keepalive on.
                if let Some(agent) = &self.network_agent {
                    agent.on_socket_keepalive_event(slot, KeepaliveEventStatus::ErrorInvalidNetwork);
                }
            }
            ConnectionEvent::RetryConnection => {
                debug!("{}: ignoring RETRY_CONNECTION in {}", self.name, self.state);
            }
            other => {
                debug!("{}: default ignoring {}", self.name, other.name());
            }
        }
    }

    // ===== Inactive =====

    fn on_inactive_event(
        &mut self,
        event: ConnectionEvent,
        ctx: &mut DcContext<'_>,
    ) -> Option<ConnectionEvent> {
        match event {
            ConnectionEvent::Reset | ConnectionEvent::ReevaluateRestrictedState => {
                debug!("{}: already inactive, nothing to do", self.name);
                None
            }
            ConnectionEvent::Connect(cp) => {
                // Use the stamped copy from here on.
                let Some(cp) = self.init_connection(&cp) else {
                    info!("{}: CONNECT rejected, incompatible profile", self.name);
                    self.notify_connect_completed(
                        &cp,
                        FailCause::UnacceptableNetworkParameter,
                        false,
                    );
                    self.transition_to(ConnectionState::Inactive, ctx);
                    return None;
                };
                let cause = self.connect(&cp, ctx);
                if cause.is_failure() {
                    info!("{}: CONNECT failed, cause={}", self.name, cause);
                    self.notify_connect_completed(&cp, cause, false);
                    self.transition_to(ConnectionState::Inactive, ctx);
                    return None;
                }
                if self.sub_id == INVALID_SUBSCRIPTION_ID {
                    self.sub_id = cp.sub_id;
                }
                self.transition_to(ConnectionState::Activating, ctx);
                None
            }
            ConnectionEvent::Disconnect(dp) | ConnectionEvent::DisconnectAll(dp) => {
                // Nothing to disconnect, reply right away.
                self.notify_disconnect_completed(&dp, false);
                None
            }
            ConnectionEvent::RetryConnection => {
                match self.connection_params.clone() {
                    Some(saved) => match self.init_connection(&saved) {
                        Some(cp) => {
                            // Pick up the latest profile in case it changed.
                            self.apn_setting = cp.apn_context.apn_setting();
                            self.connect(&cp, ctx);
                            self.transition_to(ConnectionState::Activating, ctx);
                        }
                        None => debug!("{}: RETRY_CONNECTION init failed", self.name),
                    },
                    None => debug!("{}: RETRY_CONNECTION without saved params", self.name),
                }
                None
            }
            other => Some(other),
        }
    }

    // ===== Activating =====

    fn on_activating_event(
        &mut self,
        event: ConnectionEvent,
        ctx: &mut DcContext<'_>,
    ) -> Option<ConnectionEvent> {
        match event {
            // Cannot be processed until setup completes.
            ConnectionEvent::Connect(_) | ConnectionEvent::DrsOrRatChanged => {
                self.defer(event);
                None
            }
            ConnectionEvent::SetupDataCallDone {
                tag,
                result,
                response,
            } => {
                let setup = self.on_setup_connection_completed(tag, result, response.as_ref());
                info!(
                    "{}: setup completed, result={:?} cause={}",
                    self.name,
                    setup,
                    setup.fail_cause()
                );
                match setup {
                    SetupResult::Success => {
                        self.fail_cause = FailCause::None;
                        self.transition_to(ConnectionState::Active, ctx);
                    }
                    SetupResult::ErrorRadioNotAvailable => {
                        // The radio rejected the call outright. Notify after
                        // entering Inactive.
                        self.disconnect_params = None;
                        self.fail_cause = FailCause::RadioNotAvailable;
                        self.transition_to(ConnectionState::Inactive, ctx);
                    }
                    SetupResult::ErrorInvalidArg => {
                        // The addresses in the response are unusable; the
                        // call is up and has to be torn back down.
                        self.tear_down_data(None);
                        self.transition_to(
                            ConnectionState::DisconnectingErrorCreatingConnection,
                            ctx,
                        );
                    }
                    SetupResult::ErrorDataServiceSpecific(cause) => {
                        let advice = self.decode_retry(response.as_ref());
                        if let Some(cp) = &self.connection_params {
                            cp.apn_context.set_modem_suggested_delay(advice);
                        }
                        debug!(
                            "{}: data service error cause={} advice={:?}",
                            self.name, cause, advice
                        );
                        self.disconnect_params = None;
                        self.fail_cause = cause;
                        self.transition_to(ConnectionState::Inactive, ctx);
                    }
                    SetupResult::ErrorStale => {
                        warn!("{}: stale setup reply dropped, tag={}", self.name, tag);
                    }
                }
                None
            }
            other => Some(other),
        }
    }

    // ===== Active =====

    fn on_active_event(
        &mut self,
        event: ConnectionEvent,
        ctx: &mut DcContext<'_>,
    ) -> Option<ConnectionEvent> {
        match event {
            ConnectionEvent::Connect(cp) => {
                // An additional consumer shares the live bearer.
                self.consumers.insert(cp.apn_context.id(), cp.clone());
                self.disabled_apn_types = self
                    .disabled_apn_types
                    .difference(cp.apn_context.apn_type());
                self.push_capabilities();
                info!(
                    "{}: attached consumer {} ref_count={}",
                    self.name,
                    cp.apn_context,
                    self.consumers.len()
                );
                self.notify_connect_completed(&cp, FailCause::None, false);
                None
            }
            ConnectionEvent::Disconnect(dp) => {
                let known = dp
                    .apn_context
                    .as_ref()
                    .filter(|apn_context| self.consumers.contains_key(&apn_context.id()))
                    .cloned();
                let Some(apn_context) = known else {
                    warn!("{}: DISCONNECT for unknown consumer", self.name);
                    self.notify_disconnect_completed(&dp, false);
                    return None;
                };
                if self.consumers.len() == 1 {
                    self.consumers.clear();
                    let mut dp = dp;
                    dp.tag = self.tag;
                    self.disconnect_params = Some(dp.clone());
                    self.connection_params = None;
                    self.tear_down_data(Some(&dp));
                    self.transition_to(ConnectionState::Disconnecting, ctx);
                } else {
                    self.consumers.remove(&apn_context.id());
                    self.disabled_apn_types =
                        self.disabled_apn_types.union(apn_context.apn_type());
                    self.push_capabilities();
                    self.notify_disconnect_completed(&dp, false);
                }
                None
            }
            ConnectionEvent::DisconnectAll(dp) => {
                debug!("{}: DISCONNECT_ALL, clearing consumers", self.name);
                let mut dp = dp;
                dp.tag = self.tag;
                self.disconnect_params = Some(dp.clone());
                self.connection_params = None;
                self.tear_down_data(Some(&dp));
                self.transition_to(ConnectionState::Disconnecting, ctx);
                None
            }
            ConnectionEvent::LostConnection => {
                info!("{}: LOST_CONNECTION", self.name);
                self.connection_params = None;
                self.disconnect_params = None;
                self.fail_cause = FailCause::LostConnection;
                self.transition_to(ConnectionState::Inactive, ctx);
                None
            }
            ConnectionEvent::BwRefreshResponse(result) => {
                match result {
                    Err(error) => debug!("{}: BW_REFRESH_RESPONSE error: {}", self.name, error),
                    Ok(estimate) => self.apply_link_capacity(estimate),
                }
                None
            }
            ConnectionEvent::LinkCapacityChanged(estimate) => {
                self.apply_link_capacity(estimate);
                None
            }
            ConnectionEvent::VoiceCallStarted | ConnectionEvent::VoiceCallEnded => {
                self.update_network_info();
                self.update_suspend_state();
                self.push_capabilities();
                self.push_network_info();
                None
            }
            ConnectionEvent::KeepaliveStartRequest {
                slot,
                packet,
                interval_ms,
            } => {
                if self.transport == Transport::Wwan {
                    let service = self.data_service.clone();
                    let tx = self.events_tx.clone();
                    let id = self.id;
                    let cid = self.cid;
                    tokio::spawn(async move {
                        let result = service
                            .start_natt_keepalive(
                                cid,
                                packet,
                                std::time::Duration::from_millis(interval_ms as u64),
                            )
                            .await;
                        let _ = tx
                            .send(crate::controller::DcMessage::Event(
                                id,
                                ConnectionEvent::KeepaliveStarted { slot, result },
                            ))
                            .await;
                    });
                } else {
                    // Keepalive offload is only available through the WWAN
                    // radio interface.
                    if let Some(agent) = &self.network_agent {
                        agent.on_socket_keepalive_event(
                            slot,
                            KeepaliveEventStatus::ErrorInvalidNetwork,
                        );
                    }
                }
                None
            }
            ConnectionEvent::KeepaliveStopRequest { slot } => {
                let handle = self
                    .network_agent
                    .as_ref()
                    .and_then(|agent| agent.keepalive_tracker.handle_for_slot(slot));
                match handle {
                    None => warn!("{}: no keepalive handle for slot {}", self.name, slot),
                    Some(handle) => {
                        debug!("{}: stopping keepalive handle {}", self.name, handle);
                        let service = self.data_service.clone();
                        let tx = self.events_tx.clone();
                        let id = self.id;
                        tokio::spawn(async move {
                            let result = service.stop_natt_keepalive(handle).await;
                            let _ = tx
                                .send(crate::controller::DcMessage::Event(
                                    id,
                                    ConnectionEvent::KeepaliveStopped {
                                        handle,
                                        slot,
                                        result,
                                    },
                                ))
                                .await;
                        });
                    }
                }
                None
            }
            ConnectionEvent::KeepaliveStarted { slot, result } => {
                if let Some(agent) = &self.network_agent {
                    match result {
                        Ok(status) => agent.handle_keepalive_started(slot, status),
                        Err(error) => {
                            warn!("{}: keepalive start failed: {}", self.name, error);
                            agent.on_socket_keepalive_event(
                                slot,
                                KeepaliveEventStatus::ErrorHardware,
                            );
                        }
                    }
                }
                None
            }
            ConnectionEvent::KeepaliveStatus(status) => {
                if let Some(agent) = &self.network_agent {
                    agent.handle_keepalive_status(status);
                }
                None
            }
            ConnectionEvent::KeepaliveStopped {
                handle,
                slot,
                result,
            } => {
                if let Some(agent) = &self.network_agent {
                    match result {
                        Ok(()) => {
                            debug!("{}: keepalive stopped handle={}", self.name, handle);
                            agent.handle_keepalive_status(KeepaliveStatus {
                                handle,
                                code: KeepaliveStatusCode::Inactive,
                            });
                        }
                        Err(error) => {
                            warn!("{}: keepalive stop failed: {}", self.name, error);
                            agent.on_socket_keepalive_event(
                                slot,
                                KeepaliveEventStatus::ErrorHardware,
                            );
                        }
                    }
                }
                None
            }
            ConnectionEvent::ReevaluateRestrictedState => {
                // Restriction may only be released here. Applying it to a
                // live agent is forbidden upstream; the tracker tears the
                // bearer down instead.
                if self.restricted_override && !self.should_restrict_network() {
                    info!("{}: becomes not-restricted", self.name);
                    self.restricted_override = false;
                    self.push_capabilities();
                }
                // Metered capabilities can come back once general data use
                // is allowed again, but never leave dynamically.
                if self.unmetered_use_only && !self.is_unmetered_use_only() {
                    self.unmetered_use_only = false;
                    self.push_capabilities();
                }
                None
            }
            ConnectionEvent::ReevaluateDataConnectionProperties => {
                self.update_score();
                None
            }
            ConnectionEvent::NrStateChanged => {
                self.update_tcp_buffer_sizes();
                self.push_link_properties();
                None
            }
            other => Some(other),
        }
    }

    fn apply_link_capacity(&mut self, estimate: crate::types::LinkCapacityEstimate) {
        let mut nc = self.network_capabilities();
        if self.config.bandwidth_source == BandwidthSource::Modem {
            if let Some(downlink) = estimate.downlink_kbps {
                nc.link_downstream_bandwidth_kbps = downlink;
            }
            if let Some(uplink) = estimate.uplink_kbps {
                nc.link_upstream_bandwidth_kbps = uplink;
            }
        }
        if let Some(agent) = &self.network_agent {
            agent.send_network_capabilities(self.id, &nc);
        }
    }

    // ===== Disconnecting =====

    fn on_disconnecting_event(
        &mut self,
        event: ConnectionEvent,
        ctx: &mut DcContext<'_>,
    ) -> Option<ConnectionEvent> {
        match event {
            ConnectionEvent::Connect(_) => {
                self.defer(event);
                None
            }
            ConnectionEvent::DeactivateDone { tag } => {
                if tag == self.tag {
                    debug!("{}: DEACTIVATE_DONE", self.name);
                    // Notifications fire after entering Inactive.
                    self.connection_params = None;
                    self.fail_cause = FailCause::None;
                    self.transition_to(ConnectionState::Inactive, ctx);
                } else {
                    debug!(
                        "{}: stale DEACTIVATE_DONE tag={} mtag={}",
                        self.name, tag, self.tag
                    );
                }
                None
            }
            other => Some(other),
        }
    }

    // ===== DisconnectingErrorCreatingConnection =====

    fn on_disconnecting_error_event(
        &mut self,
        event: ConnectionEvent,
        ctx: &mut DcContext<'_>,
    ) -> Option<ConnectionEvent> {
        match event {
            ConnectionEvent::DeactivateDone { tag } => {
                if tag == self.tag {
                    debug!("{}: DEACTIVATE_DONE after failed create", self.name);
                    self.disconnect_params = None;
                    self.fail_cause = FailCause::UnacceptableNetworkParameter;
                    self.transition_to(ConnectionState::Inactive, ctx);
                } else {
                    debug!(
                        "{}: stale DEACTIVATE_DONE tag={} mtag={}",
                        self.name, tag, self.tag
                    );
                }
                None
            }
            other => Some(other),
        }
    }
}
