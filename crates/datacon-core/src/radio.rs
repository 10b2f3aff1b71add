//! Radio data service contract
//!
//! The lower driver that executes setup and deactivate calls, plus the
//! service-state monitor the bearer polls for registration, roaming and NR
//! conditions. Both are trait seams so the controller can run against a
//! real radio HAL or a scripted test double.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::apn::{ApnSetting, AuthType, ProtocolType};
use crate::link_properties::{LinkAddress, LinkProperties};
use crate::types::{
    Cid, DataRegState, FailCause, KeepaliveHandle, NrFrequencyRange, NrState, RadioTech,
};

/// Result code of one data service call.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum ResultCode {
    Success,
    ErrorUnsupported,
    ErrorInvalidArg,
    ErrorBusy,
    /// The radio is not available; the call was rejected outright.
    ErrorIllegalState,
}

/// Why a setup or deactivate call is being made.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum RequestReason {
    Normal,
    Shutdown,
    Handover,
}

/// The profile handed to the modem for call setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataProfile {
    pub profile_id: i32,
    pub apn: String,
    pub protocol: ProtocolType,
    pub auth_type: AuthType,
    pub preferred: bool,
}

impl DataProfile {
    pub fn from_apn_setting(apn: &ApnSetting, profile_id: i32, preferred: bool) -> Self {
        DataProfile {
            profile_id,
            apn: apn.apn_name.clone(),
            protocol: apn.protocol,
            auth_type: apn.auth_type,
            preferred,
        }
    }
}

/// Parameters of one setup-data-call request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupDataCallRequest {
    pub access_network: RadioTech,
    pub profile: DataProfile,
    pub is_modem_roaming: bool,
    pub allow_roaming: bool,
    pub reason: RequestReason,
    /// For handover setups, the link properties of the source connection.
    pub link_properties: Option<LinkProperties>,
}

/// The modem's reply to a setup-data-call request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataCallResponse {
    pub cause: FailCause,
    /// Raw suggested retry encoding, see [`crate::types::decode_suggested_retry`].
    pub suggested_retry_time: i32,
    pub cid: Cid,
    pub interface_name: String,
    pub addresses: Vec<LinkAddress>,
    pub dns_addresses: Vec<IpAddr>,
    pub pcscf_addresses: Vec<IpAddr>,
    pub gateway_addresses: Vec<IpAddr>,
    /// Zero means unset.
    pub mtu: u32,
    pub protocol: Option<ProtocolType>,
}

impl DataCallResponse {
    /// A bare failure response carrying a cause and retry suggestion.
    pub fn failure(cause: FailCause, suggested_retry_time: i32) -> Self {
        DataCallResponse {
            cause,
            suggested_retry_time,
            cid: 0,
            interface_name: String::new(),
            addresses: Vec::new(),
            dns_addresses: Vec::new(),
            pcscf_addresses: Vec::new(),
            gateway_addresses: Vec::new(),
            mtu: 0,
            protocol: None,
        }
    }
}

/// NAT keepalive packet description forwarded to the modem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepalivePacket {
    pub source_address: IpAddr,
    pub source_port: u16,
    pub destination_address: IpAddr,
    pub destination_port: u16,
    pub payload: Vec<u8>,
}

/// Status of one modem-offloaded keepalive session.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum KeepaliveStatusCode {
    Active,
    Inactive,
    Pending,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct KeepaliveStatus {
    pub handle: KeepaliveHandle,
    pub code: KeepaliveStatusCode,
}

/// The radio data service executing long-running calls.
///
/// Every method is invoked off the event loop; its completion is posted back
/// to the state machine as an event carrying the request tag.
#[async_trait]
pub trait DataService: Send + Sync {
    async fn setup_data_call(
        &self,
        request: SetupDataCallRequest,
    ) -> (ResultCode, Option<DataCallResponse>);

    async fn deactivate_data_call(&self, cid: Cid, reason: RequestReason) -> ResultCode;

    async fn start_natt_keepalive(
        &self,
        cid: Cid,
        packet: KeepalivePacket,
        interval: Duration,
    ) -> Result<KeepaliveStatus, String>;

    async fn stop_natt_keepalive(&self, handle: KeepaliveHandle) -> Result<(), String>;
}

/// Snapshot of the radio service state the bearer derives link and
/// capability values from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceState {
    pub data_reg_state: DataRegState,
    pub rat: RadioTech,
    /// Roaming as exposed by the framework.
    pub data_roaming: bool,
    /// Roaming as seen by the modem registration, which can differ when the
    /// framework overrides the roaming presentation.
    pub modem_roaming: bool,
    pub nr_state: NrState,
    pub nr_frequency: NrFrequencyRange,
    pub carrier_aggregation: bool,
    /// Context ids currently anchored on an NR cell.
    pub nr_context_ids: Vec<Cid>,
}

impl Default for ServiceState {
    fn default() -> Self {
        ServiceState {
            data_reg_state: DataRegState::InService,
            rat: RadioTech::Unknown,
            data_roaming: false,
            modem_roaming: false,
            nr_state: NrState::None,
            nr_frequency: NrFrequencyRange::Unknown,
            carrier_aggregation: false,
            nr_context_ids: Vec::new(),
        }
    }
}

/// Live service and device state the bearer polls. Change notifications
/// still arrive as events; this trait answers the synchronous reads.
pub trait ServiceMonitor: Send + Sync {
    fn service_state(&self) -> ServiceState;

    /// False when voice and data cannot run concurrently on this radio.
    fn is_concurrent_voice_and_data_allowed(&self) -> bool;

    /// True when no voice call is in progress.
    fn is_voice_call_idle(&self) -> bool;

    fn is_data_enabled(&self) -> bool;

    fn is_data_roaming_enabled(&self) -> bool;

    /// True when the device is camped on an NR 5G Non-Standalone cell.
    fn is_nr_connected(&self) -> bool {
        self.service_state().nr_state == NrState::Connected
    }
}
