//! Core value types shared across the crate
//!
//! Identity types, radio technology and transport enums, the APN type
//! bitmask, failure causes and the modem retry-delay decoding.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifier of one data connection (bearer) within a controller.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct DcId(pub u32);

impl fmt::Display for DcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DC-{}", self.0)
    }
}

/// Context id assigned by the modem. Unique across transports. `-1` while the
/// bearer is inactive.
pub type Cid = i32;

/// The cid value of a bearer with no active call.
pub const INVALID_CID: Cid = -1;

/// Subscription id sentinel for "not yet bound to a subscription".
pub const INVALID_SUBSCRIPTION_ID: i32 = -1;

/// Modem-assigned handle of one offloaded keepalive session.
pub type KeepaliveHandle = i32;

/// The radio transport a bearer is bound to.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Transport {
    /// Cellular radio access.
    Wwan,
    /// Cellular over Wi-Fi (IWLAN).
    Wlan,
}

impl Transport {
    /// The handover peer transport. Handover from WWAN goes to WLAN and vice
    /// versa.
    pub fn opposite(self) -> Transport {
        match self {
            Transport::Wwan => Transport::Wlan,
            Transport::Wlan => Transport::Wwan,
        }
    }

    /// One-letter tag used in bearer names ("C" cellular, "I" IWLAN).
    pub fn tag(self) -> &'static str {
        match self {
            Transport::Wwan => "C",
            Transport::Wlan => "I",
        }
    }
}

/// Radio access technology as reported by the radio layer.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum RadioTech {
    Unknown,
    Gprs,
    Edge,
    Umts,
    OneXRtt,
    Evdo0,
    EvdoA,
    EvdoB,
    Ehrpd,
    Hsdpa,
    Hsupa,
    Hspa,
    Hspap,
    Lte,
    LteCa,
    Nr,
}

impl RadioTech {
    /// Canonical name, matching the radio layer's spelling.
    pub fn name(self) -> &'static str {
        match self {
            RadioTech::Unknown => "Unknown",
            RadioTech::Gprs => "GPRS",
            RadioTech::Edge => "EDGE",
            RadioTech::Umts => "UMTS",
            RadioTech::OneXRtt => "1xRTT",
            RadioTech::Evdo0 => "EvDo-rev.0",
            RadioTech::EvdoA => "EvDo-revA",
            RadioTech::EvdoB => "EvDo-revB",
            RadioTech::Ehrpd => "eHRPD",
            RadioTech::Hsdpa => "HSDPA",
            RadioTech::Hsupa => "HSUPA",
            RadioTech::Hspa => "HSPA",
            RadioTech::Hspap => "HSPAP",
            RadioTech::Lte => "LTE",
            RadioTech::LteCa => "LTE_CA",
            RadioTech::Nr => "NR",
        }
    }

    pub fn is_evdo(self) -> bool {
        matches!(self, RadioTech::Evdo0 | RadioTech::EvdoA | RadioTech::EvdoB)
    }

    pub fn is_lte(self) -> bool {
        matches!(self, RadioTech::Lte | RadioTech::LteCa)
    }
}

impl fmt::Display for RadioTech {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Packet-data registration state.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum DataRegState {
    InService,
    OutOfService,
}

/// NR (5G) connection state relative to the serving LTE cell.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum NrState {
    None,
    Restricted,
    NotRestricted,
    Connected,
}

/// NR frequency range.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum NrFrequencyRange {
    Unknown,
    Low,
    Mid,
    High,
    Mmwave,
}

// ===== APN types =====

/// Bitmask of APN types an APN profile can serve.
#[derive(Debug, Clone, Copy, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ApnTypes(pub u32);

impl ApnTypes {
    pub const NONE: ApnTypes = ApnTypes(0);
    pub const DEFAULT: ApnTypes = ApnTypes(1 << 0);
    pub const MMS: ApnTypes = ApnTypes(1 << 1);
    pub const SUPL: ApnTypes = ApnTypes(1 << 2);
    pub const DUN: ApnTypes = ApnTypes(1 << 3);
    pub const FOTA: ApnTypes = ApnTypes(1 << 4);
    pub const IMS: ApnTypes = ApnTypes(1 << 5);
    pub const CBS: ApnTypes = ApnTypes(1 << 6);
    pub const IA: ApnTypes = ApnTypes(1 << 7);
    pub const EMERGENCY: ApnTypes = ApnTypes(1 << 8);
    pub const MCX: ApnTypes = ApnTypes(1 << 9);

    /// The "*" profile: everything except emergency and mission-critical.
    pub const ALL: ApnTypes = ApnTypes(
        Self::DEFAULT.0
            | Self::MMS.0
            | Self::SUPL.0
            | Self::DUN.0
            | Self::FOTA.0
            | Self::IMS.0
            | Self::CBS.0
            | Self::IA.0,
    );

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is covered by this mask.
    pub fn can_handle(self, other: ApnTypes) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when the two masks share at least one type.
    pub fn intersects(self, other: ApnTypes) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(self, other: ApnTypes) -> ApnTypes {
        ApnTypes(self.0 | other.0)
    }

    pub fn difference(self, other: ApnTypes) -> ApnTypes {
        ApnTypes(self.0 & !other.0)
    }

    /// Iterate the individual type bits present in this mask.
    pub fn iter(self) -> impl Iterator<Item = ApnTypes> {
        const BITS: [ApnTypes; 10] = [
            ApnTypes::DEFAULT,
            ApnTypes::MMS,
            ApnTypes::SUPL,
            ApnTypes::DUN,
            ApnTypes::FOTA,
            ApnTypes::IMS,
            ApnTypes::CBS,
            ApnTypes::IA,
            ApnTypes::EMERGENCY,
            ApnTypes::MCX,
        ];
        BITS.into_iter().filter(move |bit| self.intersects(*bit))
    }

    pub fn name(self) -> &'static str {
        match self {
            ApnTypes::DEFAULT => "default",
            ApnTypes::MMS => "mms",
            ApnTypes::SUPL => "supl",
            ApnTypes::DUN => "dun",
            ApnTypes::FOTA => "fota",
            ApnTypes::IMS => "ims",
            ApnTypes::CBS => "cbs",
            ApnTypes::IA => "ia",
            ApnTypes::EMERGENCY => "emergency",
            ApnTypes::MCX => "mcx",
            ApnTypes::ALL => "*",
            _ => "mixed",
        }
    }
}

impl fmt::Display for ApnTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|t| t.name()).collect();
        write!(f, "{}", names.join(","))
    }
}

// ===== Failure causes =====

/// Failure kinds visible to bring-up and tear-down callers.
///
/// Modem-reported causes that this layer does not interpret are carried
/// through as [`FailCause::Modem`]; the outer tracker maps those to
/// permanent or transient.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum FailCause {
    None,
    RadioNotAvailable,
    UnacceptableNetworkParameter,
    HandoverFailed,
    LostConnection,
    Unknown,
    /// Data-service specific cause code reported by the modem.
    Modem(i32),
}

impl FailCause {
    pub fn is_failure(self) -> bool {
        self != FailCause::None
    }

    /// PDP reject causes for which retained settings allow a fast retry
    /// (authentication failure, option not subscribed, duplicate PDN).
    pub fn is_pdp_reject(self) -> bool {
        matches!(self, FailCause::Modem(29) | FailCause::Modem(33) | FailCause::Modem(55))
    }
}

impl fmt::Display for FailCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailCause::None => write!(f, "NONE"),
            FailCause::RadioNotAvailable => write!(f, "RADIO_NOT_AVAILABLE"),
            FailCause::UnacceptableNetworkParameter => {
                write!(f, "UNACCEPTABLE_NETWORK_PARAMETER")
            }
            FailCause::HandoverFailed => write!(f, "HANDOVER_FAILED"),
            FailCause::LostConnection => write!(f, "LOST_CONNECTION"),
            FailCause::Unknown => write!(f, "UNKNOWN"),
            FailCause::Modem(code) => write!(f, "MODEM_ERROR_{}", code),
        }
    }
}

/// Classification of a setup-data-call completion.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SetupResult {
    Success,
    ErrorRadioNotAvailable,
    ErrorInvalidArg,
    ErrorStale,
    ErrorDataServiceSpecific(FailCause),
}

impl SetupResult {
    pub fn fail_cause(self) -> FailCause {
        match self {
            SetupResult::Success => FailCause::None,
            SetupResult::ErrorRadioNotAvailable => FailCause::RadioNotAvailable,
            SetupResult::ErrorInvalidArg => FailCause::UnacceptableNetworkParameter,
            SetupResult::ErrorStale => FailCause::None,
            SetupResult::ErrorDataServiceSpecific(cause) => cause,
        }
    }
}

// ===== Retry delay =====

/// Decoded modem retry suggestion from a failed setup.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RetryAdvice {
    /// The modem made no suggestion; the outer tracker applies its own policy.
    NoSuggestion,
    /// The modem asked for this APN to not be retried.
    DontRetry,
    /// Retry after the given delay. Zero means retry as soon as possible.
    After(Duration),
}

/// Decode the raw suggested-retry-time field of a call setup response.
///
/// Values below zero mean no suggestion, `i32::MAX` means do not retry, and
/// everything else is a delay in milliseconds.
pub fn decode_suggested_retry(raw: i32) -> RetryAdvice {
    if raw < 0 {
        RetryAdvice::NoSuggestion
    } else if raw == i32::MAX {
        RetryAdvice::DontRetry
    } else {
        RetryAdvice::After(Duration::from_millis(raw as u64))
    }
}

// ===== Handover =====

/// Handover progress of a *source* bearer. A handover destination observes
/// `Idle` throughout.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum HandoverState {
    Idle,
    BeingTransferred,
    Completed,
}

impl HandoverState {
    /// Wire value reported to observers.
    pub fn wire_value(self) -> u8 {
        match self {
            HandoverState::Idle => 1,
            HandoverState::BeingTransferred => 2,
            HandoverState::Completed => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HandoverState::Idle => "IDLE",
            HandoverState::BeingTransferred => "BEING_TRANSFERRED",
            HandoverState::Completed => "COMPLETED",
        }
    }
}

// ===== Requests =====

/// Why a bring-up was requested.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum RequestType {
    Normal,
    Handover,
}

/// Why a release was requested.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum ReleaseType {
    Normal,
    Detach,
    Handover,
}

// ===== Policy overrides =====

/// Subscription policy override: force the bearer to be exposed unmetered.
pub const OVERRIDE_UNMETERED: u32 = 1 << 0;
/// Subscription policy override: expose the bearer as congested.
pub const OVERRIDE_CONGESTED: u32 = 1 << 1;

// ===== Link capacity =====

/// Bandwidth estimate pushed by the modem.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct LinkCapacityEstimate {
    /// Downlink capacity in kbps, `None` when the modem reported invalid.
    pub downlink_kbps: Option<u32>,
    /// Uplink capacity in kbps, `None` when the modem reported invalid.
    pub uplink_kbps: Option<u32>,
}

// ===== Disconnect reasons =====

/// Reason strings that map a normal release to a shutdown deactivation.
pub const REASON_RADIO_TURNED_OFF: &str = "radioTurnedOff";
pub const REASON_PDP_RESET: &str = "pdpReset";
/// Reason broadcast to consumers when setup completes.
pub const REASON_CONNECTED: &str = "connected";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apn_type_covering() {
        assert!(ApnTypes::ALL.can_handle(ApnTypes::DEFAULT));
        assert!(ApnTypes::ALL.can_handle(ApnTypes::IMS));
        assert!(!ApnTypes::ALL.can_handle(ApnTypes::EMERGENCY));
        assert!(!ApnTypes::ALL.can_handle(ApnTypes::MCX));

        let ims_default = ApnTypes::IMS.union(ApnTypes::DEFAULT);
        assert!(ims_default.can_handle(ApnTypes::IMS));
        assert!(!ims_default.can_handle(ApnTypes::MMS));
        assert_eq!(ims_default.difference(ApnTypes::IMS), ApnTypes::DEFAULT);
    }

    #[test]
    fn apn_type_names() {
        assert_eq!(ApnTypes::DEFAULT.name(), "default");
        assert_eq!(ApnTypes::ALL.name(), "*");
        let both = ApnTypes::DEFAULT.union(ApnTypes::SUPL);
        assert_eq!(both.to_string(), "default,supl");
    }

    #[test]
    fn retry_decode() {
        assert_eq!(decode_suggested_retry(-1), RetryAdvice::NoSuggestion);
        assert_eq!(decode_suggested_retry(-2), RetryAdvice::NoSuggestion);
        assert_eq!(decode_suggested_retry(i32::MAX), RetryAdvice::DontRetry);
        assert_eq!(
            decode_suggested_retry(0),
            RetryAdvice::After(Duration::from_millis(0))
        );
        assert_eq!(
            decode_suggested_retry(4500),
            RetryAdvice::After(Duration::from_millis(4500))
        );
    }

    #[test]
    fn pdp_reject_causes() {
        assert!(FailCause::Modem(29).is_pdp_reject());
        assert!(FailCause::Modem(33).is_pdp_reject());
        assert!(FailCause::Modem(55).is_pdp_reject());
        assert!(!FailCause::Modem(26).is_pdp_reject());
        assert!(!FailCause::LostConnection.is_pdp_reject());
    }

    #[test]
    fn handover_wire_values() {
        assert_eq!(HandoverState::Idle.wire_value(), 1);
        assert_eq!(HandoverState::BeingTransferred.wire_value(), 2);
        assert_eq!(HandoverState::Completed.wire_value(), 3);
    }

    #[test]
    fn transport_opposite() {
        assert_eq!(Transport::Wwan.opposite(), Transport::Wlan);
        assert_eq!(Transport::Wlan.opposite(), Transport::Wwan);
    }
}
