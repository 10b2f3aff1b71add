//! Event taxonomy of the connection state machine
//!
//! Everything a bearer reacts to arrives as one [`ConnectionEvent`] on the
//! shared controller loop. Async driver replies carry the tag they were
//! stamped with at request time; replies with a stale tag are discarded.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::apn::ApnContext;
use crate::radio::{DataCallResponse, KeepalivePacket, KeepaliveStatus, ResultCode};
use crate::types::{
    Cid, FailCause, KeepaliveHandle, LinkCapacityEstimate, RadioTech, ReleaseType, RequestType,
};

/// One-shot completion callback that can be shared between the consumer map
/// and the pending-request slot but fires at most once.
pub struct Completion<T> {
    sender: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Completion {
            sender: self.sender.clone(),
        }
    }
}

impl<T> Completion<T> {
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Completion {
                sender: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// A completion nobody is waiting on.
    pub fn discard() -> Self {
        Completion {
            sender: Arc::new(Mutex::new(None)),
        }
    }

    /// Resolve the completion. Returns false when it already fired or the
    /// receiver is gone.
    pub fn complete(&self, value: T) -> bool {
        match self.sender.lock().unwrap().take() {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self.sender.lock().unwrap().is_some();
        write!(f, "Completion{{pending={}}}", pending)
    }
}

/// Outcome delivered to the requester of a bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionCompleted {
    pub cause: FailCause,
    pub cid: Cid,
    pub request_type: RequestType,
}

/// Parameters of one consumer attachment, saved per APN context.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Stamped by init_connection; stale replies are detected against it.
    pub tag: u32,
    pub apn_context: ApnContext,
    pub profile_id: i32,
    pub rat: RadioTech,
    pub on_completed: Completion<ConnectionCompleted>,
    pub generation: u32,
    pub request_type: RequestType,
    pub sub_id: i32,
    pub apn_preferred: bool,
}

/// Parameters of one disconnect request.
#[derive(Debug, Clone)]
pub struct DisconnectParams {
    /// Stamped when the teardown is issued.
    pub tag: u32,
    /// `None` for tear-down-all.
    pub apn_context: Option<ApnContext>,
    pub reason: String,
    pub release_type: ReleaseType,
    pub on_completed: Completion<()>,
}

/// Events driving the state machine.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Bring up the bearer (or attach an additional consumer).
    Connect(ConnectionParams),
    /// Reply to a setup-data-call request.
    SetupDataCallDone {
        tag: u32,
        result: ResultCode,
        response: Option<DataCallResponse>,
    },
    /// Reply to a deactivate request.
    DeactivateDone { tag: u32 },
    Disconnect(DisconnectParams),
    DisconnectAll(DisconnectParams),
    /// Fire a deactivation without waiting for any reply.
    TearDownNow,
    /// The active call vanished underneath us.
    LostConnection,
    /// Data registration state or radio technology changed.
    DrsOrRatChanged,
    RoamOn,
    RoamOff,
    NrStateChanged,
    NrFrequencyChanged,
    VoiceCallStarted,
    VoiceCallEnded,
    /// The policy layer flipped the unmetered override.
    MeterednessChanged(bool),
    /// Subscription policy override bits changed; mask selects the bits to
    /// rewrite with `value`.
    SubscriptionOverrideChanged { mask: u32, value: u32 },
    BwRefreshResponse(Result<LinkCapacityEstimate, String>),
    LinkCapacityChanged(LinkCapacityEstimate),
    KeepaliveStartRequest {
        slot: i32,
        packet: KeepalivePacket,
        interval_ms: u32,
    },
    KeepaliveStopRequest { slot: i32 },
    KeepaliveStarted {
        slot: i32,
        result: Result<KeepaliveStatus, String>,
    },
    KeepaliveStatus(KeepaliveStatus),
    KeepaliveStopped {
        handle: KeepaliveHandle,
        slot: i32,
        result: Result<(), String>,
    },
    Reset,
    ReevaluateRestrictedState,
    ReevaluateDataConnectionProperties,
    /// Re-attempt setup with the retained connection parameters.
    RetryConnection,
}

impl ConnectionEvent {
    /// Event name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::Connect(_) => "CONNECT",
            ConnectionEvent::SetupDataCallDone { .. } => "SETUP_DATA_CONNECTION_DONE",
            ConnectionEvent::DeactivateDone { .. } => "DEACTIVATE_DONE",
            ConnectionEvent::Disconnect(_) => "DISCONNECT",
            ConnectionEvent::DisconnectAll(_) => "DISCONNECT_ALL",
            ConnectionEvent::TearDownNow => "TEAR_DOWN_NOW",
            ConnectionEvent::LostConnection => "LOST_CONNECTION",
            ConnectionEvent::DrsOrRatChanged => "DRS_OR_RAT_CHANGED",
            ConnectionEvent::RoamOn => "ROAM_ON",
            ConnectionEvent::RoamOff => "ROAM_OFF",
            ConnectionEvent::NrStateChanged => "NR_STATE_CHANGED",
            ConnectionEvent::NrFrequencyChanged => "NR_FREQUENCY_CHANGED",
            ConnectionEvent::VoiceCallStarted => "VOICE_CALL_STARTED",
            ConnectionEvent::VoiceCallEnded => "VOICE_CALL_ENDED",
            ConnectionEvent::MeterednessChanged(_) => "METEREDNESS_CHANGED",
            ConnectionEvent::SubscriptionOverrideChanged { .. } => "OVERRIDE_CHANGED",
            ConnectionEvent::BwRefreshResponse(_) => "BW_REFRESH_RESPONSE",
            ConnectionEvent::LinkCapacityChanged(_) => "LINK_CAPACITY_CHANGED",
            ConnectionEvent::KeepaliveStartRequest { .. } => "KEEPALIVE_START_REQUEST",
            ConnectionEvent::KeepaliveStopRequest { .. } => "KEEPALIVE_STOP_REQUEST",
            ConnectionEvent::KeepaliveStarted { .. } => "KEEPALIVE_STARTED",
            ConnectionEvent::KeepaliveStatus(_) => "KEEPALIVE_STATUS",
            ConnectionEvent::KeepaliveStopped { .. } => "KEEPALIVE_STOPPED",
            ConnectionEvent::Reset => "RESET",
            ConnectionEvent::ReevaluateRestrictedState => "REEVALUATE_RESTRICTED_STATE",
            ConnectionEvent::ReevaluateDataConnectionProperties => {
                "REEVALUATE_DATA_CONNECTION_PROPERTIES"
            }
            ConnectionEvent::RetryConnection => "RETRY_CONNECTION",
        }
    }
}

/// Broadcast notifications to the outer tracker covering consumers beyond
/// the one whose completion resolved the request.
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    DataSetupComplete {
        apn_context: ApnContext,
        generation: u32,
        request_type: RequestType,
        cid: Cid,
        reason: String,
    },
    DataSetupError {
        apn_context: ApnContext,
        generation: u32,
        request_type: RequestType,
        cid: Cid,
        reason: String,
    },
    DisconnectDone {
        apn_context: ApnContext,
        generation: u32,
        request_type: RequestType,
        cid: Cid,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completion_fires_once() {
        let (completion, rx) = Completion::new();
        let clone = completion.clone();
        assert!(clone.complete(1u32));
        assert!(!completion.complete(2u32));
        assert_eq!(rx.await.unwrap(), 1);
    }

    #[test]
    fn discarded_completion_swallows() {
        let completion: Completion<u32> = Completion::discard();
        assert!(!completion.complete(7));
    }
}
