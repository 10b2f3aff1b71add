//! datacon-core
//!
//! Per-session cellular data connection controller. Each
//! [`DataConnectionHandle`] fronts one bearer: an event-driven state machine
//! that brings up, maintains, hands over and tears down a single packet-data
//! session on a WWAN or IWLAN transport. All bearers of one modem share one
//! [`DcController`] event loop.
//!
//! The lower radio driver and the upstream connectivity layer are trait
//! seams ([`DataService`], [`ServiceMonitor`], [`ConnectivitySink`]); the
//! crate contains no radio or IP stack code of its own. Everything logs
//! through `tracing`; installing a subscriber is the embedder's concern.

pub mod agent;
pub mod apn;
pub mod bearer;
pub mod capabilities;
pub mod config;
pub mod controller;
pub mod errors;
pub mod events;
pub mod link_properties;
pub mod radio;
pub mod store;
pub mod tcp_buffers;
pub mod types;

pub use agent::{ConnectivitySink, DetailedState, KeepaliveEventStatus, NetworkAgent, NetworkInfo};
pub use apn::{ApnContext, ApnContextId, ApnSetting, AuthType, NetworkRequest, ProtocolType};
pub use bearer::ConnectionState;
pub use capabilities::{AgentTransport, NetCapability, NetworkCapabilities};
pub use config::{BandwidthSource, DataConfig};
pub use controller::{DataConnectionHandle, DcController, DcMessage};
pub use errors::{DataConnectionError, Result};
pub use events::{
    Completion, ConnectionCompleted, ConnectionEvent, ConnectionParams, DisconnectParams,
    TrackerEvent,
};
pub use link_properties::{LinkAddress, LinkProperties, ProxyInfo, RouteInfo};
pub use radio::{
    DataCallResponse, DataProfile, DataService, KeepalivePacket, KeepaliveStatus,
    KeepaliveStatusCode, RequestReason, ResultCode, ServiceMonitor, ServiceState,
    SetupDataCallRequest,
};
pub use store::{BearerSnapshot, BearerStore};
pub use types::{
    decode_suggested_retry, ApnTypes, Cid, DataRegState, DcId, FailCause, HandoverState,
    KeepaliveHandle, LinkCapacityEstimate, NrFrequencyRange, NrState, RadioTech, ReleaseType,
    RequestType, RetryAdvice, SetupResult, Transport, INVALID_CID, INVALID_SUBSCRIPTION_ID,
    OVERRIDE_CONGESTED, OVERRIDE_UNMETERED, REASON_CONNECTED, REASON_PDP_RESET,
    REASON_RADIO_TURNED_OFF,
};
