//! APN profiles and consumer contexts
//!
//! An [`ApnSetting`] is the provisioned profile for one access point. An
//! [`ApnContext`] is the handle one logical consumer holds while attached to
//! a bearer; several contexts can share a single bearer.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capabilities::NetCapability;
use crate::config::DataConfig;
use crate::types::{ApnTypes, RetryAdvice};

/// IP protocol requested for a PDN.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum ProtocolType {
    Ip,
    Ipv6,
    Ipv4v6,
}

/// Authentication scheme for PDN activation.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum AuthType {
    None,
    Pap,
    Chap,
    PapChap,
}

/// One provisioned APN profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApnSetting {
    /// Carrier-facing entry name.
    pub entry_name: String,
    /// The access point name sent to the network.
    pub apn_name: String,
    pub proxy_address: Option<String>,
    pub proxy_port: Option<u16>,
    /// MMS proxy, relevant to the DNS fallback sanity check.
    pub mms_proxy_address: Option<String>,
    /// Types this profile can serve.
    pub apn_type_bitmask: ApnTypes,
    /// Provisioned MTU; zero means unset.
    pub mtu: u32,
    pub protocol: ProtocolType,
    pub auth_type: AuthType,
}

impl ApnSetting {
    pub fn new(entry_name: &str, apn_name: &str, apn_type_bitmask: ApnTypes) -> Self {
        ApnSetting {
            entry_name: entry_name.to_string(),
            apn_name: apn_name.to_string(),
            proxy_address: None,
            proxy_port: None,
            mms_proxy_address: None,
            apn_type_bitmask,
            mtu: 0,
            protocol: ProtocolType::Ipv4v6,
            auth_type: AuthType::None,
        }
    }

    /// True when this profile covers every requested type.
    pub fn can_handle_type(&self, types: ApnTypes) -> bool {
        self.apn_type_bitmask.can_handle(types)
    }

    /// A profile is metered when any of its types is metered on this carrier.
    pub fn is_metered(&self, config: &DataConfig) -> bool {
        config.is_metered_apn_type(self.apn_type_bitmask)
    }
}

/// One network request attached to an APN context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequest {
    pub capabilities: Vec<NetCapability>,
    /// Subscription-binding specifier; `None` for unconstrained requests.
    pub network_specifier: Option<String>,
    /// True when the requester asked for a restricted network.
    pub restricted: bool,
}

impl NetworkRequest {
    pub fn internet() -> Self {
        NetworkRequest {
            capabilities: vec![NetCapability::Internet],
            network_specifier: None,
            restricted: false,
        }
    }

    pub fn with_specifier(mut self, specifier: &str) -> Self {
        self.network_specifier = Some(specifier.to_string());
        self
    }

    pub fn restricted(mut self) -> Self {
        self.restricted = true;
        self
    }

    pub fn has_capability(&self, capability: NetCapability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Stable identity of one APN context.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ApnContextId(Uuid);

struct ApnContextInner {
    id: ApnContextId,
    apn_type: ApnTypes,
    apn_setting: RwLock<Option<ApnSetting>>,
    requests: RwLock<Vec<NetworkRequest>>,
    modem_suggested_delay: Mutex<Option<RetryAdvice>>,
    reason: Mutex<Option<String>>,
}

/// Shared consumer handle for one APN type attachment.
///
/// Cloning is cheap; clones refer to the same context.
#[derive(Clone)]
pub struct ApnContext {
    inner: Arc<ApnContextInner>,
}

impl ApnContext {
    pub fn new(apn_type: ApnTypes, apn_setting: Option<ApnSetting>) -> Self {
        ApnContext {
            inner: Arc::new(ApnContextInner {
                id: ApnContextId(Uuid::new_v4()),
                apn_type,
                apn_setting: RwLock::new(apn_setting),
                requests: RwLock::new(Vec::new()),
                modem_suggested_delay: Mutex::new(None),
                reason: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> ApnContextId {
        self.inner.id
    }

    /// The APN type this context attaches for.
    pub fn apn_type(&self) -> ApnTypes {
        self.inner.apn_type
    }

    pub fn apn_setting(&self) -> Option<ApnSetting> {
        self.inner.apn_setting.read().unwrap().clone()
    }

    pub fn set_apn_setting(&self, setting: Option<ApnSetting>) {
        *self.inner.apn_setting.write().unwrap() = setting;
    }

    pub fn network_requests(&self) -> Vec<NetworkRequest> {
        self.inner.requests.read().unwrap().clone()
    }

    pub fn add_network_request(&self, request: NetworkRequest) {
        self.inner.requests.write().unwrap().push(request);
    }

    pub fn clear_network_requests(&self) {
        self.inner.requests.write().unwrap().clear();
    }

    /// True when any attached request is restricted. DUN requests can be
    /// excluded since tethering carries its own restriction handling.
    pub fn has_restricted_requests(&self, exclude_dun: bool) -> bool {
        self.inner.requests.read().unwrap().iter().any(|request| {
            request.restricted && !(exclude_dun && request.has_capability(NetCapability::Dun))
        })
    }

    /// Store the modem-suggested retry delay for the outer tracker.
    pub fn set_modem_suggested_delay(&self, advice: RetryAdvice) {
        *self.inner.modem_suggested_delay.lock().unwrap() = Some(advice);
    }

    pub fn modem_suggested_delay(&self) -> Option<RetryAdvice> {
        *self.inner.modem_suggested_delay.lock().unwrap()
    }

    pub fn set_reason(&self, reason: &str) {
        *self.inner.reason.lock().unwrap() = Some(reason.to_string());
    }

    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().unwrap().clone()
    }
}

impl PartialEq for ApnContext {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ApnContext {}

impl std::hash::Hash for ApnContext {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for ApnContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApnContext")
            .field("id", &self.inner.id)
            .field("apn_type", &self.inner.apn_type)
            .finish()
    }
}

impl fmt::Display for ApnContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApnContext[{}]", self.inner.apn_type)
    }
}
