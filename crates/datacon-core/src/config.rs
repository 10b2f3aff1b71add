//! Platform and carrier configuration
//!
//! Everything the controller reads from device or carrier configuration is
//! collected here so embedders can supply it in one place.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{ApnTypes, Transport};

/// Where capability bandwidth values come from.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum BandwidthSource {
    /// Static per-RAT carrier table only.
    Carrier,
    /// Modem link-capacity estimates override the table while active.
    Modem,
}

/// Platform configuration for one controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// MTU applied when neither the call response nor the APN supplies one.
    /// Zero means leave unset.
    pub default_mtu: u32,

    /// APN types considered metered on this carrier.
    pub metered_apn_types: ApnTypes,

    /// TCP buffer overrides, entries of the form
    /// `"ratname:rmin,rdef,rmax,wmin,wdef,wmax"`.
    pub tcp_buffer_overrides: Vec<String>,

    /// Static (downstream, upstream) kbps per radio technology name.
    pub link_bandwidths: HashMap<String, (u32, u32)>,

    /// Source of capability bandwidth values.
    pub bandwidth_source: BandwidthSource,

    /// Keep bearer settings across Inactive entry for PDP reject causes so a
    /// retry can reuse them.
    pub pdp_reject_retention: bool,

    /// System fallback DNS servers used when the modem response carries none.
    pub fallback_dns: Vec<String>,

    /// Skip the zero-DNS sanity check on the fallback pair.
    pub dns_check_disabled: bool,

    /// APN types the carrier disallows on the cellular transport.
    pub disallowed_apn_types_wwan: ApnTypes,

    /// APN types the carrier disallows on the IWLAN transport.
    pub disallowed_apn_types_wlan: ApnTypes,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            default_mtu: 0,
            metered_apn_types: ApnTypes::DEFAULT
                .union(ApnTypes::MMS)
                .union(ApnTypes::SUPL)
                .union(ApnTypes::DUN),
            tcp_buffer_overrides: Vec::new(),
            link_bandwidths: default_link_bandwidths(),
            bandwidth_source: BandwidthSource::Carrier,
            pdp_reject_retention: false,
            fallback_dns: Vec::new(),
            dns_check_disabled: false,
            disallowed_apn_types_wwan: ApnTypes::NONE,
            disallowed_apn_types_wlan: ApnTypes::NONE,
        }
    }
}

impl DataConfig {
    /// APN types the carrier disallows on the given transport.
    pub fn disallowed_apn_types(&self, transport: Transport) -> ApnTypes {
        match transport {
            Transport::Wwan => self.disallowed_apn_types_wwan,
            Transport::Wlan => self.disallowed_apn_types_wlan,
        }
    }

    /// True when the given mask contains at least one metered type.
    pub fn is_metered_apn_type(&self, types: ApnTypes) -> bool {
        self.metered_apn_types.intersects(types)
    }
}

/// Built-in (downstream, upstream) kbps table keyed by radio technology name.
/// `NR_NSA` and `NR_NSA_MMWAVE` key the 5G-over-LTE cases.
fn default_link_bandwidths() -> HashMap<String, (u32, u32)> {
    [
        ("GPRS", (24, 24)),
        ("EDGE", (18, 23)),
        ("UMTS", (115, 115)),
        ("1xRTT", (30, 30)),
        ("EvDo-rev.0", (750, 48)),
        ("EvDo-revA", (950, 550)),
        ("EvDo-revB", (1500, 550)),
        ("eHRPD", (750, 48)),
        ("HSDPA", (4300, 620)),
        ("HSUPA", (4300, 1800)),
        ("HSPA", (4300, 1800)),
        ("HSPAP", (13000, 3400)),
        ("LTE", (30000, 15000)),
        ("LTE_CA", (48000, 25000)),
        ("NR", (145000, 60000)),
        ("NR_NSA", (47000, 18000)),
        ("NR_NSA_MMWAVE", (145000, 60000)),
    ]
    .into_iter()
    .map(|(name, v)| (name.to_string(), v))
    .collect()
}
