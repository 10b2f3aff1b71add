//! Network capability synthesis
//!
//! Derives the capability set exposed upstream from the APN type bitmask,
//! the policy overrides and the current service state. The synthesis is a
//! pure function of its inputs so re-evaluation is idempotent.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::apn::ApnSetting;
use crate::config::DataConfig;
use crate::types::{ApnTypes, RadioTech, OVERRIDE_CONGESTED, OVERRIDE_UNMETERED};

/// Capabilities a bearer can expose to the connectivity layer.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum NetCapability {
    Internet,
    Mms,
    Supl,
    Dun,
    Fota,
    Ims,
    Cbs,
    Ia,
    Eims,
    Mcx,
    NotMetered,
    NotRestricted,
    NotRoaming,
    NotCongested,
}

/// Transport kinds visible to the connectivity layer. Every bearer of this
/// controller is cellular, whether the underlying radio is WWAN or IWLAN.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum AgentTransport {
    Cellular,
}

/// The capability set plus bandwidths and the subscription specifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCapabilities {
    transports: BTreeSet<AgentTransport>,
    capabilities: BTreeSet<NetCapability>,
    pub network_specifier: Option<String>,
    pub link_downstream_bandwidth_kbps: u32,
    pub link_upstream_bandwidth_kbps: u32,
}

impl NetworkCapabilities {
    pub fn new() -> Self {
        let mut capabilities = BTreeSet::new();
        // Networks start unrestricted; restriction is only ever applied, the
        // upstream contract forbids granting it back dynamically.
        capabilities.insert(NetCapability::NotRestricted);
        NetworkCapabilities {
            transports: BTreeSet::new(),
            capabilities,
            network_specifier: None,
            link_downstream_bandwidth_kbps: 0,
            link_upstream_bandwidth_kbps: 0,
        }
    }

    pub fn add_transport(&mut self, transport: AgentTransport) {
        self.transports.insert(transport);
    }

    pub fn has_transport(&self, transport: AgentTransport) -> bool {
        self.transports.contains(&transport)
    }

    pub fn add_capability(&mut self, capability: NetCapability) {
        self.capabilities.insert(capability);
    }

    pub fn remove_capability(&mut self, capability: NetCapability) {
        self.capabilities.remove(&capability);
    }

    pub fn set_capability(&mut self, capability: NetCapability, present: bool) {
        if present {
            self.add_capability(capability);
        } else {
            self.remove_capability(capability);
        }
    }

    pub fn has_capability(&self, capability: NetCapability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn capabilities(&self) -> impl Iterator<Item = NetCapability> + '_ {
        self.capabilities.iter().copied()
    }

    /// Remove `NotRestricted` when only restricted-use capabilities are
    /// present (no internet, MMS or SUPL service).
    pub fn maybe_mark_capabilities_restricted(&mut self) {
        let has_unrestricted = self.has_capability(NetCapability::Internet)
            || self.has_capability(NetCapability::Mms)
            || self.has_capability(NetCapability::Supl);
        if !has_unrestricted {
            self.remove_capability(NetCapability::NotRestricted);
        }
    }
}

impl Default for NetworkCapabilities {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NetworkCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.capabilities.iter().map(|c| format!("{:?}", c)).collect();
        write!(
            f,
            "[{} bw={}↓/{}↑]",
            names.join("|"),
            self.link_downstream_bandwidth_kbps,
            self.link_upstream_bandwidth_kbps
        )
    }
}

/// Inputs to one capability synthesis pass.
pub struct CapabilityInputs<'a> {
    pub apn_setting: Option<&'a ApnSetting>,
    pub disabled_apn_types: ApnTypes,
    pub restricted_override: bool,
    pub unmetered_use_only: bool,
    pub unmetered_override: bool,
    pub subscription_override: u32,
    pub data_roaming: bool,
    pub sub_id: i32,
    pub rat: RadioTech,
    pub nr_connected: bool,
    pub nr_mmwave: bool,
    pub config: &'a DataConfig,
}

/// Derive the exposed capability set.
pub fn synthesize_capabilities(inputs: &CapabilityInputs<'_>) -> NetworkCapabilities {
    let mut result = NetworkCapabilities::new();
    result.add_transport(AgentTransport::Cellular);

    if let Some(apn) = inputs.apn_setting {
        let types = apn.apn_type_bitmask.difference(inputs.disabled_apn_types);
        for apn_type in types.iter() {
            if !inputs.restricted_override
                && inputs.unmetered_use_only
                && inputs.config.is_metered_apn_type(apn_type)
            {
                debug!(
                    "Dropped the metered {} type for the unmetered data call",
                    apn_type.name()
                );
                continue;
            }
            match apn_type {
                ApnTypes::DEFAULT => result.add_capability(NetCapability::Internet),
                ApnTypes::MMS => result.add_capability(NetCapability::Mms),
                ApnTypes::SUPL => result.add_capability(NetCapability::Supl),
                ApnTypes::DUN => result.add_capability(NetCapability::Dun),
                ApnTypes::FOTA => result.add_capability(NetCapability::Fota),
                ApnTypes::IMS => result.add_capability(NetCapability::Ims),
                ApnTypes::CBS => result.add_capability(NetCapability::Cbs),
                ApnTypes::IA => result.add_capability(NetCapability::Ia),
                ApnTypes::EMERGENCY => result.add_capability(NetCapability::Eims),
                ApnTypes::MCX => result.add_capability(NetCapability::Mcx),
                _ => {}
            }
        }

        // Unmetered when every type of the profile is unmetered, or when the
        // bearer was established for unmetered use only.
        let not_metered = (inputs.unmetered_use_only && !inputs.restricted_override)
            || !apn.is_metered(inputs.config);
        result.set_capability(NetCapability::NotMetered, not_metered);

        result.maybe_mark_capabilities_restricted();
    }

    if inputs.restricted_override {
        result.remove_capability(NetCapability::NotRestricted);
        // Tethering is not offered on restriction-overridden networks.
        result.remove_capability(NetCapability::Dun);
    }

    update_link_bandwidths(&mut result, inputs);

    result.network_specifier = Some(inputs.sub_id.to_string());

    result.set_capability(NetCapability::NotRoaming, !inputs.data_roaming);
    result.add_capability(NetCapability::NotCongested);

    // Policy overrides win over everything derived above.
    if inputs.subscription_override & OVERRIDE_UNMETERED != 0 {
        result.add_capability(NetCapability::NotMetered);
    }
    if inputs.subscription_override & OVERRIDE_CONGESTED != 0 {
        result.remove_capability(NetCapability::NotCongested);
    }
    if inputs.unmetered_override {
        result.add_capability(NetCapability::NotMetered);
    }

    result
}

/// Bandwidth lookup by technology name, with the 5G NSA override when an LTE
/// bearer rides an NR-connected cell.
fn update_link_bandwidths(result: &mut NetworkCapabilities, inputs: &CapabilityInputs<'_>) {
    let rat_name = if inputs.rat == RadioTech::Lte && inputs.nr_connected {
        if inputs.nr_mmwave {
            "NR_NSA_MMWAVE".to_string()
        } else {
            "NR_NSA".to_string()
        }
    } else {
        inputs.rat.name().to_string()
    };

    debug!("update_link_bandwidths: {}", rat_name);
    let (down, up) = inputs
        .config
        .link_bandwidths
        .get(&rat_name)
        .copied()
        .unwrap_or((14, 14));
    result.link_downstream_bandwidth_kbps = down;
    result.link_upstream_bandwidth_kbps = up;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs_for<'a>(apn: &'a ApnSetting, config: &'a DataConfig) -> CapabilityInputs<'a> {
        CapabilityInputs {
            apn_setting: Some(apn),
            disabled_apn_types: ApnTypes::NONE,
            restricted_override: false,
            unmetered_use_only: false,
            unmetered_override: false,
            subscription_override: 0,
            data_roaming: false,
            sub_id: 1,
            rat: RadioTech::Lte,
            nr_connected: false,
            nr_mmwave: false,
            config,
        }
    }

    #[test]
    fn default_apn_exposes_internet() {
        let apn = ApnSetting::new("carrier", "internet", ApnTypes::DEFAULT);
        let config = DataConfig::default();
        let nc = synthesize_capabilities(&inputs_for(&apn, &config));

        assert!(nc.has_transport(AgentTransport::Cellular));
        assert!(nc.has_capability(NetCapability::Internet));
        assert!(nc.has_capability(NetCapability::NotRestricted));
        assert!(nc.has_capability(NetCapability::NotRoaming));
        assert!(nc.has_capability(NetCapability::NotCongested));
        assert!(!nc.has_capability(NetCapability::NotMetered));
        assert_eq!(nc.network_specifier.as_deref(), Some("1"));
    }

    #[test]
    fn all_apn_exposes_full_set() {
        let apn = ApnSetting::new("carrier", "internet", ApnTypes::ALL);
        let config = DataConfig::default();
        let nc = synthesize_capabilities(&inputs_for(&apn, &config));
        for capability in [
            NetCapability::Internet,
            NetCapability::Mms,
            NetCapability::Supl,
            NetCapability::Dun,
            NetCapability::Fota,
            NetCapability::Ims,
            NetCapability::Cbs,
            NetCapability::Ia,
        ] {
            assert!(nc.has_capability(capability), "missing {:?}", capability);
        }
        assert!(!nc.has_capability(NetCapability::Eims));
    }

    #[test]
    fn ims_only_apn_is_restricted_and_unmetered() {
        let apn = ApnSetting::new("carrier-ims", "ims", ApnTypes::IMS);
        let config = DataConfig::default();
        let nc = synthesize_capabilities(&inputs_for(&apn, &config));
        assert!(nc.has_capability(NetCapability::Ims));
        assert!(!nc.has_capability(NetCapability::NotRestricted));
        assert!(nc.has_capability(NetCapability::NotMetered));
    }

    #[test]
    fn restricted_override_strips_not_restricted_and_dun() {
        let apn = ApnSetting::new("carrier", "internet", ApnTypes::ALL);
        let config = DataConfig::default();
        let mut inputs = inputs_for(&apn, &config);
        inputs.restricted_override = true;
        let nc = synthesize_capabilities(&inputs);
        assert!(!nc.has_capability(NetCapability::NotRestricted));
        assert!(!nc.has_capability(NetCapability::Dun));
        assert!(nc.has_capability(NetCapability::Internet));
    }

    #[test]
    fn roaming_clears_not_roaming() {
        let apn = ApnSetting::new("carrier", "internet", ApnTypes::DEFAULT);
        let config = DataConfig::default();
        let mut inputs = inputs_for(&apn, &config);
        inputs.data_roaming = true;
        let nc = synthesize_capabilities(&inputs);
        assert!(!nc.has_capability(NetCapability::NotRoaming));
    }

    #[test]
    fn policy_overrides_win() {
        let apn = ApnSetting::new("carrier", "internet", ApnTypes::DEFAULT);
        let config = DataConfig::default();
        let mut inputs = inputs_for(&apn, &config);
        inputs.subscription_override = OVERRIDE_UNMETERED | OVERRIDE_CONGESTED;
        let nc = synthesize_capabilities(&inputs);
        assert!(nc.has_capability(NetCapability::NotMetered));
        assert!(!nc.has_capability(NetCapability::NotCongested));
    }

    #[test]
    fn unmetered_use_only_drops_metered_types() {
        let apn = ApnSetting::new("carrier", "internet", ApnTypes::ALL);
        let config = DataConfig::default();
        let mut inputs = inputs_for(&apn, &config);
        inputs.unmetered_use_only = true;
        let nc = synthesize_capabilities(&inputs);
        // Metered types (default, mms, supl, dun) are dropped, IMS survives.
        assert!(!nc.has_capability(NetCapability::Internet));
        assert!(!nc.has_capability(NetCapability::Mms));
        assert!(nc.has_capability(NetCapability::Ims));
        assert!(nc.has_capability(NetCapability::NotMetered));
    }

    #[test]
    fn bandwidths_follow_rat_with_nsa_override() {
        let apn = ApnSetting::new("carrier", "internet", ApnTypes::DEFAULT);
        let config = DataConfig::default();

        let nc = synthesize_capabilities(&inputs_for(&apn, &config));
        assert_eq!(
            (nc.link_downstream_bandwidth_kbps, nc.link_upstream_bandwidth_kbps),
            config.link_bandwidths["LTE"]
        );

        let mut inputs = inputs_for(&apn, &config);
        inputs.nr_connected = true;
        let nc = synthesize_capabilities(&inputs);
        assert_eq!(
            (nc.link_downstream_bandwidth_kbps, nc.link_upstream_bandwidth_kbps),
            config.link_bandwidths["NR_NSA"]
        );

        inputs.nr_mmwave = true;
        let nc = synthesize_capabilities(&inputs);
        assert_eq!(
            (nc.link_downstream_bandwidth_kbps, nc.link_upstream_bandwidth_kbps),
            config.link_bandwidths["NR_NSA_MMWAVE"]
        );
    }

    #[test]
    fn unknown_rat_defaults_to_14() {
        let apn = ApnSetting::new("carrier", "internet", ApnTypes::DEFAULT);
        let config = DataConfig::default();
        let mut inputs = inputs_for(&apn, &config);
        inputs.rat = RadioTech::Unknown;
        let nc = synthesize_capabilities(&inputs);
        assert_eq!(nc.link_downstream_bandwidth_kbps, 14);
        assert_eq!(nc.link_upstream_bandwidth_kbps, 14);
    }

    #[test]
    fn synthesis_is_idempotent() {
        let apn = ApnSetting::new("carrier", "internet", ApnTypes::ALL);
        let config = DataConfig::default();
        let inputs = inputs_for(&apn, &config);
        assert_eq!(
            synthesize_capabilities(&inputs),
            synthesize_capabilities(&inputs)
        );
    }
}
