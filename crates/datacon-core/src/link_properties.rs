//! Link properties and the call-setup translation rules
//!
//! Translates a call setup response plus APN defaults plus the system DNS
//! fallback into a validated [`LinkProperties`] value. On any error the
//! output is cleared so a failed build never leaks partial state.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::apn::ApnSetting;
use crate::config::DataConfig;
use crate::radio::DataCallResponse;
use crate::types::SetupResult;

/// One address assigned to the data interface.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct LinkAddress {
    pub address: IpAddr,
    pub prefix_length: u8,
}

impl LinkAddress {
    pub fn new(address: IpAddr, prefix_length: u8) -> Self {
        LinkAddress {
            address,
            prefix_length,
        }
    }

    pub fn is_any_local(&self) -> bool {
        self.address.is_unspecified()
    }
}

/// A route entry. `gateway == None` marks a point-to-point interface route.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub gateway: Option<IpAddr>,
}

impl RouteInfo {
    /// Zero gateways mean point-to-point.
    pub fn from_gateway(gateway: IpAddr) -> Self {
        if gateway.is_unspecified() {
            RouteInfo { gateway: None }
        } else {
            RouteInfo {
                gateway: Some(gateway),
            }
        }
    }
}

/// HTTP proxy attached to the link.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProxyInfo {
    pub host: String,
    pub port: u16,
}

/// The link configuration exposed for one bearer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkProperties {
    pub interface_name: String,
    pub link_addresses: Vec<LinkAddress>,
    pub dns_servers: Vec<IpAddr>,
    pub pcscf_servers: Vec<IpAddr>,
    pub routes: Vec<RouteInfo>,
    /// Zero means unset.
    pub mtu: u32,
    /// Six-comma string "rmin,rdef,rmax,wmin,wdef,wmax".
    pub tcp_buffer_sizes: Option<String>,
    pub http_proxy: Option<ProxyInfo>,
}

impl LinkProperties {
    pub fn clear(&mut self) {
        *self = LinkProperties::default();
    }

    pub fn is_empty(&self) -> bool {
        self.interface_name.is_empty() && self.link_addresses.is_empty()
    }

    pub fn addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.link_addresses.iter().map(|la| la.address)
    }

    /// True when the link carries a usable IPv4 address.
    pub fn is_ipv4_connected(&self) -> bool {
        self.addresses()
            .any(|addr| matches!(addr, IpAddr::V4(_)) && is_usable_address(addr))
    }

    /// True when the link carries a usable IPv6 address.
    pub fn is_ipv6_connected(&self) -> bool {
        self.addresses()
            .any(|addr| matches!(addr, IpAddr::V6(_)) && is_usable_address(addr))
    }
}

fn is_usable_address(addr: IpAddr) -> bool {
    if addr.is_unspecified() || addr.is_loopback() || addr.is_multicast() {
        return false;
    }
    match addr {
        IpAddr::V4(v4) => !v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) != 0xfe80,
    }
}

/// True iff `address` is a literal IPv4 or IPv6 address.
pub fn is_ip_address(address: Option<&str>) -> bool {
    address
        .map(|a| a.parse::<IpAddr>().is_ok())
        .unwrap_or(false)
}

const NULL_IP: &str = "0.0.0.0";

/// The fallback DNS pair is unusable when both entries are the null address,
/// unless the APN is MMS with an IP-literal proxy (a known modem race leaves
/// DNS unfilled there and the call must still be accepted).
fn is_dns_ok(fallback: &[String], apn: Option<&ApnSetting>, dns_check_disabled: bool) -> bool {
    let first = fallback.first().map(String::as_str).unwrap_or("");
    let second = fallback.get(1).map(String::as_str).unwrap_or("");
    if first == NULL_IP && second == NULL_IP && !dns_check_disabled {
        let mms_proxy = apn.and_then(|a| a.mms_proxy_address.as_deref());
        if !is_ip_address(mms_proxy) {
            return false;
        }
    }
    true
}

/// Build link properties from a call setup response.
///
/// The result is written into `lp`; on anything but [`SetupResult::Success`]
/// `lp` is left cleared.
pub fn set_link_properties(
    response: &DataCallResponse,
    apn: Option<&ApnSetting>,
    config: &DataConfig,
    lp: &mut LinkProperties,
) -> SetupResult {
    lp.clear();

    if response.cause.is_failure() {
        return SetupResult::ErrorDataServiceSpecific(response.cause);
    }

    let result = fill_link_properties(response, apn, config, lp);
    if result != SetupResult::Success {
        debug!(
            "set_link_properties: error, clearing properties, cause={} result={:?}",
            response.cause, result
        );
        lp.clear();
    }
    result
}

fn fill_link_properties(
    response: &DataCallResponse,
    apn: Option<&ApnSetting>,
    config: &DataConfig,
    lp: &mut LinkProperties,
) -> SetupResult {
    if response.interface_name.is_empty() {
        return SetupResult::ErrorInvalidArg;
    }
    lp.interface_name = response.interface_name.clone();

    for la in &response.addresses {
        if !la.is_any_local() {
            debug!("addr/pl={}/{}", la.address, la.prefix_length);
            lp.link_addresses.push(*la);
        }
    }
    if lp.link_addresses.is_empty() {
        return SetupResult::ErrorInvalidArg;
    }

    // The fallback is consulted only when the modem supplied no DNS entries
    // at all; a response whose entries are all any-local does not fall back
    // and fails the final check below.
    if !response.dns_addresses.is_empty() {
        lp.dns_servers = response
            .dns_addresses
            .iter()
            .copied()
            .filter(|dns| !dns.is_unspecified())
            .collect();
    } else if is_dns_ok(&config.fallback_dns, apn, config.dns_check_disabled) {
        for dns in &config.fallback_dns {
            let dns = dns.trim();
            if dns.is_empty() {
                continue;
            }
            let addr: IpAddr = match dns.parse() {
                Ok(addr) => addr,
                Err(_) => return SetupResult::ErrorInvalidArg,
            };
            if !addr.is_unspecified() {
                lp.dns_servers.push(addr);
            }
        }
    }
    if lp.dns_servers.is_empty() {
        return SetupResult::ErrorInvalidArg;
    }

    lp.pcscf_servers = response.pcscf_addresses.clone();

    for gateway in &response.gateway_addresses {
        lp.routes.push(RouteInfo::from_gateway(*gateway));
    }

    // MTU precedence: call response, then APN profile, then platform default.
    if response.mtu != 0 {
        lp.mtu = response.mtu;
    } else if let Some(apn_mtu) = apn.map(|a| a.mtu).filter(|mtu| *mtu != 0) {
        lp.mtu = apn_mtu;
    } else {
        lp.mtu = config.default_mtu;
    }

    SetupResult::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApnTypes, FailCause};

    fn response(addrs: &[&str], dns: &[&str], gateways: &[&str]) -> DataCallResponse {
        DataCallResponse {
            cause: FailCause::None,
            suggested_retry_time: -1,
            cid: 1,
            interface_name: "rmnet0".to_string(),
            addresses: addrs
                .iter()
                .map(|a| LinkAddress::new(a.parse().unwrap(), 24))
                .collect(),
            dns_addresses: dns.iter().map(|d| d.parse().unwrap()).collect(),
            pcscf_addresses: Vec::new(),
            gateway_addresses: gateways.iter().map(|g| g.parse().unwrap()).collect(),
            mtu: 0,
            protocol: None,
        }
    }

    #[test]
    fn successful_build() {
        let resp = response(&["10.0.0.2"], &["8.8.8.8"], &["10.0.0.1"]);
        let mut lp = LinkProperties::default();
        let result = set_link_properties(&resp, None, &DataConfig::default(), &mut lp);
        assert_eq!(result, SetupResult::Success);
        assert_eq!(lp.interface_name, "rmnet0");
        assert_eq!(lp.link_addresses.len(), 1);
        assert_eq!(lp.dns_servers.len(), 1);
        assert_eq!(lp.routes.len(), 1);
        assert!(lp.routes[0].gateway.is_some());
        assert!(lp.is_ipv4_connected());
        assert!(!lp.is_ipv6_connected());
    }

    #[test]
    fn modem_cause_fails_with_specific_error() {
        let mut resp = response(&["10.0.0.2"], &["8.8.8.8"], &[]);
        resp.cause = FailCause::Modem(26);
        let mut lp = LinkProperties::default();
        let result = set_link_properties(&resp, None, &DataConfig::default(), &mut lp);
        assert_eq!(
            result,
            SetupResult::ErrorDataServiceSpecific(FailCause::Modem(26))
        );
        assert!(lp.is_empty());
    }

    #[test]
    fn empty_interface_is_invalid() {
        let mut resp = response(&["10.0.0.2"], &["8.8.8.8"], &[]);
        resp.interface_name.clear();
        let mut lp = LinkProperties::default();
        assert_eq!(
            set_link_properties(&resp, None, &DataConfig::default(), &mut lp),
            SetupResult::ErrorInvalidArg
        );
        assert!(lp.is_empty());
    }

    #[test]
    fn any_local_addresses_do_not_count() {
        let resp = response(&["0.0.0.0"], &["8.8.8.8"], &[]);
        let mut lp = LinkProperties::default();
        assert_eq!(
            set_link_properties(&resp, None, &DataConfig::default(), &mut lp),
            SetupResult::ErrorInvalidArg
        );
        assert!(lp.is_empty());
    }

    #[test]
    fn any_local_modem_dns_does_not_fall_back() {
        // The modem supplied entries, so the fallback is never consulted
        // even though all of them are unusable.
        let resp = response(&["10.0.0.2"], &["0.0.0.0"], &[]);
        let mut config = DataConfig::default();
        config.fallback_dns = vec!["1.1.1.1".to_string(), "8.8.4.4".to_string()];
        let mut lp = LinkProperties::default();
        assert_eq!(
            set_link_properties(&resp, None, &config, &mut lp),
            SetupResult::ErrorInvalidArg
        );
        assert!(lp.is_empty());
    }

    #[test]
    fn dns_falls_back_to_system_pair() {
        let resp = response(&["10.0.0.2"], &[], &[]);
        let mut config = DataConfig::default();
        config.fallback_dns = vec!["1.1.1.1".to_string(), "8.8.4.4".to_string()];
        let mut lp = LinkProperties::default();
        assert_eq!(
            set_link_properties(&resp, None, &config, &mut lp),
            SetupResult::Success
        );
        assert_eq!(lp.dns_servers.len(), 2);
    }

    #[test]
    fn null_fallback_dns_rejected_without_mms_proxy() {
        let resp = response(&["10.0.0.2"], &[], &[]);
        let mut config = DataConfig::default();
        config.fallback_dns = vec![NULL_IP.to_string(), NULL_IP.to_string()];
        let mut lp = LinkProperties::default();
        assert_eq!(
            set_link_properties(&resp, None, &config, &mut lp),
            SetupResult::ErrorInvalidArg
        );
    }

    #[test]
    fn null_fallback_dns_allowed_for_mms_with_ip_proxy() {
        // The fallback pair stays unusable (all-zero entries are skipped),
        // so the build still fails on the final DNS check, but the race
        // exception is exercised through is_dns_ok.
        let mut apn = ApnSetting::new("mms", "mms.carrier", ApnTypes::MMS);
        apn.mms_proxy_address = Some("10.1.2.3".to_string());
        let fallback = vec![NULL_IP.to_string(), NULL_IP.to_string()];
        assert!(is_dns_ok(&fallback, Some(&apn), false));

        apn.mms_proxy_address = Some("proxy.carrier.com".to_string());
        assert!(!is_dns_ok(&fallback, Some(&apn), false));
    }

    #[test]
    fn zero_gateway_is_point_to_point() {
        let resp = response(&["10.0.0.2"], &["8.8.8.8"], &["0.0.0.0"]);
        let mut lp = LinkProperties::default();
        assert_eq!(
            set_link_properties(&resp, None, &DataConfig::default(), &mut lp),
            SetupResult::Success
        );
        assert_eq!(lp.routes.len(), 1);
        assert!(lp.routes[0].gateway.is_none());
    }

    #[test]
    fn mtu_precedence() {
        let mut apn = ApnSetting::new("carrier", "internet", ApnTypes::DEFAULT);
        apn.mtu = 1400;
        let mut config = DataConfig::default();
        config.default_mtu = 1500;

        // Response wins.
        let mut resp = response(&["10.0.0.2"], &["8.8.8.8"], &[]);
        resp.mtu = 1430;
        let mut lp = LinkProperties::default();
        set_link_properties(&resp, Some(&apn), &config, &mut lp);
        assert_eq!(lp.mtu, 1430);

        // APN next.
        resp.mtu = 0;
        set_link_properties(&resp, Some(&apn), &config, &mut lp);
        assert_eq!(lp.mtu, 1400);

        // Platform default last.
        apn.mtu = 0;
        set_link_properties(&resp, Some(&apn), &config, &mut lp);
        assert_eq!(lp.mtu, 1500);
    }
}
