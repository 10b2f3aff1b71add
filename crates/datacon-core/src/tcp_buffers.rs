//! TCP buffer size table
//!
//! Buffer sizes keyed by radio technology. There are six parameters in each
//! value, read_min, read_default, read_max, write_min, write_default and
//! write_max, separated by commas; the unit is bytes.

use tracing::debug;

use crate::types::RadioTech;

const TCP_BUFFER_SIZES_GPRS: &str = "4092,8760,48000,4096,8760,48000";
const TCP_BUFFER_SIZES_EDGE: &str = "4093,26280,70800,4096,16384,70800";
const TCP_BUFFER_SIZES_UMTS: &str = "58254,349525,1048576,58254,349525,1048576";
const TCP_BUFFER_SIZES_1XRTT: &str = "16384,32768,131072,4096,16384,102400";
const TCP_BUFFER_SIZES_EVDO: &str = "4094,87380,262144,4096,16384,262144";
const TCP_BUFFER_SIZES_EHRPD: &str = "131072,262144,1048576,4096,16384,524288";
const TCP_BUFFER_SIZES_HSDPA: &str = "61167,367002,1101005,8738,52429,262114";
const TCP_BUFFER_SIZES_HSPA: &str = "40778,244668,734003,16777,100663,301990";
const TCP_BUFFER_SIZES_LTE: &str = "524288,1048576,2097152,262144,524288,1048576";
const TCP_BUFFER_SIZES_HSPAP: &str = "122334,734003,2202010,32040,192239,576717";
const TCP_BUFFER_SIZES_NR: &str = "2097152,6291456,16777216,512000,2097152,8388608";
const TCP_BUFFER_SIZES_LTE_CA: &str = "4096,6291456,12582912,4096,1048576,2097152";

const RAT_NAME_5G: &str = "nr";
const RAT_NAME_EVDO: &str = "evdo";

/// The lookup name for a technology, lowercased, with the EVDO family
/// collapsed and 5G NSA promoted to the NR name.
fn rat_lookup_name(rat: RadioTech, nr_nsa: bool) -> String {
    if rat.is_evdo() {
        return RAT_NAME_EVDO.to_string();
    }
    // NR 5G Non-Standalone uses an LTE cell as the primary cell; the radio
    // technology stays LTE. Use the NR buffer sizes in that case.
    if rat.is_lte() && nr_nsa {
        return RAT_NAME_5G.to_string();
    }
    rat.name().to_lowercase()
}

/// Look up the TCP buffer sizes for the current technology.
///
/// `using_carrier_aggregation` promotes LTE to LTE-CA; `nr_nsa` is true when
/// the bearer is LTE/LTE-CA with NR connected on this context. Override
/// entries have the form `"ratname:rmin,rdef,rmax,wmin,wdef,wmax"` and take
/// precedence over the built-in table for matching names.
pub fn tcp_buffer_sizes_for(
    rat: RadioTech,
    using_carrier_aggregation: bool,
    nr_nsa: bool,
    overrides: &[String],
) -> Option<String> {
    let rat = if rat == RadioTech::Lte && using_carrier_aggregation {
        RadioTech::LteCa
    } else {
        rat
    };
    let rat_name = rat_lookup_name(rat, nr_nsa);
    debug!("tcp_buffer_sizes_for: {}", rat_name);

    for entry in overrides {
        let mut split = entry.splitn(2, ':');
        if let (Some(name), Some(sizes)) = (split.next(), split.next()) {
            if name == rat_name {
                return Some(sizes.to_string());
            }
        }
    }

    let sizes = match rat {
        RadioTech::Gprs => TCP_BUFFER_SIZES_GPRS,
        RadioTech::Edge => TCP_BUFFER_SIZES_EDGE,
        RadioTech::Umts => TCP_BUFFER_SIZES_UMTS,
        RadioTech::OneXRtt => TCP_BUFFER_SIZES_1XRTT,
        RadioTech::Evdo0 | RadioTech::EvdoA | RadioTech::EvdoB => TCP_BUFFER_SIZES_EVDO,
        RadioTech::Ehrpd => TCP_BUFFER_SIZES_EHRPD,
        RadioTech::Hsdpa => TCP_BUFFER_SIZES_HSDPA,
        RadioTech::Hspa | RadioTech::Hsupa => TCP_BUFFER_SIZES_HSPA,
        RadioTech::Hspap => TCP_BUFFER_SIZES_HSPAP,
        RadioTech::Lte => {
            if nr_nsa {
                TCP_BUFFER_SIZES_NR
            } else {
                TCP_BUFFER_SIZES_LTE
            }
        }
        RadioTech::LteCa => {
            if nr_nsa {
                TCP_BUFFER_SIZES_NR
            } else {
                TCP_BUFFER_SIZES_LTE_CA
            }
        }
        RadioTech::Nr => TCP_BUFFER_SIZES_NR,
        // Leave unset so the platform default applies.
        RadioTech::Unknown => return None,
    };
    Some(sizes.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lte_defaults() {
        assert_eq!(
            tcp_buffer_sizes_for(RadioTech::Lte, false, false, &[]).as_deref(),
            Some(TCP_BUFFER_SIZES_LTE)
        );
    }

    #[test]
    fn carrier_aggregation_promotes_lte() {
        assert_eq!(
            tcp_buffer_sizes_for(RadioTech::Lte, true, false, &[]).as_deref(),
            Some(TCP_BUFFER_SIZES_LTE_CA)
        );
    }

    #[test]
    fn nr_nsa_uses_nr_sizes_on_lte() {
        assert_eq!(
            tcp_buffer_sizes_for(RadioTech::Lte, false, true, &[]).as_deref(),
            Some(TCP_BUFFER_SIZES_NR)
        );
        assert_eq!(
            tcp_buffer_sizes_for(RadioTech::Lte, true, true, &[]).as_deref(),
            Some(TCP_BUFFER_SIZES_NR)
        );
    }

    #[test]
    fn evdo_family_collapses() {
        for rat in [RadioTech::Evdo0, RadioTech::EvdoA, RadioTech::EvdoB] {
            assert_eq!(
                tcp_buffer_sizes_for(rat, false, false, &[]).as_deref(),
                Some(TCP_BUFFER_SIZES_EVDO)
            );
        }
    }

    #[test]
    fn override_matches_by_rat_name() {
        let overrides = vec!["lte:1,2,3,4,5,6".to_string()];
        assert_eq!(
            tcp_buffer_sizes_for(RadioTech::Lte, false, false, &overrides).as_deref(),
            Some("1,2,3,4,5,6")
        );
        // Override keyed on the promoted name applies under NSA.
        let nr_override = vec!["nr:9,9,9,9,9,9".to_string()];
        assert_eq!(
            tcp_buffer_sizes_for(RadioTech::Lte, false, true, &nr_override).as_deref(),
            Some("9,9,9,9,9,9")
        );
        // Non-matching names fall through to the built-ins.
        assert_eq!(
            tcp_buffer_sizes_for(RadioTech::Edge, false, false, &overrides).as_deref(),
            Some(TCP_BUFFER_SIZES_EDGE)
        );
    }

    #[test]
    fn unknown_rat_leaves_sizes_unset() {
        assert_eq!(tcp_buffer_sizes_for(RadioTech::Unknown, false, false, &[]), None);
    }
}
