//! Autonomous System lookup.
//!
//! The probe annotates every resolved address with its ASN. ASN 0 is the
//! sentinel for "lookup failed" and is ignored by the DNS analysis.

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

/// Owner of an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asn {
    pub number: u32,
    pub org: String,
}

/// Maps an address to the AS announcing it.
pub trait AsnLookup: Send + Sync {
    fn lookup_asn(&self, ip: IpAddr) -> Option<Asn>;
}

/// One row of an [`AsnTable`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AsnEntry {
    /// Network in CIDR notation, e.g. "8.8.8.0/24". A bare address is a
    /// single host.
    #[serde(with = "ipnetwork_serde")]
    pub prefix: IpNetwork,
    pub asn: u32,
    #[serde(default)]
    pub org: String,
}

/// Longest-prefix-match table built from configuration.
#[derive(Debug, Clone, Default)]
pub struct AsnTable {
    networks: Vec<(IpNetwork, Asn)>,
}

impl AsnTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[AsnEntry]) -> Self {
        let mut networks: Vec<(IpNetwork, Asn)> = entries
            .iter()
            .map(|entry| {
                let asn = Asn {
                    number: entry.asn,
                    org: entry.org.clone(),
                };
                (entry.prefix, asn)
            })
            .collect();
        // most specific first
        networks.sort_by(|a, b| b.0.prefix().cmp(&a.0.prefix()));
        Self { networks }
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

impl AsnLookup for AsnTable {
    fn lookup_asn(&self, ip: IpAddr) -> Option<Asn> {
        self.networks
            .iter()
            .find(|(network, _)| network.contains(ip))
            .map(|(_, asn)| asn.clone())
    }
}

/// ASN for `ip`, or 0 when unknown.
pub fn asn_number(lookup: &dyn AsnLookup, ip: IpAddr) -> u32 {
    lookup.lookup_asn(ip).map_or(0, |asn| asn.number)
}

mod ipnetwork_serde {
    use ipnetwork::IpNetwork;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        network: &IpNetwork,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        network.to_string().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<IpNetwork, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
