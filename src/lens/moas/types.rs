//! Domain types shared by the MOAS pipeline and its output documents.

use ipnet::IpNet;
use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use std::str::FromStr;

/// Serialize a value through its `Display` impl and read it back through `FromStr`.
pub(crate) mod display_fromstr {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::fmt::Display;
    use std::str::FromStr;

    pub fn serialize<T: Display, S: Serializer>(
        value: &T,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Peer
// =============================================================================

/// A routing-table observer, identified by its AS number and IP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Peer {
    #[serde(rename = "as", with = "display_fromstr")]
    pub asn: u32,
    #[serde(with = "display_fromstr")]
    pub ip: IpAddr,
}

impl Peer {
    pub fn new(asn: u32, ip: IpAddr) -> Self {
        Peer { asn, ip }
    }
}

impl Display for Peer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "AS{}@{}", self.asn, self.ip)
    }
}

// =============================================================================
// Origin AS
// =============================================================================

/// Origin of a route: either a single ASN or an AS set.
///
/// A `Set` always holds at least two members, sorted ascending and without
/// duplicates. Build one with [OriginAs::from_members] to keep that invariant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OriginAs {
    Single(u32),
    Set(Vec<u32>),
}

impl OriginAs {
    /// Build an origin from the routable members of an AS set.
    ///
    /// Returns `None` when no member is left. A single remaining member yields
    /// a plain [OriginAs::Single].
    pub fn from_members<I: IntoIterator<Item = u32>>(members: I) -> Option<Self> {
        let members: Vec<u32> = members.into_iter().sorted_unstable().dedup().collect();
        match members.as_slice() {
            [] => None,
            [asn] => Some(OriginAs::Single(*asn)),
            _ => Some(OriginAs::Set(members)),
        }
    }
}

impl Display for OriginAs {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OriginAs::Single(asn) => write!(f, "{}", asn),
            OriginAs::Set(asns) => write!(f, "{{{}}}", asns.iter().join(",")),
        }
    }
}

impl FromStr for OriginAs {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.strip_prefix('{').and_then(|rest| rest.strip_suffix('}')) {
            Some(inner) => {
                let members = inner
                    .split(',')
                    .map(|m| m.trim().parse::<u32>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| format!("invalid AS set '{}': {}", s, e))?;
                OriginAs::from_members(members).ok_or_else(|| format!("empty AS set '{}'", s))
            }
            None => s
                .parse::<u32>()
                .map(OriginAs::Single)
                .map_err(|e| format!("invalid ASN '{}': {}", s, e)),
        }
    }
}

impl Serialize for OriginAs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OriginAs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        display_fromstr::deserialize(deserializer)
    }
}

// =============================================================================
// Announcements
// =============================================================================

/// One observation of "this peer saw this prefix originated by this AS(es)".
///
/// The prefix type decides the keyspace: the pipeline routes announcements
/// to `RouteAnnouncement<Ipv4Net>` or `RouteAnnouncement<Ipv6Net>` channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteAnnouncement<P = IpNet> {
    pub prefix: P,
    pub origin: OriginAs,
    pub received_by: Peer,
}

// =============================================================================
// Output documents
// =============================================================================

/// A prefix with two or more distinct origins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoasPrefix {
    #[serde(with = "display_fromstr")]
    pub prefix: IpNet,
    pub origin: Vec<MoasPrefixOrigin>,
}

/// One origin of a MOAS prefix together with the peers that observed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoasPrefixOrigin {
    #[serde(rename = "as")]
    pub origin: OriginAs,
    pub visibility: Vec<Peer>,
}

/// Global and per-peer counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub ipv4_prefixes: usize,
    pub ipv6_prefixes: usize,
    pub ipv4_moas_prefixes: usize,
    pub ipv6_moas_prefixes: usize,
    pub peers: Vec<PeerStatistics>,
}

impl Statistics {
    /// Look up the counters of one peer.
    pub fn peer(&self, peer: &Peer) -> Option<&PeerStatistics> {
        self.peers.iter().find(|p| p.peer() == *peer)
    }
}

/// Prefix counters of one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStatistics {
    #[serde(rename = "as", with = "display_fromstr")]
    pub asn: u32,
    #[serde(with = "display_fromstr")]
    pub ip: IpAddr,
    pub ipv4_prefixes: usize,
    pub ipv6_prefixes: usize,
    pub ipv4_moas_prefixes: usize,
    pub ipv6_moas_prefixes: usize,
}

impl PeerStatistics {
    pub fn new(peer: Peer) -> Self {
        PeerStatistics {
            asn: peer.asn,
            ip: peer.ip,
            ipv4_prefixes: 0,
            ipv6_prefixes: 0,
            ipv4_moas_prefixes: 0,
            ipv6_moas_prefixes: 0,
        }
    }

    pub fn peer(&self) -> Peer {
        Peer::new(self.asn, self.ip)
    }
}
