//! MOAS detection and statistics over finished route tables.

use crate::lens::moas::aggregate::{PeerRegistry, RouteTable};
use crate::lens::moas::types::{
    MoasPrefix, MoasPrefixOrigin, OriginAs, Peer, PeerStatistics, Statistics,
};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use itertools::Itertools;
use std::collections::{HashMap, HashSet};

/// Whether a prefix with these origins is announced by more than one origin.
pub fn is_moas(origins: &HashMap<OriginAs, Vec<Peer>>) -> bool {
    origins.len() >= 2
}

/// List every prefix of a table announced by two or more origins.
///
/// Origins are ordered, and each origin's visibility holds distinct peers.
/// The order of the prefixes themselves is unspecified.
pub fn moas_prefixes<P>(table: &RouteTable<P>) -> Vec<MoasPrefix>
where
    P: Copy + std::hash::Hash + Eq + Into<IpNet>,
{
    table
        .iter()
        .filter(|(_, origins)| is_moas(origins))
        .map(|(prefix, origins)| MoasPrefix {
            prefix: (*prefix).into(),
            origin: origins
                .iter()
                .sorted_by(|a, b| a.0.cmp(b.0))
                .map(|(origin, peers)| MoasPrefixOrigin {
                    origin: origin.clone(),
                    visibility: peers.iter().copied().sorted().dedup().collect(),
                })
                .collect(),
        })
        .collect()
}

/// Global and per-peer counters.
///
/// Every registry peer appears in the result, with zero counts if it observed
/// nothing. A peer observed in the tables but missing from the registry is
/// counted as well.
pub fn statistics(
    ipv4: &RouteTable<Ipv4Net>,
    ipv6: &RouteTable<Ipv6Net>,
    registry: &PeerRegistry,
) -> Statistics {
    let mut peers: HashMap<Peer, PeerStatistics> = registry
        .peers()
        .into_iter()
        .map(|peer| (peer, PeerStatistics::new(peer)))
        .collect();

    let ipv4_moas_prefixes = tally(ipv4, &mut peers, |stats, moas| {
        stats.ipv4_prefixes += 1;
        if moas {
            stats.ipv4_moas_prefixes += 1;
        }
    });
    let ipv6_moas_prefixes = tally(ipv6, &mut peers, |stats, moas| {
        stats.ipv6_prefixes += 1;
        if moas {
            stats.ipv6_moas_prefixes += 1;
        }
    });

    Statistics {
        ipv4_prefixes: ipv4.len(),
        ipv6_prefixes: ipv6.len(),
        ipv4_moas_prefixes,
        ipv6_moas_prefixes,
        peers: peers
            .into_iter()
            .sorted_by_key(|(peer, _)| *peer)
            .map(|(_, stats)| stats)
            .collect(),
    }
}

/// Count one family's prefixes per peer. Returns the number of MOAS prefixes.
fn tally<P: std::hash::Hash + Eq>(
    table: &RouteTable<P>,
    peers: &mut HashMap<Peer, PeerStatistics>,
    mut count: impl FnMut(&mut PeerStatistics, bool),
) -> usize {
    let mut moas_prefixes = 0;
    for (_, origins) in table.iter() {
        let moas = is_moas(origins);
        if moas {
            moas_prefixes += 1;
        }
        let observers: HashSet<Peer> = origins.values().flatten().copied().collect();
        for peer in observers {
            count(
                peers
                    .entry(peer)
                    .or_insert_with(|| PeerStatistics::new(peer)),
                moas,
            );
        }
    }
    moas_prefixes
}
