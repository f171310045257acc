//! Routing-table record model and origin resolution.
//!
//! Decoded MRT records are mapped into [TableRecord] before any of the logic
//! here runs, so resolution never depends on the decoder's own types.

use crate::lens::moas::bogon::{classify_asn, classify_prefix, Reservation};
use crate::lens::moas::types::{OriginAs, Peer, RouteAnnouncement};
use ipnet::IpNet;
use itertools::Itertools;
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use tracing::trace;

// =============================================================================
// Record model
// =============================================================================

/// One AS path segment, members in path order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Sequence(Vec<u32>),
    Set(Vec<u32>),
    ConfedSequence(Vec<u32>),
    ConfedSet(Vec<u32>),
}

impl PathSegment {
    pub fn members(&self) -> &[u32] {
        match self {
            PathSegment::Sequence(asns)
            | PathSegment::Set(asns)
            | PathSegment::ConfedSequence(asns)
            | PathSegment::ConfedSet(asns) => asns,
        }
    }
}

/// One peer's route for the prefix of a [RibEntries] record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RibRow {
    /// Index into the peer table of the file the row came from
    pub peer_index: u16,
    /// `None` when the row carries no AS_PATH attribute
    pub as_path: Option<Vec<PathSegment>>,
}

/// All peers' routes for one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RibEntries {
    pub prefix: IpNet,
    pub rows: Vec<RibRow>,
}

/// Peers of one table dump, keyed by their in-file index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerTable {
    peers: HashMap<u16, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: u16, peer: Peer) {
        self.peers.insert(index, peer);
    }

    pub fn get(&self, index: u16) -> Option<&Peer> {
        self.peers.get(&index)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// All peers ordered by index.
    pub fn peers(&self) -> Vec<Peer> {
        self.peers
            .iter()
            .sorted_by_key(|(index, _)| **index)
            .map(|(_, peer)| *peer)
            .collect()
    }
}

impl FromIterator<(u16, Peer)> for PeerTable {
    fn from_iter<T: IntoIterator<Item = (u16, Peer)>>(iter: T) -> Self {
        PeerTable {
            peers: iter.into_iter().collect(),
        }
    }
}

/// A decoded table-dump record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableRecord {
    PeerIndex(PeerTable),
    Rib(RibEntries),
    /// Any record kind the detector does not consume
    Other { kind: String },
}

// =============================================================================
// Rejections
// =============================================================================

/// Why an entry or a row did not produce an announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    UnroutablePrefix {
        prefix: IpNet,
        reservation: Reservation,
    },
    MissingAsPath,
    EmptyAsPath,
    EmptySegment,
    ConfederationOrigin,
    UnroutableOrigin {
        asn: u32,
        reservation: Reservation,
    },
    /// Every member of the terminal AS set is unroutable; carries the set as received
    UnroutableAsSet {
        members: Vec<u32>,
    },
    UnknownPeerIndex(u16),
    PeerNotAllowed(Peer),
}

impl Display for Rejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::UnroutablePrefix {
                prefix,
                reservation,
            } => write!(f, "prefix {} is in {} space", prefix, reservation),
            Rejection::MissingAsPath => write!(f, "no AS_PATH attribute"),
            Rejection::EmptyAsPath => write!(f, "empty AS path"),
            Rejection::EmptySegment => write!(f, "empty terminal AS path segment"),
            Rejection::ConfederationOrigin => {
                write!(f, "AS path ends in a confederation segment")
            }
            Rejection::UnroutableOrigin { asn, reservation } => {
                write!(f, "origin AS{} is {}", asn, reservation)
            }
            Rejection::UnroutableAsSet { members } => write!(
                f,
                "no routable member in AS set {{{}}}",
                members.iter().join(",")
            ),
            Rejection::UnknownPeerIndex(index) => {
                write!(f, "peer index {} not in peer table", index)
            }
            Rejection::PeerNotAllowed(peer) => write!(f, "peer {} not in allowlist", peer),
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Resolve the origin of an AS path from its terminal segment.
pub fn resolve_origin(segments: &[PathSegment]) -> Result<OriginAs, Rejection> {
    let last = segments.last().ok_or(Rejection::EmptyAsPath)?;
    if last.members().is_empty() {
        return Err(Rejection::EmptySegment);
    }

    match last {
        PathSegment::Sequence(asns) => {
            let asn = *asns.last().ok_or(Rejection::EmptySegment)?;
            match classify_asn(asn) {
                Some(reservation) => Err(Rejection::UnroutableOrigin { asn, reservation }),
                None => Ok(OriginAs::Single(asn)),
            }
        }
        PathSegment::Set(asns) => {
            let routable = asns.iter().copied().filter(|asn| match classify_asn(*asn) {
                Some(reservation) => {
                    trace!(asn, %reservation, "excluding AS set member");
                    false
                }
                None => true,
            });
            OriginAs::from_members(routable).ok_or_else(|| Rejection::UnroutableAsSet {
                members: asns.clone(),
            })
        }
        PathSegment::ConfedSequence(_) | PathSegment::ConfedSet(_) => {
            Err(Rejection::ConfederationOrigin)
        }
    }
}

/// Turns RIB entries into announcements, applying the classifier and an
/// optional peer-AS allowlist.
#[derive(Debug, Clone, Default)]
pub struct RecordResolver {
    peer_allowlist: Option<HashSet<u32>>,
}

impl RecordResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept rows observed by peers in one of these ASes.
    ///
    /// An empty list disables the allowlist.
    pub fn with_peer_allowlist<I: IntoIterator<Item = u32>>(mut self, asns: I) -> Self {
        let asns: HashSet<u32> = asns.into_iter().collect();
        self.peer_allowlist = match asns.is_empty() {
            true => None,
            false => Some(asns),
        };
        self
    }

    pub fn allows(&self, peer: &Peer) -> bool {
        match &self.peer_allowlist {
            Some(asns) => asns.contains(&peer.asn),
            None => true,
        }
    }

    /// Resolve one row of an entry whose prefix has already been accepted.
    pub fn resolve_row(
        &self,
        prefix: IpNet,
        row: &RibRow,
        peers: &PeerTable,
    ) -> Result<RouteAnnouncement, Rejection> {
        let segments = row.as_path.as_deref().ok_or(Rejection::MissingAsPath)?;
        let origin = resolve_origin(segments)?;
        let peer = *peers
            .get(row.peer_index)
            .ok_or(Rejection::UnknownPeerIndex(row.peer_index))?;
        if !self.allows(&peer) {
            return Err(Rejection::PeerNotAllowed(peer));
        }
        Ok(RouteAnnouncement {
            prefix,
            origin,
            received_by: peer,
        })
    }

    /// Resolve every row of an entry.
    ///
    /// The outer error rejects the entry as a whole; otherwise there is one
    /// result per row, in row order.
    pub fn resolve_entry(
        &self,
        entry: &RibEntries,
        peers: &PeerTable,
    ) -> Result<Vec<Result<RouteAnnouncement, Rejection>>, Rejection> {
        let prefix = entry.prefix.trunc();
        if let Some(reservation) = classify_prefix(&prefix) {
            return Err(Rejection::UnroutablePrefix {
                prefix,
                reservation,
            });
        }
        Ok(entry
            .rows
            .iter()
            .map(|row| self.resolve_row(prefix, row, peers))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer_table() -> PeerTable {
        PeerTable::from_iter([
            (0, Peer::new(1, "1.1.1.1".parse().unwrap())),
            (1, Peer::new(2, "2.2.2.2".parse().unwrap())),
        ])
    }

    fn row(peer_index: u16, segments: Vec<PathSegment>) -> RibRow {
        RibRow {
            peer_index,
            as_path: Some(segments),
        }
    }

    #[test]
    fn test_sequence_origin() {
        let path = vec![PathSegment::Sequence(vec![1, 3356, 15169])];
        assert_eq!(resolve_origin(&path), Ok(OriginAs::Single(15169)));
    }

    #[test]
    fn test_sequence_unroutable_origin() {
        let path = vec![PathSegment::Sequence(vec![1, 23456])];
        assert_eq!(
            resolve_origin(&path),
            Err(Rejection::UnroutableOrigin {
                asn: 23456,
                reservation: Reservation::AsTrans
            })
        );
    }

    #[test]
    fn test_as_set_origin() {
        let path = vec![
            PathSegment::Sequence(vec![1, 3356]),
            PathSegment::Set(vec![65000, 200, 100]),
        ];
        assert_eq!(resolve_origin(&path), Ok(OriginAs::Set(vec![100, 200])));
    }

    #[test]
    fn test_as_set_single_survivor() {
        let path = vec![PathSegment::Set(vec![64512, 15169, 15169])];
        assert_eq!(resolve_origin(&path), Ok(OriginAs::Single(15169)));
    }

    #[test]
    fn test_as_set_all_private() {
        let path = vec![PathSegment::Set(vec![65001, 64600, 4200000001])];
        assert_eq!(
            resolve_origin(&path),
            Err(Rejection::UnroutableAsSet {
                members: vec![65001, 64600, 4200000001]
            })
        );
    }

    #[test]
    fn test_empty_paths() {
        assert_eq!(resolve_origin(&[]), Err(Rejection::EmptyAsPath));
        assert_eq!(
            resolve_origin(&[
                PathSegment::Sequence(vec![1]),
                PathSegment::Sequence(vec![])
            ]),
            Err(Rejection::EmptySegment)
        );
        assert_eq!(
            resolve_origin(&[PathSegment::Set(vec![])]),
            Err(Rejection::EmptySegment)
        );
    }

    #[test]
    fn test_confederation_terminal_segment() {
        let path = vec![
            PathSegment::Sequence(vec![1]),
            PathSegment::ConfedSequence(vec![65001]),
        ];
        assert_eq!(resolve_origin(&path), Err(Rejection::ConfederationOrigin));
        let path = vec![PathSegment::ConfedSet(vec![15169])];
        assert_eq!(resolve_origin(&path), Err(Rejection::ConfederationOrigin));
    }

    #[test]
    fn test_resolve_entry() {
        let entry = RibEntries {
            prefix: "8.8.8.0/24".parse().unwrap(),
            rows: vec![
                row(0, vec![PathSegment::Sequence(vec![1, 15169])]),
                row(1, vec![PathSegment::Sequence(vec![2, 3356])]),
                RibRow {
                    peer_index: 0,
                    as_path: None,
                },
                row(7, vec![PathSegment::Sequence(vec![3, 15169])]),
            ],
        };
        let results = RecordResolver::new()
            .resolve_entry(&entry, &peer_table())
            .unwrap();
        assert_eq!(results.len(), 4);

        let first = results[0].as_ref().unwrap();
        assert_eq!(first.origin, OriginAs::Single(15169));
        assert_eq!(first.received_by, Peer::new(1, "1.1.1.1".parse().unwrap()));
        let second = results[1].as_ref().unwrap();
        assert_eq!(second.origin, OriginAs::Single(3356));
        assert_eq!(second.received_by.asn, 2);

        assert_eq!(results[2], Err(Rejection::MissingAsPath));
        assert_eq!(results[3], Err(Rejection::UnknownPeerIndex(7)));
    }

    #[test]
    fn test_resolve_entry_canonicalizes_prefix() {
        let entry = RibEntries {
            prefix: "8.8.8.8/24".parse().unwrap(),
            rows: vec![row(0, vec![PathSegment::Sequence(vec![15169])])],
        };
        let results = RecordResolver::new()
            .resolve_entry(&entry, &peer_table())
            .unwrap();
        let announcement = results[0].as_ref().unwrap();
        assert_eq!(announcement.prefix.to_string(), "8.8.8.0/24");
    }

    #[test]
    fn test_resolve_entry_unroutable_prefix() {
        let entry = RibEntries {
            prefix: "10.0.0.0/8".parse().unwrap(),
            rows: vec![row(0, vec![PathSegment::Sequence(vec![15169])])],
        };
        assert_eq!(
            RecordResolver::new().resolve_entry(&entry, &peer_table()),
            Err(Rejection::UnroutablePrefix {
                prefix: "10.0.0.0/8".parse().unwrap(),
                reservation: Reservation::PrivateUse
            })
        );
    }

    #[test]
    fn test_peer_allowlist() {
        let resolver = RecordResolver::new().with_peer_allowlist([2]);
        let entry = RibEntries {
            prefix: "2001:4860::/32".parse().unwrap(),
            rows: vec![
                row(0, vec![PathSegment::Sequence(vec![1, 15169])]),
                row(1, vec![PathSegment::Sequence(vec![2, 15169])]),
            ],
        };
        let results = resolver.resolve_entry(&entry, &peer_table()).unwrap();
        assert_eq!(
            results[0],
            Err(Rejection::PeerNotAllowed(Peer::new(1, "1.1.1.1".parse().unwrap())))
        );
        assert!(results[1].is_ok());

        let open = RecordResolver::new().with_peer_allowlist(Vec::new());
        assert!(open.allows(&Peer::new(1, "1.1.1.1".parse().unwrap())));
    }

    #[test]
    fn test_peer_table_order() {
        let table = PeerTable::from_iter([
            (5, Peer::new(5, "5.5.5.5".parse().unwrap())),
            (0, Peer::new(1, "1.1.1.1".parse().unwrap())),
        ]);
        let asns: Vec<u32> = table.peers().iter().map(|p| p.asn).collect();
        assert_eq!(asns, vec![1, 5]);
    }

    #[test]
    fn test_rejection_display() {
        assert_eq!(
            Rejection::UnroutableAsSet {
                members: vec![65001, 64600]
            }
            .to_string(),
            "no routable member in AS set {65001,64600}"
        );
        assert_eq!(
            Rejection::UnroutableOrigin {
                asn: 0,
                reservation: Reservation::Reserved
            }
            .to_string(),
            "origin AS0 is reserved"
        );
    }
}
