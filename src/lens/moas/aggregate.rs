//! Single-writer aggregation of announcements and peer lists.
//!
//! Each keyspace is owned by one thread and only reached through a
//! rendezvous channel, so the tables need no locking. Ingestion signals
//! completion by dropping every [Senders] clone.

use crate::lens::moas::types::{OriginAs, Peer, RouteAnnouncement};
use anyhow::{anyhow, Context, Result};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

// =============================================================================
// Route table
// =============================================================================

/// Prefix -> origin -> observing peers, for one address family.
///
/// Peers are kept as received; duplicates are removed when reporting.
#[derive(Debug, Clone)]
pub struct RouteTable<P> {
    routes: HashMap<P, HashMap<OriginAs, Vec<Peer>>>,
}

impl<P> Default for RouteTable<P> {
    fn default() -> Self {
        RouteTable {
            routes: HashMap::new(),
        }
    }
}

impl<P: Hash + Eq> RouteTable<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, announcement: RouteAnnouncement<P>) {
        self.routes
            .entry(announcement.prefix)
            .or_default()
            .entry(announcement.origin)
            .or_default()
            .push(announcement.received_by);
    }

    /// Number of distinct prefixes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn origins(&self, prefix: &P) -> Option<&HashMap<OriginAs, Vec<Peer>>> {
        self.routes.get(prefix)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&P, &HashMap<OriginAs, Vec<Peer>>)> {
        self.routes.iter()
    }
}

// =============================================================================
// Peer registry
// =============================================================================

/// Every peer announced in any file's peer table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerRegistry {
    peers: HashSet<Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge<I: IntoIterator<Item = Peer>>(&mut self, peers: I) {
        self.peers.extend(peers);
    }

    pub fn contains(&self, peer: &Peer) -> bool {
        self.peers.contains(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// All peers ordered by AS number, then IP.
    pub fn peers(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.iter().copied().collect();
        peers.sort();
        peers
    }
}

// =============================================================================
// Channels
// =============================================================================

/// Producer side of the pipeline, cloned into every file task.
#[derive(Clone)]
pub struct Senders {
    ipv4: SyncSender<RouteAnnouncement<Ipv4Net>>,
    ipv6: SyncSender<RouteAnnouncement<Ipv6Net>>,
    peers: SyncSender<Vec<Peer>>,
    errors: SyncSender<anyhow::Error>,
    aborted: Arc<AtomicBool>,
}

impl Senders {
    /// Hand an announcement to the table of its address family.
    pub fn send_announcement(&self, announcement: RouteAnnouncement) -> Result<()> {
        let RouteAnnouncement {
            prefix,
            origin,
            received_by,
        } = announcement;
        match prefix {
            IpNet::V4(prefix) => self
                .ipv4
                .send(RouteAnnouncement {
                    prefix,
                    origin,
                    received_by,
                })
                .map_err(|_| anyhow!("IPv4 aggregator stopped")),
            IpNet::V6(prefix) => self
                .ipv6
                .send(RouteAnnouncement {
                    prefix,
                    origin,
                    received_by,
                })
                .map_err(|_| anyhow!("IPv6 aggregator stopped")),
        }
    }

    pub fn send_peers(&self, peers: Vec<Peer>) -> Result<()> {
        self.peers
            .send(peers)
            .map_err(|_| anyhow!("peer registry stopped"))
    }

    /// Report a run-fatal error to the control thread.
    ///
    /// Marks the run as aborted for every clone. Returns the error back if
    /// the control thread already stopped listening.
    pub fn fail(&self, error: anyhow::Error) -> Result<(), anyhow::Error> {
        self.aborted.store(true, Ordering::Relaxed);
        self.errors.send(error).map_err(|e| e.0)
    }

    /// Whether any task reported a run-fatal error.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Relaxed)
    }
}

/// Consumer side of the pipeline.
pub struct Receivers {
    ipv4: Receiver<RouteAnnouncement<Ipv4Net>>,
    ipv6: Receiver<RouteAnnouncement<Ipv6Net>>,
    peers: Receiver<Vec<Peer>>,
    errors: Receiver<anyhow::Error>,
}

/// Create the four rendezvous channels of one run.
pub fn channels() -> (Senders, Receivers) {
    let (ipv4_tx, ipv4_rx) = sync_channel(0);
    let (ipv6_tx, ipv6_rx) = sync_channel(0);
    let (peers_tx, peers_rx) = sync_channel(0);
    let (errors_tx, errors_rx) = sync_channel(0);
    (
        Senders {
            ipv4: ipv4_tx,
            ipv6: ipv6_tx,
            peers: peers_tx,
            errors: errors_tx,
            aborted: Arc::new(AtomicBool::new(false)),
        },
        Receivers {
            ipv4: ipv4_rx,
            ipv6: ipv6_rx,
            peers: peers_rx,
            errors: errors_rx,
        },
    )
}

// =============================================================================
// Aggregator
// =============================================================================

/// Finished tables of one run.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub ipv4: RouteTable<Ipv4Net>,
    pub ipv6: RouteTable<Ipv6Net>,
    pub peers: PeerRegistry,
}

/// Owner threads of the route tables and the peer registry.
pub struct Aggregator {
    ipv4: JoinHandle<RouteTable<Ipv4Net>>,
    ipv6: JoinHandle<RouteTable<Ipv6Net>>,
    peers: JoinHandle<PeerRegistry>,
}

impl Aggregator {
    /// Start the owner threads.
    ///
    /// The error receiver is handed back for the control thread to wait on.
    pub fn spawn(receivers: Receivers) -> Result<(Self, Receiver<anyhow::Error>)> {
        let Receivers {
            ipv4,
            ipv6,
            peers,
            errors,
        } = receivers;

        let ipv4 = thread::Builder::new()
            .name("ipv4-aggregator".to_string())
            .spawn(move || collect_routes(ipv4))
            .context("failed to spawn IPv4 aggregator thread")?;
        let ipv6 = thread::Builder::new()
            .name("ipv6-aggregator".to_string())
            .spawn(move || collect_routes(ipv6))
            .context("failed to spawn IPv6 aggregator thread")?;
        let peers = thread::Builder::new()
            .name("peer-registry".to_string())
            .spawn(move || {
                let mut registry = PeerRegistry::new();
                for update in peers {
                    registry.merge(update);
                }
                debug!(peers = registry.len(), "peer registry closed");
                registry
            })
            .context("failed to spawn peer registry thread")?;

        Ok((Aggregator { ipv4, ipv6, peers }, errors))
    }

    /// Wait for all streams to close and collect the finished tables.
    pub fn finish(self) -> Result<Aggregation> {
        let ipv4 = self
            .ipv4
            .join()
            .map_err(|_| anyhow!("IPv4 aggregator thread panicked"))?;
        let ipv6 = self
            .ipv6
            .join()
            .map_err(|_| anyhow!("IPv6 aggregator thread panicked"))?;
        let peers = self
            .peers
            .join()
            .map_err(|_| anyhow!("peer registry thread panicked"))?;
        Ok(Aggregation { ipv4, ipv6, peers })
    }
}

fn collect_routes<P: Hash + Eq>(announcements: Receiver<RouteAnnouncement<P>>) -> RouteTable<P> {
    let mut table = RouteTable::new();
    for announcement in announcements {
        table.add_route(announcement);
    }
    debug!(prefixes = table.len(), "route table closed");
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn peer(asn: u32, ip: &str) -> Peer {
        Peer::new(asn, ip.parse::<IpAddr>().unwrap())
    }

    fn announcement(prefix: &str, origin: u32, received_by: Peer) -> RouteAnnouncement {
        RouteAnnouncement {
            prefix: prefix.parse().unwrap(),
            origin: OriginAs::Single(origin),
            received_by,
        }
    }

    #[test]
    fn test_add_route() {
        let mut table: RouteTable<Ipv4Net> = RouteTable::new();
        let prefix: Ipv4Net = "8.8.8.0/24".parse().unwrap();
        for (origin, received_by) in [
            (15169, peer(1, "1.1.1.1")),
            (15169, peer(1, "1.1.1.1")),
            (3356, peer(2, "2.2.2.2")),
        ] {
            table.add_route(RouteAnnouncement {
                prefix,
                origin: OriginAs::Single(origin),
                received_by,
            });
        }

        assert_eq!(table.len(), 1);
        let origins = table.origins(&prefix).unwrap();
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[&OriginAs::Single(15169)].len(), 2);
        assert_eq!(origins[&OriginAs::Single(3356)], vec![peer(2, "2.2.2.2")]);
    }

    #[test]
    fn test_peer_registry_dedup() {
        let mut registry = PeerRegistry::new();
        registry.merge(vec![peer(2, "2.2.2.2"), peer(1, "1.1.1.1")]);
        registry.merge(vec![peer(1, "1.1.1.1"), peer(1, "1.1.1.2")]);
        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.peers(),
            vec![peer(1, "1.1.1.1"), peer(1, "1.1.1.2"), peer(2, "2.2.2.2")]
        );
    }

    #[test]
    fn test_aggregator_splits_families() {
        let (senders, receivers) = channels();
        let (aggregator, errors) = Aggregator::spawn(receivers).unwrap();

        let producer = thread::spawn(move || {
            senders.send_peers(vec![peer(1, "1.1.1.1")]).unwrap();
            senders
                .send_announcement(announcement("8.8.8.0/24", 15169, peer(1, "1.1.1.1")))
                .unwrap();
            senders
                .send_announcement(announcement("2001:4860::/32", 15169, peer(1, "1.1.1.1")))
                .unwrap();
            senders
                .send_announcement(announcement("1.1.1.0/24", 13335, peer(1, "1.1.1.1")))
                .unwrap();
        });

        assert!(errors.recv().is_err());
        producer.join().unwrap();

        let aggregation = aggregator.finish().unwrap();
        assert_eq!(aggregation.ipv4.len(), 2);
        assert_eq!(aggregation.ipv6.len(), 1);
        assert!(aggregation.peers.contains(&peer(1, "1.1.1.1")));
    }

    #[test]
    fn test_fatal_error_reaches_control_thread() {
        let (senders, receivers) = channels();
        let (_aggregator, errors) = Aggregator::spawn(receivers).unwrap();

        thread::spawn(move || {
            let _ = senders.fail(anyhow!("cannot open file"));
        });

        let error = errors.recv().unwrap();
        assert_eq!(error.to_string(), "cannot open file");
    }

    #[test]
    fn test_fail_marks_every_clone_aborted() {
        let (senders, receivers) = channels();
        let task = senders.clone();
        drop(receivers);

        assert!(!task.is_aborted());
        let error = senders.fail(anyhow!("cannot open file")).unwrap_err();
        assert_eq!(error.to_string(), "cannot open file");
        assert!(task.is_aborted());
    }
}
