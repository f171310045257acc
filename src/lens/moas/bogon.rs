//! Bogon classification against the IANA special-purpose registries.
//!
//! - IPv4: <https://www.iana.org/assignments/iana-ipv4-special-registry>
//! - IPv6: <https://www.iana.org/assignments/iana-ipv6-special-registry>
//! - ASNs: <https://www.iana.org/assignments/iana-as-numbers-special-registry>
//!
//! A prefix is classified by its network address. Matching is exact against
//! the fixed blocks below; there are no heuristics.

use ipnet::IpNet;
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::net::{Ipv4Addr, Ipv6Addr};

/// The registry entry a prefix or ASN falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reservation {
    /// Mask length 0, covering a whole address family
    DefaultRoute,
    ThisNetwork,
    PrivateUse,
    SharedAddressSpace,
    Loopback,
    LinkLocal,
    IetfProtocolAssignments,
    Documentation,
    Benchmarking,
    Reserved,
    LimitedBroadcast,
    Unspecified,
    Ipv4Mapped,
    Ipv4Ipv6Translation,
    DiscardOnly,
    UniqueLocal,
    As112,
    AsTrans,
}

impl Display for Reservation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Reservation::DefaultRoute => "default route",
            Reservation::ThisNetwork => "\"this network\"",
            Reservation::PrivateUse => "private use",
            Reservation::SharedAddressSpace => "shared address space",
            Reservation::Loopback => "loopback",
            Reservation::LinkLocal => "link local",
            Reservation::IetfProtocolAssignments => "IETF protocol assignments",
            Reservation::Documentation => "documentation",
            Reservation::Benchmarking => "benchmarking",
            Reservation::Reserved => "reserved",
            Reservation::LimitedBroadcast => "limited broadcast",
            Reservation::Unspecified => "unspecified address",
            Reservation::Ipv4Mapped => "IPv4-mapped address",
            Reservation::Ipv4Ipv6Translation => "IPv4-IPv6 translation",
            Reservation::DiscardOnly => "discard-only address block",
            Reservation::UniqueLocal => "unique local",
            Reservation::As112 => "AS112 project",
            Reservation::AsTrans => "AS_TRANS",
        })
    }
}

// =============================================================================
// Address blocks
// =============================================================================

struct V4Block {
    network: u32,
    len: u8,
    reservation: Reservation,
}

impl V4Block {
    const fn new(octets: [u8; 4], len: u8, reservation: Reservation) -> Self {
        V4Block {
            network: u32::from_be_bytes(octets),
            len,
            reservation,
        }
    }

    fn contains(&self, addr: u32) -> bool {
        let mask = match self.len {
            0 => 0,
            len => u32::MAX << (32 - len as u32),
        };
        addr & mask == self.network
    }
}

struct V6Block {
    network: u128,
    len: u8,
    reservation: Reservation,
}

impl V6Block {
    const fn new(segments: [u16; 8], len: u8, reservation: Reservation) -> Self {
        let mut network = 0u128;
        let mut i = 0;
        while i < 8 {
            network = (network << 16) | segments[i] as u128;
            i += 1;
        }
        V6Block {
            network,
            len,
            reservation,
        }
    }

    fn contains(&self, addr: u128) -> bool {
        let mask = match self.len {
            0 => 0,
            len => u128::MAX << (128 - len as u32),
        };
        addr & mask == self.network
    }
}

/// Anycast assignments inside 192.0.0.0/24 that are globally routable.
const IPV4_CARVE_OUTS: &[V4Block] = &[
    // Port Control Protocol anycast
    V4Block::new([192, 0, 0, 9], 32, Reservation::IetfProtocolAssignments),
    // Traversal Using Relays around NAT anycast
    V4Block::new([192, 0, 0, 10], 32, Reservation::IetfProtocolAssignments),
];

const IPV4_RESERVED: &[V4Block] = &[
    V4Block::new([0, 0, 0, 0], 8, Reservation::ThisNetwork),
    V4Block::new([10, 0, 0, 0], 8, Reservation::PrivateUse),
    V4Block::new([100, 64, 0, 0], 10, Reservation::SharedAddressSpace),
    V4Block::new([127, 0, 0, 0], 8, Reservation::Loopback),
    V4Block::new([169, 254, 0, 0], 16, Reservation::LinkLocal),
    V4Block::new([172, 16, 0, 0], 12, Reservation::PrivateUse),
    V4Block::new([192, 0, 0, 0], 24, Reservation::IetfProtocolAssignments),
    // TEST-NET-1
    V4Block::new([192, 0, 2, 0], 24, Reservation::Documentation),
    V4Block::new([192, 168, 0, 0], 16, Reservation::PrivateUse),
    V4Block::new([198, 18, 0, 0], 15, Reservation::Benchmarking),
    // TEST-NET-2
    V4Block::new([198, 51, 100, 0], 24, Reservation::Documentation),
    // TEST-NET-3
    V4Block::new([203, 0, 113, 0], 24, Reservation::Documentation),
    V4Block::new([255, 255, 255, 255], 32, Reservation::LimitedBroadcast),
    V4Block::new([240, 0, 0, 0], 4, Reservation::Reserved),
];

/// Globally routable assignments inside 2001::/23.
#[rustfmt::skip]
const IPV6_CARVE_OUTS: &[V6Block] = &[
    // TEREDO
    V6Block::new([0x2001, 0, 0, 0, 0, 0, 0, 0], 32, Reservation::IetfProtocolAssignments),
    // Port Control Protocol anycast
    V6Block::new([0x2001, 1, 0, 0, 0, 0, 0, 1], 128, Reservation::IetfProtocolAssignments),
    // Traversal Using Relays around NAT anycast
    V6Block::new([0x2001, 1, 0, 0, 0, 0, 0, 2], 128, Reservation::IetfProtocolAssignments),
    // AMT
    V6Block::new([0x2001, 3, 0, 0, 0, 0, 0, 0], 32, Reservation::IetfProtocolAssignments),
    // AS112-v6
    V6Block::new([0x2001, 4, 0x112, 0, 0, 0, 0, 0], 48, Reservation::IetfProtocolAssignments),
    // ORCHIDv2
    V6Block::new([0x2001, 0x20, 0, 0, 0, 0, 0, 0], 28, Reservation::IetfProtocolAssignments),
];

#[rustfmt::skip]
const IPV6_RESERVED: &[V6Block] = &[
    V6Block::new([0, 0, 0, 0, 0, 0, 0, 1], 128, Reservation::Loopback),
    V6Block::new([0, 0, 0, 0, 0, 0, 0, 0], 128, Reservation::Unspecified),
    V6Block::new([0, 0, 0, 0, 0, 0xffff, 0, 0], 96, Reservation::Ipv4Mapped),
    V6Block::new([0x64, 0xff9b, 1, 0, 0, 0, 0, 0], 48, Reservation::Ipv4Ipv6Translation),
    V6Block::new([0x100, 0, 0, 0, 0, 0, 0, 0], 64, Reservation::DiscardOnly),
    V6Block::new([0x2001, 0, 0, 0, 0, 0, 0, 0], 23, Reservation::IetfProtocolAssignments),
    V6Block::new([0x2001, 0xdb8, 0, 0, 0, 0, 0, 0], 32, Reservation::Documentation),
    V6Block::new([0xfc00, 0, 0, 0, 0, 0, 0, 0], 7, Reservation::UniqueLocal),
    V6Block::new([0xfe80, 0, 0, 0, 0, 0, 0, 0], 10, Reservation::LinkLocal),
];

// =============================================================================
// Classification
// =============================================================================

/// Find the special-purpose entry covering a prefix, if any.
///
/// Returns `None` for a globally routable prefix.
pub fn classify_prefix(prefix: &IpNet) -> Option<Reservation> {
    if prefix.prefix_len() == 0 {
        return Some(Reservation::DefaultRoute);
    }
    match prefix {
        IpNet::V4(net) => classify_ipv4(net.network()),
        IpNet::V6(net) => classify_ipv6(net.network()),
    }
}

fn classify_ipv4(addr: Ipv4Addr) -> Option<Reservation> {
    let addr = u32::from(addr);
    if IPV4_CARVE_OUTS.iter().any(|block| block.contains(addr)) {
        return None;
    }
    IPV4_RESERVED
        .iter()
        .find(|block| block.contains(addr))
        .map(|block| block.reservation)
}

fn classify_ipv6(addr: Ipv6Addr) -> Option<Reservation> {
    let addr = u128::from(addr);
    if IPV6_CARVE_OUTS.iter().any(|block| block.contains(addr)) {
        return None;
    }
    IPV6_RESERVED
        .iter()
        .find(|block| block.contains(addr))
        .map(|block| block.reservation)
}

/// Find the special-purpose entry covering an AS number, if any.
pub fn classify_asn(asn: u32) -> Option<Reservation> {
    match asn {
        // RFC7607, RFC7300
        0 | 65535 | 4294967295 => Some(Reservation::Reserved),
        112 => Some(Reservation::As112),
        23456 => Some(Reservation::AsTrans),
        64496..=64511 | 65536..=65551 => Some(Reservation::Documentation),
        64512..=65534 | 4200000000..=4294967294 => Some(Reservation::PrivateUse),
        _ => None,
    }
}

/// Check whether a prefix may appear on the public routing table.
pub fn is_routable_prefix(prefix: &IpNet) -> bool {
    classify_prefix(prefix).is_none()
}

/// Check whether an AS number may originate routes on the public routing table.
pub fn is_routable_asn(asn: u32) -> bool {
    classify_asn(asn).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routable(prefix: &str) -> bool {
        is_routable_prefix(&prefix.parse::<IpNet>().expect("valid prefix"))
    }

    fn reservation(prefix: &str) -> Option<Reservation> {
        classify_prefix(&prefix.parse::<IpNet>().expect("valid prefix"))
    }

    #[test]
    fn test_default_routes() {
        assert_eq!(reservation("0.0.0.0/0"), Some(Reservation::DefaultRoute));
        assert_eq!(reservation("::/0"), Some(Reservation::DefaultRoute));
    }

    #[test]
    fn test_ipv4_this_network() {
        assert_eq!(reservation("0.2.0.0/16"), Some(Reservation::ThisNetwork));
        assert!(!routable("0.255.255.0/24"));
        assert!(routable("1.0.0.0/8"));
    }

    #[test]
    fn test_ipv4_private_use() {
        assert_eq!(reservation("10.2.0.0/16"), Some(Reservation::PrivateUse));
        assert!(!routable("10.255.255.0/24"));
        assert!(routable("9.255.255.0/24"));
        assert!(routable("11.0.0.0/16"));

        assert!(!routable("172.16.48.0/24"));
        assert!(!routable("172.31.255.0/24"));
        assert!(routable("172.15.255.0/24"));
        assert!(routable("172.32.0.0/24"));

        assert!(!routable("192.168.3.0/24"));
        assert!(!routable("192.168.255.0/24"));
        assert!(routable("192.167.255.0/24"));
        assert!(routable("192.169.0.0/24"));
    }

    #[test]
    fn test_ipv4_shared_address_space() {
        assert_eq!(
            reservation("100.65.0.0/16"),
            Some(Reservation::SharedAddressSpace)
        );
        assert!(!routable("100.64.0.0/10"));
        assert!(!routable("100.127.255.0/24"));
        assert!(routable("100.63.255.0/24"));
        assert!(routable("100.128.0.0/10"));
    }

    #[test]
    fn test_ipv4_loopback() {
        assert_eq!(reservation("127.1.0.0/16"), Some(Reservation::Loopback));
        assert!(!routable("127.255.255.0/24"));
        assert!(routable("126.255.255.0/24"));
        assert!(routable("128.0.0.0/8"));
    }

    #[test]
    fn test_ipv4_link_local() {
        assert_eq!(reservation("169.254.4.0/24"), Some(Reservation::LinkLocal));
        assert!(!routable("169.254.255.0/24"));
        assert!(routable("169.253.0.0/16"));
        assert!(routable("169.255.0.0/16"));
    }

    #[test]
    fn test_ipv4_ietf_protocol_assignments() {
        assert_eq!(
            reservation("192.0.0.128/26"),
            Some(Reservation::IetfProtocolAssignments)
        );
        assert!(!routable("192.0.0.0/24"));
        assert!(!routable("192.0.0.8/32"));
        assert!(!routable("192.0.0.11/32"));
        // NAT64/DNS64 discovery
        assert!(!routable("192.0.0.170/32"));
        assert!(!routable("192.0.0.171/32"));
        assert!(routable("191.255.255.0/24"));
        assert!(routable("192.0.1.0/24"));
    }

    #[test]
    fn test_ipv4_anycast_carve_outs() {
        assert!(routable("192.0.0.9/32"));
        assert!(routable("192.0.0.10/32"));
    }

    #[test]
    fn test_ipv4_documentation() {
        assert_eq!(
            reservation("192.0.2.128/26"),
            Some(Reservation::Documentation)
        );
        assert!(!routable("192.0.2.0/24"));
        assert!(routable("192.0.3.0/24"));

        assert!(!routable("198.51.100.128/26"));
        assert!(routable("198.51.99.0/24"));
        assert!(routable("198.51.101.0/24"));

        assert!(!routable("203.0.113.128/25"));
        assert!(routable("203.0.112.0/24"));
        assert!(routable("203.0.114.0/24"));
    }

    #[test]
    fn test_ipv4_benchmarking() {
        assert_eq!(reservation("198.19.0.0/16"), Some(Reservation::Benchmarking));
        assert!(!routable("198.18.0.0/15"));
        assert!(routable("198.17.255.0/24"));
        assert!(routable("198.20.0.0/15"));
    }

    #[test]
    fn test_ipv4_reserved_and_broadcast() {
        assert_eq!(reservation("241.0.0.0/8"), Some(Reservation::Reserved));
        assert!(!routable("240.0.0.0/4"));
        assert!(!routable("255.255.255.0/24"));
        // multicast is not part of the special-purpose registry
        assert!(routable("224.0.0.0/4"));
        assert!(routable("239.255.255.0/24"));
        assert_eq!(
            reservation("255.255.255.255/32"),
            Some(Reservation::LimitedBroadcast)
        );
    }

    #[test]
    fn test_ipv6_loopback_and_unspecified() {
        assert_eq!(reservation("::1/128"), Some(Reservation::Loopback));
        assert_eq!(reservation("::/128"), Some(Reservation::Unspecified));
        assert!(routable("::2/128"));
    }

    #[test]
    fn test_ipv6_ipv4_mapped() {
        assert_eq!(reservation("::ffff:14:0/112"), Some(Reservation::Ipv4Mapped));
        assert!(!routable("::ffff:ffff:0/112"));
        assert!(routable("::fffe:0:0/96"));
        assert!(routable("::1:0:0:0/96"));
    }

    #[test]
    fn test_ipv6_translation() {
        assert_eq!(
            reservation("64:ff9b:1:42::/64"),
            Some(Reservation::Ipv4Ipv6Translation)
        );
        assert!(routable("64:ff9b::/96"));
        assert!(routable("64:ff9b:2::/48"));
    }

    #[test]
    fn test_ipv6_discard_only() {
        assert_eq!(
            reservation("100:0:0:0:1::/80"),
            Some(Reservation::DiscardOnly)
        );
        assert!(routable("100:0:0:1::/64"));
        assert!(routable("ff:ffff:ffff:ffff::/64"));
    }

    #[test]
    fn test_ipv6_ietf_protocol_assignments() {
        assert_eq!(
            reservation("2001:100::/24"),
            Some(Reservation::IetfProtocolAssignments)
        );
        // benchmarking
        assert!(!routable("2001:2:0:1000::/54"));
        assert!(!routable("2001:1ff::/32"));
        assert!(routable("2001:200::/23"));
        assert!(routable("2000:ffff::/32"));
    }

    #[test]
    fn test_ipv6_teredo() {
        assert!(routable("2001:0:f000::/36"));
        assert!(routable("2001::/32"));
        assert!(!routable("2001:1::/32"));
    }

    #[test]
    fn test_ipv6_anycast_carve_outs() {
        assert!(routable("2001:1::1/128"));
        assert!(routable("2001:1::2/128"));
        assert!(!routable("2001:1::/128"));
        assert!(!routable("2001:1::3/128"));
    }

    #[test]
    fn test_ipv6_amt() {
        assert!(routable("2001:3:f000::/36"));
        assert!(!routable("2001:2::/32"));
        assert!(!routable("2001:4::/32"));
    }

    #[test]
    fn test_ipv6_as112() {
        assert!(routable("2001:4:112:f000::/52"));
        assert!(!routable("2001:4:111::/48"));
        assert!(!routable("2001:4:113::/48"));
    }

    #[test]
    fn test_ipv6_orchid_v2() {
        assert!(routable("2001:21::/32"));
        assert!(routable("2001:2f::/32"));
        assert!(!routable("2001:1f::/32"));
        assert!(!routable("2001:30::/28"));
    }

    #[test]
    fn test_ipv6_documentation() {
        assert_eq!(
            reservation("2001:db8:f000::/36"),
            Some(Reservation::Documentation)
        );
        assert!(routable("2001:db7::/32"));
        assert!(routable("2001:db9::/32"));
    }

    #[test]
    fn test_ipv6_unique_local() {
        assert_eq!(reservation("fd00::/8"), Some(Reservation::UniqueLocal));
        assert!(!routable("fc00::/8"));
        assert!(routable("fbff::/16"));
        assert!(routable("fe00::/7"));
    }

    #[test]
    fn test_ipv6_link_local() {
        assert_eq!(reservation("fe90::/12"), Some(Reservation::LinkLocal));
        assert!(!routable("febf::/16"));
        assert!(routable("fe7f::/16"));
        assert!(routable("fec0::/10"));
    }

    #[test]
    fn test_public_prefixes() {
        assert!(routable("8.8.8.0/24"));
        assert!(routable("1.1.1.0/24"));
        assert!(routable("2606:4700::/32"));
        assert!(routable("2a00:1450::/32"));
    }

    #[test]
    fn test_reserved_asns() {
        for asn in [0, 112, 23456, 65535, 4294967295] {
            assert!(!is_routable_asn(asn), "AS{} should not be routable", asn);
        }
        for (start, end) in [
            (64496, 64511),
            (64512, 65534),
            (65536, 65551),
            (4200000000, 4294967294),
        ] {
            assert!(!is_routable_asn(start), "AS{} should not be routable", start);
            assert!(!is_routable_asn(end), "AS{} should not be routable", end);
            assert!(
                !is_routable_asn(start + (end - start) / 2),
                "middle of {}-{} should not be routable",
                start,
                end
            );
        }
        assert_eq!(classify_asn(23456), Some(Reservation::AsTrans));
        assert_eq!(classify_asn(112), Some(Reservation::As112));
        assert_eq!(classify_asn(65000), Some(Reservation::PrivateUse));
        assert_eq!(classify_asn(65540), Some(Reservation::Documentation));
    }

    #[test]
    fn test_public_asns() {
        for asn in [1, 111, 113, 23455, 23457, 64495, 65552, 4199999999] {
            assert!(is_routable_asn(asn), "AS{} should be routable", asn);
        }
        // top of the 32-bit private range
        assert!(!is_routable_asn(4294967293));
        assert!(is_routable_asn(15169));
        assert!(is_routable_asn(3356));
    }
}
