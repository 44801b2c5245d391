//! Small stub DNS/mDNS resolver with an integrated mDNS responder.
//!
//! The crate is built around [`resolver::Resolver`], a single-threaded
//! cooperative state machine: the host loop feeds it timer ticks and inbound
//! UDP datagrams, and drains outgoing datagrams and resolution events from
//! it. [`driver::Driver`] is a ready-made blocking host loop on top of a UDP
//! socket.
//!
//! Names ending in `.local` are resolved over multicast DNS; everything else
//! goes to the configured unicast server. When the responder is enabled, the
//! resolver also answers mDNS queries for its own host name.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

mod hex;
pub mod packet;
pub mod resolver;
mod responder;
mod table;

pub mod driver;

pub use packet::error::Error;

/// Size of unicast DNS message buffers.
///
/// Unicast DNS messages are limited to 512 Bytes.
pub const DNS_BUFFER_SIZE: usize = 512;

/// Size of multicast DNS message buffers.
///
/// mDNS traffic stays within the local link, so it may use messages up to
/// roughly an Ethernet MTU in size.
pub const MDNS_BUFFER_SIZE: usize = 1500;

/// Number of slots in the name table.
pub const NAME_TABLE_SIZE: usize = 4;

/// Longest host name the table stores, in bytes. Longer names are truncated
/// when they are stored.
pub const MAX_HOSTNAME_LEN: usize = 32;

/// UDP port for unicast DNS.
pub const DNS_PORT: u16 = 53;

/// UDP port for multicast DNS.
pub const MDNS_PORT: u16 = 5353;

/// IPv4 mDNS group address.
pub const MDNS_GROUP_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// IPv6 mDNS group address.
pub const MDNS_GROUP_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);

const DEFAULT_HOSTNAME: &str = "contiki";

/// Runtime configuration of the resolver.
///
/// [`Config::default`] yields the IPv4 flavor; [`Config::ipv6`] the IPv6 one.
/// The address family of [`Config::server`] decides everything
/// family-dependent: the record type queried (A vs AAAA), the accepted answer
/// length, the responder's record type, and the mDNS group.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream unicast DNS server.
    pub server: IpAddr,
    /// Local host name the responder answers for (as `hostname.local`).
    pub hostname: String,
    /// Resolve `*.local` names over multicast DNS.
    pub mdns: bool,
    /// Answer inbound mDNS questions for the local host name.
    pub responder: bool,
    /// Include non-link-local IPv6 addresses in responses.
    pub include_global_v6: bool,
    /// Retransmissions before a unicast query fails.
    pub max_retries: u8,
    /// Retransmissions before an mDNS query fails.
    pub max_mdns_retries: u8,
    /// Local addresses the responder advertises.
    pub host_addrs: Vec<IpAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
            hostname: DEFAULT_HOSTNAME.into(),
            mdns: true,
            responder: true,
            include_global_v6: false,
            max_retries: 8,
            max_mdns_retries: 3,
            host_addrs: Vec::new(),
        }
    }
}

impl Config {
    /// Returns the IPv6 flavor of the default configuration.
    pub fn ipv6() -> Self {
        Self {
            // HE's resolver; swap in your own via `server`.
            server: IpAddr::V6(Ipv6Addr::new(0x2001, 0x470, 0x20, 0, 0, 0, 0, 2)),
            ..Self::default()
        }
    }

    pub(crate) fn is_ipv6(&self) -> bool {
        self.server.is_ipv6()
    }

    pub(crate) fn mdns_group(&self) -> SocketAddr {
        if self.is_ipv6() {
            (MDNS_GROUP_V6, MDNS_PORT).into()
        } else {
            (MDNS_GROUP_V4, MDNS_PORT).into()
        }
    }

    pub(crate) fn loopback(&self) -> IpAddr {
        if self.is_ipv6() {
            IpAddr::V6(Ipv6Addr::LOCALHOST)
        } else {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// An outgoing UDP datagram produced by the resolver.
///
/// The host loop sends `payload` to `dest` from the resolver's socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    pub dest: SocketAddr,
    pub payload: Vec<u8>,
}

/// Notifications the resolver hands to the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A lookup finished. `addr` is `None` when the name could not be
    /// resolved (timeout, server error, or unencodable name).
    ///
    /// The resolved address stays available through
    /// [`resolver::Resolver::lookup`] until the slot is evicted.
    Found { name: String, addr: Option<IpAddr> },
    /// The upstream server was replaced. In-flight queries are not restarted;
    /// their next retransmit already targets the new server.
    ServerChanged(IpAddr),
    /// The collision check renamed the local host.
    HostnameChanged(String),
}
