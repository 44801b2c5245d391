//! The resolver core.
//!
//! [`Resolver`] is a cooperative state machine. It never touches a socket
//! itself; the host loop feeds it two kinds of input and drains two kinds of
//! output:
//!
//! - input: [`Resolver::tick`] (the retry timer, nominally once per second)
//!   and [`Resolver::handle_packet`] (an inbound UDP datagram);
//! - output: [`Resolver::poll_transmit`] (outgoing datagrams) and
//!   [`Resolver::poll_event`] (resolution results and other notifications).
//!
//! All remaining methods are host commands and take effect immediately.
//! [`crate::driver::Driver`] wires a blocking UDP socket to this interface.

use std::{
    collections::VecDeque,
    net::{IpAddr, SocketAddr},
};

use crate::{
    hex::Hex,
    packet::{
        decoder::MessageDecoder,
        encoder::{MessageEncoder, Question},
        name::DomainName,
        records::Record,
        Class, Header, QType, RCode,
    },
    responder,
    table::{NameTable, SlotState},
    Config, Event, Transmit, DNS_BUFFER_SIZE, DNS_PORT, MAX_HOSTNAME_LEN, NAME_TABLE_SIZE,
};

/// Offset folded into the slot index to form the wire transaction id.
///
/// This makes stray responses (which typically carry small or random ids)
/// land outside the table's index range.
const ID_OFFSET: u16 = 61616;

fn encode_index(index: usize) -> u16 {
    (index as u16).wrapping_add(ID_OFFSET)
}

fn decode_index(id: u16) -> usize {
    // Keep the full 16-bit difference: ids further away than the table size
    // must not alias back into range.
    usize::from(id.wrapping_sub(ID_OFFSET))
}

/// A stub DNS/mDNS resolver with an integrated mDNS responder.
pub struct Resolver {
    config: Config,
    table: NameTable,
    out: VecDeque<Transmit>,
    events: VecDeque<Event>,
}

impl Resolver {
    /// Creates a resolver from `config`.
    ///
    /// With the responder enabled this immediately schedules a probe for the
    /// local host name, so that a name collision on the link is noticed
    /// before anyone relies on the name.
    pub fn new(config: Config) -> Self {
        let mut this = Self {
            config,
            table: NameTable::new(),
            out: VecDeque::new(),
            events: VecDeque::new(),
        };
        this.config.hostname = NameTable::canonicalize(&this.config.hostname);
        if this.config.responder {
            this.probe_hostname();
        }
        this
    }

    /// Queues a lookup of `name`.
    ///
    /// The call is asynchronous: the query goes out on the next tick, and the
    /// result is delivered as an [`Event::Found`]. Names ending in `.local`
    /// are queried over mDNS (if enabled), everything else is sent to the
    /// configured server.
    ///
    /// Querying a name that is already in the table restarts that entry.
    pub fn query(&mut self, name: &str) {
        let name = NameTable::canonicalize(name);
        if let Err(e) = DomainName::from_str(&name) {
            // Unencodable names fail straight away instead of occupying a slot.
            log::warn!("rejecting query for {:?}: {}", name, e);
            self.events.push_back(Event::Found { name, addr: None });
            return;
        }

        let is_mdns = self.config.mdns && name.ends_with(".local");
        log::debug!(
            "starting {} query for {:?}",
            if is_mdns { "mDNS" } else { "DNS" },
            name,
        );
        let index = self.table.acquire(&name);
        self.table.get_mut(index).unwrap().is_mdns = is_mdns;
    }

    /// Looks `name` up in the table of finished queries.
    ///
    /// This does not send anything; use [`Resolver::query`] to start a
    /// lookup. `"localhost"` always resolves to the loopback address of the
    /// configured family.
    pub fn lookup(&self, name: &str) -> Option<IpAddr> {
        let name = NameTable::canonicalize(name);
        if name == "localhost" {
            return Some(self.config.loopback());
        }
        self.table.lookup_done(&name)
    }

    /// Replaces the upstream unicast DNS server.
    ///
    /// In-flight queries are not restarted, but their next retransmit goes to
    /// the new server.
    pub fn set_server(&mut self, server: IpAddr) {
        log::info!("upstream DNS server is now {}", server);
        self.config.server = server;
        self.events.push_back(Event::ServerChanged(server));
    }

    /// Returns the configured upstream unicast DNS server.
    pub fn server(&self) -> IpAddr {
        self.config.server
    }

    /// Sets the local host name (answered for as `hostname.local`) and
    /// schedules a collision probe for it.
    pub fn set_hostname(&mut self, hostname: &str) {
        self.config.hostname = NameTable::canonicalize(hostname);
        if self.config.responder {
            self.probe_hostname();
        }
    }

    /// Returns the local host name.
    pub fn hostname(&self) -> &str {
        &self.config.hostname
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the next queued outgoing datagram.
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.out.pop_front()
    }

    /// Returns the next queued notification.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Returns whether any query is still waiting for the retry timer, i.e.
    /// whether [`Resolver::tick`] needs to keep running.
    pub fn has_pending(&self) -> bool {
        self.table.has_pending()
    }

    /// Advances the retry timer by one tick (nominally one second).
    ///
    /// At most one query datagram is emitted per tick, to avoid saturating
    /// constrained links.
    pub fn tick(&mut self) {
        for index in 0..NAME_TABLE_SIZE {
            let slot = self.table.get_mut(index).unwrap();
            match slot.state {
                SlotState::New => {
                    slot.state = SlotState::Asking;
                    slot.tmr = 1;
                    slot.retries = 0;
                }
                SlotState::Asking => {
                    slot.tmr -= 1;
                    if slot.tmr > 0 {
                        // Not due yet; move on to the next entry.
                        continue;
                    }
                    slot.retries += 1;
                    let cap = if slot.is_mdns {
                        self.config.max_mdns_retries
                    } else {
                        self.config.max_retries
                    };
                    if slot.retries >= cap {
                        slot.state = SlotState::Error;
                        let name = slot.name.clone();
                        log::debug!("query for {:?} timed out", name);
                        self.found(name, None);
                        continue;
                    }
                    slot.tmr = slot.retries;
                }
                _ => continue,
            }
            self.emit_query(index);
            break;
        }
    }

    /// Processes one inbound UDP datagram.
    ///
    /// Datagrams with an all-zero flag word are questions and go to the mDNS
    /// responder (when enabled); everything else is matched against the
    /// table via the transaction id. Malformed or unexpected datagrams are
    /// dropped without touching the table, so the retry timer recovers.
    pub fn handle_packet(&mut self, src: SocketAddr, data: &[u8]) {
        log::trace!("recv from {}: {}", src, Hex(data));
        let dec = match MessageDecoder::new(data) {
            Ok(dec) => dec,
            Err(e) => {
                log::warn!("dropping malformed packet from {}: {}", src, e);
                return;
            }
        };
        let header = *dec.header();

        if header.flags_raw() == 0 {
            // An incoming question.
            if self.config.responder {
                if let Some(reply) = responder::handle_query(&self.config, src, dec) {
                    self.out.push_back(reply);
                }
            }
            return;
        }

        let index = decode_index(header.id());
        if index >= NAME_TABLE_SIZE {
            log::debug!("bad id {:#06x} on incoming response", header.id());
            return;
        }
        if self.table.get(index).unwrap().state != SlotState::Asking {
            log::debug!("unexpected response for slot {}", index);
            return;
        }
        if header.answer_count() == 0 {
            // Nothing to extract; leave the slot asking so retries continue.
            return;
        }

        let rcode = header.rcode();
        if rcode != RCode::NO_ERROR {
            let slot = self.table.get_mut(index).unwrap();
            slot.state = SlotState::Error;
            slot.err = rcode.0 & 0x0f;
            let name = slot.name.clone();
            log::debug!("server answered {:?} with {} (rcode {})", name, rcode, slot.err);
            self.found(name, None);
            return;
        }

        // Scan the answer section for the first usable address record. The
        // slot is only touched once the outcome is known, so a packet that
        // turns out to be malformed is dropped with the slot still asking.
        let answers = match dec.answers() {
            Ok(answers) => answers,
            Err(e) => {
                log::warn!("dropping undecodable response from {}: {}", src, e);
                return;
            }
        };
        match self.first_usable_address(answers) {
            Ok(Some(addr)) => {
                let slot = self.table.get_mut(index).unwrap();
                slot.state = SlotState::Done;
                slot.addr = Some(addr);
                slot.err = 0;
                let name = slot.name.clone();
                log::debug!("resolved {:?} to {}", name, addr);
                self.found(name, Some(addr));
            }
            Ok(None) => {
                // Answers were present but none usable. Park the entry; the
                // asker can re-query if it still cares.
                let slot = self.table.get_mut(index).unwrap();
                slot.state = SlotState::Error;
                slot.err = 0;
                log::debug!("no usable answer for {:?}", slot.name);
            }
            Err(e) => {
                log::warn!("dropping undecodable response from {}: {}", src, e);
            }
        }
    }

    fn first_usable_address(
        &self,
        mut answers: MessageDecoder<'_, crate::packet::section::Answer>,
    ) -> Result<Option<IpAddr>, crate::Error> {
        for res in answers.iter() {
            let rr = res?;
            log::trace!("ANS: {}", rr);
            if rr.class() != Class::IN {
                continue;
            }
            // Records of the wrong type, or address records whose RDATA does
            // not match the address size, are skipped.
            let addr = match (self.config.is_ipv6(), rr.as_enum()) {
                (false, Some(Ok(Record::A(a)))) if rr.rdata().len() == 4 => IpAddr::V4(a.addr()),
                (true, Some(Ok(Record::AAAA(a)))) if rr.rdata().len() == 16 => {
                    IpAddr::V6(a.addr())
                }
                _ => continue,
            };
            return Ok(Some(addr));
        }
        Ok(None)
    }

    fn emit_query(&mut self, index: usize) {
        let slot = self.table.get(index).unwrap();
        let (slot_name, is_mdns) = (slot.name.clone(), slot.is_mdns);
        let name = match DomainName::from_str(&slot_name) {
            Ok(name) => name,
            Err(e) => {
                // `query` validated the name, so this only fires if the
                // stored name was corrupted; fail the entry.
                log::warn!("cannot encode name {:?}: {}", slot_name, e);
                self.table.get_mut(index).unwrap().state = SlotState::Error;
                self.found(slot_name, None);
                return;
            }
        };

        let mut header = Header::default();
        header.set_id(encode_index(index));
        if !is_mdns {
            header.set_recursion_desired(true);
        }

        let mut buf = [0; DNS_BUFFER_SIZE];
        let mut enc = MessageEncoder::new(&mut buf);
        enc.set_header(header);
        let qtype = if self.config.is_ipv6() {
            QType::AAAA
        } else {
            QType::A
        };
        enc.question(Question::new(&name).ty(qtype));
        let len = match enc.finish() {
            Ok(len) => len,
            Err(e) => {
                log::warn!("cannot encode query for {:?}: {}", slot_name, e);
                return;
            }
        };

        let dest = if is_mdns {
            self.config.mdns_group()
        } else {
            (self.config.server, DNS_PORT).into()
        };
        log::trace!("sending query for {:?} to {}: {}", slot_name, dest, Hex(&buf[..len]));
        self.out.push_back(Transmit {
            dest,
            payload: buf[..len].to_vec(),
        });
    }

    /// Finishes a lookup: broadcasts the result and runs the host-name
    /// collision check against it.
    fn found(&mut self, name: String, addr: Option<IpAddr>) {
        self.events.push_back(Event::Found {
            name: name.clone(),
            addr,
        });

        if let Some(addr) = addr {
            if self.config.responder && self.is_own_probe_name(&name) {
                if self.config.host_addrs.contains(&addr) {
                    // Just our own announcement coming back; not a collision.
                    return;
                }
                let renamed = next_hostname(&self.config.hostname);
                log::warn!(
                    "{:?} is already taken by {}; renaming to {:?}",
                    name,
                    addr,
                    renamed,
                );
                self.set_hostname(&renamed);
                self.events.push_back(Event::HostnameChanged(renamed));
            }
        }
    }

    fn is_own_probe_name(&self, name: &str) -> bool {
        let own = format!("{}.local", self.config.hostname);
        name.eq_ignore_ascii_case(&own)
    }

    /// Issues the mDNS self-query that detects host-name collisions.
    fn probe_hostname(&mut self) {
        let probe = format!("{}.local", self.config.hostname);
        self.query(&probe);
    }
}

/// Picks the next host name after a collision: `foo` becomes `foo-2`, `foo-2`
/// becomes `foo-3`, and so on. The result fits within [`MAX_HOSTNAME_LEN`].
fn next_hostname(current: &str) -> String {
    let (base, n) = match current.rsplit_once('-') {
        Some((base, digits)) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            (base, digits.parse::<u32>().map_or(2, |n| n.saturating_add(1)))
        }
        _ => (current, 2),
    };
    let suffix = format!("-{}", n);
    let mut base = base.to_owned();
    while base.len() + suffix.len() > MAX_HOSTNAME_LEN {
        base.pop();
    }
    base + &suffix
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use crate::hex;
    use crate::{MDNS_GROUP_V6, MDNS_PORT};

    use super::*;

    fn unicast_config() -> Config {
        Config {
            responder: false,
            ..Config::default()
        }
    }

    fn server_src() -> SocketAddr {
        (Ipv4Addr::new(8, 8, 8, 8), DNS_PORT).into()
    }

    fn decode_payload(payload: &[u8]) -> (Header, Vec<String>) {
        let mut dec = MessageDecoder::new(payload).unwrap();
        let header = *dec.header();
        let questions = dec
            .iter()
            .map(|q| q.unwrap().to_string())
            .collect::<Vec<_>>();
        (header, questions)
    }

    #[test]
    fn transaction_id_roundtrip() {
        for i in 0..=255 {
            assert_eq!(decode_index(encode_index(i)), i);
        }
    }

    #[test]
    fn distant_transaction_ids_do_not_alias() {
        // 256 slots away must not be mistaken for slot 0.
        assert!(decode_index(encode_index(0).wrapping_add(256)) >= NAME_TABLE_SIZE);
        assert!(decode_index(encode_index(0).wrapping_sub(1)) >= NAME_TABLE_SIZE);
    }

    #[test]
    fn unicast_a_lookup() {
        let mut r = Resolver::new(unicast_config());
        r.query("example.com");
        assert!(r.has_pending());
        r.tick();

        let t = r.poll_transmit().unwrap();
        assert_eq!(t.dest, server_src());
        let (header, questions) = decode_payload(&t.payload);
        assert_eq!(header.id(), 61616);
        assert!(header.is_recursion_desired());
        assert_eq!(questions, ["example.com.\tIN\tA"]);

        // Answer with a compressed name pointing at the question.
        let reply = hex::parse(
            "f0b081800001000100000000076578616d706c6503636f6d0000010001c00c000100010000012c00045db8d822",
        );
        r.handle_packet(server_src(), &reply);

        let addr: IpAddr = "93.184.216.34".parse().unwrap();
        assert_eq!(
            r.poll_event(),
            Some(Event::Found {
                name: "example.com".into(),
                addr: Some(addr),
            }),
        );
        assert_eq!(r.lookup("example.com"), Some(addr));
        // Trailing dots are canonicalized away on lookup, too.
        assert_eq!(r.lookup("example.com."), Some(addr));
        assert!(!r.has_pending());
    }

    #[test]
    fn nxdomain_reports_null_address() {
        let mut r = Resolver::new(unicast_config());
        r.query("example.com");
        r.tick();
        r.poll_transmit().unwrap();

        let reply = hex::parse(
            "f0b081030001000100000000076578616d706c6503636f6d0000010001c00c000100010000012c00045db8d822",
        );
        r.handle_packet(server_src(), &reply);

        assert_eq!(
            r.poll_event(),
            Some(Event::Found {
                name: "example.com".into(),
                addr: None,
            }),
        );
        assert_eq!(r.lookup("example.com"), None);
    }

    #[test]
    fn empty_answer_section_keeps_retrying() {
        let mut r = Resolver::new(unicast_config());
        r.query("example.com");
        r.tick();
        r.poll_transmit().unwrap();

        // A response with qd=1, an=0.
        let reply = hex::parse("f0b081800001000000000000076578616d706c6503636f6d0000010001");
        r.handle_packet(server_src(), &reply);

        assert_eq!(r.poll_event(), None);
        assert!(r.has_pending());
    }

    #[test]
    fn malformed_response_keeps_retrying() {
        let mut r = Resolver::new(unicast_config());
        r.query("example.com");
        r.tick();
        r.poll_transmit().unwrap();

        // Claims one answer but the record is cut short.
        let reply = hex::parse("f0b081800000000100000000c00c0001");
        r.handle_packet(server_src(), &reply);

        assert_eq!(r.poll_event(), None);
        assert!(r.has_pending());
    }

    #[test]
    fn retry_exhaustion() {
        let mut r = Resolver::new(unicast_config());
        r.query("nowhere.test");

        let mut sent_at = Vec::new();
        let mut error_at = None;
        for tick in 1..=64 {
            r.tick();
            if r.poll_transmit().is_some() {
                sent_at.push(tick);
            }
            if r.poll_event().is_some() {
                error_at = Some(tick);
                break;
            }
        }

        // Initial transmission plus retries with growing back-off, then the
        // failure notification one full back-off interval after the last
        // retransmit.
        assert_eq!(sent_at, [1, 2, 3, 5, 8, 12, 17, 23]);
        assert_eq!(sent_at.len(), usize::from(Config::default().max_retries));
        assert_eq!(error_at, Some(30));
        assert_eq!(r.lookup("nowhere.test"), None);
        assert!(!r.has_pending());
    }

    #[test]
    fn mdns_suffix_routing() {
        let mut r = Resolver::new(Config {
            responder: false,
            ..Config::ipv6()
        });
        r.query("printer.local");
        r.tick();

        let t = r.poll_transmit().unwrap();
        assert_eq!(t.dest, SocketAddr::from((MDNS_GROUP_V6, MDNS_PORT)));
        let (header, questions) = decode_payload(&t.payload);
        assert_eq!(header.flags_raw(), 0);
        assert_eq!(questions, ["printer.local.\tIN\tAAAA"]);
    }

    #[test]
    fn bare_local_is_not_mdns() {
        let mut r = Resolver::new(unicast_config());
        r.query("local");
        r.tick();

        let t = r.poll_transmit().unwrap();
        assert_eq!(t.dest, server_src());
    }

    #[test]
    fn mdns_retry_cap_is_lower() {
        let mut r = Resolver::new(Config {
            responder: false,
            ..Config::ipv6()
        });
        r.query("printer.local");

        let mut sent = 0;
        for _ in 0..64 {
            r.tick();
            if r.poll_transmit().is_some() {
                sent += 1;
            }
            if r.poll_event().is_some() {
                break;
            }
        }
        assert_eq!(sent, u32::from(Config::default().max_mdns_retries));
    }

    #[test]
    fn lru_eviction_forgets_the_oldest_query() {
        let mut r = Resolver::new(unicast_config());
        for name in ["one.test", "two.test", "three.test", "four.test"] {
            r.query(name);
        }
        r.query("five.test");

        // The fifth query displaced the first; a reply addressed to slot 0
        // now finishes "five.test", not "one.test".
        r.tick();
        let t = r.poll_transmit().unwrap();
        let (header, questions) = decode_payload(&t.payload);
        assert_eq!(header.id(), 61616);
        assert_eq!(questions, ["five.test.\tIN\tA"]);
    }

    #[test]
    fn localhost_is_answered_from_the_loopback() {
        let r = Resolver::new(unicast_config());
        assert_eq!(
            r.lookup("localhost"),
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        );

        let r = Resolver::new(Config {
            responder: false,
            ..Config::ipv6()
        });
        assert_eq!(r.lookup("localhost"), Some(IpAddr::V6(Ipv6Addr::LOCALHOST)));
    }

    #[test]
    fn set_server_redirects_the_next_retransmit() {
        let mut r = Resolver::new(unicast_config());
        r.query("example.com");
        r.tick();
        assert_eq!(r.poll_transmit().unwrap().dest, server_src());

        let new_server: IpAddr = "9.9.9.9".parse().unwrap();
        r.set_server(new_server);
        assert_eq!(r.poll_event(), Some(Event::ServerChanged(new_server)));
        assert_eq!(r.server(), new_server);

        // The in-flight slot was not restarted, but its retransmit now
        // targets the new server.
        r.tick();
        assert_eq!(
            r.poll_transmit().unwrap().dest,
            SocketAddr::from((new_server, DNS_PORT)),
        );
    }

    #[test]
    fn unencodable_name_fails_without_a_slot() {
        let mut r = Resolver::new(unicast_config());
        r.query("bad..name");
        assert_eq!(
            r.poll_event(),
            Some(Event::Found {
                name: "bad..name".into(),
                addr: None,
            }),
        );
        assert!(!r.has_pending());
    }

    #[test]
    fn hostname_collision_renames() {
        let ours: IpAddr = "fe80::1".parse().unwrap();
        let mut r = Resolver::new(Config {
            host_addrs: vec![ours],
            ..Config::ipv6()
        });
        assert_eq!(r.hostname(), "contiki");
        // The constructor scheduled the self-probe.
        assert!(r.has_pending());
        r.tick();
        let t = r.poll_transmit().unwrap();
        let (_, questions) = decode_payload(&t.payload);
        assert_eq!(questions, ["contiki.local.\tIN\tAAAA"]);

        // Someone else already has the name.
        let theirs = hex::parse(
            "f0b08400000000010000000007436f4e74496b49056c6f63616c00001c8001000000780010fe800000000000000000000000000002",
        );
        let src: SocketAddr = "[fe80::2]:5353".parse().unwrap();
        r.handle_packet(src, &theirs);

        assert_eq!(
            r.poll_event(),
            Some(Event::Found {
                name: "contiki.local".into(),
                addr: Some("fe80::2".parse().unwrap()),
            }),
        );
        assert_eq!(
            r.poll_event(),
            Some(Event::HostnameChanged("contiki-2".into())),
        );
        assert_eq!(r.hostname(), "contiki-2");
        // The rename scheduled a fresh probe.
        assert!(r.has_pending());
        r.tick();
        let t = r.poll_transmit().unwrap();
        let (_, questions) = decode_payload(&t.payload);
        assert_eq!(questions, ["contiki-2.local.\tIN\tAAAA"]);
    }

    #[test]
    fn own_announcement_is_not_a_collision() {
        let ours: IpAddr = "fe80::1".parse().unwrap();
        let mut r = Resolver::new(Config {
            host_addrs: vec![ours],
            ..Config::ipv6()
        });
        r.tick();
        r.poll_transmit().unwrap();

        // An answer carrying our own address: no rename.
        let echo = hex::parse(
            "f0b08400000000010000000007636f6e74696b69056c6f63616c00001c8001000000780010fe800000000000000000000000000001",
        );
        let src: SocketAddr = "[fe80::1]:5353".parse().unwrap();
        r.handle_packet(src, &echo);

        assert!(matches!(r.poll_event(), Some(Event::Found { .. })));
        assert_eq!(r.poll_event(), None);
        assert_eq!(r.hostname(), "contiki");
    }

    #[test]
    fn next_hostname_sequence() {
        assert_eq!(next_hostname("contiki"), "contiki-2");
        assert_eq!(next_hostname("contiki-2"), "contiki-3");
        assert_eq!(next_hostname("contiki-9"), "contiki-10");
        assert_eq!(next_hostname("dash-board"), "dash-board-2");

        let long = "h".repeat(MAX_HOSTNAME_LEN);
        let renamed = next_hostname(&long);
        assert!(renamed.len() <= MAX_HOSTNAME_LEN);
        assert!(renamed.ends_with("-2"));
    }
}
