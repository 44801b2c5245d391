//! The mDNS responder.
//!
//! Answers inbound multicast questions for the local host name,
//! authoritatively and with the cache-flush bit set. Questions for any other
//! name are somebody else's business and are ignored.

use std::net::{Ipv6Addr, SocketAddr};

use crate::{
    packet::{
        decoder::MessageDecoder,
        encoder::{AnswerName, MessageEncoder, ResourceRecord},
        name::DomainName,
        records::Record,
        section, Header, QClass, QType,
    },
    Config, Transmit, MDNS_BUFFER_SIZE, MDNS_PORT,
};

/// TTL of the records we answer with, in seconds.
const ANSWER_TTL: u32 = 120;

/// Handles an inbound question message.
///
/// Returns the reply to send, or [`None`] when the message contains no
/// question we are authoritative for. Only the first matching question is
/// answered.
pub(crate) fn handle_query(
    config: &Config,
    src: SocketAddr,
    mut dec: MessageDecoder<'_, section::Question>,
) -> Option<Transmit> {
    let header = *dec.header();
    if header.question_count() == 0 {
        return None;
    }
    if header.answer_count() != 0 {
        // Queries carrying answers (e.g. known-answer suppression) are
        // valid, but not handled.
        return None;
    }

    let own_name: DomainName = match format!("{}.local", config.hostname).parse() {
        Ok(name) => name,
        Err(e) => {
            log::warn!("local host name {:?} is not usable: {}", config.hostname, e);
            return None;
        }
    };
    let own_qtype = if config.is_ipv6() {
        QType::AAAA
    } else {
        QType::A
    };

    for res in dec.iter() {
        let q = match res {
            Ok(q) => q,
            Err(e) => {
                log::debug!("dropping undecodable question from {}: {}", src, e);
                return None;
            }
        };
        log::trace!("Q: {}", q);

        if q.qclass() != QClass::IN {
            continue;
        }
        if q.qtype() != QType::ANY && q.qtype() != own_qtype {
            continue;
        }
        if !q.qname().eq_ignore_ascii_case(&own_name) {
            continue;
        }

        log::debug!("answering {} for {}", q, src);
        let payload = build_response(config, header.id(), q.qname())?;

        // Questions sent from the mDNS port get a multicast reply; one-shot
        // askers on an ephemeral port get their answer back directly.
        let dest = if src.port() == MDNS_PORT {
            config.mdns_group()
        } else {
            src
        };
        return Some(Transmit { dest, payload });
    }

    None
}

/// Builds the authoritative response: one record per usable local address,
/// all but the first owner name compressed to a pointer at the first one.
fn build_response(config: &Config, id: u16, name: &DomainName) -> Option<Vec<u8>> {
    let records = eligible_records(config);
    if records.is_empty() {
        log::debug!("no usable local address to answer with");
        return None;
    }

    let mut header = Header::default();
    header.set_id(id);
    header.set_response(true);
    header.set_authority(true);

    let mut buf = [0; MDNS_BUFFER_SIZE];
    let mut enc = MessageEncoder::new(&mut buf);
    enc.set_header(header);
    let mut enc = enc.answers();
    for (i, record) in records.iter().enumerate() {
        let owner = if i == 0 {
            AnswerName::Name(name)
        } else {
            AnswerName::Pointer(std::mem::size_of::<Header>() as u16)
        };
        enc.add_answer(
            ResourceRecord::new(owner, record)
                .cache_flush(true)
                .ttl(ANSWER_TTL),
        );
    }
    // A truncated reply is still worth sending.
    let len = enc.finish().unwrap_or(buf.len());
    Some(buf[..len].to_vec())
}

/// The addresses this host answers with: for IPv6 every configured address
/// passing the scope rule, for IPv4 the first configured address.
fn eligible_records(config: &Config) -> Vec<Record> {
    if config.is_ipv6() {
        config
            .host_addrs
            .iter()
            .filter(|addr| match addr {
                std::net::IpAddr::V6(v6) => config.include_global_v6 || is_link_local(v6),
                _ => false,
            })
            .map(|addr| Record::from_addr(*addr))
            .collect()
    } else {
        config
            .host_addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .map(|addr| Record::from_addr(*addr))
            .into_iter()
            .collect()
    }
}

fn is_link_local(addr: &Ipv6Addr) -> bool {
    // fe80::/10
    addr.segments()[0] & 0xffc0 == 0xfe80
}
