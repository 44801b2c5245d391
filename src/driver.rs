//! Blocking host loop for the resolver.
//!
//! [`Driver`] owns the UDP socket and pumps a [`Resolver`]: received
//! datagrams go in, queued transmits go out, and the read timeout provides
//! the one-second retry tick. Hosts with their own event loop can skip this
//! module and drive the [`Resolver`] directly.

use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, UdpSocket},
    ops::ControlFlow,
    time::Duration,
};

use socket2::{Domain, Protocol, Socket, Type};

use crate::{
    resolver::Resolver, Event, MDNS_BUFFER_SIZE, MDNS_GROUP_V4, MDNS_GROUP_V6, MDNS_PORT,
};

/// A blocking driver that connects a [`Resolver`] to a UDP socket.
pub struct Driver {
    resolver: Resolver,
    sock: UdpSocket,
}

impl Driver {
    /// Cadence of the retry timer.
    const TICK: Duration = Duration::from_secs(1);

    /// Creates a driver, binding the socket the resolver needs.
    ///
    /// With the responder enabled this binds port 5353 (with address reuse,
    /// so it coexists with other mDNS stacks on the machine) and joins the
    /// mDNS group; otherwise an ephemeral port is used. Multicast loopback is
    /// disabled so the responder does not answer its own collision probes.
    pub fn new(resolver: Resolver) -> io::Result<Self> {
        let ipv6 = resolver.config().server.is_ipv6();
        let sock = if resolver.config().responder {
            let sock = if ipv6 {
                let sock = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
                sock.set_reuse_address(true)?;
                sock.bind(&SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, MDNS_PORT, 0, 0).into())?;
                let sock = UdpSocket::from(sock);
                sock.join_multicast_v6(&MDNS_GROUP_V6, 0)?;
                sock.set_multicast_loop_v6(false)?;
                sock
            } else {
                let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
                sock.set_reuse_address(true)?;
                sock.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT).into())?;
                let sock = UdpSocket::from(sock);
                sock.join_multicast_v4(&MDNS_GROUP_V4, &Ipv4Addr::UNSPECIFIED)?;
                sock.set_multicast_loop_v4(false)?;
                sock
            };
            sock
        } else {
            let bind_addr: SocketAddr = if ipv6 {
                (Ipv6Addr::UNSPECIFIED, 0).into()
            } else {
                (Ipv4Addr::UNSPECIFIED, 0).into()
            };
            UdpSocket::bind(bind_addr)?
        };
        sock.set_read_timeout(Some(Self::TICK))?;

        Ok(Self { resolver, sock })
    }

    /// Returns the driven resolver.
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Returns the driven resolver for issuing commands.
    pub fn resolver_mut(&mut self) -> &mut Resolver {
        &mut self.resolver
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.sock
    }

    /// Runs the loop: flush transmits, deliver events to `callback`, then
    /// wait for a datagram or the next tick.
    ///
    /// The callback decides when to stop by returning
    /// [`ControlFlow::Break`]; queries can be issued from within it through
    /// the `&mut Resolver` it receives.
    pub fn run<C>(&mut self, mut callback: C) -> io::Result<()>
    where
        C: FnMut(&mut Resolver, Event) -> ControlFlow<()>,
    {
        let mut recv_buf = [0; MDNS_BUFFER_SIZE];
        loop {
            self.flush()?;
            while let Some(event) = self.resolver.poll_event() {
                if let ControlFlow::Break(()) = callback(&mut self.resolver, event) {
                    return Ok(());
                }
            }

            match self.sock.recv_from(&mut recv_buf) {
                Ok((len, addr)) => {
                    self.resolver.handle_packet(addr, &recv_buf[..len]);
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    // The retry timer is only armed while queries are pending.
                    if self.resolver.has_pending() {
                        self.resolver.tick();
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        while let Some(transmit) = self.resolver.poll_transmit() {
            log::trace!("send {} bytes to {}", transmit.payload.len(), transmit.dest);
            self.sock.send_to(&transmit.payload, transmit.dest)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::Config;

    use super::*;

    #[test]
    fn binds_an_ephemeral_port_without_the_responder() {
        let resolver = Resolver::new(Config {
            responder: false,
            ..Config::default()
        });
        let driver = Driver::new(resolver).unwrap();
        assert_ne!(driver.socket().local_addr().unwrap().port(), 0);
    }
}
