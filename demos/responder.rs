use std::{env, io, net::IpAddr, ops::ControlFlow};

use log::LevelFilter;
use miniresolv::{driver::Driver, resolver::Resolver, Config, Event};

fn main() -> io::Result<()> {
    env_logger::Builder::new()
        .filter_module("miniresolv", LevelFilter::Trace)
        .filter_module(env!("CARGO_CRATE_NAME"), LevelFilter::Trace)
        .init();

    let mut args = env::args().skip(1);
    let hostname = match args.next() {
        Some(hostname) => hostname,
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "usage: responder <hostname> <address>...",
            ))
        }
    };
    let host_addrs = args
        .map(|arg| {
            arg.parse::<IpAddr>()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
        })
        .collect::<io::Result<Vec<_>>>()?;
    if host_addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "need at least one address to answer with",
        ));
    }

    let base = if host_addrs[0].is_ipv6() {
        Config::ipv6()
    } else {
        Config::default()
    };
    let resolver = Resolver::new(Config {
        hostname,
        host_addrs,
        ..base
    });
    println!("answering for {}.local", resolver.hostname());

    let mut driver = Driver::new(resolver)?;
    driver.run(|_resolver, event| {
        if let Event::HostnameChanged(name) = event {
            println!("name collision, now answering for {}.local", name);
        }
        ControlFlow::Continue(())
    })
}
