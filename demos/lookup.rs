use std::{env, io, ops::ControlFlow};

use log::LevelFilter;
use miniresolv::{driver::Driver, resolver::Resolver, Config, Event};

fn main() -> io::Result<()> {
    env_logger::Builder::new()
        .filter_module("miniresolv", LevelFilter::Trace)
        .filter_module(env!("CARGO_CRATE_NAME"), LevelFilter::Trace)
        .init();

    let name = match env::args().skip(1).next() {
        Some(name) => name,
        None => "example.com".into(),
    };

    let resolver = Resolver::new(Config {
        responder: false,
        ..Config::default()
    });
    let mut driver = Driver::new(resolver)?;
    driver.resolver_mut().query(&name);
    driver.run(|resolver, event| {
        if let Event::Found { name, addr } = event {
            match addr {
                Some(addr) => println!("{} resolved to {}", name, addr),
                None => println!("{} could not be resolved", name),
            }
            // `lookup` keeps serving the answer from the table.
            log::debug!("cached: {:?}", resolver.lookup(&name));
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    })
}
