//! DNS resource records.
//!
//! Only host address records (A and AAAA) are modeled; other record types are
//! skipped by the resolver and can be inspected as raw RDATA through
//! [`decoder::ResourceRecord::rdata`].
//!
//! [`decoder::ResourceRecord::rdata`]: super::decoder::ResourceRecord::rdata

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use super::{
    decoder::{self, Reader},
    encoder::Writer,
    Error, Type,
};

pub struct ResourceRecordEncoder<'a> {
    pub(crate) w: Writer<'a>,
}

pub struct ResourceRecordDecoder<'a> {
    pub(crate) r: Reader<'a>,
}

/// Trait implemented by all resource record types.
pub trait ResourceRecordData: Sized {
    /// The associated resource record type.
    const TYPE: Type;

    /// Writes the data of this resource record to the given encoder.
    fn encode(&self, enc: &mut ResourceRecordEncoder<'_>);

    /// Attempts to decode an instance of this resource record from an RDATA
    /// field.
    fn decode(r: &mut ResourceRecordDecoder<'_>) -> Result<Self, Error>;
}

macro_rules! records {
    (
        $($record:ident),+ $(,)?
    ) => {
        /// Enumeration of all supported Resource Record types.
        #[non_exhaustive]
        #[derive(Debug, PartialEq, Eq, Clone)]
        pub enum Record {
            $( $record($record), )+
        }

        impl Record {
            pub(crate) fn from_rr(rr: &decoder::ResourceRecord<'_>) -> Option<Result<Self, Error>> {
                let r = &mut ResourceRecordDecoder {
                    r: rr.rdata.clone(),
                };
                Some(match rr.type_() {
                    $( Type::$record => $record::decode(r).map(Self::$record), )+
                    _ => return None,
                })
            }

            pub(crate) fn encode(&self, enc: &mut ResourceRecordEncoder<'_>) {
                match self {
                    $( Record::$record(rr) => rr.encode(enc), )+
                }
            }

            pub fn record_type(&self) -> Type {
                match self {
                    $( Record::$record(_) => Type::$record, )+
                }
            }
        }

        impl fmt::Display for Record {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $( Record::$record(r) => r.fmt(f), )+
                }
            }
        }
    };
}

records!(A, AAAA);

impl Record {
    /// Wraps an IP address in the record type of its family.
    pub fn from_addr(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Record::A(A::new(v4)),
            IpAddr::V6(v6) => Record::AAAA(AAAA::new(v6)),
        }
    }

    /// Returns the contained host address.
    pub fn addr(&self) -> IpAddr {
        match self {
            Record::A(a) => IpAddr::V4(a.addr()),
            Record::AAAA(a) => IpAddr::V6(a.addr()),
        }
    }
}

/// An IPv4 host address record.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct A {
    addr: Ipv4Addr,
}

impl ResourceRecordData for A {
    const TYPE: Type = Type::A;

    fn encode(&self, enc: &mut ResourceRecordEncoder<'_>) {
        enc.w.write_slice(&self.addr.octets());
    }

    fn decode(dec: &mut ResourceRecordDecoder<'_>) -> Result<Self, Error> {
        Ok(Self {
            addr: Ipv4Addr::from(*dec.r.read_array()?),
        })
    }
}

impl A {
    #[inline]
    pub fn new(addr: Ipv4Addr) -> Self {
        Self { addr }
    }

    #[inline]
    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }
}

impl fmt::Display for A {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.addr.fmt(f)
    }
}

/// An IPv6 host address record.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct AAAA {
    addr: Ipv6Addr,
}

impl ResourceRecordData for AAAA {
    const TYPE: Type = Type::AAAA;

    fn encode(&self, enc: &mut ResourceRecordEncoder<'_>) {
        enc.w.write_slice(&self.addr.octets());
    }

    fn decode(dec: &mut ResourceRecordDecoder<'_>) -> Result<Self, Error> {
        Ok(Self {
            addr: Ipv6Addr::from(*dec.r.read_array()?),
        })
    }
}

impl AAAA {
    #[inline]
    pub fn new(addr: Ipv6Addr) -> Self {
        Self { addr }
    }

    #[inline]
    pub fn addr(&self) -> Ipv6Addr {
        self.addr
    }
}

impl fmt::Display for AAAA {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.addr.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<R: ResourceRecordData + PartialEq + std::fmt::Debug>(rr: R) {
        let mut buf = [0; 64];
        let mut enc = ResourceRecordEncoder {
            w: Writer::new(&mut buf),
        };
        rr.encode(&mut enc);
        let pos = enc.w.pos;
        let buf = &buf[..pos];
        let mut dec = ResourceRecordDecoder {
            r: Reader::new(buf),
        };
        let decoded = R::decode(&mut dec).unwrap();
        assert_eq!(rr, decoded);
    }

    #[test]
    fn test_roundtrip() {
        roundtrip(A::new(Ipv4Addr::new(93, 184, 216, 34)));
        roundtrip(AAAA::new(Ipv6Addr::LOCALHOST));
    }

    #[test]
    fn short_rdata_is_rejected() {
        let mut dec = ResourceRecordDecoder {
            r: Reader::new(&[127, 0, 0]),
        };
        assert_eq!(A::decode(&mut dec), Err(Error::Eof));
    }
}
