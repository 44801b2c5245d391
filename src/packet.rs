//! (m)DNS packet decoder and encoder.

pub mod decoder;
pub mod encoder;
pub mod error;
pub mod name;
pub mod records;
pub mod section;

use core::fmt;

use bitflags::bitflags;

pub use error::Error;

/// Big-endian `u16` as it appears on the wire.
#[derive(Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(transparent)]
pub(crate) struct U16(u16);

impl U16 {
    pub(crate) fn get(self) -> u16 {
        u16::from_be(self.0)
    }
}

impl From<u16> for U16 {
    fn from(value: u16) -> Self {
        Self(value.to_be())
    }
}

/// Big-endian `u32` as it appears on the wire.
#[derive(Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(transparent)]
pub(crate) struct U32(u32);

impl U32 {
    pub(crate) fn get(self) -> u32 {
        u32::from_be(self.0)
    }
}

impl From<u32> for U32 {
    fn from(value: u32) -> Self {
        Self(value.to_be())
    }
}

/// Generates a newtype over a raw wire field, plus named constants for the
/// values this crate knows about.
///
/// Decoding one of these never fails: an unknown discriminant is carried
/// along as-is and rendered as `Name(0x2a)`. Known values print their
/// mnemonic, in both `Debug` and `Display`.
macro_rules! wire_enum {
    (
        $( #[$attrs:meta] )*
        $v:vis enum $name:ident($raw:ty) {
            $(
                $( #[$value_attrs:meta] )*
                $mnemonic:ident = $value:expr,
            )+
        }
    ) => {
        $( #[$attrs] )*
        #[derive(Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(transparent)]
        $v struct $name(pub(crate) $raw);

        impl $name {
            $(
                $( #[$value_attrs] )*
                $v const $mnemonic: Self = Self($value);
            )+

            fn mnemonic(self) -> Option<&'static str> {
                match self {
                    $( Self::$mnemonic => Some(stringify!($mnemonic)), )+
                    _ => None,
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.mnemonic() {
                    Some(mnemonic) => f.write_str(mnemonic),
                    None => write!(f, "{}({:#x})", stringify!($name), self.0),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

wire_enum! {
    /// DNS message operation codes.
    pub enum Opcode(u8) {
        /// Query (or response to a query).
        QUERY = 0,
        /// Inverse query. Optional; servers may not support it.
        IQUERY = 1,
        /// Server status request.
        STATUS = 2,
    }
}

wire_enum! {
    /// Server response codes.
    ///
    /// Only rcodes with a value of 15 or less fit in the packet's [`Header`].
    pub enum RCode(u8) {
        /// No error.
        NO_ERROR = 0,
        /// The query sent by the client was erroneous.
        FORM_ERR = 1,
        /// A server-side error prevented processing of the query.
        SERV_FAIL = 2,
        /// The queried domain name does not exist.
        ///
        /// May only be sent by an authoritative name server.
        NX_DOMAIN = 3,
        /// The requested query type is not supported by the server.
        NOT_IMP = 4,
        /// The server refused to answer the query for policy reasons.
        REFUSED = 5,
    }
}

wire_enum! {
    /// Resource Record types.
    pub enum Type(u16) {
        A = 1,
        CNAME = 5,
        PTR = 12,
        MX = 15,
        TXT = 16,
        AAAA = 28,
        SRV = 33,
    }
}

wire_enum! {
    /// The queried resource type that a client is interested in.
    pub enum QType(u16) {
        // Prefix is identical to `Type`.
        A = 1,
        CNAME = 5,
        PTR = 12,
        MX = 15,
        TXT = 16,
        AAAA = 28,
        SRV = 33,

        /// Query is for all record types.
        ANY = 255,
    }
}

impl QType {
    pub fn matches(&self, ty: Type) -> bool {
        *self == Self::ANY || self.0 == ty.0
    }
}

wire_enum! {
    /// Resource Record classes.
    pub enum Class(u16) {
        /// The Internet.
        IN = 1,
    }
}

wire_enum! {
    /// The queried resource class.
    pub enum QClass(u16) {
        // Prefix is identical to `Class`.

        /// The Internet.
        IN = 1,

        /// Query is for all classes of resource.
        ANY = 255,
    }
}

impl QClass {
    pub fn matches(&self, class: Class) -> bool {
        *self == Self::ANY || self.0 == class.0
    }
}

// Bit positions in the header flags are inverted, because RFC 1035 starts counting at the MSb.
const fn be_pos(pos: u16) -> u16 {
    15 - pos
}

bitflags! {
    #[derive(Debug)]
    #[repr(transparent)]
    struct HeaderFlags: u16 {
        /// If set, the message is a response to a query. If unset, it is a query.
        const QR = 1 << be_pos(0);
        const OPCODE = Self::OPCODE_MASK;
        /// Set if this response was sent from a name server that is the
        /// authority for the queried domain name.
        const AA = 1 << be_pos(5);
        /// Set if the message was truncated because it is longer than the
        /// maximum allowed length of the transmission channel.
        const TC = 1 << be_pos(6);
        /// Recursion Desired: set in a query to instruct recursive resolvers
        /// to perform a recursive query. The bit is copied to the response.
        const RD = 1 << be_pos(7);
        /// Recursion Available: set in a response to indicate that the
        /// responding server supports recursion.
        const RA = 1 << be_pos(8);
        const Z = 0b111 << be_pos(9);
        const RCODE = Self::RCODE_MASK;
    }
}

impl HeaderFlags {
    const OPCODE_POS: u16 = 11;
    const OPCODE_MASK: u16 = 0b1111 << Self::OPCODE_POS;

    const RCODE_POS: u16 = 0;
    const RCODE_MASK: u16 = 0b1111 << Self::RCODE_POS;

    fn opcode(&self) -> Opcode {
        Opcode(((self.bits() & Self::OPCODE_MASK) >> Self::OPCODE_POS) as u8)
    }

    fn rcode(&self) -> RCode {
        RCode(((self.bits() & Self::RCODE_MASK) >> Self::RCODE_POS) as u8)
    }
}

/// Packet header.
#[derive(Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C, packed)]
pub struct Header {
    id: U16,
    flags: U16,
    qdcount: U16,
    ancount: U16,
    nscount: U16,
    arcount: U16,
}

impl Header {
    fn flags(&self) -> HeaderFlags {
        HeaderFlags::from_bits_retain(self.flags.get())
    }

    fn modify_flags(&mut self, with: impl FnOnce(&mut HeaderFlags)) {
        let mut flags = self.flags();
        with(&mut flags);
        self.flags = flags.bits().into();
    }

    /// Returns the raw 16-bit flag word.
    ///
    /// Inbound mDNS questions are recognized by an all-zero flag word, so the
    /// resolver needs the unparsed value.
    #[inline]
    pub(crate) fn flags_raw(&self) -> u16 {
        self.flags.get()
    }

    /// Returns the 16-bit packet ID.
    ///
    /// Servers copy this ID to the corresponding response packet so that the
    /// client can identify responses to its queries.
    #[inline]
    pub fn id(&self) -> u16 {
        self.id.get()
    }

    #[inline]
    pub fn set_id(&mut self, id: u16) {
        self.id = id.into();
    }

    #[inline]
    pub fn is_query(&self) -> bool {
        !self.is_response()
    }

    #[inline]
    pub fn is_response(&self) -> bool {
        self.flags().contains(HeaderFlags::QR)
    }

    pub fn set_response(&mut self, is_response: bool) {
        self.modify_flags(|f| f.set(HeaderFlags::QR, is_response));
    }

    /// Returns whether the truncation flag is set, indicating that the
    /// message was cut off to fit in the transport channel.
    pub fn is_truncated(&self) -> bool {
        self.flags().contains(HeaderFlags::TC)
    }

    pub fn set_truncated(&mut self, trunc: bool) {
        self.modify_flags(|f| f.set(HeaderFlags::TC, trunc));
    }

    pub fn is_recursion_desired(&self) -> bool {
        self.flags().contains(HeaderFlags::RD)
    }

    pub fn set_recursion_desired(&mut self, rd: bool) {
        self.modify_flags(|f| f.set(HeaderFlags::RD, rd));
    }

    pub fn is_recursion_available(&self) -> bool {
        self.flags().contains(HeaderFlags::RA)
    }

    pub fn set_recursion_available(&mut self, ra: bool) {
        self.modify_flags(|f| f.set(HeaderFlags::RA, ra));
    }

    pub fn is_authority(&self) -> bool {
        self.flags().contains(HeaderFlags::AA)
    }

    pub fn set_authority(&mut self, aa: bool) {
        self.modify_flags(|f| f.set(HeaderFlags::AA, aa));
    }

    pub fn opcode(&self) -> Opcode {
        self.flags().opcode()
    }

    pub fn set_opcode(&mut self, opcode: Opcode) {
        self.modify_flags(|f| {
            f.remove(HeaderFlags::OPCODE);
            *f.0.bits_mut() |=
                (u16::from(opcode.0) << HeaderFlags::OPCODE_POS) & HeaderFlags::OPCODE_MASK;
        });
    }

    pub fn rcode(&self) -> RCode {
        self.flags().rcode()
    }

    pub fn set_rcode(&mut self, rcode: RCode) {
        self.modify_flags(|f| {
            f.remove(HeaderFlags::RCODE);
            *f.0.bits_mut() |=
                (u16::from(rcode.0) << HeaderFlags::RCODE_POS) & HeaderFlags::RCODE_MASK;
        });
    }

    pub fn question_count(&self) -> u16 {
        self.qdcount.get()
    }

    pub fn answer_count(&self) -> u16 {
        self.ancount.get()
    }

    pub fn authoritative_count(&self) -> u16 {
        self.nscount.get()
    }

    pub fn additional_count(&self) -> u16 {
        self.arcount.get()
    }

    pub(crate) fn set_qdcount(&mut self, qdcount: u16) {
        self.qdcount = qdcount.into();
    }

    pub(crate) fn set_ancount(&mut self, ancount: u16) {
        self.ancount = ancount.into();
    }

    pub(crate) fn set_nscount(&mut self, nscount: u16) {
        self.nscount = nscount.into();
    }

    pub(crate) fn set_arcount(&mut self, arcount: u16) {
        self.arcount = arcount.into();
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("id", &self.id())
            .field("flags", &self.flags())
            .field("qdcount", &self.qdcount.get())
            .field("ancount", &self.ancount.get())
            .field("nscount", &self.nscount.get())
            .field("arcount", &self.arcount.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header() {
        let mut h = Header::default();
        assert!(h.is_query());
        assert!(!h.is_authority());
        assert!(!h.is_response());
        assert!(!h.is_recursion_available());
        assert!(!h.is_recursion_desired());
        assert_eq!(h.flags_raw(), 0);

        assert_eq!(h.opcode(), Opcode::QUERY);
        h.set_opcode(Opcode::STATUS);
        assert_eq!(h.opcode(), Opcode::STATUS);
        h.set_opcode(Opcode::QUERY);
        assert_eq!(h.opcode(), Opcode::QUERY);

        assert_eq!(h.rcode(), RCode::NO_ERROR);
        h.set_rcode(RCode::REFUSED);
        assert_eq!(h.rcode(), RCode::REFUSED);
        h.set_rcode(RCode::NO_ERROR);
        assert_eq!(h.rcode(), RCode::NO_ERROR);

        h.set_response(true);
        h.set_authority(true);
        // flags1 = 0x84: response + authoritative
        assert_eq!(h.flags_raw(), 0x8400);
    }

    #[test]
    fn qtype_matching() {
        assert!(QType::ANY.matches(Type::A));
        assert!(QType::ANY.matches(Type::AAAA));
        assert!(QType::AAAA.matches(Type::AAAA));
        assert!(!QType::AAAA.matches(Type::A));
    }
}
