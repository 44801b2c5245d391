//! DNS packet encoder.

use core::marker::PhantomData;
use std::mem::{align_of, size_of};

use bytemuck::Zeroable;

use super::{
    name::DomainName,
    records::{Record, ResourceRecordEncoder},
    section::{self, Section},
    Class, Error, Header, QClass, QType,
};

pub(crate) struct Writer<'a> {
    buf: &'a mut [u8],
    pub(crate) pos: usize,
    trunc: bool,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            trunc: false,
        }
    }

    fn modify_header(&mut self, with: impl FnOnce(&mut Header)) {
        assert_eq!(align_of::<Header>(), 1);

        let h = bytemuck::from_bytes_mut(&mut self.buf[..size_of::<Header>()]);
        with(h);
    }

    pub(crate) fn write_slice(&mut self, data: &[u8]) {
        let buf = &mut self.buf[self.pos..];
        if data.len() > buf.len() {
            self.trunc = true;
            buf.copy_from_slice(&data[..buf.len()]);
            self.pos += buf.len();
        } else {
            buf[..data.len()].copy_from_slice(data);
            self.pos += data.len();
        }
    }

    pub(crate) fn write_u8(&mut self, b: u8) {
        self.write_slice(&[b]);
    }

    pub(crate) fn write_u16(&mut self, v: u16) {
        self.write_slice(&v.to_be_bytes());
    }

    pub(crate) fn write_u32(&mut self, v: u32) {
        self.write_slice(&v.to_be_bytes());
    }

    pub(crate) fn write_domain_name(&mut self, name: &DomainName) {
        for label in name.labels() {
            self.write_u8(label.as_bytes().len() as u8);
            self.write_slice(label.as_bytes());
        }
        // Implicit root label at the end.
        self.write_u8(0);
    }

    fn write_name_pointer(&mut self, offset: u16) {
        self.write_u16(0xC000 | (offset & 0x3FFF));
    }
}

struct EncoderInner<'a> {
    w: Writer<'a>,
    qdcount: u16,
    ancount: u16,
}

impl<'a> Drop for EncoderInner<'a> {
    fn drop(&mut self) {
        let trunc = self.w.trunc;
        self.w.modify_header(|h| {
            h.set_qdcount(self.qdcount);
            h.set_ancount(self.ancount);
            h.set_nscount(0);
            h.set_arcount(0);
            h.set_truncated(trunc);
        });
    }
}

/// Encoder for outgoing DNS messages.
///
/// Like the decoder, the encoder tracks the message section it is writing in
/// its `S` type parameter; it starts in the *Question* section. Section
/// counts in the header are fixed up when the encoder is dropped, which
/// happens inside [`MessageEncoder::finish`].
pub struct MessageEncoder<'a, S: Section> {
    inner: EncoderInner<'a>,
    _p: PhantomData<S>,
}

impl<'a, S: Section> MessageEncoder<'a, S> {
    /// Overrides the whole message header.
    ///
    /// Note that the [`MessageEncoder`] will modify some header fields on
    /// drop, to ensure that the message can be parsed correctly.
    pub fn set_header(&mut self, header: Header) {
        self.inner.w.modify_header(|h| *h = header);
    }

    /// Finishes encoding the packet, and returns the number of bytes that
    /// were written to the buffer.
    ///
    /// If the message was truncated because the provided buffer was too
    /// small, this will return [`Error::Truncated`], and the message's
    /// truncation bit will be set. In that case, the user can still decide to
    /// send the message.
    pub fn finish(self) -> Result<usize, Error> {
        let bytes_written = self.inner.w.pos;

        if self.inner.w.trunc {
            Err(Error::Truncated)
        } else {
            Ok(bytes_written)
        }
    }
}

impl<'a> MessageEncoder<'a, section::Question> {
    /// Creates a new message encoder that will write to `buf`.
    pub fn new(buf: &'a mut [u8]) -> Self {
        let mut w = Writer::new(buf);
        w.write_slice(bytemuck::bytes_of(&Header::zeroed()));
        Self {
            inner: EncoderInner {
                w,
                qdcount: 0,
                ancount: 0,
            },
            _p: PhantomData,
        }
    }

    /// Adds a question to the *Question* section.
    pub fn question(&mut self, question: Question<'_>) {
        self.inner.w.write_domain_name(question.name);
        self.inner.w.write_u16(question.ty.0);
        self.inner.w.write_u16(question.class.0);
        self.inner.qdcount += 1;
    }

    /// Moves the encoder to the *Answer* section.
    #[inline]
    pub fn answers(self) -> MessageEncoder<'a, section::Answer> {
        MessageEncoder {
            inner: self.inner,
            _p: PhantomData,
        }
    }
}

impl<'a> MessageEncoder<'a, section::Answer> {
    /// Adds a resource record to the *Answer* section.
    pub fn add_answer(&mut self, rr: ResourceRecord<'_>) {
        let w = &mut self.inner.w;
        match rr.name {
            AnswerName::Name(name) => w.write_domain_name(name),
            AnswerName::Pointer(offset) => w.write_name_pointer(offset),
        }
        w.write_u16(rr.rdata.record_type().0);
        let class = if rr.cache_flush {
            rr.class.0 | 0x8000
        } else {
            rr.class.0
        };
        w.write_u16(class);
        w.write_u32(rr.ttl);
        // The RDATA length is only known once the record data is written, so
        // write a placeholder and backpatch it.
        let lenpos = w.pos;
        w.write_u16(0);
        let before_rdata = w.pos;
        let mut enc = ResourceRecordEncoder {
            w: Writer {
                buf: &mut *w.buf,
                pos: w.pos,
                trunc: w.trunc,
            },
        };
        rr.rdata.encode(&mut enc);
        w.pos = enc.w.pos;
        w.trunc = enc.w.trunc;
        let rdata_len = w.pos - before_rdata;
        let finished_pos = w.pos;
        w.pos = lenpos;
        w.write_u16(rdata_len.try_into().expect("RDATA length overflows u16"));
        w.pos = finished_pos;

        self.inner.ancount += 1;
    }
}

/// A question to be encoded into the *Question* section.
pub struct Question<'a> {
    name: &'a DomainName,
    class: QClass,
    ty: QType,
}

impl<'a> Question<'a> {
    /// Creates a question asking for all records ([`QType::ANY`]) in the
    /// internet class ([`QClass::IN`]) pertaining to `name`.
    #[inline]
    pub fn new(name: &'a DomainName) -> Self {
        Self {
            name,
            class: QClass::IN,
            ty: QType::ANY,
        }
    }

    /// Sets the record class to query.
    ///
    /// In almost all cases this can be left as the default value
    /// ([`QClass::IN`]), which queries records in the Internet class.
    #[inline]
    pub fn class(self, class: QClass) -> Self {
        Self { class, ..self }
    }

    /// Sets the resource type to query.
    #[inline]
    pub fn ty(self, ty: QType) -> Self {
        Self { ty, ..self }
    }
}

/// The owner name of an encoded resource record: either spelled out, or a
/// compression pointer to a name encoded earlier in the message.
pub enum AnswerName<'a> {
    Name(&'a DomainName),
    Pointer(u16),
}

impl<'a> From<&'a DomainName> for AnswerName<'a> {
    fn from(name: &'a DomainName) -> Self {
        Self::Name(name)
    }
}

/// A resource record to be encoded into the *Answer* section.
pub struct ResourceRecord<'a> {
    name: AnswerName<'a>,
    class: Class,
    cache_flush: bool,
    ttl: u32,
    rdata: &'a Record,
}

impl<'a> ResourceRecord<'a> {
    pub fn new(name: impl Into<AnswerName<'a>>, rdata: &'a Record) -> Self {
        Self {
            name: name.into(),
            class: Class::IN,
            cache_flush: false,
            ttl: 0,
            rdata,
        }
    }

    #[inline]
    pub fn class(self, class: Class) -> Self {
        Self { class, ..self }
    }

    /// Sets the mDNS cache-flush bit on the record's class field.
    #[inline]
    pub fn cache_flush(self, cache_flush: bool) -> Self {
        Self {
            cache_flush,
            ..self
        }
    }

    #[inline]
    pub fn ttl(self, ttl: u32) -> Self {
        Self { ttl, ..self }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;

    use crate::{
        hex::Hex,
        packet::{decoder::MessageDecoder, records::AAAA},
    };

    use super::*;

    #[test]
    fn encode_query() {
        let name = DomainName::from_str("example.com").unwrap();
        let mut header = Header::default();
        header.set_id(12345);
        header.set_recursion_desired(true);

        let mut buf = [0; 512];
        let mut enc = MessageEncoder::new(&mut buf);
        enc.set_header(header);
        enc.question(Question::new(&name).ty(QType::A));
        enc.question(Question::new(&name).ty(QType::AAAA));
        let len = enc.finish().unwrap();

        assert_eq!(
            Hex(&buf[..len]).to_string(),
            "303901000002000000000000076578616d706c6503636f6d0000010001076578616d706c6503636f6d00001c0001",
        );
    }

    #[test]
    fn encode_answers_with_pointer() {
        let name = DomainName::from_str("contiki.local").unwrap();
        let first = Record::AAAA(AAAA::new(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1)));
        let second = Record::AAAA(AAAA::new(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 2)));

        let mut header = Header::default();
        header.set_response(true);
        header.set_authority(true);

        let mut buf = [0; 512];
        let mut enc = MessageEncoder::new(&mut buf);
        enc.set_header(header);
        let mut enc = enc.answers();
        enc.add_answer(
            ResourceRecord::new(&name, &first)
                .cache_flush(true)
                .ttl(120),
        );
        enc.add_answer(
            ResourceRecord::new(AnswerName::Pointer(size_of::<Header>() as u16), &second)
                .cache_flush(true)
                .ttl(120),
        );
        let len = enc.finish().unwrap();

        // The second answer starts with a pointer to the first answer's name.
        let second_answer = &buf[12 + 15 + 10 + 16..];
        assert_eq!(second_answer[0], 0xC0);
        assert_eq!(second_answer[1], 12);

        let dec = MessageDecoder::new(&buf[..len]).unwrap();
        assert_eq!(dec.header().answer_count(), 2);
        assert!(dec.header().is_response());
        assert!(dec.header().is_authority());
        let mut dec = dec.answers().unwrap();
        for expected in [&first, &second] {
            let rr = dec.next().unwrap().unwrap();
            assert_eq!(rr.name().to_string(), "contiki.local.");
            assert!(rr.cache_flush());
            assert_eq!(rr.ttl(), 120);
            assert_eq!(&rr.as_enum().unwrap().unwrap(), expected);
        }
    }

    #[test]
    fn truncation_sets_the_header_bit() {
        let name = DomainName::from_str("example.com").unwrap();
        let mut buf = [0; 16]; // too small for header + question
        let mut enc = MessageEncoder::new(&mut buf);
        enc.question(Question::new(&name).ty(QType::A));
        assert_eq!(enc.finish(), Err(Error::Truncated));

        let dec = MessageDecoder::new(&buf).unwrap();
        assert!(dec.header().is_truncated());
    }
}
