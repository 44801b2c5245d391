//! Plain hex rendering for packet traces, and parsing for tests.

use std::fmt;

pub(crate) struct Hex<'a>(pub &'a [u8]);

impl<'a> fmt::Display for Hex<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Parses a hex dump in the format produced by [`Hex`].
#[cfg(test)]
pub(crate) fn parse(s: &str) -> Vec<u8> {
    assert!(s.is_ascii() && s.len() % 2 == 0, "bad hex dump: {:?}", s);

    s.as_bytes()
        .chunks(2)
        .map(|pair| u8::from_str_radix(std::str::from_utf8(pair).unwrap(), 16).unwrap())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        assert_eq!(parse("00abff"), &[0x00, 0xab, 0xff]);
        assert_eq!(Hex(&[0x00, 0xab, 0xff]).to_string(), "00abff");
    }
}
