use std::collections::BTreeMap;

use atoi::{FromRadix10Checked, FromRadix10SignedChecked};
use bytes::Bytes;

use crate::BencodeValue;

const MAX_DEPTH: usize = 64;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("unexpected end of input at byte {pos}")]
    Eof { pos: usize },
    #[error("unexpected byte {byte:#04x} at byte {pos}")]
    UnexpectedByte { byte: u8, pos: usize },
    #[error("invalid integer at byte {pos}")]
    InvalidInteger { pos: usize },
    #[error("invalid byte string length at byte {pos}")]
    InvalidLength { pos: usize },
    #[error("dictionary key at byte {pos} is not a byte string")]
    DictKeyNotBytes { pos: usize },
    #[error("nesting deeper than 64 levels")]
    TooDeep,
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
}

pub struct BencodeDeserializer<'de> {
    buf: &'de [u8],
    pos: usize,
}

impl<'de> BencodeDeserializer<'de> {
    pub fn new_from_buf(buf: &'de [u8]) -> BencodeDeserializer<'de> {
        Self { buf, pos: 0 }
    }

    /// Whatever was not consumed by [`parse_value`](Self::parse_value).
    pub fn into_remaining(self) -> &'de [u8] {
        &self.buf[self.pos..]
    }

    pub fn parse_value(&mut self) -> Result<BencodeValue, Error> {
        self.parse_value_at_depth(0)
    }

    fn peek(&self) -> Result<u8, Error> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(Error::Eof { pos: self.pos })
    }

    fn parse_value_at_depth(&mut self, depth: usize) -> Result<BencodeValue, Error> {
        if depth > MAX_DEPTH {
            return Err(Error::TooDeep);
        }
        match self.peek()? {
            b'i' => self.parse_integer().map(BencodeValue::Integer),
            b'0'..=b'9' => self.parse_bytes().map(BencodeValue::Bytes),
            b'l' => {
                self.pos += 1;
                let mut list = Vec::new();
                while self.peek()? != b'e' {
                    list.push(self.parse_value_at_depth(depth + 1)?);
                }
                self.pos += 1;
                Ok(BencodeValue::List(list))
            }
            b'd' => {
                self.pos += 1;
                let mut dict = BTreeMap::new();
                while self.peek()? != b'e' {
                    if !self.peek()?.is_ascii_digit() {
                        return Err(Error::DictKeyNotBytes { pos: self.pos });
                    }
                    let key = self.parse_bytes()?;
                    let value = self.parse_value_at_depth(depth + 1)?;
                    dict.insert(key, value);
                }
                self.pos += 1;
                Ok(BencodeValue::Dict(dict))
            }
            byte => Err(Error::UnexpectedByte {
                byte,
                pos: self.pos,
            }),
        }
    }

    // i<digits>e, no leading zeroes, no negative zero.
    fn parse_integer(&mut self) -> Result<i64, Error> {
        let start = self.pos + 1;
        let rest = &self.buf[start..];
        let end = memchr::memchr(b'e', rest).ok_or(Error::Eof { pos: self.buf.len() })?;
        let digits = &rest[..end];
        let invalid = Error::InvalidInteger { pos: start };
        let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);
        if unsigned.is_empty()
            || (unsigned.len() > 1 && unsigned[0] == b'0')
            || (unsigned.len() != digits.len() && unsigned == b"0")
        {
            return Err(invalid);
        }
        match i64::from_radix_10_signed_checked(digits) {
            (Some(v), used) if used == digits.len() => {
                self.pos = start + end + 1;
                Ok(v)
            }
            _ => Err(invalid),
        }
    }

    // <len>:<bytes>
    fn parse_bytes(&mut self) -> Result<Bytes, Error> {
        let start = self.pos;
        let rest = &self.buf[start..];
        let colon = memchr::memchr(b':', rest).ok_or(Error::Eof { pos: self.buf.len() })?;
        let digits = &rest[..colon];
        if digits.len() > 1 && digits[0] == b'0' {
            return Err(Error::InvalidLength { pos: start });
        }
        let len = match usize::from_radix_10_checked(digits) {
            (Some(len), used) if used == digits.len() && used > 0 => len,
            _ => return Err(Error::InvalidLength { pos: start }),
        };
        let data_start = start + colon + 1;
        let data_end = data_start
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(Error::Eof { pos: self.buf.len() })?;
        self.pos = data_end;
        Ok(Bytes::copy_from_slice(&self.buf[data_start..data_end]))
    }
}

/// Parses one value and returns it together with the bytes that follow it.
pub fn from_bytes_with_rest(buf: &[u8]) -> Result<(BencodeValue, &[u8]), Error> {
    let mut de = BencodeDeserializer::new_from_buf(buf);
    let value = de.parse_value()?;
    Ok((value, de.into_remaining()))
}

/// Parses exactly one value, trailing bytes are an error.
pub fn from_bytes(buf: &[u8]) -> Result<BencodeValue, Error> {
    let (value, rest) = from_bytes_with_rest(buf)?;
    if !rest.is_empty() {
        return Err(Error::TrailingBytes(rest.len()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested() {
        let v = from_bytes(b"d1:ai-42e1:bl3:fooi0eee").unwrap();
        assert_eq!(v.get_integer::<i64>(b"a"), Some(-42));
        let list = v.get(b"b").and_then(|b| b.as_list()).unwrap();
        assert_eq!(list[0].as_bytes(), Some(&b"foo"[..]));
        assert_eq!(list[1].as_integer(), Some(0));
    }

    #[test]
    fn test_rest_is_returned() {
        let (v, rest) = from_bytes_with_rest(b"d5:piecei0ee\x01\x02").unwrap();
        assert_eq!(v.get_integer::<u32>(b"piece"), Some(0));
        assert_eq!(rest, b"\x01\x02");
        assert_eq!(
            from_bytes(b"d5:piecei0ee\x01\x02"),
            Err(Error::TrailingBytes(2))
        );
    }

    #[test]
    fn test_bad_integers() {
        for bad in [&b"ie"[..], b"i-e", b"i-0e", b"i03e", b"i1xe", b"i99999999999999999999e"] {
            assert!(
                matches!(from_bytes(bad), Err(Error::InvalidInteger { .. })),
                "{:?}",
                std::str::from_utf8(bad)
            );
        }
        assert!(matches!(from_bytes(b"i12"), Err(Error::Eof { .. })));
    }

    #[test]
    fn test_bad_lengths() {
        assert!(matches!(from_bytes(b"5:abc"), Err(Error::Eof { .. })));
        assert!(matches!(
            from_bytes(b"01:a"),
            Err(Error::InvalidLength { .. })
        ));
        assert!(matches!(from_bytes(b"3abc"), Err(Error::Eof { .. })));
    }

    #[test]
    fn test_dict_key_must_be_bytes() {
        assert_eq!(
            from_bytes(b"di1ei2ee"),
            Err(Error::DictKeyNotBytes { pos: 1 })
        );
    }

    #[test]
    fn test_unterminated_containers() {
        assert!(matches!(from_bytes(b"l1:a"), Err(Error::Eof { .. })));
        assert!(matches!(from_bytes(b"d1:a"), Err(Error::Eof { .. })));
        assert!(matches!(from_bytes(b""), Err(Error::Eof { pos: 0 })));
    }

    #[test]
    fn test_too_deep() {
        let mut buf = vec![b'l'; MAX_DEPTH + 2];
        buf.extend(std::iter::repeat_n(b'e', MAX_DEPTH + 2));
        assert_eq!(from_bytes(&buf), Err(Error::TooDeep));
    }
}
