use std::str::FromStr;

use crate::Error;

/// A 20-byte id: torrent info hashes and peer ids.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Id20(pub [u8; 20]);

impl Id20 {
    pub const fn new(from: [u8; 20]) -> Id20 {
        Id20(from)
    }

    pub fn from_bytes(b: &[u8]) -> Option<Id20> {
        Some(Id20(b.try_into().ok()?))
    }

    pub fn as_string(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Id20 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 20];
        if s.len() != 40 {
            return Err(Error::BadHexLength(40));
        };
        hex::decode_to_slice(s, &mut out)?;
        Ok(Id20(out))
    }
}

impl std::fmt::Debug for Id20 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<")?;
        for byte in self.0 {
            write!(f, "{byte:02x?}")?;
        }
        write!(f, ">")
    }
}

impl std::fmt::Display for Id20 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_string())
    }
}
