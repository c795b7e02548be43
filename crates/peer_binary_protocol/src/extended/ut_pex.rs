use std::net::{IpAddr, SocketAddr};

use bencode::BencodeValue;
use byteorder::{BE, ByteOrder};
use bytes::Bytes;
use itertools::{Either, Itertools};

use crate::MessageDeserializeError;

/// Peer supports encryption.
pub const PEX_FLAG_PREFERS_ENCRYPTION: u8 = 0x01;
/// Peer is a seed.
pub const PEX_FLAG_SEED: u8 = 0x02;
pub const PEX_FLAG_SUPPORTS_UTP: u8 = 0x04;
pub const PEX_FLAG_SUPPORTS_HOLEPUNCH: u8 = 0x08;
pub const PEX_FLAG_REACHABLE: u8 = 0x10;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PexPeerInfo {
    pub flags: u8,
    pub addr: SocketAddr,
}

impl core::fmt::Debug for PexPeerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.addr)?;
        if self.flags != 0 {
            write!(f, ";flags={}", self.flags)?;
        }
        Ok(())
    }
}

/// A BEP11 peer exchange message. Address lists are kept in their compact
/// form.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct UtPex {
    added: Option<Bytes>,
    added_f: Option<Bytes>,
    added6: Option<Bytes>,
    added6_f: Option<Bytes>,
    dropped: Option<Bytes>,
    dropped6: Option<Bytes>,
}

impl core::fmt::Debug for UtPex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UtPex")
            .field("added", &self.added_peers().collect::<Vec<_>>())
            .field("dropped", &self.dropped_peers().collect::<Vec<_>>())
            .finish()
    }
}

fn write_compact(addr: &SocketAddr, out: &mut Vec<u8>) {
    match addr.ip() {
        IpAddr::V4(ip) => out.extend_from_slice(&ip.octets()),
        IpAddr::V6(ip) => out.extend_from_slice(&ip.octets()),
    }
    out.extend_from_slice(&addr.port().to_be_bytes());
}

fn non_empty(buf: Vec<u8>) -> Option<Bytes> {
    if buf.is_empty() { None } else { Some(buf.into()) }
}

impl UtPex {
    pub fn from_peers<'a>(
        added: impl IntoIterator<Item = &'a PexPeerInfo>,
        dropped: impl IntoIterator<Item = &'a SocketAddr>,
    ) -> Self {
        let (added4, added6): (Vec<_>, Vec<_>) =
            added.into_iter().partition_map(|p| match p.addr {
                SocketAddr::V4(_) => Either::Left(p),
                SocketAddr::V6(_) => Either::Right(p),
            });
        let (dropped4, dropped6): (Vec<_>, Vec<_>) =
            dropped.into_iter().partition(|a| a.is_ipv4());

        let compact = |peers: &[&PexPeerInfo]| {
            let mut addrs = Vec::with_capacity(peers.len() * 18);
            let mut flags = Vec::with_capacity(peers.len());
            for p in peers {
                write_compact(&p.addr, &mut addrs);
                flags.push(p.flags);
            }
            (non_empty(addrs), non_empty(flags))
        };
        let compact_dropped = |addrs: &[&SocketAddr]| {
            let mut out = Vec::with_capacity(addrs.len() * 18);
            for a in addrs {
                write_compact(a, &mut out);
            }
            non_empty(out)
        };

        let (added, added_f) = compact(&added4);
        let (added6, added6_f) = compact(&added6);
        UtPex {
            added,
            added_f,
            added6,
            added6_f,
            dropped: compact_dropped(&dropped4),
            dropped6: compact_dropped(&dropped6),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added_peers().next().is_none() && self.dropped_peers().next().is_none()
    }

    fn added_peers_inner<'a>(
        buf: &'a Option<Bytes>,
        flags: &'a Option<Bytes>,
        ip_len: usize,
    ) -> impl Iterator<Item = PexPeerInfo> + Clone + 'a {
        const PORT_LEN: usize = 2;
        const DEFAULT_FLAGS: u8 = 0;
        let addrs = buf
            .as_ref()
            .into_iter()
            .flat_map(move |it| it.chunks_exact(ip_len + PORT_LEN))
            .filter_map(move |c| {
                let ip = match ip_len {
                    4 => IpAddr::from(<[u8; 4]>::try_from(&c[..4]).ok()?),
                    16 => IpAddr::from(<[u8; 16]>::try_from(&c[..16]).ok()?),
                    _ => return None,
                };
                let port = BE::read_u16(&c[ip_len..]);
                Some(SocketAddr::new(ip, port))
            });
        addrs.enumerate().map(move |(id, addr)| PexPeerInfo {
            addr,
            flags: flags
                .as_ref()
                .and_then(|f| f.get(id).copied())
                .unwrap_or(DEFAULT_FLAGS),
        })
    }

    pub fn added_peers(&self) -> impl Iterator<Item = PexPeerInfo> + Clone + '_ {
        Self::added_peers_inner(&self.added, &self.added_f, 4).chain(Self::added_peers_inner(
            &self.added6,
            &self.added6_f,
            16,
        ))
    }

    pub fn dropped_peers(&self) -> impl Iterator<Item = PexPeerInfo> + Clone + '_ {
        Self::added_peers_inner(&self.dropped, &None, 4)
            .chain(Self::added_peers_inner(&self.dropped6, &None, 16))
    }

    pub fn deserialize(payload: &[u8]) -> Result<Self, MessageDeserializeError> {
        let value = bencode::from_bytes(payload)?;
        if value.as_dict().is_none() {
            return Err(MessageDeserializeError::NotADictionary("ut_pex"));
        }
        let field = |key: &[u8]| {
            value
                .get(key)
                .and_then(|v| v.as_bytes())
                .filter(|b| !b.is_empty())
                .map(Bytes::copy_from_slice)
        };
        Ok(UtPex {
            added: field(b"added"),
            added_f: field(b"added.f"),
            added6: field(b"added6"),
            added6_f: field(b"added6.f"),
            dropped: field(b"dropped"),
            dropped6: field(b"dropped6"),
        })
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        // Clients expect all keys to be present, even if empty.
        let empty = Bytes::new();
        let mut d = BencodeValue::new_dict();
        for (key, v) in [
            (&b"added"[..], &self.added),
            (&b"added.f"[..], &self.added_f),
            (&b"added6"[..], &self.added6),
            (&b"added6.f"[..], &self.added6_f),
            (&b"dropped"[..], &self.dropped),
            (&b"dropped6"[..], &self.dropped6),
        ] {
            d.insert(key, v.as_ref().unwrap_or(&empty).clone());
        }
        d.serialize_to(out);
    }
}
