use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use bencode::BencodeValue;
use bytes::Bytes;

use crate::MessageDeserializeError;

use super::registry::{ExtensionMessageRegistry, MAX_EXTENSION, key_bt_extension};

/// The BEP10 handshake dictionary.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtendedHandshake {
    /// Every entry of the `m` dictionary, known extensions or not.
    pub m: BTreeMap<String, u8>,
    pub p: Option<u16>,
    pub v: Option<String>,
    pub yourip: Option<IpAddr>,
    pub reqq: Option<u32>,
    pub metadata_size: Option<u32>,
}

impl ExtendedHandshake {
    pub fn new(registry: &ExtensionMessageRegistry) -> Self {
        Self {
            m: registry
                .iter()
                .map(|(name, id)| (name.to_owned(), id))
                .collect(),
            ..Default::default()
        }
    }

    /// The negotiated ids of the extensions we know. Unknown names and id 0
    /// ("disabled") are skipped.
    pub fn registry(&self) -> ExtensionMessageRegistry {
        let mut r = ExtensionMessageRegistry::new();
        for (name, id) in self.m.iter() {
            let key = key_bt_extension(name);
            if key == MAX_EXTENSION {
                tracing::trace!(%name, id, "ignoring unknown extension");
                continue;
            }
            if *id != 0 {
                r.set_extension_message_id(key, *id);
            }
        }
        r
    }

    pub fn deserialize(payload: &[u8]) -> Result<Self, MessageDeserializeError> {
        let value = bencode::from_bytes(payload)?;
        if value.as_dict().is_none() {
            return Err(MessageDeserializeError::NotADictionary("extended handshake"));
        }

        let mut m = BTreeMap::new();
        if let Some(dict) = value.get(b"m").and_then(|m| m.as_dict()) {
            for (name, id) in dict.iter() {
                let Ok(name) = std::str::from_utf8(name) else {
                    continue;
                };
                match id.as_integer().map(u8::try_from) {
                    Some(Ok(id)) => {
                        m.insert(name.to_owned(), id);
                    }
                    _ => tracing::trace!(name, ?id, "bad extension id in handshake"),
                }
            }
        }

        let yourip: Option<IpAddr> = value
            .get(b"yourip")
            .and_then(|v| v.as_bytes())
            .and_then(|b| match b.len() {
                4 => <[u8; 4]>::try_from(b).ok().map(|o| Ipv4Addr::from(o).into()),
                16 => <[u8; 16]>::try_from(b).ok().map(|o| Ipv6Addr::from(o).into()),
                _ => None,
            });

        Ok(ExtendedHandshake {
            m,
            p: value.get_integer::<u16>(b"p").filter(|p| *p != 0),
            v: value
                .get(b"v")
                .and_then(|v| v.as_bytes())
                .map(|v| String::from_utf8_lossy(v).into_owned()),
            yourip,
            reqq: value.get_integer(b"reqq"),
            metadata_size: value.get_integer(b"metadata_size"),
        })
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        let mut m = BencodeValue::new_dict();
        for (name, id) in self.m.iter() {
            m.insert(Bytes::copy_from_slice(name.as_bytes()), *id);
        }
        let yourip = self.yourip.map(|ip| match ip {
            IpAddr::V4(ip) => ip.octets().to_vec(),
            IpAddr::V6(ip) => ip.octets().to_vec(),
        });
        let mut d = BencodeValue::new_dict()
            .with_opt(b"p", self.p)
            .with_opt(b"v", self.v.clone())
            .with_opt(b"yourip", yourip)
            .with_opt(b"reqq", self.reqq)
            .with_opt(b"metadata_size", self.metadata_size);
        d.insert(Bytes::from_static(b"m"), m);
        d.serialize_to(out);
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize(&mut out);
        out
    }
}
