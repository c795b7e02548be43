use std::collections::BTreeMap;

use bytes::Bytes;

fn escape_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .copied()
        .flat_map(std::ascii::escape_default)
        .map(char::from)
        .collect()
}

/// A decoded bencode value.
///
/// Dictionaries keep their keys sorted, which is also the order they are
/// serialized in.
#[derive(Clone, PartialEq, Eq)]
pub enum BencodeValue {
    Bytes(Bytes),
    Integer(i64),
    List(Vec<BencodeValue>),
    Dict(BTreeMap<Bytes, BencodeValue>),
}

impl BencodeValue {
    pub fn new_dict() -> Self {
        BencodeValue::Dict(BTreeMap::new())
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Bytes, BencodeValue>> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Looks up `key` if this is a dictionary.
    pub fn get(&self, key: &[u8]) -> Option<&BencodeValue> {
        self.as_dict()?.get(key)
    }

    /// Integer lookup that also range-checks into the target type.
    pub fn get_integer<T: TryFrom<i64>>(&self, key: &[u8]) -> Option<T> {
        self.get(key)?.as_integer()?.try_into().ok()
    }

    /// Inserts into a dictionary. Does nothing for other kinds of values.
    pub fn insert(&mut self, key: impl Into<Bytes>, value: impl Into<BencodeValue>) {
        if let BencodeValue::Dict(d) = self {
            d.insert(key.into(), value.into());
        }
    }

    /// Builder-style [`insert`](Self::insert) that skips `None`.
    pub fn with_opt(
        mut self,
        key: &'static [u8],
        value: Option<impl Into<BencodeValue>>,
    ) -> Self {
        if let Some(value) = value {
            self.insert(Bytes::from_static(key), value);
        }
        self
    }
}

impl std::fmt::Debug for BencodeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BencodeValue::Bytes(b) => write!(f, "b\"{}\"", escape_bytes(b)),
            BencodeValue::Integer(i) => std::fmt::Debug::fmt(i, f),
            BencodeValue::List(l) => f.debug_list().entries(l).finish(),
            BencodeValue::Dict(d) => f
                .debug_map()
                .entries(d.iter().map(|(k, v)| (escape_bytes(k), v)))
                .finish(),
        }
    }
}

impl From<i64> for BencodeValue {
    fn from(v: i64) -> Self {
        BencodeValue::Integer(v)
    }
}

impl From<u32> for BencodeValue {
    fn from(v: u32) -> Self {
        BencodeValue::Integer(v.into())
    }
}

impl From<u16> for BencodeValue {
    fn from(v: u16) -> Self {
        BencodeValue::Integer(v.into())
    }
}

impl From<u8> for BencodeValue {
    fn from(v: u8) -> Self {
        BencodeValue::Integer(v.into())
    }
}

impl From<Bytes> for BencodeValue {
    fn from(v: Bytes) -> Self {
        BencodeValue::Bytes(v)
    }
}

impl From<Vec<u8>> for BencodeValue {
    fn from(v: Vec<u8>) -> Self {
        BencodeValue::Bytes(v.into())
    }
}

impl From<&[u8]> for BencodeValue {
    fn from(v: &[u8]) -> Self {
        BencodeValue::Bytes(Bytes::copy_from_slice(v))
    }
}

impl From<&str> for BencodeValue {
    fn from(v: &str) -> Self {
        v.as_bytes().into()
    }
}

impl From<String> for BencodeValue {
    fn from(v: String) -> Self {
        BencodeValue::Bytes(v.into())
    }
}

impl From<Vec<BencodeValue>> for BencodeValue {
    fn from(v: Vec<BencodeValue>) -> Self {
        BencodeValue::List(v)
    }
}

impl From<BTreeMap<Bytes, BencodeValue>> for BencodeValue {
    fn from(v: BTreeMap<Bytes, BencodeValue>) -> Self {
        BencodeValue::Dict(v)
    }
}
