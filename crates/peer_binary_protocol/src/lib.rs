// BitTorrent peer protocol implementation: parsing, serialization etc.
//
// Covers BEP3 messages, the BEP6 fast extension and BEP10 extended message
// framing. Knows nothing about sessions or piece storage.

pub mod extended;

use byteorder::{BE, ByteOrder};
use bytes::Bytes;
use peerwire_core::Id20;

use self::extended::ExtendedMessage;

const INTEGER_LEN: usize = 4;
const MSGID_LEN: usize = 1;
pub const PREAMBLE_LEN: usize = INTEGER_LEN + MSGID_LEN;
const PIECE_MESSAGE_PREAMBLE_LEN: usize = PREAMBLE_LEN + INTEGER_LEN * 2;

pub const PSTR_BT1: &str = "BitTorrent protocol";
pub const HANDSHAKE_LEN: usize = 1 + 19 + 8 + 20 + 20;

/// Largest length prefix we accept. Fits a 128KiB block or a bitfield of
/// 8 million pieces.
pub const MAX_MSG_LEN: u32 = 1024 * 1024 + PIECE_MESSAGE_PREAMBLE_LEN as u32;

pub const LEN_PREFIX_KEEPALIVE: u32 = 0;
pub const LEN_PREFIX_NO_PAYLOAD: u32 = 1;
pub const LEN_PREFIX_HAVE: u32 = 5;
pub const LEN_PREFIX_PIECE: u32 = 9;
pub const LEN_PREFIX_REQUEST: u32 = 13;
pub const LEN_PREFIX_PORT: u32 = 3;

pub const MSGID_CHOKE: u8 = 0;
pub const MSGID_UNCHOKE: u8 = 1;
pub const MSGID_INTERESTED: u8 = 2;
pub const MSGID_NOT_INTERESTED: u8 = 3;
pub const MSGID_HAVE: u8 = 4;
pub const MSGID_BITFIELD: u8 = 5;
pub const MSGID_REQUEST: u8 = 6;
pub const MSGID_PIECE: u8 = 7;
pub const MSGID_CANCEL: u8 = 8;
pub const MSGID_PORT: u8 = 9;
pub const MSGID_SUGGEST_PIECE: u8 = 13;
pub const MSGID_HAVE_ALL: u8 = 14;
pub const MSGID_HAVE_NONE: u8 = 15;
pub const MSGID_REJECT_REQUEST: u8 = 16;
pub const MSGID_ALLOWED_FAST: u8 = 17;
pub const MSGID_EXTENDED: u8 = 20;

/// Human readable message name, used in errors and logs.
pub fn message_name(msg_id: u8) -> &'static str {
    match msg_id {
        MSGID_CHOKE => "choke",
        MSGID_UNCHOKE => "unchoke",
        MSGID_INTERESTED => "interested",
        MSGID_NOT_INTERESTED => "not interested",
        MSGID_HAVE => "have",
        MSGID_BITFIELD => "bitfield",
        MSGID_REQUEST => "request",
        MSGID_PIECE => "piece",
        MSGID_CANCEL => "cancel",
        MSGID_PORT => "port",
        MSGID_SUGGEST_PIECE => "suggest piece",
        MSGID_HAVE_ALL => "have all",
        MSGID_HAVE_NONE => "have none",
        MSGID_REJECT_REQUEST => "reject request",
        MSGID_ALLOWED_FAST => "allowed fast",
        MSGID_EXTENDED => "extended",
        _ => "unknown",
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MessageDeserializeError {
    #[error("not enough data to deserialize {name}: expected at least {needed} more bytes")]
    NotEnoughData { needed: usize, name: &'static str },
    #[error("empty message body")]
    EmptyBody,
    #[error("unsupported message id {0}")]
    UnsupportedMessageId(u8),
    #[error("{name}: expected message id {expected}, received {received}")]
    WrongMessageId {
        name: &'static str,
        expected: u8,
        received: u8,
    },
    #[error(
        "incorrect payload length for {name} (msg_id={msg_id}): expected {expected}, received {received}"
    )]
    IncorrectPayloadLength {
        name: &'static str,
        msg_id: u8,
        expected: usize,
        received: usize,
    },
    #[error("payload of {name} (msg_id={msg_id}) too short: expected more than {min}, received {received}")]
    PayloadTooShort {
        name: &'static str,
        msg_id: u8,
        min: usize,
        received: usize,
    },
    #[error("message length {0} is larger than the maximum of {max}", max = MAX_MSG_LEN)]
    MessageTooLong(u32),
    #[error("pstr should be 19 bytes of \"BitTorrent protocol\"")]
    BadPstr,
    #[error("error decoding bencode: {0}")]
    Bencode(#[from] bencode::Error),
    #[error("{0}: payload is not a bencoded dictionary")]
    NotADictionary(&'static str),
    #[error("ut_metadata: missing or invalid field {0:?}")]
    UtMetadataMissingField(&'static str),
    #[error("ut_metadata: unknown msg_type {0}")]
    UtMetadataTypeUnknown(i64),
    #[error("ut_metadata: trailing bytes after a message that carries no data")]
    UtMetadataTrailingBytes,
    #[error("ut_metadata: piece {piece} is out of range for total_size {total_size}")]
    UtMetadataPieceOutOfRange { piece: u32, total_size: u32 },
    #[error("ut_metadata: expected {expected_size} bytes of data, received {received_size}")]
    UtMetadataSizeMismatch {
        expected_size: usize,
        received_size: usize,
    },
}

fn check_msg_id(
    body: &[u8],
    expected: u8,
    name: &'static str,
) -> Result<(), MessageDeserializeError> {
    let received = *body.first().ok_or(MessageDeserializeError::EmptyBody)?;
    if received != expected {
        return Err(MessageDeserializeError::WrongMessageId {
            name,
            expected,
            received,
        });
    }
    Ok(())
}

// Verifies the id and the exact body length (message id included).
fn check_fixed_body<'a>(
    body: &'a [u8],
    expected_id: u8,
    expected_len_prefix: u32,
    name: &'static str,
) -> Result<&'a [u8], MessageDeserializeError> {
    check_msg_id(body, expected_id, name)?;
    if body.len() != expected_len_prefix as usize {
        return Err(MessageDeserializeError::IncorrectPayloadLength {
            name,
            msg_id: expected_id,
            expected: expected_len_prefix as usize - MSGID_LEN,
            received: body.len() - MSGID_LEN,
        });
    }
    Ok(&body[MSGID_LEN..])
}

fn check_body_longer_than<'a>(
    body: &'a [u8],
    expected_id: u8,
    min_payload: usize,
    name: &'static str,
) -> Result<&'a [u8], MessageDeserializeError> {
    check_msg_id(body, expected_id, name)?;
    let payload = &body[MSGID_LEN..];
    if payload.len() <= min_payload {
        return Err(MessageDeserializeError::PayloadTooShort {
            name,
            msg_id: expected_id,
            min: min_payload,
            received: payload.len(),
        });
    }
    Ok(payload)
}

/// Decodes a message without payload (choke, unchoke, have all...).
pub fn deserialize_no_payload(
    body: &[u8],
    expected_id: u8,
) -> Result<(), MessageDeserializeError> {
    check_fixed_body(
        body,
        expected_id,
        LEN_PREFIX_NO_PAYLOAD,
        message_name(expected_id),
    )?;
    Ok(())
}

/// Decodes a message whose payload is a single piece index (have, suggest,
/// allowed fast).
pub fn deserialize_index(body: &[u8], expected_id: u8) -> Result<u32, MessageDeserializeError> {
    let payload = check_fixed_body(body, expected_id, LEN_PREFIX_HAVE, message_name(expected_id))?;
    Ok(BE::read_u32(payload))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Request {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

impl Request {
    pub fn new(index: u32, begin: u32, length: u32) -> Self {
        Self {
            index,
            begin,
            length,
        }
    }

    /// Decodes request, cancel or reject request, depending on `expected_id`.
    pub fn deserialize(body: &[u8], expected_id: u8) -> Result<Self, MessageDeserializeError> {
        let payload = check_fixed_body(
            body,
            expected_id,
            LEN_PREFIX_REQUEST,
            message_name(expected_id),
        )?;
        Ok(Request {
            index: BE::read_u32(&payload[0..4]),
            begin: BE::read_u32(&payload[4..8]),
            length: BE::read_u32(&payload[8..12]),
        })
    }

    fn serialize(&self, out: &mut Vec<u8>) {
        let mut tmp = [0u8; 12];
        BE::write_u32(&mut tmp[0..4], self.index);
        BE::write_u32(&mut tmp[4..8], self.begin);
        BE::write_u32(&mut tmp[8..12], self.length);
        out.extend_from_slice(&tmp);
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Piece {
    pub index: u32,
    pub begin: u32,
    pub block: Bytes,
}

impl Piece {
    pub fn from_data(index: u32, begin: u32, block: impl Into<Bytes>) -> Piece {
        Piece {
            index,
            begin,
            block: block.into(),
        }
    }

    pub fn deserialize(body: &[u8]) -> Result<Self, MessageDeserializeError> {
        let payload = check_body_longer_than(body, MSGID_PIECE, 8, "piece")?;
        Ok(Piece {
            index: BE::read_u32(&payload[0..4]),
            begin: BE::read_u32(&payload[4..8]),
            block: Bytes::copy_from_slice(&payload[8..]),
        })
    }
}

impl std::fmt::Debug for Piece {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Piece")
            .field("index", &self.index)
            .field("begin", &self.begin)
            .field("len", &self.block.len())
            .finish()
    }
}

pub fn deserialize_bitfield(body: &[u8]) -> Result<Bytes, MessageDeserializeError> {
    let payload = check_body_longer_than(body, MSGID_BITFIELD, 0, "bitfield")?;
    Ok(Bytes::copy_from_slice(payload))
}

pub fn deserialize_port(body: &[u8]) -> Result<u16, MessageDeserializeError> {
    let payload = check_fixed_body(body, MSGID_PORT, LEN_PREFIX_PORT, "port")?;
    Ok(BE::read_u16(payload))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Bytes),
    Request(Request),
    Piece(Piece),
    Cancel(Request),
    Port(u16),
    SuggestPiece(u32),
    HaveAll,
    HaveNone,
    RejectRequest(Request),
    AllowedFast(u32),
    Extended(ExtendedMessage),
}

impl Message {
    /// `None` for keep-alive, which has no id.
    pub fn msg_id(&self) -> Option<u8> {
        let id = match self {
            Message::KeepAlive => return None,
            Message::Choke => MSGID_CHOKE,
            Message::Unchoke => MSGID_UNCHOKE,
            Message::Interested => MSGID_INTERESTED,
            Message::NotInterested => MSGID_NOT_INTERESTED,
            Message::Have(_) => MSGID_HAVE,
            Message::Bitfield(_) => MSGID_BITFIELD,
            Message::Request(_) => MSGID_REQUEST,
            Message::Piece(_) => MSGID_PIECE,
            Message::Cancel(_) => MSGID_CANCEL,
            Message::Port(_) => MSGID_PORT,
            Message::SuggestPiece(_) => MSGID_SUGGEST_PIECE,
            Message::HaveAll => MSGID_HAVE_ALL,
            Message::HaveNone => MSGID_HAVE_NONE,
            Message::RejectRequest(_) => MSGID_REJECT_REQUEST,
            Message::AllowedFast(_) => MSGID_ALLOWED_FAST,
            Message::Extended(_) => MSGID_EXTENDED,
        };
        Some(id)
    }

    pub fn len_prefix(&self) -> u32 {
        match self {
            Message::KeepAlive => LEN_PREFIX_KEEPALIVE,
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested
            | Message::HaveAll
            | Message::HaveNone => LEN_PREFIX_NO_PAYLOAD,
            Message::Have(_) | Message::SuggestPiece(_) | Message::AllowedFast(_) => {
                LEN_PREFIX_HAVE
            }
            Message::Bitfield(b) => 1 + b.len() as u32,
            Message::Request(_) | Message::Cancel(_) | Message::RejectRequest(_) => {
                LEN_PREFIX_REQUEST
            }
            Message::Piece(p) => LEN_PREFIX_PIECE + p.block.len() as u32,
            Message::Port(_) => LEN_PREFIX_PORT,
            Message::Extended(e) => 2 + e.payload.len() as u32,
        }
    }

    /// Appends the framed message (length prefix included) to `out`.
    pub fn serialize(&self, out: &mut Vec<u8>) -> usize {
        let start = out.len();
        let mut prefix = [0u8; 4];
        BE::write_u32(&mut prefix, self.len_prefix());
        out.extend_from_slice(&prefix);
        if let Some(msg_id) = self.msg_id() {
            out.push(msg_id);
        }

        match self {
            Message::KeepAlive
            | Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested
            | Message::HaveAll
            | Message::HaveNone => {}
            Message::Have(v) | Message::SuggestPiece(v) | Message::AllowedFast(v) => {
                out.extend_from_slice(&v.to_be_bytes());
            }
            Message::Bitfield(b) => out.extend_from_slice(b),
            Message::Request(r) | Message::Cancel(r) | Message::RejectRequest(r) => {
                r.serialize(out)
            }
            Message::Piece(p) => {
                out.extend_from_slice(&p.index.to_be_bytes());
                out.extend_from_slice(&p.begin.to_be_bytes());
                out.extend_from_slice(&p.block);
            }
            Message::Port(port) => out.extend_from_slice(&port.to_be_bytes()),
            Message::Extended(e) => {
                out.push(e.id);
                out.extend_from_slice(&e.payload);
            }
        }
        out.len() - start
    }

    /// Decodes a message body: everything after the length prefix. An empty
    /// body is a keep-alive.
    pub fn deserialize_body(body: &[u8]) -> Result<Message, MessageDeserializeError> {
        let msg_id = match body.first() {
            Some(msg_id) => *msg_id,
            None => return Ok(Message::KeepAlive),
        };
        let msg = match msg_id {
            MSGID_CHOKE => {
                deserialize_no_payload(body, msg_id)?;
                Message::Choke
            }
            MSGID_UNCHOKE => {
                deserialize_no_payload(body, msg_id)?;
                Message::Unchoke
            }
            MSGID_INTERESTED => {
                deserialize_no_payload(body, msg_id)?;
                Message::Interested
            }
            MSGID_NOT_INTERESTED => {
                deserialize_no_payload(body, msg_id)?;
                Message::NotInterested
            }
            MSGID_HAVE_ALL => {
                deserialize_no_payload(body, msg_id)?;
                Message::HaveAll
            }
            MSGID_HAVE_NONE => {
                deserialize_no_payload(body, msg_id)?;
                Message::HaveNone
            }
            MSGID_HAVE => Message::Have(deserialize_index(body, msg_id)?),
            MSGID_SUGGEST_PIECE => Message::SuggestPiece(deserialize_index(body, msg_id)?),
            MSGID_ALLOWED_FAST => Message::AllowedFast(deserialize_index(body, msg_id)?),
            MSGID_BITFIELD => Message::Bitfield(deserialize_bitfield(body)?),
            MSGID_REQUEST => Message::Request(Request::deserialize(body, msg_id)?),
            MSGID_CANCEL => Message::Cancel(Request::deserialize(body, msg_id)?),
            MSGID_REJECT_REQUEST => Message::RejectRequest(Request::deserialize(body, msg_id)?),
            MSGID_PIECE => Message::Piece(Piece::deserialize(body)?),
            MSGID_PORT => Message::Port(deserialize_port(body)?),
            MSGID_EXTENDED => Message::Extended(ExtendedMessage::deserialize(body)?),
            msg_id => return Err(MessageDeserializeError::UnsupportedMessageId(msg_id)),
        };
        Ok(msg)
    }

    /// Decodes one framed message from the start of `buf`, returning it with
    /// the number of bytes consumed.
    pub fn deserialize(buf: &[u8]) -> Result<(Message, usize), MessageDeserializeError> {
        let len_prefix = match buf.get(0..INTEGER_LEN) {
            Some(bytes) => BE::read_u32(bytes),
            None => {
                return Err(MessageDeserializeError::NotEnoughData {
                    needed: INTEGER_LEN - buf.len(),
                    name: "message",
                });
            }
        };
        if len_prefix > MAX_MSG_LEN {
            return Err(MessageDeserializeError::MessageTooLong(len_prefix));
        }
        let total = INTEGER_LEN + len_prefix as usize;
        let body = buf
            .get(INTEGER_LEN..total)
            .ok_or_else(|| MessageDeserializeError::NotEnoughData {
                needed: total - buf.len(),
                name: "message",
            })?;
        Ok((Message::deserialize_body(body)?, total))
    }
}

/// The 68-byte connection preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub info_hash: Id20,
    pub peer_id: Id20,
}

impl Handshake {
    /// Handshake advertising the extension protocol and the fast extension.
    pub fn new(info_hash: Id20, peer_id: Id20) -> Handshake {
        let mut reserved = [0u8; 8];
        reserved[5] |= 0x10;
        reserved[7] |= 0x04;
        Handshake {
            reserved,
            info_hash,
            peer_id,
        }
    }

    pub fn with_dht(mut self, enabled: bool) -> Self {
        if enabled {
            self.reserved[7] |= 0x01;
        } else {
            self.reserved[7] &= !0x01;
        }
        self
    }

    pub fn with_fast(mut self, enabled: bool) -> Self {
        if enabled {
            self.reserved[7] |= 0x04;
        } else {
            self.reserved[7] &= !0x04;
        }
        self
    }

    pub fn with_extended(mut self, enabled: bool) -> Self {
        if enabled {
            self.reserved[5] |= 0x10;
        } else {
            self.reserved[5] &= !0x10;
        }
        self
    }

    pub fn supports_extended(&self) -> bool {
        self.reserved[5] & 0x10 > 0
    }

    pub fn supports_fast(&self) -> bool {
        self.reserved[7] & 0x04 > 0
    }

    pub fn supports_dht(&self) -> bool {
        self.reserved[7] & 0x01 > 0
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) {
        buf.push(PSTR_BT1.len() as u8);
        buf.extend_from_slice(PSTR_BT1.as_bytes());
        buf.extend_from_slice(&self.reserved);
        buf.extend_from_slice(&self.info_hash.0);
        buf.extend_from_slice(&self.peer_id.0);
    }

    pub fn deserialize(b: &[u8]) -> Result<(Handshake, usize), MessageDeserializeError> {
        let pstr_len = *b.first().ok_or(MessageDeserializeError::NotEnoughData {
            needed: 1,
            name: "handshake",
        })?;
        if pstr_len as usize != PSTR_BT1.len() {
            return Err(MessageDeserializeError::BadPstr);
        }
        let hbuf = b
            .get(..HANDSHAKE_LEN)
            .ok_or_else(|| MessageDeserializeError::NotEnoughData {
                needed: HANDSHAKE_LEN - b.len(),
                name: "handshake",
            })?;
        if &hbuf[1..20] != PSTR_BT1.as_bytes() {
            return Err(MessageDeserializeError::BadPstr);
        }
        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&hbuf[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&hbuf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&hbuf[48..68]);
        Ok((
            Handshake {
                reserved,
                info_hash: Id20::new(info_hash),
                peer_id: Id20::new(peer_id),
            },
            HANDSHAKE_LEN,
        ))
    }
}
