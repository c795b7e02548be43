use bytes::Bytes;

use crate::{MSGID_EXTENDED, MessageDeserializeError, check_body_longer_than};

pub mod handshake;
pub mod registry;
pub mod ut_metadata;
pub mod ut_pex;

/// Extended message id reserved for the BEP10 handshake dictionary.
pub const EXTENDED_HANDSHAKE_ID: u8 = 0;

/// A BEP10 frame: the extended message id followed by an opaque payload.
///
/// The id is the one the receiving side chose for the extension, so
/// interpreting the payload needs the negotiated id table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedMessage {
    pub id: u8,
    pub payload: Bytes,
}

impl ExtendedMessage {
    pub fn new(id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    pub fn is_handshake(&self) -> bool {
        self.id == EXTENDED_HANDSHAKE_ID
    }

    pub fn deserialize(body: &[u8]) -> Result<Self, MessageDeserializeError> {
        let payload = check_body_longer_than(body, MSGID_EXTENDED, 0, "extended")?;
        Ok(ExtendedMessage {
            id: payload[0],
            payload: Bytes::copy_from_slice(&payload[1..]),
        })
    }
}
