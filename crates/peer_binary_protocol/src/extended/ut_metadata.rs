use bencode::{BencodeDeserializer, BencodeValue};
use bytes::Bytes;

use crate::MessageDeserializeError;

/// BEP9 metadata is exchanged in pieces of this size, the last one may be
/// shorter.
pub const METADATA_PIECE_LENGTH: u32 = 16384;

const MSG_TYPE_REQUEST: i64 = 0;
const MSG_TYPE_DATA: i64 = 1;
const MSG_TYPE_REJECT: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtMetadata {
    Request(u32),
    Data {
        piece: u32,
        total_size: u32,
        data: Bytes,
    },
    Reject(u32),
}

/// Length of metadata piece `piece`, `None` if it lies past `total_size`.
pub fn metadata_piece_length(piece: u32, total_size: u32) -> Option<u32> {
    let offset = piece.checked_mul(METADATA_PIECE_LENGTH)?;
    if offset >= total_size {
        return None;
    }
    Some((total_size - offset).min(METADATA_PIECE_LENGTH))
}

impl UtMetadata {
    pub fn piece(&self) -> u32 {
        match self {
            UtMetadata::Request(p) | UtMetadata::Reject(p) => *p,
            UtMetadata::Data { piece, .. } => *piece,
        }
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        let (msg_type, total_size) = match self {
            UtMetadata::Request(_) => (MSG_TYPE_REQUEST, None),
            UtMetadata::Data { total_size, .. } => (MSG_TYPE_DATA, Some(*total_size)),
            UtMetadata::Reject(_) => (MSG_TYPE_REJECT, None),
        };
        let mut d = BencodeValue::new_dict().with_opt(b"total_size", total_size);
        d.insert(&b"msg_type"[..], msg_type);
        d.insert(&b"piece"[..], self.piece());
        d.serialize_to(out);
        if let UtMetadata::Data { data, .. } = self {
            out.extend_from_slice(data);
        }
    }

    pub fn deserialize(payload: &[u8]) -> Result<Self, MessageDeserializeError> {
        let mut de = BencodeDeserializer::new_from_buf(payload);
        let message = de.parse_value()?;
        let remaining = de.into_remaining();
        if message.as_dict().is_none() {
            return Err(MessageDeserializeError::NotADictionary("ut_metadata"));
        }

        let msg_type = message
            .get_integer::<i64>(b"msg_type")
            .ok_or(MessageDeserializeError::UtMetadataMissingField("msg_type"))?;
        let piece = message
            .get_integer::<u32>(b"piece")
            .ok_or(MessageDeserializeError::UtMetadataMissingField("piece"))?;

        match msg_type {
            MSG_TYPE_REQUEST | MSG_TYPE_REJECT => {
                if !remaining.is_empty() {
                    return Err(MessageDeserializeError::UtMetadataTrailingBytes);
                }
                if msg_type == MSG_TYPE_REQUEST {
                    Ok(UtMetadata::Request(piece))
                } else {
                    Ok(UtMetadata::Reject(piece))
                }
            }
            MSG_TYPE_DATA => {
                let total_size = message
                    .get_integer::<u32>(b"total_size")
                    .ok_or(MessageDeserializeError::UtMetadataMissingField("total_size"))?;
                let expected_size = metadata_piece_length(piece, total_size).ok_or(
                    MessageDeserializeError::UtMetadataPieceOutOfRange { piece, total_size },
                )?;
                if remaining.len() != expected_size as usize {
                    return Err(MessageDeserializeError::UtMetadataSizeMismatch {
                        expected_size: expected_size as usize,
                        received_size: remaining.len(),
                    });
                }
                Ok(UtMetadata::Data {
                    piece,
                    total_size,
                    data: Bytes::copy_from_slice(remaining),
                })
            }
            other => Err(MessageDeserializeError::UtMetadataTypeUnknown(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn trailing_bytes_is_error(msg: UtMetadata) {
        let mut buf = Vec::new();
        msg.serialize(&mut buf);
        assert_eq!(UtMetadata::deserialize(&buf).unwrap(), msg);

        buf.push(0x42);
        let res = UtMetadata::deserialize(&buf);
        assert!(
            matches!(
                res,
                Err(MessageDeserializeError::UtMetadataTrailingBytes
                    | MessageDeserializeError::UtMetadataSizeMismatch {
                        expected_size: 5,
                        received_size: 6
                    })
            ),
            "expected trailing bytes error, got {res:?}"
        )
    }

    #[test]
    fn test_ut_metadata_trailing_bytes_is_error() {
        trailing_bytes_is_error(UtMetadata::Request(42));
        trailing_bytes_is_error(UtMetadata::Reject(43));
        trailing_bytes_is_error(UtMetadata::Data {
            piece: 0,
            total_size: 5,
            data: Bytes::from_static(b"\x42\x42\x42\x42\x42"),
        });
    }

    #[test]
    fn test_wire_layout() {
        let mut buf = Vec::new();
        UtMetadata::Request(1).serialize(&mut buf);
        assert_eq!(buf, b"d8:msg_typei0e5:piecei1ee");

        buf.clear();
        UtMetadata::Data {
            piece: 0,
            total_size: 3,
            data: Bytes::from_static(b"abc"),
        }
        .serialize(&mut buf);
        assert_eq!(buf, b"d8:msg_typei1e5:piecei0e10:total_sizei3eeabc");
    }

    #[test]
    fn test_multi_piece_sizes() {
        assert_eq!(metadata_piece_length(0, 40000), Some(16384));
        assert_eq!(metadata_piece_length(2, 40000), Some(40000 - 32768));
        assert_eq!(metadata_piece_length(3, 40000), None);

        let data = vec![7u8; 40000 - 32768];
        let msg = UtMetadata::Data {
            piece: 2,
            total_size: 40000,
            data: data.into(),
        };
        let mut buf = Vec::new();
        msg.serialize(&mut buf);
        assert_eq!(UtMetadata::deserialize(&buf).unwrap(), msg);

        assert!(matches!(
            UtMetadata::deserialize(b"d8:msg_typei1e5:piecei3e10:total_sizei40000ee"),
            Err(MessageDeserializeError::UtMetadataPieceOutOfRange { piece: 3, .. })
        ));
    }

    #[test]
    fn test_bad_messages() {
        assert!(matches!(
            UtMetadata::deserialize(b"d8:msg_typei9e5:piecei0ee"),
            Err(MessageDeserializeError::UtMetadataTypeUnknown(9))
        ));
        assert!(matches!(
            UtMetadata::deserialize(b"d5:piecei0ee"),
            Err(MessageDeserializeError::UtMetadataMissingField("msg_type"))
        ));
        assert!(matches!(
            UtMetadata::deserialize(b"d8:msg_typei1e5:piecei0ee"),
            Err(MessageDeserializeError::UtMetadataMissingField("total_size"))
        ));
    }
}
