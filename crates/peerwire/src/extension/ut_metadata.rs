use peer_binary_protocol::extended::{
    registry::UT_METADATA,
    ut_metadata::{METADATA_PIECE_LENGTH, UtMetadata},
};
use tracing::debug;

use super::ExtensionMessage;
use crate::{Error, Result, context::MessageContext, events::SessionEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtMetadataExtensionMessage {
    id: u8,
    msg: UtMetadata,
}

impl UtMetadataExtensionMessage {
    pub fn new(id: u8, msg: UtMetadata) -> Self {
        Self { id, msg }
    }

    pub fn message(&self) -> &UtMetadata {
        &self.msg
    }

    fn answer_request(&self, piece: u32, ctx: &mut MessageContext<'_>) -> Result<()> {
        let reply = match ctx.factory.download_context().metadata.as_ref() {
            None => UtMetadata::Reject(piece),
            Some(metadata) => {
                let total_size = metadata.len() as u32;
                let offset = piece as usize * METADATA_PIECE_LENGTH as usize;
                if offset >= metadata.len() {
                    return Err(Error::InvalidPieceIndex {
                        name: "ut_metadata",
                        index: piece,
                    });
                }
                let end = (offset + METADATA_PIECE_LENGTH as usize).min(metadata.len());
                UtMetadata::Data {
                    piece,
                    total_size,
                    data: metadata.slice(offset..end),
                }
            }
        };
        let msg = ctx.factory.create_ut_metadata_message(ctx.peer, reply)?;
        ctx.dispatcher.add_message_to_queue(msg);
        Ok(())
    }
}

impl std::fmt::Display for UtMetadataExtensionMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.msg {
            UtMetadata::Request(piece) => write!(f, "ut_metadata request piece={piece}"),
            UtMetadata::Data {
                piece, total_size, ..
            } => write!(f, "ut_metadata data piece={piece}, total_size={total_size}"),
            UtMetadata::Reject(piece) => write!(f, "ut_metadata reject piece={piece}"),
        }
    }
}

impl ExtensionMessage for UtMetadataExtensionMessage {
    fn extension_name(&self) -> &'static str {
        "ut_metadata"
    }

    fn extension_message_id(&self) -> u8 {
        self.id
    }

    fn serialize_payload(&self, out: &mut Vec<u8>) {
        self.msg.serialize(out)
    }

    fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        match &self.msg {
            UtMetadata::Request(piece) => {
                if !ctx.peer.extensions().supports(UT_METADATA) {
                    return Err(Error::ExtensionNotNegotiated("ut_metadata"));
                }
                self.answer_request(*piece, ctx)
            }
            UtMetadata::Data {
                piece,
                total_size,
                data,
            } => {
                debug!(piece, total_size, "received metadata piece");
                ctx.events.push(SessionEvent::MetadataPiece {
                    piece: *piece,
                    total_size: *total_size,
                    data: data.clone(),
                });
                Ok(())
            }
            UtMetadata::Reject(piece) => {
                debug!(piece, "metadata request rejected");
                ctx.events.push(SessionEvent::MetadataRejected(*piece));
                Ok(())
            }
        }
    }
}
