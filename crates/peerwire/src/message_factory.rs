use std::sync::Arc;

use bytes::Bytes;
use peer_binary_protocol::{
    Handshake, Message, Request,
    extended::{
        ExtendedMessage,
        handshake::ExtendedHandshake,
        registry::{ExtensionMessageRegistry, UT_METADATA, UT_PEX},
        ut_metadata::UtMetadata,
        ut_pex::UtPex,
    },
};
use peerwire_core::{Id20, constants::MAX_BLOCK_LENGTH};

use crate::{
    Error, Result,
    download_context::DownloadContext,
    extension::{
        ExtensionMessage, ExtensionMessageFactory, HandshakeExtensionMessage,
        UtMetadataExtensionMessage, UtPexExtensionMessage,
    },
    messages::{
        AllowedFastMessage, BitfieldMessage, BtMessage, CancelMessage, ChokeMessage,
        ExtendedBtMessage, HaveAllMessage, HaveMessage, HaveNoneMessage, InterestedMessage,
        NotInterestedMessage, PieceMessage, PortMessage, RejectMessage, RequestMessage,
        SuggestPieceMessage, UnchokeMessage,
    },
    peer::Peer,
};

/// Builds every [`BtMessage`], from the wire or from our own intent.
///
/// Decoding validates indexes and block bounds against the torrent, so a
/// decoded message is safe to apply.
#[derive(Debug, Clone)]
pub struct BtMessageFactory {
    ctx: Arc<DownloadContext>,
    extension_factory: ExtensionMessageFactory,
}

impl BtMessageFactory {
    pub fn new(ctx: Arc<DownloadContext>, registry: ExtensionMessageRegistry) -> Self {
        Self {
            ctx,
            extension_factory: ExtensionMessageFactory::new(registry),
        }
    }

    pub fn download_context(&self) -> &DownloadContext {
        &self.ctx
    }

    /// The ids we assigned to our extensions.
    pub fn registry(&self) -> &ExtensionMessageRegistry {
        self.extension_factory.registry()
    }

    /// Decodes one message body (the bytes after the length prefix). An
    /// empty body is a keep-alive.
    pub fn create_bt_message(&self, body: &[u8], peer: &Peer) -> Result<BtMessage> {
        let msg = match Message::deserialize_body(body)? {
            Message::KeepAlive => BtMessage::keep_alive(),
            Message::Choke => ChokeMessage.into(),
            Message::Unchoke => UnchokeMessage.into(),
            Message::Interested => InterestedMessage.into(),
            Message::NotInterested => NotInterestedMessage.into(),
            Message::Have(index) => {
                self.validate_index("have", index)?;
                HaveMessage { index }.into()
            }
            Message::Bitfield(bitfield) => {
                self.validate_bitfield(&bitfield)?;
                BitfieldMessage { bitfield }.into()
            }
            Message::Request(r) => {
                self.validate_request("request", &r)?;
                RequestMessage {
                    index: r.index,
                    begin: r.begin,
                    length: r.length,
                    block_index: 0,
                }
                .into()
            }
            Message::Piece(p) => {
                let piece_length = self.validate_index("piece", p.index)?;
                let length = p.block.len() as u32;
                if p.begin.checked_add(length).is_none_or(|end| end > piece_length) {
                    return Err(Error::InvalidBlock {
                        name: "piece",
                        index: p.index,
                        begin: p.begin,
                        length,
                    });
                }
                PieceMessage {
                    index: p.index,
                    begin: p.begin,
                    block: p.block,
                }
                .into()
            }
            Message::Cancel(r) => {
                self.validate_request("cancel", &r)?;
                CancelMessage {
                    index: r.index,
                    begin: r.begin,
                    length: r.length,
                }
                .into()
            }
            Message::Port(port) => PortMessage { port }.into(),
            Message::SuggestPiece(index) => {
                self.validate_index("suggest piece", index)?;
                SuggestPieceMessage { index }.into()
            }
            Message::HaveAll => HaveAllMessage.into(),
            Message::HaveNone => HaveNoneMessage.into(),
            Message::RejectRequest(r) => {
                self.validate_request("reject request", &r)?;
                RejectMessage {
                    index: r.index,
                    begin: r.begin,
                    length: r.length,
                }
                .into()
            }
            Message::AllowedFast(index) => {
                self.validate_index("allowed fast", index)?;
                AllowedFastMessage { index }.into()
            }
            Message::Extended(e) => {
                if !peer.extended_messaging_enabled {
                    return Err(Error::ExtendedMessagingDisabled);
                }
                let extension = self.extension_factory.create_message(&e)?;
                ExtendedBtMessage::new(extension).into()
            }
        };
        Ok(msg)
    }

    /// Decodes the peer's handshake and checks it is for our torrent.
    pub fn create_handshake_message(&self, data: &[u8]) -> Result<Handshake> {
        let (h, _) = Handshake::deserialize(data).map_err(Error::DeserializeHandshake)?;
        if h.info_hash != self.ctx.info_hash {
            return Err(Error::WrongInfoHash);
        }
        Ok(h)
    }

    pub fn create_handshake_message_from(&self, info_hash: Id20, peer_id: Id20) -> Handshake {
        Handshake::new(info_hash, peer_id)
    }

    pub fn create_request_message(
        &self,
        index: u32,
        begin: u32,
        length: u32,
        block_index: u32,
    ) -> Result<BtMessage> {
        self.validate_request("request", &Request::new(index, begin, length))?;
        Ok(RequestMessage {
            index,
            begin,
            length,
            block_index,
        }
        .into())
    }

    pub fn create_cancel_message(&self, index: u32, begin: u32, length: u32) -> Result<BtMessage> {
        self.validate_request("cancel", &Request::new(index, begin, length))?;
        Ok(CancelMessage {
            index,
            begin,
            length,
        }
        .into())
    }

    pub fn create_piece_message(&self, index: u32, begin: u32, block: Bytes) -> Result<BtMessage> {
        self.validate_request("piece", &Request::new(index, begin, block.len() as u32))?;
        Ok(PieceMessage {
            index,
            begin,
            block,
        }
        .into())
    }

    pub fn create_reject_message(&self, index: u32, begin: u32, length: u32) -> Result<BtMessage> {
        self.validate_request("reject request", &Request::new(index, begin, length))?;
        Ok(RejectMessage {
            index,
            begin,
            length,
        }
        .into())
    }

    pub fn create_have_message(&self, index: u32) -> Result<BtMessage> {
        self.validate_index("have", index)?;
        Ok(HaveMessage { index }.into())
    }

    pub fn create_allowed_fast_message(&self, index: u32) -> Result<BtMessage> {
        self.validate_index("allowed fast", index)?;
        Ok(AllowedFastMessage { index }.into())
    }

    pub fn create_suggest_piece_message(&self, index: u32) -> Result<BtMessage> {
        self.validate_index("suggest piece", index)?;
        Ok(SuggestPieceMessage { index }.into())
    }

    pub fn create_bitfield_message(&self, bitfield: impl Into<Bytes>) -> Result<BtMessage> {
        let bitfield = bitfield.into();
        self.validate_bitfield(&bitfield)?;
        Ok(BitfieldMessage { bitfield }.into())
    }

    pub fn create_have_all_message(&self) -> BtMessage {
        HaveAllMessage.into()
    }

    pub fn create_have_none_message(&self) -> BtMessage {
        HaveNoneMessage.into()
    }

    pub fn create_choke_message(&self) -> BtMessage {
        ChokeMessage.into()
    }

    pub fn create_unchoke_message(&self) -> BtMessage {
        UnchokeMessage.into()
    }

    pub fn create_interested_message(&self) -> BtMessage {
        InterestedMessage.into()
    }

    pub fn create_not_interested_message(&self) -> BtMessage {
        NotInterestedMessage.into()
    }

    pub fn create_keep_alive_message(&self) -> BtMessage {
        BtMessage::keep_alive()
    }

    pub fn create_port_message(&self, port: u16) -> BtMessage {
        PortMessage { port }.into()
    }

    pub fn create_bt_extended_message(&self, extension: Box<dyn ExtensionMessage>) -> BtMessage {
        ExtendedBtMessage::new(extension).into()
    }

    /// Our BEP10 handshake, advertising the ids in our registry.
    pub fn create_extended_handshake_message(
        &self,
        client_version: String,
        listen_port: Option<u16>,
    ) -> BtMessage {
        let mut handshake = ExtendedHandshake::new(self.registry());
        handshake.v = Some(client_version);
        handshake.p = listen_port;
        handshake.metadata_size = self.ctx.metadata.as_ref().map(|m| m.len() as u32);
        self.create_bt_extended_message(Box::new(HandshakeExtensionMessage::new(handshake)))
    }

    /// A ut_metadata message addressed with the id the peer picked.
    pub fn create_ut_metadata_message(&self, peer: &Peer, msg: UtMetadata) -> Result<BtMessage> {
        let id = peer.get_extension_message_id(UT_METADATA);
        if id == 0 {
            return Err(Error::ExtensionNotNegotiated("ut_metadata"));
        }
        Ok(self.create_bt_extended_message(Box::new(UtMetadataExtensionMessage::new(id, msg))))
    }

    /// A ut_pex message addressed with the id the peer picked.
    pub fn create_ut_pex_message(&self, peer: &Peer, pex: UtPex) -> Result<BtMessage> {
        let id = peer.get_extension_message_id(UT_PEX);
        if id == 0 {
            return Err(Error::ExtensionNotNegotiated("ut_pex"));
        }
        Ok(self.create_bt_extended_message(Box::new(UtPexExtensionMessage::new(id, pex))))
    }

    /// Returns the piece length.
    fn validate_index(&self, name: &'static str, index: u32) -> Result<u32> {
        self.ctx
            .piece_length(index)
            .ok_or(Error::InvalidPieceIndex { name, index })
    }

    fn validate_request(&self, name: &'static str, r: &Request) -> Result<()> {
        let piece_length = self.validate_index(name, r.index)?;
        let in_bounds = r.length > 0
            && r.length <= MAX_BLOCK_LENGTH
            && r.begin
                .checked_add(r.length)
                .is_some_and(|end| end <= piece_length);
        if !in_bounds {
            return Err(Error::InvalidBlock {
                name,
                index: r.index,
                begin: r.begin,
                length: r.length,
            });
        }
        Ok(())
    }

    fn validate_bitfield(&self, bitfield: &[u8]) -> Result<()> {
        let num_pieces = self.ctx.num_pieces() as usize;
        let expected = num_pieces.div_ceil(8);
        if bitfield.len() != expected {
            return Err(Error::BitfieldLength {
                expected,
                received: bitfield.len(),
            });
        }
        let spare = expected * 8 - num_pieces;
        if spare > 0 {
            let mask = (1u8 << spare) - 1;
            if bitfield[expected - 1] & mask != 0 {
                return Err(Error::BitfieldSpareBits);
            }
        }
        Ok(())
    }
}
