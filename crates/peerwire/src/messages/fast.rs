use peer_binary_protocol::Message;
use tracing::trace;

use super::require_fast_extension;
use crate::{Result, context::MessageContext, peer::Peer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowedFastMessage {
    pub index: u32,
}

impl AllowedFastMessage {
    pub(crate) fn to_wire(&self) -> Message {
        Message::AllowedFast(self.index)
    }

    pub(crate) fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        require_fast_extension(ctx.peer, "allowed fast")?;
        ctx.peer.add_peer_allowed_index(self.index);
        Ok(())
    }

    pub(crate) fn on_send_complete(&self, peer: &mut Peer) {
        peer.add_am_allowed_index(self.index);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuggestPieceMessage {
    pub index: u32,
}

impl SuggestPieceMessage {
    pub(crate) fn to_wire(&self) -> Message {
        Message::SuggestPiece(self.index)
    }

    pub(crate) fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        require_fast_extension(ctx.peer, "suggest piece")?;
        trace!(index = self.index, "peer suggests piece");
        ctx.peer.add_suggested_piece(self.index);
        Ok(())
    }
}
