use std::time::Instant;

use bytes::Bytes;
use peer_binary_protocol::{Message, Piece};
use tracing::{debug, trace, warn};

use super::{BtMessage, RejectMessage};
use crate::{Error, Result, context::MessageContext, events::SessionEvent, peer::Peer};

#[derive(Clone, PartialEq, Eq)]
pub struct PieceMessage {
    pub index: u32,
    pub begin: u32,
    pub block: Bytes,
}

impl std::fmt::Debug for PieceMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PieceMessage")
            .field("index", &self.index)
            .field("begin", &self.begin)
            .field("len", &self.block.len())
            .finish()
    }
}

impl PieceMessage {
    pub fn block_length(&self) -> u32 {
        self.block.len() as u32
    }

    pub(crate) fn to_wire(&self) -> Message {
        Message::Piece(Piece::from_data(self.index, self.begin, self.block.clone()))
    }

    pub(crate) fn matches(&self, index: u32, begin: u32, length: u32) -> bool {
        (self.index, self.begin, self.block_length()) == (index, begin, length)
    }

    pub(crate) fn reject_if_fast(&self, peer: &Peer) -> Option<BtMessage> {
        if !peer.fast_extension_enabled {
            return None;
        }
        Some(
            RejectMessage {
                index: self.index,
                begin: self.begin,
                length: self.block_length(),
            }
            .into(),
        )
    }

    /// Returns whether to invalidate, and a Reject to queue.
    pub(crate) fn on_choking_event(&self, peer: &Peer) -> (bool, Option<BtMessage>) {
        if peer.fast_extension_enabled && peer.is_in_am_allowed_index_set(self.index) {
            return (false, None);
        }
        debug!(
            index = self.index,
            begin = self.begin,
            "dropping queued piece, peer is choked"
        );
        (true, self.reject_if_fast(peer))
    }

    pub(crate) fn on_send_complete(&self, peer: &mut Peer) {
        peer.update_upload_length(self.block.len() as u64);
    }

    pub(crate) fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        let Some(slot) =
            ctx.dispatcher
                .get_outstanding_request(self.index, self.begin, self.block_length())
        else {
            debug!(
                index = self.index,
                begin = self.begin,
                "piece for a block we did not request, ignoring"
            );
            return Ok(());
        };

        ctx.peer.snubbing = false;
        ctx.peer.update_download_length(self.block.len() as u64);
        ctx.peer.update_latency(slot.latency(Instant::now()));

        let has_block = ctx
            .storage
            .get_piece(self.index)
            .map(|p| p.has_block(slot.block_index));
        match has_block {
            Some(false) => {
                ctx.storage
                    .write_block(self.index, self.begin, &self.block)
                    .map_err(Error::Storage)?;
                let complete = match ctx.storage.get_piece_mut(self.index) {
                    Some(piece) => {
                        piece.complete_block(slot.block_index);
                        piece.piece_complete()
                    }
                    None => false,
                };
                if complete {
                    self.on_piece_downloaded(ctx)?;
                }
            }
            Some(true) => trace!(index = self.index, begin = self.begin, "block already present"),
            None => trace!(index = self.index, "piece no longer in progress"),
        }
        ctx.dispatcher.remove_outstanding_request(&slot, ctx.storage);
        Ok(())
    }

    fn on_piece_downloaded(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        let index = self.index;
        if ctx.storage.check_piece_hash(index).map_err(Error::Storage)? {
            ctx.storage.complete_piece(index);
            ctx.storage.advertise_piece(ctx.session_id, index);
            ctx.events.push(SessionEvent::PieceCompleted(index));
        } else {
            warn!(index, addr = %ctx.peer.addr, "piece hash check failed");
            if let Some(piece) = ctx.storage.get_piece_mut(index) {
                piece.clear_all_block();
            }
            ctx.request_factory
                .remove_target_piece(index, ctx.dispatcher, ctx.storage);
            ctx.events.push(SessionEvent::PieceHashFailed(index));
        }
        Ok(())
    }
}
