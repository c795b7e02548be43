use tracing::{debug, trace};

use crate::{
    Result, dispatcher::BtMessageDispatcher, message_factory::BtMessageFactory,
    messages::BtMessage, peer::Peer, storage::PieceStorage,
};

/// The pieces one connection downloads, and which of their blocks to
/// request next.
///
/// Holds piece indexes only, the pieces themselves live in the
/// [`PieceStorage`]. Requests come out in target order, then ascending
/// block order.
#[derive(Debug, Default)]
pub struct BtRequestFactory {
    pieces: Vec<u32>,
}

impl BtRequestFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_target_piece(&mut self, index: u32) {
        self.pieces.push(index);
    }

    /// Stops downloading `index` from this peer and gives the piece back to
    /// the storage.
    pub fn remove_target_piece(
        &mut self,
        index: u32,
        dispatcher: &mut BtMessageDispatcher,
        storage: &mut dyn PieceStorage,
    ) {
        let len = self.pieces.len();
        self.pieces.retain(|i| *i != index);
        if self.pieces.len() == len {
            return;
        }
        dispatcher.do_abort_outstanding_request_action(index, storage);
        storage.cancel_piece(index);
    }

    pub fn remove_all_target_piece(
        &mut self,
        dispatcher: &mut BtMessageDispatcher,
        storage: &mut dyn PieceStorage,
    ) {
        for index in std::mem::take(&mut self.pieces) {
            dispatcher.do_abort_outstanding_request_action(index, storage);
            storage.cancel_piece(index);
        }
    }

    /// Drops targets that are fully downloaded, here or by another session.
    pub fn remove_completed_piece(
        &mut self,
        dispatcher: &mut BtMessageDispatcher,
        storage: &mut dyn PieceStorage,
    ) {
        self.pieces.retain(|&index| {
            let complete = storage.has_piece(index)
                || storage
                    .get_piece(index)
                    .is_none_or(|piece| piece.piece_complete());
            if complete {
                trace!(index, "target piece complete");
                dispatcher.do_abort_outstanding_request_action(index, storage);
            }
            !complete
        });
    }

    pub fn count_target_piece(&self) -> usize {
        self.pieces.len()
    }

    /// Blocks of the target pieces that are neither downloaded nor
    /// requested.
    pub fn count_missing_block(&self, storage: &dyn PieceStorage) -> usize {
        self.pieces
            .iter()
            .filter_map(|index| storage.get_piece(*index))
            .map(|piece| piece.count_missing_block() as usize)
            .sum()
    }

    /// The peer choked us. Blocks of pieces it won't serve while choking
    /// become requestable again, the pieces stay targeted.
    pub fn do_choked_action(&mut self, peer: &Peer, storage: &mut dyn PieceStorage) {
        for &index in self.pieces.iter() {
            if peer.is_in_peer_allowed_index_set(index) {
                continue;
            }
            if let Some(piece) = storage.get_piece_mut(index) {
                piece.cancel_all_block();
            }
        }
    }

    /// Creates up to `max` requests.
    ///
    /// Normal mode requests blocks nobody requested yet, and marks them as
    /// requested. End-game mode requests every missing block this
    /// connection has no outstanding request for, even if another
    /// connection is already fetching it.
    pub fn create_request_messages(
        &mut self,
        max: usize,
        end_game: bool,
        peer: &Peer,
        dispatcher: &BtMessageDispatcher,
        storage: &mut dyn PieceStorage,
        factory: &BtMessageFactory,
    ) -> Result<Vec<BtMessage>> {
        if end_game {
            self.create_request_messages_on_end_game(max, peer, dispatcher, storage, factory)
        } else {
            self.create_request_messages_normal(max, peer, storage, factory)
        }
    }

    fn is_requestable(peer: &Peer, index: u32) -> bool {
        !peer.peer_choking || peer.is_in_peer_allowed_index_set(index)
    }

    fn create_request_messages_normal(
        &mut self,
        max: usize,
        peer: &Peer,
        storage: &mut dyn PieceStorage,
        factory: &BtMessageFactory,
    ) -> Result<Vec<BtMessage>> {
        let mut requests = Vec::new();
        for &index in self.pieces.iter() {
            if requests.len() >= max {
                break;
            }
            if !Self::is_requestable(peer, index) {
                continue;
            }
            let Some(piece) = storage.get_piece_mut(index) else {
                continue;
            };
            while requests.len() < max {
                let Some(block_index) = piece.get_missing_unused_block_index() else {
                    break;
                };
                let msg = factory.create_request_message(
                    index,
                    piece.block_offset(block_index),
                    piece.block_length(block_index),
                    block_index,
                )?;
                trace!(%msg, block_index, "created request");
                requests.push(msg);
            }
        }
        Ok(requests)
    }

    fn create_request_messages_on_end_game(
        &mut self,
        max: usize,
        peer: &Peer,
        dispatcher: &BtMessageDispatcher,
        storage: &mut dyn PieceStorage,
        factory: &BtMessageFactory,
    ) -> Result<Vec<BtMessage>> {
        let mut requests = Vec::new();
        for &index in self.pieces.iter() {
            if requests.len() >= max {
                break;
            }
            if !Self::is_requestable(peer, index) {
                continue;
            }
            let Some(piece) = storage.get_piece(index) else {
                continue;
            };
            for block_index in piece.get_all_missing_block_indexes() {
                if requests.len() >= max {
                    break;
                }
                if dispatcher.is_outstanding_request(index, block_index) {
                    continue;
                }
                let msg = factory.create_request_message(
                    index,
                    piece.block_offset(block_index),
                    piece.block_length(block_index),
                    block_index,
                )?;
                debug!(%msg, block_index, "created end-game request");
                requests.push(msg);
            }
        }
        Ok(requests)
    }

    /// Target piece indexes, in request order.
    pub fn get_target_piece_indexes(&self) -> &[u32] {
        &self.pieces
    }
}
