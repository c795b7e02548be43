pub mod in_memory;

use std::{sync::Arc, time::Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    piece::Piece,
    type_aliases::{BF, SessionId},
};

/// Piece availability and data, shared by every session of one torrent.
///
/// Sessions lock it for the duration of one processing tick, see
/// [`SharedPieceStorage`].
pub trait PieceStorage {
    fn has_piece(&self, index: u32) -> bool;

    /// Our own bitfield, one bit per piece.
    fn bitfield(&self) -> &BF;

    fn completed_length(&self) -> u64;

    fn all_download_finished(&self) -> bool;

    /// Whether everything we want is downloaded. Differs from
    /// [`all_download_finished`](Self::all_download_finished) only for
    /// storages that skip some pieces.
    fn download_finished(&self) -> bool {
        self.all_download_finished()
    }

    /// In end game, pieces other sessions are downloading may be picked
    /// again, and blocks may be requested redundantly.
    fn is_end_game(&self) -> bool;

    /// Whether the peer has a piece we don't.
    fn has_missing_piece(&self, peer_bitfield: &BF) -> bool;

    /// Checks out a piece the peer has and we lack, skipping `excluded`.
    /// The piece stays available through [`get_piece`](Self::get_piece)
    /// until completed or cancelled.
    fn get_missing_piece(&mut self, peer_bitfield: &BF, excluded: &[u32]) -> Option<u32>;

    /// Like [`get_missing_piece`](Self::get_missing_piece), restricted to
    /// the pieces the peer allows us to fetch while choked.
    fn get_missing_fast_piece(
        &mut self,
        peer_bitfield: &BF,
        allowed: &[u32],
        excluded: &[u32],
    ) -> Option<u32>;

    fn get_piece(&self, index: u32) -> Option<&Piece>;

    fn get_piece_mut(&mut self, index: u32) -> Option<&mut Piece>;

    fn read_block(&self, index: u32, begin: u32, length: u32) -> anyhow::Result<Bytes>;

    fn write_block(&mut self, index: u32, begin: u32, data: &[u8]) -> anyhow::Result<()>;

    fn check_piece_hash(&self, index: u32) -> anyhow::Result<bool>;

    fn complete_piece(&mut self, index: u32);

    /// Gives one checkout of a piece back. Once nobody uses it, a piece
    /// with no downloaded data is dropped; partially downloaded pieces are
    /// kept.
    fn cancel_piece(&mut self, index: u32);

    /// Records that `session_id` completed `index`, for other sessions to
    /// announce with Have.
    fn advertise_piece(&mut self, session_id: SessionId, index: u32);

    /// Pieces advertised since `since` by sessions other than `session_id`.
    fn get_advertised_piece_indexes(&self, session_id: SessionId, since: Instant) -> Vec<u32>;
}

pub type SharedPieceStorage = Arc<Mutex<dyn PieceStorage + Send>>;
