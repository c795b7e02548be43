use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
    time::Instant,
};

use anyhow::{Context, bail};
use bytes::Bytes;
use tracing::{debug, info, trace};

use crate::{
    download_context::DownloadContext,
    piece::Piece,
    type_aliases::{BF, SessionId},
};

use super::PieceStorage;

/// End game starts once this few pieces are missing.
pub const DEFAULT_END_GAME_PIECE_NUM: u32 = 20;

struct HaveEntry {
    session_id: SessionId,
    index: u32,
    at: Instant,
}

/// A [`PieceStorage`] keeping the whole torrent in one buffer.
///
/// Pieces are picked lowest index first.
pub struct InMemoryPieceStorage {
    ctx: Arc<DownloadContext>,
    data: Vec<u8>,
    have: BF,
    /// How many sessions have each piece checked out.
    use_count: Vec<u32>,
    used_pieces: BTreeMap<u32, Piece>,
    haves: VecDeque<HaveEntry>,
    end_game_piece_num: u32,
}

impl InMemoryPieceStorage {
    pub fn new(ctx: Arc<DownloadContext>) -> Self {
        let num_pieces = ctx.num_pieces() as usize;
        let total = ctx.lengths.total_length() as usize;
        Self {
            ctx,
            data: vec![0; total],
            have: BF::repeat(false, num_pieces),
            use_count: vec![0; num_pieces],
            used_pieces: BTreeMap::new(),
            haves: VecDeque::new(),
            end_game_piece_num: DEFAULT_END_GAME_PIECE_NUM,
        }
    }

    /// A storage holding `data`, with every piece whose hash matches marked
    /// as present.
    pub fn new_with_data(ctx: Arc<DownloadContext>, data: Vec<u8>) -> anyhow::Result<Self> {
        if data.len() as u64 != ctx.lengths.total_length() {
            bail!(
                "data length {} doesn't match torrent length {}",
                data.len(),
                ctx.lengths.total_length()
            );
        }
        let mut s = Self::new(ctx);
        s.data = data;
        for index in 0..s.ctx.num_pieces() {
            if s.check_piece_hash(index)? {
                s.have.set(index as usize, true);
            }
        }
        debug!(have = s.have.count_ones(), "initialized in-memory storage");
        Ok(s)
    }

    pub fn with_end_game_piece_num(mut self, num: u32) -> Self {
        self.end_game_piece_num = num;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_piece_used(&self, index: u32) -> bool {
        self.use_count
            .get(index as usize)
            .is_some_and(|c| *c > 0)
    }

    fn piece_range(&self, index: u32) -> anyhow::Result<std::ops::Range<usize>> {
        let valid = self
            .ctx
            .lengths
            .try_validate_piece_index(index)
            .context("bad piece index")?;
        let offset = self.ctx.lengths.piece_offset(valid) as usize;
        let len = self.ctx.lengths.piece_length(valid) as usize;
        Ok(offset..offset + len)
    }

    fn block_range(
        &self,
        index: u32,
        begin: u32,
        length: u32,
    ) -> anyhow::Result<std::ops::Range<usize>> {
        let piece = self.piece_range(index)?;
        let start = piece.start + begin as usize;
        let end = start + length as usize;
        if end > piece.end {
            bail!("block index={index} begin={begin} length={length} is outside the piece");
        }
        Ok(start..end)
    }

    fn check_out_piece(&mut self, index: u32) -> u32 {
        if let Some(count) = self.use_count.get_mut(index as usize) {
            *count += 1;
        }
        if !self.used_pieces.contains_key(&index) {
            let length = self.ctx.piece_length(index).unwrap_or(0);
            let piece = Piece::new(index, length, self.ctx.lengths.default_block_length());
            self.used_pieces.insert(index, piece);
        }
        trace!(index, "checked out piece");
        index
    }

    fn candidates<'a>(
        &'a self,
        peer_bitfield: &'a BF,
        excluded: &'a [u32],
    ) -> impl Iterator<Item = u32> + 'a {
        let end_game = self.is_end_game();
        peer_bitfield
            .iter_ones()
            .map(|i| i as u32)
            .filter(move |i| !self.has_piece(*i))
            .filter(move |i| end_game || !self.is_piece_used(*i))
            .filter(move |i| !excluded.contains(i))
    }
}

impl PieceStorage for InMemoryPieceStorage {
    fn has_piece(&self, index: u32) -> bool {
        self.have
            .get(index as usize)
            .map(|b| *b)
            .unwrap_or(false)
    }

    fn bitfield(&self) -> &BF {
        &self.have
    }

    fn completed_length(&self) -> u64 {
        let full: u64 = self
            .have
            .iter_ones()
            .filter_map(|i| self.ctx.piece_length(i as u32))
            .map(|l| l as u64)
            .sum();
        let partial: u64 = self
            .used_pieces
            .values()
            .map(|p| p.completed_length())
            .sum();
        full + partial
    }

    fn all_download_finished(&self) -> bool {
        self.have.all()
    }

    fn is_end_game(&self) -> bool {
        self.have.count_zeros() as u32 <= self.end_game_piece_num
    }

    fn has_missing_piece(&self, peer_bitfield: &BF) -> bool {
        peer_bitfield
            .iter_ones()
            .any(|i| !self.has_piece(i as u32))
    }

    fn get_missing_piece(&mut self, peer_bitfield: &BF, excluded: &[u32]) -> Option<u32> {
        let index = self.candidates(peer_bitfield, excluded).next()?;
        Some(self.check_out_piece(index))
    }

    fn get_missing_fast_piece(
        &mut self,
        peer_bitfield: &BF,
        allowed: &[u32],
        excluded: &[u32],
    ) -> Option<u32> {
        let index = self
            .candidates(peer_bitfield, excluded)
            .find(|i| allowed.contains(i))?;
        Some(self.check_out_piece(index))
    }

    fn get_piece(&self, index: u32) -> Option<&Piece> {
        self.used_pieces.get(&index)
    }

    fn get_piece_mut(&mut self, index: u32) -> Option<&mut Piece> {
        self.used_pieces.get_mut(&index)
    }

    fn read_block(&self, index: u32, begin: u32, length: u32) -> anyhow::Result<Bytes> {
        if !self.has_piece(index) {
            bail!("piece {index} is not available");
        }
        let range = self.block_range(index, begin, length)?;
        Ok(Bytes::copy_from_slice(&self.data[range]))
    }

    fn write_block(&mut self, index: u32, begin: u32, data: &[u8]) -> anyhow::Result<()> {
        let range = self.block_range(index, begin, data.len() as u32)?;
        self.data[range].copy_from_slice(data);
        Ok(())
    }

    fn check_piece_hash(&self, index: u32) -> anyhow::Result<bool> {
        let range = self.piece_range(index)?;
        let expected = self
            .ctx
            .piece_hashes
            .get(index as usize)
            .with_context(|| format!("no hash for piece {index}"))?;
        Ok(sha1w::sha1_digest(&self.data[range]) == expected.0)
    }

    fn complete_piece(&mut self, index: u32) {
        if let Some(piece) = self.used_pieces.remove(&index) {
            trace!(index, blocks = %piece.debug_bits(), "piece done");
        }
        if let Some(mut bit) = self.have.get_mut(index as usize) {
            *bit = true;
        }
        if let Some(count) = self.use_count.get_mut(index as usize) {
            *count = 0;
        }
        info!(
            index,
            remaining = self.have.count_zeros(),
            "piece completed"
        );
    }

    fn cancel_piece(&mut self, index: u32) {
        if let Some(count) = self.use_count.get_mut(index as usize) {
            *count = count.saturating_sub(1);
        }
        if self.is_piece_used(index) || self.is_end_game() {
            return;
        }
        if self
            .used_pieces
            .get(&index)
            .is_some_and(|p| p.completed_length() == 0)
        {
            trace!(index, "dropping untouched piece");
            self.used_pieces.remove(&index);
        }
    }

    fn advertise_piece(&mut self, session_id: SessionId, index: u32) {
        self.haves.push_front(HaveEntry {
            session_id,
            index,
            at: Instant::now(),
        });
    }

    fn get_advertised_piece_indexes(&self, session_id: SessionId, since: Instant) -> Vec<u32> {
        self.haves
            .iter()
            .take_while(|h| h.at >= since)
            .filter(|h| h.session_id != session_id)
            .map(|h| h.index)
            .collect()
    }
}
