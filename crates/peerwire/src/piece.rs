use tracing::trace;

use crate::type_aliases::BF;

/// Block bookkeeping of one piece being downloaded.
///
/// `have` marks blocks whose data arrived, `used` marks blocks some
/// connection has requested and not yet received or given up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    index: u32,
    length: u32,
    block_length: u32,
    have: BF,
    used: BF,
}

impl Piece {
    /// # Panics
    /// If `block_length` is 0.
    pub fn new(index: u32, length: u32, block_length: u32) -> Self {
        assert!(block_length > 0, "block length must be positive");
        let blocks = length.div_ceil(block_length) as usize;
        Self {
            index,
            length,
            block_length,
            have: BF::repeat(false, blocks),
            used: BF::repeat(false, blocks),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn count_block(&self) -> u32 {
        self.have.len() as u32
    }

    /// Length of block `block_index`; the last block may be shorter.
    pub fn block_length(&self, block_index: u32) -> u32 {
        let offset = block_index * self.block_length;
        self.length.saturating_sub(offset).min(self.block_length)
    }

    pub fn block_offset(&self, block_index: u32) -> u32 {
        block_index * self.block_length
    }

    /// The block `(begin, length)` covers exactly, if any.
    pub fn block_index_of(&self, begin: u32, length: u32) -> Option<u32> {
        if begin % self.block_length != 0 {
            return None;
        }
        let block_index = begin / self.block_length;
        if block_index >= self.count_block() || self.block_length(block_index) != length {
            return None;
        }
        Some(block_index)
    }

    pub fn has_block(&self, block_index: u32) -> bool {
        self.have
            .get(block_index as usize)
            .map(|b| *b)
            .unwrap_or(false)
    }

    pub fn is_block_used(&self, block_index: u32) -> bool {
        self.used
            .get(block_index as usize)
            .map(|b| *b)
            .unwrap_or(false)
    }

    /// Picks the first block that is neither received nor requested, and
    /// marks it requested.
    pub fn get_missing_unused_block_index(&mut self) -> Option<u32> {
        let idx = self
            .have
            .iter_zeros()
            .find(|i| !self.used[*i])?;
        self.used.set(idx, true);
        Some(idx as u32)
    }

    /// Every block not yet received, requested or not.
    pub fn get_all_missing_block_indexes(&self) -> impl Iterator<Item = u32> + '_ {
        self.have.iter_zeros().map(|i| i as u32)
    }

    pub fn complete_block(&mut self, block_index: u32) {
        let i = block_index as usize;
        if i < self.have.len() {
            self.have.set(i, true);
            self.used.set(i, false);
        }
    }

    /// Releases the requested marker of a block.
    pub fn cancel_block(&mut self, block_index: u32) {
        let i = block_index as usize;
        if i < self.used.len() {
            self.used.set(i, false);
        }
    }

    pub fn cancel_all_block(&mut self) {
        self.used.fill(false);
    }

    pub fn clear_all_block(&mut self) {
        trace!(index = self.index, "clearing all blocks");
        self.have.fill(false);
        self.used.fill(false);
    }

    pub fn piece_complete(&self) -> bool {
        self.have.all()
    }

    /// Blocks that are neither received nor requested.
    pub fn count_missing_block(&self) -> u32 {
        self.have
            .iter_zeros()
            .filter(|i| !self.used[*i])
            .count() as u32
    }

    pub fn count_complete_block(&self) -> u32 {
        self.have.count_ones() as u32
    }

    pub fn completed_length(&self) -> u64 {
        self.have
            .iter_ones()
            .map(|i| self.block_length(i as u32) as u64)
            .sum()
    }

    pub fn is_empty_bits(&self) -> bool {
        self.have.not_any() && self.used.not_any()
    }

    pub(crate) fn debug_bits(&self) -> String {
        let mut s = String::with_capacity(self.have.len());
        for (h, u) in self.have.iter().zip(self.used.iter()) {
            s.push(match (*h, *u) {
                (true, _) => 'X',
                (false, true) => 'u',
                (false, false) => '.',
            });
        }
        s
    }
}
