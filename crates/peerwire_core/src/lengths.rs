use crate::{Error, constants::BLOCK_LENGTH};

const fn is_power_of_two(x: u64) -> bool {
    (x != 0) && ((x & (x - 1)) == 0)
}

pub const fn ceil_div_u64(a: u64, b: u64) -> u64 {
    a.div_ceil(b)
}

pub const fn last_element_size_u64(total: u64, element_size: u64) -> u64 {
    let rem = total % element_size;
    if rem == 0 {
        return element_size;
    }
    rem
}

/// Piece and block geometry of one torrent.
#[derive(Debug, Clone, Copy)]
pub struct Lengths {
    block_length: u32,
    total_length: u64,
    piece_length: u32,
    last_piece_id: u32,
    last_piece_length: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValidPieceIndex(u32);
impl std::fmt::Display for ValidPieceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::fmt::Debug for ValidPieceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl ValidPieceIndex {
    pub const fn get(&self) -> u32 {
        self.0
    }
}

impl Lengths {
    pub fn new(
        total_length: u64,
        piece_length: u32,
        block_length: Option<u32>,
    ) -> Result<Self, Error> {
        let block_length = block_length.unwrap_or(BLOCK_LENGTH);
        if !is_power_of_two(block_length as u64) {
            return Err(Error::BlockLengthNotPowerOfTwo(block_length));
        }
        if piece_length == 0 {
            return Err(Error::ZeroPieceLength);
        }
        if total_length == 0 {
            return Err(Error::ZeroLength);
        }
        // The last piece may be shorter than a block, every other one may not.
        if block_length > piece_length && total_length > piece_length as u64 {
            return Err(Error::BlockLongerThanPiece {
                block_length,
                piece_length,
            });
        }
        let total_pieces = ceil_div_u64(total_length, piece_length as u64);
        let total_pieces =
            u32::try_from(total_pieces).map_err(|_| Error::TooManyPieces(total_pieces))?;
        Ok(Self {
            block_length,
            piece_length,
            total_length,
            last_piece_id: total_pieces - 1,
            last_piece_length: last_element_size_u64(total_length, piece_length as u64) as u32,
        })
    }
    pub const fn total_length(&self) -> u64 {
        self.total_length
    }
    pub const fn validate_piece_index(&self, index: u32) -> Option<ValidPieceIndex> {
        if index > self.last_piece_id {
            return None;
        }
        Some(ValidPieceIndex(index))
    }
    pub fn try_validate_piece_index(&self, index: u32) -> Result<ValidPieceIndex, Error> {
        self.validate_piece_index(index)
            .ok_or(Error::InvalidPieceIndex(index))
    }
    pub const fn default_block_length(&self) -> u32 {
        self.block_length
    }
    pub const fn total_pieces(&self) -> u32 {
        self.last_piece_id + 1
    }
    pub const fn piece_length(&self, index: ValidPieceIndex) -> u32 {
        if index.0 == self.last_piece_id {
            return self.last_piece_length;
        }
        self.piece_length
    }
    pub const fn piece_offset(&self, index: ValidPieceIndex) -> u64 {
        index.0 as u64 * self.piece_length as u64
    }
}
