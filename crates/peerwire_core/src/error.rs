#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("torrent with 0 length is useless")]
    ZeroLength,
    #[error("piece length must be greater than 0")]
    ZeroPieceLength,
    #[error("block length {0} is not a power of 2")]
    BlockLengthNotPowerOfTwo(u32),
    #[error("block length {block_length} should be <= piece length {piece_length}")]
    BlockLongerThanPiece { block_length: u32, piece_length: u32 },
    #[error("too many pieces: {0}")]
    TooManyPieces(u64),
    #[error("invalid piece index {0}")]
    InvalidPieceIndex(u32),
    #[error("expected a hex string of length {0}")]
    BadHexLength(usize),
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
}
