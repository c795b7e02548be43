/// Size of one block request, and of every block except possibly the last
/// block of the last piece.
pub const BLOCK_LENGTH: u32 = 16384;

/// Largest block a peer may ask for in one request.
pub const MAX_BLOCK_LENGTH: u32 = 128 * 1024;

pub const INFO_HASH_LENGTH: usize = 20;
pub const PEER_ID_LENGTH: usize = 20;
