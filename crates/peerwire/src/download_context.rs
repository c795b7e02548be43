use bytes::Bytes;
use peerwire_core::{Id20, lengths::Lengths};

/// Read-only facts about the torrent a session is exchanging.
#[derive(Debug, Clone)]
pub struct DownloadContext {
    pub info_hash: Id20,
    pub lengths: Lengths,
    /// SHA-1 of every piece, in piece order.
    pub piece_hashes: Vec<Id20>,
    /// The bencoded info dictionary, served to peers over ut_metadata.
    /// `None` while we don't have it ourselves.
    pub metadata: Option<Bytes>,
}

impl DownloadContext {
    pub fn new(info_hash: Id20, lengths: Lengths, piece_hashes: Vec<Id20>) -> Self {
        Self {
            info_hash,
            lengths,
            piece_hashes,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<Bytes>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    pub fn num_pieces(&self) -> u32 {
        self.lengths.total_pieces()
    }

    /// Length of piece `index`, `None` if the index is out of range.
    pub fn piece_length(&self, index: u32) -> Option<u32> {
        let index = self.lengths.validate_piece_index(index)?;
        Some(self.lengths.piece_length(index))
    }
}
