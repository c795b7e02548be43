use std::net::SocketAddr;

use bytes::Bytes;
use peer_binary_protocol::extended::ut_pex::PexPeerInfo;

/// Things a session learned that concern the rest of the client.
///
/// Collected during processing and drained by the owner with
/// [`PeerSession::take_events`](crate::session::PeerSession::take_events).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    PieceCompleted(u32),
    PieceHashFailed(u32),
    PexPeers {
        added: Vec<PexPeerInfo>,
        dropped: Vec<SocketAddr>,
    },
    MetadataPiece {
        piece: u32,
        total_size: u32,
        data: Bytes,
    },
    MetadataRejected(u32),
}
