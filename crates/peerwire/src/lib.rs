//! The per-peer half of a BitTorrent client.
//!
//! A [`PeerSession`] owns one connection. It decodes what the peer sends
//! into [`BtMessage`](messages::BtMessage)s through the
//! [`BtMessageFactory`], queues what we send in the [`BtMessageDispatcher`],
//! and picks blocks to request with the [`BtRequestFactory`]. Piece data
//! and availability live behind the [`PieceStorage`] trait, shared by all
//! sessions of one torrent.
//!
//! Sessions do no I/O scheduling of their own: the owner drives them over
//! a non-blocking stream by calling
//! [`PeerSession::do_interaction_processing`] periodically.

pub mod context;
pub mod dispatcher;
pub mod download_context;
mod error;
pub mod events;
pub mod extension;
pub mod message_factory;
pub mod messages;
pub mod options;
pub mod peer;
pub mod peer_connection;
pub mod piece;
pub mod request_factory;
pub mod request_slot;
pub mod session;
pub mod storage;
pub mod type_aliases;

pub use dispatcher::BtMessageDispatcher;
pub use download_context::DownloadContext;
pub use error::{Error, Result};
pub use events::SessionEvent;
pub use message_factory::BtMessageFactory;
pub use options::PeerSessionOptions;
pub use peer::Peer;
pub use request_factory::BtRequestFactory;
pub use session::PeerSession;
pub use storage::{PieceStorage, SharedPieceStorage, in_memory::InMemoryPieceStorage};

pub use peer_binary_protocol::extended::registry::ExtensionMessageRegistry;

/// The cargo version of peerwire.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests;
