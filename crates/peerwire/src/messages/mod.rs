//! Typed peer messages and what happens when they are received or sent.
//!
//! A [`BtMessage`] wraps one variant struct per wire message plus the two
//! flags every queued message carries: `invalidate` (drop it instead of
//! sending) and `sending_in_progress` (partly written, must go out whole).

mod availability;
mod cancel;
mod choke;
mod extended;
mod fast;
mod interest;
mod piece;
mod port;
mod reject;
mod request;

use peer_binary_protocol::Message;
use tracing::trace;

pub use availability::{BitfieldMessage, HaveAllMessage, HaveMessage, HaveNoneMessage};
pub use cancel::CancelMessage;
pub use choke::{ChokeMessage, UnchokeMessage};
pub use extended::ExtendedBtMessage;
pub use fast::{AllowedFastMessage, SuggestPieceMessage};
pub use interest::{InterestedMessage, NotInterestedMessage};
pub use piece::PieceMessage;
pub use port::PortMessage;
pub use reject::RejectMessage;
pub use request::RequestMessage;

use crate::{
    Error, Result, context::MessageContext, dispatcher::BtMessageDispatcher, peer::Peer,
    storage::PieceStorage,
};

#[derive(Debug)]
pub enum BtMessageKind {
    KeepAlive,
    Choke(ChokeMessage),
    Unchoke(UnchokeMessage),
    Interested(InterestedMessage),
    NotInterested(NotInterestedMessage),
    Have(HaveMessage),
    Bitfield(BitfieldMessage),
    Request(RequestMessage),
    Piece(PieceMessage),
    Cancel(CancelMessage),
    Port(PortMessage),
    SuggestPiece(SuggestPieceMessage),
    HaveAll(HaveAllMessage),
    HaveNone(HaveNoneMessage),
    Reject(RejectMessage),
    AllowedFast(AllowedFastMessage),
    Extended(ExtendedBtMessage),
}

#[derive(Debug)]
pub struct BtMessage {
    kind: BtMessageKind,
    invalidate: bool,
    sending_in_progress: bool,
}

macro_rules! impl_from_variant {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for BtMessage {
                fn from(m: $ty) -> Self {
                    BtMessage::new(BtMessageKind::$variant(m))
                }
            }
        )*
    };
}

impl_from_variant!(
    Choke(ChokeMessage),
    Unchoke(UnchokeMessage),
    Interested(InterestedMessage),
    NotInterested(NotInterestedMessage),
    Have(HaveMessage),
    Bitfield(BitfieldMessage),
    Request(RequestMessage),
    Piece(PieceMessage),
    Cancel(CancelMessage),
    Port(PortMessage),
    SuggestPiece(SuggestPieceMessage),
    HaveAll(HaveAllMessage),
    HaveNone(HaveNoneMessage),
    Reject(RejectMessage),
    AllowedFast(AllowedFastMessage),
    Extended(ExtendedBtMessage),
);

/// Fails with [`Error::FastExtensionDisabled`] unless the peer negotiated
/// the fast extension.
pub(crate) fn require_fast_extension(peer: &Peer, name: &'static str) -> Result<()> {
    if !peer.fast_extension_enabled {
        return Err(Error::FastExtensionDisabled(name));
    }
    Ok(())
}

/// Both ends being seeders makes the connection useless.
pub(crate) fn check_both_seeders(peer: &Peer, storage: &dyn PieceStorage) -> Result<()> {
    if peer.is_seeder() && storage.download_finished() {
        return Err(Error::BothSeeders);
    }
    Ok(())
}

impl BtMessage {
    pub fn new(kind: BtMessageKind) -> Self {
        Self {
            kind,
            invalidate: false,
            sending_in_progress: false,
        }
    }

    pub fn keep_alive() -> Self {
        Self::new(BtMessageKind::KeepAlive)
    }

    pub fn kind(&self) -> &BtMessageKind {
        &self.kind
    }

    pub fn into_kind(self) -> BtMessageKind {
        self.kind
    }

    /// Wire message id, `None` for keep-alive.
    pub fn id(&self) -> Option<u8> {
        self.to_wire().msg_id()
    }

    pub fn name(&self) -> &'static str {
        match &self.kind {
            BtMessageKind::KeepAlive => "keep alive",
            BtMessageKind::Choke(_) => "choke",
            BtMessageKind::Unchoke(_) => "unchoke",
            BtMessageKind::Interested(_) => "interested",
            BtMessageKind::NotInterested(_) => "not interested",
            BtMessageKind::Have(_) => "have",
            BtMessageKind::Bitfield(_) => "bitfield",
            BtMessageKind::Request(_) => "request",
            BtMessageKind::Piece(_) => "piece",
            BtMessageKind::Cancel(_) => "cancel",
            BtMessageKind::Port(_) => "port",
            BtMessageKind::SuggestPiece(_) => "suggest piece",
            BtMessageKind::HaveAll(_) => "have all",
            BtMessageKind::HaveNone(_) => "have none",
            BtMessageKind::Reject(_) => "reject request",
            BtMessageKind::AllowedFast(_) => "allowed fast",
            BtMessageKind::Extended(_) => "extended",
        }
    }

    pub fn is_invalidate(&self) -> bool {
        self.invalidate
    }

    pub fn set_invalidate(&mut self, invalidate: bool) {
        self.invalidate = invalidate;
    }

    pub fn is_sending_in_progress(&self) -> bool {
        self.sending_in_progress
    }

    pub(crate) fn set_sending_in_progress(&mut self, v: bool) {
        self.sending_in_progress = v;
    }

    /// Whether this message carries piece data to the peer.
    pub fn is_uploading(&self) -> bool {
        matches!(self.kind, BtMessageKind::Piece(_))
    }

    pub fn to_wire(&self) -> Message {
        match &self.kind {
            BtMessageKind::KeepAlive => Message::KeepAlive,
            BtMessageKind::Choke(_) => Message::Choke,
            BtMessageKind::Unchoke(_) => Message::Unchoke,
            BtMessageKind::Interested(_) => Message::Interested,
            BtMessageKind::NotInterested(_) => Message::NotInterested,
            BtMessageKind::Have(m) => m.to_wire(),
            BtMessageKind::Bitfield(m) => m.to_wire(),
            BtMessageKind::Request(m) => m.to_wire(),
            BtMessageKind::Piece(m) => m.to_wire(),
            BtMessageKind::Cancel(m) => m.to_wire(),
            BtMessageKind::Port(m) => m.to_wire(),
            BtMessageKind::SuggestPiece(m) => m.to_wire(),
            BtMessageKind::HaveAll(_) => Message::HaveAll,
            BtMessageKind::HaveNone(_) => Message::HaveNone,
            BtMessageKind::Reject(m) => m.to_wire(),
            BtMessageKind::AllowedFast(m) => m.to_wire(),
            BtMessageKind::Extended(m) => m.to_wire(),
        }
    }

    /// Appends the framed message to `out`, returns the number of bytes
    /// written.
    pub fn serialize(&self, out: &mut Vec<u8>) -> usize {
        self.to_wire().serialize(out)
    }

    /// Whether the message is still worth sending given the current peer
    /// state. Messages failing it are dropped from the queue unsent.
    pub(crate) fn send_predicate(&self, peer: &Peer) -> bool {
        match &self.kind {
            BtMessageKind::Choke(_) => !peer.am_choking,
            BtMessageKind::Unchoke(_) => peer.am_choking,
            BtMessageKind::Interested(_) => !peer.am_interested,
            BtMessageKind::NotInterested(_) => peer.am_interested,
            _ => true,
        }
    }

    /// Applies a message received from the peer.
    pub fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        trace!(msg = %self, "received");
        match &self.kind {
            BtMessageKind::KeepAlive => Ok(()),
            BtMessageKind::Choke(m) => m.do_received_action(ctx),
            BtMessageKind::Unchoke(m) => m.do_received_action(ctx),
            BtMessageKind::Interested(m) => m.do_received_action(ctx),
            BtMessageKind::NotInterested(m) => m.do_received_action(ctx),
            BtMessageKind::Have(m) => m.do_received_action(ctx),
            BtMessageKind::Bitfield(m) => m.do_received_action(ctx),
            BtMessageKind::Request(m) => m.do_received_action(ctx),
            BtMessageKind::Piece(m) => m.do_received_action(ctx),
            BtMessageKind::Cancel(m) => m.do_received_action(ctx),
            BtMessageKind::Port(m) => m.do_received_action(ctx),
            BtMessageKind::SuggestPiece(m) => m.do_received_action(ctx),
            BtMessageKind::HaveAll(m) => m.do_received_action(ctx),
            BtMessageKind::HaveNone(m) => m.do_received_action(ctx),
            BtMessageKind::Reject(m) => m.do_received_action(ctx),
            BtMessageKind::AllowedFast(m) => m.do_received_action(ctx),
            BtMessageKind::Extended(m) => m.do_received_action(ctx),
        }
    }

    /// Runs once the whole message reached the transport.
    pub(crate) fn on_send_complete(&self, dispatcher: &mut BtMessageDispatcher, peer: &mut Peer) {
        match &self.kind {
            BtMessageKind::Choke(m) => m.on_send_complete(dispatcher, peer),
            BtMessageKind::Unchoke(m) => m.on_send_complete(peer),
            BtMessageKind::Interested(m) => m.on_send_complete(peer),
            BtMessageKind::NotInterested(m) => m.on_send_complete(peer),
            BtMessageKind::Request(m) => m.on_send_complete(dispatcher),
            BtMessageKind::Piece(m) => m.on_send_complete(peer),
            BtMessageKind::AllowedFast(m) => m.on_send_complete(peer),
            _ => {}
        }
    }

    /// We decided to choke the peer. Returns a Reject to queue, if any.
    pub fn on_choking_event(&mut self, peer: &Peer) -> Option<BtMessage> {
        if self.invalidate || self.sending_in_progress {
            return None;
        }
        match &self.kind {
            BtMessageKind::Piece(m) => {
                let (invalidate, reject) = m.on_choking_event(peer);
                self.invalidate = invalidate;
                reject
            }
            _ => None,
        }
    }

    /// The peer cancelled the block `(index, begin, length)`. Returns a
    /// Reject to queue, if any.
    pub fn on_cancel_sending_piece_event(
        &mut self,
        peer: &Peer,
        index: u32,
        begin: u32,
        length: u32,
    ) -> Option<BtMessage> {
        if self.invalidate || self.sending_in_progress {
            return None;
        }
        match &self.kind {
            BtMessageKind::Piece(m) if m.matches(index, begin, length) => {
                self.invalidate = true;
                m.reject_if_fast(peer)
            }
            _ => None,
        }
    }

    /// We gave up downloading `piece_index` from this peer. Returns the
    /// block index of a Request that got invalidated.
    pub fn on_abort_outstanding_request_event(&mut self, piece_index: u32) -> Option<u32> {
        if self.invalidate || self.sending_in_progress {
            return None;
        }
        match &self.kind {
            BtMessageKind::Request(m) if m.index == piece_index => {
                self.invalidate = true;
                Some(m.block_index)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for BtMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            BtMessageKind::Have(m) => write!(f, "{} index={}", self.name(), m.index),
            BtMessageKind::Bitfield(m) => write!(f, "{} {}", self.name(), m.hex()),
            BtMessageKind::Request(m) => write!(
                f,
                "{} index={}, begin={}, length={}",
                self.name(),
                m.index,
                m.begin,
                m.length
            ),
            BtMessageKind::Piece(m) => write!(
                f,
                "{} index={}, begin={}, length={}",
                self.name(),
                m.index,
                m.begin,
                m.block.len()
            ),
            BtMessageKind::Cancel(m) => write!(
                f,
                "{} index={}, begin={}, length={}",
                self.name(),
                m.index,
                m.begin,
                m.length
            ),
            BtMessageKind::Reject(m) => write!(
                f,
                "{} index={}, begin={}, length={}",
                self.name(),
                m.index,
                m.begin,
                m.length
            ),
            BtMessageKind::Port(m) => write!(f, "{} port={}", self.name(), m.port),
            BtMessageKind::SuggestPiece(m) => write!(f, "{} index={}", self.name(), m.index),
            BtMessageKind::AllowedFast(m) => write!(f, "{} index={}", self.name(), m.index),
            BtMessageKind::Extended(m) => write!(f, "{} {}", self.name(), m.extension()),
            _ => f.write_str(self.name()),
        }
    }
}
