use crate::{
    dispatcher::BtMessageDispatcher, events::SessionEvent, message_factory::BtMessageFactory,
    peer::Peer, request_factory::BtRequestFactory, storage::PieceStorage,
    type_aliases::SessionId,
};

/// Everything a received message may touch while it is applied.
pub struct MessageContext<'a> {
    pub session_id: SessionId,
    pub peer: &'a mut Peer,
    pub dispatcher: &'a mut BtMessageDispatcher,
    pub request_factory: &'a mut BtRequestFactory,
    pub storage: &'a mut dyn PieceStorage,
    pub factory: &'a BtMessageFactory,
    pub events: &'a mut Vec<SessionEvent>,
}
