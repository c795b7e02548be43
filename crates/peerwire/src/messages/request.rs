use peer_binary_protocol::{Message, Request};
use tracing::trace;

use crate::{
    Error, Result, context::MessageContext, dispatcher::BtMessageDispatcher,
    request_slot::RequestSlot,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestMessage {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
    /// Block of our piece this request asks for. Meaningless for requests
    /// we receive.
    pub block_index: u32,
}

impl RequestMessage {
    pub(crate) fn to_wire(&self) -> Message {
        Message::Request(Request::new(self.index, self.begin, self.length))
    }

    pub(crate) fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        let peer = &*ctx.peer;
        let allowed_while_choking =
            peer.fast_extension_enabled && peer.is_in_am_allowed_index_set(self.index);
        if ctx.storage.has_piece(self.index) && (!peer.am_choking || allowed_while_choking) {
            let block = ctx
                .storage
                .read_block(self.index, self.begin, self.length)
                .map_err(Error::Storage)?;
            let msg = ctx.factory.create_piece_message(self.index, self.begin, block)?;
            ctx.dispatcher.add_message_to_queue(msg);
        } else if peer.fast_extension_enabled {
            let msg = ctx
                .factory
                .create_reject_message(self.index, self.begin, self.length)?;
            ctx.dispatcher.add_message_to_queue(msg);
        } else {
            trace!(
                index = self.index,
                begin = self.begin,
                "ignoring request while choking"
            );
        }
        Ok(())
    }

    pub(crate) fn on_send_complete(&self, dispatcher: &mut BtMessageDispatcher) {
        dispatcher.add_outstanding_request(RequestSlot::new(
            self.index,
            self.begin,
            self.length,
            self.block_index,
        ));
    }
}
