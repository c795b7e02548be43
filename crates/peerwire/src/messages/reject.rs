use peer_binary_protocol::{Message, Request};
use tracing::debug;

use super::require_fast_extension;
use crate::{Result, context::MessageContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RejectMessage {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

impl RejectMessage {
    pub(crate) fn to_wire(&self) -> Message {
        Message::RejectRequest(Request::new(self.index, self.begin, self.length))
    }

    pub(crate) fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        require_fast_extension(ctx.peer, "reject request")?;
        match ctx
            .dispatcher
            .get_outstanding_request(self.index, self.begin, self.length)
        {
            Some(slot) => ctx
                .dispatcher
                .remove_outstanding_request(&slot, ctx.storage),
            None => debug!(
                index = self.index,
                begin = self.begin,
                length = self.length,
                "reject for a request we don't have"
            ),
        }
        Ok(())
    }
}
