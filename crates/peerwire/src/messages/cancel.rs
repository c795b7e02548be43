use peer_binary_protocol::{Message, Request};

use crate::{Result, context::MessageContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelMessage {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

impl CancelMessage {
    pub(crate) fn to_wire(&self) -> Message {
        Message::Cancel(Request::new(self.index, self.begin, self.length))
    }

    pub(crate) fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        ctx.dispatcher
            .do_cancel_sending_piece_action(ctx.peer, self.index, self.begin, self.length);
        Ok(())
    }
}
