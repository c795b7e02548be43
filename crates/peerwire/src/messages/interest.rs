use crate::{Result, context::MessageContext, peer::Peer};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterestedMessage;

impl InterestedMessage {
    pub(crate) fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        ctx.peer.peer_interested = true;
        Ok(())
    }

    pub(crate) fn on_send_complete(&self, peer: &mut Peer) {
        peer.am_interested = true;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotInterestedMessage;

impl NotInterestedMessage {
    pub(crate) fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        ctx.peer.peer_interested = false;
        Ok(())
    }

    pub(crate) fn on_send_complete(&self, peer: &mut Peer) {
        peer.am_interested = false;
    }
}
