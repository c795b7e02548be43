use tracing::debug;

use crate::{Result, context::MessageContext, dispatcher::BtMessageDispatcher, peer::Peer};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChokeMessage;

impl ChokeMessage {
    pub(crate) fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        ctx.peer.peer_choking = true;
        ctx.dispatcher
            .do_choked_action(ctx.peer, ctx.request_factory, ctx.storage);
        Ok(())
    }

    pub(crate) fn on_send_complete(&self, dispatcher: &mut BtMessageDispatcher, peer: &mut Peer) {
        peer.am_choking = true;
        dispatcher.do_choking_action(peer);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnchokeMessage;

impl UnchokeMessage {
    pub(crate) fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        debug!(addr = %ctx.peer.addr, "unchoked by peer");
        ctx.peer.peer_choking = false;
        Ok(())
    }

    pub(crate) fn on_send_complete(&self, peer: &mut Peer) {
        peer.am_choking = false;
    }
}
