use bytes::Bytes;
use peer_binary_protocol::Message;

use super::{check_both_seeders, require_fast_extension};
use crate::{Result, context::MessageContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HaveMessage {
    pub index: u32,
}

impl HaveMessage {
    pub(crate) fn to_wire(&self) -> Message {
        Message::Have(self.index)
    }

    pub(crate) fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        ctx.peer.update_bitfield(self.index);
        check_both_seeders(ctx.peer, ctx.storage)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitfieldMessage {
    pub bitfield: Bytes,
}

impl BitfieldMessage {
    pub(crate) fn to_wire(&self) -> Message {
        Message::Bitfield(self.bitfield.clone())
    }

    pub(crate) fn hex(&self) -> String {
        hex::encode(&self.bitfield)
    }

    pub(crate) fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        ctx.peer.set_bitfield(&self.bitfield);
        check_both_seeders(ctx.peer, ctx.storage)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HaveAllMessage;

impl HaveAllMessage {
    pub(crate) fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        require_fast_extension(ctx.peer, "have all")?;
        ctx.peer.set_all_bitfield();
        check_both_seeders(ctx.peer, ctx.storage)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HaveNoneMessage;

impl HaveNoneMessage {
    pub(crate) fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        require_fast_extension(ctx.peer, "have none")?;
        ctx.peer.clear_bitfield();
        Ok(())
    }
}
