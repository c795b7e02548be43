use peer_binary_protocol::extended::ut_pex::UtPex;
use tracing::debug;

use super::ExtensionMessage;
use crate::{Result, context::MessageContext, events::SessionEvent};

/// At most this many peers go into one message as added.
pub const MAX_FRESH_PEERS: usize = 50;
/// At most this many peers go into one message as dropped.
pub const MAX_DROPPED_PEERS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtPexExtensionMessage {
    id: u8,
    pex: UtPex,
}

impl UtPexExtensionMessage {
    pub fn new(id: u8, pex: UtPex) -> Self {
        Self { id, pex }
    }

    pub fn pex(&self) -> &UtPex {
        &self.pex
    }
}

impl std::fmt::Display for UtPexExtensionMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ut_pex added={}, dropped={}",
            self.pex.added_peers().count(),
            self.pex.dropped_peers().count()
        )
    }
}

impl ExtensionMessage for UtPexExtensionMessage {
    fn extension_name(&self) -> &'static str {
        "ut_pex"
    }

    fn extension_message_id(&self) -> u8 {
        self.id
    }

    fn serialize_payload(&self, out: &mut Vec<u8>) {
        self.pex.serialize(out)
    }

    fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        let added: Vec<_> = self.pex.added_peers().collect();
        let dropped: Vec<_> = self.pex.dropped_peers().map(|p| p.addr).collect();
        debug!(
            addr = %ctx.peer.addr,
            added = added.len(),
            dropped = dropped.len(),
            "received peers"
        );
        if !added.is_empty() || !dropped.is_empty() {
            ctx.events.push(SessionEvent::PexPeers { added, dropped });
        }
        Ok(())
    }
}
