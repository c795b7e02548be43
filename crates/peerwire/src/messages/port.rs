use peer_binary_protocol::Message;
use tracing::debug;

use crate::{Result, context::MessageContext};

/// The peer's DHT port (BEP5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMessage {
    pub port: u16,
}

impl PortMessage {
    pub(crate) fn to_wire(&self) -> Message {
        Message::Port(self.port)
    }

    pub(crate) fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        if self.port == 0 {
            return Ok(());
        }
        debug!(addr = %ctx.peer.addr, port = self.port, "peer dht port");
        ctx.peer.dht_port = Some(self.port);
        Ok(())
    }
}
