use bytes::Bytes;
use tracing::debug;

use super::ExtensionMessage;
use crate::{Result, context::MessageContext};

/// An extension we don't implement. Received ones are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownExtensionMessage {
    id: u8,
    payload: Bytes,
}

impl UnknownExtensionMessage {
    pub fn new(id: u8, payload: Bytes) -> Self {
        Self { id, payload }
    }
}

impl std::fmt::Display for UnknownExtensionMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown id={} length={}", self.id, self.payload.len())
    }
}

impl ExtensionMessage for UnknownExtensionMessage {
    fn extension_name(&self) -> &'static str {
        "unknown"
    }

    fn extension_message_id(&self) -> u8 {
        self.id
    }

    fn serialize_payload(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.payload)
    }

    fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        debug!(addr = %ctx.peer.addr, id = self.id, "ignoring unknown extension message");
        Ok(())
    }
}
