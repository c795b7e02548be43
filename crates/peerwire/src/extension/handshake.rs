use peer_binary_protocol::extended::{
    EXTENDED_HANDSHAKE_ID, handshake::ExtendedHandshake, registry::key_bt_extension,
};
use tracing::info;

use super::ExtensionMessage;
use crate::{Result, context::MessageContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeExtensionMessage {
    handshake: ExtendedHandshake,
}

impl HandshakeExtensionMessage {
    pub fn new(handshake: ExtendedHandshake) -> Self {
        Self { handshake }
    }

    pub fn handshake(&self) -> &ExtendedHandshake {
        &self.handshake
    }
}

impl std::fmt::Display for HandshakeExtensionMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handshake")?;
        if let Some(v) = &self.handshake.v {
            write!(f, " client={v}")?;
        }
        if let Some(p) = self.handshake.p {
            write!(f, ", tcpPort={p}")?;
        }
        if let Some(size) = self.handshake.metadata_size {
            write!(f, ", metadataSize={size}")?;
        }
        for (name, id) in self.handshake.m.iter() {
            write!(f, ", {name}={id}")?;
        }
        Ok(())
    }
}

impl ExtensionMessage for HandshakeExtensionMessage {
    fn extension_name(&self) -> &'static str {
        "handshake"
    }

    fn extension_message_id(&self) -> u8 {
        EXTENDED_HANDSHAKE_ID
    }

    fn serialize_payload(&self, out: &mut Vec<u8>) {
        self.handshake.serialize(out)
    }

    fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        let peer = &mut *ctx.peer;
        if let Some(port) = self.handshake.p {
            peer.listen_port = Some(port);
        }
        if let Some(v) = &self.handshake.v {
            peer.client_version = Some(v.clone());
        }
        // Ids only get filled in; a later handshake can't unset one.
        let mut extensions = *peer.extensions();
        for (name, id) in self.handshake.registry().iter() {
            extensions.set_extension_message_id(key_bt_extension(name), id);
        }
        peer.set_extensions(extensions);
        info!(
            addr = %peer.addr,
            client = ?peer.client_version,
            listen_port = ?peer.listen_port,
            "received extended handshake"
        );
        Ok(())
    }
}
