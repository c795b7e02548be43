//! BEP10 extension messages carried inside opcode 20.

mod handshake;
mod unknown;
mod ut_metadata;
mod ut_pex;

use peer_binary_protocol::extended::{
    ExtendedMessage,
    handshake::ExtendedHandshake,
    registry::{ExtensionMessageRegistry, UT_METADATA, UT_PEX, key_bt_extension},
    ut_metadata::UtMetadata,
    ut_pex::UtPex,
};
use tracing::trace;

pub use handshake::HandshakeExtensionMessage;
pub use unknown::UnknownExtensionMessage;
pub use ut_metadata::UtMetadataExtensionMessage;
pub use ut_pex::{MAX_DROPPED_PEERS, MAX_FRESH_PEERS, UtPexExtensionMessage};

use crate::{Result, context::MessageContext};

/// One extension message. New extensions plug in by implementing this and
/// teaching [`ExtensionMessageFactory`] their name.
pub trait ExtensionMessage: std::fmt::Debug + std::fmt::Display + Send {
    fn extension_name(&self) -> &'static str;

    /// The id the receiving side assigned to the extension.
    fn extension_message_id(&self) -> u8;

    fn serialize_payload(&self, out: &mut Vec<u8>);

    fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()>;
}

/// Decodes extension messages addressed to us, using the ids we advertised.
#[derive(Debug, Clone)]
pub struct ExtensionMessageFactory {
    registry: ExtensionMessageRegistry,
}

impl ExtensionMessageFactory {
    pub fn new(registry: ExtensionMessageRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ExtensionMessageRegistry {
        &self.registry
    }

    pub fn create_message(&self, msg: &ExtendedMessage) -> Result<Box<dyn ExtensionMessage>> {
        if msg.is_handshake() {
            let handshake = ExtendedHandshake::deserialize(&msg.payload)?;
            return Ok(Box::new(HandshakeExtensionMessage::new(handshake)));
        }
        let Some(name) = self.registry.get_extension_name(msg.id) else {
            trace!(id = msg.id, "unknown extension message id");
            return Ok(Box::new(UnknownExtensionMessage::new(
                msg.id,
                msg.payload.clone(),
            )));
        };
        match key_bt_extension(name) {
            UT_METADATA => {
                let m = UtMetadata::deserialize(&msg.payload)?;
                Ok(Box::new(UtMetadataExtensionMessage::new(msg.id, m)))
            }
            UT_PEX => {
                let m = UtPex::deserialize(&msg.payload)?;
                Ok(Box::new(UtPexExtensionMessage::new(msg.id, m)))
            }
            _ => Ok(Box::new(UnknownExtensionMessage::new(
                msg.id,
                msg.payload.clone(),
            ))),
        }
    }
}
