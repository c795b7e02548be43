use peer_binary_protocol::{Message, extended::ExtendedMessage};

use crate::{Result, context::MessageContext, extension::ExtensionMessage};

/// Opcode 20 wrapping one BEP10 message.
#[derive(Debug)]
pub struct ExtendedBtMessage {
    extension: Box<dyn ExtensionMessage>,
}

impl ExtendedBtMessage {
    pub fn new(extension: Box<dyn ExtensionMessage>) -> Self {
        Self { extension }
    }

    pub fn extension(&self) -> &dyn ExtensionMessage {
        self.extension.as_ref()
    }

    pub(crate) fn to_wire(&self) -> Message {
        let mut payload = Vec::new();
        self.extension.serialize_payload(&mut payload);
        Message::Extended(ExtendedMessage::new(
            self.extension.extension_message_id(),
            payload,
        ))
    }

    pub(crate) fn do_received_action(&self, ctx: &mut MessageContext<'_>) -> Result<()> {
        self.extension.do_received_action(ctx)
    }
}
