#![no_main]

use libfuzzer_sys::fuzz_target;
use peer_binary_protocol::{Handshake, Message, extended::handshake::ExtendedHandshake};

fuzz_target!(|data: &[u8]| {
    let _ = Handshake::deserialize(data);
    let _ = ExtendedHandshake::deserialize(data);
    if let Ok((msg, _)) = Message::deserialize(data) {
        let mut buf = Vec::new();
        msg.serialize(&mut buf);
    }
});
