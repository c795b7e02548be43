use peer_binary_protocol::MessageDeserializeError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("wrong info hash")]
    WrongInfoHash,
    #[error("connecting to ourselves")]
    ConnectingToOurselves,

    #[error("error writing: {0:#}")]
    Write(#[source] std::io::Error),
    #[error("error reading: {0:#}")]
    Read(#[source] std::io::Error),

    #[error("peer disconnected while reading handshake")]
    PeerDisconnectedReadingHandshake,
    #[error("peer disconnected")]
    PeerDisconnected,

    #[error("error deserializing handshake: {0:#}")]
    DeserializeHandshake(#[source] MessageDeserializeError),
    #[error("error deserializing message: {0:#}")]
    Deserialize(
        #[from]
        #[source]
        MessageDeserializeError,
    ),
    #[error(transparent)]
    Core(#[from] peerwire_core::Error),

    #[error("received {0} but the fast extension is not enabled")]
    FastExtensionDisabled(&'static str),
    #[error("received extended message but extended messaging is not enabled")]
    ExtendedMessagingDisabled,
    #[error("peer did not negotiate extension {0}")]
    ExtensionNotNegotiated(&'static str),

    #[error("{name}: invalid piece index {index}")]
    InvalidPieceIndex { name: &'static str, index: u32 },
    #[error("{name}: invalid block index={index} begin={begin} length={length}")]
    InvalidBlock {
        name: &'static str,
        index: u32,
        begin: u32,
        length: u32,
    },
    #[error("bitfield: expected {expected} bytes, received {received}")]
    BitfieldLength { expected: usize, received: usize },
    #[error("bitfield: spare bits are set")]
    BitfieldSpareBits,

    #[error("client and peer are both seeders")]
    BothSeeders,

    #[error("storage error: {0:#}")]
    Storage(#[source] anyhow::Error),

    #[error("flooding detected: {0}")]
    Flooding(&'static str),
    #[error("disconnecting: {0}")]
    Inactive(&'static str),
}

pub type Result<T> = core::result::Result<T, Error>;
