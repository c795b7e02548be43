//! Per-peer table of negotiated BEP10 extension ids.

/// Keys of the extensions we know about. Indexes into the registry table.
pub type ExtensionKey = usize;

pub const UT_METADATA: ExtensionKey = 0;
pub const UT_PEX: ExtensionKey = 1;
pub const MAX_EXTENSION: ExtensionKey = 2;

const EXTENSION_NAMES: [&str; MAX_EXTENSION] = ["ut_metadata", "ut_pex"];

/// Name of an extension key, `None` for keys out of range.
pub fn str_bt_extension(key: ExtensionKey) -> Option<&'static str> {
    EXTENSION_NAMES.get(key).copied()
}

/// Key of an extension name, [`MAX_EXTENSION`] if the name is unknown.
pub fn key_bt_extension(name: &str) -> ExtensionKey {
    EXTENSION_NAMES
        .iter()
        .position(|n| *n == name)
        .unwrap_or(MAX_EXTENSION)
}

/// Maps extension keys to the wire ids one side picked for them. Id 0 means
/// unsupported.
///
/// Two keys may end up with the same id if a peer sends such a handshake;
/// [`get_extension_name`](Self::get_extension_name) then reports the first
/// key.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionMessageRegistry {
    ids: [u8; MAX_EXTENSION],
}

impl ExtensionMessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The ids we assign to our own extensions in the handshake we send.
    pub fn my() -> Self {
        let mut r = Self::new();
        for key in 0..MAX_EXTENSION {
            r.set_extension_message_id(key, key as u8 + 1);
        }
        r
    }

    /// # Panics
    /// If `key >= MAX_EXTENSION`.
    pub fn get_extension_message_id(&self, key: ExtensionKey) -> u8 {
        assert!(key < MAX_EXTENSION, "extension key {key} out of range");
        self.ids[key]
    }

    pub fn get_extension_name(&self, id: u8) -> Option<&'static str> {
        if id == 0 {
            return None;
        }
        let key = self.ids.iter().position(|i| *i == id)?;
        str_bt_extension(key)
    }

    /// # Panics
    /// If `key >= MAX_EXTENSION`.
    pub fn set_extension_message_id(&mut self, key: ExtensionKey, id: u8) {
        assert!(key < MAX_EXTENSION, "extension key {key} out of range");
        if id != 0 {
            if let Some(other) = self.ids.iter().position(|i| *i == id).filter(|k| *k != key) {
                tracing::debug!(
                    id,
                    key = str_bt_extension(key),
                    other = str_bt_extension(other),
                    "extension id already used by another extension"
                );
            }
        }
        self.ids[key] = id;
    }

    /// # Panics
    /// If `key >= MAX_EXTENSION`.
    pub fn remove_extension(&mut self, key: ExtensionKey) {
        assert!(key < MAX_EXTENSION, "extension key {key} out of range");
        self.ids[key] = 0;
    }

    pub fn supports(&self, key: ExtensionKey) -> bool {
        self.get_extension_message_id(key) != 0
    }

    /// `(name, id)` for every extension with a non-zero id.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u8)> + '_ {
        self.ids
            .iter()
            .zip(EXTENSION_NAMES)
            .filter(|(id, _)| **id != 0)
            .map(|(id, name)| (name, *id))
    }
}
