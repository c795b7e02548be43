use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use peer_binary_protocol::extended::registry::{ExtensionKey, ExtensionMessageRegistry};
use peerwire_core::Id20;
use tracing::debug;

use crate::type_aliases::BF;

const DEFAULT_LATENCY: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone)]
pub struct PeerStats {
    pub created_at: Instant,
    pub uploaded_bytes: u64,
    pub downloaded_bytes: u64,
}

impl PeerStats {
    fn new() -> Self {
        Self {
            created_at: Instant::now(),
            uploaded_bytes: 0,
            downloaded_bytes: 0,
        }
    }

    pub fn time_alive(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// The remote end of one connection, as far as the protocol is concerned.
#[derive(Debug, Clone)]
pub struct Peer {
    pub addr: SocketAddr,
    pub peer_id: Option<Id20>,

    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,

    /// Set by the choking algorithm outside this crate.
    pub choking_required: bool,
    pub opt_unchoking: bool,
    /// The peer left our requests unanswered for too long.
    pub snubbing: bool,

    pub fast_extension_enabled: bool,
    pub extended_messaging_enabled: bool,
    pub dht_enabled: bool,

    /// Ids the peer picked for the extensions, see
    /// [`ExtensionMessageRegistry`].
    extensions: ExtensionMessageRegistry,
    pub client_version: Option<String>,
    pub listen_port: Option<u16>,
    pub dht_port: Option<u16>,

    bitfield: BF,
    /// Pieces the peer lets us download while it chokes us.
    peer_allowed_index_set: Vec<u32>,
    /// Pieces we let the peer download while we choke it.
    am_allowed_index_set: Vec<u32>,
    suggested_pieces: Vec<u32>,

    latency: Duration,
    pub stats: PeerStats,
}

impl Peer {
    pub fn new(addr: SocketAddr, num_pieces: u32) -> Self {
        Self {
            addr,
            peer_id: None,
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            choking_required: true,
            opt_unchoking: false,
            snubbing: false,
            fast_extension_enabled: false,
            extended_messaging_enabled: false,
            dht_enabled: false,
            extensions: ExtensionMessageRegistry::new(),
            client_version: None,
            listen_port: None,
            dht_port: None,
            bitfield: BF::repeat(false, num_pieces as usize),
            peer_allowed_index_set: Vec::new(),
            am_allowed_index_set: Vec::new(),
            suggested_pieces: Vec::new(),
            latency: DEFAULT_LATENCY,
            stats: PeerStats::new(),
        }
    }

    pub fn should_be_choking(&self) -> bool {
        !self.opt_unchoking && self.choking_required
    }

    pub fn bitfield(&self) -> &BF {
        &self.bitfield
    }

    pub fn has_piece(&self, index: u32) -> bool {
        self.bitfield
            .get(index as usize)
            .map(|b| *b)
            .unwrap_or(false)
    }

    pub fn update_bitfield(&mut self, index: u32) {
        if let Some(mut bit) = self.bitfield.get_mut(index as usize) {
            *bit = true;
        }
    }

    /// Replaces the bitfield from its wire form. The length must already be
    /// validated.
    pub fn set_bitfield(&mut self, bytes: &[u8]) {
        let len = self.bitfield.len();
        let mut bf = BF::from_slice(bytes);
        bf.truncate(len);
        self.bitfield = bf;
    }

    pub fn set_all_bitfield(&mut self) {
        self.bitfield.fill(true);
    }

    pub fn clear_bitfield(&mut self) {
        self.bitfield.fill(false);
    }

    pub fn is_seeder(&self) -> bool {
        !self.bitfield.is_empty() && self.bitfield.all()
    }

    pub fn is_in_peer_allowed_index_set(&self, index: u32) -> bool {
        self.peer_allowed_index_set.contains(&index)
    }

    pub fn add_peer_allowed_index(&mut self, index: u32) {
        if !self.is_in_peer_allowed_index_set(index) {
            self.peer_allowed_index_set.push(index);
        }
    }

    pub fn peer_allowed_index_set(&self) -> &[u32] {
        &self.peer_allowed_index_set
    }

    pub fn is_in_am_allowed_index_set(&self, index: u32) -> bool {
        self.am_allowed_index_set.contains(&index)
    }

    pub fn add_am_allowed_index(&mut self, index: u32) {
        if !self.is_in_am_allowed_index_set(index) {
            self.am_allowed_index_set.push(index);
        }
    }

    pub fn add_suggested_piece(&mut self, index: u32) {
        if !self.suggested_pieces.contains(&index) {
            self.suggested_pieces.push(index);
        }
    }

    pub fn suggested_pieces(&self) -> &[u32] {
        &self.suggested_pieces
    }

    pub fn extensions(&self) -> &ExtensionMessageRegistry {
        &self.extensions
    }

    pub fn set_extensions(&mut self, extensions: ExtensionMessageRegistry) {
        debug!(addr = %self.addr, ?extensions, "peer extensions");
        self.extensions = extensions;
    }

    pub fn get_extension_message_id(&self, key: ExtensionKey) -> u8 {
        self.extensions.get_extension_message_id(key)
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Moving average over the latencies of answered requests.
    pub fn update_latency(&mut self, latency: Duration) {
        let ms = (self.latency.as_millis() * 2 + latency.as_millis() * 8) / 10;
        self.latency = Duration::from_millis(ms as u64);
    }

    pub fn update_download_length(&mut self, len: u64) {
        self.stats.downloaded_bytes += len;
    }

    pub fn update_upload_length(&mut self, len: u64) {
        self.stats.uploaded_bytes += len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> Peer {
        Peer::new("127.0.0.1:6881".parse().unwrap(), 10)
    }

    #[test]
    fn test_initial_state() {
        let p = peer();
        assert!(p.am_choking && p.peer_choking);
        assert!(!p.am_interested && !p.peer_interested);
        assert!(p.should_be_choking());
        assert_eq!(p.latency(), Duration::from_millis(1500));
    }

    #[test]
    fn test_bitfield() {
        let mut p = peer();
        p.set_bitfield(&[0b1000_0000, 0b0100_0000]);
        assert!(p.has_piece(0));
        assert!(p.has_piece(9));
        assert!(!p.has_piece(1));
        assert_eq!(p.bitfield().len(), 10);
        assert!(!p.is_seeder());
        p.set_all_bitfield();
        assert!(p.is_seeder());
        p.clear_bitfield();
        p.update_bitfield(3);
        assert_eq!(p.bitfield().count_ones(), 1);
        p.update_bitfield(100);
        assert_eq!(p.bitfield().count_ones(), 1);
    }

    #[test]
    fn test_allowed_sets_are_sets() {
        let mut p = peer();
        p.add_peer_allowed_index(3);
        p.add_peer_allowed_index(3);
        p.add_am_allowed_index(4);
        assert_eq!(p.peer_allowed_index_set(), &[3]);
        assert!(p.is_in_am_allowed_index_set(4));
        assert!(!p.is_in_am_allowed_index_set(3));
    }

    #[test]
    fn test_latency_average() {
        let mut p = peer();
        p.update_latency(Duration::from_millis(100));
        assert_eq!(p.latency(), Duration::from_millis(380));
    }
}
