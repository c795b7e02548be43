//! BEP6 "allowed fast" set generation.

use std::net::IpAddr;

use sha1w::{ISha1, Sha1};

use crate::Id20;

/// Computes the canonical allowed-fast set for a peer.
///
/// The peer's IPv4 address is masked to /24 and hashed together with the info
/// hash; each 4-byte word of the (iterated) SHA-1 digest picks one piece index.
/// IPv6 peers get an empty set, BEP6 does not define one for them.
///
/// The result has `min(set_size, num_pieces)` distinct entries, in generation
/// order.
pub fn compute_fast_set(
    info_hash: &Id20,
    peer_ip: IpAddr,
    num_pieces: u32,
    set_size: usize,
) -> Vec<u32> {
    let octets = match peer_ip {
        IpAddr::V4(ip) => ip.octets(),
        IpAddr::V6(ip) => match ip.to_ipv4_mapped() {
            Some(ip) => ip.octets(),
            None => return Vec::new(),
        },
    };
    if num_pieces == 0 {
        return Vec::new();
    }
    let set_size = set_size.min(num_pieces as usize);

    let mut x = [0u8; 24];
    x[..3].copy_from_slice(&octets[..3]);
    x[4..].copy_from_slice(&info_hash.0);

    let mut digest = {
        let mut h = Sha1::new();
        h.update(&x);
        h.finish()
    };

    let mut fast_set = Vec::with_capacity(set_size);
    while fast_set.len() < set_size {
        for word in digest.chunks_exact(4) {
            if fast_set.len() >= set_size {
                break;
            }
            let y = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
            let index = y % num_pieces;
            if !fast_set.contains(&index) {
                fast_set.push(index);
            }
        }
        let mut h = Sha1::new();
        h.update(&digest);
        digest = h.finish();
    }
    tracing::trace!(?peer_ip, ?fast_set, "computed allowed fast set");
    fast_set
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test vectors from BEP6.
    #[test]
    fn test_bep6_vectors() {
        let info_hash = Id20::new([0xaa; 20]);
        let ip: IpAddr = "80.4.4.200".parse().unwrap();
        assert_eq!(
            compute_fast_set(&info_hash, ip, 1313, 7),
            vec![1059, 431, 808, 1217, 287, 376, 1188]
        );
        assert_eq!(
            compute_fast_set(&info_hash, ip, 1313, 9),
            vec![1059, 431, 808, 1217, 287, 376, 1188, 353, 508]
        );
    }

    #[test]
    fn test_same_subnet_same_set() {
        let info_hash = Id20::new([0x11; 20]);
        let a = compute_fast_set(&info_hash, "10.0.0.1".parse().unwrap(), 500, 10);
        let b = compute_fast_set(&info_hash, "10.0.0.254".parse().unwrap(), 500, 10);
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);
    }

    #[test]
    fn test_capped_by_num_pieces() {
        let info_hash = Id20::new([0x22; 20]);
        let mut set = compute_fast_set(&info_hash, "192.168.1.1".parse().unwrap(), 3, 10);
        set.sort_unstable();
        assert_eq!(set, vec![0, 1, 2]);
    }

    #[test]
    fn test_ipv6_and_empty_torrent() {
        let info_hash = Id20::new([0x22; 20]);
        assert!(compute_fast_set(&info_hash, "2001:db8::1".parse().unwrap(), 100, 10).is_empty());
        assert!(compute_fast_set(&info_hash, "1.2.3.4".parse().unwrap(), 0, 10).is_empty());
    }
}
